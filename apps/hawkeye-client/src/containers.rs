//! Built-in containers used when no custom handler claims a resource type.
//!
//! These hold the state a renderer needs (label, controls, statistics, form
//! fields). How that state is drawn is up to the embedding UI.

use std::any::Any;

use hawkeye_proto::property::{ACCESS_KEY, VALUE_KEY};
use hawkeye_proto::{Change, ChangeMessage, PropertyShape, PropertyValue, ResourceKind};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::CommandError;
use crate::outbox::Outbox;
use crate::widget::{GroupSpec, Widget};

/// State shared by every message-driven container.
#[derive(Debug, Clone)]
pub struct MessageState {
    kind: ResourceKind,
    label: String,
    message: Option<ChangeMessage>,
    configured: usize,
}

impl MessageState {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            label: String::new(),
            message: None,
            configured: 0,
        }
    }

    fn apply(&mut self, message: &ChangeMessage) {
        self.kind = message.kind();
        self.label = message.display_name.clone();
        self.message = Some(message.clone());
        self.configured += 1;
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn message(&self) -> Option<&ChangeMessage> {
        self.message.as_ref()
    }

    /// How many times `configure` has run, including the initial one.
    pub fn configured(&self) -> usize {
        self.configured
    }
}

macro_rules! widget_any {
    () => {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

/// Label-only container, optionally with group sub-containers.
#[derive(Debug, Clone)]
pub struct PlainContainer {
    state: MessageState,
    groups: Vec<GroupSpec>,
}

impl PlainContainer {
    pub fn new(message: &ChangeMessage, groups: Vec<GroupSpec>) -> Self {
        let mut container = Self {
            state: MessageState::new(message.kind()),
            groups,
        };
        container.configure(message);
        container
    }

    pub fn domain(message: &ChangeMessage) -> Self {
        Self::new(
            message,
            vec![
                GroupSpec::new(ResourceKind::DeviceManager, "Device Managers"),
                GroupSpec::new(ResourceKind::Application, "Running Applications"),
            ],
        )
    }

    /// Devices and components both collect properties and ports.
    pub fn component(message: &ChangeMessage) -> Self {
        Self::new(
            message,
            vec![
                GroupSpec::new(ResourceKind::Property, "Properties"),
                GroupSpec::new(ResourceKind::Port, "Ports"),
            ],
        )
    }

    pub fn device(message: &ChangeMessage) -> Self {
        Self::component(message)
    }

    pub fn device_manager(message: &ChangeMessage) -> Self {
        Self::new(message, Vec::new())
    }

    pub fn service(message: &ChangeMessage) -> Self {
        Self::new(message, Vec::new())
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }
}

impl Widget for PlainContainer {
    fn configure(&mut self, message: &ChangeMessage) {
        self.state.apply(message);
    }

    fn groups(&self) -> Vec<GroupSpec> {
        self.groups.clone()
    }

    widget_any!();
}

/// Running application with start/stop/release controls.
#[derive(Debug, Clone)]
pub struct ApplicationContainer {
    state: MessageState,
    outbox: Outbox,
    running: bool,
}

impl ApplicationContainer {
    pub fn new(message: &ChangeMessage, outbox: Outbox) -> Self {
        let mut container = Self {
            state: MessageState::new(ResourceKind::Application),
            outbox,
            running: false,
        };
        container.configure(message);
        container
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Text of the start/stop control.
    pub fn control_label(&self) -> &'static str {
        if self.running {
            "Stop"
        } else {
            "Start"
        }
    }

    pub fn start(&self) -> Result<(), CommandError> {
        self.send(Change::Start)
    }

    pub fn stop(&self) -> Result<(), CommandError> {
        self.send(Change::Stop)
    }

    /// A second stop releases the application.
    pub fn release(&self) -> Result<(), CommandError> {
        self.stop()?;
        self.stop()
    }

    fn send(&self, change: Change) -> Result<(), CommandError> {
        let message = self.state.message().ok_or(CommandError::NotConfigured)?;
        self.outbox.request(message.command(change));
        Ok(())
    }
}

impl Widget for ApplicationContainer {
    fn configure(&mut self, message: &ChangeMessage) {
        self.running = message.extra.get_bool("running").unwrap_or(false);
        self.state.apply(message);
    }

    widget_any!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortControl {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub packets: u64,
    pub length: usize,
    pub visible: bool,
}

/// Port with a start/stop streaming control and packet statistics.
#[derive(Debug, Clone)]
pub struct PortContainer {
    state: MessageState,
    outbox: Outbox,
    control: PortControl,
    armed: Option<ChangeMessage>,
    stats: PortStats,
}

impl PortContainer {
    pub fn new(message: &ChangeMessage, outbox: Outbox) -> Self {
        let mut container = Self {
            state: MessageState::new(ResourceKind::Port),
            outbox,
            control: PortControl::Start,
            armed: None,
            stats: PortStats::default(),
        };
        container.configure(message);
        container
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }

    pub fn control(&self) -> PortControl {
        self.control
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    /// Sends whatever command the control is currently armed with.
    pub fn press(&self) -> Result<(), CommandError> {
        let command = self.armed.clone().ok_or(CommandError::NotConfigured)?;
        self.outbox.request(command);
        Ok(())
    }

    fn arm(&mut self, control: PortControl, message: &ChangeMessage) {
        if self.control != control || self.armed.is_none() {
            let verb = match control {
                PortControl::Start => Change::Start,
                PortControl::Stop => Change::Stop,
            };
            self.control = control;
            self.armed = Some(message.command(verb));
        }
    }
}

impl Widget for PortContainer {
    fn configure(&mut self, message: &ChangeMessage) {
        match message.change {
            Change::Add | Change::Update => {
                self.stats = PortStats::default();
                self.arm(PortControl::Start, message);
            }
            Change::Stream => {
                self.arm(PortControl::Stop, message);
                let length = message
                    .extra
                    .get("data")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                if length > 0 {
                    self.stats.packets += 1;
                    self.stats.length = length;
                    self.stats.visible = true;
                }
            }
            Change::Remove => {
                // leaving the tree mid-stream must not leave the backend pushing
                if self.control == PortControl::Stop {
                    self.outbox.request(message.command(Change::Stop));
                    self.control = PortControl::Start;
                    self.armed = None;
                }
            }
            _ => {}
        }
        self.state.apply(message);
    }

    widget_any!();
}

/// One editable input of a property form.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyField {
    pub index: usize,
    pub name: String,
    pub value: Value,
}

/// Property rendered as a form whose layout follows the value's shape.
#[derive(Debug, Clone)]
pub struct PropertyContainer {
    state: MessageState,
    outbox: Outbox,
    shape: Option<PropertyShape>,
    readonly: bool,
    fields: Vec<PropertyField>,
}

impl PropertyContainer {
    pub fn new(message: &ChangeMessage, outbox: Outbox) -> Self {
        let mut container = Self {
            state: MessageState::new(ResourceKind::Property),
            outbox,
            shape: None,
            readonly: false,
            fields: Vec::new(),
        };
        container.configure(message);
        container
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }

    pub fn shape(&self) -> Option<PropertyShape> {
        self.shape
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn fields(&self) -> &[PropertyField] {
        &self.fields
    }

    pub fn set_field(&mut self, index: usize, name: &str, value: Value) -> Result<(), CommandError> {
        let field = self
            .fields
            .iter_mut()
            .find(|field| field.index == index && field.name == name)
            .ok_or_else(|| CommandError::UnknownField {
                index,
                name: name.to_string(),
            })?;
        field.value = value;
        Ok(())
    }

    /// Sends the edited value upstream as an `update` of the full message.
    pub fn submit(&self) -> Result<(), CommandError> {
        let message = self.state.message().ok_or(CommandError::NotConfigured)?;
        if self.readonly {
            return Err(CommandError::ReadOnly(message.resource_id.clone()));
        }
        let shape = self.shape.ok_or(CommandError::NotConfigured)?;

        let mut request = message.clone();
        request.change = Change::Update;
        request.extra.insert(VALUE_KEY, self.collect(shape));
        self.outbox.request(request);
        Ok(())
    }

    fn collect(&self, shape: PropertyShape) -> Value {
        match shape {
            PropertyShape::Simple => self
                .fields
                .first()
                .map(|field| field.value.clone())
                .unwrap_or(Value::Null),
            PropertyShape::Struct => Value::Object(
                self.fields
                    .iter()
                    .map(|field| (field.name.clone(), field.value.clone()))
                    .collect(),
            ),
            PropertyShape::Sequence => {
                Value::Array(self.fields.iter().map(|field| field.value.clone()).collect())
            }
            PropertyShape::StructSequence => {
                let mut rows: Vec<Map<String, Value>> = Vec::new();
                for field in &self.fields {
                    if rows.len() <= field.index {
                        rows.resize_with(field.index + 1, Map::new);
                    }
                    rows[field.index].insert(field.name.clone(), field.value.clone());
                }
                Value::Array(rows.into_iter().map(Value::Object).collect())
            }
        }
    }

    fn layout(message: &ChangeMessage, value: PropertyValue) -> Vec<PropertyField> {
        match value {
            PropertyValue::Simple(value) => vec![PropertyField {
                index: 0,
                name: message.display_name.clone(),
                value,
            }],
            PropertyValue::Struct(map) => map
                .into_iter()
                .map(|(name, value)| PropertyField {
                    index: 0,
                    name,
                    value,
                })
                .collect(),
            PropertyValue::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, value)| PropertyField {
                    index,
                    name: format!("Index {index}"),
                    value,
                })
                .collect(),
            PropertyValue::StructSequence(rows) => rows
                .into_iter()
                .enumerate()
                .flat_map(|(index, row)| {
                    row.into_iter().map(move |(name, value)| PropertyField {
                        index,
                        name,
                        value,
                    })
                })
                .collect(),
        }
    }
}

impl Widget for PropertyContainer {
    fn configure(&mut self, message: &ChangeMessage) {
        self.readonly = message.extra.get_str(ACCESS_KEY) == Some("readonly");
        match PropertyValue::from_extra(&message.extra) {
            Ok(value) => {
                self.shape = Some(value.shape());
                self.fields = Self::layout(message, value);
            }
            Err(err) => {
                warn!(
                    rhid = %message.resource_id,
                    error = %err,
                    "property value could not be laid out"
                );
                self.shape = None;
                self.fields.clear();
            }
        }
        self.state.apply(message);
    }

    widget_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(change: Change, rhtype: &str, rhid: &str, extra: Value) -> ChangeMessage {
        ChangeMessage::new(change, rhtype, rhid, rhid.to_uppercase())
            .with_extra(extra.as_object().cloned().unwrap())
    }

    #[test]
    fn application_commands_are_stripped() {
        let outbox = Outbox::new();
        let msg = message(
            Change::Add,
            "application",
            "app1",
            json!({"parentID": "d1", "running": true, "components": ["a", "b"]}),
        );
        let app = ApplicationContainer::new(&msg, outbox.clone());
        assert!(app.is_running());
        assert_eq!(app.control_label(), "Stop");

        app.release().unwrap();
        let frames = outbox.drain();
        assert_eq!(frames.len(), 2);
        for frame in frames {
            let cmd = &frame.0[0];
            assert_eq!(cmd.change, Change::Stop);
            assert_eq!(cmd.extra.parent_id, "d1");
            assert!(cmd.extra.fields.is_empty());
        }
    }

    #[test]
    fn port_tracks_stream_statistics() {
        let outbox = Outbox::new();
        let add = message(Change::Add, "port", "p1", json!({"parentID": "c1"}));
        let mut port = PortContainer::new(&add, outbox.clone());
        assert_eq!(port.control(), PortControl::Start);
        assert_eq!(port.stats(), PortStats::default());

        port.configure(&message(
            Change::Stream,
            "port",
            "p1",
            json!({"parentID": "c1", "data": [1, 2, 3]}),
        ));
        port.configure(&message(
            Change::Stream,
            "port",
            "p1",
            json!({"parentID": "c1", "data": [4, 5]}),
        ));
        assert_eq!(port.control(), PortControl::Stop);
        assert_eq!(
            port.stats(),
            PortStats {
                packets: 2,
                length: 2,
                visible: true
            }
        );

        port.press().unwrap();
        assert_eq!(outbox.drain()[0].0[0].change, Change::Stop);

        port.configure(&message(Change::Update, "port", "p1", json!({"parentID": "c1"})));
        assert_eq!(port.stats(), PortStats::default());
        assert_eq!(port.control(), PortControl::Start);
    }

    #[test]
    fn empty_stream_does_not_count() {
        let outbox = Outbox::new();
        let add = message(Change::Add, "port", "p1", json!({}));
        let mut port = PortContainer::new(&add, outbox);
        port.configure(&message(Change::Stream, "port", "p1", json!({"data": []})));
        assert_eq!(port.stats().packets, 0);
        assert!(!port.stats().visible);
        assert_eq!(port.control(), PortControl::Stop);
    }

    #[test]
    fn removing_streaming_port_sends_stop() {
        let outbox = Outbox::new();
        let add = message(Change::Add, "port", "p1", json!({"parentID": "c1"}));
        let mut port = PortContainer::new(&add, outbox.clone());
        port.configure(&message(Change::Stream, "port", "p1", json!({"parentID": "c1", "data": [1]})));
        port.configure(&message(Change::Remove, "port", "p1", json!({"parentID": "c1"})));

        let frames = outbox.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0[0].change, Change::Stop);
        assert_eq!(frames[0].0[0].resource_id, "p1");
    }

    #[test]
    fn property_struct_sequence_round_trips_through_form() {
        let outbox = Outbox::new();
        let msg = message(
            Change::Add,
            "property",
            "prop1",
            json!({
                "parentID": "c1",
                "access": "readwrite",
                "value": [{"freq": 1.0, "gain": 2}, {"freq": 3.0, "gain": 4}]
            }),
        );
        let mut prop = PropertyContainer::new(&msg, outbox.clone());
        assert_eq!(prop.shape(), Some(PropertyShape::StructSequence));
        assert_eq!(prop.fields().len(), 4);

        prop.set_field(1, "gain", json!(9)).unwrap();
        prop.submit().unwrap();

        let sent = &outbox.drain()[0].0[0];
        assert_eq!(sent.change, Change::Update);
        assert_eq!(
            sent.extra.get("value"),
            Some(&json!([{"freq": 1.0, "gain": 2}, {"freq": 3.0, "gain": 9}]))
        );
        assert_eq!(sent.extra.get_str("access"), Some("readwrite"));
    }

    #[test]
    fn readonly_property_refuses_submit() {
        let outbox = Outbox::new();
        let msg = message(
            Change::Add,
            "property",
            "prop1",
            json!({"access": "readonly", "value": 3}),
        );
        let prop = PropertyContainer::new(&msg, outbox.clone());
        assert!(prop.is_readonly());
        assert_eq!(prop.fields()[0].name, "PROP1");
        assert_eq!(
            prop.submit(),
            Err(CommandError::ReadOnly("prop1".into()))
        );
        assert!(outbox.is_empty());
    }

    #[test]
    fn malformed_property_value_leaves_empty_form() {
        let outbox = Outbox::new();
        let msg = message(
            Change::Add,
            "property",
            "prop1",
            json!({"valueKind": "struct", "value": [1, 2]}),
        );
        let prop = PropertyContainer::new(&msg, outbox);
        assert_eq!(prop.shape(), None);
        assert!(prop.fields().is_empty());
        assert_eq!(prop.state().configured(), 1);
        assert_eq!(prop.submit(), Err(CommandError::NotConfigured));
    }

    #[test]
    fn unknown_field_is_reported() {
        let outbox = Outbox::new();
        let msg = message(Change::Add, "property", "p", json!({"value": {"a": 1}}));
        let mut prop = PropertyContainer::new(&msg, outbox);
        assert!(matches!(
            prop.set_field(0, "b", json!(2)),
            Err(CommandError::UnknownField { .. })
        ));
    }
}

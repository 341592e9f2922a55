use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::change::Change;
use crate::kind::ResourceKind;

/// Wire key of the logical parent inside `more`.
pub const PARENT_ID_KEY: &str = "parentID";

/// The open `more` mapping of a message.
///
/// `parent_id` is always present (empty for root-level resources); every
/// other type-specific field lives in `fields` and is flattened back next to
/// it on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Extra {
    #[serde(
        rename = "parentID",
        alias = "parentId",
        default,
        deserialize_with = "string_or_null"
    )]
    pub parent_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Extra {
    pub fn with_parent(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            fields: Map::new(),
        }
    }

    /// Builds an `Extra` from an arbitrary mapping, pulling `parentID` out of
    /// it. A missing or null parent becomes the empty string.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let parent = map
            .remove(PARENT_ID_KEY)
            .or_else(|| map.remove("parentId"));
        let parent_id = match parent {
            Some(Value::String(id)) => id,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            parent_id,
            fields: map,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }
}

/// The atomic unit exchanged by browser, session and backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub change: Change,
    #[serde(rename = "rhtype")]
    pub resource_type: String,
    #[serde(rename = "rhid")]
    pub resource_id: String,
    #[serde(rename = "rhname", default, deserialize_with = "string_or_null")]
    pub display_name: String,
    #[serde(rename = "more", default, deserialize_with = "extra_or_null")]
    pub extra: Extra,
}

impl ChangeMessage {
    pub fn new(
        change: impl Into<Change>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            change: change.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            display_name: display_name.into(),
            extra: Extra::default(),
        }
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = Extra::from_map(extra);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.extra.parent_id = parent_id.into();
        self
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_tag(&self.resource_type)
    }

    /// The logical parent, or `None` for root-level resources.
    pub fn parent_id(&self) -> Option<&str> {
        let parent = self.extra.parent_id.as_str();
        (!parent.is_empty()).then_some(parent)
    }

    /// Copy of this message keeping only the identity fields and `parentID`.
    ///
    /// Used to send commands back upstream without echoing bulk payloads such
    /// as property values or stream buffers.
    pub fn strip(&self) -> ChangeMessage {
        ChangeMessage {
            change: self.change.clone(),
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            display_name: self.display_name.clone(),
            extra: Extra::with_parent(self.extra.parent_id.clone()),
        }
    }

    /// Stripped copy carrying `change` as its verb.
    pub fn command(&self, change: Change) -> ChangeMessage {
        let mut command = self.strip();
        command.change = change;
        command
    }
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn extra_or_null<'de, D>(deserializer: D) -> Result<Extra, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Extra>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructor_defaults_parent_to_empty() {
        let msg = ChangeMessage::new(Change::Add, "domain", "d1", "REDHAWK");
        assert_eq!(msg.extra.parent_id, "");
        assert_eq!(msg.parent_id(), None);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["more"]["parentID"], json!(""));
    }

    #[test]
    fn decodes_wire_shape_with_flattened_extra() {
        let raw = json!({
            "change": "stream",
            "rhtype": "port",
            "rhid": "p1",
            "rhname": "dataFloat_out",
            "more": { "parentID": "c1", "data": [1, 2, 3] }
        });
        let msg: ChangeMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.change, Change::Stream);
        assert_eq!(msg.kind(), ResourceKind::Port);
        assert_eq!(msg.parent_id(), Some("c1"));
        assert_eq!(msg.extra.get("data"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn missing_name_and_extra_default() {
        let msg: ChangeMessage =
            serde_json::from_value(json!({"change": "add", "rhtype": "domain", "rhid": ""}))
                .unwrap();
        assert_eq!(msg.display_name, "");
        assert_eq!(msg.extra, Extra::default());

        let msg: ChangeMessage = serde_json::from_value(
            json!({"change": "add", "rhtype": "domain", "rhid": "x", "more": null}),
        )
        .unwrap();
        assert_eq!(msg.extra.parent_id, "");
    }

    #[test]
    fn missing_identity_is_rejected() {
        let result = serde_json::from_value::<ChangeMessage>(json!({"change": "add"}));
        assert!(result.is_err());
    }

    #[test]
    fn strip_keeps_identity_and_parent_only() {
        let msg = ChangeMessage::new(Change::Update, "property", "prop1", "gain")
            .with_extra(
                json!({"parentID": "comp1", "value": [1, 2], "access": "readwrite"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            );
        let stripped = msg.strip();
        assert_eq!(stripped.change, Change::Update);
        assert_eq!(stripped.resource_id, "prop1");
        assert_eq!(stripped.display_name, "gain");
        assert_eq!(stripped.extra.parent_id, "comp1");
        assert!(stripped.extra.fields.is_empty());
        // the source message is untouched
        assert_eq!(msg.extra.fields.len(), 2);
    }

    #[test]
    fn command_reassigns_change_on_stripped_copy() {
        let msg = ChangeMessage::new(Change::Stream, "port", "p1", "out")
            .with_parent("c1")
            .with_extra(json!({"parentID": "c1", "data": [0.5]}).as_object().cloned().unwrap());
        let stop = msg.command(Change::Stop);
        assert_eq!(stop.change, Change::Stop);
        assert_eq!(stop.extra, Extra::with_parent("c1"));

        let inflated: ChangeMessage =
            serde_json::from_str(&serde_json::to_string(&stop).unwrap()).unwrap();
        assert_eq!(inflated, stop);
    }

    #[test]
    fn from_map_accepts_non_string_parent() {
        let extra = Extra::from_map(json!({"parentID": 7, "x": true}).as_object().cloned().unwrap());
        assert_eq!(extra.parent_id, "7");
        assert_eq!(extra.get_bool("x"), Some(true));
    }
}

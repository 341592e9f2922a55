use std::any::Any;

use hawkeye_proto::{ChangeMessage, ResourceKind};

/// A sub-container a widget asks to have created beneath its own container,
/// collecting children of one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub kind: ResourceKind,
    pub label: String,
}

impl GroupSpec {
    pub fn new(kind: ResourceKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }

    pub fn class(&self) -> String {
        self.kind.group_class()
    }
}

/// On-screen representation of one resource.
///
/// `configure` receives every later message for the resource, including the
/// terminal `remove` just before the widget is detached.
pub trait Widget: Send {
    fn configure(&mut self, message: &ChangeMessage);

    /// Group sub-containers to create under this widget's container.
    fn groups(&self) -> Vec<GroupSpec> {
        Vec::new()
    }

    /// Called once the widget has left the tree.
    fn detached(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// What a handler produced for an `add`.
pub enum Rendered {
    One(Box<dyn Widget>),
    Many(Vec<Box<dyn Widget>>),
}

impl Rendered {
    pub fn one(widget: impl Widget + 'static) -> Self {
        Rendered::One(Box::new(widget))
    }

    pub fn into_widgets(self) -> Vec<Box<dyn Widget>> {
        match self {
            Rendered::One(widget) => vec![widget],
            Rendered::Many(widgets) => widgets,
        }
    }
}

impl std::fmt::Debug for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rendered::One(_) => f.write_str("Rendered::One"),
            Rendered::Many(widgets) => write!(f, "Rendered::Many({})", widgets.len()),
        }
    }
}

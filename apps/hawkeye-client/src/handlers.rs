use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use hawkeye_proto::{ChangeMessage, ResourceKind};
use tracing::{debug, error, warn};

use crate::containers::{
    ApplicationContainer, PlainContainer, PortContainer, PropertyContainer,
};
use crate::error::HandlerError;
use crate::outbox::Outbox;
use crate::widget::Rendered;

/// Renders the widgets for one `add` message. `Ok(None)` declines the
/// resource without error.
pub type HandlerFn =
    Box<dyn Fn(&ChangeMessage, &Outbox) -> Result<Option<Rendered>, HandlerError> + Send + Sync>;

/// Resource type to handler table.
///
/// Custom entries take precedence; unclaimed known types fall back to the
/// built-in containers.
#[derive(Default)]
pub struct HandlerRegistry {
    custom: HashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(mut self, resource_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ChangeMessage, &Outbox) -> Result<Option<Rendered>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(resource_type, handler);
        self
    }

    pub fn register<F>(&mut self, resource_type: impl Into<String>, handler: F)
    where
        F: Fn(&ChangeMessage, &Outbox) -> Result<Option<Rendered>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.custom.insert(resource_type.into(), Box::new(handler));
    }

    pub fn has_handler(&self, resource_type: &str) -> bool {
        self.custom.contains_key(resource_type)
            || !matches!(ResourceKind::from_tag(resource_type), ResourceKind::Other(_))
    }

    /// Produces the widgets for `message`, or `None` when the resource is
    /// suppressed. Handler failures, including panics, are logged here and
    /// never reach the caller.
    pub fn render(&self, message: &ChangeMessage, outbox: &Outbox) -> Option<Rendered> {
        let result = match self.custom.get(&message.resource_type) {
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(message, outbox))),
            None => match message.kind() {
                ResourceKind::Other(tag) => {
                    warn!(rhtype = %tag, rhid = %message.resource_id, "no handler for resource type");
                    return None;
                }
                kind => catch_unwind(AssertUnwindSafe(|| {
                    Ok::<_, HandlerError>(builtin(&kind, message, outbox))
                })),
            },
        };

        match result {
            Ok(Ok(Some(Rendered::Many(widgets)))) if widgets.is_empty() => {
                debug!(rhid = %message.resource_id, "handler rendered nothing");
                None
            }
            Ok(Ok(rendered)) => rendered,
            Ok(Err(err)) => {
                error!(
                    rhtype = %message.resource_type,
                    rhid = %message.resource_id,
                    error = %err,
                    "handler failed"
                );
                None
            }
            Err(panic) => {
                error!(
                    rhtype = %message.resource_type,
                    rhid = %message.resource_id,
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn builtin(kind: &ResourceKind, message: &ChangeMessage, outbox: &Outbox) -> Option<Rendered> {
    let rendered = match kind {
        ResourceKind::Domain => Rendered::one(PlainContainer::domain(message)),
        ResourceKind::DeviceManager => Rendered::one(PlainContainer::device_manager(message)),
        ResourceKind::Device => Rendered::one(PlainContainer::device(message)),
        ResourceKind::Component => Rendered::one(PlainContainer::component(message)),
        ResourceKind::Service => Rendered::one(PlainContainer::service(message)),
        ResourceKind::Application => {
            Rendered::one(ApplicationContainer::new(message, outbox.clone()))
        }
        ResourceKind::Port => Rendered::one(PortContainer::new(message, outbox.clone())),
        ResourceKind::Property => Rendered::one(PropertyContainer::new(message, outbox.clone())),
        ResourceKind::Other(_) => return None,
    };
    Some(rendered)
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

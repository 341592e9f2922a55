use std::panic::{catch_unwind, AssertUnwindSafe};

use hawkeye_proto::{Batch, Change, ChangeMessage};
use tracing::{debug, error, trace, warn};

use crate::error::EngineError;
use crate::handlers::{panic_message, HandlerRegistry};
use crate::outbox::Outbox;
use crate::resolver::{ParentOverrides, ParentResolver};
use crate::tree::{ContainerKey, UiTree};

/// Id of the container that catches every resource without a better home.
pub const DEFAULT_ROOT_ID: &str = "hawkeye_ui";

/// What applying one message did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted(ContainerKey),
    /// `add` for an id already in the tree.
    Duplicate,
    /// No handler produced a representation.
    Suppressed,
    Configured,
    /// Number of resource nodes that left with the subtree.
    Removed(usize),
    /// `update`, `stream` or `remove` for an id not in the tree.
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub configured: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted(_) => self.inserted += 1,
            Applied::Configured => self.configured += 1,
            Applied::Removed(_) => self.removed += 1,
            Applied::Duplicate | Applied::Suppressed | Applied::Missing => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.configured + self.removed + self.skipped + self.failed
    }
}

struct Anchor {
    parent: Option<String>,
    id: String,
    class: String,
}

pub struct EngineBuilder {
    root_id: String,
    anchors: Vec<Anchor>,
    handlers: HandlerRegistry,
    overrides: ParentOverrides,
    outbox: Outbox,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            root_id: DEFAULT_ROOT_ID.to_string(),
            anchors: Vec::new(),
            handlers: HandlerRegistry::new(),
            overrides: ParentOverrides::new(),
            outbox: Outbox::new(),
        }
    }
}

impl EngineBuilder {
    pub fn root_id(mut self, id: impl Into<String>) -> Self {
        self.root_id = id.into();
        self
    }

    /// Declares a well-known container under the root.
    pub fn anchor(self, id: impl Into<String>, class: impl Into<String>) -> Self {
        self.anchor_under(None::<String>, id, class)
    }

    /// Declares a well-known container under an earlier anchor, or under the
    /// root when `parent` is `None`.
    pub fn anchor_under(
        mut self,
        parent: Option<impl Into<String>>,
        id: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        self.anchors.push(Anchor {
            parent: parent.map(Into::into),
            id: id.into(),
            class: class.into(),
        });
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn overrides(mut self, overrides: ParentOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn parent_override(
        mut self,
        resource_type: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        self.overrides.insert(resource_type, container_id);
        self
    }

    pub fn outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn build(self) -> Engine {
        let mut tree = UiTree::new(self.root_id);
        for anchor in self.anchors {
            let parent = match &anchor.parent {
                Some(id) => tree.find(id),
                None => Some(tree.root()),
            };
            let added = parent.and_then(|parent| tree.add_anchor(parent, &anchor.id, &anchor.class));
            if added.is_none() {
                warn!(anchor = %anchor.id, parent = ?anchor.parent, "anchor container not registered");
            }
        }
        Engine {
            tree,
            handlers: self.handlers,
            resolver: ParentResolver::new(self.overrides),
            outbox: self.outbox,
        }
    }
}

/// Applies change batches to a [`UiTree`].
///
/// Runs on one logical thread; visibility changes take effect immediately,
/// so no mutation ever waits on another.
///
/// A node added under a container with no children starts hidden. That
/// includes the first top-level domain: call [`UiTree::set_visible`] on it
/// once it lands, and later siblings inherit its visibility.
pub struct Engine {
    tree: UiTree,
    handlers: HandlerRegistry,
    resolver: ParentResolver,
    outbox: Outbox,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    pub fn tree(&self) -> &UiTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut UiTree {
        &mut self.tree
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn resolver(&self) -> &ParentResolver {
        &self.resolver
    }

    /// Parses one inbound text frame and applies it. An unparseable frame is
    /// dropped whole.
    pub fn apply_frame(&mut self, frame: &str) -> Result<BatchReport, EngineError> {
        let batch = Batch::from_json(frame).map_err(|err| {
            error!(error = %err, frame_len = frame.len(), "dropping malformed batch");
            EngineError::from(err)
        })?;
        Ok(self.apply_batch(batch))
    }

    /// Applies messages in order. A failing message is logged and skipped;
    /// effects of earlier messages stay in place.
    pub fn apply_batch(&mut self, batch: Batch) -> BatchReport {
        let mut report = BatchReport::default();
        trace!(messages = batch.len(), "applying batch");
        for message in batch {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.apply(&message)))
                .unwrap_or_else(|panic| Err(EngineError::Panicked(panic_message(panic.as_ref()))));
            match outcome {
                Ok(applied) => report.record(applied),
                Err(err) => {
                    report.failed += 1;
                    error!(
                        error = %err,
                        message = %serde_json::to_string(&message).unwrap_or_else(|_| format!("{message:?}")),
                        "failed to apply change message"
                    );
                }
            }
        }
        report
    }

    pub fn apply(&mut self, message: &ChangeMessage) -> Result<Applied, EngineError> {
        match &message.change {
            Change::Add => Ok(self.insert(message)),
            Change::Remove => Ok(self.remove(message)),
            Change::Update | Change::Stream => Ok(self.configure(message)),
            other => Err(EngineError::UnrecognizedChange(other.to_string())),
        }
    }

    fn insert(&mut self, message: &ChangeMessage) -> Applied {
        if self.tree.find(&message.resource_id).is_some() {
            trace!(rhid = %message.resource_id, "add for known id ignored");
            return Applied::Duplicate;
        }
        let Some(rendered) = self.handlers.render(message, &self.outbox) else {
            return Applied::Suppressed;
        };

        let resolution = self.resolver.resolve(&self.tree, message);
        let visible = self.sibling_visibility(resolution.target);
        let key = self.tree.insert_node(
            resolution.target,
            message.kind().container_class(),
            rendered.into_widgets(),
            message,
            visible,
        );
        debug!(
            rhtype = %message.resource_type,
            rhid = %message.resource_id,
            via = ?resolution.via,
            visible,
            "inserted resource"
        );
        Applied::Inserted(key)
    }

    /// Visible only when the target's first existing child is visible. An
    /// empty target yields hidden, so the first root-level domain needs an
    /// explicit `set_visible` from the embedder.
    fn sibling_visibility(&self, target: ContainerKey) -> bool {
        self.tree
            .get(target)
            .and_then(|container| container.children().first().copied())
            .and_then(|first| self.tree.get(first))
            .is_some_and(|first| first.is_visible())
    }

    fn remove(&mut self, message: &ChangeMessage) -> Applied {
        let Some(node) = self.tree.node_mut(&message.resource_id) else {
            return Applied::Missing;
        };
        node.configure(message);
        let Some(key) = self.tree.find(&message.resource_id) else {
            return Applied::Missing;
        };
        let removed = self.tree.remove_subtree(key);
        debug!(rhid = %message.resource_id, removed, "removed resource");
        Applied::Removed(removed)
    }

    fn configure(&mut self, message: &ChangeMessage) -> Applied {
        match self.tree.node_mut(&message.resource_id) {
            Some(node) => {
                node.configure(message);
                Applied::Configured
            }
            None => Applied::Missing,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::PlainContainer;
    use crate::widget::Rendered;

    #[test]
    fn unrecognized_change_is_an_error_but_batch_continues() {
        let mut engine = Engine::new();
        let report = engine
            .apply_frame(
                r#"[
                    {"change":"start","rhtype":"domain","rhid":"d1","rhname":"x","more":{"parentID":""}},
                    {"change":"add","rhtype":"domain","rhid":"d1","rhname":"x","more":{"parentID":""}}
                ]"#,
            )
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
        assert!(engine.tree().contains_node("d1"));
    }

    #[test]
    fn malformed_frame_is_dropped_whole() {
        let mut engine = Engine::new();
        let err = engine
            .apply_frame(r#"[{"change":"add","rhtype":"domain","rhid":"d1"}, {"rhid": 3}]"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
        assert_eq!(engine.tree().node_count(), 0);
    }

    #[test]
    fn panicking_widget_does_not_abort_batch() {
        struct Exploding;
        impl crate::widget::Widget for Exploding {
            fn configure(&mut self, message: &ChangeMessage) {
                if message.change == Change::Update {
                    panic!("cannot update");
                }
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        let handlers = HandlerRegistry::new()
            .with_handler("device", |_, _| Ok(Some(Rendered::one(Exploding))));
        let mut engine = Engine::builder().handlers(handlers).build();
        let batch: Batch = vec![
            ChangeMessage::new(Change::Add, "device", "dev1", "GPP"),
            ChangeMessage::new(Change::Update, "device", "dev1", "GPP"),
            ChangeMessage::new(Change::Add, "service", "svc1", "svc"),
        ]
        .into();
        let report = engine.apply_batch(batch);
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 2);
        assert!(engine.tree().contains_node("svc1"));
    }

    #[test]
    fn first_child_visibility_is_inherited() {
        let mut engine = Engine::new();
        let first = ChangeMessage::new(Change::Add, "service", "s1", "one");
        assert!(matches!(engine.apply(&first), Ok(Applied::Inserted(_))));
        let s1 = engine.tree().find("s1").unwrap();
        assert!(!engine.tree().get(s1).unwrap().is_visible());

        engine.tree_mut().set_visible(s1, true);
        engine
            .apply(&ChangeMessage::new(Change::Add, "service", "s2", "two"))
            .unwrap();
        let s2 = engine.tree().find("s2").unwrap();
        assert!(engine.tree().get(s2).unwrap().is_visible());
    }

    #[test]
    fn first_root_domain_starts_hidden_until_shown() {
        let mut engine = Engine::new();
        engine
            .apply(&ChangeMessage::new(Change::Add, "domain", "d1", "REDHAWK_DEV"))
            .unwrap();
        let d1 = engine.tree().find("d1").unwrap();
        assert!(!engine.tree().get(d1).unwrap().is_visible());

        assert!(engine.tree_mut().set_visible(d1, true));
        engine
            .apply(&ChangeMessage::new(Change::Add, "domain", "d2", "OTHER"))
            .unwrap();
        let d2 = engine.tree().find("d2").unwrap();
        assert!(engine.tree().get(d2).unwrap().is_visible());
    }

    #[test]
    fn remove_runs_terminal_configure() {
        let mut engine = Engine::new();
        engine
            .apply(&ChangeMessage::new(Change::Add, "service", "s1", "one"))
            .unwrap();
        let node = engine.tree().node("s1").unwrap();
        assert_eq!(node.widget::<PlainContainer>().unwrap().state().configured(), 1);

        assert_eq!(
            engine.apply(&ChangeMessage::new(Change::Remove, "service", "s1", "one")).unwrap(),
            Applied::Removed(1)
        );
        assert_eq!(
            engine.apply(&ChangeMessage::new(Change::Remove, "service", "s1", "one")).unwrap(),
            Applied::Missing
        );
    }

    #[test]
    fn anchors_are_registered_in_order() {
        let engine = Engine::builder()
            .anchor("panel", "panel")
            .anchor_under(Some("panel"), "apps", "app_list")
            .anchor_under(Some("missing"), "orphan", "x")
            .build();
        let panel = engine.tree().find("panel").unwrap();
        let apps = engine.tree().find("apps").unwrap();
        assert_eq!(engine.tree().get(apps).unwrap().parent(), Some(panel));
        assert!(engine.tree().find("orphan").is_none());
    }
}

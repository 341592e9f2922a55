use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hawkeye_client::containers::{PortContainer, PortControl};
use hawkeye_client::{Applied, Engine, HandlerRegistry, Rendered};
use hawkeye_proto::{Batch, Change, ChangeMessage};
use serde_json::json;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

#[derive(Clone, Default)]
struct LevelCounter {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

fn with_counter<T>(f: impl FnOnce() -> T) -> (T, LevelCounter) {
    let counter = LevelCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, counter)
}

fn frame(value: serde_json::Value) -> String {
    value.to_string()
}

#[test]
fn root_level_device_manager_lands_under_default_root() {
    let mut engine = Engine::new();
    let report = engine
        .apply_frame(&frame(json!([{
            "change": "add", "rhtype": "device_manager", "rhid": "dm1",
            "rhname": "DM1", "more": {"parentID": ""}
        }])))
        .unwrap();
    assert_eq!(report.inserted, 1);

    let tree = engine.tree();
    let root = tree.get(tree.root()).unwrap();
    assert_eq!(root.children().len(), 1);
    let child = tree.get(root.children()[0]).unwrap();
    assert_eq!(child.id(), Some("dm1"));
    assert_eq!(child.class(), "device_manager_container");
}

#[test]
fn stream_after_add_wins() {
    let mut engine = Engine::new();
    engine
        .apply_frame(&frame(json!([
            {"change": "add", "rhtype": "port", "rhid": "p1", "rhname": "P1",
             "more": {"parentID": "dm1"}},
            {"change": "stream", "rhtype": "port", "rhid": "p1", "rhname": "P1",
             "more": {"parentID": "dm1", "data": [1, 2, 3]}}
        ])))
        .unwrap();

    let node = engine.tree().node("p1").unwrap();
    assert_eq!(node.message().change, Change::Stream);
    let port = node.widget::<PortContainer>().unwrap();
    assert_eq!(port.state().configured(), 2);
    assert_eq!(port.control(), PortControl::Stop);
    assert_eq!(port.stats().packets, 1);
    assert_eq!(port.stats().length, 3);
    assert!(port.stats().visible);
}

#[test]
fn unknown_type_produces_no_node_and_one_warning() {
    let (report, counter) = with_counter(|| {
        let mut engine = Engine::new();
        let report = engine
            .apply_frame(&frame(json!([{
                "change": "add", "rhtype": "bogus", "rhid": "b1", "rhname": "B",
                "more": {"parentID": ""}
            }])))
            .unwrap();
        assert_eq!(engine.tree().node_count(), 0);
        report
    });
    assert_eq!(report.skipped, 1);
    assert_eq!(counter.warnings.load(Ordering::SeqCst), 1);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 0);
}

#[test]
fn repeated_add_and_remove_are_idempotent() {
    let mut engine = Engine::new();
    let add = ChangeMessage::new(Change::Add, "device_manager", "dm1", "DM1");
    let remove = ChangeMessage::new(Change::Remove, "device_manager", "dm1", "DM1");

    assert!(matches!(engine.apply(&add), Ok(Applied::Inserted(_))));
    assert_eq!(engine.apply(&add).unwrap(), Applied::Duplicate);
    assert_eq!(engine.tree().node_count(), 1);

    assert_eq!(engine.apply(&remove).unwrap(), Applied::Removed(1));
    let containers = engine.tree().container_count();
    assert_eq!(engine.apply(&remove).unwrap(), Applied::Missing);
    assert_eq!(engine.tree().container_count(), containers);
}

#[test]
fn update_and_stream_never_create_nodes() {
    let mut engine = Engine::new();
    let batch: Batch = vec![
        ChangeMessage::new(Change::Update, "device", "ghost", "G"),
        ChangeMessage::new(Change::Stream, "port", "ghost-port", "GP"),
    ]
    .into();
    let report = engine.apply_batch(batch);
    assert_eq!(report.skipped, 2);
    assert_eq!(engine.tree().node_count(), 0);
    assert_eq!(engine.tree().container_count(), 1);
}

#[test]
fn override_takes_precedence_over_parent() {
    let mut engine = Engine::builder()
        .anchor("app_panel", "panel")
        .parent_override("application", "app_panel")
        .build();
    let report = engine.apply_batch(
        vec![
            ChangeMessage::new(Change::Add, "domain", "d1", "REDHAWK"),
            ChangeMessage::new(Change::Add, "application", "a1", "wave").with_parent("d1"),
        ]
        .into(),
    );
    assert_eq!(report.inserted, 2);

    let tree = engine.tree();
    let a1 = tree.find("a1").unwrap();
    assert_eq!(tree.get(a1).unwrap().parent(), tree.find("app_panel"));
}

#[test]
fn children_are_filed_into_parent_groups() {
    let mut engine = Engine::new();
    engine.apply_batch(
        vec![
            ChangeMessage::new(Change::Add, "domain", "d1", "REDHAWK"),
            ChangeMessage::new(Change::Add, "device_manager", "dm1", "DevMgr").with_parent("d1"),
            ChangeMessage::new(Change::Add, "device", "dev1", "GPP").with_parent("dm1"),
            ChangeMessage::new(Change::Add, "property", "prop1", "load").with_parent("dev1"),
            ChangeMessage::new(Change::Add, "service", "svc1", "log").with_parent("dm1"),
        ]
        .into(),
    );

    let tree = engine.tree();
    let parent_class = |id: &str| {
        let key = tree.find(id).unwrap();
        let parent = tree.get(key).unwrap().parent().unwrap();
        tree.get(parent).unwrap().class().to_string()
    };
    assert_eq!(parent_class("d1"), "root");
    assert_eq!(parent_class("dm1"), "device_manager_group");
    assert_eq!(parent_class("prop1"), "property_group");
    assert_eq!(parent_class("svc1"), "device_manager_container");
    assert_eq!(parent_class("dev1"), "device_manager_container");

    // first child of an empty group starts hidden
    let dm1 = tree.find("dm1").unwrap();
    assert!(!tree.get(dm1).unwrap().is_visible());
}

#[test]
fn removing_streaming_port_queues_stop_command() {
    let mut engine = Engine::new();
    engine.apply_batch(
        vec![
            ChangeMessage::new(Change::Add, "port", "p1", "out").with_parent("c1"),
            ChangeMessage::new(Change::Stream, "port", "p1", "out")
                .with_extra(json!({"parentID": "c1", "data": [7]}).as_object().cloned().unwrap()),
            ChangeMessage::new(Change::Remove, "port", "p1", "out").with_parent("c1"),
        ]
        .into(),
    );
    assert!(!engine.tree().contains_node("p1"));

    let sent = engine.outbox().drain();
    assert_eq!(sent.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&sent[0].to_json().unwrap()).unwrap();
    assert_eq!(
        json,
        json!([{"change": "stop", "rhtype": "port", "rhid": "p1", "rhname": "out",
                "more": {"parentID": "c1"}}])
    );
}

#[test]
fn custom_handler_overrides_builtin() {
    let seen = Arc::new(AtomicUsize::new(0));
    let hits = seen.clone();
    let handlers = HandlerRegistry::new().with_handler("device", move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(None::<Rendered>)
    });
    let mut engine = Engine::builder().handlers(handlers).build();
    assert_eq!(
        engine
            .apply(&ChangeMessage::new(Change::Add, "device", "dev1", "GPP"))
            .unwrap(),
        Applied::Suppressed
    );
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!engine.tree().contains_node("dev1"));
}

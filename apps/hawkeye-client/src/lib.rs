//! Client side of the hawkeye control panel.
//!
//! [`Engine`] consumes batches of change messages and keeps a [`UiTree`] of
//! containers keyed by resource id consistent with the hosted model.

pub mod connection;
pub mod containers;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod outbox;
pub mod resolver;
pub mod tree;
pub mod widget;

pub use engine::{Applied, BatchReport, Engine, EngineBuilder, DEFAULT_ROOT_ID};
pub use error::{CommandError, ConnectError, EngineError, HandlerError};
pub use handlers::{HandlerFn, HandlerRegistry};
pub use outbox::Outbox;
pub use resolver::{ParentOverrides, ParentResolver, Resolution, ResolvedBy};
pub use tree::{Container, ContainerKey, TreeNode, UiTree};
pub use widget::{GroupSpec, Rendered, Widget};

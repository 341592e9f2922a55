//! Wire model for the hawkeye control panel protocol.
//!
//! A batch is one JSON array of change messages sent as a single text frame.
//! Every message names one resource of the hosted model by its `rhid` and
//! carries an open `more` mapping that always contains `parentID`.

pub mod batch;
pub mod change;
pub mod error;
pub mod kind;
pub mod message;
pub mod property;

pub use batch::Batch;
pub use change::Change;
pub use error::ProtocolError;
pub use kind::ResourceKind;
pub use message::{ChangeMessage, Extra, PARENT_ID_KEY};
pub use property::{PropertyShape, PropertyValue, ACCESS_KEY, VALUE_KEY, VALUE_KIND_KEY};

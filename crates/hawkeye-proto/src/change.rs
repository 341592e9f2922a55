use std::fmt;

use serde::{Deserialize, Serialize};

/// What a message asks the receiver to do with the named resource.
///
/// `add`, `remove`, `update` and `stream` describe model changes flowing to
/// the client. `start` and `stop` are command verbs flowing back to the
/// backend. Anything else is kept verbatim so it can be logged and relayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Change {
    #[default]
    Unset,
    Add,
    Remove,
    Update,
    Stream,
    Start,
    Stop,
    Other(String),
}

impl Change {
    pub fn as_str(&self) -> &str {
        match self {
            Change::Unset => "",
            Change::Add => "add",
            Change::Remove => "remove",
            Change::Update => "update",
            Change::Stream => "stream",
            Change::Start => "start",
            Change::Stop => "stop",
            Change::Other(other) => other,
        }
    }

    /// True for the changes the client tree knows how to apply.
    pub fn is_model_change(&self) -> bool {
        matches!(
            self,
            Change::Add | Change::Remove | Change::Update | Change::Stream
        )
    }
}

impl From<&str> for Change {
    fn from(value: &str) -> Self {
        match value {
            "" => Change::Unset,
            "add" => Change::Add,
            "remove" => Change::Remove,
            "update" => Change::Update,
            "stream" => Change::Stream,
            "start" => Change::Start,
            "stop" => Change::Stop,
            other => Change::Other(other.to_string()),
        }
    }
}

impl From<String> for Change {
    fn from(value: String) -> Self {
        match Change::from(value.as_str()) {
            Change::Other(_) => Change::Other(value),
            known => known,
        }
    }
}

impl From<Change> for String {
    fn from(change: Change) -> Self {
        match change {
            Change::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

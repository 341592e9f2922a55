use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::ChangeMessage;

/// An ordered group of messages delivered as one frame.
///
/// A command from a client is a batch of exactly one message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch(pub Vec<ChangeMessage>);

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(message: ChangeMessage) -> Self {
        Self(vec![message])
    }

    /// Decodes one frame. Any malformed entry rejects the whole batch.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn push(&mut self, message: ChangeMessage) {
        self.0.push(message);
    }

    pub fn extend(&mut self, other: Batch) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeMessage> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<ChangeMessage> {
        self.0
    }
}

impl From<Vec<ChangeMessage>> for Batch {
    fn from(messages: Vec<ChangeMessage>) -> Self {
        Self(messages)
    }
}

impl FromIterator<ChangeMessage> for Batch {
    fn from_iter<T: IntoIterator<Item = ChangeMessage>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Batch {
    type Item = ChangeMessage;
    type IntoIter = std::vec::IntoIter<ChangeMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a ChangeMessage;
    type IntoIter = std::slice::Iter<'a, ChangeMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;

    #[test]
    fn decodes_multi_message_frame_in_order() {
        let frame = r#"[
            {"change":"add","rhtype":"port","rhid":"p1","rhname":"P1","more":{"parentID":"dm1"}},
            {"change":"stream","rhtype":"port","rhid":"p1","rhname":"P1","more":{"parentID":"dm1","data":[1,2,3]}}
        ]"#;
        let batch = Batch::from_json(frame).unwrap();
        assert_eq!(batch.len(), 2);
        let changes: Vec<_> = batch.iter().map(|m| m.change.clone()).collect();
        assert_eq!(changes, vec![Change::Add, Change::Stream]);
    }

    #[test]
    fn one_bad_entry_rejects_the_frame() {
        let frame = r#"[{"change":"add","rhtype":"port","rhid":"p1"}, null]"#;
        assert!(Batch::from_json(frame).is_err());
        assert!(Batch::from_json("not json").is_err());
        assert!(Batch::from_json(r#"{"change":"add"}"#).is_err());
    }

    #[test]
    fn command_frame_is_one_element_array() {
        let cmd = ChangeMessage::new(Change::Start, "application", "app1", "wave");
        let text = Batch::single(cmd).to_json().unwrap();
        assert!(text.starts_with("[{"));
        assert!(text.ends_with("}]"));
    }
}

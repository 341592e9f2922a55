use std::collections::HashMap;

use hawkeye_proto::ChangeMessage;
use tracing::debug;

use crate::tree::{ContainerKey, UiTree};

/// Resource type to container id placements that bypass the logical parent.
#[derive(Debug, Clone, Default)]
pub struct ParentOverrides(HashMap<String, String>);

impl ParentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource_type: impl Into<String>, container_id: impl Into<String>) {
        self.0.insert(resource_type.into(), container_id.into());
    }

    pub fn get(&self, resource_type: &str) -> Option<&str> {
        self.0.get(resource_type).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParentOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    Override,
    Group,
    Parent,
    DefaultRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub target: ContainerKey,
    pub via: ResolvedBy,
}

/// Picks the container a new resource is inserted into.
///
/// Order: override for the type; then the parent's first `{type}_group`
/// descendant, or the parent itself; then the tree's default root. An
/// override naming a container that does not exist goes straight to the
/// default root without consulting the parent.
#[derive(Debug, Clone, Default)]
pub struct ParentResolver {
    overrides: ParentOverrides,
}

impl ParentResolver {
    pub fn new(overrides: ParentOverrides) -> Self {
        Self { overrides }
    }

    pub fn overrides(&self) -> &ParentOverrides {
        &self.overrides
    }

    pub fn resolve(&self, tree: &UiTree, message: &ChangeMessage) -> Resolution {
        if let Some(id) = self.overrides.get(&message.resource_type) {
            return match tree.find(id) {
                Some(target) => Resolution {
                    target,
                    via: ResolvedBy::Override,
                },
                None => {
                    debug!(
                        rhtype = %message.resource_type,
                        container = id,
                        "override container missing, using default root"
                    );
                    Self::default_root(tree)
                }
            };
        }

        if let Some(parent) = message.parent_id().and_then(|id| tree.find(id)) {
            let group = message.kind().group_class();
            return match tree.find_descendant_with_class(parent, &group) {
                Some(target) => Resolution {
                    target,
                    via: ResolvedBy::Group,
                },
                None => Resolution {
                    target: parent,
                    via: ResolvedBy::Parent,
                },
            };
        }

        Self::default_root(tree)
    }

    fn default_root(tree: &UiTree) -> Resolution {
        Resolution {
            target: tree.root(),
            via: ResolvedBy::DefaultRoot,
        }
    }
}

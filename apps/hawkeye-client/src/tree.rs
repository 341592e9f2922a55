use std::collections::HashMap;
use std::fmt::Write as _;

use hawkeye_proto::ChangeMessage;
use slab::Slab;

use crate::widget::Widget;

pub type ContainerKey = usize;

/// Resource record held by a container that represents a resource.
pub struct TreeNode {
    widgets: Vec<Box<dyn Widget>>,
    message: ChangeMessage,
}

impl TreeNode {
    /// The last message that configured this node.
    pub fn message(&self) -> &ChangeMessage {
        &self.message
    }

    pub fn widgets(&self) -> &[Box<dyn Widget>] {
        &self.widgets
    }

    /// First widget of type `W`, if the handler produced one.
    pub fn widget<W: Widget + 'static>(&self) -> Option<&W> {
        self.widgets
            .iter()
            .find_map(|widget| widget.as_any().downcast_ref::<W>())
    }

    pub fn widget_mut<W: Widget + 'static>(&mut self) -> Option<&mut W> {
        self.widgets
            .iter_mut()
            .find_map(|widget| widget.as_any_mut().downcast_mut::<W>())
    }

    pub(crate) fn configure(&mut self, message: &ChangeMessage) {
        for widget in self.widgets.iter_mut() {
            widget.configure(message);
        }
        self.message = message.clone();
    }
}

pub struct Container {
    id: Option<String>,
    class: String,
    label: Option<String>,
    visible: bool,
    parent: Option<ContainerKey>,
    children: Vec<ContainerKey>,
    node: Option<TreeNode>,
}

impl Container {
    fn new(id: Option<String>, class: String, parent: Option<ContainerKey>) -> Self {
        Self {
            id,
            class,
            label: None,
            visible: true,
            parent,
            children: Vec::new(),
            node: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn parent(&self) -> Option<ContainerKey> {
        self.parent
    }

    pub fn children(&self) -> &[ContainerKey] {
        &self.children
    }

    pub fn node(&self) -> Option<&TreeNode> {
        self.node.as_ref()
    }
}

/// Arena of containers rooted at a single default container.
///
/// Ids share one namespace: resource ids and well-known anchor ids are both
/// looked up through [`UiTree::find`].
pub struct UiTree {
    containers: Slab<Container>,
    by_id: HashMap<String, ContainerKey>,
    root: ContainerKey,
}

impl UiTree {
    pub fn new(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let mut containers = Slab::new();
        let root = containers.insert(Container::new(
            Some(root_id.clone()),
            "root".to_string(),
            None,
        ));
        let mut by_id = HashMap::new();
        by_id.insert(root_id, root);
        Self {
            containers,
            by_id,
            root,
        }
    }

    pub fn root(&self) -> ContainerKey {
        self.root
    }

    pub fn get(&self, key: ContainerKey) -> Option<&Container> {
        self.containers.get(key)
    }

    pub fn find(&self, id: &str) -> Option<ContainerKey> {
        self.by_id.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.find(id)
            .and_then(|key| self.containers.get(key))
            .and_then(|container| container.node.as_ref())
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut TreeNode> {
        let key = self.find(id)?;
        self.containers
            .get_mut(key)
            .and_then(|container| container.node.as_mut())
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Number of resource nodes currently in the tree.
    pub fn node_count(&self) -> usize {
        self.containers
            .iter()
            .filter(|(_, container)| container.node.is_some())
            .count()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Adds a well-known container that override rules can target.
    pub fn add_anchor(
        &mut self,
        parent: ContainerKey,
        id: impl Into<String>,
        class: impl Into<String>,
    ) -> Option<ContainerKey> {
        let id = id.into();
        if self.by_id.contains_key(&id) || !self.containers.contains(parent) {
            return None;
        }
        let key = self.attach(parent, Container::new(Some(id.clone()), class.into(), None));
        self.by_id.insert(id, key);
        Some(key)
    }

    /// Inserts a container for a resource under `parent`, plus one hidden
    /// group container for every group its widgets declare.
    pub(crate) fn insert_node(
        &mut self,
        parent: ContainerKey,
        class: String,
        widgets: Vec<Box<dyn Widget>>,
        message: &ChangeMessage,
        visible: bool,
    ) -> ContainerKey {
        let groups: Vec<_> = widgets.iter().flat_map(|widget| widget.groups()).collect();
        let mut container = Container::new(Some(message.resource_id.clone()), class, None);
        container.visible = visible;
        container.label = Some(message.display_name.clone());
        container.node = Some(TreeNode {
            widgets,
            message: message.clone(),
        });
        let key = self.attach(parent, container);
        self.by_id.insert(message.resource_id.clone(), key);

        for group in groups {
            let mut sub = Container::new(None, group.class(), None);
            sub.visible = false;
            sub.label = Some(group.label);
            self.attach(key, sub);
        }
        key
    }

    fn attach(&mut self, parent: ContainerKey, mut container: Container) -> ContainerKey {
        container.parent = Some(parent);
        let key = self.containers.insert(container);
        if let Some(parent) = self.containers.get_mut(parent) {
            parent.children.push(key);
        }
        key
    }

    /// Detaches `key` and everything below it. Returns the number of resource
    /// nodes that left the tree.
    pub(crate) fn remove_subtree(&mut self, key: ContainerKey) -> usize {
        if key == self.root || !self.containers.contains(key) {
            return 0;
        }
        if let Some(parent) = self.containers[key].parent {
            if let Some(parent) = self.containers.get_mut(parent) {
                parent.children.retain(|child| *child != key);
            }
        }

        let doomed = self.descendants(key);
        let mut removed = 0;
        for key in std::iter::once(key).chain(doomed) {
            let mut container = self.containers.remove(key);
            if let Some(id) = container.id.take() {
                self.by_id.remove(&id);
            }
            if let Some(mut node) = container.node.take() {
                for widget in node.widgets.iter_mut() {
                    widget.detached();
                }
                removed += 1;
            }
        }
        removed
    }

    /// Every container below `key` in document order, excluding `key`.
    pub fn descendants(&self, key: ContainerKey) -> Vec<ContainerKey> {
        let mut out = Vec::new();
        let mut stack: Vec<ContainerKey> = match self.containers.get(key) {
            Some(container) => container.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(container) = self.containers.get(next) {
                stack.extend(container.children.iter().rev().copied());
            }
        }
        out
    }

    /// First descendant of `key` carrying `class`, in document order.
    pub fn find_descendant_with_class(&self, key: ContainerKey, class: &str) -> Option<ContainerKey> {
        self.descendants(key)
            .into_iter()
            .find(|candidate| self.containers[*candidate].class == class)
    }

    pub fn set_visible(&mut self, key: ContainerKey, visible: bool) -> bool {
        match self.containers.get_mut(key) {
            Some(container) => {
                container.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Shows every child of `key` if the first child is hidden, hides them
    /// all otherwise. Returns the new visibility.
    pub fn toggle_children(&mut self, key: ContainerKey) -> Option<bool> {
        let children = self.containers.get(key)?.children.clone();
        let first = children.first()?;
        let show = !self.containers[*first].visible;
        for child in children {
            self.containers[child].visible = show;
        }
        Some(show)
    }

    /// Indented outline of the tree, one container per line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        self.render_into(self.root, 0, &mut out);
        out
    }

    fn render_into(&self, key: ContainerKey, depth: usize, out: &mut String) {
        let Some(container) = self.containers.get(key) else {
            return;
        };
        let _ = write!(out, "{:indent$}{}", "", container.class, indent = depth * 2);
        if let Some(id) = &container.id {
            let _ = write!(out, "#{id}");
        }
        if let Some(label) = container.label.as_deref().filter(|label| !label.is_empty()) {
            let _ = write!(out, " {label:?}");
        }
        if !container.visible {
            out.push_str(" (hidden)");
        }
        out.push('\n');
        for child in &container.children {
            self.render_into(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::PlainContainer;
    use hawkeye_proto::Change;

    fn domain(id: &str) -> (Vec<Box<dyn Widget>>, ChangeMessage) {
        let msg = ChangeMessage::new(Change::Add, "domain", id, "REDHAWK");
        (vec![Box::new(PlainContainer::domain(&msg))], msg)
    }

    #[test]
    fn insert_creates_hidden_groups_in_declared_order() {
        let mut tree = UiTree::new("hawkeye_ui");
        let (widgets, msg) = domain("d1");
        let key = tree.insert_node(tree.root(), "domain_container".into(), widgets, &msg, true);

        let classes: Vec<_> = tree
            .descendants(key)
            .into_iter()
            .map(|child| tree.get(child).unwrap().class().to_string())
            .collect();
        assert_eq!(classes, vec!["device_manager_group", "application_group"]);
        assert!(tree
            .descendants(key)
            .iter()
            .all(|child| !tree.get(*child).unwrap().is_visible()));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn remove_subtree_drops_descendant_ids() {
        let mut tree = UiTree::new("hawkeye_ui");
        let (widgets, msg) = domain("d1");
        let d1 = tree.insert_node(tree.root(), "domain_container".into(), widgets, &msg, true);
        let group = tree
            .find_descendant_with_class(d1, "device_manager_group")
            .unwrap();
        let dm = ChangeMessage::new(Change::Add, "device_manager", "dm1", "DevMgr");
        tree.insert_node(
            group,
            "device_manager_container".into(),
            vec![Box::new(PlainContainer::device_manager(&dm))],
            &dm,
            false,
        );
        assert_eq!(tree.node_count(), 2);

        assert_eq!(tree.remove_subtree(d1), 2);
        assert!(tree.find("d1").is_none());
        assert!(tree.find("dm1").is_none());
        assert_eq!(tree.container_count(), 1);
        assert!(tree.get(tree.root()).unwrap().children().is_empty());
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut tree = UiTree::new("hawkeye_ui");
        assert_eq!(tree.remove_subtree(tree.root()), 0);
        assert!(tree.find("hawkeye_ui").is_some());
    }

    #[test]
    fn anchors_are_unique_by_id() {
        let mut tree = UiTree::new("hawkeye_ui");
        let root = tree.root();
        assert!(tree.add_anchor(root, "panel", "panel").is_some());
        assert!(tree.add_anchor(root, "panel", "panel").is_none());
        assert!(tree.node("panel").is_none());
    }

    #[test]
    fn toggle_follows_first_child() {
        let mut tree = UiTree::new("hawkeye_ui");
        let root = tree.root();
        let a = tree.add_anchor(root, "a", "panel").unwrap();
        let b = tree.add_anchor(root, "b", "panel").unwrap();
        tree.set_visible(b, false);

        assert_eq!(tree.toggle_children(root), Some(false));
        assert!(!tree.get(a).unwrap().is_visible());
        assert_eq!(tree.toggle_children(root), Some(true));
        assert!(tree.get(b).unwrap().is_visible());
        assert_eq!(tree.toggle_children(a), None);
    }

    #[test]
    fn render_text_marks_hidden_containers() {
        let mut tree = UiTree::new("hawkeye_ui");
        let (widgets, msg) = domain("d1");
        tree.insert_node(tree.root(), "domain_container".into(), widgets, &msg, true);
        let text = tree.render_text();
        assert!(text.starts_with("root#hawkeye_ui\n"));
        assert!(text.contains("  domain_container#d1 \"REDHAWK\"\n"));
        assert!(text.contains("    device_manager_group \"Device Managers\" (hidden)\n"));
    }
}

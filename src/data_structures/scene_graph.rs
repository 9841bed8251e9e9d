//! Scene graph and hierarchical scene organization.
//!
//! Nodes and features live in slot arenas and refer to each other through
//! stable keys. A node has one parent and ordered children; its world
//! transformation is composed from the parent chain on demand. Features are
//! owned by one node and registered in the collections the renderer and the
//! simulation iterate (opaque and transparent drawables, lights, scripts).

use cgmath::{Matrix4, SquareMatrix};
use slotmap::{SlotMap, new_key_type};

use crate::{
    config::ConfigRef,
    data_structures::{
        feature::{DrawGroup, Feature, FeatureKind},
        transform::Transform,
    },
};

new_key_type! {
    pub struct NodeKey;
    pub struct FeatureKey;
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    features: Vec<FeatureKey>,
    /// Record this node was built from, if it came from configuration.
    config: Option<ConfigRef>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn features(&self) -> &[FeatureKey] {
        &self.features
    }

    pub fn config(&self) -> Option<&ConfigRef> {
        self.config.as_ref()
    }
}

#[derive(Debug)]
pub struct FeatureSlot {
    pub node: NodeKey,
    pub feature: Feature,
    pub config: Option<ConfigRef>,
}

#[derive(Debug)]
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    features: SlotMap<FeatureKey, FeatureSlot>,
    root: NodeKey,
    opaque: Vec<FeatureKey>,
    transparent: Vec<FeatureKey>,
    lights: Vec<FeatureKey>,
    scripts: Vec<FeatureKey>,
    active_camera: Option<FeatureKey>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            name: "root".to_string(),
            transform: Transform::new(),
            parent: None,
            children: Vec::new(),
            features: Vec::new(),
            config: None,
        });
        Self {
            nodes,
            features: SlotMap::with_key(),
            root,
            opaque: Vec::new(),
            transparent: Vec::new(),
            lights: Vec::new(),
            scripts: Vec::new(),
            active_camera: None,
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Create a node as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// If `parent` doesn't exist.
    pub fn add_node(&mut self, parent: NodeKey, name: &str, transform: Transform) -> NodeKey {
        assert!(
            self.nodes.contains_key(parent),
            "parent of node {} doesn't exist",
            name
        );
        let key = self.nodes.insert(Node {
            name: name.to_string(),
            transform,
            parent: Some(parent),
            children: Vec::new(),
            features: Vec::new(),
            config: None,
        });
        self.nodes[parent].children.push(key);
        key
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_node_config(&mut self, key: NodeKey, config: ConfigRef) {
        self.nodes[key].config = Some(config);
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeKey> {
        self.descendants(self.root)
            .into_iter()
            .find(|&key| self.nodes[key].name == name)
    }

    /// `key` and everything below it, parents before children, children in order.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(next) else {
                continue;
            };
            out.push(next);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Local-to-world matrix of a node.
    pub fn world_matrix(&self, key: NodeKey) -> Matrix4<f32> {
        let mut matrix = Matrix4::identity();
        let mut current = Some(key);
        while let Some(k) = current {
            let node = &self.nodes[k];
            matrix = node.transform.to_matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    /// Destroy a node, its subtree and every feature attached to them.
    ///
    /// Returns the removed features so callers can react (e.g. lights).
    ///
    /// # Panics
    ///
    /// When asked to remove the root.
    pub fn remove_node(&mut self, key: NodeKey) -> Vec<Feature> {
        assert!(key != self.root, "the root node cannot be removed");
        let Some(parent) = self.nodes.get(key).and_then(|node| node.parent) else {
            return Vec::new();
        };
        self.nodes[parent].children.retain(|&child| child != key);

        let mut removed = Vec::new();
        for node_key in self.descendants(key) {
            let features = self.nodes[node_key].features.clone();
            for feature in features {
                removed.push(self.detach(feature));
            }
            self.nodes.remove(node_key);
        }
        removed
    }

    /// Attach a feature to a node and register it in its collection.
    pub fn attach(&mut self, node: NodeKey, feature: Feature, config: Option<ConfigRef>) -> FeatureKey {
        assert!(self.nodes.contains_key(node), "cannot attach a feature to a missing node");
        let kind = feature.kind();
        let group = feature.draw_group();
        let key = self.features.insert(FeatureSlot {
            node,
            feature,
            config,
        });
        self.nodes[node].features.push(key);
        match (kind, group) {
            (_, Some(DrawGroup::Opaque)) => self.opaque.push(key),
            (_, Some(DrawGroup::Transparent)) => self.transparent.push(key),
            (FeatureKind::Light, _) => self.lights.push(key),
            (FeatureKind::Script, _) => self.scripts.push(key),
            _ => {}
        }
        if group.is_some() {
            self.reassign_object_ids();
        }
        key
    }

    /// Remove a feature from its node and every collection.
    ///
    /// # Panics
    ///
    /// If the feature doesn't exist.
    pub fn detach(&mut self, key: FeatureKey) -> Feature {
        let slot = self
            .features
            .remove(key)
            .unwrap_or_else(|| panic!("feature {:?} is not attached", key));
        if let Some(node) = self.nodes.get_mut(slot.node) {
            node.features.retain(|&f| f != key);
        }
        let was_drawable = self.opaque.contains(&key) || self.transparent.contains(&key);
        for list in [
            &mut self.opaque,
            &mut self.transparent,
            &mut self.lights,
            &mut self.scripts,
        ] {
            list.retain(|&f| f != key);
        }
        if self.active_camera == Some(key) {
            self.active_camera = None;
        }
        if was_drawable {
            self.reassign_object_ids();
        }
        slot.feature
    }

    pub fn feature(&self, key: FeatureKey) -> Option<&FeatureSlot> {
        self.features.get(key)
    }

    pub fn feature_mut(&mut self, key: FeatureKey) -> Option<&mut FeatureSlot> {
        self.features.get_mut(key)
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// The feature of `kind` on `node`, if there is one.
    pub fn find_feature(&self, node: NodeKey, kind: FeatureKind) -> Option<FeatureKey> {
        self.nodes.get(node)?.features.iter().copied().find(|&f| {
            self.features
                .get(f)
                .is_some_and(|slot| slot.feature.kind() == kind)
        })
    }

    /// Like [`SceneGraph::find_feature`], for callers that know it is attached.
    ///
    /// # Panics
    ///
    /// If `node` has no feature of `kind`.
    pub fn feature_of(&self, node: NodeKey, kind: FeatureKind) -> FeatureKey {
        self.find_feature(node, kind).unwrap_or_else(|| {
            panic!(
                "node {:?} has no {} feature",
                self.nodes.get(node).map(|n| n.name.as_str()),
                kind.type_name()
            )
        })
    }

    /// Move a drawable between the opaque and transparent lists after its
    /// material changed.
    pub fn regroup(&mut self, key: FeatureKey) {
        let Some(group) = self.features.get(key).and_then(|slot| slot.feature.draw_group())
        else {
            return;
        };
        let (target, other) = match group {
            DrawGroup::Opaque => (&mut self.opaque, &mut self.transparent),
            DrawGroup::Transparent => (&mut self.transparent, &mut self.opaque),
        };
        other.retain(|&f| f != key);
        if !target.contains(&key) {
            target.push(key);
        }
        self.reassign_object_ids();
    }

    /// Give every drawable its 1-based position (opaque first) as object id.
    pub fn reassign_object_ids(&mut self) {
        let order: Vec<FeatureKey> = self.drawables().collect();
        for (i, key) in order.into_iter().enumerate() {
            self.features[key].feature.set_object_id(i as u32 + 1);
        }
    }

    /// Drawables in draw order: opaque, then transparent.
    pub fn drawables(&self) -> impl Iterator<Item = FeatureKey> + '_ {
        self.opaque.iter().chain(self.transparent.iter()).copied()
    }

    pub fn opaque(&self) -> &[FeatureKey] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[FeatureKey] {
        &self.transparent
    }

    pub fn lights(&self) -> &[FeatureKey] {
        &self.lights
    }

    pub fn scripts(&self) -> &[FeatureKey] {
        &self.scripts
    }

    pub fn active_camera(&self) -> Option<FeatureKey> {
        self.active_camera
    }

    /// # Panics
    ///
    /// If `camera` is not a camera feature.
    pub fn set_active_camera(&mut self, camera: Option<FeatureKey>) {
        if let Some(key) = camera {
            assert!(
                self.features
                    .get(key)
                    .is_some_and(|slot| slot.feature.kind() == FeatureKind::Camera),
                "{:?} is not a camera",
                key
            );
        }
        self.active_camera = camera;
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;
    use crate::data_structures::feature::{LightFeature, LightKind, ScriptFeature};

    fn light() -> Feature {
        Feature::Light(LightFeature {
            kind: LightKind::Point,
            color: [1.0; 3],
            intensity: 1.0,
            range: f32::INFINITY,
        })
    }

    #[test]
    fn world_matrix_composes_parents() {
        let mut graph = SceneGraph::new();
        let parent = graph.add_node(graph.root(), "parent", Vector3::new(1.0, 0.0, 0.0).into());
        let child = graph.add_node(parent, "child", Vector3::new(0.0, 2.0, 0.0).into());
        let world = graph.world_matrix(child);
        assert_eq!(world.w.truncate(), Vector3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn descendants_are_pre_order() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::new());
        let a1 = graph.add_node(a, "a1", Transform::new());
        let b = graph.add_node(graph.root(), "b", Transform::new());
        let a2 = graph.add_node(a, "a2", Transform::new());
        assert_eq!(graph.descendants(graph.root())[1..], [a, a1, a2, b]);
    }

    #[test]
    fn removing_a_node_detaches_its_subtree() {
        let mut graph = SceneGraph::new();
        let parent = graph.add_node(graph.root(), "parent", Transform::new());
        let child = graph.add_node(parent, "child", Transform::new());
        graph.attach(child, light(), None);
        graph.attach(
            parent,
            Feature::Script(ScriptFeature {
                path: "a.py".into(),
                class_name: "A".into(),
            }),
            None,
        );
        assert_eq!(graph.lights().len(), 1);

        let removed = graph.remove_node(parent);
        assert_eq!(removed.len(), 2);
        assert!(!graph.contains(child));
        assert!(graph.lights().is_empty());
        assert!(graph.scripts().is_empty());
        assert_eq!(graph.feature_count(), 0);
        assert!(graph.node(graph.root()).unwrap().children().is_empty());
    }

    #[test]
    #[should_panic(expected = "has no camera feature")]
    fn asking_for_a_missing_variant_panics() {
        let mut graph = SceneGraph::new();
        let node = graph.add_node(graph.root(), "lamp", Transform::new());
        graph.attach(node, light(), None);
        graph.feature_of(node, FeatureKind::Camera);
    }
}

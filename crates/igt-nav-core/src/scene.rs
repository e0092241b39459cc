//! In-process scene: linear transforms, point lists and models addressed by
//! [`NodeId`], with change notification through [`crate::Subscription`].

use std::collections::BTreeMap;

use log::{debug, error};
use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};

use crate::events::{
    EventHub, NodeEvent, PoseSample, PoseSubscription, PoseWatch, Subscription, SubscriptionId,
};
use crate::mesh::{SharedMesh, TriangleMesh};
use crate::transform::{matrix_from_row_values, MATRIX_VALUE_COUNT};

/// Stable handle to a scene node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Transform,
    PointList,
    Model,
}

/// Display properties of a model node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDisplay {
    /// RGB in `[0, 1]`.
    pub color: [f32; 3],
    pub opacity: f32,
    pub visible: bool,
    pub backface_culling: bool,
    pub slice_intersection_visible: bool,
}

impl Default for ModelDisplay {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            opacity: 1.0,
            visible: true,
            backface_culling: true,
            slice_intersection_visible: false,
        }
    }
}

#[derive(Debug)]
enum NodeData {
    Transform { matrix_to_parent: Matrix4<f64> },
    PointList { points: Vec<Point3<f64>> },
    Model { mesh: SharedMesh, display: ModelDisplay },
}

impl NodeData {
    fn kind(&self) -> NodeKind {
        match self {
            NodeData::Transform { .. } => NodeKind::Transform,
            NodeData::PointList { .. } => NodeKind::PointList,
            NodeData::Model { .. } => NodeKind::Model,
        }
    }
}

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    data: NodeData,
}

/// Scene errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {id} is a {actual:?}, expected a {expected:?}")]
    WrongKind {
        id: NodeId,
        expected: NodeKind,
        actual: NodeKind,
    },
    #[error("a node named '{0}' already exists")]
    DuplicateName(String),
    #[error("parent {parent} of node {id} must be a transform")]
    ParentNotTransform { id: NodeId, parent: NodeId },
    #[error("setting parent {parent} on node {id} would create a cycle")]
    TransformCycle { id: NodeId, parent: NodeId },
    #[error("no transform path from {from} to {to}")]
    NoTransformPath { from: NodeId, to: NodeId },
    #[error("point index {index} out of range for list {id} with {len} points")]
    PointIndexOutOfRange { id: NodeId, index: usize, len: usize },
    #[error("16 values are needed to set a linear transform, got {got}")]
    InvalidMatrixLength { got: usize },
}

/// Host-style data model holding every node the navigation tools touch.
#[derive(Debug, Default)]
pub struct Scene {
    next_id: u32,
    nodes: BTreeMap<NodeId, Node>,
    hub: EventHub,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- generic node access -----

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node with the given name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.name == name)
            .map(|(id, _)| *id)
    }

    pub fn name(&self, id: NodeId) -> Result<&str, SceneError> {
        Ok(self.node(id)?.name.as_str())
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind, SceneError> {
        Ok(self.node(id)?.data.kind())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, SceneError> {
        Ok(self.node(id)?.parent)
    }

    /// Attach `id` under the transform `parent` (or detach with `None`).
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), SceneError> {
        self.node(id)?;
        if let Some(p) = parent {
            if self.kind(p)? != NodeKind::Transform {
                return Err(SceneError::ParentNotTransform { id, parent: p });
            }
            if self.transform_chain(p)?.contains(&id) {
                return Err(SceneError::TransformCycle { id, parent: p });
            }
        }
        self.node_mut(id)?.parent = parent;
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    /// Remove a node. Children are detached; subscribers see
    /// [`NodeEvent::Removed`].
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), SceneError> {
        let node = self.nodes.remove(&id).ok_or(SceneError::UnknownNode(id))?;
        debug!("removed node '{}' {}", node.name, id);
        let children: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(id))
            .map(|(cid, _)| *cid)
            .collect();
        for child in children {
            if let Some(n) = self.nodes.get_mut(&child) {
                n.parent = None;
            }
            self.notify(NodeEvent::Modified(child));
        }
        self.notify(NodeEvent::Removed(id));
        Ok(())
    }

    // ----- events -----

    /// Watch `nodes`; every later mutation of one of them is delivered to the
    /// returned subscription.
    pub fn subscribe(&mut self, nodes: impl IntoIterator<Item = NodeId>) -> Subscription {
        self.hub.subscribe(nodes)
    }

    /// Watch a pose; every later mutation that can move it delivers the
    /// pose as it is right after that mutation.
    pub fn subscribe_pose(&mut self, watch: PoseWatch) -> PoseSubscription {
        self.hub.subscribe_pose(watch)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    // ----- transforms -----

    pub fn add_transform(&mut self, name: &str) -> Result<NodeId, SceneError> {
        self.insert(
            name,
            NodeData::Transform {
                matrix_to_parent: Matrix4::identity(),
            },
        )
    }

    /// Existing transform with this name, or a new identity transform.
    pub fn get_or_add_transform(&mut self, name: &str) -> Result<NodeId, SceneError> {
        match self.find(name) {
            Some(id) => {
                self.expect_kind(id, NodeKind::Transform)?;
                Ok(id)
            }
            None => self.add_transform(name),
        }
    }

    pub fn matrix_to_parent(&self, id: NodeId) -> Result<Matrix4<f64>, SceneError> {
        match &self.node(id)?.data {
            NodeData::Transform { matrix_to_parent } => Ok(*matrix_to_parent),
            other => Err(wrong_kind(id, NodeKind::Transform, other.kind())),
        }
    }

    pub fn set_matrix_to_parent(&mut self, id: NodeId, m: Matrix4<f64>) -> Result<(), SceneError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Transform { matrix_to_parent } => *matrix_to_parent = m,
            other => return Err(wrong_kind(id, NodeKind::Transform, other.kind())),
        }
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    /// Set the matrix from 16 row-major values. A wrong count is logged and
    /// rejected without touching the node.
    pub fn set_matrix_from_values(&mut self, id: NodeId, values: &[f64]) -> Result<(), SceneError> {
        let Some(m) = matrix_from_row_values(values) else {
            error!(
                "{MATRIX_VALUE_COUNT} values are needed to set a linear transform, got {}",
                values.len()
            );
            return Err(SceneError::InvalidMatrixLength { got: values.len() });
        };
        self.set_matrix_to_parent(id, m)
    }

    /// `id` followed by all of its ancestors, nearest first.
    pub fn transform_chain(&self, id: NodeId) -> Result<Vec<NodeId>, SceneError> {
        let mut chain = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(p) = current {
            if chain.contains(&p) {
                return Err(SceneError::TransformCycle { id, parent: p });
            }
            chain.push(p);
            current = self.node(p)?.parent;
        }
        Ok(chain)
    }

    /// Composite transform from the node's own frame to the world frame.
    ///
    /// Non-transform nodes contribute identity, so this also gives the
    /// placement of a point list or model.
    pub fn to_world(&self, id: NodeId) -> Result<Matrix4<f64>, SceneError> {
        let mut m = Matrix4::identity();
        for node in self.transform_chain(id)? {
            if let NodeData::Transform { matrix_to_parent } = &self.node(node)?.data {
                m = matrix_to_parent * m;
            }
        }
        Ok(m)
    }

    /// Matrix mapping coordinates of `source` into the frame of `target`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn transform_between(
        &self,
        source: NodeId,
        target: NodeId,
    ) -> Result<Matrix4<f64>, SceneError> {
        let source_to_world = self.to_world(source)?;
        let target_to_world = self.to_world(target)?;
        let world_to_target = target_to_world
            .try_inverse()
            .ok_or(SceneError::NoTransformPath {
                from: source,
                to: target,
            })?;
        Ok(world_to_target * source_to_world)
    }

    // ----- point lists -----

    pub fn add_point_list(&mut self, name: &str) -> Result<NodeId, SceneError> {
        self.insert(name, NodeData::PointList { points: Vec::new() })
    }

    pub fn get_or_add_point_list(&mut self, name: &str) -> Result<NodeId, SceneError> {
        match self.find(name) {
            Some(id) => {
                self.expect_kind(id, NodeKind::PointList)?;
                Ok(id)
            }
            None => self.add_point_list(name),
        }
    }

    pub fn points(&self, id: NodeId) -> Result<&[Point3<f64>], SceneError> {
        match &self.node(id)?.data {
            NodeData::PointList { points } => Ok(points),
            other => Err(wrong_kind(id, NodeKind::PointList, other.kind())),
        }
    }

    pub fn point_count(&self, id: NodeId) -> Result<usize, SceneError> {
        Ok(self.points(id)?.len())
    }

    pub fn point(&self, id: NodeId, index: usize) -> Result<Point3<f64>, SceneError> {
        let points = self.points(id)?;
        points
            .get(index)
            .copied()
            .ok_or(SceneError::PointIndexOutOfRange {
                id,
                index,
                len: points.len(),
            })
    }

    pub fn push_point(&mut self, id: NodeId, p: Point3<f64>) -> Result<usize, SceneError> {
        let points = self.points_mut(id)?;
        points.push(p);
        let index = points.len() - 1;
        self.notify(NodeEvent::Modified(id));
        Ok(index)
    }

    pub fn set_point(&mut self, id: NodeId, index: usize, p: Point3<f64>) -> Result<(), SceneError> {
        let points = self.points_mut(id)?;
        let len = points.len();
        let slot = points
            .get_mut(index)
            .ok_or(SceneError::PointIndexOutOfRange { id, index, len })?;
        *slot = p;
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    pub fn remove_point(&mut self, id: NodeId, index: usize) -> Result<Point3<f64>, SceneError> {
        let points = self.points_mut(id)?;
        let len = points.len();
        if index >= len {
            return Err(SceneError::PointIndexOutOfRange { id, index, len });
        }
        let removed = points.remove(index);
        self.notify(NodeEvent::Modified(id));
        Ok(removed)
    }

    pub fn clear_points(&mut self, id: NodeId) -> Result<(), SceneError> {
        self.points_mut(id)?.clear();
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    /// Replace the whole content of a point list.
    pub fn replace_points(
        &mut self,
        id: NodeId,
        new_points: Vec<Point3<f64>>,
    ) -> Result<(), SceneError> {
        *self.points_mut(id)? = new_points;
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    // ----- models -----

    pub fn add_model(&mut self, name: &str, display: ModelDisplay) -> Result<NodeId, SceneError> {
        self.insert(
            name,
            NodeData::Model {
                mesh: SharedMesh::new(),
                display,
            },
        )
    }

    /// Shared handle to the model's mesh slot; writes through it bypass
    /// change notification.
    pub fn model_mesh(&self, id: NodeId) -> Result<SharedMesh, SceneError> {
        match &self.node(id)?.data {
            NodeData::Model { mesh, .. } => Ok(mesh.clone()),
            other => Err(wrong_kind(id, NodeKind::Model, other.kind())),
        }
    }

    pub fn set_model_mesh(&mut self, id: NodeId, mesh: TriangleMesh) -> Result<(), SceneError> {
        self.model_mesh(id)?.set(mesh);
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    pub fn model_display(&self, id: NodeId) -> Result<ModelDisplay, SceneError> {
        match &self.node(id)?.data {
            NodeData::Model { display, .. } => Ok(*display),
            other => Err(wrong_kind(id, NodeKind::Model, other.kind())),
        }
    }

    pub fn set_model_display(&mut self, id: NodeId, d: ModelDisplay) -> Result<(), SceneError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Model { display, .. } => *display = d,
            other => return Err(wrong_kind(id, NodeKind::Model, other.kind())),
        }
        self.notify(NodeEvent::Modified(id));
        Ok(())
    }

    // ----- internals -----

    fn notify(&mut self, event: NodeEvent) {
        self.hub.notify(event);
        let node = event.node();
        let samples: Vec<(SubscriptionId, PoseSample)> = self
            .hub
            .pose_watches()
            .filter(|(_, watch)| self.moves_pose(watch, node))
            .map(|(id, watch)| {
                let sample = PoseSample {
                    trigger: event,
                    matrix: self.evaluate_pose(&watch),
                };
                (id, sample)
            })
            .collect();
        if !samples.is_empty() {
            self.hub.send_poses(samples);
        }
    }

    fn moves_pose(&self, watch: &PoseWatch, node: NodeId) -> bool {
        if watch.endpoints().contains(&node) {
            return true;
        }
        match *watch {
            PoseWatch::Local(_) => false,
            PoseWatch::Relative { source, target } => [source, target].iter().any(|&end| {
                self.transform_chain(end)
                    .is_ok_and(|chain| chain.contains(&node))
            }),
        }
    }

    fn evaluate_pose(&self, watch: &PoseWatch) -> Result<Matrix4<f64>, SceneError> {
        match *watch {
            PoseWatch::Local(id) => self.matrix_to_parent(id),
            PoseWatch::Relative { source, target } => self.transform_between(source, target),
        }
    }

    fn insert(&mut self, name: &str, data: NodeData) -> Result<NodeId, SceneError> {
        if self.find(name).is_some() {
            return Err(SceneError::DuplicateName(name.to_owned()));
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        debug!("added {:?} node '{}' {}", data.kind(), name, id);
        self.nodes.insert(
            id,
            Node {
                name: name.to_owned(),
                parent: None,
                data,
            },
        );
        Ok(id)
    }

    fn node(&self, id: NodeId) -> Result<&Node, SceneError> {
        self.nodes.get(&id).ok_or(SceneError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SceneError> {
        self.nodes.get_mut(&id).ok_or(SceneError::UnknownNode(id))
    }

    fn points_mut(&mut self, id: NodeId) -> Result<&mut Vec<Point3<f64>>, SceneError> {
        match &mut self.node_mut(id)?.data {
            NodeData::PointList { points } => Ok(points),
            other => Err(wrong_kind(id, NodeKind::PointList, other.kind())),
        }
    }

    fn expect_kind(&self, id: NodeId, expected: NodeKind) -> Result<(), SceneError> {
        let actual = self.kind(id)?;
        if actual != expected {
            return Err(wrong_kind(id, expected, actual));
        }
        Ok(())
    }
}

fn wrong_kind(id: NodeId, expected: NodeKind, actual: NodeKind) -> SceneError {
    SceneError::WrongKind {
        id,
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::translation_matrix;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn chain_scene() -> (Scene, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let root = scene.add_transform("ChestToRas").unwrap();
        let tool = scene.add_transform("WireToChest").unwrap();
        let reference = scene.add_transform("NeedleToChest").unwrap();
        scene.set_parent(tool, Some(root)).unwrap();
        scene.set_parent(reference, Some(root)).unwrap();
        (scene, root, tool, reference)
    }

    #[test]
    fn transform_between_expresses_source_origin_in_target_frame() {
        let (mut scene, root, tool, reference) = chain_scene();
        scene
            .set_matrix_to_parent(root, translation_matrix(&Vector3::new(100.0, 0.0, 0.0)))
            .unwrap();
        scene
            .set_matrix_to_parent(tool, translation_matrix(&Vector3::new(5.0, 2.0, 0.0)))
            .unwrap();
        scene
            .set_matrix_to_parent(reference, translation_matrix(&Vector3::new(1.0, 1.0, 1.0)))
            .unwrap();

        let m = scene.transform_between(tool, reference).unwrap();
        assert_relative_eq!(m[(0, 3)], 4.0, epsilon = 1e-12);
        assert_relative_eq!(m[(1, 3)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(m[(2, 3)], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_target_has_no_transform_path() {
        let (mut scene, _, tool, reference) = chain_scene();
        scene
            .set_matrix_to_parent(reference, Matrix4::zeros())
            .unwrap();
        assert_eq!(
            scene.transform_between(tool, reference),
            Err(SceneError::NoTransformPath {
                from: tool,
                to: reference
            })
        );
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let (mut scene, root, tool, _) = chain_scene();
        assert_eq!(
            scene.set_parent(root, Some(tool)),
            Err(SceneError::TransformCycle {
                id: root,
                parent: tool
            })
        );
    }

    #[test]
    fn subscribers_receive_one_event_per_mutation() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints").unwrap();
        let other = scene.add_point_list("Other").unwrap();
        let sub = scene.subscribe([list]);

        scene.push_point(list, Point3::origin()).unwrap();
        scene.set_point(list, 0, Point3::new(1.0, 0.0, 0.0)).unwrap();
        scene.push_point(other, Point3::origin()).unwrap();

        assert_eq!(
            sub.drain(),
            vec![NodeEvent::Modified(list), NodeEvent::Modified(list)]
        );
        assert!(scene.unsubscribe(sub.id()));
        scene.clear_points(list).unwrap();
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn dropped_subscriptions_are_forgotten() {
        let mut scene = Scene::new();
        let t = scene.add_transform("T").unwrap();
        let sub = scene.subscribe([t]);
        drop(sub);
        scene.set_matrix_to_parent(t, Matrix4::identity()).unwrap();
        assert_eq!(scene.subscriber_count(), 0);
    }

    #[test]
    fn malformed_matrix_values_leave_node_untouched() {
        let mut scene = Scene::new();
        let t = scene.add_transform("T").unwrap();
        let sub = scene.subscribe([t]);
        assert_eq!(
            scene.set_matrix_from_values(t, &[1.0; 12]),
            Err(SceneError::InvalidMatrixLength { got: 12 })
        );
        assert_eq!(scene.matrix_to_parent(t).unwrap(), Matrix4::identity());
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn point_list_index_errors_are_reported() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("L").unwrap();
        assert_eq!(
            scene.remove_point(list, 0),
            Err(SceneError::PointIndexOutOfRange {
                id: list,
                index: 0,
                len: 0
            })
        );
        let t = scene.add_transform("T").unwrap();
        assert!(matches!(
            scene.points(t),
            Err(SceneError::WrongKind { .. })
        ));
    }

    #[test]
    fn removing_a_transform_detaches_children() {
        let (mut scene, root, tool, _) = chain_scene();
        let sub = scene.subscribe([root, tool]);
        scene.remove_node(root).unwrap();
        assert_eq!(scene.parent(tool).unwrap(), None);
        assert_eq!(
            sub.drain(),
            vec![NodeEvent::Modified(tool), NodeEvent::Removed(root)]
        );
    }

    #[test]
    fn pose_samples_keep_the_pose_of_each_mutation() {
        let (mut scene, _, tool, reference) = chain_scene();
        let sub = scene.subscribe_pose(PoseWatch::Relative {
            source: tool,
            target: reference,
        });
        for x in [19.0, 29.0] {
            scene
                .set_matrix_to_parent(tool, translation_matrix(&Vector3::new(x, 0.0, 0.0)))
                .unwrap();
        }
        let xs: Vec<f64> = sub
            .drain()
            .into_iter()
            .map(|s| s.matrix.unwrap()[(0, 3)])
            .collect();
        assert_eq!(xs, vec![19.0, 29.0]);
    }

    #[test]
    fn relative_pose_follows_reparenting() {
        let (mut scene, _, tool, reference) = chain_scene();
        let mount = scene.add_transform("Mount").unwrap();
        let sub = scene.subscribe_pose(PoseWatch::Relative {
            source: tool,
            target: reference,
        });
        scene
            .set_matrix_to_parent(mount, translation_matrix(&Vector3::new(7.0, 0.0, 0.0)))
            .unwrap();
        assert!(sub.try_next().is_none());

        scene.set_parent(tool, Some(mount)).unwrap();
        let sample = sub.try_next().unwrap();
        assert_eq!(sample.trigger, NodeEvent::Modified(tool));
        assert_relative_eq!(sample.matrix.unwrap()[(0, 3)], 7.0, epsilon = 1e-12);

        // the new ancestor now moves the tool
        scene
            .set_matrix_to_parent(mount, translation_matrix(&Vector3::new(9.0, 0.0, 0.0)))
            .unwrap();
        let sample = sub.try_next().unwrap();
        assert_eq!(sample.trigger, NodeEvent::Modified(mount));
        assert_relative_eq!(sample.matrix.unwrap()[(0, 3)], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn local_pose_ignores_ancestors() {
        let (mut scene, root, tool, _) = chain_scene();
        let sub = scene.subscribe_pose(PoseWatch::Local(tool));
        scene
            .set_matrix_to_parent(root, translation_matrix(&Vector3::new(1.0, 0.0, 0.0)))
            .unwrap();
        assert!(sub.try_next().is_none());
        scene
            .set_matrix_to_parent(tool, translation_matrix(&Vector3::new(2.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(
            sub.drain(),
            vec![PoseSample {
                trigger: NodeEvent::Modified(tool),
                matrix: Ok(translation_matrix(&Vector3::new(2.0, 0.0, 0.0))),
            }]
        );
        assert!(scene.unsubscribe(sub.id()));
        assert_eq!(scene.subscriber_count(), 0);
    }
}

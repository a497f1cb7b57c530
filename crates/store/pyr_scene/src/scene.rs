use std::sync::{Arc, OnceLock, Weak};

use glam::Mat4;
use smallvec::SmallVec;

use crate::{AreaLight, InfiniteLight, Material, SceneError, SceneResult, Shape};

// ---

/// A shape with its appearance, shared by every node that instances it.
///
/// Destruction is deferred until the scene (and any in-flight hit that still
/// points back here) lets go.
pub struct SceneObject {
    pub shape: Arc<dyn Shape>,
    pub material: Arc<Material>,
    pub area_light: Option<AreaLight>,
    parent: OnceLock<Weak<SceneNode>>,
}

impl SceneObject {
    /// The first node this object was attached to, if it still exists.
    ///
    /// The core never needs to walk upwards; this is a convenience for
    /// tooling, hence the weak link (objects may be instanced under several
    /// nodes — the back-pointer names the first).
    pub fn parent(&self) -> Option<Arc<SceneNode>> {
        self.parent.get().and_then(Weak::upgrade)
    }
}

/// One node of the scene DAG.
///
/// Children may be shared between nodes; a shared child with different
/// accumulated transforms *is* instancing, there is no separate mechanism.
pub struct SceneNode {
    /// Local transform, composed on top of whatever the path to this node
    /// accumulated.
    pub transform: Option<Mat4>,

    /// `(child, optional per-edge transform)` pairs.
    pub children: SmallVec<[(Arc<SceneNode>, Option<Mat4>); 4]>,

    pub objects: Vec<Arc<SceneObject>>,

    parent: OnceLock<Weak<SceneNode>>,
}

impl SceneNode {
    /// See [`SceneObject::parent`].
    pub fn parent(&self) -> Option<Arc<SceneNode>> {
        self.parent.get().and_then(Weak::upgrade)
    }
}

/// An immutable scene; build one with [`SceneBuilder`].
pub struct Scene {
    pub root: Arc<SceneNode>,
    pub infinite_lights: Vec<InfiniteLight>,
}

impl Scene {
    /// Flatten the DAG into `(object, world_from_object)` leaves.
    ///
    /// A node reachable along several paths yields one leaf per path — that
    /// is what makes instancing explicit for the acceleration structure.
    pub fn flatten(&self) -> Vec<(Arc<SceneObject>, Mat4)> {
        fn walk(node: &Arc<SceneNode>, accumulated: Mat4, out: &mut Vec<(Arc<SceneObject>, Mat4)>) {
            let accumulated = node
                .transform
                .map_or(accumulated, |transform| accumulated * transform);

            for object in &node.objects {
                out.push((object.clone(), accumulated));
            }
            for (child, edge_transform) in &node.children {
                let child_accumulated =
                    edge_transform.map_or(accumulated, |transform| accumulated * transform);
                walk(child, child_accumulated, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.root, Mat4::IDENTITY, &mut out);
        out
    }
}

// ---

/// Names a node while the scene is still under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeHandle(usize);

struct BuilderNode {
    transform: Option<Mat4>,
    children: Vec<(usize, Option<Mat4>)>,
    objects: Vec<Arc<SceneObject>>,
}

impl BuilderNode {
    fn new(transform: Option<Mat4>) -> Self {
        Self {
            transform,
            children: Vec::new(),
            objects: Vec::new(),
        }
    }
}

/// Constructs [`Scene`]s. Nodes are referred to by handle until `build`,
/// which freezes the graph (and rejects cycles and empty scenes).
pub struct SceneBuilder {
    nodes: Vec<BuilderNode>,
    infinite_lights: Vec<InfiniteLight>,
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![BuilderNode::new(None)],
            infinite_lights: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeHandle {
        NodeHandle(0)
    }

    pub fn add_node(&mut self) -> NodeHandle {
        self.nodes.push(BuilderNode::new(None));
        NodeHandle(self.nodes.len() - 1)
    }

    pub fn add_node_with_transform(&mut self, transform: Mat4) -> NodeHandle {
        self.nodes.push(BuilderNode::new(Some(transform)));
        NodeHandle(self.nodes.len() - 1)
    }

    pub fn attach_node(&mut self, parent: NodeHandle, child: NodeHandle) -> SceneResult<()> {
        self.attach_node_impl(parent, child, None)
    }

    pub fn attach_node_with_transform(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        transform: Mat4,
    ) -> SceneResult<()> {
        self.attach_node_impl(parent, child, Some(transform))
    }

    fn attach_node_impl(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        transform: Option<Mat4>,
    ) -> SceneResult<()> {
        self.check_handle(parent)?;
        self.check_handle(child)?;
        self.nodes[parent.0].children.push((child.0, transform));
        Ok(())
    }

    pub fn add_object(&mut self, shape: Arc<dyn Shape>, material: Material) -> Arc<SceneObject> {
        Arc::new(SceneObject {
            shape,
            material: Arc::new(material),
            area_light: None,
            parent: OnceLock::new(),
        })
    }

    pub fn add_object_with_light(
        &mut self,
        shape: Arc<dyn Shape>,
        material: Material,
        area_light: AreaLight,
    ) -> Arc<SceneObject> {
        Arc::new(SceneObject {
            shape,
            material: Arc::new(material),
            area_light: Some(area_light),
            parent: OnceLock::new(),
        })
    }

    pub fn attach_object(&mut self, node: NodeHandle, object: Arc<SceneObject>) -> SceneResult<()> {
        self.check_handle(node)?;
        self.nodes[node.0].objects.push(object);
        Ok(())
    }

    pub fn attach_object_to_root(&mut self, object: Arc<SceneObject>) {
        self.nodes[0].objects.push(object);
    }

    pub fn add_infinite_light(&mut self, light: InfiniteLight) {
        self.infinite_lights.push(light);
    }

    pub fn build(self) -> SceneResult<Scene> {
        let mut states: Vec<VisitState> = (0..self.nodes.len())
            .map(|_| VisitState::Unvisited)
            .collect();
        let root = convert(0, &self.nodes, &mut states)?;

        let scene = Scene {
            root,
            infinite_lights: self.infinite_lights,
        };

        if scene.flatten().is_empty() {
            return Err(SceneError::EmptyScene);
        }
        Ok(scene)
    }

    fn check_handle(&self, handle: NodeHandle) -> SceneResult<()> {
        if handle.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(SceneError::UnknownNode {
                node_index: handle.0,
            })
        }
    }
}

enum VisitState {
    Unvisited,
    InProgress,
    Done(Arc<SceneNode>),
}

fn convert(
    index: usize,
    nodes: &[BuilderNode],
    states: &mut Vec<VisitState>,
) -> SceneResult<Arc<SceneNode>> {
    match &states[index] {
        VisitState::Done(node) => return Ok(node.clone()),
        VisitState::InProgress => return Err(SceneError::CyclicGraph { node_index: index }),
        VisitState::Unvisited => {}
    }
    states[index] = VisitState::InProgress;

    let builder_node = &nodes[index];

    let mut children = SmallVec::new();
    for (child_index, edge_transform) in &builder_node.children {
        children.push((convert(*child_index, nodes, states)?, *edge_transform));
    }

    let node = Arc::new(SceneNode {
        transform: builder_node.transform,
        children,
        objects: builder_node.objects.clone(),
        parent: OnceLock::new(),
    });

    // Back-pointers: first attachment wins for shared (instanced) children.
    for (child, _) in &node.children {
        child.parent.set(Arc::downgrade(&node)).ok();
    }
    for object in &node.objects {
        object.parent.set(Arc::downgrade(&node)).ok();
    }

    states[index] = VisitState::Done(node.clone());
    Ok(node)
}

// ---

#[cfg(test)]
mod tests {
    use glam::{Mat4, UVec3, Vec3};

    use crate::TriangleShape;

    use super::*;

    fn test_shape() -> Arc<dyn Shape> {
        Arc::new(TriangleShape::new(
            vec![UVec3::new(0, 1, 2)],
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![],
            vec![],
        ))
    }

    #[test]
    fn instancing_yields_one_leaf_per_path() {
        let mut builder = SceneBuilder::new();

        let shared = builder.add_node();
        let object = builder.add_object(test_shape(), Material::default());
        builder.attach_object(shared, object).unwrap();

        let root = builder.root();
        builder
            .attach_node_with_transform(root, shared, Mat4::from_translation(Vec3::X * 10.0))
            .unwrap();
        builder
            .attach_node_with_transform(root, shared, Mat4::from_translation(Vec3::X * 20.0))
            .unwrap();

        let scene = builder.build().unwrap();
        let leaves = scene.flatten();
        assert_eq!(leaves.len(), 2);

        let x_translations: Vec<f32> = leaves
            .iter()
            .map(|(_, transform)| transform.w_axis.x)
            .collect();
        assert_eq!(x_translations, vec![10.0, 20.0]);

        // Both leaves share the same object.
        assert!(Arc::ptr_eq(&leaves[0].0, &leaves[1].0));
    }

    #[test]
    fn node_transform_composes_with_edge_transform() {
        let mut builder = SceneBuilder::new();

        let child = builder.add_node_with_transform(Mat4::from_translation(Vec3::Y));
        let object = builder.add_object(test_shape(), Material::default());
        builder.attach_object(child, object).unwrap();

        let root = builder.root();
        builder
            .attach_node_with_transform(root, child, Mat4::from_translation(Vec3::X))
            .unwrap();

        let scene = builder.build().unwrap();
        let leaves = scene.flatten();
        assert_eq!(leaves.len(), 1);

        let translation = leaves[0].1.w_axis;
        assert_eq!(translation.x, 1.0);
        assert_eq!(translation.y, 1.0);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut builder = SceneBuilder::new();

        let a = builder.add_node();
        let b = builder.add_node();
        let object = builder.add_object(test_shape(), Material::default());
        builder.attach_object(a, object).unwrap();

        let root = builder.root();
        builder.attach_node(root, a).unwrap();
        builder.attach_node(a, b).unwrap();
        builder.attach_node(b, a).unwrap(); // back-edge

        assert!(matches!(
            builder.build(),
            Err(SceneError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn empty_scene_is_rejected() {
        let builder = SceneBuilder::new();
        assert!(matches!(builder.build(), Err(SceneError::EmptyScene)));
    }

    #[test]
    fn parents_are_wired_up() {
        let mut builder = SceneBuilder::new();

        let child = builder.add_node();
        let object = builder.add_object(test_shape(), Material::default());
        builder.attach_object(child, object.clone()).unwrap();
        builder.attach_node(builder.root(), child).unwrap();

        let scene = builder.build().unwrap();

        let (leaf_object, _) = &scene.flatten()[0];
        let parent = leaf_object.parent().expect("object has a parent node");
        assert!(Arc::ptr_eq(
            &parent,
            &scene.root.children[0].0
        ));
        assert!(parent.parent().is_some(), "child node points back at root");
    }
}

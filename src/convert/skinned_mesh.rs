use log::{debug, info, warn};
use nalgebra::{Matrix4, Vector3};

use super::mesh::Mesh;
use super::scene::{NodeId, SceneNode};
use super::types::{ImportIssue, issue_code};
use super::vertex::VertexWeight;
use crate::collada::{ColladaDocument, Controller, Geometry};
use crate::error::ColladaError;
use crate::transform::{chain_inverse_bind_matrix, inverse_or_identity, transform_position};

#[derive(Debug, Clone)]
pub struct Joint {
    /// Name as listed by the controller, or the node name for pass-through joints.
    pub name: String,
    pub uid: String,
    /// Scene node driving this joint. Not owned.
    pub node: Option<NodeId>,
    /// Position in the controller's joint list; `None` for pass-through joints.
    pub controller_index: Option<usize>,
    pub index: i32,
    pub parent_index: i32,
    pub depth: usize,
    pub inverse_bind: Matrix4<f32>,
    /// Inverse of the node's world transform at rest.
    pub rest_inverse: Matrix4<f32>,
    pub local: Matrix4<f32>,
    pub world: Matrix4<f32>,
}

impl Joint {
    fn new(name: String, controller_index: Option<usize>, inverse_bind: Matrix4<f32>) -> Self {
        Self {
            uid: name.clone(),
            name,
            node: None,
            controller_index,
            index: -1,
            parent_index: -1,
            depth: 0,
            inverse_bind,
            rest_inverse: Matrix4::identity(),
            local: Matrix4::identity(),
            world: Matrix4::identity(),
        }
    }
}

/// Mesh bound to a joint hierarchy by a skin controller.
#[derive(Debug, Clone)]
pub struct SkinnedMesh {
    pub controller_id: String,
    pub name: String,
    pub joints: Vec<Joint>,
    /// Influences per position index of the source geometry.
    pub weights: Vec<VertexWeight>,
    pub max_influence: usize,
    pub bind_shape: Matrix4<f32>,
    pub mesh: Mesh,
    joints_are_idrefs: bool,
    linked: bool,
}

impl SkinnedMesh {
    /// Builds the weighted mesh of `controller` from its skin source.
    pub fn build(controller: &Controller, geometry: &Geometry) -> Result<Self, ColladaError> {
        let weights = controller
            .influences
            .iter()
            .map(|influences| {
                let mut weight = VertexWeight::default();
                for &(joint, value) in influences {
                    weight.add_weight(joint as u32, value);
                }
                weight.normalize();
                weight
            })
            .collect::<Vec<_>>();
        let max_influence = weights
            .iter()
            .map(|weight| weight.joint_count)
            .max()
            .unwrap_or(0);

        let mesh = Mesh::build(geometry, Some(&weights), max_influence)?;
        let joints = controller
            .joints
            .iter()
            .enumerate()
            .map(|(i, joint)| Joint::new(joint.name.clone(), Some(i), joint.inverse_bind))
            .collect::<Vec<_>>();

        info!(
            "skinned mesh '{}': {} joints, max {} influences per vertex",
            controller.id,
            joints.len(),
            max_influence
        );
        Ok(Self {
            controller_id: controller.id.clone(),
            name: controller.name.clone(),
            joints,
            weights,
            max_influence,
            bind_shape: controller.bind_shape_matrix,
            mesh,
            joints_are_idrefs: controller.joints_are_idrefs,
            linked: false,
        })
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Binds controller joints to scene nodes below `skeleton_root`.
    ///
    /// Nodes between matched joints that the controller does not list become
    /// pass-through joints so chains stay connected. Returns one issue per
    /// joint left without a node.
    pub fn link_joints(
        &mut self,
        nodes: &[SceneNode],
        document: &ColladaDocument,
        skeleton_root: NodeId,
    ) -> Vec<ImportIssue> {
        self.link_node(nodes, document, skeleton_root, None, 0);
        self.linked = true;

        self.joints
            .iter()
            .filter(|joint| joint.node.is_none())
            .map(|joint| {
                warn!(
                    "skinned mesh '{}': joint '{}' has no scene node",
                    self.controller_id, joint.name
                );
                ImportIssue::warning(
                    issue_code::JOINT_NOT_LINKED,
                    format!(
                        "skinned mesh '{}': joint '{}' has no scene node",
                        self.controller_id, joint.name
                    ),
                )
            })
            .collect()
    }

    fn link_node(
        &mut self,
        nodes: &[SceneNode],
        document: &ColladaDocument,
        node: NodeId,
        parent_joint: Option<usize>,
        depth: usize,
    ) {
        let scene_node = &nodes[node];
        let matched = scene_node.source.and_then(|source| {
            let doc_node = document.node(source);
            self.joints.iter().position(|joint| {
                joint.node.is_none()
                    && joint.controller_index.is_some()
                    && doc_node.matches_joint(&joint.name, self.joints_are_idrefs)
            })
        });

        let context = match (matched, parent_joint) {
            (Some(index), _) => {
                let joint = &mut self.joints[index];
                joint.node = Some(node);
                joint.depth = depth;
                joint.uid = scene_node.dae_id.clone().unwrap_or_else(|| joint.name.clone());
                joint.rest_inverse = inverse_or_identity(&scene_node.world);
                Some(index)
            }
            (None, Some(parent)) => {
                let inverse_bind =
                    chain_inverse_bind_matrix(&self.joints[parent].inverse_bind, &scene_node.local);
                let mut joint = Joint::new(scene_node.name.clone(), None, inverse_bind);
                joint.node = Some(node);
                joint.depth = depth;
                joint.uid = scene_node.dae_id.clone().unwrap_or_else(|| scene_node.name.clone());
                joint.rest_inverse = inverse_or_identity(&scene_node.world);
                debug!(
                    "skinned mesh '{}': pass-through joint '{}'",
                    self.controller_id, joint.name
                );
                self.joints.push(joint);
                Some(self.joints.len() - 1)
            }
            (None, None) => None,
        };

        for &child in &scene_node.children {
            self.link_node(nodes, document, child, context, depth + 1);
        }
    }

    /// Sorts joints by `(depth, uid)`, remaps every vertex joint index to the
    /// new order and recomputes parent indices.
    ///
    /// Afterwards `parent_index < index` holds for every non-root joint.
    pub fn build_joints_hierarchy(&mut self, nodes: &[SceneNode]) {
        let mut order = (0..self.joints.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| {
            let (ja, jb) = (&self.joints[a], &self.joints[b]);
            (ja.node.is_none(), ja.depth, &ja.uid).cmp(&(jb.node.is_none(), jb.depth, &jb.uid))
        });

        let controller_joint_count = self
            .joints
            .iter()
            .filter_map(|joint| joint.controller_index)
            .max()
            .map_or(0, |max| max + 1);
        let mut remap = vec![0u32; controller_joint_count];
        let mut sorted = Vec::with_capacity(order.len());
        for (new_index, &old) in order.iter().enumerate() {
            let mut joint = self.joints[old].clone();
            if let Some(controller_index) = joint.controller_index {
                remap[controller_index] = new_index as u32;
            }
            joint.index = new_index as i32;
            sorted.push(joint);
        }

        let remap_joint = |joint: u32| remap.get(joint as usize).copied().unwrap_or(joint);
        for group in &mut self.mesh.polygon_groups {
            for vertex in group
                .vertices
                .iter_mut()
                .chain(group.unoptimized_vertices.iter_mut())
            {
                for slot in 0..vertex.joint_count {
                    vertex.joints[slot] = remap_joint(vertex.joints[slot]);
                }
            }
        }
        for weight in &mut self.weights {
            for slot in 0..weight.joint_count {
                weight.joints[slot] = remap_joint(weight.joints[slot]);
            }
        }

        for index in 0..sorted.len() {
            let parent_node = sorted[index].node.and_then(|node| nodes[node].parent);
            sorted[index].parent_index = parent_node
                .and_then(|parent| {
                    sorted[..index]
                        .iter()
                        .position(|candidate| candidate.node == Some(parent))
                })
                .map_or(-1, |parent| parent as i32);
        }

        self.joints = sorted;
    }

    /// Poses joints from the current node transforms and skins every welded
    /// vertex into `PolygonGroup::skin_positions`.
    pub fn update_skinned_mesh(&mut self, nodes: &[SceneNode]) {
        for index in 0..self.joints.len() {
            let (local, world) = match self.joints[index].node {
                Some(node) => {
                    let local = nodes[node].local;
                    let world = match self.joints[index].parent_index {
                        parent if parent >= 0 => self.joints[parent as usize].world * local,
                        _ => nodes[node].world,
                    };
                    (local, world)
                }
                // Unlinked joints stay in bind pose.
                None => {
                    let bind = inverse_or_identity(&self.joints[index].inverse_bind);
                    (bind, bind)
                }
            };
            self.joints[index].local = local;
            self.joints[index].world = world;
        }

        let final_matrices = self
            .joints
            .iter()
            .map(|joint| joint.world * joint.inverse_bind * self.bind_shape)
            .collect::<Vec<_>>();

        for group in &mut self.mesh.polygon_groups {
            group.skin_positions = group
                .vertices
                .iter()
                .map(|vertex| {
                    if vertex.joint_count == 0 {
                        return transform_position(&self.bind_shape, &vertex.position);
                    }
                    (0..vertex.joint_count).fold(Vector3::zeros(), |acc, slot| {
                        let matrix = final_matrices
                            .get(vertex.joints[slot] as usize)
                            .unwrap_or(&self.bind_shape);
                        acc + transform_position(matrix, &vertex.position) * vertex.weights[slot]
                    })
                })
                .collect();
        }
    }
}

use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::Matrix4;

use super::animation::TrackRef;
use super::native::{
    AnimationComponent, AnimationHandle, CameraComponent, Entity, EntityId, LightComponent,
    MaterialHandle, MaterialTemplate, NativeLibrary, NativeScene, PolygonGroupHandle, RenderBatch,
    RenderObject, SkeletonComponent, SkeletonJoint, SkinningFlag,
};
use super::polygon_group::PolygonGroup;
use super::scene::{ColladaScene, MaterialId, MeshId, MeshRef, NodeId, SkinnedMeshId};
use super::skinned_mesh::SkinnedMesh;
use super::types::{BoundingBox, MAX_BONES_PER_VERTEX};
use super::vertex::VertexFormat;
use crate::transform::{inverse_or_identity, matrix_to_rows, transform_position};

/// Influences at or below this weight do not grow a joint's bounds.
const JOINT_BOUNDS_EPSILON: f32 = 1e-6;

/// Identity of a source polygon group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonKey {
    Mesh { mesh: MeshId, group: usize },
    Skinned { mesh: SkinnedMeshId, group: usize },
}

impl PolygonKey {
    fn new(mesh: MeshRef, group: usize) -> Self {
        match mesh {
            MeshRef::Static(mesh) => PolygonKey::Mesh { mesh, group },
            MeshRef::Skinned(mesh) => PolygonKey::Skinned { mesh, group },
        }
    }
}

/// Identity of a source material. Unresolved references share one placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKey {
    Material(MaterialId),
    Placeholder,
}

/// Native objects already created during one import, keyed by the identity of
/// the intermediate object they were built from.
///
/// Two intermediate objects with equal content still map to two native
/// objects; only repeated references to the same one are shared.
#[derive(Debug, Default)]
pub struct ImportCache {
    polygons: HashMap<PolygonKey, PolygonGroupHandle>,
    material_parents: HashMap<MaterialKey, MaterialHandle>,
    animations: HashMap<TrackRef, AnimationHandle>,
}

impl ImportCache {
    pub fn get_or_create_polygon(
        &mut self,
        library: &mut NativeLibrary,
        scene: &ColladaScene,
        key: PolygonKey,
    ) -> PolygonGroupHandle {
        if let Some(&handle) = self.polygons.get(&key) {
            debug!("polygon cache hit: {:?}", key);
            return handle;
        }
        debug!("polygon cache miss: {:?}", key);

        let handle = match key {
            PolygonKey::Mesh { mesh, group } => {
                create_polygon_group(library, &scene.meshes[mesh].polygon_groups[group])
            }
            PolygonKey::Skinned { mesh, group } => {
                let skinned = &scene.skinned_meshes[mesh];
                let raw = create_polygon_group(library, &skinned.mesh.polygon_groups[group]);
                // Skinned batches render the bind-shape applied copy.
                let bound = library.polygon_group(raw).transformed(&skinned.bind_shape);
                *library.polygon_group_mut(raw) = bound;
                raw
            }
        };
        self.polygons.insert(key, handle);
        handle
    }

    pub fn get_or_create_material_parent(
        &mut self,
        library: &mut NativeLibrary,
        scene: &ColladaScene,
        key: MaterialKey,
    ) -> MaterialHandle {
        if let Some(&handle) = self.material_parents.get(&key) {
            debug!("material cache hit: {:?}", key);
            return handle;
        }
        debug!("material cache miss: {:?}", key);

        let handle = match key {
            MaterialKey::Material(id) => {
                let source = &scene.materials[id];
                let handle = library.create_material(&source.name, source.shading.into());
                let textures = [
                    ("albedo", source.diffuse_texture.as_ref()),
                    ("normalmap", source.normal_texture.as_ref()),
                ]
                .into_iter()
                .filter_map(|(slot, path)| {
                    let path = path?;
                    let texture = library.find_texture(path);
                    if texture.is_none() {
                        debug!("material '{}': no descriptor for {}", source.name, path.display());
                    }
                    Some((slot, texture?))
                })
                .collect::<Vec<_>>();

                let material = library.material_mut(handle);
                material.diffuse_color = source.diffuse_color;
                material.specular_color = source.specular_color;
                material.shininess = source.shininess;
                material.transparency = source.transparency;
                for (slot, texture) in textures {
                    material.set_texture(slot, texture);
                }
                handle
            }
            MaterialKey::Placeholder => {
                let handle = library.create_material("placeholder", MaterialTemplate::Placeholder);
                library.material_mut(handle).diffuse_color = [1.0, 0.0, 1.0, 1.0];
                handle
            }
        };
        self.material_parents.insert(key, handle);
        handle
    }

    pub fn get_or_create_animation(
        &mut self,
        library: &mut NativeLibrary,
        scene: &ColladaScene,
        track: TrackRef,
        inv_pose: [[f32; 4]; 4],
    ) -> AnimationHandle {
        if let Some(&handle) = self.animations.get(&track) {
            debug!("animation cache hit: {:?}", track);
            return handle;
        }
        debug!("animation cache miss: {:?}", track);

        let animation = &scene.animations[track.animation];
        let source = &animation.tracks[track.track];
        let handle = library.create_animation(&source.name, &source.uid, animation.duration);
        let native = library.animation_mut(handle);
        for (time, value) in &source.translations {
            native.add_translation_key(*time, value);
        }
        for (time, value) in &source.rotations {
            let q = value.quaternion();
            native.add_rotation_key(*time, [q.i, q.j, q.k, q.w]);
        }
        for (time, value) in &source.scales {
            native.add_scale_key(*time, value);
        }
        native.set_inv_pose(inv_pose);

        self.animations.insert(track, handle);
        handle
    }
}

fn create_polygon_group(library: &mut NativeLibrary, source: &PolygonGroup) -> PolygonGroupHandle {
    let handle =
        library.create_polygon_group(source.format, source.vertices.len(), source.indices.len());
    let group = library.polygon_group_mut(handle);

    for (i, vertex) in source.vertices.iter().enumerate() {
        group.set_coord(i, &vertex.position);
        group.set_normal(i, &vertex.normal);
        group.set_tangent(i, &vertex.tangent);
        group.set_binormal(i, &vertex.binormal);
        for set in 0..VertexFormat::TEXCOORDS.len() {
            group.set_tex_coord(set, i, &vertex.tex_coords[set]);
        }
        if source.format.contains(VertexFormat::HARD_JOINTINDEX) {
            group.set_hard_joint(i, vertex.joints[0]);
        } else {
            for slot in 0..vertex.joint_count.min(MAX_BONES_PER_VERTEX) {
                group.set_joint(i, slot, vertex.joints[slot], vertex.weights[slot]);
            }
        }
    }
    for (i, index) in source.indices.iter().enumerate() {
        group.set_index(i, *index);
    }
    group.recalc_bbox();
    handle
}

// ─── Scene import ─────────────────────────────────────────────────────────────

struct PendingNode {
    node: NodeId,
    /// Entity the node's entity attaches to; `None` for the scene root.
    parent: Option<EntityId>,
    /// Product of the local transforms of skipped joints between `parent`
    /// and this node.
    skipped: Matrix4<f32>,
}

/// Builds the native scene for `scene`.
///
/// Every non-joint node becomes one entity. Joint nodes are represented by
/// skeleton components, so their non-joint descendants attach to the nearest
/// entity above them with the skipped joint transforms folded into their
/// local transform.
pub fn import_scene(scene: &ColladaScene) -> NativeScene {
    let mut library = NativeLibrary::default();
    for texture in &scene.textures {
        library.add_texture(texture.clone());
    }

    let mut cache = ImportCache::default();
    let mut entities: Vec<Entity> = Vec::new();
    let mut stack = vec![PendingNode {
        node: scene.root,
        parent: None,
        skipped: Matrix4::identity(),
    }];

    while let Some(PendingNode {
        node,
        parent,
        skipped,
    }) = stack.pop()
    {
        let scene_node = &scene.nodes[node];
        let (attach_to, child_skipped) = if scene_node.is_joint {
            (parent, skipped * scene_node.local)
        } else {
            let local = skipped * scene_node.local;
            let entity = build_entity(scene, node, &local, &mut cache, &mut library);
            entities.push(entity);
            let id = entities.len() - 1;
            if let Some(parent) = parent {
                entities[parent].children.push(id);
            }
            (Some(id), Matrix4::identity())
        };

        for &child in scene_node.children.iter().rev() {
            stack.push(PendingNode {
                node: child,
                parent: attach_to,
                skipped: child_skipped,
            });
        }
    }

    info!(
        "native scene '{}': {} entities, {} polygon groups, {} materials, {} animations",
        scene.nodes[scene.root].name,
        entities.len(),
        library.polygon_groups.len(),
        library.materials.len(),
        library.animations.len()
    );
    NativeScene {
        name: scene.nodes[scene.root].name.clone(),
        root: 0,
        entities,
        library,
    }
}

fn build_entity(
    scene: &ColladaScene,
    node: NodeId,
    local: &Matrix4<f32>,
    cache: &mut ImportCache,
    library: &mut NativeLibrary,
) -> Entity {
    let scene_node = &scene.nodes[node];
    let mut entity = Entity::new(&scene_node.name, matrix_to_rows(local));
    entity.errors = scene_node.errors.clone();

    if !scene_node.mesh_instances.is_empty() {
        let mut render_object = RenderObject::default();
        for instance in &scene_node.mesh_instances {
            let mesh = scene.mesh_of(instance.mesh);
            let skinned = match instance.mesh {
                MeshRef::Skinned(id) => Some(&scene.skinned_meshes[id]),
                MeshRef::Static(_) => None,
            };

            for (index, group) in mesh.polygon_groups.iter().enumerate() {
                let key = PolygonKey::new(instance.mesh, index);
                let polygon_group = cache.get_or_create_polygon(library, scene, key);
                let material_key = instance
                    .materials
                    .get(index)
                    .copied()
                    .flatten()
                    .map_or(MaterialKey::Placeholder, MaterialKey::Material);
                let parent = cache.get_or_create_material_parent(library, scene, material_key);

                let skinning = skinned.map(|skinned| {
                    if group.format.contains(VertexFormat::HARD_JOINTINDEX) {
                        SkinningFlag::Hard
                    } else {
                        SkinningFlag::Soft {
                            max_weights: skinned.max_influence.min(MAX_BONES_PER_VERTEX),
                        }
                    }
                });
                let instance_name = format!("{}.{}", scene_node.name, group.material_semantic);
                let material = library.create_material_instance(parent, &instance_name, skinning);
                render_object.batches.push(RenderBatch {
                    polygon_group,
                    material,
                });
            }

            if let Some(skinned) = skinned {
                render_object.skinned = true;
                if entity.skeleton.is_some() {
                    warn!(
                        "node '{}': more than one skin bound, keeping the first skeleton",
                        scene_node.name
                    );
                } else {
                    entity.skeleton = Some(build_skeleton(scene, skinned));
                }
            }
        }
        entity.render_object = Some(render_object);
    }

    if let Some(track) = scene_node.animation {
        let inv_pose = inverse_or_identity(&scene.accumulate_transform_up_to(node, scene.root));
        let animation =
            cache.get_or_create_animation(library, scene, track, matrix_to_rows(&inv_pose));
        entity.animation = Some(AnimationComponent { animation });
    }

    entity.lights = scene_node
        .lights
        .iter()
        .map(|&light| LightComponent::from(&scene.lights[light]))
        .collect();
    entity.cameras = scene_node
        .cameras
        .iter()
        .map(|&camera| CameraComponent::from(&scene.cameras[camera]))
        .collect();
    entity
}

fn build_skeleton(scene: &ColladaScene, skinned: &SkinnedMesh) -> SkeletonComponent {
    let mut bounds = vec![BoundingBox::default(); skinned.joints.len()];
    for group in &skinned.mesh.polygon_groups {
        let hard = group.format.contains(VertexFormat::HARD_JOINTINDEX);
        for vertex in &group.vertices {
            for slot in 0..vertex.joint_count {
                if !hard && vertex.weights[slot] <= JOINT_BOUNDS_EPSILON {
                    continue;
                }
                let joint = vertex.joints[slot] as usize;
                let Some(bbox) = bounds.get_mut(joint) else {
                    continue;
                };
                let to_joint = skinned.joints[joint].inverse_bind * skinned.bind_shape;
                bbox.add_point(&transform_position(&to_joint, &vertex.position));
                if hard {
                    break;
                }
            }
        }
    }

    let joints = skinned
        .joints
        .iter()
        .zip(bounds)
        .map(|(joint, bbox)| {
            let bind_transform = match joint.node {
                Some(node) if joint.parent_index < 0 => {
                    scene.accumulate_transform_up_to(node, scene.root)
                }
                Some(node) => scene.nodes[node].local,
                None => inverse_or_identity(&joint.inverse_bind),
            };
            let (bbox_min, bbox_max) = if bbox.is_empty() {
                ([0.0; 3], [0.0; 3])
            } else {
                (bbox.min.into(), bbox.max.into())
            };
            SkeletonJoint {
                name: joint.name.clone(),
                uid: joint.uid.clone(),
                parent_index: joint.parent_index,
                bind_transform: matrix_to_rows(&bind_transform),
                bind_transform_inv: matrix_to_rows(&joint.inverse_bind),
                bbox_min,
                bbox_max,
            }
        })
        .collect();

    let mut pose_bbox = BoundingBox::default();
    for position in skinned.mesh.polygon_groups.iter().flat_map(|group| &group.skin_positions) {
        pose_bbox.add_point(position);
    }
    let (pose_bbox_min, pose_bbox_max) = if pose_bbox.is_empty() {
        ([0.0; 3], [0.0; 3])
    } else {
        (pose_bbox.min.into(), pose_bbox.max.into())
    };
    SkeletonComponent {
        joints,
        pose_bbox_min,
        pose_bbox_max,
    }
}

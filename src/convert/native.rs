//! Native engine object model produced by the importer.
//!
//! Resources live in a [`NativeLibrary`] and are referenced by handle from the
//! flat entity list of a [`NativeScene`]. Everything here serializes into the
//! scene file.

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3};
use serde::Serialize;

use super::types::BoundingBox;
use super::vertex::VertexFormat;
use crate::collada::{CameraEntity, LightEntity, LightKind, Projection, ShadingModel};
use crate::texture::TextureDescriptor;
use crate::transform::{matrix_to_rows, transform_position};

pub type PolygonGroupHandle = usize;
pub type MaterialHandle = usize;
pub type MaterialInstanceHandle = usize;
pub type AnimationHandle = usize;
pub type EntityId = usize;

// ─── Polygon groups ───────────────────────────────────────────────────────────

/// Indexed vertex buffer allocated for a fixed vertex format.
///
/// Only the streams selected by `format` are allocated; setters on other
/// streams are ignored.
#[derive(Debug, Clone, Serialize)]
pub struct NativePolygonGroup {
    pub format: VertexFormat,
    pub vertex_count: usize,
    pub index_count: usize,
    pub coords: Vec<[f32; 3]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub normals: Vec<[f32; 3]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tangents: Vec<[f32; 3]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binormals: Vec<[f32; 3]>,
    /// One stream per declared texture coordinate set.
    pub tex_coords: Vec<Vec<[f32; 2]>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub joint_indices: Vec<[u32; 4]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub joint_weights: Vec<[f32; 4]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hard_joint_indices: Vec<u32>,
    pub indices: Vec<u32>,
    pub bbox_min: [f32; 3],
    pub bbox_max: [f32; 3],
}

impl NativePolygonGroup {
    fn new(format: VertexFormat, vertex_count: usize, index_count: usize) -> Self {
        let stream = |flag: VertexFormat| {
            if format.contains(flag) {
                vec![[0.0; 3]; vertex_count]
            } else {
                Vec::new()
            }
        };
        let tex_coord_sets = VertexFormat::TEXCOORDS
            .iter()
            .rposition(|flag| format.contains(*flag))
            .map_or(0, |last| last + 1);
        Self {
            format,
            vertex_count,
            index_count,
            coords: vec![[0.0; 3]; vertex_count],
            normals: stream(VertexFormat::NORMAL),
            tangents: stream(VertexFormat::TANGENT),
            binormals: stream(VertexFormat::BINORMAL),
            tex_coords: vec![vec![[0.0; 2]; vertex_count]; tex_coord_sets],
            joint_indices: if format.contains(VertexFormat::JOINTINDEX) {
                vec![[0; 4]; vertex_count]
            } else {
                Vec::new()
            },
            joint_weights: if format.contains(VertexFormat::JOINTWEIGHT) {
                vec![[0.0; 4]; vertex_count]
            } else {
                Vec::new()
            },
            hard_joint_indices: if format.contains(VertexFormat::HARD_JOINTINDEX) {
                vec![0; vertex_count]
            } else {
                Vec::new()
            },
            indices: vec![0; index_count],
            bbox_min: [0.0; 3],
            bbox_max: [0.0; 3],
        }
    }

    pub fn set_coord(&mut self, vertex: usize, value: &Vector3<f32>) {
        if let Some(slot) = self.coords.get_mut(vertex) {
            *slot = (*value).into();
        }
    }

    pub fn set_normal(&mut self, vertex: usize, value: &Vector3<f32>) {
        if let Some(slot) = self.normals.get_mut(vertex) {
            *slot = (*value).into();
        }
    }

    pub fn set_tangent(&mut self, vertex: usize, value: &Vector3<f32>) {
        if let Some(slot) = self.tangents.get_mut(vertex) {
            *slot = (*value).into();
        }
    }

    pub fn set_binormal(&mut self, vertex: usize, value: &Vector3<f32>) {
        if let Some(slot) = self.binormals.get_mut(vertex) {
            *slot = (*value).into();
        }
    }

    pub fn set_tex_coord(&mut self, set: usize, vertex: usize, value: &Vector2<f32>) {
        if let Some(slot) = self.tex_coords.get_mut(set).and_then(|stream| stream.get_mut(vertex)) {
            *slot = (*value).into();
        }
    }

    pub fn set_joint(&mut self, vertex: usize, slot: usize, joint: u32, weight: f32) {
        if let Some(joints) = self.joint_indices.get_mut(vertex) {
            joints[slot] = joint;
        }
        if let Some(weights) = self.joint_weights.get_mut(vertex) {
            weights[slot] = weight;
        }
    }

    pub fn set_hard_joint(&mut self, vertex: usize, joint: u32) {
        if let Some(slot) = self.hard_joint_indices.get_mut(vertex) {
            *slot = joint;
        }
    }

    pub fn set_index(&mut self, position: usize, vertex: u32) {
        if let Some(slot) = self.indices.get_mut(position) {
            *slot = vertex;
        }
    }

    pub fn recalc_bbox(&mut self) {
        let mut bbox = BoundingBox::default();
        for coord in &self.coords {
            bbox.add_point(&Vector3::from(*coord));
        }
        if bbox.is_empty() {
            bbox = BoundingBox {
                min: Vector3::zeros(),
                max: Vector3::zeros(),
            };
        }
        self.bbox_min = bbox.min.into();
        self.bbox_max = bbox.max.into();
    }

    /// Copy with positions and directions transformed by `matrix`.
    pub fn transformed(&self, matrix: &Matrix4<f32>) -> Self {
        let mut copy = self.clone();
        let linear: Matrix3<f32> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let normal_matrix = linear
            .try_inverse()
            .map(|inverse| inverse.transpose())
            .unwrap_or(linear);
        let direction = |m: &Matrix3<f32>, value: &[f32; 3]| -> [f32; 3] {
            let v = m * Vector3::from(*value);
            v.try_normalize(f32::EPSILON).unwrap_or(v).into()
        };

        for coord in &mut copy.coords {
            *coord = transform_position(matrix, &Vector3::from(*coord)).into();
        }
        for normal in &mut copy.normals {
            *normal = direction(&normal_matrix, normal);
        }
        for tangent in copy.tangents.iter_mut().chain(copy.binormals.iter_mut()) {
            *tangent = direction(&linear, tangent);
        }
        copy.recalc_bbox();
        copy
    }
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MaterialTemplate {
    Flat,
    Diffuse,
    Specular,
    /// Stand-in for unresolved material references.
    Placeholder,
}

impl From<ShadingModel> for MaterialTemplate {
    fn from(shading: ShadingModel) -> Self {
        match shading {
            ShadingModel::Constant => MaterialTemplate::Flat,
            ShadingModel::Lambert => MaterialTemplate::Diffuse,
            ShadingModel::Phong | ShadingModel::Blinn => MaterialTemplate::Specular,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NativeMaterial {
    pub name: String,
    pub template: MaterialTemplate,
    /// `(slot, texture descriptor index)` pairs, e.g. `("albedo", 0)`.
    pub textures: Vec<(String, usize)>,
    pub diffuse_color: [f32; 4],
    pub specular_color: [f32; 4],
    pub shininess: f32,
    pub transparency: f32,
}

impl NativeMaterial {
    pub fn set_texture(&mut self, slot: &str, texture: usize) {
        match self.textures.iter_mut().find(|(name, _)| name == slot) {
            Some(existing) => existing.1 = texture,
            None => self.textures.push((slot.to_string(), texture)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkinningFlag {
    Hard,
    Soft { max_weights: usize },
}

/// Per-batch instance of a material parent.
#[derive(Debug, Clone, Serialize)]
pub struct NativeMaterialInstance {
    pub parent: MaterialHandle,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skinning: Option<SkinningFlag>,
}

// ─── Animations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NativeAnimation {
    pub name: String,
    pub uid: String,
    pub duration: f32,
    pub translations: Vec<(f32, [f32; 3])>,
    /// `x, y, z, w` quaternions.
    pub rotations: Vec<(f32, [f32; 4])>,
    pub scales: Vec<(f32, [f32; 3])>,
    /// Inverse of the node transform accumulated up to the scene root.
    pub inv_pose: [[f32; 4]; 4],
}

impl NativeAnimation {
    pub fn add_translation_key(&mut self, time: f32, value: &Vector3<f32>) {
        self.translations.push((time, (*value).into()));
    }

    pub fn add_rotation_key(&mut self, time: f32, value: [f32; 4]) {
        self.rotations.push((time, value));
    }

    pub fn add_scale_key(&mut self, time: f32, value: &Vector3<f32>) {
        self.scales.push((time, (*value).into()));
    }

    pub fn set_inv_pose(&mut self, matrix: [[f32; 4]; 4]) {
        self.inv_pose = matrix;
    }
}

// ─── Library ──────────────────────────────────────────────────────────────────

/// Owner of every native resource. Handles are indices into its lists.
#[derive(Debug, Default, Serialize)]
pub struct NativeLibrary {
    pub polygon_groups: Vec<NativePolygonGroup>,
    pub materials: Vec<NativeMaterial>,
    pub material_instances: Vec<NativeMaterialInstance>,
    pub animations: Vec<NativeAnimation>,
    pub textures: Vec<TextureDescriptor>,
}

impl NativeLibrary {
    pub fn create_polygon_group(
        &mut self,
        format: VertexFormat,
        vertex_count: usize,
        index_count: usize,
    ) -> PolygonGroupHandle {
        self.polygon_groups
            .push(NativePolygonGroup::new(format, vertex_count, index_count));
        self.polygon_groups.len() - 1
    }

    pub fn add_polygon_group(&mut self, group: NativePolygonGroup) -> PolygonGroupHandle {
        self.polygon_groups.push(group);
        self.polygon_groups.len() - 1
    }

    pub fn polygon_group(&self, handle: PolygonGroupHandle) -> &NativePolygonGroup {
        &self.polygon_groups[handle]
    }

    pub fn polygon_group_mut(&mut self, handle: PolygonGroupHandle) -> &mut NativePolygonGroup {
        &mut self.polygon_groups[handle]
    }

    pub fn create_material(&mut self, name: &str, template: MaterialTemplate) -> MaterialHandle {
        self.materials.push(NativeMaterial {
            name: name.to_string(),
            template,
            textures: Vec::new(),
            diffuse_color: [1.0; 4],
            specular_color: [0.0, 0.0, 0.0, 1.0],
            shininess: 0.0,
            transparency: 0.0,
        });
        self.materials.len() - 1
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> &mut NativeMaterial {
        &mut self.materials[handle]
    }

    pub fn create_material_instance(
        &mut self,
        parent: MaterialHandle,
        name: &str,
        skinning: Option<SkinningFlag>,
    ) -> MaterialInstanceHandle {
        self.material_instances.push(NativeMaterialInstance {
            parent,
            name: name.to_string(),
            skinning,
        });
        self.material_instances.len() - 1
    }

    pub fn create_animation(&mut self, name: &str, uid: &str, duration: f32) -> AnimationHandle {
        self.animations.push(NativeAnimation {
            name: name.to_string(),
            uid: uid.to_string(),
            duration,
            translations: Vec::new(),
            rotations: Vec::new(),
            scales: Vec::new(),
            inv_pose: matrix_to_rows(&Matrix4::identity()),
        });
        self.animations.len() - 1
    }

    pub fn animation_mut(&mut self, handle: AnimationHandle) -> &mut NativeAnimation {
        &mut self.animations[handle]
    }

    /// Registers a descriptor, reusing the one already created for `path`.
    pub fn add_texture(&mut self, descriptor: TextureDescriptor) -> usize {
        if let Some(existing) = self.find_texture(&descriptor.path) {
            return existing;
        }
        self.textures.push(descriptor);
        self.textures.len() - 1
    }

    pub fn find_texture(&self, path: &std::path::Path) -> Option<usize> {
        self.textures.iter().position(|texture| texture.path == path)
    }
}

// ─── Entities ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RenderBatch {
    pub polygon_group: PolygonGroupHandle,
    pub material: MaterialInstanceHandle,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderObject {
    pub skinned: bool,
    pub batches: Vec<RenderBatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkeletonJoint {
    pub name: String,
    pub uid: String,
    pub parent_index: i32,
    pub bind_transform: [[f32; 4]; 4],
    pub bind_transform_inv: [[f32; 4]; 4],
    /// Bounds of the influenced vertices in joint space.
    pub bbox_min: [f32; 3],
    pub bbox_max: [f32; 3],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SkeletonComponent {
    pub joints: Vec<SkeletonJoint>,
    /// Bounds of the skinned vertices in the pose the scene was exported in.
    pub pose_bbox_min: [f32; 3],
    pub pose_bbox_max: [f32; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct AnimationComponent {
    pub animation: AnimationHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct LightComponent {
    pub name: String,
    pub kind: &'static str,
    pub color: [f32; 3],
    pub attenuation: [f32; 3],
    pub falloff_angle: f32,
    pub falloff_exponent: f32,
}

impl From<&LightEntity> for LightComponent {
    fn from(light: &LightEntity) -> Self {
        Self {
            name: light.name.clone(),
            kind: match light.kind {
                LightKind::Ambient => "ambient",
                LightKind::Directional => "directional",
                LightKind::Point => "point",
                LightKind::Spot => "spot",
            },
            color: light.color,
            attenuation: [
                light.constant_attenuation,
                light.linear_attenuation,
                light.quadratic_attenuation,
            ],
            falloff_angle: light.falloff_angle,
            falloff_exponent: light.falloff_exponent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraComponent {
    pub name: String,
    pub orthographic: bool,
    /// Vertical field of view in degrees, or vertical half-height for
    /// orthographic cameras.
    pub fov: f32,
    pub aspect_ratio: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl From<&CameraEntity> for CameraComponent {
    fn from(camera: &CameraEntity) -> Self {
        // Either extent may be given; the other follows from the aspect ratio.
        let vertical = |x: Option<f32>, y: Option<f32>, fallback: f32| {
            match (x, y, camera.aspect_ratio) {
                (_, Some(y), _) => y,
                (Some(x), None, Some(aspect)) if aspect > 0.0 => x / aspect,
                (Some(x), None, _) => x,
                (None, None, _) => fallback,
            }
        };
        let (orthographic, fov, aspect_ratio) = match camera.projection {
            Projection::Perspective { xfov, yfov } => {
                let aspect = match (xfov, yfov) {
                    (Some(x), Some(y)) if y > 0.0 => x / y,
                    _ => camera.aspect_ratio.unwrap_or(1.0),
                };
                (false, vertical(xfov, yfov, 45.0), aspect)
            }
            Projection::Orthographic { xmag, ymag } => {
                let aspect = match (xmag, ymag) {
                    (Some(x), Some(y)) if y > 0.0 => x / y,
                    _ => camera.aspect_ratio.unwrap_or(1.0),
                };
                (true, vertical(xmag, ymag, 1.0), aspect)
            }
        };
        Self {
            name: camera.name.clone(),
            orthographic,
            fov,
            aspect_ratio,
            znear: camera.znear,
            zfar: camera.zfar,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub name: String,
    pub local_transform: [[f32; 4]; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_object: Option<RenderObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<SkeletonComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<AnimationComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lights: Vec<LightComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cameras: Vec<CameraComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub children: Vec<EntityId>,
}

impl Entity {
    pub fn new(name: &str, local_transform: [[f32; 4]; 4]) -> Self {
        Self {
            name: name.to_string(),
            local_transform,
            render_object: None,
            skeleton: None,
            animation: None,
            lights: Vec::new(),
            cameras: Vec::new(),
            errors: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Flat entity tree plus the resources it references.
#[derive(Debug, Serialize)]
pub struct NativeScene {
    pub name: String,
    pub root: EntityId,
    pub entities: Vec<Entity>,
    pub library: NativeLibrary,
}

impl NativeScene {
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id]
    }

    pub fn find_entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_format_without_tangents_when_allocating_then_only_declared_streams_exist() {
        let mut library = NativeLibrary::default();
        let format = VertexFormat::VERTEX | VertexFormat::NORMAL | VertexFormat::TEXCOORD0;

        let handle = library.create_polygon_group(format, 3, 3);
        let group = library.polygon_group_mut(handle);
        group.set_tangent(0, &Vector3::x());
        group.set_tex_coord(0, 2, &Vector2::new(0.5, 1.0));

        assert!(group.tangents.is_empty());
        assert_eq!(group.tex_coords.len(), 1);
        assert_eq!(group.tex_coords[0][2], [0.5, 1.0]);
    }

    #[test]
    fn given_bind_shape_when_transforming_then_bbox_follows_positions() {
        let mut library = NativeLibrary::default();
        let handle =
            library.create_polygon_group(VertexFormat::VERTEX | VertexFormat::NORMAL, 2, 0);
        let group = library.polygon_group_mut(handle);
        group.set_coord(0, &Vector3::new(0.0, 0.0, 0.0));
        group.set_coord(1, &Vector3::new(1.0, 1.0, 1.0));
        group.set_normal(0, &Vector3::z());
        group.recalc_bbox();

        let moved = group.transformed(&Matrix4::new_translation(&Vector3::new(0.0, 0.0, 5.0)));

        assert_eq!(moved.bbox_min, [0.0, 0.0, 5.0]);
        assert_eq!(moved.bbox_max, [1.0, 1.0, 6.0]);
        assert_eq!(moved.normals[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn given_same_texture_path_when_adding_twice_then_descriptor_is_shared() {
        let mut library = NativeLibrary::default();
        let descriptor = crate::texture::invalid_texture_descriptor(std::path::Path::new("a.png"));

        let first = library.add_texture(descriptor.clone());
        let second = library.add_texture(descriptor);

        assert_eq!(first, second);
        assert_eq!(library.textures.len(), 1);
    }
}

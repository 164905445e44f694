use std::{collections::HashMap, path::PathBuf};

use log::{debug, warn};
use nalgebra::Matrix4;

use super::animation::{SceneAnimation, TrackRef};
use super::mesh::Mesh;
use super::skinned_mesh::SkinnedMesh;
use super::types::{ImportIssue, UNNAMED_NODE, issue_code};
use crate::collada::{
    AnimationClip, CameraEntity, ColladaDocument, DocNodeId, EntityInstance, InstanceKind,
    LightEntity, MaterialEntity, ShadingModel,
};
use crate::texture::TextureDescriptor;

pub type NodeId = usize;
pub type MeshId = usize;
pub type SkinnedMeshId = usize;
pub type MaterialId = usize;
pub type LightId = usize;
pub type CameraId = usize;

/// Material registry entry with texture references resolved to files.
#[derive(Debug, Clone)]
pub struct Material {
    pub id: String,
    pub name: String,
    pub shading: ShadingModel,
    pub diffuse_color: [f32; 4],
    pub specular_color: [f32; 4],
    pub shininess: f32,
    pub transparency: f32,
    pub diffuse_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
}

impl Material {
    pub fn from_entity(entity: &MaterialEntity, document: &ColladaDocument) -> Self {
        let texture = |image_id: &Option<String>| {
            let image_id = image_id.as_deref()?;
            match document.image(image_id) {
                Some(image) => Some(image.path.clone()),
                None => {
                    warn!("material '{}': image '{}' not found", entity.id, image_id);
                    None
                }
            }
        };
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            shading: entity.shading,
            diffuse_color: entity.diffuse_color,
            specular_color: entity.specular_color,
            shininess: entity.shininess,
            transparency: entity.transparency,
            diffuse_texture: texture(&entity.diffuse_texture),
            normal_texture: texture(&entity.normal_texture),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshRef {
    Static(MeshId),
    Skinned(SkinnedMeshId),
}

/// A mesh placed on a node, with one resolved material per polygon group.
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub mesh: MeshRef,
    /// `None` when the binding or the material could not be resolved.
    pub materials: Vec<Option<MaterialId>>,
    pub skeleton_roots: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub dae_id: Option<String>,
    pub name: String,
    /// Document node this one was built from; stand-ins have none.
    pub source: Option<DocNodeId>,
    pub is_joint: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub mesh_instances: Vec<MeshInstance>,
    pub lights: Vec<LightId>,
    pub cameras: Vec<CameraId>,
    pub local: Matrix4<f32>,
    pub world: Matrix4<f32>,
    pub animation: Option<TrackRef>,
    /// Unresolved references recorded on this node.
    pub errors: Vec<String>,
}

impl SceneNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            dae_id: None,
            name,
            source: None,
            is_joint: false,
            parent,
            children: Vec::new(),
            mesh_instances: Vec::new(),
            lights: Vec::new(),
            cameras: Vec::new(),
            local: Matrix4::identity(),
            world: Matrix4::identity(),
            animation: None,
            errors: Vec::new(),
        }
    }
}

/// Conversion context: flat registries plus the node arena.
///
/// Nodes are appended parent-first, so ascending index order is a valid
/// top-down traversal.
#[derive(Debug)]
pub struct ColladaScene {
    pub meshes: Vec<Mesh>,
    pub skinned_meshes: Vec<SkinnedMesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<TextureDescriptor>,
    pub lights: Vec<LightEntity>,
    pub cameras: Vec<CameraEntity>,
    pub animations: Vec<SceneAnimation>,
    pub nodes: Vec<SceneNode>,
    pub root: NodeId,
    /// Up-axis and unit correction carried by the root node.
    pub correction: Matrix4<f32>,
    pub issues: Vec<ImportIssue>,
    mesh_lookup: HashMap<String, MeshId>,
    skinned_lookup: HashMap<String, SkinnedMeshId>,
    material_lookup: HashMap<String, MaterialId>,
    light_lookup: HashMap<String, LightId>,
    camera_lookup: HashMap<String, CameraId>,
}

impl ColladaScene {
    pub fn new(name: &str, correction: Matrix4<f32>) -> Self {
        let mut root = SceneNode::new(name.to_string(), None);
        root.local = correction;
        root.world = correction;
        Self {
            meshes: Vec::new(),
            skinned_meshes: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            lights: Vec::new(),
            cameras: Vec::new(),
            animations: Vec::new(),
            nodes: vec![root],
            root: 0,
            correction,
            issues: Vec::new(),
            mesh_lookup: HashMap::new(),
            skinned_lookup: HashMap::new(),
            material_lookup: HashMap::new(),
            light_lookup: HashMap::new(),
            camera_lookup: HashMap::new(),
        }
    }

    // ─── Registries ───────────────────────────────────────────────────────────

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = self.meshes.len();
        self.mesh_lookup.insert(mesh.geometry_id.clone(), id);
        self.meshes.push(mesh);
        id
    }

    pub fn add_skinned_mesh(&mut self, skinned: SkinnedMesh) -> SkinnedMeshId {
        let id = self.skinned_meshes.len();
        self.skinned_lookup.insert(skinned.controller_id.clone(), id);
        self.skinned_meshes.push(skinned);
        id
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = self.materials.len();
        self.material_lookup.insert(material.id.clone(), id);
        self.materials.push(material);
        id
    }

    pub fn add_light(&mut self, light: LightEntity) -> LightId {
        let id = self.lights.len();
        self.light_lookup.insert(light.id.clone(), id);
        self.lights.push(light);
        id
    }

    pub fn add_camera(&mut self, camera: CameraEntity) -> CameraId {
        let id = self.cameras.len();
        self.camera_lookup.insert(camera.id.clone(), id);
        self.cameras.push(camera);
        id
    }

    pub fn mesh_of(&self, mesh: MeshRef) -> &Mesh {
        match mesh {
            MeshRef::Static(id) => &self.meshes[id],
            MeshRef::Skinned(id) => &self.skinned_meshes[id].mesh,
        }
    }

    pub fn find_node(&self, dae_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.dae_id.as_deref() == Some(dae_id))
    }

    // ─── Scene export ─────────────────────────────────────────────────────────

    /// Builds the node tree below the root from the document's visual scene.
    ///
    /// With `resolve_instances == false` only hierarchy and transforms are
    /// built (animation extraction needs nothing else).
    pub fn export_scene(&mut self, document: &ColladaDocument, resolve_instances: bool) {
        let mut prototypes = Vec::new();
        for &source in &document.scene_roots {
            let root = self.root;
            self.export_node(document, source, root, resolve_instances, &mut prototypes);
        }
        debug!("scene graph: {} nodes", self.nodes.len());
    }

    fn export_node(
        &mut self,
        document: &ColladaDocument,
        source: DocNodeId,
        parent: NodeId,
        resolve_instances: bool,
        prototypes: &mut Vec<String>,
    ) -> NodeId {
        let doc_node = document.node(source);
        let name = if doc_node.name.is_empty() {
            self.issues.push(ImportIssue::error(
                issue_code::UNNAMED_NODE,
                format!("unnamed node found as a child of '{}'", self.nodes[parent].name),
            ));
            UNNAMED_NODE.to_string()
        } else {
            doc_node.name.clone()
        };

        let id = self.nodes.len();
        let mut node = SceneNode::new(name, Some(parent));
        node.dae_id = doc_node.id.clone();
        node.source = Some(source);
        node.is_joint = doc_node.is_joint;
        node.local = document.evaluate_transform(source, 0.0, None);
        self.nodes.push(node);
        self.nodes[parent].children.push(id);

        if resolve_instances {
            for instance in &doc_node.instances {
                self.attach_instance(id, instance);
            }
        }

        for &child in &doc_node.children {
            self.export_node(document, child, id, resolve_instances, prototypes);
        }

        for url in &doc_node.node_instances {
            let prototype = document.find_node_by_id(url);
            match prototype {
                Some(prototype) if !prototypes.contains(url) => {
                    prototypes.push(url.clone());
                    self.export_node(document, prototype, id, resolve_instances, prototypes);
                    prototypes.pop();
                }
                _ => {
                    let message = match prototype {
                        Some(_) => format!("node prototype '{}' instantiates itself", url),
                        None => format!("node prototype '{}' not found", url),
                    };
                    warn!("{}", message);
                    self.issues
                        .push(ImportIssue::error(issue_code::NODE_NOT_FOUND, message.clone()));
                    let stand_in_id = self.nodes.len();
                    let mut stand_in = SceneNode::new(url.clone(), Some(id));
                    stand_in.errors.push(message);
                    self.nodes.push(stand_in);
                    self.nodes[id].children.push(stand_in_id);
                }
            }
        }

        id
    }

    fn attach_instance(&mut self, node: NodeId, instance: &EntityInstance) {
        let url = instance.url.as_str();
        let resolved = match instance.kind {
            InstanceKind::Geometry => self.mesh_lookup.get(url).copied().map(|mesh| {
                let mesh_instance = self.mesh_instance(node, MeshRef::Static(mesh), instance);
                self.nodes[node].mesh_instances.push(mesh_instance);
            }),
            InstanceKind::Controller => self.skinned_lookup.get(url).copied().map(|skinned| {
                let mesh_instance = self.mesh_instance(node, MeshRef::Skinned(skinned), instance);
                self.nodes[node].mesh_instances.push(mesh_instance);
            }),
            InstanceKind::Light => self
                .light_lookup
                .get(url)
                .copied()
                .map(|light| self.nodes[node].lights.push(light)),
            InstanceKind::Camera => self
                .camera_lookup
                .get(url)
                .copied()
                .map(|camera| self.nodes[node].cameras.push(camera)),
        };

        if resolved.is_some() {
            debug!("node '{}': instance '{}'", self.nodes[node].name, url);
            return;
        }
        let code = match instance.kind {
            InstanceKind::Geometry => issue_code::GEOMETRY_NOT_FOUND,
            InstanceKind::Controller => issue_code::CONTROLLER_NOT_FOUND,
            InstanceKind::Light => issue_code::LIGHT_NOT_FOUND,
            InstanceKind::Camera => issue_code::CAMERA_NOT_FOUND,
        };
        self.record_error(node, code, format!("instance '{}' could not be resolved", url));
    }

    fn mesh_instance(
        &mut self,
        node: NodeId,
        mesh: MeshRef,
        instance: &EntityInstance,
    ) -> MeshInstance {
        let semantics = self
            .mesh_of(mesh)
            .polygon_groups
            .iter()
            .map(|group| group.material_semantic.clone())
            .collect::<Vec<_>>();

        let mut materials = Vec::with_capacity(semantics.len());
        for semantic in semantics {
            let material = match instance.material_for(&semantic) {
                None => {
                    self.record_error(
                        node,
                        issue_code::MATERIAL_BINDING_MISSING,
                        format!("no material bound to symbol '{}'", semantic),
                    );
                    None
                }
                Some(target) => {
                    let found = self.material_lookup.get(target).copied();
                    if found.is_none() {
                        self.record_error(
                            node,
                            issue_code::MATERIAL_NOT_FOUND,
                            format!("material '{}' not found", target),
                        );
                    }
                    found
                }
            };
            materials.push(material);
        }

        MeshInstance {
            mesh,
            materials,
            skeleton_roots: instance.skeletons.clone(),
        }
    }

    fn record_error(&mut self, node: NodeId, code: &str, message: String) {
        let message = format!("node '{}': {}", self.nodes[node].name, message);
        warn!("{}", message);
        self.nodes[node].errors.push(message.clone());
        self.issues.push(ImportIssue::error(code, message));
    }

    // ─── Transforms ───────────────────────────────────────────────────────────

    /// Re-evaluates local transforms at `time` and recomposes world transforms.
    /// `clip == None` gives the rest pose.
    pub fn update_transforms(
        &mut self,
        document: &ColladaDocument,
        time: f32,
        clip: Option<&AnimationClip>,
    ) {
        for index in 0..self.nodes.len() {
            let local = match self.nodes[index].source {
                Some(source) => document.evaluate_transform(source, time, clip),
                None if index == self.root => self.correction,
                None => Matrix4::identity(),
            };
            let world = match self.nodes[index].parent {
                Some(parent) => self.nodes[parent].world * local,
                None => local,
            };
            let node = &mut self.nodes[index];
            node.local = local;
            node.world = world;
        }
    }

    /// Product of local transforms from `node` up to, not including, `ancestor`.
    pub fn accumulate_transform_up_to(&self, node: NodeId, ancestor: NodeId) -> Matrix4<f32> {
        let mut total = Matrix4::identity();
        let mut current = Some(node);
        while let Some(index) = current {
            if index == ancestor {
                break;
            }
            total = self.nodes[index].local * total;
            current = self.nodes[index].parent;
        }
        total
    }

    /// Evaluates every skinned mesh against the current joint transforms.
    pub fn update_skinned_meshes(&mut self) {
        let nodes = &self.nodes;
        for skinned in &mut self.skinned_meshes {
            skinned.update_skinned_mesh(nodes);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use nalgebra::Vector3;

    use super::*;

    const SCENE: &str = r##"<COLLADA version="1.4.1">
  <library_materials><material id="red"/></library_materials>
  <library_nodes>
    <node id="lamp-proto" name="LampProto"><translate>0 0 2</translate></node>
  </library_nodes>
  <library_visual_scenes>
    <visual_scene id="scene">
      <node id="base" name="Base">
        <translate>1 0 0</translate>
        <node id="arm" name="Arm">
          <translate>0 1 0</translate>
          <instance_node url="#lamp-proto"/>
          <instance_node url="#missing-proto"/>
        </node>
        <node id="nameless"/>
      </node>
    </visual_scene>
  </library_visual_scenes>
</COLLADA>"##;

    fn exported() -> (ColladaDocument, ColladaScene) {
        let document = ColladaDocument::parse_str(SCENE, Path::new("scene.dae")).expect("parse");
        let mut scene = ColladaScene::new("scene", Matrix4::identity());
        scene.export_scene(&document, true);
        scene.update_transforms(&document, 0.0, None);
        (document, scene)
    }

    #[test]
    fn given_nested_nodes_when_updating_transforms_then_world_composes_parents() {
        let (_, scene) = exported();
        let lamp = scene
            .nodes
            .iter()
            .position(|node| node.name == "LampProto")
            .expect("prototype instantiated");

        let origin = scene.nodes[lamp].world.transform_point(&nalgebra::Point3::origin());
        assert!((origin.coords - Vector3::new(1.0, 1.0, 2.0)).norm() < 1e-6);
        assert!(scene.nodes.iter().enumerate().all(|(i, node)| node.parent.is_none_or(|p| p < i)));
    }

    #[test]
    fn given_missing_prototype_when_exporting_then_stand_in_node_carries_error() {
        let (_, scene) = exported();
        let stand_in = scene
            .nodes
            .iter()
            .find(|node| node.name == "missing-proto")
            .expect("stand-in kept");

        assert!(stand_in.source.is_none());
        assert_eq!(stand_in.errors.len(), 1);
        assert!(scene.issues.iter().any(|issue| issue.code == issue_code::NODE_NOT_FOUND));
    }

    #[test]
    fn given_node_without_name_or_id_when_exporting_then_unnamed_is_used() {
        let xml = SCENE.replace(r#"<node id="nameless"/>"#, "<node/>");
        let document = ColladaDocument::parse_str(&xml, Path::new("scene.dae")).expect("parse");
        let mut scene = ColladaScene::new("scene", Matrix4::identity());

        scene.export_scene(&document, true);

        assert!(scene.nodes.iter().any(|node| node.name == UNNAMED_NODE));
        assert!(scene.issues.iter().any(|issue| issue.code == issue_code::UNNAMED_NODE));
    }

    #[test]
    fn given_chain_when_accumulating_up_to_root_then_root_local_is_excluded() {
        let document = ColladaDocument::parse_str(SCENE, Path::new("scene.dae")).expect("parse");
        let correction = Matrix4::new_scaling(2.0);
        let mut scene = ColladaScene::new("scene", correction);
        scene.export_scene(&document, true);
        scene.update_transforms(&document, 0.0, None);
        let arm = scene.find_node("arm").expect("arm");

        let total = scene.accumulate_transform_up_to(arm, scene.root);

        assert!((total[(0, 3)] - 1.0).abs() < 1e-6);
        assert!((total[(1, 3)] - 1.0).abs() < 1e-6);
        assert!((scene.nodes[arm].world[(0, 3)] - 2.0).abs() < 1e-6);
    }
}

//! Collada (DAE) document reader.
//!
//! Parses the XML document into typed entity libraries and a node arena. Nodes
//! keep their transform stacks with animation curves bound per component, so
//! callers can evaluate any node at any time.

mod animation;
mod geometry;
mod library;
mod scene;
mod xml;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use nalgebra::{Matrix4, Vector3};
use xmltree::Element;

pub use animation::{
    AnimationChannel, AnimationClip, AnimationCurve, CurveId, CurveKey, Interpolation,
    KEY_TIME_EPSILON,
};
pub use geometry::{DataStream, Geometry, PolygonSource, PrimitiveKind, Semantic, SourceInput};
pub use library::{
    CameraEntity, Controller, ControllerJoint, ImageEntity, LightEntity, LightKind,
    MaterialEntity, Projection, ShadingModel,
};
pub use scene::{
    DocNode, DocNodeId, EntityInstance, InstanceKind, MaterialBinding, Transform, TransformKind,
};

use crate::error::ColladaError;
use xml::{attr, child, children, text, url_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUpAxis {
    X,
    Y,
    Z,
}

impl SourceUpAxis {
    pub fn vector(self) -> Vector3<f32> {
        match self {
            SourceUpAxis::X => Vector3::x(),
            SourceUpAxis::Y => Vector3::y(),
            SourceUpAxis::Z => Vector3::z(),
        }
    }
}

/// `<asset>` conventions of the document.
#[derive(Debug, Clone, Copy)]
pub struct Asset {
    pub up_axis: SourceUpAxis,
    /// Meters per document unit.
    pub unit_meter: f32,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            up_axis: SourceUpAxis::Y,
            unit_meter: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct ColladaDocument {
    pub path: PathBuf,
    pub asset: Asset,
    pub geometries: Vec<Geometry>,
    pub images: Vec<ImageEntity>,
    pub materials: Vec<MaterialEntity>,
    pub lights: Vec<LightEntity>,
    pub cameras: Vec<CameraEntity>,
    pub controllers: Vec<Controller>,
    pub curves: Vec<AnimationCurve>,
    pub clips: Vec<AnimationClip>,
    pub nodes: Vec<DocNode>,
    /// Top-level nodes of the instanced visual scene.
    pub scene_roots: Vec<DocNodeId>,
    /// Top-level nodes of `<library_nodes>`.
    pub library_roots: Vec<DocNodeId>,
}

impl ColladaDocument {
    /// Read and parse a document from disk.
    pub fn open(path: &Path) -> Result<Self, ColladaError> {
        let content = fs::read(path).map_err(|source| ColladaError::DocumentOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_bytes(&content, path)
    }

    /// Parse document text. `path` locates relative image references and names
    /// the default animation.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self, ColladaError> {
        Self::parse_bytes(content.as_bytes(), path)
    }

    fn parse_bytes(content: &[u8], path: &Path) -> Result<Self, ColladaError> {
        let root = Element::parse(content)
            .map_err(|err| ColladaError::DocumentParse(err.to_string()))?;
        if root.name != "COLLADA" {
            return Err(ColladaError::DocumentParse(format!(
                "root element is <{}>, expected <COLLADA>",
                root.name
            )));
        }
        let document_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let asset = child(&root, "asset").map(parse_asset).unwrap_or_default();

        let mut geometries = Vec::new();
        for library in children(&root, "library_geometries") {
            for element in children(library, "geometry") {
                if let Some(geometry) = geometry::parse_geometry(element)? {
                    geometries.push(geometry);
                }
            }
        }

        let images = children(&root, "library_images")
            .flat_map(|library| children(library, "image"))
            .filter_map(|element| library::parse_image(element, document_dir))
            .collect::<Vec<_>>();

        let effects = children(&root, "library_effects")
            .flat_map(|library| children(library, "effect"))
            .filter_map(library::parse_effect)
            .collect::<HashMap<_, _>>();
        let materials = children(&root, "library_materials")
            .flat_map(|library| children(library, "material"))
            .filter_map(|element| library::parse_material(element, &effects))
            .collect::<Vec<_>>();

        let lights = children(&root, "library_lights")
            .flat_map(|library| children(library, "light"))
            .filter_map(library::parse_light)
            .collect::<Vec<_>>();
        let cameras = children(&root, "library_cameras")
            .flat_map(|library| children(library, "camera"))
            .filter_map(library::parse_camera)
            .collect::<Vec<_>>();

        let mut controllers = Vec::new();
        for library in children(&root, "library_controllers") {
            for element in children(library, "controller") {
                if let Some(controller) = library::parse_controller(element)? {
                    controllers.push(controller);
                }
            }
        }

        let mut nodes = Vec::new();
        let mut library_roots = Vec::new();
        for library in children(&root, "library_nodes") {
            for element in children(library, "node") {
                library_roots.push(scene::parse_node(element, None, &mut nodes)?);
            }
        }

        let visual_scene = find_visual_scene(&root).ok_or(ColladaError::MissingRootNode)?;
        let mut scene_roots = Vec::new();
        for element in children(visual_scene, "node") {
            scene_roots.push(scene::parse_node(element, None, &mut nodes)?);
        }

        let mut animations = animation::AnimationLibrary::default();
        for library in children(&root, "library_animations") {
            for element in children(library, "animation") {
                animations.parse_animation(element)?;
            }
        }

        let mut document = Self {
            path: path.to_path_buf(),
            asset,
            geometries,
            images,
            materials,
            lights,
            cameras,
            controllers,
            curves: animations.curves,
            clips: Vec::new(),
            nodes,
            scene_roots,
            library_roots,
        };
        document.bind_channels(&animations.channels);
        document.clips =
            animation::library_clips(child(&root, "library_animation_clips"), &animations.owners);
        if document.clips.is_empty() && !document.curves.is_empty() {
            document.clips.push(document.default_clip());
        }

        info!(
            "parsed {}: {} geometries, {} materials, {} controllers, {} nodes, {} curves, {} clips",
            path.display(),
            document.geometries.len(),
            document.materials.len(),
            document.controllers.len(),
            document.nodes.len(),
            document.curves.len(),
            document.clips.len()
        );
        Ok(document)
    }

    fn bind_channels(&mut self, channels: &[AnimationChannel]) {
        for channel in channels {
            let transform = self
                .nodes
                .iter_mut()
                .filter(|node| node.id.as_deref() == Some(channel.node_id.as_str()))
                .flat_map(|node| node.transforms.iter_mut())
                .find(|transform| transform.sid.as_deref() == Some(channel.sid.as_str()));
            match transform {
                Some(transform) => transform.curves.push((channel.suffix.clone(), channel.curve)),
                None => warn!(
                    "animation target {}/{} not found",
                    channel.node_id, channel.sid
                ),
            }
        }
        debug!("bound {} animation channels", channels.len());
    }

    /// One clip spanning every curve, named after the document file stem.
    fn default_clip(&self) -> AnimationClip {
        let name = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "animation".to_string());
        AnimationClip {
            id: name.clone(),
            name,
            start: 0.0,
            end: None,
            curves: (0..self.curves.len()).collect(),
        }
    }

    pub fn node(&self, id: DocNodeId) -> &DocNode {
        &self.nodes[id]
    }

    /// Scene nodes take precedence over `<library_nodes>` prototypes.
    pub fn find_node_by_id(&self, id: &str) -> Option<DocNodeId> {
        let matches = |index: &DocNodeId| self.nodes[*index].id.as_deref() == Some(id);
        let mut scene = Vec::new();
        let mut stack = self.scene_roots.clone();
        while let Some(index) = stack.pop() {
            scene.push(index);
            stack.extend(self.nodes[index].children.iter().copied());
        }
        scene
            .into_iter()
            .find(|index| matches(index))
            .or_else(|| (0..self.nodes.len()).find(|index| matches(index)))
    }

    pub fn geometry(&self, id: &str) -> Option<&Geometry> {
        self.geometries.iter().find(|geometry| geometry.id == id)
    }

    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.controllers.iter().find(|controller| controller.id == id)
    }

    pub fn image(&self, id: &str) -> Option<&ImageEntity> {
        self.images.iter().find(|image| image.id == id)
    }

    /// Local transform of `node` at `time`: the stack composed in document order.
    pub fn evaluate_transform(
        &self,
        node: DocNodeId,
        time: f32,
        clip: Option<&AnimationClip>,
    ) -> Matrix4<f32> {
        self.nodes[node]
            .transforms
            .iter()
            .fold(Matrix4::identity(), |acc, transform| {
                acc * transform.evaluate(time, &self.curves, clip)
            })
    }

    pub fn is_animated(&self, node: DocNodeId, clip: &AnimationClip) -> bool {
        self.nodes[node]
            .transforms
            .iter()
            .any(|transform| transform.is_animated(clip))
    }
}

fn parse_asset(element: &Element) -> Asset {
    let mut asset = Asset::default();
    if let Some(up_axis) = child(element, "up_axis") {
        asset.up_axis = match text(up_axis).as_str() {
            "X_UP" => SourceUpAxis::X,
            "Z_UP" => SourceUpAxis::Z,
            _ => SourceUpAxis::Y,
        };
    }
    if let Some(meter) = child(element, "unit")
        .and_then(|unit| attr(unit, "meter"))
        .and_then(|meter| meter.parse::<f32>().ok())
        .filter(|meter| *meter > 0.0)
    {
        asset.unit_meter = meter;
    }
    asset
}

fn find_visual_scene(root: &Element) -> Option<&Element> {
    let scenes = || {
        children(root, "library_visual_scenes")
            .flat_map(|library| children(library, "visual_scene"))
    };
    let instanced = child(root, "scene")
        .and_then(|scene| child(scene, "instance_visual_scene"))
        .and_then(|instance| attr(instance, "url"))
        .map(url_id);
    match instanced {
        Some(url) => scenes()
            .find(|scene| attr(scene, "id") == Some(url))
            .or_else(|| scenes().next()),
        None => scenes().next(),
    }
}

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::warn;
use nalgebra::Matrix4;
use xmltree::Element;

use super::geometry::{parse_source, source_names};
use super::xml::{
    attr, child, child_elements, children, descendant, parse_fixed, parse_float, parse_floats,
    parse_ints, text, url_id,
};
use crate::error::ColladaError;

// ─── Images ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImageEntity {
    pub id: String,
    pub name: String,
    /// Absolute or document-relative path resolved against the document directory.
    pub path: PathBuf,
}

pub(super) fn parse_image(element: &Element, document_dir: &Path) -> Option<ImageEntity> {
    let id = attr(element, "id").unwrap_or_default().to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let init_from = descendant(element, "init_from")?;
    let reference = descendant(init_from, "ref")
        .map(text)
        .unwrap_or_else(|| text(init_from));
    if reference.is_empty() {
        warn!("image '{}' has an empty init_from", id);
        return None;
    }

    Some(ImageEntity {
        id,
        name,
        path: resolve_image_uri(&reference, document_dir),
    })
}

fn resolve_image_uri(uri: &str, document_dir: &Path) -> PathBuf {
    let trimmed = uri
        .strip_prefix("file:///")
        .map(|rest| {
            // `file:///C:/...` keeps the drive, `file:///usr/...` keeps the root.
            if rest.chars().nth(1) == Some(':') {
                rest.to_string()
            } else {
                format!("/{rest}")
            }
        })
        .or_else(|| uri.strip_prefix("file://").map(str::to_string))
        .unwrap_or_else(|| uri.to_string());
    let decoded = trimmed.replace("%20", " ").replace('\\', "/");

    let path = PathBuf::from(decoded);
    if path.is_absolute() {
        path
    } else {
        document_dir.join(path)
    }
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadingModel {
    Constant,
    Lambert,
    #[default]
    Phong,
    Blinn,
}

/// Material with its effect already resolved.
#[derive(Debug, Clone, Default)]
pub struct MaterialEntity {
    pub id: String,
    pub name: String,
    pub shading: ShadingModel,
    pub diffuse_color: [f32; 4],
    pub diffuse_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub specular_color: [f32; 4],
    pub shininess: f32,
    pub transparency: f32,
}

/// Effect parameters keyed by effect id.
pub(super) type EffectTable = HashMap<String, MaterialEntity>;

pub(super) fn parse_effect(element: &Element) -> Option<(String, MaterialEntity)> {
    let id = attr(element, "id")?.to_string();
    let Some(profile) = child(element, "profile_COMMON") else {
        warn!("effect '{}' has no profile_COMMON, using defaults", id);
        return Some((id, default_material()));
    };

    let mut samplers = HashMap::<String, String>::new();
    let mut surfaces = HashMap::<String, String>::new();
    for newparam in children(profile, "newparam") {
        let sid = attr(newparam, "sid").unwrap_or_default().to_string();
        if let Some(surface) = child(newparam, "surface")
            && let Some(init_from) = child(surface, "init_from")
        {
            surfaces.insert(sid.clone(), text(init_from));
        }
        if let Some(sampler) = child(newparam, "sampler2D")
            && let Some(source) = child(sampler, "source")
        {
            samplers.insert(sid, text(source));
        } else if let Some(sampler) = child(newparam, "sampler2D")
            && let Some(instance_image) = child(sampler, "instance_image")
        {
            let url = url_id(attr(instance_image, "url").unwrap_or_default());
            samplers.insert(sid, format!("#{}", url));
        }
    }

    let resolve_texture = |texture: &Element| -> Option<String> {
        let reference = attr(texture, "texture")?;
        if let Some(source) = samplers.get(reference) {
            if let Some(direct) = source.strip_prefix('#') {
                return Some(direct.to_string());
            }
            return Some(surfaces.get(source).cloned().unwrap_or_else(|| source.clone()));
        }
        Some(reference.to_string())
    };

    let mut material = default_material();
    let Some(technique) = child(profile, "technique") else {
        return Some((id, material));
    };
    let Some((shading, model)) = child_elements(technique).find_map(|element| {
        let shading = match element.name.as_str() {
            "constant" => ShadingModel::Constant,
            "lambert" => ShadingModel::Lambert,
            "phong" => ShadingModel::Phong,
            "blinn" => ShadingModel::Blinn,
            _ => return None,
        };
        Some((shading, element))
    }) else {
        return Some((id, material));
    };
    material.shading = shading;

    if let Some(diffuse) = child(model, "diffuse") {
        if let Some(color) = child(diffuse, "color") {
            material.diffuse_color = parse_fixed::<4>(color).unwrap_or(material.diffuse_color);
        }
        if let Some(texture) = child(diffuse, "texture") {
            material.diffuse_texture = resolve_texture(texture);
        }
    }
    if let Some(specular) = child(model, "specular")
        && let Some(color) = child(specular, "color")
    {
        material.specular_color = parse_fixed::<4>(color).unwrap_or(material.specular_color);
    }
    if let Some(shininess) = child(model, "shininess").and_then(|s| child(s, "float")) {
        material.shininess = parse_float(shininess).unwrap_or(material.shininess);
    }
    if let Some(transparency) = child(model, "transparency").and_then(|t| child(t, "float")) {
        material.transparency = parse_float(transparency).unwrap_or(material.transparency);
    }
    // Bump maps live in vendor `extra` techniques.
    if let Some(bump) = descendant(element, "bump")
        && let Some(texture) = child(bump, "texture")
    {
        material.normal_texture = resolve_texture(texture);
    }

    Some((id, material))
}

fn default_material() -> MaterialEntity {
    MaterialEntity {
        diffuse_color: [0.8, 0.8, 0.8, 1.0],
        specular_color: [0.0, 0.0, 0.0, 1.0],
        transparency: 1.0,
        ..MaterialEntity::default()
    }
}

pub(super) fn parse_material(element: &Element, effects: &EffectTable) -> Option<MaterialEntity> {
    let id = attr(element, "id")?.to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let effect_url = child(element, "instance_effect")
        .and_then(|instance| attr(instance, "url"))
        .map(url_id)
        .unwrap_or_default();

    let mut material = match effects.get(effect_url) {
        Some(effect) => effect.clone(),
        None => {
            warn!("material '{}': effect '{}' not found", id, effect_url);
            default_material()
        }
    };
    material.id = id;
    material.name = name;
    Some(material)
}

// ─── Lights and cameras ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone)]
pub struct LightEntity {
    pub id: String,
    pub name: String,
    pub kind: LightKind,
    pub color: [f32; 3],
    pub constant_attenuation: f32,
    pub linear_attenuation: f32,
    pub quadratic_attenuation: f32,
    pub falloff_angle: f32,
    pub falloff_exponent: f32,
}

pub(super) fn parse_light(element: &Element) -> Option<LightEntity> {
    let id = attr(element, "id")?.to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let technique = child(element, "technique_common")?;
    let (kind, body) = child_elements(technique).find_map(|body| {
        let kind = match body.name.as_str() {
            "ambient" => LightKind::Ambient,
            "directional" => LightKind::Directional,
            "point" => LightKind::Point,
            "spot" => LightKind::Spot,
            _ => return None,
        };
        Some((kind, body))
    })?;

    let float_of = |name: &str, default: f32| {
        child(body, name).and_then(parse_float).unwrap_or(default)
    };

    Some(LightEntity {
        id,
        name,
        kind,
        color: child(body, "color")
            .and_then(|color| parse_fixed::<3>(color).ok())
            .unwrap_or([1.0, 1.0, 1.0]),
        constant_attenuation: float_of("constant_attenuation", 1.0),
        linear_attenuation: float_of("linear_attenuation", 0.0),
        quadratic_attenuation: float_of("quadratic_attenuation", 0.0),
        falloff_angle: float_of("falloff_angle", 180.0),
        falloff_exponent: float_of("falloff_exponent", 0.0),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { xfov: Option<f32>, yfov: Option<f32> },
    Orthographic { xmag: Option<f32>, ymag: Option<f32> },
}

#[derive(Debug, Clone)]
pub struct CameraEntity {
    pub id: String,
    pub name: String,
    pub projection: Projection,
    pub aspect_ratio: Option<f32>,
    pub znear: f32,
    pub zfar: f32,
}

pub(super) fn parse_camera(element: &Element) -> Option<CameraEntity> {
    let id = attr(element, "id")?.to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let technique = descendant(element, "technique_common")?;
    let optics = child_elements(technique).next()?;
    let value = |name: &str| child(optics, name).and_then(parse_float);

    let projection = match optics.name.as_str() {
        "perspective" => Projection::Perspective {
            xfov: value("xfov"),
            yfov: value("yfov"),
        },
        "orthographic" => Projection::Orthographic {
            xmag: value("xmag"),
            ymag: value("ymag"),
        },
        other => {
            warn!("camera '{}': unknown optics '{}'", id, other);
            return None;
        }
    };

    Some(CameraEntity {
        id,
        name,
        projection,
        aspect_ratio: value("aspect_ratio"),
        znear: value("znear").unwrap_or(0.1),
        zfar: value("zfar").unwrap_or(1000.0),
    })
}

// ─── Controllers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerJoint {
    pub name: String,
    pub inverse_bind: Matrix4<f32>,
}

/// Skin controller: joints, bind-shape and per-vertex influences indexed by
/// the position index of the skinned geometry.
#[derive(Debug, Clone)]
pub struct Controller {
    pub id: String,
    pub name: String,
    pub skin_source: String,
    pub bind_shape_matrix: Matrix4<f32>,
    pub joints: Vec<ControllerJoint>,
    /// Joint names are node ids rather than sids.
    pub joints_are_idrefs: bool,
    pub influences: Vec<Vec<(usize, f32)>>,
}

/// Row-major 16 floats to a matrix.
pub(crate) fn matrix_from_row_major(values: &[f32]) -> Matrix4<f32> {
    let mut matrix = Matrix4::identity();
    for (i, value) in values.iter().take(16).enumerate() {
        matrix[(i / 4, i % 4)] = *value;
    }
    matrix
}

pub(super) fn parse_controller(element: &Element) -> Result<Option<Controller>, ColladaError> {
    let id = attr(element, "id").unwrap_or_default().to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let Some(skin) = child(element, "skin") else {
        warn!("controller '{}' is not a skin (morph targets are not supported)", id);
        return Ok(None);
    };
    let skin_source = url_id(attr(skin, "source").unwrap_or_default()).to_string();

    let bind_shape_matrix = match child(skin, "bind_shape_matrix") {
        Some(matrix) => matrix_from_row_major(&parse_floats(matrix)?),
        None => Matrix4::identity(),
    };

    let mut name_sources = HashMap::<String, (Vec<String>, bool)>::new();
    let mut float_sources = HashMap::new();
    for source in children(skin, "source") {
        let source_id = attr(source, "id").unwrap_or_default().to_string();
        if let Some(names) = source_names(source) {
            let idrefs = child(source, "IDREF_array").is_some();
            name_sources.insert(source_id, (names, idrefs));
        } else if let Some(stream) = parse_source(source)? {
            float_sources.insert(source_id, stream);
        }
    }

    let joints_element = child(skin, "joints");
    let joint_input = |semantic: &str| {
        joints_element.and_then(|joints| {
            children(joints, "input")
                .find(|input| attr(input, "semantic") == Some(semantic))
                .and_then(|input| attr(input, "source"))
                .map(|source| url_id(source).to_string())
        })
    };

    let (joint_names, joints_are_idrefs) = joint_input("JOINT")
        .and_then(|source| name_sources.get(&source).cloned())
        .unwrap_or_default();
    let inverse_binds =
        joint_input("INV_BIND_MATRIX").and_then(|source| float_sources.get(&source));

    let joints = joint_names
        .iter()
        .enumerate()
        .map(|(i, joint_name)| ControllerJoint {
            name: joint_name.clone(),
            inverse_bind: inverse_binds
                .and_then(|stream| stream.values.get(i * 16..i * 16 + 16))
                .map(matrix_from_row_major)
                .unwrap_or_else(Matrix4::identity),
        })
        .collect::<Vec<_>>();

    let mut influences = Vec::new();
    if let Some(vertex_weights) = child(skin, "vertex_weights") {
        let mut joint_offset = 0usize;
        let mut weight_offset = 1usize;
        let mut weight_values: &[f32] = &[];
        let mut stride = 1usize;
        for input in children(vertex_weights, "input") {
            let offset = attr(input, "offset")
                .and_then(|offset| offset.parse::<usize>().ok())
                .unwrap_or(0);
            let Some(span) = offset.checked_add(1) else {
                return Err(ColladaError::DocumentParse(format!(
                    "controller '{}': vertex weight offset {} is out of range",
                    id, offset
                )));
            };
            stride = stride.max(span);
            match attr(input, "semantic") {
                Some("JOINT") => joint_offset = offset,
                Some("WEIGHT") => {
                    weight_offset = offset;
                    let source = url_id(attr(input, "source").unwrap_or_default());
                    if let Some(stream) = float_sources.get(source) {
                        weight_values = &stream.values;
                    }
                }
                _ => {}
            }
        }

        let counts = match child(vertex_weights, "vcount") {
            Some(vcount) => parse_ints(vcount)?,
            None => Vec::new(),
        };
        let v = match child(vertex_weights, "v") {
            Some(v) => parse_ints(v)?,
            None => Vec::new(),
        };

        // <vcount> is checked against <v> before anything is sized from it.
        let declared = counts.iter().try_fold(0usize, |total, &count| {
            usize::try_from(count.max(0))
                .ok()
                .and_then(|count| count.checked_mul(stride))
                .and_then(|entries| total.checked_add(entries))
        });
        if declared.is_none_or(|entries| entries > v.len()) {
            return Err(ColladaError::DocumentParse(format!(
                "controller '{}': <v> is shorter than <vcount> declares",
                id
            )));
        }

        let mut cursor = 0usize;
        for count in counts {
            let mut vertex = Vec::new();
            for _ in 0..count.max(0) {
                let (Some(&joint), Some(&weight_index)) =
                    (v.get(cursor + joint_offset), v.get(cursor + weight_offset))
                else {
                    return Err(ColladaError::DocumentParse(format!(
                        "controller '{}': <v> is shorter than <vcount> declares",
                        id
                    )));
                };
                cursor += stride;
                // -1 binds to the bind shape itself.
                if joint < 0 {
                    continue;
                }
                let weight = usize::try_from(weight_index)
                    .ok()
                    .and_then(|index| weight_values.get(index))
                    .copied()
                    .unwrap_or(0.0);
                vertex.push((joint as usize, weight));
            }
            influences.push(vertex);
        }
    }

    Ok(Some(Controller {
        id,
        name,
        skin_source,
        bind_shape_matrix,
        joints,
        joints_are_idrefs,
        influences,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_skin_with_bind_shape_influence_when_parsing_then_minus_one_joint_is_skipped() {
        let xml = r##"
          <controller id="skin0">
            <skin source="#mesh0">
              <bind_shape_matrix>1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1</bind_shape_matrix>
              <source id="joints"><Name_array count="2">root tip</Name_array></source>
              <source id="binds"><float_array count="32">
                1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
                1 0 0 0 0 1 0 -1 0 0 1 0 0 0 0 1</float_array>
                <technique_common><accessor stride="16"/></technique_common></source>
              <source id="weights"><float_array count="3">1 0.25 0.75</float_array></source>
              <joints>
                <input semantic="JOINT" source="#joints"/>
                <input semantic="INV_BIND_MATRIX" source="#binds"/>
              </joints>
              <vertex_weights count="2">
                <input semantic="JOINT" source="#joints" offset="0"/>
                <input semantic="WEIGHT" source="#weights" offset="1"/>
                <vcount>1 3</vcount>
                <v>0 0 -1 0 0 1 1 2</v>
              </vertex_weights>
            </skin>
          </controller>"##;
        let element = Element::parse(xml.as_bytes()).expect("xml");

        let controller = parse_controller(&element).expect("parse").expect("skin");

        assert_eq!(controller.skin_source, "mesh0");
        assert_eq!(controller.joints.len(), 2);
        assert!((controller.joints[1].inverse_bind[(1, 3)] + 1.0).abs() < 1e-6);
        assert_eq!(controller.influences.len(), 2);
        assert_eq!(controller.influences[1], vec![(0, 0.25), (1, 0.75)]);
    }

    #[test]
    fn given_oversized_vcount_when_parsing_controller_then_document_parse_error() {
        let xml = r##"
          <controller id="skin0">
            <skin source="#mesh0">
              <source id="joints"><Name_array count="1">root</Name_array></source>
              <source id="weights"><float_array count="1">1</float_array></source>
              <joints><input semantic="JOINT" source="#joints"/></joints>
              <vertex_weights count="1">
                <input semantic="JOINT" source="#joints" offset="0"/>
                <input semantic="WEIGHT" source="#weights" offset="1"/>
                <vcount>4000000000000000000</vcount>
                <v>0 0</v>
              </vertex_weights>
            </skin>
          </controller>"##;
        let element = Element::parse(xml.as_bytes()).expect("xml");

        let error = parse_controller(&element).expect_err("oversized vcount");

        assert!(matches!(error, ColladaError::DocumentParse(_)));
        assert!(error.to_string().contains("skin0"));
    }

    #[test]
    fn given_phong_effect_with_sampler_when_parsing_material_then_image_id_is_resolved() {
        let effect_xml = r#"
          <effect id="fx">
            <profile_COMMON>
              <newparam sid="surf"><surface type="2D"><init_from>img0</init_from></surface></newparam>
              <newparam sid="samp"><sampler2D><source>surf</source></sampler2D></newparam>
              <technique sid="common"><phong>
                <diffuse><texture texture="samp" texcoord="UV0"/></diffuse>
                <shininess><float>20</float></shininess>
              </phong></technique>
            </profile_COMMON>
          </effect>"#;
        let effect = Element::parse(effect_xml.as_bytes()).expect("xml");
        let (effect_id, parsed) = parse_effect(&effect).expect("effect");
        let mut effects = EffectTable::new();
        effects.insert(effect_id, parsed);

        let material_xml =
            r##"<material id="mat0" name="Skin"><instance_effect url="#fx"/></material>"##;
        let element = Element::parse(material_xml.as_bytes()).expect("xml");
        let material = parse_material(&element, &effects).expect("material");

        assert_eq!(material.name, "Skin");
        assert_eq!(material.diffuse_texture.as_deref(), Some("img0"));
        assert!((material.shininess - 20.0).abs() < 1e-6);
    }

    #[test]
    fn given_file_uri_when_resolving_image_then_relative_path_joins_document_dir() {
        let dir = Path::new("/assets/models");
        assert_eq!(
            resolve_image_uri("textures/skin%20a.png", dir),
            PathBuf::from("/assets/models/textures/skin a.png")
        );
        assert_eq!(
            resolve_image_uri("file:///tmp/a.png", dir),
            PathBuf::from("/tmp/a.png")
        );
    }
}

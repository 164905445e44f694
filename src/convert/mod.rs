//! Collada to native scene conversion.
//!
//! [`convert_dae_to_scene`] runs a full conversion and writes the scene file;
//! [`convert_dae_animations`] only bakes the document's clips into animation
//! files. Both return a [`ConversionReport`] carrying the non-fatal issues.

mod adapter;
mod animation;
mod importer;
mod mesh;
mod native;
mod polygon_group;
mod scene;
mod skinned_mesh;
mod types;
mod vertex;
mod writer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

pub use adapter::DocumentAdapter;
pub use animation::{AnimationTrack, SceneAnimation, TrackRef, extract_animations};
pub use importer::{ImportCache, MaterialKey, PolygonKey, import_scene};
pub use mesh::Mesh;
pub use native::{
    AnimationComponent, CameraComponent, Entity, EntityId, LightComponent, MaterialTemplate,
    NativeAnimation, NativeLibrary, NativeMaterial, NativeMaterialInstance, NativePolygonGroup,
    NativeScene, RenderBatch, RenderObject, SkeletonComponent, SkeletonJoint, SkinningFlag,
};
pub use polygon_group::{PolygonGroup, weld};
pub use scene::{ColladaScene, Material, MeshInstance, MeshRef, NodeId, SceneNode};
pub use skinned_mesh::{Joint, SkinnedMesh};
pub use types::{
    BoundingBox, COLLADA_MAX_JOINT_WEIGHTS, ConversionReport, ImportIssue, MAX_BONES_PER_VERTEX,
    MIN_JOINT_WEIGHT, Severity, WELD_EPSILON, issue_code,
};
pub use vertex::{Vertex, VertexFormat, VertexWeight};
pub use writer::{encode_animation_data, write_animation, write_scene};

use crate::settings::ImportSettings;

fn output_dir_for(input_path: &Path, output_dir: Option<&Path>) -> PathBuf {
    output_dir
        .map(Path::to_path_buf)
        .or_else(|| input_path.parent().map(Path::to_path_buf))
        .unwrap_or_default()
}

/// Converts one document into a native scene file.
///
/// The scene is written to `<output_dir>/<input stem>.<scene_extension>`;
/// without `output_dir` it lands beside the input.
///
/// # Errors
///
/// Document-fatal and geometry-fatal causes are returned as
/// [`crate::error::ColladaError`] inside the `anyhow` chain.
pub fn convert_dae_to_scene(
    input_path: &Path,
    output_dir: Option<&Path>,
    settings: &ImportSettings,
) -> Result<ConversionReport> {
    let adapter = DocumentAdapter::open(input_path, false, settings)
        .with_context(|| format!("failed to import {}", input_path.display()))?;

    let stem = input_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());
    let scene_path = output_dir_for(input_path, output_dir)
        .join(format!("{}.{}", stem, settings.scene_extension));
    adapter.save_sc2(&scene_path)?;

    let scene = adapter.scene();
    let report = ConversionReport {
        input_path: input_path.to_path_buf(),
        scene_path: Some(scene_path),
        animation_paths: Vec::new(),
        node_count: scene.nodes.len(),
        mesh_count: scene.meshes.len(),
        skinned_mesh_count: scene.skinned_meshes.len(),
        material_count: scene.materials.len(),
        animation_count: scene.animations.len(),
        issues: scene.issues.clone(),
    };
    info!(
        "converted {} ({} issues)",
        input_path.display(),
        report.issues.len()
    );
    Ok(report)
}

/// Bakes the clips of one document into animation files, one per clip.
pub fn convert_dae_animations(
    input_path: &Path,
    output_dir: Option<&Path>,
    settings: &ImportSettings,
) -> Result<ConversionReport> {
    let adapter = DocumentAdapter::open(input_path, true, settings)
        .with_context(|| format!("failed to import animations of {}", input_path.display()))?;
    let animation_paths = adapter.save_animations(&output_dir_for(input_path, output_dir))?;

    let scene = adapter.scene();
    Ok(ConversionReport {
        input_path: input_path.to_path_buf(),
        scene_path: None,
        animation_count: animation_paths.len(),
        animation_paths,
        node_count: scene.nodes.len(),
        mesh_count: 0,
        skinned_mesh_count: 0,
        material_count: 0,
        issues: scene.issues.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::{ErrorCode, error_code_of};

    const BOX: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<COLLADA xmlns="http://www.collada.org/2005/11/COLLADASchema" version="1.4.1">
  <asset><up_axis>Z_UP</up_axis></asset>
  <library_effects>
    <effect id="wood-fx"><profile_COMMON><technique sid="common"><phong>
      <diffuse><color>0.6 0.4 0.2 1</color></diffuse>
      <shininess><float>20</float></shininess>
    </phong></technique></profile_COMMON></effect>
  </library_effects>
  <library_materials><material id="wood" name="Wood"><instance_effect url="#wood-fx"/></material></library_materials>
  <library_lights>
    <light id="sun" name="Sun"><technique_common><directional><color>1 1 0.9</color></directional></technique_common></light>
  </library_lights>
  <library_geometries>
    <geometry id="crate-mesh" name="crate">
      <mesh>
        <source id="crate-pos">
          <float_array count="12">0 0 0 1 0 0 1 1 0 0 1 0</float_array>
          <technique_common><accessor stride="3"/></technique_common>
        </source>
        <source id="crate-uv">
          <float_array count="8">0 0 1 0 1 1 0 1</float_array>
          <technique_common><accessor stride="2"/></technique_common>
        </source>
        <vertices id="crate-vtx"><input semantic="POSITION" source="#crate-pos"/></vertices>
        <polygons count="1" material="lid">
          <input semantic="VERTEX" source="#crate-vtx" offset="0"/>
          <input semantic="TEXCOORD" source="#crate-uv" offset="1" set="0"/>
          <p>0 0 1 1 2 2 3 3</p>
        </polygons>
      </mesh>
    </geometry>
  </library_geometries>
  <library_animations>
    <animation id="slide">
      <source id="slide-t"><float_array count="2">0 2</float_array></source>
      <source id="slide-v"><float_array count="2">0 5</float_array></source>
      <sampler id="slide-s">
        <input semantic="INPUT" source="#slide-t"/>
        <input semantic="OUTPUT" source="#slide-v"/>
      </sampler>
      <channel source="#slide-s" target="crate/location.X"/>
    </animation>
  </library_animations>
  <library_visual_scenes>
    <visual_scene id="scene">
      <node id="crate" name="Crate">
        <translate sid="location">0 0 0</translate>
        <instance_geometry url="#crate-mesh">
          <bind_material><technique_common>
            <instance_material symbol="lid" target="#wood"/>
          </technique_common></bind_material>
        </instance_geometry>
      </node>
      <node id="sun-node" name="SunNode"><instance_light url="#sun"/></node>
    </visual_scene>
  </library_visual_scenes>
  <scene><instance_visual_scene url="#scene"/></scene>
</COLLADA>"##;

    #[test]
    fn given_box_document_when_converting_then_scene_file_is_written_beside_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("crate.dae");
        fs::write(&input, BOX).expect("write dae");
        let out = dir.path().join("out");
        fs::create_dir(&out).expect("out dir");

        let report =
            convert_dae_to_scene(&input, Some(&out), &ImportSettings::default()).expect("convert");

        assert_eq!(report.scene_path, Some(out.join("crate.sc2")));
        assert_eq!(report.mesh_count, 1);
        assert_eq!(report.material_count, 1);
        assert_eq!(report.animation_count, 1);
        assert!(report.issues.is_empty());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("crate.sc2")).expect("read scene"))
                .expect("scene json");
        let entities = json["entities"].as_array().expect("entities");
        assert_eq!(entities.len(), 3);
        assert_eq!(json["library"]["polygon_groups"][0]["vertex_count"], 4);
        assert_eq!(json["library"]["materials"][0]["name"], "Wood");
        let crate_entity = entities
            .iter()
            .find(|entity| entity["name"] == "Crate")
            .expect("crate entity");
        assert!(crate_entity.get("animation").is_some());
        let sun = entities
            .iter()
            .find(|entity| entity["name"] == "SunNode")
            .expect("sun entity");
        assert_eq!(sun["lights"][0]["kind"], "directional");
    }

    #[test]
    fn given_box_document_when_extracting_animations_then_one_file_per_clip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("crate.dae");
        fs::write(&input, BOX).expect("write dae");

        let report =
            convert_dae_animations(&input, None, &ImportSettings::default()).expect("animations");

        assert_eq!(report.animation_paths, vec![dir.path().join("crate.anim")]);
        let bytes = fs::read(&report.animation_paths[0]).expect("read anim");
        assert_eq!(&bytes[0..4], b"ANIM");
        // duration is the last key of the clip
        assert_eq!(f32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 2.0);
    }

    #[test]
    fn given_missing_input_when_converting_then_document_open_code_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("absent.dae");

        let error =
            convert_dae_to_scene(&input, None, &ImportSettings::default()).expect_err("missing");

        assert_eq!(error_code_of(&error), Some(ErrorCode::DocumentOpen));
        assert!(format!("{:#}", error).contains("absent.dae"));
    }

    #[test]
    fn given_out_of_range_index_when_converting_then_geometry_error_aborts_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("broken.dae");
        let broken = BOX.replace("<p>0 0 1 1 2 2 3 3</p>", "<p>0 0 1 1 2 2 9 3</p>");
        fs::write(&input, broken).expect("write dae");

        let error =
            convert_dae_to_scene(&input, None, &ImportSettings::default()).expect_err("broken");

        assert_eq!(error_code_of(&error), Some(ErrorCode::GeometryIndexOutOfRange));
        assert!(!dir.path().join("broken.sc2").exists());
    }
}

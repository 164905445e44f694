use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use nalgebra::{Matrix4, Rotation3, Vector3};

use super::animation::{TrackRef, extract_animations};
use super::importer::import_scene;
use super::mesh::Mesh;
use super::native::NativeScene;
use super::scene::{ColladaScene, Material, MeshRef, NodeId, SkinnedMeshId};
use super::skinned_mesh::SkinnedMesh;
use super::types::{ImportIssue, issue_code};
use super::writer::{write_animation, write_scene};
use crate::collada::ColladaDocument;
use crate::settings::{ImportSettings, UpAxis};
use crate::texture::{create_texture_descriptor, invalid_texture_descriptor};

/// Owns one parsed document and the conversion context built from it.
#[derive(Debug)]
pub struct DocumentAdapter {
    document: ColladaDocument,
    scene: ColladaScene,
    settings: ImportSettings,
}

impl DocumentAdapter {
    /// Parses `path` and builds the conversion context.
    ///
    /// # Arguments
    ///
    /// * `animations_only` - Skip entity libraries; only the node hierarchy
    ///   and animations are built.
    /// * `settings` - Target axis, unit scale and output options.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be opened or parsed, has no visual
    /// scene, or declares geometry that cannot be built.
    pub fn open(path: &Path, animations_only: bool, settings: &ImportSettings) -> Result<Self> {
        let document = ColladaDocument::open(path)?;
        let correction = correction_matrix(&document, settings);
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string());

        let mut adapter = Self {
            document,
            scene: ColladaScene::new(&name, correction),
            settings: settings.clone(),
        };

        if !animations_only {
            adapter
                .populate_libraries()
                .with_context(|| format!("failed to convert geometry of {}", path.display()))?;
        }

        adapter.scene.export_scene(&adapter.document, !animations_only);
        adapter.scene.update_transforms(&adapter.document, 0.0, None);

        if !animations_only {
            adapter.link_skins();
            adapter.scene.update_skinned_meshes();
        }

        adapter.scene.animations = extract_animations(&adapter.scene, &adapter.document);
        adapter.attach_tracks();

        info!(
            "adapted {}: {} nodes, {} issues",
            path.display(),
            adapter.scene.nodes.len(),
            adapter.scene.issues.len()
        );
        Ok(adapter)
    }

    pub fn document(&self) -> &ColladaDocument {
        &self.document
    }

    pub fn scene(&self) -> &ColladaScene {
        &self.scene
    }

    pub fn issues(&self) -> &[ImportIssue] {
        &self.scene.issues
    }

    /// Imports the scene into native objects and writes it to `path`.
    pub fn save_sc2(&self, path: &Path) -> Result<NativeScene> {
        let native = import_scene(&self.scene);
        write_scene(path, &native)?;
        Ok(native)
    }

    /// Writes one animation file per clip into `dir`.
    pub fn save_animations(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(self.scene.animations.len());
        for animation in &self.scene.animations {
            let file_name = format!(
                "{}.{}",
                sanitize_file_name(&animation.name),
                self.settings.animation_extension
            );
            let path = dir.join(file_name);
            write_animation(&path, animation)?;
            paths.push(path);
        }
        Ok(paths)
    }

    // ─── Library population ───────────────────────────────────────────────────

    /// Geometry, images, lights, materials, cameras, then controllers, which
    /// depend on geometry.
    fn populate_libraries(&mut self) -> Result<()> {
        let document = &self.document;
        let scene = &mut self.scene;

        for geometry in &document.geometries {
            scene.add_mesh(Mesh::build(geometry, None, 0)?);
        }
        info!("geometry library: {} meshes", scene.meshes.len());

        if self.settings.write_textures {
            for image in &document.images {
                let descriptor = match create_texture_descriptor(&image.path) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        warn!("image '{}': {:#}", image.id, err);
                        scene.issues.push(ImportIssue::warning(
                            issue_code::TEXTURE_UNREADABLE,
                            format!("image '{}': {:#}", image.id, err),
                        ));
                        invalid_texture_descriptor(&image.path)
                    }
                };
                scene.textures.push(descriptor);
            }
            info!("image library: {} textures", scene.textures.len());
        }

        for light in &document.lights {
            scene.add_light(light.clone());
        }
        for material in &document.materials {
            scene.add_material(Material::from_entity(material, document));
        }
        for camera in &document.cameras {
            scene.add_camera(camera.clone());
        }
        info!(
            "libraries: {} lights, {} materials, {} cameras",
            scene.lights.len(),
            scene.materials.len(),
            scene.cameras.len()
        );

        for controller in &document.controllers {
            let Some(geometry) = document.geometry(&controller.skin_source) else {
                warn!(
                    "controller '{}': skin source '{}' not found",
                    controller.id, controller.skin_source
                );
                scene.issues.push(ImportIssue::error(
                    issue_code::GEOMETRY_NOT_FOUND,
                    format!(
                        "controller '{}': skin source '{}' not found",
                        controller.id, controller.skin_source
                    ),
                ));
                continue;
            };
            scene.add_skinned_mesh(SkinnedMesh::build(controller, geometry)?);
        }
        info!("controller library: {} skinned meshes", scene.skinned_meshes.len());
        Ok(())
    }

    // ─── Skins and animations ─────────────────────────────────────────────────

    /// Links every instanced skin to its skeleton, once per skinned mesh.
    fn link_skins(&mut self) {
        let mut bindings: Vec<(SkinnedMeshId, NodeId)> = Vec::new();
        for node in 0..self.scene.nodes.len() {
            for instance in &self.scene.nodes[node].mesh_instances {
                let MeshRef::Skinned(skinned) = instance.mesh else {
                    continue;
                };
                if bindings.iter().any(|(bound, _)| *bound == skinned) {
                    continue;
                }
                let skeleton_root = instance
                    .skeleton_roots
                    .iter()
                    .find_map(|root| self.scene.find_node(root));
                let skeleton_root = match skeleton_root {
                    Some(root) => root,
                    None => {
                        let message = format!(
                            "node '{}': skeleton of '{}' not found, searching the whole scene",
                            self.scene.nodes[node].name,
                            self.scene.skinned_meshes[skinned].controller_id
                        );
                        warn!("{}", message);
                        self.scene
                            .issues
                            .push(ImportIssue::warning(issue_code::SKELETON_NOT_FOUND, message));
                        self.scene.root
                    }
                };
                bindings.push((skinned, skeleton_root));
            }
        }

        for (skinned, skeleton_root) in bindings {
            let nodes = &self.scene.nodes;
            let mesh = &mut self.scene.skinned_meshes[skinned];
            let issues = mesh.link_joints(nodes, &self.document, skeleton_root);
            mesh.build_joints_hierarchy(nodes);
            debug!(
                "skinned mesh '{}': {} joints linked below '{}'",
                mesh.controller_id,
                mesh.joints.len(),
                nodes[skeleton_root].name
            );
            self.scene.issues.extend(issues);
        }
    }

    /// Nodes reference tracks of the first animation.
    fn attach_tracks(&mut self) {
        let Some(animation) = self.scene.animations.first() else {
            return;
        };
        let tracks = animation
            .tracks
            .iter()
            .enumerate()
            .map(|(track, source)| (source.node, TrackRef { animation: 0, track }))
            .collect::<Vec<_>>();
        for (node, track) in tracks {
            self.scene.nodes[node].animation = Some(track);
        }
    }
}

fn up_vector(axis: UpAxis) -> Vector3<f32> {
    match axis {
        UpAxis::X => Vector3::x(),
        UpAxis::Y => Vector3::y(),
        UpAxis::Z => Vector3::z(),
    }
}

/// Rotation onto the target up axis times the unit scale.
fn correction_matrix(document: &ColladaDocument, settings: &ImportSettings) -> Matrix4<f32> {
    let from = document.asset.up_axis.vector();
    let to = up_vector(settings.target_up_axis);
    let rotation = Rotation3::rotation_between(&from, &to)
        .unwrap_or_else(|| Rotation3::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI));
    let scale = if settings.unit_scale > 0.0 {
        document.asset.unit_meter / settings.unit_scale
    } else {
        document.asset.unit_meter
    };
    rotation.to_homogeneous() * Matrix4::new_scaling(scale)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::native::SkinningFlag;

    const SKINNED: &str = r##"<COLLADA version="1.4.1">
  <asset><unit meter="0.01"/><up_axis>Y_UP</up_axis></asset>
  <library_images><image id="skin-png"><init_from>missing_skin.png</init_from></image></library_images>
  <library_effects>
    <effect id="skin-fx"><profile_COMMON><technique sid="common"><lambert>
      <diffuse><texture texture="skin-png" texcoord="uv"/></diffuse>
    </lambert></technique></profile_COMMON></effect>
  </library_effects>
  <library_materials><material id="skin-mat" name="Skin"><instance_effect url="#skin-fx"/></material></library_materials>
  <library_geometries>
    <geometry id="arm-mesh" name="arm">
      <mesh>
        <source id="arm-pos">
          <float_array count="12">0 0 0 1 0 0 1 2 0 0 2 0</float_array>
          <technique_common><accessor stride="3"/></technique_common>
        </source>
        <vertices id="arm-vtx"><input semantic="POSITION" source="#arm-pos"/></vertices>
        <polylist count="1" material="skin">
          <input semantic="VERTEX" source="#arm-vtx" offset="0"/>
          <vcount>4</vcount>
          <p>0 1 2 3</p>
        </polylist>
      </mesh>
    </geometry>
  </library_geometries>
  <library_controllers>
    <controller id="arm-skin">
      <skin source="#arm-mesh">
        <source id="arm-joints"><Name_array count="2">shoulder elbow</Name_array></source>
        <source id="arm-binds">
          <float_array count="32">1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 1 0 0 0 0 1 0 -1 0 0 1 0 0 0 0 1</float_array>
          <technique_common><accessor stride="16"/></technique_common>
        </source>
        <source id="arm-weights"><float_array count="2">1 0.5</float_array></source>
        <joints>
          <input semantic="JOINT" source="#arm-joints"/>
          <input semantic="INV_BIND_MATRIX" source="#arm-binds"/>
        </joints>
        <vertex_weights count="4">
          <input semantic="JOINT" source="#arm-joints" offset="0"/>
          <input semantic="WEIGHT" source="#arm-weights" offset="1"/>
          <vcount>1 1 2 2</vcount>
          <v>0 0 0 0 0 1 1 1 0 1 1 1</v>
        </vertex_weights>
      </skin>
    </controller>
  </library_controllers>
  <library_animations>
    <animation id="wave">
      <source id="wave-t"><float_array count="2">0 1</float_array></source>
      <source id="wave-v"><float_array count="2">0 45</float_array></source>
      <sampler id="wave-s">
        <input semantic="INPUT" source="#wave-t"/>
        <input semantic="OUTPUT" source="#wave-v"/>
      </sampler>
      <channel source="#wave-s" target="elbow/bend.ANGLE"/>
    </animation>
  </library_animations>
  <library_visual_scenes>
    <visual_scene id="scene">
      <node id="rig" name="Rig">
        <node id="shoulder" sid="shoulder" name="shoulder" type="JOINT">
          <node id="elbow" sid="elbow" name="elbow" type="JOINT">
            <translate>0 1 0</translate>
            <rotate sid="bend">0 0 1 0</rotate>
          </node>
        </node>
        <node id="arm" name="Arm">
          <instance_controller url="#arm-skin">
            <skeleton>#shoulder</skeleton>
            <bind_material><technique_common>
              <instance_material symbol="skin" target="#skin-mat"/>
            </technique_common></bind_material>
          </instance_controller>
        </node>
      </node>
    </visual_scene>
  </library_visual_scenes>
</COLLADA>"##;

    fn write_document(dir: &Path) -> PathBuf {
        let path = dir.join("arm.dae");
        std::fs::write(&path, SKINNED).expect("write dae");
        path
    }

    #[test]
    fn given_y_up_centimeters_when_opening_then_root_carries_axis_and_unit_correction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_document(dir.path());
        let settings = ImportSettings::default();

        let adapter = DocumentAdapter::open(&path, false, &settings).expect("open");

        let root = &adapter.scene().nodes[adapter.scene().root];
        let up = root.local.transform_vector(&Vector3::y());
        assert!((up - Vector3::new(0.0, 0.0, 0.01)).norm() < 1e-6);
    }

    #[test]
    fn given_skinned_document_when_opening_then_skin_is_linked_and_texture_issue_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_document(dir.path());

        let adapter =
            DocumentAdapter::open(&path, false, &ImportSettings::default()).expect("open");
        let scene = adapter.scene();

        let skinned = &scene.skinned_meshes[0];
        assert!(skinned.is_linked());
        assert_eq!(skinned.joints[0].name, "shoulder");
        assert_eq!(skinned.joints[1].parent_index, 0);
        assert!(scene.issues.iter().any(|issue| issue.code == issue_code::TEXTURE_UNREADABLE));
        assert!(!scene.textures[0].valid);
        let arm = scene.find_node("arm").expect("arm");
        assert!(scene.nodes[arm].errors.is_empty());
        let elbow = scene.find_node("elbow").expect("elbow");
        assert!(scene.nodes[elbow].animation.is_some());
    }

    #[test]
    fn given_skinned_document_when_saving_scene_then_skinned_batch_and_skeleton_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_document(dir.path());
        let adapter =
            DocumentAdapter::open(&path, false, &ImportSettings::default()).expect("open");

        let native = adapter.save_sc2(&dir.path().join("arm.sc2")).expect("save");

        let arm = native.find_entity("Arm").expect("arm entity");
        let render = arm.render_object.as_ref().expect("render object");
        assert!(render.skinned);
        let instance = &native.library.material_instances[render.batches[0].material];
        assert_eq!(instance.skinning, Some(SkinningFlag::Soft { max_weights: 2 }));
        let skeleton = arm.skeleton.as_ref().expect("skeleton");
        assert_eq!(skeleton.joints.len(), 2);
        assert_eq!(skeleton.joints[1].parent_index, 0);
        let pose_max = Vector3::from(skeleton.pose_bbox_max);
        assert!((pose_max - Vector3::new(0.01, 0.0, 0.02)).norm() < 1e-5);
        assert!(Vector3::from(skeleton.pose_bbox_min).norm() < 1e-5);
        assert!(native.find_entity("shoulder").is_none());
        assert!(dir.path().join("arm.sc2").exists());
    }

    #[test]
    fn given_animations_only_when_opening_then_libraries_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_document(dir.path());

        let adapter = DocumentAdapter::open(&path, true, &ImportSettings::default()).expect("open");
        let paths = adapter.save_animations(dir.path()).expect("save animations");

        assert!(adapter.scene().meshes.is_empty());
        assert!(adapter.scene().skinned_meshes.is_empty());
        assert_eq!(paths, vec![dir.path().join("arm.anim")]);
        assert!(paths[0].exists());
    }
}

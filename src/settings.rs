use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Up axis of the native scene. Source documents are rotated onto it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UpAxis {
    X,
    Y,
    #[default]
    Z,
}

/// Import settings shared by the CLI and library callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Up axis of the produced scene.
    pub target_up_axis: UpAxis,
    /// Length of one output unit in meters.
    pub unit_scale: f32,
    /// Extension of the produced scene file.
    pub scene_extension: String,
    /// Extension of the produced animation files.
    pub animation_extension: String,
    /// Read image headers and emit texture descriptors.
    pub write_textures: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            target_up_axis: UpAxis::Z,
            unit_scale: 1.0,
            scene_extension: "sc2".to_string(),
            animation_extension: "anim".to_string(),
            write_textures: true,
        }
    }
}

/// Save import settings to a JSON file.
pub fn save_import_settings(path: &Path, settings: &ImportSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize import settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save import settings: {}", path.display()))?;
    Ok(())
}

/// Load import settings from a JSON file. Missing fields take their defaults.
pub fn load_import_settings(path: &Path) -> Result<ImportSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load import settings: {}", path.display()))?;
    let settings: ImportSettings =
        serde_json::from_str(&content).context("failed to parse import settings JSON")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_default_settings_when_serialize_then_json_contains_up_axis() {
        let settings = ImportSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        assert!(json.contains("target_up_axis"));
    }

    #[test]
    fn given_partial_json_when_loading_then_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "unit_scale": 0.01 }"#).expect("write settings");

        let settings = load_import_settings(&path).expect("load settings");

        assert!((settings.unit_scale - 0.01).abs() < 1e-6);
        assert_eq!(settings.target_up_axis, UpAxis::Z);
        assert_eq!(settings.scene_extension, "sc2");
    }

    #[test]
    fn given_saved_settings_when_loading_then_values_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let settings = ImportSettings {
            target_up_axis: UpAxis::Y,
            ..ImportSettings::default()
        };

        save_import_settings(&path, &settings).expect("save settings");
        let loaded = load_import_settings(&path).expect("load settings");

        assert_eq!(loaded.target_up_axis, UpAxis::Y);
    }
}

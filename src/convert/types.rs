use std::path::PathBuf;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ─── Conversion constants ─────────────────────────────────────────────────────

/// Attribute tolerance used when welding per-corner vertices.
pub const WELD_EPSILON: f32 = 1e-5;

/// Influences at or below this weight are dropped.
pub const MIN_JOINT_WEIGHT: f32 = 0.01;

/// Active influences kept per vertex.
pub const MAX_BONES_PER_VERTEX: usize = 4;

/// Joint slots carried by a vertex before influences are trimmed.
pub const COLLADA_MAX_JOINT_WEIGHTS: usize = 8;

/// Name given to scene nodes without a name or id.
pub const UNNAMED_NODE: &str = "UNNAMED";

// ─── Report types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Non-fatal problem recorded during a conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ImportIssue {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Issue codes for unresolved references.
pub mod issue_code {
    pub const MATERIAL_NOT_FOUND: &str = "MATERIAL_NOT_FOUND";
    pub const MATERIAL_BINDING_MISSING: &str = "MATERIAL_BINDING_MISSING";
    pub const GEOMETRY_NOT_FOUND: &str = "GEOMETRY_NOT_FOUND";
    pub const CONTROLLER_NOT_FOUND: &str = "CONTROLLER_NOT_FOUND";
    pub const LIGHT_NOT_FOUND: &str = "LIGHT_NOT_FOUND";
    pub const CAMERA_NOT_FOUND: &str = "CAMERA_NOT_FOUND";
    pub const NODE_NOT_FOUND: &str = "NODE_NOT_FOUND";
    pub const SKELETON_NOT_FOUND: &str = "SKELETON_NOT_FOUND";
    pub const JOINT_NOT_LINKED: &str = "JOINT_NOT_LINKED";
    pub const TEXTURE_UNREADABLE: &str = "TEXTURE_UNREADABLE";
    pub const UNNAMED_NODE: &str = "UNNAMED_NODE";
}

/// Result of one document conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub input_path: PathBuf,
    /// Scene file written by a full conversion.
    pub scene_path: Option<PathBuf>,
    /// Animation files written by an animations-only run.
    pub animation_paths: Vec<PathBuf>,
    pub node_count: usize,
    pub mesh_count: usize,
    pub skinned_mesh_count: usize,
    pub material_count: usize,
    pub animation_count: usize,
    pub issues: Vec<ImportIssue>,
}

// ─── Geometry helpers ─────────────────────────────────────────────────────────

/// Axis-aligned bounds; starts empty (`min > max`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: Vector3::repeat(f32::MAX),
            max: Vector3::repeat(f32::MIN),
        }
    }
}

impl BoundingBox {
    pub fn add_point(&mut self, point: &Vector3<f32>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }
}

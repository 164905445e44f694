use std::ops::{BitOr, BitOrAssign};

use nalgebra::{Vector2, Vector3};
use serde::Serialize;

use super::types::{COLLADA_MAX_JOINT_WEIGHTS, MAX_BONES_PER_VERTEX, MIN_JOINT_WEIGHT};

/// Bitmask of the attributes a vertex stream declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VertexFormat(pub u32);

impl VertexFormat {
    pub const VERTEX: Self = Self(1 << 0);
    pub const NORMAL: Self = Self(1 << 1);
    pub const TANGENT: Self = Self(1 << 2);
    pub const BINORMAL: Self = Self(1 << 3);
    pub const TEXCOORD0: Self = Self(1 << 4);
    pub const TEXCOORD1: Self = Self(1 << 5);
    pub const TEXCOORD2: Self = Self(1 << 6);
    pub const TEXCOORD3: Self = Self(1 << 7);
    pub const JOINTINDEX: Self = Self(1 << 8);
    pub const JOINTWEIGHT: Self = Self(1 << 9);
    /// Single joint per vertex without weights.
    pub const HARD_JOINTINDEX: Self = Self(1 << 10);

    pub const TEXCOORDS: [Self; 4] = [
        Self::TEXCOORD0,
        Self::TEXCOORD1,
        Self::TEXCOORD2,
        Self::TEXCOORD3,
    ];

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_joints(self) -> bool {
        self.contains(Self::JOINTINDEX) || self.contains(Self::HARD_JOINTINDEX)
    }
}

impl BitOr for VertexFormat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VertexFormat {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub tangent: Vector3<f32>,
    pub binormal: Vector3<f32>,
    pub tex_coords: [Vector2<f32>; 4],
    /// Valid entries in `joints`/`weights`.
    pub joint_count: usize,
    pub joints: [u32; COLLADA_MAX_JOINT_WEIGHTS],
    pub weights: [f32; COLLADA_MAX_JOINT_WEIGHTS],
}

impl Vertex {
    /// Attribute-wise comparison limited to what `format` declares.
    ///
    /// Joint data never takes part: skinning is resolved per welded vertex.
    pub fn is_equal(&self, other: &Vertex, format: VertexFormat, epsilon: f32) -> bool {
        let close3 = |a: &Vector3<f32>, b: &Vector3<f32>| (a - b).amax() <= epsilon;

        if !close3(&self.position, &other.position) {
            return false;
        }
        if format.contains(VertexFormat::NORMAL) && !close3(&self.normal, &other.normal) {
            return false;
        }
        if format.contains(VertexFormat::TANGENT) && !close3(&self.tangent, &other.tangent) {
            return false;
        }
        if format.contains(VertexFormat::BINORMAL) && !close3(&self.binormal, &other.binormal) {
            return false;
        }
        VertexFormat::TEXCOORDS
            .iter()
            .enumerate()
            .filter(|(_, flag)| format.contains(**flag))
            .all(|(set, _)| (self.tex_coords[set] - other.tex_coords[set]).amax() <= epsilon)
    }
}

/// Per-source-vertex influence accumulator. Keeps the heaviest influences
/// sorted by descending weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VertexWeight {
    pub joint_count: usize,
    pub joints: [u32; MAX_BONES_PER_VERTEX],
    pub weights: [f32; MAX_BONES_PER_VERTEX],
}

impl VertexWeight {
    pub fn add_weight(&mut self, joint: u32, weight: f32) {
        if weight <= MIN_JOINT_WEIGHT {
            return;
        }

        let position = self.weights[..self.joint_count]
            .iter()
            .position(|&existing| weight > existing)
            .unwrap_or(self.joint_count);
        if position >= MAX_BONES_PER_VERTEX {
            return;
        }

        let last = self.joint_count.min(MAX_BONES_PER_VERTEX - 1);
        for slot in (position..last).rev() {
            self.joints[slot + 1] = self.joints[slot];
            self.weights[slot + 1] = self.weights[slot];
        }
        self.joints[position] = joint;
        self.weights[position] = weight;
        self.joint_count = (self.joint_count + 1).min(MAX_BONES_PER_VERTEX);
    }

    /// Rescales the retained weights to sum to one.
    pub fn normalize(&mut self) {
        let total: f32 = self.weights[..self.joint_count].iter().sum();
        if total <= f32::EPSILON {
            return;
        }
        for weight in &mut self.weights[..self.joint_count] {
            *weight /= total;
        }
    }

    pub fn influences(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.joints[..self.joint_count]
            .iter()
            .copied()
            .zip(self.weights[..self.joint_count].iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_unsorted_influences_when_adding_then_kept_in_descending_order() {
        let mut weight = VertexWeight::default();
        weight.add_weight(3, 0.2);
        weight.add_weight(1, 0.5);
        weight.add_weight(7, 0.3);

        assert_eq!(weight.joint_count, 3);
        assert_eq!(&weight.joints[..3], &[1, 7, 3]);
        assert_eq!(&weight.weights[..3], &[0.5, 0.3, 0.2]);
    }

    #[test]
    fn given_more_than_four_influences_when_adding_then_lightest_are_dropped() {
        let mut weight = VertexWeight::default();
        for (joint, value) in [(0, 0.1), (1, 0.4), (2, 0.05), (3, 0.3), (4, 0.15)] {
            weight.add_weight(joint, value);
        }

        assert_eq!(weight.joint_count, MAX_BONES_PER_VERTEX);
        assert_eq!(&weight.joints, &[1, 3, 4, 0]);
    }

    #[test]
    fn given_tiny_weight_when_adding_then_it_is_discarded() {
        let mut weight = VertexWeight::default();
        weight.add_weight(0, MIN_JOINT_WEIGHT);
        weight.add_weight(1, 0.001);
        assert_eq!(weight.joint_count, 0);
    }

    #[test]
    fn given_partial_weights_when_normalizing_then_sum_is_one() {
        let mut weight = VertexWeight::default();
        weight.add_weight(0, 0.3);
        weight.add_weight(1, 0.2);
        weight.normalize();

        let total: f32 = weight.influences().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((weight.weights[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn given_format_without_second_uv_when_comparing_then_second_uv_is_ignored() {
        let a = Vertex {
            tex_coords: [
                Vector2::new(0.0, 0.0),
                Vector2::new(0.5, 0.5),
                Vector2::zeros(),
                Vector2::zeros(),
            ],
            ..Vertex::default()
        };
        let mut b = a;
        b.tex_coords[1] = Vector2::new(1.0, 1.0);
        b.joint_count = 1;
        b.joints[0] = 5;

        let one_uv = VertexFormat::VERTEX | VertexFormat::NORMAL | VertexFormat::TEXCOORD0;
        assert!(a.is_equal(&b, one_uv, 1e-5));
        assert!(!a.is_equal(&b, one_uv | VertexFormat::TEXCOORD1, 1e-5));
    }
}

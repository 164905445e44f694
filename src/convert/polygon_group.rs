use log::debug;
use nalgebra::{Vector2, Vector3};

use super::types::{BoundingBox, WELD_EPSILON};
use super::vertex::{Vertex, VertexFormat, VertexWeight};
use crate::collada::{PolygonSource, Semantic, SourceInput};
use crate::error::ColladaError;

/// One indexed sub-mesh sharing a material semantic.
#[derive(Debug, Clone)]
pub struct PolygonGroup {
    pub name: String,
    pub material_semantic: String,
    pub format: VertexFormat,
    /// One vertex per triangle corner, in triangle order.
    pub unoptimized_vertices: Vec<Vertex>,
    /// Welded vertices referenced by `indices`.
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bbox: BoundingBox,
    /// Positions produced by the last skinning evaluation, one per welded vertex.
    pub skin_positions: Vec<Vector3<f32>>,
}

impl PolygonGroup {
    /// Triangulates `source`, expands its attribute streams per corner and
    /// welds equal corners.
    ///
    /// # Arguments
    ///
    /// * `name` - Owning geometry id, used in error messages.
    /// * `weights` - Per-position-index influences of a skin controller.
    /// * `max_influence` - Largest influence count found in `weights`.
    ///
    /// # Errors
    ///
    /// Fails when a corner index is outside its source stream or the source
    /// has no triangles.
    pub fn build(
        name: &str,
        source: &PolygonSource,
        weights: Option<&[VertexWeight]>,
        max_influence: usize,
    ) -> Result<Self, ColladaError> {
        let corners = triangulate(&source.face_vertex_counts);
        let position = source
            .input(&Semantic::Position, 0)
            .filter(|input| !input.stream.is_empty());
        let Some(position) = position.filter(|_| !corners.is_empty()) else {
            return Err(ColladaError::EmptyGeometry {
                geometry: name.to_string(),
            });
        };

        let normal = source.input(&Semantic::Normal, 0);
        let tangent = source.input(&Semantic::TexTangent, 0);
        let binormal = source.input(&Semantic::TexBinormal, 0);
        let tex_coords = (0..4)
            .map(|set| source.input(&Semantic::TexCoord, set))
            .collect::<Vec<_>>();

        let mut format = VertexFormat::VERTEX | VertexFormat::NORMAL;
        if tangent.is_some() {
            format |= VertexFormat::TANGENT;
        }
        if binormal.is_some() {
            format |= VertexFormat::BINORMAL;
        }
        for (set, input) in tex_coords.iter().enumerate() {
            if input.is_some() {
                format |= VertexFormat::TEXCOORDS[set];
            }
        }
        if weights.is_some() {
            format |= if max_influence <= 1 {
                VertexFormat::HARD_JOINTINDEX
            } else {
                VertexFormat::JOINTINDEX | VertexFormat::JOINTWEIGHT
            };
        }

        let mut unoptimized_vertices = Vec::with_capacity(corners.len());
        let mut bbox = BoundingBox::default();
        for &corner in &corners {
            let mut vertex = Vertex::default();

            let (position_index, value) = fetch(name, position, corner)?;
            vertex.position = vector3(value);
            if let Some(input) = normal {
                vertex.normal = vector3(fetch(name, input, corner)?.1);
            }
            if let Some(input) = tangent {
                vertex.tangent = vector3(fetch(name, input, corner)?.1);
            }
            if let Some(input) = binormal {
                vertex.binormal = vector3(fetch(name, input, corner)?.1);
            }
            for (set, input) in tex_coords.iter().enumerate() {
                if let Some(input) = input {
                    let value = fetch(name, input, corner)?.1;
                    vertex.tex_coords[set] = Vector2::new(
                        value.first().copied().unwrap_or(0.0),
                        value.get(1).copied().unwrap_or(0.0),
                    );
                }
            }
            if let Some(weight) = weights.and_then(|table| table.get(position_index)) {
                vertex.joint_count = weight.joint_count;
                for (slot, (joint, value)) in weight.influences().enumerate() {
                    vertex.joints[slot] = joint;
                    vertex.weights[slot] = value;
                }
            }

            bbox.add_point(&vertex.position);
            unoptimized_vertices.push(vertex);
        }

        let (vertices, indices) = weld(&unoptimized_vertices, format);
        debug!(
            "polygon group '{}' ({}): {} corners welded to {} vertices",
            name,
            source.material_semantic,
            unoptimized_vertices.len(),
            vertices.len()
        );

        Ok(Self {
            name: name.to_string(),
            material_semantic: source.material_semantic.clone(),
            format,
            skin_positions: vertices.iter().map(|vertex| vertex.position).collect(),
            unoptimized_vertices,
            vertices,
            indices,
            bbox,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_skinned(&self) -> bool {
        self.format.has_joints()
    }
}

/// Fan-triangulates faces; returns source corner indices, three per triangle.
fn triangulate(face_vertex_counts: &[u32]) -> Vec<usize> {
    let mut corners = Vec::new();
    let mut base = 0usize;
    for &count in face_vertex_counts {
        let count = count as usize;
        for k in 1..count.saturating_sub(1) {
            corners.extend([base, base + k, base + k + 1]);
        }
        base += count;
    }
    corners
}

fn fetch<'a>(
    geometry: &str,
    input: &'a SourceInput,
    corner: usize,
) -> Result<(usize, &'a [f32]), ColladaError> {
    let out_of_range = |index: usize| ColladaError::IndexOutOfRange {
        geometry: geometry.to_string(),
        semantic: input.semantic.name().to_string(),
        index,
        len: input.stream.len(),
    };
    let index = *input.indices.get(corner).ok_or_else(|| out_of_range(corner))? as usize;
    let value = input.stream.element(index).ok_or_else(|| out_of_range(index))?;
    Ok((index, value))
}

fn vector3(value: &[f32]) -> Vector3<f32> {
    Vector3::new(
        value.first().copied().unwrap_or(0.0),
        value.get(1).copied().unwrap_or(0.0),
        value.get(2).copied().unwrap_or(0.0),
    )
}

/// Linear-scan weld: each vertex reuses the first already emitted vertex equal
/// to it under `format`, otherwise it is appended.
pub fn weld(vertices: &[Vertex], format: VertexFormat) -> (Vec<Vertex>, Vec<u32>) {
    let mut optimized: Vec<Vertex> = Vec::new();
    let mut indices = Vec::with_capacity(vertices.len());
    for vertex in vertices {
        let index = match optimized
            .iter()
            .position(|candidate| candidate.is_equal(vertex, format, WELD_EPSILON))
        {
            Some(existing) => existing,
            None => {
                optimized.push(*vertex);
                optimized.len() - 1
            }
        };
        indices.push(index as u32);
    }
    (optimized, indices)
}

use log::info;

use super::polygon_group::PolygonGroup;
use super::vertex::VertexWeight;
use crate::collada::Geometry;
use crate::error::ColladaError;

/// Polygon groups built from one geometry.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub geometry_id: String,
    pub name: String,
    pub polygon_groups: Vec<PolygonGroup>,
}

impl Mesh {
    pub fn build(
        geometry: &Geometry,
        weights: Option<&[VertexWeight]>,
        max_influence: usize,
    ) -> Result<Self, ColladaError> {
        let polygon_groups = geometry
            .primitives
            .iter()
            .map(|primitive| PolygonGroup::build(&geometry.id, primitive, weights, max_influence))
            .collect::<Result<Vec<_>, _>>()?;
        if polygon_groups.is_empty() {
            return Err(ColladaError::EmptyGeometry {
                geometry: geometry.id.clone(),
            });
        }

        info!(
            "mesh '{}': {} polygon groups, {} vertices",
            geometry.id,
            polygon_groups.len(),
            polygon_groups.iter().map(|group| group.vertices.len()).sum::<usize>()
        );
        Ok(Self {
            geometry_id: geometry.id.clone(),
            name: geometry.name.clone(),
            polygon_groups,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.polygon_groups.iter().map(|group| group.vertices.len()).sum()
    }
}

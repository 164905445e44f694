use std::{collections::HashMap, rc::Rc};

use log::warn;
use xmltree::Element;

use super::xml::{attr, child, children, child_elements, parse_floats, parse_uints, text, url_id};
use crate::error::ColladaError;

/// Per-attribute semantic of a primitive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Semantic {
    Position,
    Normal,
    TexCoord,
    TexTangent,
    TexBinormal,
    Color,
    Other(String),
}

impl Semantic {
    fn from_name(name: &str) -> Self {
        match name {
            "POSITION" => Semantic::Position,
            "NORMAL" => Semantic::Normal,
            "TEXCOORD" | "UV" => Semantic::TexCoord,
            "TEXTANGENT" | "TANGENT" => Semantic::TexTangent,
            "TEXBINORMAL" | "BINORMAL" => Semantic::TexBinormal,
            "COLOR" => Semantic::Color,
            other => Semantic::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Semantic::Position => "POSITION",
            Semantic::Normal => "NORMAL",
            Semantic::TexCoord => "TEXCOORD",
            Semantic::TexTangent => "TEXTANGENT",
            Semantic::TexBinormal => "TEXBINORMAL",
            Semantic::Color => "COLOR",
            Semantic::Other(name) => name,
        }
    }
}

/// Flat float data with a fixed number of components per element.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStream {
    pub values: Vec<f32>,
    pub stride: usize,
}

impl DataStream {
    pub fn new(values: Vec<f32>, stride: usize) -> Self {
        Self {
            values,
            stride: stride.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.stride)?;
        self.values.get(start..start + self.stride)
    }
}

/// One attribute stream of a primitive with its own index stream
/// (one index per face corner).
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub semantic: Semantic,
    pub set: u32,
    pub stream: Rc<DataStream>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Triangles,
    Polylist,
    Polygons,
}

/// Raw polygon source as found in the document: faces with per-face corner
/// counts and independently indexed attribute streams.
#[derive(Debug, Clone)]
pub struct PolygonSource {
    pub material_semantic: String,
    pub kind: PrimitiveKind,
    pub face_vertex_counts: Vec<u32>,
    pub inputs: Vec<SourceInput>,
}

impl PolygonSource {
    pub fn corner_count(&self) -> usize {
        self.face_vertex_counts.iter().map(|&count| count as usize).sum()
    }

    /// The `nth` input of a semantic, in document order.
    pub fn input(&self, semantic: &Semantic, nth: usize) -> Option<&SourceInput> {
        self.inputs
            .iter()
            .filter(|input| &input.semantic == semantic)
            .nth(nth)
    }
}

#[derive(Debug, Clone)]
pub struct Geometry {
    pub id: String,
    pub name: String,
    pub primitives: Vec<PolygonSource>,
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

pub(super) fn parse_source(source: &Element) -> Result<Option<DataStream>, ColladaError> {
    let Some(array) = child(source, "float_array") else {
        return Ok(None);
    };
    let values = parse_floats(array)?;
    let stride = child(source, "technique_common")
        .and_then(|technique| child(technique, "accessor"))
        .and_then(|accessor| attr(accessor, "stride"))
        .and_then(|stride| stride.parse::<usize>().ok())
        .unwrap_or(1);
    Ok(Some(DataStream::new(values, stride)))
}

struct RawInput {
    semantic: Semantic,
    set: u32,
    offset: usize,
    source: String,
}

pub(super) fn parse_geometry(element: &Element) -> Result<Option<Geometry>, ColladaError> {
    let id = attr(element, "id").unwrap_or_default().to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();

    let Some(mesh) = child(element, "mesh") else {
        warn!("geometry '{}' is not a polygon mesh, skipped", id);
        return Ok(None);
    };

    let mut sources = HashMap::<String, Rc<DataStream>>::new();
    for source in children(mesh, "source") {
        if let Some(stream) = parse_source(source)? {
            let source_id = attr(source, "id").unwrap_or_default().to_string();
            sources.insert(source_id, Rc::new(stream));
        }
    }

    let mut vertices_inputs = Vec::<(Semantic, u32, String)>::new();
    let mut vertices_id = String::new();
    if let Some(vertices) = child(mesh, "vertices") {
        vertices_id = attr(vertices, "id").unwrap_or_default().to_string();
        for input in children(vertices, "input") {
            let semantic = Semantic::from_name(attr(input, "semantic").unwrap_or_default());
            let source = url_id(attr(input, "source").unwrap_or_default()).to_string();
            vertices_inputs.push((semantic, 0, source));
        }
    }

    let mut primitives = Vec::new();
    for primitive in child_elements(mesh) {
        let kind = match primitive.name.as_str() {
            "triangles" => PrimitiveKind::Triangles,
            "polylist" => PrimitiveKind::Polylist,
            "polygons" => PrimitiveKind::Polygons,
            "lines" | "linestrips" | "trifans" | "tristrips" => {
                warn!("geometry '{}': <{}> primitives are not supported", id, primitive.name);
                continue;
            }
            _ => continue,
        };

        let mut raw_inputs = Vec::<RawInput>::new();
        for input in children(primitive, "input") {
            let semantic_name = attr(input, "semantic").unwrap_or_default();
            let offset = attr(input, "offset")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(0);
            let set = attr(input, "set")
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(0);
            let source = url_id(attr(input, "source").unwrap_or_default()).to_string();

            if semantic_name == "VERTEX" || source == vertices_id {
                for (semantic, _, vertex_source) in &vertices_inputs {
                    raw_inputs.push(RawInput {
                        semantic: semantic.clone(),
                        set: 0,
                        offset,
                        source: vertex_source.clone(),
                    });
                }
            } else {
                raw_inputs.push(RawInput {
                    semantic: Semantic::from_name(semantic_name),
                    set,
                    offset,
                    source,
                });
            }
        }

        let index_stride = raw_inputs
            .iter()
            .try_fold(1usize, |stride, input| input.offset.checked_add(1).map(|s| stride.max(s)))
            .ok_or_else(|| {
                ColladaError::DocumentParse(format!(
                    "geometry '{}': <{}> input offset is out of range",
                    id, primitive.name
                ))
            })?;

        let mut face_vertex_counts = Vec::<u32>::new();
        let mut flat_indices = Vec::<u32>::new();
        match kind {
            PrimitiveKind::Triangles => {
                if let Some(p) = child(primitive, "p") {
                    flat_indices = parse_uints(p)?;
                }
                let corners = flat_indices.len() / index_stride;
                face_vertex_counts = vec![3; corners / 3];
            }
            PrimitiveKind::Polylist => {
                if let Some(vcount) = child(primitive, "vcount") {
                    face_vertex_counts = parse_uints(vcount)?;
                }
                if let Some(p) = child(primitive, "p") {
                    flat_indices = parse_uints(p)?;
                }
            }
            PrimitiveKind::Polygons => {
                for p in children(primitive, "p") {
                    let face = parse_uints(p)?;
                    face_vertex_counts.push((face.len() / index_stride) as u32);
                    flat_indices.extend(face);
                }
            }
        }

        let corner_count = face_vertex_counts
            .iter()
            .try_fold(0usize, |total, &count| total.checked_add(count as usize));
        let Some(corner_count) = corner_count.filter(|&corners| {
            corners
                .checked_mul(index_stride)
                .is_some_and(|needed| needed <= flat_indices.len())
        }) else {
            return Err(ColladaError::DocumentParse(format!(
                "geometry '{}': <{}> declares more corners than its {} indices",
                id,
                primitive.name,
                flat_indices.len() / index_stride
            )));
        };

        let mut inputs = Vec::with_capacity(raw_inputs.len());
        for raw in raw_inputs {
            let Some(stream) = sources.get(&raw.source) else {
                warn!("geometry '{}': input source '{}' not found", id, raw.source);
                continue;
            };
            let indices = (0..corner_count)
                .map(|corner| flat_indices[corner * index_stride + raw.offset])
                .collect();
            inputs.push(SourceInput {
                semantic: raw.semantic,
                set: raw.set,
                stream: Rc::clone(stream),
                indices,
            });
        }

        primitives.push(PolygonSource {
            material_semantic: attr(primitive, "material").unwrap_or_default().to_string(),
            kind,
            face_vertex_counts,
            inputs,
        });
    }

    Ok(Some(Geometry {
        id,
        name,
        primitives,
    }))
}

/// Name of a `<source>` child used by controllers and animations.
pub(super) fn source_names(source: &Element) -> Option<Vec<String>> {
    child_elements(source)
        .find(|element| element.name == "Name_array" || element.name == "IDREF_array")
        .map(|array| text(array).split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = r##"
        <geometry id="quad-mesh" name="quad">
          <mesh>
            <source id="quad-pos">
              <float_array id="quad-pos-array" count="12">0 0 0 1 0 0 1 1 0 0 1 0</float_array>
              <technique_common><accessor source="#quad-pos-array" count="4" stride="3"/></technique_common>
            </source>
            <source id="quad-uv">
              <float_array id="quad-uv-array" count="8">0 0 1 0 1 1 0 1</float_array>
              <technique_common><accessor source="#quad-uv-array" count="4" stride="2"/></technique_common>
            </source>
            <vertices id="quad-vtx"><input semantic="POSITION" source="#quad-pos"/></vertices>
            <polylist material="mat0" count="1">
              <input semantic="VERTEX" source="#quad-vtx" offset="0"/>
              <input semantic="TEXCOORD" source="#quad-uv" offset="1" set="0"/>
              <vcount>4</vcount>
              <p>0 0 1 1 2 2 3 3</p>
            </polylist>
          </mesh>
        </geometry>"##;

    #[test]
    fn given_polylist_when_parsing_then_inputs_are_deinterleaved() {
        let element = Element::parse(QUAD.as_bytes()).expect("xml");
        let geometry = parse_geometry(&element).expect("parse").expect("mesh");

        assert_eq!(geometry.primitives.len(), 1);
        let primitive = &geometry.primitives[0];
        assert_eq!(primitive.material_semantic, "mat0");
        assert_eq!(primitive.face_vertex_counts, vec![4]);

        let position = primitive.input(&Semantic::Position, 0).expect("position input");
        assert_eq!(position.indices, vec![0, 1, 2, 3]);
        assert_eq!(position.stream.len(), 4);
        let uv = primitive.input(&Semantic::TexCoord, 0).expect("uv input");
        assert_eq!(uv.stream.stride, 2);
    }

    #[test]
    fn given_absurd_input_offset_when_parsing_then_parse_error_is_returned() {
        let broken = QUAD.replace(
            r##"offset="1" set="0""##,
            &format!(r#"offset="{}" set="0""#, usize::MAX),
        );
        let element = Element::parse(broken.as_bytes()).expect("xml");

        let error = parse_geometry(&element).expect_err("offset overflow");

        assert!(matches!(error, ColladaError::DocumentParse(_)));
    }

    #[test]
    fn given_truncated_index_list_when_parsing_then_parse_error_is_returned() {
        let broken = QUAD.replace("<p>0 0 1 1 2 2 3 3</p>", "<p>0 0 1 1</p>");
        let element = Element::parse(broken.as_bytes()).expect("xml");
        assert!(parse_geometry(&element).is_err());
    }
}

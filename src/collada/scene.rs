use log::warn;
use nalgebra::{Matrix4, Point3, Vector3};
use xmltree::Element;

use super::animation::{AnimationClip, AnimationCurve, CurveId};
use super::library::matrix_from_row_major;
use super::xml::{attr, child, child_elements, children, parse_fixed, parse_floats, text, url_id};
use crate::{error::ColladaError, transform::axis_angle_matrix};

pub type DocNodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    Translate(Vector3<f32>),
    Rotate { axis: Vector3<f32>, angle_degrees: f32 },
    Scale(Vector3<f32>),
    Matrix(Matrix4<f32>),
    /// `<lookat>` is resolved to a matrix at parse time and never animated.
    LookAt(Matrix4<f32>),
}

/// One element of a node's transform stack, with the curves bound to it.
#[derive(Debug, Clone)]
pub struct Transform {
    pub sid: Option<String>,
    pub kind: TransformKind,
    /// `(suffix, curve)` pairs, e.g. `(".ANGLE", 3)` or `("(0)(3)", 7)`.
    pub curves: Vec<(String, CurveId)>,
}

impl Transform {
    fn new(sid: Option<String>, kind: TransformKind) -> Self {
        Self {
            sid,
            kind,
            curves: Vec::new(),
        }
    }

    /// Curve bound to `suffix` that belongs to `clip`.
    pub fn curve(&self, suffix: &str, clip: Option<&AnimationClip>) -> Option<CurveId> {
        let clip = clip?;
        self.curves
            .iter()
            .find(|(bound, curve)| bound == suffix && clip.contains(*curve))
            .map(|(_, curve)| *curve)
    }

    pub fn animated_curves<'a>(
        &'a self,
        clip: &'a AnimationClip,
    ) -> impl Iterator<Item = CurveId> + 'a {
        self.curves
            .iter()
            .map(|(_, curve)| *curve)
            .filter(move |curve| clip.contains(*curve))
    }

    pub fn is_animated(&self, clip: &AnimationClip) -> bool {
        self.animated_curves(clip).next().is_some()
    }

    /// Evaluates this element at `time`. Components without a curve keep their
    /// static value; `clip == None` yields the static transform.
    pub fn evaluate(
        &self,
        time: f32,
        curves: &[AnimationCurve],
        clip: Option<&AnimationClip>,
    ) -> Matrix4<f32> {
        let value = |suffix: &str, fallback: f32| {
            self.curve(suffix, clip)
                .and_then(|curve| curves.get(curve))
                .map(|curve| curve.evaluate(time))
                .unwrap_or(fallback)
        };
        let vector =
            |v: &Vector3<f32>| Vector3::new(value(".X", v.x), value(".Y", v.y), value(".Z", v.z));

        match &self.kind {
            TransformKind::Translate(v) => Matrix4::new_translation(&vector(v)),
            TransformKind::Scale(v) => Matrix4::new_nonuniform_scaling(&vector(v)),
            TransformKind::Rotate {
                axis,
                angle_degrees,
            } => axis_angle_matrix(vector(axis), value(".ANGLE", *angle_degrees)),
            TransformKind::Matrix(m) => {
                let mut out = *m;
                for r in 0..4 {
                    for c in 0..4 {
                        out[(r, c)] = value(&format!("({r})({c})"), m[(r, c)]);
                    }
                }
                out
            }
            TransformKind::LookAt(m) => *m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Geometry,
    Controller,
    Light,
    Camera,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialBinding {
    pub symbol: String,
    pub target: String,
}

/// `<instance_*>` reference attached to a node.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    pub kind: InstanceKind,
    pub url: String,
    /// `<skeleton>` roots of a controller instance.
    pub skeletons: Vec<String>,
    pub material_bindings: Vec<MaterialBinding>,
}

impl EntityInstance {
    pub fn material_for(&self, symbol: &str) -> Option<&str> {
        self.material_bindings
            .iter()
            .find(|binding| binding.symbol == symbol)
            .map(|binding| binding.target.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocNode {
    pub id: Option<String>,
    pub name: String,
    pub sid: Option<String>,
    pub is_joint: bool,
    pub parent: Option<DocNodeId>,
    pub children: Vec<DocNodeId>,
    pub transforms: Vec<Transform>,
    pub instances: Vec<EntityInstance>,
    /// Urls of `<instance_node>` prototypes instantiated below this node.
    pub node_instances: Vec<String>,
}

impl DocNode {
    pub fn matches_joint(&self, joint_name: &str, by_id: bool) -> bool {
        if by_id {
            return self.id.as_deref() == Some(joint_name);
        }
        self.sid.as_deref() == Some(joint_name)
            || self.name == joint_name
            || self.id.as_deref() == Some(joint_name)
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

pub(super) fn parse_node(
    element: &Element,
    parent: Option<DocNodeId>,
    nodes: &mut Vec<DocNode>,
) -> Result<DocNodeId, ColladaError> {
    let id = attr(element, "id").map(str::to_string);
    let name = attr(element, "name")
        .map(str::to_string)
        .or_else(|| id.clone())
        .unwrap_or_default();

    let index = nodes.len();
    nodes.push(DocNode {
        id,
        name,
        sid: attr(element, "sid").map(str::to_string),
        is_joint: attr(element, "type") == Some("JOINT"),
        parent,
        ..DocNode::default()
    });

    let mut transforms = Vec::new();
    let mut instances = Vec::new();
    let mut node_instances = Vec::new();
    let mut child_ids = Vec::new();

    for element in child_elements(element) {
        let sid = attr(element, "sid").map(str::to_string);
        match element.name.as_str() {
            "translate" => transforms.push(Transform::new(
                sid,
                TransformKind::Translate(Vector3::from(parse_fixed::<3>(element)?)),
            )),
            "scale" => transforms.push(Transform::new(
                sid,
                TransformKind::Scale(Vector3::from(parse_fixed::<3>(element)?)),
            )),
            "rotate" => {
                let [x, y, z, angle] = parse_fixed::<4>(element)?;
                transforms.push(Transform::new(
                    sid,
                    TransformKind::Rotate {
                        axis: Vector3::new(x, y, z),
                        angle_degrees: angle,
                    },
                ));
            }
            "matrix" => {
                let values = parse_floats(element)?;
                if values.len() != 16 {
                    return Err(ColladaError::DocumentParse(format!(
                        "<matrix> expects 16 values, found {}",
                        values.len()
                    )));
                }
                transforms.push(Transform::new(
                    sid,
                    TransformKind::Matrix(matrix_from_row_major(&values)),
                ));
            }
            "lookat" => {
                let [ex, ey, ez, ix, iy, iz, ux, uy, uz] = parse_fixed::<9>(element)?;
                let view = Matrix4::look_at_rh(
                    &Point3::new(ex, ey, ez),
                    &Point3::new(ix, iy, iz),
                    &Vector3::new(ux, uy, uz),
                );
                let placement = view.try_inverse().unwrap_or_else(Matrix4::identity);
                transforms.push(Transform::new(sid, TransformKind::LookAt(placement)));
            }
            "skew" => warn!("node '{}': <skew> is not supported, ignored", nodes[index].name),
            "instance_geometry" | "instance_controller" | "instance_light" | "instance_camera" => {
                instances.push(parse_instance(element));
            }
            "instance_node" => {
                node_instances.push(url_id(attr(element, "url").unwrap_or_default()).to_string());
            }
            "node" => child_ids.push(parse_node(element, Some(index), nodes)?),
            _ => {}
        }
    }

    let node = &mut nodes[index];
    node.transforms = transforms;
    node.instances = instances;
    node.node_instances = node_instances;
    node.children = child_ids;
    Ok(index)
}

fn parse_instance(element: &Element) -> EntityInstance {
    let kind = match element.name.as_str() {
        "instance_geometry" => InstanceKind::Geometry,
        "instance_controller" => InstanceKind::Controller,
        "instance_light" => InstanceKind::Light,
        _ => InstanceKind::Camera,
    };
    let material_bindings = child(element, "bind_material")
        .and_then(|bind| child(bind, "technique_common"))
        .map(|technique| {
            children(technique, "instance_material")
                .map(|instance| MaterialBinding {
                    symbol: attr(instance, "symbol").unwrap_or_default().to_string(),
                    target: url_id(attr(instance, "target").unwrap_or_default()).to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    EntityInstance {
        kind,
        url: url_id(attr(element, "url").unwrap_or_default()).to_string(),
        skeletons: children(element, "skeleton")
            .map(|skeleton| url_id(&text(skeleton)).to_string())
            .collect(),
        material_bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_node_hierarchy_when_parsing_then_arena_links_parent_and_children() {
        let xml = r##"
          <node id="root" name="Root" type="JOINT" sid="j0">
            <translate sid="location">0 1 0</translate>
            <rotate sid="rotateZ">0 0 1 90</rotate>
            <node id="tip" sid="j1" type="JOINT"><matrix>1 0 0 2 0 1 0 0 0 0 1 0 0 0 0 1</matrix></node>
            <instance_node url="#prototype"/>
          </node>"##;
        let element = Element::parse(xml.as_bytes()).expect("xml");
        let mut nodes = Vec::new();

        let root = parse_node(&element, None, &mut nodes).expect("parse");

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[root].children, vec![1]);
        assert_eq!(nodes[1].parent, Some(root));
        assert!(nodes[root].is_joint);
        assert_eq!(nodes[root].node_instances, vec!["prototype"]);
        assert_eq!(nodes[root].transforms.len(), 2);
        assert!(matches!(
            nodes[1].transforms[0].kind,
            TransformKind::Matrix(m) if (m[(0, 3)] - 2.0).abs() < 1e-6
        ));
    }

    #[test]
    fn given_controller_instance_when_parsing_then_skeleton_and_bindings_are_kept() {
        let xml = r##"
          <instance_controller url="#skin0">
            <skeleton>#root</skeleton>
            <bind_material><technique_common>
              <instance_material symbol="mat0" target="#Skin-material"/>
            </technique_common></bind_material>
          </instance_controller>"##;
        let instance = parse_instance(&Element::parse(xml.as_bytes()).expect("xml"));

        assert_eq!(instance.kind, InstanceKind::Controller);
        assert_eq!(instance.skeletons, vec!["root"]);
        assert_eq!(instance.material_for("mat0"), Some("Skin-material"));
        assert_eq!(instance.material_for("other"), None);
    }
}

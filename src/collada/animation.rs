use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use xmltree::Element;

use super::geometry::{DataStream, parse_source, source_names};
use super::xml::{attr, children, url_id};
use crate::error::ColladaError;

pub type CurveId = usize;

/// Keys closer than this are treated as the same timestamp.
pub const KEY_TIME_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
    Bezier,
}

impl Interpolation {
    fn from_name(name: &str) -> Self {
        match name {
            "STEP" => Interpolation::Step,
            "BEZIER" => Interpolation::Bezier,
            _ => Interpolation::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveKey {
    pub input: f32,
    pub output: f32,
    pub interpolation: Interpolation,
    /// 2D control points `(time, value)`.
    pub in_tangent: Option<(f32, f32)>,
    pub out_tangent: Option<(f32, f32)>,
}

/// Scalar animation curve driving one component of one transform.
#[derive(Debug, Clone, Default)]
pub struct AnimationCurve {
    pub keys: Vec<CurveKey>,
}

impl AnimationCurve {
    pub fn key_times(&self) -> impl Iterator<Item = f32> + '_ {
        self.keys.iter().map(|key| key.input)
    }

    /// Value at `time`. Holds the first/last value outside the key range.
    pub fn evaluate(&self, time: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };
        if time <= first.input {
            return first.output;
        }
        if time >= last.input {
            return last.output;
        }

        let next = self.keys.partition_point(|key| key.input <= time);
        let k0 = &self.keys[next - 1];
        let k1 = &self.keys[next];
        let span = k1.input - k0.input;
        if span <= KEY_TIME_EPSILON {
            return k1.output;
        }

        match k0.interpolation {
            Interpolation::Step => k0.output,
            Interpolation::Linear => lerp(k0.output, k1.output, (time - k0.input) / span),
            Interpolation::Bezier => match (k0.out_tangent, k1.in_tangent) {
                (Some(c0), Some(c1)) => {
                    bezier_at_time((k0.input, k0.output), c0, c1, (k1.input, k1.output), time)
                }
                _ => lerp(k0.output, k1.output, (time - k0.input) / span),
            },
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn cubic(p0: f32, p1: f32, p2: f32, p3: f32, s: f32) -> f32 {
    let u = 1.0 - s;
    u * u * u * p0 + 3.0 * u * u * s * p1 + 3.0 * u * s * s * p2 + s * s * s * p3
}

/// Solves the curve parameter for `time` by bisection, then evaluates the value.
fn bezier_at_time(
    p0: (f32, f32),
    p1: (f32, f32),
    p2: (f32, f32),
    p3: (f32, f32),
    time: f32,
) -> f32 {
    let (mut low, mut high) = (0.0f32, 1.0f32);
    let mut s = 0.5;
    for _ in 0..32 {
        s = 0.5 * (low + high);
        let x = cubic(p0.0, p1.0, p2.0, p3.0, s);
        if (x - time).abs() <= KEY_TIME_EPSILON {
            break;
        }
        if x < time {
            low = s;
        } else {
            high = s;
        }
    }
    cubic(p0.1, p1.1, p2.1, p3.1, s)
}

/// Binds one curve to a transform component: `node_id/sid` plus a member
/// suffix such as `.X`, `.ANGLE` or `(1)(3)`.
#[derive(Debug, Clone)]
pub struct AnimationChannel {
    pub node_id: String,
    pub sid: String,
    pub suffix: String,
    pub curve: CurveId,
}

/// Named time range over a subset of the document's curves.
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub id: String,
    pub name: String,
    pub start: f32,
    pub end: Option<f32>,
    pub curves: HashSet<CurveId>,
}

impl AnimationClip {
    pub fn contains(&self, curve: CurveId) -> bool {
        self.curves.contains(&curve)
    }
}

/// Curves and channels gathered from `<library_animations>`.
#[derive(Debug, Default)]
pub(super) struct AnimationLibrary {
    pub curves: Vec<AnimationCurve>,
    pub channels: Vec<AnimationChannel>,
    /// Curves owned by each `<animation>` id, nested ones included.
    pub owners: HashMap<String, Vec<CurveId>>,
}

impl AnimationLibrary {
    pub fn parse_animation(&mut self, element: &Element) -> Result<(), ColladaError> {
        let first_curve = self.curves.len();

        let mut sources = HashMap::new();
        let mut name_sources = HashMap::new();
        for source in children(element, "source") {
            let id = attr(source, "id").unwrap_or_default().to_string();
            if let Some(names) = source_names(source) {
                name_sources.insert(id, names);
            } else if let Some(stream) = parse_source(source)? {
                sources.insert(id, stream);
            }
        }

        let mut samplers = HashMap::new();
        for sampler in children(element, "sampler") {
            let id = attr(sampler, "id").unwrap_or_default().to_string();
            let mut inputs = HashMap::<String, String>::new();
            for input in children(sampler, "input") {
                if let (Some(semantic), Some(source)) =
                    (attr(input, "semantic"), attr(input, "source"))
                {
                    inputs.insert(semantic.to_string(), url_id(source).to_string());
                }
            }
            samplers.insert(id, inputs);
        }

        for channel in children(element, "channel") {
            let source = url_id(attr(channel, "source").unwrap_or_default());
            let target = attr(channel, "target").unwrap_or_default();
            let Some(inputs) = samplers.get(source) else {
                warn!("animation channel '{}': sampler '{}' not found", target, source);
                continue;
            };
            let Some((node_id, sid, member)) = split_target(target) else {
                warn!("animation channel target '{}' is not a node transform", target);
                continue;
            };

            let stream = |semantic: &str| inputs.get(semantic).and_then(|id| sources.get(id));
            let (Some(input), Some(output)) = (stream("INPUT"), stream("OUTPUT")) else {
                warn!("animation channel '{}' has no INPUT/OUTPUT", target);
                continue;
            };
            let interpolations = inputs
                .get("INTERPOLATION")
                .and_then(|id| name_sources.get(id));
            let in_tangents = stream("IN_TANGENT");
            let out_tangents = stream("OUT_TANGENT");

            let dimension = output.stride;
            let suffixes = expand_member(member.as_deref(), dimension);
            if suffixes.len() != dimension {
                warn!(
                    "animation channel '{}': output stride {} does not fit the target",
                    target, dimension
                );
                continue;
            }

            for (component, suffix) in suffixes.into_iter().enumerate() {
                let keys = (0..input.values.len())
                    .filter_map(|i| {
                        let output_value = *output.values.get(i * dimension + component)?;
                        let interpolation = interpolations
                            .and_then(|names| names.get(i))
                            .map(|name| Interpolation::from_name(name))
                            .unwrap_or(Interpolation::Linear);
                        let tangent = |stream: Option<&DataStream>| {
                            stream.and_then(|stream| {
                                if stream.stride == dimension * 2 {
                                    let base = i * stream.stride + component * 2;
                                    Some((*stream.values.get(base)?, *stream.values.get(base + 1)?))
                                } else {
                                    None
                                }
                            })
                        };
                        Some(CurveKey {
                            input: input.values[i],
                            output: output_value,
                            interpolation,
                            in_tangent: tangent(in_tangents),
                            out_tangent: tangent(out_tangents),
                        })
                    })
                    .collect::<Vec<_>>();
                if keys.is_empty() {
                    continue;
                }

                let curve = self.curves.len();
                self.curves.push(AnimationCurve { keys });
                self.channels.push(AnimationChannel {
                    node_id: node_id.clone(),
                    sid: sid.clone(),
                    suffix,
                    curve,
                });
            }
        }

        for nested in children(element, "animation") {
            self.parse_animation(nested)?;
        }

        if let Some(id) = attr(element, "id") {
            let owned = (first_curve..self.curves.len()).collect::<Vec<_>>();
            debug!("animation '{}': {} curves", id, owned.len());
            self.owners.entry(id.to_string()).or_default().extend(owned);
        }
        Ok(())
    }
}

/// Splits `node/sid.member` or `node/sid(i)(j)` into its parts.
fn split_target(target: &str) -> Option<(String, String, Option<String>)> {
    let (node_id, rest) = target.split_once('/')?;
    let split = rest.find(['.', '(']).unwrap_or(rest.len());
    let (sid, member) = rest.split_at(split);
    if node_id.is_empty() || sid.is_empty() {
        return None;
    }
    let member = (!member.is_empty()).then(|| member.to_string());
    Some((node_id.to_string(), sid.to_string(), member))
}

/// Curve suffixes produced by a channel writing `dimension` values at `member`.
fn expand_member(member: Option<&str>, dimension: usize) -> Vec<String> {
    match member {
        None => match dimension {
            1 => vec![String::new()],
            3 => [".X", ".Y", ".Z"].map(str::to_string).to_vec(),
            4 => [".X", ".Y", ".Z", ".ANGLE"].map(str::to_string).to_vec(),
            16 => (0..16).map(|i| format!("({})({})", i / 4, i % 4)).collect(),
            _ => Vec::new(),
        },
        Some(member) if member.starts_with('(') => {
            let indices = member
                .split(['(', ')'])
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>();
            match indices.as_slice() {
                [single] if dimension == 1 => match *single {
                    "0" => vec![".X".to_string()],
                    "1" => vec![".Y".to_string()],
                    "2" => vec![".Z".to_string()],
                    "3" => vec![".ANGLE".to_string()],
                    _ => Vec::new(),
                },
                [_, _] if dimension == 1 => vec![member.to_string()],
                _ => Vec::new(),
            }
        }
        Some(member) if dimension == 1 => vec![member.to_uppercase()],
        Some(_) => Vec::new(),
    }
}

pub(super) fn parse_clip(
    element: &Element,
    owners: &HashMap<String, Vec<CurveId>>,
) -> AnimationClip {
    let id = attr(element, "id").unwrap_or_default().to_string();
    let name = attr(element, "name").unwrap_or(&id).to_string();
    let time = |name: &str| attr(element, name).and_then(|value| value.parse::<f32>().ok());

    let mut curves = HashSet::new();
    for instance in children(element, "instance_animation") {
        let url = url_id(attr(instance, "url").unwrap_or_default());
        match owners.get(url) {
            Some(owned) => curves.extend(owned.iter().copied()),
            None => warn!("animation clip '{}': animation '{}' not found", id, url),
        }
    }

    AnimationClip {
        id,
        name,
        start: time("start").unwrap_or(0.0),
        end: time("end"),
        curves,
    }
}

pub(super) fn library_clips(
    library: Option<&Element>,
    owners: &HashMap<String, Vec<CurveId>>,
) -> Vec<AnimationClip> {
    library
        .map(|library| {
            children(library, "animation_clip")
                .map(|clip| parse_clip(clip, owners))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(input: f32, output: f32, interpolation: Interpolation) -> CurveKey {
        CurveKey {
            input,
            output,
            interpolation,
            in_tangent: None,
            out_tangent: None,
        }
    }

    #[test]
    fn given_linear_curve_when_evaluating_then_values_interpolate_and_hold_ends() {
        let curve = AnimationCurve {
            keys: vec![key(0.0, 0.0, Interpolation::Linear), key(1.0, 10.0, Interpolation::Linear)],
        };
        assert!((curve.evaluate(0.25) - 2.5).abs() < 1e-5);
        assert!((curve.evaluate(-1.0) - 0.0).abs() < 1e-6);
        assert!((curve.evaluate(5.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn given_step_curve_when_evaluating_between_keys_then_previous_value_holds() {
        let curve = AnimationCurve {
            keys: vec![key(0.0, 1.0, Interpolation::Step), key(1.0, 3.0, Interpolation::Step)],
        };
        assert!((curve.evaluate(0.99) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn given_bezier_with_linear_tangents_when_evaluating_then_matches_linear() {
        let mut k0 = key(0.0, 0.0, Interpolation::Bezier);
        k0.out_tangent = Some((1.0 / 3.0, 1.0 / 3.0));
        let mut k1 = key(1.0, 1.0, Interpolation::Bezier);
        k1.in_tangent = Some((2.0 / 3.0, 2.0 / 3.0));
        let curve = AnimationCurve { keys: vec![k0, k1] };

        assert!((curve.evaluate(0.3) - 0.3).abs() < 1e-4);
    }

    #[test]
    fn given_targets_when_splitting_then_sid_and_member_are_separated() {
        assert_eq!(
            split_target("arm/rotateZ.ANGLE"),
            Some(("arm".to_string(), "rotateZ".to_string(), Some(".ANGLE".to_string())))
        );
        assert_eq!(
            split_target("arm/transform(0)(3)"),
            Some(("arm".to_string(), "transform".to_string(), Some("(0)(3)".to_string())))
        );
        assert_eq!(split_target("arm"), None);
    }

    #[test]
    fn given_full_value_targets_when_expanding_then_suffixes_follow_stride() {
        assert_eq!(expand_member(None, 3), vec![".X", ".Y", ".Z"]);
        assert_eq!(expand_member(None, 16)[7], "(1)(3)");
        assert_eq!(expand_member(Some(".angle"), 1), vec![".ANGLE"]);
        assert_eq!(expand_member(Some("(2)"), 1), vec![".Z"]);
        assert!(expand_member(Some(".X"), 3).is_empty());
    }

    #[test]
    fn given_nested_animation_when_parsing_then_outer_id_owns_inner_curves() {
        let xml = r##"
          <animation id="walk">
            <animation id="walk-arm">
              <source id="t"><float_array count="2">0 1</float_array></source>
              <source id="v"><float_array count="2">0 90</float_array></source>
              <sampler id="s">
                <input semantic="INPUT" source="#t"/>
                <input semantic="OUTPUT" source="#v"/>
              </sampler>
              <channel source="#s" target="arm/rotateZ.ANGLE"/>
            </animation>
          </animation>"##;
        let element = Element::parse(xml.as_bytes()).expect("xml");
        let mut library = AnimationLibrary::default();

        library.parse_animation(&element).expect("parse");

        assert_eq!(library.curves.len(), 1);
        assert_eq!(library.channels[0].suffix, ".ANGLE");
        assert_eq!(library.owners.get("walk"), Some(&vec![0]));
        assert_eq!(library.owners.get("walk-arm"), Some(&vec![0]));
    }
}

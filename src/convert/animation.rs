use log::{debug, info};
use nalgebra::{UnitQuaternion, Vector3};

use super::scene::{ColladaScene, NodeId};
use crate::collada::{AnimationClip, ColladaDocument, DocNodeId, KEY_TIME_EPSILON, TransformKind};
use crate::transform::{decompose, renormalize};

/// Baked translation/rotation/scale keys of one scene node.
#[derive(Debug, Clone)]
pub struct AnimationTrack {
    pub node: NodeId,
    pub uid: String,
    pub name: String,
    pub translations: Vec<(f32, Vector3<f32>)>,
    pub rotations: Vec<(f32, UnitQuaternion<f32>)>,
    pub scales: Vec<(f32, Vector3<f32>)>,
}

impl AnimationTrack {
    pub fn key_count(&self) -> usize {
        self.translations.len() + self.rotations.len() + self.scales.len()
    }
}

/// One clip of the document, baked per node.
#[derive(Debug, Clone)]
pub struct SceneAnimation {
    pub name: String,
    /// Seconds; keys are relative to the clip start.
    pub duration: f32,
    pub tracks: Vec<AnimationTrack>,
}

/// Handle to a track inside `ColladaScene::animations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub animation: usize,
    pub track: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Translation,
    Rotation,
    Scale,
}

/// Bakes every clip of `document` into per-node tracks.
///
/// Nodes are exported when they are joints or carry a curve of the clip.
/// `scene` must hold rest-pose world transforms.
pub fn extract_animations(scene: &ColladaScene, document: &ColladaDocument) -> Vec<SceneAnimation> {
    document
        .clips
        .iter()
        .map(|clip| extract_clip(scene, document, clip))
        .collect()
}

fn extract_clip(
    scene: &ColladaScene,
    document: &ColladaDocument,
    clip: &AnimationClip,
) -> SceneAnimation {
    let mut tracks = Vec::new();
    for (id, node) in scene.nodes.iter().enumerate() {
        let Some(source) = node.source else {
            continue;
        };
        if !node.is_joint && !document.is_animated(source, clip) {
            continue;
        }
        tracks.push(export_node_animation(scene, document, clip, id, source));
    }

    let last_key = tracks
        .iter()
        .flat_map(|track| {
            track
                .translations
                .iter()
                .map(|(time, _)| *time)
                .chain(track.rotations.iter().map(|(time, _)| *time))
                .chain(track.scales.iter().map(|(time, _)| *time))
        })
        .fold(0.0, f32::max);
    let duration = clip.end.map_or(last_key, |end| (end - clip.start).max(0.0));

    info!(
        "animation '{}': {} tracks, {:.3}s",
        clip.name,
        tracks.len(),
        duration
    );
    SceneAnimation {
        name: clip.name.clone(),
        duration,
        tracks,
    }
}

fn export_node_animation(
    scene: &ColladaScene,
    document: &ColladaDocument,
    clip: &AnimationClip,
    id: NodeId,
    source: DocNodeId,
) -> AnimationTrack {
    let node = &scene.nodes[id];
    // A skeleton root directly below a non-joint node carries its parent's
    // rest transform so the track does not depend on the ancestor chain.
    let baked_parent = node
        .parent
        .filter(|&parent| node.is_joint && !scene.nodes[parent].is_joint)
        .map(|parent| scene.nodes[parent].world);

    let sample = |time: f32| {
        let local = document.evaluate_transform(source, time, Some(clip));
        let pose = match &baked_parent {
            Some(parent) => parent * local,
            None => local,
        };
        decompose(&pose)
    };

    let relative = |time: f32| time - clip.start;
    let translations = key_times(document, clip, source, Channel::Translation)
        .into_iter()
        .map(|time| (relative(time), sample(time).0))
        .collect::<Vec<_>>();
    let mut rotations = key_times(document, clip, source, Channel::Rotation)
        .into_iter()
        .map(|time| (relative(time), renormalize(sample(time).1)))
        .collect::<Vec<_>>();
    let scales = key_times(document, clip, source, Channel::Scale)
        .into_iter()
        .map(|time| (relative(time), sample(time).2))
        .collect::<Vec<_>>();

    // Keep consecutive keys in one hemisphere so slerp takes the short arc.
    for i in 1..rotations.len() {
        let previous = rotations[i - 1].1;
        if previous.coords.dot(&rotations[i].1.coords) < 0.0 {
            rotations[i].1 = UnitQuaternion::new_unchecked(-rotations[i].1.into_inner());
        }
    }

    debug!(
        "node '{}': {} translation, {} rotation, {} scale keys",
        node.name,
        translations.len(),
        rotations.len(),
        scales.len()
    );
    AnimationTrack {
        node: id,
        uid: node.dae_id.clone().unwrap_or_else(|| node.name.clone()),
        name: node.name.clone(),
        translations,
        rotations,
        scales,
    }
}

/// Union of key times feeding `channel`.
///
/// A matrix feeds all three channels. Unanimated transforms contribute a key
/// at zero; a channel without transforms gets a single key at zero.
fn key_times(
    document: &ColladaDocument,
    clip: &AnimationClip,
    source: DocNodeId,
    channel: Channel,
) -> Vec<f32> {
    let mut times = Vec::new();
    for transform in &document.node(source).transforms {
        let feeds = match (&transform.kind, channel) {
            (TransformKind::Matrix(_) | TransformKind::LookAt(_), _) => true,
            (TransformKind::Translate(_), Channel::Translation) => true,
            (TransformKind::Rotate { .. }, Channel::Rotation) => true,
            (TransformKind::Scale(_), Channel::Scale) => true,
            _ => false,
        };
        if !feeds {
            continue;
        }
        let before = times.len();
        for curve in transform.animated_curves(clip) {
            if let Some(curve) = document.curves.get(curve) {
                times.extend(curve.key_times());
            }
        }
        if times.len() == before {
            times.push(0.0);
        }
    }

    times.retain(|&time| {
        time + KEY_TIME_EPSILON >= clip.start
            && clip.end.is_none_or(|end| time <= end + KEY_TIME_EPSILON)
    });
    times.sort_by(f32::total_cmp);
    times.dedup_by(|a, b| (*a - *b).abs() <= KEY_TIME_EPSILON);
    if times.is_empty() {
        times.push(clip.start);
    }
    times
}

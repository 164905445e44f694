use std::{fs, path::Path};

use byteorder::{LittleEndian, WriteBytesExt};
use log::info;

use super::animation::{AnimationTrack, SceneAnimation};
use super::native::NativeScene;
use crate::error::ColladaError;

const ANIMATION_FILE_SIGNATURE: u32 = u32::from_le_bytes(*b"ANIM");
const ANIMATION_FILE_VERSION: u32 = 1;
const TRACK_SIGNATURE: u32 = u32::from_le_bytes(*b"TRCK");
const CHANNEL_SIGNATURE: u32 = u32::from_le_bytes(*b"CHNL");

const TARGET_POSITION: u8 = 0;
const TARGET_ORIENTATION: u8 = 1;
const TARGET_SCALE: u8 = 2;

const INTERPOLATION_LINEAR: u8 = 0;
const INTERPOLATION_SPHERICAL_LINEAR: u8 = 1;

fn write_error(path: &Path, message: impl ToString) -> ColladaError {
    ColladaError::Write {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Writes the native scene as pretty JSON.
pub fn write_scene(path: &Path, scene: &NativeScene) -> Result<(), ColladaError> {
    let content = serde_json::to_string_pretty(scene).map_err(|err| write_error(path, err))?;
    fs::write(path, content).map_err(|err| write_error(path, err))?;
    info!("wrote scene {}", path.display());
    Ok(())
}

/// Writes one clip in the binary animation format.
pub fn write_animation(path: &Path, animation: &SceneAnimation) -> Result<(), ColladaError> {
    let data = encode_animation_data(animation).map_err(|err| write_error(path, err))?;

    let mut file = Vec::with_capacity(16 + data.len());
    let header = [
        ANIMATION_FILE_SIGNATURE,
        ANIMATION_FILE_VERSION,
        crc32fast::hash(&data),
        data.len() as u32,
    ];
    for value in header {
        file.write_u32::<LittleEndian>(value)
            .map_err(|err| write_error(path, err))?;
    }
    file.extend_from_slice(&data);

    fs::write(path, file).map_err(|err| write_error(path, err))?;
    info!(
        "wrote animation '{}' ({} tracks, {} keys) to {}",
        animation.name,
        animation.tracks.len(),
        animation.tracks.iter().map(AnimationTrack::key_count).sum::<usize>(),
        path.display()
    );
    Ok(())
}

/// Data block of an animation file: everything after the header.
pub fn encode_animation_data(animation: &SceneAnimation) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.write_f32::<LittleEndian>(animation.duration)?;
    buffer.write_u32::<LittleEndian>(animation.tracks.len() as u32)?;

    for track in &animation.tracks {
        write_string(&mut buffer, &track.uid)?;
        write_string(&mut buffer, &track.name)?;
        buffer.write_u32::<LittleEndian>(TRACK_SIGNATURE)?;
        write_track(&mut buffer, track)?;
    }

    // Markers are not produced.
    buffer.write_u32::<LittleEndian>(0)?;
    Ok(buffer)
}

fn write_track(buffer: &mut Vec<u8>, track: &AnimationTrack) -> std::io::Result<()> {
    let channel_count = [
        track.translations.is_empty(),
        track.rotations.is_empty(),
        track.scales.is_empty(),
    ]
    .iter()
    .filter(|empty| !**empty)
    .count();
    buffer.write_u32::<LittleEndian>(channel_count as u32)?;

    if !track.translations.is_empty() {
        write_channel_header(
            buffer,
            TARGET_POSITION,
            3,
            INTERPOLATION_LINEAR,
            track.translations.len(),
        )?;
        for (time, value) in &track.translations {
            buffer.write_f32::<LittleEndian>(*time)?;
            for component in value.iter() {
                buffer.write_f32::<LittleEndian>(*component)?;
            }
        }
    }
    if !track.rotations.is_empty() {
        write_channel_header(
            buffer,
            TARGET_ORIENTATION,
            4,
            INTERPOLATION_SPHERICAL_LINEAR,
            track.rotations.len(),
        )?;
        for (time, value) in &track.rotations {
            buffer.write_f32::<LittleEndian>(*time)?;
            let q = value.quaternion();
            for component in [q.i, q.j, q.k, q.w] {
                buffer.write_f32::<LittleEndian>(component)?;
            }
        }
    }
    if !track.scales.is_empty() {
        write_channel_header(buffer, TARGET_SCALE, 1, INTERPOLATION_LINEAR, track.scales.len())?;
        for (time, value) in &track.scales {
            buffer.write_f32::<LittleEndian>(*time)?;
            buffer.write_f32::<LittleEndian>(value.x)?;
        }
    }
    Ok(())
}

fn write_channel_header(
    buffer: &mut Vec<u8>,
    target: u8,
    dimension: u8,
    interpolation: u8,
    key_count: usize,
) -> std::io::Result<()> {
    buffer.write_u8(target)?;
    buffer.extend_from_slice(&[0; 3]);
    buffer.write_u32::<LittleEndian>(CHANNEL_SIGNATURE)?;
    buffer.write_u8(dimension)?;
    buffer.write_u8(interpolation)?;
    // Compression: none.
    buffer.write_u16::<LittleEndian>(0)?;
    buffer.write_u32::<LittleEndian>(key_count as u32)?;
    Ok(())
}

/// NUL-terminated, zero-padded to 4-byte alignment.
fn write_string(buffer: &mut Vec<u8>, value: &str) -> std::io::Result<()> {
    buffer.extend_from_slice(value.as_bytes());
    buffer.write_u8(0)?;
    let written = value.len() + 1;
    buffer.resize(buffer.len() + (4 - written % 4) % 4, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use byteorder::ReadBytesExt;
    use nalgebra::{UnitQuaternion, Vector3};

    use super::*;

    fn spin() -> SceneAnimation {
        SceneAnimation {
            name: "spin".to_string(),
            duration: 1.0,
            tracks: vec![AnimationTrack {
                node: 1,
                uid: "box".to_string(),
                name: "Box".to_string(),
                translations: vec![(0.0, Vector3::new(1.0, 2.0, 3.0))],
                rotations: vec![
                    (0.0, UnitQuaternion::identity()),
                    (1.0, UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.0)),
                ],
                scales: Vec::new(),
            }],
        }
    }

    #[test]
    fn given_track_when_encoding_then_strings_are_padded_and_empty_channels_omitted() {
        let data = encode_animation_data(&spin()).expect("encode");
        let mut cursor = std::io::Cursor::new(&data);

        assert_eq!(cursor.read_f32::<LittleEndian>().expect("duration"), 1.0);
        assert_eq!(cursor.read_u32::<LittleEndian>().expect("node count"), 1);
        // "box\0" needs no padding, "Box\0" neither.
        assert_eq!(&data[8..12], b"box\0");
        assert_eq!(&data[12..16], b"Box\0");
        cursor.set_position(16);
        assert_eq!(cursor.read_u32::<LittleEndian>().expect("track"), TRACK_SIGNATURE);
        assert_eq!(cursor.read_u32::<LittleEndian>().expect("channels"), 2);
        assert_eq!(cursor.read_u8().expect("target"), TARGET_POSITION);

        // header + 1 position key (16 bytes) + header + 2 rotation keys (20 bytes each) + markers
        let expected = 24 + 16 + 16 + 16 + 2 * 20 + 4;
        assert_eq!(data.len(), expected);
    }

    #[test]
    fn given_odd_length_name_when_writing_string_then_buffer_stays_aligned() {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "hips").expect("write");
        assert_eq!(buffer.len(), 8);
        write_string(&mut buffer, "ab").expect("write");
        assert_eq!(buffer.len(), 12);
    }

    #[test]
    fn given_animation_when_writing_file_then_header_carries_crc_of_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spin.anim");

        write_animation(&path, &spin()).expect("write");

        let bytes = fs::read(&path).expect("read");
        assert_eq!(&bytes[0..4], b"ANIM");
        let mut header = std::io::Cursor::new(&bytes[4..16]);
        assert_eq!(header.read_u32::<LittleEndian>().expect("version"), 1);
        assert_eq!(header.read_u32::<LittleEndian>().expect("crc"), crc32fast::hash(&bytes[16..]));
        assert_eq!(header.read_u32::<LittleEndian>().expect("size") as usize, bytes.len() - 16);
    }

    #[test]
    fn given_missing_directory_when_writing_then_write_error_names_path() {
        let path = Path::new("no/such/dir/spin.anim");
        let error = write_animation(path, &spin()).expect_err("missing dir");
        assert!(matches!(error, ColladaError::Write { .. }));
        assert!(error.to_string().contains("spin.anim"));
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Native texture descriptor created for every image referenced by a document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextureDescriptor {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// `false` when the image could not be read; the descriptor is still kept
    /// so materials referencing it stay consistent.
    pub valid: bool,
}

/// Read the header of an image file and create its descriptor.
pub fn create_texture_descriptor(path: &Path) -> Result<TextureDescriptor> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("failed to read texture: {}", path.display()))?;

    Ok(TextureDescriptor {
        path: path.to_path_buf(),
        width,
        height,
        valid: true,
    })
}

/// Descriptor for an image that could not be read.
pub fn invalid_texture_descriptor(path: &Path) -> TextureDescriptor {
    TextureDescriptor {
        path: path.to_path_buf(),
        width: 0,
        height: 0,
        valid: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn given_png_on_disk_when_creating_descriptor_then_dimensions_are_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("diffuse.png");
        RgbaImage::new(64, 32).save(&path).expect("write png");

        let descriptor = create_texture_descriptor(&path).expect("descriptor");

        assert_eq!((descriptor.width, descriptor.height), (64, 32));
        assert!(descriptor.valid);
    }

    #[test]
    fn given_missing_file_when_creating_descriptor_then_error_names_path() {
        let path = Path::new("does/not/exist.png");
        let error = create_texture_descriptor(path).expect_err("missing file");
        assert!(error.to_string().contains("exist.png"));
        assert!(!invalid_texture_descriptor(path).valid);
    }
}

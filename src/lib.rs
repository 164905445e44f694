//! Offline Collada (DAE) to native scene and animation converter.

pub mod collada;
pub mod convert;
pub mod error;
pub mod settings;
pub mod texture;
pub mod transform;

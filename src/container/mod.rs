//! Structured binary container for checkpoint frames.
//!
//! A container file holds named groups; each group carries small typed
//! attributes and rectangular datasets. Dataset payloads are stored as one
//! chunk covering the full extent and may be LZ4 compressed.

mod file;
mod format;

pub use file::{Attribute, ContainerFile, Dataset, Group};
pub use format::{
    CONTAINER_MAGIC, CONTAINER_VERSION, CompressionType, ElementType, decode_bool, decode_f32,
    decode_i32, encode_bool, encode_f32, encode_i32,
};

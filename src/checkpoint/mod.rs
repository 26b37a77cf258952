//! Checkpoint module - Frame persistence and its metadata mirror.
//!
//! [`FrameSequencer`] is the entry point: it numbers frames, writes each one
//! through [`FrameCodec`] and describes it with [`MirrorWriter`].

mod codec;
mod mirror;
pub mod naming;
mod sequencer;

pub use codec::{FrameCodec, HEADER_GROUP, OpenMode};
pub use mirror::{MirrorCursor, MirrorWriter, check_field_names};
pub use sequencer::FrameSequencer;

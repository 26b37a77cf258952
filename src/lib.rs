//! Particle frames - Checkpoint persistence for particle simulations.
//!
//! This crate saves and restores the registered arrays of a particle
//! simulation as a numbered sequence of binary frames, and keeps an XDMF
//! mirror of every frame so visualization tools can read the binary layout.
//!
//! # Architecture
//!
//! - `schema`: Field registry, particle categories and configuration
//! - `container`: Structured binary container (groups, attributes, datasets)
//! - `checkpoint`: Frame codec, XDMF mirror, file naming and the sequencer
//!
//! # Example
//!
//! ```rust,no_run
//! use particle_frames::{
//!     checkpoint::FrameSequencer,
//!     schema::{Centering, CheckpointConfig, FieldBuffer, FieldData, FieldRegistry, ParticleCategory},
//! };
//!
//! let masses = FieldBuffer::new(vec![2.0f32; 10]);
//!
//! let mut registry = FieldRegistry::new();
//! registry.set_category_count(ParticleCategory::Gas, 10)?;
//! registry.register(
//!     ParticleCategory::Gas,
//!     Centering::Node,
//!     "Masses",
//!     FieldData::Float1D(masses.clone()),
//! );
//!
//! let mut frames = FrameSequencer::new(registry, CheckpointConfig::default())?;
//! frames.open_session("./data/run")?;
//! frames.save_frame(0.0)?;
//! frames.close_session()?;
//!
//! frames.open_session("./data/run")?;
//! while frames.load_frame()? {
//!     println!("t = {}: {:?}", frames.frame_time(), masses.to_vec());
//! }
//! # Ok::<(), particle_frames::CheckpointError>(())
//! ```

pub mod checkpoint;
pub mod container;
pub mod error;
pub mod schema;

// Re-export commonly used types
pub use checkpoint::{FrameCodec, FrameSequencer, MirrorWriter, OpenMode};
pub use error::{CheckpointError, Result};
pub use schema::{
    Centering, CheckpointConfig, FieldBuffer, FieldData, FieldRegistry, ParticleCategory,
};

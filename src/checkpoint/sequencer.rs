//! Frame sequencer: numbered save/load over a checkpoint session.

use std::path::Path;

use log::{debug, info, warn};

use super::codec::{FrameCodec, OpenMode};
use super::mirror::{MirrorWriter, check_field_names};
use super::naming::{base_name, frame_file_name, with_suffix};
use crate::error::{CheckpointError, Result};
use crate::schema::{CheckpointConfig, FieldRegistry};

/// Saves and loads numbered frames of one registry.
///
/// Frame `k` of a session with base `run` lives in `run_000k.<binary>`, with
/// an optional standalone mirror `run_000k.<mirror>`; every saved frame is
/// also appended to the session's collection `run.<mirror>`.
///
/// Usage:
/// ```ignore
/// let mut frames = FrameSequencer::new(registry, CheckpointConfig::default())?;
/// frames.open_session("out/disk")?;
/// for step in 0..steps {
///     advance(&mut particles);
///     frames.save_frame(step as f32 * dt)?;
/// }
/// frames.close_session()?;
/// ```
#[derive(Debug)]
pub struct FrameSequencer {
    registry: FieldRegistry,
    config: CheckpointConfig,
    codec: FrameCodec,
    collection: Option<MirrorWriter>,
    base: Option<String>,
    frame_counter: u32,
    frame_time: f32,
    end_of_file: bool,
}

impl FrameSequencer {
    pub fn new(registry: FieldRegistry, config: CheckpointConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codec: FrameCodec::from_config(&config),
            registry,
            config,
            collection: None,
            base: None,
            frame_counter: 0,
            frame_time: 0.0,
            end_of_file: false,
        })
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Base name of the open session.
    pub fn base_name(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Number of the last frame saved or loaded (0 before the first).
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Time of the last frame saved or loaded.
    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    /// Set once [`load_frame`](Self::load_frame) finds no next frame.
    pub fn end_of_file(&self) -> bool {
        self.end_of_file
    }

    /// Start a session on the base name of `path`.
    ///
    /// Any open session is closed first. The frame counter restarts at zero.
    pub fn open_session(&mut self, path: &str) -> Result<()> {
        self.close_session()?;
        let base = base_name(path)?;
        info!("Opened checkpoint session {base}");
        self.base = Some(base);
        self.frame_counter = 0;
        self.frame_time = 0.0;
        self.end_of_file = false;
        Ok(())
    }

    /// Continue a save session after `completed_frames` frames.
    ///
    /// The collection document keeps its first `completed_frames` frame blocks
    /// and later saves are appended to it. The next save writes frame
    /// `completed_frames + 1`.
    pub fn resume_session(&mut self, path: &str, completed_frames: u32) -> Result<()> {
        self.open_session(path)?;
        if self.config.temporal_collection {
            let collection_path = self.collection_path()?;
            let mut collection = MirrorWriter::resume(&collection_path, completed_frames as usize)?;
            collection.set_emit_terminator(self.config.emit_collection_terminator);
            self.collection = Some(collection);
        }
        self.frame_counter = completed_frames;
        info!("Resumed checkpoint session after frame {completed_frames}");
        Ok(())
    }

    /// Close the codec and the collection document.
    pub fn close_session(&mut self) -> Result<()> {
        let codec_result = self.codec.close();
        let collection_result = match self.collection.take() {
            Some(mut collection) => collection.close(),
            None => Ok(()),
        };
        if let Some(base) = self.base.take() {
            info!(
                "Closed checkpoint session {base} after {} frames",
                self.frame_counter
            );
        }
        codec_result.and(collection_result)
    }

    /// Write the registry as the next frame.
    ///
    /// Field names that cannot be mirrored fail with `InvalidName` before any
    /// file is written.
    pub fn save_frame(&mut self, time: f32) -> Result<()> {
        let base = self.session_base()?.to_string();
        if self.config.standalone_mirror || self.config.temporal_collection {
            check_field_names(&self.registry)?;
        }
        self.frame_counter += 1;
        let binary = frame_file_name(&base, self.frame_counter, &self.config.binary_suffix);

        self.codec.open(&binary, OpenMode::Create)?;
        let written = self.codec.write_frame(&self.registry, time);
        let closed = self.codec.close();
        written.and(closed)?;

        if self.config.standalone_mirror {
            let path = frame_file_name(&base, self.frame_counter, &self.config.mirror_suffix);
            let mut mirror = MirrorWriter::create(&path)?;
            mirror.write_frame(&self.registry, &binary, time)?;
            mirror.close()?;
        }

        if self.config.temporal_collection {
            if self.collection.is_none() {
                let mut collection = MirrorWriter::create(self.collection_path()?)?;
                collection.set_emit_terminator(self.config.emit_collection_terminator);
                self.collection = Some(collection);
            }
            if let Some(collection) = self.collection.as_mut() {
                collection.write_frame(&self.registry, &binary, time)?;
            }
        }

        self.frame_time = time;
        debug!("Saved frame {} (t={time})", self.frame_counter);
        Ok(())
    }

    /// Read the next frame into the registered arrays.
    ///
    /// Returns `false` and sets end-of-file when the next frame file does not
    /// exist; further calls do nothing until a session is reopened.
    pub fn load_frame(&mut self) -> Result<bool> {
        let base = self.session_base()?.to_string();
        if self.end_of_file {
            return Ok(false);
        }
        self.frame_counter += 1;
        let binary = frame_file_name(&base, self.frame_counter, &self.config.binary_suffix);

        if !Path::new(&binary).exists() {
            debug!("No frame {}, end of sequence", self.frame_counter);
            self.end_of_file = true;
            return Ok(false);
        }

        self.codec.open(&binary, OpenMode::ReadWrite)?;
        let read = self.codec.read_frame(&self.registry);
        let time = self.codec.frame_time();
        let closed = self.codec.close();
        read.and(closed)?;

        self.frame_time = time;
        self.end_of_file = false;
        debug!("Loaded frame {} (t={time})", self.frame_counter);
        Ok(true)
    }

    fn session_base(&self) -> Result<&str> {
        self.base.as_deref().ok_or_else(|| {
            CheckpointError::InvalidArgument("no checkpoint session is open".to_string())
        })
    }

    fn collection_path(&self) -> Result<String> {
        with_suffix(self.session_base()?, &self.config.mirror_suffix)
    }
}

impl Drop for FrameSequencer {
    fn drop(&mut self) {
        if let Err(e) = self.close_session() {
            warn!("Failed to close checkpoint session: {e}");
        }
    }
}

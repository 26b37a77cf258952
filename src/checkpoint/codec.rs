//! Binary frame codec: one registry snapshot per container file.

use std::path::Path;

use log::{debug, warn};
use rayon::prelude::*;

use super::naming::with_suffix;
use crate::container::{
    Attribute, CompressionType, ContainerFile, Dataset, ElementType, Group, decode_bool,
    decode_f32, decode_i32, encode_bool, encode_f32, encode_i32,
};
use crate::error::{CheckpointError, Result};
use crate::schema::{
    CATEGORY_COUNT, CheckpointConfig, FieldBuffer, FieldData, FieldDescriptor, FieldRegistry,
    ParticleCategory,
};

/// Name of the group holding per-frame metadata.
pub const HEADER_GROUP: &str = "Header";

/// How [`FrameCodec::open`] treats the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new container, truncating any existing file.
    Create,
    /// Open an existing container.
    ReadWrite,
}

/// Encoded dataset waiting for compression.
struct PendingDataset {
    group: String,
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
    raw: Vec<u8>,
}

/// Decoded values paired with the array they will be copied into.
enum Staged {
    Boolean(FieldBuffer<bool>, Vec<bool>),
    Integer(FieldBuffer<i32>, Vec<i32>),
    Float(FieldBuffer<f32>, Vec<f32>),
    Vector(FieldBuffer<[f32; 3]>, Vec<[f32; 3]>),
}

impl Staged {
    fn commit(self) {
        match self {
            Staged::Boolean(buf, values) => copy_into(&mut buf.borrow_mut(), &values),
            Staged::Integer(buf, values) => copy_into(&mut buf.borrow_mut(), &values),
            Staged::Float(buf, values) => copy_into(&mut buf.borrow_mut(), &values),
            Staged::Vector(buf, values) => copy_into(&mut buf.borrow_mut(), &values),
        }
    }
}

/// Reads and writes registry snapshots as container files.
///
/// The codec holds at most one open container. `close` is always safe to call
/// and resets the frame time.
#[derive(Debug)]
pub struct FrameCodec {
    binary_suffix: String,
    compression: CompressionType,
    file: Option<ContainerFile>,
    time: f32,
    end_of_file: bool,
}

impl FrameCodec {
    pub fn new(binary_suffix: impl Into<String>, compression: CompressionType) -> Self {
        Self {
            binary_suffix: binary_suffix.into(),
            compression,
            file: None,
            time: 0.0,
            end_of_file: false,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(config.binary_suffix.clone(), config.compression)
    }

    /// Open `path` with the binary suffix re-applied.
    ///
    /// Any container already open is closed first.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<()> {
        self.close()?;
        let file_name = with_suffix(path, &self.binary_suffix)?;
        let file = match mode {
            OpenMode::Create => ContainerFile::create(&file_name),
            OpenMode::ReadWrite => ContainerFile::open(&file_name),
        }
        .map_err(|e| CheckpointError::io(&file_name, e))?;

        debug!("Opened {file_name} ({mode:?})");
        self.file = Some(file);
        self.time = 0.0;
        self.end_of_file = false;
        Ok(())
    }

    /// Persist and release the container.
    pub fn close(&mut self) -> Result<()> {
        self.time = 0.0;
        self.end_of_file = true;
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let path = file.path().to_path_buf();
        file.close().map_err(|e| CheckpointError::io(&path, e))?;
        debug!("Closed {}", path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the open container.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Time of the last frame written or read.
    pub fn frame_time(&self) -> f32 {
        self.time
    }

    pub fn end_of_file(&self) -> bool {
        self.end_of_file
    }

    /// Write the header and one group per populated category.
    ///
    /// Does nothing when no container is open.
    pub fn write_frame(&mut self, registry: &FieldRegistry, time: f32) -> Result<()> {
        if self.end_of_file {
            return Ok(());
        }
        let compression = self.compression;
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let path = file.path().to_path_buf();

        let pending = encode_registry(registry)?;
        let datasets = pending
            .into_par_iter()
            .map(|p| {
                Dataset::new(p.element_type, p.shape, compression, &p.raw)
                    .map(|dataset| (p.group, p.name, dataset))
            })
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| CheckpointError::io(&path, e))?;

        write_header(file.create_group(HEADER_GROUP), &registry.counts(), time);
        let dataset_count = datasets.len();
        for (group, name, dataset) in datasets {
            file.create_group(&group).write_dataset(&name, dataset);
        }

        self.time = time;
        debug!(
            "Wrote frame t={time} with {dataset_count} datasets to {}",
            path.display()
        );
        Ok(())
    }

    /// Read the open container into the registered arrays.
    ///
    /// Every dataset is decoded before any array is touched, so a failed read
    /// leaves the caller's data as it was. Arrays shorter than their category
    /// count are grown.
    pub fn read_frame(&mut self, registry: &FieldRegistry) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let path = file.path().to_path_buf();

        let header = file.group(HEADER_GROUP).ok_or_else(|| {
            CheckpointError::InconsistentCheckpoint(format!(
                "{} has no {HEADER_GROUP} group",
                path.display()
            ))
        })?;
        let time = read_header(header, &registry.counts(), &path)?;

        let mut staged = Vec::with_capacity(registry.len());
        for category in registry.populated_categories() {
            let count = registry.category_count(category);
            let group = file.group(&category.group_name());
            for field in registry.fields_in(category) {
                let Some(dataset) = group.and_then(|g| g.dataset(&field.name)) else {
                    warn!(
                        "{} has no dataset {}/{}, leaving it unchanged",
                        path.display(),
                        category.group_name(),
                        field.name
                    );
                    continue;
                };
                staged.push(decode_dataset(field, dataset, count, &path)?);
            }
            if let Some(group) = group {
                for name in group.dataset_names() {
                    if !registry.fields_in(category).any(|f| f.name == name) {
                        debug!(
                            "Ignoring unregistered dataset {}/{name}",
                            category.group_name()
                        );
                    }
                }
            }
        }

        for values in staged {
            values.commit();
        }
        self.time = time;
        Ok(())
    }
}

impl Drop for FrameCodec {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close frame container: {e}");
        }
    }
}

fn counts_as_i32(counts: &[usize; CATEGORY_COUNT]) -> Vec<i32> {
    // Registry counts are bounded by i32::MAX on insertion.
    counts.iter().map(|&c| c as i32).collect()
}

fn write_header(header: &mut Group, counts: &[usize; CATEGORY_COUNT], time: f32) {
    let counts = counts_as_i32(counts);
    header.write_attribute("Flag_DoublePrecision", Attribute::Int(vec![0]));
    header.write_attribute("MassTable", Attribute::Float(vec![0.0; CATEGORY_COUNT]));
    header.write_attribute("NumFilesPerSnapshot", Attribute::Int(vec![1]));
    header.write_attribute("NumPart_ThisFile", Attribute::Int(counts.clone()));
    header.write_attribute("NumPart_Total", Attribute::Int(counts));
    header.write_attribute(
        "NumPart_Total_HighWord",
        Attribute::Int(vec![0; CATEGORY_COUNT]),
    );
    header.write_attribute("Time", Attribute::Float(vec![time]));
}

/// Check the stored counts against the registry and return the frame time.
fn read_header(header: &Group, counts: &[usize; CATEGORY_COUNT], path: &Path) -> Result<f32> {
    let inconsistent = |msg: String| {
        CheckpointError::InconsistentCheckpoint(format!("{}: {msg}", path.display()))
    };
    let expected = counts_as_i32(counts);

    for name in ["NumPart_ThisFile", "NumPart_Total"] {
        let stored = header
            .attribute(name)
            .and_then(Attribute::as_int)
            .ok_or_else(|| inconsistent(format!("missing integer attribute {name}")))?;
        if stored != expected.as_slice() {
            return Err(inconsistent(format!(
                "{name} is {stored:?}, registry expects {expected:?}"
            )));
        }
    }

    match header.attribute("Time").and_then(Attribute::as_float) {
        Some([time]) => Ok(*time),
        _ => Err(inconsistent("missing scalar float attribute Time".to_string())),
    }
}

fn encode_registry(registry: &FieldRegistry) -> Result<Vec<PendingDataset>> {
    let mut pending = Vec::with_capacity(registry.len());
    for category in registry.populated_categories() {
        let count = registry.category_count(category);
        for field in registry.fields_in(category) {
            pending.push(encode_field(category, field, count)?);
        }
    }
    Ok(pending)
}

fn encode_field(
    category: ParticleCategory,
    field: &FieldDescriptor,
    count: usize,
) -> Result<PendingDataset> {
    let len = field.data.len();
    if len < count {
        return Err(CheckpointError::InvalidArgument(format!(
            "field {} of {category} holds {len} particles, category count is {count}",
            field.name
        )));
    }

    let raw = match &field.data {
        FieldData::Boolean1D(buf) => encode_bool(&buf.borrow()[..count]),
        FieldData::Integer1D(buf) => encode_i32(&buf.borrow()[..count]),
        FieldData::Float1D(buf) => encode_f32(&buf.borrow()[..count]),
        FieldData::Float3D(buf) | FieldData::Geometry3D(buf) => {
            encode_f32(bytemuck::cast_slice(&buf.borrow()[..count]))
        }
    };
    let kind = field.kind();
    Ok(PendingDataset {
        group: category.group_name(),
        name: field.name.clone(),
        element_type: kind.element_type(),
        shape: kind.shape(count),
        raw,
    })
}

fn decode_dataset(
    field: &FieldDescriptor,
    dataset: &Dataset,
    count: usize,
    path: &Path,
) -> Result<Staged> {
    let kind = field.kind();
    let expected_shape = kind.shape(count);
    if dataset.element_type() != kind.element_type() || dataset.shape() != expected_shape {
        return Err(CheckpointError::InconsistentCheckpoint(format!(
            "{}: dataset {}/{} is {:?} {:?}, registry expects {:?} {:?}",
            path.display(),
            field.category.group_name(),
            field.name,
            dataset.element_type(),
            dataset.shape(),
            kind.element_type(),
            expected_shape
        )));
    }

    let io_err = |e| CheckpointError::io(path, e);
    let raw = dataset.read_raw().map_err(io_err)?;
    let values = match &field.data {
        FieldData::Boolean1D(buf) => {
            let mut values = vec![false; count];
            decode_bool(&raw, &mut values).map_err(io_err)?;
            Staged::Boolean(buf.clone(), values)
        }
        FieldData::Integer1D(buf) => {
            let mut values = vec![0; count];
            decode_i32(&raw, &mut values).map_err(io_err)?;
            Staged::Integer(buf.clone(), values)
        }
        FieldData::Float1D(buf) => {
            let mut values = vec![0.0; count];
            decode_f32(&raw, &mut values).map_err(io_err)?;
            Staged::Float(buf.clone(), values)
        }
        FieldData::Float3D(buf) | FieldData::Geometry3D(buf) => {
            let mut values = vec![[0.0f32; 3]; count];
            decode_f32(&raw, bytemuck::cast_slice_mut(&mut values[..])).map_err(io_err)?;
            Staged::Vector(buf.clone(), values)
        }
    };
    Ok(values)
}

fn copy_into<T: Copy>(target: &mut Vec<T>, values: &[T]) {
    if target.len() < values.len() {
        target.resize(values.len(), values[0]);
    }
    target[..values.len()].copy_from_slice(values);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Centering;
    use tempfile::tempdir;

    fn path_str(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    fn gas_registry(count: usize) -> (FieldRegistry, FieldBuffer<f32>, FieldBuffer<[f32; 3]>) {
        let mut registry = FieldRegistry::new();
        registry
            .set_category_count(ParticleCategory::Gas, count)
            .unwrap();
        let mass = FieldBuffer::new((0..count).map(|i| i as f32 * 0.5).collect());
        let pos = FieldBuffer::new((0..count).map(|i| [i as f32, 1.0, -2.0]).collect());
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Masses",
            FieldData::Float1D(mass.clone()),
        );
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Coordinates",
            FieldData::Geometry3D(pos.clone()),
        );
        (registry, mass, pos)
    }

    #[test]
    fn test_header_layout() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame_0001.pcf");
        let (registry, _, _) = gas_registry(4);

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 0.75).unwrap();
        codec.close().unwrap();

        let file = ContainerFile::open(&path).unwrap();
        let header = file.group(HEADER_GROUP).unwrap();
        let int = |name| header.attribute(name).unwrap().as_int().unwrap().to_vec();
        assert_eq!(int("Flag_DoublePrecision"), [0]);
        assert_eq!(int("NumFilesPerSnapshot"), [1]);
        assert_eq!(int("NumPart_ThisFile"), [4, 0, 0, 0, 0, 0]);
        assert_eq!(int("NumPart_Total"), [4, 0, 0, 0, 0, 0]);
        assert_eq!(int("NumPart_Total_HighWord"), [0; 6]);
        assert_eq!(
            header.attribute("MassTable").unwrap().as_float(),
            Some(&[0.0f32; 6][..])
        );
        assert_eq!(
            header.attribute("Time").unwrap().as_float(),
            Some(&[0.75f32][..])
        );

        let names: Vec<_> = file.group_names().collect();
        assert_eq!(names, ["Header", "PartType0"]);
        let gas = file.group("PartType0").unwrap();
        let pos = gas.dataset("Coordinates").unwrap();
        assert_eq!(pos.shape(), &[4, 3]);
        assert_eq!(pos.chunk(), &[4, 3]);
        assert_eq!(gas.dataset("Masses").unwrap().shape(), &[4]);
    }

    #[test]
    fn test_roundtrip_into_fresh_arrays() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame.pcf");
        let (registry, mass, pos) = gas_registry(5);

        let mut codec = FrameCodec::new("pcf", CompressionType::Lz4);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 2.5).unwrap();
        codec.close().unwrap();
        assert_eq!(codec.frame_time(), 0.0);

        let (reader, read_mass, read_pos) = gas_registry(5);
        read_mass.borrow_mut().fill(-1.0);
        read_pos.borrow_mut().clear();

        codec.open(&path, OpenMode::ReadWrite).unwrap();
        codec.read_frame(&reader).unwrap();
        assert_eq!(codec.frame_time(), 2.5);
        assert!(!codec.end_of_file());
        codec.close().unwrap();

        assert_eq!(read_mass.to_vec(), mass.to_vec());
        assert_eq!(read_pos.to_vec(), pos.to_vec());
    }

    #[test]
    fn test_suffix_reapplied_on_open() {
        let dir = tempdir().unwrap();
        let (registry, _, _) = gas_registry(2);

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path_str(&dir, "frame.xdmf"), OpenMode::Create).unwrap();
        assert!(codec.path().unwrap().ends_with("frame.pcf"));
        codec.write_frame(&registry, 0.0).unwrap();
        codec.close().unwrap();
        assert!(dir.path().join("frame.pcf").exists());
    }

    #[test]
    fn test_count_mismatch_leaves_arrays_untouched() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame.pcf");
        let (registry, _, _) = gas_registry(4);

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 1.0).unwrap();
        codec.close().unwrap();

        let (reader, read_mass, _) = gas_registry(3);
        read_mass.borrow_mut().fill(7.0);
        codec.open(&path, OpenMode::ReadWrite).unwrap();
        let err = codec.read_frame(&reader).unwrap_err();
        assert!(matches!(err, CheckpointError::InconsistentCheckpoint(_)));
        assert_eq!(read_mass.to_vec(), vec![7.0; 3]);
        assert_eq!(codec.frame_time(), 0.0);
        codec.close().unwrap();
    }

    #[test]
    fn test_kind_mismatch_is_inconsistent() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame.pcf");
        let (registry, _, _) = gas_registry(2);

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 1.0).unwrap();
        codec.close().unwrap();

        let mut reader = FieldRegistry::new();
        reader.set_category_count(ParticleCategory::Gas, 2).unwrap();
        reader.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Masses",
            FieldData::Integer1D(FieldBuffer::zeroed(2)),
        );
        codec.open(&path, OpenMode::ReadWrite).unwrap();
        assert!(matches!(
            codec.read_frame(&reader),
            Err(CheckpointError::InconsistentCheckpoint(_))
        ));
    }

    #[test]
    fn test_missing_dataset_is_skipped() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame.pcf");
        let (registry, _, _) = gas_registry(2);

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 3.0).unwrap();
        codec.close().unwrap();

        let (mut reader, read_mass, _) = gas_registry(2);
        read_mass.borrow_mut().fill(-1.0);
        let density = FieldBuffer::new(vec![9.0f32; 2]);
        reader.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Density",
            FieldData::Float1D(density.clone()),
        );
        codec.open(&path, OpenMode::ReadWrite).unwrap();
        codec.read_frame(&reader).unwrap();
        assert_eq!(read_mass.to_vec(), vec![0.0, 0.5]);
        assert_eq!(density.to_vec(), vec![9.0; 2]);
        assert_eq!(codec.frame_time(), 3.0);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let dir = tempdir().unwrap();
        let (mut registry, _, _) = gas_registry(3);
        registry.register(
            ParticleCategory::Gas,
            Centering::Cell,
            "Flags",
            FieldData::Boolean1D(FieldBuffer::zeroed(2)),
        );

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path_str(&dir, "frame.pcf"), OpenMode::Create).unwrap();
        assert!(matches!(
            codec.write_frame(&registry, 0.0),
            Err(CheckpointError::InvalidArgument(_))
        ));
        codec.close().unwrap();
    }

    #[test]
    fn test_longer_buffer_writes_count_only() {
        let dir = tempdir().unwrap();
        let path = path_str(&dir, "frame.pcf");
        let mut registry = FieldRegistry::new();
        registry.set_category_count(ParticleCategory::Stars, 2).unwrap();
        let ids = FieldBuffer::new(vec![10, 11, 12, 13]);
        registry.register(
            ParticleCategory::Stars,
            Centering::Node,
            "ParticleIDs",
            FieldData::Integer1D(ids),
        );

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(&path, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 0.0).unwrap();
        codec.close().unwrap();

        let file = ContainerFile::open(&path).unwrap();
        let dataset = file.group("PartType4").unwrap().dataset("ParticleIDs").unwrap();
        assert_eq!(dataset.shape(), &[2]);
        assert!(file.group("PartType0").is_none());
    }

    #[test]
    fn test_closed_codec_is_noop() {
        let (registry, _, _) = gas_registry(1);
        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.write_frame(&registry, 1.0).unwrap();
        codec.read_frame(&registry).unwrap();
        codec.close().unwrap();
        codec.close().unwrap();
        assert!(!codec.is_open());
        assert!(codec.end_of_file());
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        let err = codec
            .open(&path_str(&dir, "absent.pcf"), OpenMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
        assert!(!codec.is_open());
    }
}

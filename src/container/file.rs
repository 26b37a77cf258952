//! Container files: named groups of attributes and datasets.
//!
//! A container is loaded into memory on open and written back in one pass on
//! [`ContainerFile::close`]. Groups, attributes and datasets keep insertion
//! order; writing an existing name replaces the entry in place.
//!
//! ```text
//! Header:
//!   Magic: "PFCN" (4 bytes)
//!   Version: u16
//!   Group count: u32
//!
//! Group:
//!   Name: u32 length + UTF-8
//!   Attribute count: u32, then per attribute:
//!     Name, tag u8 (0 = i32, 1 = f32), value count u32, values (4 bytes each)
//!   Dataset count: u32, then per dataset:
//!     Name, element type u8, rank u8, shape u64 * rank, chunk u64 * rank,
//!     compression u8, raw length u64, stored length u64, stored bytes
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::format::{
    CONTAINER_MAGIC, CONTAINER_VERSION, CompressionType, ElementType, invalid_data, read_bytes,
    read_str, read_u8, read_u16_le, read_u32_le, read_u64_le, write_str, write_u8, write_u16_le,
    write_u32_le, write_u64_le,
};

/// Highest dataset rank the format stores.
const MAX_RANK: u8 = 8;

/// A small typed vector stored on a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl Attribute {
    pub fn as_int(&self) -> Option<&[i32]> {
        match self {
            Attribute::Int(v) => Some(v),
            Attribute::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match self {
            Attribute::Float(v) => Some(v),
            Attribute::Int(_) => None,
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Attribute::Int(values) => {
                write_u8(w, 0)?;
                write_u32_le(w, values.len() as u32)?;
                for v in values {
                    w.write_all(&v.to_le_bytes())?;
                }
            }
            Attribute::Float(values) => {
                write_u8(w, 1)?;
                write_u32_le(w, values.len() as u32)?;
                for v in values {
                    w.write_all(&v.to_le_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R, limit: u64) -> io::Result<Self> {
        let tag = read_u8(r)?;
        let count = read_u32_le(r)? as u64;
        let bytes = read_bytes(r, count * 4, limit)?;
        let words = bytes.chunks_exact(4).map(|b| [b[0], b[1], b[2], b[3]]);
        match tag {
            0 => Ok(Attribute::Int(words.map(i32::from_le_bytes).collect())),
            1 => Ok(Attribute::Float(words.map(f32::from_le_bytes).collect())),
            _ => Err(invalid_data(format!("unknown attribute tag {tag}"))),
        }
    }
}

/// A rectangular array of one element type, stored as a single chunk.
#[derive(Debug, Clone)]
pub struct Dataset {
    element_type: ElementType,
    shape: Vec<usize>,
    chunk: Vec<usize>,
    compression: CompressionType,
    raw_len: u64,
    stored: Vec<u8>,
}

impl Dataset {
    /// Build a dataset from little-endian `raw` values, compressing them.
    ///
    /// The chunk covers the whole extent. The recorded compression is the one
    /// this build can apply, so the stored tag always describes the payload.
    pub fn new(
        element_type: ElementType,
        shape: Vec<usize>,
        compression: CompressionType,
        raw: &[u8],
    ) -> io::Result<Self> {
        if shape.is_empty() || shape.len() > MAX_RANK as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("dataset rank {} outside 1..={MAX_RANK}", shape.len()),
            ));
        }
        let expected = shape.iter().product::<usize>() * element_type.size();
        if raw.len() != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "dataset shape {shape:?} needs {expected} bytes, got {}",
                    raw.len()
                ),
            ));
        }
        let compression = compression.available();
        Ok(Self {
            element_type,
            chunk: shape.clone(),
            shape,
            compression,
            raw_len: raw.len() as u64,
            stored: compression.compress(raw),
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunk(&self) -> &[usize] {
        &self.chunk
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Decompressed little-endian values.
    pub fn read_raw(&self) -> io::Result<Vec<u8>> {
        let raw_len = usize::try_from(self.raw_len)
            .map_err(|_| invalid_data(format!("dataset of {} bytes", self.raw_len)))?;
        self.compression.decompress(&self.stored, raw_len)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u8(w, self.element_type as u8)?;
        write_u8(w, self.shape.len() as u8)?;
        for &d in &self.shape {
            write_u64_le(w, d as u64)?;
        }
        for &d in &self.chunk {
            write_u64_le(w, d as u64)?;
        }
        write_u8(w, self.compression as u8)?;
        write_u64_le(w, self.raw_len)?;
        write_u64_le(w, self.stored.len() as u64)?;
        w.write_all(&self.stored)
    }

    fn read_from<R: Read>(r: &mut R, limit: u64) -> io::Result<Self> {
        let tag = read_u8(r)?;
        let element_type = ElementType::from_u8(tag)
            .ok_or_else(|| invalid_data(format!("unknown element type {tag}")))?;

        let rank = read_u8(r)?;
        if rank == 0 || rank > MAX_RANK {
            return Err(invalid_data(format!("dataset rank {rank} outside 1..={MAX_RANK}")));
        }
        let mut shape = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            shape.push(read_dim(r)?);
        }
        let mut chunk = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            chunk.push(read_dim(r)?);
        }

        let tag = read_u8(r)?;
        let compression = CompressionType::from_u8(tag)
            .ok_or_else(|| invalid_data(format!("unknown compression type {tag}")))?;

        let raw_len = read_u64_le(r)?;
        let expected = shape
            .iter()
            .try_fold(element_type.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| invalid_data("dataset extent overflows"))?;
        if raw_len != expected as u64 {
            return Err(invalid_data(format!(
                "dataset shape {shape:?} needs {expected} bytes, header says {raw_len}"
            )));
        }
        let stored_len = read_u64_le(r)?;
        if !compression.can_expand(stored_len, raw_len) {
            return Err(invalid_data(format!(
                "{compression:?} payload of {stored_len} bytes cannot hold {raw_len} bytes"
            )));
        }
        let stored = read_bytes(r, stored_len, limit)?;

        Ok(Self {
            element_type,
            shape,
            chunk,
            compression,
            raw_len,
            stored,
        })
    }
}

fn read_dim<R: Read>(r: &mut R) -> io::Result<usize> {
    let d = read_u64_le(r)?;
    usize::try_from(d).map_err(|_| invalid_data(format!("dimension {d} does not fit in memory")))
}

/// Named collection of attributes and datasets.
#[derive(Debug, Clone, Default)]
pub struct Group {
    attributes: Vec<(String, Attribute)>,
    datasets: Vec<(String, Dataset)>,
}

impl Group {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Create the attribute, or overwrite it if it exists.
    pub fn write_attribute(&mut self, name: &str, value: Attribute) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Store a dataset; an existing dataset of the same name is replaced.
    pub fn write_dataset(&mut self, name: &str, dataset: Dataset) {
        match self.datasets.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = dataset,
            None => self.datasets.push((name.to_string(), dataset)),
        }
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(n, _)| n.as_str())
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|(n, _)| n.as_str())
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, self.attributes.len() as u32)?;
        for (name, attribute) in &self.attributes {
            write_str(w, name)?;
            attribute.write_to(w)?;
        }
        write_u32_le(w, self.datasets.len() as u32)?;
        for (name, dataset) in &self.datasets {
            write_str(w, name)?;
            dataset.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R, limit: u64) -> io::Result<Self> {
        let mut group = Group::default();
        let attribute_count = read_u32_le(r)?;
        for _ in 0..attribute_count {
            let name = read_str(r)?;
            let attribute = Attribute::read_from(r, limit)?;
            group.write_attribute(&name, attribute);
        }
        let dataset_count = read_u32_le(r)?;
        for _ in 0..dataset_count {
            let name = read_str(r)?;
            let dataset = Dataset::read_from(r, limit)?;
            group.write_dataset(&name, dataset);
        }
        Ok(group)
    }
}

/// An open container file.
///
/// Usage:
/// ```ignore
/// let mut file = ContainerFile::create("frame_0001.pcf")?;
/// file.create_group("Header").write_attribute("Time", Attribute::Float(vec![0.5]));
/// file.close()?;
/// ```
#[derive(Debug)]
pub struct ContainerFile {
    path: PathBuf,
    file: File,
    groups: Vec<(String, Group)>,
    dirty: bool,
}

impl ContainerFile {
    /// Create a new, empty container, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            groups: Vec::new(),
            // An empty container is still a valid file once closed.
            dirty: true,
        })
    }

    /// Open an existing container for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        let groups = Self::read_from(&mut BufReader::new(&file), len)?;
        Ok(Self {
            path,
            file,
            groups,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the named group, creating it if needed.
    pub fn create_group(&mut self, name: &str) -> &mut Group {
        self.dirty = true;
        let index = match self.groups.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.groups.push((name.to_string(), Group::default()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].1
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|(n, _)| n == name).map(|(_, g)| g)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(n, _)| n.as_str())
    }

    /// Write pending changes and release the file handle.
    pub fn close(mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        let mut writer = BufWriter::new(&mut self.file);
        Self::write_to(&self.groups, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_to<W: Write>(groups: &[(String, Group)], w: &mut W) -> io::Result<()> {
        w.write_all(CONTAINER_MAGIC)?;
        write_u16_le(w, CONTAINER_VERSION)?;
        write_u32_le(w, groups.len() as u32)?;
        for (name, group) in groups {
            write_str(w, name)?;
            group.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R, limit: u64) -> io::Result<Vec<(String, Group)>> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != CONTAINER_MAGIC {
            return Err(invalid_data("Invalid PFCN magic bytes"));
        }
        let version = read_u16_le(r)?;
        if version != CONTAINER_VERSION {
            return Err(invalid_data(format!("Unsupported PFCN version: {version}")));
        }

        let group_count = read_u32_le(r)?;
        let mut groups: Vec<(String, Group)> = Vec::new();
        for _ in 0..group_count {
            let name = read_str(r)?;
            let group = Group::read_from(r, limit)?;
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => *existing = group,
                None => groups.push((name, group)),
            }
        }
        Ok(groups)
    }
}

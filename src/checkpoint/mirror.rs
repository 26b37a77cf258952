//! XDMF metadata mirror.
//!
//! A mirror document wraps one temporal collection grid. Each saved frame
//! adds a uniform grid holding its time stamp, the particle topology and a
//! data item per registered field that points at the dataset the codec wrote:
//!
//! ```text
//! <Grid Name="Frame 0001" GridType="Uniform">
//!   <Time Value="5.0000e-01"/>
//!   <Topology TopologyType="Polyvertex" NumberOfElements="10" />
//!   <Attribute Name="Masses" AttributeType="Scalar" Center="Node">
//!     <DataItem Dimensions="10" NumberType="Float" Precision="4" Format="HDF">
//!       disk_0001.pcf:/PartType0/Masses
//!     </DataItem>
//!   </Attribute>
//! </Grid>
//! ```
//!
//! A uniform grid has a single topology, so a frame with more than one
//! populated category becomes a spatial collection of such grids, one per
//! `PartType<i>` group, sharing the frame's time stamp.
//!
//! Frame blocks are found again by element nesting, so a document can be
//! reopened after any number of frames and extended.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::codec::HEADER_GROUP;
use crate::container::{Attribute, ContainerFile, ElementType};
use crate::error::{CheckpointError, Result};
use crate::schema::{CATEGORY_COUNT, Centering, FieldKind, FieldRegistry, ParticleCategory};

const PREAMBLE: &str = concat!(
    "<?xml version=\"1.0\" ?>\n",
    "<!DOCTYPE Xdmf SYSTEM \"Xdmf.dtd\" []>\n",
    "\n",
    "<Xdmf Version=\"2.0\" >\n",
    "  <Domain>\n",
    "    <Grid Name=\"Temporal Collection\" GridType=\"Collection\" CollectionType=\"Temporal\" >\n",
);

const TERMINATOR: &str = "    </Grid>\n  </Domain>\n</Xdmf>\n";

/// Indentation of a frame block inside the temporal collection.
const FRAME_INDENT: usize = 6;

/// Dataset read back as vertex coordinates when mirroring a container.
const GEOMETRY_DATASET: &str = "Coordinates";

/// Writes one mirror document.
///
/// The standalone per-frame mirror and the running temporal collection are
/// two independent writers.
#[derive(Debug)]
pub struct MirrorWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    frames_written: usize,
    emit_terminator: bool,
}

impl MirrorWriter {
    /// Create (or truncate) `path` and write the document preamble.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| CheckpointError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(PREAMBLE.as_bytes())
            .map_err(|e| CheckpointError::io(&path, e))?;
        debug!("Created mirror {}", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            frames_written: 0,
            emit_terminator: true,
        })
    }

    /// Reopen an existing document, keep its first `keep_frames` frame blocks
    /// and discard everything after them, terminator included.
    pub fn resume<P: AsRef<Path>>(path: P, keep_frames: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CheckpointError::io(&path, e))?;

        let position = {
            let mut cursor = MirrorCursor::new(BufReader::new(&file));
            cursor
                .skip_preamble()
                .and_then(|()| cursor.skip_frames(keep_frames))
                .map_err(|e| mirror_error(&path, e))?;
            cursor.position()
        };

        file.set_len(position)
            .and_then(|()| file.seek(SeekFrom::Start(position)).map(drop))
            .map_err(|e| CheckpointError::io(&path, e))?;

        info!(
            "Resuming mirror {} after {keep_frames} frames",
            path.display()
        );
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            frames_written: keep_frames,
            emit_terminator: true,
        })
    }

    /// Whether [`close`](Self::close) writes the closing wrapper elements.
    pub fn set_emit_terminator(&mut self, emit: bool) {
        self.emit_terminator = emit;
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame blocks in the document, including any kept on resume.
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Append a frame block describing `registry` as stored in
    /// `binary_file`. Only the final path component of `binary_file` is
    /// referenced. Does nothing once the writer is closed.
    ///
    /// Fails with `InvalidName` before writing anything when a field name
    /// cannot appear in a dataset reference.
    pub fn write_frame(
        &mut self,
        registry: &FieldRegistry,
        binary_file: &str,
        time: f32,
    ) -> Result<()> {
        self.append(&registry_layout(registry), binary_file, time)
    }

    /// Append a frame block describing a container already on disk.
    ///
    /// Counts and time come from its header; fields are the datasets of each
    /// populated `PartType<i>` group in stored order, node centred, with the
    /// `Coordinates` dataset as geometry.
    pub fn write_container_frame(
        &mut self,
        container: &ContainerFile,
        binary_file: &str,
    ) -> Result<()> {
        let (time, layout) = container_layout(container)?;
        self.append(&layout, binary_file, time)
    }

    fn append(
        &mut self,
        layout: &[CategoryLayout<'_>],
        binary_file: &str,
        time: f32,
    ) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let binary_name = Path::new(binary_file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(binary_file);
        check_reference_part(binary_name)?;
        for field in layout.iter().flat_map(|c| &c.fields) {
            check_reference_part(field.name)?;
        }

        let block = frame_block(layout, binary_name, time, self.frames_written + 1);
        writer
            .write_all(block.as_bytes())
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Write the terminator (unless suppressed) and release the file.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        if self.emit_terminator {
            writer
                .write_all(TERMINATOR.as_bytes())
                .map_err(|e| CheckpointError::io(&self.path, e))?;
        }
        writer
            .flush()
            .map_err(|e| CheckpointError::io(&self.path, e))?;
        debug!(
            "Closed mirror {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for MirrorWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close mirror: {e}");
        }
    }
}

/// Check that every field of `registry` can be referenced from a mirror.
///
/// A reference is `<file>:/<group>/<name>` on a line of its own, so names
/// must be non-empty, free of `/` and control characters, and carry no
/// surrounding whitespace.
pub fn check_field_names(registry: &FieldRegistry) -> Result<()> {
    registry
        .fields()
        .iter()
        .try_for_each(|field| check_reference_part(&field.name))
}

fn check_reference_part(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.trim() != name
        || name.chars().any(|c| c == '/' || c.is_control());
    if bad {
        return Err(CheckpointError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn mirror_error(path: &Path, e: io::Error) -> CheckpointError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            CheckpointError::InconsistentCheckpoint(format!("{}: {e}", path.display()))
        }
        _ => CheckpointError::io(path, e),
    }
}

/// Escape text for use inside an XML attribute value or element.
fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// C `%.4e` formatting: `5.0000e-01`.
fn format_time(time: f32) -> String {
    let formatted = format!("{time:.4e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

struct FieldLayout<'a> {
    name: &'a str,
    kind: FieldKind,
    centering: Centering,
}

/// What a frame block says about one populated category.
struct CategoryLayout<'a> {
    category: ParticleCategory,
    count: usize,
    fields: Vec<FieldLayout<'a>>,
}

fn registry_layout(registry: &FieldRegistry) -> Vec<CategoryLayout<'_>> {
    registry
        .populated_categories()
        .map(|category| CategoryLayout {
            category,
            count: registry.category_count(category),
            fields: registry
                .fields_in(category)
                .map(|field| FieldLayout {
                    name: &field.name,
                    kind: field.kind(),
                    centering: field.centering,
                })
                .collect(),
        })
        .collect()
}

/// Frame time and category layout recorded in a container.
fn container_layout(container: &ContainerFile) -> Result<(f32, Vec<CategoryLayout<'_>>)> {
    let inconsistent = |msg: String| {
        CheckpointError::InconsistentCheckpoint(format!("{}: {msg}", container.path().display()))
    };
    let header = container
        .group(HEADER_GROUP)
        .ok_or_else(|| inconsistent(format!("no {HEADER_GROUP} group")))?;
    let counts = match header.attribute("NumPart_ThisFile").and_then(Attribute::as_int) {
        Some(counts) if counts.len() == CATEGORY_COUNT => counts,
        _ => return Err(inconsistent("missing NumPart_ThisFile counts".to_string())),
    };
    let time = match header.attribute("Time").and_then(Attribute::as_float) {
        Some([time]) => *time,
        _ => return Err(inconsistent("missing scalar float attribute Time".to_string())),
    };

    let mut layout = Vec::new();
    for (category, &count) in ParticleCategory::ALL.into_iter().zip(counts) {
        let count = usize::try_from(count)
            .map_err(|_| inconsistent(format!("negative particle count {count} for {category}")))?;
        if count == 0 {
            continue;
        }
        let group_name = category.group_name();
        let mut fields = Vec::new();
        if let Some(group) = container.group(&group_name) {
            for name in group.dataset_names() {
                let Some(dataset) = group.dataset(name) else {
                    continue;
                };
                let kind = match (dataset.element_type(), dataset.shape()) {
                    (ElementType::Bool, [n]) if *n == count => FieldKind::Boolean1D,
                    (ElementType::Int32, [n]) if *n == count => FieldKind::Integer1D,
                    (ElementType::Float32, [n]) if *n == count => FieldKind::Float1D,
                    (ElementType::Float32, [n, 3]) if *n == count => {
                        if name == GEOMETRY_DATASET {
                            FieldKind::Geometry3D
                        } else {
                            FieldKind::Float3D
                        }
                    }
                    (element_type, shape) => {
                        return Err(inconsistent(format!(
                            "{group_name}/{name} is {element_type:?} {shape:?}, \
                             not a field of {count} particles"
                        )));
                    }
                };
                fields.push(FieldLayout {
                    name,
                    kind,
                    centering: Centering::Node,
                });
            }
        }
        layout.push(CategoryLayout {
            category,
            count,
            fields,
        });
    }
    Ok((time, layout))
}

fn frame_block(
    layout: &[CategoryLayout<'_>],
    binary_name: &str,
    time: f32,
    frame: usize,
) -> String {
    let pad = " ".repeat(FRAME_INDENT);
    let time = format_time(time);
    let mut out = String::new();

    if let [] | [_] = layout {
        out.push_str(&format!(
            "{pad}<Grid Name=\"Frame {frame:04}\" GridType=\"Uniform\">\n"
        ));
        out.push_str(&format!("{pad}  <Time Value=\"{time}\"/>\n"));
        match layout.first() {
            Some(category) => {
                category_body(&mut out, &format!("{pad}  "), category, binary_name);
            }
            None => out.push_str(&format!(
                "{pad}  <Topology TopologyType=\"Polyvertex\" NumberOfElements=\"0\" />\n"
            )),
        }
        out.push_str(&format!("{pad}</Grid>\n"));
        return out;
    }

    out.push_str(&format!(
        "{pad}<Grid Name=\"Frame {frame:04}\" GridType=\"Collection\" CollectionType=\"Spatial\">\n"
    ));
    out.push_str(&format!("{pad}  <Time Value=\"{time}\"/>\n"));
    for category in layout {
        out.push_str(&format!(
            "{pad}  <Grid Name=\"{}\" GridType=\"Uniform\">\n",
            category.category.group_name()
        ));
        category_body(&mut out, &format!("{pad}    "), category, binary_name);
        out.push_str(&format!("{pad}  </Grid>\n"));
    }
    out.push_str(&format!("{pad}</Grid>\n"));
    out
}

/// Topology, then one geometry or attribute element per field.
fn category_body(out: &mut String, pad: &str, category: &CategoryLayout<'_>, binary_name: &str) {
    let count = category.count;
    out.push_str(&format!(
        "{pad}<Topology TopologyType=\"Polyvertex\" NumberOfElements=\"{count}\" />\n"
    ));
    let group = category.category.group_name();
    for field in &category.fields {
        let reference = format!("{binary_name}:/{group}/{}", field.name);
        field_element(out, pad, field, count, &reference);
    }
}

fn field_element(
    out: &mut String,
    pad: &str,
    field: &FieldLayout<'_>,
    count: usize,
    reference: &str,
) {
    let kind = field.kind;
    let (open, close) = match kind {
        FieldKind::Geometry3D => (
            "<Geometry GeometryType=\"XYZ\">".to_string(),
            "</Geometry>",
        ),
        _ => {
            let attribute_type = if kind.components() == 1 {
                "Scalar"
            } else {
                "Vector"
            };
            (
                format!(
                    "<Attribute Name=\"{}\" AttributeType=\"{attribute_type}\" Center=\"{}\">",
                    escape(field.name),
                    field.centering.as_str()
                ),
                "</Attribute>",
            )
        }
    };
    let dimensions = kind
        .shape(count)
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let element_type = kind.element_type();

    out.push_str(&format!("{pad}{open}\n"));
    out.push_str(&format!(
        "{pad}  <DataItem Dimensions=\"{dimensions}\" NumberType=\"{}\" Precision=\"{}\" Format=\"HDF\">\n",
        element_type.xdmf_number_type(),
        element_type.size()
    ));
    out.push_str(&format!("{pad}    {}\n", escape(reference)));
    out.push_str(&format!("{pad}  </DataItem>\n"));
    out.push_str(&format!("{pad}{close}\n"));
}

/// Read cursor over a mirror document.
///
/// Walks `<Grid>` nesting to step over whole frame blocks; tracks the byte
/// offset so a writer can truncate and continue at that point.
pub struct MirrorCursor<R: BufRead> {
    reader: R,
    position: u64,
    line: String,
}

impl<R: BufRead> MirrorCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
            line: String::new(),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next line, or `None` at end of input.
    fn next_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        self.position += n as u64;
        Ok(Some(self.line.trim()))
    }

    /// Step past everything up to and including the temporal collection's
    /// opening tag.
    pub fn skip_preamble(&mut self) -> io::Result<()> {
        while let Some(line) = self.next_line()? {
            if line.starts_with("<Grid") && line.contains("CollectionType=\"Temporal\"") {
                return Ok(());
            }
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "no temporal collection in mirror document",
        ))
    }

    /// Step over `n` frame blocks.
    pub fn skip_frames(&mut self, n: usize) -> io::Result<()> {
        for frame in 0..n {
            self.skip_frame().map_err(|e| {
                io::Error::new(e.kind(), format!("frame {} of {n}: {e}", frame + 1))
            })?;
        }
        Ok(())
    }

    fn skip_frame(&mut self) -> io::Result<()> {
        let mut depth = 0usize;
        loop {
            let Some(line) = self.next_line()? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "document ends inside the frame list",
                ));
            };
            if line.is_empty() {
                continue;
            }
            if line.starts_with("</Grid") {
                if depth == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "temporal collection closes before the frame",
                    ));
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            } else if line.starts_with("<Grid") {
                if !line.ends_with("/>") {
                    depth += 1;
                }
            } else if depth == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected a frame grid, found {line:?}"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{FrameCodec, OpenMode};
    use crate::container::{CompressionType, Dataset};
    use crate::schema::{FieldBuffer, FieldData};
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample_registry() -> FieldRegistry {
        let mut registry = FieldRegistry::new();
        registry.set_category_count(ParticleCategory::Gas, 4).unwrap();
        registry.set_category_count(ParticleCategory::Bulge, 2).unwrap();
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Coordinates",
            FieldData::Geometry3D(FieldBuffer::zeroed(4)),
        );
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Masses",
            FieldData::Float1D(FieldBuffer::zeroed(4)),
        );
        registry.register(
            ParticleCategory::Gas,
            Centering::Cell,
            "Velocities",
            FieldData::Float3D(FieldBuffer::zeroed(4)),
        );
        registry.register(
            ParticleCategory::Bulge,
            Centering::Node,
            "ParticleIDs",
            FieldData::Integer1D(FieldBuffer::zeroed(2)),
        );
        registry.register(
            ParticleCategory::Bulge,
            Centering::Node,
            "Active",
            FieldData::Boolean1D(FieldBuffer::zeroed(2)),
        );
        registry
    }

    /// `(dimensions, number type, precision, reference)` of every data item.
    fn data_items(doc: &str) -> Vec<(String, String, String, String)> {
        let lines: Vec<&str> = doc.lines().map(str::trim).collect();
        let attr = |line: &str, name: &str| {
            let key = format!("{name}=\"");
            let start = line.find(&key).unwrap() + key.len();
            let len = line[start..].find('"').unwrap();
            line[start..start + len].to_string()
        };
        lines
            .windows(2)
            .filter(|w| w[0].starts_with("<DataItem"))
            .map(|w| {
                (
                    attr(w[0], "Dimensions"),
                    attr(w[0], "NumberType"),
                    attr(w[0], "Precision"),
                    w[1].to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_time_format_matches_c() {
        assert_eq!(format_time(0.5), "5.0000e-01");
        assert_eq!(format_time(0.0), "0.0000e+00");
        assert_eq!(format_time(1234.5), "1.2345e+03");
        assert_eq!(format_time(-2.0), "-2.0000e+00");
    }

    #[test]
    fn test_document_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let registry = sample_registry();

        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.write_frame(&registry, "out/run_0001.pcf", 0.5).unwrap();
        mirror.close().unwrap();

        let doc = fs::read_to_string(&path).unwrap();
        assert!(doc.starts_with(PREAMBLE));
        assert!(doc.ends_with(TERMINATOR));
        assert!(doc.contains("<Time Value=\"5.0000e-01\"/>"));
        assert!(doc.contains("<Topology TopologyType=\"Polyvertex\" NumberOfElements=\"4\" />"));
        assert!(doc.contains("<Topology TopologyType=\"Polyvertex\" NumberOfElements=\"2\" />"));
        assert!(doc.contains("<Geometry GeometryType=\"XYZ\">"));
        assert!(doc.contains(
            "<Attribute Name=\"Velocities\" AttributeType=\"Vector\" Center=\"Cell\">"
        ));
        assert_eq!(doc.matches("<Geometry").count(), 1);
        assert_eq!(doc.matches("<Attribute").count(), 4);

        let items = data_items(&doc);
        let expected = [
            ("4 3", "Float", "4", "run_0001.pcf:/PartType0/Coordinates"),
            ("4", "Float", "4", "run_0001.pcf:/PartType0/Masses"),
            ("4 3", "Float", "4", "run_0001.pcf:/PartType0/Velocities"),
            ("2", "Integer", "4", "run_0001.pcf:/PartType3/ParticleIDs"),
            ("2", "Char", "1", "run_0001.pcf:/PartType3/Active"),
        ];
        assert_eq!(items.len(), expected.len());
        for (item, (dims, ty, precision, reference)) in items.iter().zip(expected) {
            assert_eq!(item.0, dims);
            assert_eq!(item.1, ty);
            assert_eq!(item.2, precision);
            assert_eq!(item.3, reference);
        }
    }

    #[test]
    fn test_single_category_frame_is_uniform_grid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut registry = FieldRegistry::new();
        registry.set_category_count(ParticleCategory::Gas, 2).unwrap();
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Coordinates",
            FieldData::Geometry3D(FieldBuffer::zeroed(2)),
        );
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "Masses",
            FieldData::Float1D(FieldBuffer::zeroed(2)),
        );

        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.write_frame(&registry, "run_0001.pcf", 0.25).unwrap();
        mirror.close().unwrap();

        let block = concat!(
            "      <Grid Name=\"Frame 0001\" GridType=\"Uniform\">\n",
            "        <Time Value=\"2.5000e-01\"/>\n",
            "        <Topology TopologyType=\"Polyvertex\" NumberOfElements=\"2\" />\n",
            "        <Geometry GeometryType=\"XYZ\">\n",
            "          <DataItem Dimensions=\"2 3\" NumberType=\"Float\" Precision=\"4\" Format=\"HDF\">\n",
            "            run_0001.pcf:/PartType0/Coordinates\n",
            "          </DataItem>\n",
            "        </Geometry>\n",
            "        <Attribute Name=\"Masses\" AttributeType=\"Scalar\" Center=\"Node\">\n",
            "          <DataItem Dimensions=\"2\" NumberType=\"Float\" Precision=\"4\" Format=\"HDF\">\n",
            "            run_0001.pcf:/PartType0/Masses\n",
            "          </DataItem>\n",
            "        </Attribute>\n",
            "      </Grid>\n",
        );
        let doc = fs::read_to_string(&path).unwrap();
        assert_eq!(doc, format!("{PREAMBLE}{block}{TERMINATOR}"));
    }

    #[test]
    fn test_empty_registry_frame_has_zero_topology() {
        let block = frame_block(&[], "run_0001.pcf", 0.0, 3);
        assert!(block.starts_with("      <Grid Name=\"Frame 0003\" GridType=\"Uniform\">\n"));
        assert!(block.contains("<Topology TopologyType=\"Polyvertex\" NumberOfElements=\"0\" />"));
        assert!(block.ends_with("      </Grid>\n"));
    }

    #[test]
    fn test_markup_in_names_is_escaped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut registry = FieldRegistry::new();
        registry.set_category_count(ParticleCategory::Gas, 3).unwrap();
        registry.register(
            ParticleCategory::Gas,
            Centering::Node,
            "T<a&b\">'",
            FieldData::Float1D(FieldBuffer::zeroed(3)),
        );

        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.write_frame(&registry, "r&d_0001.pcf", 0.0).unwrap();
        mirror.write_frame(&registry, "r&d_0002.pcf", 1.0).unwrap();
        mirror.close().unwrap();

        let doc = fs::read_to_string(&path).unwrap();
        let name = "T&lt;a&amp;b&quot;&gt;&apos;";
        assert!(doc.contains(&format!(
            "<Attribute Name=\"{name}\" AttributeType=\"Scalar\" Center=\"Node\">"
        )));
        assert!(doc.contains(&format!("r&amp;d_0002.pcf:/PartType0/{name}")));
        assert!(!doc.contains("T<a"));

        let mut cursor = MirrorCursor::new(Cursor::new(doc.as_bytes()));
        cursor.skip_preamble().unwrap();
        cursor.skip_frames(2).unwrap();
        assert_eq!(cursor.position(), (doc.len() - TERMINATOR.len()) as u64);

        let mut resumed = MirrorWriter::resume(&path, 2).unwrap();
        assert_eq!(resumed.frames_written(), 2);
        resumed.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), doc);
    }

    #[test]
    fn test_unreferencable_names_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut mirror = MirrorWriter::create(&path).unwrap();

        for bad in ["x\n</Grid>", "a/b", "", " Masses", "tab\there"] {
            let mut registry = FieldRegistry::new();
            registry.set_category_count(ParticleCategory::Gas, 1).unwrap();
            registry.register(
                ParticleCategory::Gas,
                Centering::Node,
                bad,
                FieldData::Integer1D(FieldBuffer::zeroed(1)),
            );
            assert!(
                matches!(check_field_names(&registry), Err(CheckpointError::InvalidName(_))),
                "{bad:?} accepted"
            );
            assert!(matches!(
                mirror.write_frame(&registry, "run_0001.pcf", 0.0),
                Err(CheckpointError::InvalidName(_))
            ));
        }
        assert!(matches!(
            mirror.write_frame(&sample_registry(), "run\n_0001.pcf", 0.0),
            Err(CheckpointError::InvalidName(_))
        ));
        assert_eq!(mirror.frames_written(), 0);
        mirror.close().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{PREAMBLE}{TERMINATOR}")
        );
        assert!(check_field_names(&sample_registry()).is_ok());
    }

    #[test]
    fn test_container_frame_needs_header_and_field_shapes() {
        let dir = tempdir().unwrap();
        let binary = dir.path().join("odd_0001.pcf");
        let mirror_path = dir.path().join("odd.xdmf");

        let mut container = ContainerFile::create(&binary).unwrap();
        container.create_group("PartType0");
        container.close().unwrap();
        let container = ContainerFile::open(&binary).unwrap();
        let mut mirror = MirrorWriter::create(&mirror_path).unwrap();
        assert!(matches!(
            mirror.write_container_frame(&container, "odd_0001.pcf"),
            Err(CheckpointError::InconsistentCheckpoint(_))
        ));

        // A dataset whose length disagrees with the header count.
        let mut registry = FieldRegistry::new();
        registry.set_category_count(ParticleCategory::Gas, 2).unwrap();
        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(binary.to_str().unwrap(), OpenMode::Create).unwrap();
        codec.write_frame(&registry, 0.0).unwrap();
        codec.close().unwrap();
        let mut container = ContainerFile::open(&binary).unwrap();
        let dataset = Dataset::new(
            ElementType::Float32,
            vec![5],
            CompressionType::None,
            &[0u8; 20],
        )
        .unwrap();
        container.create_group("PartType0").write_dataset("Masses", dataset);
        container.close().unwrap();

        let container = ContainerFile::open(&binary).unwrap();
        assert!(matches!(
            mirror.write_container_frame(&container, "odd_0001.pcf"),
            Err(CheckpointError::InconsistentCheckpoint(_))
        ));
        assert_eq!(mirror.frames_written(), 0);
    }

    #[test]
    fn test_references_match_codec_layout() {
        let dir = tempdir().unwrap();
        let binary = dir.path().join("run_0001.pcf");
        let binary = binary.to_str().unwrap();
        let registry = sample_registry();

        let mut codec = FrameCodec::new("pcf", CompressionType::None);
        codec.open(binary, OpenMode::Create).unwrap();
        codec.write_frame(&registry, 1.0).unwrap();
        codec.close().unwrap();

        let mirror_path = dir.path().join("run_0001.xdmf");
        let mut mirror = MirrorWriter::create(&mirror_path).unwrap();
        mirror.write_frame(&registry, binary, 1.0).unwrap();
        mirror.close().unwrap();

        let container = ContainerFile::open(binary).unwrap();
        let doc = fs::read_to_string(&mirror_path).unwrap();
        let items = data_items(&doc);
        assert_eq!(items.len(), registry.len());
        for (dims, ty, precision, reference) in items {
            let (file, dataset_path) = reference.split_once(":/").unwrap();
            assert_eq!(file, "run_0001.pcf");
            let (group, name) = dataset_path.split_once('/').unwrap();
            let dataset = container.group(group).unwrap().dataset(name).unwrap();

            let shape: Vec<String> = dataset.shape().iter().map(|d| d.to_string()).collect();
            assert_eq!(dims, shape.join(" "));
            assert_eq!(ty, dataset.element_type().xdmf_number_type());
            assert_eq!(precision, dataset.element_type().size().to_string());
        }
    }

    #[test]
    fn test_terminator_suppressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.set_emit_terminator(false);
        mirror.write_frame(&sample_registry(), "run_0001.pcf", 0.0).unwrap();
        mirror.close().unwrap();

        let doc = fs::read_to_string(&path).unwrap();
        assert!(!doc.contains("</Xdmf>"));
        assert!(doc.trim_end().ends_with("</Grid>"));
    }

    #[test]
    fn test_closed_writer_ignores_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.close().unwrap();
        mirror.write_frame(&sample_registry(), "run_0001.pcf", 0.0).unwrap();
        mirror.close().unwrap();
        assert_eq!(mirror.frames_written(), 0);
        assert!(!mirror.is_open());
    }

    #[test]
    fn test_cursor_skips_frames_by_nesting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut registry = sample_registry();

        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.write_frame(&registry, "run_0001.pcf", 0.0).unwrap();
        // Frames need not share a layout.
        registry.reset();
        registry.set_category_count(ParticleCategory::Stars, 3).unwrap();
        mirror.write_frame(&registry, "run_0002.pcf", 0.5).unwrap();
        mirror.close().unwrap();

        let doc = fs::read_to_string(&path).unwrap();
        let mut cursor = MirrorCursor::new(Cursor::new(doc.as_bytes()));
        cursor.skip_preamble().unwrap();
        assert_eq!(cursor.position(), PREAMBLE.len() as u64);
        cursor.skip_frames(2).unwrap();
        assert_eq!(
            cursor.position(),
            (doc.len() - TERMINATOR.len()) as u64
        );

        let mut cursor = MirrorCursor::new(Cursor::new(doc.as_bytes()));
        cursor.skip_preamble().unwrap();
        let err = cursor.skip_frames(3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_cursor_fails_on_truncated_document() {
        let doc = format!("{PREAMBLE}      <Grid Name=\"Frame 0001\" GridType=\"Collection\">\n");
        let mut cursor = MirrorCursor::new(Cursor::new(doc.as_bytes()));
        cursor.skip_preamble().unwrap();
        let err = cursor.skip_frames(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut cursor = MirrorCursor::new(Cursor::new(&b"<Xdmf>\n"[..]));
        assert!(cursor.skip_preamble().is_err());
    }

    #[test]
    fn test_resume_truncates_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let registry = sample_registry();

        let mut mirror = MirrorWriter::create(&path).unwrap();
        for frame in 1..=3 {
            mirror
                .write_frame(&registry, &format!("run_{frame:04}.pcf"), frame as f32)
                .unwrap();
        }
        mirror.close().unwrap();

        let mut mirror = MirrorWriter::resume(&path, 2).unwrap();
        assert_eq!(mirror.frames_written(), 2);
        mirror.write_frame(&registry, "run_0003.pcf", 9.0).unwrap();
        mirror.close().unwrap();

        let doc = fs::read_to_string(&path).unwrap();
        assert_eq!(doc.matches("CollectionType=\"Spatial\"").count(), 3);
        assert_eq!(doc.matches("</Xdmf>").count(), 1);
        assert!(doc.contains("<Time Value=\"9.0000e+00\"/>"));
        assert!(!doc.contains("<Time Value=\"3.0000e+00\"/>"));
        assert!(doc.ends_with(TERMINATOR));
    }

    #[test]
    fn test_resume_past_end_is_inconsistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.xdmf");
        let mut mirror = MirrorWriter::create(&path).unwrap();
        mirror.write_frame(&sample_registry(), "run_0001.pcf", 0.0).unwrap();
        mirror.close().unwrap();

        assert!(matches!(
            MirrorWriter::resume(&path, 2),
            Err(CheckpointError::InconsistentCheckpoint(_))
        ));
        assert!(matches!(
            MirrorWriter::resume(dir.path().join("absent.xdmf"), 0),
            Err(CheckpointError::Io { .. })
        ));
    }
}

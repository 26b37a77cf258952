//! Checkpoint file names.
//!
//! Every file of a session is named after one base name: frame containers are
//! `<base>_<NNNN>.<binary>`, standalone mirrors `<base>_<NNNN>.<mirror>` and
//! the temporal collection `<base>.<mirror>`. Any of these names reduces back
//! to the base with [`base_name`].

use crate::error::{CheckpointError, Result};

/// Characters that separate path components.
const DELIMITERS: [char; 2] = ['/', ':'];

fn ends_badly(name: &str) -> bool {
    name.is_empty() || name.ends_with('.') || name.ends_with(DELIMITERS)
}

fn check_name(name: &str, input: &str) -> Result<()> {
    if ends_badly(name) {
        return Err(CheckpointError::InvalidName(input.to_string()));
    }
    Ok(())
}

/// Remove the suffix: everything from the last `.` of the final path
/// component to the end. Names without a suffix are returned unchanged.
pub fn strip_suffix(name: &str) -> Result<&str> {
    check_name(name, name)?;
    match name.rfind(|c: char| c == '.' || DELIMITERS.contains(&c)) {
        Some(index) if name[index..].starts_with('.') => Ok(&name[..index]),
        _ => Ok(name),
    }
}

/// Remove a trailing run of digits and underscores. The first character is
/// always kept.
pub fn strip_frame_id(name: &str) -> &str {
    let bytes = name.as_bytes();
    let mut end = bytes.len();
    while end > 1 && (bytes[end - 1].is_ascii_digit() || bytes[end - 1] == b'_') {
        end -= 1;
    }
    &name[..end]
}

/// Canonical base name of any checkpoint file name.
///
/// ```
/// use particle_frames::checkpoint::naming::base_name;
/// assert_eq!(base_name("out/disk_0007.pcf").unwrap(), "out/disk");
/// assert_eq!(base_name("out/disk").unwrap(), "out/disk");
/// ```
pub fn base_name(path: &str) -> Result<String> {
    let base = strip_frame_id(strip_suffix(path)?);
    check_name(base, path)?;
    Ok(base.to_string())
}

/// Replace the suffix of `name` with `suffix`.
pub fn with_suffix(name: &str, suffix: &str) -> Result<String> {
    let stem = strip_suffix(name)?;
    check_name(stem, name)?;
    Ok(format!("{stem}.{suffix}"))
}

/// `<base>_<NNNN>.<suffix>`, frame numbers zero padded to four digits.
pub fn frame_file_name(base: &str, frame: u32, suffix: &str) -> String {
    format!("{base}_{frame:04}.{suffix}")
}

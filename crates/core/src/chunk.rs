//! Chunk naming rules.
//!
//! A chunk blob is named `{index}_{original_name}`. While an upload is in
//! flight the leading index prefix marks the blob as incomplete; finishing
//! the upload strips it so the blob carries the client's filename.

use std::cmp::Ordering;

/// Separator between the chunk index and the original filename.
pub const CHUNK_SEPARATOR: char = '_';

/// Build the blob name for a chunk.
pub fn chunk_file_name(index: u64, original_name: &str) -> String {
    format!("{index}{CHUNK_SEPARATOR}{original_name}")
}

/// Last path segment of a `/`-separated key.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Split `{digits}_{rest}` into its digit run and remainder.
fn split_prefix(name: &str) -> Option<(&str, &str)> {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = name[digits..].strip_prefix(CHUNK_SEPARATOR)?;
    Some((&name[..digits], rest))
}

/// Parse the chunk index from a blob name or path.
///
/// Returns `None` when the file name does not start with `{digits}_` or the
/// index does not fit in a `u64`.
pub fn parse_chunk_index(name: &str) -> Option<u64> {
    let (digits, _) = split_prefix(file_name(name))?;
    digits.parse().ok()
}

/// Whether the file name carries a leading `{digits}_` chunk prefix.
pub fn is_chunk_name(name: &str) -> bool {
    split_prefix(file_name(name)).is_some()
}

/// Remove one leading `{digits}_` prefix from a file name.
///
/// Names without a prefix are returned unchanged.
pub fn strip_chunk_prefix(name: &str) -> &str {
    match split_prefix(name) {
        Some((_, rest)) => rest,
        None => name,
    }
}

/// Order two chunk names for assembly.
///
/// Names compare by numeric index first, so `2_a` precedes `10_a`, then by
/// case-insensitive file name. Names without an index sort last.
pub fn assembly_order(a: &str, b: &str) -> Ordering {
    let key = |name: &str| {
        let index = parse_chunk_index(name);
        (index.is_none(), index, file_name(name).to_lowercase())
    };
    key(a).cmp(&key(b))
}

/// Sort chunk names or paths into assembly order.
pub fn sort_chunk_names<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| assembly_order(a.as_ref(), b.as_ref()));
}

/// Check that a client-supplied filename can be used as a single path segment.
pub fn validate_original_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidChunkName(
            "original filename must not be empty".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) || name.contains('\0') {
        return Err(crate::Error::InvalidChunkName(format!(
            "original filename is not a safe path segment: {name:?}"
        )));
    }
    Ok(())
}

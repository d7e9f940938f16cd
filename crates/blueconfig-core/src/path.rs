//! Path canonicalization and segment offsetting for the bucket substrate.
//!
//! Canonical form: a leading `root` segment, single `/` separators, no
//! trailing separator, and each segment sanitized (forbidden characters
//! replaced with `_`).

use crate::error::{BlueConfigError, BlueConfigResult};

const FORBIDDEN_CHARS: [char; 4] = ['\'', '"', '`', ' '];

/// Replace characters that cannot safely live in a bucket name with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Canonicalize a path: collapse repeated separators, strip leading/trailing
/// separators, prepend `root/` if absent, and sanitize every segment.
pub fn canonicalize(path: &str) -> BlueConfigResult<String> {
    let raw_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if raw_segments.is_empty() {
        return Ok("root".to_string());
    }

    let mut segments: Vec<String> = raw_segments.iter().map(|s| sanitize_segment(s)).collect();
    if segments[0] != "root" {
        segments.insert(0, "root".to_string());
    }
    Ok(segments.join("/"))
}

/// Split a canonical path into its ordered segments, including the leading
/// `root` segment.
pub fn segments(path: &str) -> BlueConfigResult<Vec<String>> {
    let canon = canonicalize(path)?;
    Ok(canon.split('/').map(|s| s.to_string()).collect())
}

/// Segments under `root`, used to navigate the in-memory bucket tree (whose
/// root bucket IS `root`, so the leading segment is not itself a traversal
/// step).
pub fn relative_segments(path: &str) -> BlueConfigResult<Vec<String>> {
    let mut segs = segments(path)?;
    segs.remove(0);
    Ok(segs)
}

/// Consume the last `k` segments of a path as a trailing offset (e.g. a
/// property name, or a property name plus value), returning the remaining
/// node path and the consumed segments in order.
///
/// Fails if `k` exceeds the segment count minus one — the remaining node
/// path must retain at least `root`.
pub fn split_for_offset(path: &str, k: usize) -> BlueConfigResult<(String, Vec<String>)> {
    let segs = segments(path)?;
    if k == 0 || k >= segs.len() {
        return Err(BlueConfigError::InvalidPath {
            path: path.to_string(),
            reason: format!("offset {k} exceeds segment count minus one"),
        });
    }
    let split_at = segs.len() - k;
    let node_path = segs[..split_at].join("/");
    let tail = segs[split_at..].to_vec();
    Ok((node_path, tail))
}

/// The final segment of a canonical path — conventionally a node's own name.
pub fn last_segment(path: &str) -> BlueConfigResult<String> {
    let segs = segments(path)?;
    Ok(segs.last().cloned().unwrap_or_else(|| "root".to_string()))
}

/// Whether a bucket or property name is reserved metadata (`__`-prefixed).
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__")
}

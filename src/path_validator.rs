// C1: Path Validator.
//
// Grounded on `original_source`'s `FileSystemManager._validate_path`, which runs a syntactic
// `..`/absolute check followed by a `resolve()`-and-prefix check. This port keeps both
// layers but makes the containment check exact (path-segment prefix, not the original's
// `str::startswith`, which would wrongly accept a sibling directory like `work-evil` against
// root `work`).

use std::path::{Component, Path, PathBuf};

use crate::error::InvalidPath;

/// Validates a caller-supplied relative path and maps it to an absolute path inside
/// `work_root`.
///
/// Rejection rules, applied in order:
/// 1. The raw string contains a `..` segment (checked before normalization, so that
///    `a/../../b` is caught even though it would resolve inside the root).
/// 2. The raw string is absolute.
/// 3. After joining onto `work_root`, the result does not have `work_root` as an ancestor.
pub fn validate(relative_path: &str, work_root: &Path) -> Result<PathBuf, InvalidPath> {
    if contains_dotdot_segment(relative_path) {
        return Err(InvalidPath::Traversal(relative_path.to_string()));
    }

    let candidate_raw = Path::new(relative_path);
    if candidate_raw.is_absolute() {
        return Err(InvalidPath::Absolute(relative_path.to_string()));
    }

    let joined = work_root.join(candidate_raw);
    if !is_contained(&joined, work_root) {
        return Err(InvalidPath::Escapes(relative_path.to_string()));
    }

    Ok(joined)
}

/// Scans the raw, un-normalized string for a literal `..` path segment.
fn contains_dotdot_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

/// Checks that `candidate` lies inside `root`, by path-segment prefix rather than string
/// prefix: `root = "/tmp/work"` must not accept `candidate = "/tmp/work-evil/x"`.
///
/// Neither path need exist on disk yet (the target file is typically about to be created),
/// so this compares the *lexical* component sequence rather than canonicalizing. Canonical
/// symlink-escape containment is re-checked by [`contained_after_write`] once the file has
/// actually been written, closing the gap the spec calls out between syntactic validation
/// and what the filesystem might later materialize via a symlink.
fn is_contained(candidate: &Path, root: &Path) -> bool {
    let root_components: Vec<Component> = normalize(root).collect();
    let candidate_components: Vec<Component> = normalize(candidate).collect();
    candidate_components.len() >= root_components.len()
        && candidate_components[..root_components.len()] == root_components[..]
}

/// Lexically normalizes a path's components, resolving `.` and `..` without touching the
/// filesystem (an un-rooted `..` past the start is simply dropped, which cannot happen here
/// since rule 1 already rejected any raw `..` segment before this function ever runs).
fn normalize(path: &Path) -> impl Iterator<Item = Component<'_>> {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.into_iter()
}

/// Post-write containment check: re-canonicalizes `path` and `root` and reconfirms the
/// ancestor relationship. This is the defense the spec calls out against symlink-based
/// escapes that only become observable once the filesystem has resolved them, and is run by
/// `workspace.rs` immediately after each file write.
pub fn contained_after_write(path: &Path, root: &Path) -> std::io::Result<bool> {
    let canonical_path = path.canonicalize()?;
    let canonical_root = root.canonicalize()?;
    Ok(is_contained(&canonical_path, &canonical_root))
}

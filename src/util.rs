// ABOUTME: Small filesystem helpers shared by the store and session modules.
// ABOUTME: Atomic whole-file writes via a temp file and rename.

use anyhow::{Context, Result};
use std::path::Path;

/// Write `bytes` to `path` atomically: the document is staged in a sibling
/// temp file and renamed over the target, so readers never observe a partial
/// write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

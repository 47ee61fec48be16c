//! Shared fixtures for the bufhandle benchmarks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh path under the temp directory, unique per process and call.
#[must_use]
pub fn scratch_path(tag: &str) -> PathBuf {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "bufhandle-bench-{tag}-{}-{seq}.dat",
        std::process::id()
    ))
}

/// `count` lines of roughly `width` bytes each.
#[must_use]
pub fn line_corpus(count: usize, width: usize) -> String {
    let mut out = String::with_capacity(count * (width + 1));
    for i in 0..count {
        let body = format!("{i:08}:");
        out.push_str(&body);
        out.extend(std::iter::repeat_n('.', width.saturating_sub(body.len())));
        out.push('\n');
    }
    out
}

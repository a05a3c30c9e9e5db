//! Purpose: Default scratch locations for record files created by the CLI.
//! Exports: `default_stress_path`.
//! Invariants: Paths live under the OS temp directory and embed the process id,
//! so concurrent stress runs never collide on one file.

use std::path::PathBuf;

pub(crate) fn default_stress_path() -> PathBuf {
    std::env::temp_dir().join(format!("recfile-stress-{}.rec", std::process::id()))
}

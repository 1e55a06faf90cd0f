//! Scratch-file marshalling and driver-program generation.
//!
//! Every non-trivial backend follows the same shape: the request input is
//! written to a scratch JSON file, a short generated driver imports `handler`
//! from the module's staged source, invokes it, and writes the return value
//! to a scratch output file. The scratch directory is removed on every exit
//! path, including timeout and cancellation, via `TempDir`'s drop.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use crate::domain::error::ExecError;

pub(crate) const DRIVER_FILE: &str = "driver.py";
pub(crate) const INPUT_FILE: &str = "input.json";
pub(crate) const OUTPUT_FILE: &str = "output.json";

/// Scratch working area for one execution.
pub(crate) struct Scratch {
    dir: TempDir,
}

impl Scratch {
    /// Create the scratch directory and persist the input object into it.
    pub(crate) fn create(input: &Value) -> Result<Self, ExecError> {
        let dir = TempDir::with_prefix("modrun-exec-")?;
        let scratch = Self { dir };
        std::fs::write(scratch.input_path(), serde_json::to_vec(input)?)?;
        Ok(scratch)
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn input_path(&self) -> PathBuf {
        self.dir.path().join(INPUT_FILE)
    }

    pub(crate) fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE)
    }

    pub(crate) fn driver_path(&self) -> PathBuf {
        self.dir.path().join(DRIVER_FILE)
    }

    /// Write a driver that resolves `handler` from `source_dir` on the host.
    pub(crate) fn write_driver(&self, source_dir: &Path, wrap_non_object: bool) -> io::Result<()> {
        let script = render_driver(
            &source_dir.display().to_string(),
            &self.input_path().display().to_string(),
            &self.output_path().display().to_string(),
            wrap_non_object,
        );
        std::fs::write(self.driver_path(), script)
    }

    /// Write an extra source file (inline handler module) into the scratch dir.
    pub(crate) fn write_file(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Read the driver's output file; missing or unparseable output maps to
    /// an empty object, matching the contract that module faults surface
    /// through the exit code rather than a platform error.
    pub(crate) fn read_output(&self) -> Value {
        std::fs::read(self.output_path())
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

/// Render the driver program with explicit (possibly in-container) paths.
pub(crate) fn render_driver(
    source_dir: &str,
    input_path: &str,
    output_path: &str,
    wrap_non_object: bool,
) -> String {
    let wrap = if wrap_non_object {
        "\nif not isinstance(result, dict):\n    result = {\"result\": result}\n"
    } else {
        "\n"
    };
    format!(
        r#"import json
import sys

sys.path.insert(0, '{source_dir}')

from handler import handler

with open('{input_path}', 'r') as f:
    data = json.load(f)

result = handler(data)
{wrap}
with open('{output_path}', 'w') as f:
    json.dump(result, f)
"#
    )
}

/// Wrap an inline code string into a `handler(input)` definition.
///
/// The stored code is the function body; each line is indented one level.
/// Blank lines are left untouched so the generated module stays valid.
pub(crate) fn render_inline_handler(code: &str) -> String {
    let mut script = String::from("def handler(input):\n");
    for line in code.lines() {
        if line.trim().is_empty() {
            script.push('\n');
        } else {
            script.push_str("    ");
            script.push_str(line);
            script.push('\n');
        }
    }
    // An empty body would be a syntax error the module didn't write.
    if code.lines().all(|l| l.trim().is_empty()) {
        script.push_str("    pass\n");
    }
    script
}

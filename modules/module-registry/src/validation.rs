//! Structural validation of uploaded artifacts.
//!
//! Checks run in order and short-circuit on the first failure, writing
//! exactly one `fail` validation-log row; a fully valid artifact writes one
//! `success` row and is handed over as an extracted directory.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::infra::storage::repo::Repository;

/// Token the handler file must contain, as a plain substring.
const HANDLER_TOKEN: &str = "def handler(";

const HANDLER_FILE: &str = "handler.py";
const REQUIREMENTS_FILE: &str = "requirements.txt";
const README_FILES: [&str; 2] = ["readme", "readme.md"];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Structural check failed; the message is safe to return to the caller.
    #[error("{0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A validated, extracted artifact. Holds its temp directory alive until the
/// artifact store has copied it.
#[derive(Debug)]
pub struct ValidatedArtifact {
    dir: TempDir,
}

impl ValidatedArtifact {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub struct ValidationPipeline {
    repo: Arc<Repository>,
}

impl ValidationPipeline {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Validate an uploaded archive.
    ///
    /// Checks, in order: the bytes extract cleanly as a single archive; the
    /// extracted tree contains (case-insensitive, recursive) `handler.py`,
    /// `requirements.txt`, and a `README`/`README.md`; and the handler file
    /// contains the literal `def handler(` token.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Rejected`] when a structural check fails
    /// (one `fail` log row written), or a database/I/O error.
    pub async fn validate_archive(
        &self,
        filename: &str,
        archive: &[u8],
    ) -> Result<ValidatedArtifact, ValidationError> {
        let dir = TempDir::with_prefix("modrun-upload-")?;

        let mut zip = match zip::ZipArchive::new(Cursor::new(archive)) {
            Ok(zip) => zip,
            Err(_) => {
                return self
                    .reject(filename, "not a valid archive".to_owned())
                    .await;
            }
        };
        if zip.extract(dir.path()).is_err() {
            return self
                .reject(filename, "not a valid archive".to_owned())
                .await;
        }

        let scan = scan_tree(dir.path());
        let mut missing = Vec::new();
        if scan.handler_path.is_none() {
            missing.push(HANDLER_FILE);
        }
        if !scan.has_requirements {
            missing.push(REQUIREMENTS_FILE);
        }
        if !scan.has_readme {
            missing.push("README/README.md");
        }
        if !missing.is_empty() {
            return self
                .reject(filename, format!("required files missing: {}", missing.join(", ")))
                .await;
        }

        let handler_path = scan.handler_path.unwrap_or_default();
        let handler_code = std::fs::read_to_string(&handler_path)?;
        if !handler_code.contains(HANDLER_TOKEN) {
            return self
                .reject(
                    filename,
                    format!("{HANDLER_FILE} does not define a '{HANDLER_TOKEN}...)' function"),
                )
                .await;
        }

        self.repo
            .insert_validation_log(filename, true, "validation passed")
            .await?;
        Ok(ValidatedArtifact { dir })
    }

    async fn reject(
        &self,
        filename: &str,
        message: String,
    ) -> Result<ValidatedArtifact, ValidationError> {
        self.repo
            .insert_validation_log(filename, false, &message)
            .await?;
        Err(ValidationError::Rejected(message))
    }
}

struct TreeScan {
    handler_path: Option<PathBuf>,
    has_requirements: bool,
    has_readme: bool,
}

fn scan_tree(root: &Path) -> TreeScan {
    let mut scan = TreeScan {
        handler_path: None,
        has_requirements: false,
        has_readme: false,
    };
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let lower = entry.file_name().to_string_lossy().to_lowercase();
        if lower == HANDLER_FILE && scan.handler_path.is_none() {
            scan.handler_path = Some(entry.path().to_path_buf());
        }
        if lower == REQUIREMENTS_FILE {
            scan.has_requirements = true;
        }
        if README_FILES.contains(&lower.as_str()) {
            scan.has_readme = true;
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, contents) in files {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn scan_finds_required_files_case_insensitively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/Handler.PY"), "def handler(input):\n    return input\n").unwrap();
        std::fs::write(dir.path().join("Requirements.txt"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo").unwrap();

        let scan = scan_tree(dir.path());
        assert!(scan.handler_path.is_some());
        assert!(scan.has_requirements);
        assert!(scan.has_readme);
    }

    #[test]
    fn valid_archive_layout_builds() {
        let bytes = build_zip(&[
            ("handler.py", "def handler(input):\n    return input\n"),
            ("requirements.txt", ""),
            ("README.md", "# demo"),
        ]);
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(zip.len(), 3);
        let dir = TempDir::new().unwrap();
        zip.extract(dir.path()).unwrap();
        assert!(dir.path().join("handler.py").is_file());
    }
}

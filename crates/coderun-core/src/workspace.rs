//! Session-private working directories holding the submitted source.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::{Builder, TempDir};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::recipes::{EntryPoint, Recipe};

/// Entry name used when no public class declaration is found.
pub const DEFAULT_ENTRY_NAME: &str = "Main";

fn public_class_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"public\s+(?:(?:final|abstract|static)\s+)*class\s+(\w+)")
            .expect("public class pattern is valid")
    })
}

/// First public class declared in `source`, if any.
pub fn public_class_name(source: &str) -> Option<&str> {
    public_class_pattern()
        .captures(source)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

/// The on-disk filename the recipe's toolchain expects for `source`.
pub fn entry_filename(recipe: &Recipe, source: &str) -> String {
    match recipe.entry_point {
        EntryPoint::MainFile => format!("main.{}", recipe.extension),
        EntryPoint::PublicClass => format!(
            "{}.{}",
            public_class_name(source).unwrap_or(DEFAULT_ENTRY_NAME),
            recipe.extension
        ),
    }
}

/// A uniquely named directory containing the session's source file.
///
/// The directory is removed when the workspace is closed or dropped,
/// whichever comes first.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    filename: String,
}

impl Workspace {
    /// Create the directory and write `source` into it verbatim.
    pub async fn materialize(
        config: &EngineConfig,
        recipe: &Recipe,
        source: &str,
    ) -> Result<Self, EngineError> {
        let mut builder = Builder::new();
        builder.prefix(&config.work_dir_prefix);
        let dir = match &config.work_dir_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| EngineError::workspace("Failed to create temp directory", e))?;

        let filename = entry_filename(recipe, source);
        let workspace = Self { dir, filename };
        workspace
            .write_source(source)
            .await
            .map_err(|e| EngineError::workspace("Failed to write code file", e))?;

        log::debug!(
            "Materialized {} source at {}",
            recipe.language,
            workspace.source_path().display()
        );
        Ok(workspace)
    }

    async fn write_source(&self, source: &str) -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(self.source_path()).await?;
        file.write_all(source.as_bytes()).await?;
        file.flush().await
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join(&self.filename)
    }

    /// Host side of the container bind mount.
    pub fn bind_source(&self) -> Result<String, EngineError> {
        self.path()
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::workspace(
                    "Failed to create temp directory",
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "working directory path is not valid UTF-8",
                    ),
                )
            })
    }

    /// Remove the directory, reporting failures instead of swallowing them.
    pub fn close(self) -> Result<(), EngineError> {
        self.dir
            .close()
            .map_err(|e| EngineError::workspace("Failed to remove temp directory", e))
    }
}

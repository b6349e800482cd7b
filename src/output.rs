//! Run-directory creation and outcome persistence.
//!
//! Each run writes into a freshly created directory under the configured
//! parent, named by a two-word adjective-noun token drawn from fixed word
//! lists with a run-scoped random source. Files inside a run never
//! overwrite anything because the directory is new. Writes go through a
//! temporary file and rename so a crashed run leaves no half-written
//! artifact.

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{CategorizedError, ErrorCategory};

/// Attempts at picking an unused run name before giving up.
const NAME_ATTEMPTS: u32 = 16;

/// Adjectives for run names.
const ADJECTIVES: [&str; 40] = [
    "amber", "ancient", "bold", "brisk", "calm", "cedar", "clever", "coral", "crisp",
    "curious", "dapper", "deep", "dusty", "eager", "early", "fleet", "gentle", "gilded",
    "hardy", "hidden", "humble", "keen", "limber", "lively", "lunar", "mellow", "misty",
    "nimble", "patient", "placid", "proud", "quiet", "rustic", "sable", "solar", "steady",
    "swift", "tidal", "vivid", "wry",
];

/// Nouns for run names.
const NOUNS: [&str; 40] = [
    "aspen", "badger", "basin", "beacon", "birch", "bison", "brook", "canyon", "cedar",
    "comet", "crane", "delta", "falcon", "fern", "fjord", "gale", "garnet", "glacier",
    "harbor", "heron", "inlet", "jasper", "juniper", "lagoon", "lark", "maple", "meadow",
    "mesa", "otter", "petrel", "pine", "quartz", "raven", "ridge", "sparrow", "summit",
    "thicket", "tundra", "walnut", "willow",
];

/// Draw a `adjective-noun` run name from the fixed word lists.
pub fn generate_run_name(rng: &mut impl Rng) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("harbor");
    format!("{adjective}-{noun}")
}

/// File name used for the synthesis artifact of `model`.
pub fn synthesis_file_name(model: &str, extension: &str) -> String {
    format!("{model}-synthesis.{extension}")
}

/// Persists outcomes into a per-run directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    parent: PathBuf,
    dir_mode: u32,
    file_mode: u32,
    extension: String,
}

impl OutputWriter {
    /// Create a writer rooted at `parent` with the configured modes.
    pub fn new(
        parent: impl Into<PathBuf>,
        dir_mode: u32,
        file_mode: u32,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            dir_mode,
            file_mode,
            extension: extension.into(),
        }
    }

    /// Create a fresh run directory with a generated name.
    ///
    /// Collisions with existing directories are resolved by drawing a new
    /// name; creation itself is the atomicity point (`create_dir` fails
    /// on an existing path).
    ///
    /// # Errors
    ///
    /// File-system failures surface as [`ErrorCategory::Unknown`] with a
    /// clear message.
    pub fn create_run_dir(&self, rng: &mut impl Rng) -> Result<PathBuf, CategorizedError> {
        fs::create_dir_all(&self.parent).map_err(|e| fs_error("create output parent", e))?;

        let mut attempts = 0_u32;
        loop {
            let candidate = self.parent.join(generate_run_name(rng));
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    set_permissions(&candidate, self.dir_mode)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempts = attempts.saturating_add(1);
                    if attempts >= NAME_ATTEMPTS {
                        return Err(CategorizedError::new(
                            ErrorCategory::Unknown,
                            format!(
                                "could not find an unused run directory name under {}",
                                self.parent.display()
                            ),
                        ));
                    }
                }
                Err(e) => return Err(fs_error("create run directory", e)),
            }
        }
    }

    /// Write one outcome file `<model>.<ext>` inside the run directory.
    ///
    /// OpenRouter model slugs contain `/`; intermediate directories are
    /// created as needed. The write goes to a temporary sibling and is
    /// renamed into place.
    ///
    /// # Errors
    ///
    /// File-system failures surface as [`ErrorCategory::Unknown`].
    pub fn write_output(
        &self,
        run_dir: &Path,
        model: &str,
        content: &str,
    ) -> Result<PathBuf, CategorizedError> {
        self.write_file(run_dir, format!("{model}.{}", self.extension), content)
    }

    /// Write the synthesis artifact for `model` inside the run directory.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`OutputWriter::write_output`].
    pub fn write_synthesis(
        &self,
        run_dir: &Path,
        model: &str,
        content: &str,
    ) -> Result<PathBuf, CategorizedError> {
        self.write_file(run_dir, synthesis_file_name(model, &self.extension), content)
    }

    fn write_file(
        &self,
        run_dir: &Path,
        relative: String,
        content: &str,
    ) -> Result<PathBuf, CategorizedError> {
        let path = run_dir.join(relative);
        let dir = path
            .parent()
            .ok_or_else(|| {
                CategorizedError::new(
                    ErrorCategory::Unknown,
                    format!("output path {} has no parent", path.display()),
                )
            })?
            .to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| fs_error("create output subdirectory", e))?;

        let leaf = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output");
        let tmp = dir.join(format!(".{leaf}.tmp"));
        fs::write(&tmp, content).map_err(|e| fs_error("write output file", e))?;
        set_permissions(&tmp, self.file_mode)?;
        fs::rename(&tmp, &path).map_err(|e| fs_error("rename output file", e))?;

        Ok(path)
    }
}

fn fs_error(action: &str, err: std::io::Error) -> CategorizedError {
    CategorizedError::new(ErrorCategory::Unknown, format!("failed to {action}: {err}"))
        .with_source(err)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), CategorizedError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| fs_error("set permissions", e))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), CategorizedError> {
    Ok(())
}

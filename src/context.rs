//! File-system context gathering and prompt assembly.
//!
//! Walks the operator's context paths, filters by extension and path
//! substring, and renders every kept file as a fenced block under its
//! path header. The rendered block joins the instructions to form the
//! run's immutable prompt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::{debug, warn};

/// Bytes sniffed from each file to detect binary content.
const BINARY_SNIFF_BYTES: usize = 1024;

/// Header placed between the instructions and the context block.
const CONTEXT_HEADER: &str = "## Context\n";

/// Separator between the instructions and the synthesis inputs.
pub(crate) const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Filters applied while walking context paths.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Keep only files with one of these extensions; empty keeps all.
    pub include_extensions: Vec<String>,
    /// Drop files whose path contains any of these substrings.
    pub exclude_substrings: Vec<String>,
}

impl ContextOptions {
    fn keeps(&self, path: &Path) -> bool {
        if !self.include_extensions.is_empty() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            if !self
                .include_extensions
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            {
                return false;
            }
        }

        let rendered = path.to_string_lossy();
        !self
            .exclude_substrings
            .iter()
            .any(|needle| rendered.contains(needle.as_str()))
    }
}

/// The rendered context block plus its statistics.
#[derive(Debug, Clone, Default)]
pub struct RenderedContext {
    /// Markdown-rendered file blocks, empty when no paths were given.
    pub text: String,
    /// Number of files included.
    pub file_count: usize,
    /// Total bytes of included file content.
    pub total_bytes: usize,
}

/// Gather and render context from the given paths.
///
/// Directories are walked recursively in sorted order for deterministic
/// output; hidden entries and binary-looking files are skipped with a
/// debug log, unreadable files with a warning.
///
/// # Errors
///
/// Returns an error when a named path does not exist or a directory
/// cannot be read.
pub fn gather(paths: &[PathBuf], options: &ContextOptions) -> anyhow::Result<RenderedContext> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            anyhow::bail!("context path does not exist: {}", path.display());
        }
        collect_files(path, options, &mut files)?;
    }
    files.sort();
    files.dedup();

    let mut rendered = RenderedContext::default();
    for file in files {
        let bytes = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "skipping unreadable context file");
                continue;
            }
        };
        if looks_binary(&bytes) {
            debug!(path = %file.display(), "skipping binary context file");
            continue;
        }
        let content = String::from_utf8_lossy(&bytes);

        rendered.text.push_str(&format!(
            "### {}\n```\n{}\n```\n\n",
            file.display(),
            content.trim_end_matches('\n')
        ));
        rendered.file_count = rendered.file_count.saturating_add(1);
        rendered.total_bytes = rendered.total_bytes.saturating_add(bytes.len());
    }

    Ok(rendered)
}

fn collect_files(
    path: &Path,
    options: &ContextOptions,
    files: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    if is_hidden(path) {
        debug!(path = %path.display(), "skipping hidden entry");
        return Ok(());
    }

    if path.is_dir() {
        let entries = fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?;
        let mut children: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to list {}", path.display()))?;
            children.push(entry.path());
        }
        children.sort();
        for child in children {
            collect_files(&child, options, files)?;
        }
        return Ok(());
    }

    if options.keeps(path) {
        files.push(path.to_path_buf());
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

/// Join instructions and rendered context into the run's frozen prompt.
pub fn assemble_prompt(instructions: &str, context: &RenderedContext) -> String {
    if context.text.is_empty() {
        return instructions.trim_end().to_owned();
    }
    format!(
        "{}{}{}{}",
        instructions.trim_end(),
        SECTION_SEPARATOR,
        CONTEXT_HEADER,
        context.text.trim_end()
    )
}

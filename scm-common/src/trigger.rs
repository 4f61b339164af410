//! Managed trigger blocks inside SCM hook scripts.
//!
//! A managed block is a sentinel-delimited region the daemon owns inside an
//! otherwise user-editable script:
//!
//! ```text
//! # BEGIN SOURCEFORGE SECTION - Do not remove these lines
//! ...managed lines...
//! # END SOURCEFORGE SECTION
//! ```
//!
//! [`merge`] replaces the first managed region in place (or prepends the
//! block when there is none) and drops any further managed regions. Content
//! outside the sentinels is kept line for line, so re-applying a block is
//! byte-stable and never clobbers user edits.

use crate::errors::{ErrorCode, IntegrationError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Text following the comment marker on the opening sentinel line.
pub const BEGIN_SENTINEL: &str = "BEGIN SOURCEFORGE SECTION - Do not remove these lines";

/// Text following the comment marker on the closing sentinel line.
pub const END_SENTINEL: &str = "END SOURCEFORGE SECTION";

const BEGIN_PREFIX: &str = "BEGIN SOURCEFORGE SECTION";

/// Hook events the daemon installs scripts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreCommit,
    PostCommit,
    PreRevpropChange,
}

impl HookEvent {
    /// File name of the hook script inside a repository `hooks/` directory.
    pub fn script_name(&self) -> &'static str {
        match self {
            HookEvent::PreCommit => "pre-commit",
            HookEvent::PostCommit => "post-commit",
            HookEvent::PreRevpropChange => "pre-revprop-change",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.script_name())
    }
}

/// A sentinel-delimited, replaceable region of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBlock {
    comment: String,
    body: Vec<String>,
}

impl TriggerBlock {
    /// Block whose sentinels start with `#`.
    pub fn new() -> Self {
        Self {
            comment: "#".to_string(),
            body: Vec::new(),
        }
    }

    #[cfg(test)]
    fn with_comment(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            body: Vec::new(),
        }
    }

    /// Append one body line (without trailing newline).
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(line.into());
        self
    }

    /// Append every line of `text`.
    pub fn lines(mut self, text: &str) -> Self {
        self.body.extend(text.lines().map(str::to_string));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn begin_line(&self) -> String {
        format!("{} {}", self.comment, BEGIN_SENTINEL)
    }

    pub fn end_line(&self) -> String {
        format!("{} {}", self.comment, END_SENTINEL)
    }

    fn is_begin(&self, line: &str) -> bool {
        line.starts_with(&format!("{} {}", self.comment, BEGIN_PREFIX))
    }

    fn is_end(&self, line: &str) -> bool {
        line.starts_with(&self.end_line())
    }

    /// Rendered block, newline-terminated. Empty blocks render to nothing.
    pub fn render(&self) -> String {
        self.render_with("\n")
    }

    fn render_with(&self, eol: &str) -> String {
        if self.body.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        out.push_str(&self.begin_line());
        out.push_str(eol);
        for line in &self.body {
            out.push_str(line);
            out.push_str(eol);
        }
        out.push_str(&self.end_line());
        out.push_str(eol);
        out
    }
}

impl Default for TriggerBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `block` into `source` text and return the new script text.
///
/// The first managed region is replaced in place; later managed regions are
/// dropped. Without a managed region the block is prepended. An opening
/// sentinel with no closing sentinel consumes the rest of the input.
/// Lines outside the managed region keep their original endings; the block
/// uses CRLF when the source does.
pub fn merge(source: &str, block: &TriggerBlock) -> String {
    let eol = if source.contains("\r\n") { "\r\n" } else { "\n" };
    let rendered = block.render_with(eol);
    let mut out = String::with_capacity(source.len() + rendered.len());
    let mut inserted = false;
    let mut in_region = false;

    for raw in source.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if in_region {
            if block.is_end(line) {
                in_region = false;
            }
            continue;
        }
        if block.is_begin(line) {
            if !inserted {
                out.push_str(&rendered);
                inserted = true;
            }
            in_region = true;
            continue;
        }
        out.push_str(raw);
        if !raw.ends_with('\n') {
            out.push_str(eol);
        }
    }

    if !inserted {
        out.insert_str(0, &rendered);
    }
    out
}

/// Read `source` (missing means empty), merge `block`, write `dest`.
///
/// `source` and `dest` may be the same file.
pub fn merge_file(source: &Path, dest: &Path, block: &TriggerBlock) -> Result<()> {
    let existing = match fs::read_to_string(source) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(trigger_error("read", source, e)),
    };
    let merged = merge(&existing, block);
    atomic_write(dest, merged.as_bytes())?;
    debug!(
        source = %source.display(),
        dest = %dest.display(),
        bytes = merged.len(),
        "Merged managed trigger block"
    );
    Ok(())
}

/// Writes content to a file atomically using a temporary file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let mut file = fs::File::create(&temp_path).map_err(|e| trigger_error("create", &temp_path, e))?;
    file.write_all(content)
        .map_err(|e| trigger_error("write", &temp_path, e))?;
    file.sync_all()
        .map_err(|e| trigger_error("sync", &temp_path, e))?;

    // Keep the mode of the file being replaced (hook scripts are executable).
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&temp_path, meta.permissions());
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(trigger_error("rename", path, e));
    }
    Ok(())
}

fn trigger_error(action: &str, path: &Path, err: std::io::Error) -> IntegrationError {
    IntegrationError::io(action, path, err).with_code(ErrorCode::ExecTriggerMergeFailed)
}

//! Oracle response extraction
//!
//! The oracle replies with markdown-ish free text. This module is the only
//! place that text is interpreted; everything past this boundary works with
//! the typed [`ExtractedResponse`], never raw strings or loose JSON.
//!
//! Recognized shapes:
//! - fenced code block whose info string carries `path=<relative path>`,
//!   or whose first line is a `// path: <p>` / `# path: <p>` marker
//!   → full-file write
//! - fenced `bash` / `sh` / `shell` block → one command per non-empty,
//!   non-comment line
//! - prose outside fences → summary (first non-empty paragraph)

use regex::Regex;
use std::sync::OnceLock;

/// A full-file write extracted from oracle text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Path relative to the sandbox root
    pub path: String,
    /// Complete file contents
    pub contents: String,
}

/// Typed view of one oracle reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedResponse {
    /// File writes, in order of appearance
    pub files: Vec<ExtractedFile>,
    /// Shell commands, in order of appearance
    pub commands: Vec<String>,
    /// Prose summary of what the reply does
    pub summary: String,
}

/// Extraction failures
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The reply contained neither files nor commands
    #[error("oracle reply contained no files or commands: {reason}")]
    NoContent {
        /// What was actually found
        reason: String,
    },
}

/// Parser for oracle replies
#[derive(Debug, Default)]
pub struct ResponseExtractor;

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^```\s*([A-Za-z0-9_+.-]*)\s*(?:path=(\S+))?\s*$").expect("static regex")
    })
}

fn path_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?://|#)\s*path:\s*(\S+)\s*$").expect("static regex"))
}

const SHELL_LANGS: &[&str] = &["bash", "sh", "shell"];

impl ResponseExtractor {
    /// Create a new extractor
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse an oracle reply into files, commands, and a summary
    ///
    /// # Errors
    /// [`ExtractError::NoContent`] when no file block and no shell block is
    /// present; a raw prose reply never silently becomes work to execute.
    pub fn extract(&self, text: &str) -> Result<ExtractedResponse, ExtractError> {
        let mut response = ExtractedResponse::default();
        let mut prose = Vec::new();

        let mut lines = text.lines().peekable();
        while let Some(line) = lines.next() {
            let Some(caps) = fence_open_re().captures(line.trim_end()) else {
                prose.push(line);
                continue;
            };

            let lang = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let header_path = caps.get(2).map(|m| m.as_str().to_string());

            let mut block = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_end() == "```" {
                    break;
                }
                block.push(inner);
            }

            if SHELL_LANGS.contains(&lang.as_str()) && header_path.is_none() {
                for command in block
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                {
                    response.commands.push(command.to_string());
                }
                continue;
            }

            // File block: path from the info string, else a marker line.
            let (path, body_start) = match header_path {
                Some(p) => (Some(p), 0),
                None => match block.first().and_then(|l| path_marker_re().captures(l.trim())) {
                    Some(caps) => (Some(caps[1].to_string()), 1),
                    None => (None, 0),
                },
            };

            match path {
                Some(path) => {
                    let mut contents = block[body_start..].join("\n");
                    contents.push('\n');
                    response.files.push(ExtractedFile { path, contents });
                }
                // A code block without a destination is illustrative prose.
                None => prose.extend(block),
            }
        }

        if response.files.is_empty() && response.commands.is_empty() {
            return Err(ExtractError::NoContent {
                reason: if text.trim().is_empty() {
                    "empty reply".to_string()
                } else {
                    "prose only, no file or shell blocks".to_string()
                },
            });
        }

        response.summary = first_paragraph(&prose);
        Ok(response)
    }

    /// Pull the first proposed command out of a fix reply
    ///
    /// Accepts either a shell block or a bare command line. Returns `None`
    /// for empty replies, so the caller treats it like the refusal sentinel.
    #[must_use]
    pub fn extract_fix_command(&self, text: &str) -> Option<String> {
        if let Ok(parsed) = self.extract(text) {
            if let Some(first) = parsed.commands.first() {
                return Some(first.clone());
            }
        }
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with("```"))
            .map(str::to_string)
    }
}

fn first_paragraph(prose: &[&str]) -> String {
    let mut paragraph = Vec::new();
    for line in prose.iter().map(|l| l.trim()) {
        if line.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }
    paragraph.join(" ")
}

//! Input normalization.
//!
//! Source-specific payloads (raw text, OCR output, audio transcript) are
//! collapsed into a canonical [`NormalizedInput`] before anything downstream
//! sees them. Pure; no network calls. Hashing for every cache tier runs over
//! the normalized content, so normalization is the single place that decides
//! whether two requests are "the same".

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Where the raw payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Image,
    Recording,
}

/// Caller-supplied payload: plain text, or the textual description already
/// extracted from an image or recording by the intake layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    pub payload: String,
    pub source_kind: SourceKind,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

impl RawInput {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            source_kind: SourceKind::Text,
            locale: default_locale(),
        }
    }
}

/// Canonical input. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedInput {
    pub content: String,
    pub source_kind: SourceKind,
    pub locale: String,
}

/// Normalize a raw payload: unify line endings, collapse horizontal
/// whitespace runs, trim, and cap length.
pub fn normalize(raw: &RawInput, max_chars: usize) -> Result<NormalizedInput, PipelineError> {
    let unified = raw.payload.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for line in unified.lines() {
        let collapsed = collapse_spaces(line.trim_end());
        lines.push(collapsed);
    }
    // Drop leading/trailing blank lines and squeeze interior runs to one.
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let mut content = String::new();
    let mut prev_blank = false;
    for line in &lines {
        if line.is_empty() {
            if prev_blank {
                continue;
            }
            prev_blank = true;
        } else {
            prev_blank = false;
        }
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(line);
    }

    if content.is_empty() {
        return Err(PipelineError::InvalidInput(
            "input is empty after normalization".to_string(),
        ));
    }
    let char_count = content.chars().count();
    if char_count > max_chars {
        return Err(PipelineError::InvalidInput(format!(
            "input is {} characters, maximum is {}",
            char_count, max_chars
        )));
    }

    Ok(NormalizedInput {
        content,
        source_kind: raw.source_kind,
        locale: raw.locale.clone(),
    })
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            in_run = false;
            out.push(ch);
        }
    }
    out
}

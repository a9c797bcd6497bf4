//! Console lines relayed from the build tool.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static ERROR_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|failed|ошибка)\b").expect("static regex"));
static WARNING_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(warning|предупреждение)\b").expect("static regex"));
static SUCCESS_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(success|successful|completed|успешно)\b").expect("static regex"));
static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})%").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Highlighting class of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputLine {
    pub text: String,
    pub stream: StreamKind,
    pub severity: Severity,
    /// Completion percentage, when the line reports one.
    pub progress: Option<f32>,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, stream: StreamKind) -> Self {
        let text = text.into();
        let severity = classify(&text, stream);
        let progress = parse_progress(&text);
        Self {
            text,
            stream,
            severity,
            progress,
        }
    }
}

/// Everything on stderr is an error; stdout lines are matched by keyword.
pub fn classify(line: &str, stream: StreamKind) -> Severity {
    if stream == StreamKind::Stderr || ERROR_WORDS.is_match(line) {
        Severity::Error
    } else if WARNING_WORDS.is_match(line) {
        Severity::Warning
    } else if SUCCESS_WORDS.is_match(line) {
        Severity::Success
    } else {
        Severity::Info
    }
}

/// Extracts progress from UBT's `[3/42]` counters or a `NN%` token.
pub fn parse_progress(line: &str) -> Option<f32> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some((nums, _)) = rest.split_once(']') {
            if let Some((current, total)) = nums.split_once('/') {
                if let (Ok(c), Ok(t)) = (current.trim().parse::<f32>(), total.trim().parse::<f32>()) {
                    if t > 0.0 {
                        return Some((c / t) * 100.0);
                    }
                }
            }
        }
    }

    let caps = PERCENT.captures(line)?;
    let pct: f32 = caps.get(1)?.as_str().parse().ok()?;
    (pct <= 100.0).then_some(pct)
}

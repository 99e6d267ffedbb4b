//! Request-mode classification.
//!
//! A mode is a coarse request category that selects which model cascade to
//! attempt. Classification is a pure function of the explicit override, the
//! prompt text, and the attachment set.

use std::fmt;
use std::str::FromStr;

use crate::core::attachment::{Attachment, MimeCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    General,
    Code,
    Vision,
    Ocr,
    Audio,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::General => "general",
            Mode::Code => "code",
            Mode::Vision => "vision",
            Mode::Ocr => "ocr",
            Mode::Audio => "audio",
        }
    }

    /// Instruction substituted when the user supplied attachments but no
    /// text, so a request never goes out with fully empty content.
    pub fn placeholder_prompt(self) -> Option<&'static str> {
        match self {
            Mode::Audio => Some("Transcribe this audio verbatim."),
            Mode::Vision => Some("Describe this image in detail."),
            Mode::Ocr => Some("Extract the text from this document."),
            Mode::General | Mode::Code => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for on the command line: a concrete mode, or
/// automatic classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    Auto,
    Explicit(Mode),
}

impl FromStr for ModeSelection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(ModeSelection::Auto),
            "general" => Ok(ModeSelection::Explicit(Mode::General)),
            "code" => Ok(ModeSelection::Explicit(Mode::Code)),
            "vision" => Ok(ModeSelection::Explicit(Mode::Vision)),
            "ocr" => Ok(ModeSelection::Explicit(Mode::Ocr)),
            "audio" => Ok(ModeSelection::Explicit(Mode::Audio)),
            other => Err(format!(
                "unknown mode '{other}' (expected auto, general, code, vision, ocr, or audio)"
            )),
        }
    }
}

/// Keywords whose presence in the prompt suggests a code-oriented request.
const CODE_MARKERS: &[&str] = &[
    "code",
    "function",
    "script",
    "regex",
    "json",
    "compile",
    "stack trace",
];

/// Assign a mode. First matching rule wins: explicit override, audio/video
/// attachment, PDF, image, code-marker keyword, general.
pub fn classify(selection: ModeSelection, text: &str, attachments: &[Attachment]) -> Mode {
    if let ModeSelection::Explicit(mode) = selection {
        return mode;
    }

    let has = |category: MimeCategory| attachments.iter().any(|a| a.category == category);

    if has(MimeCategory::Audio) || has(MimeCategory::Video) {
        return Mode::Audio;
    }
    if has(MimeCategory::Pdf) {
        return Mode::Ocr;
    }
    if has(MimeCategory::Image) {
        return Mode::Vision;
    }

    let lowered = text.to_lowercase();
    if CODE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Mode::Code;
    }

    Mode::General
}

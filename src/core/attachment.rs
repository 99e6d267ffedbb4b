//! File attachments supplied on the command line.
//!
//! An attachment is ephemeral: it is read once per invocation, resolved to
//! a MIME category, and absorbed into the outgoing message content (and
//! from there into history) as either an inline text part or a data URL.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Image,
    Audio,
    Video,
    Pdf,
    Text,
    Other,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub category: MimeCategory,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct AttachmentError {
    pub path: String,
    pub source: std::io::Error,
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read attachment {}: {}", self.path, self.source)
    }
}

impl std::error::Error for AttachmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let data = std::fs::read(path).map_err(|source| AttachmentError {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(&name, data))
    }

    pub fn from_bytes(name: &str, data: Vec<u8>) -> Self {
        let mime_type = mime_for_name(name, &data);
        let category = categorize(&mime_type);
        Attachment {
            name: name.to_string(),
            mime_type,
            category,
            data,
        }
    }

    /// Inline base64 representation suitable for a multipart data URL.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64.encode(&self.data)
        )
    }

    /// For plain-text attachments, the decoded content labelled with the
    /// file name so it can be inlined into the prompt.
    pub fn inline_text(&self) -> Option<String> {
        if self.category != MimeCategory::Text {
            return None;
        }
        let text = String::from_utf8_lossy(&self.data);
        Some(format!("--- File: {} ---\n{}", self.name, text))
    }
}

fn categorize(mime_type: &str) -> MimeCategory {
    if mime_type.starts_with("image/") {
        MimeCategory::Image
    } else if mime_type.starts_with("audio/") {
        MimeCategory::Audio
    } else if mime_type.starts_with("video/") {
        MimeCategory::Video
    } else if mime_type == "application/pdf" {
        MimeCategory::Pdf
    } else if mime_type.starts_with("text/") || mime_type == "application/json" {
        MimeCategory::Text
    } else {
        MimeCategory::Other
    }
}

fn mime_for_name(name: &str, data: &[u8]) -> String {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let known = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "json" => "application/json",
        "txt" | "md" | "rs" | "go" | "py" | "js" | "ts" | "toml" | "yaml" | "yml" | "csv"
        | "log" => "text/plain",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }

    // Unknown extension: treat valid UTF-8 as plain text, else opaque bytes.
    if std::str::from_utf8(data).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_drives_category() {
        assert_eq!(
            Attachment::from_bytes("a.png", vec![1, 2]).category,
            MimeCategory::Image
        );
        assert_eq!(
            Attachment::from_bytes("a.mp3", vec![1, 2]).category,
            MimeCategory::Audio
        );
        assert_eq!(
            Attachment::from_bytes("a.webm", vec![1, 2]).category,
            MimeCategory::Video
        );
        assert_eq!(
            Attachment::from_bytes("a.pdf", vec![1, 2]).category,
            MimeCategory::Pdf
        );
        assert_eq!(
            Attachment::from_bytes("a.md", b"# hi".to_vec()).category,
            MimeCategory::Text
        );
    }

    #[test]
    fn unknown_extension_sniffs_utf8() {
        assert_eq!(
            Attachment::from_bytes("notes.clip", b"plain words".to_vec()).category,
            MimeCategory::Text
        );
        assert_eq!(
            Attachment::from_bytes("blob.clip", vec![0xff, 0xfe, 0x00, 0x80]).category,
            MimeCategory::Other
        );
    }

    #[test]
    fn data_url_embeds_mime_and_base64() {
        let attachment = Attachment::from_bytes("a.png", vec![0, 1, 2]);
        let url = attachment.data_url();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn inline_text_labels_file() {
        let attachment = Attachment::from_bytes("notes.txt", b"hello".to_vec());
        let inline = attachment.inline_text().expect("text attachment");
        assert!(inline.contains("--- File: notes.txt ---"));
        assert!(inline.contains("hello"));
        assert!(Attachment::from_bytes("a.png", vec![1])
            .inline_text()
            .is_none());
    }
}

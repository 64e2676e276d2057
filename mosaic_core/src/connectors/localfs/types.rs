use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One walked filesystem entry, relative to the provider root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// `/`-separated path relative to the root
    pub rel_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub kind: FileKind,
}

impl FileRecord {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Relative path of the containing directory; `None` at the root.
    pub fn parent(&self) -> Option<&str> {
        self.rel_path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
    Directory,
}

impl FileKind {
    pub fn entity_type(&self) -> &'static str {
        match self {
            FileKind::Image => "file.media.image",
            FileKind::Video => "file.media.video",
            FileKind::Audio => "file.media.audio",
            FileKind::Document => "file.document",
            FileKind::Other => "file",
            FileKind::Directory => "collection",
        }
    }
}

/// Detect file kind from path
pub fn detect_file_kind(path: &Path) -> FileKind {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return FileKind::Other,
    };

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "tif" | "tiff" | "bmp"
        | "raw" | "cr2" | "nef" | "arw" | "dng" => FileKind::Image,
        "mp4" | "mov" | "mkv" | "avi" | "webm" | "m4v" | "wmv" | "mpg" | "mpeg" => FileKind::Video,
        "mp3" | "flac" | "wav" | "ogg" | "m4a" | "aac" | "opus" | "wma" => FileKind::Audio,
        "pdf" | "epub" | "docx" | "doc" | "odt" | "rtf" | "html" | "htm" | "md" | "markdown"
        | "txt" | "text" => FileKind::Document,
        _ => FileKind::Other,
    }
}

pub fn mime_type(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        "txt" | "text" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_kind_is_case_insensitive() {
        assert_eq!(detect_file_kind(Path::new("a/IMG_01.JPG")), FileKind::Image);
        assert_eq!(detect_file_kind(Path::new("clip.mkv")), FileKind::Video);
        assert_eq!(detect_file_kind(Path::new("notes.md")), FileKind::Document);
        assert_eq!(detect_file_kind(Path::new("Makefile")), FileKind::Other);
        assert_eq!(FileKind::Audio.entity_type(), "file.media.audio");
    }
}

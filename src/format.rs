//! Display helpers for sizes and MIME types
//!
//! Pure functions; collaborators may memoize them freely.

use std::path::Path;

use crate::drive::FOLDER_MIME_TYPE;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable size, 1024-based with one decimal place
pub fn format_size(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "Unknown size".to_string();
    };

    let mut size = bytes as f64;
    for unit in SIZE_UNITS {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

/// Like [`format_size`], for sizes still in their textual wire form
pub fn format_size_text(raw: Option<&str>) -> String {
    match raw.map(|s| s.trim().parse::<u64>()) {
        Some(Ok(bytes)) => format_size(Some(bytes)),
        _ => "Unknown size".to_string(),
    }
}

/// Coarse category of a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeCategory {
    Folder,
    Image,
    Video,
    Audio,
    Document,
    Spreadsheet,
    Presentation,
    File,
}

impl MimeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeCategory::Folder => "folder",
            MimeCategory::Image => "image",
            MimeCategory::Video => "video",
            MimeCategory::Audio => "audio",
            MimeCategory::Document => "document",
            MimeCategory::Spreadsheet => "spreadsheet",
            MimeCategory::Presentation => "presentation",
            MimeCategory::File => "file",
        }
    }
}

/// Map a MIME type to its category
pub fn classify_mime(mime_type: &str) -> MimeCategory {
    let mime = mime_type.trim().to_ascii_lowercase();

    if mime == FOLDER_MIME_TYPE {
        return MimeCategory::Folder;
    }
    if mime.starts_with("image/") {
        return MimeCategory::Image;
    }
    if mime.starts_with("video/") {
        return MimeCategory::Video;
    }
    if mime.starts_with("audio/") {
        return MimeCategory::Audio;
    }

    // Spreadsheet and presentation checks come before the generic text/* rule
    if mime == "application/vnd.google-apps.spreadsheet"
        || mime == "application/vnd.ms-excel"
        || mime.contains("spreadsheetml")
        || mime == "text/csv"
    {
        return MimeCategory::Spreadsheet;
    }
    if mime == "application/vnd.google-apps.presentation"
        || mime == "application/vnd.ms-powerpoint"
        || mime.contains("presentationml")
    {
        return MimeCategory::Presentation;
    }
    if mime == "application/vnd.google-apps.document"
        || mime == "application/pdf"
        || mime == "application/msword"
        || mime.contains("wordprocessingml")
        || mime.starts_with("text/")
    {
        return MimeCategory::Document;
    }

    MimeCategory::File
}

/// Best-effort MIME type for a local file, from its extension
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

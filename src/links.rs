//! Shareable link parsing

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns tried in order; the first capture wins
static ID_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"/folders/([a-zA-Z0-9_-]+)").expect("valid folder pattern"),
        Regex::new(r"/file/d/([a-zA-Z0-9_-]+)").expect("valid file pattern"),
        Regex::new(r"[?&]id=([a-zA-Z0-9_-]+)").expect("valid id pattern"),
    ]
});

/// Strings longer than this with no path separator are taken as bare ids
const MIN_BARE_ID_LEN: usize = 20;

/// Extract a file or folder id from a shareable URL or a bare id
pub fn extract_id(url: &str) -> Option<String> {
    for pattern in ID_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(url) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }

    if url.len() > MIN_BARE_ID_LEN && !url.contains('/') {
        return Some(url.to_string());
    }

    None
}

/// Browser URL for a file
pub fn file_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{}/view", file_id)
}

/// Browser URL for a folder
pub fn folder_url(folder_id: &str) -> String {
    format!("https://drive.google.com/drive/folders/{}", folder_id)
}

//! Accepted media files.
//!
//! The working set only ever contains files with one of these extensions.
//! Matching is case-insensitive (`IMG_0001.JPG` is accepted).

use std::ffi::OsStr;
use std::path::Path;

/// Image extensions (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "tif", "tiff",
];

/// Video extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "avi"];

/// Check whether a path names an accepted image or video file
pub fn is_media(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// The accepted extensions as case-insensitive shell patterns.
///
/// Used as include filters for transfer tools, e.g. `*.[jJ][pP][gG]`.
pub fn media_patterns() -> Vec<String> {
    IMAGE_EXTENSIONS
        .iter()
        .chain(VIDEO_EXTENSIONS)
        .map(|ext| {
            let classes: String = ext
                .chars()
                .map(|c| {
                    if c.is_ascii_alphabetic() {
                        format!("[{}{}]", c, c.to_ascii_uppercase())
                    } else {
                        c.to_string()
                    }
                })
                .collect();
            format!("*.{}", classes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_media_case_insensitive() {
        assert!(is_media(Path::new("a/IMG_0001.JPG")));
        assert!(is_media(Path::new("clip.Mov")));
        assert!(is_media(Path::new("photo.jpeg")));
        assert!(!is_media(Path::new("notes.txt")));
        assert!(!is_media(Path::new("jpg")));
        assert!(!is_media(Path::new(".DS_Store")));
    }

    #[test]
    fn test_media_patterns_match_glob() {
        let patterns = media_patterns();
        assert!(patterns.contains(&"*.[jJ][pP][gG]".to_string()));
        assert!(patterns.contains(&"*.[mM]4[vV]".to_string()));

        let jpg = glob::Pattern::new("*.[jJ][pP][gG]").unwrap();
        assert!(jpg.matches("IMG_0001.JPG"));
        assert!(jpg.matches("img_0001.jpg"));
        assert!(!jpg.matches("img_0001.png"));
    }
}

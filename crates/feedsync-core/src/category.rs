//! Media categories and their file-extension allow-lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::correlate::derive_key;

/// One media feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Text,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 4] = [
        MediaCategory::Image,
        MediaCategory::Video,
        MediaCategory::Audio,
        MediaCategory::Text,
    ];

    /// Name used in storage `type=` filters and default analysis paths.
    pub fn as_str(self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Text => "text",
        }
    }

    /// Lowercase file extensions accepted into this feed.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaCategory::Image => &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"],
            MediaCategory::Video => &["mp4", "webm", "mov", "avi", "mkv", "flv", "wmv"],
            MediaCategory::Audio => &["mp3", "wav", "m4a", "flac", "aac", "ogg"],
            MediaCategory::Text => &["txt", "md", "json", "yaml", "yml", "log"],
        }
    }

    /// Whether a storage key's extension is on this category's allow-list.
    /// Comparison is case-insensitive.
    pub fn matches(self, key: &str) -> bool {
        extension(key).is_some_and(|ext| {
            self.extensions()
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
    }

    /// The category whose allow-list contains the key's extension, if any.
    pub fn for_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.matches(key))
    }
}

fn extension(key: &str) -> Option<&str> {
    let name = derive_key(key);
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Ok(MediaCategory::Image),
            "video" | "videos" => Ok(MediaCategory::Video),
            "audio" => Ok(MediaCategory::Audio),
            "text" | "texts" => Ok(MediaCategory::Text),
            other => Err(format!("unknown media category: {other}")),
        }
    }
}

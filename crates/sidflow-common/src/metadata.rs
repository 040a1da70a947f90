//! Tune metadata reported by emulator backends.

use serde::{Deserialize, Serialize};

/// Metadata for a loaded tune.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuneInfo {
    /// Song title.
    pub title: String,
    /// Author/composer name.
    pub author: String,
    /// Release or copyright line.
    pub released: String,
    /// Number of subtunes in the file.
    pub song_count: u16,
    /// 1-based index of the default subtune.
    pub start_song: u16,
    /// Song length in seconds, if the backend knows it.
    pub duration_seconds: Option<f64>,
}

impl TuneInfo {
    /// Create metadata from title and author with a single subtune.
    pub fn with_title_author(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            song_count: 1,
            start_song: 1,
            ..Default::default()
        }
    }

    /// Whether `index` (1-based) names an existing subtune.
    pub fn has_song(&self, index: u16) -> bool {
        index >= 1 && index <= self.song_count
    }

    /// Check if this tune contains multiple subtunes.
    pub fn has_subsongs(&self) -> bool {
        self.song_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_range() {
        let mut info = TuneInfo::with_title_author("Commando", "Rob Hubbard");
        info.song_count = 3;
        assert!(!info.has_song(0));
        assert!(info.has_song(1));
        assert!(info.has_song(3));
        assert!(!info.has_song(4));
        assert!(info.has_subsongs());
    }
}

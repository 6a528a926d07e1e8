use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// A chapter as handed to the editor, whichever dialect it came from.
///
/// `start_time` is display text for ffmetadata (`HH:MM:SS`) and the verbatim
/// `ChapterTimeStart` string for Matroska XML. Only `title` is editable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based position in playback order.
    pub index: usize,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub flags: ChapterFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Chapter {
    pub fn new(index: usize, start_time: impl Into<String>, title: impl Into<String>) -> Self {
        Chapter {
            index,
            start_time: start_time.into(),
            end_time: None,
            title: title.into(),
            uid: None,
            flags: ChapterFlags::default(),
            language: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFlags {
    pub enabled: bool,
    pub hidden: bool,
}

impl Default for ChapterFlags {
    fn default() -> Self {
        ChapterFlags {
            enabled: true,
            hidden: false,
        }
    }
}

/// Formats whole seconds as `HH:MM:SS`. Hours are not wrapped.
pub fn format_hms(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60
    )
}

pub fn chapters_to_string(chapters: &[Chapter]) -> String {
    let mut output = String::new();

    for chapter in chapters {
        let _ = writeln!(
            &mut output,
            "{:>3}. Start: {:<20} Title: {}",
            chapter.index, chapter.start_time, chapter.title
        );
    }

    output
}

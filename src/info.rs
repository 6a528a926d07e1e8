//! Container facts shown next to the chapter list.

use std::fmt::{self, Display};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::ffmetadata;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid duration regex")
});
static FORMAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Input #0,\s*([A-Za-z0-9_]+)").expect("valid format regex"));
static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate:\s*(\d+)\s*kb/s").expect("valid bitrate regex"));

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    /// File size in bytes.
    pub size: u64,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Overall bit rate in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
}

impl ContainerInfo {
    pub fn with_size(size: u64) -> Self {
        ContainerInfo {
            size,
            ..Default::default()
        }
    }

    /// Reads the input summary ffmpeg prints while dumping metadata, plus the
    /// file-level tags of the dumped document.
    pub fn from_ffmpeg(size: u64, tool_output: &str, metadata: &str) -> Self {
        let mut info = ContainerInfo::with_size(size);

        info.duration = DURATION_RE
            .captures(tool_output)
            .and_then(|caps| parse_clock(&caps[1]));
        info.format = FORMAT_RE
            .captures(tool_output)
            .map(|caps| caps[1].to_uppercase());
        info.bit_rate = BITRATE_RE
            .captures(tool_output)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .map(|kbps| kbps * 1000);

        for (key, value) in ffmetadata::global_tags(metadata) {
            if key.eq_ignore_ascii_case("title") {
                info.title.get_or_insert(value);
            } else if key.eq_ignore_ascii_case("encoder") {
                info.encoder.get_or_insert(value);
            }
        }

        info
    }
}

impl Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(format) = &self.format {
            writeln!(f, "Format:   {format}")?;
        }
        if let Some(duration) = self.duration {
            writeln!(f, "Duration: {}", format_clock(duration))?;
        }
        if let Some(bit_rate) = self.bit_rate {
            writeln!(f, "Bitrate:  {} kb/s", bit_rate / 1000)?;
        }
        writeln!(f, "Size:     {}", format_size(self.size))?;
        if let Some(title) = &self.title {
            writeln!(f, "Title:    {title}")?;
        }
        if let Some(encoder) = &self.encoder {
            writeln!(f, "Encoder:  {encoder}")?;
        }
        Ok(())
    }
}

/// Parses `H:MM:SS` with an optional fraction, as ffmpeg prints times.
pub fn parse_clock(s: &str) -> Option<Duration> {
    let mut parts = s.trim().splitn(3, ':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?;
    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let whole = whole.parse::<u64>().ok()?;
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = &fraction[..fraction.len().min(9)];
    let nanos = if digits.is_empty() {
        0
    } else {
        digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
    };

    Some(Duration::new(hours * 3600 + minutes * 60 + whole, nanos))
}

/// `HH:MM:SS.mmm`
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        duration.subsec_millis()
    )
}

pub fn format_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes = size as f64;
    if size == 0 {
        "unknown".to_owned()
    } else if bytes < KB {
        format!("{size} B")
    } else if bytes < KB * KB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < KB * KB * KB {
        format!("{:.2} MB", bytes / (KB * KB))
    } else {
        format!("{:.2} GB", bytes / (KB * KB * KB))
    }
}

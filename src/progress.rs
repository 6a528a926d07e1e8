//! Live output and progress of a running tool.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::info::parse_clock;
use crate::process::ToolLine;

static STAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]+)=\s*(\S+)").expect("valid stats regex"));
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Progress:\s*(\d{1,3})%").expect("valid progress regex"));

/// What a session reports while its tools run.
#[derive(Debug)]
pub enum ToolEvent<'a> {
    Output(&'a ToolLine<'a>),
    Progress {
        tool: &'a str,
        progress: &'a ToolProgress,
    },
}

/// ffmpeg's stats line or mkvmerge's `Progress: N%`.
///
/// ffmpeg values are kept as printed (`N/A`, `275712KiB`, `3.2e+03x`).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ToolProgress {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub q: Vec<String>,
    pub size: Option<String>,
    pub time: Option<String>,
    pub bitrate: Option<String>,
    pub speed: Option<String>,
    pub elapsed: Option<String>,
    pub percent: Option<u8>,
}

impl ToolProgress {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(caps) = PERCENT_RE.captures(line) {
            let percent = caps[1].parse::<u8>().ok()?.min(100);
            return Some(ToolProgress {
                percent: Some(percent),
                ..Default::default()
            });
        }

        let mut progress = ToolProgress::default();
        let mut is_stats = false;
        for caps in STAT_RE.captures_iter(line) {
            let value = caps[2].to_owned();
            match &caps[1] {
                "frame" => progress.frame = value.parse().ok(),
                "fps" => progress.fps = value.parse().ok(),
                "q" => progress.q.push(value),
                "size" | "Lsize" => progress.size = Some(value),
                "time" => {
                    progress.time = Some(value);
                    is_stats = true;
                }
                "bitrate" => progress.bitrate = Some(value),
                "speed" => progress.speed = Some(value),
                "elapsed" => progress.elapsed = Some(value),
                _ => {}
            }
        }
        is_stats.then_some(progress)
    }

    /// Derives `percent` from `time` when the total duration is known.
    pub fn with_total(mut self, total: Duration) -> Self {
        if self.percent.is_some() || total.is_zero() {
            return self;
        }
        if let Some(done) = self.time.as_deref().and_then(parse_clock) {
            let ratio = done.as_secs_f64() / total.as_secs_f64();
            self.percent = Some((ratio * 100.0).clamp(0.0, 100.0) as u8);
        }
        self
    }
}

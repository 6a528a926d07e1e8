//! FFmpeg `ffmetadata` chapter blocks.
//!
//! Parsing produces one [`Chapter`] per `[CHAPTER]` block that carries a
//! `TITLE` key. Title merging rewrites those `TITLE` lines in place and
//! leaves every other byte of the document untouched.

use std::sync::LazyLock;

use regex::Regex;

use crate::chapter::{Chapter, format_hms};
use crate::error::{ChapterError, Result};

pub const HEADER: &str = ";FFMETADATA1";
const CHAPTER_SECTION: &str = "[CHAPTER]";
const DEFAULT_TIMEBASE: TimeBase = TimeBase { num: 1, den: 1000 };

static TIMEBASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").expect("valid timebase regex"));

/// How an edited list is reconciled with the chapter blocks of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TitleMerge {
    /// The edited list must have exactly one entry per chapter block.
    #[default]
    Strict,
    /// Blocks without a matching entry keep their title, extra entries are ignored.
    Partial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u64,
    pub den: u64,
}

impl TimeBase {
    fn parse(s: &str) -> Option<Self> {
        let caps = TIMEBASE_RE.captures(s)?;
        let num = caps[1].parse::<u64>().ok()?;
        let den = caps[2].parse::<u64>().ok()?;
        if num == 0 || den == 0 {
            return None;
        }
        Some(TimeBase { num, den })
    }

    /// Whole seconds for a tick count, sub-second remainder truncated.
    pub fn whole_seconds(&self, ticks: i64) -> u64 {
        let ticks = ticks.max(0) as u128;
        let secs = ticks * self.num as u128 / self.den as u128;
        secs.min(u64::MAX as u128) as u64
    }
}

/// A line of the document, with escaped newlines folded into the body.
#[derive(Debug)]
struct RawLine<'a> {
    body: &'a str,
    ending: &'a str,
}

fn logical_lines(raw: &str) -> Vec<RawLine<'_>> {
    let bytes = raw.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                // an escaped CRLF continues the line just like an escaped LF
                i += if bytes[i + 1..].starts_with(b"\r\n") { 3 } else { 2 };
                continue;
            }
            b'\n' => {
                let body_end = if i > start && bytes[i - 1] == b'\r' {
                    i - 1
                } else {
                    i
                };
                lines.push(RawLine {
                    body: &raw[start..body_end],
                    ending: &raw[body_end..=i],
                });
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < raw.len() {
        lines.push(RawLine {
            body: &raw[start..],
            ending: "",
        });
    }

    lines
}

fn is_section(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('[') && line.ends_with(']')
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with('#')
}

/// Splits `key=value`, returning the key and everything up to and including `=`.
fn split_key(line: &str) -> Option<(&str, &str, &str)> {
    if is_comment(line) {
        return None;
    }
    let eq = line.find('=')?;
    Some((line[..eq].trim(), &line[..=eq], &line[eq + 1..]))
}

#[derive(Debug, Default)]
struct Block<'a> {
    timebase: Option<&'a str>,
    start: Option<&'a str>,
    end: Option<&'a str>,
    title: Option<TitleLine<'a>>,
}

#[derive(Debug, Clone, Copy)]
struct TitleLine<'a> {
    line: usize,
    prefix: &'a str,
    value: &'a str,
}

fn scan_blocks<'a>(lines: &[RawLine<'a>]) -> Vec<Block<'a>> {
    let mut blocks = Vec::new();
    let mut current: Option<Block<'a>> = None;

    for (n, line) in lines.iter().enumerate() {
        if is_section(line.body) {
            blocks.extend(current.take());
            if line.body.trim() == CHAPTER_SECTION {
                current = Some(Block::default());
            }
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        let Some((key, prefix, value)) = split_key(line.body) else {
            continue;
        };

        if key.eq_ignore_ascii_case("TIMEBASE") {
            block.timebase = Some(value);
        } else if key.eq_ignore_ascii_case("START") {
            block.start = Some(value);
        } else if key.eq_ignore_ascii_case("END") {
            block.end = Some(value);
        } else if key.eq_ignore_ascii_case("TITLE") && block.title.is_none() {
            block.title = Some(TitleLine {
                line: n,
                prefix,
                value,
            });
        }
    }
    blocks.extend(current);

    blocks
}

fn block_timebase(block: &Block<'_>, ordinal: usize) -> TimeBase {
    match block.timebase {
        None => DEFAULT_TIMEBASE,
        Some(raw) => TimeBase::parse(raw).unwrap_or_else(|| {
            log::warn!("Chapter block {ordinal}: invalid TIMEBASE {raw:?}, assuming 1/1000");
            DEFAULT_TIMEBASE
        }),
    }
}

fn block_seconds(raw: Option<&str>, timebase: TimeBase) -> Option<u64> {
    raw?.trim()
        .parse::<i64>()
        .ok()
        .map(|ticks| timebase.whole_seconds(ticks))
}

pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\r') if chars.as_str().starts_with('\n') => {
                    chars.next();
                    out.push('\n');
                }
                Some(next) => out.push(next),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '=' | ';' | '#' | '\\' | '\n' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\r' => {}
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Parses every titled `[CHAPTER]` block into a chapter, in document order.
pub fn parse_chapters(metadata: &str) -> Vec<Chapter> {
    if !metadata.trim_start_matches('\u{feff}').starts_with(HEADER) && !metadata.is_empty() {
        log::warn!("Metadata does not start with {HEADER}");
    }
    let lines = logical_lines(metadata);
    let mut chapters = Vec::new();

    for (ordinal, block) in scan_blocks(&lines).iter().enumerate() {
        let Some(title) = block.title else {
            log::warn!("Chapter block {} has no TITLE, skipping", ordinal + 1);
            continue;
        };

        let timebase = block_timebase(block, ordinal + 1);
        let start = block_seconds(block.start, timebase).unwrap_or_else(|| {
            log::warn!(
                "Chapter block {}: START {:?} is not an integer, using 0",
                ordinal + 1,
                block.start.unwrap_or("")
            );
            0
        });

        let mut chapter = Chapter::new(
            chapters.len() + 1,
            format_hms(start),
            unescape_value(title.value),
        );
        chapter.end_time = block_seconds(block.end, timebase).map(format_hms);
        chapters.push(chapter);
    }

    log::debug!("Parsed {} ffmetadata chapters", chapters.len());
    chapters
}

/// File-level `key=value` pairs, the ones before the first section.
pub fn global_tags(metadata: &str) -> Vec<(String, String)> {
    logical_lines(metadata)
        .iter()
        .take_while(|line| !is_section(line.body))
        .filter_map(|line| split_key(line.body))
        .map(|(key, _, value)| (key.to_owned(), unescape_value(value)))
        .collect()
}

/// Writes the titles of `chapters` into the `TITLE` lines of `metadata` by position.
///
/// Lines whose title is unchanged are copied verbatim, so an unedited list
/// reproduces the original document exactly.
pub fn update_chapter_titles(
    metadata: &str,
    chapters: &[Chapter],
    merge: TitleMerge,
) -> Result<String> {
    let lines = logical_lines(metadata);
    let titles: Vec<TitleLine<'_>> = scan_blocks(&lines)
        .into_iter()
        .filter_map(|block| block.title)
        .collect();

    if titles.len() != chapters.len() {
        match merge {
            TitleMerge::Strict => {
                return Err(ChapterError::ChapterCountMismatch {
                    expected: titles.len(),
                    actual: chapters.len(),
                });
            }
            TitleMerge::Partial => log::warn!(
                "Merging {} titles into {} chapter blocks",
                chapters.len(),
                titles.len()
            ),
        }
    }

    let mut out = String::with_capacity(metadata.len());
    let mut pending = titles.iter().zip(chapters).peekable();

    for (n, line) in lines.iter().enumerate() {
        if let Some((title_line, chapter)) = pending.peek() {
            if title_line.line == n {
                let (title_line, chapter) = (*title_line, *chapter);
                pending.next();
                if unescape_value(title_line.value) != chapter.title {
                    out.push_str(title_line.prefix);
                    out.push_str(&escape_value(&chapter.title));
                    out.push_str(line.ending);
                    continue;
                }
            }
        }
        out.push_str(line.body);
        out.push_str(line.ending);
    }

    Ok(out)
}

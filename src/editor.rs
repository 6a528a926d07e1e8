//! Editing collaborators: anything that takes the chapter list and hands back
//! the same list with new titles.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, anyhow};
use regex::Regex;

use crate::chapter::Chapter;
use crate::error::{ChapterError, Result};

static SET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*=(.*)$").expect("valid set regex"));

pub trait ChapterEditor {
    /// Returns the edited list. Only titles are taken from the result.
    fn edit(&mut self, chapters: Vec<Chapter>) -> Result<Vec<Chapter>>;
}

/// Non-interactive edits: a full title list, individual `N=TITLE` changes, or both.
#[derive(Debug, Default, Clone)]
pub struct ScriptedEditor {
    titles: Option<Vec<String>>,
    sets: BTreeMap<usize, String>,
}

impl ScriptedEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every title by position. The list length must match the chapter count.
    pub fn with_titles(mut self, titles: Vec<String>) -> Self {
        self.titles = Some(titles);
        self
    }

    /// Sets the title of the chapter with the given 1-based index.
    pub fn with_set(mut self, index: usize, title: impl Into<String>) -> Self {
        self.sets.insert(index, title.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_none() && self.sets.is_empty()
    }
}

impl ChapterEditor for ScriptedEditor {
    fn edit(&mut self, chapters: Vec<Chapter>) -> Result<Vec<Chapter>> {
        let mut edited = match &self.titles {
            None => chapters,
            Some(titles) => titles
                .iter()
                .enumerate()
                .map(|(i, title)| {
                    let mut chapter = chapters
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| Chapter::new(i + 1, "", ""));
                    chapter.title = title.clone();
                    chapter
                })
                .collect(),
        };

        let len = edited.len();
        for (&index, title) in &self.sets {
            let chapter = index
                .checked_sub(1)
                .and_then(|i| edited.get_mut(i))
                .ok_or_else(|| {
                    ChapterError::InvalidEdit(format!(
                        "chapter {index} does not exist ({len} chapters)"
                    ))
                })?;
            chapter.title = title.clone();
        }

        Ok(edited)
    }
}

/// Asks for each title on `input`; an empty answer keeps the current title.
pub struct PromptEditor<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptEditor<R, W> {
    pub fn new(input: R, output: W) -> Self {
        PromptEditor { input, output }
    }
}

impl<R: BufRead, W: Write> ChapterEditor for PromptEditor<R, W> {
    fn edit(&mut self, mut chapters: Vec<Chapter>) -> Result<Vec<Chapter>> {
        writeln!(
            self.output,
            "Enter a new title for each chapter, or leave empty to keep it."
        )?;

        for chapter in chapters.iter_mut() {
            write!(
                self.output,
                "[{}] {} {}\n> ",
                chapter.index, chapter.start_time, chapter.title
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                break;
            }
            let answer = line.trim_end_matches(['\n', '\r']);
            if !answer.is_empty() {
                chapter.title = answer.to_owned();
            }
        }

        Ok(chapters)
    }
}

/// Parses `N=TITLE` as given on the command line.
pub fn parse_set(s: &str) -> anyhow::Result<(usize, String)> {
    let caps = SET_RE
        .captures(s)
        .ok_or_else(|| anyhow!("Expected N=TITLE, got {:?}", s))?;
    let index = caps[1].parse::<usize>()?;
    if index == 0 {
        return Err(anyhow!("Chapter numbers start at 1"));
    }
    Ok((index, caps[2].to_owned()))
}

/// One title per line.
pub fn read_titles_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read titles file: {}", path.as_ref().display()))?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_owned())
        .collect())
}

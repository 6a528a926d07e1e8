use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_xml_rs::de::from_str;

use crate::chapter::{Chapter, ChapterFlags};
use crate::error::{ChapterError, Result};

pub const DEFAULT_LANGUAGE: &str = "und";
const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Where rebuilt atoms are placed inside the edition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XmlLayout {
    /// `EditionEntry/ChapterTrack/ChapterAtom`, with `ChapterTrackNumber` 1.
    #[default]
    Track,
    /// `EditionEntry/ChapterAtom`, the layout mkvextract writes.
    Flat,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(rename = "Chapters")]
pub struct Chapters {
    #[serde(rename = "EditionEntry", default)]
    editions: Vec<EditionEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct EditionEntry {
    #[serde(rename = "EditionUID", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(rename = "EditionFlagHidden", default, skip_serializing_if = "Option::is_none")]
    pub flag_hidden: Option<u8>,

    #[serde(rename = "EditionFlagDefault", default, skip_serializing_if = "Option::is_none")]
    pub flag_default: Option<u8>,

    #[serde(rename = "ChapterTrack", default, skip_serializing_if = "Option::is_none")]
    pub track: Option<ChapterTrack>,

    #[serde(rename = "ChapterAtom", default, skip_serializing_if = "Vec::is_empty")]
    chapters: Vec<ChapterAtom>,
}

impl EditionEntry {
    fn atoms(&self) -> impl Iterator<Item = &ChapterAtom> {
        self.chapters
            .iter()
            .chain(self.track.iter().flat_map(|track| track.chapters.iter()))
    }

    fn is_default(&self) -> bool {
        self.flag_default == Some(1)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct ChapterTrack {
    #[serde(rename = "ChapterTrackNumber", default)]
    pub number: u64,

    #[serde(rename = "ChapterAtom", default)]
    chapters: Vec<ChapterAtom>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChapterAtom {
    #[serde(rename = "ChapterUID", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(rename = "ChapterTimeStart")]
    pub start_time: String,

    #[serde(rename = "ChapterTimeEnd", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    #[serde(rename = "ChapterFlagHidden", default, skip_serializing_if = "Option::is_none")]
    pub flag_hidden: Option<u8>,

    #[serde(rename = "ChapterFlagEnabled", default, skip_serializing_if = "Option::is_none")]
    pub flag_enabled: Option<u8>,

    #[serde(rename = "ChapterDisplay", default)]
    pub displays: Vec<ChapterDisplay>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChapterDisplay {
    #[serde(rename = "ChapterString", default)]
    pub title: String,

    #[serde(rename = "ChapterLanguage", default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Chapters {
    /// The edition edits apply to: the one flagged default, else the first.
    fn edition(&self) -> Option<&EditionEntry> {
        self.editions
            .iter()
            .find(|e| e.is_default())
            .or_else(|| self.editions.first())
    }

    pub fn num_chapters(&self) -> usize {
        self.edition().map_or(0, |e| e.atoms().count())
    }

    pub fn edition_uid(&self) -> Option<&str> {
        self.edition().and_then(|e| e.uid.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChapterAtom> {
        self.edition().into_iter().flat_map(|e| e.atoms())
    }

    /// Projects the atoms into chapters, generating a uid for atoms without one.
    pub fn to_chapter_list(&self) -> Vec<Chapter> {
        if self.editions.len() > 1 {
            log::warn!(
                "{} editions found, only the default one is edited",
                self.editions.len()
            );
        }

        self.iter()
            .enumerate()
            .map(|(i, atom)| {
                let display = atom.displays.first();
                Chapter {
                    index: i + 1,
                    start_time: atom.start_time.clone(),
                    end_time: atom.end_time.clone(),
                    title: display.map(|d| d.title.clone()).unwrap_or_default(),
                    uid: Some(atom.uid.clone().unwrap_or_else(generate_uid)),
                    flags: ChapterFlags {
                        enabled: atom.flag_enabled != Some(0),
                        hidden: atom.flag_hidden == Some(1),
                    },
                    language: display.and_then(|d| d.language.clone()),
                }
            })
            .collect()
    }

    /// Builds a fresh single-edition document from `chapters`.
    pub fn from_chapter_list(chapters: &[Chapter], default_language: &str, layout: XmlLayout) -> Self {
        let atoms: Vec<ChapterAtom> = chapters
            .iter()
            .map(|chapter| ChapterAtom {
                uid: Some(chapter.uid.clone().unwrap_or_else(generate_uid)),
                start_time: chapter.start_time.clone(),
                end_time: chapter.end_time.clone(),
                flag_hidden: chapter.flags.hidden.then_some(1),
                flag_enabled: Some(u8::from(chapter.flags.enabled)),
                displays: vec![ChapterDisplay {
                    title: chapter.title.clone(),
                    language: Some(
                        chapter
                            .language
                            .clone()
                            .filter(|l| !l.is_empty())
                            .unwrap_or_else(|| default_language.to_owned()),
                    ),
                }],
            })
            .collect();

        let mut edition = EditionEntry {
            uid: Some(generate_edition_uid()),
            flag_default: Some(1),
            ..Default::default()
        };
        match layout {
            XmlLayout::Track => {
                edition.track = Some(ChapterTrack {
                    number: 1,
                    chapters: atoms,
                })
            }
            XmlLayout::Flat => edition.chapters = atoms,
        }

        Chapters {
            editions: vec![edition],
        }
    }
}

fn generate_uid() -> String {
    rand::rng().random_range(1..=u64::MAX).to_string()
}

/// Edition uid from the current time; not guaranteed unique.
fn generate_edition_uid() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    nanos.max(1).to_string()
}

pub fn parse_chapter_xml(xml: &str) -> Result<Chapters> {
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml).trim();
    if xml.is_empty() {
        return Ok(Chapters::default());
    }
    let chapters: Chapters = from_str(xml)?;
    Ok(chapters)
}

pub fn parse_chapters(xml: &str) -> Result<Vec<Chapter>> {
    Ok(parse_chapter_xml(xml)?.to_chapter_list())
}

pub fn chapters_to_xml(chapters: &Chapters) -> Result<String> {
    let inner =
        serde_xml_rs::to_string(chapters).map_err(|e| ChapterError::EncodeFailed(e.to_string()))?;
    let body = match inner.trim_start().strip_prefix("<?xml") {
        Some(rest) => rest.split_once("?>").map_or("", |(_, body)| body).trim_start(),
        None => inner.trim_start(),
    };
    Ok(format!("{XML_HEADER}\n{body}\n"))
}

/// Reads chapters extracted by mkvextract. An empty file means no chapters.
pub fn read_chapters(path: impl AsRef<Path>) -> Result<Vec<Chapter>> {
    let bytes = fs::read(path.as_ref())?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let xml = String::from_utf8(bytes)
        .map_err(|e| ChapterError::ParseFailed(format!("chapter XML is not UTF-8: {e}")))?;
    parse_chapters(&xml)
}

pub fn write_chapters(
    chapters: &[Chapter],
    path: impl AsRef<Path>,
    default_language: &str,
    layout: XmlLayout,
) -> Result<()> {
    let document = Chapters::from_chapter_list(chapters, default_language, layout);
    let xml = chapters_to_xml(&document)?;
    fs::write(path.as_ref(), xml)?;
    log::debug!(
        "Wrote {} chapters to {}",
        chapters.len(),
        path.as_ref().display()
    );
    Ok(())
}

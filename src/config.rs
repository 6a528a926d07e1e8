use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::chapters::{DEFAULT_LANGUAGE, XmlLayout};
use crate::mkv::Dialect;
use crate::utils::Tool;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ffmpeg_path: Option<PathBuf>,
    pub mkvextract_path: Option<PathBuf>,
    pub mkvmerge_path: Option<PathBuf>,

    /// Upper bound for a single external tool run.
    #[serde(with = "humantime_serde")]
    pub tool_timeout: Duration,

    /// Prepended to the input file name when no output path is given.
    pub output_prefix: String,

    /// `ChapterLanguage` written for chapters without one.
    pub default_language: String,

    pub dialect: Dialect,
    pub xml_layout: XmlLayout,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ffmpeg_path: None,
            mkvextract_path: None,
            mkvmerge_path: None,
            tool_timeout: Duration::from_secs(600),
            output_prefix: "output_".to_owned(),
            default_language: DEFAULT_LANGUAGE.to_owned(),
            dialect: Dialect::default(),
            xml_layout: XmlLayout::default(),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Loads `path`, or returns the defaults when it does not exist.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        log::debug!("Loading config from {}", path.display());

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_timeout.is_zero() {
            return Err(anyhow!("tool_timeout must be greater than zero"));
        }
        if self.output_prefix.is_empty() {
            return Err(anyhow!("output_prefix must not be empty"));
        }
        if self.default_language.trim().is_empty() {
            return Err(anyhow!("default_language must not be empty"));
        }
        self.log_filter()?;
        Ok(())
    }

    pub fn log_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("log_level {:?} is not a log level", self.log_level))
    }

    pub fn tool_path(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::Ffmpeg => self.ffmpeg_path.as_deref(),
            Tool::MkvExtract => self.mkvextract_path.as_deref(),
            Tool::MkvMerge => self.mkvmerge_path.as_deref(),
        }
    }
}

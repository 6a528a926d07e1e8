use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::process::ToolInvocation;
use crate::utils::Tool;

/// Chapter metadata dialect, and with it the toolchain used for extract and remux.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// FFmpeg `ffmetadata` text, extracted and remuxed with ffmpeg.
    FfMetadata,
    /// Matroska chapter XML, extracted with mkvextract and remuxed with mkvmerge.
    #[default]
    Matroska,
}

impl Dialect {
    pub fn extract_tool(&self) -> Tool {
        match self {
            Dialect::FfMetadata => Tool::Ffmpeg,
            Dialect::Matroska => Tool::MkvExtract,
        }
    }

    pub fn remux_tool(&self) -> Tool {
        match self {
            Dialect::FfMetadata => Tool::Ffmpeg,
            Dialect::Matroska => Tool::MkvMerge,
        }
    }

    pub fn extracted_file_name(&self) -> &'static str {
        match self {
            Dialect::FfMetadata => "metadata.txt",
            Dialect::Matroska => "chapters.xml",
        }
    }

    pub fn serialized_file_name(&self) -> &'static str {
        match self {
            Dialect::FfMetadata => "metadata_edited.txt",
            Dialect::Matroska => "chapters_edited.xml",
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::FfMetadata => f.write_str("ffmetadata"),
            Dialect::Matroska => f.write_str("matroska"),
        }
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "ffmetadata" | "ffmpeg" => Ok(Dialect::FfMetadata),
            "matroska" | "xml" | "mkvtoolnix" => Ok(Dialect::Matroska),
            _ => Err(anyhow::anyhow!("Invalid dialect: {}", s)),
        }
    }
}

/// Command that dumps the container's chapter metadata into `metadata`.
pub fn extract_invocation(
    dialect: Dialect,
    program: &Path,
    input: &Path,
    metadata: &Path,
) -> ToolInvocation {
    let tool = dialect.extract_tool();
    match dialect {
        Dialect::FfMetadata => ToolInvocation::new(tool.name(), program)
            .arg("-y")
            .arg("-i")
            .path_arg(input)
            .arg("-f")
            .arg("ffmetadata")
            .path_arg(metadata),
        Dialect::Matroska => ToolInvocation::new(tool.name(), program)
            .path_arg(input)
            .arg("chapters")
            .path_arg(metadata),
    }
}

/// Command that writes `output` with the streams of `input` and the chapters in `metadata`.
pub fn remux_invocation(
    dialect: Dialect,
    program: &Path,
    input: &Path,
    metadata: &Path,
    output: &Path,
) -> ToolInvocation {
    let tool = dialect.remux_tool();
    match dialect {
        Dialect::FfMetadata => ToolInvocation::new(tool.name(), program)
            .arg("-y")
            .arg("-i")
            .path_arg(input)
            .arg("-i")
            .path_arg(metadata)
            .arg("-map")
            .arg("0")
            .arg("-map_metadata")
            .arg("1")
            .arg("-map_chapters")
            .arg("1")
            .arg("-c")
            .arg("copy")
            .path_arg(output),
        Dialect::Matroska => ToolInvocation::new(tool.name(), program)
            .arg("-o")
            .path_arg(output)
            .arg("--chapters")
            .path_arg(metadata)
            .arg("--no-chapters")
            .path_arg(input),
    }
}

use std::env::consts::EXE_SUFFIX;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use crate::error::{ChapterError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    Ffmpeg,
    MkvExtract,
    MkvMerge,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::MkvExtract => "mkvextract",
            Tool::MkvMerge => "mkvmerge",
        }
    }
}

impl Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn third_party_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![Path::new(env!("CARGO_MANIFEST_DIR")).join("third_party").join("bin")];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("third_party").join("bin"));
    }
    dirs
}

pub(crate) fn get_third_party_binary(tool: Tool) -> Option<PathBuf> {
    let file_name = format!("{}{}", tool.name(), EXE_SUFFIX);
    third_party_dirs()
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Finds a tool binary: explicit path first, then bundled `third_party/bin`, then `PATH`.
pub fn resolve_tool(tool: Tool, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        log::warn!("Configured {tool} path {} does not exist", path.display());
        return Err(ChapterError::ToolUnavailable {
            tool: format!("{tool} ({})", path.display()),
        });
    }

    if let Some(bundled) = get_third_party_binary(tool) {
        log::debug!("Using bundled {tool} at {}", bundled.display());
        return Ok(bundled);
    }

    which::which(tool.name()).map_err(|_| ChapterError::ToolUnavailable {
        tool: tool.name().to_owned(),
    })
}

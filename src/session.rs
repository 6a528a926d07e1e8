//! One edit of one container: extract, edit titles, serialize, remux.
//!
//! ```text
//! Idle -> Extracted -> Edited -> Serialized -> Remuxed
//!   \________\___________\___________\_______-> Failed
//! ```
//!
//! Tool and IO errors move the session to `Failed`; an edit that does not
//! fit the extracted list is rejected and leaves the session where it was.
//! The scratch directory is removed as soon as a terminal state is reached.

use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chapter::Chapter;
use crate::chapters::{read_chapters, write_chapters};
use crate::config::Config;
use crate::editor::ChapterEditor;
use crate::error::{ChapterError, Result};
use crate::ffmetadata::{self, TitleMerge};
use crate::file::resolve_output_path;
use crate::info::ContainerInfo;
use crate::mkv::{Dialect, extract_invocation, remux_invocation};
use crate::process::{CancelToken, ToolInvocation, ToolLine, ToolOutput, ToolRunner};
use crate::progress::{ToolEvent, ToolProgress};
use crate::temp::ScratchDir;
use crate::utils::{Tool, resolve_tool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Extracted,
    Edited,
    Serialized,
    Remuxed,
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Extracted => "extracted",
            SessionState::Edited => "edited",
            SessionState::Serialized => "serialized",
            SessionState::Remuxed => "remuxed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Remuxed | SessionState::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct RemuxOutcome {
    pub output_path: PathBuf,
    pub chapter_count: usize,
    /// Combined stdout and stderr of the remux tool.
    pub tool_output: String,
}

pub struct EditSession<'a> {
    input: PathBuf,
    dialect: Dialect,
    config: &'a Config,
    runner: &'a dyn ToolRunner,
    observer: Option<&'a dyn Fn(&ToolEvent<'_>)>,
    cancel: CancelToken,
    state: SessionState,
    scratch: Option<ScratchDir>,
    /// Extracted ffmetadata document, the base for the title merge.
    raw_metadata: Option<String>,
    container_info: Option<ContainerInfo>,
    chapters: Vec<Chapter>,
    serialized: Option<PathBuf>,
    failure: Option<String>,
}

impl<'a> EditSession<'a> {
    pub fn new(
        input: impl Into<PathBuf>,
        dialect: Dialect,
        config: &'a Config,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        EditSession {
            input: input.into(),
            dialect,
            config,
            runner,
            observer: None,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
            scratch: None,
            raw_metadata: None,
            container_info: None,
            chapters: Vec::new(),
            serialized: None,
            failure: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receives every line the tools print, and their progress.
    pub fn with_observer(mut self, observer: &'a dyn Fn(&ToolEvent<'_>)) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// Size, and for ffmetadata also what ffmpeg reported about the input.
    pub fn container_info(&self) -> Option<&ContainerInfo> {
        self.container_info.as_ref()
    }

    /// Diagnostic text of the error that moved the session to `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    pub fn serialized_path(&self) -> Option<&Path> {
        self.serialized.as_deref()
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ChapterError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn scratch(&self) -> Result<&ScratchDir> {
        self.scratch.as_ref().ok_or(ChapterError::InvalidState {
            expected: "a session with a scratch directory",
            actual: self.state.name(),
        })
    }

    fn cleanup(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                log::warn!("Failed to remove scratch directory: {e}");
            }
        }
    }

    fn fail(&mut self, err: ChapterError) -> ChapterError {
        log::warn!("Session for {} failed: {err}", self.input.display());
        self.failure = Some(err.to_string());
        self.state = SessionState::Failed;
        self.cleanup();
        err
    }

    fn run_tool(
        &self,
        tool: Tool,
        invocation_for: impl FnOnce(&Path) -> ToolInvocation,
    ) -> Result<ToolOutput> {
        let program = resolve_tool(tool, self.config.tool_path(tool))?;
        let invocation = invocation_for(&program);
        let total = self.container_info.as_ref().and_then(|info| info.duration);
        let on_line = |line: &ToolLine<'_>| {
            let Some(observer) = self.observer else {
                return;
            };
            observer(&ToolEvent::Output(line));
            if let Some(mut progress) = ToolProgress::parse(line.text) {
                if let Some(total) = total {
                    progress = progress.with_total(total);
                }
                observer(&ToolEvent::Progress {
                    tool: line.tool,
                    progress: &progress,
                });
            }
        };
        let output = self.runner.run(&invocation, &self.cancel, &on_line)?;
        // MKVToolNix exits with 1 when it only emitted warnings
        if output.code == Some(1) && tool != Tool::Ffmpeg {
            log::warn!("{tool} finished with warnings\n{}", output.combined());
            return Ok(output);
        }
        output.check(&invocation.tool)
    }

    /// Dumps and parses the container's chapters. `Idle -> Extracted`.
    pub fn extract(&mut self) -> Result<&[Chapter]> {
        self.expect_state(SessionState::Idle)?;
        match self.try_extract() {
            Ok(()) => {
                self.state = SessionState::Extracted;
                log::info!(
                    "Extracted {} chapters from {}",
                    self.chapters.len(),
                    self.input.display()
                );
                Ok(&self.chapters)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn try_extract(&mut self) -> Result<()> {
        if self.scratch.is_none() {
            self.scratch = Some(ScratchDir::new()?);
        }
        let metadata_path = self.scratch()?.file(self.dialect.extracted_file_name());

        let dialect = self.dialect;
        let input = self.input.clone();
        let output = self.run_tool(dialect.extract_tool(), |program| {
            extract_invocation(dialect, program, &input, &metadata_path)
        })?;
        let size = fs::metadata(&input)?.len();

        match dialect {
            Dialect::FfMetadata => {
                let raw = fs::read_to_string(&metadata_path)?;
                self.container_info =
                    Some(ContainerInfo::from_ffmpeg(size, &output.combined(), &raw));
                self.chapters = ffmetadata::parse_chapters(&raw);
                self.raw_metadata = Some(raw);
            }
            Dialect::Matroska => {
                self.container_info = Some(ContainerInfo::with_size(size));
                self.chapters = if metadata_path.exists() {
                    read_chapters(&metadata_path)?
                } else {
                    // mkvextract writes nothing for a file without chapters
                    Vec::new()
                };
            }
        }
        Ok(())
    }

    /// Takes the titles of `edited` onto the extracted chapters. `Extracted -> Edited`.
    ///
    /// Identifiers, times and flags always come from the extracted records.
    pub fn apply_edits(&mut self, edited: Vec<Chapter>) -> Result<()> {
        if self.state != SessionState::Edited {
            self.expect_state(SessionState::Extracted)?;
        }
        if edited.len() != self.chapters.len() {
            return Err(ChapterError::ChapterCountMismatch {
                expected: self.chapters.len(),
                actual: edited.len(),
            });
        }

        let mut changed = 0;
        for (chapter, edit) in self.chapters.iter_mut().zip(edited) {
            if chapter.title != edit.title {
                log::debug!(
                    "Chapter {}: {:?} -> {:?}",
                    chapter.index,
                    chapter.title,
                    edit.title
                );
                chapter.title = edit.title;
                changed += 1;
            }
        }
        log::info!("{changed} of {} titles changed", self.chapters.len());

        self.state = SessionState::Edited;
        Ok(())
    }

    /// Hands the chapters to `editor` and applies what it returns.
    pub fn edit_with(&mut self, editor: &mut dyn ChapterEditor) -> Result<()> {
        self.expect_state(SessionState::Extracted)?;
        let edited = editor.edit(self.chapters.clone())?;
        self.apply_edits(edited)
    }

    /// Writes the edited metadata into the scratch directory. `Edited -> Serialized`.
    pub fn serialize(&mut self) -> Result<&Path> {
        self.expect_state(SessionState::Edited)?;
        match self.try_serialize() {
            Ok(path) => {
                log::debug!("Serialized chapters to {}", path.display());
                self.state = SessionState::Serialized;
                let path = self.serialized.insert(path);
                Ok(path.as_path())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn try_serialize(&self) -> Result<PathBuf> {
        let path = self.scratch()?.file(self.dialect.serialized_file_name());
        match self.dialect {
            Dialect::FfMetadata => {
                let raw = self.raw_metadata.as_deref().unwrap_or_default();
                let merged =
                    ffmetadata::update_chapter_titles(raw, &self.chapters, TitleMerge::Strict)?;
                fs::write(&path, merged)?;
            }
            Dialect::Matroska => write_chapters(
                &self.chapters,
                &path,
                &self.config.default_language,
                self.config.xml_layout,
            )?,
        }
        Ok(path)
    }

    /// Writes the output container. `Serialized -> Remuxed`.
    ///
    /// Without an explicit `output` the file lands next to the input with the
    /// configured prefix.
    pub fn remux(&mut self, output: Option<&Path>) -> Result<RemuxOutcome> {
        self.expect_state(SessionState::Serialized)?;
        match self.try_remux(output) {
            Ok(outcome) => {
                log::info!("Wrote {}", outcome.output_path.display());
                self.state = SessionState::Remuxed;
                self.cleanup();
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn try_remux(&self, output: Option<&Path>) -> Result<RemuxOutcome> {
        let output_path = resolve_output_path(&self.input, output, &self.config.output_prefix)?;
        let metadata = self
            .serialized
            .as_deref()
            .ok_or(ChapterError::InvalidState {
                expected: "serialized",
                actual: self.state.name(),
            })?;

        let dialect = self.dialect;
        let tool_output = self.run_tool(dialect.remux_tool(), |program| {
            remux_invocation(dialect, program, &self.input, metadata, &output_path)
        })?;

        Ok(RemuxOutcome {
            output_path,
            chapter_count: self.chapters.len(),
            tool_output: tool_output.combined(),
        })
    }

    /// Runs the whole pipeline with `editor` as the editing step.
    pub fn run(
        &mut self,
        editor: &mut dyn ChapterEditor,
        output: Option<&Path>,
    ) -> Result<RemuxOutcome> {
        self.extract()?;
        self.edit_with(editor)?;
        self.serialize()?;
        self.remux(output)
    }

    /// Returns a finished session to `Idle` so the same input can be edited again.
    pub fn reset(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(ChapterError::InvalidState {
                expected: "remuxed or failed",
                actual: self.state.name(),
            });
        }
        self.cleanup();
        self.state = SessionState::Idle;
        self.raw_metadata = None;
        self.container_info = None;
        self.chapters.clear();
        self.serialized = None;
        self.failure = None;
        Ok(())
    }
}

impl Drop for EditSession<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

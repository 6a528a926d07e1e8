use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mkv_chapter_editor::chapters::parse_chapters;
use mkv_chapter_editor::editor::ScriptedEditor;
use mkv_chapter_editor::process::{
    CancelToken, Stream, ToolInvocation, ToolLine, ToolOutput, ToolRunner,
};
use mkv_chapter_editor::{
    Chapter, ChapterError, Config, Dialect, EditSession, SessionState, ToolEvent,
};
use tempfile::TempDir;

const FFMETADATA: &str = ";FFMETADATA1
major_brand=isom
encoder=Lavf60.3.100

[CHAPTER]
TIMEBASE=1/1000
START=0
END=65000
title=Opening

[CHAPTER]
TIMEBASE=1/1000
START=65000
END=1200000
title=Chapter 2

[CHAPTER]
TIMEBASE=1/1000
START=1200000
END=1300000
title=Credits
";

const CHAPTER_XML: &str = r#"<?xml version="1.0"?>
<Chapters>
  <EditionEntry>
    <EditionFlagDefault>1</EditionFlagDefault>
    <EditionUID>6174634854302744398</EditionUID>
    <ChapterAtom>
      <ChapterUID>1573092137066836364</ChapterUID>
      <ChapterTimeStart>00:00:00.000000000</ChapterTimeStart>
      <ChapterFlagEnabled>1</ChapterFlagEnabled>
      <ChapterDisplay>
        <ChapterString>Chapter 01</ChapterString>
        <ChapterLanguage>eng</ChapterLanguage>
      </ChapterDisplay>
    </ChapterAtom>
    <ChapterAtom>
      <ChapterUID>8305431235245425735</ChapterUID>
      <ChapterTimeStart>00:12:01.021000000</ChapterTimeStart>
      <ChapterFlagEnabled>1</ChapterFlagEnabled>
      <ChapterDisplay>
        <ChapterString>Chapter 02</ChapterString>
        <ChapterLanguage>eng</ChapterLanguage>
      </ChapterDisplay>
    </ChapterAtom>
  </EditionEntry>
</Chapters>
"#;

const FFMPEG_SUMMARY: &str = "\
Input #0, matroska,webm, from 'movie.mkv':
  Duration: 00:21:40.00, start: 0.000000, bitrate: 1882 kb/s
";

/// Stands in for ffmpeg, mkvextract and mkvmerge by reading and writing the
/// files named in their command lines.
#[derive(Default)]
struct FakeTools {
    extracted: String,
    extract_failure: Option<String>,
    remux_failure: Option<String>,
    remux_warning: bool,
    invocations: RefCell<Vec<Vec<String>>>,
    remuxed_metadata: RefCell<Option<String>>,
}

impl FakeTools {
    fn extracting(content: &str) -> Self {
        FakeTools {
            extracted: content.to_owned(),
            ..Default::default()
        }
    }

    fn is_extract(tool: &str, args: &[String]) -> bool {
        tool == "mkvextract" || (tool == "ffmpeg" && args.iter().any(|a| a == "ffmetadata"))
    }

    fn arg_after<'a>(args: &'a [String], flag: &str, nth: usize) -> &'a str {
        args.iter()
            .enumerate()
            .filter(|(_, a)| *a == flag)
            .nth(nth)
            .map(|(i, _)| args[i + 1].as_str())
            .unwrap()
    }

    /// Reports every line to `on_line` the way a real run would.
    fn finished(
        tool: &str,
        on_line: &dyn Fn(&ToolLine<'_>),
        code: i32,
        stdout: &str,
        stderr: &str,
    ) -> ToolOutput {
        for (stream, text) in [(Stream::Stdout, stdout), (Stream::Stderr, stderr)] {
            for line in text.lines() {
                on_line(&ToolLine { tool, stream, text: line });
            }
        }
        ToolOutput {
            code: Some(code),
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        }
    }

    /// ffmpeg fails with 1, MKVToolNix with 2 (1 only means warnings).
    fn failed(tool: &str, on_line: &dyn Fn(&ToolLine<'_>), stderr: &str) -> ToolOutput {
        let code = if tool == "ffmpeg" { 1 } else { 2 };
        Self::finished(tool, on_line, code, "", stderr)
    }
}

impl ToolRunner for FakeTools {
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
        on_line: &dyn Fn(&ToolLine<'_>),
    ) -> mkv_chapter_editor::Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(ChapterError::Cancelled {
                tool: invocation.tool.clone(),
            });
        }

        let args: Vec<String> = invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.invocations.borrow_mut().push(args.clone());

        let tool = invocation.tool.as_str();
        if Self::is_extract(tool, &args) {
            if let Some(stderr) = &self.extract_failure {
                return Ok(Self::failed(tool, on_line, stderr));
            }
            fs::write(args.last().unwrap(), &self.extracted)?;
            let stderr = if tool == "ffmpeg" { FFMPEG_SUMMARY } else { "" };
            return Ok(Self::finished(tool, on_line, 0, "", stderr));
        }

        if let Some(stderr) = &self.remux_failure {
            return Ok(Self::failed(tool, on_line, stderr));
        }
        let (metadata, output) = match invocation.tool.as_str() {
            "ffmpeg" => (Self::arg_after(&args, "-i", 1), args.last().unwrap().as_str()),
            _ => (
                Self::arg_after(&args, "--chapters", 0),
                Self::arg_after(&args, "-o", 0),
            ),
        };
        *self.remuxed_metadata.borrow_mut() = Some(fs::read_to_string(metadata)?);
        fs::write(output, b"remuxed")?;
        let (stdout, stderr) = match tool {
            "ffmpeg" => (
                "Multiplexing took 0 seconds.\n",
                "size=     100KiB time=00:10:50.00 bitrate=N/A speed=1e+03x\n",
            ),
            _ => ("Progress: 100%\nMultiplexing took 0 seconds.\n", ""),
        };
        if self.remux_warning {
            let stdout = "Warning: the track 1 has no language set.\nMultiplexing took 0 seconds.\n";
            return Ok(Self::finished(tool, on_line, 1, stdout, ""));
        }
        Ok(Self::finished(tool, on_line, 0, stdout, stderr))
    }
}

struct Fixture {
    dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = |name: &str| {
            let path = dir.path().join(name);
            fs::write(&path, b"").unwrap();
            Some(path)
        };
        let config = Config {
            ffmpeg_path: bin("ffmpeg"),
            mkvextract_path: bin("mkvextract"),
            mkvmerge_path: bin("mkvmerge"),
            ..Default::default()
        };
        fs::write(dir.path().join("movie.mkv"), b"matroska").unwrap();
        Fixture { dir, config }
    }

    fn input(&self) -> PathBuf {
        self.dir.path().join("movie.mkv")
    }
}

fn titles(chapters: &[Chapter]) -> Vec<&str> {
    chapters.iter().map(|c| c.title.as_str()).collect()
}

#[test]
fn ffmetadata_session_rewrites_only_titles() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);

    let chapters = session.extract().unwrap();
    assert_eq!(titles(chapters), ["Opening", "Chapter 2", "Credits"]);
    assert_eq!(chapters[1].start_time, "00:01:05");
    let scratch = session.scratch_path().unwrap().to_path_buf();
    assert!(scratch.exists());

    let mut editor = ScriptedEditor::new().with_set(2, "The Heist");
    session.edit_with(&mut editor).unwrap();
    assert_eq!(session.state(), SessionState::Edited);
    session.serialize().unwrap();
    let outcome = session.remux(None).unwrap();

    assert_eq!(session.state(), SessionState::Remuxed);
    assert_eq!(outcome.output_path, fixture.dir.path().join("output_movie.mkv"));
    assert_eq!(outcome.chapter_count, 3);
    assert!(outcome.tool_output.contains("Multiplexing"));
    assert!(outcome.output_path.exists());
    assert!(!scratch.exists());

    let merged = tools.remuxed_metadata.borrow().clone().unwrap();
    assert_eq!(merged, FFMETADATA.replace("title=Chapter 2", "title=The Heist"));

    let invocations = tools.invocations.borrow();
    assert_eq!(invocations.len(), 2);
    assert!(invocations[1].windows(2).any(|w| w == ["-map_metadata", "1"]));
}

#[test]
fn ffmetadata_unchanged_titles_round_trip() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);

    session.run(&mut ScriptedEditor::new(), None).unwrap();
    assert_eq!(tools.remuxed_metadata.borrow().as_deref(), Some(FFMETADATA));
}

#[test]
fn ffmetadata_without_chapters() {
    let fixture = Fixture::new();
    let doc = ";FFMETADATA1\nencoder=Lavf60.3.100\n";
    let tools = FakeTools::extracting(doc);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);

    let outcome = session.run(&mut ScriptedEditor::new(), None).unwrap();
    assert_eq!(outcome.chapter_count, 0);
    assert_eq!(tools.remuxed_metadata.borrow().as_deref(), Some(doc));
}

#[test]
fn matroska_session_rebuilds_xml() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(CHAPTER_XML);
    let output = fixture.dir.path().join("renamed.mkv");
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools);

    let mut editor = ScriptedEditor::new().with_titles(vec!["Prologue".into(), "Epilogue".into()]);
    let outcome = session.run(&mut editor, Some(&output)).unwrap();
    assert_eq!(outcome.output_path, output);

    let xml = tools.remuxed_metadata.borrow().clone().unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(!xml.contains("6174634854302744398"));

    let rebuilt = parse_chapters(&xml).unwrap();
    assert_eq!(titles(&rebuilt), ["Prologue", "Epilogue"]);
    assert_eq!(rebuilt[0].uid.as_deref(), Some("1573092137066836364"));
    assert_eq!(rebuilt[1].uid.as_deref(), Some("8305431235245425735"));
    assert_eq!(rebuilt[1].start_time, "00:12:01.021000000");
    assert_eq!(rebuilt[1].language.as_deref(), Some("eng"));

    let invocations = tools.invocations.borrow();
    assert_eq!(invocations[0][1], "chapters");
    assert!(invocations[1].iter().any(|a| a == "--no-chapters"));
}

#[test]
fn matroska_empty_extraction_is_no_chapters() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting("");
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools);
    assert!(session.extract().unwrap().is_empty());
}

#[test]
fn malformed_xml_fails_session() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting("<Chapters><EditionEntry><ChapterAtom>");
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools);

    let err = session.extract().unwrap_err();
    assert!(matches!(err, ChapterError::ParseFailed(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.scratch_path().is_none());
}

#[test]
fn extraction_failure_carries_diagnostic() {
    let fixture = Fixture::new();
    let tools = FakeTools {
        extract_failure: Some("movie.mkv: Invalid data found when processing input".into()),
        ..Default::default()
    };
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);

    let err = session.extract().unwrap_err();
    match &err {
        ChapterError::ToolExecutionFailed { tool, status, output } => {
            assert_eq!(tool, "ffmpeg");
            assert_eq!(status, "1");
            assert!(output.contains("Invalid data found"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.failure().unwrap().contains("Invalid data found"));
    assert!(session.scratch_path().is_none());
}

#[test]
fn remux_failure_removes_scratch() {
    let fixture = Fixture::new();
    let tools = FakeTools {
        extracted: CHAPTER_XML.to_owned(),
        remux_failure: Some("Error: The file 'movie.mkv' could not be opened".into()),
        ..Default::default()
    };
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools);

    session.extract().unwrap();
    let scratch = session.scratch_path().unwrap().to_path_buf();
    session.edit_with(&mut ScriptedEditor::new()).unwrap();
    let serialized = session.serialize().unwrap().to_path_buf();
    assert!(serialized.exists());

    let err = session.remux(None).unwrap_err();
    assert!(matches!(&err, ChapterError::ToolExecutionFailed { status, .. } if status == "2"));
    assert!(err.diagnostic().unwrap().contains("could not be opened"));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!scratch.exists());
    assert!(!fixture.dir.path().join("output_movie.mkv").exists());

    session.reset().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn edited_list_must_match_chapter_count() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);
    session.extract().unwrap();

    let mut short = ScriptedEditor::new().with_titles(vec!["A".into(), "B".into()]);
    let err = session.edit_with(&mut short).unwrap_err();
    assert!(matches!(
        err,
        ChapterError::ChapterCountMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(session.state(), SessionState::Extracted);

    let mut edited = session.chapters().to_vec();
    edited[0].title = "Cold Open".into();
    edited[0].start_time = "99:99:99".into();
    session.apply_edits(edited).unwrap();
    assert_eq!(session.chapters()[0].title, "Cold Open");
    assert_eq!(session.chapters()[0].start_time, "00:00:00");
}

#[test]
fn stages_run_in_order() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools);

    assert!(matches!(
        session.serialize().unwrap_err(),
        ChapterError::InvalidState { .. }
    ));
    assert!(matches!(
        session.remux(None).unwrap_err(),
        ChapterError::InvalidState { .. }
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(tools.invocations.borrow().is_empty());
}

#[test]
fn missing_tool_is_unavailable() {
    let fixture = Fixture::new();
    let config = Config {
        mkvextract_path: Some(fixture.dir.path().join("no-such-mkvextract")),
        ..fixture.config.clone()
    };
    let tools = FakeTools::extracting(CHAPTER_XML);
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &config, &tools);

    let err = session.extract().unwrap_err();
    assert!(matches!(err, ChapterError::ToolUnavailable { .. }));
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn cancelled_session_fails() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools)
        .with_cancel_token(cancel);

    assert!(matches!(
        session.extract().unwrap_err(),
        ChapterError::Cancelled { .. }
    ));
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn output_may_not_overwrite_input() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let input = fixture.input();
    let mut session = EditSession::new(&input, Dialect::FfMetadata, &fixture.config, &tools);

    let err = session
        .run(&mut ScriptedEditor::new(), Some(Path::new(&input)))
        .unwrap_err();
    assert!(matches!(err, ChapterError::Io(_)));
    assert_eq!(fs::read(&input).unwrap(), b"matroska");
}

#[derive(Default)]
struct Recorder {
    lines: RefCell<Vec<String>>,
    progress: RefCell<Vec<(String, Option<u8>)>>,
}

impl Recorder {
    fn record(&self, event: &ToolEvent<'_>) {
        match event {
            ToolEvent::Output(line) => self.lines.borrow_mut().push(line.text.to_owned()),
            ToolEvent::Progress { tool, progress } => self
                .progress
                .borrow_mut()
                .push((tool.to_string(), progress.percent)),
        }
    }
}

#[test]
fn ffmetadata_session_reports_info_and_progress() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(FFMETADATA);
    let recorder = Recorder::default();
    let observer = |event: &ToolEvent<'_>| recorder.record(event);
    let mut session = EditSession::new(fixture.input(), Dialect::FfMetadata, &fixture.config, &tools)
        .with_observer(&observer);

    session.extract().unwrap();
    let info = session.container_info().unwrap().clone();
    assert_eq!(info.size, 8);
    assert_eq!(info.format.as_deref(), Some("MATROSKA"));
    assert_eq!(info.duration, Some(Duration::from_secs(1300)));
    assert_eq!(info.bit_rate, Some(1_882_000));
    assert_eq!(info.encoder.as_deref(), Some("Lavf60.3.100"));
    assert_eq!(info.title, None);

    session.edit_with(&mut ScriptedEditor::new()).unwrap();
    session.serialize().unwrap();
    session.remux(None).unwrap();

    assert!(recorder.lines.borrow().iter().any(|l| l.contains("Duration: 00:21:40.00")));
    assert_eq!(*recorder.progress.borrow(), [("ffmpeg".to_owned(), Some(50))]);
}

#[test]
fn matroska_session_reports_mkvmerge_progress() {
    let fixture = Fixture::new();
    let tools = FakeTools::extracting(CHAPTER_XML);
    let recorder = Recorder::default();
    let observer = |event: &ToolEvent<'_>| recorder.record(event);
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools)
        .with_observer(&observer);

    session.run(&mut ScriptedEditor::new(), None).unwrap();
    assert_eq!(*recorder.progress.borrow(), [("mkvmerge".to_owned(), Some(100))]);

    session.reset().unwrap();
    assert!(session.container_info().is_none());
}

#[test]
fn mkvtoolnix_warnings_are_not_failures() {
    let fixture = Fixture::new();
    let tools = FakeTools {
        extracted: CHAPTER_XML.to_owned(),
        remux_warning: true,
        ..Default::default()
    };
    let mut session = EditSession::new(fixture.input(), Dialect::Matroska, &fixture.config, &tools);

    let outcome = session.run(&mut ScriptedEditor::new(), None).unwrap();
    assert!(outcome.tool_output.contains("Warning"));
    assert_eq!(session.state(), SessionState::Remuxed);
}

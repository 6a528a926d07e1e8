use std::ffi::{OsStr, OsString};
use std::fmt::{self, Display};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ChapterError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long output is still read after the tool has exited.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Shared flag that aborts a running tool when set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct ToolInvocation {
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        ToolInvocation {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }
}

impl Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Turns a non-zero exit into [`ChapterError::ToolExecutionFailed`].
    pub fn check(self, tool: &str) -> Result<ToolOutput> {
        if self.success() {
            return Ok(self);
        }
        let status = self
            .code
            .map_or_else(|| "terminated by signal".to_owned(), |c| c.to_string());
        log::warn!("{tool} failed with status {status}");
        Err(ChapterError::ToolExecutionFailed {
            tool: tool.to_owned(),
            status,
            output: self.combined(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of live tool output. ffmpeg ends its stats lines with `\r`, so
/// both `\r` and `\n` end a line.
#[derive(Clone, Copy, Debug)]
pub struct ToolLine<'a> {
    pub tool: &'a str,
    pub stream: Stream,
    pub text: &'a str,
}

/// Runs external tools. Implemented by [`SystemToolRunner`] and by test doubles.
pub trait ToolRunner {
    /// Runs `invocation` to completion, handing every output line to `on_line`
    /// as it arrives.
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
        on_line: &dyn Fn(&ToolLine<'_>),
    ) -> Result<ToolOutput>;
}

#[derive(Clone, Debug)]
pub struct SystemToolRunner {
    pub timeout: Duration,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration) -> Self {
        SystemToolRunner { timeout }
    }
}

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream: Stream,
    tx: &Sender<(Stream, Vec<u8>)>,
) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let tx = tx.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[derive(Default)]
struct StreamBuf {
    raw: Vec<u8>,
    pending: Vec<u8>,
}

/// Output gathered so far, split into lines for the callback.
struct Capture<'a> {
    tool: &'a str,
    on_line: &'a dyn Fn(&ToolLine<'_>),
    stdout: StreamBuf,
    stderr: StreamBuf,
}

impl<'a> Capture<'a> {
    fn new(tool: &'a str, on_line: &'a dyn Fn(&ToolLine<'_>)) -> Self {
        Capture {
            tool,
            on_line,
            stdout: StreamBuf::default(),
            stderr: StreamBuf::default(),
        }
    }

    fn emit(&self, stream: Stream, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return;
        }
        log::trace!("{}: {}", self.tool, text);
        (self.on_line)(&ToolLine {
            tool: self.tool,
            stream,
            text: &text,
        });
    }

    fn push(&mut self, stream: Stream, data: &[u8]) {
        let buf = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buf.raw.extend_from_slice(data);
        buf.pending.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = buf.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let rest = buf.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut buf.pending, rest);
            line.pop();
            lines.push(line);
        }
        for line in lines {
            self.emit(stream, &line);
        }
    }

    fn finish(mut self, code: Option<i32>) -> ToolOutput {
        for stream in [Stream::Stdout, Stream::Stderr] {
            let pending = match stream {
                Stream::Stdout => std::mem::take(&mut self.stdout.pending),
                Stream::Stderr => std::mem::take(&mut self.stderr.pending),
            };
            self.emit(stream, &pending);
        }
        ToolOutput {
            code,
            stdout: String::from_utf8_lossy(&self.stdout.raw).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr.raw).into_owned(),
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl ToolRunner for SystemToolRunner {
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
        on_line: &dyn Fn(&ToolLine<'_>),
    ) -> Result<ToolOutput> {
        let tool = &invocation.tool;
        if cancel.is_cancelled() {
            return Err(ChapterError::Cancelled { tool: tool.clone() });
        }

        log::info!("Running {invocation}");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ChapterError::ToolUnavailable { tool: tool.clone() },
                _ => ChapterError::Io(e),
            })?;

        // The reader threads are never joined: a grandchild that inherited the
        // pipes can keep them open long after the tool itself is gone.
        let (tx, rx) = mpsc::channel();
        drain(child.stdout.take(), Stream::Stdout, &tx);
        drain(child.stderr.take(), Stream::Stderr, &tx);
        drop(tx);

        let mut capture = Capture::new(tool, on_line);
        let deadline = Instant::now() + self.timeout;
        let mut exited: Option<(ExitStatus, Instant)> = None;
        let mut pipes_open = true;

        let status = loop {
            if pipes_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok((stream, data)) => capture.push(stream, &data),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => pipes_open = false,
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }

            if let Some((status, at)) = exited {
                if !pipes_open {
                    break status;
                }
                if at.elapsed() >= PIPE_GRACE || Instant::now() >= deadline {
                    for (stream, data) in rx.try_iter() {
                        capture.push(stream, &data);
                    }
                    log::warn!("{tool} exited but its output is still open, not waiting for it");
                    break status;
                }
                continue;
            }

            if let Some(status) = child.try_wait()? {
                exited = Some((status, Instant::now()));
                continue;
            }
            if cancel.is_cancelled() {
                kill(&mut child);
                log::warn!("{tool} cancelled");
                return Err(ChapterError::Cancelled { tool: tool.clone() });
            }
            if Instant::now() >= deadline {
                kill(&mut child);
                for (stream, data) in rx.try_iter() {
                    capture.push(stream, &data);
                }
                let output = capture.finish(None);
                log::warn!("{tool} timed out after {:?}", self.timeout);
                return Err(ChapterError::ToolTimedOut {
                    tool: tool.clone(),
                    timeout: self.timeout,
                    output: output.combined(),
                });
            }
        };

        let output = capture.finish(status.code());
        log::debug!("{tool} exited with {status}\n{}", output.combined());
        Ok(output)
    }
}

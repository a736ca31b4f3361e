//! External Tools
//!
//! Optional command line optimizers are wrapped behind the [`Recompressor`]
//! trait. When a program cannot be found on `PATH`, [`detect`] hands out a
//! [`NoOp`] instead, so the optimizer runs the same code either way.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::error::OptimizationWarning;

pub const ZOPFLIPNG: &str = "zopflipng";

pub const ADVZIP: &str = "advzip";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A lossless recompression step
pub trait Recompressor: Send + Sync {
    /// Name of the underlying program
    fn name(&self) -> &str;

    /// Returns the recompressed data
    ///
    /// The result is a candidate only; the caller decides whether to keep it.
    fn recompress(&self, data: &[u8]) -> Result<Vec<u8>, OptimizationWarning>;

    /// Whether the step can change anything at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in for a program that is not installed
#[derive(Debug, Clone)]
pub struct NoOp {
    name: String,
}

impl NoOp {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Recompressor for NoOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn recompress(&self, data: &[u8]) -> Result<Vec<u8>, OptimizationWarning> {
        Ok(data.to_vec())
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// How an external program receives its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// `program [args] <input> <output>`
    InputOutput,

    /// `program [args] <file>`, rewriting the file
    InPlace,
}

/// An optimizer run as a child process on a scratch copy of the data
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    mode: FileMode,

    /// Extension of the scratch files, some tools refuse unknown ones
    extension: String,

    timeout: Duration,
}

impl ExternalTool {
    pub fn new(name: &str, program: PathBuf, mode: FileMode, extension: &str) -> Self {
        Self {
            name: name.to_string(),
            program,
            args: vec![],
            mode,
            extension: extension.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|arg| arg.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn io_warning(&self, err: impl ToString) -> OptimizationWarning {
        OptimizationWarning::Io {
            tool: self.name.clone(),
            reason: err.to_string(),
        }
    }

    /// Runs the program and waits for it at most `timeout`
    fn run(&self, files: &[&Path]) -> Result<ExitStatus, OptimizationWarning> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(files)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| self.io_warning(err))?;

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),

                Ok(None) if started.elapsed() >= self.timeout => {
                    if let Err(err) = child.kill() {
                        debug!("Failed to kill '{}': {}", self.name, err);
                    }
                    let _ = child.wait();

                    return Err(OptimizationWarning::Timeout {
                        tool: self.name.clone(),
                        timeout: self.timeout,
                    });
                }

                Ok(None) => thread::sleep(POLL_INTERVAL),

                Err(err) => return Err(self.io_warning(err)),
            }
        }
    }
}

impl Recompressor for ExternalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn recompress(&self, data: &[u8]) -> Result<Vec<u8>, OptimizationWarning> {
        let scratch = tempfile::tempdir().map_err(|err| self.io_warning(err))?;
        let input = scratch.path().join(format!("input.{}", self.extension));
        let output = scratch.path().join(format!("output.{}", self.extension));

        fs::write(&input, data).map_err(|err| self.io_warning(err))?;

        let (status, result) = match self.mode {
            FileMode::InputOutput => (self.run(&[input.as_path(), output.as_path()])?, &output),
            FileMode::InPlace => (self.run(&[input.as_path()])?, &input),
        };

        if !status.success() {
            return Err(OptimizationWarning::ExitStatus {
                tool: self.name.clone(),
                status: status.to_string(),
            });
        }

        fs::read(result).map_err(|err| self.io_warning(err))
    }
}

/// Looks a program up on `PATH`
pub fn find_program(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;

    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }

        let candidate = dir.join(format!("{}.exe", name));
        (cfg!(windows) && candidate.is_file()).then_some(candidate)
    })
}

/// Returns the tool if its program is installed, a [`NoOp`] otherwise
pub fn detect(
    name: &str,
    args: &[&str],
    mode: FileMode,
    extension: &str,
    timeout: Duration,
) -> Box<dyn Recompressor> {
    match find_program(name) {
        Some(program) => {
            debug!("Using '{}' at '{}'", name, program.display());
            Box::new(
                ExternalTool::new(name, program, mode, extension)
                    .with_args(args)
                    .with_timeout(timeout),
            )
        }
        None => {
            warn!(
                "{}",
                OptimizationWarning::ToolUnavailable {
                    tool: name.to_string()
                }
            );
            Box::new(NoOp::new(name))
        }
    }
}

/// Lossless PNG recompression with `zopflipng`
pub fn zopflipng(timeout: Duration) -> Box<dyn Recompressor> {
    detect(
        ZOPFLIPNG,
        &["-y", "--iterations=63", "--filters=e"],
        FileMode::InputOutput,
        "png",
        timeout,
    )
}

/// In-place recompression of every deflated ZIP entry with `advzip`
pub fn advzip(timeout: Duration) -> Box<dyn Recompressor> {
    detect(
        ADVZIP,
        &[
            "--recompress",
            "--shrink-insane",
            "--iter=127",
            "--pedantic",
            "--quiet",
            "--",
        ],
        FileMode::InPlace,
        "zip",
        timeout,
    )
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use crate::{
        error::OptimizationWarning,
        optimizer::tools::{
            ExternalTool, FileMode, NoOp, Recompressor, detect, find_program,
        },
    };

    #[test]
    fn test_noop() {
        let tool = NoOp::new("zopflipng");

        assert_eq!(tool.name(), "zopflipng");
        assert!(!tool.is_available());
        assert_eq!(tool.recompress(b"data").unwrap(), b"data");
    }

    #[test]
    fn test_find_program_missing() {
        assert!(find_program("md2epub-surely-not-installed").is_none());
    }

    #[test]
    fn test_detect_missing_tool() {
        let tool = detect(
            "md2epub-surely-not-installed",
            &[],
            FileMode::InPlace,
            "bin",
            Duration::from_secs(1),
        );

        assert!(!tool.is_available());
        assert_eq!(tool.recompress(b"same").unwrap(), b"same");
    }

    #[test]
    fn test_external_tool_spawn_failure() {
        let tool = ExternalTool::new(
            "ghost",
            PathBuf::from("/nonexistent/ghost"),
            FileMode::InPlace,
            "bin",
        );

        assert!(matches!(
            tool.recompress(b"data"),
            Err(OptimizationWarning::Io { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_in_place() {
        let Some(program) = find_program("true") else {
            return;
        };

        let tool = ExternalTool::new("true", program, FileMode::InPlace, "bin");
        assert_eq!(tool.recompress(b"kept").unwrap(), b"kept");
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_exit_status() {
        let Some(program) = find_program("false") else {
            return;
        };

        let tool = ExternalTool::new("false", program, FileMode::InPlace, "bin");
        assert!(matches!(
            tool.recompress(b"data"),
            Err(OptimizationWarning::ExitStatus { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_timeout() {
        let Some(program) = find_program("sh") else {
            return;
        };

        let tool = ExternalTool::new("sh", program, FileMode::InPlace, "bin")
            .with_args(&["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100));

        assert!(matches!(
            tool.recompress(b"data"),
            Err(OptimizationWarning::Timeout { .. })
        ));
    }
}

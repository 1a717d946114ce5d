//! Prepared command invocations.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use transcoder_models::{JobParams, Preset};

use crate::error::{MediaError, MediaResult};

/// Executable plus fully resolved arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a preset's placeholders against job parameters.
    pub fn from_preset(preset: &Preset, params: &JobParams) -> Self {
        Self {
            program: preset.path.clone(),
            args: preset.resolve_args(params),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build the child command with both output pipes configured.
    ///
    /// Stdout and stderr are piped before spawn so no output is lost. The
    /// child leads its own process group so a kill also reaches anything it
    /// forked, which would otherwise hold the pipes open.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Check an executable is reachable through PATH.
pub fn check_executable(name: &str) -> MediaResult<PathBuf> {
    which::which(name).map_err(|_| MediaError::ExecutableNotFound(name.to_string()))
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    check_executable("ffmpeg")
}

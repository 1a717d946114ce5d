//! Job process supervision for the transcoder.
//!
//! This crate provides:
//! - Preset preparation into a concrete command invocation
//! - Child process spawning with concurrent stdout/stderr capture
//! - Progress parsing from ffmpeg `-progress` output and stderr banners
//! - Kill support for in-flight processes

pub mod command;
pub mod error;
pub mod job;
pub mod progress;

pub use command::{check_executable, check_ffmpeg, Invocation};
pub use error::{MediaError, MediaResult};
pub use job::{Job, ProcessHandle};
pub use progress::{parse_stderr_line, parse_stdout_line, parse_timecode, ProgressUpdate};

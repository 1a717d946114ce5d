//! Runtime job: lifecycle state plus supervision of its child process.
//!
//! All mutable run state (status, progress buffers, process handle, output
//! log) sits behind one `RwLock`. The stdout reader, the stderr reader, the
//! command listener and any status reader all go through it, so a reader never
//! observes a buffer mid-append.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use transcoder_models::{JobId, JobParams, JobSnapshot, JobState, Preset, ProgressInfo};

use crate::command::Invocation;
use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_stderr_line, parse_stdout_line, ProgressUpdate};

/// Identifies the live child process of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[derive(Debug, Default)]
struct RunState {
    status: JobState,
    progress: ProgressInfo,
    process: Option<ProcessHandle>,
    invocation: Option<Invocation>,
    command_output: String,
    error: Option<String>,
    started: bool,
    killed: bool,
}

/// One preset bound to parameters, with identity and a lifecycle.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    created_at: DateTime<Utc>,
    preset_id: Option<Uuid>,
    preset: Arc<Preset>,
    params: JobParams,
    state: RwLock<RunState>,
    finished: watch::Sender<bool>,
}

impl Job {
    /// Create a new submitted job with a fresh ID.
    pub fn new(preset: Arc<Preset>, params: JobParams) -> Self {
        Self::build(JobId::new(), Utc::now(), preset, params, RunState::default())
    }

    /// Rebuild a job from its wire form.
    ///
    /// Keeps the ID, status and output log; fails if the payload has no preset.
    pub fn from_snapshot(snapshot: JobSnapshot) -> MediaResult<Self> {
        let preset = snapshot
            .preset
            .ok_or_else(|| MediaError::MissingPreset(snapshot.id.to_string()))?;
        let mut job = Self::build(
            snapshot.id,
            snapshot.created_at,
            Arc::new(preset),
            snapshot.params,
            RunState {
                status: snapshot.status,
                command_output: snapshot.command_output,
                ..RunState::default()
            },
        );
        job.preset_id = snapshot.preset_id.or(job.preset.id);
        Ok(job)
    }

    fn build(
        id: JobId,
        created_at: DateTime<Utc>,
        preset: Arc<Preset>,
        params: JobParams,
        state: RunState,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            id,
            created_at,
            preset_id: preset.id,
            preset,
            params,
            state: RwLock::new(state),
            finished,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RunState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RunState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn preset(&self) -> &Arc<Preset> {
        &self.preset
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn status(&self) -> JobState {
        self.read_state().status
    }

    /// Mark the job as picked up by a worker.
    ///
    /// Only a submitted job moves; later states are left alone.
    pub fn mark_in_progress(&self) -> JobState {
        let mut state = self.write_state();
        if state.status == JobState::Submitted {
            state.status = JobState::InProgress;
        }
        state.status
    }

    /// Copy of the current progress.
    pub fn progress(&self) -> ProgressInfo {
        self.read_state().progress.clone()
    }

    /// Progress serialized as JSON, the payload of a status reply.
    pub fn info_json(&self) -> String {
        let state = self.read_state();
        serde_json::to_string(&state.progress).unwrap_or_default()
    }

    /// Completion fraction of the current run.
    pub fn fraction(&self) -> f64 {
        self.read_state().progress.fraction()
    }

    pub fn output(&self) -> Vec<String> {
        self.read_state().progress.output.clone()
    }

    pub fn err_output(&self) -> Vec<String> {
        self.read_state().progress.err_output.clone()
    }

    /// Stdout of the last finished run, newline-joined.
    pub fn command_output(&self) -> String {
        self.read_state().command_output.clone()
    }

    /// Error of the last run, if it failed.
    pub fn error(&self) -> Option<String> {
        self.read_state().error.clone()
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.read_state().process
    }

    pub fn was_killed(&self) -> bool {
        self.read_state().killed
    }

    /// Immutable value view built from the locked fields.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read_state();
        JobSnapshot {
            id: self.id,
            created_at: self.created_at,
            status: state.status,
            preset_id: self.preset_id,
            preset: Some(self.preset.as_ref().clone()),
            params: self.params.clone(),
            command_output: state.command_output.clone(),
        }
    }

    /// Resolve placeholders and build the invocation for the next run.
    pub fn prepare(&self) -> Invocation {
        let invocation = Invocation::from_preset(&self.preset, &self.params);
        self.write_state().invocation = Some(invocation.clone());
        invocation
    }

    /// Spawn the process and block until it exits and its output is drained.
    ///
    /// Sets `Done` on a clean exit and `Failed` on spawn error, pipe error,
    /// non-zero exit, wait error or kill. A job runs once per `reset`.
    pub async fn run(&self) -> MediaResult<()> {
        let invocation = {
            let mut state = self.write_state();
            if state.started {
                return Err(MediaError::AlreadyRan(self.id.to_string()));
            }
            state.started = true;
            if state.status == JobState::Submitted {
                state.status = JobState::InProgress;
            }
            state
                .invocation
                .get_or_insert_with(|| Invocation::from_preset(&self.preset, &self.params))
                .clone()
        };

        let result = self.supervise(&invocation).await;
        self.finish(result)
    }

    async fn supervise(&self, invocation: &Invocation) -> MediaResult<()> {
        debug!(job_id = %self.id, "Running: {}", invocation);

        let mut child = invocation
            .to_command()
            .spawn()
            .map_err(|e| MediaError::spawn_failed(invocation.program(), e))?;

        let stdout = child.stdout.take().ok_or(MediaError::PipeUnavailable("stdout"))?;
        let stderr = child.stderr.take().ok_or(MediaError::PipeUnavailable("stderr"))?;

        if let Some(pid) = child.id() {
            self.write_state().process = Some(ProcessHandle { pid });
            info!(job_id = %self.id, pid, "Started {}", invocation.program());
        }

        let wait = async {
            let status = child.wait().await;
            // The pid is reaped now; it must not be signalled again.
            self.write_state().process = None;
            status
        };

        let (_, _, status) = tokio::join!(
            read_lines(stdout, |line| self.append_output(line)),
            read_lines(stderr, |line| self.append_err_output(line)),
            wait,
        );

        let status = status?;
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::process_failed(status.code()))
        }
    }

    /// Record the outcome, publish the output log and release waiters.
    fn finish(&self, result: MediaResult<()>) -> MediaResult<()> {
        let result = {
            let mut state = self.write_state();
            state.process = None;
            state.command_output = state.progress.output.join("\n");

            let result = match result {
                Ok(()) if state.killed => Err(MediaError::Killed),
                Err(MediaError::ProcessFailed { .. }) if state.killed => Err(MediaError::Killed),
                other => other,
            };
            match &result {
                Ok(()) => state.status = JobState::Done,
                Err(e) => {
                    state.status = JobState::Failed;
                    state.error = Some(e.to_string());
                }
            }
            result
        };

        match &result {
            Ok(()) => info!(job_id = %self.id, "Process exited cleanly"),
            Err(e) => warn!(job_id = %self.id, "Process failed: {}", e),
        }
        self.finished.send_replace(true);
        result
    }

    /// Send SIGKILL to the live process and its process group.
    ///
    /// Errors without touching the status when there is nothing to kill.
    pub fn kill(&self) -> MediaResult<()> {
        let mut state = self.write_state();
        let handle = state
            .process
            .ok_or_else(|| MediaError::NotRunning(self.id.to_string()))?;

        let pid = i32::try_from(handle.pid)
            .map_err(|_| MediaError::kill_failed(format!("pid {} out of range", handle.pid)))?;
        signal::killpg(Pid::from_raw(pid), Signal::SIGKILL)
            .map_err(|e| MediaError::kill_failed(e.to_string()))?;

        state.process = None;
        state.killed = true;
        state.status = JobState::Failed;
        info!(job_id = %self.id, pid, "Killed process");
        Ok(())
    }

    /// Return the job to its pre-run state, keeping its identity.
    pub fn reset(&self) {
        *self.write_state() = RunState::default();
        self.finished.send_replace(false);
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the current run has finished.
    pub async fn wait(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|finished| *finished).await;
    }

    fn append_output(&self, line: String) {
        let mut state = self.write_state();
        if let Some(ProgressUpdate::CurrentTime(seconds)) = parse_stdout_line(&line) {
            state.progress.current_time = seconds;
        }
        state.progress.output.push(line);
    }

    fn append_err_output(&self, line: String) {
        let mut state = self.write_state();
        if let Some(ProgressUpdate::TotalDuration(seconds)) = parse_stderr_line(&line) {
            state.progress.total_duration = seconds;
        }
        state.progress.err_output.push(line);
    }
}

/// Feed each line of `stream` to `on_line` until EOF.
///
/// Bytes are decoded lossily so a stray non-UTF-8 byte never ends capture.
async fn read_lines<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                on_line(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                warn!("Error reading process output: {}", e);
                break;
            }
        }
    }
}

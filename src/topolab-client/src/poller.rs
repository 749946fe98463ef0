//! Task status polling.
//!
//! A [`TaskPoller`] follows one backend task until it reaches a terminal
//! status. Polls are fire-once timers armed one after another, so at most
//! one status request per poller is in flight. Results are written to a
//! [`TaskBoard`], which may be shared by several pollers over time; each
//! poller claims a generation on the board and every timer checks that
//! generation before writing, so a superseded poller cannot overwrite the
//! status of its successor.
//!
//! ```text
//! Idle --start--> Scheduled --timer--> Polling --running--> Scheduled
//!                                         |
//!                                         +--completed/failed/error--> Terminated
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::TaskBackend;
use crate::error::{ClientError, Result};
use crate::models::{Device, RefreshResponse, TaskState, TaskStatus};

/// Error recorded when a status request fails at the transport level.
pub const POLL_FAILED_MESSAGE: &str = "Task polling failed";

/// Delays between the steps of a poll chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay before the first status request.
    pub initial_delay: Duration,
    /// Delay between requests while the task is running.
    pub interval: Duration,
    /// How long a completed status stays on the board.
    pub completed_grace: Duration,
    /// How long a failed status stays on the board.
    pub failed_grace: Duration,
    /// Give up after this many status requests. `None` polls for as long as
    /// the task reports `running`.
    pub max_polls: Option<u32>,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            interval: Duration::from_millis(1000),
            completed_grace: Duration::from_millis(3000),
            failed_grace: Duration::from_millis(5000),
            max_polls: None,
        }
    }
}

/// State of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    #[default]
    Idle,
    /// A timer is armed for the next status request.
    Scheduled,
    /// A status request is in flight.
    Polling,
    Terminated,
}

#[derive(Debug, Default)]
struct BoardState {
    generation: u64,
    task: Option<TaskStatus>,
    error: Option<String>,
    devices: Vec<Device>,
}

/// Shared view of the tracked task.
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    inner: Arc<Mutex<BoardState>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of the tracked task, until its grace delay has passed.
    pub fn current_task(&self) -> Option<TaskStatus> {
        self.inner.lock().task.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.lock().error = None;
    }

    /// Devices fetched after the last completed task.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.lock().devices.clone()
    }

    /// Generation of the poller currently allowed to write.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Hand the board to a new poller and return its generation.
    fn claim(&self, seed: TaskStatus) -> u64 {
        let mut state = self.inner.lock();
        state.generation += 1;
        state.task = Some(seed);
        state.error = None;
        state.generation
    }

    /// Apply `f` if `generation` still owns the board.
    fn update_if(&self, generation: u64, f: impl FnOnce(&mut BoardState)) -> bool {
        let mut state = self.inner.lock();
        if state.generation != generation {
            return false;
        }
        f(&mut state);
        true
    }

    fn set_error(&self, message: String) {
        self.inner.lock().error = Some(message);
    }
}

/// Live timer chain of a started poller.
struct PollHandle {
    cancel: CancellationToken,
    _join: JoinHandle<()>,
}

/// Polls the status of one backend task.
pub struct TaskPoller<B> {
    backend: Arc<B>,
    board: TaskBoard,
    timing: PollTiming,
    state: Arc<watch::Sender<PollState>>,
    handle: Option<PollHandle>,
}

impl<B: TaskBackend + 'static> TaskPoller<B> {
    pub fn new(backend: Arc<B>, board: TaskBoard, timing: PollTiming) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            backend,
            board,
            timing,
            state: Arc::new(state),
            handle: None,
        }
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Start polling `task_id`. A poller follows a single task; starting it
    /// twice is an error.
    pub fn start(&mut self, topology_id: &str, task_id: &str) -> Result<()> {
        self.begin(topology_id, task_id, None)
    }

    /// Request a config refresh for the topology and poll the task it starts.
    pub async fn start_refresh(&mut self, topology_id: &str) -> Result<RefreshResponse> {
        if self.handle.is_some() {
            return Err(ClientError::PollerAlreadyStarted);
        }

        let response = match self.backend.refresh_configs(topology_id).await {
            Ok(response) => response,
            Err(e) => {
                self.board.set_error(e.to_string());
                return Err(e);
            }
        };
        let task_id = response
            .task_id
            .clone()
            .ok_or(ClientError::MissingTaskId)?;

        self.begin(topology_id, &task_id, response.message.clone())?;
        Ok(response)
    }

    /// Wait until the poller has terminated. Returns at once if it was never
    /// started.
    pub async fn wait_terminated(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, PollState::Idle | PollState::Terminated))
            .await;
    }

    /// Stop the timer chain. Pending polls fire into nothing; a cleanup
    /// already armed by a terminal status still runs.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.cancel.cancel();
            self.state.send_if_modified(|state| {
                if *state == PollState::Terminated {
                    return false;
                }
                *state = PollState::Terminated;
                true
            });
        }
    }

    fn begin(&mut self, topology_id: &str, task_id: &str, message: Option<String>) -> Result<()> {
        if self.handle.is_some() {
            return Err(ClientError::PollerAlreadyStarted);
        }

        let generation = self.board.claim(TaskStatus::started(task_id, message));
        let cancel = CancellationToken::new();
        self.state.send_replace(PollState::Scheduled);
        tracing::debug!(
            task_id = %task_id,
            generation = generation,
            delay = ?self.timing.initial_delay,
            "Task poll scheduled"
        );

        let run = PollRun {
            backend: Arc::clone(&self.backend),
            board: self.board.clone(),
            timing: self.timing,
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            generation,
            topology_id: topology_id.to_string(),
            task_id: task_id.to_string(),
        };
        let join = tokio::spawn(run.run());

        self.handle = Some(PollHandle {
            cancel,
            _join: join,
        });
        Ok(())
    }
}

impl<B> Drop for TaskPoller<B> {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.cancel.cancel();
        }
    }
}

/// What to do after one status request.
enum Next {
    Reschedule,
    Cleanup(Duration),
    Stop,
}

/// The spawned side of a poller.
struct PollRun<B> {
    backend: Arc<B>,
    board: TaskBoard,
    timing: PollTiming,
    state: Arc<watch::Sender<PollState>>,
    cancel: CancellationToken,
    generation: u64,
    topology_id: String,
    task_id: String,
}

impl<B: TaskBackend> PollRun<B> {
    async fn run(self) {
        let mut delay = self.timing.initial_delay;
        let mut polls: u32 = 0;

        loop {
            if !self.sleep(delay).await || !self.is_live() {
                self.terminate();
                return;
            }

            self.state.send_replace(PollState::Polling);
            polls += 1;
            let next = self.poll_once(polls).await;
            if !self.is_live() {
                self.terminate();
                return;
            }

            match next {
                Next::Reschedule => {
                    if self.timing.max_polls.is_some_and(|max| polls >= max) {
                        tracing::warn!(task_id = %self.task_id, polls = polls, "Task still running after poll limit");
                        self.fail(format!("Task timed out after {polls} status checks"));
                        self.terminate();
                        return;
                    }
                    self.state.send_replace(PollState::Scheduled);
                    delay = self.timing.interval;
                }
                Next::Cleanup(grace) => {
                    self.terminate();
                    self.clear_after(grace).await;
                    return;
                }
                Next::Stop => {
                    self.terminate();
                    return;
                }
            }
        }
    }

    async fn poll_once(&self, poll: u32) -> Next {
        tracing::debug!(task_id = %self.task_id, poll = poll, "Polling task status");

        let response = match self
            .backend
            .task_status(&self.topology_id, &self.task_id)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, task_id = %self.task_id, "Failed to poll task status");
                self.fail(POLL_FAILED_MESSAGE.to_string());
                return Next::Stop;
            }
        };

        let Some(status) = response.to_status(&self.task_id) else {
            tracing::warn!(task_id = %self.task_id, status = %response.status, "Unexpected task status");
            self.fail(format!("Unexpected task status: {}", response.status));
            return Next::Stop;
        };

        match status.state {
            TaskState::Running => {
                tracing::debug!(
                    task_id = %self.task_id,
                    progress = status.progress,
                    completed = status.completed_count,
                    total = status.total_count,
                    "Task running"
                );
                self.update(|board| board.task = Some(status));
                Next::Reschedule
            }
            TaskState::Completed => {
                tracing::info!(task_id = %self.task_id, message = %status.message, "Task completed");
                self.update(|board| board.task = Some(status));

                match self.backend.list_devices(&self.topology_id).await {
                    Ok(devices) => {
                        self.update(|board| board.devices = devices);
                        Next::Cleanup(self.timing.completed_grace)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to refresh devices after task");
                        self.fail(POLL_FAILED_MESSAGE.to_string());
                        Next::Stop
                    }
                }
            }
            TaskState::Failed => {
                let error = response
                    .message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Task failed".to_string());
                tracing::info!(task_id = %self.task_id, error = %error, "Task failed");
                self.update(|board| {
                    board.error = Some(error);
                    board.task = Some(status);
                });
                Next::Cleanup(self.timing.failed_grace)
            }
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Clear the terminal status once `grace` has passed. Armed at the
    /// terminal transition, so cancelling or dropping the poller afterwards
    /// does not skip it; only a newer generation on the board does.
    async fn clear_after(&self, grace: Duration) {
        tokio::time::sleep(grace).await;
        if self.board.update_if(self.generation, |board| board.task = None) {
            tracing::debug!(task_id = %self.task_id, "Cleared task status");
        } else {
            tracing::debug!(task_id = %self.task_id, "Poller superseded, cleanup skipped");
        }
    }

    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.board.generation() == self.generation
    }

    fn update(&self, f: impl FnOnce(&mut BoardState)) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let applied = self.board.update_if(self.generation, f);
        if !applied {
            tracing::debug!(task_id = %self.task_id, "Poller superseded, update dropped");
        }
        applied
    }

    fn fail(&self, message: String) {
        self.update(|board| {
            board.error = Some(message);
            board.task = None;
        });
    }

    fn terminate(&self) {
        self.state.send_replace(PollState::Terminated);
    }
}

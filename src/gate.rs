//! Single-admission gate in front of the render engine.
//!
//! The engine lives on a dedicated worker thread and is never shared; async
//! callers send it jobs and wait on a oneshot reply. An async mutex around
//! the worker handle admits one caller at a time, and a job is only sent once
//! the previous one has returned, so at most one render is in flight. A
//! caller's timeout starts when its job is handed to the idle worker.
//!
//! When a render overruns the timeout the caller gets `Timeout` right away.
//! The engine is interrupted through its abort hook, if it has one, and is
//! marked for replacement. The next caller first waits, up to the abort
//! grace, for the stuck job to return and only then starts a fresh engine.
//!
//! If a caller's future is dropped mid-render (client went away), the job
//! still runs to completion on the worker and its result is discarded. The
//! next caller waits for it before sending its own job, outside of its own
//! timeout.

use crate::frame::RawFrame;
use crate::{AbortHandle, Error, RenderEngine, Result};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Builds a new engine; called on the worker thread that will own it
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn RenderEngine>> + Send + Sync>;

/// How long an interrupted engine gets to give up its job before a
/// replacement is started
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(30);

/// Engine state as observed through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Navigating,
    ScriptExecuted,
    Captured,
    /// No engine is running; the next render tries to start one
    Stopped,
}

/// Current state, tagged with the worker generation that set it so a
/// stale worker cannot overwrite the state of its replacement.
struct StateCell {
    inner: Mutex<(u64, EngineState)>,
}

impl StateCell {
    fn new(generation: u64) -> Self {
        Self {
            inner: Mutex::new((generation, EngineState::Idle)),
        }
    }

    fn set(&self, generation: u64, state: EngineState) {
        if let Ok(mut g) = self.inner.lock() {
            if g.0 == generation {
                g.1 = state;
            }
        }
    }

    fn reset(&self, generation: u64, state: EngineState) {
        if let Ok(mut g) = self.inner.lock() {
            *g = (generation, state);
        }
    }

    fn get(&self) -> EngineState {
        self.inner.lock().map(|g| g.1).unwrap_or(EngineState::Stopped)
    }
}

enum Command {
    Render(String, oneshot::Sender<Result<RawFrame>>),
    Close(oneshot::Sender<Result<()>>),
}

/// A job handed to the worker whose reply has not been received yet
struct Job {
    reply: oneshot::Receiver<Result<RawFrame>>,
    deadline: Instant,
}

struct Worker {
    /// `None` after the worker was let go and no replacement could start
    cmd_tx: Option<Sender<Command>>,
    generation: u64,
    abort: Option<AbortHandle>,
    pending: Option<Job>,
    /// The engine timed out or died and must not get another job
    retired: bool,
}

impl Worker {
    /// Wait for the pending job until `limit`; true once nothing is pending.
    /// The job stays parked if the limit passes or this future is dropped.
    async fn finish_pending(&mut self, limit: Instant) -> bool {
        let reply = match self.pending.as_mut() {
            Some(job) => tokio::time::timeout_at(limit, &mut job.reply).await,
            None => return true,
        };
        match reply {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => self.retired = true,
            Err(_) => return false,
        }
        self.pending = None;
        true
    }

    /// Retire the engine and interrupt whatever it is doing
    fn stop(&mut self) {
        self.retired = true;
        if let Some(abort) = self.abort.take() {
            // Abort hooks may block on the engine's transport.
            tokio::task::spawn_blocking(move || abort.abort());
        }
    }
}

/// The gate. Cheap to share behind an `Arc`.
pub struct RenderGate {
    worker: tokio::sync::Mutex<Worker>,
    factory: EngineFactory,
    state: Arc<StateCell>,
    generations: AtomicU64,
    timeout: Duration,
    abort_grace: Duration,
}

impl RenderGate {
    /// Start the worker thread and wait for its engine to come up.
    ///
    /// Engine creation failures are returned here so a service can refuse to
    /// start rather than fail on its first request.
    pub async fn start(factory: EngineFactory, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::ConfigError("render timeout must be positive".into()));
        }
        let state = Arc::new(StateCell::new(1));
        let worker = spawn_worker(factory.clone(), state.clone(), 1).await?;
        Ok(Self {
            worker: tokio::sync::Mutex::new(worker),
            factory,
            state,
            generations: AtomicU64::new(1),
            timeout,
            abort_grace: DEFAULT_ABORT_GRACE,
        })
    }

    /// Bound the wait for an interrupted engine to return its job. Past it
    /// the replacement starts anyway and the old engine is left to exit on
    /// its own.
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// State of the current engine
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Number of engines started so far, including the first one
    pub fn engines_started(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Render `address` on the engine. Callers queue here one at a time.
    pub async fn render(&self, address: &str) -> Result<RawFrame> {
        let mut worker = self.worker.lock().await;
        self.settle(&mut worker).await?;

        let (tx, rx) = oneshot::channel();
        let sent = match &worker.cmd_tx {
            Some(cmd_tx) => cmd_tx.send(Command::Render(address.to_string(), tx)).is_ok(),
            None => false,
        };
        if !sent {
            worker.retired = true;
            return Err(Error::WorkerLost("render worker had exited".into()));
        }

        // Parked on the worker so that if this future is dropped, the next
        // caller still waits for the job.
        let job = worker.pending.insert(Job {
            reply: rx,
            deadline: Instant::now() + self.timeout,
        });
        match tokio::time::timeout_at(job.deadline, &mut job.reply).await {
            Ok(Ok(res)) => {
                worker.pending = None;
                res
            }
            Ok(Err(_)) => {
                worker.pending = None;
                worker.retired = true;
                Err(Error::WorkerLost("render worker dropped the job".into()))
            }
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                warn!(
                    "Render of {} timed out after {}ms; stopping engine #{}",
                    address, ms, worker.generation
                );
                worker.stop();
                Err(Error::Timeout(ms))
            }
        }
    }

    /// Shut the worker down and close its engine
    pub async fn close(self) -> Result<()> {
        let mut worker = self.worker.into_inner();
        let cmd_tx = match worker.cmd_tx.take() {
            Some(cmd_tx) if !worker.retired => cmd_tx,
            // A retired engine closes itself once its job returns.
            _ => return Ok(()),
        };
        let (tx, rx) = oneshot::channel();
        if cmd_tx.send(Command::Close(tx)).is_err() {
            return Ok(());
        }
        rx.await
            .map_err(|e| Error::WorkerLost(format!("Close canceled: {}", e)))?
    }

    /// Wait out the previous job and replace the engine if it was retired.
    /// Runs before the caller's own timeout starts.
    async fn settle(&self, worker: &mut Worker) -> Result<()> {
        if !worker.retired {
            if let Some(deadline) = worker.pending.as_ref().map(|job| job.deadline) {
                // Nobody waits on this job any more, so it is only
                // interrupted once it overruns its deadline by the grace.
                if !worker.finish_pending(deadline + self.abort_grace).await {
                    warn!(
                        "Abandoned render on engine #{} is stuck; stopping it",
                        worker.generation
                    );
                    worker.stop();
                }
            }
        }

        if worker.retired {
            if !worker.finish_pending(Instant::now() + self.abort_grace).await {
                error!(
                    "Engine #{} did not stop within {:?}; starting a replacement anyway",
                    worker.generation, self.abort_grace
                );
                worker.pending = None;
            }
            self.replace_worker(worker).await?;
        }
        Ok(())
    }

    async fn replace_worker(&self, worker: &mut Worker) -> Result<()> {
        // Dropping the sender lets the old thread close its engine and exit.
        worker.cmd_tx = None;
        let generation = self.generations.load(Ordering::SeqCst) + 1;
        match spawn_worker(self.factory.clone(), self.state.clone(), generation).await {
            Ok(fresh) => {
                debug!("Engine #{} replaced by #{}", worker.generation, generation);
                self.generations.store(generation, Ordering::SeqCst);
                // The new thread has not run a job yet; anything the old
                // one still reports is ignored from here on.
                self.state.reset(generation, EngineState::Idle);
                *worker = fresh;
                Ok(())
            }
            Err(e) => {
                error!("Failed to start engine #{}: {}", generation, e);
                self.state.reset(generation, EngineState::Stopped);
                Err(e)
            }
        }
    }
}

async fn spawn_worker(
    factory: EngineFactory,
    state: Arc<StateCell>,
    generation: u64,
) -> Result<Worker> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let (init_tx, init_rx) = oneshot::channel::<Result<Option<AbortHandle>>>();

    thread::Builder::new()
        .name(format!("render-worker-{}", generation))
        .spawn(move || {
            // Initialize engine on the worker thread
            let mut engine = match factory() {
                Ok(e) => e,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(engine.abort_handle()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Render(address, resp) => {
                        let res = drive(engine.as_mut(), &address, &state, generation);
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(engine.close());
                        return;
                    }
                }
            }
            debug!("Render worker #{} exiting", generation);
            if let Err(e) = engine.close() {
                warn!("Engine #{} did not close cleanly: {}", generation, e);
            }
        })
        .map_err(|e| {
            Error::InitializationError(format!("Failed to spawn render worker: {}", e))
        })?;

    let abort = init_rx
        .await
        .map_err(|e| Error::InitializationError(format!("Worker init canceled: {}", e)))??;

    Ok(Worker {
        cmd_tx: Some(cmd_tx),
        generation,
        abort,
        pending: None,
        retired: false,
    })
}

/// Run one pass through the engine state machine. Every exit path,
/// successful or not, leaves the state at `Idle`.
fn drive(
    engine: &mut dyn RenderEngine,
    address: &str,
    state: &StateCell,
    generation: u64,
) -> Result<RawFrame> {
    state.set(generation, EngineState::Navigating);
    let res = (|| -> Result<RawFrame> {
        engine.navigate(address)?;
        engine.check_scripts()?;
        state.set(generation, EngineState::ScriptExecuted);
        let frame = engine.capture()?;
        state.set(generation, EngineState::Captured);
        Ok(frame)
    })();
    state.set(generation, EngineState::Idle);
    if let Err(e) = &res {
        debug!("Render of {} failed: {}", address, e);
    }
    res
}

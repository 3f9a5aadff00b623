use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isoport_core::{DispatchError, Job, Payload, SharedBackend};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::handoff::resolve;
use crate::process::{run_in_process, WorkerCommand};
use crate::thread::run_in_thread;
use crate::Call;

/// How each call's worker is isolated from the server.
#[derive(Clone, Debug)]
pub enum Isolation {
    /// A fresh child process per call. Contains native crashes and leaks.
    Process(WorkerCommand),
    /// A fresh thread per call with a panic boundary. A timed-out thread
    /// cannot be stopped; it keeps its `max_in_flight` slot until it returns.
    Thread,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub isolation: Isolation,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Calls holding a worker at once; the rest wait as `Pending`.
    pub max_in_flight: usize,
}

impl DispatcherConfig {
    pub fn new(isolation: Isolation) -> Self {
        Self {
            isolation,
            timeout: Some(Duration::from_secs(300)),
            max_in_flight: 4,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }
}

/// Runs every job in its own isolated worker and hands back the typed result.
///
/// Exactly one worker per call: no pooling, no retries.
pub struct Dispatcher {
    config: DispatcherConfig,
    backend: SharedBackend,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// `backend` is only invoked in-process under [`Isolation::Thread`]; in
    /// process mode the child builds its own.
    pub fn new(config: DispatcherConfig, backend: SharedBackend) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            config,
            backend,
            permits,
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Cancelling this token fails every pending and running call.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn dispatch(&self, job: Job) -> Result<Payload, DispatchError> {
        self.dispatch_with_cancel(job, &CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but also gives up when `cancel` fires.
    /// A process worker is killed when the call is cancelled or dropped.
    pub async fn dispatch_with_cancel(
        &self,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<Payload, DispatchError> {
        let mut call = Call::new(self.next_id.fetch_add(1, Ordering::Relaxed), job.kind());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            _ = self.shutdown.cancelled() => Err(DispatchError::Cancelled),
            result = self.run(&mut call, job) => result,
        };

        call.finish(&result);
        result
    }

    async fn run(&self, call: &mut Call, job: Job) -> Result<Payload, DispatchError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        call.start();

        let slot = match &self.config.isolation {
            Isolation::Process(command) => {
                let slot = run_in_process(command, &job, self.config.timeout).await;
                drop(permit);
                slot?
            }
            Isolation::Thread => {
                run_in_thread(self.backend.clone(), job, call.id(), self.config.timeout, permit)
                    .await?
            }
        };
        resolve(slot)
    }
}

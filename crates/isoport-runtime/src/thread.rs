//! In-process isolation: a dedicated OS thread behind a panic boundary.
//!
//! Only suitable for backends whose failures are Rust panics or errors. A
//! thread cannot be killed, so on timeout the caller stops waiting and the
//! thread runs to completion in the background, holding its permit until then.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use isoport_core::{DispatchError, Job, JobOutcome, SharedBackend};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, warn};

use crate::handoff::slot;

pub async fn run_in_thread(
    backend: SharedBackend,
    job: Job,
    call_id: u64,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
) -> Result<Option<JobOutcome>, DispatchError> {
    let (writer, reader) = slot();

    std::thread::Builder::new()
        .name(format!("isoport-worker-{call_id}"))
        .spawn(move || {
            let _permit = permit;
            match std::panic::catch_unwind(AssertUnwindSafe(|| backend.run(job))) {
                Ok(result) => writer.fill(JobOutcome::from_result(result)),
                Err(_) => {
                    error!(call_id, "worker thread panicked");
                    drop(writer);
                }
            }
        })
        .map_err(DispatchError::Spawn)?;

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.take()).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                warn!(call_id, ?limit, "worker thread timed out, abandoning it");
                Err(DispatchError::Timeout(limit))
            }
        },
        None => Ok(reader.take().await),
    }
}

//! Child side of process isolation.
//!
//! Reads one job line, runs it, writes one outcome line, returns. A panic in
//! the backend unwinds out of here without writing anything, which the
//! dispatcher reads as an empty slot.

use std::io::{self, BufRead, Write};

use isoport_core::{Backend, Job, JobOutcome};
use tracing::{info, warn};

pub fn run_worker<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    backend: &dyn Backend,
) -> io::Result<()> {
    let mut line = String::new();
    input.read_line(&mut line)?;

    let outcome = match serde_json::from_str::<Job>(line.trim()) {
        Ok(job) => {
            info!(pid = std::process::id(), kind = job.kind(), backend = backend.name(), "worker running job");
            JobOutcome::from_result(backend.run(job))
        }
        Err(err) => {
            warn!(error = %err, "malformed job");
            JobOutcome::failure(format!("malformed job: {err}"))
        }
    };

    serde_json::to_writer(&mut output, &outcome)?;
    output.write_all(b"\n")?;
    output.flush()
}

/// [`run_worker`] over the process's own stdin/stdout.
pub fn run_stdio_worker(backend: &dyn Backend) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_worker(stdin.lock(), stdout.lock(), backend)
}

use std::sync::Arc;

use anyhow::Result;

use crate::{Job, Payload};

/// A model family that can serve jobs.
///
/// `run` is synchronous and may block for a long time; it is only ever called
/// inside an isolated worker (a child process or a dedicated blocking thread).
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn accepts(&self, job: &Job) -> bool;

    fn run(&self, job: Job) -> Result<Payload>;
}

pub type SharedBackend = Arc<dyn Backend>;

/// Routes each job to the first backend that accepts it.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: Vec<SharedBackend>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: SharedBackend) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

impl Backend for BackendSet {
    fn name(&self) -> &'static str {
        "set"
    }

    fn accepts(&self, job: &Job) -> bool {
        self.backends.iter().any(|b| b.accepts(job))
    }

    fn run(&self, job: Job) -> Result<Payload> {
        match self.backends.iter().find(|b| b.accepts(&job)) {
            Some(backend) => backend.run(job),
            None => anyhow::bail!("no backend registered for {} jobs", job.kind()),
        }
    }
}

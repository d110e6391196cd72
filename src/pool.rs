//! Bounded worker pool.
use std::{future::Future, sync::Arc};

use anyhow::Context;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::BrokerConfig;

/// Runs batches of jobs with at most `workers` of them in flight.
pub struct WorkerPool {
    workers: usize,
    permits: Arc<Semaphore>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(BrokerConfig::DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    /// A pool of `workers` workers. A pool always has at least one worker.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` on every job and wait until all of them have finished.
    ///
    /// A job is only spawned once a worker is free. Results come back in job
    /// order. If any job panicked, the first failure is returned after every
    /// other job has finished.
    #[tracing::instrument(skip_all, fields(workers = self.workers))]
    pub async fn run<I, F, Fut, R>(&self, jobs: I, f: F) -> Result<Vec<R>, anyhow::Error>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let mut handles = vec![];
        for job in jobs {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .context("worker pool was shut down")?;
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                (*f)(job).await
            }));
        }
        debug!(jobs = handles.len(), "waiting for jobs");

        let mut results = Vec::with_capacity(handles.len());
        let mut failure = None;
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(job = index, error = %e, "job failed");
                    if failure.is_none() {
                        failure = Some(anyhow::Error::new(e).context(format!("job {} failed", index)));
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

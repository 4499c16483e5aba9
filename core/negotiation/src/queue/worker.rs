use metrics::counter;
use std::time::Duration;

use crate::queue::{JobQueue, QueueError, TaskRunner};

/// Polls the job queue and runs due jobs one by one.
pub struct Worker {
    queue: JobQueue,
    runner: TaskRunner,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: JobQueue, runner: TaskRunner, poll_interval: Duration) -> Worker {
        Worker {
            queue,
            runner,
            poll_interval,
        }
    }

    /// Runs jobs until none is due. Returns the number of attempts made.
    pub async fn run_pending(&self) -> Result<usize, QueueError> {
        let mut attempts = 0;
        while let Some(job) = self.queue.next().await? {
            attempts += 1;
            match self.runner.run(&job.task).await {
                Ok(()) => {
                    counter!("attestd.jobs.completed", 1);
                    self.queue.complete(&job).await?;
                }
                Err(e) => {
                    counter!("attestd.jobs.failed", 1);
                    log::warn!(
                        "Job [{}] {} attempt {} failed: {}",
                        job.id,
                        job.task.name(),
                        job.attempts,
                        e
                    );
                    self.queue.fail(&job, &e).await?;
                }
            }
        }
        Ok(attempts)
    }

    pub async fn run(self) {
        if let Err(e) = self.queue.recover().await {
            log::error!("Can't requeue interrupted jobs: {}", e);
        }
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_pending().await {
                log::error!("Job queue error: {}", e);
            }
        }
    }
}

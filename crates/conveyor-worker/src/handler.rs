//! Job handler trait.

use std::future::Future;

use async_trait::async_trait;

use conveyor_core::{HandlerError, Job};

/// Business logic invoked once per delivered job.
///
/// Delivery is at-least-once: a visibility timeout expiring mid-run, or a
/// worker dying between the handler and the ack, replays the same job.
/// Handlers must therefore tolerate duplicates.
///
/// `Ok` acknowledges the job (it is deleted from the queue). `Err` hands
/// the failure to the retry classifier, which decides between natural
/// redelivery and the dead-letter archive. A panic inside the handler is
/// contained by the worker and classified like any other failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// Handler built from an async closure.
///
/// Mostly useful in tests and small binaries where a full trait impl is
/// ceremony.
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (self.func)(job.clone()).await
    }
}

/// No-op handler for testing. Accepts every job.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        Ok(())
    }
}

//! Job handler seam between the pool and the work it runs.

use async_trait::async_trait;

use zipline_entity::job::AssemblyJob;

/// Runs one assembly job to completion.
///
/// Handlers record their own outcome (status rows, logs). The pool only
/// provides scheduling and concurrency limits.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Execute the job.
    async fn execute(&self, job: AssemblyJob);
}

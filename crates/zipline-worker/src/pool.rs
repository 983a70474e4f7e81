//! Bounded assembly worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use zipline_core::config::WorkerConfig;
use zipline_core::error::AppError;
use zipline_core::result::AppResult;
use zipline_entity::job::AssemblyJob;
use zipline_service::AssemblyDispatcher;

use crate::executor::JobHandler;

/// Identifiers of uploads that are queued or being assembled.
///
/// Their fragments outlive the session and must survive the reaper.
#[derive(Debug, Clone, Default)]
pub struct ActiveUploads {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveUploads {
    /// Snapshot of the current identifiers.
    pub fn snapshot(&self) -> HashSet<String> {
        self.lock().clone()
    }

    /// Whether `identifier` is queued or running.
    pub fn contains(&self, identifier: &str) -> bool {
        self.lock().contains(identifier)
    }

    fn insert(&self, identifier: &str) {
        self.lock().insert(identifier.to_string());
    }

    fn remove(&self, identifier: &str) {
        self.lock().remove(identifier);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Runs assembly jobs on at most `worker.concurrency` tasks, fed by a queue
/// of `worker.queue_capacity` entries.
pub struct AssemblyPool {
    sender: mpsc::Sender<AssemblyJob>,
    semaphore: Arc<Semaphore>,
    active: ActiveUploads,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    runner: Mutex<Option<JoinHandle<()>>>,
    concurrency: usize,
    drain_timeout: Duration,
}

impl std::fmt::Debug for AssemblyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblyPool")
            .field("concurrency", &self.concurrency)
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl AssemblyPool {
    /// Start the pool. Must be called inside a tokio runtime.
    pub fn start(handler: Arc<dyn JobHandler>, config: &WorkerConfig) -> Arc<Self> {
        let concurrency = config.concurrency.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let active = ActiveUploads::default();

        let runner = tokio::spawn(run(
            receiver,
            shutdown_rx,
            handler,
            Arc::clone(&semaphore),
            active.clone(),
            concurrency,
        ));

        tracing::info!(
            concurrency,
            queue_capacity = config.queue_capacity,
            "Assembly pool started"
        );

        Arc::new(Self {
            sender,
            semaphore,
            active,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            runner: Mutex::new(Some(runner)),
            concurrency,
            drain_timeout: Duration::from_secs(config.drain_timeout_seconds),
        })
    }

    /// Uploads handed to the pool and not yet finished.
    pub fn active(&self) -> ActiveUploads {
        self.active.clone()
    }

    /// Jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop accepting jobs, run what is queued and wait for in-flight jobs,
    /// bounded by `worker.drain_timeout_seconds`.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let runner = match self.runner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(runner) = runner else { return };

        tracing::info!(in_flight = self.in_flight(), "Draining assembly pool");
        match time::timeout(self.drain_timeout, runner).await {
            Ok(_) => tracing::info!("Assembly pool shut down complete"),
            Err(_) => tracing::warn!(
                in_flight = self.in_flight(),
                "Assembly pool drain timed out"
            ),
        }
    }
}

impl AssemblyDispatcher for AssemblyPool {
    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn schedule(&self, job: AssemblyJob) -> AppResult<()> {
        if !self.is_accepting() {
            return Err(AppError::service_unavailable("Assembly pool is shutting down"));
        }
        let identifier = job.identifier.clone();
        self.active.insert(&identifier);
        self.sender.try_send(job).map_err(|e| {
            self.active.remove(&identifier);
            match e {
                mpsc::error::TrySendError::Full(job) => {
                    tracing::warn!(identifier = %job.identifier, "Assembly queue is full");
                    AppError::service_unavailable("Assembly queue is full, try again later")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AppError::service_unavailable("Assembly pool is shutting down")
                }
            }
        })
    }
}

async fn run(
    mut receiver: mpsc::Receiver<AssemblyJob>,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    active: ActiveUploads,
    concurrency: usize,
) {
    let mut draining = false;
    loop {
        let job = if draining {
            receiver.recv().await
        } else {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        // Queued jobs already have pending records; run them.
                        receiver.close();
                        draining = true;
                    }
                    continue;
                }
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else { break };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let handler = Arc::clone(&handler);
        let active = active.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let identifier = job.identifier.clone();
            handler.execute(job).await;
            active.remove(&identifier);
        });
    }

    // Every permit back means every spawned job has finished.
    let permits = u32::try_from(concurrency).unwrap_or(u32::MAX);
    let _ = semaphore.acquire_many(permits).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use uuid::Uuid;
    use zipline_core::error::ErrorKind;
    use zipline_entity::upload::UploadOptions;

    fn job(identifier: &str) -> AssemblyJob {
        AssemblyJob {
            identifier: identifier.to_string(),
            user_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            file_name: format!("{identifier}.bin"),
            mime_type: "application/octet-stream".to_string(),
            options: Arc::new(UploadOptions::default()),
            total_size: 1,
            expected_chunks: 1,
            domain: "http://localhost".to_string(),
            response_url: format!("http://localhost/u/{identifier}.bin"),
        }
    }

    /// Records every job; blocks while `gate` is closed.
    #[derive(Default)]
    struct GatedHandler {
        done: Mutex<Vec<String>>,
        gate: Notify,
        open: AtomicBool,
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        async fn execute(&self, job: AssemblyJob) {
            while !self.open.load(Ordering::SeqCst) {
                let notified = self.gate.notified();
                if self.open.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
            self.done.lock().unwrap().push(job.identifier);
        }
    }

    impl GatedHandler {
        fn release(&self) {
            self.open.store(true, Ordering::SeqCst);
            self.gate.notify_waiters();
        }

        fn done(&self) -> Vec<String> {
            self.done.lock().unwrap().clone()
        }
    }

    fn config(concurrency: usize, queue_capacity: usize) -> WorkerConfig {
        WorkerConfig {
            concurrency,
            queue_capacity,
            drain_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_full_queue_is_service_unavailable() {
        let handler = Arc::new(GatedHandler::default());
        let pool = AssemblyPool::start(handler.clone(), &config(1, 1));

        let mut rejected = None;
        for i in 0..10 {
            if let Err(e) = pool.schedule(job(&format!("job{i:05}"))) {
                rejected = Some(e);
                break;
            }
            tokio::task::yield_now().await;
        }
        let err = rejected.expect("queue never filled");
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);

        handler.release();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let handler = Arc::new(GatedHandler::default());
        let pool = AssemblyPool::start(handler.clone(), &config(1, 8));

        for id in ["aaaaaaaa", "bbbbbbbb", "cccccccc"] {
            pool.schedule(job(id)).unwrap();
        }
        assert!(pool.active().contains("bbbbbbbb"));

        let shutdown = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.shutdown().await })
        };
        tokio::task::yield_now().await;
        assert!(!pool.is_accepting());
        assert_eq!(
            pool.schedule(job("dddddddd")).unwrap_err().kind,
            ErrorKind::ServiceUnavailable
        );

        handler.release();
        shutdown.await.unwrap();

        let mut done = handler.done();
        done.sort();
        assert_eq!(done, vec!["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
        assert!(pool.active().snapshot().is_empty());
        assert_eq!(pool.in_flight(), 0);
    }
}

//! Bounded job queue and the fixed-size worker pool that drains it.
//!
//! Shutdown is drain-then-stop: once the token is cancelled the queue stops
//! accepting jobs, workers finish everything already buffered, and only then
//! return. [`NotificationPool::shutdown`] waits for all of them.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::handler::JobHandler;
use crate::jobs::NotificationJob;
use crate::NotifyError;

/// Producer side. Cheap to clone; every request handler can hold one.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
    cancel: CancellationToken,
}

impl NotificationQueue {
    /// Waits for a free slot when the queue is full.
    pub async fn submit(&self, job: NotificationJob) -> Result<(), NotifyError> {
        if self.cancel.is_cancelled() {
            return Err(NotifyError::QueueClosed);
        }
        self.tx.send(job).await.map_err(|_| NotifyError::QueueClosed)
    }
}

pub struct NotificationPool {
    queue: NotificationQueue,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl NotificationPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(workers: usize, capacity: usize, handler: JobHandler) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let workers = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(id, rx.clone(), handler.clone(), cancel.clone()))
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), capacity, "Notification pool started");

        Self {
            queue: NotificationQueue {
                tx,
                cancel: cancel.clone(),
            },
            cancel,
            workers,
        }
    }

    pub fn queue(&self) -> NotificationQueue {
        self.queue.clone()
    }

    /// Stops intake, lets workers drain the buffered jobs, and waits for all of them.
    pub async fn shutdown(self) {
        info!("Notification pool shutting down");
        self.cancel.cancel();

        for (id, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = id, error = %e, "Notification worker panicked");
            }
        }
        info!("Notification pool stopped");
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    handler: JobHandler,
    cancel: CancellationToken,
) {
    debug!(worker = id, "Notification worker started");

    loop {
        let job = {
            let mut rx = rx.lock().await;
            // biased: a buffered job always wins over the stop signal
            let next = tokio::select! {
                biased;
                job = rx.recv() => Some(job),
                _ = cancel.cancelled() => None,
            };
            match next {
                Some(job) => job,
                None => {
                    rx.close();
                    rx.recv().await
                }
            }
        };

        let Some(job) = job else {
            break;
        };
        handler.handle(id, job).await;
    }

    debug!(worker = id, "Notification worker stopped");
}

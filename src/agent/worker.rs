//! Event worker: handles deliveries one at a time, in arrival order.

use crate::agent::DialogueRouter;
use crate::error::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Default number of deliveries that may wait for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Anything that can consume a raw event payload.
pub trait EventHandler: Send + 'static {
    fn handle(&mut self, payload: &[u8]) -> impl std::future::Future<Output = ()> + Send;
}

impl EventHandler for DialogueRouter {
    async fn handle(&mut self, payload: &[u8]) {
        DialogueRouter::handle(self, payload).await;
    }
}

/// A payload plus, for waiting submitters, the signal fired once it has
/// been handled.
#[derive(Debug)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub done: Option<oneshot::Sender<()>>,
}

/// Cloneable submission side of the worker queue.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Delivery>,
}

impl WorkerHandle {
    /// Queue a payload and return once it is accepted. Waits only for queue
    /// space, never for handling.
    pub async fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        self.tx
            .send(Delivery {
                payload,
                done: None,
            })
            .await
            .map_err(|_| Error::WorkerStopped)
    }

    /// Queue a payload and wait until the worker has finished with it.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<()> {
        let (done, handled) = oneshot::channel();
        self.tx
            .send(Delivery {
                payload,
                done: Some(done),
            })
            .await
            .map_err(|_| Error::WorkerStopped)?;
        handled.await.map_err(|_| Error::WorkerStopped)
    }
}

/// Single consumer of the delivery queue.
pub struct Worker<H> {
    handler: H,
    rx: mpsc::Receiver<Delivery>,
    shutdown: CancellationToken,
}

impl<H: EventHandler> Worker<H> {
    pub fn new(handler: H, capacity: usize, shutdown: CancellationToken) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                handler,
                rx,
                shutdown,
            },
            WorkerHandle { tx },
        )
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("event worker started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("event worker shutting down");
                    break;
                }
                delivery = self.rx.recv() => {
                    let Some(delivery) = delivery else {
                        tracing::info!("delivery queue closed");
                        break;
                    };
                    self.handler.handle(&delivery.payload).await;
                    if let Some(done) = delivery.done {
                        // The submitter may have gone away; nothing to do then.
                        let _ = done.send(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        active: Arc<Mutex<usize>>,
        max_active: Arc<Mutex<usize>>,
        started: Arc<tokio::sync::Notify>,
        delay: std::time::Duration,
    }

    impl Recorder {
        fn slow(delay: std::time::Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    impl EventHandler for Recorder {
        async fn handle(&mut self, payload: &[u8]) {
            {
                let mut active = self.active.lock();
                *active += 1;
                let mut max_active = self.max_active.lock();
                *max_active = (*max_active).max(*active);
            }
            self.started.notify_one();
            tokio::time::sleep(self.delay.max(std::time::Duration::from_millis(5))).await;
            self.seen
                .lock()
                .push(String::from_utf8_lossy(payload).into_owned());
            *self.active.lock() -= 1;
        }
    }

    #[tokio::test]
    async fn submit_returns_after_handling() {
        let recorder = Recorder::default();
        let shutdown = CancellationToken::new();
        let (worker, handle) = Worker::new(recorder.clone(), DEFAULT_QUEUE_CAPACITY, shutdown.clone());
        let running = tokio::spawn(worker.run());

        handle.submit(b"one".to_vec()).await.expect("worker is running");
        assert_eq!(*recorder.seen.lock(), vec!["one".to_string()]);

        shutdown.cancel();
        running.await.expect("worker task should finish");
    }

    #[tokio::test]
    async fn deliveries_are_handled_one_at_a_time() {
        let recorder = Recorder::default();
        let shutdown = CancellationToken::new();
        let (worker, handle) = Worker::new(recorder.clone(), 2, shutdown.clone());
        let running = tokio::spawn(worker.run());

        let submissions = (0..5).map(|index| {
            let handle = handle.clone();
            async move { handle.submit(format!("event-{index}").into_bytes()).await }
        });
        for result in futures::future::join_all(submissions).await {
            result.expect("worker is running");
        }

        assert_eq!(recorder.seen.lock().len(), 5);
        assert_eq!(*recorder.max_active.lock(), 1);

        shutdown.cancel();
        running.await.expect("worker task should finish");
    }

    #[tokio::test]
    async fn enqueue_returns_before_handling() {
        let recorder = Recorder::slow(std::time::Duration::from_millis(500));
        let shutdown = CancellationToken::new();
        let (worker, handle) = Worker::new(recorder.clone(), DEFAULT_QUEUE_CAPACITY, shutdown.clone());
        let running = tokio::spawn(worker.run());

        let started = std::time::Instant::now();
        for index in 0..3 {
            handle
                .enqueue(format!("event-{index}").into_bytes())
                .await
                .expect("worker is running");
        }
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert!(recorder.seen.lock().len() < 3);

        shutdown.cancel();
        running.await.expect("worker task should finish");
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_event_finish() {
        let recorder = Recorder::slow(std::time::Duration::from_millis(200));
        let shutdown = CancellationToken::new();
        let (worker, handle) = Worker::new(recorder.clone(), DEFAULT_QUEUE_CAPACITY, shutdown.clone());
        let running = tokio::spawn(worker.run());

        let submitted = tokio::spawn({
            let handle = handle.clone();
            async move { handle.submit(b"in-flight".to_vec()).await }
        });
        recorder.started.notified().await;
        shutdown.cancel();

        submitted
            .await
            .expect("submit task should finish")
            .expect("in-flight event completes");
        assert_eq!(*recorder.seen.lock(), vec!["in-flight".to_string()]);
        running.await.expect("worker task should finish");

        let error = handle
            .submit(b"after".to_vec())
            .await
            .expect_err("worker no longer pulls events");
        assert!(matches!(error, Error::WorkerStopped));
    }

    #[tokio::test]
    async fn submit_fails_once_worker_stops() {
        let shutdown = CancellationToken::new();
        let (worker, handle) = Worker::new(Recorder::default(), 1, shutdown.clone());
        shutdown.cancel();
        worker.run().await;

        let error = handle
            .submit(b"late".to_vec())
            .await
            .expect_err("worker is gone");
        assert!(matches!(error, Error::WorkerStopped));
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use super::{DetectedName, EntityDetector};

/// A single detection job sent to the worker
#[derive(Debug)]
pub enum DetectionMessage {
    Detect {
        text: String,
        min_confidence: f64,
        reply: oneshot::Sender<Result<Vec<DetectedName>>>,
    },
    Shutdown,
}

/// Funnels all detection calls through one worker task.
///
/// Books run concurrently but the underlying model is not safe to call from
/// several places at once, so callers enqueue requests and await a reply.
#[derive(Clone)]
pub struct SerializedDetector {
    tx: mpsc::Sender<DetectionMessage>,
}

impl SerializedDetector {
    /// Spawn the worker on the current runtime.
    pub fn spawn(inner: Arc<dyn EntityDetector>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(DetectionWorker { inner, rx }.run());
        Self { tx }
    }

    /// Ask the worker to stop once queued jobs are drained.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(DetectionMessage::Shutdown).await;
    }
}

#[async_trait]
impl EntityDetector for SerializedDetector {
    async fn detect(&self, text: &str, min_confidence: f64) -> Result<Vec<DetectedName>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DetectionMessage::Detect {
                text: text.to_string(),
                min_confidence,
                reply,
            })
            .await
            .context("Detection worker has stopped")?;
        rx.await.context("Detection worker dropped the request")?
    }
}

struct DetectionWorker {
    inner: Arc<dyn EntityDetector>,
    rx: mpsc::Receiver<DetectionMessage>,
}

impl DetectionWorker {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("Detection worker started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                DetectionMessage::Detect {
                    text,
                    min_confidence,
                    reply,
                } => {
                    let result = self.inner.detect(&text, min_confidence).await;
                    let _ = reply.send(result);
                }
                DetectionMessage::Shutdown => {
                    info!("Detection worker shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the test if two calls ever overlap
    struct ExclusiveDetector {
        active: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityDetector for ExclusiveDetector {
        async fn detect(&self, text: &str, _min: f64) -> Result<Vec<DetectedName>> {
            assert_eq!(self.active.fetch_add(1, Ordering::SeqCst), 0);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![DetectedName::new(text, 0.9)])
        }
    }

    #[tokio::test]
    async fn test_requests_are_serialized() {
        let inner = Arc::new(ExclusiveDetector {
            active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let detector = SerializedDetector::spawn(inner.clone());

        let mut handles = Vec::new();
        for i in 0..8 {
            let detector = detector.clone();
            handles.push(tokio::spawn(async move {
                detector.detect(&format!("Name{i}"), 0.4).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let names = handle.await.unwrap().unwrap();
            assert_eq!(names[0].text, format!("Name{i}"));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_detect_after_shutdown_fails() {
        let inner = Arc::new(ExclusiveDetector {
            active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let detector = SerializedDetector::spawn(inner);
        detector.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(detector.detect("x", 0.4).await.is_err());
    }
}

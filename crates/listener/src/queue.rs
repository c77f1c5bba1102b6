//! In-process delivery queue.
//!
//! Messages with a zero countdown are enqueued immediately; delayed messages
//! are held by a sleeping tokio task and enqueued when the countdown elapses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{QueueError, TaskMessage, TaskQueue};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sending half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<TaskMessage>,
    delayed: Arc<AtomicUsize>,
}

/// Receiving half, owned by the worker loop.
#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<TaskMessage>,
    delayed: Arc<AtomicUsize>,
}

impl InMemoryQueue {
    /// Creates a connected queue and receiver.
    pub fn channel() -> (InMemoryQueue, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let delayed = Arc::new(AtomicUsize::new(0));
        (
            InMemoryQueue {
                sender,
                delayed: delayed.clone(),
            },
            QueueReceiver { receiver, delayed },
        )
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn submit(&self, message: TaskMessage, countdown: Duration) -> Result<(), QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }

        if countdown.is_zero() {
            return self.sender.send(message).map_err(|_| QueueError::Closed);
        }

        debug!(
            task_id = %message.id,
            countdown_secs = countdown.as_secs(),
            "Holding task until countdown elapses"
        );
        self.delayed.fetch_add(1, Ordering::SeqCst);
        let sender = self.sender.clone();
        let delayed = self.delayed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(countdown).await;
            delayed.fetch_sub(1, Ordering::SeqCst);
            let task_id = message.id;
            if sender.send(message).is_err() {
                warn!(%task_id, "Queue closed before delayed task was delivered");
            }
        });
        Ok(())
    }
}

impl QueueReceiver {
    /// Waits for the next message. `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<TaskMessage> {
        self.receiver.recv().await
    }

    /// Returns a message if one is ready now.
    pub fn try_recv(&mut self) -> Option<TaskMessage> {
        self.receiver.try_recv().ok()
    }

    /// Number of messages still waiting for their countdown.
    pub fn pending_delayed(&self) -> usize {
        self.delayed.load(Ordering::SeqCst)
    }

    /// Stops accepting new messages. Already queued ones can still be received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::{
        Event, EventPayload, PackageConfig, ProjectRef, ProjectUrl, RepoName, RepoNamespace,
        TaskName, TaskPayload,
    };

    fn message() -> TaskMessage {
        let event = Event::new(
            ProjectRef::new(
                ProjectUrl::new("https://github.com/packit/ogr").unwrap(),
                RepoNamespace::new("packit").unwrap(),
                RepoName::new("ogr").unwrap(),
            ),
            EventPayload::Push {
                git_ref: dispatch::GitRef::new("main").unwrap(),
            },
        );
        TaskMessage::new(
            TaskName::new("task.run_copr_build_handler").unwrap(),
            TaskPayload {
                package_config: PackageConfig::default(),
                job_config: None,
                event,
            },
        )
    }

    #[tokio::test]
    async fn test_immediate_delivery() {
        let (queue, mut receiver) = InMemoryQueue::channel();
        let sent = message();
        queue.submit(sent.clone(), Duration::ZERO).await.unwrap();

        assert_eq!(receiver.try_recv(), Some(sent));
        assert_eq!(receiver.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_delivery_waits_for_countdown() {
        let (queue, mut receiver) = InMemoryQueue::channel();
        let sent = message();
        queue
            .submit(sent.clone(), Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(receiver.try_recv(), None);
        assert_eq!(receiver.pending_delayed(), 1);

        let received = receiver.recv().await;
        assert_eq!(received, Some(sent));
        assert_eq!(receiver.pending_delayed(), 0);
    }

    #[tokio::test]
    async fn test_submit_to_closed_queue_fails() {
        let (queue, mut receiver) = InMemoryQueue::channel();
        receiver.close();
        assert!(matches!(
            queue.submit(message(), Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}

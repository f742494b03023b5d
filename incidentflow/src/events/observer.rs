//! Observer handles returned by [`ProgressBus::attach`](super::ProgressBus::attach).

use crate::core::{JobId, ProgressEvent};
use crate::errors::BufferOverrunError;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A lazy, ordered view of one job's progress events.
///
/// Yields the replayed history first, then live events, and ends after the
/// `done` event. If the observer falls more than the bus backlog behind, it
/// yields the events it had already buffered, then a single
/// [`BufferOverrunError`], then ends. Dropping the handle detaches it.
#[derive(Debug)]
pub struct Observer {
    id: u64,
    job_id: JobId,
    backlog: usize,
    replay: VecDeque<ProgressEvent>,
    live: Option<mpsc::Receiver<ProgressEvent>>,
    overrun: Arc<AtomicBool>,
    finished: bool,
}

impl Observer {
    pub(super) fn new(
        id: u64,
        job_id: JobId,
        backlog: usize,
        replay: VecDeque<ProgressEvent>,
        live: Option<mpsc::Receiver<ProgressEvent>>,
        overrun: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            job_id,
            backlog,
            replay,
            live,
            overrun,
            finished: false,
        }
    }

    /// Identifier of this observer, unique per bus.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The observed job.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Number of history events not yet yielded.
    #[must_use]
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<Result<ProgressEvent, BufferOverrunError>> {
        futures::StreamExt::next(self).await
    }

    fn finish(&mut self) {
        self.finished = true;
        self.replay.clear();
        self.live = None;
    }

    fn yield_event(&mut self, event: ProgressEvent) -> Poll<Option<Result<ProgressEvent, BufferOverrunError>>> {
        if event.is_done() {
            self.finish();
        }
        Poll::Ready(Some(Ok(event)))
    }
}

impl Stream for Observer {
    type Item = Result<ProgressEvent, BufferOverrunError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(event) = this.replay.pop_front() {
            return this.yield_event(event);
        }

        let Some(live) = this.live.as_mut() else {
            this.finish();
            return Poll::Ready(None);
        };

        match live.poll_recv(cx) {
            Poll::Ready(Some(event)) => this.yield_event(event),
            Poll::Ready(None) => {
                let overrun = this.overrun.load(Ordering::Acquire);
                this.finish();
                if overrun {
                    Poll::Ready(Some(Err(BufferOverrunError {
                        job_id: this.job_id,
                        observer_id: this.id,
                        backlog: this.backlog,
                    })))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;

    fn event(job_id: JobId, seq: u64, kind: EventKind) -> ProgressEvent {
        ProgressEvent::new(job_id, seq, kind, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_replay_only_observer_ends_after_done() {
        let job_id = JobId::new();
        let replay = VecDeque::from(vec![
            event(job_id, 0, EventKind::Connected),
            event(job_id, 1, EventKind::Done),
            event(job_id, 2, EventKind::Status),
        ]);
        let mut observer = Observer::new(1, job_id, 4, replay, None, Arc::new(AtomicBool::new(false)));
        assert_eq!(observer.pending_replay(), 3);

        assert_eq!(observer.recv().await.unwrap().unwrap().sequence_number, 0);
        assert!(observer.recv().await.unwrap().unwrap().is_done());
        assert!(observer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_overrun_flag_surfaces_after_buffered_events() {
        let job_id = JobId::new();
        let (tx, rx) = mpsc::channel(2);
        let overrun = Arc::new(AtomicBool::new(false));
        let mut observer = Observer::new(7, job_id, 2, VecDeque::new(), Some(rx), overrun.clone());

        tx.try_send(event(job_id, 1, EventKind::Status)).unwrap();
        overrun.store(true, Ordering::Release);
        drop(tx);

        assert_eq!(observer.recv().await.unwrap().unwrap().sequence_number, 1);
        let err = observer.recv().await.unwrap().unwrap_err();
        assert_eq!(err.observer_id, 7);
        assert_eq!(err.backlog, 2);
        assert!(observer.recv().await.is_none());
    }
}

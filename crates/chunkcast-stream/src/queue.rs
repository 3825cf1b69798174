//! Single-flight append queue in front of the media sink
//!
//! Segments are sent over a channel to a dedicated drain task that owns the
//! sink. The task appends one segment, waits for the append to complete, calls
//! `play()` and only then takes the next segment, so segment N is never
//! appended before segment N-1 has finished.

use crate::sink::MediaSink;
use chunkcast_core::{Error, Result, Segment};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to the append queue and its drain task
pub struct AppendQueue {
    tx: mpsc::UnboundedSender<Segment>,
    depth: Arc<AtomicUsize>,
    max_depth: Option<usize>,
    task: JoinHandle<Result<()>>,
}

impl AppendQueue {
    /// Spawn the drain task for `sink`
    pub fn spawn<S: MediaSink>(sink: S, max_depth: Option<usize>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(drain(sink, rx, depth.clone()));
        Self {
            tx,
            depth,
            max_depth,
            task,
        }
    }

    /// Queue a segment behind those already pending.
    ///
    /// Fails with `QueueOverflow` when a depth bound is set and reached, and
    /// with `SinkClosed` once the drain task has stopped.
    pub fn enqueue(&self, segment: Segment) -> Result<()> {
        let pending = self.depth.load(Ordering::SeqCst);
        if let Some(max) = self.max_depth {
            if pending >= max {
                return Err(Error::QueueOverflow(max));
            }
        }

        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(segment).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::SinkClosed);
        }
        debug!("Append queue depth: {}", pending + 1);
        Ok(())
    }

    /// Segments queued or being appended
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Resolves once the drain task has stopped taking segments
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Why the drain task stopped; `SinkClosed` when it ended without an error
    pub async fn closed_error(self) -> Error {
        match self.finish().await {
            Ok(()) => Error::SinkClosed,
            Err(e) => e,
        }
    }

    /// Close the queue and wait until every pending segment is appended
    pub async fn finish(self) -> Result<()> {
        drop(self.tx);
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Transport(format!("append task failed: {}", e))),
        }
    }

    /// Stop draining immediately; pending segments are discarded
    pub fn abort(self) {
        let pending = self.depth();
        self.task.abort();
        if pending > 0 {
            debug!("Discarded {} pending segments", pending);
        }
    }
}

async fn drain<S: MediaSink>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Segment>,
    depth: Arc<AtomicUsize>,
) -> Result<()> {
    while let Some(segment) = rx.recv().await {
        let size = segment.size();
        let kind = segment.kind;

        let appended = sink.append(segment.data).await;
        depth.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = appended {
            warn!("Append failed: {}", e);
            return Err(e);
        }
        debug!("Appended {:?} ({} bytes)", kind, size);

        sink.play().await?;
    }
    Ok(())
}

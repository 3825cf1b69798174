//! Streaming orchestrator
//!
//! Drives one playback session: waits for the sink to open, discovers the
//! stream channel, then polls chunks strictly one at a time by increasing
//! timestamp. The first chunk carrying media also yields the init segment.

use crate::fetch::{ChunkFetcher, ChunkRequest, StreamChannel};
use crate::queue::AppendQueue;
use crate::sink::MediaSink;
use bytes::Bytes;
use chunkcast_core::{ChunkEnvelope, Error, Result, Segment, SessionState, StreamConfig};
use chunkcast_mp4::{init_segment_bytes, remuxer_for, Remuxer};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    AwaitingSinkOpen,
    Polling,
    /// Terminating: no new requests, no further appends
    Draining,
    Stopped,
}

/// Counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: u64,
    /// Chunks whose envelope carried no events
    pub empty_chunks: u64,
    pub media_segments: u64,
    pub retries: u64,
    /// Timestamp of the next chunk that would have been requested
    pub next_timestamp_ms: i64,
}

/// Outcome of waiting on something while watching for shutdown
enum Step<T> {
    Done(T),
    Shutdown,
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // sender gone without requesting shutdown
            std::future::pending::<()>().await;
        }
    }
}

async fn until_shutdown<T>(shutdown: &mut watch::Receiver<bool>, work: impl Future<Output = T>) -> Step<T> {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => Step::Shutdown,
        value = work => Step::Done(value),
    }
}

/// Resolves to `None` if the append queue stops before `work` completes
async fn unless_sink_closed<T>(queue: &AppendQueue, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = queue.closed() => None,
        value = work => Some(value),
    }
}

/// Session driver tying a chunk fetcher to a media sink
pub struct Orchestrator<F: ChunkFetcher> {
    call: String,
    config: StreamConfig,
    fetcher: F,
    remuxer: Box<dyn Remuxer>,
    session: SessionState,
    stats: StreamStats,
    state: watch::Sender<StreamState>,
}

impl<F: ChunkFetcher> Orchestrator<F> {
    /// Create an orchestrator for the stream of `call`
    pub fn new(call: impl Into<String>, config: StreamConfig, fetcher: F) -> Self {
        let remuxer = remuxer_for(config.strategy);
        let (state, _) = watch::channel(StreamState::Idle);
        Self {
            call: call.into(),
            config,
            fetcher,
            remuxer,
            session: SessionState::new(),
            stats: StreamStats::default(),
            state,
        }
    }

    /// Subscribe to state changes
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    fn set_state(&self, state: StreamState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Stream state: {:?} -> {:?}", previous, state);
        }
    }

    /// Run the session until shutdown or a fatal error.
    ///
    /// Shutdown returns `Ok` after abandoning any in-flight request and
    /// discarding queued segments. A `RetryLimit` error is returned only after
    /// the segments already produced have been appended.
    pub async fn run<S: MediaSink>(&mut self, mut sink: S, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.set_state(StreamState::AwaitingSinkOpen);
        let opened = until_shutdown(&mut shutdown, sink.opened()).await;
        match opened {
            Step::Shutdown => return self.terminate(None),
            Step::Done(opened) => {
                if let Err(e) = opened {
                    self.set_state(StreamState::Stopped);
                    return Err(e);
                }
            }
        }
        debug!("Media sink opened");

        let queue = AppendQueue::spawn(sink, self.config.max_queue_depth);
        self.set_state(StreamState::Polling);

        let channels = until_shutdown(&mut shutdown, self.fetcher.stream_channels(&self.call)).await;
        let channel = match channels {
            Step::Shutdown => return self.terminate(Some(queue)),
            Step::Done(Ok(channels)) => match channels.into_iter().next() {
                Some(channel) => channel,
                None => return self.fail(queue, Error::NoStreamChannel),
            },
            Step::Done(Err(e)) => return self.fail(queue, e),
        };
        info!(
            "Streaming call {} from channel {} (scale {}) at {} ms",
            self.call, channel.channel, channel.scale, channel.last_timestamp_ms
        );

        self.poll(queue, &channel, &mut shutdown).await
    }

    async fn poll(
        &mut self,
        queue: AppendQueue,
        channel: &StreamChannel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut timestamp = channel.last_timestamp_ms;
        let mut attempt = 0u32;

        loop {
            self.stats.next_timestamp_ms = timestamp;
            let request = ChunkRequest::new(&self.call, channel, timestamp, &self.config);

            let step = until_shutdown(shutdown, unless_sink_closed(&queue, self.fetcher.fetch(&request))).await;
            let fetched = match step {
                Step::Shutdown => return self.terminate(Some(queue)),
                Step::Done(None) => return self.sink_failed(queue).await,
                Step::Done(Some(fetched)) => fetched,
            };

            let delay = match fetched {
                Ok(data) => {
                    attempt = 0;
                    match self.handle_chunk(data, &queue) {
                        Ok(()) => {}
                        Err(Error::SinkClosed) => return self.sink_failed(queue).await,
                        Err(e) => return self.fail(queue, e),
                    }
                    timestamp += self.config.chunk_step_ms;
                    self.config.poll_delay
                }
                Err(e) if e.is_recoverable() => {
                    if let Some(max) = self.config.max_retries {
                        if attempt >= max {
                            warn!("Chunk at {} ms still unavailable after {} retries", timestamp, max);
                            return self.exhausted(queue, max).await;
                        }
                    }
                    let delay = self.config.retry_delay_for(attempt);
                    attempt += 1;
                    self.stats.retries += 1;
                    debug!("Chunk at {} ms not available yet, retry {} in {:?}", timestamp, attempt, delay);
                    delay
                }
                Err(e) => return self.fail(queue, e),
            };

            let waited = until_shutdown(shutdown, unless_sink_closed(&queue, tokio::time::sleep(delay))).await;
            match waited {
                Step::Shutdown => return self.terminate(Some(queue)),
                Step::Done(None) => return self.sink_failed(queue).await,
                Step::Done(Some(())) => {}
            }
        }
    }

    /// Parse one chunk and queue the segments it yields
    fn handle_chunk(&mut self, data: Bytes, queue: &AppendQueue) -> Result<()> {
        let envelope = ChunkEnvelope::parse(data)?;
        self.stats.chunks += 1;

        if !envelope.has_media() {
            self.stats.empty_chunks += 1;
            debug!("Chunk from {} carries no events", envelope.container_id);
            return Ok(());
        }

        if !self.session.init_segment_sent() {
            let init = init_segment_bytes(&envelope.payload)?;
            info!("Init segment: {} bytes", init.len());
            queue.enqueue(Segment::init(init))?;
            self.session.mark_init_segment_sent();
        }

        let segments = self.remuxer.remux(&envelope.payload, &mut self.session)?;
        if segments.is_empty() {
            return Ok(());
        }
        for segment in segments {
            debug!(
                "Media segment {:?}: {} bytes ({})",
                segment.sequence(),
                segment.size(),
                self.remuxer.name()
            );
            queue.enqueue(segment)?;
            self.stats.media_segments += 1;
        }
        self.session
            .advance_decode_time(self.config.decode_time_quantum);
        Ok(())
    }

    fn terminate(&mut self, queue: Option<AppendQueue>) -> Result<()> {
        self.set_state(StreamState::Draining);
        if let Some(queue) = queue {
            queue.abort();
        }
        self.set_state(StreamState::Stopped);
        Ok(())
    }

    fn fail(&mut self, queue: AppendQueue, error: Error) -> Result<()> {
        warn!("Stream failed: {}", error);
        queue.abort();
        self.set_state(StreamState::Stopped);
        Err(error)
    }

    /// The drain task stopped on its own; report the error it stopped with
    async fn sink_failed(&mut self, queue: AppendQueue) -> Result<()> {
        let error = queue.closed_error().await;
        warn!("Media sink failed: {}", error);
        self.set_state(StreamState::Stopped);
        Err(error)
    }

    async fn exhausted(&mut self, queue: AppendQueue, retries: u32) -> Result<()> {
        self.set_state(StreamState::Draining);
        let flushed = queue.finish().await;
        self.set_state(StreamState::Stopped);
        flushed?;
        Err(Error::RetryLimit(retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{empty_envelope, media_envelope, mp4_chunk, RecordingSink};
    use async_trait::async_trait;
    use chunkcast_core::RemuxStrategy;
    use chunkcast_mp4::BoxList;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fetcher replaying a script of responses, then reporting `TimeTooBig`
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        channels: Vec<StreamChannel>,
        script: Arc<Mutex<VecDeque<Result<Bytes>>>>,
        requests: Arc<Mutex<Vec<i64>>>,
        hang: bool,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Bytes>>) -> Self {
            Self {
                channels: vec![StreamChannel {
                    channel: 1,
                    scale: 0,
                    last_timestamp_ms: 1000,
                }],
                script: Arc::new(Mutex::new(script.into())),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<i64> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkFetcher for ScriptedFetcher {
        async fn stream_channels(&self, _call: &str) -> Result<Vec<StreamChannel>> {
            Ok(self.channels.clone())
        }

        async fn fetch(&self, request: &ChunkRequest) -> Result<Bytes> {
            self.requests.lock().unwrap().push(request.timestamp_ms);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Err(Error::TimeTooBig))
        }
    }

    fn fast_config(strategy: RemuxStrategy) -> StreamConfig {
        StreamConfig::new()
            .with_strategy(strategy)
            .with_poll_delay(Duration::from_millis(1))
            .with_retry_delay(Duration::from_millis(1))
            .with_max_retries(Some(2))
    }

    fn media(sizes: &[u32]) -> Result<Bytes> {
        Ok(media_envelope(mp4_chunk(sizes)))
    }

    fn tfdt_and_sequence(segment: &Bytes) -> (u64, u64) {
        let boxes = BoxList::parse(segment.clone()).unwrap();
        let moof = boxes.require_children(b"moof").unwrap();
        let mfhd = moof.require(b"mfhd").unwrap().payload().unwrap().clone();
        let tfdt = moof
            .require_children(b"traf")
            .unwrap()
            .require(b"tfdt")
            .unwrap()
            .payload()
            .unwrap()
            .clone();
        let mut time = [0u8; 8];
        time.copy_from_slice(&tfdt[4..12]);
        (
            u32::from_be_bytes([mfhd[4], mfhd[5], mfhd[6], mfhd[7]]) as u64,
            u64::from_be_bytes(time),
        )
    }

    async fn run_to_end(strategy: RemuxStrategy, fetcher: ScriptedFetcher) -> (Result<()>, RecordingSink, StreamStats) {
        let sink = RecordingSink::default();
        let (_tx, shutdown) = watch::channel(false);
        let mut orchestrator = Orchestrator::new("call", fast_config(strategy), fetcher);
        let result = orchestrator.run(sink.clone(), shutdown).await;
        (result, sink, orchestrator.stats().clone())
    }

    #[tokio::test]
    async fn test_init_once_then_sequenced_media() {
        for strategy in [RemuxStrategy::Manual, RemuxStrategy::Delegate] {
            let fetcher = ScriptedFetcher::new(vec![media(&[3, 4]), media(&[5]), media(&[6, 7, 8])]);
            let (result, sink, stats) = run_to_end(strategy, fetcher).await;
            assert!(matches!(result, Err(Error::RetryLimit(2))));
            assert_eq!(stats.media_segments, 3);

            let appended = sink.appended.lock().unwrap().clone();
            assert_eq!(appended.len(), 4);
            let first = BoxList::parse(appended[0].clone()).unwrap();
            assert!(first.get(b"moov").is_some() && first.get(b"moof").is_none());

            let fields: Vec<_> = appended[1..].iter().map(tfdt_and_sequence).collect();
            assert_eq!(fields, vec![(0, 0), (1, 16000), (2, 32000)], "{:?}", strategy);
            assert!(appended[1..]
                .iter()
                .all(|s| BoxList::parse(s.clone()).unwrap().get(b"moov").is_none()));
            assert_eq!(*sink.plays.lock().unwrap(), 4);
        }
    }

    #[tokio::test]
    async fn test_bad_magic_stops_fetching() {
        let mut corrupt = media_envelope(mp4_chunk(&[3])).to_vec();
        corrupt[0] ^= 0xff;
        let fetcher = ScriptedFetcher::new(vec![Ok(Bytes::from(corrupt)), media(&[3])]);
        let (result, sink, _) = run_to_end(RemuxStrategy::Manual, fetcher.clone()).await;

        assert!(matches!(result, Err(Error::ProtocolMismatch { .. })));
        assert_eq!(fetcher.requests(), vec![1000]);
        assert!(sink.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_available_retries_same_timestamp() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(Error::TimeTooBig),
            Err(Error::TimeTooBig),
            media(&[3]),
            media(&[4]),
        ]);
        let (result, _, stats) = run_to_end(RemuxStrategy::Manual, fetcher.clone()).await;
        assert!(matches!(result, Err(Error::RetryLimit(2))));
        assert_eq!(
            fetcher.requests(),
            vec![1000, 1000, 1000, 2000, 3000, 3000, 3000]
        );
        assert_eq!(stats.retries, 4);
        assert_eq!(stats.next_timestamp_ms, 3000);
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let fetcher = ScriptedFetcher::new(vec![
            media(&[3]),
            Err(Error::Transport("connection reset".to_string())),
        ]);
        let (result, _, stats) = run_to_end(RemuxStrategy::Manual, fetcher.clone()).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(fetcher.requests(), vec![1000, 2000]);
        assert_eq!(stats.chunks, 1);
    }

    #[tokio::test]
    async fn test_event_less_chunk_advances_timestamp_only() {
        let fetcher = ScriptedFetcher::new(vec![Ok(empty_envelope()), media(&[3])]);
        let (_, sink, stats) = run_to_end(RemuxStrategy::Manual, fetcher.clone()).await;
        assert_eq!(stats.empty_chunks, 1);
        assert_eq!(fetcher.requests()[..2], [1000, 2000]);

        let appended = sink.appended.lock().unwrap().clone();
        assert_eq!(appended.len(), 2);
        assert_eq!(tfdt_and_sequence(&appended[1]), (0, 0));
    }

    /// Sink that opens but rejects every append
    struct RejectingSink;

    #[async_trait]
    impl MediaSink for RejectingSink {
        async fn opened(&mut self) -> Result<()> {
            Ok(())
        }

        async fn append(&mut self, _data: Bytes) -> Result<()> {
            Err(Error::Transport("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_append_ends_session_with_its_error() {
        let fetcher = ScriptedFetcher::new(vec![media(&[3]), media(&[4])]);
        let (_tx, shutdown) = watch::channel(false);
        let mut orchestrator = Orchestrator::new("call", fast_config(RemuxStrategy::Manual), fetcher);

        let result = orchestrator.run(RejectingSink, shutdown).await;
        assert!(matches!(result, Err(Error::Transport(ref m)) if m == "quota exceeded"), "{:?}", result);
        assert_eq!(*orchestrator.state().borrow(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_append_ends_unbounded_retries() {
        let fetcher = ScriptedFetcher::new(vec![media(&[3])]);
        let config = fast_config(RemuxStrategy::Manual).with_max_retries(None);
        let (_tx, shutdown) = watch::channel(false);
        let mut orchestrator = Orchestrator::new("call", config, fetcher);

        let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(RejectingSink, shutdown))
            .await
            .expect("session should end once the sink fails");
        assert!(matches!(result, Err(Error::Transport(_))), "{:?}", result);
    }

    #[tokio::test]
    async fn test_no_stream_channel() {
        let mut fetcher = ScriptedFetcher::new(vec![]);
        fetcher.channels.clear();
        let (result, _, _) = run_to_end(RemuxStrategy::Manual, fetcher.clone()).await;
        assert!(matches!(result, Err(Error::NoStreamChannel)));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_fetch() {
        let mut fetcher = ScriptedFetcher::new(vec![]);
        fetcher.hang = true;
        let (tx, shutdown) = watch::channel(false);
        let mut orchestrator = Orchestrator::new("call", fast_config(RemuxStrategy::Manual), fetcher.clone());
        let mut state = orchestrator.state();

        let stopper = tokio::spawn(async move {
            state.wait_for(|s| *s == StreamState::Polling).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(true).unwrap();
        });

        orchestrator.run(RecordingSink::default(), shutdown).await.unwrap();
        stopper.await.unwrap();
        assert_eq!(*orchestrator.state().borrow(), StreamState::Stopped);
        assert_eq!(fetcher.requests(), vec![1000]);
    }

    #[tokio::test]
    async fn test_no_requests_before_sink_opens() {
        struct NeverOpens;

        #[async_trait]
        impl MediaSink for NeverOpens {
            async fn opened(&mut self) -> Result<()> {
                std::future::pending().await
            }

            async fn append(&mut self, _data: Bytes) -> Result<()> {
                Ok(())
            }
        }

        let fetcher = ScriptedFetcher::new(vec![media(&[3])]);
        let (tx, shutdown) = watch::channel(false);
        let mut orchestrator = Orchestrator::new("call", fast_config(RemuxStrategy::Manual), fetcher.clone());
        let state = orchestrator.state();

        let run = orchestrator.run(NeverOpens, shutdown);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("session ended before shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert_eq!(*state.borrow(), StreamState::AwaitingSinkOpen);
        tx.send(true).unwrap();
        run.await.unwrap();
        assert!(fetcher.requests().is_empty());
    }
}

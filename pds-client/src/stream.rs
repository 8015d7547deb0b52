//! Live event stream (`/api/stream`)
//!
//! One server-push connection per client lifetime. The reader task decodes
//! `text/event-stream` frames into typed [`StreamEvent`]s and hands them to a
//! single consumer in arrival order. [`LiveFeed`] is that consumer for the
//! gallery and stats.
//!
//! States: `Connecting → Open → (Error | Closed)`. With
//! [`ReconnectPolicy::Never`] a transport error leaves the stream in `Error`
//! for good; [`ReconnectPolicy::ExponentialBackoff`] goes back to
//! `Connecting` after a delay.

use crate::api::{ApiError, ByteStream, PhotoApi};
use crate::gallery::RecentGallery;
use crate::stats::StatsAggregator;
use futures::stream::{Stream, StreamExt};
use pds_common::config::StreamSettings;
use pds_common::events::{ClientEvent, EventBus, StreamEvent, StreamState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events buffered between the reader task and the consumer
const EVENT_BUFFER: usize = 64;

/// Lower bound for the first reconnect delay
const MIN_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// SSE event name delivered to the default message handler
const DEFAULT_EVENT_NAME: &str = "message";

// ============================================================================
// text/event-stream decoding
// ============================================================================

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete
/// lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: String,
    has_data: bool,
    event: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // comment / keep-alive
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data),
            id: self.id.clone(),
        })
    }
}

/// Decode a response body into frames; a body error ends the stream with it
pub fn sse_frames(
    mut body: ByteStream,
) -> impl Stream<Item = Result<SseFrame, ApiError>> + Send {
    async_stream::try_stream! {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.feed(&chunk) {
                yield frame;
            }
        }
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

/// What to do after the connection fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Close permanently on the first error (accepts eventual staleness)
    #[default]
    Never,
    /// Reconnect after `initial * 2^attempt`, capped at `max`
    ExponentialBackoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &StreamSettings) -> Self {
        if settings.reconnect {
            let initial =
                Duration::from_millis(settings.initial_backoff_ms).max(MIN_INITIAL_BACKOFF);
            let max = Duration::from_millis(settings.max_backoff_ms).max(initial);
            ReconnectPolicy::ExponentialBackoff { initial, max }
        } else {
            ReconnectPolicy::Never
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::ExponentialBackoff { initial, max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

/// Entry point for opening the live stream
pub struct EventStream;

impl EventStream {
    /// Open the stream in the background and return its only subscription
    pub fn open(
        api: Arc<dyn PhotoApi>,
        policy: ReconnectPolicy,
        events: EventBus,
    ) -> StreamSubscription {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let cancel = CancellationToken::new();

        let reader = StreamReader {
            api,
            policy,
            tx,
            state_tx,
            cancel: cancel.clone(),
            events,
        };
        let task = tokio::spawn(reader.run());

        StreamSubscription {
            events: rx,
            state: state_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Single-consumer handle on the live stream
///
/// Dropping the subscription cancels the connection; [`close`](Self::close)
/// additionally waits for the reader task to finish.
pub struct StreamSubscription {
    events: mpsc::Receiver<StreamEvent>,
    state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamSubscription {
    /// Next event in arrival order; `None` once the stream is over
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Tear the connection down and wait until the socket is released
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Stream reader task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum BodyEnd {
    Cancelled,
    ConsumerGone,
    Ended,
    Failed(ApiError),
}

struct StreamReader {
    api: Arc<dyn PhotoApi>,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<StreamEvent>,
    state_tx: watch::Sender<StreamState>,
    cancel: CancellationToken,
    events: EventBus,
}

impl StreamReader {
    fn set_state(&self, state: StreamState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        debug!(?state, "Stream state");
        self.state_tx.send_replace(state);
        self.events
            .emit_lossy(ClientEvent::StreamStateChanged { state });
    }

    async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(StreamState::Connecting);
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                opened = self.api.open_stream() => opened,
            };

            match opened {
                Ok(body) => {
                    self.set_state(StreamState::Open);
                    info!("Live stream connected");
                    attempt = 0;
                    match self.read_body(body).await {
                        BodyEnd::Cancelled | BodyEnd::ConsumerGone => break,
                        BodyEnd::Ended => warn!("SSE Connection Error: stream ended by server"),
                        BodyEnd::Failed(e) => error!("SSE Connection Error: {}", e),
                    }
                }
                Err(e) => error!("SSE Connection Error: {}", e),
            }

            self.set_state(StreamState::Error);
            let Some(delay) = self.policy.delay(attempt) else {
                info!("Live stream closed after error, not reconnecting");
                return;
            };
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "Reconnecting live stream");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(StreamState::Closed);
        debug!("Live stream reader stopped");
    }

    async fn read_body(&self, body: ByteStream) -> BodyEnd {
        let frames = sse_frames(body);
        tokio::pin!(frames);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return BodyEnd::Cancelled,
                next = frames.next() => next,
            };

            let frame = match next {
                None => return BodyEnd::Ended,
                Some(Err(e)) => return BodyEnd::Failed(e),
                Some(Ok(frame)) => frame,
            };

            if frame
                .event
                .as_deref()
                .is_some_and(|name| name != DEFAULT_EVENT_NAME)
            {
                debug!(event = ?frame.event, "Skipping named SSE event");
                continue;
            }

            let event = match StreamEvent::parse(&frame.data) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Error parsing SSE message: {}", e);
                    continue;
                }
            };

            let delivered = tokio::select! {
                _ = self.cancel.cancelled() => return BodyEnd::Cancelled,
                sent = self.tx.send(event) => sent.is_ok(),
            };
            if !delivered {
                return BodyEnd::ConsumerGone;
            }
        }
    }
}

// ============================================================================
// Gallery/stats consumer
// ============================================================================

/// Apply one stream event to the gallery and stats
///
/// Returns `true` if the event had an effect.
pub fn apply_stream_event(
    gallery: &RecentGallery,
    stats: &StatsAggregator,
    event: StreamEvent,
) -> bool {
    match event {
        StreamEvent::NewPhoto(photo) => {
            debug!(public_id = %photo.public_id, "New photo from stream");
            gallery.prepend(photo);
            stats.apply_optimistic_photo_arrival();
            true
        }
        StreamEvent::Other { kind } => {
            debug!(kind = %kind, "Ignoring stream message");
            false
        }
    }
}

/// Consumer task that keeps the gallery and stats live
///
/// Each event is applied to completion before the next is read.
pub struct LiveFeed {
    cancel: CancellationToken,
    state: watch::Receiver<StreamState>,
    task: JoinHandle<()>,
}

impl LiveFeed {
    pub fn start(
        subscription: StreamSubscription,
        gallery: Arc<RecentGallery>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let state = subscription.state_watch();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut subscription = subscription;
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = subscription.next() => event,
                };
                match event {
                    Some(event) => {
                        apply_stream_event(&gallery, &stats, event);
                    }
                    None => break,
                }
            }
            subscription.close().await;
        });

        Self {
            cancel,
            state,
            task,
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Wait until the stream ends on its own (error without reconnect)
    pub async fn finished(&mut self) {
        if let Err(e) = (&mut self.task).await {
            warn!("Live feed task ended abnormally: {}", e);
        }
    }

    /// Stop consuming and release the connection
    pub async fn close(mut self) {
        self.cancel.cancel();
        if !self.task.is_finished() {
            if let Err(e) = (&mut self.task).await {
                warn!("Live feed task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{photo, FakeApi, StreamScript};
    use pds_common::Stats;

    fn new_photo_frame(n: usize) -> String {
        let p = photo(n);
        format!(
            "data: {{\"type\":\"new_photo\",\"data\":{{\"url\":\"{}\",\"public_id\":\"{}\"}}}}\n\n",
            p.url, p.public_id
        )
    }

    async fn wait_state(rx: &mut watch::Receiver<StreamState>, state: StreamState) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"type\":").is_empty());
        let frames = decoder.feed(b"\"x\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"x\"}");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_decoder_multiline_data_comments_and_fields() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(
            b": keep-alive\n\nevent: update\nid: 7\ndata: line one\ndata:line two\nretry: 100\n\n",
        );
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("update".to_string()),
                data: "line one\nline two".to_string(),
                id: Some("7".to_string()),
            }]
        );
    }

    #[test]
    fn test_decoder_ignores_blank_dispatch_without_data() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n\n").is_empty());
        // event name does not leak into the next frame
        let frames = decoder.feed(b"data: x\n\n");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_reconnect_policy_delays() {
        assert_eq!(ReconnectPolicy::Never.delay(0), None);

        let policy = ReconnectPolicy::ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(800)));
        assert_eq!(policy.delay(4), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay(40), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_policy_from_settings_floors_zero_backoff() {
        let settings = StreamSettings {
            reconnect: true,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };
        let policy = ReconnectPolicy::from_settings(&settings);
        assert_eq!(policy.delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(5), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_policy_from_settings() {
        assert_eq!(
            ReconnectPolicy::from_settings(&StreamSettings::default()),
            ReconnectPolicy::Never
        );
        let settings = StreamSettings {
            reconnect: true,
            initial_backoff_ms: 150,
            max_backoff_ms: 400,
        };
        assert_eq!(
            ReconnectPolicy::from_settings(&settings),
            ReconnectPolicy::ExponentialBackoff {
                initial: Duration::from_millis(150),
                max: Duration::from_millis(400),
            }
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_order_and_malformed_are_skipped() {
        let api = Arc::new(FakeApi::new());
        let first = new_photo_frame(1);
        let second = new_photo_frame(2);
        api.push_stream(StreamScript::open(&[
            &first,
            "data: {not json}\n\n",
            "data: {\"type\":\"heartbeat\",\"data\":null}\n\n",
            &second,
        ]));

        let mut sub = EventStream::open(api.clone(), ReconnectPolicy::Never, EventBus::new(10));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(1))));
        assert_eq!(
            sub.next().await,
            Some(StreamEvent::Other {
                kind: "heartbeat".to_string()
            })
        );
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(2))));
        assert_eq!(sub.state(), StreamState::Open);

        sub.close().await;
    }

    #[tokio::test]
    async fn test_named_events_other_than_message_are_skipped() {
        let api = Arc::new(FakeApi::new());
        let progress = format!("event: progress\n{}", new_photo_frame(2));
        let unnamed = new_photo_frame(1);
        let named = format!("event: message\n{}", new_photo_frame(3));
        api.push_stream(StreamScript::open(&[
            &progress,
            &unnamed,
            &named,
        ]));

        let mut sub = EventStream::open(api.clone(), ReconnectPolicy::Never, EventBus::new(10));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(1))));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(3))));

        sub.close().await;
    }

    #[tokio::test]
    async fn test_error_closes_without_reconnect() {
        let api = Arc::new(FakeApi::new());
        let frame = new_photo_frame(1);
        api.push_stream(StreamScript::failing_after(&[&frame]));
        api.push_stream(StreamScript::open(&[]));

        let mut sub = EventStream::open(api.clone(), ReconnectPolicy::Never, EventBus::new(10));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(1))));
        assert_eq!(sub.next().await, None);

        let mut state = sub.state_watch();
        wait_state(&mut state, StreamState::Error).await;
        assert_eq!(api.stream_opens(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_ends_in_error() {
        let api = Arc::new(FakeApi::new());
        let mut sub = EventStream::open(api.clone(), ReconnectPolicy::Never, EventBus::new(10));
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.state(), StreamState::Error);
    }

    #[tokio::test]
    async fn test_backoff_policy_reconnects() {
        let api = Arc::new(FakeApi::new());
        let first = new_photo_frame(1);
        let second = new_photo_frame(2);
        api.push_stream(StreamScript::failing_after(&[&first]));
        api.push_stream(StreamScript::open(&[&second]));

        let policy = ReconnectPolicy::ExponentialBackoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        };
        let mut sub = EventStream::open(api.clone(), policy, EventBus::new(10));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(1))));
        assert_eq!(sub.next().await, Some(StreamEvent::NewPhoto(photo(2))));
        assert_eq!(api.stream_opens(), 2);

        sub.close().await;
    }

    #[tokio::test]
    async fn test_close_is_deterministic() {
        let api = Arc::new(FakeApi::new());
        api.push_stream(StreamScript::open(&[]));

        let sub = EventStream::open(api.clone(), ReconnectPolicy::Never, EventBus::new(10));
        let mut state = sub.state_watch();
        wait_state(&mut state, StreamState::Open).await;

        sub.close().await;
        assert_eq!(*state.borrow(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_dropping_live_feed_closes_connection() {
        let api = Arc::new(FakeApi::new());
        api.push_stream(StreamScript::open(&[]));

        let bus = EventBus::new(10);
        let gallery = Arc::new(RecentGallery::new(bus.clone()));
        let stats = Arc::new(StatsAggregator::new(bus.clone()));

        let sub = EventStream::open(api.clone(), ReconnectPolicy::Never, bus);
        let feed = LiveFeed::start(sub, gallery, stats);
        let mut state = feed.state_watch();
        wait_state(&mut state, StreamState::Open).await;

        drop(feed);
        wait_state(&mut state, StreamState::Closed).await;
        assert_eq!(api.stream_opens(), 1);
    }

    #[tokio::test]
    async fn test_live_feed_applies_events() {
        let api = Arc::new(FakeApi::new());
        let frames: Vec<String> = (1..=13).map(new_photo_frame).collect();
        let refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        api.push_stream(StreamScript::failing_after(&refs));

        let bus = EventBus::new(100);
        let gallery = Arc::new(RecentGallery::new(bus.clone()));
        let stats = Arc::new(StatsAggregator::new(bus.clone()));

        let sub = EventStream::open(api.clone(), ReconnectPolicy::Never, bus);
        let mut feed = LiveFeed::start(sub, gallery.clone(), stats.clone());
        feed.finished().await;

        let expected: Vec<_> = (2..=13).rev().map(photo).collect();
        assert_eq!(gallery.snapshot(), expected);
        assert_eq!(stats.snapshot().total_photos, 13);
        assert_eq!(feed.state(), StreamState::Error);
        feed.close().await;
    }

    #[test]
    fn test_apply_single_new_photo_from_zero_stats() {
        let bus = EventBus::new(10);
        let gallery = RecentGallery::new(bus.clone());
        let stats = StatsAggregator::new(bus);
        assert_eq!(stats.snapshot(), Stats::default());

        let applied = apply_stream_event(
            &gallery,
            &stats,
            StreamEvent::NewPhoto(pds_common::Photo {
                url: "u".to_string(),
                public_id: "p".to_string(),
            }),
        );

        assert!(applied);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.snapshot()[0].url, "u");
        assert_eq!(stats.snapshot().total_photos, 1);
    }

    #[test]
    fn test_apply_ignores_other_events() {
        let bus = EventBus::new(10);
        let gallery = RecentGallery::new(bus.clone());
        let stats = StatsAggregator::new(bus);

        let applied = apply_stream_event(
            &gallery,
            &stats,
            StreamEvent::Other {
                kind: "stats".to_string(),
            },
        );
        assert!(!applied);
        assert!(gallery.is_empty());
        assert_eq!(stats.snapshot().total_photos, 0);
    }
}

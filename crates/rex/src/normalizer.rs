//! Turns raw backend bytes into the canonical event sequence.
//!
//! [`StreamNormalizer`] is the synchronous core: bytes in, events out, with
//! the guarantee that a stream ends in exactly one [`CanonicalEvent::Done`].
//! [`ByteSession`] drives it from an async byte source under an idle timeout
//! and a cancellation token, and is shared by HTTP bodies and child stdout.

use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::framing::LineReassembler;
use crate::models::event::CanonicalEvent;
use crate::providers::base::Provider;

/// The client-facing stream of one request.
pub type EventStream = BoxStream<'static, CanonicalEvent>;

/// Feeds reassembled lines through a provider's frame parser.
pub struct StreamNormalizer<P: ?Sized> {
    provider: Arc<P>,
    reassembler: LineReassembler,
    done: bool,
}

impl<P: Provider + ?Sized> StreamNormalizer<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            reassembler: LineReassembler::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one read worth of bytes.
    ///
    /// Empty deltas are dropped. Once `Done` has been produced every later
    /// frame is ignored, so a backend repeating its completion signal still
    /// yields a single terminal marker.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        for line in self.reassembler.push(chunk) {
            if line.trim().is_empty() {
                continue;
            }
            match self.provider.parse_stream_frame(&line) {
                Some(CanonicalEvent::ContentDelta(text)) if text.is_empty() => {}
                Some(CanonicalEvent::ContentDelta(text)) => {
                    events.push(CanonicalEvent::ContentDelta(text));
                }
                Some(CanonicalEvent::Done) => {
                    self.done = true;
                    events.push(CanonicalEvent::Done);
                    break;
                }
                None => debug!("ignoring frame: {}", line),
            }
        }

        events
    }

    /// Close the stream, returning a synthetic `Done` if none was seen.
    ///
    /// An unterminated trailing fragment is discarded; a well-behaved backend
    /// always ends with its own terminal marker.
    pub fn finish(&mut self) -> Option<CanonicalEvent> {
        if self.done {
            return None;
        }
        self.done = true;

        if let Some(fragment) = std::mem::take(&mut self.reassembler).finish() {
            debug!(
                "discarding {} unterminated bytes at end of stream",
                fragment.len()
            );
        }
        Some(CanonicalEvent::Done)
    }
}

/// Why a byte session stopped producing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The backend sent its terminal marker.
    Completed,
    /// The source closed without a terminal marker.
    Exhausted,
    /// Reading from the source failed.
    Failed(String),
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// The client went away.
    Cancelled,
}

pub enum Step {
    Events(Vec<CanonicalEvent>),
    End(SessionEnd),
}

/// Pulls bytes from a source and normalizes them, one read at a time.
pub struct ByteSession<S, P: ?Sized> {
    source: Pin<Box<S>>,
    normalizer: StreamNormalizer<P>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl<S, E, P> ByteSession<S, P>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    P: Provider + ?Sized,
{
    pub fn new(
        source: S,
        provider: Arc<P>,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: Box::pin(source),
            normalizer: StreamNormalizer::new(provider),
            idle_timeout,
            cancel,
        }
    }

    pub async fn next_step(&mut self) -> Step {
        if self.normalizer.is_done() {
            return Step::End(SessionEnd::Completed);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::End(SessionEnd::Cancelled),
            next = tokio::time::timeout(self.idle_timeout, self.source.next()) => match next {
                Err(_) => Step::End(SessionEnd::IdleTimeout),
                Ok(None) => Step::End(SessionEnd::Exhausted),
                Ok(Some(Err(e))) => Step::End(SessionEnd::Failed(e.to_string())),
                Ok(Some(Ok(bytes))) => Step::Events(self.normalizer.feed(&bytes)),
            },
        }
    }

    pub fn is_done(&self) -> bool {
        self.normalizer.is_done()
    }

    pub fn finish(&mut self) -> Option<CanonicalEvent> {
        self.normalizer.finish()
    }
}

/// Stream the body of a successful upstream HTTP response.
///
/// The response is dropped, closing the connection, as soon as the stream
/// ends or the token is cancelled.
pub fn http_event_stream<P>(
    response: reqwest::Response,
    provider: Arc<P>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> EventStream
where
    P: Provider + ?Sized + 'static,
{
    let url = response.url().to_string();
    Box::pin(async_stream::stream! {
        let mut session = ByteSession::new(response.bytes_stream(), provider, idle_timeout, cancel);

        let end = loop {
            match session.next_step().await {
                Step::Events(events) => {
                    for event in events {
                        yield event;
                    }
                }
                Step::End(end) => break end,
            }
        };

        match &end {
            SessionEnd::Completed => debug!("upstream {} completed", url),
            SessionEnd::Exhausted => warn!("upstream {} closed without a terminal marker", url),
            SessionEnd::Failed(e) => warn!("upstream {} failed mid-stream: {}", url, e),
            SessionEnd::IdleTimeout => warn!("upstream {} idle for {:?}, giving up", url, idle_timeout),
            SessionEnd::Cancelled => info!("client disconnected, closing upstream {}", url),
        }

        if let Some(done) = session.finish() {
            yield done;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::{AnthropicProviderConfig, OpenAiProviderConfig};
    use crate::providers::{anthropic::AnthropicProvider, openai::OpenAiProvider};
    use futures::stream;
    use std::convert::Infallible;

    fn openai() -> Arc<OpenAiProvider> {
        Arc::new(OpenAiProvider::new(OpenAiProviderConfig::default()))
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        let owned: Vec<Result<Bytes, Infallible>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    async fn drain<S, E>(source: S) -> (Vec<CanonicalEvent>, SessionEnd)
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let mut session = ByteSession::new(
            source,
            openai(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let mut events = Vec::new();
        let end = loop {
            match session.next_step().await {
                Step::Events(batch) => events.extend(batch),
                Step::End(end) => break end,
            }
        };
        events.extend(session.finish());
        (events, end)
    }

    #[test]
    fn test_deltas_then_done() {
        let mut normalizer = StreamNormalizer::new(openai());
        let events = normalizer.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hal\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
              data: [DONE]\n\n",
        );

        assert_eq!(
            events,
            vec![
                CanonicalEvent::delta("Hal"),
                CanonicalEvent::delta("lo"),
                CanonicalEvent::Done
            ]
        );
        assert_eq!(normalizer.finish(), None);
    }

    #[test]
    fn test_empty_deltas_are_filtered() {
        let mut normalizer = StreamNormalizer::new(openai());
        let events = normalizer.feed(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n",
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_frames_after_done_are_ignored() {
        let provider = Arc::new(AnthropicProvider::new(AnthropicProviderConfig::default()));
        let mut normalizer = StreamNormalizer::new(provider);

        let events = normalizer.feed(
            b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n\
              data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"late\"}}\n\
              data: {\"type\":\"message_stop\"}\n",
        );
        assert_eq!(events, vec![CanonicalEvent::Done]);

        assert!(normalizer
            .feed(b"data: {\"type\":\"message_stop\"}\n")
            .is_empty());
        assert_eq!(normalizer.finish(), None);
    }

    #[test]
    fn test_finish_synthesizes_done_and_drops_fragment() {
        let mut normalizer = StreamNormalizer::new(openai());
        let events = normalizer.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}");

        assert_eq!(events, vec![CanonicalEvent::delta("a")]);
        assert_eq!(normalizer.finish(), Some(CanonicalEvent::Done));
        assert_eq!(normalizer.finish(), None);
    }

    #[tokio::test]
    async fn test_session_single_done_across_odd_chunks() {
        let (events, end) = drain(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"Hi\"}}]}\r",
            "\n\r\ndata: [DO",
            "NE]\n\ndata: [DONE]\n\n",
        ]))
        .await;

        assert_eq!(events, vec![CanonicalEvent::delta("Hi"), CanonicalEvent::Done]);
        assert_eq!(end, SessionEnd::Completed);
    }

    #[tokio::test]
    async fn test_session_exhausted_gets_synthetic_done() {
        let (events, end) = drain(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n",
            "data: {\"choi",
        ]))
        .await;

        assert_eq!(end, SessionEnd::Exhausted);
        assert_eq!(events, vec![CanonicalEvent::delta("cut"), CanonicalEvent::Done]);
    }

    #[tokio::test]
    async fn test_session_read_error_ends_stream() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n")),
            Err("connection reset"),
        ]);
        let (events, end) = drain(source).await;

        assert_eq!(end, SessionEnd::Failed("connection reset".to_string()));
        assert_eq!(events, vec![CanonicalEvent::delta("x"), CanonicalEvent::Done]);
    }

    #[tokio::test]
    async fn test_session_idle_timeout() {
        let mut session = ByteSession::new(
            stream::pending::<Result<Bytes, Infallible>>(),
            openai(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );

        assert!(matches!(
            session.next_step().await,
            Step::End(SessionEnd::IdleTimeout)
        ));
        assert_eq!(session.finish(), Some(CanonicalEvent::Done));
    }

    #[tokio::test]
    async fn test_session_cancellation_wins() {
        let cancel = CancellationToken::new();
        let mut session = ByteSession::new(
            stream::pending::<Result<Bytes, Infallible>>(),
            openai(),
            Duration::from_secs(60),
            cancel.clone(),
        );
        cancel.cancel();

        assert!(matches!(
            session.next_step().await,
            Step::End(SessionEnd::Cancelled)
        ));
    }
}

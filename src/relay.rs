//! Line-by-line relay of an upstream event stream.
//!
//! The relay is a lazy generator: nothing is read from upstream until the
//! client body polls for the next unit, and each upstream line is handed out
//! as its own unit before the next chunk is pulled. Dropping the stream (the
//! client went away) drops the upstream response with it.
//!
//! Once the response headers have gone out, every failure becomes a final
//! `data: {"error": ...}` event instead of an aborted body.

use crate::error::ProxyError;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;

pub type RelayItem = Result<Bytes, Infallible>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    HeaderReceived,
    Forwarding,
    ErrorEmitted,
    Closed,
}

impl RelayState {
    fn can_advance_to(self, next: RelayState) -> bool {
        use RelayState::*;
        matches!(
            (self, next),
            (Idle, HeaderReceived)
                | (Idle, ErrorEmitted)
                | (HeaderReceived, Forwarding)
                | (HeaderReceived, ErrorEmitted)
                | (Forwarding, ErrorEmitted)
                | (Forwarding, Closed)
                | (ErrorEmitted, Closed)
        )
    }
}

/// Tracks one relay through its states. Lives inside the generator next to
/// the upstream body, so it is dropped whenever the body is.
struct RelayGuard {
    state: RelayState,
    lines: u64,
    errored: bool,
}

impl RelayGuard {
    fn new() -> Self {
        Self {
            state: RelayState::Idle,
            lines: 0,
            errored: false,
        }
    }

    fn advance(&mut self, next: RelayState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid relay transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "relay state");
        self.errored |= next == RelayState::ErrorEmitted;
        self.state = next;
    }

    fn forwarded(&mut self) {
        self.lines += 1;
        metrics::counter!("chatrelay_stream_lines_total").increment(1);
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let outcome = match (self.state, self.errored) {
            (RelayState::Closed, false) => "completed",
            (RelayState::Closed, true) => "error",
            _ => "cancelled",
        };
        metrics::counter!("chatrelay_stream_closed_total", "outcome" => outcome).increment(1);
        tracing::debug!(
            outcome,
            lines = self.lines,
            "upstream stream released"
        );
    }
}

/// Builds the client-facing stream for a pending streaming dispatch.
///
/// `connect` is not polled until the client starts reading, so a connection
/// failure is reported in-band like any other stream fault.
pub fn relay<F>(connect: F) -> impl Stream<Item = RelayItem> + Send + 'static
where
    F: Future<Output = Result<reqwest::Response, ProxyError>> + Send + 'static,
{
    async_stream::stream! {
        let mut guard = RelayGuard::new();
        let resp = match connect.await {
            Ok(resp) => resp,
            Err(err) => {
                guard.advance(RelayState::ErrorEmitted);
                yield RelayItem::Ok(error_event(&err));
                guard.advance(RelayState::Closed);
                return;
            }
        };
        guard.advance(RelayState::HeaderReceived);

        let status = resp.status().as_u16();
        if status != 200 && status != 201 {
            tracing::warn!(status, "upstream stream rejected");
            metrics::counter!("chatrelay_upstream_failures_total", "kind" => "http").increment(1);
            let detail = match resp.text().await {
                Ok(text) => text,
                Err(err) => err.to_string(),
            };
            guard.advance(RelayState::ErrorEmitted);
            yield RelayItem::Ok(error_event(&detail));
            guard.advance(RelayState::Closed);
            return;
        }

        let mut lines = std::pin::pin!(forward_lines(resp.bytes_stream(), guard));
        while let Some(item) = lines.next().await {
            yield item;
        }
    }
}

fn forward_lines<S, E>(body: S, mut guard: RelayGuard) -> impl Stream<Item = RelayItem> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        guard.advance(RelayState::Forwarding);
        let mut body = std::pin::pin!(body);
        let mut splitter = LineSplitter::default();
        loop {
            while let Some(line) = splitter.next_line() {
                guard.forwarded();
                yield RelayItem::Ok(line);
            }
            match body.next().await {
                Some(Ok(chunk)) => splitter.push(&chunk),
                Some(Err(err)) => {
                    tracing::warn!(lines = guard.lines, "upstream stream failed: {err}");
                    metrics::counter!("chatrelay_upstream_failures_total", "kind" => "stream")
                        .increment(1);
                    guard.advance(RelayState::ErrorEmitted);
                    yield RelayItem::Ok(error_event(&ProxyError::StreamFault(err.to_string())));
                    break;
                }
                None => {
                    if let Some(rest) = splitter.finish() {
                        guard.forwarded();
                        yield RelayItem::Ok(rest);
                    }
                    break;
                }
            }
        }
        guard.advance(RelayState::Closed);
    }
}

/// `data: {"error": "<message>"}` followed by a blank line.
pub fn error_event(message: &impl Display) -> Bytes {
    let payload = json!({ "error": message.to_string() });
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Splits a byte stream on `\n`, dropping a preceding `\r`. Emitted lines
/// carry a single `\n` terminator; blank lines are kept so SSE framing
/// survives the trip.
#[derive(Default)]
struct LineSplitter {
    pending: BytesMut,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Bytes> {
        let idx = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line = self.pending.split_to(idx + 1);
        line.truncate(idx);
        if line.last() == Some(&b'\r') {
            line.truncate(idx - 1);
        }
        Some(terminate(line))
    }

    fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = self.pending.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(terminate(line))
    }
}

fn terminate(mut line: BytesMut) -> Bytes {
    line.extend_from_slice(b"\n");
    line.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn body_of(
        chunks: Vec<Result<&'static str, &'static str>>,
    ) -> impl Stream<Item = Result<Bytes, String>> + Send {
        futures_util::stream::iter(chunks.into_iter().map(|c| {
            c.map(|s| Bytes::from_static(s.as_bytes()))
                .map_err(str::to_string)
        }))
    }

    async fn collect_units(stream: impl Stream<Item = RelayItem>) -> Vec<String> {
        stream
            .map(|item| match item {
                Ok(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
                Err(never) => match never {},
            })
            .collect()
            .await
    }

    fn header_guard() -> RelayGuard {
        let mut guard = RelayGuard::new();
        guard.advance(RelayState::HeaderReceived);
        guard
    }

    #[tokio::test]
    async fn each_line_is_its_own_unit_in_order() {
        let body = body_of(vec![Ok("data: {\"a\":1}\n\ndata: {\"a\":2}\n\ndata: [DONE]\n\n")]);
        let units = collect_units(forward_lines(body, header_guard())).await;
        assert_eq!(
            units,
            vec![
                "data: {\"a\":1}\n",
                "\n",
                "data: {\"a\":2}\n",
                "\n",
                "data: [DONE]\n",
                "\n",
            ]
        );
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let body = body_of(vec![Ok("data: hel"), Ok("lo\r\n"), Ok("\r\ndata: x")]);
        let units = collect_units(forward_lines(body, header_guard())).await;
        assert_eq!(units, vec!["data: hello\n", "\n", "data: x\n"]);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_one_error_event() {
        let body = body_of(vec![
            Ok("data: 1\n\n"),
            Ok("data: 2\n"),
            Err("connection reset"),
            Ok("data: never\n"),
        ]);
        let units = collect_units(forward_lines(body, header_guard())).await;
        assert_eq!(
            units,
            vec![
                "data: 1\n",
                "\n",
                "data: 2\n",
                "data: {\"error\":\"connection reset\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn connect_failure_is_reported_in_band() {
        let stream = relay(async {
            Err(ProxyError::TransportError("dns failure".to_string()))
        });
        let units = collect_units(stream).await;
        assert_eq!(
            units,
            vec!["data: {\"error\":\"Error communicating with the upstream API: dns failure\"}\n\n"]
        );
    }

    #[tokio::test]
    async fn relay_does_not_connect_until_polled() {
        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();
        let stream = relay(async move {
            flag.store(true, Ordering::SeqCst);
            Err(ProxyError::TransportError("unused".to_string()))
        });
        tokio::task::yield_now().await;
        assert!(!polled.load(Ordering::SeqCst));
        drop(stream);
        assert!(!polled.load(Ordering::SeqCst));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_relay_releases_the_upstream_body() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let body = futures_util::stream::iter(vec![Ok::<_, String>(Bytes::from_static(
            b"data: 1\n\n",
        ))])
        .chain(futures_util::stream::pending())
        .map(move |item| {
            let _keep = &flag;
            item
        });

        let mut stream = Box::pin(forward_lines(body, header_guard()));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"data: 1\n");
        assert!(!released.load(Ordering::SeqCst));
        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn error_event_is_sse_framed_json() {
        assert_eq!(
            &error_event(&"quota \"exceeded\"")[..],
            b"data: {\"error\":\"quota \\\"exceeded\\\"\"}\n\n"
        );
    }

    #[test]
    fn relay_states_only_move_forward() {
        use RelayState::*;
        assert!(Idle.can_advance_to(HeaderReceived));
        assert!(Forwarding.can_advance_to(ErrorEmitted));
        assert!(!Closed.can_advance_to(Forwarding));
        assert!(!Closed.can_advance_to(Idle));
        assert!(!ErrorEmitted.can_advance_to(Forwarding));
    }
}

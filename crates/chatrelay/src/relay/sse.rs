//! Serving adapter: drive a [`RelayStream`] as an axum SSE body

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use std::convert::Infallible;

use super::session::{Delivery, Frame, RelayStream};

impl Frame {
    pub fn into_event(self) -> Event {
        Event::default().event(self.kind.as_str()).data(self.data)
    }
}

/// Convert a relay session into a stream of SSE events
///
/// The stream ends right after the frame that accompanies
/// `Delivery::Close`. Dropping it before then drops the session, which
/// records a disconnect and cancels the upstream call.
pub fn relay_to_sse(relay: RelayStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(Some(relay), |relay| async move {
        let mut relay = relay?;
        match relay.next_delivery().await {
            Delivery::KeepOpen(frame) => Some((Ok(frame.into_event()), Some(relay))),
            Delivery::Close(Some(frame)) => Some((Ok(frame.into_event()), None)),
            Delivery::Close(None) => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::{PipelineSettings, RelayPipeline};
    use crate::relay::types::GenerationRequest;
    use crate::testing::{ScriptedUpstream, chunk_line};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn pipeline(upstream: ScriptedUpstream) -> RelayPipeline {
        RelayPipeline::new(
            Arc::new(upstream),
            PipelineSettings {
                queue_capacity: 4,
                session_timeout: Duration::from_secs(5),
                error_send_timeout: Duration::from_millis(50),
            },
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("hello", 0.7, 64).unwrap()
    }

    #[tokio::test]
    async fn test_stream_ends_after_completion() {
        let pipeline = pipeline(ScriptedUpstream::from_lines(&[
            &chunk_line("a"),
            &chunk_line("b"),
            "data: [DONE]",
        ]));

        let events: Vec<_> = relay_to_sse(pipeline.start(request(), CancellationToken::new()))
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(pipeline.stats().snapshot().completed, 1);
    }

    #[tokio::test]
    async fn test_error_frame_is_last_event() {
        let pipeline = pipeline(
            ScriptedUpstream::from_lines(&[&chunk_line("a")]).with_read_error("reset"),
        );

        let events: Vec<_> = relay_to_sse(pipeline.start(request(), CancellationToken::new()))
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(pipeline.stats().snapshot().errored, 1);
    }

    #[tokio::test]
    async fn test_dropping_sse_stream_disconnects_session() {
        let upstream = ScriptedUpstream::from_lines(&[&chunk_line("a")]).hanging();
        let probe = upstream.probe();
        let pipeline = pipeline(upstream);

        let mut events = Box::pin(relay_to_sse(
            pipeline.start(request(), CancellationToken::new()),
        ));
        assert!(events.next().await.is_some());
        drop(events);

        assert!(probe.wait_dropped(Duration::from_secs(1)).await);
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.disconnected, 1);
        assert_eq!(stats.active, 0);
    }
}

use std::sync::{Arc, LazyLock};

use futures_util::StreamExt;
use serde_json::Value;

use crate::database::backend::RestBackend;
use crate::database::error::{transport_failure, DatabaseResult};
use crate::database::event_stream::{apply_event, interpret, EventStreamDecoder, ServerEvent, StreamEvent};
use crate::database::path::{normalize_path, path_to_string};
use crate::database::rate_limiter::OperationKind;
use crate::database::settings::TransportKind;
use crate::database::transport::{Subscription, SubscriptionEvent, SubscriptionSink, TransportStrategy};
use crate::logger::Logger;
use crate::platform::runtime::spawn_abortable;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/streaming"));

/// Holds one `text/event-stream` response open per observed path.
///
/// The connection slot is taken when the subscription is activated and
/// released when it ends. Evicting the slot ends the subscription with a
/// `database/transport-failure` error.
pub(crate) struct StreamingTransport {
    backend: Arc<RestBackend>,
}

impl StreamingTransport {
    pub fn new(backend: Arc<RestBackend>) -> Self {
        Self { backend }
    }
}

impl TransportStrategy for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn activate(&self, path: &str) -> Subscription {
        let (sink, subscription) = Subscription::channel(path);
        let handle = subscription.handle();

        let slot_path = normalize_path(path)
            .map(|segments| path_to_string(&segments))
            .unwrap_or_else(|_| path.to_owned());
        let evicted = sink.clone();
        let connections = Arc::clone(self.backend.connections());
        let slot = connections.acquire_with_teardown(
            &slot_path,
            Some(Box::new(move || {
                let path = evicted.handle().path().to_owned();
                evicted.fail_now(transport_failure(format!(
                    "stream for '{path}' evicted to free a connection slot"
                )));
                if evicted.handle().cancel() {
                    LOGGER.debug(format!("stream for '{path}' evicted"));
                }
            })),
        );

        let task = spawn_abortable(run_stream(
            Arc::clone(&self.backend),
            path.to_owned(),
            sink,
        ));
        handle.on_cancel(move || {
            task.abort();
            connections.release(slot);
        });
        subscription
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn run_stream(backend: Arc<RestBackend>, path: String, sink: SubscriptionSink) {
    let result = stream_events(&backend, &path, &sink).await;
    if let Err(err) = result {
        LOGGER.warn(format!("stream for '{path}' failed: {err}"));
        sink.fail(err).await;
    } else {
        LOGGER.debug(format!("stream for '{path}' ended"));
        sink.close();
    }
    // releases the slot; a no-op when the subscription was already cancelled
    sink.handle().cancel();
}

async fn stream_events(
    backend: &RestBackend,
    path: &str,
    sink: &SubscriptionSink,
) -> DatabaseResult<()> {
    let segments = normalize_path(path)?;
    let response = backend.open_event_stream(&segments).await?.response;
    LOGGER.debug(format!("stream for '{}' opened", path_to_string(&segments)));

    let mut body = response.bytes_stream();
    let mut decoder = EventStreamDecoder::new();
    let mut snapshot = Value::Null;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| transport_failure(format!("event stream interrupted: {err}")))?;
        for event in decoder.push(&chunk) {
            if let Flow::Stop = handle_event(backend, path, sink, &mut snapshot, event).await? {
                return Ok(());
            }
        }
    }
    if let Some(event) = decoder.finish() {
        handle_event(backend, path, sink, &mut snapshot, event).await?;
    }
    Ok(())
}

async fn handle_event(
    backend: &RestBackend,
    path: &str,
    sink: &SubscriptionSink,
    snapshot: &mut Value,
    event: ServerEvent,
) -> DatabaseResult<Flow> {
    let interpreted = match interpret(&event) {
        Ok(interpreted) => interpreted,
        Err(err) => {
            LOGGER.warn(format!("skipping event on '{path}': {err}"));
            return Ok(Flow::Continue);
        }
    };

    match interpreted {
        StreamEvent::Put { .. } | StreamEvent::Patch { .. } => {
            let size = event.data.len() as u64;
            backend.limiter().check(OperationKind::Read, size)?;
            backend.limiter().credit(OperationKind::Read, size);
            apply_event(snapshot, interpreted);
            if sink.send(SubscriptionEvent::Value(snapshot.clone())).await {
                Ok(Flow::Continue)
            } else {
                Ok(Flow::Stop)
            }
        }
        StreamEvent::KeepAlive => Ok(Flow::Continue),
        StreamEvent::Closed(err) => Err(err),
        StreamEvent::Ignored(name) => {
            LOGGER.debug(format!("ignoring '{name}' event on '{path}'"));
            Ok(Flow::Continue)
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::database::connections::ConnectionTracker;
    use crate::database::rate_limiter::RateLimiter;
    use crate::database::settings::RateLimits;
    use crate::platform::runtime::sleep;
    use crate::platform::token::StaticTokenSource;
    use crate::test_support::start_mock_server;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    fn transport_for(
        server_url: String,
        limits: RateLimits,
        max_connections: usize,
    ) -> (StreamingTransport, Arc<ConnectionTracker>) {
        let connections = ConnectionTracker::new(max_connections);
        let backend = RestBackend::new(
            Url::parse(&server_url).unwrap(),
            Arc::new(StaticTokenSource::new("token")),
            RateLimiter::new(limits),
            connections.clone(),
        )
        .unwrap();
        (StreamingTransport::new(Arc::new(backend)), connections)
    }

    const BODY: &str = "event: put\ndata: {\"path\":\"/\",\"data\":{\"age\":25}}\n\n\
event: keep-alive\ndata: null\n\n\
event: patch\ndata: {\"path\":\"/\",\"data\":{\"age\":30}}\n\n";

    #[tokio::test]
    async fn emits_full_snapshot_after_each_data_event() {
        let server = start_mock_server().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/alice.json")
                    .header("accept", "text/event-stream")
                    .query_param("auth", "token");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(BODY);
            })
            .await;

        let (transport, connections) = transport_for(server.url("/"), RateLimits::default(), 50);
        let subscription = transport.activate("users/alice");

        let mut values = Vec::new();
        while let Some(event) = subscription.next().await {
            match event {
                SubscriptionEvent::Value(value) => values.push(value),
                SubscriptionEvent::Error(err) => panic!("unexpected error {err}"),
            }
        }

        mock.assert_async().await;
        assert_eq!(values, vec![json!({"age": 25}), json!({"age": 30})]);
        // end of stream released the slot
        assert_eq!(connections.open_count(), 0);
    }

    #[tokio::test]
    async fn server_cancel_terminates_with_error() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/locked.json");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("event: cancel\ndata: \"Permission denied\"\n\n");
            })
            .await;

        let (transport, _connections) = transport_for(server.url("/"), RateLimits::default(), 50);
        let subscription = transport.activate("locked");
        match subscription.next().await {
            Some(SubscriptionEvent::Error(err)) => {
                assert_eq!(err.code_str(), "database/permission-denied")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn events_over_the_byte_cap_terminate_the_stream() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/alice.json");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(BODY);
            })
            .await;

        let (transport, _connections) = transport_for(
            server.url("/"),
            RateLimits {
                max_bytes: 40,
                ..RateLimits::default()
            },
            50,
        );
        let subscription = transport.activate("users/alice");
        assert!(matches!(
            subscription.next().await,
            Some(SubscriptionEvent::Value(_))
        ));
        match subscription.next().await {
            Some(SubscriptionEvent::Error(err)) => {
                assert_eq!(err.code_str(), "database/rate-limit-exceeded")
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/counter.json");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(
                        "event: put\ndata: {garbage\n\n\
event: put\ndata: {\"path\":\"/\",\"data\":7}\n\n",
                    );
            })
            .await;

        let (transport, _connections) = transport_for(server.url("/"), RateLimits::default(), 50);
        let subscription = transport.activate("counter");

        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SubscriptionEvent::Value(value) if *value == json!(7)));
    }

    #[tokio::test]
    async fn failed_open_ends_with_error_and_frees_the_slot() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/broken.json");
                then.status(500).body("boom");
            })
            .await;

        let (transport, connections) = transport_for(server.url("/"), RateLimits::default(), 50);
        let subscription = transport.activate("broken");
        match subscription.next().await {
            Some(SubscriptionEvent::Error(err)) => {
                assert_eq!(err.code_str(), "database/transport-failure");
                assert!(err.message().contains("500"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(subscription.next().await.is_none());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(connections.open_count(), 0);
    }

    #[tokio::test]
    async fn evicting_the_slot_fails_the_subscription() {
        let server = start_mock_server().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow.json");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .delay(Duration::from_secs(5))
                    .body("");
            })
            .await;

        let (transport, connections) = transport_for(server.url("/"), RateLimits::default(), 1);
        let subscription = transport.activate("slow");
        assert_eq!(connections.tracked_paths(), vec!["/slow".to_string()]);

        connections.acquire("/other");
        sleep(Duration::from_millis(10)).await;

        assert!(subscription.handle().is_cancelled());
        match subscription.next().await {
            Some(SubscriptionEvent::Error(err)) => {
                assert_eq!(err.code_str(), "database/transport-failure");
                assert!(err.message().contains("evicted"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(subscription.next().await.is_none());
        assert_eq!(connections.tracked_paths(), vec!["/other".to_string()]);
    }
}

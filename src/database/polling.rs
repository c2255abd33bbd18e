use std::sync::LazyLock;
use std::time::Duration;

use serde_json::Value;

use crate::database::crud::CrudClient;
use crate::database::error::DatabaseErrorCode;
use crate::database::settings::TransportKind;
use crate::database::transport::{Subscription, SubscriptionEvent, SubscriptionSink, TransportStrategy};
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_abortable};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/polling"));

/// Re-fetches the full value of each observed path at a fixed interval.
///
/// Every tick is an ordinary gated read, so it consumes the read allowance
/// and holds a connection slot only while the request is in flight.
pub(crate) struct PollingTransport {
    crud: CrudClient,
    interval: Duration,
}

impl PollingTransport {
    pub fn new(crud: CrudClient, interval: Duration) -> Self {
        Self { crud, interval }
    }
}

impl TransportStrategy for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn activate(&self, path: &str) -> Subscription {
        let (sink, subscription) = Subscription::channel(path);
        let task = spawn_abortable(run_poll_loop(
            self.crud.clone(),
            path.to_owned(),
            self.interval,
            sink,
        ));
        subscription.handle().on_cancel(move || task.abort());
        LOGGER.debug(format!("polling '{path}' every {:?}", self.interval));
        subscription
    }
}

async fn run_poll_loop(crud: CrudClient, path: String, interval: Duration, sink: SubscriptionSink) {
    let mut last_published: Option<Value> = None;
    while !sink.is_cancelled() {
        match crud.fetch(&path, false, &[]).await {
            Ok(value) => {
                if last_published.as_ref() != Some(&value) {
                    if !sink.send(SubscriptionEvent::Value(value.clone())).await {
                        break;
                    }
                    last_published = Some(value);
                }
            }
            Err(err) if err.code == DatabaseErrorCode::MalformedPayload => {
                LOGGER.warn(format!("skipping malformed poll result for '{path}': {err}"));
            }
            Err(err) => {
                LOGGER.warn(format!("polling '{path}' stopped: {err}"));
                sink.fail(err).await;
                return;
            }
        }
        sleep(interval).await;
    }
    sink.close();
}

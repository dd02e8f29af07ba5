//! Server-sent events for `SubscribeExecutionEvents`.
//!
//! Grounded on this codebase's own SSE conventions in its HTTP layer
//! (a heartbeat comment line keeping the connection alive through
//! intermediate proxies) combined with `EventBus::subscribe`'s replay+live
//! `EventSubscription`. Disconnection is detected the way any `mpsc`-fed
//! stream detects it: the receiving task's `send` fails once the client
//! drops the response body, at which point it stops polling `next()`.

use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::event_bus::EventSubscription;

/// Heartbeat interval for idle subscriptions: a subscriber that hears
/// nothing for this long should still see the connection is alive.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Turn a live `EventSubscription` into an SSE response. Forwards every
/// event as a `message` SSE frame carrying the JSON-encoded
/// `ExecutionEvent`, and relies on axum's `KeepAlive` for the heartbeat
/// comment so a slow/idle stream doesn't get reaped by an intermediate
/// proxy.
pub fn stream_execution_events(
    mut subscription: EventSubscription,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        while let Some(next) = subscription.next().await {
            match next {
                Ok(event) => {
                    let terminal = event.kind.is_execution_terminal();
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            let _ = tx.send(Ok(Event::default().event("error").data(e.to_string()))).await;
                            break;
                        }
                    };
                    if tx.send(Ok(Event::default().event("message").data(json))).await.is_err() {
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Ok(Event::default().event("error").data(e.to_string()))).await;
                    break;
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}

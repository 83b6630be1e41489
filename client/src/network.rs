//! WebSocket transport task and reconnection policies
//!
//! The transport owns the socket on the tokio runtime and reports everything
//! that happens to it as [`TransportEvent`]s. It knows nothing about the
//! protocol; decoding and state changes happen in the session on the frame
//! loop.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Channel lifecycle and inbound frames, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    Opened,
    Message(String),
    Closed { reason: Option<String> },
    Failed { reason: String },
}

/// Decides whether and when to reconnect after the channel drops.
pub trait ReconnectPolicy: Send {
    /// Delay before reconnect attempt `attempt` (starting at 1), or `None` to
    /// stop trying.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// Never reconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Doubles the delay per attempt up to `max`, shaving off up to `jitter` of
/// each delay at random so clients dropped together don't return together.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
    pub jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            max,
            max_attempts,
            jitter: 0.2,
        }
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), None)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }

        let ceiling = self.ceiling(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Some(ceiling);
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        Some(ceiling.mul_f64(factor))
    }
}

/// Handles held by the frame loop for a running transport task.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub task: JoinHandle<()>,
}

/// Spawns the connection task on `runtime`. Dropping every outbound sender
/// closes the socket and ends the task.
pub fn spawn_transport(
    runtime: &Handle,
    url: String,
    policy: Box<dyn ReconnectPolicy>,
) -> Transport {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = runtime.spawn(run_transport(url, events_tx, outbound_rx, policy));

    Transport {
        outbound: outbound_tx,
        events: events_rx,
        task,
    }
}

enum ConnectionEnd {
    Dropped,
    Shutdown,
}

async fn run_transport(
    url: String,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut policy: Box<dyn ReconnectPolicy>,
) {
    let mut attempt = 0;

    loop {
        if events_tx.send(TransportEvent::Connecting).is_err() {
            break;
        }

        // Intents queued for a previous connection are stale.
        while outbound_rx.try_recv().is_ok() {}

        info!("Connecting to {}", url);
        let end = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!("Connected to {}", url);
                attempt = 0;
                if events_tx.send(TransportEvent::Opened).is_err() {
                    break;
                }
                pump(stream, &events_tx, &mut outbound_rx).await
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", url, e);
                if events_tx
                    .send(TransportEvent::Failed {
                        reason: e.to_string(),
                    })
                    .is_err()
                {
                    break;
                }
                ConnectionEnd::Dropped
            }
        };

        if let ConnectionEnd::Shutdown = end {
            break;
        }

        attempt += 1;
        match policy.next_delay(attempt) {
            Some(delay) => {
                info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                sleep(delay).await;
            }
            None => {
                info!("Not reconnecting");
                break;
            }
        }
    }

    debug!("Transport task finished");
}

/// Moves frames both ways until the connection drops or the app shuts down.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> ConnectionEnd {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = source.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(e) => {
                            warn!("Dropping non-UTF-8 binary frame: {}", e);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = events_tx.send(TransportEvent::Closed { reason });
                        return ConnectionEnd::Dropped;
                    }
                    // Ping/pong replies are handled by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events_tx.send(TransportEvent::Failed { reason: e.to_string() });
                        return ConnectionEnd::Dropped;
                    }
                    None => {
                        let _ = events_tx.send(TransportEvent::Closed { reason: None });
                        return ConnectionEnd::Dropped;
                    }
                };

                if events_tx.send(event).is_err() {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            },

            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        error!("Error sending message: {}", e);
                        let _ = events_tx.send(TransportEvent::Failed { reason: e.to_string() });
                        return ConnectionEnd::Dropped;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_attempts: Option<u32>) -> ExponentialBackoff {
        ExponentialBackoff {
            jitter: 0.0,
            ..ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1), max_attempts)
        }
    }

    #[test]
    fn test_no_reconnect_gives_up_immediately() {
        assert_eq!(NoReconnect.next_delay(1), None);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut policy = backoff(None);
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.next_delay(attempt).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);

        // Large attempt counts must not overflow.
        assert_eq!(policy.next_delay(u32::MAX), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_respects_attempt_limit() {
        let mut policy = backoff(Some(3));
        assert!(policy.next_delay(3).is_some());
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            None,
        );
        for _ in 0..200 {
            let delay = policy.next_delay(2).unwrap();
            assert!(delay <= Duration::from_millis(200));
            assert!(delay >= Duration::from_millis(159));
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_failure_and_stops() {
        let mut transport = spawn_transport(
            &Handle::current(),
            "ws://127.0.0.1:1".to_string(),
            Box::new(NoReconnect),
        );

        assert_eq!(transport.events.recv().await, Some(TransportEvent::Connecting));
        assert!(matches!(
            transport.events.recv().await,
            Some(TransportEvent::Failed { .. })
        ));
        assert_eq!(transport.events.recv().await, None);
        tokio_test::assert_ok!(transport.task.await);
    }
}

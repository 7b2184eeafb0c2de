use crate::errors::RecorderError;
use crate::protocol::{map_frame, InboundFrame, OutboundFrame};
use crate::types::ConnectionState;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Option<Duration>,
    pub inbound_buffer: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// `raw` is the decoded JSON object, kept for frame capture.
    Frame { frame: InboundFrame, raw: Value },
    Connection(ConnectionState),
}

pub struct ChannelHandle {
    state_rx: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<OutboundFrame>,
    shutdown: watch::Sender<bool>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Inbound payloads that could not be parsed and were dropped.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn wait_until_open(&self, timeout: Duration) -> Result<(), RecorderError> {
        let mut state_rx = self.state_rx.clone();
        tokio::time::timeout(timeout, state_rx.wait_for(|state| *state == ConnectionState::Open))
            .await
            .map_err(|_| {
                RecorderError::Channel(format!(
                    "channel not open after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|_| RecorderError::Channel("channel task ended".to_string()))?;
        Ok(())
    }

    pub async fn send(&self, frame: OutboundFrame) -> Result<(), RecorderError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RecorderError::Channel("channel task ended".to_string()))
    }

    /// Full teardown. Stopping a session never calls this.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Owns the websocket on one background task that reconnects forever with a
/// fixed delay and pings on every open.
pub struct ChannelManager;

impl ChannelManager {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(settings: ChannelSettings) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(settings.inbound_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = ChannelWorker {
            settings,
            events: events_tx,
            state: state_tx,
            dropped: Arc::clone(&dropped),
        };
        let task = tokio::spawn(worker.run(outbound_rx, shutdown_rx));

        (
            ChannelHandle {
                state_rx,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
                dropped,
                task,
            },
            events_rx,
        )
    }
}

enum ConnectionEnd {
    Lost(String),
    Shutdown,
}

struct ChannelWorker {
    settings: ChannelSettings,
    events: mpsc::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    dropped: Arc<AtomicU64>,
}

impl ChannelWorker {
    async fn run(
        self,
        mut outbound: mpsc::Receiver<OutboundFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            if !self.publish(ConnectionState::Connecting).await {
                break;
            }
            let connected = tokio::select! {
                result = tokio_tungstenite::connect_async(self.settings.url.as_str()) => result,
                _ = shutdown.changed() => break,
            };
            match connected {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.settings.url, attempt, "channel open");
                    if !self.publish(ConnectionState::Open).await {
                        break;
                    }
                    match self.serve(stream, &mut outbound, &mut shutdown).await {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "channel lost");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(url = %self.settings.url, attempt, error = %err, "channel connect failed");
                }
            }
            if !self.publish(ConnectionState::Closed).await {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        tracing::debug!("channel task finished");
    }

    async fn serve(
        &self,
        stream: WsStream,
        outbound: &mut mpsc::Receiver<OutboundFrame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let (mut sink, mut reader) = stream.split();
        if let Err(err) = sink.send(Message::Text(OutboundFrame::Ping.encode())).await {
            return ConnectionEnd::Lost(format!("initial ping failed: {err}"));
        }
        let mut keepalive = self.settings.keepalive_interval.map(|period| {
            tokio::time::interval_at(Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if !self.forward(&text).await {
                            return ConnectionEnd::Shutdown;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return ConnectionEnd::Lost("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return ConnectionEnd::Lost(err.to_string()),
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = sink.send(Message::Text(frame.encode())).await {
                            return ConnectionEnd::Lost(format!("send failed: {err}"));
                        }
                    }
                    None => return ConnectionEnd::Shutdown,
                },
                _ = tick(&mut keepalive) => {
                    if let Err(err) = sink.send(Message::Text(OutboundFrame::Ping.encode())).await {
                        return ConnectionEnd::Lost(format!("keep-alive failed: {err}"));
                    }
                }
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            }
        }
    }

    /// Returns false once nobody is listening for events.
    async fn forward(&self, text: &str) -> bool {
        let raw = match serde_json::from_str::<Value>(text) {
            Ok(raw) => raw,
            Err(err) => {
                self.drop_frame(&RecorderError::Channel(format!("malformed frame: {err}")));
                return true;
            }
        };
        match map_frame(&raw) {
            Ok(frame) => self.events.send(ChannelEvent::Frame { frame, raw }).await.is_ok(),
            Err(err) => {
                self.drop_frame(&err);
                true
            }
        }
    }

    fn drop_frame(&self, err: &RecorderError) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(dropped, error = %err, "dropping inbound payload");
    }

    async fn publish(&self, next: ConnectionState) -> bool {
        let previous = self.state.send_replace(next);
        if previous == next {
            return true;
        }
        self.events.send(ChannelEvent::Connection(next)).await.is_ok()
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelEvent, ChannelManager, ChannelSettings};
    use crate::types::ConnectionState;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_server_reports_connecting_then_closed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let (handle, mut events) = ChannelManager::spawn(ChannelSettings {
            url: format!("ws://127.0.0.1:{port}/ws"),
            reconnect_delay: Duration::from_millis(20),
            keepalive_interval: None,
            inbound_buffer: 8,
        });

        let mut seen = Vec::new();
        while seen.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(ChannelEvent::Connection(state))) => seen.push(state),
                Ok(Some(ChannelEvent::Frame { .. })) => panic!("no frames expected"),
                Ok(None) | Err(_) => break,
            }
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Closed,
                ConnectionState::Connecting
            ]
        );
        assert!(handle.wait_until_open(Duration::from_millis(10)).await.is_err());
        handle.shutdown().await;
    }
}

//! Aster User-Data Stream - Order Push Updates
//!
//! Holds one listen-key WebSocket session. Translates
//! `ORDER_TRADE_UPDATE` frames into `AdapterEvent::Order`, keeps the
//! listen key alive, and reports `AdapterEvent::Disconnected` when the
//! session ends for any reason other than a requested stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::client::AsterClient;
use super::types::{order_update_info, UserStreamEvent};
use crate::ports::exchange::AdapterEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listen keys expire after 60 minutes without a keepalive.
const KEEPALIVE_EVERY: Duration = Duration::from_secs(30 * 60);
/// The venue pings every few minutes; silence beyond this means a dead session.
const STALE_AFTER: Duration = Duration::from_secs(10 * 60);
const HEALTH_CHECK_EVERY: Duration = Duration::from_secs(60);

/// Why a session loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    Lost,
}

/// Open the WebSocket for `listen_key` under `ws_url`.
pub async fn open(ws_url: &str, listen_key: &str) -> Result<WsStream> {
    let url = format!("{}/ws/{listen_key}", ws_url.trim_end_matches('/'));
    let (ws, _) = connect_async(url.as_str())
        .await
        .context("Aster user stream connection failed")?;
    Ok(ws)
}

/// One live user-data session.
pub struct UserStream {
    client: Arc<AsterClient>,
    events_tx: broadcast::Sender<AdapterEvent>,
    connected: Arc<AtomicBool>,
    contract: String,
}

impl UserStream {
    pub fn new(
        client: Arc<AsterClient>,
        events_tx: broadcast::Sender<AdapterEvent>,
        connected: Arc<AtomicBool>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            client,
            events_tx,
            connected,
            contract: contract.into(),
        }
    }

    /// Drive the session until it drops or `stop_rx` fires.
    #[instrument(skip_all, fields(contract = %self.contract))]
    pub async fn run(self, ws: WsStream, stop_rx: oneshot::Receiver<()>) {
        let end = self.session(ws, stop_rx).await;

        self.connected.store(false, Ordering::SeqCst);
        if end == SessionEnd::Lost {
            warn!("Aster user stream lost");
            let _ = self.events_tx.send(AdapterEvent::Disconnected);
        } else {
            info!("Aster user stream stopped");
        }
    }

    async fn session(&self, ws: WsStream, mut stop_rx: oneshot::Receiver<()>) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        let mut keepalive = interval(KEEPALIVE_EVERY);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        let mut health = interval(HEALTH_CHECK_EVERY);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = &mut stop_rx => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = self.client.keepalive_listen_key().await {
                        warn!(error = %e, "Listen key keepalive failed");
                        return SessionEnd::Lost;
                    }
                    debug!("Listen key keepalive successful");
                }
                _ = health.tick() => {
                    if last_frame.elapsed() > STALE_AFTER {
                        warn!(idle_secs = last_frame.elapsed().as_secs(), "No frames received, session unhealthy");
                        return SessionEnd::Lost;
                    }
                }
                msg = read.next() => {
                    last_frame = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_message(&text) {
                                return SessionEnd::Lost;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!(len = data.len(), "Aster ping received");
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Aster user stream closed by venue");
                            return SessionEnd::Lost;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Aster user stream error");
                            return SessionEnd::Lost;
                        }
                        None => return SessionEnd::Lost,
                        _ => {}
                    }
                }
            }
        }
    }

    /// Handle one text frame. Returns `false` when the session must end.
    fn handle_message(&self, text: &str) -> bool {
        let event: UserStreamEvent = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Unparseable user stream frame");
                return true;
            }
        };

        match event {
            UserStreamEvent::OrderTradeUpdate {
                event_time,
                transaction_time,
                order,
            } => {
                if order.symbol != self.contract {
                    return true;
                }
                match order_update_info(event_time, transaction_time, order) {
                    Some(info) => {
                        debug!(order_id = %info.order_id, status = %info.status, filled = %info.filled_size, "Order update pushed");
                        let _ = self.events_tx.send(AdapterEvent::Order(info));
                    }
                    None => debug!("Order update with unrecognized side or status dropped"),
                }
                true
            }
            UserStreamEvent::ListenKeyExpired => {
                warn!("Listen key expired");
                false
            }
            UserStreamEvent::Other => true,
        }
    }
}

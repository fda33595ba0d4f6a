//! Streaming price connection with automatic reconnection
//!
//! One supervisor task owns the socket. It connects, (re)applies the
//! current subscription set, pumps decoded ticks into the event channel
//! and, after any close or error, schedules exactly one reconnect with
//! exponential backoff. `disconnect` cancels the supervisor for good.

mod binance;
mod cryptocompare;
mod provider;

pub use binance::BinanceProvider;
pub use cryptocompare::CryptoCompareProvider;
pub use provider::{provider_for, ProviderMessage, StreamProvider, SubscriptionMode};

use coinfeed_core::traits::PriceStream;
use coinfeed_core::{MarketDataConfig, StreamEvent};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Timing knobs for a stream connection
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub subscribe_retry_delay: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
            subscribe_retry_delay: config.subscribe_retry_delay(),
        }
    }
}

enum Command {
    Resubscribe,
}

/// Handle to a running supervisor
struct Session {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

enum SessionEnd {
    Cancelled,
    /// Subscription change on a provider that needs a fresh connection
    Resubscribe,
    Closed,
    Failed(String),
}

struct Shared {
    provider: Arc<dyn StreamProvider>,
    settings: StreamSettings,
    events: mpsc::UnboundedSender<StreamEvent>,
    state: watch::Sender<ConnectionState>,
    subscriptions: Mutex<Vec<String>>,
    session: Mutex<Option<Session>>,
    subscribe_pending: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Transition owned by a supervisor; a no-op once `disconnect` cancelled it
    fn set_state_unless_cancelled(&self, state: ConnectionState, cancel: &CancellationToken) {
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Publish `Connected` and its status event together, unless cancelled
    fn mark_connected(&self, cancel: &CancellationToken) -> bool {
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            *current = ConnectionState::Connected;
            self.emit(StreamEvent::Status {
                connected: true,
                error: None,
            });
            true
        })
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn current_subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn emit(&self, event: StreamEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    fn send_command(&self, command: Command) -> bool {
        match self.session.lock() {
            Ok(session) => session
                .as_ref()
                .map(|s| s.commands.send(command).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn has_session(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn handle_text(&self, text: &str) {
        match self.provider.decode(text) {
            Ok(ProviderMessage::Price(tick)) => {
                trace!("{} @ {}", tick.symbol, tick.price);
                self.emit(StreamEvent::Tick(tick));
            }
            Ok(ProviderMessage::SubscribeAck) => debug!("Subscription acknowledged"),
            Ok(ProviderMessage::Welcome) => debug!("Provider welcome received"),
            Ok(ProviderMessage::Other) => {}
            Err(e) => debug!("Dropping undecodable frame: {}", e),
        }
    }
}

/// Persistent price stream against one provider
pub struct StreamConnection {
    shared: Arc<Shared>,
}

impl StreamConnection {
    /// Create a disconnected stream. Events arrive on the returned receiver.
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        settings: StreamSettings,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            provider,
            settings,
            events,
            state,
            subscriptions: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            subscribe_pending: AtomicBool::new(false),
        });

        (Self { shared }, rx)
    }

    /// Stream for the provider named in the config
    pub fn from_config(config: &MarketDataConfig) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        Self::new(provider_for(config), StreamSettings::from_config(config))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Watch connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.current_subscriptions()
    }

    /// Start the supervisor. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let Ok(mut session) = self.shared.session.lock() else {
            return;
        };
        if session.is_some() {
            debug!("Stream already running");
            return;
        }

        let cancel = CancellationToken::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            cancel: cancel.clone(),
            commands,
        });
        drop(session);

        self.shared.set_state(ConnectionState::Connecting);
        tokio::spawn(run_supervisor(self.shared.clone(), cancel, command_rx));
    }

    /// Replace the subscription set.
    ///
    /// Applied immediately when connected. While a connection is being
    /// established a single retry is scheduled after the configured delay;
    /// the supervisor also applies the latest set on every (re)connect.
    pub fn subscribe(&self, symbols: Vec<String>) {
        let mut normalized: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() && !normalized.contains(&symbol) {
                normalized.push(symbol);
            }
        }

        if let Ok(mut subs) = self.shared.subscriptions.lock() {
            *subs = normalized;
        }

        if self.shared.current_state() == ConnectionState::Connected {
            self.shared.send_command(Command::Resubscribe);
        } else if self.shared.has_session() {
            self.schedule_subscribe_retry();
        }
    }

    fn schedule_subscribe_retry(&self) {
        if self.shared.subscribe_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(shared.settings.subscribe_retry_delay).await;
                if !shared.has_session() {
                    break;
                }
                if shared.current_state() == ConnectionState::Connected {
                    shared.send_command(Command::Resubscribe);
                    break;
                }
            }
            shared.subscribe_pending.store(false, Ordering::SeqCst);
        });
    }

    /// Stop for good. No reconnect is attempted afterwards.
    pub fn disconnect(&self) {
        let session = self.shared.session.lock().ok().and_then(|mut s| s.take());
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        let was_connected = self.shared.current_state() == ConnectionState::Connected;
        self.shared.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.shared.emit(StreamEvent::Status {
                connected: false,
                error: None,
            });
        }
        info!("{} stream disconnected", self.shared.provider.kind());
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl PriceStream for StreamConnection {
    fn connect(&self) {
        StreamConnection::connect(self)
    }

    fn subscribe(&self, symbols: Vec<String>) {
        StreamConnection::subscribe(self, symbols)
    }

    fn disconnect(&self) {
        StreamConnection::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        StreamConnection::is_connected(self)
    }
}

/// `min(base * 2^attempt, max)` plus up to 10% jitter
pub(crate) fn reconnect_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    let delay = base.saturating_mul(factor).min(max);
    let jitter_cap = (delay.as_millis() / 10) as u64;
    let jitter = if jitter_cap > 0 {
        rand::thread_rng().gen_range(0..=jitter_cap)
    } else {
        0
    };
    delay + Duration::from_millis(jitter)
}

async fn run_supervisor(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let kind = shared.provider.kind();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        shared.set_state_unless_cancelled(ConnectionState::Connecting, &cancel);

        let symbols = shared.current_subscriptions();
        let url = shared.provider.connect_url(&symbols);
        info!(provider = %kind, "Connecting to {}", url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let outcome = match connected {
            Ok((socket, _)) => {
                if !shared.mark_connected(&cancel) {
                    break;
                }
                attempt = 0;
                info!(provider = %kind, "Stream connected ({} symbols)", symbols.len());
                run_session(&shared, socket, symbols, &cancel, &mut commands).await
            }
            Err(e) => SessionEnd::Failed(e.to_string()),
        };

        match outcome {
            SessionEnd::Cancelled => break,
            SessionEnd::Resubscribe => {
                debug!(provider = %kind, "Reconnecting to apply new subscriptions");
                continue;
            }
            SessionEnd::Closed => {
                info!(provider = %kind, "Stream closed by peer");
                shared.set_state_unless_cancelled(ConnectionState::Disconnected, &cancel);
                shared.emit(StreamEvent::Status {
                    connected: false,
                    error: None,
                });
            }
            SessionEnd::Failed(err) => {
                warn!(provider = %kind, "Stream error: {}", err);
                shared.set_state_unless_cancelled(ConnectionState::Disconnected, &cancel);
                shared.emit(StreamEvent::Status {
                    connected: false,
                    error: Some(err),
                });
            }
        }

        let delay = reconnect_delay(
            shared.settings.reconnect_delay,
            shared.settings.max_reconnect_delay,
            attempt,
        );
        attempt = attempt.saturating_add(1);
        shared.set_state_unless_cancelled(ConnectionState::Reconnecting, &cancel);
        info!(provider = %kind, "Reconnecting in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(provider = %kind, "Stream supervisor stopped");
}

async fn run_session(
    shared: &Shared,
    socket: Socket,
    symbols: Vec<String>,
    cancel: &CancellationToken,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    let mode = shared.provider.subscription_mode();
    let mut active = symbols;

    if mode == SubscriptionMode::Message {
        if let Some(frame) = shared.provider.subscribe_message(&active) {
            if let Err(e) = write.send(Message::Text(frame)).await {
                return SessionEnd::Failed(e.to_string());
            }
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            command = commands.recv() => match command {
                Some(Command::Resubscribe) => {
                    let desired = shared.current_subscriptions();
                    if desired == active {
                        continue;
                    }
                    match mode {
                        SubscriptionMode::Reconnect => {
                            let _ = write.send(Message::Close(None)).await;
                            return SessionEnd::Resubscribe;
                        }
                        SubscriptionMode::Message => {
                            let frames = [
                                shared.provider.unsubscribe_message(&active),
                                shared.provider.subscribe_message(&desired),
                            ];
                            for frame in frames.into_iter().flatten() {
                                if let Err(e) = write.send(Message::Text(frame)).await {
                                    return SessionEnd::Failed(e.to_string());
                                }
                            }
                            debug!("Subscriptions updated: {:?}", desired);
                            active = desired;
                        }
                    }
                }
                None => return SessionEnd::Cancelled,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
            },
        }
    }
}

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use tungstenite::Message;

use crate::error::Error;
use crate::{ClientMessage, ServerMessage};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

pub trait ChannelHandler: Send + 'static {
    /// Called after every successful open. The returned messages are sent
    /// right away, typically the subscriptions.
    fn on_connect(&mut self) -> Vec<ClientMessage>;

    fn on_message(&mut self, message: ServerMessage);

    /// Called once when the client gives up.
    fn on_error(&mut self, error: Error);

    fn on_state(&mut self, _state: ConnectionState) {}
}

pub struct ClientHandle {
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    outgoing: mpsc::Sender<ClientMessage>,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the client reaches `target`, or right away if it is
    /// already there.
    pub async fn wait_for_state(&mut self, target: ConnectionState) -> ConnectionState {
        let reached = match self.state.wait_for(|state| *state == target).await {
            Ok(state) => Some(*state),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *self.state.borrow())
    }

    /// Queues a message for the live connection. Fails unless `Connected`,
    /// nothing is held back for a later connection.
    pub async fn send(&self, message: ClientMessage) -> Result<(), Error> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(Error::Transport(format!("cannot send while {state:?}")));
        }
        self.outgoing
            .send(message)
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }

    /// Cancels any pending reconnect, closes the live connection and waits
    /// for the client task. Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!("Client task ended abnormally : {err}");
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct ReconnectingClient<H: ChannelHandler> {
    config: ClientConfig,
    handler: H,
    state: watch::Sender<ConnectionState>,
}

enum SessionEnd {
    Closed,
    Shutdown,
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl<H: ChannelHandler> ReconnectingClient<H> {
    /// Spawns the connection task and returns its handle.
    pub fn connect(config: ClientConfig, handler: H) -> ClientHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(16);

        let client = Self {
            config,
            handler,
            state: state_tx,
        };
        let task = tokio::task::spawn(client.run(shutdown_rx, outgoing_rx));

        ClientHandle {
            state: state_rx,
            shutdown: shutdown_tx,
            outgoing: outgoing_tx,
            task: Some(task),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("Client state {:?}", state);
        self.state.send_replace(state);
        self.handler.on_state(state);
    }

    async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut outgoing: mpsc::Receiver<ClientMessage>,
    ) {
        let mut attempts = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let connection = select! {
                _ = cancelled(&mut shutdown) => {
                    self.set_state(ConnectionState::Idle);
                    return;
                }
                res = connect_async(self.config.url.as_str()) => res,
            };

            match connection {
                Ok((stream, _)) => {
                    attempts = 0;
                    // left over from a connection that has since closed
                    while outgoing.try_recv().is_ok() {}
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to {}", self.config.url);

                    match self.session(stream, &mut shutdown, &mut outgoing).await {
                        SessionEnd::Shutdown => {
                            self.set_state(ConnectionState::Idle);
                            return;
                        }
                        SessionEnd::Closed => info!("Connection to {} closed", self.config.url),
                    }
                }
                Err(err) => {
                    warn!("Failed to connect to {} : {}", self.config.url, err);
                }
            }

            self.set_state(ConnectionState::Disconnected);

            if attempts >= self.config.max_reconnect_attempts {
                self.set_state(ConnectionState::Failed);
                self.handler.on_error(Error::ExhaustedRetries(attempts));
                return;
            }
            attempts += 1;
            info!(
                "Reconnecting in {:?} ({}/{})",
                self.config.reconnect_delay, attempts, self.config.max_reconnect_attempts
            );

            select! {
                _ = cancelled(&mut shutdown) => {
                    self.set_state(ConnectionState::Idle);
                    return;
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn session<S>(
        &mut self,
        stream: S,
        shutdown: &mut watch::Receiver<bool>,
        outgoing: &mut mpsc::Receiver<ClientMessage>,
    ) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tungstenite::Error>>
            + futures_util::Sink<Message, Error = tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();

        for message in self.handler.on_connect() {
            if let Err(err) = send(&mut write, &message).await {
                warn!("Failed to send {:?} : {}", message, err);
                return SessionEnd::Closed;
            }
        }

        loop {
            select! {
                _ = cancelled(shutdown) => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                Some(message) = outgoing.recv() => {
                    if let Err(err) = send(&mut write, &message).await {
                        warn!("Failed to send {:?} : {}", message, err);
                        return SessionEnd::Closed;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::de::from_str::<ServerMessage>(text.as_str()) {
                            Ok(message) => self.handler.on_message(message),
                            Err(err) => warn!("Failed to parse message : {}", err),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Server closed : {:?}", frame);
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Stream error : {}", err);
                        return SessionEnd::Closed;
                    }
                    None => return SessionEnd::Closed,
                },
            }
        }
    }
}

async fn send<W>(write: &mut W, message: &ClientMessage) -> Result<(), Error>
where
    W: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::ser::to_string(message).map_err(|err| Error::Transport(err.to_string()))?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| Error::Transport(err.to_string()))
}

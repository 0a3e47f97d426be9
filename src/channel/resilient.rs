//! The [`ResilientChannel`] handle and the task that owns the connection.
//!
//! Every transition happens on one spawned task, driven by a single
//! `select!` over caller commands, credential-store changes, the in-flight
//! connection attempt, inbound frames and the reconnect timer. The handle
//! only sends commands and reads published snapshots.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use super::ChannelConfig;
use super::connector::{Connector, Frame, Link, WsConnector};
use super::handlers::{ChannelHandlers, DisconnectReason};
use super::message::{InboundMessage, Outbox};
use super::state::{
    ChannelStatus, CloseOutcome, ConnectOrigin, ConnectionSnapshot, ConnectionState,
};
use crate::credentials::{CredentialStore, SessionState};
use crate::errors::ChannelError;

/// Upper bound on waiting for the close handshake of a requested disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
    Shutdown,
}

/// Handle to a self-healing duplex channel.
///
/// Connection problems never surface as errors: observe them through
/// [`is_connected`](Self::is_connected), [`snapshot`](Self::snapshot) or the
/// `on_disconnect` handler. Dropping the handle stops the channel task and
/// any pending reconnect.
pub struct ResilientChannel {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    store: Arc<CredentialStore>,
    task: Option<JoinHandle<()>>,
}

impl ResilientChannel {
    /// Spawn the channel task on the current tokio runtime. The channel starts
    /// Idle; nothing is attempted until [`connect`](Self::connect).
    pub fn spawn(
        config: ChannelConfig,
        store: Arc<CredentialStore>,
        connector: Arc<dyn Connector>,
        handlers: ChannelHandlers,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (published, snapshot) =
            watch::channel(ConnectionSnapshot::idle(config.max_reconnect_attempts()));

        let task = ChannelTask {
            state: ConnectionState::new(config.max_reconnect_attempts()),
            session: Some(store.subscribe()),
            store: Arc::clone(&store),
            config,
            connector,
            handlers,
            commands: commands_rx,
            published,
            attempt: None,
            link: None,
            retry: None,
            session_epoch: None,
        };
        let handle = tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            snapshot,
            store,
            task: Some(handle),
        }
    }

    /// Same as [`spawn`](Self::spawn) with the tokio-tungstenite connector.
    pub fn with_websocket(
        config: ChannelConfig,
        store: Arc<CredentialStore>,
        handlers: ChannelHandlers,
    ) -> Self {
        Self::spawn(config, store, Arc::new(WsConnector::default()), handlers)
    }

    /// Start connecting. A no-op while the credential store holds no access
    /// value, and while already Connecting or Open. A pending scheduled retry
    /// is replaced by this attempt and the attempt count starts over.
    pub fn connect(&self) {
        if !self.store.is_authenticated() {
            debug!("Connect skipped: no access value");
            return;
        }
        self.command(Command::Connect);
    }

    /// Close the channel and cancel any scheduled retry. Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Serialize and send `message` if the channel is Open. Otherwise the
    /// message is dropped with a warning and `NotConnected` is returned;
    /// nothing is buffered.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), ChannelError> {
        if !self.is_connected() {
            warn!(status = %self.status(), "Channel not open; outbound message dropped");
            return Err(ChannelError::NotConnected);
        }
        let text =
            serde_json::to_string(message).map_err(|e| ChannelError::Serialize(e.to_string()))?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ChannelError::Shutdown)
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected()
    }

    pub fn status(&self) -> ChannelStatus {
        self.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receive every published snapshot. Intermediate states may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Stop the channel task and wait for it to finish. Closes an open stream
    /// without invoking `on_disconnect`.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Channel task ended abnormally");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Channel task is gone; command ignored");
        }
    }
}

impl Drop for ResilientChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ResilientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientChannel")
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

enum Event {
    Command(Option<Command>),
    Session(bool),
    Attempt(Result<Link, ChannelError>),
    Frame(Option<Result<Frame, ChannelError>>),
    RetryDue,
}

struct ChannelTask {
    config: ChannelConfig,
    store: Arc<CredentialStore>,
    connector: Arc<dyn Connector>,
    handlers: ChannelHandlers,
    state: ConnectionState,
    commands: mpsc::UnboundedReceiver<Command>,
    session: Option<watch::Receiver<SessionState>>,
    published: watch::Sender<ConnectionSnapshot>,
    attempt: Option<BoxFuture<'static, Result<Link, ChannelError>>>,
    link: Option<Link>,
    retry: Option<Pin<Box<Sleep>>>,
    /// Store session epoch at the last caller connect.
    session_epoch: Option<u64>,
}

impl ChannelTask {
    async fn run(mut self) {
        debug!(endpoint = %self.config.endpoint(), "Channel task started");
        loop {
            match self.next_event().await {
                Event::Command(Some(Command::Connect)) => self.connect(ConnectOrigin::Caller),
                Event::Command(Some(Command::Disconnect)) => {
                    self.disconnect(DisconnectReason::Requested).await
                }
                Event::Command(Some(Command::Send(text))) => self.transmit(text).await,
                Event::Command(Some(Command::Shutdown)) | Event::Command(None) => break,
                Event::Session(true) => self.session_changed().await,
                Event::Session(false) => self.session = None,
                Event::Attempt(result) => self.attempt_finished(result).await,
                Event::Frame(frame) => self.frame(frame),
                Event::RetryDue => {
                    self.retry = None;
                    self.connect(ConnectOrigin::Scheduled);
                }
            }
        }
        self.teardown().await;
        debug!("Channel task stopped");
    }

    async fn next_event(&mut self) -> Event {
        let Self {
            commands,
            session,
            attempt,
            link,
            retry,
            ..
        } = self;

        tokio::select! {
            biased;
            command = commands.recv() => Event::Command(command),
            changed = watch_session(session) => Event::Session(changed),
            result = poll_attempt(attempt) => Event::Attempt(result),
            frame = next_frame(link) => Event::Frame(frame),
            _ = wait_retry(retry) => Event::RetryDue,
        }
    }

    fn connect(&mut self, origin: ConnectOrigin) {
        if origin == ConnectOrigin::Caller && self.retry.take().is_some() {
            debug!("Pending reconnect replaced by caller connect");
        }

        let Some((access, epoch)) = self.store.access_with_epoch() else {
            debug!(?origin, "No access value; staying disconnected");
            self.publish();
            return;
        };
        if origin == ConnectOrigin::Scheduled && self.session_epoch != Some(epoch) {
            info!("Session replaced since the last connect; scheduled reconnect dropped");
            self.publish();
            return;
        }
        if !self.state.begin_connect(origin) {
            debug!(status = %self.state.status(), "Connect ignored");
            return;
        }
        self.session_epoch = Some(epoch);

        info!(
            endpoint = %self.config.endpoint(),
            attempt = self.state.reconnect_count(),
            ?origin,
            "Connecting channel"
        );
        let url = self.config.connection_url(&access);
        let connector = Arc::clone(&self.connector);
        self.attempt = Some(async move { connector.connect(&url).await }.boxed());
        self.publish();
    }

    async fn attempt_finished(&mut self, result: Result<Link, ChannelError>) {
        self.attempt = None;
        match result {
            Ok(link) => {
                if !self.state.opened() {
                    return;
                }
                self.link = Some(link);
                info!(endpoint = %self.config.endpoint(), "Channel open");
                self.publish();

                let mut outbox = Outbox::default();
                self.handlers.connected(&mut outbox);
                for text in outbox.drain() {
                    self.transmit(text).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Channel connection attempt failed");
                self.closed(DisconnectReason::ConnectFailed(e.to_string()));
            }
        }
    }

    fn frame(&mut self, frame: Option<Result<Frame, ChannelError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.inbound(&text),
            Some(Ok(Frame::Close(reason))) => {
                info!(reason = reason.as_deref().unwrap_or(""), "Server closed channel");
                self.closed(DisconnectReason::ServerClosed(reason));
            }
            Some(Err(e)) => {
                warn!(error = %e, "Channel stream failed");
                self.closed(DisconnectReason::StreamError(e.to_string()));
            }
            None => {
                info!("Channel stream ended");
                self.closed(DisconnectReason::ServerClosed(None));
            }
        }
    }

    fn inbound(&mut self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                if !self.handlers.dispatch(&message) {
                    debug!(message_type = message.message_type(), "No handler; message ignored");
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed channel message");
                self.handlers.error(&e);
            }
        }
    }

    /// The single close path for failures and requested closes alike.
    fn closed(&mut self, reason: DisconnectReason) {
        if !matches!(
            self.state.status(),
            ChannelStatus::Connecting | ChannelStatus::Open | ChannelStatus::Closing
        ) {
            return;
        }
        self.link = None;
        self.attempt = None;

        match self.state.closed(reason.error_text()) {
            CloseOutcome::Retry { attempt } => {
                info!(
                    attempt,
                    max = self.config.max_reconnect_attempts(),
                    delay_ms = self.config.reconnect_delay().as_millis() as u64,
                    "Scheduling channel reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(self.config.reconnect_delay())));
            }
            CloseOutcome::Exhausted => {
                warn!(
                    attempts = self.config.max_reconnect_attempts(),
                    "Reconnect attempts exhausted; channel stays closed"
                );
            }
            CloseOutcome::Stopped => debug!(%reason, "Channel closed"),
        }

        self.publish();
        self.handlers.disconnected(&reason);
    }

    async fn disconnect(&mut self, reason: DisconnectReason) {
        let cancelled_retry = self.retry.take().is_some();
        if !self.state.begin_close() {
            if cancelled_retry {
                debug!("Pending reconnect cancelled");
                self.publish();
            }
            return;
        }
        self.publish();

        self.attempt = None;
        if let Some(mut link) = self.link.take() {
            close_sink(&mut link).await;
        }
        self.closed(reason);
    }

    async fn session_changed(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let state = *session.borrow_and_update();
        let ended = match state {
            SessionState::SignedOut => true,
            // A clear followed by a new pair can arrive as one notification
            SessionState::Authenticated { generation } => match self.session_epoch {
                Some(epoch) if epoch != self.store.session_epoch() => true,
                _ => {
                    // An open stream keeps its original credential until the next reconnect
                    debug!(generation, "Credentials changed");
                    false
                }
            },
        };
        if ended {
            info!("Session ended; closing channel");
            self.session_epoch = None;
            self.disconnect(DisconnectReason::SessionEnded).await;
        }
    }

    async fn transmit(&mut self, text: String) {
        if self.state.status() != ChannelStatus::Open {
            warn!(status = %self.state.status(), "Channel not open; outbound message dropped");
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let result = link.sink.send(text).await;
        if let Err(e) = result {
            warn!(error = %e, "Channel send failed");
            self.closed(DisconnectReason::StreamError(e.to_string()));
        }
    }

    async fn teardown(&mut self) {
        self.retry = None;
        self.attempt = None;
        if let Some(mut link) = self.link.take() {
            close_sink(&mut link).await;
        }
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot(self.retry.is_some());
        self.published.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn close_sink(link: &mut Link) {
    match tokio::time::timeout(CLOSE_TIMEOUT, link.sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error while closing channel stream"),
        Err(_) => debug!("Timed out closing channel stream"),
    }
}

async fn watch_session(session: &mut Option<watch::Receiver<SessionState>>) -> bool {
    match session.as_mut() {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn poll_attempt(
    attempt: &mut Option<BoxFuture<'static, Result<Link, ChannelError>>>,
) -> Result<Link, ChannelError> {
    match attempt.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<Result<Frame, ChannelError>> {
    match link.as_mut() {
        Some(link) => link.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

use std::collections::HashMap;

use super::message::{InboundMessage, Outbox};
use crate::errors::ChannelError;

type Route = Box<dyn Fn(&InboundMessage) + Send + Sync>;
type ConnectHook = Box<dyn Fn(&mut Outbox) + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&DisconnectReason) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&ChannelError) + Send + Sync>;

/// Why a channel left the Open/Connecting states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller called `disconnect()`.
    Requested,
    /// The credential store was cleared.
    SessionEnded,
    /// The connection attempt never opened.
    ConnectFailed(String),
    /// The server sent a close frame or ended the stream.
    ServerClosed(Option<String>),
    /// The stream failed while open.
    StreamError(String),
}

impl DisconnectReason {
    pub fn is_requested(&self) -> bool {
        matches!(
            self,
            DisconnectReason::Requested | DisconnectReason::SessionEnded
        )
    }

    pub(crate) fn error_text(&self) -> Option<String> {
        match self {
            DisconnectReason::Requested | DisconnectReason::SessionEnded => None,
            DisconnectReason::ConnectFailed(e) | DisconnectReason::StreamError(e) => {
                Some(e.clone())
            }
            DisconnectReason::ServerClosed(reason) => Some(match reason {
                Some(reason) => format!("server closed the connection: {reason}"),
                None => "server closed the connection".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::SessionEnded => write!(f, "session ended"),
            DisconnectReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            DisconnectReason::ServerClosed(Some(reason)) => write!(f, "server closed: {reason}"),
            DisconnectReason::ServerClosed(None) => write!(f, "server closed"),
            DisconnectReason::StreamError(e) => write!(f, "stream error: {e}"),
        }
    }
}

/// Caller callbacks, registered once when the channel is built.
///
/// Inbound messages are routed by their `type`; a type without a route is
/// ignored. All callbacks run on the channel's own task, in stream order, and
/// must not block.
#[derive(Default)]
pub struct ChannelHandlers {
    routes: HashMap<String, Route>,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    on_error: Option<ErrorHook>,
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages whose `type` equals `message_type`. A later
    /// registration for the same type replaces the earlier one.
    pub fn on(
        mut self,
        message_type: impl Into<String>,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Self {
        self.routes.insert(message_type.into(), Box::new(handler));
        self
    }

    /// Called after every transition to Open. Messages pushed into the outbox
    /// are sent right after the hook returns.
    pub fn on_connect(mut self, hook: impl Fn(&mut Outbox) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Called after every transition to Closed.
    pub fn on_disconnect(
        mut self,
        hook: impl Fn(&DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Called for conditions that do not close the channel, such as a
    /// malformed inbound message.
    pub fn on_error(mut self, hook: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Returns `false` when no route matched.
    pub(crate) fn dispatch(&self, message: &InboundMessage) -> bool {
        match self.routes.get(message.message_type()) {
            Some(route) => {
                route(message);
                true
            }
            None => false,
        }
    }

    pub(crate) fn connected(&self, outbox: &mut Outbox) {
        if let Some(hook) = &self.on_connect {
            hook(outbox);
        }
    }

    pub(crate) fn disconnected(&self, reason: &DisconnectReason) {
        if let Some(hook) = &self.on_disconnect {
            hook(reason);
        }
    }

    pub(crate) fn error(&self, error: &ChannelError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl std::fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<&str> = self.routes().collect();
        routes.sort_unstable();
        f.debug_struct("ChannelHandlers")
            .field("routes", &routes)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_routes_by_type() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handlers = ChannelHandlers::new().on("dm_sent", move |msg| {
            sink.lock()
                .unwrap()
                .push(msg.payload()["recipient"].as_str().unwrap().to_string());
        });

        assert!(handlers.dispatch(&InboundMessage::new("dm_sent", json!({"recipient": "ana"}))));
        assert!(!handlers.dispatch(&InboundMessage::new("stats_update", json!({}))));
        assert_eq!(*seen.lock().unwrap(), vec!["ana".to_string()]);
    }

    #[test]
    fn test_later_route_replaces_earlier() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&hits), Arc::clone(&hits));
        let handlers = ChannelHandlers::new()
            .on("error", move |_| a.lock().unwrap().push("first"))
            .on("error", move |_| b.lock().unwrap().push("second"));

        handlers.dispatch(&InboundMessage::new("error", json!({})));
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_hooks_are_optional() {
        let handlers = ChannelHandlers::new();
        let mut outbox = Outbox::default();
        handlers.connected(&mut outbox);
        handlers.disconnected(&DisconnectReason::Requested);
        handlers.error(&ChannelError::NotConnected);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_disconnect_reason_error_text() {
        assert!(DisconnectReason::Requested.error_text().is_none());
        assert!(DisconnectReason::SessionEnded.is_requested());
        assert_eq!(
            DisconnectReason::ConnectFailed("refused".into()).error_text().as_deref(),
            Some("refused")
        );
        assert!(
            DisconnectReason::ServerClosed(Some("1008 bad token".into()))
                .error_text()
                .unwrap()
                .contains("1008")
        );
    }

    #[test]
    fn test_debug_lists_routes() {
        let handlers = ChannelHandlers::new()
            .on("b", |_| {})
            .on("a", |_| {})
            .on_connect(|_| {});
        let rendered = format!("{:?}", handlers);
        assert!(rendered.contains(r#"["a", "b"]"#));
        assert!(rendered.contains("on_connect: true"));
    }
}

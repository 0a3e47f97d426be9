//! Vocabulary of the automation dashboard's realtime endpoints.
//!
//! The channel core routes by the raw `type` string; this module gives those
//! messages names and shapes for callers that want them.

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::channel::{
    ChannelConfig, ChannelHandlers, Connector, InboundMessage, ResilientChannel,
};
use crate::credentials::CredentialStore;
use crate::errors::ChannelError;

/// Every inbound `type` the dashboard server emits.
pub const EVENT_TYPES: [&str; 6] = [
    "automations_list",
    "automation_updated",
    "automation_triggered",
    "dm_sent",
    "stats_update",
    "error",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEndpoint {
    /// `ws/automations/`
    Automations,
    /// `ws/automations/<id>/`
    Automation(String),
    /// `ws/dashboard/`, periodic statistics
    Dashboard,
}

impl DashboardEndpoint {
    pub fn path(&self) -> String {
        match self {
            DashboardEndpoint::Automations => "ws/automations/".to_string(),
            DashboardEndpoint::Automation(id) => format!("ws/automations/{}/", id),
            DashboardEndpoint::Dashboard => "ws/dashboard/".to_string(),
        }
    }

    /// Resolve against the WebSocket base, e.g. `ws://localhost:8000/`.
    pub fn url(&self, ws_base: &str) -> Result<Url, ChannelError> {
        let invalid = |message: String| ChannelError::InvalidEndpoint {
            endpoint: ws_base.to_string(),
            message,
        };
        let mut base = Url::parse(ws_base).map_err(|e| invalid(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&self.path()).map_err(|e| invalid(e.to_string()))
    }

    pub fn channel_config(&self, ws_base: &str) -> Result<ChannelConfig, ChannelError> {
        ChannelConfig::from_url(self.url(ws_base)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_automations: u64,
    #[serde(default)]
    pub active_automations: u64,
    #[serde(default)]
    pub total_dms_sent: u64,
    #[serde(default)]
    pub total_triggers: u64,
    #[serde(default)]
    pub today_triggers: u64,
}

/// Typed form of an inbound dashboard message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    AutomationsList {
        data: Vec<Value>,
    },
    AutomationUpdated {
        automation_id: String,
        is_active: bool,
    },
    AutomationTriggered {
        automation_id: String,
        #[serde(default)]
        trigger_data: Value,
    },
    DmSent {
        automation_id: String,
        recipient: String,
        status: String,
    },
    StatsUpdate {
        data: DashboardStats,
    },
    Error {
        message: String,
    },
}

impl DashboardEvent {
    pub fn from_message(message: &InboundMessage) -> Result<Self, ChannelError> {
        serde_json::from_value(message.to_value()).map_err(|e| ChannelError::MalformedMessage {
            reason: format!("{} payload: {}", message.message_type(), e),
        })
    }
}

/// Outbound requests understood by the automations endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DashboardAction {
    GetAutomations,
    ToggleAutomation { automation_id: String },
    SubscribeAutomation { automation_id: String },
}

/// Route every dashboard message type to `sink` as a [`DashboardEvent`].
/// Payloads that do not fit their type are logged and dropped.
pub fn route_events(
    handlers: ChannelHandlers,
    sink: impl Fn(DashboardEvent) + Send + Sync + 'static,
) -> ChannelHandlers {
    let sink = Arc::new(sink);
    EVENT_TYPES.iter().fold(handlers, |handlers, kind| {
        let sink = Arc::clone(&sink);
        handlers.on(*kind, move |message| match DashboardEvent::from_message(message) {
            Ok(event) => sink(event),
            Err(e) => warn!(error = %e, "Unexpected dashboard payload"),
        })
    })
}

/// A channel to the automations endpoint that asks for the current list on
/// every open and subscribes to `subscriptions`. Replaces any `on_connect`
/// already set on `handlers`.
pub fn automations_channel(
    config: ChannelConfig,
    store: Arc<CredentialStore>,
    connector: Arc<dyn Connector>,
    handlers: ChannelHandlers,
    subscriptions: Vec<String>,
) -> ResilientChannel {
    let handlers = handlers.on_connect(move |outbox| {
        let mut actions = vec![DashboardAction::GetAutomations];
        actions.extend(subscriptions.iter().map(|id| DashboardAction::SubscribeAutomation {
            automation_id: id.clone(),
        }));
        for action in &actions {
            if let Err(e) = outbox.send(action) {
                warn!(error = %e, "Could not queue dashboard action");
            }
        }
    });
    ResilientChannel::spawn(config, store, connector, handlers)
}

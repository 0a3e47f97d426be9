//! Realtime event stream (`dashlink watch`).

use anyhow::{Context, Result};
use std::sync::Arc;

use dashlink::channel::{
    ChannelHandlers, ChannelStatus, ConnectionSnapshot, InboundMessage, ResilientChannel,
    WsConnector,
};
use dashlink::config::ClientConfig;
use dashlink::dashboard::{self, DashboardEndpoint, DashboardEvent, EVENT_TYPES};
use tracing::warn;

use super::Session;
use crate::WatchTarget;

pub async fn cmd_watch(
    config: &ClientConfig,
    target: WatchTarget,
    automation: Option<String>,
    raw: bool,
) -> Result<()> {
    let session = Session::open(config)?;
    session.require_signed_in()?;

    let endpoint = match (target, &automation) {
        (WatchTarget::Dashboard, _) => DashboardEndpoint::Dashboard,
        (WatchTarget::Automations, Some(id)) => DashboardEndpoint::Automation(id.clone()),
        (WatchTarget::Automations, None) => DashboardEndpoint::Automations,
    };
    let channel_config = config
        .channel_config(&endpoint)
        .context("Invalid channel configuration")?;

    let handlers = if raw {
        EVENT_TYPES
            .iter()
            .fold(ChannelHandlers::new(), |handlers, kind| {
                handlers.on(*kind, |message: &InboundMessage| {
                    println!("{}", message.to_value())
                })
            })
    } else {
        dashboard::route_events(ChannelHandlers::new(), print_event)
    };
    let handlers = handlers
        .on_disconnect(|reason| {
            if !reason.is_requested() {
                eprintln!("{} {}", console::style("disconnected:").yellow(), reason);
            }
        })
        .on_error(|e| eprintln!("{} {}", console::style("warning:").yellow(), e));

    eprintln!(
        "{} {} (Ctrl-C to stop)",
        console::style("Watching").bold(),
        channel_config.endpoint()
    );

    let channel = match endpoint {
        DashboardEndpoint::Dashboard => ResilientChannel::with_websocket(
            channel_config,
            Arc::clone(&session.store),
            handlers,
        ),
        _ => dashboard::automations_channel(
            channel_config,
            Arc::clone(&session.store),
            Arc::new(WsConnector::default()),
            handlers,
            automation.into_iter().collect(),
        ),
    };
    channel.connect();

    let mut updates = channel.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                report(&snapshot);
                if snapshot.is_exhausted() {
                    eprintln!(
                        "{}",
                        console::style("Giving up: reconnect attempts exhausted").red()
                    );
                    break;
                }
                if snapshot.status == ChannelStatus::Closed && snapshot.retry_pending {
                    // Renew an expired access value before the next attempt uses it
                    if let Err(e) = session.auth().profile().await {
                        if e.is_session_expired() {
                            eprintln!("{}", console::style("Session expired; stopping.").red());
                            break;
                        }
                        warn!(error = %e, "Credential check failed");
                    }
                }
                if snapshot.status == ChannelStatus::Closed && !session.store.is_authenticated() {
                    break;
                }
            }
        }
    }

    channel.shutdown().await;
    Ok(())
}

fn report(snapshot: &ConnectionSnapshot) {
    match snapshot.status {
        ChannelStatus::Open => eprintln!("{}", console::style("connected").green()),
        ChannelStatus::Closed if snapshot.retry_pending => eprintln!(
            "{} (attempt {}/{})",
            console::style("reconnecting").yellow(),
            snapshot.reconnect_count,
            snapshot.max_reconnect_attempts
        ),
        _ => {}
    }
}

fn print_event(event: DashboardEvent) {
    match event {
        DashboardEvent::AutomationsList { data } => {
            println!("{} {} automations", console::style("list").cyan(), data.len());
            for automation in &data {
                let name = automation
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(unnamed)");
                let id = automation.get("id").map(|v| v.to_string()).unwrap_or_default();
                let active = automation
                    .get("is_active")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                println!(
                    "  {} {} {}",
                    if active {
                        console::style("●").green()
                    } else {
                        console::style("○").dim()
                    },
                    name,
                    console::style(id).dim()
                );
            }
        }
        DashboardEvent::AutomationUpdated {
            automation_id,
            is_active,
        } => println!(
            "{} {} is now {}",
            console::style("updated").cyan(),
            automation_id,
            if is_active { "active" } else { "paused" }
        ),
        DashboardEvent::AutomationTriggered {
            automation_id,
            trigger_data,
        } => println!(
            "{} {} {}",
            console::style("triggered").magenta(),
            automation_id,
            trigger_data
        ),
        DashboardEvent::DmSent {
            automation_id,
            recipient,
            status,
        } => println!(
            "{} {} -> {} ({})",
            console::style("dm").blue(),
            automation_id,
            recipient,
            status
        ),
        DashboardEvent::StatsUpdate { data } => println!(
            "{} automations {}/{} active, triggers {} ({} today), DMs {}",
            console::style("stats").bold(),
            data.active_automations,
            data.total_automations,
            data.total_triggers,
            data.today_triggers,
            data.total_dms_sent
        ),
        DashboardEvent::Error { message } => {
            eprintln!("{} {}", console::style("server error:").red(), message)
        }
    }
}

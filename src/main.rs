//! sitedesk command line: inspect the dashboard as a given employee.
//!
//! Usage:
//!   sitedesk clients <email>
//!   sitedesk inbox <email>
//!   sitedesk watch <email>
//!   sitedesk checklist <email> <client-id>
//!   sitedesk insights <email>
//!   sitedesk route <email> <path>
//!
//! Config is read from `$SITEDESK_CONFIG` or `~/.sitedesk/config.json`;
//! `RUST_LOG` controls log output.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use sitedesk_lib::checklist;
use sitedesk_lib::error::at_boundary;
use sitedesk_lib::insights;
use sitedesk_lib::notifications::{self, FeedView, NotificationWatcher};
use sitedesk_lib::routing;
use sitedesk_lib::services::employees;
use sitedesk_lib::session::Session;
use sitedesk_lib::state::{load_config, AppState};
use sitedesk_lib::visibility;

const USAGE: &str = "usage: sitedesk <clients|inbox|watch|insights> <email>\n       sitedesk checklist <email> <client-id>\n       sitedesk route <email> <path>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, email) = match (args.first(), args.get(1)) {
        (Some(c), Some(e)) => (c.as_str(), e.as_str()),
        _ => bail!(USAGE),
    };

    let config = load_config().map_err(|e| anyhow!("Failed to load sitedesk config: {e}"))?;
    let state = Arc::new(AppState::new(config).map_err(|e| anyhow!(e))?);

    let session = at_boundary(
        "Sign in",
        employees::sign_in(state.gateway(), &state.session, email).await,
    )
    .map_err(|e| anyhow!(e.message))?;

    match command {
        "clients" => list_clients(&state, &session).await,
        "inbox" => inbox(&state, &session).await,
        "watch" => watch(&state, &session).await,
        "insights" => show_insights(&state, &session).await,
        "checklist" => {
            let client_id = args.get(2).context(USAGE)?;
            show_checklist(&state, &session, client_id).await
        }
        "route" => {
            let path = args.get(2).context(USAGE)?;
            let decision = routing::guard_path(Some(&session), path);
            match decision.redirect_path() {
                Some(to) => println!("{} -> redirect to {}", path, to),
                None => println!("{} -> allowed", path),
            }
            Ok(())
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

async fn list_clients(state: &AppState, session: &Session) -> anyhow::Result<()> {
    let clients = visibility::resolve_visible_clients(state.gateway(), session.effective()).await;
    if clients.is_empty() {
        println!("No ongoing clients.");
    }
    for c in clients {
        println!("{}  {}  ({})  {}", c.id, c.name, c.company, c.status);
    }
    Ok(())
}

async fn inbox(state: &AppState, session: &Session) -> anyhow::Result<()> {
    let rows = at_boundary(
        "Inbox",
        notifications::list_inbox(state.gateway(), session.effective()).await,
    )
    .map_err(|e| anyhow!(e.message))?;
    for n in rows {
        let marker = if n.is_delivered { " " } else { "*" };
        println!(
            "{} {}  {}  {}",
            marker,
            n.scheduled_at.format("%Y-%m-%d %H:%M"),
            n.title,
            n.description
        );
    }
    Ok(())
}

async fn watch(state: &AppState, session: &Session) -> anyhow::Result<()> {
    let watcher = NotificationWatcher::mount(
        state.gateway.clone(),
        FeedView::Inbox,
        &session.effective().id,
        state.poll_interval(),
    )
    .await;
    println!(
        "Watching notifications for {} ({}), Ctrl-C to stop",
        session.effective().id,
        if watcher.has_realtime() { "realtime" } else { "polling" }
    );

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
    let mut last_unread = usize::MAX;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let unread = watcher.unread_count();
                if unread != last_unread {
                    println!("{} unread", unread);
                    for n in watcher.due_now() {
                        println!("  due: {}", n.title);
                    }
                    last_unread = unread;
                }
            }
        }
    }

    watcher.unmount().await;
    Ok(())
}

async fn show_checklist(state: &AppState, session: &Session, client_id: &str) -> anyhow::Result<()> {
    let list = at_boundary(
        "Checklist",
        checklist::load_client_checklist(state.gateway(), session.effective(), client_id).await,
    )
    .map_err(|e| anyhow!(e.message))?;

    println!("{} ({})", list.client.name, list.client.status);
    for (label, since_previous, since_created) in list.rows() {
        println!("  {:<22} {:<28} {}", label, since_previous, since_created);
    }
    Ok(())
}

async fn show_insights(state: &AppState, session: &Session) -> anyhow::Result<()> {
    let data = at_boundary(
        "Insights",
        insights::client_insights(state.gateway(), session.effective()).await,
    )
    .map_err(|e| anyhow!(e.message))?;

    println!("{} clients", data.total);
    for (status, count) in &data.counts {
        println!("  {:<12} {}", status, count);
    }
    for t in &data.time_to_status {
        println!("  time to {:<10} {} ({} clients)", t.status, t.average_label(), t.clients);
    }
    Ok(())
}

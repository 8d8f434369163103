//! Background notification watcher for a mounted view.
//!
//! Owns a poll timer and, when the backend offers one, a realtime
//! subscription. Both feed the same [`NotificationFeed`]; the two are not
//! coordinated and the feed deduplicates by id. Unmounting stops the task
//! and drops the subscription.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::feed::{FeedView, NotificationFeed};
use crate::error::DashboardError;
use crate::gateway::{tables, ChangeEvent, GatewayError, RemoteGateway, Subscription};
use crate::types::Notification;

pub struct NotificationWatcher {
    gateway: Arc<dyn RemoteGateway>,
    feed: Arc<Mutex<NotificationFeed>>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    realtime: bool,
}

impl NotificationWatcher {
    /// Subscribe, then start polling every `poll_interval` (the first poll
    /// runs immediately).
    pub async fn mount(
        gateway: Arc<dyn RemoteGateway>,
        view: FeedView,
        owner_id: &str,
        poll_interval: Duration,
    ) -> Self {
        let feed = NotificationFeed::new(view, owner_id);
        let subscription = match gateway.subscribe(tables::NOTIFICATIONS, feed.filter()).await {
            Ok(sub) => Some(sub),
            Err(GatewayError::RealtimeUnavailable) => {
                log::info!(
                    "Notification watcher: realtime unavailable, polling every {}s",
                    poll_interval.as_secs()
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "Notification watcher: subscribe failed, polling only: {}",
                    e
                );
                None
            }
        };
        let realtime = subscription.is_some();

        let feed = Arc::new(Mutex::new(feed));
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            gateway.clone(),
            feed.clone(),
            shutdown.clone(),
            subscription,
            poll_interval,
        ));

        log::info!(
            "Notification watcher: mounted {:?} for {}",
            view,
            owner_id
        );

        Self {
            gateway,
            feed,
            shutdown,
            task: Some(task),
            realtime,
        }
    }

    /// Whether a realtime subscription was established at mount.
    pub fn has_realtime(&self) -> bool {
        self.realtime
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.feed.lock().items().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.feed.lock().unread_count()
    }

    /// Undelivered notifications whose time has come.
    pub fn due_now(&self) -> Vec<Notification> {
        self.feed.lock().due(Utc::now()).into_iter().cloned().collect()
    }

    /// Poll right away instead of waiting for the next tick.
    pub async fn refresh(&self) -> Result<(), DashboardError> {
        poll_once(self.gateway.as_ref(), &self.feed).await
    }

    /// Stop the task and wait for it to finish.
    pub async fn unmount(mut self) {
        self.feed.lock().unmount();
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Notification watcher: task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for NotificationWatcher {
    fn drop(&mut self) {
        self.feed.lock().unmount();
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    gateway: Arc<dyn RemoteGateway>,
    feed: Arc<Mutex<NotificationFeed>>,
    shutdown: Arc<Notify>,
    mut subscription: Option<Subscription>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                if let Err(e) = poll_once(gateway.as_ref(), &feed).await {
                    log::warn!("Notification watcher: poll failed: {}", e);
                }
                continue;
            }
            event = next_event(&mut subscription) => event,
        };

        match event {
            Some(event) => {
                feed.lock().apply_event(&event);
            }
            None => {
                log::warn!("Notification watcher: realtime feed closed, polling only");
                subscription = None;
            }
        }
    }

    log::info!("Notification watcher: stopped");
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn poll_once(
    gateway: &dyn RemoteGateway,
    feed: &Mutex<NotificationFeed>,
) -> Result<(), DashboardError> {
    let (view, owner_id) = {
        let feed = feed.lock();
        if !feed.is_mounted() {
            return Ok(());
        }
        (feed.view(), feed.owner_id().to_string())
    };
    let rows = super::list(gateway, view, &owner_id).await?;
    feed.lock().apply_snapshot(rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{self, SqliteGateway};
    use crate::notifications::{create_notification, NewNotification, NotificationTarget};
    use crate::types::Principal;
    use crate::types::Role;

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    fn to_self(title: &str) -> NewNotification {
        NewNotification {
            title: title.to_string(),
            description: String::new(),
            scheduled_at: Utc::now(),
            target: NotificationTarget::ToSelf,
        }
    }

    #[tokio::test]
    async fn test_initial_poll_loads_existing_rows() {
        let gw = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let me = Principal::new("e1", Role::Employee);
        create_notification(gw.as_ref(), &me, to_self("Existing"))
            .await
            .unwrap();

        let watcher =
            NotificationWatcher::mount(gw.clone(), FeedView::Inbox, "e1", Duration::from_secs(3600))
                .await;
        assert!(wait_until(|| watcher.snapshot().len() == 1).await);
        assert_eq!(watcher.unread_count(), 1);
        watcher.unmount().await;
    }

    #[tokio::test]
    async fn test_realtime_insert_arrives_without_poll() {
        let gw = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let me = Principal::new("e1", Role::Employee);

        let watcher =
            NotificationWatcher::mount(gw.clone(), FeedView::Inbox, "e1", Duration::from_secs(3600))
                .await;
        assert!(watcher.has_realtime());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watcher.snapshot().is_empty());

        let created = create_notification(gw.as_ref(), &me, to_self("Pushed"))
            .await
            .unwrap();
        assert!(wait_until(|| watcher.snapshot().len() == 1).await);
        assert_eq!(watcher.snapshot()[0].id, created[0].id);

        // A manual poll finds the same row and must not duplicate it.
        watcher.refresh().await.unwrap();
        assert_eq!(watcher.snapshot().len(), 1);

        gw.delete(tables::NOTIFICATIONS, &gateway::Filter::eq("id", created[0].id.as_str()))
            .await
            .unwrap();
        assert!(wait_until(|| watcher.snapshot().is_empty()).await);
        watcher.unmount().await;
    }

    #[tokio::test]
    async fn test_other_recipients_are_not_routed() {
        let gw = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let other = Principal::new("e2", Role::Employee);

        let watcher =
            NotificationWatcher::mount(gw.clone(), FeedView::Inbox, "e1", Duration::from_secs(3600))
                .await;
        create_notification(gw.as_ref(), &other, to_self("Not yours"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watcher.snapshot().is_empty());
        watcher.unmount().await;
    }

    #[tokio::test]
    async fn test_unmount_stops_updates() {
        let gw = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let me = Principal::new("e1", Role::Employee);

        let watcher =
            NotificationWatcher::mount(gw.clone(), FeedView::Inbox, "e1", Duration::from_millis(20))
                .await;
        let feed = watcher.feed.clone();
        watcher.unmount().await;

        create_notification(gw.as_ref(), &me, to_self("Too late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!feed.lock().is_mounted());
        assert!(feed.lock().items().is_empty());
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let gw = Arc::new(SqliteGateway::open_in_memory("s").unwrap());
        let watcher =
            NotificationWatcher::mount(gw.clone(), FeedView::Sent, "head-1", Duration::from_millis(20))
                .await;
        let feed = watcher.feed.clone();
        drop(watcher);
        assert!(!feed.lock().is_mounted());
    }
}

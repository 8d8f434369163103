//! Local notification state for a mounted bell or notification center.
//!
//! Two sources feed it without coordination: periodic snapshots from the
//! poll timer and realtime change events. Rows are keyed by id, so an insert
//! already seen through a snapshot is never duplicated. Once unmounted the
//! feed ignores every update.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::gateway::{self, ChangeEvent, Filter, Row};
use crate::types::Notification;

/// Which side of the notification a view is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedView {
    /// Rows addressed to the owner.
    Inbox,
    /// Rows the owner created.
    Sent,
}

impl FeedView {
    pub fn column(&self) -> &'static str {
        match self {
            FeedView::Inbox => "assigned_to",
            FeedView::Sent => "created_by",
        }
    }

    pub fn filter(&self, owner_id: &str) -> Filter {
        Filter::eq(self.column(), owner_id)
    }

    fn owns(&self, owner_id: &str, n: &Notification) -> bool {
        match self {
            FeedView::Inbox => n.assigned_to == owner_id,
            FeedView::Sent => n.created_by == owner_id,
        }
    }
}

#[derive(Debug)]
pub struct NotificationFeed {
    view: FeedView,
    owner_id: String,
    items: Vec<Notification>,
    mounted: bool,
}

impl NotificationFeed {
    pub fn new(view: FeedView, owner_id: &str) -> Self {
        Self {
            view,
            owner_id: owner_id.to_string(),
            items: Vec::new(),
            mounted: true,
        }
    }

    pub fn view(&self) -> FeedView {
        self.view
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The subscription / query filter for this feed.
    pub fn filter(&self) -> Filter {
        self.view.filter(&self.owner_id)
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Replace local state with a fresh poll result. Returns whether the
    /// feed accepted it.
    pub fn apply_snapshot(&mut self, rows: Vec<Notification>) -> bool {
        if !self.mounted {
            return false;
        }
        let mut rows: Vec<Notification> = rows
            .into_iter()
            .filter(|n| self.view.owns(&self.owner_id, n))
            .collect();
        let mut seen = HashSet::new();
        rows.retain(|n| seen.insert(n.id.clone()));
        sort_newest_first(&mut rows);
        self.items = rows;
        true
    }

    /// Reconcile one realtime event. Returns whether local state changed.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        if !self.mounted {
            return false;
        }
        match event {
            ChangeEvent::Insert { new, .. } | ChangeEvent::Update { new, .. } => {
                match decode(new) {
                    Some(n) if self.view.owns(&self.owner_id, &n) => self.upsert(n),
                    // Reassigned away from this owner.
                    Some(n) => self.remove(&n.id),
                    None => false,
                }
            }
            ChangeEvent::Delete { old, .. } => match old.get("id").and_then(|v| v.as_str()) {
                Some(id) => self.remove(id),
                None => false,
            },
        }
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_delivered).count()
    }

    /// Undelivered rows whose schedule has arrived.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<&Notification> {
        self.items
            .iter()
            .filter(|n| !n.is_delivered && n.scheduled_at <= now)
            .collect()
    }

    /// Stop accepting updates and drop local state.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.items.clear();
    }

    fn upsert(&mut self, n: Notification) -> bool {
        match self.items.iter_mut().find(|x| x.id == n.id) {
            Some(existing) if *existing == n => false,
            Some(existing) => {
                *existing = n;
                sort_newest_first(&mut self.items);
                true
            }
            None => {
                self.items.push(n);
                sort_newest_first(&mut self.items);
                true
            }
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }
}

pub(crate) fn sort_newest_first(rows: &mut [Notification]) {
    rows.sort_by(|a, b| {
        b.scheduled_at
            .cmp(&a.scheduled_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn decode(row: &Row) -> Option<Notification> {
    match gateway::from_row(row.clone()) {
        Ok(n) => Some(n),
        Err(e) => {
            log::warn!("Notification feed: skipping undecodable row: {}", e);
            None
        }
    }
}

//! Pure notification state: the ordered list and its unread counter.
//!
//! All mutations are synchronous and idempotent; the async service owns
//! an instance behind a lock and drives it from feed events and user
//! actions. At every point `unread_count()` equals the number of entries
//! with `read == false`.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::protocol::Notification;

/// How many notifications the initial bulk fetch loads.
pub const INITIAL_FETCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct NotificationStore {
    items: Vec<Notification>,
    unread: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a bulk-fetch result (newest first),
    /// deduplicating by id in case the backend returns the same logical
    /// broadcast row more than once.
    pub fn load(&mut self, rows: Vec<Notification>) {
        self.items.clear();
        for row in rows {
            if !self.contains(&row.id) {
                self.items.push(row);
            }
        }
        self.unread = self.items.iter().filter(|n| !n.read).count();
    }

    /// Apply a feed insert. Duplicates are ignored; new entries are
    /// prepended regardless of timestamp (latest event wins position).
    pub fn apply_insert(&mut self, row: Notification) -> bool {
        if self.contains(&row.id) {
            debug!(id = %row.id, "Ignoring duplicate insert");
            return false;
        }
        if !row.read {
            self.unread += 1;
        }
        self.items.insert(0, row);
        true
    }

    /// Apply a feed update, replacing the entry in place. Updates for
    /// ids outside the local window are ignored, as are events older
    /// than the locally known `updated_at`.
    pub fn apply_update(&mut self, row: Notification) -> bool {
        let Some(existing) = self.items.iter_mut().find(|n| n.id == row.id) else {
            debug!(id = %row.id, "Ignoring update for unknown id");
            return false;
        };
        if let (Some(incoming), Some(local)) = (row.updated_at, existing.updated_at) {
            if incoming < local {
                debug!(id = %row.id, "Ignoring stale update");
                return false;
            }
        }
        match (existing.read, row.read) {
            (false, true) => self.unread -= 1,
            (true, false) => self.unread += 1,
            _ => {}
        }
        *existing = row;
        true
    }

    /// Apply a feed delete (or an optimistic local removal). A no-op for
    /// ids not present.
    pub fn apply_delete(&mut self, id: &str) -> bool {
        let Some(pos) = self.items.iter().position(|n| n.id == id) else {
            return false;
        };
        let removed = self.items.remove(pos);
        if !removed.read {
            self.unread -= 1;
        }
        true
    }

    /// Optimistically mark one entry read, stamping `updated_at` so a
    /// delayed pre-mutation feed event cannot resurrect the unread
    /// state. Returns whether anything changed.
    pub fn mark_read(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.items.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if entry.read {
            return false;
        }
        entry.read = true;
        entry.updated_at = Some(now);
        self.unread -= 1;
        true
    }

    /// Optimistically mark every entry read. Returns how many changed.
    pub fn mark_all_read(&mut self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for entry in self.items.iter_mut().filter(|n| !n.read) {
            entry.read = true;
            entry.updated_at = Some(now);
            changed += 1;
        }
        self.unread = 0;
        changed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn notif(id: &str, read: bool, target: Option<&str>, created_secs: i64) -> Notification {
        Notification {
            id: id.into(),
            title: format!("title {id}"),
            content: format!("content {id}"),
            kind: Default::default(),
            target_user_id: target.map(Into::into),
            read,
            created_at: at(created_secs),
            updated_at: None,
            action_url: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn assert_invariant(store: &NotificationStore) {
        let recomputed = store.notifications().iter().filter(|n| !n.read).count();
        assert_eq!(store.unread_count(), recomputed);
    }

    #[test]
    fn initial_load_counts_unread() {
        // Two broadcast unread rows plus one targeted read row.
        let mut store = NotificationStore::new();
        store.load(vec![
            notif("n1", false, None, 30),
            notif("n2", false, None, 20),
            notif("n3", true, Some("user-1"), 10),
        ]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.unread_count(), 2);
        assert_invariant(&store);
    }

    #[test]
    fn load_deduplicates_by_id() {
        let mut store = NotificationStore::new();
        store.load(vec![
            notif("n1", false, None, 30),
            notif("n1", false, None, 30),
            notif("n2", true, None, 20),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn insert_prepends_and_bumps_unread() {
        let mut store = NotificationStore::new();
        store.load(vec![
            notif("n1", false, None, 30),
            notif("n2", false, None, 20),
            notif("n3", true, Some("user-1"), 10),
        ]);
        // The new row is older than the head but still wins position.
        assert!(store.apply_insert(notif("n4", false, None, 5)));
        assert_eq!(store.len(), 4);
        assert_eq!(store.notifications()[0].id, "n4");
        assert_eq!(store.unread_count(), 3);
        assert_invariant(&store);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut store = NotificationStore::new();
        assert!(store.apply_insert(notif("n1", false, None, 10)));
        assert!(!store.apply_insert(notif("n1", false, None, 10)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn insert_of_read_row_leaves_counter() {
        let mut store = NotificationStore::new();
        assert!(store.apply_insert(notif("n1", true, None, 10)));
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn update_read_transition_decrements() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 10)]);
        let mut updated = notif("n1", true, None, 10);
        updated.title = "edited".into();
        assert!(store.apply_update(updated));
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.get("n1").unwrap().title, "edited");
        assert_invariant(&store);
    }

    #[test]
    fn update_unread_transition_increments() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", true, None, 10)]);
        assert!(store.apply_update(notif("n1", false, None, 10)));
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn update_for_unknown_id_is_ignored() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 10)]);
        assert!(!store.apply_update(notif("n9", true, None, 10)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn stale_update_is_discarded() {
        let mut store = NotificationStore::new();
        let mut local = notif("n1", true, None, 10);
        local.updated_at = Some(at(100));
        store.load(vec![local]);

        let mut stale = notif("n1", false, None, 10);
        stale.updated_at = Some(at(50));
        assert!(!store.apply_update(stale));
        assert!(store.get("n1").unwrap().read);
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn newer_update_applies_over_local_stamp() {
        let mut store = NotificationStore::new();
        let mut local = notif("n1", true, None, 10);
        local.updated_at = Some(at(100));
        store.load(vec![local]);

        let mut fresh = notif("n1", false, None, 10);
        fresh.updated_at = Some(at(200));
        assert!(store.apply_update(fresh));
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn delete_removes_and_adjusts_unread() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 20), notif("n2", true, None, 10)]);
        assert!(store.apply_delete("n1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn delete_of_unknown_id_is_a_noop() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 10)]);
        assert!(!store.apply_delete("n9"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);
    }

    #[test]
    fn mark_read_flips_and_stamps() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 10)]);
        assert!(store.mark_read("n1", at(500)));
        let entry = store.get("n1").unwrap();
        assert!(entry.read);
        assert_eq!(entry.updated_at, Some(at(500)));
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);

        // Already read: nothing to do.
        assert!(!store.mark_read("n1", at(600)));
        assert_eq!(store.get("n1").unwrap().updated_at, Some(at(500)));
    }

    #[test]
    fn optimistic_stamp_shields_against_stale_feed_echo() {
        let mut store = NotificationStore::new();
        store.load(vec![notif("n1", false, None, 10)]);
        store.mark_read("n1", at(500));

        // A delayed feed event from before the mutation must not
        // resurrect the unread state.
        let mut echo = notif("n1", false, None, 10);
        echo.updated_at = Some(at(400));
        assert!(!store.apply_update(echo));
        assert!(store.get("n1").unwrap().read);
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn mark_all_read_zeroes_counter() {
        let mut store = NotificationStore::new();
        store.load(vec![
            notif("n1", false, None, 30),
            notif("n2", false, None, 20),
            notif("n3", true, None, 10),
        ]);
        assert_eq!(store.mark_all_read(at(500)), 2);
        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications().iter().all(|n| n.read));
        assert_invariant(&store);
    }
}

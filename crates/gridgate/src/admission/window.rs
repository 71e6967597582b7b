use std::collections::VecDeque;

use crate::Map;
use crate::common::time::EpochMillis;

/// Drops every timestamp that is older than `lifespan` at `now`.
///
/// The scan starts at the most recent entry; the first expired entry and everything before it
/// are removed. Returns the number of removed entries.
pub fn prune_expired(
    requests: &mut VecDeque<EpochMillis>,
    now: EpochMillis,
    lifespan: u64,
) -> usize {
    match requests
        .iter()
        .rposition(|time| now.saturating_sub(*time) > lifespan)
    {
        Some(index) => {
            requests.drain(..=index);
            index + 1
        }
        None => 0,
    }
}

/// Recently accepted requests of one requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWindow {
    pub ip: String,
    requests: VecDeque<EpochMillis>,
    request_amount: usize,
    last_activity: EpochMillis,
}

impl UserWindow {
    pub fn new(ip: String, now: EpochMillis) -> Self {
        Self {
            ip,
            requests: VecDeque::new(),
            request_amount: 0,
            last_activity: now,
        }
    }

    pub fn request_amount(&self) -> usize {
        self.request_amount
    }

    pub fn requests(&self) -> &VecDeque<EpochMillis> {
        &self.requests
    }

    pub fn prune(&mut self, now: EpochMillis, lifespan: u64) {
        let removed = prune_expired(&mut self.requests, now, lifespan);
        self.request_amount -= removed;
        debug_assert_eq!(self.request_amount, self.requests.len());
    }

    pub fn push(&mut self, time: EpochMillis) {
        self.requests.push_back(time);
        self.request_amount += 1;
        self.last_activity = self.last_activity.max(time);
    }

    pub fn is_inactive(&self, now: EpochMillis, user_lifespan: u64) -> bool {
        now.saturating_sub(self.last_activity) > user_lifespan
    }
}

/// Recently accepted requests of all requesters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalWindow {
    requests: VecDeque<EpochMillis>,
}

impl GlobalWindow {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn prune(&mut self, now: EpochMillis, lifespan: u64) {
        prune_expired(&mut self.requests, now, lifespan);
    }

    pub fn push(&mut self, time: EpochMillis) {
        self.requests.push_back(time);
    }
}

/// Sliding windows of all requesters.
#[derive(Debug, Default)]
pub struct RequestWindows {
    users: Map<String, UserWindow>,
    global: GlobalWindow,
}

impl RequestWindows {
    pub fn user(&self, ip: &str) -> Option<&UserWindow> {
        self.users.get(ip)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn global(&self) -> &GlobalWindow {
        &self.global
    }

    /// Forgets requesters whose last accepted request is older than `user_lifespan`.
    pub fn evict_inactive(&mut self, now: EpochMillis, user_lifespan: u64) {
        let before = self.users.len();
        self.users
            .retain(|_, window| !window.is_inactive(now, user_lifespan));
        let evicted = before - self.users.len();
        if evicted > 0 {
            log::debug!("Evicted {evicted} inactive user window(s)");
        }
    }

    /// Prunes the global window and returns its size.
    pub fn global_load(&mut self, now: EpochMillis, lifespan: u64) -> usize {
        self.global.prune(now, lifespan);
        self.global.len()
    }

    /// Prunes the requester's window and returns its size, `None` for an unknown requester.
    pub fn user_load(&mut self, ip: &str, now: EpochMillis, lifespan: u64) -> Option<usize> {
        self.users.get_mut(ip).map(|window| {
            window.prune(now, lifespan);
            window.request_amount()
        })
    }

    /// Records an accepted request in both the requester's and the global window.
    pub fn record(&mut self, ip: &str, now: EpochMillis) {
        self.users
            .entry(ip.to_string())
            .or_insert_with(|| UserWindow::new(ip.to_string(), now))
            .push(now);
        self.global.push(now);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::{RequestWindows, UserWindow, prune_expired};

    #[test]
    fn prune_drops_expired_prefix() {
        let mut requests = VecDeque::from(vec![0, 1000, 2000, 6000]);
        assert_eq!(prune_expired(&mut requests, 6000, 5000), 1);
        assert_eq!(requests, VecDeque::from(vec![1000, 2000, 6000]));
    }

    #[test]
    fn prune_keeps_boundary_entry() {
        let mut requests = VecDeque::from(vec![1000]);
        assert_eq!(prune_expired(&mut requests, 6000, 5000), 0);
        assert_eq!(prune_expired(&mut requests, 6001, 5000), 1);
        assert!(requests.is_empty());
    }

    #[test]
    fn prune_is_idempotent() {
        let mut window = UserWindow::new("1.2.3.4".to_string(), 0);
        for time in [0, 100, 3000, 4000] {
            window.push(time);
        }
        window.prune(4000, 1000);
        let once = window.clone();
        window.prune(4000, 1000);
        assert_eq!(window, once);
        assert_eq!(window.request_amount(), 2);
        assert_eq!(window.request_amount(), window.requests().len());
    }

    #[test]
    fn prune_with_future_timestamps() {
        let mut requests = VecDeque::from(vec![5000]);
        assert_eq!(prune_expired(&mut requests, 1000, 100), 0);
    }

    #[test]
    fn record_and_load() {
        let mut windows = RequestWindows::default();
        assert_eq!(windows.user_load("a", 0, 1000), None);
        windows.record("a", 0);
        windows.record("a", 500);
        windows.record("b", 600);
        assert_eq!(windows.user_load("a", 1200, 1000), Some(1));
        assert_eq!(windows.global_load(1200, 1000), 2);
    }

    #[test]
    fn evict_inactive_users() {
        let mut windows = RequestWindows::default();
        windows.record("a", 0);
        windows.record("b", 5000);
        windows.evict_inactive(6000, 3000);
        assert!(windows.user("a").is_none());
        assert!(windows.user("b").is_some());
        assert_eq!(windows.user_count(), 1);
    }
}

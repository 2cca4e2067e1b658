use crate::data_structures::UsageEvent;
use std::collections::HashSet;

/// Builds the `message_id:request_id` identity used to drop repeated log lines.
pub fn identity_for(message_id: &str, request_id: &str) -> Option<String> {
    if message_id.is_empty() || request_id.is_empty() {
        return None;
    }

    Some(format!("{}:{}", message_id, request_id))
}

/// Remembers which event identities have already been counted.
///
/// Events without an identity are always accepted. The set only grows for
/// the lifetime of the deduplicator.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_accept(&self, event: &UsageEvent) -> bool {
        match event.identity() {
            Some(identity) => !self.seen.contains(identity),
            None => true,
        }
    }

    pub fn mark_accepted(&mut self, event: &UsageEvent) {
        if let Some(identity) = event.identity() {
            self.seen.insert(identity.to_string());
        }
    }

    /// `should_accept` followed by `mark_accepted`.
    pub fn accept(&mut self, event: &UsageEvent) -> bool {
        match event.identity() {
            Some(identity) => self.seen.insert(identity.to_string()),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// One-shot deduplication: first occurrence wins, order is preserved.
pub fn dedupe(events: Vec<UsageEvent>) -> Vec<UsageEvent> {
    let mut dedup = Deduplicator::new();
    events.into_iter().filter(|e| dedup.accept(e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(identity: Option<&str>) -> UsageEvent {
        let e = UsageEvent::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            "claude-sonnet-4-20250514".to_string(),
            100,
            50,
            0,
            0,
            None,
        );
        match identity {
            Some(id) => e.with_identity(id),
            None => e,
        }
    }

    #[test]
    fn test_identity_requires_both_parts() {
        assert_eq!(identity_for("msg_1", "req_1"), Some("msg_1:req_1".to_string()));
        assert_eq!(identity_for("", "req_1"), None);
        assert_eq!(identity_for("msg_1", ""), None);
    }

    #[test]
    fn test_marked_identity_is_rejected() {
        let mut dedup = Deduplicator::new();
        let e = event(Some("msg_1:req_1"));

        assert!(dedup.should_accept(&e));
        dedup.mark_accepted(&e);
        assert!(!dedup.should_accept(&e));

        // idempotent
        dedup.mark_accepted(&e);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_events_without_identity_always_accepted() {
        let mut dedup = Deduplicator::new();
        let e = event(None);
        assert!(dedup.accept(&e));
        assert!(dedup.accept(&e));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let events = vec![
            event(Some("a:1")),
            event(None),
            event(Some("a:1")),
            event(Some("b:2")),
            event(None),
        ];
        let kept = dedupe(events);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].identity(), Some("a:1"));
        assert_eq!(kept[2].identity(), Some("b:2"));
    }
}

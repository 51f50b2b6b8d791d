// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Duplicate-delivery suppression.
//!
//! A small LRU of recently recorded keys sits in front of the ledger store.
//! Processed events are never deleted, so a cache hit is always correct and
//! a miss simply falls through to the store.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use super::events::WebhookEvent;
use crate::storage::{LedgerDatabase, LedgerResult, ProcessedEvent};

const DEFAULT_CACHE_CAPACITY: usize = 4096;

pub struct IdempotencyGuard {
    db: Arc<LedgerDatabase>,
    recent: Mutex<LruCache<String, ()>>,
}

impl IdempotencyGuard {
    pub fn new(db: Arc<LedgerDatabase>) -> Self {
        Self::with_capacity(db, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(db: Arc<LedgerDatabase>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True if a processed event matches `event_id` (when given) or
    /// `fingerprint`.
    pub fn seen(&self, event_id: Option<&str>, fingerprint: &str) -> LedgerResult<bool> {
        if self.cached(event_id, fingerprint) {
            return Ok(true);
        }
        let found = self.db.find_processed_event(event_id, fingerprint)?.is_some();
        if found {
            self.remember(event_id, fingerprint);
        }
        Ok(found)
    }

    /// Record `event` as processed.
    ///
    /// Losing a race against a concurrent duplicate is not an error; the
    /// return value tells whether this call wrote the record.
    pub fn record(
        &self,
        event: &WebhookEvent,
        customer_id: Option<&str>,
        user_id: Option<&str>,
    ) -> LedgerResult<bool> {
        let record = ProcessedEvent::new(
            event.event_id.clone(),
            event.event_type.clone(),
            customer_id.map(str::to_string),
            user_id.map(str::to_string),
            event.content_fingerprint.clone(),
        );
        let inserted = self.db.record_processed_event(&record)?;
        if !inserted {
            debug!(
                event_id = ?event.event_id,
                event_type = %event.event_type,
                "Processed-event record already present"
            );
        }
        self.remember(event.event_id.as_deref(), &event.content_fingerprint);
        Ok(inserted)
    }

    fn cached(&self, event_id: Option<&str>, fingerprint: &str) -> bool {
        let Ok(mut cache) = self.recent.lock() else {
            return false;
        };
        let by_id = event_id.is_some_and(|id| cache.get(&id_key(id)).is_some());
        by_id || cache.get(&fingerprint_key(fingerprint)).is_some()
    }

    fn remember(&self, event_id: Option<&str>, fingerprint: &str) {
        if let Ok(mut cache) = self.recent.lock() {
            if let Some(id) = event_id {
                cache.put(id_key(id), ());
            }
            cache.put(fingerprint_key(fingerprint), ());
        }
    }
}

fn id_key(event_id: &str) -> String {
    format!("id:{event_id}")
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("fp:{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ledger_db::temp_db;

    fn event(event_id: Option<&str>, body: &str) -> WebhookEvent {
        let envelope = match event_id {
            Some(id) => format!(
                r#"{{"event_id":"{id}","event_type":"customer.updated","event_object":{body}}}"#
            ),
            None => format!(r#"{{"event_type":"customer.updated","event_object":{body}}}"#),
        };
        WebhookEvent::parse(envelope.as_bytes()).unwrap()
    }

    #[test]
    fn recording_n_times_leaves_one_record() {
        let (db, _dir) = temp_db();
        let db = Arc::new(db);
        let guard = IdempotencyGuard::new(db.clone());
        let e = event(Some("wh_1"), r#"{"id":"cust_1"}"#);

        assert!(!guard.seen(e.event_id.as_deref(), &e.content_fingerprint).unwrap());
        let inserted: Vec<bool> = (0..5).map(|_| guard.record(&e, None, None).unwrap()).collect();
        assert_eq!(inserted, vec![true, false, false, false, false]);
        assert_eq!(db.count_processed_events().unwrap(), 1);
        assert!(guard.seen(Some("wh_1"), "unrelated").unwrap());
    }

    #[test]
    fn identical_body_without_event_id_is_seen_by_fingerprint() {
        let (db, _dir) = temp_db();
        let guard = IdempotencyGuard::new(Arc::new(db));
        let first = event(None, r#"{"id":"cust_1","status":"active"}"#);
        guard.record(&first, Some("cust_1"), Some("user-1")).unwrap();

        let replay = event(None, r#"{"status":"active","id":"cust_1"}"#);
        assert!(guard.seen(None, &replay.content_fingerprint).unwrap());

        let different = event(None, r#"{"id":"cust_1","status":"rejected"}"#);
        assert!(!guard.seen(None, &different.content_fingerprint).unwrap());
    }

    #[test]
    fn store_is_consulted_when_cache_is_cold() {
        let (db, _dir) = temp_db();
        let db = Arc::new(db);
        let e = event(Some("wh_2"), r#"{"id":"cust_2"}"#);
        IdempotencyGuard::new(db.clone()).record(&e, None, None).unwrap();

        let fresh = IdempotencyGuard::with_capacity(db, 1);
        assert!(fresh.seen(Some("wh_2"), &e.content_fingerprint).unwrap());
    }

    #[test]
    fn concurrent_records_race_to_a_single_row() {
        let (db, _dir) = temp_db();
        let db = Arc::new(db);
        let guard = Arc::new(IdempotencyGuard::new(db.clone()));
        let e = event(Some("wh_3"), r#"{"id":"cust_3"}"#);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = guard.clone();
                let e = e.clone();
                std::thread::spawn(move || guard.record(&e, None, None).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(db.count_processed_events().unwrap(), 1);
    }
}

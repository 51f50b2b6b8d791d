// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only record of webhook events that have been dispatched.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};

use super::ledger_db::{
    read_index, read_json, LedgerDatabase, LedgerDbError, LedgerResult, EVENT_ID_INDEX,
    FINGERPRINT_INDEX, PROCESSED_EVENTS,
};

/// A webhook event that has already been processed.
///
/// Never updated or deleted; at most one record per `event_id` and per
/// `content_fingerprint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Local record id.
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub content_fingerprint: String,
    pub recorded_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn new(
        event_id: Option<String>,
        event_type: String,
        customer_id: Option<String>,
        user_id: Option<String>,
        content_fingerprint: String,
    ) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            event_id,
            event_type,
            customer_id,
            user_id,
            content_fingerprint,
            recorded_at: Utc::now(),
        }
    }
}

impl LedgerDatabase {
    /// Insert a processed-event record.
    ///
    /// Returns `false` without writing when a record with the same event id
    /// or fingerprint already exists (a concurrent duplicate won the race).
    pub fn record_processed_event(&self, event: &ProcessedEvent) -> LedgerResult<bool> {
        let json = serde_json::to_vec(event)?;
        let result = self.write(|txn| {
            let mut events = txn.open_table(PROCESSED_EVENTS)?;
            let mut by_event_id = txn.open_table(EVENT_ID_INDEX)?;
            let mut by_fingerprint = txn.open_table(FINGERPRINT_INDEX)?;

            if let Some(event_id) = event.event_id.as_deref() {
                if by_event_id.get(event_id)?.is_some() {
                    return Err(LedgerDbError::Conflict(format!("event {event_id}")));
                }
            }
            if by_fingerprint
                .get(event.content_fingerprint.as_str())?
                .is_some()
            {
                return Err(LedgerDbError::Conflict(format!(
                    "fingerprint {}",
                    event.content_fingerprint
                )));
            }

            events.insert(event.record_id.as_str(), json.as_slice())?;
            if let Some(event_id) = event.event_id.as_deref() {
                by_event_id.insert(event_id, event.record_id.as_str())?;
            }
            by_fingerprint.insert(
                event.content_fingerprint.as_str(),
                event.record_id.as_str(),
            )?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(true),
            Err(LedgerDbError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Find a processed event by Provider event id (when given) or by
    /// content fingerprint.
    pub fn find_processed_event(
        &self,
        event_id: Option<&str>,
        fingerprint: &str,
    ) -> LedgerResult<Option<ProcessedEvent>> {
        self.read(|txn| {
            let events = txn.open_table(PROCESSED_EVENTS)?;
            let by_event_id = txn.open_table(EVENT_ID_INDEX)?;
            let by_fingerprint = txn.open_table(FINGERPRINT_INDEX)?;

            let mut record_id = None;
            if let Some(event_id) = event_id {
                record_id = read_index(&by_event_id, event_id)?;
            }
            if record_id.is_none() {
                record_id = read_index(&by_fingerprint, fingerprint)?;
            }

            match record_id {
                Some(record_id) => read_json(&events, &record_id),
                None => Ok(None),
            }
        })
    }

    /// Number of processed-event records.
    pub fn count_processed_events(&self) -> LedgerResult<u64> {
        self.read(|txn| {
            let events = txn.open_table(PROCESSED_EVENTS)?;
            Ok(events.len()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ledger_db::temp_db;

    fn sample(event_id: Option<&str>, fingerprint: &str) -> ProcessedEvent {
        ProcessedEvent::new(
            event_id.map(str::to_string),
            "virtual_account.activity.created".to_string(),
            Some("cust_1".to_string()),
            Some("user-1".to_string()),
            fingerprint.to_string(),
        )
    }

    #[test]
    fn record_and_find_by_event_id_or_fingerprint() {
        let (db, _dir) = temp_db();
        assert!(db.record_processed_event(&sample(Some("evt_1"), "fp1")).unwrap());

        let by_id = db.find_processed_event(Some("evt_1"), "other").unwrap();
        assert_eq!(by_id.unwrap().content_fingerprint, "fp1");

        let by_fp = db.find_processed_event(None, "fp1").unwrap();
        assert_eq!(by_fp.unwrap().event_id.as_deref(), Some("evt_1"));

        assert!(db.find_processed_event(Some("evt_2"), "fp2").unwrap().is_none());
    }

    #[test]
    fn duplicate_event_id_is_ignored() {
        let (db, _dir) = temp_db();
        assert!(db.record_processed_event(&sample(Some("evt_1"), "fp1")).unwrap());
        assert!(!db.record_processed_event(&sample(Some("evt_1"), "fp2")).unwrap());
        assert_eq!(db.count_processed_events().unwrap(), 1);
        // The rejected insert must not leave its fingerprint behind.
        assert!(db.find_processed_event(None, "fp2").unwrap().is_none());
    }

    #[test]
    fn duplicate_fingerprint_is_ignored() {
        let (db, _dir) = temp_db();
        assert!(db.record_processed_event(&sample(None, "fp1")).unwrap());
        assert!(!db.record_processed_event(&sample(Some("evt_9"), "fp1")).unwrap());
        assert_eq!(db.count_processed_events().unwrap(), 1);
    }
}

//! Insertion-ordered record table shared by the built-in providers.

use std::sync::{Arc, Mutex};

use common::{EncryptedRecord, RecordFilter};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Result, StorageError};

/// Records ordered by their sequential id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RecordTable {
    next_id: u64,
    records: Vec<EncryptedRecord>,
}

pub(crate) type SharedTable = Arc<Mutex<RecordTable>>;

/// Current UTC time at whole-second precision.
pub(crate) fn now_utc_seconds() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

fn id_of(record: &EncryptedRecord) -> u64 {
    record.id.unwrap_or_default()
}

impl RecordTable {
    /// Insert when `record.id` is unset, update otherwise; stamps the
    /// timestamps on `record` as well as on the stored copy.
    pub fn save(&mut self, record: &mut EncryptedRecord, now: OffsetDateTime) -> Result<()> {
        match record.id {
            None => {
                if self.position_of_label(&record.label).is_some() {
                    return Err(StorageError::DuplicateLabel(record.label.clone()));
                }
                self.next_id += 1;
                record.id = Some(self.next_id);
                record.created_on = Some(now);
                record.encrypted_on = Some(now);
                self.records.push(record.clone());
            }
            Some(id) => {
                let index = self
                    .records
                    .binary_search_by_key(&id, id_of)
                    .map_err(|_| StorageError::RecordGone(id))?;
                let stored = &mut self.records[index];
                record.created_on = stored.created_on.or(Some(now));
                record.encrypted_on = Some(now);
                *stored = record.clone();
            }
        }
        Ok(())
    }

    pub fn load(&self, label: &str) -> Option<EncryptedRecord> {
        self.position_of_label(label)
            .map(|index| self.records[index].clone())
    }

    pub fn delete(&mut self, label: &str) -> bool {
        match self.position_of_label(label) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn id_of_label(&self, label: &str) -> Option<u64> {
        self.position_of_label(label)
            .map(|index| id_of(&self.records[index]))
    }

    /// First record after `after_id` that passes `filter`.
    pub fn next_match(&self, after_id: u64, filter: &RecordFilter) -> Option<EncryptedRecord> {
        let start = self.records.partition_point(|r| id_of(r) <= after_id);
        self.records[start..]
            .iter()
            .find(|record| filter.matches(record))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    fn position_of_label(&self, label: &str) -> Option<usize> {
        self.records.iter().position(|r| r.label == label)
    }
}

pub(crate) fn lock(table: &SharedTable) -> Result<std::sync::MutexGuard<'_, RecordTable>> {
    table.lock().map_err(|_| StorageError::LockPoisoned)
}

enum Cursor {
    Start(Option<String>),
    After(u64),
    Done,
}

fn advance(
    table: &SharedTable,
    cursor: Cursor,
    filter: &RecordFilter,
) -> Option<(Result<EncryptedRecord>, Cursor)> {
    let guard = match lock(table) {
        Ok(guard) => guard,
        Err(err) => return Some((Err(err), Cursor::Done)),
    };
    let after_id = match cursor {
        Cursor::Done => return None,
        Cursor::After(id) => id,
        Cursor::Start(None) => 0,
        // An unknown cursor label ends the sequence before it starts.
        Cursor::Start(Some(label)) => guard.id_of_label(&label)?,
    };
    let record = guard.next_match(after_id, filter)?;
    let next = Cursor::After(id_of(&record));
    Some((Ok(record), next))
}

/// Lazy enumeration taking the lock once per yielded record.
pub(crate) fn enumerate(table: SharedTable, filter: RecordFilter) -> BoxStream<'static, Result<EncryptedRecord>> {
    let cursor = Cursor::Start(filter.starting_after_label.clone());
    stream::unfold((cursor, table, filter), |(cursor, table, filter)| async move {
        let (item, next) = advance(&table, cursor, &filter)?;
        Some((item, (next, table, filter)))
    })
    .boxed()
}

//! Bounded in-memory history of agent log records.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use super::record::LogRecord;

/// Callback invoked synchronously for every stored log record.
///
/// Runs on the monitor task. A callback that blocks stalls log processing
/// for the agent, and a callback that panics takes the monitor task down
/// with it.
pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Ring buffer holding the most recent log records of one agent process.
///
/// Written by a single monitor task; read concurrently through
/// [`snapshot`](Self::snapshot), which always returns a consistent copy.
pub struct BoundedLogHistory {
    capacity: usize,
    records: RwLock<VecDeque<LogRecord>>,
    callback: RwLock<Option<LogCallback>>,
}

impl BoundedLogHistory {
    /// Create an empty history holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            callback: RwLock::new(None),
        }
    }

    /// Create a history with an observer already registered.
    pub fn with_callback(capacity: usize, callback: Option<LogCallback>) -> Self {
        let history = Self::new(capacity);
        history.set_callback(callback);
        history
    }

    /// Replace (or clear) the observer callback.
    pub fn set_callback(&self, callback: Option<LogCallback>) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Store a record, evicting the oldest one when full, then notify the
    /// observer.
    pub fn append(&self, record: LogRecord) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match callback {
            Some(callback) => {
                self.push(record.clone());
                callback(&record);
            }
            None => self.push(record),
        }
    }

    fn push(&self, record: LogRecord) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Point-in-time copy of the stored records, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for BoundedLogHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedLogHistory")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn record(n: usize) -> LogRecord {
        LogRecord::parse(&format!("lvl=INFO msg=line-{n}"))
    }

    #[test]
    fn test_evicts_oldest_first() {
        let history = BoundedLogHistory::new(5);
        for n in 0..7 {
            history.append(record(n));
        }

        let msgs: Vec<_> = history
            .snapshot()
            .iter()
            .map(|r| r.msg().unwrap().to_string())
            .collect();
        assert_eq!(msgs, vec!["line-2", "line-3", "line-4", "line-5", "line-6"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let history = BoundedLogHistory::new(0);
        assert_eq!(history.capacity(), 1);
        history.append(record(1));
        history.append(record(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.snapshot()[0].msg(), Some("line-2"));
    }

    #[test]
    fn test_callback_sees_every_record_after_storage() {
        let history = Arc::new(BoundedLogHistory::new(2));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        let history_cb = Arc::downgrade(&history);
        history.set_callback(Some(Arc::new(move |r: &LogRecord| {
            let stored = history_cb.upgrade().map(|h| h.snapshot()).unwrap_or_default();
            assert_eq!(stored.last(), Some(r));
            seen_cb.lock().unwrap().push(r.msg().unwrap().to_string());
        })));

        for n in 0..4 {
            history.append(record(n));
        }

        assert_eq!(seen.lock().unwrap().len(), 4);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let history = BoundedLogHistory::new(3);
        history.append(record(1));
        let snapshot = history.snapshot();
        history.append(record(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_clear_callback() {
        let history = BoundedLogHistory::new(3);
        let count = Arc::new(Mutex::new(0));
        let count_cb = Arc::clone(&count);
        history.set_callback(Some(Arc::new(move |_: &LogRecord| *count_cb.lock().unwrap() += 1)));
        history.append(record(1));
        history.set_callback(None);
        history.append(record(2));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}

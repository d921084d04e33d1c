use crate::model::{LogEntry, LogOutcome, LOG_CAPACITY};
use crate::ring::Ring;
use chrono::{DateTime, Local};
use uuid::Uuid;

/// The last `LOG_CAPACITY` check attempts, oldest first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: Ring<LogEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self {
            entries: Ring::new(LOG_CAPACITY),
        }
    }
}

impl ActivityLog {
    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Builds and appends an entry stamped `now`, returning a copy of it.
    pub fn record(
        &mut self,
        monitor_name: &str,
        command: String,
        output: String,
        status: LogOutcome,
        now: DateTime<Local>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: now,
            monitor_name: monitor_name.to_string(),
            command,
            output,
            status,
        };
        self.append(entry.clone());
        entry
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(log: &mut ActivityLog, i: usize) {
        log.record(
            &format!("m{}", i),
            format!("curl -X GET https://m{}.example", i),
            "HTTP/1.1 200 OK".into(),
            LogOutcome::Success,
            Local::now(),
        );
    }

    #[test]
    fn keeps_fifty_most_recent_in_order() {
        let mut log = ActivityLog::default();
        for i in 0..120 {
            record(&mut log, i);
            assert!(log.snapshot().len() <= LOG_CAPACITY);
        }
        let names: Vec<String> = log.snapshot().iter().map(|e| e.monitor_name.clone()).collect();
        let expected: Vec<String> = (70..120).map(|i| format!("m{}", i)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn entry_ids_are_unique() {
        let mut log = ActivityLog::default();
        record(&mut log, 1);
        record(&mut log, 1);
        let ids: Vec<_> = log.snapshot().iter().map(|e| e.id.clone()).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn snapshot_is_stable() {
        let mut log = ActivityLog::default();
        record(&mut log, 1);
        assert_eq!(log.snapshot(), log.snapshot());
    }
}

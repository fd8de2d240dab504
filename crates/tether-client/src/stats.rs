use chrono::{DateTime, Utc};
use serde::Serialize;

/// Running counters of a persistent stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Attempts issued through the transport.
    pub request_count: u64,
    /// Scheduled reconnections that fired.
    pub reconnect_count: u64,
    pub failure_count: u64,
    pub keepalive_expiries: u64,
    pub probe_failures: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub last_data_at: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    pub(crate) fn record_data(&mut self, len: usize) {
        self.chunks_received += 1;
        self.bytes_received += len as u64;
        self.last_data_at = Some(Utc::now());
    }

    /// Time since the last chunk of any attempt.
    pub fn since_last_data(&self) -> Option<chrono::Duration> {
        self.last_data_at.map(|at| Utc::now() - at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_data_accumulates() {
        let mut stats = ConnectionStats::default();
        assert!(stats.since_last_data().is_none());

        stats.record_data(10);
        stats.record_data(5);
        assert_eq!(stats.chunks_received, 2);
        assert_eq!(stats.bytes_received, 15);
        assert!(stats.since_last_data().unwrap() >= chrono::Duration::zero());
    }

    #[test]
    fn serializes_for_reporting() {
        let stats = ConnectionStats { request_count: 3, ..Default::default() };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["request_count"], 3);
        assert!(json["last_data_at"].is_null());
    }
}

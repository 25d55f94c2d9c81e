//! Capture statistics for a tab record

use serde::Serialize;

use super::connection::ConnectionStatus;
use super::tab::TabRecord;

/// Per-connection summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub id: String,
    pub url: String,
    pub status: ConnectionStatus,
    pub message_count: usize,
    pub created_at: i64,
    /// Time since creation (ms)
    pub duration: i64,
}

/// Tab-wide summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStatistics {
    pub total_connections: usize,
    /// Connections currently `open`
    pub active_connections: usize,
    pub total_messages: usize,
    /// Messages per connection, rounded
    pub avg_messages: usize,
    pub connections: Vec<ConnectionStats>,
}

impl TabRecord {
    /// Summarise the record as of `now` (ms since epoch)
    pub fn statistics(&self, now: i64) -> TabStatistics {
        let total_connections = self.connections.len();
        let active_connections = self
            .connections
            .values()
            .filter(|c| c.status == ConnectionStatus::Open)
            .count();
        let total_messages = self.message_count();
        let avg_messages = if total_connections > 0 {
            (total_messages as f64 / total_connections as f64).round() as usize
        } else {
            0
        };

        let mut connections: Vec<ConnectionStats> = self
            .connections
            .values()
            .map(|c| ConnectionStats {
                id: c.id.clone(),
                url: c.url.clone(),
                status: c.status,
                message_count: c.message_count(),
                created_at: c.created_at,
                duration: now.saturating_sub(c.created_at),
            })
            .collect();
        connections.sort_by_key(|c| c.created_at);

        TabStatistics {
            total_connections,
            active_connections,
            total_messages,
            avg_messages,
            connections,
        }
    }
}

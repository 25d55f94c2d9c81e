//! Tab Records
//!
//! The background keeps one record per tab in an arena keyed by tab id.
//! Records are created lazily on the first capture event, replaced
//! wholesale on navigation or `clear`, and deleted when the tab closes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::connection::{Connection, ConnectionStatus, Message};
use crate::protocols::{StreamPayload, TabId};

/// What applying a payload did to a tab record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A connection was (re)created
    Created,
    /// Status moved forward
    StatusChanged(ConnectionStatus),
    /// Status event arrived but the state machine kept the old status
    StatusUnchanged,
    /// A message was appended
    MessageAppended,
    /// The payload names a connection this record does not have
    UnknownConnection,
}

/// Per-tab aggregate: connection id -> connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabRecord {
    pub connections: BTreeMap<String, Connection>,
}

impl TabRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.connections.values().map(Connection::message_count).sum()
    }

    /// Update the data model from one capture event
    pub fn apply(&mut self, payload: &StreamPayload) -> ApplyOutcome {
        match payload {
            StreamPayload::StreamConnection {
                connection_id,
                url,
                frame_url,
                is_iframe,
                source,
                timestamp,
                ..
            } => {
                // ids are fresh per construction; a repeat simply replaces
                let connection = Connection::new(connection_id, url, *source, *timestamp)
                    .with_frame(frame_url.clone(), is_iframe.unwrap_or(false));
                self.connections.insert(connection_id.clone(), connection);
                ApplyOutcome::Created
            }
            StreamPayload::StreamOpen { connection_id, .. } => {
                self.transition(connection_id, ConnectionStatus::Open)
            }
            StreamPayload::StreamError { connection_id, .. } => {
                self.transition(connection_id, ConnectionStatus::Error)
            }
            StreamPayload::StreamClose { connection_id, .. } => {
                self.transition(connection_id, ConnectionStatus::Closed)
            }
            StreamPayload::StreamMessage {
                connection_id,
                message_id,
                event_type,
                data,
                last_event_id,
                timestamp,
            } => match self.connections.get_mut(connection_id) {
                Some(connection) => {
                    connection.push_message(Message {
                        id: *message_id,
                        event_type: event_type.clone(),
                        data: data.clone(),
                        last_event_id: last_event_id.clone(),
                        timestamp: *timestamp,
                    });
                    ApplyOutcome::MessageAppended
                }
                None => ApplyOutcome::UnknownConnection,
            },
        }
    }

    fn transition(&mut self, connection_id: &str, next: ConnectionStatus) -> ApplyOutcome {
        match self.connections.get_mut(connection_id) {
            Some(connection) => {
                if connection.transition_to(next) {
                    ApplyOutcome::StatusChanged(connection.status)
                } else {
                    ApplyOutcome::StatusUnchanged
                }
            }
            None => ApplyOutcome::UnknownConnection,
        }
    }
}

/// Arena of tab records owned by the background
#[derive(Debug, Default)]
pub struct TabArena {
    tabs: HashMap<TabId, TabRecord>,
}

impl TabArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `tab_id`, created empty if absent
    pub fn get_or_create(&mut self, tab_id: TabId) -> &mut TabRecord {
        self.tabs.entry(tab_id).or_default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabRecord> {
        self.tabs.get(&tab_id)
    }

    /// Copy of the current record, empty when the tab has none
    pub fn snapshot(&self, tab_id: TabId) -> TabRecord {
        self.tabs.get(&tab_id).cloned().unwrap_or_default()
    }

    /// Replace the record with an empty one
    pub fn reset(&mut self, tab_id: TabId) {
        self.tabs.insert(tab_id, TabRecord::new());
    }

    pub fn remove(&mut self, tab_id: TabId) -> Option<TabRecord> {
        self.tabs.remove(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::StreamSource;

    fn connect(id: &str) -> StreamPayload {
        StreamPayload::StreamConnection {
            connection_id: id.to_string(),
            url: format!("https://example.com/{}", id),
            frame_url: None,
            is_iframe: None,
            source: StreamSource::Fetch,
            timestamp: 100,
            ready_state: None,
        }
    }

    fn message(id: &str, message_id: u64) -> StreamPayload {
        StreamPayload::StreamMessage {
            connection_id: id.to_string(),
            message_id,
            event_type: "message".to_string(),
            data: format!("data {}", message_id),
            last_event_id: String::new(),
            timestamp: 100 + message_id as i64,
        }
    }

    fn close(id: &str) -> StreamPayload {
        StreamPayload::StreamClose {
            connection_id: id.to_string(),
            timestamp: 999,
        }
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut record = TabRecord::new();
        assert_eq!(record.apply(&connect("c1")), ApplyOutcome::Created);
        assert_eq!(
            record.connection("c1").unwrap().status,
            ConnectionStatus::Connecting
        );

        let open = StreamPayload::StreamOpen {
            connection_id: "c1".to_string(),
            timestamp: 101,
            ready_state: None,
        };
        assert_eq!(
            record.apply(&open),
            ApplyOutcome::StatusChanged(ConnectionStatus::Open)
        );
        assert_eq!(record.apply(&open), ApplyOutcome::StatusUnchanged);
        assert_eq!(
            record.apply(&close("c1")),
            ApplyOutcome::StatusChanged(ConnectionStatus::Closed)
        );
    }

    #[test]
    fn test_terminal_status_sticks() {
        let mut record = TabRecord::new();
        record.apply(&connect("c1"));
        let error = StreamPayload::StreamError {
            connection_id: "c1".to_string(),
            timestamp: 102,
            error: Some("reset".to_string()),
            ready_state: None,
        };
        assert_eq!(
            record.apply(&error),
            ApplyOutcome::StatusChanged(ConnectionStatus::Error)
        );
        assert_eq!(record.apply(&close("c1")), ApplyOutcome::StatusUnchanged);
        assert_eq!(
            record.connection("c1").unwrap().status,
            ConnectionStatus::Error
        );
    }

    #[test]
    fn test_messages_keep_arrival_order() {
        let mut record = TabRecord::new();
        record.apply(&connect("c1"));
        for id in 1..=5 {
            assert_eq!(record.apply(&message("c1", id)), ApplyOutcome::MessageAppended);
        }

        let ids: Vec<u64> = record.connection("c1").unwrap().messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_late_message_after_close_is_kept() {
        let mut record = TabRecord::new();
        record.apply(&connect("c1"));
        record.apply(&close("c1"));
        assert_eq!(record.apply(&message("c1", 1)), ApplyOutcome::MessageAppended);
        assert_eq!(record.message_count(), 1);
    }

    #[test]
    fn test_unknown_connection() {
        let mut record = TabRecord::new();
        assert_eq!(record.apply(&message("ghost", 1)), ApplyOutcome::UnknownConnection);
        assert_eq!(record.apply(&close("ghost")), ApplyOutcome::UnknownConnection);
        assert!(record.is_empty());
    }

    #[test]
    fn test_frame_annotation_applied() {
        let mut record = TabRecord::new();
        record.apply(&StreamPayload::StreamConnection {
            connection_id: "c1".to_string(),
            url: "https://cdn.example.com/sse".to_string(),
            frame_url: Some("https://cdn.example.com/widget".to_string()),
            is_iframe: Some(true),
            source: StreamSource::EventSource,
            timestamp: 1,
            ready_state: None,
        });
        let conn = record.connection("c1").unwrap();
        assert!(conn.is_iframe);
        assert_eq!(conn.frame_url.as_deref(), Some("https://cdn.example.com/widget"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut record = TabRecord::new();
        record.apply(&connect("c1"));
        record.apply(&connect("c2"));
        record.apply(&message("c1", 1));
        record.apply(&message("c2", 1));
        record.apply(&close("c2"));

        let wire = serde_json::to_string(&record).unwrap();
        let restored: TabRecord = serde_json::from_str(&wire).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_arena_lifecycle() {
        let mut arena = TabArena::new();
        assert!(arena.get(1).is_none());
        assert_eq!(arena.snapshot(1), TabRecord::default());
        assert!(arena.is_empty());

        arena.get_or_create(1).apply(&connect("c1"));
        arena.get_or_create(1).apply(&message("c1", 1));
        assert_eq!(arena.get(1).unwrap().message_count(), 1);

        arena.reset(1);
        assert!(arena.get(1).unwrap().is_empty());

        assert!(arena.remove(1).is_some());
        assert!(arena.get(1).is_none());
        assert_eq!(arena.len(), 0);
    }
}

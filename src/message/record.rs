// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::AppResult;

/// Byte range of one record inside its topic's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub start: u64,
    pub length: u64,
}

impl Position {
    /// First byte after this record.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// One published unit of data.
///
/// A record is created once by [`crate::LogPipe::publish`] and never changes afterwards.
/// The payload is opaque to the broker and kept as a generic JSON value. `position`
/// is only filled in by backends that have a real byte layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Record {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Record {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            data,
            position: None,
        }
    }

    /// Serialized form stored in a topic log: one JSON document terminated by `\n`.
    ///
    /// `position` is never written, it describes where the line itself lives.
    pub fn to_log_line(&self) -> AppResult<Bytes> {
        let json = serde_json::to_vec(&LogLine {
            id: &self.id,
            timestamp: &self.timestamp,
            topic: &self.topic,
            data: &self.data,
        })?;
        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_slice(&json);
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    /// Parses one stored line, surrounding whitespace and the trailing newline included.
    pub fn from_log_line(line: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(line.trim_ascii())?)
    }
}

// stored shape of a record
#[derive(Serialize)]
struct LogLine<'a> {
    id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    topic: &'a str,
    data: &'a Value,
}

/// Last acknowledged offset of a `(topic, group, consumer)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub topic: String,
    pub group_id: String,
    pub consumer_id: String,
    pub offset: u64,
}

impl CommitRecord {
    pub fn matches(&self, topic: &str, group_id: &str, consumer_id: &str) -> bool {
        self.topic == topic && self.group_id == group_id && self.consumer_id == consumer_id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn log_line_is_single_line_json() {
        let record = Record::new("orders", json!({"orderId": 123, "note": "a\nb"}));
        let line = record.to_log_line().unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        // position is assigned by the store and never written into the log
        assert!(!line.windows(8).any(|w| w == b"position"));

        let parsed = Record::from_log_line(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn log_line_ignores_assigned_position() {
        let mut record = Record::new("orders", json!({"orderId": 456}));
        let unplaced = record.to_log_line().unwrap();
        record.position = Some(Position {
            start: 131,
            length: unplaced.len() as u64,
        });

        let line = record.to_log_line().unwrap();
        assert_eq!(line, unplaced);
        assert!(!line.windows(8).any(|w| w == b"position"));
        assert_eq!(Record::from_log_line(&line).unwrap().position, None);
    }

    #[test]
    fn commit_record_uses_camel_case_keys() {
        let commit = CommitRecord {
            topic: "orders".to_string(),
            group_id: "group1".to_string(),
            consumer_id: "cons1".to_string(),
            offset: 2,
        };
        let value = serde_json::to_value(&commit).unwrap();
        assert_eq!(
            value,
            json!({"topic": "orders", "groupId": "group1", "consumerId": "cons1", "offset": 2})
        );
        assert!(commit.matches("orders", "group1", "cons1"));
        assert!(!commit.matches("orders", "group1", "cons2"));
    }
}

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

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use super::{validate_topic, LogStore};
use crate::message::{Position, Record};
use crate::AppResult;

/// Volatile [`LogStore`], everything is lost when it is dropped.
///
/// Each topic also keeps the newline-delimited serialization it would have on disk, so
/// `read_message` answers byte ranges the same way the file backend does. Records read
/// back carry no `position`.
#[derive(Debug, Default)]
pub struct MemoryLog {
    topics: RwLock<HashMap<String, MemoryTopic>>,
}

#[derive(Debug, Default)]
struct MemoryTopic {
    records: Vec<Record>,
    bytes: BytesMut,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }
}

#[async_trait]
impl LogStore for MemoryLog {
    async fn append(&self, topic: &str, record: &Record) -> AppResult<Option<Position>> {
        validate_topic(topic)?;
        let line = record.to_log_line()?;
        let mut topics = self.topics.write();
        let memory_topic = topics.entry(topic.to_string()).or_default();
        memory_topic.bytes.extend_from_slice(&line);
        memory_topic.records.push(record.clone());
        Ok(None)
    }

    async fn read(&self, topic: &str, offset: u64, limit: usize) -> AppResult<Vec<Record>> {
        validate_topic(topic)?;
        let topics = self.topics.read();
        let Some(memory_topic) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        Ok(memory_topic
            .records
            .iter()
            .skip(offset.min(usize::MAX as u64) as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn read_message(&self, topic: &str, start: u64, length: u64) -> AppResult<Bytes> {
        validate_topic(topic)?;
        let topics = self.topics.read();
        let Some(memory_topic) = topics.get(topic) else {
            return Ok(Bytes::new());
        };
        let size = memory_topic.bytes.len() as u64;
        if start >= size {
            return Ok(Bytes::new());
        }
        let end = start.saturating_add(length).min(size);
        Ok(Bytes::copy_from_slice(
            &memory_topic.bytes[start as usize..end as usize],
        ))
    }

    async fn length(&self) -> AppResult<u64> {
        Ok(self
            .topics
            .read()
            .values()
            .map(|t| t.records.len() as u64)
            .sum())
    }

    async fn topics(&self) -> AppResult<Vec<String>> {
        let mut topics: Vec<String> = self
            .topics
            .read()
            .iter()
            .filter(|(_, t)| !t.records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn topic_length(&self, topic: &str) -> AppResult<u64> {
        Ok(self
            .topics
            .read()
            .get(topic)
            .map(|t| t.records.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn read_message_slices_serialized_topic() -> AppResult<()> {
        let store = MemoryLog::new();
        let first = Record::new("orders", json!({"orderId": 123}));
        let line = first.to_log_line()?;
        assert_eq!(store.append("orders", &first).await?, None);
        store
            .append("orders", &Record::new("orders", json!({"orderId": 456})))
            .await?;

        let raw = store.read_message("orders", 0, line.len() as u64).await?;
        assert_eq!(raw, line);
        assert!(store.read_message("orders", 10_000, 5).await?.is_empty());
        assert!(store.read_message("ghost", 0, 5).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> AppResult<()> {
        let store = MemoryLog::new();
        store.append("a", &Record::new("a", json!(1))).await?;
        store.append("b", &Record::new("b", json!(2))).await?;
        store.append("a", &Record::new("a", json!(3))).await?;

        let a: Vec<_> = store.read("a", 0, 10).await?.into_iter().map(|r| r.data).collect();
        assert_eq!(a, vec![json!(1), json!(3)]);
        assert_eq!(store.read("a", 1, 10).await?.len(), 1);
        assert_eq!(store.length().await?, 3);
        assert_eq!(store.topic_length("b").await?, 1);
        assert_eq!(store.topics().await?, vec!["a", "b"]);
        Ok(())
    }
}

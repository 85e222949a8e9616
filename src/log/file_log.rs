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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::fs;
use tracing::{info, trace, warn};

use super::{validate_topic, LogStore, TopicLog, LOG_FILE_NAME};
use crate::message::{Position, Record};
use crate::AppResult;

/// File-backed [`LogStore`]: one [`TopicLog`] per topic directory under `base_dir`.
///
/// The `DashMap` only guards adding topics; per-topic ordering is handled by each
/// `TopicLog`, so appends to different topics never wait on each other.
#[derive(Debug)]
pub struct FileLog {
    base_dir: PathBuf,
    topics: DashMap<String, Arc<TopicLog>>,
}

impl FileLog {
    /// Opens the data directory, loading and verifying every topic found in it.
    pub async fn open(base_dir: impl AsRef<Path>) -> AppResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        info!("load topic logs from dir: {}", base_dir.display());

        let topics = DashMap::new();
        let mut dir = fs::read_dir(&base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                trace!("skip non topic entry: {}", entry.path().display());
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_topic(&name).is_err() {
                warn!("invalid topic dir: {}", entry.path().display());
                continue;
            }
            let log = TopicLog::open(&name, entry.path()).await?;
            topics.insert(name, Arc::new(log));
        }
        info!(
            "load {} topic logs from dir: {} finished",
            topics.len(),
            base_dir.display()
        );

        Ok(FileLog { base_dir, topics })
    }

    /// Log of an existing topic, picking up directories created after startup.
    pub async fn topic_log(&self, topic: &str) -> AppResult<Option<Arc<TopicLog>>> {
        validate_topic(topic)?;
        if let Some(log) = self.topics.get(topic) {
            return Ok(Some(log.clone()));
        }
        let dir = self.base_dir.join(topic);
        if fs::metadata(dir.join(LOG_FILE_NAME)).await.is_err() {
            return Ok(None);
        }
        self.register(topic, dir).await.map(Some)
    }

    async fn get_or_create(&self, topic: &str) -> AppResult<Arc<TopicLog>> {
        validate_topic(topic)?;
        if let Some(log) = self.topics.get(topic) {
            return Ok(log.clone());
        }
        info!("creating topic {}", topic);
        self.register(topic, self.base_dir.join(topic)).await
    }

    async fn register(&self, topic: &str, dir: PathBuf) -> AppResult<Arc<TopicLog>> {
        // opened outside the map so no shard lock is held across the await;
        // if two callers race the first insert wins and the other handle is dropped
        let log = Arc::new(TopicLog::open(topic, dir).await?);
        Ok(self
            .topics
            .entry(topic.to_string())
            .or_insert(log)
            .value()
            .clone())
    }
}

#[async_trait]
impl LogStore for FileLog {
    async fn append(&self, topic: &str, record: &Record) -> AppResult<Option<Position>> {
        let log = self.get_or_create(topic).await?;
        let line = record.to_log_line()?;
        let position = log.append(&line).await?;
        Ok(Some(position))
    }

    async fn read(&self, topic: &str, offset: u64, limit: usize) -> AppResult<Vec<Record>> {
        match self.topic_log(topic).await? {
            Some(log) => log.read(offset, limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn read_message(&self, topic: &str, start: u64, length: u64) -> AppResult<Bytes> {
        match self.topic_log(topic).await? {
            Some(log) => log.read_chunk(start, length).await,
            None => Ok(Bytes::new()),
        }
    }

    async fn length(&self) -> AppResult<u64> {
        Ok(self.topics.iter().map(|entry| entry.value().len()).sum())
    }

    async fn topics(&self) -> AppResult<Vec<String>> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn topic_length(&self, topic: &str) -> AppResult<u64> {
        match self.topic_log(topic).await? {
            Some(log) => {
                log.verify_index().await?;
                Ok(log.len())
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::AppError;

    #[tokio::test]
    async fn reopen_recovers_all_topics() -> AppResult<()> {
        let dir = TempDir::new()?;
        {
            let store = FileLog::open(dir.path()).await?;
            for i in 0..5 {
                store
                    .append("orders", &Record::new("orders", json!({"n": i})))
                    .await?;
            }
            store
                .append("payments", &Record::new("payments", json!("p")))
                .await?;
        }
        // a stray file in the data dir is not a topic
        fs::write(dir.path().join("offsets.json"), b"[]").await?;

        let store = FileLog::open(dir.path()).await?;
        assert_eq!(store.topics().await?, vec!["orders", "payments"]);
        assert_eq!(store.length().await?, 6);

        let records = store.read("orders", 0, 5).await?;
        let numbers: Vec<_> = records.iter().map(|r| r.data["n"].clone()).collect();
        assert_eq!(numbers, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_topic_reads_empty_without_creating_it() -> AppResult<()> {
        let dir = TempDir::new()?;
        let store = FileLog::open(dir.path()).await?;

        assert!(store.read("ghost", 0, 10).await?.is_empty());
        assert!(store.read_message("ghost", 0, 10).await?.is_empty());
        assert_eq!(store.topic_length("ghost").await?, 0);
        assert!(fs::metadata(dir.path().join("ghost")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_path_like_topics() -> AppResult<()> {
        let dir = TempDir::new()?;
        let store = FileLog::open(dir.path()).await?;
        let result = store
            .append("../escape", &Record::new("../escape", json!(1)))
            .await;
        assert!(matches!(result, Err(AppError::InvalidTopic(_))));
        Ok(())
    }
}

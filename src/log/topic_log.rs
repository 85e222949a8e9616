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

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::index_file::{log_size, TopicIndex};
use super::{INDEX_FILE_NAME, LOG_FILE_NAME};
use crate::message::{Position, Record};
use crate::{AppError, AppResult};

/// Durable log of a single topic: `<dir>/events.log` plus `<dir>/index.json`.
///
/// `index` mirrors the index file. It only grows after the bytes of a record are on
/// disk, so any position it hands out is readable.
#[derive(Debug)]
pub struct TopicLog {
    topic: String,
    log_path: PathBuf,
    index_path: PathBuf,
    /// Serializes appends and index repairs of this topic.
    append_lock: Mutex<()>,
    index: RwLock<Vec<Position>>,
}

impl TopicLog {
    /// Opens (creating if needed) the directory of `topic` and loads its index,
    /// rebuilding it when it does not match the log.
    pub async fn open(topic: &str, dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let log_path = dir.join(LOG_FILE_NAME);
        let index_path = dir.join(INDEX_FILE_NAME);
        let index = TopicIndex::load_or_rebuild(&index_path, &log_path).await?;
        debug!("topic {} opened with {} records", topic, index.len());

        Ok(TopicLog {
            topic: topic.to_string(),
            log_path,
            index_path,
            append_lock: Mutex::new(()),
            index: RwLock::new(index.into_entries()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of indexed records.
    pub fn len(&self) -> u64 {
        self.index.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn indexed_end(&self) -> u64 {
        self.index.read().last().map(Position::end).unwrap_or(0)
    }

    /// Appends one serialized record and indexes it.
    ///
    /// The start of the new range is taken from the log size, not from a counter.
    pub async fn append(&self, line: &[u8]) -> AppResult<Position> {
        let _guard = self.append_lock.lock().await;

        let mut start = log_size(&self.log_path).await?;
        if start != self.indexed_end() {
            // the log changed behind our back, offsets must be derived from a sound index
            self.reload_index().await?;
            start = log_size(&self.log_path).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line).await?;
        file.flush().await?;
        file.sync_data().await?;

        let position = Position {
            start,
            length: line.len() as u64,
        };
        let entries = {
            let mut index = self.index.write();
            index.push(position);
            index.clone()
        };
        TopicIndex::save_entries(&entries, &self.index_path).await?;
        trace!(
            "topic {} appended offset {} at {:?}",
            self.topic,
            entries.len() - 1,
            position
        );
        Ok(position)
    }

    /// Reads up to `limit` records starting at `offset`, seeking straight to their bytes.
    pub async fn read(&self, offset: u64, limit: usize) -> AppResult<Vec<Record>> {
        self.verify_index().await?;

        let positions: Vec<Position> = {
            let index = self.index.read();
            let len = index.len() as u64;
            if offset >= len || limit == 0 {
                return Ok(Vec::new());
            }
            let end = offset.saturating_add(limit as u64).min(len);
            index[offset as usize..end as usize].to_vec()
        };

        // index ranges are contiguous, so the whole batch is one read
        let first_start = positions[0].start;
        let batch_len = positions[positions.len() - 1].end() - first_start;
        let chunk = self.read_chunk(first_start, batch_len).await?;
        if (chunk.len() as u64) < batch_len {
            return Err(AppError::DetailedIoError(format!(
                "log of topic {} is shorter than its index: wanted {} bytes at {}, got {}",
                self.topic,
                batch_len,
                first_start,
                chunk.len()
            )));
        }

        let mut records = Vec::with_capacity(positions.len());
        for position in positions {
            let from = (position.start - first_start) as usize;
            let to = from + position.length as usize;
            let mut record = Record::from_log_line(&chunk[from..to])?;
            record.position = Some(position);
            records.push(record);
        }
        Ok(records)
    }

    /// Raw bytes of `[start, start + length)`, clamped to the current log size.
    pub async fn read_chunk(&self, start: u64, length: u64) -> AppResult<Bytes> {
        let mut file = match File::open(&self.log_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Bytes::new()),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        if start >= size || length == 0 {
            return Ok(Bytes::new());
        }
        let length = length.min(size - start) as usize;
        let mut buf = BytesMut::zeroed(length);
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    /// Makes sure the index still covers the log exactly before a read.
    ///
    /// The log size is compared with the in-memory index, not with `index.json`. This
    /// process is assumed to be the only writer of the topic directory, so a deleted or
    /// damaged `index.json` goes unnoticed until the next append rewrites it, the log
    /// size drifts, or the topic is reopened.
    ///
    /// Skipped while an append is in flight: the log may already hold bytes the index
    /// does not list yet, and everything the index does list is fully written.
    pub async fn verify_index(&self) -> AppResult<()> {
        let size = log_size(&self.log_path).await?;
        if size == self.indexed_end() {
            return Ok(());
        }
        let Ok(_guard) = self.append_lock.try_lock() else {
            trace!("topic {} append in flight, serving from index", self.topic);
            return Ok(());
        };
        self.reload_index().await
    }

    /// Forces validation of the index against the log, waiting for in-flight appends.
    pub async fn repair_index(&self) -> AppResult<u64> {
        let _guard = self.append_lock.lock().await;
        self.reload_index().await?;
        Ok(self.len())
    }

    /// Caller must hold `append_lock`.
    async fn reload_index(&self) -> AppResult<()> {
        let index = TopicIndex::load_or_rebuild(&self.index_path, &self.log_path).await?;
        *self.index.write() = index.into_entries();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    async fn publish(log: &TopicLog, data: serde_json::Value) -> AppResult<Position> {
        let record = Record::new(log.topic(), data);
        log.append(&record.to_log_line()?).await
    }

    #[tokio::test]
    async fn appended_ranges_are_contiguous() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log = TopicLog::open("orders", dir.path().join("orders")).await?;

        let first = publish(&log, json!({"orderId": 123})).await?;
        let second = publish(&log, json!({"orderId": 456})).await?;

        assert_eq!(first.start, 0);
        assert_eq!(second.start, first.end());
        assert_eq!(log.len(), 2);

        let records = log.read(0, 10).await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, json!({"orderId": 123}));
        assert_eq!(records[1].position, Some(second));
        Ok(())
    }

    #[tokio::test]
    async fn read_past_end_is_empty() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log = TopicLog::open("orders", dir.path().join("orders")).await?;
        publish(&log, json!(1)).await?;

        assert_eq!(log.read(1, 10).await?.len(), 0);
        assert_eq!(log.read(7, 10).await?.len(), 0);
        assert_eq!(log.read(0, 0).await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn read_detects_external_append() -> AppResult<()> {
        let dir = TempDir::new()?;
        let topic_dir = dir.path().join("orders");
        let log = TopicLog::open("orders", &topic_dir).await?;
        publish(&log, json!({"n": 0})).await?;

        // another writer appends a record without touching the index
        let foreign = Record::new("orders", json!({"n": 1}));
        let mut file = OpenOptions::new()
            .append(true)
            .open(topic_dir.join(LOG_FILE_NAME))
            .await?;
        file.write_all(&foreign.to_log_line()?).await?;
        file.flush().await?;

        let records = log.read(0, 10).await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, foreign.id);

        // the next append lands after the foreign record
        let position = publish(&log, json!({"n": 2})).await?;
        assert_eq!(position.start, records[1].position.unwrap().end());
        assert_eq!(log.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn lost_index_file_is_served_from_memory_until_rewritten() -> AppResult<()> {
        let dir = TempDir::new()?;
        let topic_dir = dir.path().join("orders");
        let log = TopicLog::open("orders", &topic_dir).await?;
        publish(&log, json!(0)).await?;
        publish(&log, json!(1)).await?;

        fs::remove_file(topic_dir.join(INDEX_FILE_NAME)).await?;
        // log size still matches the in-memory index, so nothing is noticed
        assert_eq!(log.read(0, 10).await?.len(), 2);
        assert!(fs::metadata(topic_dir.join(INDEX_FILE_NAME)).await.is_err());

        // the next append writes the whole index again
        publish(&log, json!(2)).await?;
        let saved = TopicIndex::load(&topic_dir.join(INDEX_FILE_NAME)).await?.unwrap();
        assert_eq!(saved.len(), 3);

        drop(log);
        let reopened = TopicLog::open("orders", &topic_dir).await?;
        assert_eq!(reopened.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn read_chunk_is_clamped() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log = TopicLog::open("orders", dir.path().join("orders")).await?;
        let position = publish(&log, json!("x")).await?;

        let chunk = log.read_chunk(position.start, position.length + 100).await?;
        assert_eq!(chunk.len() as u64, position.length);
        assert!(log.read_chunk(position.end(), 10).await?.is_empty());
        Ok(())
    }
}

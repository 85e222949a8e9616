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

//! The storage-agnostic façade every front end talks to.

mod stats;

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info};

pub use stats::{
    ConsumerDetail, ConsumerProgress, ConsumerStats, GroupInsights, GroupProgress, GroupStats,
    TopicInsights, TopicStats, TopicSummary, TopicTag,
};

use crate::log::{FileLog, LogStore, MemoryLog};
use crate::message::Record;
use crate::offset::{MemoryOffsets, OffsetFile, OffsetStore};
use crate::service::{GeneralConfig, StorageKind};
use crate::AppResult;

/// Records returned by [`LogPipe::consume`] when the caller does not say how many.
pub const DEFAULT_CONSUME_LIMIT: usize = 100;

/// Stateless composition of one [`LogStore`] and one [`OffsetStore`].
///
/// Cloning is cheap and every clone talks to the same stores.
#[derive(Debug, Clone)]
pub struct LogPipe {
    log_store: Arc<dyn LogStore>,
    offset_store: Arc<dyn OffsetStore>,
}

impl LogPipe {
    pub fn new(log_store: Arc<dyn LogStore>, offset_store: Arc<dyn OffsetStore>) -> Self {
        LogPipe {
            log_store,
            offset_store,
        }
    }

    /// Volatile pipe, nothing survives the process.
    pub fn in_memory() -> Self {
        LogPipe::new(Arc::new(MemoryLog::new()), Arc::new(MemoryOffsets::new()))
    }

    /// Durable pipe rooted at `data_dir`.
    pub async fn open_dir(data_dir: &str) -> AppResult<Self> {
        let log_store = FileLog::open(data_dir).await?;
        let offset_store = OffsetFile::open(data_dir).await?;
        Ok(LogPipe::new(Arc::new(log_store), Arc::new(offset_store)))
    }

    /// Builds the backend selected in the configuration.
    pub async fn open(config: &GeneralConfig) -> AppResult<Self> {
        match config.storage {
            StorageKind::File => {
                info!("using file storage in {}", config.data_dir);
                LogPipe::open_dir(&config.data_dir).await
            }
            StorageKind::Memory => {
                info!("using in-memory storage");
                Ok(LogPipe::in_memory())
            }
        }
    }

    /// Assigns id and timestamp, appends the record and returns it with its position.
    pub async fn publish(&self, topic: &str, data: Value) -> AppResult<Record> {
        let mut record = Record::new(topic, data);
        record.position = self.log_store.append(topic, &record).await?;
        debug!("published {} to topic {}", record.id, topic);
        Ok(record)
    }

    pub async fn consume(&self, topic: &str, offset: u64, limit: usize) -> AppResult<Vec<Record>> {
        self.log_store.read(topic, offset, limit).await
    }

    /// Record count hint of the log store.
    pub async fn offset(&self) -> AppResult<u64> {
        self.log_store.length().await
    }

    pub async fn read_message(&self, topic: &str, start: u64, length: u64) -> AppResult<Bytes> {
        self.log_store.read_message(topic, start, length).await
    }

    pub async fn commit_offset(
        &self,
        topic: &str,
        group_id: &str,
        consumer_id: &str,
        offset: u64,
    ) -> AppResult<()> {
        self.offset_store
            .commit(topic, group_id, consumer_id, offset)
            .await
    }

    pub async fn committed_offset(
        &self,
        topic: &str,
        group_id: &str,
        consumer_id: &str,
    ) -> AppResult<u64> {
        self.offset_store.get(topic, group_id, consumer_id).await
    }

    pub(crate) fn log_store(&self) -> &Arc<dyn LogStore> {
        &self.log_store
    }

    pub(crate) fn offset_store(&self) -> &Arc<dyn OffsetStore> {
        &self.offset_store
    }
}

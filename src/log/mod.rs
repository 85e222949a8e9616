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

//! Log store: per-topic, append-only, offset-addressed record logs.
//!
//! Two backends implement [`LogStore`]:
//! - [`FileLog`]: one directory per topic holding a newline-delimited log file and a
//!   JSON index mapping every offset to its byte range in that file
//! - [`MemoryLog`]: a volatile map of topic to records, for tests and throwaway brokers
//!
//! # Ordering
//!
//! Appends to one topic are serialized, so the n-th successful append always gets offset
//! n-1 and a byte range that starts where the previous one ended. Appends to different
//! topics do not contend with each other.
//!
//! # Recovery
//!
//! The file backend checks the index against the size of the log before serving reads;
//! any drift (torn write, external truncation or append) triggers a rebuild of the index
//! by rescanning the log. See [`TopicIndex`].

mod file_log;
mod index_file;
mod memory_log;
mod topic_log;

use async_trait::async_trait;
use bytes::Bytes;

pub use file_log::FileLog;
pub use index_file::TopicIndex;
pub use memory_log::MemoryLog;
pub use topic_log::TopicLog;

use crate::message::{Position, Record};
use crate::{AppError, AppResult};

// File name constants
pub const LOG_FILE_NAME: &str = "events.log";
pub const INDEX_FILE_NAME: &str = "index.json";

/// Storage contract for topic logs.
#[async_trait]
pub trait LogStore: Send + Sync + std::fmt::Debug {
    /// Appends `record` to `topic`, creating the topic on first use.
    ///
    /// Returns the byte range written, or `None` for backends without a byte layout.
    async fn append(&self, topic: &str, record: &Record) -> AppResult<Option<Position>>;

    /// Up to `limit` records starting at `offset`, in offset order.
    ///
    /// Reading past the end yields fewer records, never an error.
    async fn read(&self, topic: &str, offset: u64, limit: usize) -> AppResult<Vec<Record>>;

    /// Raw bytes of `[start, start + length)` in the topic's log, clamped to its size.
    async fn read_message(&self, topic: &str, start: u64, length: u64) -> AppResult<Bytes>;

    /// Best-effort total record count, a metadata hint only.
    async fn length(&self) -> AppResult<u64>;

    /// Names of all topics holding at least one record.
    async fn topics(&self) -> AppResult<Vec<String>>;

    /// Number of records in `topic`, 0 for unknown topics.
    async fn topic_length(&self, topic: &str) -> AppResult<u64>;
}

/// Rejects names that are empty or cannot be used as a single directory name.
pub fn validate_topic(topic: &str) -> AppResult<()> {
    if topic.trim().is_empty() {
        return Err(AppError::InvalidTopic("topic is required".to_string()));
    }
    if topic == "." || topic == ".." || topic.contains(['/', '\\', '\0']) {
        return Err(AppError::InvalidTopic(format!(
            "topic name '{}' is not allowed",
            topic
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("a\\b")]
    fn rejects_unusable_topic_names(#[case] topic: &str) {
        assert!(matches!(
            validate_topic(topic),
            Err(AppError::InvalidTopic(_))
        ));
    }

    #[rstest]
    #[case("orders")]
    #[case("orders.v2")]
    #[case("user-events_01")]
    fn accepts_plain_topic_names(#[case] topic: &str) {
        assert!(validate_topic(topic).is_ok());
    }
}

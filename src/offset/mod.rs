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

//! Offset store: last committed read offset per `(topic, group, consumer)`.
//!
//! A lookup that finds nothing returns 0, so "never read" and "at the beginning" are the
//! same thing. Commits are plain upserts; a lower offset than the stored one is accepted,
//! which lets a consumer rewind.

mod memory_offsets;
mod offset_file;

use async_trait::async_trait;

pub use memory_offsets::MemoryOffsets;
pub use offset_file::OffsetFile;

use crate::message::CommitRecord;
use crate::AppResult;

pub const OFFSETS_FILE_NAME: &str = "offsets.json";

#[async_trait]
pub trait OffsetStore: Send + Sync + std::fmt::Debug {
    /// Upserts the committed offset of `(topic, group_id, consumer_id)`.
    async fn commit(
        &self,
        topic: &str,
        group_id: &str,
        consumer_id: &str,
        offset: u64,
    ) -> AppResult<()>;

    /// Committed offset of `(topic, group_id, consumer_id)`, 0 when never committed.
    async fn get(&self, topic: &str, group_id: &str, consumer_id: &str) -> AppResult<u64>;

    /// Every commit record currently stored.
    async fn commits(&self) -> AppResult<Vec<CommitRecord>>;
}

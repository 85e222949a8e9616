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
use parking_lot::RwLock;

use super::OffsetStore;
use crate::message::CommitRecord;
use crate::AppResult;

type CommitKey = (String, String, String);

/// Volatile [`OffsetStore`] backed by a map keyed on `(topic, group, consumer)`.
#[derive(Debug, Default)]
pub struct MemoryOffsets {
    offsets: RwLock<HashMap<CommitKey, u64>>,
}

impl MemoryOffsets {
    pub fn new() -> Self {
        MemoryOffsets::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsets {
    async fn commit(
        &self,
        topic: &str,
        group_id: &str,
        consumer_id: &str,
        offset: u64,
    ) -> AppResult<()> {
        self.offsets.write().insert(
            (
                topic.to_string(),
                group_id.to_string(),
                consumer_id.to_string(),
            ),
            offset,
        );
        Ok(())
    }

    async fn get(&self, topic: &str, group_id: &str, consumer_id: &str) -> AppResult<u64> {
        let key = (
            topic.to_string(),
            group_id.to_string(),
            consumer_id.to_string(),
        );
        Ok(self.offsets.read().get(&key).copied().unwrap_or(0))
    }

    async fn commits(&self) -> AppResult<Vec<CommitRecord>> {
        let mut commits: Vec<CommitRecord> = self
            .offsets
            .read()
            .iter()
            .map(|((topic, group_id, consumer_id), offset)| CommitRecord {
                topic: topic.clone(),
                group_id: group_id.clone(),
                consumer_id: consumer_id.clone(),
                offset: *offset,
            })
            .collect();
        // stable order for callers, hash order is not
        commits.sort_by(|a, b| {
            (&a.topic, &a.group_id, &a.consumer_id).cmp(&(&b.topic, &b.group_id, &b.consumer_id))
        });
        Ok(commits)
    }
}

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

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::trace;

use super::{OffsetStore, OFFSETS_FILE_NAME};
use crate::message::CommitRecord;
use crate::AppResult;

/// Durable [`OffsetStore`]: every commit record lives in one JSON array file.
///
/// A commit rewrites the whole file (read, upsert, write temp, rename). Commits are
/// serialized through `write_lock` so concurrent commits to different keys cannot lose
/// each other's update within this process.
#[derive(Debug)]
pub struct OffsetFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OffsetFile {
    /// Offsets file inside `data_dir`, the directory is created if missing.
    pub async fn open(data_dir: impl AsRef<Path>) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).await?;
        Ok(OffsetFile {
            path: data_dir.join(OFFSETS_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> AppResult<Vec<CommitRecord>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&content)?)
    }

    async fn save(&self, commits: &[CommitRecord]) -> AppResult<()> {
        let contents = serde_json::to_vec(commits)?;
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OffsetStore for OffsetFile {
    async fn commit(
        &self,
        topic: &str,
        group_id: &str,
        consumer_id: &str,
        offset: u64,
    ) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut commits = self.load().await?;
        match commits
            .iter_mut()
            .find(|c| c.matches(topic, group_id, consumer_id))
        {
            Some(existing) => existing.offset = offset,
            None => commits.push(CommitRecord {
                topic: topic.to_string(),
                group_id: group_id.to_string(),
                consumer_id: consumer_id.to_string(),
                offset,
            }),
        }
        self.save(&commits).await?;
        trace!(
            "committed offset {} for topic {} group {} consumer {}",
            offset,
            topic,
            group_id,
            consumer_id
        );
        Ok(())
    }

    async fn get(&self, topic: &str, group_id: &str, consumer_id: &str) -> AppResult<u64> {
        let commits = self.load().await?;
        Ok(commits
            .iter()
            .find(|c| c.matches(topic, group_id, consumer_id))
            .map(|c| c.offset)
            .unwrap_or(0))
    }

    async fn commits(&self) -> AppResult<Vec<CommitRecord>> {
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn commits_survive_reopen() -> AppResult<()> {
        let dir = TempDir::new()?;
        {
            let store = OffsetFile::open(dir.path()).await?;
            store.commit("orders", "group1", "cons1", 2).await?;
            store.commit("orders", "group2", "cons2", 1).await?;
            store.commit("orders", "group1", "cons1", 4).await?;
        }
        let store = OffsetFile::open(dir.path()).await?;
        assert_eq!(store.get("orders", "group1", "cons1").await?, 4);
        assert_eq!(store.get("orders", "group2", "cons2").await?, 1);
        assert_eq!(store.commits().await?.len(), 2);

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(store.path()).await?)?;
        assert_eq!(raw[0]["groupId"], "group1");
        assert_eq!(raw[0]["offset"], 4);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_commits_to_different_keys_are_all_kept() -> AppResult<()> {
        let dir = TempDir::new()?;
        let store = Arc::new(OffsetFile::open(dir.path()).await?);

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .commit("orders", "group", &format!("cons{}", i), i)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap()?;
        }

        assert_eq!(store.commits().await?.len(), 16);
        assert_eq!(store.get("orders", "group", "cons7").await?, 7);
        Ok(())
    }
}

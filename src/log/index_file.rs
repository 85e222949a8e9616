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

use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use crate::message::Position;
use crate::AppResult;

/// Offset index of one topic: entry `i` is the byte range of the record at offset `i`.
///
/// On disk this is a JSON array of `{start, length}` objects. A valid index covers its
/// log exactly: the first entry starts at 0, each entry starts where the previous one
/// ends, and the last one ends at the log size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicIndex {
    entries: Vec<Position>,
}

impl TopicIndex {
    pub fn new(entries: Vec<Position>) -> Self {
        TopicIndex { entries }
    }

    pub fn entries(&self) -> &[Position] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Position> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte offset right after the last indexed record.
    pub fn end(&self) -> u64 {
        self.entries.last().map(Position::end).unwrap_or(0)
    }

    /// Checks the index against the actual size of its log.
    pub fn is_consistent(&self, log_size: u64) -> bool {
        let mut expected_start = 0;
        for position in &self.entries {
            if position.start != expected_start || position.length == 0 {
                return false;
            }
            expected_start = position.end();
        }
        expected_start == log_size
    }

    /// Reads the index file, `None` when it is missing or unreadable.
    pub async fn load(index_path: &Path) -> AppResult<Option<TopicIndex>> {
        let content = match fs::read(index_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<TopicIndex>(&content) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                warn!("index file {} is corrupt: {}", index_path.display(), e);
                Ok(None)
            }
        }
    }

    /// Persists the index by writing a sibling temp file and renaming it over the old one.
    pub async fn save(&self, index_path: &Path) -> AppResult<()> {
        Self::save_entries(&self.entries, index_path).await
    }

    pub async fn save_entries(entries: &[Position], index_path: &Path) -> AppResult<()> {
        let json = serde_json::to_vec(entries)?;
        let tmp_path = tmp_path(index_path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(&json).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, index_path).await?;
        Ok(())
    }

    /// Loads the index of a topic, rebuilding it from the log when it does not match.
    pub async fn load_or_rebuild(index_path: &Path, log_path: &Path) -> AppResult<TopicIndex> {
        let log_size = log_size(log_path).await?;
        if let Some(index) = Self::load(index_path).await? {
            if index.is_consistent(log_size) {
                trace!(
                    "index {} verified, {} entries",
                    index_path.display(),
                    index.len()
                );
                return Ok(index);
            }
            warn!(
                "index {} ends at {} but log size is {}, rebuilding",
                index_path.display(),
                index.end(),
                log_size
            );
        } else if log_size > 0 {
            warn!(
                "index {} missing for a non-empty log, rebuilding",
                index_path.display()
            );
        } else {
            return Ok(TopicIndex::default());
        }

        let index = Self::rebuild(log_path).await?;
        index.save(index_path).await?;
        Ok(index)
    }

    /// Index and content of a log as they are on disk, for offline reading.
    ///
    /// Nothing is written: a stale or missing index is replaced by an in-memory scan
    /// and a torn tail is left in place, just outside every entry. A missing log reads
    /// as empty.
    pub async fn snapshot(index_path: &Path, log_path: &Path) -> AppResult<(TopicIndex, Vec<u8>)> {
        let content = match fs::read(log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let index = match Self::load(index_path).await? {
            Some(index) if index.is_consistent(content.len() as u64) => index,
            _ => Self::scan(&content).0,
        };
        Ok((index, content))
    }

    /// Rescans the whole log and derives one entry per record line.
    ///
    /// Bytes after the final newline are a torn write and get truncated from the log.
    pub async fn rebuild(log_path: &Path) -> AppResult<TopicIndex> {
        let content = match fs::read(log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TopicIndex::default()),
            Err(e) => return Err(e.into()),
        };
        let (index, valid_len) = Self::scan(&content);
        if valid_len < content.len() as u64 {
            warn!(
                "truncating {} trailing bytes of {}",
                content.len() as u64 - valid_len,
                log_path.display()
            );
            let file = OpenOptions::new().write(true).open(log_path).await?;
            file.set_len(valid_len).await?;
            file.sync_all().await?;
        }
        Ok(index)
    }

    /// Splits a log into record ranges, returning the index and the number of valid bytes.
    ///
    /// Whitespace-only lines carry no record; they are folded into the range of the
    /// following record (or of the last one at the end of the log) so ranges stay
    /// contiguous.
    pub fn scan(content: &[u8]) -> (TopicIndex, u64) {
        let mut entries: Vec<Position> = Vec::new();
        let mut range_start = 0u64;
        let mut line_start = 0usize;

        for (i, byte) in content.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            let line = &content[line_start..=i];
            line_start = i + 1;
            if line.trim_ascii().is_empty() {
                continue;
            }
            let end = line_start as u64;
            entries.push(Position {
                start: range_start,
                length: end - range_start,
            });
            range_start = end;
        }

        let complete = line_start as u64;
        let valid_len = match entries.last_mut() {
            Some(last) => {
                last.length = complete - last.start;
                complete
            }
            None => 0,
        };
        (TopicIndex { entries }, valid_len)
    }
}

/// Size of a log file, 0 when it does not exist yet.
pub(crate) async fn log_size(log_path: &Path) -> AppResult<u64> {
    match fs::metadata(log_path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn pos(start: u64, length: u64) -> Position {
        Position { start, length }
    }

    #[test]
    fn scan_assigns_one_range_per_line() {
        let (index, valid) = TopicIndex::scan(b"{\"a\":1}\n{\"b\":22}\n");
        assert_eq!(index.entries(), &[pos(0, 8), pos(8, 9)]);
        assert_eq!(valid, 17);
        assert!(index.is_consistent(17));
    }

    #[test]
    fn scan_drops_torn_tail() {
        let (index, valid) = TopicIndex::scan(b"{\"a\":1}\n{\"b\":");
        assert_eq!(index.entries(), &[pos(0, 8)]);
        assert_eq!(valid, 8);
    }

    #[test]
    fn scan_folds_blank_lines_into_neighbours() {
        let (index, valid) = TopicIndex::scan(b"\n{\"a\":1}\n  \n{\"b\":2}\n\n");
        assert_eq!(index.entries(), &[pos(0, 9), pos(9, 12)]);
        assert_eq!(valid, 21);
        assert!(index.is_consistent(valid));
    }

    #[test]
    fn scan_of_blank_log_is_empty() {
        let (index, valid) = TopicIndex::scan(b"\n \n");
        assert!(index.is_empty());
        assert_eq!(valid, 0);
    }

    #[test]
    fn consistency_requires_exact_cover() {
        let index = TopicIndex::new(vec![pos(0, 8), pos(8, 9)]);
        assert!(index.is_consistent(17));
        assert!(!index.is_consistent(16));
        assert!(!index.is_consistent(30));

        let gap = TopicIndex::new(vec![pos(0, 8), pos(9, 8)]);
        assert!(!gap.is_consistent(17));

        assert!(TopicIndex::default().is_consistent(0));
        assert!(!TopicIndex::default().is_consistent(5));
    }

    #[tokio::test]
    async fn load_or_rebuild_repairs_stale_index() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log_path = dir.path().join("events.log");
        let index_path = dir.path().join("index.json");

        fs::write(&log_path, b"{\"a\":1}\n{\"b\":22}\n{\"c\":").await?;
        // index only knows the first record
        TopicIndex::new(vec![pos(0, 8)]).save(&index_path).await?;

        let index = TopicIndex::load_or_rebuild(&index_path, &log_path).await?;
        assert_eq!(index.entries(), &[pos(0, 8), pos(8, 9)]);
        assert_eq!(log_size(&log_path).await?, 17);

        let saved = TopicIndex::load(&index_path).await?.unwrap();
        assert_eq!(saved, index);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_leaves_files_untouched() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log_path = dir.path().join("events.log");
        let index_path = dir.path().join("index.json");

        let content = b"{\"a\":1}\n{\"b\":22}\n{\"c\":".to_vec();
        fs::write(&log_path, &content).await?;
        TopicIndex::new(vec![pos(0, 8)]).save(&index_path).await?;
        let stale_index = fs::read(&index_path).await?;

        let (index, read) = TopicIndex::snapshot(&index_path, &log_path).await?;
        assert_eq!(index.entries(), &[pos(0, 8), pos(8, 9)]);
        assert_eq!(read, content);

        // torn tail and stale index are both still there
        assert_eq!(fs::read(&log_path).await?, content);
        assert_eq!(fs::read(&index_path).await?, stale_index);

        let (index, read) = TopicIndex::snapshot(
            &dir.path().join("missing.json"),
            &dir.path().join("missing.log"),
        )
        .await?;
        assert!(index.is_empty() && read.is_empty());
        assert!(!dir.path().join("missing.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_index_file_is_rebuilt() -> AppResult<()> {
        let dir = TempDir::new()?;
        let log_path = dir.path().join("events.log");
        let index_path = dir.path().join("index.json");

        fs::write(&log_path, b"{\"a\":1}\n").await?;
        fs::write(&index_path, b"[{\"start\":").await?;

        let index = TopicIndex::load_or_rebuild(&index_path, &log_path).await?;
        assert_eq!(index.entries(), &[pos(0, 8)]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_files_mean_empty_index() -> AppResult<()> {
        let dir = TempDir::new()?;
        let index = TopicIndex::load_or_rebuild(
            &dir.path().join("index.json"),
            &dir.path().join("events.log"),
        )
        .await?;
        assert!(index.is_empty());
        Ok(())
    }
}

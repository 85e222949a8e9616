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

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use logpipe::log::{validate_topic, TopicIndex, TopicLog, INDEX_FILE_NAME, LOG_FILE_NAME};
use logpipe::message::{CommitRecord, Record};
use logpipe::offset::OFFSETS_FILE_NAME;
use logpipe::pipe::DEFAULT_CONSUME_LIMIT;
use logpipe::AppResult;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Offline inspection of a logpipe data directory.
///
/// Every command only reads, except `verify --repair`.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// data directory of the broker
    #[arg(short, long, default_value = "logs")]
    dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// print the index entries of a topic
    Index {
        #[arg(short, long)]
        topic: String,
    },
    /// print a raw byte range of a topic log
    Read {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        start: u64,
        #[arg(short, long)]
        length: u64,
    },
    /// print records of a topic starting at an offset
    Consume {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 0)]
        offset: u64,
        #[arg(short, long, default_value_t = DEFAULT_CONSUME_LIMIT)]
        limit: usize,
    },
    /// print every committed consumer offset
    Offsets,
    /// check topic indexes against their logs, rebuilding stale ones with --repair
    Verify {
        /// only this topic
        #[arg(short, long)]
        topic: Option<String>,
        #[arg(long)]
        repair: bool,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Index { topic } => print_index(&cli.dir, topic).await,
        Commands::Read {
            topic,
            start,
            length,
        } => print_range(&cli.dir, topic, *start, *length).await,
        Commands::Consume {
            topic,
            offset,
            limit,
        } => print_records(&cli.dir, topic, *offset, *limit).await,
        Commands::Offsets => print_offsets(&cli.dir).await,
        Commands::Verify { topic, repair } => verify(&cli.dir, topic.as_deref(), *repair).await,
    }
}

async fn print_index(dir: &Path, topic: &str) -> AppResult<()> {
    let index_path = dir.join(topic).join(INDEX_FILE_NAME);
    let Some(index) = TopicIndex::load(&index_path).await? else {
        println!("no readable index at {}", index_path.display());
        return Ok(());
    };
    println!("{:>10} {:>14} {:>10}", "offset", "start", "length");
    for (offset, position) in index.entries().iter().enumerate() {
        println!(
            "{:>10} {:>14} {:>10}",
            offset, position.start, position.length
        );
    }
    println!("{} entries, ending at byte {}", index.len(), index.end());
    Ok(())
}

async fn print_range(dir: &Path, topic: &str, start: u64, length: u64) -> AppResult<()> {
    validate_topic(topic)?;
    let bytes = read_range(&dir.join(topic).join(LOG_FILE_NAME), start, length).await?;
    println!("{} bytes at {}:", bytes.len(), start);
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

async fn print_records(dir: &Path, topic: &str, offset: u64, limit: usize) -> AppResult<()> {
    validate_topic(topic)?;
    let topic_dir = dir.join(topic);
    let (index, content) =
        TopicIndex::snapshot(&topic_dir.join(INDEX_FILE_NAME), &topic_dir.join(LOG_FILE_NAME))
            .await?;
    if index.is_empty() {
        println!("topic {} has no records in {}", topic, dir.display());
        return Ok(());
    }

    let positions = index
        .entries()
        .iter()
        .enumerate()
        .skip(offset.min(usize::MAX as u64) as usize)
        .take(limit);
    for (i, position) in positions {
        let line = &content[position.start as usize..position.end() as usize];
        let mut record = Record::from_log_line(line)?;
        record.position = Some(*position);
        println!("{}: {}", i, serde_json::to_string(&record)?);
    }
    Ok(())
}

async fn print_offsets(dir: &Path) -> AppResult<()> {
    let commits: Vec<CommitRecord> = match fs::read(dir.join(OFFSETS_FILE_NAME)).await {
        Ok(content) if content.trim_ascii().is_empty() => Vec::new(),
        Ok(content) => serde_json::from_slice(&content)?,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    for commit in commits {
        println!(
            "{} {}/{} -> {}",
            commit.topic, commit.group_id, commit.consumer_id, commit.offset
        );
    }
    Ok(())
}

/// Bytes of `[start, start + length)` clamped to the file, without touching it.
async fn read_range(log_path: &Path, start: u64, length: u64) -> AppResult<Vec<u8>> {
    let mut file = match File::open(log_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();
    if start >= size {
        return Ok(Vec::new());
    }
    let mut buf = vec![0; length.min(size - start) as usize];
    file.seek(SeekFrom::Start(start)).await?;
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn verify(dir: &Path, only: Option<&str>, repair: bool) -> AppResult<()> {
    let mut entries = fs::read_dir(dir).await?;
    let mut stale = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let topic = entry.file_name().to_string_lossy().into_owned();
        if only.is_some_and(|only| only != topic) {
            continue;
        }
        let log_size = match fs::metadata(entry.path().join(LOG_FILE_NAME)).await {
            Ok(metadata) => metadata.len(),
            Err(_) => continue,
        };
        match TopicIndex::load(&entry.path().join(INDEX_FILE_NAME)).await? {
            Some(index) if index.is_consistent(log_size) => {
                println!("{}: ok, {} records", topic, index.len());
            }
            Some(index) => {
                println!(
                    "{}: stale, index ends at {} but log has {} bytes",
                    topic,
                    index.end(),
                    log_size
                );
                stale.push(topic);
            }
            None => {
                println!("{}: index missing or unreadable", topic);
                stale.push(topic);
            }
        }
    }

    if repair {
        // only the stale topics are opened, opening rebuilds their index
        for topic in &stale {
            let topic_log = TopicLog::open(topic, dir.join(topic)).await?;
            let records = topic_log.repair_index().await?;
            println!("{}: rebuilt, {} records", topic, records);
        }
    }
    Ok(())
}

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

use std::sync::Arc;

use logpipe::log::{FileLog, LogStore, INDEX_FILE_NAME, LOG_FILE_NAME};
use logpipe::message::Record;
use logpipe::{setup_local_tracing, AppResult, LogPipe};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

#[fixture]
#[once]
fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

async fn open_pipe(backend: &str, dir: &TempDir) -> AppResult<LogPipe> {
    match backend {
        "file" => LogPipe::open_dir(dir.path().to_str().unwrap()).await,
        _ => Ok(LogPipe::in_memory()),
    }
}

#[rstest]
#[tokio::test]
async fn orders_are_consumed_in_publish_order(
    _setup: (),
    #[values("file", "memory")] backend: &str,
) -> AppResult<()> {
    let dir = TempDir::new()?;
    let pipe = open_pipe(backend, &dir).await?;

    let first = pipe.publish("orders", json!({"orderId": 123})).await?;
    let second = pipe.publish("orders", json!({"orderId": 456})).await?;

    let records = pipe.consume("orders", 0, 10).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first.id);
    assert_eq!(records[0].data, json!({"orderId": 123}));
    assert_eq!(records[1].id, second.id);
    assert_eq!(records[1].data, json!({"orderId": 456}));

    let tail = pipe.consume("orders", 1, 1).await?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, second.id);

    // reads have no side effects
    assert_eq!(pipe.consume("orders", 0, 10).await?, records);
    assert!(pipe.consume("orders", 2, 10).await?.is_empty());
    assert!(pipe.consume("orders", 0, 0).await?.is_empty());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn topics_and_consumers_are_isolated(
    _setup: (),
    #[values("file", "memory")] backend: &str,
) -> AppResult<()> {
    let dir = TempDir::new()?;
    let pipe = open_pipe(backend, &dir).await?;

    pipe.publish("a", json!("a0")).await?;
    pipe.publish("b", json!("b0")).await?;
    pipe.publish("a", json!("a1")).await?;

    let a: Vec<_> = pipe.consume("a", 0, 10).await?.into_iter().map(|r| r.data).collect();
    let b: Vec<_> = pipe.consume("b", 0, 10).await?.into_iter().map(|r| r.data).collect();
    assert_eq!(a, vec![json!("a0"), json!("a1")]);
    assert_eq!(b, vec![json!("b0")]);
    assert!(pipe.consume("missing", 0, 10).await?.is_empty());
    assert_eq!(pipe.offset().await?, 3);

    assert_eq!(pipe.committed_offset("a", "g", "c").await?, 0);
    pipe.commit_offset("a", "g", "c", 2).await?;
    pipe.commit_offset("a", "g", "other", 1).await?;
    assert_eq!(pipe.committed_offset("a", "g", "c").await?, 2);
    assert_eq!(pipe.committed_offset("a", "g", "other").await?, 1);
    assert_eq!(pipe.committed_offset("b", "g", "c").await?, 0);

    // rewinding is allowed
    pipe.commit_offset("a", "g", "c", 0).await?;
    assert_eq!(pipe.committed_offset("a", "g", "c").await?, 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn invalid_topic_is_rejected(
    _setup: (),
    #[values("file", "memory")] backend: &str,
) -> AppResult<()> {
    let dir = TempDir::new()?;
    let pipe = open_pipe(backend, &dir).await?;

    for topic in ["", "../escape", "a/b"] {
        let err = pipe.publish(topic, json!(1)).await.unwrap_err();
        assert!(err.is_client_error(), "{} accepted: {}", topic, err);
    }
    assert_eq!(pipe.offset().await?, 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn file_positions_address_raw_lines(_setup: ()) -> AppResult<()> {
    let dir = TempDir::new()?;
    let pipe = open_pipe("file", &dir).await?;

    let first = pipe.publish("orders", json!({"orderId": 123})).await?;
    let second = pipe.publish("orders", json!({"orderId": 456})).await?;
    let p1 = first.position.unwrap();
    let p2 = second.position.unwrap();
    assert_eq!(p1.start, 0);
    assert_eq!(p2.start, p1.end());

    let raw = pipe.read_message("orders", p2.start, p2.length).await?;
    let stored = Record {
        position: None,
        ..second.clone()
    };
    assert_eq!(raw, stored.to_log_line()?);
    // the published record still knows its range, the line written for it does not
    assert_eq!(raw, second.to_log_line()?);
    assert_eq!(Record::from_log_line(&raw)?.id, second.id);

    let consumed = pipe.consume("orders", 0, 2).await?;
    assert_eq!(consumed[0].position, Some(p1));
    assert_eq!(consumed[1].position, Some(p2));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn file_pipe_survives_reopen(_setup: ()) -> AppResult<()> {
    let dir = TempDir::new()?;
    let published = {
        let pipe = open_pipe("file", &dir).await?;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(pipe.publish("orders", json!({ "n": i })).await?.id);
        }
        pipe.commit_offset("orders", "group1", "cons1", 3).await?;
        ids
    };

    let pipe = open_pipe("file", &dir).await?;
    let records = pipe.consume("orders", 0, 10).await?;
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), published);
    assert_eq!(pipe.committed_offset("orders", "group1", "cons1").await?, 3);

    let next = pipe.publish("orders", json!({"n": 5})).await?;
    assert_eq!(pipe.consume("orders", 5, 1).await?[0].id, next.id);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn deleted_index_is_rebuilt(_setup: ()) -> AppResult<()> {
    let dir = TempDir::new()?;
    {
        let pipe = open_pipe("file", &dir).await?;
        pipe.publish("orders", json!(1)).await?;
        pipe.publish("orders", json!(2)).await?;
    }
    tokio::fs::remove_file(dir.path().join("orders").join(INDEX_FILE_NAME)).await?;

    let pipe = open_pipe("file", &dir).await?;
    let data: Vec<_> = pipe.consume("orders", 0, 10).await?.into_iter().map(|r| r.data).collect();
    assert_eq!(data, vec![json!(1), json!(2)]);
    assert!(dir.path().join("orders").join(INDEX_FILE_NAME).exists());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn torn_tail_is_dropped_on_open(_setup: ()) -> AppResult<()> {
    let dir = TempDir::new()?;
    {
        let pipe = open_pipe("file", &dir).await?;
        pipe.publish("orders", json!(1)).await?;
    }
    let log_path = dir.path().join("orders").join(LOG_FILE_NAME);
    let mut content = tokio::fs::read(&log_path).await?;
    let intact = content.len() as u64;
    content.extend_from_slice(b"{\"id\":\"half");
    tokio::fs::write(&log_path, &content).await?;

    let log = FileLog::open(dir.path()).await?;
    assert_eq!(log.topic_length("orders").await?, 1);
    assert_eq!(tokio::fs::metadata(&log_path).await?.len(), intact);

    let pipe = LogPipe::new(
        Arc::new(log),
        Arc::new(logpipe::offset::MemoryOffsets::new()),
    );
    let next = pipe.publish("orders", json!(2)).await?;
    assert_eq!(next.position.unwrap().start, intact);
    assert_eq!(pipe.consume("orders", 0, 10).await?.len(), 2);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn concurrent_publishers_get_distinct_offsets(
    _setup: (),
    #[values("file", "memory")] backend: &str,
) -> AppResult<()> {
    let dir = TempDir::new()?;
    let pipe = open_pipe(backend, &dir).await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let pipe = pipe.clone();
        handles.push(tokio::spawn(async move {
            pipe.publish("orders", json!({ "n": i })).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap()?.id);
    }

    let records = pipe.consume("orders", 0, 100).await?;
    assert_eq!(records.len(), 20);
    for id in ids {
        assert!(records.iter().any(|r| r.id == id));
    }
    if backend == "file" {
        let mut expected_start = 0;
        for record in &records {
            let position = record.position.unwrap();
            assert_eq!(position.start, expected_start);
            expected_start = position.end();
        }
    }
    Ok(())
}

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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::warn;

use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Waits for a connection slot, then for the next client.
pub(crate) async fn accept_connection(
    listener: &TcpListener,
    limit_connections: &Arc<Semaphore>,
) -> AppResult<(TcpStream, OwnedSemaphorePermit)> {
    let permit = limit_connections
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::IllegalStateError(format!("connection limiter closed: {}", e)))?;
    let socket = accept(listener).await?;
    Ok((socket, permit))
}

/// Accepts with exponential backoff on transient errors, giving up after ~2 minutes.
async fn accept(listener: &TcpListener) -> AppResult<TcpStream> {
    let mut backoff = 1;

    loop {
        match listener.accept().await {
            Ok((socket, _)) => return Ok(socket),
            Err(err) => {
                if backoff > 64 {
                    return Err(AppError::DetailedIoError(format!(
                        "accept tcp server error: {}",
                        err
                    )));
                }
                warn!("accept failed, retry in {}s: {}", backoff, err);
            }
        }

        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

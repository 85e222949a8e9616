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

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::config::{ConsumerConfig, NetworkConfig};
use super::server::{accept_connection, next_connection_id};
use super::Shutdown;
use crate::network::Connection;
use crate::request::SubscribeRequest;
use crate::{AppError, AppResult, LogPipe};

const INVALID_SUB_FORMAT: &[u8] = b"ERROR: invalid sub format\n";

// handler for each consumer connection, at most one subscription per connection
struct SubscriptionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    log_pipe: LogPipe,
    poll_interval: Duration,
    batch_size: usize,
}

impl SubscriptionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());

        let Some(subscription) = self.wait_subscribe(&mut shutdown).await? else {
            return Ok(());
        };

        let mut offset = subscription.starting_offset(&self.log_pipe).await?;
        self.commit(&subscription, offset).await?;
        info!(
            "connection {} subscribed to topic {} as {}/{} from offset {}",
            self.connection_id,
            subscription.topic,
            subscription.group_id,
            subscription.consumer_id,
            offset
        );

        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let input = tokio::select! {
                _ = ticker.tick() => None,
                res = self.connection.read_frame() => Some(res),
                _ = shutdown.recv() => {
                    debug!("consumer connection {} exit after recv shutdown signal", self.connection_id);
                    break;
                }
            };

            match input {
                None => offset = self.deliver(&subscription, offset).await?,
                Some(Ok(Some(_))) => {
                    trace!(
                        "connection {} ignored input after subscribe",
                        self.connection_id
                    );
                }
                Some(Ok(None)) => {
                    debug!("consumer connection {} closed by client", self.connection_id);
                    break;
                }
                Some(Err(e)) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads lines until one is a valid `SUB` command. `None` when the client leaves or
    /// the server shuts down first.
    async fn wait_subscribe(
        &mut self,
        shutdown: &mut Shutdown,
    ) -> AppResult<Option<SubscribeRequest>> {
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = shutdown.recv() => return Ok(None),
            };
            let Some(frame) = maybe_frame else {
                return Ok(None);
            };
            if frame.is_blank() {
                continue;
            }

            match frame.as_str().and_then(SubscribeRequest::parse) {
                Ok(subscription) => return Ok(Some(subscription)),
                Err(e) => {
                    debug!(
                        "connection {} ({}) sent bad subscribe: {}",
                        self.connection_id, self.connection.client_ip, e
                    );
                    self.write(INVALID_SUB_FORMAT).await?;
                }
            }
        }
    }

    /// Sends the next batch after `offset` and commits past it. Returns the new offset.
    async fn deliver(&mut self, subscription: &SubscribeRequest, offset: u64) -> AppResult<u64> {
        let records = self
            .log_pipe
            .consume(&subscription.topic, offset, self.batch_size)
            .await?;
        if records.is_empty() {
            return Ok(offset);
        }

        let mut buf = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        self.write(&buf).await?;

        let next = offset + records.len() as u64;
        self.commit(subscription, next).await?;
        trace!(
            "connection {} delivered {} records of {}, next offset {}",
            self.connection_id,
            records.len(),
            subscription.topic,
            next
        );
        Ok(next)
    }

    async fn commit(&self, subscription: &SubscribeRequest, offset: u64) -> AppResult<()> {
        self.log_pipe
            .commit_offset(
                &subscription.topic,
                &subscription.group_id,
                &subscription.consumer_id,
                offset,
            )
            .await
    }

    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| AppError::DetailedIoError(format!("write to consumer error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::DetailedIoError(format!("flush to consumer error: {}", e)))
    }
}

/// TCP server of the consumer protocol.
///
/// A client sends one `SUB` line, then receives every record of the topic from the
/// starting offset on as JSON lines, polled every `poll_interval`. Progress is committed
/// after each delivered batch, so a reconnecting consumer resumes where it left off.
#[derive(Debug)]
pub struct ConsumerServer {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    log_pipe: LogPipe,
    consumer_config: ConsumerConfig,
    max_line_size: usize,
}

impl ConsumerServer {
    pub fn new(
        listener: TcpListener,
        log_pipe: LogPipe,
        network_config: &NetworkConfig,
        consumer_config: &ConsumerConfig,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        ConsumerServer {
            listener,
            limit_connections: Arc::new(Semaphore::new(network_config.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            log_pipe,
            consumer_config: consumer_config.clone(),
            max_line_size: network_config.max_line_size,
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        info!(
            "consumer server listening on {:?}",
            self.listener.local_addr()
        );

        loop {
            let (socket, permit) =
                accept_connection(&self.listener, &self.limit_connections).await?;
            let connection_id = next_connection_id();
            let (reader, writer) = socket.into_split();

            let mut handler = SubscriptionHandler {
                notify_shutdown: self.notify_shutdown.clone(),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                connection_id,
                connection: Connection::new(reader, self.max_line_size),
                writer: BufWriter::new(writer),
                log_pipe: self.log_pipe.clone(),
                poll_interval: self.consumer_config.poll_interval(),
                batch_size: self.consumer_config.batch_size.max(1),
            };
            debug!(
                "accept consumer connection {} from {}",
                connection_id, handler.connection.client_ip
            );

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    // a vanished client surfaces here as a write error
                    warn!("consumer connection {} error: {}", connection_id, err);
                }
                drop(permit);
            });
        }
    }
}

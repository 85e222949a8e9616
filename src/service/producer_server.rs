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
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};

use super::config::{NetworkConfig, ProducerConfig};
use super::server::{accept_connection, next_connection_id};
use super::Shutdown;
use crate::network::Connection;
use crate::request::PublishRequest;
use crate::{AppError, AppResult, LogPipe};

/// A parsed publish request waiting for a worker.
#[derive(Debug)]
struct PublishTask {
    connection_id: u64,
    request: PublishRequest,
    response_tx: oneshot::Sender<String>,
}

/// Starts the publish workers and returns the queue feeding them.
///
/// Workers stop once every sender is dropped, i.e. after the server loop and all
/// connection handlers are gone.
fn start_request_handler(
    log_pipe: LogPipe,
    config: &ProducerConfig,
    shutdown_complete_tx: mpsc::Sender<()>,
) -> async_channel::Sender<PublishTask> {
    let (request_tx, request_rx) = async_channel::bounded(config.channel_capacity.max(1));
    for i in 0..config.num_workers.max(1) {
        let rx: async_channel::Receiver<PublishTask> = request_rx.clone();
        let log_pipe = log_pipe.clone();
        let shutdown_complete_tx = shutdown_complete_tx.clone();
        tokio::spawn(async move {
            debug!("publish worker {} started", i);
            while let Ok(task) = rx.recv().await {
                process_request(task, &log_pipe).await;
            }
            debug!("publish worker {} exited", i);
            drop(shutdown_complete_tx);
        });
    }
    request_tx
}

async fn process_request(task: PublishTask, log_pipe: &LogPipe) {
    let PublishTask {
        connection_id,
        request,
        response_tx,
    } = task;
    let response = match log_pipe.publish(&request.topic, request.data).await {
        Ok(record) => format!("SUCCESS:{}\n", record.id),
        Err(e) => {
            if e.is_client_error() {
                warn!("connection {} publish rejected: {}", connection_id, e);
            } else {
                error!("connection {} publish failed: {}", connection_id, e);
            }
            format!("ERROR: {}\n", e)
        }
    };
    if response_tx.send(response).is_err() {
        // the connection went away while the record was being written
        debug!("connection {} dropped before publish reply", connection_id);
    }
}

/// Reply for a line that did not parse into a publish request.
fn rejection(error: &AppError) -> &'static str {
    match error {
        AppError::InvalidRequest(_) => "ERROR: topic and data required\n",
        _ => "ERROR: invalid format\n",
    }
}

// handler for each producer connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    request_tx: async_channel::Sender<PublishTask>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = shutdown.recv() => {
                    debug!("producer connection {} exit read loop after recv shutdown signal", self.connection_id);
                    return Ok(());
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // client close the connection gracefully
                None => break,
            };
            if frame.is_blank() {
                continue;
            }

            let response = match PublishRequest::parse(&frame.line) {
                Ok(request) => self.dispatch(request).await?,
                Err(e) => {
                    debug!(
                        "connection {} ({}) sent bad publish request: {}",
                        self.connection_id, self.connection.client_ip, e
                    );
                    rejection(&e).to_string()
                }
            };

            self.writer.write_all(response.as_bytes()).await.map_err(|e| {
                AppError::DetailedIoError(format!("write response error: {}", e))
            })?;
            self.writer.flush().await.map_err(|e| {
                AppError::DetailedIoError(format!("flush response error: {}", e))
            })?;
        }
        debug!("producer connection {} closed by client", self.connection_id);

        Ok(())
    }

    /// Hands the request to the worker pool and waits for its reply, so requests of
    /// one connection are published in the order they were sent.
    async fn dispatch(&self, request: PublishRequest) -> AppResult<String> {
        let (response_tx, response_rx) = oneshot::channel();
        let task = PublishTask {
            connection_id: self.connection_id,
            request,
            response_tx,
        };
        if let Err(e) = self.request_tx.send(task).await {
            error!("Failed to send publish request: {:?}", e);
            return Err(AppError::ChannelSendError(e.to_string()));
        }
        response_rx.await.map_err(|_| {
            error!("publish worker dropped without sending response");
            AppError::ChannelRecvError("response channel closed".into())
        })
    }
}

/// TCP server of the producer protocol: one JSON publish request per line, answered
/// with `SUCCESS:<id>` or `ERROR: <reason>`.
#[derive(Debug)]
pub struct ProducerServer {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    log_pipe: LogPipe,
    producer_config: ProducerConfig,
    max_line_size: usize,
}

impl ProducerServer {
    pub fn new(
        listener: TcpListener,
        log_pipe: LogPipe,
        network_config: &NetworkConfig,
        producer_config: &ProducerConfig,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        ProducerServer {
            listener,
            limit_connections: Arc::new(Semaphore::new(network_config.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            log_pipe,
            producer_config: producer_config.clone(),
            max_line_size: network_config.max_line_size,
        }
    }

    /// Accepts producer connections until accepting fails.
    ///
    /// Shutdown: dropping this future stops accepting; connection handlers stop reading
    /// on the shutdown signal after answering the request in progress; once they are
    /// gone the request queue closes and the workers exit.
    pub async fn run(&self) -> AppResult<()> {
        let request_sender = start_request_handler(
            self.log_pipe.clone(),
            &self.producer_config,
            self.shutdown_complete_tx.clone(),
        );
        info!(
            "producer server listening on {:?}",
            self.listener.local_addr()
        );

        loop {
            let (socket, permit) =
                accept_connection(&self.listener, &self.limit_connections).await?;
            let connection_id = next_connection_id();
            let (reader, writer) = socket.into_split();

            let mut handler = ConnectionHandler {
                notify_shutdown: self.notify_shutdown.clone(),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                connection_id,
                connection: Connection::new(reader, self.max_line_size),
                writer: BufWriter::new(writer),
                request_tx: request_sender.clone(),
            };
            debug!(
                "accept producer connection {} from {}",
                connection_id, handler.connection.client_ip
            );

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    warn!("producer connection {} error: {}", connection_id, err);
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }
}

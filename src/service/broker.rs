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

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, trace};

use super::{BrokerConfig, ConsumerServer, ProducerServer};
use crate::AppError::IllegalStateError;
use crate::{global_config, AppResult, LogPipe};

/// Runs the producer and consumer servers on top of one shared [`LogPipe`] until ctrl-c.
#[derive(Debug, Default)]
pub struct Broker;

impl Broker {
    pub fn start(&self, rt: &Runtime) -> AppResult<()> {
        let config = global_config();
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        // open storage, rebuilding stale indexes
        let log_pipe = rt.block_on(LogPipe::open(&config.general))?;
        let offset = rt.block_on(log_pipe.offset())?;
        info!("log pipe ready with {} records", offset);

        rt.block_on(Self::run_tcp_servers(
            config,
            log_pipe.clone(),
            notify_shutdown.clone(),
            shutdown_complete_tx,
        ))?;

        // servers stopped accepting, tell the connection handlers
        let _ = notify_shutdown.send(());
        drop(log_pipe);
        // wait for every handler and publish worker to finish
        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        info!("broker shutdown complete");
        Ok(())
    }

    async fn run_tcp_servers(
        config: &BrokerConfig,
        log_pipe: LogPipe,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<()> {
        let producer_listener = bind(&config.producer_address()).await?;
        let consumer_listener = bind(&config.consumer_address()).await?;

        let producer_server = ProducerServer::new(
            producer_listener,
            log_pipe.clone(),
            &config.network,
            &config.producer,
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
        );
        let consumer_server = ConsumerServer::new(
            consumer_listener,
            log_pipe,
            &config.network,
            &config.consumer,
            notify_shutdown,
            shutdown_complete_tx,
        );

        tokio::select! {
            res = producer_server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "producer server failed to accept");
                }
            }
            res = consumer_server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "consumer server failed to accept");
                }
            }
            _ = signal::ctrl_c() => {
                info!("get shutdown signal");
            }
        }

        Ok(())
    }
}

async fn bind(address: &str) -> AppResult<TcpListener> {
    match TcpListener::bind(address).await {
        Ok(listener) => {
            info!("tcp server binding to {} for listening", address);
            Ok(listener)
        }
        Err(err) => {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                address, err
            );
            error!(error_msg);
            Err(IllegalStateError(error_msg))
        }
    }
}

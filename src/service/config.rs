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

use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub static GLOBAL_CONFIG: OnceCell<BrokerConfig> = OnceCell::new();

/// Panics if called before the binary has installed the configuration.
pub fn global_config() -> &'static BrokerConfig {
    GLOBAL_CONFIG.get().unwrap()
}

/// Environment variables overriding the file, e.g. `LOGPIPE__NETWORK__PRODUCER_PORT=4001`.
const ENV_PREFIX: &str = "LOGPIPE";
const ENV_SEPARATOR: &str = "__";

/// Which backend the broker stores topics and commit records in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root of the durable layout: one directory per topic plus `offsets.json`.
    pub data_dir: String,
    pub storage: StorageKind,
    /// Directory for the rolling tracing output.
    pub log_dir: String,
    /// Tokio worker threads, 0 means one per cpu.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            data_dir: "logs".to_string(),
            storage: StorageKind::File,
            log_dir: "trace".to_string(),
            worker_threads: 0,
        }
    }
}

impl GeneralConfig {
    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub producer_port: u16,
    pub consumer_port: u16,
    /// Concurrent connections accepted per server.
    pub max_connection: usize,
    /// Longest request line accepted from a client, in bytes.
    pub max_line_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            producer_port: 4000,
            consumer_port: 5000,
            max_connection: 1024,
            max_line_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConsumerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            poll_interval_ms: 1000,
            batch_size: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn poll_interval(&self) -> Duration {
        // a zero period would make tokio::time::interval panic
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProducerConfig {
    pub channel_capacity: usize,
    pub num_workers: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            channel_capacity: 1024,
            num_workers: 4,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
}

impl BrokerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<BrokerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let broker_config: BrokerConfig = config.try_deserialize()?;

        Ok(broker_config)
    }

    pub fn producer_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.producer_port)
    }

    pub fn consumer_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.consumer_port)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[general]\ndata_dir = \"/var/lib/logpipe\"\nstorage = \"memory\"\n\n[consumer]\nbatch_size = 50"
        )
        .unwrap();

        let config = BrokerConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/logpipe");
        assert_eq!(config.general.storage, StorageKind::Memory);
        assert_eq!(config.consumer.batch_size, 50);
        assert_eq!(config.consumer.poll_interval_ms, 1000);
        assert_eq!(config.network.producer_port, 4000);
        assert_eq!(config.network.consumer_port, 5000);
        assert_eq!(config.consumer_address(), "127.0.0.1:5000");
    }

    #[test]
    fn absent_file_yields_default_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BrokerConfig::set_up_config(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.general.storage, StorageKind::File);
        assert_eq!(config.producer.num_workers, 4);
        assert!(config.general.worker_threads() >= 1);
    }
}

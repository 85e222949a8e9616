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

use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use logpipe::{global_config, setup_tracing, AppError, AppResult, Broker, BrokerConfig, GLOBAL_CONFIG};
use tokio::runtime;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// print the effective configuration and exit
    PrintConfig,
}

fn main() -> AppResult<()> {
    // env overrides may live in .env
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("./conf.toml"), PathBuf::from);
    let broker_config = BrokerConfig::set_up_config(config_path)?;
    GLOBAL_CONFIG
        .set(broker_config)
        .map_err(|_| AppError::IllegalStateError("broker config already set".to_string()))?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{}", serde_json::to_string_pretty(global_config())?);
        return Ok(());
    }

    let _guard = setup_tracing(&global_config().general.log_dir, commandline.verbose)?;

    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(global_config().general.worker_threads())
        .enable_all()
        .build()?;

    let broker = Broker;
    broker.start(&rt)?;

    Ok(())
}

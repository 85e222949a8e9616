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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serde error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// marker error, the frame buffer does not hold a complete line yet
    #[error("incomplete frame")]
    Incomplete,

    /// request errors, surfaced to the client
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Topic '{0}' does not exist or has no events produced yet")]
    TopicNotFound(String),
}

impl AppError {
    /// Whether the error was caused by caller input rather than by the broker itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidRequest(_)
                | AppError::InvalidTopic(_)
                | AppError::MalformedProtocol(_)
                | AppError::TopicNotFound(_)
        )
    }
}

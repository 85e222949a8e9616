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

use serde_json::Value;

use crate::{AppError, AppResult};

/// One publish request of the producer protocol: `{"topic": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub topic: String,
    pub data: Value,
}

impl PublishRequest {
    /// Parses one request line.
    ///
    /// Input that is not a JSON object is [`AppError::MalformedProtocol`]; an object
    /// without a non-empty string `topic` or a non-null `data` is
    /// [`AppError::InvalidRequest`].
    pub fn parse(line: &[u8]) -> AppResult<PublishRequest> {
        let value: Value = serde_json::from_slice(line)
            .map_err(|e| AppError::MalformedProtocol(format!("invalid format: {}", e)))?;
        let Value::Object(mut object) = value else {
            return Err(AppError::MalformedProtocol(
                "invalid format: expected a JSON object".to_string(),
            ));
        };

        let topic = match object.remove("topic") {
            Some(Value::String(topic)) if !topic.trim().is_empty() => topic,
            _ => return Err(AppError::InvalidRequest("topic and data required".into())),
        };
        let data = match object.remove("data") {
            Some(Value::Null) | None => {
                return Err(AppError::InvalidRequest("topic and data required".into()))
            }
            Some(data) => data,
        };
        Ok(PublishRequest { topic, data })
    }
}

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

use crate::log::validate_topic;
use crate::message::{DEFAULT_CONSUMER, DEFAULT_GROUP};
use crate::{AppError, AppResult, LogPipe};

/// A subscribe command of the consumer protocol.
///
/// Accepted forms:
/// - `SUB <topic>`
/// - `SUB <topic> <offset>`
/// - `SUB <topic> <groupId> <consumerId>`
/// - `SUB <topic> <groupId> <consumerId> <offset>`
///
/// Group and consumer default to `"default"`. Without an explicit offset the
/// subscription starts at the committed offset of its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topic: String,
    pub group_id: String,
    pub consumer_id: String,
    pub offset: Option<u64>,
}

impl SubscribeRequest {
    pub fn parse(line: &str) -> AppResult<SubscribeRequest> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (topic, group_id, consumer_id, offset) = match parts.as_slice() {
            ["SUB", topic] => (*topic, DEFAULT_GROUP, DEFAULT_CONSUMER, None),
            ["SUB", topic, offset] => (
                *topic,
                DEFAULT_GROUP,
                DEFAULT_CONSUMER,
                Some(parse_offset(offset)?),
            ),
            ["SUB", topic, group_id, consumer_id] => (*topic, *group_id, *consumer_id, None),
            ["SUB", topic, group_id, consumer_id, offset] => {
                (*topic, *group_id, *consumer_id, Some(parse_offset(offset)?))
            }
            _ => return Err(invalid_sub_format()),
        };
        validate_topic(topic).map_err(|_| invalid_sub_format())?;

        Ok(SubscribeRequest {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            consumer_id: consumer_id.to_string(),
            offset,
        })
    }

    /// The explicit offset if one was given, otherwise the committed one.
    pub async fn starting_offset(&self, log_pipe: &LogPipe) -> AppResult<u64> {
        match self.offset {
            Some(offset) => Ok(offset),
            None => {
                log_pipe
                    .committed_offset(&self.topic, &self.group_id, &self.consumer_id)
                    .await
            }
        }
    }
}

fn parse_offset(offset: &str) -> AppResult<u64> {
    offset.parse::<u64>().map_err(|_| invalid_sub_format())
}

fn invalid_sub_format() -> AppError {
    AppError::MalformedProtocol("invalid sub format".to_string())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn sub(topic: &str, group_id: &str, consumer_id: &str, offset: Option<u64>) -> SubscribeRequest {
        SubscribeRequest {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            consumer_id: consumer_id.to_string(),
            offset,
        }
    }

    #[rstest]
    #[case("SUB orders", sub("orders", "default", "default", None))]
    #[case("SUB orders 5", sub("orders", "default", "default", Some(5)))]
    #[case("SUB orders group1 cons1", sub("orders", "group1", "cons1", None))]
    #[case("SUB orders group1 cons1 3", sub("orders", "group1", "cons1", Some(3)))]
    #[case("  SUB   orders  group1 cons1\r", sub("orders", "group1", "cons1", None))]
    fn parses_every_form(#[case] line: &str, #[case] expected: SubscribeRequest) {
        assert_eq!(SubscribeRequest::parse(line).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("SUB")]
    #[case("PUB orders")]
    #[case("sub orders")]
    #[case("SUB orders abc")]
    #[case("SUB orders -1")]
    #[case("SUB orders g c x")]
    #[case("SUB orders g c 1 extra")]
    #[case("SUB ../etc")]
    fn rejects_malformed_lines(#[case] line: &str) {
        assert!(matches!(
            SubscribeRequest::parse(line),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[tokio::test]
    async fn committed_offset_is_used_without_explicit_one() -> AppResult<()> {
        let log_pipe = LogPipe::in_memory();
        log_pipe.commit_offset("orders", "group1", "cons1", 2).await?;

        let resume = SubscribeRequest::parse("SUB orders group1 cons1")?;
        assert_eq!(resume.starting_offset(&log_pipe).await?, 2);

        let explicit = SubscribeRequest::parse("SUB orders group1 cons1 0")?;
        assert_eq!(explicit.starting_offset(&log_pipe).await?, 0);

        let fresh = SubscribeRequest::parse("SUB orders group2 cons9")?;
        assert_eq!(fresh.starting_offset(&log_pipe).await?, 0);
        Ok(())
    }
}

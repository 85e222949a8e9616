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

//! Read-only aggregate views over the stores.
//!
//! Everything here is a pure function of the current log and offset contents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::LogPipe;
use crate::message::CommitRecord;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicTag {
    /// The topic holds records.
    ProducerEvents,
    /// The topic is only known from consumer commits.
    ConsumerEvents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub topic: String,
    pub tag: TopicTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerDetail {
    pub consumer_id: String,
    pub group_id: String,
    pub committed_offset: u64,
    pub percent_read: f64,
    pub events_read_approx: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInsights {
    pub total_unique_readers: usize,
    pub avg_progress_percent: f64,
    pub activity_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    pub topic: String,
    pub event_count: u64,
    /// `YYYY-MM-DD` of every day a record was produced on.
    pub produced_dates: Vec<String>,
    pub consumers: Vec<String>,
    pub groups: Vec<String>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub consumer_details: Vec<ConsumerDetail>,
    pub insights: TopicInsights,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerProgress {
    pub topic: String,
    pub group_id: String,
    pub committed_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub consumer_id: String,
    pub groups: Vec<String>,
    pub topics: Vec<String>,
    pub progress: Vec<ConsumerProgress>,
    pub total_events_consumed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupProgress {
    pub topic: String,
    pub avg_offset: f64,
    pub consumers_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInsights {
    pub total_consumers: usize,
    pub avg_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub group_id: String,
    pub consumers: Vec<String>,
    pub topics: Vec<String>,
    pub progress: Vec<GroupProgress>,
    pub total_events_consumed: u64,
    pub insights: GroupInsights,
}

fn percent(offset: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    offset.min(count) as f64 * 100.0 / count as f64
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn activity_level(avg_progress: f64) -> &'static str {
    if avg_progress < 34.0 {
        "low"
    } else if avg_progress < 67.0 {
        "medium"
    } else {
        "high"
    }
}

impl LogPipe {
    /// Topics with records, followed by topics only seen in commits, each sorted by name.
    pub async fn topics(&self) -> AppResult<Vec<TopicSummary>> {
        let produced: BTreeSet<String> = self.log_store().topics().await?.into_iter().collect();
        let consumed: BTreeSet<String> = self
            .offset_store()
            .commits()
            .await?
            .into_iter()
            .map(|c| c.topic)
            .filter(|topic| !produced.contains(topic))
            .collect();

        let mut summaries: Vec<TopicSummary> = produced
            .into_iter()
            .map(|topic| TopicSummary {
                topic,
                tag: TopicTag::ProducerEvents,
            })
            .collect();
        summaries.extend(consumed.into_iter().map(|topic| TopicSummary {
            topic,
            tag: TopicTag::ConsumerEvents,
        }));
        Ok(summaries)
    }

    /// Detailed view of one topic, [`AppError::TopicNotFound`] when it has no records.
    pub async fn topic_stats(&self, topic: &str) -> AppResult<TopicStats> {
        let event_count = self.log_store().topic_length(topic).await?;
        if event_count == 0 {
            return Err(AppError::TopicNotFound(topic.to_string()));
        }
        let records = self
            .log_store()
            .read(topic, 0, event_count as usize)
            .await?;
        let produced_dates: BTreeSet<String> = records
            .iter()
            .map(|r| r.timestamp.format("%Y-%m-%d").to_string())
            .collect();

        let commits: Vec<CommitRecord> = self
            .offset_store()
            .commits()
            .await?
            .into_iter()
            .filter(|c| c.topic == topic)
            .collect();
        let consumers: BTreeSet<String> = commits.iter().map(|c| c.consumer_id.clone()).collect();
        let groups: BTreeSet<String> = commits.iter().map(|c| c.group_id.clone()).collect();
        let consumer_details: Vec<ConsumerDetail> = commits
            .iter()
            .map(|c| ConsumerDetail {
                consumer_id: c.consumer_id.clone(),
                group_id: c.group_id.clone(),
                committed_offset: c.offset,
                percent_read: percent(c.offset, event_count),
                events_read_approx: c.offset.min(event_count),
            })
            .collect();
        let avg_progress_percent = mean(consumer_details.iter().map(|d| d.percent_read));

        Ok(TopicStats {
            topic: topic.to_string(),
            event_count,
            produced_dates: produced_dates.into_iter().collect(),
            first_event_at: records.first().map(|r| r.timestamp),
            last_event_at: records.last().map(|r| r.timestamp),
            insights: TopicInsights {
                total_unique_readers: consumers.len(),
                avg_progress_percent,
                activity_level: activity_level(avg_progress_percent).to_string(),
            },
            consumers: consumers.into_iter().collect(),
            groups: groups.into_iter().collect(),
            consumer_details,
        })
    }

    /// Progress of every consumer, or only of `consumer_id` when given.
    pub async fn consumers(&self, consumer_id: Option<&str>) -> AppResult<Vec<ConsumerStats>> {
        let mut by_consumer: BTreeMap<String, Vec<CommitRecord>> = BTreeMap::new();
        for commit in self.offset_store().commits().await? {
            if consumer_id.is_some_and(|id| id != commit.consumer_id) {
                continue;
            }
            by_consumer
                .entry(commit.consumer_id.clone())
                .or_default()
                .push(commit);
        }

        Ok(by_consumer
            .into_iter()
            .map(|(consumer_id, commits)| ConsumerStats {
                consumer_id,
                groups: commits
                    .iter()
                    .map(|c| c.group_id.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                topics: commits
                    .iter()
                    .map(|c| c.topic.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                total_events_consumed: commits.iter().map(|c| c.offset).sum(),
                progress: commits
                    .into_iter()
                    .map(|c| ConsumerProgress {
                        topic: c.topic,
                        group_id: c.group_id,
                        committed_offset: c.offset,
                    })
                    .collect(),
            })
            .collect())
    }

    /// Progress of every group, or only of `group_id` when given.
    pub async fn groups(&self, group_id: Option<&str>) -> AppResult<Vec<GroupStats>> {
        let mut by_group: BTreeMap<String, Vec<CommitRecord>> = BTreeMap::new();
        for commit in self.offset_store().commits().await? {
            if group_id.is_some_and(|id| id != commit.group_id) {
                continue;
            }
            by_group
                .entry(commit.group_id.clone())
                .or_default()
                .push(commit);
        }

        let mut stats = Vec::with_capacity(by_group.len());
        for (group_id, commits) in by_group {
            let mut per_topic: BTreeMap<String, Vec<u64>> = BTreeMap::new();
            for commit in &commits {
                per_topic
                    .entry(commit.topic.clone())
                    .or_default()
                    .push(commit.offset);
            }

            let mut progress = Vec::with_capacity(per_topic.len());
            let mut topic_progress = Vec::with_capacity(per_topic.len());
            for (topic, offsets) in per_topic {
                let avg_offset = mean(offsets.iter().map(|o| *o as f64));
                let count = self.log_store().topic_length(&topic).await?;
                topic_progress.push(if count == 0 {
                    0.0
                } else {
                    (avg_offset * 100.0 / count as f64).min(100.0)
                });
                progress.push(GroupProgress {
                    topic,
                    avg_offset,
                    consumers_count: offsets.len(),
                });
            }

            let consumers: BTreeSet<String> =
                commits.iter().map(|c| c.consumer_id.clone()).collect();
            stats.push(GroupStats {
                insights: GroupInsights {
                    total_consumers: consumers.len(),
                    avg_progress: mean(topic_progress),
                },
                group_id,
                consumers: consumers.into_iter().collect(),
                topics: progress.iter().map(|p| p.topic.clone()).collect(),
                total_events_consumed: commits.iter().map(|c| c.offset).sum(),
                progress,
            });
        }
        Ok(stats)
    }
}

//! Topic provisioning.
//!
//! Every topic a sweep writes to is created up front. Creation is idempotent:
//! a topic that already exists is a success, after which its partition count
//! is checked against the requested one. A mismatch is never reconciled; it
//! is reported (and, in strict mode, fatal).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{Broker, CreateOutcome, TopicSpec};
use crate::compression::CompressionCodec;
use crate::error::BenchError;

/// 30 days
const MAIN_RETENTION_MS: &str = "2592000000";
/// 365 days
const ANALYTICS_RETENTION_MS: &str = "31536000000";
/// 1 day
const ANALYTICS_SEGMENT_MS: &str = "86400000";

/// What provisioning found for one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopicStatus {
    Created,
    AlreadyExists,
    /// The topic existed with a different partition count
    PartitionMismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub topic: String,
    #[serde(flatten)]
    pub status: TopicStatus,
}

pub fn batch_topic(prefix: &str) -> String {
    format!("{}-batch-test", prefix)
}

pub fn compression_topic(prefix: &str, codec: CompressionCodec) -> String {
    format!("{}-comp-{}", prefix, codec)
}

pub fn partition_topic(prefix: &str, partitions: u32) -> String {
    format!("{}-part-{}", prefix, partitions)
}

/// Every topic an invocation needs, named from `prefix`.
///
/// Duplicate partition counts produce a single topic.
pub fn default_catalog(prefix: &str, partition_counts: &[u32]) -> Vec<TopicSpec> {
    let mut catalog = vec![
        TopicSpec::new(format!("{}-main", prefix), 4).with_config("retention.ms", MAIN_RETENTION_MS),
        TopicSpec::new(batch_topic(prefix), 3),
    ];

    for codec in CompressionCodec::ALL {
        catalog.push(TopicSpec::new(compression_topic(prefix, codec), 3));
    }

    for &count in partition_counts {
        let name = partition_topic(prefix, count);
        if !catalog.iter().any(|t| t.name == name) {
            catalog.push(TopicSpec::new(name, count));
        }
    }

    catalog.push(
        TopicSpec::new(format!("{}-analytics", prefix), 8)
            .with_config("retention.ms", ANALYTICS_RETENTION_MS)
            .with_config("segment.ms", ANALYTICS_SEGMENT_MS)
            .with_config("cleanup.policy", "delete"),
    );

    catalog
}

/// Creates topics through a broker's administrative interface
pub struct TopicProvisioner {
    broker: Arc<dyn Broker>,
    strict: bool,
}

impl TopicProvisioner {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            strict: false,
        }
    }

    /// Fail on partition-count mismatches instead of warning
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Ensure every topic in `topics` exists, in order.
    ///
    /// The first administrative error aborts the whole step; nothing is
    /// retried.
    pub async fn ensure(&self, topics: &[TopicSpec]) -> Result<Vec<ProvisionOutcome>> {
        let mut outcomes = Vec::with_capacity(topics.len());

        for spec in topics {
            let created = self.broker.create_topic(spec).await.map_err(|e| {
                BenchError::Provisioning {
                    topic: spec.name.clone(),
                    reason: format!("{:#}", e),
                }
            })?;

            let status = match created {
                CreateOutcome::Created => {
                    info!(
                        "Created topic '{}' ({} partitions)",
                        spec.name, spec.partitions
                    );
                    TopicStatus::Created
                }
                CreateOutcome::AlreadyExists => {
                    info!("Topic '{}' already exists", spec.name);
                    self.check_partitions(spec).await?
                }
            };

            outcomes.push(ProvisionOutcome {
                topic: spec.name.clone(),
                status,
            });
        }

        Ok(outcomes)
    }

    async fn check_partitions(&self, spec: &TopicSpec) -> Result<TopicStatus> {
        let actual = match self.broker.partition_count(&spec.name).await {
            Ok(Some(actual)) => actual,
            Ok(None) => {
                debug!("No metadata for '{}'; skipping partition check", spec.name);
                return Ok(TopicStatus::AlreadyExists);
            }
            Err(e) => {
                warn!("Could not check partitions of '{}': {:#}", spec.name, e);
                return Ok(TopicStatus::AlreadyExists);
            }
        };

        if actual == spec.partitions {
            return Ok(TopicStatus::AlreadyExists);
        }

        if self.strict {
            return Err(BenchError::TopicMismatch {
                topic: spec.name.clone(),
                expected: spec.partitions,
                actual,
            }
            .into());
        }

        warn!(
            "Topic '{}' has {} partitions, expected {}; results for it may not be comparable",
            spec.name, actual, spec.partitions
        );
        Ok(TopicStatus::PartitionMismatch {
            expected: spec.partitions,
            actual,
        })
    }
}

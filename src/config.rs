use std::time::Duration;

use crate::gateway::intents;
use crate::gateway::ratelimit::DEFAULT_IDENTIFY_INTERVAL;
use crate::gateway::ShardConfig;

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

pub struct Config {
    pub token: String,
    pub gateway_url: String,
    pub api_version: u8,
    pub shard_count: u32,
    pub shards: Vec<u32>,
    pub intents: u64,
    pub large_threshold: Option<u32>,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub identify_interval: Duration,
    pub max_concurrency: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let token = std::env::var("SHARDGATE_TOKEN").expect("SHARDGATE_TOKEN is required");

        let shard_count: u32 = std::env::var("SHARDGATE_SHARD_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let shards = std::env::var("SHARDGATE_SHARDS")
            .ok()
            .map(|v| parse_shard_ids(&v, shard_count))
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| (0..shard_count).collect());

        let intents = std::env::var("SHARDGATE_INTENTS")
            .map(|v| intents::parse_intents(&v))
            .unwrap_or_else(|_| intents::non_privileged());

        let reconnect_min = env_millis("SHARDGATE_RECONNECT_MIN_MS")
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(1));
        let reconnect_max = env_millis("SHARDGATE_RECONNECT_MAX_MS")
            .unwrap_or(Duration::from_secs(60))
            .max(reconnect_min);

        Self {
            token,
            gateway_url: std::env::var("SHARDGATE_URL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),
            api_version: std::env::var("SHARDGATE_API_VERSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            shard_count,
            shards,
            intents,
            large_threshold: std::env::var("SHARDGATE_LARGE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| (50..=250).contains(n)),
            reconnect_min,
            reconnect_max,
            identify_interval: env_millis("SHARDGATE_IDENTIFY_INTERVAL_MS")
                .unwrap_or(DEFAULT_IDENTIFY_INTERVAL),
            max_concurrency: std::env::var("SHARDGATE_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
        }
    }

    /// Connection settings for one shard of this process.
    pub fn shard(&self, shard_id: u32) -> ShardConfig {
        ShardConfig {
            gateway_url: self.gateway_url.clone(),
            token: self.token.clone(),
            shard_id,
            shard_count: self.shard_count,
            intents: self.intents,
            large_threshold: self.large_threshold,
            presence: None,
            reconnect_min: self.reconnect_min,
            reconnect_max: self.reconnect_max,
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Parse `0,2,5` or `0-3` style shard lists. Ids outside the shard count are skipped.
fn parse_shard_ids(list: &str, shard_count: u32) -> Vec<u32> {
    let mut ids = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((start, end)) => match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                (Ok(start), Ok(end)) => start..=end,
                _ => {
                    tracing::warn!("ignoring shard range '{}'", part);
                    continue;
                }
            },
            None => match part.parse::<u32>() {
                Ok(id) => id..=id,
                Err(_) => {
                    tracing::warn!("ignoring shard id '{}'", part);
                    continue;
                }
            },
        };
        for id in range {
            if id < shard_count && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

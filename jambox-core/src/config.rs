use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

/// The configuration shared by every room, pool, and connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many workers each dispatch pool runs concurrently
    pub worker_count: usize,
    /// How many tasks can wait in a dispatch pool's queue before submissions are rejected
    pub task_queue_size: usize,
    /// The maximum number of tracks a room's queue can hold
    pub playlist_capacity: usize,
    /// How long a metadata fetch may take
    pub metadata_timeout: Duration,
    /// How long an audio fetch may take
    pub audio_timeout: Duration,
    /// How long a created room waits for its first member before it is destroyed
    pub room_grace_period: Duration,
    /// How long an unused session stays valid
    pub session_grace_period: Duration,
    /// How many outbound messages a peer can have buffered before it is evicted
    pub peer_send_capacity: usize,
    /// The largest inbound message accepted from a peer, in bytes
    pub read_limit: usize,
    /// How long a single write to a peer may take
    pub write_wait: Duration,
    /// How long a peer may stay silent before it is considered gone
    pub pong_wait: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    /// Returns the default configuration with any overrides from the environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = read_var("MAX_CONCURRENT_WORKER_PER_POOL")? {
            config.worker_count = value;
        }

        if let Some(value) = read_var("MAX_TASK_QUEUE_SIZE")? {
            config.task_queue_size = value;
        }

        if let Some(value) = read_var("JAMBOX_PLAYLIST_CAPACITY")? {
            config.playlist_capacity = value;
        }

        if let Some(value) = read_var("JAMBOX_PEER_SEND_CAPACITY")? {
            config.peer_send_capacity = value;
        }

        if let Some(secs) = read_var("JAMBOX_METADATA_TIMEOUT_SECS")? {
            config.metadata_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = read_var("JAMBOX_AUDIO_TIMEOUT_SECS")? {
            config.audio_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = read_var("JAMBOX_ROOM_GRACE_SECS")? {
            config.room_grace_period = Duration::from_secs(secs);
        }

        if let Some(secs) = read_var("JAMBOX_SESSION_GRACE_SECS")? {
            config.session_grace_period = Duration::from_secs(secs);
        }

        if let Some(value) = read_var("JAMBOX_READ_LIMIT")? {
            config.read_limit = value;
        }

        if let Some(secs) = read_var("JAMBOX_WRITE_WAIT_SECS")? {
            config.write_wait = Duration::from_secs(secs);
        }

        if let Some(secs) = read_var::<u64>("JAMBOX_PONG_WAIT_SECS")? {
            // Pings are derived from this and need a non-zero period
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: "JAMBOX_PONG_WAIT_SECS",
                    value: secs.to_string(),
                });
            }

            config.pong_wait = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// How often a peer is pinged. Always shorter than the pong wait.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    /// The worker count, never less than one
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    /// The task queue size, never less than one
    pub fn effective_task_queue_size(&self) -> usize {
        self.task_queue_size.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Extraction is expensive, so only one at a time per pool
            worker_count: 1,
            task_queue_size: 1,
            playlist_capacity: 1024,
            metadata_timeout: Duration::from_secs(30),
            // Audio downloads can be large
            audio_timeout: Duration::from_secs(60),
            room_grace_period: Duration::from_secs(10),
            session_grace_period: Duration::from_secs(10),
            peer_send_capacity: 1024,
            // 8 KiB is plenty for signaling messages
            read_limit: 1024 * 8,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
        }
    }
}

fn read_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ping_period_is_shorter_than_pong_wait() {
        let config = Config::default();

        assert_eq!(config.ping_period(), Duration::from_secs(54));
        assert!(config.ping_period() < config.pong_wait);
    }

    #[test]
    fn test_invalid_env_value_is_reported() {
        env::set_var("JAMBOX_TEST_INVALID_USIZE", "many");

        let result = read_var::<usize>("JAMBOX_TEST_INVALID_USIZE");

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "JAMBOX_TEST_INVALID_USIZE", .. })
        ));
    }

    #[test]
    fn test_socket_limits_come_from_env() {
        env::set_var("JAMBOX_READ_LIMIT", "4096");
        env::set_var("JAMBOX_WRITE_WAIT_SECS", "5");
        env::set_var("JAMBOX_PONG_WAIT_SECS", "30");

        let config = Config::from_env();

        env::set_var("JAMBOX_PONG_WAIT_SECS", "0");
        let zero_pong = Config::from_env();

        env::remove_var("JAMBOX_READ_LIMIT");
        env::remove_var("JAMBOX_WRITE_WAIT_SECS");
        env::remove_var("JAMBOX_PONG_WAIT_SECS");

        let config = config.unwrap();
        assert_eq!(config.read_limit, 4096);
        assert_eq!(config.write_wait, Duration::from_secs(5));
        assert_eq!(config.pong_wait, Duration::from_secs(30));
        assert_eq!(config.ping_period(), Duration::from_secs(27));

        assert!(matches!(
            zero_pong,
            Err(ConfigError::Invalid { name: "JAMBOX_PONG_WAIT_SECS", .. })
        ));
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let config = Config {
            worker_count: 0,
            task_queue_size: 0,
            ..Default::default()
        };

        assert_eq!(config.effective_worker_count(), 1);
        assert_eq!(config.effective_task_queue_size(), 1);
    }
}

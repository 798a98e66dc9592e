use common::env_or;
use spsc::paths;
use std::env;
use std::path::PathBuf;

pub use common::Environment;

/// Shape of the randomized traffic the demo jobs push through a pipe.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Bytes the producer writes before closing.
    pub total_bytes: u64,
    /// Largest single write; each write is 1..=max_chunk bytes.
    pub max_chunk: usize,
    /// Largest single read request; each read asks for 1..=max_read bytes.
    pub max_read: usize,
    /// Occasionally pause either side for up to 10ms.
    pub jitter: bool,
    /// Fixed RNG seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            total_bytes: 1_000_000,
            max_chunk: 20,
            max_read: 10,
            jitter: true,
            seed: None,
        }
    }
}

impl TrafficConfig {
    pub fn rng(&self) -> fastrand::Rng {
        match self.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub environment: Environment,
    pub capacity: usize,
    pub region_path: PathBuf,
    pub otlp_endpoint: Option<String>,
    pub traffic: TrafficConfig,
}

impl DemoConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();
        let defaults = TrafficConfig::default();

        let capacity = env_or("SPSC_CAPACITY", paths::DEFAULT_CAPACITY);
        let region_path = env::var("SPSC_REGION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(paths::DEFAULT_REGION_PATH));
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty());

        let traffic = TrafficConfig {
            total_bytes: env_or("SPSC_TOTAL_BYTES", defaults.total_bytes),
            max_chunk: env_or("SPSC_MAX_CHUNK", defaults.max_chunk),
            max_read: env_or("SPSC_MAX_READ", defaults.max_read),
            jitter: env_or("SPSC_JITTER", defaults.jitter),
            seed: env::var("SPSC_SEED").ok().and_then(|s| s.parse().ok()),
        };

        let config = Self {
            environment,
            capacity,
            region_path,
            otlp_endpoint,
            traffic,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        spsc::region_size(self.capacity)?;
        anyhow::ensure!(self.traffic.max_chunk >= 1, "max_chunk must be at least 1");
        anyhow::ensure!(self.traffic.max_read >= 1, "max_read must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DemoConfig {
        DemoConfig {
            environment: Environment::Development,
            capacity: 64,
            region_path: PathBuf::from("/dev/shm/test_pipe"),
            otlp_endpoint: None,
            traffic: TrafficConfig::default(),
        }
    }

    #[test]
    fn test_default_traffic_matches_demo_shape() {
        let traffic = TrafficConfig::default();
        assert_eq!(traffic.max_chunk, 20);
        assert_eq!(traffic.max_read, 10);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = config();
        config.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_chunks() {
        let mut config = config();
        config.traffic.max_chunk = 0;
        assert!(config.validate().is_err());
        assert!(self::config().validate().is_ok());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let traffic = TrafficConfig {
            seed: Some(42),
            ..TrafficConfig::default()
        };
        let a: Vec<u32> = {
            let mut rng = traffic.rng();
            (0..8).map(|_| rng.u32(..)).collect()
        };
        let b: Vec<u32> = {
            let mut rng = traffic.rng();
            (0..8).map(|_| rng.u32(..)).collect()
        };
        assert_eq!(a, b);
    }
}

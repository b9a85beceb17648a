//! Process configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use dixit_room::EngineConfig;

/// Where to listen and how the room engine is tuned.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads overrides from the process environment:
    ///
    /// | Variable | Effect |
    /// |---|---|
    /// | `DIXIT_BIND` | listen address |
    /// | `DIXIT_AFK_THRESHOLD_SECS` | idle time before a bot takes over |
    /// | `DIXIT_JANITOR_PERIOD_SECS` | sweep interval |
    /// | `DIXIT_CATALOG_SIZE` | number of cards |
    /// | `DIXIT_SEED` | fixed RNG seed |
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bind) = lookup("DIXIT_BIND").filter(|b| !b.trim().is_empty()) {
            config.bind = bind.trim().to_string();
        }

        let engine = &mut config.engine;
        if let Some(secs) = parse::<u64>(&lookup, "DIXIT_AFK_THRESHOLD_SECS") {
            engine.afk_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "DIXIT_JANITOR_PERIOD_SECS") {
            if secs == 0 {
                tracing::warn!("DIXIT_JANITOR_PERIOD_SECS must be positive, keeping default");
            } else {
                engine.janitor_period = Duration::from_secs(secs);
            }
        }
        if let Some(size) = parse::<u32>(&lookup, "DIXIT_CATALOG_SIZE") {
            engine.catalog_size = size;
        }
        if let Some(seed) = parse::<u64>(&lookup, "DIXIT_SEED") {
            engine.seed = Some(seed);
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

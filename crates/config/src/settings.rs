//! Process-wide engine settings, read from the environment.

use std::str::FromStr;
use std::time::Duration;

pub const ENV_LOOKUP_TIMEOUT_MS: &str = "GRAFT_LOOKUP_TIMEOUT_MS";
pub const ENV_MAX_OVERRIDES_BYTES: &str = "GRAFT_MAX_OVERRIDES_BYTES";

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_OVERRIDES_BYTES: usize = 1 << 20; // 1 MiB

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Upper bound on all reference lookups of one resolution.
    pub lookup_timeout: Duration,
    /// Largest overrides or schema document accepted.
    pub max_overrides_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
            max_overrides_bytes: DEFAULT_MAX_OVERRIDES_BYTES,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl Settings {
    /// Defaults overridden by any valid `GRAFT_*` variables; unparsable
    /// values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lookup_timeout: env_parse::<u64>(ENV_LOOKUP_TIMEOUT_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.lookup_timeout),
            max_overrides_bytes: env_parse(ENV_MAX_OVERRIDES_BYTES).unwrap_or(defaults.max_overrides_bytes),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.lookup_timeout, Duration::from_secs(5));
        assert_eq!(s.max_overrides_bytes, 1_048_576);
        let t = s.with_lookup_timeout(Duration::from_millis(10));
        assert_eq!(t.lookup_timeout, Duration::from_millis(10));
    }
}

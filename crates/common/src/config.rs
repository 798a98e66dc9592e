use std::env;
use std::str::FromStr;

/// Deployment flavour, selected by the `ENVIRONMENT` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Self {
        Self::parse(env::var("ENVIRONMENT").ok().as_deref())
    }

    /// Anything that is not recognisably production counts as development.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Read `key` from the environment, falling back to `default` when it is
/// unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

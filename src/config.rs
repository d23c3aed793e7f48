//! Layered configuration: a TOML file overlaid with environment variables.
//!
//! Mirrors the pattern of tracking which keys were overridden from the
//! environment so `GET /health` (and logs at startup) can report where a
//! setting actually came from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Records which config keys were overridden by environment variables, and
/// which env var did it, for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvOverrides {
    #[serde(default)]
    applied: HashMap<String, String>,
}

impl EnvOverrides {
    fn record(&mut self, key: &str, env_var: &str) {
        self.applied.insert(key.to_string(), env_var.to_string());
    }

    pub fn is_overridden(&self, key: &str) -> bool {
        self.applied.contains_key(key)
    }

    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.applied.get(key).map(String::as_str)
    }

    pub fn all(&self) -> impl Iterator<Item = (&str, &str)> {
        self.applied.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

macro_rules! env_str {
    ($overrides:expr, $target:expr, $key:literal, $env:literal) => {
        if let Ok(v) = std::env::var($env) {
            $target = v;
            $overrides.record($key, $env);
        }
    };
}

macro_rules! env_opt_str {
    ($overrides:expr, $target:expr, $key:literal, $env:literal) => {
        if let Ok(v) = std::env::var($env) {
            $target = Some(v);
            $overrides.record($key, $env);
        }
    };
}

macro_rules! env_bool {
    ($overrides:expr, $target:expr, $key:literal, $env:literal) => {
        if let Ok(v) = std::env::var($env) {
            if let Ok(parsed) = v.parse::<bool>() {
                $target = parsed;
                $overrides.record($key, $env);
            }
        }
    };
}

macro_rules! env_parse {
    ($overrides:expr, $target:expr, $key:literal, $env:literal) => {
        if let Ok(v) = std::env::var($env) {
            if let Ok(parsed) = v.parse() {
                $target = parsed;
                $overrides.record($key, $env);
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub graceful_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            graceful_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "aiclient".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected `x-api-key` / bearer token. `None` disables auth (local dev only).
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout_secs: u64,
    pub kiro_api_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_conns: 256,
            max_idle_conns_per_host: 32,
            idle_conn_timeout_secs: 90,
            kiro_api_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub account_cache_ttl_secs: u64,
    pub health_cooldown_secs: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            account_cache_ttl_secs: 5,
            health_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub orchestrator: OrchestratorConfig,
    pub transport: TransportConfig,
    pub selector: SelectorConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

impl Config {
    /// Load config from a TOML file if present, then apply environment
    /// variable overrides. Missing file is not an error: defaults apply.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn redis_key_prefix(&self) -> &str {
        &self.redis.key_prefix
    }

    pub fn account_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.selector.account_cache_ttl_secs)
    }

    pub fn health_cooldown(&self) -> Duration {
        Duration::from_secs(self.selector.health_cooldown_secs)
    }

    pub fn kiro_api_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.kiro_api_timeout_secs)
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.idle_conn_timeout_secs)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.server.graceful_timeout_secs)
    }

    fn apply_env_overrides(&mut self) {
        let mut overrides = EnvOverrides::default();

        env_str!(overrides, self.server.host, "server.host", "HOST");
        env_parse!(overrides, self.server.port, "server.port", "PORT");
        env_parse!(
            overrides,
            self.server.graceful_timeout_secs,
            "server.graceful_timeout_secs",
            "GRACEFUL_TIMEOUT"
        );

        env_str!(overrides, self.redis.url, "redis.url", "REDIS_URL");
        env_str!(
            overrides,
            self.redis.key_prefix,
            "redis.key_prefix",
            "REDIS_KEY_PREFIX"
        );

        env_opt_str!(overrides, self.auth.api_key, "auth.api_key", "API_KEY");

        env_parse!(
            overrides,
            self.orchestrator.max_retries,
            "orchestrator.max_retries",
            "MAX_RETRIES"
        );

        env_parse!(
            overrides,
            self.transport.max_conns,
            "transport.max_conns",
            "MAX_CONNS"
        );
        env_parse!(
            overrides,
            self.transport.max_idle_conns_per_host,
            "transport.max_idle_conns_per_host",
            "MAX_IDLE_CONNS_PER_HOST"
        );
        env_parse!(
            overrides,
            self.transport.idle_conn_timeout_secs,
            "transport.idle_conn_timeout_secs",
            "IDLE_CONN_TIMEOUT"
        );
        env_parse!(
            overrides,
            self.transport.kiro_api_timeout_secs,
            "transport.kiro_api_timeout_secs",
            "KIRO_API_TIMEOUT"
        );

        env_parse!(
            overrides,
            self.selector.account_cache_ttl_secs,
            "selector.account_cache_ttl_secs",
            "ACCOUNT_CACHE_TTL"
        );
        env_parse!(
            overrides,
            self.selector.health_cooldown_secs,
            "selector.health_cooldown_secs",
            "HEALTH_COOLDOWN"
        );

        env_str!(overrides, self.logging.level, "logging.level", "LOG_LEVEL");
        env_bool!(overrides, self.logging.json, "logging.json", "LOG_JSON");

        self.env_overrides = overrides;
    }
}

/// Where to load the token being imported from, mirroring
/// `kiro_gateway::auth::credentials`'s three sources.
#[derive(Debug, Clone)]
pub enum ImportSource {
    JsonFile(String),
    Sqlite(String),
    Env,
}

/// Subcommands this binary understands. Plain invocation (no subcommand)
/// runs the server.
#[derive(Debug, Default)]
pub enum Command {
    #[default]
    Serve,
    ImportAccount {
        source: ImportSource,
        region: Option<String>,
        profile_arn: Option<String>,
    },
}

/// CLI argument parsing, independent of env/TOML layering.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub command: Command,
}

pub fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = CliArgs::default();
    let mut raw: Vec<String> = std::env::args().skip(1).collect();

    if raw.first().map(String::as_str) == Some("import-account") {
        raw.remove(0);
        args.command = parse_import_account_args(raw)?;
        return Ok(args);
    }

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path argument"))?;
                args.config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("kiro-pool-gateway {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unrecognized argument: {other}");
            }
        }
    }

    if args.config_path.is_none() {
        if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
            args.config_path = Some(PathBuf::from(path));
        }
    }

    Ok(args)
}

fn parse_import_account_args(raw: Vec<String>) -> anyhow::Result<Command> {
    let mut file: Option<String> = None;
    let mut sqlite: Option<String> = None;
    let mut from_env = false;
    let mut region = None;
    let mut profile_arn = None;

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--file" => file = Some(iter.next().ok_or_else(|| anyhow::anyhow!("--file requires a path"))?),
            "--sqlite" => sqlite = Some(iter.next().ok_or_else(|| anyhow::anyhow!("--sqlite requires a path"))?),
            "--env" => from_env = true,
            "--region" => region = Some(iter.next().ok_or_else(|| anyhow::anyhow!("--region requires a value"))?),
            "--profile-arn" => {
                profile_arn = Some(iter.next().ok_or_else(|| anyhow::anyhow!("--profile-arn requires a value"))?)
            }
            other => anyhow::bail!("unrecognized import-account argument: {other}"),
        }
    }

    let source = match (file, sqlite, from_env) {
        (Some(path), None, false) => ImportSource::JsonFile(path),
        (None, Some(path), false) => ImportSource::Sqlite(path),
        (None, None, true) => ImportSource::Env,
        _ => anyhow::bail!("import-account requires exactly one of --file <PATH>, --sqlite <PATH>, --env"),
    };

    Ok(Command::ImportAccount { source, region, profile_arn })
}

pub fn print_usage() {
    println!(
        "kiro-pool-gateway {}\n\n\
         Usage: kiro-pool-gateway [OPTIONS]\n       \
         kiro-pool-gateway import-account (--file <PATH> | --sqlite <PATH> | --env) [--region <REGION>] [--profile-arn <ARN>]\n\n\
         Options:\n  \
         -c, --config <PATH>  Path to a TOML config file (default: env GATEWAY_CONFIG, or built-in defaults)\n  \
         -h, --help           Print this message\n  \
         -V, --version        Print version\n\n\
         import-account provisions a new pool entry: loads a token from the given\n\
         source, saves it to Redis, and registers a healthy Account in the pool hash.",
        env!("CARGO_PKG_VERSION")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_usage_does_not_panic() {
        print_usage();
    }

    #[test]
    fn test_default_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_redis_defaults() {
        let config = Config::default();
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.redis_key_prefix(), "aiclient");
    }
}

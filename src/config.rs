//! Configuration management for the mining client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::ledger::http::BackoffConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::worker::{PoolConfig, MAX_NONCE_BUDGET};
use crate::{Error, Result, SolverIdentity, Wei};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Ledger backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerType {
    /// JSON gateway in front of the mining contract
    Http,
    /// In-process ledger for dry runs
    Simulation,
}

impl fmt::Display for LedgerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerType::Http => write!(f, "http"),
            LedgerType::Simulation => write!(f, "simulation"),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Complete configuration for the mining client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "aimine-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "Proof-of-AI-Work mining client",
    long_about = "Searches keccak nonces over locally built and AI-generated candidate texts, racing other miners for each ledger challenge"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(default)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Number of hash worker threads
    #[arg(short = 'c', long, env = "AIMINE_WORKERS", default_value_t = default_workers())]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Nonce budget per candidate
    #[arg(long, default_value_t = default_max_nonce())]
    #[serde(default = "default_max_nonce")]
    pub max_nonce: u64,

    /// Hashes between two progress reports of one worker
    #[arg(long, default_value_t = default_report_interval())]
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,

    /// Candidates requested from the text generator per round
    #[arg(long, default_value_t = default_ai_batch_size())]
    #[serde(default = "default_ai_batch_size")]
    pub ai_batch_size: usize,

    /// Chat model used for candidate generation
    #[arg(long, env = "AIMINE_AI_MODEL", default_value = "gpt-4o-mini")]
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "AIMINE_AI_BASE_URL", default_value = "https://api.openai.com/v1")]
    #[serde(default = "default_ai_base_url")]
    pub ai_base_url: String,

    /// Timeout of one generation request
    #[arg(long, default_value = "30s")]
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout: String,

    /// API key; without one the remote wave uses fallback texts only
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    #[serde(default)]
    pub openai_key: Option<String>,

    /// Ledger backend
    #[arg(short = 'L', long, env = "AIMINE_LEDGER", default_value = "http")]
    #[serde(default = "default_ledger")]
    pub ledger: LedgerType,

    /// Ledger gateway URL
    #[arg(short = 'u', long, env = "AIMINE_LEDGER_URL", default_value = "http://localhost:8080")]
    #[serde(default = "default_ledger_url")]
    pub ledger_url: String,

    /// Solver address mixed into every digest (20 bytes hex)
    #[arg(short = 'a', long, env = "AIMINE_SOLVER_ADDRESS")]
    #[serde(default)]
    pub solver_address: Option<String>,

    /// Gas limit of a submission
    #[arg(long, default_value_t = default_gas_limit())]
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Protocol fee per submission, in wei
    #[arg(long, default_value = "1000000000000000")]
    #[serde(default = "default_submission_fee")]
    pub submission_fee: String,

    /// Percent added to the network gas price
    #[arg(long, default_value_t = default_gas_premium_percent())]
    #[serde(default = "default_gas_premium_percent")]
    pub gas_premium_percent: u64,

    /// Wait between polls while the ledger is paused
    #[arg(long, default_value = "30s")]
    #[serde(default = "default_pause_interval")]
    pub pause_interval: String,

    /// Wait after a failed round
    #[arg(long, default_value = "5s")]
    #[serde(default = "default_error_backoff")]
    pub error_backoff: String,

    /// Wait after a round without a solution
    #[arg(long, default_value = "1s")]
    #[serde(default = "default_miss_delay")]
    pub miss_delay: String,

    /// HTTP request timeout
    #[arg(long, default_value = "30s")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: String,

    /// Maximum retry attempts for HTTP requests
    #[arg(long, default_value_t = default_max_retries())]
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base retry delay
    #[arg(long, default_value = "100ms")]
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    /// Maximum retry delay
    #[arg(long, default_value = "5s")]
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: String,

    /// Leading zero bits required by the simulated ledger
    #[arg(long, default_value_t = default_simulation_difficulty_bits())]
    #[serde(default = "default_simulation_difficulty_bits")]
    pub simulation_difficulty_bits: u32,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process arguments and optional file
    pub async fn load() -> Result<Self> {
        Self::load_from(std::env::args_os()).await
    }

    /// Load configuration from explicit arguments and optional file
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut config = Self::try_parse_from(args).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (CLI takes precedence)
    fn merge_with_file(mut self, file_config: Self) -> Self {
        if self.solver_address.is_none() {
            self.solver_address = file_config.solver_address;
        }

        if self.openai_key.is_none() {
            self.openai_key = file_config.openai_key;
        }

        if self.log_file.is_none() {
            self.log_file = file_config.log_file;
        }

        // Other fields keep their CLI values, defaults included
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("Worker count must be greater than 0"));
        }
        if self.max_nonce == 0 {
            return Err(Error::config("Nonce budget must be greater than 0"));
        }
        if self.max_nonce > MAX_NONCE_BUDGET {
            return Err(Error::config(format!("Nonce budget must be at most {}", MAX_NONCE_BUDGET)));
        }
        if self.report_interval == 0 {
            return Err(Error::config("Report interval must be greater than 0"));
        }

        if self.ledger == LedgerType::Http {
            Url::parse(&self.ledger_url).map_err(|e| Error::config(format!("Invalid ledger URL: {}", e)))?;
            if self.solver_address.is_none() {
                return Err(Error::config("A solver address is required for the http ledger"));
            }
        }
        if self.openai_key.is_some() {
            Url::parse(&self.ai_base_url).map_err(|e| Error::config(format!("Invalid AI base URL: {}", e)))?;
        }
        if let Some(address) = &self.solver_address {
            SolverIdentity::from_str(address)?;
        }
        if self.simulation_difficulty_bits > 256 {
            return Err(Error::config("Simulation difficulty must be at most 256 bits"));
        }

        self.submission_fee()?;
        self.ai_timeout_duration()?;
        self.pause_interval_duration()?;
        self.error_backoff_duration()?;
        self.miss_delay_duration()?;
        self.http_timeout_duration()?;
        self.retry_delay_duration()?;
        self.max_retry_delay_duration()?;

        Ok(())
    }

    /// Configured solver identity, if any
    pub fn solver_identity(&self) -> Result<Option<SolverIdentity>> {
        self.solver_address.as_deref().map(SolverIdentity::from_str).transpose()
    }

    /// Get parsed submission fee
    pub fn submission_fee(&self) -> Result<Wei> {
        Wei::from_str(&self.submission_fee)
            .map_err(|e| Error::config(format!("Invalid submission fee: {}", e)))
    }

    /// Get AI request timeout
    pub fn ai_timeout_duration(&self) -> Result<Duration> {
        parse_duration("ai_timeout", &self.ai_timeout)
    }

    /// Get pause polling interval
    pub fn pause_interval_duration(&self) -> Result<Duration> {
        parse_duration("pause_interval", &self.pause_interval)
    }

    /// Get back-off after a failed round
    pub fn error_backoff_duration(&self) -> Result<Duration> {
        parse_duration("error_backoff", &self.error_backoff)
    }

    /// Get delay after a missed round
    pub fn miss_delay_duration(&self) -> Result<Duration> {
        parse_duration("miss_delay", &self.miss_delay)
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Result<Duration> {
        parse_duration("http_timeout", &self.http_timeout)
    }

    /// Get retry delay duration
    pub fn retry_delay_duration(&self) -> Result<Duration> {
        parse_duration("retry_delay", &self.retry_delay)
    }

    /// Get max retry delay duration
    pub fn max_retry_delay_duration(&self) -> Result<Duration> {
        parse_duration("max_retry_delay", &self.max_retry_delay)
    }

    /// Solve-phase parameters
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            max_nonce: self.max_nonce,
            report_interval: self.report_interval,
        }
    }

    /// Round policy for `identity`
    pub fn orchestrator_config(&self, identity: SolverIdentity) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            identity,
            pool: self.pool_config(),
            submission_fee: self.submission_fee()?,
            gas_limit: self.gas_limit,
            gas_premium_percent: self.gas_premium_percent,
            pause_interval: self.pause_interval_duration()?,
            error_backoff: self.error_backoff_duration()?,
            miss_delay: self.miss_delay_duration()?,
        })
    }

    /// Retry policy of the ledger client
    pub fn backoff_config(&self) -> Result<BackoffConfig> {
        Ok(BackoffConfig {
            initial_delay: self.retry_delay_duration()?,
            max_delay: self.max_retry_delay_duration()?,
            multiplier: 2.0,
            max_retries: self.max_retries,
        })
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| Error::config(format!("Invalid {} {:?}: {}", name, value, e)))
}

// Default value functions for serde
fn default_workers() -> usize { num_cpus::get().saturating_sub(1).max(1) }
fn default_max_nonce() -> u64 { 5_000_000 }
fn default_report_interval() -> u64 { 50_000 }
fn default_ai_batch_size() -> usize { 8 }
fn default_ai_model() -> String { "gpt-4o-mini".to_string() }
fn default_ai_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_ai_timeout() -> String { "30s".to_string() }
fn default_ledger() -> LedgerType { LedgerType::Http }
fn default_ledger_url() -> String { "http://localhost:8080".to_string() }
fn default_gas_limit() -> u64 { 500_000 }
fn default_submission_fee() -> String { "1000000000000000".to_string() }
fn default_gas_premium_percent() -> u64 { 10 }
fn default_pause_interval() -> String { "30s".to_string() }
fn default_error_backoff() -> String { "5s".to_string() }
fn default_miss_delay() -> String { "1s".to_string() }
fn default_http_timeout() -> String { "30s".to_string() }
fn default_max_retries() -> usize { 10 }
fn default_retry_delay() -> String { "100ms".to_string() }
fn default_max_retry_delay() -> String { "5s".to_string() }
fn default_simulation_difficulty_bits() -> u32 { 20 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }

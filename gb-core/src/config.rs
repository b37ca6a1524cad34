//! run configuration
//!
//! Flags are parsed once into [`cli::Config`], validated into an immutable
//! [`RunConfig`], and that value is the only configuration a [`Master`] sees.
//!
//! [`Master`]: crate::Master
use std::{fmt, time::Duration};

use clap::ValueEnum;
use gb_wire::Credentials;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub mod cli {
    //! Parse from either cli or env var

    /// Default number of virtual users
    pub const DEFAULT_CONCURRENCY: usize = 1;
    /// Default requests per virtual user
    pub const DEFAULT_REQUESTS: u64 = 1;
    /// Default target
    pub static DEFAULT_TARGET: &str = "http://localhost:8089";
    /// Default remote worker list
    pub static DEFAULT_WORKERS: &str = "localhost:1977";
    /// Default address the master's result endpoint listens on
    pub static DEFAULT_HOST_ADDR: &str = "localhost:1978";
    /// Default address a proxy-mode worker listens on
    pub static DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1977";
    /// Default run deadline in seconds. Summaries still missing at this point
    /// are counted as lost workers.
    pub const DEFAULT_DEADLINE: u64 = 300;
    /// Default per request timeout in milliseconds
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
    /// Default capacity of the result channel
    pub const DEFAULT_CHANNEL_SIZE: usize = 1_024;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "gb-worker";
    /// default log level. Can use this argument or GB_LOG env var
    pub const DEFAULT_GB_LOG: &str = "info";

    pub use clap::Parser;

    use super::RunMode;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "gb", bin_name = "gb", about, long_about = None)]
    /// distributed HTTP benchmark. Every flag can also be set from the
    /// environment
    pub struct Config {
        /// number of concurrent users emulated
        #[clap(short, long, env = "GB_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
        pub concurrency: usize,
        /// number of requests performed by each user
        #[clap(short = 'n', long, env = "GB_REQUESTS", default_value_t = DEFAULT_REQUESTS)]
        pub requests: u64,
        /// target to perform the workload against
        #[clap(short, long, env = "GB_TARGET", default_value = DEFAULT_TARGET)]
        pub target: String,
        /// basic auth as `user:password`
        #[clap(short = 'A', long, env = "GB_AUTH")]
        pub auth: Option<String>,
        /// standalone runs every user in this process, master drives remote
        /// workers, proxy serves as a remote worker
        #[clap(short, long, env = "GB_MODE", value_enum, default_value_t = RunMode::Standalone)]
        pub mode: RunMode,
        /// comma separated `host:port` list of proxy workers (master mode)
        #[clap(short = 'W', long, env = "GB_WORKERS", default_value = DEFAULT_WORKERS)]
        pub workers: String,
        /// address remote workers report summaries to (master mode)
        #[clap(short = 'H', long, env = "GB_HOST_ADDR", default_value = DEFAULT_HOST_ADDR)]
        pub host_addr: String,
        /// address to accept tasks on (proxy mode)
        #[clap(short, long, env = "GB_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
        pub listen: String,
        /// seconds to wait for every summary before reporting what arrived
        #[clap(long, env = "GB_DEADLINE", default_value_t = DEFAULT_DEADLINE)]
        pub deadline: u64,
        /// per request timeout in milliseconds
        #[clap(long, env = "GB_REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
        pub request_timeout: u64,
        /// capacity of the channel summaries are delivered on
        #[clap(long, env = "GB_CHANNEL_SIZE", default_value_t = DEFAULT_CHANNEL_SIZE)]
        pub channel_size: usize,
        /// number of runtime threads, defaults to the number of cpus
        #[clap(long, env = "GB_THREADS")]
        pub threads: Option<usize>,
        /// runtime thread name
        #[clap(long, env = "GB_THREAD_NAME", default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env = "GB_LOG", default_value = DEFAULT_GB_LOG)]
        pub gb_log: String,
        /// print the report as json
        #[clap(long, env = "GB_JSON")]
        pub json: bool,
        /// print prometheus counters after the report
        #[clap(long, env = "GB_METRICS")]
        pub metrics: bool,
    }
}

/// How this process takes part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// every virtual user runs on a local worker
    Standalone,
    /// virtual users are spread over remote proxy workers
    Master,
    /// remote worker waiting for tasks from a master
    Proxy,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Standalone => write!(f, "standalone"),
            RunMode::Master => write!(f, "master"),
            RunMode::Proxy => write!(f, "proxy"),
        }
    }
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// run mode
    pub mode: RunMode,
    /// virtual users in total
    pub concurrency: usize,
    /// requests performed by each virtual user
    pub requests: u64,
    /// endpoint under test
    pub target: String,
    /// basic auth forwarded with every request
    pub credentials: Option<Credentials>,
    /// proxy worker addresses, in pool order
    pub workers: Vec<String>,
    /// where remote workers send summaries
    pub host_addr: String,
    /// where a proxy worker accepts tasks
    pub listen: String,
    /// bound on the wait for summaries
    pub deadline: Duration,
    /// bound on a single request
    pub request_timeout: Duration,
    /// result channel capacity
    pub channel_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Standalone,
            concurrency: cli::DEFAULT_CONCURRENCY,
            requests: cli::DEFAULT_REQUESTS,
            target: cli::DEFAULT_TARGET.to_owned(),
            credentials: None,
            workers: split_workers(cli::DEFAULT_WORKERS),
            host_addr: cli::DEFAULT_HOST_ADDR.to_owned(),
            listen: cli::DEFAULT_LISTEN_ADDR.to_owned(),
            deadline: Duration::from_secs(cli::DEFAULT_DEADLINE),
            request_timeout: Duration::from_millis(cli::DEFAULT_REQUEST_TIMEOUT_MS),
            channel_size: cli::DEFAULT_CHANNEL_SIZE,
        }
    }
}

impl TryFrom<cli::Config> for RunConfig {
    type Error = ConfigError;

    fn try_from(args: cli::Config) -> Result<Self, ConfigError> {
        if args.deadline == 0 {
            return Err(ConfigError::Invalid(
                "--deadline must be greater than 0".into(),
            ));
        }
        if args.request_timeout == 0 {
            return Err(ConfigError::Invalid(
                "--request-timeout must be greater than 0".into(),
            ));
        }
        if args.channel_size == 0 {
            return Err(ConfigError::Invalid(
                "--channel-size must be greater than 0".into(),
            ));
        }

        let credentials = args.auth.as_deref().map(parse_credentials).transpose()?;
        let workers = split_workers(&args.workers);
        if args.mode == RunMode::Master {
            if workers.is_empty() {
                return Err(ConfigError::NoWorkers { mode: args.mode });
            }
            if args.host_addr.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "master mode needs --host-addr for worker summaries".into(),
                ));
            }
        }

        Ok(Self {
            mode: args.mode,
            concurrency: args.concurrency,
            requests: args.requests,
            target: args.target,
            credentials,
            workers,
            host_addr: args.host_addr,
            listen: args.listen,
            deadline: Duration::from_secs(args.deadline),
            request_timeout: Duration::from_millis(args.request_timeout),
            channel_size: args.channel_size,
        })
    }
}

/// Parse `user:pass`. Only the first `:` separates, passwords may contain more.
pub fn parse_credentials(raw: &str) -> Result<Credentials, ConfigError> {
    match raw.split_once(':') {
        Some((user, pass)) if !user.is_empty() => Ok(Credentials::new(user, pass)),
        _ => Err(ConfigError::InvalidCredentials),
    }
}

fn split_workers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
        .collect()
}

pub mod trace {
    //! tracing configuration
    use std::{fmt as std_fmt, str::FromStr};

    use anyhow::{Result, anyhow};
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        layer::SubscriberExt,
        util::SubscriberInitExt,
    };

    use crate::env::parse_var_with_err;

    /// How log lines are rendered, picked with `LOG_FORMAT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum LogFormat {
        /// one line per event, unstructured
        #[default]
        Standard,
        /// multi-line, for reading at a terminal
        Pretty,
        /// one json object per event
        Json,
    }

    impl FromStr for LogFormat {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> Result<Self> {
            match s.trim().to_ascii_lowercase().as_str() {
                "standard" => Ok(LogFormat::Standard),
                "pretty" => Ok(LogFormat::Pretty),
                "json" => Ok(LogFormat::Json),
                other => Err(anyhow!(
                    "unknown log format `{other}`, expected standard, pretty or json"
                )),
            }
        }
    }

    impl std_fmt::Display for LogFormat {
        fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
            f.write_str(match self {
                LogFormat::Standard => "standard",
                LogFormat::Pretty => "pretty",
                LogFormat::Json => "json",
            })
        }
    }

    /// Level filter built from `--gb-log`. Falls back to `info` when the
    /// directive doesn't parse; http client internals stay quiet.
    pub fn filter(gb_log: &str) -> Result<EnvFilter> {
        Ok(EnvFilter::try_new(gb_log)
            .or_else(|_| EnvFilter::try_new("info"))?
            .add_directive("hyper=off".parse()?)
            .add_directive("reqwest=warn".parse()?))
    }

    /// Installed logging setup
    #[derive(Debug)]
    pub struct Config {
        /// formatting applied to logs
        pub format: LogFormat,
    }

    impl Config {
        /// Install the global subscriber. Format comes from `LOG_FORMAT`,
        /// level from `gb_log`.
        pub fn parse(gb_log: &str) -> Result<Self> {
            let format: LogFormat = parse_var_with_err("LOG_FORMAT", LogFormat::default())?;
            let registry = tracing_subscriber::registry().with(filter(gb_log)?);
            match format {
                LogFormat::Json => registry.with(fmt::layer().json()).init(),
                LogFormat::Pretty => registry
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new()),
                    )
                    .init(),
                LogFormat::Standard => registry.with(fmt::layer()).init(),
            }
            Ok(Self { format })
        }
    }

}

#[cfg(test)]
mod tests {
    use super::cli::{Config, Parser};
    use super::*;

    #[test]
    fn parse_standalone_defaults() {
        let args = Config::try_parse_from(["gb", "-c", "4", "-n", "10"]).expect("cli should parse");
        let cfg = RunConfig::try_from(args).expect("config should build");

        assert_eq!(cfg.mode, RunMode::Standalone);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.requests, 10);
        assert_eq!(cfg.target, cli::DEFAULT_TARGET);
        assert_eq!(cfg.credentials, None);
        assert_eq!(cfg.deadline, Duration::from_secs(cli::DEFAULT_DEADLINE));
    }

    #[test]
    fn parse_master_worker_list() {
        let args = Config::try_parse_from([
            "gb",
            "--mode",
            "master",
            "-W",
            "10.0.0.1:1977, 10.0.0.2:1977,,",
            "-H",
            "10.0.0.100:1978",
            "-A",
            "admin:s3cr:et",
        ])
        .expect("cli should parse");
        let cfg = RunConfig::try_from(args).expect("config should build");

        assert_eq!(cfg.mode, RunMode::Master);
        assert_eq!(cfg.workers, vec!["10.0.0.1:1977", "10.0.0.2:1977"]);
        assert_eq!(cfg.host_addr, "10.0.0.100:1978");
        assert_eq!(cfg.credentials, Some(Credentials::new("admin", "s3cr:et")));
    }

    #[test]
    fn reject_credentials_without_separator() {
        let args = Config::try_parse_from(["gb", "-A", "admin"]).expect("cli should parse");
        let err = RunConfig::try_from(args).expect_err("expected credential error");

        assert!(matches!(err, ConfigError::InvalidCredentials));
    }

    #[test]
    fn reject_master_without_workers() {
        let args = Config::try_parse_from(["gb", "--mode", "master", "-W", " , "])
            .expect("cli should parse");
        let err = RunConfig::try_from(args).expect_err("expected empty pool error");

        assert!(matches!(
            err,
            ConfigError::NoWorkers {
                mode: RunMode::Master
            }
        ));
    }

    #[test]
    fn reject_master_without_host_addr() {
        let args = Config::try_parse_from(["gb", "--mode", "master", "-H", " "])
            .expect("cli should parse");
        let err = RunConfig::try_from(args).expect_err("expected host addr error");

        assert!(err.to_string().contains("--host-addr"));
    }

    #[test]
    fn reject_zero_deadline() {
        let args = Config::try_parse_from(["gb", "--deadline", "0"]).expect("cli should parse");
        let err = RunConfig::try_from(args).expect_err("expected deadline error");

        assert!(err.to_string().contains("--deadline"));
    }

    #[test]
    fn reject_unknown_mode() {
        assert!(Config::try_parse_from(["gb", "--mode", "cluster"]).is_err());
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "vouchledger", about = "VouchLedger - vouch point ledger administration")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "vouchledger.toml")]
    pub config: String,

    /// Storage backend (overrides config file)
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// PostgreSQL connection string (overrides config file)
    #[arg(long, env = "VOUCHLEDGER_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show a user's points
    Points { user_id: u64 },

    /// Show a user's points and vouch count
    Stats { user_id: u64 },

    /// Credit (or, with a negative delta, debit) points
    Add {
        user_id: u64,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },

    /// Record a vouch event
    Vouch {
        user_id: u64,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        points: i64,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        vouches: i64,
    },

    /// Show the leaderboard
    Top {
        /// Number of users to show (defaults to vouch.leaderboard_size)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Import the legacy snapshot into the relational store
    Import {
        /// Import even when the store already has rows
        #[arg(long)]
        force: bool,
    },

    /// Run a post through the vouch credit rules
    CreditPost {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        channel: u64,
        /// The author is a bot account
        #[arg(long)]
        bot: bool,
        /// Attachments as `filename[:content-type]`
        attachments: Vec<String>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub vouch: VouchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Snapshot imported into a relational backend on first start.
    #[serde(default = "default_file_path")]
    pub legacy_path: PathBuf,

    #[serde(default = "default_true")]
    pub auto_import: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VouchConfig {
    /// Channel whose image posts earn points. 0 disables crediting.
    #[serde(default)]
    pub channel_id: u64,

    #[serde(default = "default_points_per_picture")]
    pub points_per_picture: i64,

    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_backend() -> BackendKind {
    BackendKind::File
}

fn default_file_path() -> PathBuf {
    PathBuf::from("vouches.json")
}

fn default_sqlite_path() -> String {
    "vouches.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_points_per_picture() -> i64 {
    1
}

fn default_leaderboard_size() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: default_backend(),
            file_path: default_file_path(),
            sqlite_path: default_sqlite_path(),
            database_url: None,
            pool_size: default_pool_size(),
            legacy_path: default_file_path(),
            auto_import: true,
        }
    }
}

impl Default for VouchConfig {
    fn default() -> Self {
        VouchConfig {
            channel_id: 0,
            points_per_picture: default_points_per_picture(),
            leaderboard_size: default_leaderboard_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(backend) = cli.backend {
            config.storage.backend = backend;
        }
        if let Some(ref url) = cli.database_url {
            config.storage.database_url = Some(url.clone());
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.storage.backend, BackendKind::File);
        assert_eq!(config.storage.file_path, PathBuf::from("vouches.json"));
        assert!(config.storage.auto_import);
        assert_eq!(config.vouch.points_per_picture, 1);
        assert_eq!(config.vouch.leaderboard_size, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [storage]
            backend = "postgres"
            database_url = "host=db user=vouch"
            pool_size = 3

            [vouch]
            channel_id = 1426271314792157346
            points_per_picture = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, BackendKind::Postgres);
        assert_eq!(config.storage.database_url.as_deref(), Some("host=db user=vouch"));
        assert_eq!(config.storage.pool_size, 3);
        assert_eq!(config.vouch.channel_id, 1_426_271_314_792_157_346);
        assert_eq!(config.vouch.points_per_picture, 2);
        assert_eq!(config.vouch.leaderboard_size, 10);
    }

    #[test]
    fn cli_flags_override_file() {
        let cli = CliArgs::parse_from([
            "vouchledger",
            "--config",
            "/nonexistent/vouchledger.toml",
            "--backend",
            "sqlite",
            "--log-level",
            "debug",
            "add",
            "42",
            "-3",
        ]);
        assert_eq!(cli.command, Command::Add { user_id: 42, delta: -3 });

        let config = Config::load(&cli);
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.logging.level, "debug");
    }
}

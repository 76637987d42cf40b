//! Config module for ddb-importer

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use ulid::Ulid;

#[derive(ValueEnum, Debug, Clone, Default)]
#[clap(rename_all = "lowercase")]
pub enum DatabaseAuthMethod {
    #[default]
    None,
    Root,
}

#[derive(Parser, Debug, Clone)]
pub struct DatabaseConfig {
    #[clap(long, env = "DDB_DATABASE_URL", default_value = "surrealkv://./database")]
    pub database_url: String,

    #[clap(long, env = "DDB_DATABASE_AUTH_METHOD", value_enum, default_value = "none")]
    pub db_auth_method: DatabaseAuthMethod,

    #[clap(long, env = "DDB_SURREAL_ROOT_USERNAME", default_value = "root")]
    #[clap(required_if_eq("db_auth_method", "root"))]
    pub root_username: Option<String>,

    #[clap(long, env = "DDB_SURREAL_ROOT_PASSWORD", default_value = "root")]
    #[clap(required_if_eq("db_auth_method", "root"))]
    pub root_password: Option<String>,

    #[clap(long, env = "DDB_SURREAL_NAMESPACE", default_value = "ddb_importer")]
    pub db_namespace: String,

    #[clap(long, env = "DDB_SURREAL_DATABASE", default_value = "ddb_importer")]
    pub db_database: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ImportConfig {
    /// Root directory holding the working directory of every task
    #[clap(long, env = "DDB_DATA_DIR", default_value_t = get_default_data_dir())]
    pub data_dir: String,

    /// Network timeout for a single file fetch, in seconds
    #[clap(long, env = "DDB_FETCH_TIMEOUT", default_value = "60")]
    pub fetch_timeout: u64,

    /// Size of the buffer used to stream response bodies to disk
    #[clap(long, env = "DDB_CHUNK_SIZE", default_value = "4096")]
    pub chunk_size: usize,

    /// Maximum number of files fetched at the same time
    #[clap(long, env = "DDB_IMPORT_CONCURRENCY", default_value = "1")]
    pub concurrency: usize,

    /// Wall-clock budget for a whole import run, in seconds. Unlimited when unset.
    #[clap(long, env = "DDB_IMPORT_TIMEOUT")]
    pub import_timeout: Option<u64>,

    /// Scheme tag placed in front of the registry token in the Authorization header
    #[clap(long, env = "DDB_AUTH_SCHEME", default_value = "Token")]
    pub auth_scheme: String,
}

/// Local data directory of the platform, or `./data` when there is none
fn get_default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|dir| dir.join("ddb-importer"))
        .and_then(|path| path.to_str().map(String::from))
        .unwrap_or_else(|| "./data".to_string())
}

impl ImportConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().into()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn import_timeout(&self) -> Option<Duration> {
        self.import_timeout.map(Duration::from_secs)
    }

    /// Concurrency limit, never below one
    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an empty task and print its id
    Create,
    /// Import the files listed in a carrier JSON file into a task
    Import {
        task_id: Ulid,
        /// JSON file shaped like `{"token": "...", "files": [{"name": "...", "url": "..."}]}`
        carrier: PathBuf,
    },
    /// Print a task and its image records
    Show { task_id: Ulid },
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct Config {
    #[clap(flatten)]
    pub db_config: DatabaseConfig,

    #[clap(flatten)]
    pub import_config: ImportConfig,

    #[clap(subcommand)]
    pub command: Command,
}

pub fn config() -> Config {
    Config::parse()
}

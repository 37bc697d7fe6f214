use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
}

/// What the binary should do after connecting to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    CreateTable,
    DropTable,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image metadata and blob store")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image blobs are stored (overrides IMAGE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Create the `images` table if missing and exit
    #[arg(long, conflicts_with = "drop_table")]
    pub create_table: bool,

    /// Drop the `images` table and exit
    #[arg(long)]
    pub drop_table: bool,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.create_table {
            Mode::CreateTable
        } else if self.drop_table {
            Mode::DropTable
        } else {
            Mode::Serve
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        let args = Args::parse();
        let mode = args.mode();
        Ok((Self::merge(args)?, mode))
    }

    /// Fill every value the CLI left unset from the environment, then from
    /// defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("IMAGE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("IMAGE_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing IMAGE_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading IMAGE_STORE_PORT"),
        };
        let env_storage =
            env::var("IMAGE_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/static".into());
        let env_db = env::var("IMAGE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/images.db".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

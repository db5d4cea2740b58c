use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// s3xfer - move files in and out of S3-compatible object stores
#[derive(Parser, Debug)]
#[command(name = "s3xfer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file (environment variables and .env are used otherwise)
    #[arg(long, global = true, env = "S3XFER_CONFIG")]
    pub config: Option<String>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a file, choosing single PUT or multipart by size
    Put {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Object key (defaults to the file name)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Upload a file with a single PUT
    PutSmall {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Object key (defaults to the file name)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Upload a file as a multipart object
    PutLarge {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Object key (defaults to the file name)
        #[arg(short, long)]
        key: Option<String>,

        /// Part size (e.g. 8M, 100MiB)
        #[arg(long, value_parser = parse_size_arg)]
        part_size: Option<u64>,

        /// Parts uploaded at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Download an object
    Get {
        #[arg(value_name = "KEY")]
        key: String,

        /// Destination file (defaults to the key's file name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List objects under a prefix
    Ls {
        #[arg(value_name = "PREFIX", default_value = "")]
        prefix: String,
    },

    /// Delete an object
    Rm {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Print a presigned download URL
    Presign {
        #[arg(value_name = "KEY")]
        key: String,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires: u64,
    },
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    crate::config::parse_size(s).map_err(|e| e.to_string())
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

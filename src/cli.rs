//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use awsutils::config::ClientConfig;
use awsutils::s3::ByteRange;
use awsutils::transfer::MIN_PART_SIZE;

/// Longest validity of a presigned URL, in seconds.
const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// Transfer objects to and from S3-compatible storage.
///
/// Large uploads are split into parts and interrupted downloads resume
/// where they stopped.
#[derive(Parser, Debug)]
#[command(name = "awsutils")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/awsutils/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Service endpoint host, host:port or URL
    #[arg(long, global = true, value_name = "HOST")]
    pub endpoint: Option<String>,

    /// Region for V4 signatures
    #[arg(long, global = true)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Applies global flags on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(region) = &self.region {
            config.region.clone_from(region);
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download an object, resuming after interruptions
    Get {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// Write to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Byte range START-END (inclusive) or START-
        #[arg(long, value_parser = parse_range)]
        range: Option<ByteRange>,
        /// Check the data against the object's ETag
        #[arg(long)]
        verify: bool,
    },

    /// Upload a file, in parts when it is large
    Put {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// File to upload
        file: PathBuf,
        /// Part size in bytes (at least 5 MiB)
        #[arg(
            long,
            default_value_t = MIN_PART_SIZE,
            value_parser = clap::value_parser!(u64).range(MIN_PART_SIZE..)
        )]
        chunk_size: u64,
        /// Check each part against its ETag
        #[arg(long)]
        verify: bool,
    },

    /// Print an object's size, ETag and metadata
    Head {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },

    /// Print a presigned GET URL
    Presign {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// Validity in seconds (1-604800)
        #[arg(
            long,
            default_value_t = 3600,
            value_parser = clap::value_parser!(u64).range(1..=MAX_PRESIGN_EXPIRY_SECS)
        )]
        expires: u64,
    },

    /// Abort in-progress multipart uploads
    AbortUploads {
        /// Bucket name
        bucket: String,
        /// Only uploads whose key starts with PREFIX
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn parse_range(value: &str) -> Result<ByteRange, String> {
    let range = ByteRange::parse(value)
        .ok_or_else(|| format!("expected START-END or START-, got '{value}'"))?;
    if range.end.is_some_and(|end| end < range.start) {
        return Err(format!("range end is before start in '{value}'"));
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["awsutils", "-vv", "presign", "b", "k"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "awsutils",
            "abort-uploads",
            "photos",
            "--prefix",
            "tmp/",
            "--endpoint",
            "localhost:9000",
            "-q",
        ])
        .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.endpoint.as_deref(), Some("localhost:9000"));
        match cli.command {
            Command::AbortUploads { bucket, prefix } => {
                assert_eq!(bucket, "photos");
                assert_eq!(prefix.as_deref(), Some("tmp/"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_get_parses_range() {
        let cli =
            Cli::try_parse_from(["awsutils", "get", "b", "k", "--range", "100-199", "-o", "out"])
                .unwrap();
        match cli.command {
            Command::Get {
                range, output, verify, ..
            } => {
                assert_eq!(range, Some(ByteRange::new(100, 199)));
                assert_eq!(output, Some(PathBuf::from("out")));
                assert!(!verify);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_inverted_range() {
        assert!(Cli::try_parse_from(["awsutils", "get", "b", "k", "--range", "9-1"]).is_err());
    }

    #[test]
    fn test_cli_put_defaults_to_minimum_chunk() {
        let cli = Cli::try_parse_from(["awsutils", "put", "b", "k", "file.bin"]).unwrap();
        match cli.command {
            Command::Put { chunk_size, .. } => assert_eq!(chunk_size, MIN_PART_SIZE),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_put_rejects_small_chunk() {
        let result =
            Cli::try_parse_from(["awsutils", "put", "b", "k", "f", "--chunk-size", "1024"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_head_takes_bucket_and_key() {
        let cli = Cli::try_parse_from(["awsutils", "head", "b", "k"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Head { ref bucket, ref key } if bucket == "b" && key == "k"
        ));
        assert!(Cli::try_parse_from(["awsutils", "head", "b"]).is_err());
    }

    #[test]
    fn test_cli_presign_expiry_bounds() {
        assert!(
            Cli::try_parse_from(["awsutils", "presign", "b", "k", "--expires", "604801"]).is_err()
        );
        let cli = Cli::try_parse_from(["awsutils", "presign", "b", "k"]).unwrap();
        assert!(matches!(cli.command, Command::Presign { expires: 3600, .. }));
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from(["awsutils", "--region", "ap-south-1", "presign", "b", "k"])
            .unwrap();
        let mut config = ClientConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.region, "ap-south-1");
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["awsutils", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["awsutils"]).is_err());
    }
}

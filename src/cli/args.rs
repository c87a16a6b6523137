//! Command-line argument parsing

use crate::config::{AuthConfig, RegistryConfig};
use crate::error::{RegistryError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "docker-blob-transfer")]
#[command(about = "Upload, download and inspect blobs on a Docker registry")]
#[command(version, author)]
pub struct Args {
    /// Registry address
    #[arg(
        long = "registry",
        short = 'r',
        env = "REGISTRY_ADDRESS",
        global = true,
        help = "Registry address, e.g. https://registry.example.com or localhost:5000"
    )]
    pub registry: Option<String>,

    /// Registry username
    #[arg(
        long = "username",
        short = 'u',
        env = "REGISTRY_USERNAME",
        global = true,
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    /// Registry password
    #[arg(
        long = "password",
        short = 'p',
        env = "REGISTRY_PASSWORD",
        global = true,
        hide_env_values = true,
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        env = "SKIP_TLS",
        global = true,
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    /// Chunk size for uploads
    #[arg(
        long = "chunk-size",
        env = "CHUNK_SIZE",
        global = true,
        help = "Chunk size for uploads in bytes"
    )]
    pub chunk_size: Option<u64>,

    /// Timeout in seconds for network operations
    #[arg(
        long = "timeout",
        short = 't',
        env = "REGISTRY_TIMEOUT",
        global = true,
        help = "Timeout in seconds for each request"
    )]
    pub timeout: Option<u64>,

    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Suppress all output except errors and results"
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a file as a blob
    Upload {
        repository: String,
        file: PathBuf,
        /// Digest to upload under; computed from the file when omitted
        #[arg(long = "digest")]
        digest: Option<String>,
        /// Send the whole file in a single PUT instead of chunks
        #[arg(long = "monolithic")]
        monolithic: bool,
    },
    /// Download a blob to a file or stdout
    Download {
        repository: String,
        digest: String,
        #[arg(long = "output", short = 'o')]
        output: Option<PathBuf>,
    },
    /// Check whether a blob exists (exit status 1 when absent)
    Exists { repository: String, digest: String },
    /// Print a blob's digest and size
    Stat {
        repository: String,
        digest: String,
        #[arg(long = "json")]
        json: bool,
    },
    /// Mount a blob from another repository on the same registry
    Mount {
        repository: String,
        digest: String,
        #[arg(long = "from")]
        from: String,
    },
}

impl Args {
    /// True when the command's result goes to stdout and progress output must stay off it
    pub fn writes_to_stdout(&self) -> bool {
        matches!(self.command, Command::Download { output: None, .. })
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.as_deref().is_none_or(|r| r.trim().is_empty()) {
            return Err(RegistryError::Validation(
                "Registry address required: pass --registry or set REGISTRY_ADDRESS".to_string(),
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(RegistryError::Validation(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        if let Command::Upload { file, .. } = &self.command {
            if !file.exists() {
                return Err(RegistryError::Validation(format!(
                    "File not found: {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Registry configuration from the parsed flags (which already include env fallbacks)
    pub fn registry_config(&self) -> Result<RegistryConfig> {
        self.validate()?;
        let address = self.registry.as_deref().unwrap_or_default();

        let mut config = RegistryConfig::new(address)?
            .with_auth(AuthConfig::new(self.username.clone(), self.password.clone()))
            .with_skip_tls(self.skip_tls);
        if let Some(chunk_size) = self.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_upload() {
        let args = parse(&[
            "docker-blob-transfer",
            "--registry",
            "localhost:5000",
            "--chunk-size",
            "1024",
            "upload",
            "team/app",
            "layer.tar",
            "--monolithic",
        ]);
        match args.command {
            Command::Upload {
                repository,
                file,
                digest,
                monolithic,
            } => {
                assert_eq!(repository, "team/app");
                assert_eq!(file, PathBuf::from("layer.tar"));
                assert!(digest.is_none());
                assert!(monolithic);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(args.chunk_size, Some(1024));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&[
            "docker-blob-transfer",
            "exists",
            "app",
            "sha256:abc",
            "-r",
            "http://registry.test",
            "-k",
        ]);
        assert!(args.skip_tls);
        let config = args.registry_config().unwrap();
        assert_eq!(config.base_url.as_str(), "http://registry.test/");
        assert!(config.skip_tls);
    }

    #[test]
    fn test_mount_requires_from() {
        assert!(Args::try_parse_from(["docker-blob-transfer", "mount", "dst", "sha256:abc"]).is_err());
        let args = parse(&[
            "docker-blob-transfer",
            "mount",
            "dst",
            "sha256:abc",
            "--from",
            "src",
        ]);
        assert!(matches!(args.command, Command::Mount { ref from, .. } if from == "src"));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(
            Args::try_parse_from(["docker-blob-transfer", "-v", "-q", "exists", "a", "sha256:b"])
                .is_err()
        );
    }

    #[test]
    fn test_download_to_stdout() {
        let args = parse(&["docker-blob-transfer", "download", "app", "sha256:abc"]);
        assert!(args.writes_to_stdout());
        let args = parse(&["docker-blob-transfer", "download", "app", "sha256:abc", "-o", "out"]);
        assert!(!args.writes_to_stdout());
    }

    fn stat_args(username: Option<&str>, password: Option<&str>) -> Args {
        Args {
            registry: Some("http://registry.test".to_string()),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            skip_tls: false,
            chunk_size: None,
            timeout: None,
            verbose: false,
            quiet: false,
            command: Command::Stat {
                repository: "app".to_string(),
                digest: "sha256:abc".to_string(),
                json: false,
            },
        }
    }

    #[test]
    fn test_credentials_must_come_in_pairs() {
        assert!(matches!(
            stat_args(Some("alice"), None).registry_config(),
            Err(RegistryError::Validation(_))
        ));
        assert!(stat_args(None, Some("secret")).registry_config().is_err());

        let config = stat_args(Some("alice"), Some("secret")).registry_config().unwrap();
        assert_eq!(config.auth.username.as_deref(), Some("alice"));
        assert!(stat_args(None, None).registry_config().is_ok());
    }
}

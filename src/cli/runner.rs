//! Command runner: builds the client and executes one subcommand

use crate::cli::args::{Args, Command};
use crate::digest::Digest;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::upload::{BlobSource, FileSource};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;

/// Exit status for a successful command
pub const EXIT_OK: i32 = 0;
/// Exit status of `exists` when the blob is absent
pub const EXIT_ABSENT: i32 = 1;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet || args.writes_to_stdout() {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Ok(Self { args, output })
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    /// Run the selected command and return the process exit status
    pub async fn run(&self) -> Result<i32> {
        let config = self.args.registry_config()?;
        self.output
            .detail(&format!("Target registry: {}", config.base_url));

        let client = RegistryClient::builder(config)
            .with_logger(self.output.clone())
            .build()?;

        match &self.args.command {
            Command::Upload {
                repository,
                file,
                digest,
                monolithic,
            } => {
                self.upload(&client, repository, file, digest.as_deref(), *monolithic)
                    .await
            }
            Command::Download {
                repository,
                digest,
                output,
            } => {
                self.download(&client, repository, &Digest::parse(digest)?, output.as_deref())
                    .await
            }
            Command::Exists { repository, digest } => {
                let digest = Digest::parse(digest)?;
                if client.has_blob(repository, &digest).await? {
                    self.output
                        .success(&format!("{} exists in {}", digest, repository));
                    Ok(EXIT_OK)
                } else {
                    self.output
                        .warning(&format!("{} not found in {}", digest, repository));
                    Ok(EXIT_ABSENT)
                }
            }
            Command::Stat {
                repository,
                digest,
                json,
            } => {
                let descriptor = client
                    .blob_metadata(repository, &Digest::parse(digest)?)
                    .await?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&descriptor)?);
                } else {
                    println!("digest: {}", descriptor.digest);
                    println!("size:   {}", descriptor.size);
                }
                Ok(EXIT_OK)
            }
            Command::Mount {
                repository,
                digest,
                from,
            } => {
                let digest = Digest::parse(digest)?;
                client.mount_blob(repository, &digest, from).await?;
                self.output.success(&format!(
                    "Mounted {} from {} into {}",
                    digest.short(),
                    from,
                    repository
                ));
                Ok(EXIT_OK)
            }
        }
    }

    async fn upload(
        &self,
        client: &RegistryClient,
        repository: &str,
        file: &Path,
        digest: Option<&str>,
        monolithic: bool,
    ) -> Result<i32> {
        self.output.section("Blob Upload");
        let source = FileSource::open(file).await?;
        let size = source.len();
        self.output.info(&format!(
            "Source file: {} ({})",
            file.display(),
            self.output.format_size(size)
        ));

        let digest = match digest {
            Some(value) => Digest::parse(value)?,
            None => {
                self.output.step("Computing sha256 digest");
                Digest::sha256_file(file).await?
            }
        };

        if client.has_blob(repository, &digest).await? {
            self.output.info(&format!(
                "Blob {} already exists in {}, skipping upload",
                digest.short(),
                repository
            ));
            return Ok(EXIT_OK);
        }

        let source = Arc::new(source);
        if monolithic {
            client.upload_blob(repository, &digest, source).await?;
        } else {
            client
                .upload_blob_chunked(repository, &digest, source)
                .await?;
        }

        self.output.success(&format!(
            "Uploaded {} to {} in {}",
            digest,
            repository,
            self.output.format_duration(self.output.elapsed())
        ));
        self.output.summary_kv(
            "Upload Summary",
            &[
                ("Repository", repository.to_string()),
                ("Digest", digest.to_string()),
                ("Size", self.output.format_size(size)),
                ("Mode", if monolithic { "monolithic" } else { "chunked" }.to_string()),
            ],
        );
        Ok(EXIT_OK)
    }

    async fn download(
        &self,
        client: &RegistryClient,
        repository: &str,
        digest: &Digest,
        output: Option<&Path>,
    ) -> Result<i32> {
        let stream = client.download_blob(repository, digest).await?;
        let written = match output {
            Some(path) => {
                let mut file = File::create(path).await?;
                let written = stream.copy_to(&mut file).await?;
                self.output.success(&format!(
                    "Downloaded {} ({}) to {}",
                    digest.short(),
                    self.output.format_size(written),
                    path.display()
                ));
                written
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stream.copy_to(&mut stdout).await?
            }
        };
        self.output
            .detail(&format!("Wrote {} bytes of {}", written, digest));
        Ok(EXIT_OK)
    }
}

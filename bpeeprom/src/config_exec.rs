use anyhow::{Context, Result, bail};
use bpeeprom_lib::{ByteImage, JobKind, JobRequest, SessionConfig, TransferJob};

use crate::cli::{Commands, MergedConfig};
use crate::config::BpConfig;

/// A device operation resolved from either a subcommand or a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Read { output: Option<String>, print: bool },
    Write { input: String },
    Erase,
}

impl Action {
    pub fn kind(&self) -> JobKind {
        match self {
            Action::Read { .. } => JobKind::Read,
            Action::Write { .. } => JobKind::Write,
            Action::Erase => JobKind::Erase,
        }
    }

    pub fn from_command(command: &Commands) -> Option<Self> {
        match command {
            Commands::Read(params) => Some(Action::Read {
                output: params.output.clone(),
                print: params.print,
            }),
            Commands::Write(params) => Some(Action::Write {
                input: params.input.clone(),
            }),
            Commands::Erase => Some(Action::Erase),
            Commands::Ports | Commands::Sizes => None,
        }
    }

    /// Execute command from config file
    pub fn from_config(config: &BpConfig) -> Result<Self> {
        if let Some(ref read) = config.read {
            Ok(Action::Read {
                output: Some(read.path.clone()),
                print: false,
            })
        } else if let Some(ref write) = config.write {
            Ok(Action::Write {
                input: write.path.clone(),
            })
        } else if config.erase.is_some() {
            Ok(Action::Erase)
        } else {
            bail!("No valid command found in config file")
        }
    }

    /// Build the job and session settings for this action.
    pub fn prepare(&self, merged: &MergedConfig) -> Result<(TransferJob, SessionConfig)> {
        let mut request = JobRequest::new(self.kind(), merged.port.clone());
        request.speed = merged.speed;
        request.address = merged.address.clone();
        request.size = merged.size;
        request.page_size = merged.page_size;
        request.power = merged.power;
        request.pull_up = merged.pull_up;
        request.verify = merged.verify;

        if let Action::Write { input } = self {
            let image = ByteImage::read_file(input)
                .with_context(|| format!("Failed to load image {}", input))?;
            if image.is_empty() {
                bail!("No data to write: {} is empty", input);
            }
            if image.len() > merged.size.bytes() {
                tracing::warn!(
                    "Image is {} bytes but the device holds {}",
                    image.len(),
                    merged.size
                );
            }
            request.payload = image.into_bytes();
        }

        let (job, mut session) = request
            .into_parts()
            .with_context(|| format!("Invalid {} request", self.kind()))?;
        session.timeout = merged.timeout;
        Ok((job, session))
    }
}

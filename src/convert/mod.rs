//! Client side of the external conversion service, plus the download gateway
//! and the background conversion tasks built on top of it.

mod gateway;
mod tasks;

pub use gateway::*;
pub use tasks::*;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{self, ArchiveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Structured view of the record; never produced as a file.
    Json,
    Yaml,
    Csv,
    Root,
    Yoda,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Json,
        OutputFormat::Root,
        OutputFormat::Yaml,
        OutputFormat::Csv,
        OutputFormat::Yoda,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Csv => "csv",
            OutputFormat::Root => "root",
            OutputFormat::Yoda => "yoda",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "csv" => Ok(OutputFormat::Csv),
            "root" => Ok(OutputFormat::Root),
            "yoda" => Ok(OutputFormat::Yoda),
            other => Err(other.to_string()),
        }
    }
}

/// Options understood by the conversion service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionOptions {
    pub input_format: String,
    pub output_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hepdata_doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rivet_analysis_name: Option<String>,
}

impl ConversionOptions {
    pub fn new(input_format: &str, output_format: &str) -> Self {
        Self {
            input_format: input_format.to_string(),
            output_format: output_format.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConversionInput {
    /// A zip archive sent as-is.
    Archive(PathBuf),
    /// A directory packed into a zip before sending.
    Directory(PathBuf),
    /// A single file packed into a zip before sending.
    File(PathBuf),
}

/// Result of one call to the service. On failure `payload` is the HTML error
/// page the service answered with.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub success: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not prepare conversion input: {0}")]
    Input(#[from] ArchiveError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        input: &ConversionInput,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConvertError>;
}

/// Talks to the conversion service over HTTP: one multipart POST per call,
/// no retries.
pub struct HttpConverter {
    client: Client,
    endpoint: String,
}

impl HttpConverter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConvertError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/convert", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Converter for HttpConverter {
    async fn convert(
        &self,
        input: &ConversionInput,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConvertError> {
        let archive = match input {
            ConversionInput::Archive(path) => tokio::fs::read(path).await?,
            ConversionInput::Directory(path) => storage::zip_directory(path)?,
            ConversionInput::File(path) => storage::zip_file(path)?,
        };

        info!(
            "Converting {} -> {} via {} ({} bytes)",
            options.input_format,
            options.output_format,
            self.endpoint,
            archive.len()
        );

        let options_json = serde_json::to_string(options).unwrap_or_else(|_| "{}".to_string());
        let form = Form::new()
            .part(
                "archive",
                Part::bytes(archive)
                    .file_name("input.zip")
                    .mime_str("application/zip")?,
            )
            .text("options", options_json);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let payload = response.bytes().await?.to_vec();

        if !status.is_success() {
            warn!("Conversion service answered {} for {:?}", status, options);
        }

        Ok(Conversion {
            success: status.is_success(),
            payload,
        })
    }
}

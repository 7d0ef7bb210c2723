use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

use super::{ConversionInput, ConversionOptions, ConvertError, Converter, OutputFormat};
use crate::config::Config;
use crate::db::{DataSubmission, OverallStatus, Store, StoreError, Submission};
use crate::error::ErrorPage;
use crate::ids::{PublicationId, TableId};
use crate::storage::{self, ArchiveError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("data table {0} has no data file")]
    MissingDataFile(TableId),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Regenerate even when a cached artifact exists.
    pub force: bool,
    /// Produce the artifact without serving it.
    pub offline: bool,
}

#[derive(Debug)]
pub enum Download {
    Redirect(String),
    Error(ErrorPage),
    File {
        path: PathBuf,
        filename: String,
        content_type: String,
    },
    Bytes {
        payload: Vec<u8>,
        filename: String,
        content_type: String,
    },
    /// The converter failed; `payload` is its HTML error page.
    Degraded { payload: Vec<u8>, filename: String },
    /// Offline run finished, artifact is at the path.
    Prepared(PathBuf),
}

const AD_HOC_INPUTS: [&str; 2] = ["yaml", "oldhepdata"];
const AD_HOC_OUTPUTS: [&str; 4] = ["root", "yoda", "csv", "yaml"];

/// `<COLLABORATIONS>_<year>_I<inspire id>`, the analysis name Rivet expects.
pub fn rivet_analysis_name(
    collaborations: &[String],
    year: Option<i32>,
    inspire_id: &str,
) -> String {
    format!(
        "{}_{}_I{}",
        collaborations.concat().to_uppercase(),
        year.map(|y| y.to_string()).unwrap_or_default(),
        inspire_id
    )
}

fn content_type_for(filename: &str) -> String {
    if filename.ends_with(".tar.gz") {
        return "application/gzip".to_string();
    }
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Resolves download requests to redirects, cached artifacts or fresh
/// conversions.
pub struct Gateway<'a> {
    pub config: &'a Config,
    pub store: &'a dyn Store,
    pub converter: &'a dyn Converter,
}

impl<'a> Gateway<'a> {
    pub fn new(config: &'a Config, store: &'a dyn Store, converter: &'a dyn Converter) -> Self {
        Self {
            config,
            store,
            converter,
        }
    }

    fn supported(&self, requested: &str) -> Option<OutputFormat> {
        requested
            .parse::<OutputFormat>()
            .ok()
            .filter(|f| self.config.is_supported(*f))
    }

    fn unsupported(&self, requested: &str) -> Download {
        Download::Error(ErrorPage::converter(
            format!("The {} output format is not supported", requested),
            format!(
                "This output format is not supported. Currently supported formats: {}",
                self.config.supported_formats_label()
            ),
        ))
    }

    async fn analysis_name(
        &self,
        publication: PublicationId,
        inspire_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .publication(publication)
            .await?
            .map(|p| rivet_analysis_name(&p.collaborations, p.year, inspire_id)))
    }

    pub async fn download_submission(
        &self,
        submission: &Submission,
        requested: &str,
        opts: DownloadOptions,
    ) -> Result<Download, GatewayError> {
        let ident = submission.file_identifier();
        let version = submission.version;

        if requested == OutputFormat::Json.as_str() {
            return Ok(Download::Redirect(format!(
                "/record/{}?version={}&format=json",
                ident, version
            )));
        }

        let Some(format) = self.supported(requested) else {
            if opts.offline {
                error!("Format not supported: {}", requested);
            }
            return Ok(self.unsupported(requested));
        };

        let stem = format!("HEPData-{}-v{}-{}", ident, version, format);
        let output_name = format!("{}.tar.gz", stem);
        let converted_dir = self.config.converted_dir();
        tokio::fs::create_dir_all(&converted_dir).await?;
        let output_path = converted_dir.join(&output_name);

        // Cache is keyed by (identifier, version, format) and never expires.
        if output_path.exists()
            && !opts.force
            && submission.overall_status == OverallStatus::Finished
        {
            if opts.offline {
                info!("File already converted at {}", output_path.display());
                return Ok(Download::Prepared(output_path));
            }
            return Ok(Download::File {
                path: output_path,
                filename: output_name,
                content_type: "application/gzip".to_string(),
            });
        }

        let mut options = ConversionOptions::new("yaml", format.as_str());
        options.filename = Some(stem.clone());
        if let Some(doi) = &submission.doi {
            options.hepdata_doi = Some(format!("{}.v{}", doi, version));
        }
        if format == OutputFormat::Yoda {
            if let Some(inspire) = &submission.inspire_id {
                options.rivet_analysis_name =
                    self.analysis_name(submission.publication_recid, inspire).await?;
            }
        }

        let input = storage::submission_archive_path(
            &self.config.data_dir,
            submission.publication_recid,
            version,
        );
        let conversion = self
            .converter
            .convert(&ConversionInput::Archive(input), &options)
            .await?;

        if !conversion.success {
            return Ok(Download::Degraded {
                payload: conversion.payload,
                filename: format!("{}.html", stem),
            });
        }

        tokio::fs::write(&output_path, &conversion.payload).await?;
        info!("File for {} created at {}", ident, output_path.display());

        if opts.offline {
            return Ok(Download::Prepared(output_path));
        }
        Ok(Download::File {
            path: output_path,
            filename: output_name,
            content_type: "application/gzip".to_string(),
        })
    }

    /// `ident` is the public identifier used in the file name (`ins<n>`, a
    /// record id or a table id); `table_name` is appended when known.
    pub async fn download_table(
        &self,
        table: &DataSubmission,
        requested: &str,
        ident: &str,
        table_name: Option<&str>,
        opts: DownloadOptions,
    ) -> Result<Download, GatewayError> {
        if requested == OutputFormat::Json.as_str() {
            return Ok(Download::Redirect(format!(
                "/record/data/{}/{}/{}",
                table.publication_recid, table.id, table.version
            )));
        }

        let Some(format) = self.supported(requested) else {
            return Ok(self.unsupported(requested));
        };

        let resource = match table.data_file {
            Some(id) => self.store.resource(id).await?,
            None => None,
        }
        .ok_or(GatewayError::MissingDataFile(table.id))?;

        let mut filename = format!("HEPData-{}-v{}", ident, table.version);
        if let Some(name) = table_name {
            filename.push('-');
            filename.push_str(&name.split_whitespace().collect::<String>());
        }

        let data_path = PathBuf::from(&resource.file_location);
        if format == OutputFormat::Yaml {
            let attachment = stem_with_ext(&filename, "yaml");
            return Ok(Download::File {
                path: data_path,
                content_type: content_type_for(&attachment),
                filename: attachment,
            });
        }

        let record_dir = data_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let table_file = data_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut options = ConversionOptions::new("yaml", format.as_str());
        options.filename = table_file.split('.').next().map(str::to_string);
        options.table = Some(table_file.clone());
        if let Some(doi) = &table.doi {
            let base = doi.rsplit_once('/').map(|(head, _)| head).unwrap_or(doi.as_str());
            options.hepdata_doi = Some(base.to_string());
        }
        if format == OutputFormat::Yoda {
            if let Some(inspire) = &table.publication_inspire_id {
                options.rivet_analysis_name =
                    self.analysis_name(table.publication_recid, inspire).await?;
            }
        }

        let attachment = stem_with_ext(&filename, format.as_str());
        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;
        let output_path = self.config.tmp_dir.join(&attachment);

        // unfinished versions can still be re-uploaded under the same name
        let finished = self
            .store
            .submission(table.publication_recid, table.version)
            .await?
            .is_some_and(|s| s.overall_status == OverallStatus::Finished);
        let cached = output_path.exists() && finished && !opts.force;
        if !cached {
            let conversion = self
                .converter
                .convert(&ConversionInput::Directory(record_dir), &options)
                .await?;
            if !conversion.success {
                return Ok(Download::Degraded {
                    payload: conversion.payload,
                    filename: stem_with_ext(&filename, "html"),
                });
            }
            tokio::fs::write(&output_path, &conversion.payload).await?;
        }

        Ok(Download::File {
            path: output_path,
            content_type: content_type_for(&attachment),
            filename: attachment,
        })
    }

    /// Converts an uploaded zip without persisting anything.
    pub async fn convert_ad_hoc(
        &self,
        archive: &[u8],
        original_filename: &str,
        input_format: &str,
        output_format: &str,
    ) -> Result<Download, GatewayError> {
        if !AD_HOC_INPUTS.contains(&input_format) || !AD_HOC_OUTPUTS.contains(&output_format) {
            return Ok(Download::Error(ErrorPage::converter(
                "Chosen formats are not supported",
                "Supported input formats: oldhepdata, yaml\nSupported output formats: root, yoda, csv",
            )));
        }

        let filename =
            storage::sanitize_filename(original_filename).filter(|n| n.ends_with(".zip"));
        let Some(filename) = filename.filter(|_| !archive.is_empty()) else {
            return Ok(Download::Error(ErrorPage::converter(
                "Please send a zip file for conversion",
                "No file has been sent or it does not have a zip extension",
            )));
        };
        let stem = storage::remove_file_extension(&filename).to_string();

        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;
        let workdir = tempfile::Builder::new()
            .prefix("convert-")
            .tempdir_in(&self.config.tmp_dir)?;
        let extracted = workdir.path().join(&stem);
        storage::extract_zip_bytes(archive, &extracted)?;

        let found = if input_format == "yaml" {
            storage::find_file_in_directory(&extracted, |name| name == "submission.yaml")
        } else {
            storage::find_file_in_directory(&extracted, |name| name.ends_with(".oldhepdata"))
        };
        let Some((input_dir, _)) = found else {
            return Ok(Download::Error(ErrorPage::converter(
                "Your archive does not contain necessary files",
                "For YAML conversions a submission.yaml file is necessary, and for conversions \
                 from the oldhepdata format a file with .oldhepdata extension is required.",
            )));
        };

        let mut options = ConversionOptions::new(input_format, output_format);
        options.filename = Some(stem.clone());
        let conversion = self
            .converter
            .convert(&ConversionInput::Directory(input_dir), &options)
            .await?;

        if !conversion.success {
            return Ok(Download::Degraded {
                payload: conversion.payload,
                filename: stem_with_ext(&stem, "html"),
            });
        }

        let filename = stem_with_ext(&stem, "tar.gz");
        Ok(Download::Bytes {
            payload: conversion.payload,
            content_type: content_type_for(&filename),
            filename,
        })
    }
}

fn stem_with_ext(stem: &str, ext: &str) -> String {
    format!("{}.{}", stem, ext)
}

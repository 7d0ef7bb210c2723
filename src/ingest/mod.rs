//! Upload ingestion: archive handling, the legacy conversion bridge and the
//! `submission.yaml` processor.

mod legacy;
mod manifest;

pub use legacy::convert_legacy;
pub use manifest::{process_submission_directory, MANIFEST_NAME};

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::convert::Converter;
use crate::db::{DataSubmission, Store, StoreError, Submission};
use crate::error::{ErrorGroups, ErrorPage};
use crate::ids::{PublicationId, UserId};
use crate::storage::{self, ArchiveError};

pub const LEGACY_EXTENSION: &str = ".oldhepdata";

const NOTHING_FOUND: &str =
    "No file with .oldhepdata extension or a submission.yaml file has been found in the archive.";
const LEGACY_FAILED: &str = "The conversion from oldhepdata to the YAML format has not succeeded. \
                             Please submit archives in the new format.";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("uploaded file is not a zip archive")]
    NotAnArchive,

    /// The archive was readable but its contents were rejected.
    #[error("{}", .0.message)]
    Rejected(ErrorPage),

    #[error("could not extract archive: {0}")]
    Extraction(#[from] ArchiveError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    fn converter(message: &str) -> Self {
        IngestError::Rejected(ErrorPage::new(
            "Conversion failed",
            ErrorGroups::single("Converter", message),
        ))
    }

    /// The page shown to the uploader.
    pub fn to_page(&self) -> ErrorPage {
        match self {
            IngestError::NotAnArchive => ErrorPage::new(
                "Incorrect file type uploaded.",
                ErrorGroups::single("Upload", "You must upload a zip file."),
            ),
            IngestError::Rejected(page) => page.clone(),
            IngestError::Extraction(e) => ErrorPage::new(
                "The archive could not be read.",
                ErrorGroups::single("Upload", e.to_string()),
            ),
            IngestError::Io(e) => ErrorPage::new(
                "The upload could not be stored.",
                ErrorGroups::single("Upload", e.to_string()),
            ),
            IngestError::Store(e) => ErrorPage::new(
                "The submission could not be saved.",
                ErrorGroups::single("Upload", e.to_string()),
            ),
        }
    }
}

/// Who is uploading what.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget {
    pub publication: PublicationId,
    pub uploader: UserId,
    /// New submissions start in `sandbox` instead of `todo`.
    pub sandbox: bool,
}

#[derive(Debug)]
pub struct Ingested {
    pub submission: Submission,
    pub tables: Vec<DataSubmission>,
}

/// Stores, extracts and processes one uploaded archive.
pub async fn process_zip_archive(
    config: &Config,
    store: &dyn Store,
    converter: &dyn Converter,
    filename: &str,
    bytes: &[u8],
    target: UploadTarget,
) -> Result<Ingested, IngestError> {
    let filename = storage::sanitize_filename(filename)
        .filter(|name| name.to_lowercase().ends_with(".zip"))
        .ok_or(IngestError::NotAnArchive)?;

    let (upload_dir, stamp) = storage::create_upload_dir(&config.data_dir, target.publication)?;
    let archive_path = upload_dir.join(&filename);
    tokio::fs::write(&archive_path, bytes).await?;
    info!(
        "Stored upload {} for record {} in {}",
        filename,
        target.publication,
        upload_dir.display()
    );

    let extracted = upload_dir.join(storage::remove_file_extension(&filename));
    storage::extract_zip(&archive_path, &extracted)?;

    if let Some((base_dir, manifest)) =
        storage::find_file_in_directory(&extracted, |name| name == MANIFEST_NAME)
    {
        return process_submission_directory(config, store, &base_dir, &manifest, target).await;
    }

    let Some((_, legacy_file)) =
        storage::find_file_in_directory(&extracted, |name| name.ends_with(LEGACY_EXTENSION))
    else {
        warn!("Upload {} for record {} has no manifest", stamp, target.publication);
        return Err(IngestError::converter(NOTHING_FOUND));
    };

    let yaml_dir = upload_dir.join("yaml");
    if !convert_legacy(converter, &legacy_file, &yaml_dir).await {
        return Err(IngestError::converter(LEGACY_FAILED));
    }

    match storage::find_file_in_directory(&yaml_dir, |name| name == MANIFEST_NAME) {
        Some((base_dir, manifest)) => {
            process_submission_directory(config, store, &base_dir, &manifest, target).await
        }
        None => Err(IngestError::converter(LEGACY_FAILED)),
    }
}

/// True when `path` holds a `submission.yaml` somewhere below it.
pub fn has_manifest(path: &Path) -> bool {
    storage::find_file_in_directory(path, |name| name == MANIFEST_NAME).is_some()
}

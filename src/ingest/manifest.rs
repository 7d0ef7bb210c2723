//! `submission.yaml` processing.
//!
//! The manifest is a multi-document YAML stream. The first document may be a
//! header carrying a `comment` and `additional_resources`; every document
//! with a `data_file` describes one table.

use std::collections::HashSet;
use std::path::{Component, Path};

use serde::Deserialize;
use tracing::{info, warn};

use super::{Ingested, IngestError, UploadTarget};
use crate::config::Config;
use crate::db::{
    Keyword, NewDataResource, NewDataSubmission, NewSubmission, OverallStatus, Store,
    SubmissionUpload, UploadSlot,
};
use crate::error::{ErrorGroups, ErrorPage};
use crate::ids::Version;
use crate::storage;

pub const MANIFEST_NAME: &str = "submission.yaml";

#[derive(Debug, Default, Deserialize)]
struct HeaderDocument {
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    additional_resources: Vec<ResourceDocument>,
}

#[derive(Debug, Deserialize)]
struct TableDocument {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    keywords: Vec<KeywordGroup>,
    data_file: String,
    #[serde(default)]
    additional_resources: Vec<ResourceDocument>,
}

#[derive(Debug, Deserialize)]
struct KeywordGroup {
    name: String,
    #[serde(default)]
    values: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceDocument {
    location: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    file_type: Option<String>,
}

#[derive(Debug, Default)]
struct Manifest {
    header: HeaderDocument,
    tables: Vec<TableDocument>,
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Splits the manifest into its documents. Problems are collected rather
/// than returned on the first hit.
fn parse_manifest(text: &str, errors: &mut ErrorGroups) -> Manifest {
    let mut manifest = Manifest::default();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = match serde_yaml::Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                errors.push(MANIFEST_NAME, format!("There was a problem parsing the file: {}", e));
                return manifest;
            }
        };
        if value.is_null() {
            continue;
        }

        if value.get("data_file").is_some() {
            match serde_yaml::from_value::<TableDocument>(value) {
                Ok(table) => manifest.tables.push(table),
                Err(e) => errors.push(MANIFEST_NAME, format!("Document {}: {}", index + 1, e)),
            }
        } else if index == 0 {
            match serde_yaml::from_value::<HeaderDocument>(value) {
                Ok(header) => manifest.header = header,
                Err(e) => errors.push(MANIFEST_NAME, format!("Header document: {}", e)),
            }
        } else {
            errors.push(
                MANIFEST_NAME,
                format!("Document {} has no data_file entry.", index + 1),
            );
        }
    }

    manifest
}

fn validate(manifest: &Manifest, base_dir: &Path, errors: &mut ErrorGroups) {
    if manifest.tables.is_empty() {
        errors.push(MANIFEST_NAME, "No data tables are declared.");
    }

    let mut seen = HashSet::new();
    for table in &manifest.tables {
        if !seen.insert(table.name.as_str()) {
            errors.push(MANIFEST_NAME, format!("Duplicate table with name {}.", table.name));
        }
        let sanitized = storage::sanitize_filename(&table.data_file);
        if sanitized.as_deref() != Some(table.data_file.as_str()) {
            errors.push(MANIFEST_NAME, format!("{} is not a valid file name.", table.data_file));
        } else if !base_dir.join(&table.data_file).is_file() {
            errors.push(MANIFEST_NAME, format!("{} is missing.", table.data_file));
        }
    }

    let resources = manifest
        .header
        .additional_resources
        .iter()
        .chain(manifest.tables.iter().flat_map(|t| t.additional_resources.iter()));
    for resource in resources {
        check_resource(&resource.location, base_dir, errors);
    }
}

/// A local resource must name an existing file inside `base_dir`.
fn check_resource(location: &str, base_dir: &Path, errors: &mut ErrorGroups) {
    if is_remote(location) {
        return;
    }
    let relative = Path::new(location);
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if location.trim().is_empty() || !plain {
        errors.push(MANIFEST_NAME, format!("{} is not a valid resource location.", location));
        return;
    }

    // symlinks in the extracted archive must not lead outside it
    let inside = match (base_dir.join(relative).canonicalize(), base_dir.canonicalize()) {
        (Ok(file), Ok(base)) => file.starts_with(&base) && file.is_file(),
        _ => false,
    };
    if !inside {
        errors.push(MANIFEST_NAME, format!("{} is missing.", location));
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn resource_type(resource: &ResourceDocument) -> String {
    if let Some(kind) = &resource.file_type {
        return kind.clone();
    }
    if is_remote(&resource.location) {
        return "url".to_string();
    }
    match resource.location.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => "file".to_string(),
    }
}

async fn store_resources(
    store: &dyn Store,
    base_dir: &Path,
    resources: &[ResourceDocument],
) -> Result<Vec<i64>, IngestError> {
    let mut ids = Vec::with_capacity(resources.len());
    for resource in resources {
        let file_location = if is_remote(&resource.location) {
            resource.location.clone()
        } else {
            base_dir.join(&resource.location).display().to_string()
        };
        let stored = store
            .insert_resource(&NewDataResource {
                file_type: resource_type(resource),
                file_description: resource.description.clone().unwrap_or_default(),
                file_location,
            })
            .await?;
        ids.push(stored.id);
    }
    Ok(ids)
}

/// Picks the version the upload is written into: the unfinished latest
/// version, or a new one when the latest is finished. Nothing is stored yet.
async fn plan_submission(
    store: &dyn Store,
    target: UploadTarget,
    data_abstract: Option<String>,
) -> Result<UploadSlot, IngestError> {
    let slot = match store.latest_submission(target.publication).await? {
        Some(current) if current.overall_status != OverallStatus::Finished => {
            UploadSlot::Replace(current)
        }
        Some(finished) => UploadSlot::Create(NewSubmission {
            publication_recid: finished.publication_recid,
            inspire_id: finished.inspire_id,
            version: finished.version.next(),
            overall_status: OverallStatus::Todo,
            coordinator: finished.coordinator,
            doi: finished.doi,
            data_abstract: data_abstract.or(finished.data_abstract),
        }),
        None => UploadSlot::Create(NewSubmission {
            publication_recid: target.publication,
            inspire_id: None,
            version: Version::FIRST,
            overall_status: if target.sandbox {
                OverallStatus::Sandbox
            } else {
                OverallStatus::Todo
            },
            coordinator: target.uploader,
            doi: None,
            data_abstract,
        }),
    };
    Ok(slot)
}

fn keywords(table: &TableDocument) -> Vec<Keyword> {
    table
        .keywords
        .iter()
        .flat_map(|group| {
            group.values.iter().map(|value| Keyword {
                name: group.name.clone(),
                value: yaml_scalar(value),
            })
        })
        .collect()
}

/// Validates the manifest at `manifest_path`, then stores the submission
/// version, its tables and resources, and the packed archive used by the
/// download gateway.
///
/// The packed archive is staged next to its final path before the database
/// commit and moved into place afterwards, so a failed upload leaves the
/// previous tables, reviews and archive of the version untouched.
pub async fn process_submission_directory(
    config: &Config,
    store: &dyn Store,
    base_dir: &Path,
    manifest_path: &Path,
    target: UploadTarget,
) -> Result<Ingested, IngestError> {
    let text = tokio::fs::read_to_string(manifest_path).await?;

    let mut errors = ErrorGroups::default();
    let manifest = parse_manifest(&text, &mut errors);
    if errors.is_empty() {
        validate(&manifest, base_dir, &mut errors);
    }
    if !errors.is_empty() {
        return Err(IngestError::Rejected(ErrorPage::new(
            "The submission did not validate.",
            errors,
        )));
    }

    let slot = plan_submission(store, target, manifest.header.comment.clone()).await?;

    // resource rows left behind by a failed commit are never referenced
    let reference_ids =
        store_resources(store, base_dir, &manifest.header.additional_resources).await?;
    let mut tables = Vec::with_capacity(manifest.tables.len());
    for table in &manifest.tables {
        let data_file = store
            .insert_resource(&NewDataResource {
                file_type: "data".to_string(),
                file_description: table.name.clone(),
                file_location: base_dir.join(&table.data_file).display().to_string(),
            })
            .await?;
        let additional_file_ids =
            store_resources(store, base_dir, &table.additional_resources).await?;

        tables.push(NewDataSubmission {
            publication_recid: slot.publication_recid(),
            publication_inspire_id: slot.inspire_id().map(str::to_string),
            version: slot.version(),
            name: table.name.clone(),
            description: table.description.clone().unwrap_or_default(),
            location_in_publication: table.location.clone(),
            keywords: keywords(table),
            doi: None,
            data_file: Some(data_file.id),
            additional_file_ids,
        });
    }

    let archive = storage::submission_archive_path(
        &config.data_dir,
        slot.publication_recid(),
        slot.version(),
    );
    let staged = storage::staged_path(&archive);
    if let Some(parent) = archive.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let packed = storage::zip_directory(base_dir)?;
    tokio::fs::write(&staged, packed).await?;

    let replacing = matches!(slot, UploadSlot::Replace(_));
    let upload = SubmissionUpload {
        slot,
        data_abstract: manifest.header.comment.clone(),
        reference_ids,
        tables,
    };
    let (submission, tables) = match store.commit_upload(&upload).await {
        Ok(committed) => committed,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&staged).await {
                warn!("Could not remove staged archive {}: {}", staged.display(), cleanup);
            }
            return Err(e.into());
        }
    };
    tokio::fs::rename(&staged, &archive).await?;

    info!(
        "{} {} tables for record {} v{}",
        if replacing { "Replaced" } else { "Processed" },
        tables.len(),
        submission.publication_recid,
        submission.version
    );

    Ok(Ingested { submission, tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
comment: Cross sections at 13 TeV
additional_resources:
  - location: https://example.org/code
    description: Analysis code
---
name: Table 1
description: Differential cross section
location: Figure 3
keywords:
  - name: observables
    values: [DSIG/DPT]
  - name: cmenergies
    values: [13000]
data_file: data1.yaml
---
name: Table 2
data_file: data2.yaml
";

    #[test]
    fn parses_header_and_tables() {
        let mut errors = ErrorGroups::default();
        let manifest = parse_manifest(MANIFEST, &mut errors);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(manifest.header.comment.as_deref(), Some("Cross sections at 13 TeV"));
        assert_eq!(manifest.header.additional_resources.len(), 1);
        assert_eq!(manifest.tables.len(), 2);
        assert_eq!(manifest.tables[0].keywords[1].values.len(), 1);
        assert_eq!(yaml_scalar(&manifest.tables[0].keywords[1].values[0]), "13000");
        assert_eq!(manifest.tables[1].description, None);
    }

    #[test]
    fn validation_reports_missing_files_under_manifest_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data1.yaml"), "independent_variables: []\n").unwrap();

        let mut errors = ErrorGroups::default();
        let manifest = parse_manifest(MANIFEST, &mut errors);
        validate(&manifest, dir.path(), &mut errors);
        assert_eq!(errors.messages(MANIFEST_NAME), vec!["data2.yaml is missing."]);
    }

    #[test]
    fn resource_locations_must_stay_inside_the_archive() {
        let outer = tempfile::tempdir().unwrap();
        let base = outer.path().join("upload");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(base.join("data1.yaml"), "independent_variables: []\n").unwrap();
        std::fs::write(base.join("plot.png"), "png").unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let absolute = outer.path().join("secret.txt").display().to_string();

        let text = [
            "additional_resources:".to_string(),
            format!("  - location: {}", absolute),
            "  - location: https://example.org/code".to_string(),
            "---".to_string(),
            "name: Table 1".to_string(),
            "data_file: data1.yaml".to_string(),
            "additional_resources:".to_string(),
            "  - location: ../secret.txt".to_string(),
            "  - location: plot.png".to_string(),
            "  - location: ./notes.txt".to_string(),
        ]
        .join("\n");
        let mut errors = ErrorGroups::default();
        let manifest = parse_manifest(&text, &mut errors);
        assert!(errors.is_empty(), "{:?}", errors);
        validate(&manifest, &base, &mut errors);

        assert_eq!(
            errors.messages(MANIFEST_NAME),
            vec![
                format!("{} is not a valid resource location.", absolute),
                "../secret.txt is not a valid resource location.".to_string(),
                "./notes.txt is missing.".to_string(),
            ]
        );
    }

    #[test]
    fn syntax_errors_are_collected() {
        let mut errors = ErrorGroups::default();
        parse_manifest("name: [unclosed\n", &mut errors);
        let messages = errors.messages(MANIFEST_NAME);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("There was a problem parsing the file"));
    }

    #[test]
    fn resource_types_are_inferred() {
        let remote = ResourceDocument {
            location: "https://example.org".into(),
            description: None,
            file_type: None,
        };
        let local = ResourceDocument {
            location: "plot.PNG".into(),
            description: None,
            file_type: None,
        };
        let typed = ResourceDocument {
            location: "analysis.cc".into(),
            description: None,
            file_type: Some("rivet".into()),
        };
        assert_eq!(resource_type(&remote), "url");
        assert_eq!(resource_type(&local), "png");
        assert_eq!(resource_type(&typed), "rivet");
    }
}

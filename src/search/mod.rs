//! Derived fields added to documents before they reach the search index.
//!
//! Everything here works on plain JSON documents. Lookups the enhancers need
//! are gathered once into an [`EnrichContext`]; absent optional fields are
//! skipped rather than reported.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::convert::OutputFormat;
use crate::db::{DataResource, Store, StoreError};
use crate::ids::PublicationId;
use crate::records::AUTHOR_LIMIT;

#[derive(Debug, Clone)]
pub struct EnrichContext {
    pub site_url: String,
    pub analyses_endpoints: Vec<String>,
    /// Resources of the latest submission, `None` when there is none.
    pub latest_resources: Option<Vec<DataResource>>,
    pub first_participant_action: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

fn object(doc: &mut Value) -> Option<&mut Map<String, Value>> {
    doc.as_object_mut()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `ins<inspire id>` when the document has one, else its record id.
fn identifier(doc: &Value) -> Option<String> {
    if let Some(inspire) = doc.get("inspire_id").and_then(scalar_text) {
        return Some(format!("ins{}", inspire));
    }
    doc.get("recid").and_then(scalar_text)
}

fn links(site_url: &str, path: &str) -> Value {
    let links: Map<String, Value> = OutputFormat::ALL
        .iter()
        .map(|f| (f.to_string(), json!(format!("{}/{}/{}", site_url, path, f))))
        .collect();
    json!({ "links": links })
}

pub fn add_data_submission_urls(doc: &mut Value, ctx: &EnrichContext) {
    let Some(ident) = identifier(doc) else {
        return;
    };
    let version = doc.get("version").and_then(scalar_text).unwrap_or_else(|| "1".to_string());
    let path = format!("download/submission/{}/{}", ident, version);
    if let Some(map) = object(doc) {
        map.insert("access_urls".into(), links(&ctx.site_url, &path));
    }
}

pub fn add_data_table_urls(doc: &mut Value, ctx: &EnrichContext) {
    let title = doc.get("title").and_then(scalar_text);
    let (Some(ident), Some(title)) = (identifier(doc), title) else {
        return;
    };
    let path = format!("download/table/{}/{}", ident, title);
    if let Some(map) = object(doc) {
        map.insert("access_urls".into(), links(&ctx.site_url, &path));
    }
}

pub fn add_shortened_authors(doc: &mut Value) {
    let summary: Vec<Value> = doc
        .get("authors")
        .and_then(Value::as_array)
        .map(|authors| authors.iter().take(AUTHOR_LIMIT).cloned().collect())
        .unwrap_or_default();
    if let Some(map) = object(doc) {
        map.insert("summary_authors".into(), Value::Array(summary));
    }
}

pub fn process_last_updates(doc: &mut Value, ctx: &EnrichContext) {
    let has_last_updated = doc.get("last_updated").map_or(false, |v| !v.is_null());
    if !has_last_updated {
        let from_action = ctx
            .first_participant_action
            .filter(|at| *at <= ctx.now)
            .map(|at| at.format("%Y-%m-%d").to_string());
        let last_updated = match from_action {
            Some(date) => Some(Value::String(date)),
            None => doc.get("creation_date").cloned(),
        };
        if let (Some(value), Some(map)) = (last_updated, object(doc)) {
            map.insert("last_updated".into(), value);
        }
    }

    let year = doc
        .get("year")
        .and_then(scalar_text)
        .and_then(|y| y.trim().parse::<i32>().ok())
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    if let (Some(date), Some(map)) = (year, object(doc)) {
        map.insert("publication_date".into(), json!(date.format("%Y-%m-%d").to_string()));
    }
}

pub fn add_analyses(doc: &mut Value, ctx: &EnrichContext) {
    let Some(resources) = &ctx.latest_resources else {
        return;
    };
    let analyses: Vec<Value> = resources
        .iter()
        .filter(|r| ctx.analyses_endpoints.contains(&r.file_type))
        .map(|r| json!({ "type": r.file_type, "analysis": r.file_location }))
        .collect();
    if let Some(map) = object(doc) {
        map.insert("analyses".into(), Value::Array(analyses));
    }
}

pub fn enhance_data_document(doc: &mut Value, ctx: &EnrichContext) {
    add_data_table_urls(doc, ctx);
}

pub fn enhance_publication_document(doc: &mut Value, ctx: &EnrichContext) {
    add_data_submission_urls(doc, ctx);
    add_shortened_authors(doc);
    process_last_updates(doc, ctx);
    add_analyses(doc, ctx);
}

pub async fn enrich_context(
    store: &dyn Store,
    config: &Config,
    publication: PublicationId,
) -> Result<EnrichContext, StoreError> {
    let latest_resources = match store.latest_submission(publication).await? {
        Some(submission) => Some(store.resources(&submission.reference_ids).await?),
        None => None,
    };
    Ok(EnrichContext {
        site_url: config.site_url.clone(),
        analyses_endpoints: config.analyses_endpoints.clone(),
        latest_resources,
        first_participant_action: store.earliest_participant_action(publication).await?,
        now: Utc::now(),
    })
}

/// The draft publication document built from the store, before enhancement.
pub async fn publication_document(
    store: &dyn Store,
    publication: PublicationId,
) -> Result<Option<Value>, StoreError> {
    let Some(submission) = store.latest_submission(publication).await? else {
        return Ok(None);
    };
    let mut doc = json!({
        "recid": publication,
        "version": submission.version,
        "inspire_id": submission.inspire_id,
        "doi": submission.doi,
        "data_abstract": submission.data_abstract,
    });
    if let Some(p) = store.publication(publication).await? {
        doc["title"] = json!(p.title);
        doc["authors"] = json!(p.authors);
        doc["collaborations"] = json!(p.collaborations);
        doc["year"] = json!(p.year);
        doc["journal_info"] = json!(p.journal_info);
        doc["creation_date"] = json!(p.creation_date.format("%Y-%m-%d").to_string());
        if let Some(first) = p.authors.first() {
            doc["_first_author"] = json!(first);
        }
    }
    if doc["inspire_id"].is_null() {
        if let Some(map) = doc.as_object_mut() {
            map.remove("inspire_id");
        }
    }
    Ok(Some(doc))
}

/// Draft document plus every publication enhancer.
pub async fn enriched_publication_document(
    store: &dyn Store,
    config: &Config,
    publication: PublicationId,
) -> Result<Option<Value>, StoreError> {
    let Some(mut doc) = publication_document(store, publication).await? else {
        return Ok(None);
    };
    let ctx = enrich_context(store, config, publication).await?;
    enhance_publication_document(&mut doc, &ctx);
    Ok(Some(doc))
}

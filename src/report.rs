//! CSV audit report: one row per visited, skipped or modified item.
//!
//! The file is created up front as `<directory>/<MM-DD-YYYY_HH-MM>_Results.csv` with a header
//! row, so an interrupted run still leaves a readable report behind.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use box_traverse_core::config::AuditReportSettings;
use box_traverse_core::contract::{AuditAction, Recorder, ServiceAccount};
use box_traverse_core::correlation::CorrelationId;
use box_traverse_core::model::Item;
use chrono::{DateTime, Local};
use serde_json::Value;
use tracing::{error, info};

pub const HEADER: [&str; 16] = [
    "TIMESTAMP",
    "ACTION",
    "EXECUTION_ID",
    "BOX_ITEM_ID",
    "BOX_ITEM_NAME",
    "BOX_ITEM_TYPE",
    "OWNED_BY_EMAIL",
    "OWNED_BY_ID",
    "PATH_BY_NAME",
    "PATH_BY_ID",
    "ITEM_CREATED_AT",
    "ITEM_MODIFIED_AT",
    "ITEM_SIZE_BYTES",
    "ITEM_LINK",
    "LINK_ACCESS_LEVEL",
    "DETAILS",
];

/// Reports at or above this size are uploaded through an upload session.
pub const CHUNKED_UPLOAD_THRESHOLD: usize = 50 * 1024 * 1024;

pub fn report_file_name(at: &DateTime<Local>) -> String {
    format!("{}_Results.csv", at.format("%m-%d-%Y_%H-%M"))
}

/// Text form of a flattened metadata value. Strings are written without quotes.
fn metadata_cell(item: &Item, field: &str) -> String {
    match item.metadata.as_ref().and_then(|m| m.get(field)) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn audit_row(
    timestamp: &str,
    action: AuditAction,
    item: &Item,
    message: &str,
    correlation_id: &CorrelationId,
    metadata_fields: &[String],
) -> Vec<String> {
    let owner = item.owned_by.as_ref();
    let mut row = vec![
        timestamp.to_string(),
        action.to_string(),
        correlation_id.to_string(),
        item.id.clone(),
        item.name.clone(),
        item.kind.to_string(),
        owner.map(|o| o.login.clone()).unwrap_or_default(),
        owner.map(|o| o.id.clone()).unwrap_or_default(),
        item.path_by_name(),
        item.path_by_id(),
        item.created_at.clone().unwrap_or_default(),
        item.modified_at.clone().unwrap_or_default(),
        item.size.map(|s| s.to_string()).unwrap_or_default(),
        item.shared_link_url().to_string(),
        item.shared_link_access().to_string(),
        message.to_string(),
    ];
    row.extend(metadata_fields.iter().map(|f| metadata_cell(item, f)));
    row
}

/// [`Recorder`] that appends audit rows to the report file.
///
/// Errors are left to the default `record_error`, which routes them to the runtime log.
pub struct AuditReport {
    path: PathBuf,
    metadata_fields: Vec<String>,
    writer: Mutex<csv::Writer<File>>,
}

impl AuditReport {
    pub fn create(settings: &AuditReportSettings) -> Result<Self> {
        Self::create_at(settings, &Local::now())
    }

    pub fn create_at(settings: &AuditReportSettings, at: &DateTime<Local>) -> Result<Self> {
        fs::create_dir_all(&settings.directory).with_context(|| {
            format!("Failed to create report directory {:?}", settings.directory)
        })?;
        let path = settings.directory.join(report_file_name(at));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create audit report {path:?}"))?;

        let header = HEADER
            .iter()
            .map(|h| h.to_string())
            .chain(settings.metadata_fields.iter().cloned());
        writer.write_record(header)?;
        writer.flush()?;
        info!(report = ?path, "Audit report created");

        Ok(Self {
            path,
            metadata_fields: settings.metadata_fields.clone(),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered rows and returns the report location.
    pub fn finish(&self) -> Result<PathBuf> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .flush()
            .with_context(|| format!("Failed to flush audit report {:?}", self.path))?;
        info!(report = ?self.path, "Audit report written");
        Ok(self.path.clone())
    }
}

impl Recorder for AuditReport {
    fn record_audit(
        &self,
        action: AuditAction,
        item: &Item,
        message: &str,
        correlation_id: &CorrelationId,
    ) {
        let timestamp = Local::now().to_rfc3339();
        let row = audit_row(
            &timestamp,
            action,
            item,
            message,
            correlation_id,
            &self.metadata_fields,
        );
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        // Flushed per row so an interrupted run keeps everything recorded so far.
        let written = writer
            .write_record(&row)
            .and_then(|()| writer.flush().map_err(csv::Error::from));
        if let Err(e) = written {
            error!(
                correlation_id = %correlation_id,
                action = %action,
                item_id = %item.id,
                error = %e,
                "Failed to write audit row"
            );
        }
    }
}

/// Uploads the finished report to `folder_id`, returning the new file id.
pub async fn upload_report(
    service: &dyn ServiceAccount,
    folder_id: &str,
    path: &Path,
) -> Result<String> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read audit report {path:?}"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Results.csv".to_string());

    let size = content.len();
    let id = if size >= CHUNKED_UPLOAD_THRESHOLD {
        info!(report = ?path, size, folder_id, "Uploading audit report in parts");
        service.upload_file_chunked(folder_id, &name, content).await
    } else {
        info!(report = ?path, size, folder_id, "Uploading audit report");
        service.upload_file(folder_id, &name, content).await
    }
    .with_context(|| format!("Failed to upload audit report to folder {folder_id}"))?;
    Ok(id)
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use box_traverse_core::actions;
use box_traverse_core::contract::Authenticator;
use box_traverse_core::traverse::{traverse, Services};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::box_client::BoxAuthenticator;
use crate::csv_input::read_rows;
use crate::load_config::load_config;
use crate::logging::{init_tracing, LogFormat};
use crate::report::{upload_report, AuditReport};

/// CLI for box-traverse: walk every item of a Box enterprise, per user, with an audit trail.
#[derive(Parser)]
#[clap(
    name = "box-traverse",
    version,
    about = "Traverse Box enterprise content per user, apply user-defined logic and write an audit report"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Traverse all target users' items using the given config file
    Traverse {
        /// Path to the YAML (or JSON) config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Traverse { config } => {
            let config = load_config(&config)?;
            init_tracing(config.log_level.as_deref(), LogFormat::from_env());
            info!("trace_initialised");

            let auth = Arc::new(BoxAuthenticator::new(config.box_app_settings.clone()));

            let csv_rows = if config.csv.enabled {
                let path = config
                    .csv
                    .file_path
                    .as_deref()
                    .context("csv.filePath must be set when csv is enabled")?;
                read_rows(path, &config.csv.columns)?
            } else {
                Vec::new()
            };

            let report = Arc::new(AuditReport::create(&config.audit_report)?);
            let services = Services {
                auth: auth.clone(),
                recorder: report.clone(),
                action: actions::from_config(&config, report.clone()),
            };

            println!("Traversal starting...");
            let summary = match traverse(&config, csv_rows, services).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Traversal failed");
                    eprintln!("[ERROR] Traversal failed: {e}");
                    return Err(e.into());
                }
            };

            let report_path = report.finish()?;
            if config.audit_report.upload_to_box {
                let folder_id = config
                    .audit_report
                    .upload_folder_id
                    .as_deref()
                    .context("auditReport.uploadFolderId must be set when uploadToBox is enabled")?;
                let service = auth.service_account().await?;
                let file_id = upload_report(service.as_ref(), folder_id, &report_path).await?;
                println!("Audit report uploaded as file {file_id}.");
            }

            println!("Traversal complete. Audit report: {}", report_path.display());
            println!("Summary:\n{summary}");
            Ok(())
        }
    }
}

use anyhow::{Context, Result};
use mdm_core::job_store::{JobKind, SubmitOptions};
use mdm_core::orchestrator::{Orchestrator, SubmitRequest};

pub async fn run(
    orchestrator: &Orchestrator,
    url: String,
    kind: JobKind,
    filename: Option<String>,
    options_json: Option<String>,
) -> Result<()> {
    let mut options: SubmitOptions = match options_json {
        Some(json) => serde_json::from_str(&json).context("parse --options JSON")?,
        None => SubmitOptions::default(),
    };
    if options.filename_hint.is_none() {
        options.filename_hint = filename;
    }

    let id = orchestrator
        .submit(SubmitRequest { url: url.clone(), kind, options })
        .await?;
    println!("Added job {id} for URL: {url}");
    Ok(())
}

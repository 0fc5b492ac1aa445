use anyhow::Result;
use mdm_core::job_store::{JobFilter, JobStatus};
use mdm_core::orchestrator::Orchestrator;
use mdm_core::util::fmt::format_bytes;

pub async fn run(
    orchestrator: &Orchestrator,
    status: Option<String>,
    search: Option<String>,
    limit: i64,
) -> Result<()> {
    let status = match status.as_deref() {
        Some(s) => Some(
            JobStatus::parse(s).ok_or_else(|| anyhow::anyhow!("unknown status filter: {}", s))?,
        ),
        None => None,
    };
    let (jobs, total) = orchestrator
        .list(&JobFilter {
            status,
            search,
            limit,
            ..Default::default()
        })
        .await?;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!(
        "{:<38} {:<10} {:>6} {:<10} {}",
        "ID", "STATUS", "PROG", "SIZE", "URL"
    );
    for job in &jobs {
        let size = job
            .total_bytes
            .map(|b| format_bytes(b.max(0) as u64))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:>5.1}% {:<10} {}",
            job.id,
            job.status.as_str(),
            job.progress,
            size,
            job.url
        );
    }
    if (jobs.len() as i64) < total {
        println!("({} of {} shown)", jobs.len(), total);
    }
    Ok(())
}

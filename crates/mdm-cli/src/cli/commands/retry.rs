use anyhow::Result;
use mdm_core::orchestrator::Orchestrator;

pub async fn run(orchestrator: &Orchestrator, id: &str) -> Result<()> {
    orchestrator.retry(id).await?;
    println!("Retry queued for job {id}");
    Ok(())
}

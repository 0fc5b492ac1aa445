use anyhow::Result;
use mdm_core::orchestrator::Orchestrator;

pub async fn run(orchestrator: &Orchestrator, id: &str) -> Result<()> {
    orchestrator.resume(id).await?;
    println!("Resumed job {id}");
    Ok(())
}

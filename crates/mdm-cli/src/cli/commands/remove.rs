use anyhow::Result;
use mdm_core::orchestrator::Orchestrator;

pub async fn run(orchestrator: &Orchestrator, id: &str) -> Result<()> {
    orchestrator.remove(id).await?;
    println!("Removed job {id}");
    Ok(())
}

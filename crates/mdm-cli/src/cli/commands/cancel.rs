use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::orchestrator::Orchestrator;

use crate::cli::control_socket;

pub async fn run(orchestrator: &Orchestrator, cfg: &MdmConfig, id: &str) -> Result<()> {
    // A running child lives in the `mdm run` process; deliver the signal
    // there. Without a listening daemon the local call settles the job.
    let socket_path = control_socket::default_socket_path()?;
    let delivered =
        control_socket::send_command(&socket_path, cfg.worker_token.as_deref(), "cancel", id)
            .await?;
    if !delivered {
        orchestrator.cancel(id).await?;
    }
    println!("Cancelled job {id}");
    Ok(())
}

use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::orchestrator::Orchestrator;

use crate::cli::control_socket;

pub async fn run(orchestrator: &Orchestrator, cfg: &MdmConfig, id: &str) -> Result<()> {
    let socket_path = control_socket::default_socket_path()?;
    let delivered =
        control_socket::send_command(&socket_path, cfg.worker_token.as_deref(), "pause", id)
            .await?;
    if !delivered {
        orchestrator.pause(id).await?;
    }
    println!("Paused job {id}");
    Ok(())
}

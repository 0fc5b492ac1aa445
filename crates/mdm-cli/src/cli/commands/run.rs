use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::orchestrator::Orchestrator;

use crate::cli::control_socket;

/// Reconcile stranded work, start the control socket, then drive the queue.
pub async fn run(orchestrator: &Orchestrator, cfg: &MdmConfig, serve: bool) -> Result<()> {
    let recovered = orchestrator.reconcile().await?;
    if recovered > 0 {
        tracing::info!("recovered {} job(s) from previous run", recovered);
    }

    let socket_path = control_socket::default_socket_path()?;
    let _listener = control_socket::spawn_control_listener(
        orchestrator.clone(),
        &socket_path,
        cfg.worker_token.clone(),
    )?;

    if serve {
        orchestrator.run_service().await
    } else {
        let settled = orchestrator.run_until_idle().await?;
        if settled == 0 {
            println!("No queued jobs.");
        } else {
            tracing::info!("run settled {} job attempt(s)", settled);
        }
        let _ = std::fs::remove_file(&socket_path);
        Ok(())
    }
}

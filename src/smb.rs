//! SMB Controller: external collaborator contract. The core only ever
//! calls `start`/`stop` and reads back success/failure; it never retries
//! redundantly and treats both as idempotent from its own perspective.

use async_trait::async_trait;

/// Starts/stops the per-volume SMB server. Implementations are expected to
/// be idempotent, synchronous from the caller's point of view (the
/// returned future resolves only once the server is actually up or down),
/// and never called redundantly by the core.
#[async_trait]
pub trait SmbController: Send + Sync {
    /// Brings up an SMB server exporting `volume`. Returns `true` iff
    /// operational.
    async fn start(&self, volume: &str) -> bool;

    /// Tears down the SMB server exporting `volume`. Returns `true` iff
    /// gone.
    async fn stop(&self, volume: &str) -> bool;
}

/// Shells out to an external script/binary to start and stop the SMB
/// server, in the same `std::process::Command` idiom used for the
/// orchestrator and store-process integrations. A nonzero exit status is
/// treated as failure.
pub struct ExternalScriptSmbController {
    pub start_command: String,
    pub stop_command: String,
}

#[async_trait]
impl SmbController for ExternalScriptSmbController {
    async fn start(&self, volume: &str) -> bool {
        run_command(&self.start_command, volume).await
    }

    async fn stop(&self, volume: &str) -> bool {
        run_command(&self.stop_command, volume).await
    }
}

async fn run_command(command: &str, volume: &str) -> bool {
    let command = command.to_string();
    let volume = volume.to_string();
    let result = tokio::task::spawn_blocking(move || {
        std::process::Command::new(&command)
            .arg(&volume)
            .status()
    })
    .await;

    match result {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            log::error!("smb controller: failed to spawn {command}: {e}");
            false
        }
        Err(e) => {
            log::error!("smb controller: task join error: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn true_command_reports_success() {
        let ctrl = ExternalScriptSmbController {
            start_command: "true".to_string(),
            stop_command: "true".to_string(),
        };
        assert!(ctrl.start("vol1").await);
        assert!(ctrl.stop("vol1").await);
    }

    #[tokio::test]
    async fn false_command_reports_failure() {
        let ctrl = ExternalScriptSmbController {
            start_command: "false".to_string(),
            stop_command: "false".to_string(),
        };
        assert!(!ctrl.start("vol1").await);
    }

    #[tokio::test]
    async fn missing_binary_reports_failure() {
        let ctrl = ExternalScriptSmbController {
            start_command: "/no/such/binary".to_string(),
            stop_command: "/no/such/binary".to_string(),
        };
        assert!(!ctrl.start("vol1").await);
    }
}

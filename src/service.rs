//! Starting and stopping the database as an OS-level service.

use tokio::process::Command;

use crate::storage::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

/// The command that performs `action` on the database service for `os`
/// (as reported by `std::env::consts::OS`).
pub fn service_command(os: &str, action: ServiceAction) -> Option<(&'static str, Vec<&'static str>)> {
    let verb = match action {
        ServiceAction::Start => "start",
        ServiceAction::Stop => "stop",
    };
    match os {
        "macos" => Some(("brew", vec!["services", verb, "mongodb-community@7.0"])),
        "linux" => Some(("sudo", vec!["systemctl", verb, "mongodb"])),
        "windows" => Some(("net", vec![verb, "MongoDB"])),
        _ => None,
    }
}

pub async fn run(action: ServiceAction) -> Result<(), StoreError> {
    let os = std::env::consts::OS;
    let (program, args) = service_command(os, action)
        .ok_or_else(|| StoreError::Unreachable(format!("unsupported operating system: {}", os)))?;

    tracing::info!(os, program, ?args, "database: {:?} service", action);
    let output = Command::new(program).args(&args).output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StoreError::Unreachable(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(())
}

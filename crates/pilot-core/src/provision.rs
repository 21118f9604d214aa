//! Android emulator provisioning.
//!
//! Ensures a booted emulator is available before a run starts: detect a
//! running device, otherwise launch the configured AVD headlessly and
//! poll until Android reports boot complete.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::EmulatorConfig;
use crate::error::{AgentError, AgentResult, ErrorKind};

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a provisioning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// An emulator was already up; nothing was launched.
    AlreadyRunning,
    /// A fresh emulator was launched and booted.
    Created,
}

async fn adb(adb_path: &str, args: &[&str]) -> AgentResult<String> {
    let output = Command::new(adb_path).args(args).output().await.map_err(|e| {
        AgentError::with_details(ErrorKind::Provisioning, "Failed to spawn adb", e.to_string())
    })?;
    if !output.status.success() {
        return Err(AgentError::with_details(
            ErrorKind::Provisioning,
            format!("adb {} failed", args.first().copied().unwrap_or_default()),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks `adb devices` for an online emulator entry.
pub async fn is_emulator_running(adb_path: &str) -> AgentResult<bool> {
    let output = adb(adb_path, &["devices"]).await?;
    Ok(device_listed(&output))
}

fn device_listed(devices_output: &str) -> bool {
    devices_output.lines().any(|line| {
        let mut fields = line.split_whitespace();
        matches!(
            (fields.next(), fields.next()),
            (Some(serial), Some("device")) if serial.starts_with("emulator-")
        )
    })
}

/// Launches the AVD detached; does not wait for boot.
pub fn start_emulator(emulator_path: &str, avd_name: &str) -> AgentResult<()> {
    Command::new(emulator_path)
        .args(["-avd", avd_name, "-netdelay", "none", "-netspeed", "full"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            AgentError::with_details(
                ErrorKind::Provisioning,
                format!("Failed to start emulator for AVD {avd_name}"),
                e.to_string(),
            )
        })?;
    Ok(())
}

/// Blocks until adb sees a device (`adb wait-for-device`).
pub async fn wait_for_device(adb_path: &str) -> AgentResult<()> {
    adb(adb_path, &["wait-for-device"]).await.map(|_| ())
}

/// Polls `sys.boot_completed` once a second until Android reports 1.
pub async fn wait_for_boot(adb_path: &str) -> AgentResult<()> {
    loop {
        let output = adb(adb_path, &["shell", "getprop", "sys.boot_completed"]).await?;
        if output.trim() == "1" {
            return Ok(());
        }
        tokio::time::sleep(BOOT_POLL_INTERVAL).await;
    }
}

/// Ensures a booted emulator, launching one if none is online.
pub async fn ensure_emulator(config: &EmulatorConfig) -> AgentResult<Provisioned> {
    if is_emulator_running(&config.adb_path).await? {
        return Ok(Provisioned::AlreadyRunning);
    }
    start_emulator(&config.emulator_path, &config.avd_name)?;
    wait_for_device(&config.adb_path).await?;
    wait_for_boot(&config.adb_path).await?;
    Ok(Provisioned::Created)
}

/// Stops any running emulator. A missing emulator is not an error.
pub async fn kill_emulator(adb_path: &str) -> AgentResult<()> {
    if !is_emulator_running(adb_path).await? {
        return Ok(());
    }
    adb(adb_path, &["emu", "kill"]).await.map(|_| ())
}

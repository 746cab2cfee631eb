//! VirtualBox provider.
//!
//! [`VirtualBox`] turns typed intents into `VBoxManage` command lines,
//! runs them through a [`RemoteExecutor`] and decides from the output text
//! whether the hypervisor accepted them.

pub mod command;
pub mod parse;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};
use vm_config::HostConfig;
use vm_core::VmName;

use crate::error::{ProviderError, Result};
use crate::executor::{RemoteExecutor, RemoteOutput};
use command::{CommandSet, VBoxCommand};

/// Power state reported by `showvminfo --machinereadable` (`VMState`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmPowerState {
    Running,
    PoweredOff,
    Saved,
    Paused,
    Aborted,
    Other(String),
}

impl VmPowerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => VmPowerState::Running,
            "poweroff" => VmPowerState::PoweredOff,
            "saved" => VmPowerState::Saved,
            "paused" => VmPowerState::Paused,
            "aborted" => VmPowerState::Aborted,
            other => VmPowerState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VmPowerState::Running => "running",
            VmPowerState::PoweredOff => "poweroff",
            VmPowerState::Saved => "saved",
            VmPowerState::Paused => "paused",
            VmPowerState::Aborted => "aborted",
            VmPowerState::Other(state) => state,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, VmPowerState::Running | VmPowerState::Paused)
    }
}

/// Typed facade over `VBoxManage` on a remote host.
#[derive(Clone)]
pub struct VirtualBox {
    executor: Arc<dyn RemoteExecutor>,
    commands: CommandSet,
}

impl VirtualBox {
    pub fn new(executor: Arc<dyn RemoteExecutor>, host: &HostConfig) -> Self {
        Self {
            executor,
            commands: CommandSet::new(&host.vboxmanage, &host.vm_home),
        }
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Run one built command and fail if its output carries an error marker.
    async fn run(&self, command: VBoxCommand) -> Result<RemoteOutput> {
        let line = command.render();
        debug!(command = %line, "running hypervisor command");

        let output = self.executor.execute(&line).await?;

        if let Some(message) = parse::failure_message(&output) {
            return Err(ProviderError::Command {
                command: line,
                message,
            });
        }
        Ok(output)
    }

    pub async fn create_vm(&self, name: &VmName) -> Result<()> {
        self.run(self.commands.create_vm(name)).await?;
        info!(vm = %name, "registered VM");
        Ok(())
    }

    pub async fn set_initial_resources(&self, name: &VmName, memory_mb: u32, cpus: u32) -> Result<()> {
        self.run(self.commands.set_initial_resources(name, memory_mb, cpus))
            .await?;
        Ok(())
    }

    pub async fn set_resources(&self, name: &VmName, memory_mb: u32, cpus: u32) -> Result<()> {
        self.run(self.commands.set_resources(name, memory_mb, cpus))
            .await?;
        Ok(())
    }

    pub async fn create_disk(&self, name: &VmName, size_mb: u32) -> Result<()> {
        self.run(self.commands.create_disk(name, size_mb)).await?;
        Ok(())
    }

    /// `showvminfo --machinereadable` as a key/value map.
    pub async fn info(&self, name: &VmName) -> Result<IndexMap<String, String>> {
        let output = self
            .run(self.commands.show_info_machine_readable(name))
            .await?;
        Ok(parse::parse_machine_readable(&output.stdout))
    }

    /// Human-readable `showvminfo`, split on the first colon of each line.
    pub async fn details(&self, name: &VmName) -> Result<IndexMap<String, String>> {
        let output = self.run(self.commands.show_info(name)).await?;
        Ok(parse::parse_human_readable(&output.stdout))
    }

    pub async fn power_state(&self, name: &VmName) -> Result<VmPowerState> {
        let info = self.info(name).await?;
        let state = info.get("VMState").ok_or_else(|| ProviderError::Command {
            command: self.commands.show_info_machine_readable(name).render(),
            message: "output has no VMState field".to_string(),
        })?;
        Ok(VmPowerState::parse(state))
    }

    pub async fn start_headless(&self, name: &VmName) -> Result<()> {
        self.run(self.commands.start_headless(name)).await?;
        info!(vm = %name, "VM powered on");
        Ok(())
    }

    /// Graceful shutdown through the ACPI power button.
    pub async fn acpi_stop(&self, name: &VmName) -> Result<()> {
        self.run(self.commands.acpi_stop(name)).await?;
        info!(vm = %name, "ACPI shutdown requested");
        Ok(())
    }

    /// Immediate power off.
    pub async fn power_off(&self, name: &VmName) -> Result<()> {
        self.run(self.commands.power_off(name)).await?;
        info!(vm = %name, "VM powered off");
        Ok(())
    }

    pub async fn take_snapshot(
        &self,
        name: &VmName,
        snapshot: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.run(self.commands.snapshot_take(name, snapshot, description))
            .await?;
        info!(vm = %name, snapshot, "snapshot taken");
        Ok(())
    }

    pub async fn list_snapshots(&self, name: &VmName) -> Result<Vec<String>> {
        let output = self.run(self.commands.snapshot_list(name)).await?;
        Ok(parse::parse_snapshot_names(&output.stdout))
    }

    pub async fn unregister_and_delete(&self, name: &VmName) -> Result<()> {
        self.run(self.commands.unregister_and_delete(name)).await?;
        info!(vm = %name, "VM unregistered and deleted");
        Ok(())
    }
}

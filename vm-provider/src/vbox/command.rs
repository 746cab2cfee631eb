//! `VBoxManage` command abstraction and builder utilities.
//!
//! Every argument is shell-quoted when rendered, so a command line built
//! here is safe to hand to a remote shell even if a caller somehow bypassed
//! VM name validation.

use vm_core::VmName;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    /// A path under the remote user's home directory. Rendered as `~/`
    /// followed by the quoted remainder so the remote shell still expands
    /// the tilde.
    HomeRelative(String),
}

/// Builder for a single `VBoxManage` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VBoxCommand {
    program: String,
    args: Vec<Arg>,
}

impl VBoxCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a single argument to the command.
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    /// Add multiple arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// Add a filesystem path argument; `~/`-prefixed paths keep tilde
    /// expansion on the remote side.
    pub fn path_arg(mut self, path: &str) -> Self {
        match path.strip_prefix("~/") {
            Some(rest) => self.args.push(Arg::HomeRelative(rest.to_string())),
            None => self.args.push(Arg::Plain(path.to_string())),
        }
        self
    }

    /// Render the full command line for a POSIX shell.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        for arg in &self.args {
            parts.push(match arg {
                Arg::Plain(s) => shell_quote(s),
                Arg::HomeRelative(rest) => format!("~/{}", shell_quote(rest)),
            });
        }
        parts.join(" ")
    }
}

/// Quote `s` for a POSIX shell. Strings made only of characters that are
/// never special are returned unchanged.
pub fn shell_quote(s: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "_-./=:,@%+".contains(c);
    if !s.is_empty() && s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Factory for every hypervisor intent the orchestrator issues.
#[derive(Debug, Clone)]
pub struct CommandSet {
    program: String,
    vm_home: String,
}

impl CommandSet {
    pub fn new(program: impl Into<String>, vm_home: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            vm_home: vm_home.into(),
        }
    }

    fn base(&self) -> VBoxCommand {
        VBoxCommand::new(&self.program)
    }

    /// Location of a VM's primary disk image on the host.
    pub fn disk_path(&self, name: &VmName) -> String {
        format!(
            "{}/{}/{}.vdi",
            self.vm_home.trim_end_matches('/'),
            name,
            name
        )
    }

    pub fn create_vm(&self, name: &VmName) -> VBoxCommand {
        self.base()
            .args(["createvm", "--name", name.as_str(), "--register"])
    }

    /// Resources applied right after `createvm`: memory, CPUs, video memory
    /// and a NAT network adapter.
    pub fn set_initial_resources(&self, name: &VmName, memory_mb: u32, cpus: u32) -> VBoxCommand {
        self.set_resources(name, memory_mb, cpus)
            .args(["--vram", "16", "--nic1", "nat"])
    }

    pub fn set_resources(&self, name: &VmName, memory_mb: u32, cpus: u32) -> VBoxCommand {
        self.base()
            .args(["modifyvm", name.as_str()])
            .args(["--memory".to_string(), memory_mb.to_string()])
            .args(["--cpus".to_string(), cpus.to_string()])
    }

    pub fn create_disk(&self, name: &VmName, size_mb: u32) -> VBoxCommand {
        self.base()
            .args(["createhd", "--filename"])
            .path_arg(&self.disk_path(name))
            .args(["--size".to_string(), size_mb.to_string()])
    }

    pub fn show_info(&self, name: &VmName) -> VBoxCommand {
        self.base().args(["showvminfo", name.as_str()])
    }

    pub fn show_info_machine_readable(&self, name: &VmName) -> VBoxCommand {
        self.show_info(name).arg("--machinereadable")
    }

    pub fn start_headless(&self, name: &VmName) -> VBoxCommand {
        self.base()
            .args(["startvm", name.as_str(), "--type", "headless"])
    }

    pub fn acpi_stop(&self, name: &VmName) -> VBoxCommand {
        self.base()
            .args(["controlvm", name.as_str(), "acpipowerbutton"])
    }

    pub fn power_off(&self, name: &VmName) -> VBoxCommand {
        self.base().args(["controlvm", name.as_str(), "poweroff"])
    }

    pub fn snapshot_take(
        &self,
        name: &VmName,
        snapshot: &str,
        description: Option<&str>,
    ) -> VBoxCommand {
        let cmd = self
            .base()
            .args(["snapshot", name.as_str(), "take", snapshot]);
        match description {
            Some(desc) => cmd.args(["--description", desc]),
            None => cmd,
        }
    }

    pub fn snapshot_list(&self, name: &VmName) -> VBoxCommand {
        self.base().args(["snapshot", name.as_str(), "list"])
    }

    pub fn unregister_and_delete(&self, name: &VmName) -> VBoxCommand {
        self.base()
            .args(["unregistervm", name.as_str(), "--delete"])
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use vm_core::error::{Result, VmError};
use vm_core::validation::validate_server_address;
use vm_core::{Pricing, ResourceLimits};

/// Root configuration for the hosting service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSettings,

    /// Hypervisor host reached over SSH
    #[serde(default)]
    pub host: HostConfig,

    /// Plan-independent resource ceilings
    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub pricing: Pricing,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3121".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("vm-hosting.db")
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
        }
    }
}

/// Connection settings for the hypervisor host.
#[derive(Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    /// Password for `sshpass`; key-based auth is used when absent.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Directory on the host that holds per-VM folders and disk images.
    #[serde(default = "default_vm_home")]
    pub vm_home: String,

    #[serde(default = "default_vboxmanage")]
    pub vboxmanage: String,

    /// Upper bound for a single remote command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Maximum concurrent SSH sessions opened against the host.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "vbox".to_string()
}

fn default_vm_home() -> String {
    "~/VirtualBox VMs".to_string()
}

fn default_vboxmanage() -> String {
    "vboxmanage".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_max_sessions() -> usize {
    4
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_host_address(),
            port: default_port(),
            username: default_username(),
            password: None,
            vm_home: default_vm_home(),
            vboxmanage: default_vboxmanage(),
            command_timeout_secs: default_command_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("vm_home", &self.vm_home)
            .field("vboxmanage", &self.vboxmanage)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Webhook,
}

/// Where transfer notifications are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub kind: NotifierKind,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    "noreply@vm-hosting.local".to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            webhook_url: None,
            sender: default_sender(),
        }
    }
}

impl ServiceConfig {
    /// Build the configuration: defaults, then `path` if given, then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file without applying overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&contents)?;
        debug!(path = %path.display(), "loaded service configuration");
        Ok(config)
    }

    /// Apply `VM_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("VM_API_BIND") {
            self.server.bind_addr = addr;
        }
        if let Some(path) = lookup("VM_API_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(ip) = lookup("VM_HOST_IP") {
            self.host.address = ip;
        }
        if let Some(port) = lookup("VM_HOST_PORT").and_then(|p| p.parse().ok()) {
            self.host.port = port;
        }
        if let Some(user) = lookup("VM_HOST_USER") {
            self.host.username = user;
        }
        if let Some(password) = lookup("VM_HOST_PASSWORD") {
            self.host.password = Some(password);
        }
        if let Some(home) = lookup("VM_HOST_HOME") {
            self.host.vm_home = home;
        }
        if let Some(url) = lookup("VM_NOTIFY_WEBHOOK") {
            self.notifications.kind = NotifierKind::Webhook;
            self.notifications.webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_server_address(&self.host.address)?;

        if self.host.port == 0 {
            return Err(VmError::Config("host port must be non-zero".into()));
        }
        if self.host.username.trim().is_empty() {
            return Err(VmError::Config("host username must be set".into()));
        }
        if self.host.max_sessions == 0 {
            return Err(VmError::Config("host max_sessions must be at least 1".into()));
        }
        if self.notifications.kind == NotifierKind::Webhook
            && self.notifications.webhook_url.is_none()
        {
            return Err(VmError::Config(
                "webhook notifications require notifications.webhook_url".into(),
            ));
        }

        Ok(())
    }
}

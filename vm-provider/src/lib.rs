//! Hypervisor provider library.
//!
//! Three layers, leaves first:
//! - [`executor`]: run one command line on the hypervisor host over SSH and
//!   hand back both output streams untouched.
//! - [`vbox::command`]: build shell-safe `VBoxManage` invocations.
//! - [`vbox`]: the typed facade the orchestrator drives, which runs built
//!   commands through an executor and interprets the text that comes back.

pub mod error;
pub mod executor;
pub mod vbox;

// When the `test-helpers` feature is enabled, include the scripted executor.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{ProviderError, Result};
pub use executor::{RemoteExecutor, RemoteOutput, SshExecutor};
pub use vbox::{VirtualBox, VmPowerState};

//! Service configuration.
//!
//! The configuration is assembled exactly once at process start
//! (defaults, then an optional YAML file, then environment overrides) and the
//! resulting [`ServiceConfig`] is passed down explicitly. Library code below
//! this crate never reads the process environment.

pub mod config;

pub use config::{
    HostConfig, NotificationSettings, NotifierKind, ServerSettings, ServiceConfig,
};

//! Foundation types shared by every layer of the hosting stack.
//!
//! Nothing in here talks to the hypervisor or the database: these are the
//! validated primitives (VM names, resource specs, actors) that the
//! provider and orchestrator layers pass around.

pub mod actor;
pub mod error;
pub mod name;
pub mod resources;
pub mod validation;

pub use actor::{Actor, Role};
pub use error::{Result, VmError};
pub use name::VmName;
pub use resources::{Adjustment, Pricing, ResourceLimits, ResourceSpec};

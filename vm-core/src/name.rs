use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VmError;
use crate::validation::validate_vm_name;

/// A VM name that has passed [`validate_vm_name`].
///
/// Holding a `VmName` is proof the value is safe to place on a hypervisor
/// command line; the only way to build one is through validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmName(String);

impl VmName {
    pub fn parse(name: impl Into<String>) -> Result<Self, VmError> {
        let name = name.into();
        validate_vm_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for VmName {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VmName {
    type Error = VmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<VmName> for String {
    fn from(name: VmName) -> Self {
        name.0
    }
}

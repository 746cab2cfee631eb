//! Centralized validation logic for user inputs and host settings.
//!
//! VM names and usernames end up interpolated into hypervisor command lines
//! and notification bodies, so both are restricted to a conservative
//! character set instead of being escaped after the fact.

use std::net::IpAddr;

use crate::error::{Result, VmError};

/// Longest VM name the hypervisor accepts for a registered machine folder.
pub const MAX_VM_NAME_LEN: usize = 64;

/// Longest username mirrored from the identity layer.
pub const MAX_USERNAME_LEN: usize = 150;

/// Validate a VM name.
///
/// Allowed: ASCII letters, digits, `.`, `_` and `-`, starting with a letter
/// or digit, at most [`MAX_VM_NAME_LEN`] characters. Spaces, quotes, `$`,
/// `;`, `/` and every other shell metacharacter are rejected.
pub fn validate_vm_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_VM_NAME_LEN {
        return Err(VmError::Validation(format!(
            "VM name must be between 1 and {} characters",
            MAX_VM_NAME_LEN
        )));
    }

    let first = name.chars().next().unwrap_or('-');
    if !first.is_ascii_alphanumeric() {
        return Err(VmError::Validation(format!(
            "VM name '{}' must start with a letter or digit",
            name
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(VmError::Validation(format!(
            "VM name '{}' contains invalid character {:?} (only letters, digits, '.', '_' and '-' allowed)",
            name, bad
        )));
    }

    Ok(())
}

/// Validate a tenant username (Django-style: letters, digits and `@.+-_`).
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(VmError::Validation(format!(
            "Username must be between 1 and {} characters",
            MAX_USERNAME_LEN
        )));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(VmError::Validation(format!(
            "Username '{}' contains invalid characters",
            username
        )));
    }

    Ok(())
}

/// Validate the hypervisor host address (hostname or IP address).
///
/// Rejects control characters and anything that is neither a parseable IP
/// nor an RFC 1123 hostname, so the value is safe to hand to `ssh`.
pub fn validate_server_address(server_addr: &str) -> Result<()> {
    if server_addr.is_empty() || server_addr.len() > 253 {
        return Err(VmError::Validation(
            "Server address must be between 1 and 253 characters".to_string(),
        ));
    }

    if server_addr.chars().any(|c| c.is_control()) {
        return Err(VmError::Validation(
            "Server address contains invalid control characters".to_string(),
        ));
    }

    let unbracketed = server_addr
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(server_addr);
    if unbracketed.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // All-numeric dotted labels that failed IP parsing are a malformed IP,
    // not a hostname.
    let labels: Vec<&str> = server_addr.split('.').collect();
    if labels.len() >= 2
        && labels
            .iter()
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(VmError::Validation(format!(
            "Invalid IP address format: {}",
            server_addr
        )));
    }

    validate_hostname(server_addr)
}

/// Validate a hostname according to RFC 1123 rules
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > 253 {
        return Err(VmError::Validation(
            "Hostname must be between 1 and 253 characters".to_string(),
        ));
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(VmError::Validation(
                "Hostname labels must be between 1 and 63 characters".to_string(),
            ));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(VmError::Validation(
                "Hostname labels cannot start or end with a hyphen".to_string(),
            ));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(VmError::Validation(format!(
                "Hostname label '{}' contains invalid characters (only alphanumeric and '-' allowed)",
                label
            )));
        }
    }

    Ok(())
}

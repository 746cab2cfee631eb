//! Parsers for `VBoxManage` text output.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::executor::RemoteOutput;

/// Parse `--machinereadable` output (`key="value"` lines, keys sometimes
/// quoted too) into an ordered map. Lines without `=` are ignored.
pub fn parse_machine_readable(output: &str) -> IndexMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = unquote(key.trim());
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

/// Parse human-readable `showvminfo` output by splitting each line on its
/// first colon. Later duplicates overwrite earlier ones.
pub fn parse_human_readable(output: &str) -> IndexMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn snapshot_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Name:\s*(.+?)(?:\s+\(UUID:.*)?$").expect("snapshot name pattern is valid")
    })
}

/// Extract the value following each `Name:` marker of `snapshot list`
/// output, in listing order.
pub fn parse_snapshot_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            snapshot_name_regex()
                .captures(line.trim_end())
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn failure_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:VBoxManage(?:\.exe)?: error:|.*: command not found$|.*: No such file or directory$|Syntax error:)",
        )
        .expect("failure pattern is valid")
    })
}

/// Look for hypervisor error markers in either stream.
///
/// Progress lines (`0%...10%...100%`) and informational chatter on stderr
/// are not failures; only recognised error lines are. Returns the matching
/// lines joined, or `None` when the output looks successful.
pub fn failure_message(output: &RemoteOutput) -> Option<String> {
    let errors: Vec<&str> = output
        .stderr
        .lines()
        .chain(output.stdout.lines())
        .map(str::trim)
        .filter(|line| failure_regex().is_match(line))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("\n"))
    }
}

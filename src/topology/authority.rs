//! Concrete membership authorities.
//!
//! Both produce the same strictly-typed [`MembershipResponse`]:
//! - [`CommandAuthority`] runs a status command that prints JSON on stdout
//! - [`InventoryAuthority`] reads a static YAML or JSON inventory file

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::discover::{MembershipAuthority, MembershipResponse};
use super::version::EngineVersion;

/// Environment variable carrying the target version to the status command.
pub const TARGET_VERSION_ENV: &str = "SSUP_TARGET_VERSION";

/// Runs an external status command and parses its JSON output.
pub struct CommandAuthority {
    program: String,
    args: Vec<String>,
    name: String,
}

impl CommandAuthority {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args,
        }
    }

    /// Run `command_line` through `sh -c`, so quoting and pipes behave as
    /// they would in a shell.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let command_line = command_line.trim();
        if command_line.is_empty() {
            anyhow::bail!("status command must not be empty");
        }
        Ok(Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), command_line.to_string()],
            name: command_line.to_string(),
        })
    }
}

#[async_trait]
impl MembershipAuthority for CommandAuthority {
    async fn members(&self, target: &EngineVersion) -> Result<MembershipResponse> {
        debug!("Running: {}", self.name);

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env(TARGET_VERSION_ENV, target.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'", self.name))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "'{}' exited with {}: {}",
                self.name,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse membership JSON from '{}'", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reads membership from a static inventory file.
pub struct InventoryAuthority {
    path: PathBuf,
    name: String,
}

impl InventoryAuthority {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }
}

#[async_trait]
impl MembershipAuthority for InventoryAuthority {
    async fn members(&self, _target: &EngineVersion) -> Result<MembershipResponse> {
        debug!("Reading inventory from {}", self.path.display());

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read inventory {}", self.path.display()))?;

        // YAML is a superset of JSON, so one parser covers both formats.
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse inventory {}", self.path.display()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Role;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_command_line() {
        let authority = CommandAuthority::from_command_line(" ha-members --format json ").unwrap();
        assert_eq!(authority.program, "sh");
        assert_eq!(authority.args, vec!["-c", "ha-members --format json"]);
        assert_eq!(authority.name(), "ha-members --format json");
    }

    #[tokio::test]
    async fn test_command_line_keeps_quotes_and_pipes() {
        let authority = CommandAuthority::from_command_line(
            r#"printf '%s' '{"members": [{"tag": "0", "address": "10.0.0.1", "role": "primary"}]}' | cat"#,
        )
        .unwrap();

        let response = authority.members(&EngineVersion::new(3, 2)).await.unwrap();
        assert_eq!(response.members.len(), 1);
        assert_eq!(response.members[0].address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_command_line_sees_target_version() {
        let authority = CommandAuthority::from_command_line(&format!(
            r#"printf '{{"members": [{{"tag": "0", "address": "%s", "role": "primary"}}]}}' "${}""#,
            TARGET_VERSION_ENV
        ))
        .unwrap();

        let response = authority.members(&EngineVersion::new(3, 2)).await.unwrap();
        assert_eq!(response.members[0].address, "3.2");
    }

    #[test]
    fn test_from_command_line_empty() {
        assert!(CommandAuthority::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_inventory_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "members:\n  - tag: machine-0\n    address: 10.0.0.1\n    series: trusty\n    role: primary\n  - tag: machine-1\n    address: 10.0.0.2\n    series: trusty\n    role: secondary\n    status: started"
        )
        .unwrap();

        let authority = InventoryAuthority::new(file.path());
        let response = authority.members(&EngineVersion::new(3, 2)).await.unwrap();
        assert_eq!(response.members.len(), 2);
        assert_eq!(response.members[0].role, Role::Primary);
        assert_eq!(response.members[1].status.as_deref(), Some("started"));
    }

    #[tokio::test]
    async fn test_inventory_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"members":[{{"tag":"0","address":"db0.internal","role":"primary"}}]}}"#
        )
        .unwrap();

        let authority = InventoryAuthority::new(file.path());
        let response = authority.members(&EngineVersion::new(3, 2)).await.unwrap();
        assert_eq!(response.members[0].address, "db0.internal");
        assert_eq!(response.members[0].series, "");
    }

    #[tokio::test]
    async fn test_inventory_missing_file() {
        let authority = InventoryAuthority::new("/nonexistent/ssup-inventory.yaml");
        let err = authority
            .members(&EngineVersion::new(3, 2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read inventory"));
    }

    #[tokio::test]
    async fn test_command_authority_missing_program() {
        let authority = CommandAuthority::new("ssup-definitely-not-installed", vec![]);
        let err = authority
            .members(&EngineVersion::new(3, 2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to execute"));
    }
}

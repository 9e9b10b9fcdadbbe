//! Remote command rendering.
//!
//! Every phase invokes the host-local upgrade agent through a fixed,
//! versioned template. Substituted values are always shell-quoted, so
//! anything discovery produced renders safely; only a malformed template
//! fails.

use std::fmt;

use crate::error::UpgradeError;
use crate::topology::{EngineVersion, Member, MemberId};
use crate::upgrade::RehydrateMode;

/// Version of the command templates below. Bump on any template change.
pub const TEMPLATE_VERSION: u32 = 1;

const NOTIFY_TEMPLATE: &str = "/var/lib/juju/tools/{{machine_tag}}/jujud upgrade-mongo --step notify --series {{series}} --machinetag {{machine_tag}} --target-version {{version}}";

const QUIESCE_TEMPLATE: &str = "/var/lib/juju/tools/{{machine_tag}}/jujud upgrade-mongo --step quiesce --series {{series}} --machinetag {{machine_tag}} --target-version {{version}}";

const UPGRADE_TEMPLATE: &str = "/var/lib/juju/tools/{{machine_tag}}/jujud upgrade-mongo --step upgrade --series {{series}} --machinetag {{machine_tag}} --target-version {{version}}";

const REHYDRATE_TEMPLATE: &str = "/var/lib/juju/tools/{{machine_tag}}/jujud upgrade-mongo --step rehydrate --series {{series}} --machinetag {{machine_tag}} --target-version {{version}} --primary {{primary_address}} --mode {{mode}}";

const VERIFY_TEMPLATE: &str = "/var/lib/juju/tools/{{machine_tag}}/jujud upgrade-mongo --step verify --series {{series}} --machinetag {{machine_tag}} --target-version {{version}}";

/// What a remote command asks the host-local agent to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Notify,
    Quiesce,
    Upgrade,
    Rehydrate {
        primary_address: String,
        mode: RehydrateMode,
    },
    Verify,
}

impl Action {
    /// Agent step name.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Quiesce => "quiesce",
            Self::Upgrade => "upgrade",
            Self::Rehydrate { .. } => "rehydrate",
            Self::Verify => "verify",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Self::Notify => NOTIFY_TEMPLATE,
            Self::Quiesce => QUIESCE_TEMPLATE,
            Self::Upgrade => UPGRADE_TEMPLATE,
            Self::Rehydrate { .. } => REHYDRATE_TEMPLATE,
            Self::Verify => VERIFY_TEMPLATE,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step())
    }
}

/// A rendered script bound to one member. Built fresh for every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub member: MemberId,
    pub address: String,
    pub script: String,
}

/// Render the engine upgrade command for a member.
pub fn render(member: &Member, target: &EngineVersion) -> Result<RemoteCommand, UpgradeError> {
    render_action(&Action::Upgrade, member, target)
}

/// Render the command for any phase action.
pub fn render_action(
    action: &Action,
    member: &Member,
    target: &EngineVersion,
) -> Result<RemoteCommand, UpgradeError> {
    let mut vars = vec![
        ("machine_tag", member.id.tag()),
        ("series", member.series.clone()),
        ("version", target.to_string()),
    ];
    if let Action::Rehydrate {
        primary_address,
        mode,
    } = action
    {
        vars.push(("primary_address", primary_address.clone()));
        vars.push(("mode", mode.to_string()));
    }

    let script = fill_template(action.template(), &vars)?;

    Ok(RemoteCommand {
        member: member.id.clone(),
        address: member.address.clone(),
        script,
    })
}

/// Substitute `{{name}}` placeholders with shell-quoted values.
pub fn fill_template(template: &str, vars: &[(&str, String)]) -> Result<String, UpgradeError> {
    let mut rendered = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let literal = &rest[..start];
        if literal.contains("}}") {
            return Err(UpgradeError::Template(format!(
                "stray '}}}}' in template: {}",
                template
            )));
        }
        rendered.push_str(literal);

        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            UpgradeError::Template(format!("unterminated placeholder in template: {}", template))
        })?;

        let name = after[..end].trim();
        let value = vars
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| UpgradeError::Template(format!("unknown placeholder '{}'", name)))?;

        rendered.push_str(&shquote(value));
        rest = &after[end + 2..];
    }

    if rest.contains("}}") {
        return Err(UpgradeError::Template(format!(
            "stray '}}}}' in template: {}",
            template
        )));
    }
    rendered.push_str(rest);

    Ok(rendered)
}

/// Quote a value for POSIX shells. Always quotes, so output is stable.
pub fn shquote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Role;
    use crate::topology::types::test_support::member;

    fn v(raw: &str) -> EngineVersion {
        EngineVersion::parse(raw).unwrap()
    }

    #[test]
    fn test_shquote() {
        assert_eq!(shquote("trusty"), "'trusty'");
        assert_eq!(shquote(""), "''");
        assert_eq!(shquote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_render_upgrade() {
        let m = member("0", "10.0.0.1", Role::Primary);
        let cmd = render(&m, &v("3.2/wiredTiger")).unwrap();
        assert_eq!(cmd.address, "10.0.0.1");
        assert_eq!(cmd.member, m.id);
        assert_eq!(
            cmd.script,
            "/var/lib/juju/tools/'machine-0'/jujud upgrade-mongo --step upgrade --series 'trusty' --machinetag 'machine-0' --target-version '3.2/wiredTiger'"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let m = member("1/lxc/0", "10.0.0.5", Role::Secondary);
        let a = render(&m, &v("3.0")).unwrap();
        let b = render(&m, &v("3.0")).unwrap();
        assert_eq!(a.script.as_bytes(), b.script.as_bytes());
        assert!(a.script.contains("'machine-1-lxc-0'"));
    }

    #[test]
    fn test_render_differs_by_version() {
        let m = member("0", "10.0.0.1", Role::Primary);
        let versions = ["3.0", "3.0.0", "3.2", "3.0/wiredTiger", "3.0/mmapv1"];
        let scripts: Vec<String> = versions
            .iter()
            .map(|raw| render(&m, &v(raw)).unwrap().script)
            .collect();
        for (i, a) in scripts.iter().enumerate() {
            for b in scripts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_render_differs_by_member() {
        let a = render(&member("1", "10.0.0.2", Role::Secondary), &v("3.0")).unwrap();
        let b = render(&member("2", "10.0.0.3", Role::Secondary), &v("3.0")).unwrap();
        assert_ne!(a.script, b.script);
    }

    #[test]
    fn test_render_escapes_hostile_series() {
        let mut m = member("0", "10.0.0.1", Role::Primary);
        m.series = "trusty'; reboot; echo '".to_string();
        let cmd = render(&m, &v("3.0")).unwrap();
        assert!(cmd.script.contains(r#"--series 'trusty'"'"'; reboot; echo '"'"''"#));
    }

    #[test]
    fn test_render_rehydrate() {
        let m = member("1", "10.0.0.2", Role::Secondary);
        let action = Action::Rehydrate {
            primary_address: "10.0.0.1".to_string(),
            mode: RehydrateMode::Reseed,
        };
        let cmd = render_action(&action, &m, &v("3.2")).unwrap();
        assert!(cmd.script.contains("--step rehydrate"));
        assert!(cmd.script.ends_with("--primary '10.0.0.1' --mode 'reseed'"));
    }

    #[test]
    fn test_every_action_renders_its_step() {
        let m = member("0", "10.0.0.1", Role::Primary);
        let actions = [
            Action::Notify,
            Action::Quiesce,
            Action::Upgrade,
            Action::Rehydrate {
                primary_address: "10.0.0.9".to_string(),
                mode: RehydrateMode::Resume,
            },
            Action::Verify,
        ];
        for action in actions {
            let cmd = render_action(&action, &m, &v("3.2")).unwrap();
            assert!(cmd.script.contains(&format!("--step {}", action.step())));
        }
    }

    #[test]
    fn test_fill_template_unknown_placeholder() {
        let err = fill_template("run {{nope}}", &[]).unwrap_err();
        assert!(matches!(err, UpgradeError::Template(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_fill_template_unterminated() {
        let vars = [("a", "x".to_string())];
        assert!(matches!(
            fill_template("run {{a", &vars),
            Err(UpgradeError::Template(_))
        ));
    }

    #[test]
    fn test_fill_template_stray_close() {
        let vars = [("a", "x".to_string())];
        assert!(fill_template("run }} {{a}}", &vars).is_err());
        assert!(fill_template("run {{a}} }}", &vars).is_err());
    }

    #[test]
    fn test_fill_template_trims_placeholder_names() {
        let vars = [("a", "x".to_string())];
        assert_eq!(fill_template("echo {{ a }}", &vars).unwrap(), "echo 'x'");
    }
}

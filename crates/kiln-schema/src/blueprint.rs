use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("failed to parse blueprint: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse blueprint: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize blueprint: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("blueprint name must not be empty")]
    EmptyName,
    #[error("blueprint name contains non-printable characters")]
    UnprintableName,
    #[error("invalid blueprint version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("duplicate user name '{0}' in blueprint customizations")]
    DuplicateUser(String),
}

/// A package or module selection: a name plus a version glob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default = "default_version_glob")]
    pub version: String,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Render the spec the way the dependency solver expects it:
    /// bare name when unconstrained, `name-version` otherwise.
    pub fn to_solver_spec(&self) -> String {
        if self.version.is_empty() || self.version == "*" {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

fn default_version_glob() -> String {
    "*".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshKeyCustomization {
    pub user: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelCustomization {
    pub append: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimezoneCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntpservers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocaleCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallServices {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<FirewallServices>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicesCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sshkey: Option<Vec<SshKeyCustomization>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Vec<UserCustomization>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<GroupCustomization>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TimezoneCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<LocaleCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
}

/// A named, versioned image customization bundle.
///
/// Blueprints round-trip losslessly between JSON, TOML, and memory; the
/// only normalization applied on decode is defaulting absent package
/// version globs to `"*"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<PackageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
}

impl Blueprint {
    /// Check the blueprint invariants: non-empty printable name, semver
    /// version, unique user names.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.name.is_empty() {
            return Err(BlueprintError::EmptyName);
        }
        if self.name.chars().any(|c| c.is_control()) {
            return Err(BlueprintError::UnprintableName);
        }

        semver::Version::parse(&self.version).map_err(|e| BlueprintError::InvalidVersion {
            version: self.version.clone(),
            reason: e.to_string(),
        })?;

        let mut seen = std::collections::HashSet::new();
        for user in self.users() {
            if !seen.insert(user.name.as_str()) {
                return Err(BlueprintError::DuplicateUser(user.name.clone()));
            }
        }

        Ok(())
    }

    /// Increment the patch component of the semver version in place.
    pub fn bump_patch(&mut self) -> Result<(), BlueprintError> {
        let mut version =
            semver::Version::parse(&self.version).map_err(|e| BlueprintError::InvalidVersion {
                version: self.version.clone(),
                reason: e.to_string(),
            })?;
        version.patch += 1;
        self.version = version.to_string();
        Ok(())
    }

    /// Package and module selections rendered as solver specs, packages
    /// first, in declaration order.
    pub fn solver_specs(&self) -> Vec<String> {
        self.packages
            .iter()
            .chain(self.modules.iter())
            .map(PackageSpec::to_solver_spec)
            .collect()
    }

    pub fn users(&self) -> &[UserCustomization] {
        self.customizations
            .as_ref()
            .and_then(|c| c.user.as_deref())
            .unwrap_or(&[])
    }

    pub fn group_customizations(&self) -> &[GroupCustomization] {
        self.customizations
            .as_ref()
            .and_then(|c| c.group.as_deref())
            .unwrap_or(&[])
    }

    /// First configured language and the keyboard layout, if any.
    pub fn primary_locale(&self) -> (Option<&str>, Option<&str>) {
        let Some(locale) = self.customizations.as_ref().and_then(|c| c.locale.as_ref()) else {
            return (None, None);
        };
        (
            locale.languages.first().map(String::as_str),
            locale.keyboard.as_deref(),
        )
    }

    pub fn hostname(&self) -> Option<&str> {
        self.customizations
            .as_ref()
            .and_then(|c| c.hostname.as_deref())
    }

    pub fn kernel_append(&self) -> Option<&str> {
        self.customizations
            .as_ref()
            .and_then(|c| c.kernel.as_ref())
            .map(|k| k.append.as_str())
    }

    /// Timezone name and NTP server list.
    pub fn timezone_settings(&self) -> (Option<&str>, &[String]) {
        let Some(tz) = self
            .customizations
            .as_ref()
            .and_then(|c| c.timezone.as_ref())
        else {
            return (None, &[]);
        };
        (tz.timezone.as_deref(), &tz.ntpservers)
    }

    pub fn firewall(&self) -> Option<&FirewallCustomization> {
        self.customizations
            .as_ref()
            .and_then(|c| c.firewall.as_ref())
    }

    pub fn services(&self) -> Option<&ServicesCustomization> {
        self.customizations
            .as_ref()
            .and_then(|c| c.services.as_ref())
    }

    pub fn to_toml(&self) -> Result<String, BlueprintError> {
        Ok(toml::to_string(self)?)
    }
}

pub fn parse_blueprint_toml(input: &str) -> Result<Blueprint, BlueprintError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_blueprint_json(input: &str) -> Result<Blueprint, BlueprintError> {
    Ok(serde_json::from_str(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
name = "base-server"
description = "A small server image"
version = "0.1.0"

[[packages]]
name = "bash"
version = "*"

[[packages]]
name = "tmux"
version = "2.9.*"

[[modules]]
name = "util-linux"

[[customizations.user]]
name = "admin"
password = "qweqweqwe"
groups = ["wheel"]

[customizations.timezone]
timezone = "Europe/Prague"
ntpservers = ["0.pool.ntp.org"]

[customizations.services]
enabled = ["sshd"]
"#
    }

    #[test]
    fn parses_full_toml_blueprint() {
        let bp = parse_blueprint_toml(sample_toml()).expect("should parse");
        assert_eq!(bp.name, "base-server");
        assert_eq!(bp.version, "0.1.0");
        assert_eq!(bp.packages.len(), 2);
        assert_eq!(bp.modules[0].version, "*", "absent glob defaults to *");
        assert_eq!(bp.users()[0].name, "admin");
        assert_eq!(bp.timezone_settings().0, Some("Europe/Prague"));
        assert_eq!(bp.services().unwrap().enabled, vec!["sshd"]);
    }

    #[test]
    fn parses_json_blueprint() {
        let bp = parse_blueprint_json(
            r#"{
                "name": "bp",
                "version": "0.0.1",
                "packages": [{"name": "bash", "version": "*"}],
                "customizations": {"user": [{"name": "root", "password": "x"}]}
            }"#,
        )
        .unwrap();
        assert_eq!(bp.name, "bp");
        assert_eq!(bp.users().len(), 1);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(parse_blueprint_toml("name = \"x\"\n[package\nname=\"bash\"").is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_blueprint_json(r#"{"name": "x", "version": }"#).is_err());
    }

    #[test]
    fn json_toml_roundtrip_is_identity() {
        let bp = parse_blueprint_toml(sample_toml()).unwrap();

        let json = serde_json::to_string(&bp).unwrap();
        let from_json: Blueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(from_json, bp);

        let toml_text = bp.to_toml().unwrap();
        let from_toml = parse_blueprint_toml(&toml_text).unwrap();
        assert_eq!(from_toml, bp);
    }

    #[test]
    fn validate_accepts_sample() {
        let bp = parse_blueprint_toml(sample_toml()).unwrap();
        bp.validate().unwrap();
    }

    #[test]
    fn validate_rejects_empty_name() {
        let bp = Blueprint {
            version: "0.0.1".to_owned(),
            ..Blueprint::default()
        };
        assert!(matches!(bp.validate(), Err(BlueprintError::EmptyName)));
    }

    #[test]
    fn validate_rejects_non_semver_version() {
        let bp = Blueprint {
            name: "bp".to_owned(),
            version: "not-a-version".to_owned(),
            ..Blueprint::default()
        };
        assert!(matches!(
            bp.validate(),
            Err(BlueprintError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn validate_rejects_duplicate_users() {
        let bp = parse_blueprint_json(
            r#"{
                "name": "bp",
                "version": "0.0.1",
                "customizations": {"user": [{"name": "root"}, {"name": "root"}]}
            }"#,
        )
        .unwrap();
        assert!(matches!(
            bp.validate(),
            Err(BlueprintError::DuplicateUser(name)) if name == "root"
        ));
    }

    #[test]
    fn bump_patch_increments_only_patch() {
        let mut bp = Blueprint {
            name: "bp".to_owned(),
            version: "2.1.2".to_owned(),
            ..Blueprint::default()
        };
        bp.bump_patch().unwrap();
        assert_eq!(bp.version, "2.1.3");
    }

    #[test]
    fn bump_patch_fails_on_invalid_version() {
        let mut bp = Blueprint {
            name: "bp".to_owned(),
            version: "nope".to_owned(),
            ..Blueprint::default()
        };
        assert!(bp.bump_patch().is_err());
    }

    #[test]
    fn solver_specs_render_globs() {
        let bp = parse_blueprint_toml(sample_toml()).unwrap();
        assert_eq!(bp.solver_specs(), vec!["bash", "tmux-2.9.*", "util-linux"]);
    }

    #[test]
    fn empty_sections_are_omitted_on_serialize() {
        let bp = Blueprint {
            name: "bp".to_owned(),
            version: "0.0.1".to_owned(),
            ..Blueprint::default()
        };
        let json = serde_json::to_string(&bp).unwrap();
        assert!(!json.contains("packages"));
        assert!(!json.contains("customizations"));
    }
}

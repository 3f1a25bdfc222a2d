//! The build recipe consumed by the external image-build engine.
//!
//! A recipe is a tree of two pipelines (the build environment and the
//! image content) plus an assembler that turns the resulting filesystem
//! tree into an artifact. Stages and assemblers serialize as
//! `{"name": ..., "options": {...}}` with options typed per stage kind.
//! Equal compose inputs must yield byte-equal canonical JSON, so every
//! map in here is a `BTreeMap`.

use crate::canon::to_canonical_json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnfRepo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnfStageOptions {
    pub release_version: String,
    pub base_architecture: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<DnfRepo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_packages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixBlsStageOptions {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocaleStageOptions {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeymapStageOptions {
    pub keymap: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostnameStageOptions {
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimezoneStageOptions {
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChronyStageOptions {
    pub timeservers: Vec<String>,
}

/// Per-user options inside the users stage; keyed by user name in
/// [`UsersStageOptions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStageEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsersStageOptions {
    pub users: BTreeMap<String, UserStageEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStageEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupsStageOptions {
    pub groups: BTreeMap<String, GroupStageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FstabEntry {
    pub uuid: Uuid,
    pub vfs_type: String,
    pub path: String,
    pub options: String,
    pub freq: u64,
    pub passno: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FstabStageOptions {
    pub filesystems: Vec<FstabEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grub2StageOptions {
    pub root_fs_uuid: Uuid,
    pub kernel_options: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemdStageOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallStageOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelinuxStageOptions {
    pub file_contexts: String,
}

/// One build stage: a known kind plus its typed options.
///
/// Serialized as `{"name": <kind>, "options": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "options")]
pub enum Stage {
    #[serde(rename = "dnf")]
    Dnf(DnfStageOptions),
    #[serde(rename = "fix-bls")]
    FixBls(FixBlsStageOptions),
    #[serde(rename = "locale")]
    Locale(LocaleStageOptions),
    #[serde(rename = "keymap")]
    Keymap(KeymapStageOptions),
    #[serde(rename = "hostname")]
    Hostname(HostnameStageOptions),
    #[serde(rename = "timezone")]
    Timezone(TimezoneStageOptions),
    #[serde(rename = "chrony")]
    Chrony(ChronyStageOptions),
    #[serde(rename = "users")]
    Users(UsersStageOptions),
    #[serde(rename = "groups")]
    Groups(GroupsStageOptions),
    #[serde(rename = "fstab")]
    Fstab(FstabStageOptions),
    #[serde(rename = "grub2")]
    Grub2(Grub2StageOptions),
    #[serde(rename = "systemd")]
    Systemd(SystemdStageOptions),
    #[serde(rename = "firewall")]
    Firewall(FirewallStageOptions),
    #[serde(rename = "selinux")]
    Selinux(SelinuxStageOptions),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Dnf(_) => "dnf",
            Stage::FixBls(_) => "fix-bls",
            Stage::Locale(_) => "locale",
            Stage::Keymap(_) => "keymap",
            Stage::Hostname(_) => "hostname",
            Stage::Timezone(_) => "timezone",
            Stage::Chrony(_) => "chrony",
            Stage::Users(_) => "users",
            Stage::Groups(_) => "groups",
            Stage::Fstab(_) => "fstab",
            Stage::Grub2(_) => "grub2",
            Stage::Systemd(_) => "systemd",
            Stage::Firewall(_) => "firewall",
            Stage::Selinux(_) => "selinux",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QemuAssemblerOptions {
    pub format: String,
    pub filename: String,
    pub ptuuid: String,
    pub root_fs_uuid: Uuid,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TarAssemblerOptions {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawfsAssemblerOptions {
    pub filename: String,
    pub root_fs_uuid: Uuid,
    pub size: u64,
}

/// Turns the assembled filesystem tree into the final artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "options")]
pub enum Assembler {
    #[serde(rename = "qemu")]
    Qemu(QemuAssemblerOptions),
    #[serde(rename = "tar")]
    Tar(TarAssemblerOptions),
    #[serde(rename = "rawfs")]
    Rawfs(RawfsAssemblerOptions),
}

impl Assembler {
    pub fn name(&self) -> &'static str {
        match self {
            Assembler::Qemu(_) => "qemu",
            Assembler::Tar(_) => "tar",
            Assembler::Rawfs(_) => "rawfs",
        }
    }

    /// The artifact filename this assembler writes.
    pub fn filename(&self) -> &str {
        match self {
            Assembler::Qemu(o) => &o.filename,
            Assembler::Tar(o) => &o.filename,
            Assembler::Rawfs(o) => &o.filename,
        }
    }

    /// The qemu image format, for disk assemblers.
    pub fn image_format(&self) -> Option<&str> {
        match self {
            Assembler::Qemu(o) => Some(&o.format),
            Assembler::Tar(_) | Assembler::Rawfs(_) => None,
        }
    }
}

/// An ordered sequence of stages, optionally tied to a runner that
/// executes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
}

impl Pipeline {
    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }
}

/// A fully materialized build description: the build environment
/// pipeline, the image content pipeline, and the assembler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipe {
    pub build: Pipeline,
    pub stages: Pipeline,
    pub assembler: Assembler,
}

impl Recipe {
    /// Canonical JSON form: the byte representation handed to the build
    /// engine and compared for reproducibility.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        to_canonical_json(self)
    }
}

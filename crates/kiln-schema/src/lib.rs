//! Blueprint and recipe value types for Kiln.
//!
//! This crate defines the schema layer shared by every other Kiln crate:
//! blueprint parsing and validation (`Blueprint`), the build recipe model
//! consumed by the external image-build engine (`Recipe`, `Stage`,
//! `Assembler`), repository configuration (`RepoConfig`), and canonical
//! JSON serialization (`to_canonical_json`).

pub mod blueprint;
pub mod canon;
pub mod recipe;
pub mod repo;

pub use blueprint::{
    parse_blueprint_json, parse_blueprint_toml, Blueprint, BlueprintError, Customizations,
    FirewallCustomization, FirewallServices, GroupCustomization, KernelCustomization,
    LocaleCustomization, PackageSpec, ServicesCustomization, SshKeyCustomization,
    TimezoneCustomization, UserCustomization,
};
pub use canon::to_canonical_json;
pub use recipe::{
    Assembler, ChronyStageOptions, DnfRepo, DnfStageOptions, FirewallStageOptions,
    FixBlsStageOptions, FstabEntry, FstabStageOptions, GroupStageEntry, GroupsStageOptions,
    Grub2StageOptions, HostnameStageOptions, KeymapStageOptions, LocaleStageOptions, Pipeline,
    QemuAssemblerOptions, RawfsAssemblerOptions, Recipe, SelinuxStageOptions, Stage,
    SystemdStageOptions, TarAssemblerOptions, TimezoneStageOptions, UserStageEntry,
    UsersStageOptions,
};
pub use repo::{RepoConfig, RepoError};

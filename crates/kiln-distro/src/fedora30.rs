//! Fedora 30 distribution registry.
//!
//! Owns the output-format table (base package sets, excluded packages,
//! base service policy, kernel options, assembler shape per format), the
//! repository list, and the composition of blueprints into recipes.

use crate::crypt::{crypt_sha512, password_is_crypted};
use crate::{DistroError, Distribution};
use kiln_schema::{
    Assembler, Blueprint, ChronyStageOptions, DnfRepo, DnfStageOptions, FirewallStageOptions,
    FixBlsStageOptions, FstabEntry, FstabStageOptions, GroupStageEntry, GroupsStageOptions,
    Grub2StageOptions, HostnameStageOptions, KeymapStageOptions, LocaleStageOptions, Pipeline,
    QemuAssemblerOptions, RawfsAssemblerOptions, Recipe, RepoConfig, SelinuxStageOptions, Stage,
    SystemdStageOptions, TarAssemblerOptions, TimezoneStageOptions, UserStageEntry,
    UsersStageOptions,
};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

const RELEASE_VERSION: &str = "30";
const BASE_ARCHITECTURE: &str = "x86_64";
const RUNNER: &str = "fedora30";

/// Fixed filesystem identity keeps composed recipes reproducible.
const ROOT_FS_UUID: &str = "76a22bf4-f153-4541-b6c7-0332c0dfaeac";
const PARTITION_TABLE_ID: &str = "0x14fc63d2";
const IMAGE_SIZE: u64 = 3_222_274_048;

const SELINUX_FILE_CONTEXTS: &str = "etc/selinux/targeted/contexts/files/file_contexts";

const BUILD_PACKAGES: &[&str] = &[
    "dnf",
    "e2fsprogs",
    "policycoreutils",
    "qemu-img",
    "systemd",
    "grub2-pc",
    "tar",
];

const FEDORA_30_GPG_KEY: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----

mQINBFturGcBEACv0xBo91V2n0uEC2vh69ywCiSyvUgN/AQH8EZpCVtM7NyjKgKm
bbY4G3R0M3ir1xXmvUDvK0493/qOiFrjkplvzXFTGpPTi0ypqGgxc5d0ohRA1M75
L+0AIlXoOgHQ358/c4uO8X0JAA1NYxCkAW1KSJgFJ3RjukrfqSHWthS1d4o8fhHy
KJKEnirE5hHqB50dafXrBfgZdaOs3C6ppRIePFe2o4vUEapMTCHFw0woQR8Ah4/R
n7Z9G9Ln+0Cinmy0nbIDiZJ+pgLAXCOWBfDUzcOjDGKvcpoZharA07c0q1/5ojzO
4F0Fh4g/BUmtrASwHfcIbjHyCSr1j/3Iz883iy07gJY5Yhiuaqmp0o0f9fgHkG53
2xCU1owmACqaIBNQMukvXRDtB2GJMuKa/asTZDP6R5re+iXs7+s9ohcRRAKGyAyc
YKIQKcaA+6M8T7/G+TPHZX6HJWqJJiYB+EC2ERblpvq9TPlLguEWcmvjbVc31nyq
SDoO3ncFWKFmVsbQPTbP+pKUmlLfJwtb5XqxNR5GEXSwVv4I7IqBmJz1MmRafnBZ
g0FJUtH668GnldO20XbnSVBr820F5SISMXVwCXDXEvGwwiB8Lt8PvqzXnGIFDAu3
DlQI5sxSqpPVWSyw08ppKT2Tpmy8adiBotLfaCFl2VTHwOae48X2dMPBvQARAQAB
tDFGZWRvcmEgKDMwKSA8ZmVkb3JhLTMwLXByaW1hcnlAZmVkb3JhcHJvamVjdC5v
cmc+iQI4BBMBAgAiBQJbbqxnAhsPBgsJCAcDAgYVCAIJCgsEFgIDAQIeAQIXgAAK
CRDvPBEfz8ZZudTnD/9170LL3nyTVUCFmBjT9wZ4gYnpwtKVPa/pKnxbbS+Bmmac
g9TrT9pZbqOHrNJLiZ3Zx1Hp+8uxr3Lo6kbYwImLhkOEDrf4aP17HfQ6VYFbQZI8
f79OFxWJ7si9+3gfzeh9UYFEqOQfzIjLWFyfnas0OnV/P+RMQ1Zr+vPRqO7AR2va
N9wg+Xl7157dhXPCGYnGMNSoxCbpRs0JNlzvJMuAea5nTTznRaJZtK/xKsqLn51D
K07k9MHVFXakOH8QtMCUglbwfTfIpO5YRq5imxlWbqsYWVQy1WGJFyW6hWC0+RcJ
Ox5zGtOfi4/dN+xJ+ibnbyvy/il7Qm+vyFhCYqIPyS5m2UVJUuao3eApE38k78/o
8aQOTnFQZ+U1Sw+6woFTxjqRQBXlQm2+7Bt3bqGATg4sXXWPbmwdL87Ic+mxn/ml
SMfQux/5k6iAu1kQhwkO2YJn9eII6HIPkW+2m5N1JsUyJQe4cbtZE5Yh3TRA0dm7
+zoBRfCXkOW4krchbgww/ptVmzMMP7GINJdROrJnsGl5FVeid9qHzV7aZycWSma7
CxBYB1J8HCbty5NjtD6XMYRrMLxXugvX6Q4NPPH+2NKjzX4SIDejS6JjgrP3KA3O
pMuo7ZHMfveBngv8yP+ZD/1sS6l+dfExvdaJdOdgFCnp4p3gPbw5+Lv70HrMjA==
=BfZ/
-----END PGP PUBLIC KEY BLOCK-----
";

#[derive(Debug, Clone, Copy)]
enum AssemblerKind {
    Qemu { format: &'static str },
    Tar,
    Rawfs,
}

struct OutputSpec {
    filename: &'static str,
    mime_type: &'static str,
    packages: &'static [&'static str],
    excluded_packages: &'static [&'static str],
    enabled_services: &'static [&'static str],
    disabled_services: &'static [&'static str],
    kernel_options: &'static str,
    include_fstab: bool,
    assembler: AssemblerKind,
}

pub struct Fedora30 {
    outputs: BTreeMap<&'static str, OutputSpec>,
}

impl Default for Fedora30 {
    fn default() -> Self {
        Self::new()
    }
}

impl Fedora30 {
    pub fn new() -> Self {
        let mut outputs = BTreeMap::new();

        outputs.insert(
            "ami",
            OutputSpec {
                filename: "image.raw.xz",
                mime_type: "application/octet-stream",
                packages: &[
                    "@Core",
                    "chrony",
                    "kernel",
                    "selinux-policy-targeted",
                    "grub2-pc",
                    "langpacks-en",
                    "libxcrypt-compat",
                    "xfsprogs",
                    "cloud-init",
                    "checkpolicy",
                    "net-tools",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &["cloud-init.service"],
                disabled_services: &[],
                kernel_options: "ro no_timer_check console=ttyS0,115200n8 console=tty1 biosdevname=0 net.ifnames=0 console=ttyS0,115200",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "raw.xz" },
            },
        );

        outputs.insert(
            "ext4-filesystem",
            OutputSpec {
                filename: "filesystem.img",
                mime_type: "application/octet-stream",
                packages: &[
                    "policycoreutils",
                    "selinux-policy-targeted",
                    "kernel",
                    "firewalld",
                    "chrony",
                    "langpacks-en",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: false,
                assembler: AssemblerKind::Rawfs,
            },
        );

        outputs.insert(
            "partitioned-disk",
            OutputSpec {
                filename: "disk.img",
                mime_type: "application/octet-stream",
                packages: &[
                    "@core",
                    "chrony",
                    "firewalld",
                    "grub2-pc",
                    "kernel",
                    "langpacks-en",
                    "selinux-policy-targeted",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "raw" },
            },
        );

        outputs.insert(
            "qcow2",
            OutputSpec {
                filename: "image.qcow2",
                mime_type: "application/x-qemu-disk",
                packages: &[
                    "kernel-core",
                    "@Fedora Cloud Server",
                    "chrony",
                    "polkit",
                    "systemd-udev",
                    "selinux-policy-targeted",
                    "grub2-pc",
                    "langpacks-en",
                ],
                excluded_packages: &[
                    "dracut-config-rescue",
                    "etables",
                    "firewalld",
                    "gobject-introspection",
                    "plymouth",
                ],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "qcow2" },
            },
        );

        outputs.insert(
            "openstack",
            OutputSpec {
                filename: "image.qcow2",
                mime_type: "application/x-qemu-disk",
                packages: &[
                    "@Core",
                    "chrony",
                    "kernel",
                    "selinux-policy-targeted",
                    "grub2-pc",
                    "spice-vdagent",
                    "qemu-guest-agent",
                    "xen-libs",
                    "langpacks-en",
                    "cloud-init",
                    "libdrm",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "qcow2" },
            },
        );

        outputs.insert(
            "tar",
            OutputSpec {
                filename: "root.tar.xz",
                mime_type: "application/x-tar",
                packages: &[
                    "policycoreutils",
                    "selinux-policy-targeted",
                    "kernel",
                    "firewalld",
                    "chrony",
                    "langpacks-en",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: false,
                assembler: AssemblerKind::Tar,
            },
        );

        outputs.insert(
            "vhd",
            OutputSpec {
                filename: "image.vhd",
                mime_type: "application/x-vhd",
                packages: &[
                    "@Core",
                    "chrony",
                    "kernel",
                    "selinux-policy-targeted",
                    "grub2-pc",
                    "langpacks-en",
                    "net-tools",
                    "ntfsprogs",
                    "WALinuxAgent",
                    "libxcrypt-compat",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "vpc" },
            },
        );

        outputs.insert(
            "vmdk",
            OutputSpec {
                filename: "disk.vmdk",
                mime_type: "application/x-vmdk",
                packages: &[
                    "@core",
                    "chrony",
                    "firewalld",
                    "grub2-pc",
                    "kernel",
                    "langpacks-en",
                    "open-vm-tools",
                    "selinux-policy-targeted",
                ],
                excluded_packages: &["dracut-config-rescue"],
                enabled_services: &[],
                disabled_services: &[],
                kernel_options: "ro biosdevname=0 net.ifnames=0",
                include_fstab: true,
                assembler: AssemblerKind::Qemu { format: "vmdk" },
            },
        );

        Self { outputs }
    }

    fn root_fs_uuid() -> Uuid {
        Uuid::parse_str(ROOT_FS_UUID).expect("fixed root filesystem UUID parses")
    }

    fn dnf_options(&self, packages: Vec<String>, excluded: &[&str]) -> DnfStageOptions {
        DnfStageOptions {
            release_version: RELEASE_VERSION.to_owned(),
            base_architecture: BASE_ARCHITECTURE.to_owned(),
            repos: self
                .repositories()
                .into_iter()
                .map(|repo| DnfRepo {
                    baseurl: repo.baseurl,
                    metalink: repo.metalink,
                    mirrorlist: repo.mirrorlist,
                    checksum: repo.checksum,
                    gpgkey: repo.gpgkey,
                })
                .collect(),
            packages,
            exclude_packages: excluded.iter().map(|&p| p.to_owned()).collect(),
        }
    }

    fn build_pipeline(&self) -> Pipeline {
        let mut build = Pipeline {
            runner: Some(RUNNER.to_owned()),
            ..Pipeline::default()
        };
        build.add_stage(Stage::Dnf(self.dnf_options(
            BUILD_PACKAGES.iter().map(|&p| p.to_owned()).collect(),
            &[],
        )));
        build
    }

    /// Base packages first (declaration order), then blueprint packages,
    /// then modules; duplicates keep the first occurrence.
    fn merged_packages(output: &OutputSpec, blueprint: &Blueprint) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut packages = Vec::new();
        let base = output.packages.iter().map(|&p| p.to_owned());
        let selected = blueprint
            .packages
            .iter()
            .chain(blueprint.modules.iter())
            .map(kiln_schema::PackageSpec::to_solver_spec);
        for package in base.chain(selected) {
            if seen.insert(package.clone()) {
                packages.push(package);
            }
        }
        packages
    }

    fn users_stage(blueprint: &Blueprint) -> Result<Stage, DistroError> {
        let mut users = BTreeMap::new();
        for user in blueprint.users() {
            let password = match &user.password {
                Some(pw) if !password_is_crypted(pw) => Some(crypt_sha512(pw)?),
                other => other.clone(),
            };
            users.insert(
                user.name.clone(),
                UserStageEntry {
                    uid: user.uid,
                    gid: user.gid,
                    groups: user.groups.clone(),
                    description: user.description.clone(),
                    home: user.home.clone(),
                    shell: user.shell.clone(),
                    password,
                    key: user.key.clone(),
                },
            );
        }
        Ok(Stage::Users(UsersStageOptions { users }))
    }

    fn groups_stage(blueprint: &Blueprint) -> Stage {
        let mut groups = BTreeMap::new();
        for group in blueprint.group_customizations() {
            groups.insert(group.name.clone(), GroupStageEntry { gid: group.gid });
        }
        Stage::Groups(GroupsStageOptions { groups })
    }

    fn assembler(output: &OutputSpec) -> Assembler {
        match output.assembler {
            AssemblerKind::Qemu { format } => Assembler::Qemu(QemuAssemblerOptions {
                format: format.to_owned(),
                filename: output.filename.to_owned(),
                ptuuid: PARTITION_TABLE_ID.to_owned(),
                root_fs_uuid: Self::root_fs_uuid(),
                size: IMAGE_SIZE,
            }),
            AssemblerKind::Tar => Assembler::Tar(TarAssemblerOptions {
                filename: output.filename.to_owned(),
            }),
            AssemblerKind::Rawfs => Assembler::Rawfs(RawfsAssemblerOptions {
                filename: output.filename.to_owned(),
                root_fs_uuid: Self::root_fs_uuid(),
                size: IMAGE_SIZE,
            }),
        }
    }
}

impl Distribution for Fedora30 {
    fn name(&self) -> &str {
        "fedora-30"
    }

    fn runner(&self) -> &str {
        RUNNER
    }

    fn repositories(&self) -> Vec<RepoConfig> {
        vec![RepoConfig {
            id: "fedora".to_owned(),
            name: "Fedora 30".to_owned(),
            metalink: Some(
                "https://mirrors.fedoraproject.org/metalink?repo=fedora-$releasever&arch=$basearch"
                    .to_owned(),
            ),
            checksum: Some(
                "sha256:9f596e18f585bee30ac41c11fb11a83ed6b11d5b341c1cb56ca4015d7717cb97"
                    .to_owned(),
            ),
            gpgkey: Some(FEDORA_30_GPG_KEY.to_owned()),
            ..RepoConfig::default()
        }]
    }

    fn list_formats(&self) -> Vec<String> {
        self.outputs.keys().map(|&k| k.to_owned()).collect()
    }

    fn filename_mime(&self, format: &str) -> Result<(String, String), DistroError> {
        let output = self
            .outputs
            .get(format)
            .ok_or_else(|| DistroError::UnknownFormat(format.to_owned()))?;
        Ok((output.filename.to_owned(), output.mime_type.to_owned()))
    }

    fn compose(&self, blueprint: &Blueprint, format: &str) -> Result<Recipe, DistroError> {
        let output = self
            .outputs
            .get(format)
            .ok_or_else(|| DistroError::UnknownFormat(format.to_owned()))?;
        blueprint
            .validate()
            .map_err(|e| DistroError::InvalidBlueprint(e.to_string()))?;

        let mut stages = Pipeline::default();

        stages.add_stage(Stage::Dnf(self.dnf_options(
            Self::merged_packages(output, blueprint),
            output.excluded_packages,
        )));
        stages.add_stage(Stage::FixBls(FixBlsStageOptions::default()));

        let (language, keyboard) = blueprint.primary_locale();
        stages.add_stage(Stage::Locale(LocaleStageOptions {
            language: language.unwrap_or("en_US").to_owned(),
        }));
        if let Some(keyboard) = keyboard {
            stages.add_stage(Stage::Keymap(KeymapStageOptions {
                keymap: keyboard.to_owned(),
            }));
        }

        if let Some(hostname) = blueprint.hostname() {
            stages.add_stage(Stage::Hostname(HostnameStageOptions {
                hostname: hostname.to_owned(),
            }));
        }

        let (timezone, ntpservers) = blueprint.timezone_settings();
        if let Some(zone) = timezone {
            stages.add_stage(Stage::Timezone(TimezoneStageOptions {
                zone: zone.to_owned(),
            }));
        }
        if !ntpservers.is_empty() {
            stages.add_stage(Stage::Chrony(ChronyStageOptions {
                timeservers: ntpservers.to_vec(),
            }));
        }

        if !blueprint.users().is_empty() {
            stages.add_stage(Self::users_stage(blueprint)?);
        }
        if !blueprint.group_customizations().is_empty() {
            stages.add_stage(Self::groups_stage(blueprint));
        }

        if output.include_fstab {
            stages.add_stage(Stage::Fstab(FstabStageOptions {
                filesystems: vec![FstabEntry {
                    uuid: Self::root_fs_uuid(),
                    vfs_type: "ext4".to_owned(),
                    path: "/".to_owned(),
                    options: "defaults".to_owned(),
                    freq: 1,
                    passno: 1,
                }],
            }));
        }

        let mut kernel_options = output.kernel_options.to_owned();
        if let Some(append) = blueprint.kernel_append() {
            kernel_options.push(' ');
            kernel_options.push_str(append);
        }
        stages.add_stage(Stage::Grub2(Grub2StageOptions {
            root_fs_uuid: Self::root_fs_uuid(),
            kernel_options,
        }));

        let services = blueprint.services();
        let blueprint_enabled = services.map(|s| s.enabled.as_slice()).unwrap_or(&[]);
        let blueprint_disabled = services.map(|s| s.disabled.as_slice()).unwrap_or(&[]);
        if !output.enabled_services.is_empty()
            || !output.disabled_services.is_empty()
            || !blueprint_enabled.is_empty()
            || !blueprint_disabled.is_empty()
        {
            // Enabled and disabled sets are merged independently; a
            // blueprint-disabled service must never end up enabled.
            let enabled_services = output
                .enabled_services
                .iter()
                .map(|&s| s.to_owned())
                .chain(blueprint_enabled.iter().cloned())
                .collect();
            let disabled_services = output
                .disabled_services
                .iter()
                .map(|&s| s.to_owned())
                .chain(blueprint_disabled.iter().cloned())
                .collect();
            stages.add_stage(Stage::Systemd(SystemdStageOptions {
                enabled_services,
                disabled_services,
            }));
        }

        if let Some(firewall) = blueprint.firewall() {
            let (enabled_services, disabled_services) = match &firewall.services {
                Some(s) => (s.enabled.clone(), s.disabled.clone()),
                None => (Vec::new(), Vec::new()),
            };
            stages.add_stage(Stage::Firewall(FirewallStageOptions {
                ports: firewall.ports.clone(),
                enabled_services,
                disabled_services,
            }));
        }

        stages.add_stage(Stage::Selinux(SelinuxStageOptions {
            file_contexts: SELINUX_FILE_CONTEXTS.to_owned(),
        }));

        Ok(Recipe {
            build: self.build_pipeline(),
            stages,
            assembler: Self::assembler(output),
        })
    }
}

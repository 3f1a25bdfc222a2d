//! Client for the external dependency-solver subprocess.
//!
//! The solver speaks a one-shot JSON protocol: a single `{command,
//! arguments}` object on stdin, a single JSON value on stdout. Structured
//! failures exit with a dedicated code and `{kind, reason}` on stdout;
//! anything else is a protocol violation. The client never holds any lock
//! while the subprocess runs and gives each invocation its own scratch
//! working directory.

use chrono::{DateTime, Utc};
use kiln_schema::RepoConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Exit code the solver uses for structured `{kind, reason}` errors.
const EXIT_STRUCTURED_ERROR: i32 = 10;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("package marking failed: {reason}")]
    Marking { reason: String },
    #[error("dependency solving failed: {reason}")]
    Depsolve { reason: String },
    #[error("solver protocol violation: {0}")]
    Protocol(String),
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full metadata for one available package, as returned by `dump`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub summary: String,
    pub description: String,
    pub url: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub buildtime: DateTime<Utc>,
    pub license: String,
}

/// One resolved dependency, as returned by `depsolve`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageNevra {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl PackageNevra {
    /// The exact `epoch:version-release.arch` string used by `freeze`.
    pub fn evra(&self) -> String {
        format!(
            "{}:{}-{}.{}",
            self.epoch, self.version, self.release, self.arch
        )
    }
}

#[derive(Debug, Deserialize)]
struct StructuredError {
    kind: String,
    reason: String,
}

pub struct SolverClient {
    program: PathBuf,
}

impl SolverClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn call(&self, command: &str, arguments: serde_json::Value) -> Result<serde_json::Value, SolverError> {
        let workdir = tempfile::tempdir()?;
        let request = json!({ "command": command, "arguments": arguments });

        debug!("invoking solver {} for '{command}'", self.program.display());
        let mut child = Command::new(&self.program)
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let mut stdin = child.stdin.take().expect("child stdin is piped");
            stdin.write_all(request.to_string().as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match output.status.code() {
            Some(0) => serde_json::from_str(&stdout)
                .map_err(|e| SolverError::Protocol(format!("unparseable solver output: {e}"))),
            Some(EXIT_STRUCTURED_ERROR) => {
                let err: StructuredError = serde_json::from_str(&stdout).map_err(|e| {
                    SolverError::Protocol(format!("unparseable solver error body: {e}"))
                })?;
                match err.kind.as_str() {
                    "MarkingErrors" => Err(SolverError::Marking { reason: err.reason }),
                    "DepsolveError" => Err(SolverError::Depsolve { reason: err.reason }),
                    other => Err(SolverError::Protocol(format!(
                        "unknown solver error kind '{other}': {}",
                        err.reason
                    ))),
                }
            }
            code => {
                warn!(
                    "solver exited with {code:?}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Err(SolverError::Protocol(format!(
                    "solver exited with {code:?}"
                )))
            }
        }
    }

    /// List every package available in the given repositories.
    pub fn dump(&self, repos: &[RepoConfig]) -> Result<Vec<PackageInfo>, SolverError> {
        let value = self.call("dump", json!({ "repos": repos }))?;
        serde_json::from_value(value)
            .map_err(|e| SolverError::Protocol(format!("unexpected dump payload: {e}")))
    }

    /// Resolve package specs against the given repositories into exact
    /// NEVRAs.
    pub fn depsolve(
        &self,
        repos: &[RepoConfig],
        package_specs: &[String],
    ) -> Result<Vec<PackageNevra>, SolverError> {
        let value = self.call(
            "depsolve",
            json!({ "repos": repos, "package-specs": package_specs }),
        )?;
        serde_json::from_value(value)
            .map_err(|e| SolverError::Protocol(format!("unexpected depsolve payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_mock(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mock-solver");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn test_repo() -> RepoConfig {
        RepoConfig {
            id: "fedora".to_owned(),
            name: "Fedora 30".to_owned(),
            metalink: Some("https://mirrors.example.com/metalink".to_owned()),
            ..RepoConfig::default()
        }
    }

    #[test]
    fn depsolve_parses_nevra_list() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(
            dir.path(),
            r#"cat >/dev/null
printf '[{"name":"bash","epoch":0,"version":"5.0.7","release":"1.fc30","arch":"x86_64"}]'"#,
        );
        let client = SolverClient::new(mock);
        let deps = client
            .depsolve(&[test_repo()], &["bash".to_owned()])
            .unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "bash");
        assert_eq!(deps[0].evra(), "0:5.0.7-1.fc30.x86_64");
    }

    #[test]
    fn request_carries_command_and_specs() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("request.json");
        let mock = write_mock(
            dir.path(),
            &format!("cat > {}\nprintf '[]'", capture.display()),
        );
        let client = SolverClient::new(mock);
        client
            .depsolve(&[test_repo()], &["bash".to_owned(), "tmux-2.9.*".to_owned()])
            .unwrap();

        let request = std::fs::read_to_string(&capture).unwrap();
        let value: serde_json::Value = serde_json::from_str(&request).unwrap();
        assert_eq!(value["command"], "depsolve");
        assert_eq!(value["arguments"]["package-specs"][1], "tmux-2.9.*");
        assert_eq!(value["arguments"]["repos"][0]["id"], "fedora");
    }

    #[test]
    fn dump_parses_package_infos() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(
            dir.path(),
            r#"cat >/dev/null
printf '[{"name":"bash","summary":"The GNU Bourne Again shell","description":"Bash.","url":"https://www.gnu.org/software/bash","epoch":0,"version":"5.0.7","release":"1.fc30","arch":"x86_64","buildtime":"2019-06-10T12:00:00Z","license":"GPLv3+"}]'"#,
        );
        let client = SolverClient::new(mock);
        let packages = client.dump(&[test_repo()]).unwrap();
        assert_eq!(packages[0].license, "GPLv3+");
        assert_eq!(packages[0].buildtime.to_rfc3339(), "2019-06-10T12:00:00+00:00");
    }

    #[test]
    fn structured_depsolve_error_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(
            dir.path(),
            r#"cat >/dev/null
printf '{"kind":"DepsolveError","reason":"nothing provides frobozz"}'
exit 10"#,
        );
        let client = SolverClient::new(mock);
        let err = client
            .depsolve(&[test_repo()], &["frobozz".to_owned()])
            .unwrap_err();
        assert!(matches!(
            err,
            SolverError::Depsolve { ref reason } if reason == "nothing provides frobozz"
        ));
    }

    #[test]
    fn structured_marking_error_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(
            dir.path(),
            r#"cat >/dev/null
printf '{"kind":"MarkingErrors","reason":"no package matches ghost-1.0"}'
exit 10"#,
        );
        let client = SolverClient::new(mock);
        assert!(matches!(
            client.depsolve(&[test_repo()], &["ghost-1.0".to_owned()]),
            Err(SolverError::Marking { .. })
        ));
    }

    #[test]
    fn unknown_error_kind_is_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(
            dir.path(),
            r#"cat >/dev/null
printf '{"kind":"Surprise","reason":"?"}'
exit 10"#,
        );
        let client = SolverClient::new(mock);
        assert!(matches!(
            client.depsolve(&[test_repo()], &[]),
            Err(SolverError::Protocol(_))
        ));
    }

    #[test]
    fn garbage_stdout_is_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(dir.path(), "cat >/dev/null\nprintf 'not json'");
        let client = SolverClient::new(mock);
        assert!(matches!(
            client.depsolve(&[test_repo()], &[]),
            Err(SolverError::Protocol(_))
        ));
    }

    #[test]
    fn other_exit_codes_are_protocol_violations() {
        let dir = tempfile::tempdir().unwrap();
        let mock = write_mock(dir.path(), "cat >/dev/null\nexit 2");
        let client = SolverClient::new(mock);
        assert!(matches!(
            client.depsolve(&[test_repo()], &[]),
            Err(SolverError::Protocol(_))
        ));
    }

    #[test]
    fn missing_program_is_io_error() {
        let client = SolverClient::new("/nonexistent/solver-binary");
        assert!(matches!(
            client.depsolve(&[test_repo()], &[]),
            Err(SolverError::Io(_))
        ));
    }
}

//! Build-engine driver for the Kiln worker.
//!
//! The worker feeds a job's canonical recipe JSON to the external build
//! engine (`<engine> --store <dir> --output-directory <dir> --json -`)
//! and turns the engine's `{tree_id, output_id}` answer into an
//! [`ImageResult`] pointing at `refs/<output_id>/<filename>` inside the
//! artifact store.

use kiln_queue::{ImageResult, Job};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recipe serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("build failed: {0}")]
    BuildFailed(String),
}

#[derive(Debug, Deserialize)]
struct EngineOutput {
    #[serde(default)]
    #[allow(dead_code)]
    tree_id: String,
    #[serde(default)]
    output_id: String,
}

/// Run the build engine for one job and return the resulting image
/// reference. Any nonzero exit or missing output id is a build failure;
/// the worker never retries a job.
pub fn run_build(
    engine: &Path,
    store_dir: &Path,
    output_dir: &Path,
    job: &Job,
    filename: &str,
    mime_type: &str,
) -> Result<ImageResult, WorkerError> {
    let recipe_json = job.recipe.canonical_json()?;
    std::fs::create_dir_all(store_dir)?;
    std::fs::create_dir_all(output_dir)?;

    debug!("job {}: starting {}", job.id, engine.display());
    let mut child = Command::new(engine)
        .arg("--store")
        .arg(store_dir)
        .arg("--output-directory")
        .arg(output_dir)
        .arg("--json")
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let mut stdin = child.stdin.take().expect("child stdin is piped");
        stdin.write_all(recipe_json.as_bytes())?;
    }
    let output = child.wait_with_output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("job {}: engine failed: {}", job.id, stderr.trim());
        return Err(WorkerError::BuildFailed(format!(
            "engine exited with {:?}",
            output.status.code()
        )));
    }

    let parsed: EngineOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| WorkerError::BuildFailed(format!("unparseable engine output: {e}")))?;
    if parsed.output_id.is_empty() {
        return Err(WorkerError::BuildFailed(
            "engine produced no output id".to_owned(),
        ));
    }

    Ok(ImageResult {
        format: job.format.clone(),
        filename: filename.to_owned(),
        mime_type: mime_type.to_owned(),
        output_ref: format!("refs/{}/{filename}", parsed.output_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_queue::JobQueue;
    use kiln_schema::{Assembler, Pipeline, Recipe, TarAssemblerOptions};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn write_mock_engine(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mock-engine");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn claimed_job() -> Job {
        let queue = JobQueue::new();
        queue.enqueue(
            "tar",
            Recipe {
                build: Pipeline::default(),
                stages: Pipeline::default(),
                assembler: Assembler::Tar(TarAssemblerOptions {
                    filename: "root.tar.xz".to_owned(),
                }),
            },
        );
        queue.claim()
    }

    #[test]
    fn successful_build_yields_image_reference() {
        let dir = tempfile::tempdir().unwrap();
        let engine = write_mock_engine(
            dir.path(),
            r#"cat >/dev/null
printf '{"tree_id":"tree1","output_id":"out123"}'"#,
        );
        let image = run_build(
            &engine,
            &dir.path().join("store"),
            &dir.path().join("out"),
            &claimed_job(),
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap();
        assert_eq!(image.output_ref, "refs/out123/root.tar.xz");
        assert_eq!(image.format, "tar");
        assert_eq!(image.mime_type, "application/x-tar");
    }

    #[test]
    fn engine_receives_canonical_recipe_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("stdin.json");
        let engine = write_mock_engine(
            dir.path(),
            &format!(
                "cat > {}\nprintf '{{\"tree_id\":\"t\",\"output_id\":\"o\"}}'",
                capture.display()
            ),
        );
        let job = claimed_job();
        run_build(
            &engine,
            &dir.path().join("store"),
            &dir.path().join("out"),
            &job,
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap();

        let sent = std::fs::read_to_string(&capture).unwrap();
        assert_eq!(sent, job.recipe.canonical_json().unwrap());
    }

    #[test]
    fn nonzero_exit_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = write_mock_engine(
            dir.path(),
            "cat >/dev/null\necho 'mount failed' >&2\nexit 1",
        );
        let err = run_build(
            &engine,
            &dir.path().join("store"),
            &dir.path().join("out"),
            &claimed_job(),
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::BuildFailed(_)));
    }

    #[test]
    fn missing_output_id_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = write_mock_engine(
            dir.path(),
            r#"cat >/dev/null
printf '{"tree_id":"t"}'"#,
        );
        let err = run_build(
            &engine,
            &dir.path().join("store"),
            &dir.path().join("out"),
            &claimed_job(),
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::BuildFailed(_)));
    }

    #[test]
    fn garbage_engine_output_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = write_mock_engine(dir.path(), "cat >/dev/null\nprintf 'not json'");
        let err = run_build(
            &engine,
            &dir.path().join("store"),
            &dir.path().join("out"),
            &claimed_job(),
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::BuildFailed(_)));
    }

    #[test]
    fn missing_engine_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_build(
            Path::new("/nonexistent/build-engine"),
            &dir.path().join("store"),
            &dir.path().join("out"),
            &claimed_job(),
            "root.tar.xz",
            "application/x-tar",
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::Io(_)));
    }
}

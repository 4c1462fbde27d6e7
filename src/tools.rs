//! Shared plumbing for the external programs the pipeline drives.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Failure of an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("'{program}' produced no output at {}", path.display())]
    MissingOutput { program: String, path: PathBuf },
    #[error("malformed output from '{program}': {detail}")]
    MalformedOutput { program: String, detail: String },
    #[error("PDF extraction failed for {}: {detail}", path.display())]
    Pdf { path: PathBuf, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Run `program` with `args` to completion and return its stdout.
///
/// The child is not killed when the returned future is dropped, which is
/// what the schedulers' soft timeout expects.
pub async fn run_command<I, S>(program: &str, args: I) -> Result<Vec<u8>, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program, "spawning");
    let output = cmd.output().await.map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().chars().take(500).collect(),
        });
    }

    Ok(output.stdout)
}

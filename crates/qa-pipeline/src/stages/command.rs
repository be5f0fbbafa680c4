//! External-process collaborator speaking JSON over stdio.
//!
//! The request is written to the child's stdin as one JSON object. The child
//! reports its [`StageOutcome`] as the last JSON line on stdout; anything
//! printed before it is treated as log output.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use coordination::quality::StageKind;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Collaborator, StageError, StageOutcome, StageRequest, StageResult};

/// Stderr bytes kept in error messages.
const STDERR_MAX_BYTES: usize = 2000;

fn default_timeout_secs() -> u64 {
    600
}

/// How to launch one external program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Build a tokio command with piped stdio that dies with its handle.
    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Runs one configured program per stage.
pub struct CommandCollaborator {
    commands: HashMap<StageKind, CommandSpec>,
    artifacts_dir: PathBuf,
    working_dir: Option<PathBuf>,
}

impl CommandCollaborator {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands: HashMap::new(),
            artifacts_dir: artifacts_dir.into(),
            working_dir: None,
        }
    }

    pub fn with_stage(mut self, stage: StageKind, spec: CommandSpec) -> Self {
        self.commands.insert(stage, spec);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn has_stage(&self, stage: StageKind) -> bool {
        self.commands.contains_key(&stage)
    }
}

#[async_trait]
impl Collaborator for CommandCollaborator {
    async fn invoke(&self, stage: StageKind, request: &StageRequest) -> StageResult<StageOutcome> {
        let spec = self
            .commands
            .get(&stage)
            .ok_or(StageError::NotConfigured(stage))?;
        let payload =
            serde_json::to_vec(request).map_err(|e| StageError::Protocol(e.to_string()))?;

        let mut cmd = spec.command();
        cmd.env("QA_STAGE", stage.to_string())
            .env("QA_ARTIFACTS_DIR", &self.artifacts_dir);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            stage = %stage,
            program = %spec.program,
            target = %request.target_version,
            "Invoking collaborator"
        );

        let output = run_with_timeout(cmd, spec, Some(payload)).await?;
        if !output.status.success() {
            return Err(StageError::Exit {
                program: spec.program.clone(),
                code: output.status.code(),
                stderr: truncate_str(&String::from_utf8_lossy(&output.stderr), STDERR_MAX_BYTES),
            });
        }

        parse_outcome(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Spawn, feed stdin, and collect output within the command's timeout.
///
/// On timeout the child handle is dropped, which kills the process.
pub(crate) async fn run_with_timeout(
    mut cmd: tokio::process::Command,
    spec: &CommandSpec,
    stdin: Option<Vec<u8>>,
) -> StageResult<std::process::Output> {
    let mut child = cmd.spawn().map_err(|source| StageError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let io = async move {
        if let Some(mut pipe) = child.stdin.take() {
            if let Some(bytes) = stdin {
                match pipe.write_all(&bytes).await {
                    Ok(()) => {}
                    // The child may exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(Duration::from_secs(spec.timeout_secs), io).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(StageError::Failed(format!(
            "I/O with {} failed: {e}",
            spec.program
        ))),
        Err(_) => {
            warn!(program = %spec.program, secs = spec.timeout_secs, "Collaborator timed out");
            Err(StageError::Timeout {
                program: spec.program.clone(),
                secs: spec.timeout_secs,
            })
        }
    }
}

/// Take the last JSON object line of stdout as the outcome.
fn parse_outcome(stdout: &str) -> StageResult<StageOutcome> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| StageError::Protocol("no JSON outcome on stdout".to_string()))?;
    serde_json::from_str(line).map_err(|e| StageError::Protocol(e.to_string()))
}

/// Truncate to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated at {} bytes]", &s[..end], s.len())
}

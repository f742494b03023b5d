//! Stages backed by external programs.
//!
//! The program receives the stage context as JSON on stdin and writes JSON
//! lines to stdout:
//!
//! ```text
//! {"event":"progress","data":{"incident":1,"total":3}}
//! {"event":"warning","message":"TTS unavailable, continuing without audio"}
//! {"event":"output","data":{..},"summary":{..},"artifacts":[..]}
//! ```
//!
//! Exit code 75 (`EX_TEMPFAIL`) marks the failure as retryable.

use super::{Stage, StageContext};
use crate::core::{StageKind, StageOutput};
use crate::errors::{IncidentflowError, StageError};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

const EX_TEMPFAIL: i32 = 75;
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum StageMessage {
    Progress {
        #[serde(default)]
        data: serde_json::Value,
    },
    Warning {
        message: String,
    },
    Output(StageOutput),
}

/// Runs a configured program for one stage.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandStage {
    /// Creates a stage running `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Creates a stage for `kind` from a whitespace-separated command line.
    pub fn for_kind(kind: StageKind, command_line: &str) -> Result<Self, IncidentflowError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            IncidentflowError::Config(format!("empty command for stage '{kind}'"))
        })?;
        Ok(Self::new(kind.name(), program).with_args(parts))
    }

    /// Appends program arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The program arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

fn tail(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().rev().nth(STDERR_TAIL_CHARS) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("INCIDENTFLOW_JOB_ID", ctx.job_id().to_string())
            .env("INCIDENTFLOW_STAGE", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = ctx.output_dir() {
            tokio::fs::create_dir_all(&dir).await?;
            command.env("INCIDENTFLOW_OUTPUT_DIR", dir);
        }

        let mut child = command.spawn().map_err(|err| {
            StageError::new(format!("Failed to start '{}': {err}", self.program))
        })?;
        info!(job_id = %ctx.job_id(), stage = %self.name, program = %self.program, "Started stage program");

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&ctx.to_json())?;
            if let Err(err) = stdin.write_all(&payload).await {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err.into());
                }
            }
        }

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StageError::new("stage program stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut output = None;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StageMessage>(line) {
                Ok(StageMessage::Progress { data }) => ctx.progress(data),
                Ok(StageMessage::Warning { message }) => ctx.warn(message),
                Ok(StageMessage::Output(stage_output)) => output = Some(stage_output),
                Err(err) => {
                    debug!(stage = %self.name, error = %err, "Ignoring non-protocol stdout line");
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let message = format!("'{}' exited with {status}: {}", self.program, tail(&stderr));
            return Err(if status.code() == Some(EX_TEMPFAIL) {
                StageError::retryable(message)
            } else {
                StageError::new(message)
            });
        }

        output.ok_or_else(|| {
            StageError::new(format!(
                "'{}' produced no output: {}",
                self.program,
                tail(&stderr)
            ))
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::core::JobId;
    use crate::events::ProgressBus;
    use crate::jobs::Submission;
    use std::sync::Arc;

    fn script_stage(script: &str) -> CommandStage {
        CommandStage::new("deescalation", "sh").with_args(["-c", script])
    }

    fn context(bus: &Arc<ProgressBus>) -> StageContext {
        let job_id = JobId::new();
        bus.open(job_id).unwrap();
        StageContext::new(job_id, "deescalation", 1, Submission::new("clip.mp4"))
            .with_bus(Arc::clone(bus))
    }

    #[test]
    fn test_for_kind_parses_command_line() {
        let stage = CommandStage::for_kind(StageKind::Report, "python3 stages/report.py --fast").unwrap();
        assert_eq!(stage.name(), "report");
        assert_eq!(stage.program(), "python3");
        assert_eq!(stage.args(), ["stages/report.py", "--fast"]);

        assert!(CommandStage::for_kind(StageKind::Report, "   ").is_err());
    }

    #[tokio::test]
    async fn test_protocol_lines_are_translated() {
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus);
        let stage = script_stage(
            r#"cat > /dev/null
echo '{"event":"progress","data":{"incident":1,"total":1}}'
echo 'not json'
echo '{"event":"warning","message":"TTS unavailable"}'
echo '{"event":"output","data":{"guidance":["stay calm"]},"summary":{"guidance_count":1}}'"#,
        );

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("guidance").unwrap()[0], "stay calm");
        assert_eq!(output.completion_payload()["guidance_count"], 1);

        let types: Vec<String> = bus
            .history(ctx.job_id())
            .unwrap()
            .iter()
            .map(|e| e.kind.to_string())
            .collect();
        assert_eq!(types, vec!["connected", "deescalation_progress", "warning"]);
    }

    #[tokio::test]
    async fn test_stdin_carries_context() {
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus);
        let stage = script_stage(
            r#"input=$(cat)
case "$input" in
  *clip.mp4*) echo '{"event":"output","data":{"ok":true}}' ;;
  *) exit 3 ;;
esac"#,
        );

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("ok").unwrap(), true);
    }

    #[tokio::test]
    async fn test_environment_and_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus).with_artifacts(Arc::new(FsArtifactStore::new(dir.path())));
        let stage = script_stage(
            r#"cat > /dev/null
echo "$INCIDENTFLOW_STAGE" > "$INCIDENTFLOW_OUTPUT_DIR/stage.txt"
echo '{"event":"output","data":{},"artifacts":[{"name":"stage","path":"stage.txt"}]}'"#,
        );

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.artifacts[0].path, "stage.txt");

        let bytes = ctx.artifacts().fetch(ctx.job_id(), "stage.txt").await.unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap().trim(), "deescalation");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_stderr() {
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus);
        let stage = script_stage("cat > /dev/null; echo 'model quota exceeded' >&2; exit 2");

        let err = stage.execute(&ctx).await.unwrap_err();
        assert!(err.message.contains("model quota exceeded"));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_tempfail_exit_is_retryable() {
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus);
        let stage = script_stage("cat > /dev/null; exit 75");

        let err = stage.execute(&ctx).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_missing_output_line_fails() {
        let bus = Arc::new(ProgressBus::default());
        let ctx = context(&bus);
        let stage = script_stage("cat > /dev/null; echo hello");

        let err = stage.execute(&ctx).await.unwrap_err();
        assert!(err.message.contains("produced no output"));
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let ctx = StageContext::new(JobId::new(), "report", 2, Submission::new("clip.mp4"));
        let stage = CommandStage::new("report", "/nonexistent/incidentflow-stage");

        let err = stage.execute(&ctx).await.unwrap_err();
        assert!(err.message.starts_with("Failed to start"));
    }
}

//! One [`AgentDriver`] implementation shared by Agent-A and Agent-B: both
//! shell out to a line-oriented CLI binary that accepts a JSON request on
//! stdin and either prints one JSON completion envelope (§4.4 Execute) or a
//! sequence of newline-delimited JSON records (§4.4 Stream). Grounded on the
//! CLI-subprocess-with-JSON-envelope shape of `gemini_cli.rs`, generalized
//! from one hardcoded provider into a config-driven driver so the same code
//! realizes both concrete agents (§9: variant-based polymorphism over two
//! concrete drivers, not inheritance).

use crate::driver::{AgentDriver, DriverError, DriverResult};
use async_trait::async_trait;
use chatgate_core::{tokens, AgentRequest, CompletionResult, FinishReason, ModelInfo, StreamChunk};
use chatgate_sandbox::Workspace;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

const STDERR_CAP_BYTES: usize = 4096;
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CliAgentConfig {
    pub name: &'static str,
    pub invocation_timeout: Duration,
    pub models: Vec<ModelInfo>,
}

/// The driver's completion envelope (§4.4): a single JSON object on stdout
/// for `execute`, or one per line for `stream`. `done` marks the terminal
/// record; absent token counts fall back to the approximator (§12.3).
#[derive(Debug, Deserialize, Default)]
struct Envelope {
    #[serde(default)]
    content: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("error") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

pub struct CliAgentDriver {
    config: CliAgentConfig,
    binary: PathBuf,
}

impl CliAgentDriver {
    pub fn new(config: CliAgentConfig, binary: impl Into<PathBuf>) -> Self {
        Self {
            config,
            binary: binary.into(),
        }
    }

    fn binary_str(&self) -> String {
        self.binary.to_string_lossy().to_string()
    }

    fn request_payload(req: &AgentRequest) -> serde_json::Value {
        json!({
            "model": req.model,
            "system_prompt": req.system_prompt,
            "messages": req.messages.iter().map(|m| json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "top_p": req.top_p,
            "metadata": req.metadata,
        })
    }

    fn truncate_stderr(stderr: &str) -> String {
        if stderr.len() <= STDERR_CAP_BYTES {
            stderr.to_string()
        } else {
            let mut end = STDERR_CAP_BYTES;
            while !stderr.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}… (truncated)", &stderr[..end])
        }
    }
}

#[async_trait]
impl AgentDriver for CliAgentDriver {
    fn name(&self) -> &'static str {
        self.config.name
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> DriverResult<CompletionResult> {
        let workspace = Workspace::new(&format!("chatgate-{}-", self.config.name))
            .map_err(|e| DriverError::AgentFailure(e.to_string()))?;
        let stdin = serde_json::to_string(&Self::request_payload(request))
            .map_err(|e| DriverError::AgentFailure(format!("failed to encode request: {e}")))?;

        let outcome = chatgate_sandbox::spawn_with_timeout(
            &self.binary_str(),
            &["--json".to_string()],
            Some(&stdin),
            Some(workspace.root()),
            self.config.invocation_timeout,
            cancel,
        )
        .await
        .map_err(|e| DriverError::AgentFailure(e.to_string()))?;

        if outcome.cancelled {
            return Err(DriverError::Cancelled);
        }
        if outcome.timed_out {
            return Err(DriverError::Timeout(self.config.invocation_timeout));
        }
        if !outcome.success {
            return Err(DriverError::AgentFailure(Self::truncate_stderr(
                &outcome.stderr,
            )));
        }

        let envelope: Envelope = serde_json::from_str(outcome.stdout.trim())
            .map_err(|e| DriverError::AgentFailure(format!("unparsable agent output: {e}")))?;

        let rendered_prompt =
            tokens::render_prompt(&request.messages, request.system_prompt.as_deref());
        let input_tokens = envelope
            .input_tokens
            .unwrap_or_else(|| tokens::approximate_tokens(&rendered_prompt));
        let output_tokens = envelope
            .output_tokens
            .unwrap_or_else(|| tokens::approximate_tokens(&envelope.content));

        Ok(CompletionResult {
            content: envelope.content,
            input_tokens,
            output_tokens,
            finish_reason: parse_finish_reason(envelope.finish_reason.as_deref()),
        })
    }

    async fn stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
        sink: Sender<StreamChunk>,
    ) -> DriverResult<()> {
        let workspace = Workspace::new(&format!("chatgate-{}-", self.config.name))
            .map_err(|e| DriverError::AgentFailure(e.to_string()))?;
        let stdin_payload = serde_json::to_string(&Self::request_payload(request))
            .map_err(|e| DriverError::AgentFailure(format!("failed to encode request: {e}")))?;

        let mut cmd = Command::new(self.binary_str());
        cmd.arg("--json")
            .arg("--stream")
            .current_dir(workspace.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::AgentFailure(format!("failed to spawn: {e}")))?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(stdin_payload.as_bytes()).await.ok();
            stdin.shutdown().await.ok();
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::AgentFailure("no stdout handle".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let deadline = tokio::time::sleep(self.config.invocation_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(pid) = pid {
                        chatgate_sandbox::terminate(pid).await;
                    }
                    return Err(DriverError::Cancelled);
                }
                _ = &mut deadline => {
                    if let Some(pid) = pid {
                        chatgate_sandbox::terminate(pid).await;
                    }
                    return Err(DriverError::Timeout(self.config.invocation_timeout));
                }
                line = lines.next_line() => {
                    let line = line.map_err(|e| DriverError::AgentFailure(e.to_string()))?;
                    let Some(line) = line else {
                        // stdout closed without a terminal record: treat as
                        // a clean stop, matching a driver that simply exits.
                        let _ = sink.send(StreamChunk::stop()).await;
                        break;
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let envelope: Envelope = match serde_json::from_str(line) {
                        Ok(e) => e,
                        Err(e) => {
                            let _ = sink
                                .send(StreamChunk::error(format!("unparsable stream record: {e}")))
                                .await;
                            break;
                        }
                    };
                    if let Some(message) = envelope.error {
                        let _ = sink.send(StreamChunk::error(message)).await;
                        break;
                    }
                    if envelope.done {
                        let _ = sink.send(StreamChunk::stop()).await;
                        break;
                    }
                    if sink.send(StreamChunk::content(envelope.content)).await.is_err() {
                        // receiver gone (handler dropped the channel): stop
                        // forwarding and reap the process.
                        if let Some(pid) = pid {
                            chatgate_sandbox::terminate(pid).await;
                        }
                        return Err(DriverError::Cancelled);
                    }
                }
            }
        }

        child.wait().await.ok();
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let metadata = match tokio::fs::metadata(&self.binary).await {
            Ok(m) => m,
            Err(_) => return false,
        };
        #[cfg(unix)]
        let executable = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        };
        #[cfg(not(unix))]
        let executable = metadata.is_file();

        if !executable {
            return false;
        }

        chatgate_sandbox::spawn_with_timeout(
            &self.binary_str(),
            &["--version".to_string()],
            None,
            None,
            HEALTH_PROBE_TIMEOUT,
            CancellationToken::new(),
        )
        .await
        .map(|o| o.success && !o.timed_out)
        .unwrap_or(false)
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        self.config.models.clone()
    }
}

//! Analysis client backed by an external command.
//!
//! The configured `analyzer_command` is run once per analysis. It reads the
//! agent's terminal output on stdin and prints one JSON decision on stdout:
//!
//! ```json
//! {"shouldIntervene": true, "confidence": 0.85, "guidance": "Run the tests", "reasoning": "..."}
//! ```
//!
//! The project path and model are passed in `CCM_PROJECT_PATH` and
//! `CCM_MODEL`. Wrapping an LLM CLI this way keeps provider credentials and
//! HTTP out of this process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use ccm_core::{AnalysisClient, AnalysisDecision, AnalysisError, AutopilotConfig};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

/// Environment variable carrying the session's project path.
pub const PROJECT_PATH_ENV: &str = "CCM_PROJECT_PATH";

/// Environment variable carrying the configured model.
pub const MODEL_ENV: &str = "CCM_MODEL";

/// Runs the configured analyzer command for every analysis.
pub struct CommandAnalysisClient {
    config: RwLock<AutopilotConfig>,
}

impl CommandAnalysisClient {
    pub fn new(config: &AutopilotConfig) -> Self {
        Self {
            config: RwLock::new(config.clone()),
        }
    }

    fn command(&self) -> Option<Vec<String>> {
        self.config
            .read()
            .analyzer_command
            .clone()
            .filter(|argv| argv.first().is_some_and(|program| !program.is_empty()))
    }
}

#[async_trait]
impl AnalysisClient for CommandAnalysisClient {
    async fn analyze_claude_output(
        &self,
        terminal_output: &str,
        project_path: &Path,
    ) -> Result<AnalysisDecision, AnalysisError> {
        let argv = self
            .command()
            .ok_or_else(|| AnalysisError::Unavailable("no analyzer command configured".to_string()))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(AnalysisError::Unavailable("empty analyzer command".to_string()));
        };
        let model = self.config.read().model.clone();

        let mut command = Command::new(program);
        command
            .args(args)
            .env(PROJECT_PATH_ENV, project_path)
            .env(MODEL_ENV, model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A deadline drops this future; take the analyzer down with it.
            .kill_on_drop(true);
        if project_path.is_dir() {
            command.current_dir(project_path);
        }

        trace!(program = %program, "Starting analyzer");
        let mut child = command
            .spawn()
            .map_err(|e| AnalysisError::Failed(format!("failed to start {program}: {e}")))?;

        let stdin = child.stdin.take();
        let input = terminal_output.as_bytes();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // The analyzer may exit without reading everything.
                let _ = stdin.write_all(input).await;
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| AnalysisError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AnalysisError::Failed(format!(
                "{program} exited with {}: {stderr}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let decision: AnalysisDecision = serde_json::from_str(stdout.trim())
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
        debug!(
            program = %program,
            should_intervene = decision.should_intervene,
            confidence = decision.confidence,
            "Analyzer answered"
        );
        Ok(decision)
    }

    fn current_provider_name(&self) -> String {
        let config = self.config.read();
        if !config.provider.is_empty() {
            return config.provider.clone();
        }
        config
            .analyzer_command
            .as_ref()
            .and_then(|argv| argv.first())
            .map(|program| {
                Path::new(program)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| program.clone())
            })
            .unwrap_or_else(|| "none".to_string())
    }

    fn is_available(&self) -> bool {
        self.command()
            .and_then(|argv| argv.first().map(|program| is_resolvable(program)))
            .unwrap_or(false)
    }

    fn update_config(&self, config: &AutopilotConfig) {
        *self.config.write() = config.clone();
    }
}

/// Returns true if `program` names an existing file or is found on `PATH`.
fn is_resolvable(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir: PathBuf| dir.join(program))
                .any(|candidate| candidate.is_file())
        })
        .unwrap_or(false)
}

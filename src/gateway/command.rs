//! Parser gateway that shells out to an external program:
//! `<command> <args..> <file_path> <metadata_json>`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{normalize_parser_output, ParseFailure, ParseMetadata, ParseOutcome, ParserGateway};
use crate::config::ParserConfig;
use crate::error::{ChemkgError, Result};

const MAX_REASON_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct CommandParserGateway {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandParserGateway {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ChemkgError::Parser("parser command is empty".to_string()));
        }
        if timeout.is_zero() {
            return Err(ChemkgError::Parser(
                "parser timeout must be greater than 0ms".to_string(),
            ));
        }
        Ok(Self {
            command,
            args,
            timeout,
        })
    }

    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        Self::new(config.command.clone(), config.args.clone(), config.timeout())
    }
}

#[async_trait]
impl ParserGateway for CommandParserGateway {
    async fn parse(&self, file_path: &Path, metadata: &ParseMetadata) -> ParseOutcome {
        let metadata_json = match serde_json::to_string(metadata) {
            Ok(json) => json,
            Err(e) => return ParseOutcome::rejected(format!("cannot encode metadata: {}", e)),
        };

        let mut command = Command::new(&self.command);
        command.kill_on_drop(true);
        command.args(&self.args);
        command.arg(file_path);
        command.arg(metadata_json);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = match spawn_with_text_file_busy_retry(&mut command).await {
            Ok(child) => child,
            Err(e) => {
                return ParseOutcome::Failure(ParseFailure::Unavailable(format!(
                    "failed to spawn '{}': {}",
                    self.command, e
                )))
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ParseOutcome::rejected(format!("parser process failed: {}", e)),
            Err(_) => return ParseOutcome::Failure(ParseFailure::TimedOut(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ParseOutcome::rejected(format!(
                "parser exited with status {}: {}",
                status,
                summarize(&stderr, &stdout)
            ));
        }

        normalize_parser_output(&stdout)
    }
}

/// A freshly written parser script can briefly report ETXTBSY on spawn.
async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
) -> std::io::Result<tokio::process::Child> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Err(e)
                if e.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            result => return result,
        }
    }
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("no output");
    if text.chars().count() > MAX_REASON_CHARS {
        let cut: String = text.chars().take(MAX_REASON_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

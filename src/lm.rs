//! Language-model transport.
//!
//! The generator is a user-configured shell command: the assembled prompt is
//! piped to its stdin and the full response is read from stdout. The exchange
//! is blocking and all-or-nothing; there is no streaming and no retry here.
use anyhow::{anyhow, Context, Result};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::time::Instant;

/// How to reach the language model.
#[derive(Debug, Clone)]
pub struct LmClientConfig {
    /// Shell-style command line, e.g. `llm -m gpt-4o` or `ollama run llama3`.
    pub command: String,
}

/// Send one request through the configured command and return the raw
/// response text.
pub fn chat(config: &LmClientConfig, system_prompt: &str, user_message: &str) -> Result<String> {
    let prompt = format!("{system_prompt}\n\n## Request\n\n{user_message}\n");
    invoke_lm_command(&config.command, &prompt)
}

fn invoke_lm_command(command: &str, prompt: &str) -> Result<String> {
    let args = shell_words::split(command)
        .with_context(|| format!("parse LM command {command:?}"))?;
    if args.is_empty() {
        return Err(anyhow!("LM command is empty"));
    }

    let started = Instant::now();
    let mut child = Command::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn LM command {:?}", args[0]))?;

    if let Some(stdin) = child.stdin.as_mut() {
        // The command may exit without reading stdin; that shows up as a
        // broken pipe here and is reported through its exit status instead.
        if let Err(err) = stdin.write_all(prompt.as_bytes()) {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(err).context("write prompt to LM stdin");
            }
        }
    }

    let output = child
        .wait_with_output()
        .context("wait for LM command to finish")?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        prompt_bytes = prompt.len(),
        response_bytes = output.stdout.len(),
        "lm invoke complete"
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "LM command exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")
}

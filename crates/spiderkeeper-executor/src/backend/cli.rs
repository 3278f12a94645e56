// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Thin wrapper around the runtime CLIs (`docker`, `kubectl`).

use std::process::Stdio;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::traits::{BackendError, LogStream, Result};

/// A CLI binary plus the global arguments every invocation needs
/// (`--host`, `--kubeconfig`, `--namespace`, ...).
#[derive(Debug, Clone)]
pub(crate) struct Cli {
    program: &'static str,
    binary: String,
    global_args: Vec<String>,
}

impl Cli {
    pub(crate) fn new(program: &'static str, binary: impl Into<String>, global_args: Vec<String>) -> Self {
        Self {
            program,
            binary: binary.into(),
            global_args,
        }
    }

    fn command<S: AsRef<str>>(&self, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.global_args);
        cmd.args(args.iter().map(AsRef::as_ref));
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run to completion and return trimmed stdout.
    pub(crate) async fn output<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let mut cmd = self.command(args);
        debug!(program = self.program, args = ?cmd.as_std().get_args().collect::<Vec<_>>(), "Invoking runtime CLI");
        let output = cmd.output().await?;
        self.check(output)
    }

    /// Run to completion with `input` written to stdin.
    pub(crate) async fn output_with_stdin<S: AsRef<str>>(&self, args: &[S], input: &[u8]) -> Result<String> {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
            // Dropping stdin closes the pipe so the CLI sees EOF.
        }
        let output = child.wait_with_output().await?;
        self.check(output)
    }

    /// Spawn and stream stdout and stderr line by line.
    ///
    /// The child is killed when the stream is dropped.
    pub(crate) fn lines<S: AsRef<str>>(&self, args: &[S]) -> Result<LogStream> {
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let program = self.program;
        let stdout = child.stdout.take().ok_or(BackendError::UnexpectedOutput {
            program,
            details: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or(BackendError::UnexpectedOutput {
            program,
            details: "stderr not captured".to_string(),
        })?;

        let stream = async_stream::try_stream! {
            let _child = child;
            let mut merged = futures::stream::select(Box::pin(line_stream(stdout)), Box::pin(line_stream(stderr)));
            while let Some(line) = merged.next().await {
                yield line.map_err(BackendError::from)?;
            }
        };

        Ok(Box::pin(stream))
    }

    fn check(&self, output: std::process::Output) -> Result<String> {
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(BackendError::Command {
                program: self.program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn line_stream<R>(reader: R) -> impl futures::Stream<Item = std::io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), lines)),
            Ok(None) => None,
            Err(e) => Some((Err(e), lines)),
        }
    })
}

/// Treat "already gone" as success for idempotent operations.
pub(crate) fn ignore_not_found(result: Result<String>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

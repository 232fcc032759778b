// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Subprocess execution: a single command on the master node, or a parallel
//! fan-out of one command per segment.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::{process::Command, task::JoinSet};

use crate::{
    cluster::ContentId,
    error::{ExecutorError, ExecutorResult},
};

/// One argv vector per content id.
pub type CommandMap = HashMap<ContentId, Vec<String>>;

/// Command failures keyed by content id. Successful commands have no entry,
/// so callers count failures with `len()`.
pub type ErrorMap = HashMap<ContentId, ExecutorError>;

/// Runs the commands an orchestration verb produces.
///
/// Implementations must not retry: a failed command surfaces exactly once,
/// in the return value. Test doubles additionally record every submitted
/// command in order of submission and allow injecting failures; see the
/// recording executor in `gpbackup-test-utils`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a shell command on the master node, blocking until it exits.
    async fn execute_local(&self, command: &str) -> ExecutorResult<()>;

    /// Run every argv in the map in parallel, one task per segment, and wait
    /// for all of them to terminate. The returned map contains an entry
    /// exactly for the commands that failed.
    async fn execute_cluster(&self, commands: &CommandMap) -> ErrorMap;
}

/// [`Executor`] backed by real subprocesses.
///
/// Each entry of a command map is an independent child process; the engine
/// shares no memory with them and delegates remote transport entirely to the
/// `ssh` argv built by the command builder.
#[derive(Debug, Default)]
pub struct ClusterExecutor;

#[async_trait]
impl Executor for ClusterExecutor {
    async fn execute_local(&self, command: &str) -> ExecutorResult<()> {
        tracing::debug!(command, "running local command");
        run_argv(vec!["bash".into(), "-c".into(), command.into()]).await
    }

    async fn execute_cluster(&self, commands: &CommandMap) -> ErrorMap {
        let mut tasks = JoinSet::new();
        for (&content, argv) in commands {
            let argv = argv.clone();
            tasks.spawn(async move { (content, run_argv(argv).await) });
        }

        let mut failures = ErrorMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (content, result) = joined.expect("fan-out tasks do not panic");
            if let Err(error) = result {
                failures.insert(content, error);
            }
        }
        failures
    }
}

async fn run_argv(argv: Vec<String>) -> ExecutorResult<()> {
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .await
        .map_err(|source| ExecutorError::Spawn {
            command: argv.join(" "),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        tracing::debug!(command = %argv.join(" "), stderr = %stderr.trim(), "command failed");
    }
    match output.status.code() {
        Some(code) => Err(ExecutorError::NonZeroExit { code }),
        None => Err(ExecutorError::Signaled),
    }
}

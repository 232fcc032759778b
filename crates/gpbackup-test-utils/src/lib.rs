// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Test utilities shared between the orchestrator's unit and integration
//! tests.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use gpbackup_orchestrator::{
    cluster::ContentId,
    error::{ExecutorError, ExecutorResult},
    executor::{CommandMap, ErrorMap, Executor},
};

/// Recording [`Executor`] double.
///
/// Counts invocations, records every submitted command in order of
/// submission, and fails the segments (or the local command) a test
/// configured, with the given exit code, on every subsequent call.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    state: Mutex<RecordingState>,
}

#[derive(Debug, Default)]
struct RecordingState {
    num_executions: usize,
    local_commands: Vec<String>,
    cluster_commands: Vec<CommandMap>,
    local_failure: Option<i32>,
    segment_failures: HashMap<ContentId, i32>,
}

impl RecordingExecutor {
    /// Fail every subsequent local command with the given exit code.
    pub fn fail_locally(&self, code: i32) {
        self.lock().local_failure = Some(code);
    }

    /// Fail the given segment with the given exit code in every subsequent
    /// cluster fan-out that targets it.
    pub fn fail_on_segment(&self, content: ContentId, code: i32) {
        self.lock().segment_failures.insert(content, code);
    }

    /// Total number of `execute_local` and `execute_cluster` calls.
    pub fn num_executions(&self) -> usize {
        self.lock().num_executions
    }

    /// Every local command string, in order of submission.
    pub fn local_commands(&self) -> Vec<String> {
        self.lock().local_commands.clone()
    }

    /// Every cluster command map, in order of submission.
    pub fn cluster_commands(&self) -> Vec<CommandMap> {
        self.lock().cluster_commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().expect("recording state is never poisoned")
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute_local(&self, command: &str) -> ExecutorResult<()> {
        let mut state = self.lock();
        state.num_executions += 1;
        state.local_commands.push(command.to_string());
        match state.local_failure {
            Some(code) => Err(ExecutorError::NonZeroExit { code }),
            None => Ok(()),
        }
    }

    async fn execute_cluster(&self, commands: &CommandMap) -> ErrorMap {
        let mut state = self.lock();
        state.num_executions += 1;
        state.cluster_commands.push(commands.clone());
        state
            .segment_failures
            .iter()
            .filter(|(content, _)| commands.contains_key(content))
            .map(|(&content, &code)| (content, ExecutorError::NonZeroExit { code }))
            .collect()
    }
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

use std::io;

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{file}': {message}")]
    InvalidSettings { file: String, message: String },

    #[error("Invalid cluster topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid backup timestamp '{0}': expected 14 digits (YYYYMMDDHHMMSS)")]
    InvalidTimestamp(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Failure of a single spawned command, local or remote.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("exit status {code}")]
    NonZeroExit { code: i32 },

    #[error("terminated by signal")]
    Signaled,
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Fatal outcome of an orchestration verb.
///
/// The user-visible message carries only the failing-segment count; the
/// per-segment detail is emitted to the log before this error is built.
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("{prefix} on {count} {}. See log for complete list.", segments(.count))]
    SegmentFailures { prefix: String, count: usize },

    #[error("Unable to create metadata file pipes: {0}")]
    MetadataPipeCreation(ExecutorError),

    #[error("Unable to delete {path} pipe")]
    MetadataPipeDeletion { path: String },

    #[error("Unable to read from {path} pipe: {error}")]
    MetadataPipeRead { path: String, error: ExecutorError },
}

fn segments(count: &usize) -> &'static str {
    if *count == 1 {
        "segment"
    } else {
        "segments"
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    SettingsError(#[from] SettingsError),

    #[error(transparent)]
    ClusterError(#[from] ClusterError),

    #[error("Operation canceled: termination signal received")]
    Terminated,
}

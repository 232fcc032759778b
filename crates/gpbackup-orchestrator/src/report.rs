// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Translates per-segment failure maps into a single fatal diagnostic.

use crate::{cluster::ContentId, error::ClusterError, executor::ErrorMap};

/// Log every failing segment and build the count-based fatal error for the
/// verb that observed the failures. The message never embeds per-segment
/// detail; that goes to the log only.
pub(crate) fn fatal_segment_failures(prefix: &str, failures: &ErrorMap) -> ClusterError {
    let mut contents: Vec<ContentId> = failures.keys().copied().collect();
    contents.sort_unstable();
    for content in contents {
        tracing::error!(
            content_id = content,
            error = %failures[&content],
            "command failed on segment"
        );
    }
    ClusterError::SegmentFailures {
        prefix: prefix.to_string(),
        count: failures.len(),
    }
}

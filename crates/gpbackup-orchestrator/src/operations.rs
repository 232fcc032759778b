// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! High-level orchestration verbs.
//!
//! Every verb is the same composition: build a command map, hand it to the
//! executor, and apply the verb's own partial-failure policy to the result.
//! A verb does not return to its caller while any spawned command is still
//! running, and no verb ever retries.

use std::collections::BTreeMap;

use futures::future::join_all;

use crate::{
    cluster::{Cluster, ContentId},
    error::{ClusterError, ClusterResult},
    executor::{CommandMap, ErrorMap},
    report,
};

/// Output suffix appended to a pipe path by the streaming commands:
/// `.gz` for compressed output, `.out` for a plugin sink, `.gz.out` for
/// both, nothing for neither.
fn pipe_output_suffix(compress: bool, plugin: bool) -> &'static str {
    match (compress, plugin) {
        (true, true) => ".gz.out",
        (true, false) => ".gz",
        (false, true) => ".out",
        (false, false) => "",
    }
}

fn pipe_read_command(path: &str, compress: bool, plugin: bool) -> String {
    let filter = if compress { " | gzip -c" } else { "" };
    format!(
        "cat {path}{filter} > {path}{}",
        pipe_output_suffix(compress, plugin)
    )
}

impl Cluster {
    /// Create the per-segment working directories on every host, master
    /// included.
    pub async fn create_backup_directories(&self) -> ClusterResult<()> {
        let commands =
            self.cluster_command_map(|content| format!("mkdir -p {}", self.backup_dir_for(content)));
        self.dispatch(commands, "Unable to create directories").await
    }

    /// Check that the working directories of an existing backup set are
    /// present and reachable on every host.
    pub async fn verify_backup_directories_exist(&self) -> ClusterResult<()> {
        let commands =
            self.cluster_command_map(|content| format!("test -d {}", self.backup_dir_for(content)));
        self.dispatch(commands, "Directories missing or inaccessible")
            .await
    }

    /// Check that every data segment holds `expected` backup files.
    ///
    /// The grep matches the count anywhere in the `wc -l` output, so this is
    /// a lower-bound check: a segment holding 130 files passes a check for
    /// 13.
    pub async fn verify_backup_file_count(&self, expected: u64) -> ClusterResult<()> {
        let commands = self.segment_command_map(|content| {
            format!(
                "find {} -type f | wc -l | grep {expected}",
                self.backup_dir_for(content)
            )
        });
        self.dispatch(commands, "Backup files missing").await
    }

    /// Create the three master-local metadata pipes, one `mkfifo` per path,
    /// in sequence. The first failure aborts.
    pub async fn create_all_metadata_pipes(&self) -> ClusterResult<()> {
        for path in &self.metadata_pipe_paths {
            self.executor
                .execute_local(&format!("mkfifo {path}"))
                .await
                .map_err(ClusterError::MetadataPipeCreation)?;
        }
        Ok(())
    }

    /// Remove the three master-local metadata pipes, one `rm -f` per path,
    /// in sequence. The first failure aborts.
    pub async fn delete_all_metadata_pipes(&self) -> ClusterResult<()> {
        for path in &self.metadata_pipe_paths {
            self.executor
                .execute_local(&format!("rm -f {path}"))
                .await
                .map_err(|_| ClusterError::MetadataPipeDeletion { path: path.clone() })?;
        }
        Ok(())
    }

    /// Create the per-table data pipes on every data segment. Each segment
    /// receives a single `mkfifo` listing all of its pipes. An empty oid
    /// list is a no-op that spawns nothing.
    pub async fn create_all_table_pipes(&self, oids: &[u32]) -> ClusterResult<()> {
        if oids.is_empty() {
            return Ok(());
        }
        let commands = self.segment_command_map(|content| {
            let paths: Vec<String> = oids
                .iter()
                .map(|&oid| self.table_backup_path(content, oid))
                .collect();
            format!("mkfifo {}", paths.join(" "))
        });
        self.dispatch(commands, "Unable to create data file pipes")
            .await
    }

    /// Remove every registered per-table data pipe. Each segment receives a
    /// single `rm -f` listing all of its pipes across all oids.
    pub async fn delete_all_table_pipes(&self) -> ClusterResult<()> {
        let mut paths_by_content: BTreeMap<ContentId, Vec<&str>> = BTreeMap::new();
        for segment_paths in self.table_pipe_paths.values() {
            for (&content, path) in segment_paths {
                paths_by_content.entry(content).or_default().push(path);
            }
        }
        if paths_by_content.is_empty() {
            return Ok(());
        }

        let commands: CommandMap = paths_by_content
            .into_iter()
            .map(|(content, paths)| {
                (
                    content,
                    self.argv_for(content, format!("rm -f {}", paths.join(" "))),
                )
            })
            .collect();
        self.dispatch(commands, "Unable to delete pipes").await
    }

    /// Drain the three metadata pipes into their output sinks, all three in
    /// parallel on the master. Any failure aborts, naming the pipe.
    pub async fn read_from_all_metadata_pipes(
        &self,
        compress: bool,
        plugin: bool,
    ) -> ClusterResult<()> {
        let reads = self.metadata_pipe_paths.iter().map(|path| {
            let command = format!("bash -c \"{}\"", pipe_read_command(path, compress, plugin));
            async move { (path, self.executor.execute_local(&command).await) }
        });
        for (path, result) in join_all(reads).await {
            if let Err(error) = result {
                return Err(ClusterError::MetadataPipeRead {
                    path: path.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Drain every per-table data pipe into its output sink, one cluster
    /// fan-out per table, concurrently across segments within each table.
    pub async fn read_from_all_table_pipes(&self, compress: bool, plugin: bool) -> ClusterResult<()> {
        let template = pipe_read_command("<TABLE>", compress, plugin);
        let (oid, failures) = self.execute_for_each_table_file(&template).await;
        if failures.is_empty() {
            return Ok(());
        }
        tracing::error!(oid, "failed streaming table data");
        Err(report::fatal_segment_failures(
            "Unable to read data from pipes",
            &failures,
        ))
    }

    /// Substitute each segment's pipe path for the literal `<TABLE>` token
    /// in `template` and dispatch one cluster fan-out per registered table.
    ///
    /// Every table is dispatched even after a failure; the return value
    /// names the first table whose fan-out failed along with its error map,
    /// or `(0, empty)` when everything succeeded.
    pub async fn execute_for_each_table_file(&self, template: &str) -> (u32, ErrorMap) {
        let mut first_failure: Option<(u32, ErrorMap)> = None;
        for (&oid, segment_paths) in &self.table_pipe_paths {
            let commands: CommandMap = segment_paths
                .iter()
                .map(|(&content, path)| {
                    (content, self.argv_for(content, template.replace("<TABLE>", path)))
                })
                .collect();
            let failures = self.executor.execute_cluster(&commands).await;
            if !failures.is_empty() && first_failure.is_none() {
                first_failure = Some((oid, failures));
            }
        }
        first_failure.unwrap_or((0, ErrorMap::new()))
    }

    async fn dispatch(&self, commands: CommandMap, failure_prefix: &str) -> ClusterResult<()> {
        let failures = self.executor.execute_cluster(&commands).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(report::fatal_segment_failures(failure_prefix, &failures))
        }
    }
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Cluster topology model, per-segment path derivation, and per-segment
//! command construction.
//!
//! The path formats produced here are parsed by external tooling (the
//! database's COPY command and the restore-path reader); they must not
//! change shape.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::executor::{ClusterExecutor, CommandMap, Executor};

/// Tag identifying a segment within the cluster.
pub type ContentId = i32;

/// The content id of the master node.
pub const MASTER_CONTENT_ID: ContentId = -1;

/// Immutable per-segment configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub content_id: ContentId,
    pub hostname: String,
    pub data_dir: String,
}

/// The segmented cluster as seen by one backup or restore invocation.
///
/// Constructed once per invocation and alive for the duration of the
/// process. The pipe-path maps start empty and are populated before the
/// first pipe-creation verb; they are read-only while fan-outs run, so the
/// concurrent tasks never share mutable state.
pub struct Cluster {
    pub(crate) segments: Vec<SegmentConfig>,
    by_content: HashMap<ContentId, usize>,
    user_dir: Option<String>,
    timestamp: String,
    user: String,
    local_hostname: String,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) metadata_pipe_paths: Vec<String>,
    pub(crate) table_pipe_paths: BTreeMap<u32, BTreeMap<ContentId, String>>,
}

impl Cluster {
    /// Create a cluster model over the given segments.
    ///
    /// When `user_dir` is set, per-segment output lives under
    /// `<user_dir>/gpseg<content_id>/` instead of each segment's own data
    /// directory. `timestamp` is the 14-digit key of this invocation and is
    /// treated opaquely apart from its 8-character date prefix.
    pub fn new(segments: Vec<SegmentConfig>, user_dir: Option<&str>, timestamp: &str) -> Self {
        let by_content = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| (segment.content_id, index))
            .collect();
        Self {
            segments,
            by_content,
            user_dir: user_dir.map(str::to_string),
            timestamp: timestamp.to_string(),
            user: whoami::username(),
            local_hostname: hostname::get()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            executor: Arc::new(ClusterExecutor),
            metadata_pipe_paths: Vec::new(),
            table_pipe_paths: BTreeMap::new(),
        }
    }

    /// Replace the subprocess executor, e.g. with a recording test double.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Override the ambient OS identity used for SSH targets and for
    /// local-vs-remote dispatch of the master's command.
    #[must_use]
    pub fn with_identity(mut self, user: &str, local_hostname: &str) -> Self {
        self.user = user.to_string();
        self.local_hostname = local_hostname.to_string();
        self
    }

    /// All content ids in the model, in insertion order.
    pub fn content_list(&self) -> Vec<ContentId> {
        self.segments.iter().map(|s| s.content_id).collect()
    }

    /// The hostname of the given segment. Callers must only pass ids from
    /// [`content_list`][Self::content_list].
    pub fn host_for(&self, content: ContentId) -> &str {
        &self.segment(content).hostname
    }

    /// The working directory of the given segment for this invocation:
    /// `<root>/backups/<date>/<timestamp>`.
    pub fn backup_dir_for(&self, content: ContentId) -> String {
        format!(
            "{}/backups/{}/{}",
            self.root_for(content),
            self.date_prefix(),
            self.timestamp
        )
    }

    /// The backup data file of one table on one segment.
    pub fn table_backup_path(&self, content: ContentId, oid: u32) -> String {
        format!(
            "{}/gpbackup_{content}_{}_{oid}",
            self.backup_dir_for(content),
            self.timestamp
        )
    }

    /// The backup data file of one table, with the placeholders the database
    /// engine substitutes per segment at COPY time.
    pub fn copy_command_path(&self, oid: u32) -> String {
        let root = match &self.user_dir {
            Some(dir) => format!("{dir}/gpseg<SEGID>"),
            None => "<SEG_DATA_DIR>".to_string(),
        };
        format!(
            "{root}/backups/{}/{ts}/gpbackup_<SEGID>_{ts}_{oid}",
            self.date_prefix(),
            ts = self.timestamp
        )
    }

    /// The master-local table map file of this backup set.
    pub fn table_map_path(&self) -> String {
        format!(
            "{}/gpbackup_{}_table_map",
            self.backup_dir_for(MASTER_CONTENT_ID),
            self.timestamp
        )
    }

    /// The master-local report file of this backup set.
    pub fn report_path(&self) -> String {
        format!(
            "{}/gpbackup_{}_report",
            self.backup_dir_for(MASTER_CONTENT_ID),
            self.timestamp
        )
    }

    /// The 14-digit key of this invocation.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The three master-local metadata pipes (global, pre-data, post-data).
    pub fn metadata_pipe_paths(&self) -> &[String] {
        &self.metadata_pipe_paths
    }

    /// Per-table pipe paths: oid to content id to that segment's pipe.
    pub fn table_pipe_paths(&self) -> &BTreeMap<u32, BTreeMap<ContentId, String>> {
        &self.table_pipe_paths
    }

    pub fn set_metadata_pipe_paths(&mut self, paths: Vec<String>) {
        self.metadata_pipe_paths = paths;
    }

    pub fn set_table_pipe_paths(&mut self, paths: BTreeMap<u32, BTreeMap<ContentId, String>>) {
        self.table_pipe_paths = paths;
    }

    /// Derive the three metadata pipe paths under the master's working
    /// directory for this invocation.
    pub fn populate_metadata_pipe_paths(&mut self) {
        let dir = self.backup_dir_for(MASTER_CONTENT_ID);
        self.metadata_pipe_paths = ["global", "predata", "postdata"]
            .iter()
            .map(|section| format!("{dir}/gpbackup_{}_{section}", self.timestamp))
            .collect();
    }

    /// Derive the per-segment pipe path of every given table. Only data
    /// segments appear in the map; the master hosts no table data.
    pub fn populate_table_pipe_paths(&mut self, oids: &[u32]) {
        let contents: Vec<ContentId> = self
            .segments
            .iter()
            .map(|segment| segment.content_id)
            .filter(|&content| content != MASTER_CONTENT_ID)
            .collect();
        for &oid in oids {
            let paths = contents
                .iter()
                .map(|&content| (content, self.table_backup_path(content, oid)))
                .collect();
            self.table_pipe_paths.insert(oid, paths);
        }
    }

    /// Build the `ssh` argv that runs `command` on `host` as the current
    /// user. Host-key prompts are suppressed; operators rely on their
    /// existing key-based trust.
    pub fn ssh_command(&self, host: &str, command: &str) -> Vec<String> {
        vec![
            "ssh".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            format!("{}@{host}", self.user),
            command.to_string(),
        ]
    }

    /// Evaluate `template` for every segment and produce one argv per
    /// content id. The master (content id -1) is skipped unless
    /// `include_master` is set; it runs through `bash -c` when it is the
    /// local host, so the same template works for single-node and
    /// multi-node clusters alike.
    pub fn command_map<F>(&self, include_master: bool, template: F) -> CommandMap
    where
        F: Fn(ContentId) -> String,
    {
        let mut commands = CommandMap::with_capacity(self.segments.len());
        for segment in &self.segments {
            if segment.content_id == MASTER_CONTENT_ID && !include_master {
                continue;
            }
            commands.insert(
                segment.content_id,
                self.argv_for(segment.content_id, template(segment.content_id)),
            );
        }
        commands
    }

    /// [`command_map`][Self::command_map] over the whole cluster, master
    /// included.
    pub fn cluster_command_map<F>(&self, template: F) -> CommandMap
    where
        F: Fn(ContentId) -> String,
    {
        self.command_map(true, template)
    }

    /// [`command_map`][Self::command_map] over the data segments only.
    pub fn segment_command_map<F>(&self, template: F) -> CommandMap
    where
        F: Fn(ContentId) -> String,
    {
        self.command_map(false, template)
    }

    pub(crate) fn argv_for(&self, content: ContentId, command: String) -> Vec<String> {
        let host = self.host_for(content);
        if content == MASTER_CONTENT_ID && (host == "localhost" || host == self.local_hostname) {
            vec!["bash".to_string(), "-c".to_string(), command]
        } else {
            self.ssh_command(host, &command)
        }
    }

    fn segment(&self, content: ContentId) -> &SegmentConfig {
        let index = self.by_content[&content];
        &self.segments[index]
    }

    fn root_for(&self, content: ContentId) -> String {
        match &self.user_dir {
            Some(dir) => format!("{dir}/gpseg{content}"),
            None => self.segment(content).data_dir.clone(),
        }
    }

    fn date_prefix(&self) -> &str {
        &self.timestamp[..8]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn master() -> SegmentConfig {
        SegmentConfig {
            content_id: -1,
            hostname: "localhost".to_string(),
            data_dir: "/data/gpseg-1".to_string(),
        }
    }

    pub(crate) fn local_segment(content_id: ContentId) -> SegmentConfig {
        SegmentConfig {
            content_id,
            hostname: "localhost".to_string(),
            data_dir: format!("/data/gpseg{content_id}"),
        }
    }

    pub(crate) fn remote_segment(content_id: ContentId, hostname: &str) -> SegmentConfig {
        SegmentConfig {
            content_id,
            hostname: hostname.to_string(),
            data_dir: format!("/data/gpseg{content_id}"),
        }
    }

    pub(crate) fn test_cluster(segments: Vec<SegmentConfig>, user_dir: Option<&str>) -> Cluster {
        Cluster::new(segments, user_dir, "20170101010101").with_identity("testUser", "testHost")
    }

    fn ssh_argv(host: &str, command: &str) -> Vec<String> {
        vec![
            "ssh".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            format!("testUser@{host}"),
            command.to_string(),
        ]
    }

    fn bash_argv(command: &str) -> Vec<String> {
        vec!["bash".to_string(), "-c".to_string(), command.to_string()]
    }

    #[test]
    fn constructs_an_ssh_command() {
        let cluster = test_cluster(vec![master()], None);
        assert_eq!(
            cluster.ssh_command("some-host", "ls"),
            ssh_argv("some-host", "ls")
        );
    }

    #[test]
    fn command_map_dispatches_a_local_master_through_bash() {
        let cluster = test_cluster(vec![master()], None);
        let commands = cluster.command_map(true, |_| "ls".to_string());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[&-1], bash_argv("ls"));
    }

    #[test]
    fn command_map_skips_the_master_when_excluded() {
        let cluster = test_cluster(vec![master()], None);
        let commands = cluster.command_map(false, |_| "ls".to_string());
        assert!(commands.is_empty());
    }

    #[test]
    fn command_map_dispatches_a_segment_through_ssh() {
        let cluster = test_cluster(vec![remote_segment(1, "remotehost1")], None);
        for include_master in [true, false] {
            let commands = cluster.command_map(include_master, |_| "ls".to_string());
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[&1], ssh_argv("remotehost1", "ls"));
        }
    }

    #[test]
    fn command_map_treats_a_colocated_segment_as_remote() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        let commands = cluster.command_map(true, |_| "ls".to_string());
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[&-1], bash_argv("ls"));
        assert_eq!(commands[&0], ssh_argv("localhost", "ls"));
    }

    #[test]
    fn command_map_evaluates_the_template_per_segment() {
        let cluster = test_cluster(
            vec![
                local_segment(0),
                remote_segment(1, "remotehost1"),
                remote_segment(2, "remotehost2"),
            ],
            None,
        );
        let commands =
            cluster.command_map(false, |content| {
                format!("mkdir -p {}", cluster.backup_dir_for(content))
            });
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[&0],
            ssh_argv(
                "localhost",
                "mkdir -p /data/gpseg0/backups/20170101/20170101010101"
            )
        );
        assert_eq!(
            commands[&1],
            ssh_argv(
                "remotehost1",
                "mkdir -p /data/gpseg1/backups/20170101/20170101010101"
            )
        );
        assert_eq!(
            commands[&2],
            ssh_argv(
                "remotehost2",
                "mkdir -p /data/gpseg2/backups/20170101/20170101010101"
            )
        );
    }

    #[test]
    fn cluster_command_map_includes_the_master() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        let commands = cluster.cluster_command_map(|_| "ls".to_string());
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[&-1], bash_argv("ls"));
        assert_eq!(commands[&0], ssh_argv("localhost", "ls"));
    }

    #[test]
    fn segment_command_map_excludes_the_master() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        let commands = cluster.segment_command_map(|_| "ls".to_string());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[&0], ssh_argv("localhost", "ls"));
    }

    #[test]
    fn accessors_cover_a_single_host_cluster() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        assert_eq!(cluster.content_list(), vec![-1, 0]);
        assert_eq!(
            cluster.backup_dir_for(-1),
            "/data/gpseg-1/backups/20170101/20170101010101"
        );
        assert_eq!(cluster.host_for(-1), "localhost");
        assert_eq!(
            cluster.backup_dir_for(0),
            "/data/gpseg0/backups/20170101/20170101010101"
        );
        assert_eq!(cluster.host_for(0), "localhost");
    }

    #[test]
    fn accessors_cover_a_multi_host_cluster() {
        let cluster = test_cluster(
            vec![master(), local_segment(0), remote_segment(1, "remotehost")],
            None,
        );
        assert_eq!(cluster.content_list(), vec![-1, 0, 1]);
        assert_eq!(
            cluster.backup_dir_for(1),
            "/data/gpseg1/backups/20170101/20170101010101"
        );
        assert_eq!(cluster.host_for(1), "remotehost");
    }

    #[test]
    fn backup_dir_honors_the_user_override_root() {
        let cluster = test_cluster(vec![master()], Some("/foo/bar"));
        assert_eq!(
            cluster.backup_dir_for(-1),
            "/foo/bar/gpseg-1/backups/20170101/20170101010101"
        );
    }

    #[test]
    fn backup_dir_embeds_the_date_prefix_of_the_timestamp() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        for content in cluster.content_list() {
            assert!(cluster
                .backup_dir_for(content)
                .ends_with("/backups/20170101/20170101010101"));
        }
    }

    #[test]
    fn copy_command_path_uses_engine_placeholders() {
        let cluster = test_cluster(vec![master()], None);
        assert_eq!(
            cluster.copy_command_path(1234),
            "<SEG_DATA_DIR>/backups/20170101/20170101010101/gpbackup_<SEGID>_20170101010101_1234"
        );
    }

    #[test]
    fn copy_command_path_honors_the_user_override_root() {
        let cluster = test_cluster(vec![master()], Some("/foo/bar"));
        assert_eq!(
            cluster.copy_command_path(1234),
            "/foo/bar/gpseg<SEGID>/backups/20170101/20170101010101/gpbackup_<SEGID>_20170101010101_1234"
        );
    }

    #[test]
    fn table_map_path_lives_in_the_master_directory() {
        let cluster = test_cluster(vec![master()], None);
        assert_eq!(
            cluster.table_map_path(),
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_table_map"
        );

        let cluster = test_cluster(vec![master()], Some("/foo/bar"));
        assert_eq!(
            cluster.table_map_path(),
            "/foo/bar/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_table_map"
        );
    }

    #[test]
    fn report_path_lives_in_the_master_directory() {
        let cluster = test_cluster(vec![master()], None);
        assert_eq!(
            cluster.report_path(),
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_report"
        );

        let cluster = test_cluster(vec![master()], Some("/foo/bar"));
        assert_eq!(
            cluster.report_path(),
            "/foo/bar/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_report"
        );
    }

    #[test]
    fn table_backup_path_embeds_content_id_timestamp_and_oid() {
        let cluster = test_cluster(vec![master()], None);
        assert_eq!(
            cluster.table_backup_path(-1, 1234),
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_-1_20170101010101_1234"
        );

        let cluster = test_cluster(vec![master()], Some("/foo/bar"));
        assert_eq!(
            cluster.table_backup_path(-1, 1234),
            "/foo/bar/gpseg-1/backups/20170101/20170101010101/gpbackup_-1_20170101010101_1234"
        );
    }

    #[test]
    fn table_backup_path_matches_the_working_directory() {
        let cluster = test_cluster(vec![master(), local_segment(0)], None);
        for content in cluster.content_list() {
            assert_eq!(
                cluster.table_backup_path(content, 42),
                format!(
                    "{}/gpbackup_{content}_20170101010101_42",
                    cluster.backup_dir_for(content)
                )
            );
        }
    }

    #[test]
    fn populating_table_pipe_paths_excludes_the_master() {
        let mut cluster = test_cluster(
            vec![master(), local_segment(0), remote_segment(1, "remotehost1")],
            None,
        );
        cluster.populate_table_pipe_paths(&[1234, 2345]);

        assert_eq!(cluster.table_pipe_paths().len(), 2);
        let paths = &cluster.table_pipe_paths()[&1234];
        assert_eq!(paths.len(), 2);
        assert_eq!(
            paths[&0],
            "/data/gpseg0/backups/20170101/20170101010101/gpbackup_0_20170101010101_1234"
        );
        assert_eq!(
            paths[&1],
            "/data/gpseg1/backups/20170101/20170101010101/gpbackup_1_20170101010101_1234"
        );
    }

    #[test]
    fn populating_metadata_pipe_paths_derives_three_master_local_pipes() {
        let mut cluster = test_cluster(vec![master()], None);
        cluster.populate_metadata_pipe_paths();

        let paths = cluster.metadata_pipe_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(
            paths[0],
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_global"
        );
        assert_eq!(
            paths[1],
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_predata"
        );
        assert_eq!(
            paths[2],
            "/data/gpseg-1/backups/20170101/20170101010101/gpbackup_20170101010101_postdata"
        );
    }
}

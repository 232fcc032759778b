// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Driver context for one backup or restore invocation.
//!
//! Collects the state the verb sequences need into one value that is
//! threaded explicitly through the call graph: the cluster model, the
//! streaming flags, the signal-handler-to-main termination flag, and the
//! barrier that makes pipe teardown run exactly once.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Mutex;

use crate::{
    cluster::Cluster,
    error::{ClusterResult, CoordinatorError, CoordinatorResult},
};

/// Runs teardown exactly once, performed by whichever of normal teardown or
/// the signal handler arrives first; the later arrival waits for the first
/// to finish and becomes a no-op.
#[derive(Debug, Default)]
pub struct CleanupBarrier {
    done: Mutex<bool>,
}

impl CleanupBarrier {
    /// Run `cleanup` unless an earlier arrival already did, and return its
    /// output (`None` when this call was the no-op loser).
    pub async fn run_once<F, Fut, T>(&self, cleanup: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut done = self.done.lock().await;
        if *done {
            return None;
        }
        let output = cleanup().await;
        *done = true;
        Some(output)
    }
}

pub struct Coordinator {
    cluster: Arc<Cluster>,
    compress: bool,
    plugin: bool,
    terminated: Arc<AtomicBool>,
    cleanup: Arc<CleanupBarrier>,
}

impl Coordinator {
    pub fn new(cluster: Cluster, compress: bool, plugin: bool) -> Self {
        Self {
            cluster: Arc::new(cluster),
            compress,
            plugin,
            terminated: Arc::new(AtomicBool::new(false)),
            cleanup: Arc::new(CleanupBarrier::default()),
        }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Whether a termination request arrived. Verbs observe this between
    /// invocations, never mid-fan-out: a fan-out that already started runs
    /// to completion.
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn request_termination(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Install a Ctrl-C handler that requests termination and tears the
    /// pipes down through the cleanup barrier.
    pub fn spawn_signal_handler(&self) -> tokio::task::JoinHandle<()> {
        let cluster = self.cluster.clone();
        let cleanup = self.cleanup.clone();
        let terminated = self.terminated.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("received termination signal, shutting down...");
            terminated.store(true, Ordering::SeqCst);
            if let Some(Err(error)) = cleanup.run_once(|| delete_pipes(&cluster)).await {
                tracing::error!(%error, "pipe teardown failed after termination");
            }
        })
    }

    /// Run the backup verb sequence: create the working directories and the
    /// pipes, drain the pipes, verify the per-segment file count, and tear
    /// the pipes down.
    pub async fn run_backup(&self, oids: &[u32]) -> CoordinatorResult<()> {
        self.ensure_running()?;
        self.cluster.create_backup_directories().await?;
        self.ensure_running()?;
        self.cluster.create_all_metadata_pipes().await?;
        self.ensure_running()?;
        self.cluster.create_all_table_pipes(oids).await?;
        self.ensure_running()?;
        self.cluster
            .read_from_all_metadata_pipes(self.compress, self.plugin)
            .await?;
        self.ensure_running()?;
        self.cluster
            .read_from_all_table_pipes(self.compress, self.plugin)
            .await?;
        self.ensure_running()?;
        self.cluster
            .verify_backup_file_count(oids.len() as u64)
            .await?;
        self.teardown().await
    }

    /// Check that an existing backup set is restorable: the working
    /// directories are reachable and every data segment holds the expected
    /// backup files.
    pub async fn run_restore(&self, oids: &[u32]) -> CoordinatorResult<()> {
        self.ensure_running()?;
        self.cluster.verify_backup_directories_exist().await?;
        self.ensure_running()?;
        self.cluster
            .verify_backup_file_count(oids.len() as u64)
            .await?;
        Ok(())
    }

    /// Tear the pipes down through the barrier; a no-op when the signal
    /// handler already did.
    pub async fn teardown(&self) -> CoordinatorResult<()> {
        match self.cleanup.run_once(|| delete_pipes(&self.cluster)).await {
            Some(result) => Ok(result?),
            None => Ok(()),
        }
    }

    fn ensure_running(&self) -> CoordinatorResult<()> {
        if self.terminated() {
            Err(CoordinatorError::Terminated)
        } else {
            Ok(())
        }
    }
}

/// Remove the data pipes and the metadata pipes, attempting both even when
/// the first removal fails.
async fn delete_pipes(cluster: &Cluster) -> ClusterResult<()> {
    let tables = cluster.delete_all_table_pipes().await;
    let metadata = cluster.delete_all_metadata_pipes().await;
    tables.and(metadata)
}

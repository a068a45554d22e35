//! Batch processing with label-based partitioning for the async strategy
//!
//! This module provides the `BatchProcessor`, which splits a batch of script
//! operations into independent groups and applies the groups concurrently.
//!
//! # Design
//!
//! Two operations depend on each other when they share an account label, a
//! customer label or a registration email. Dependence is transitive: a
//! transfer A→B joins everything touching A with everything touching B. The
//! processor computes these connected groups with a union-find over operation
//! indices; operations inside a group keep their file order and run
//! sequentially, while different groups run on separate blocking threads.
//!
//! ```text
//! batch ──partition──► [group 1] ──spawn_blocking──► session.apply_logged …
//!                      [group 2] ──spawn_blocking──► session.apply_logged …
//! ```
//!
//! Because no two groups touch the same label, the final balances equal
//! those of a sequential run of the same script.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::core::traits::LedgerStore;
use crate::session::LedgerSession;
use crate::strategy::RunStats;
use crate::types::{Operation, OperationKey};

/// Disjoint-set forest over operation indices
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            // path halving
            let grandparent = self.parent[self.parent[node]];
            self.parent[node] = grandparent;
            node = grandparent;
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Batch processor with label-based partitioning
///
/// Cloneable; clones share the same session.
pub struct BatchProcessor<S> {
    session: Arc<LedgerSession<S>>,
    max_concurrent: usize,
}

impl<S> Clone for BatchProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl<S: LedgerStore + 'static> BatchProcessor<S> {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `session` - Session shared by every group
    /// * `max_concurrent` - Upper bound on groups applied at the same time
    pub fn new(session: Arc<LedgerSession<S>>, max_concurrent: usize) -> Self {
        Self {
            session,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn session(&self) -> &Arc<LedgerSession<S>> {
        &self.session
    }

    /// Partition a batch into groups of dependent operations
    ///
    /// # Guarantees
    ///
    /// - Each operation appears in exactly one group
    /// - Operations sharing a key (directly or through other operations) are in the same group
    /// - Operations keep their original order within a group
    /// - Groups are ordered by their first operation
    pub fn partition(batch: Vec<Operation>) -> Vec<Vec<Operation>> {
        let mut sets = UnionFind::new(batch.len());
        let mut first_seen: HashMap<OperationKey, usize> = HashMap::new();

        for (index, operation) in batch.iter().enumerate() {
            for key in operation.keys() {
                match first_seen.get(&key) {
                    Some(&earlier) => sets.union(earlier, index),
                    None => {
                        first_seen.insert(key, index);
                    }
                }
            }
        }

        let mut group_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<Operation>> = Vec::new();

        for (index, operation) in batch.into_iter().enumerate() {
            let root = sets.find(index);
            let group = *group_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(operation);
        }

        groups
    }

    /// Apply one group sequentially, in order
    pub fn process_group(session: &LedgerSession<S>, group: &[Operation]) -> RunStats {
        let mut stats = RunStats::default();
        for operation in group {
            stats.record(session.apply_logged(operation));
        }
        stats
    }

    /// Partition a batch and apply its groups concurrently
    ///
    /// Waits for every group before returning, so batches never overlap.
    pub async fn process_batch(&self, batch: Vec<Operation>) -> RunStats {
        let groups = Self::partition(batch);
        tracing::debug!(groups = groups.len(), "processing batch");

        let mut results = stream::iter(groups)
            .map(|group| {
                let session = Arc::clone(&self.session);
                tokio::task::spawn_blocking(move || Self::process_group(&session, &group))
            })
            .buffer_unordered(self.max_concurrent);

        let mut stats = RunStats::default();
        while let Some(result) = results.next().await {
            match result {
                Ok(group_stats) => stats += group_stats,
                Err(e) => tracing::error!(error = %e, "group task failed"),
            }
        }

        stats
    }
}

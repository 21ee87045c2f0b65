use crate::core::{IdentityError, Result};
use crate::table::{
    ETag, MAX_BATCH_OPERATIONS, TableClient, TableEntity, TransactionAction, UpdateMode,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Accumulates point writes and groups them into atomic store transactions.
///
/// Actions are split per partition automatically: callers may mix
/// partitions, and each partition gets its own groups. A group closes when
/// it reaches [`MAX_BATCH_OPERATIONS`] or when a row key would repeat inside
/// it. Groups of one partition are submitted in the order they were queued;
/// different partitions go out concurrently. A failing group does not undo
/// the others.
pub struct BatchOperationHelper {
    table: Arc<dyn TableClient>,
    max_group_size: usize,
    open: HashMap<String, OpenGroup>,
    closed: Vec<Vec<TransactionAction>>,
}

#[derive(Default)]
struct OpenGroup {
    actions: Vec<TransactionAction>,
    row_keys: HashSet<String>,
}

impl BatchOperationHelper {
    pub fn new(table: Arc<dyn TableClient>) -> Self {
        Self::with_group_size(table, MAX_BATCH_OPERATIONS)
    }

    /// Caps groups below the store limit; values above it are clamped.
    pub fn with_group_size(table: Arc<dyn TableClient>, max_group_size: usize) -> Self {
        Self {
            table,
            max_group_size: max_group_size.clamp(1, MAX_BATCH_OPERATIONS),
            open: HashMap::new(),
            closed: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity: TableEntity) {
        self.push(TransactionAction::Add(entity));
    }

    pub fn upsert_entity(&mut self, entity: TableEntity, mode: UpdateMode) {
        self.push(TransactionAction::Upsert(entity, mode));
    }

    pub fn update_entity(&mut self, entity: TableEntity, if_match: ETag, mode: UpdateMode) {
        self.push(TransactionAction::Update(entity, if_match, mode));
    }

    pub fn delete_entity(&mut self, partition_key: &str, row_key: &str, if_match: ETag) {
        self.push(TransactionAction::Delete {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            if_match,
        });
    }

    /// Total queued actions.
    pub fn len(&self) -> usize {
        self.closed.iter().map(Vec::len).sum::<usize>()
            + self.open.values().map(|g| g.actions.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transactions `submit` would issue.
    pub fn group_count(&self) -> usize {
        self.closed.len() + self.open.values().filter(|g| !g.actions.is_empty()).count()
    }

    fn push(&mut self, action: TransactionAction) {
        let (partition_key, row_key) = action.key();
        let (partition_key, row_key) = (partition_key.to_string(), row_key.to_string());

        let group = self.open.entry(partition_key.clone()).or_default();
        if group.row_keys.contains(&row_key) {
            let full = std::mem::take(group);
            self.closed.push(full.actions);
        }

        let group = self.open.entry(partition_key).or_default();
        group.row_keys.insert(row_key);
        group.actions.push(action);
        if group.actions.len() >= self.max_group_size {
            let full = std::mem::take(group);
            self.closed.push(full.actions);
        }
    }

    /// Pending groups per partition, each list in submission order.
    fn drain_groups(&mut self) -> Vec<Vec<Vec<TransactionAction>>> {
        let mut order: Vec<String> = Vec::new();
        let mut by_partition: HashMap<String, Vec<Vec<TransactionAction>>> = HashMap::new();
        let open = self
            .open
            .drain()
            .map(|(_, group)| group.actions)
            .collect::<Vec<_>>();
        for actions in std::mem::take(&mut self.closed).into_iter().chain(open) {
            let Some(first) = actions.first() else {
                continue;
            };
            let partition_key = first.key().0.to_string();
            if !by_partition.contains_key(&partition_key) {
                order.push(partition_key.clone());
            }
            by_partition.entry(partition_key).or_default().push(actions);
        }
        order
            .into_iter()
            .filter_map(|partition_key| by_partition.remove(&partition_key))
            .collect()
    }

    /// Submits pending groups: partitions concurrently, groups within a
    /// partition one after another.
    ///
    /// All groups are attempted; the first failure is reported along with
    /// how many groups failed.
    pub async fn submit(mut self) -> Result<()> {
        let partitions = self.drain_groups();
        let total = partitions.iter().map(Vec::len).sum::<usize>();
        if total == 0 {
            return Ok(());
        }
        trace!(
            table = self.table.name(),
            partitions = partitions.len(),
            groups = total,
            "submitting batch"
        );

        let table = &self.table;
        let results = join_all(partitions.into_iter().map(|groups| async move {
            let mut results = Vec::with_capacity(groups.len());
            for actions in groups {
                results.push(table.submit_transaction(actions).await);
            }
            results
        }))
        .await;

        let mut errors = results.into_iter().flatten().filter_map(|r| r.err());
        match errors.next() {
            None => Ok(()),
            Some(first) => Err(IdentityError::BatchFailed {
                failed: 1 + errors.count(),
                total,
                source: first,
            }),
        }
    }
}

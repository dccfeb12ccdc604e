use crate::codec;
use crate::newest_first;
use std::sync::Arc;
use tracing::{debug, info};
use weft_core::{CheckpointType, Clock, WeftResult, WorkflowCheckpoint};
use weft_store::{CheckpointQuery, WorkflowStore};

/// Appends, reads, and prunes per-(session, agent) checkpoint chains.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    compression_threshold: usize,
    default_limit: usize,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        compression_threshold: usize,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            compression_threshold,
            default_limit,
        }
    }

    /// Append a checkpoint to its (session, agent) chain.
    ///
    /// `checkpoint.context` is taken as plain JSON and compressed if it is
    /// over the threshold. Without an explicit predecessor the checkpoint is
    /// linked to the chain's current latest.
    pub async fn create(&self, mut checkpoint: WorkflowCheckpoint) -> WeftResult<WorkflowCheckpoint> {
        if checkpoint.previous_checkpoint_id.is_none() {
            checkpoint.previous_checkpoint_id = self
                .latest(&checkpoint.session_id, &checkpoint.agent_id)
                .await?
                .map(|prev| prev.checkpoint_id);
        }

        let encoded = codec::encode(&checkpoint.context, self.compression_threshold)?;
        checkpoint.context = encoded.context;
        checkpoint.compressed = encoded.compressed;
        checkpoint.size_bytes = encoded.size_bytes;
        checkpoint.created_at = self.clock.now();

        self.store.insert_checkpoint(&checkpoint).await?;
        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            session_id = %checkpoint.session_id,
            agent_id = %checkpoint.agent_id,
            kind = %checkpoint.checkpoint_type,
            size_bytes = checkpoint.size_bytes,
            compressed = checkpoint.compressed,
            "Checkpoint written"
        );
        Ok(checkpoint)
    }

    pub async fn get(&self, checkpoint_id: &str) -> WeftResult<Option<WorkflowCheckpoint>> {
        self.store.get_checkpoint(checkpoint_id).await
    }

    /// The most recently created checkpoint of (session, agent).
    pub async fn latest(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> WeftResult<Option<WorkflowCheckpoint>> {
        Ok(self.chain(session_id, agent_id).await?.into_iter().next())
    }

    /// Checkpoints of a session, newest first, optionally narrowed to one
    /// agent or one type.
    pub async fn list(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
        checkpoint_type: Option<CheckpointType>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<WorkflowCheckpoint>> {
        let mut rows = self
            .store
            .list_checkpoints(&CheckpointQuery {
                session_id: Some(session_id.to_string()),
                agent_id: agent_id.map(str::to_string),
                checkpoint_type,
            })
            .await?;
        newest_first(&mut rows, |c| c.created_at);
        rows.truncate(limit.unwrap_or(self.default_limit));
        Ok(rows)
    }

    /// The decoded context of a checkpoint.
    pub async fn restore(&self, checkpoint_id: &str) -> WeftResult<Option<serde_json::Value>> {
        match self.store.get_checkpoint(checkpoint_id).await? {
            Some(checkpoint) => {
                debug!(checkpoint_id, "Restoring checkpoint context");
                Ok(Some(codec::decode(
                    &checkpoint.context,
                    checkpoint.compressed,
                )?))
            }
            None => Ok(None),
        }
    }

    /// Delete one checkpoint. Returns whether it existed.
    pub async fn delete(&self, checkpoint_id: &str) -> WeftResult<bool> {
        let deleted = self
            .store
            .delete_checkpoints(&[checkpoint_id.to_string()])
            .await?;
        Ok(deleted > 0)
    }

    /// Keep the `keep_count` newest checkpoints of (session, agent) and
    /// delete the rest. Returns how many were deleted.
    ///
    /// Works from a snapshot taken at the start of the call, so a checkpoint
    /// written while the sweep runs is never among those deleted.
    pub async fn prune(&self, session_id: &str, agent_id: &str, keep_count: usize) -> WeftResult<usize> {
        let snapshot = self.chain(session_id, agent_id).await?;
        let doomed: Vec<String> = snapshot
            .into_iter()
            .skip(keep_count)
            .map(|c| c.checkpoint_id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete_checkpoints(&doomed).await?;
        info!(session_id, agent_id, keep_count, deleted, "Checkpoints pruned");
        Ok(deleted)
    }

    async fn chain(&self, session_id: &str, agent_id: &str) -> WeftResult<Vec<WorkflowCheckpoint>> {
        let mut rows = self
            .store
            .list_checkpoints(&CheckpointQuery::chain(session_id, agent_id))
            .await?;
        newest_first(&mut rows, |c| c.created_at);
        Ok(rows)
    }
}

use std::sync::Arc;
use tracing::{debug, info, warn};
use weft_core::{AgentMessage, Clock, MessageStatus, WeftError, WeftResult};
use weft_store::{MessageQuery, WorkflowStore};

/// Defaults applied to outgoing messages.
#[derive(Debug, Clone, Copy)]
pub struct MessageDefaults {
    pub priority: i32,
    pub max_delivery_attempts: u32,
    pub ttl: Option<chrono::Duration>,
}

/// Priority-ordered, TTL-bound message passing between agents.
///
/// Delivery is at-least-once: the bus keeps the attempt counter, but
/// retrying is the sender's decision.
#[derive(Clone)]
pub struct MessageBus {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    defaults: MessageDefaults,
    default_limit: usize,
}

impl MessageBus {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        defaults: MessageDefaults,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            defaults,
            default_limit,
        }
    }

    /// A broadcast message carrying the configured priority and attempt
    /// limit. Address it with [`AgentMessage::to`] before sending.
    pub fn draft(
        &self,
        from_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> AgentMessage {
        let mut message = AgentMessage::new(from_agent, message_type, payload)
            .with_priority(self.defaults.priority);
        message.max_delivery_attempts = self.defaults.max_delivery_attempts;
        message
    }

    /// Persist `message` as `pending`. A message without an expiry gets the
    /// configured TTL, if any.
    pub async fn send(&self, mut message: AgentMessage) -> WeftResult<AgentMessage> {
        let now = self.clock.now();
        message.status = MessageStatus::Pending;
        message.created_at = now;
        message.delivery_attempts = 0;
        message.delivered_at = None;
        message.acknowledged_at = None;
        if message.expires_at.is_none() {
            message.expires_at = self.defaults.ttl.map(|ttl| now + ttl);
        }

        self.store.insert_message(&message).await?;
        debug!(
            message_id = %message.message_id,
            from = %message.from_agent,
            to = message.to_agent.as_deref().unwrap_or("*"),
            message_type = %message.message_type,
            priority = message.priority,
            "Message sent"
        );
        Ok(message)
    }

    /// Send to every agent except the sender.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        message_type: &str,
        payload: serde_json::Value,
        session_id: Option<&str>,
    ) -> WeftResult<AgentMessage> {
        let mut message = self.draft(from_agent, message_type, payload);
        message.session_id = session_id.map(str::to_string);
        self.send(message).await
    }

    /// Answer `original_id` on its thread. The reply goes to the original
    /// sender, inherits its session and correlation id, and points
    /// `reply_to` at it.
    ///
    /// An original without a correlation id opens a thread keyed by its own
    /// id and is stamped with it, so it heads its conversation.
    pub async fn reply(
        &self,
        original_id: &str,
        from_agent: &str,
        message_type: &str,
        payload: serde_json::Value,
    ) -> WeftResult<Option<AgentMessage>> {
        let Some(original) = self.store.get_message(original_id).await? else {
            return Ok(None);
        };
        let thread = match original.correlation_id.clone() {
            Some(thread) => thread,
            None => self.open_thread(original.clone()).await?,
        };
        let mut message = self
            .draft(from_agent, message_type, payload)
            .to(original.from_agent.clone())
            .with_correlation(thread);
        message.session_id = original.session_id.clone();
        message.reply_to = Some(original.message_id);
        self.send(message).await.map(Some)
    }

    /// Stamp `original` with a correlation id equal to its own id. The write
    /// is conditional on the status read, so a concurrent status move is
    /// re-read instead of overwritten.
    async fn open_thread(&self, mut original: AgentMessage) -> WeftResult<String> {
        let thread = original.message_id.clone();
        loop {
            if let Some(existing) = &original.correlation_id {
                return Ok(existing.clone());
            }
            original.correlation_id = Some(thread.clone());
            let status = original.status;
            if self.store.update_message_if(&original, status).await? {
                debug!(message_id = %thread, "Thread opened");
                return Ok(thread);
            }
            match self.store.get_message(&thread).await? {
                Some(fresh) => original = fresh,
                None => return Ok(thread),
            }
        }
    }

    pub async fn get(&self, message_id: &str) -> WeftResult<Option<AgentMessage>> {
        self.store.get_message(message_id).await
    }

    /// Messages visible to `agent_id`: addressed to it, or broadcasts it did
    /// not send. Lowest priority value first; among equal priorities the
    /// newest comes first.
    pub async fn inbox(
        &self,
        agent_id: &str,
        status: Option<MessageStatus>,
        message_type: Option<&str>,
        limit: Option<usize>,
    ) -> WeftResult<Vec<AgentMessage>> {
        let mut messages = self
            .store
            .list_messages(&MessageQuery {
                recipient: Some(agent_id.to_string()),
                status,
                message_type: message_type.map(str::to_string),
                ..Default::default()
            })
            .await?;
        messages.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        messages.truncate(limit.unwrap_or(self.default_limit));
        Ok(messages)
    }

    /// Every message of a thread, oldest first.
    pub async fn conversation(
        &self,
        correlation_id: &str,
        limit: Option<usize>,
    ) -> WeftResult<Vec<AgentMessage>> {
        let mut messages = self
            .store
            .list_messages(&MessageQuery {
                correlation_id: Some(correlation_id.to_string()),
                ..Default::default()
            })
            .await?;
        messages.sort_by_key(|m| m.created_at);
        messages.truncate(limit.unwrap_or(self.default_limit));
        Ok(messages)
    }

    /// Move a message forward to `next`, stamping `delivered_at` and
    /// `acknowledged_at` as they are reached.
    ///
    /// Backward moves and moves out of a terminal status fail with
    /// [`WeftError::InvalidTransition`]. Unknown ids give `Ok(None)`.
    pub async fn advance_status(
        &self,
        message_id: &str,
        next: MessageStatus,
    ) -> WeftResult<Option<AgentMessage>> {
        loop {
            let Some(mut message) = self.store.get_message(message_id).await? else {
                return Ok(None);
            };
            let from = message.status;
            if !from.can_advance_to(next) {
                warn!(message_id, from = %from, to = %next, "Rejected message transition");
                return Err(WeftError::transition("message", from, next));
            }

            let now = self.clock.now();
            match next {
                MessageStatus::Delivered => message.delivered_at = Some(now),
                MessageStatus::Acknowledged => {
                    message.delivered_at.get_or_insert(now);
                    message.acknowledged_at = Some(now);
                }
                MessageStatus::Pending | MessageStatus::Expired => {}
            }
            message.status = next;

            // A lost race means another writer moved the status on; re-read
            // and judge the move against the new status.
            if self.store.update_message_if(&message, from).await? {
                debug!(message_id, from = %from, to = %next, "Message advanced");
                return Ok(Some(message));
            }
        }
    }

    /// Mark a message handed to its recipient.
    pub async fn mark_delivered(&self, message_id: &str) -> WeftResult<Option<AgentMessage>> {
        self.advance_status(message_id, MessageStatus::Delivered).await
    }

    /// Mark a message processed by its recipient.
    pub async fn acknowledge(&self, message_id: &str) -> WeftResult<Option<AgentMessage>> {
        self.advance_status(message_id, MessageStatus::Acknowledged)
            .await
    }

    /// Count one delivery attempt. The returned message tells the sender
    /// whether it has used up its attempts.
    pub async fn record_delivery_attempt(
        &self,
        message_id: &str,
    ) -> WeftResult<Option<AgentMessage>> {
        loop {
            let Some(mut message) = self.store.get_message(message_id).await? else {
                return Ok(None);
            };
            let status = message.status;
            message.delivery_attempts += 1;
            if self.store.update_message_if(&message, status).await? {
                if message.attempts_exhausted() {
                    warn!(
                        message_id,
                        attempts = message.delivery_attempts,
                        "Message delivery attempts exhausted"
                    );
                }
                return Ok(Some(message));
            }
        }
    }

    /// Delete every message whose expiry has passed. Safe to run repeatedly.
    pub async fn expire_sweep(&self) -> WeftResult<usize> {
        let now = self.clock.now();
        let deleted = self.store.delete_messages_expired_before(now).await?;
        if deleted > 0 {
            info!(deleted, "Expired messages removed");
        }
        Ok(deleted)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority given to messages that do not set one. Lower is more urgent.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Delivery attempts allowed before a sender should give up.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

wire_enum! {
    /// Delivery status of an [`AgentMessage`].
    ///
    /// Status only moves forward (`pending → delivered → acknowledged`) or
    /// ends at `expired`.
    pub enum MessageStatus {
        /// Written, not yet handed to the recipient.
        Pending => "pending",
        /// Handed to the recipient.
        Delivered => "delivered",
        /// Recipient confirmed processing. Terminal.
        Acknowledged => "acknowledged",
        /// Outlived its TTL. Terminal.
        Expired => "expired",
    }
}

impl MessageStatus {
    /// `acknowledged` and `expired` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Acknowledged | MessageStatus::Expired)
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    ///
    /// Any non-terminal status may expire; otherwise the target must be
    /// strictly further along the delivery chain.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            MessageStatus::Expired => true,
            _ => next.rank() > self.rank(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Acknowledged => 2,
            MessageStatus::Expired => 3,
        }
    }
}

/// A point-to-point or broadcast message between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message identifier; also the dedup key for at-least-once senders.
    pub message_id: String,
    /// Owning session, if any.
    pub session_id: Option<String>,
    /// Sender agent.
    pub from_agent: String,
    /// Recipient agent; `None` broadcasts to every agent except the sender.
    pub to_agent: Option<String>,
    /// Application-defined message type.
    pub message_type: String,
    /// Message body.
    pub payload: serde_json::Value,
    /// Lower values are serviced first.
    pub priority: i32,
    /// Threads all messages of one conversation.
    pub correlation_id: Option<String>,
    /// The message this one answers.
    pub reply_to: Option<String>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Delivery attempts recorded so far.
    #[serde(default)]
    pub delivery_attempts: u32,
    /// Attempts allowed before the sender gives up.
    pub max_delivery_attempts: u32,
    /// When the message was sent.
    pub created_at: DateTime<Utc>,
    /// When the message stops being deliverable.
    pub expires_at: Option<DateTime<Utc>>,
    /// When it reached `delivered`.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When it reached `acknowledged`.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl AgentMessage {
    /// A new pending message from `from_agent`. Broadcast until
    /// [`AgentMessage::to`] sets a recipient.
    pub fn new(
        from_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: crate::new_id(),
            session_id: None,
            from_agent: from_agent.into(),
            to_agent: None,
            message_type: message_type.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            correlation_id: None,
            reply_to: None,
            status: MessageStatus::Pending,
            delivery_attempts: 0,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            created_at: Utc::now(),
            expires_at: None,
            delivered_at: None,
            acknowledged_at: None,
        }
    }

    /// Address the message to a single agent.
    pub fn to(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = Some(agent_id.into());
        self
    }

    /// Attach to a session.
    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the priority (lower is more urgent).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Thread into a conversation.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set an absolute expiry.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Whether the message has no single recipient.
    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }

    /// Inbox visibility: addressed to `agent_id`, or a broadcast that
    /// `agent_id` did not send.
    pub fn is_visible_to(&self, agent_id: &str) -> bool {
        match &self.to_agent {
            Some(to) => to == agent_id,
            None => self.from_agent != agent_id,
        }
    }

    /// Whether `expires_at` is set and strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether the sender has used up its delivery attempts.
    pub fn attempts_exhausted(&self) -> bool {
        self.delivery_attempts >= self.max_delivery_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_message_visibility() {
        let msg = AgentMessage::new("exec-1", "task_update", json!({})).to("exec-2");
        assert!(msg.is_visible_to("exec-2"));
        assert!(!msg.is_visible_to("exec-1"));
        assert!(!msg.is_visible_to("exec-3"));
    }

    #[test]
    fn test_broadcast_hidden_from_sender() {
        let msg = AgentMessage::new("exec-1", "status", json!({}));
        assert!(msg.is_broadcast());
        assert!(msg.is_visible_to("exec-2"));
        assert!(!msg.is_visible_to("exec-1"));
    }

    #[test]
    fn test_self_addressed_message_is_visible() {
        let msg = AgentMessage::new("exec-1", "note", json!({})).to("exec-1");
        assert!(msg.is_visible_to("exec-1"));
    }

    #[test]
    fn test_forward_only_transitions() {
        use MessageStatus::*;
        assert!(Pending.can_advance_to(Delivered));
        assert!(Pending.can_advance_to(Acknowledged));
        assert!(Delivered.can_advance_to(Acknowledged));
        assert!(Delivered.can_advance_to(Expired));
        assert!(!Delivered.can_advance_to(Pending));
        assert!(!Delivered.can_advance_to(Delivered));
        assert!(!Acknowledged.can_advance_to(Expired));
        assert!(!Expired.can_advance_to(Delivered));
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let msg = AgentMessage::new("a", "t", json!(null)).expires_at(now);
        assert!(!msg.is_expired_at(now));
        assert!(msg.is_expired_at(now + chrono::Duration::milliseconds(1)));
        let no_ttl = AgentMessage::new("a", "t", json!(null));
        assert!(!no_ttl.is_expired_at(now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut msg = AgentMessage::new("a", "t", json!(null));
        assert!(!msg.attempts_exhausted());
        msg.delivery_attempts = DEFAULT_MAX_DELIVERY_ATTEMPTS;
        assert!(msg.attempts_exhausted());
    }
}

//! Logical message envelope exchanged between the orchestrator and agents.
//!
//! Payloads are flat string maps; typed values are carried in their
//! `as_db_str` / `Display` form and parsed back with the `payload_*` helpers.

use crate::{new_entity_id, AgentId, MessageId, TenderError, TenderResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Payload keys used by the allocation protocol.
pub mod keys {
    pub const ANNOUNCEMENT_ID: &str = "announcement_id";
    pub const ASSIGNMENT_ID: &str = "assignment_id";
    pub const TASK_ID: &str = "task_id";
    pub const PLAN_ID: &str = "plan_id";
    pub const ACTION: &str = "action";
    pub const REQUIRED_CAPABILITIES: &str = "required_capabilities";
    pub const DEADLINE: &str = "deadline";
    pub const CAPABILITY_SCORE: &str = "capability_score";
    pub const ESTIMATED_TIME: &str = "estimated_time";
    pub const CONFIDENCE: &str = "confidence";
    pub const DISTANCE: &str = "distance";
    pub const PERCENT: &str = "percent";
    pub const DETAIL: &str = "detail";
    pub const SCORE: &str = "score";
}

/// Protocol message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Announce,
    Bid,
    Award,
    Reject,
    Accept,
    Progress,
    Complete,
    Fail,
}

impl MessageType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MessageType::Announce => "Announce",
            MessageType::Bid => "Bid",
            MessageType::Award => "Award",
            MessageType::Reject => "Reject",
            MessageType::Accept => "Accept",
            MessageType::Progress => "Progress",
            MessageType::Complete => "Complete",
            MessageType::Fail => "Fail",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Delivery priority. Higher values are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
    Critical,
}

impl MessagePriority {
    pub fn value(&self) -> i32 {
        match self {
            MessagePriority::Low => 1,
            MessagePriority::Normal => 5,
            MessagePriority::High => 10,
            MessagePriority::Urgent => 20,
            MessagePriority::Critical => 50,
        }
    }
}

/// Who a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Agent(AgentId),
    Broadcast,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: MessageId,
    pub message_type: MessageType,
    pub sender_id: AgentId,
    pub recipient: Recipient,
    pub payload: BTreeMap<String, String>,
    pub priority: MessagePriority,
    pub timestamp: Timestamp,
}

impl AgentMessage {
    /// Create a message with `Normal` priority, or `High` for failures.
    pub fn new(
        message_type: MessageType,
        sender_id: AgentId,
        recipient: Recipient,
        timestamp: Timestamp,
    ) -> Self {
        let priority = match message_type {
            MessageType::Fail => MessagePriority::High,
            _ => MessagePriority::Normal,
        };
        Self {
            message_id: new_entity_id(),
            message_type,
            sender_id,
            recipient,
            payload: BTreeMap::new(),
            priority,
            timestamp,
        }
    }

    pub fn with_payload(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    // ------------------------------------------------------------------------
    // Agent-side constructors
    // ------------------------------------------------------------------------

    pub fn bid(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        announcement_id: Uuid,
        capability_score: f64,
        estimated_time: f64,
        confidence: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Bid,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ANNOUNCEMENT_ID, announcement_id)
        .with_payload(keys::CAPABILITY_SCORE, capability_score)
        .with_payload(keys::ESTIMATED_TIME, estimated_time)
        .with_payload(keys::CONFIDENCE, confidence)
    }

    pub fn accept(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        assignment_id: Uuid,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Accept,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ASSIGNMENT_ID, assignment_id)
    }

    pub fn decline(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        assignment_id: Uuid,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Reject,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ASSIGNMENT_ID, assignment_id)
    }

    pub fn progress(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        assignment_id: Uuid,
        percent: u8,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Progress,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ASSIGNMENT_ID, assignment_id)
        .with_payload(keys::PERCENT, percent)
    }

    pub fn complete(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        assignment_id: Uuid,
        detail: &str,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Complete,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ASSIGNMENT_ID, assignment_id)
        .with_payload(keys::DETAIL, detail)
    }

    pub fn fail(
        sender_id: AgentId,
        orchestrator_id: AgentId,
        assignment_id: Uuid,
        detail: &str,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            MessageType::Fail,
            sender_id,
            Recipient::Agent(orchestrator_id),
            timestamp,
        )
        .with_payload(keys::ASSIGNMENT_ID, assignment_id)
        .with_payload(keys::DETAIL, detail)
    }

    // ------------------------------------------------------------------------
    // Payload accessors
    // ------------------------------------------------------------------------

    pub fn payload_str(&self, key: &str) -> TenderResult<&str> {
        self.payload
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| self.invalid(format!("missing payload key '{}'", key)))
    }

    pub fn payload_f64(&self, key: &str) -> TenderResult<f64> {
        let raw = self.payload_str(key)?;
        raw.trim()
            .parse::<f64>()
            .map_err(|_| self.invalid(format!("'{}' is not a number for '{}'", raw, key)))
    }

    pub fn payload_optional_f64(&self, key: &str) -> TenderResult<Option<f64>> {
        match self.payload.get(key) {
            None => Ok(None),
            Some(_) => self.payload_f64(key).map(Some),
        }
    }

    pub fn payload_uuid(&self, key: &str) -> TenderResult<Uuid> {
        let raw = self.payload_str(key)?;
        Uuid::parse_str(raw.trim())
            .map_err(|_| self.invalid(format!("'{}' is not a UUID for '{}'", raw, key)))
    }

    pub fn payload_percent(&self, key: &str) -> TenderResult<u8> {
        let raw = self.payload_str(key)?;
        match raw.trim().parse::<u8>() {
            Ok(p) if p <= 100 => Ok(p),
            _ => Err(self.invalid(format!("'{}' is not a percentage", raw))),
        }
    }

    fn invalid(&self, reason: String) -> TenderError {
        TenderError::InvalidMessage {
            message_type: self.message_type.to_string(),
            reason,
        }
    }
}

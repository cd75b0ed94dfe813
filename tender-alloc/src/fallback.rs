//! Deterministic round-robin allocation for tasks that negotiation could not place.

use std::sync::atomic::{AtomicU64, Ordering};
use tender_agents::{AgentRegistry, AgentSnapshot};
use tender_core::ActionType;

/// Round-robin over eligible agents in registration order.
///
/// The cursor holds the registration sequence to start from; it only moves
/// when a candidate is actually awarded, so a failed award does not skip
/// anyone.
#[derive(Debug, Default)]
pub struct FallbackAllocator {
    cursor: AtomicU64,
}

impl FallbackAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eligible agents in the order the fallback would try them.
    pub fn candidates(&self, registry: &AgentRegistry, required: &[ActionType]) -> Vec<AgentSnapshot> {
        let eligible = registry.eligible_in_order(required);
        let start = self.cursor.load(Ordering::Acquire);
        let split = eligible
            .iter()
            .position(|s| s.record.registration_seq >= start)
            .unwrap_or(eligible.len());

        let mut ordered = Vec::with_capacity(eligible.len());
        ordered.extend_from_slice(&eligible[split..]);
        ordered.extend_from_slice(&eligible[..split]);
        ordered
    }

    /// First candidate, without claiming it.
    pub fn select(&self, registry: &AgentRegistry, required: &[ActionType]) -> Option<AgentSnapshot> {
        self.candidates(registry, required).into_iter().next()
    }

    /// Move the cursor past an agent that was just awarded.
    pub fn advance_past(&self, agent: &AgentSnapshot) {
        self.cursor
            .store(agent.record.registration_seq + 1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tender_agents::CapabilityProfile;
    use tender_core::{new_entity_id, AgentId, AgentRole, TenderResult};

    fn register(registry: &AgentRegistry, role: AgentRole) -> TenderResult<AgentId> {
        let id = new_entity_id();
        registry.register(id, role, CapabilityProfile::default(), Utc::now())?;
        Ok(id)
    }

    #[test]
    fn test_rotates_through_eligible_agents() -> TenderResult<()> {
        let registry = AgentRegistry::new();
        let a = register(&registry, AgentRole::Generalist)?;
        let b = register(&registry, AgentRole::Miner)?;
        let c = register(&registry, AgentRole::Generalist)?;
        let fallback = FallbackAllocator::new();
        let mine = [ActionType::Mine];

        let mut picks = Vec::new();
        for _ in 0..4 {
            let chosen = fallback
                .select(&registry, &mine)
                .ok_or(tender_core::AgentError::NotRegistered { agent_id: a })?;
            fallback.advance_past(&chosen);
            picks.push(chosen.agent_id());
        }
        assert_eq!(picks, vec![a, b, c, a]);
        Ok(())
    }

    #[test]
    fn test_skips_ineligible_agents() -> TenderResult<()> {
        let registry = AgentRegistry::new();
        let _scout = register(&registry, AgentRole::Scout)?;
        let busy = register(&registry, AgentRole::Crafter)?;
        let free = register(&registry, AgentRole::Generalist)?;
        registry.reserve(busy, new_entity_id())?;

        let fallback = FallbackAllocator::new();
        let chosen = fallback.select(&registry, &[ActionType::Craft]).map(|s| s.agent_id());
        assert_eq!(chosen, Some(free));
        Ok(())
    }

    #[test]
    fn test_no_eligible_agent() -> TenderResult<()> {
        let registry = AgentRegistry::new();
        register(&registry, AgentRole::Miner)?;
        register(&registry, AgentRole::Builder)?;
        let fallback = FallbackAllocator::new();
        assert!(fallback.select(&registry, &[ActionType::Craft]).is_none());
        Ok(())
    }

    #[test]
    fn test_selection_is_deterministic() -> TenderResult<()> {
        let registry = AgentRegistry::new();
        let first = register(&registry, AgentRole::Generalist)?;
        register(&registry, AgentRole::Generalist)?;
        let fallback = FallbackAllocator::new();
        for _ in 0..3 {
            assert_eq!(
                fallback.select(&registry, &[ActionType::Gather]).map(|s| s.agent_id()),
                Some(first)
            );
        }
        Ok(())
    }
}

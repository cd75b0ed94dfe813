//! Static capability model: which roles can perform which actions, and how well.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tender_core::{ActionType, AgentRole};

/// Efficiency of an agent performing an action it is not specialised for.
pub const BASELINE_EFFICIENCY: f64 = 1.0;

/// Upper bound on any efficiency multiplier.
pub const MAX_EFFICIENCY: f64 = 2.0;

/// Role capability table.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityModel;

impl CapabilityModel {
    /// Actions a role can perform, with their efficiency multipliers.
    fn table(role: AgentRole) -> &'static [(ActionType, f64)] {
        match role {
            AgentRole::Generalist => &[],
            AgentRole::Miner => &[
                (ActionType::Mine, 1.6),
                (ActionType::Gather, 0.8),
                (ActionType::Pathfind, 0.9),
            ],
            AgentRole::Builder => &[
                (ActionType::Build, 1.6),
                (ActionType::Place, 1.4),
                (ActionType::Gather, 0.7),
                (ActionType::Pathfind, 0.9),
            ],
            AgentRole::Crafter => &[
                (ActionType::Craft, 1.7),
                (ActionType::Gather, 0.9),
                (ActionType::Place, 0.8),
            ],
            AgentRole::Guard => &[
                (ActionType::Attack, 1.7),
                (ActionType::Follow, 1.3),
                (ActionType::Pathfind, 1.1),
            ],
            AgentRole::Scout => &[
                (ActionType::Pathfind, 1.6),
                (ActionType::Follow, 1.2),
                (ActionType::Gather, 0.9),
            ],
        }
    }

    pub fn can_perform(role: AgentRole, action: ActionType) -> bool {
        match role {
            AgentRole::Generalist => true,
            _ => Self::table(role).iter().any(|(a, _)| *a == action),
        }
    }

    /// Efficiency multiplier in `[0, MAX_EFFICIENCY]`; 0.0 when the role
    /// cannot perform the action at all.
    pub fn efficiency(role: AgentRole, action: ActionType) -> f64 {
        match role {
            AgentRole::Generalist => BASELINE_EFFICIENCY,
            _ => Self::table(role)
                .iter()
                .find(|(a, _)| *a == action)
                .map(|(_, e)| *e)
                .unwrap_or(0.0),
        }
    }

    pub fn can_perform_all<'a, I>(role: AgentRole, actions: I) -> bool
    where
        I: IntoIterator<Item = &'a ActionType>,
    {
        actions.into_iter().all(|a| Self::can_perform(role, *a))
    }

    pub fn supported_actions(role: AgentRole) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|a| Self::can_perform(role, *a))
            .collect()
    }

    /// Ability tags that come with a role.
    pub fn default_abilities(role: AgentRole) -> &'static [&'static str] {
        match role {
            AgentRole::Generalist => &[],
            AgentRole::Miner => &["ore_sense"],
            AgentRole::Builder => &["blueprint_reading"],
            AgentRole::Crafter => &["recipe_book"],
            AgentRole::Guard => &["threat_detection"],
            AgentRole::Scout => &["wide_vision"],
        }
    }
}

/// Per-agent capability profile supplied at registration.
///
/// Overrides only apply to actions the agent's role already supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub efficiency_overrides: BTreeMap<ActionType, f64>,
    pub abilities: BTreeSet<String>,
}

impl CapabilityProfile {
    /// Profile carrying the role's default ability tags and no overrides.
    pub fn for_role(role: AgentRole) -> Self {
        Self {
            efficiency_overrides: BTreeMap::new(),
            abilities: CapabilityModel::default_abilities(role)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_efficiency(mut self, action: ActionType, efficiency: f64) -> Self {
        self.efficiency_overrides.insert(action, efficiency);
        self
    }

    pub fn with_ability(mut self, ability: impl Into<String>) -> Self {
        self.abilities.insert(ability.into());
        self
    }

    pub fn has_ability(&self, ability: &str) -> bool {
        self.abilities.contains(ability)
    }

    /// Efficiency for `action`, preferring this profile over the role table.
    pub fn efficiency(&self, role: AgentRole, action: ActionType) -> f64 {
        if !CapabilityModel::can_perform(role, action) {
            return 0.0;
        }
        match self.efficiency_overrides.get(&action) {
            Some(e) if e.is_finite() => e.clamp(0.0, MAX_EFFICIENCY),
            _ => CapabilityModel::efficiency(role, action),
        }
    }

    /// Self-assessed capability score in `[0, 1]`, suitable for a bid.
    pub fn capability_score(&self, role: AgentRole, action: ActionType) -> f64 {
        (self.efficiency(role, action) / MAX_EFFICIENCY).clamp(0.0, 1.0)
    }
}

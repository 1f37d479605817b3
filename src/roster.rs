//! Registry of the agents taking part in one negotiation

use std::collections::HashMap;

use crate::agent::{AgentHandle, AgentRole};

/// The proposer plus every stakeholder, addressable by name
#[derive(Clone, Debug)]
pub struct Roster {
    proposer: AgentHandle,
    stakeholders: Vec<AgentHandle>,
    by_name: HashMap<String, AgentHandle>,
}

impl Roster {
    /// Build a roster; see [`Self::problems`] for validation
    pub fn new(proposer: AgentHandle, stakeholders: Vec<AgentHandle>) -> Self {
        let mut by_name = HashMap::with_capacity(stakeholders.len() + 1);
        for agent in stakeholders.iter().chain(std::iter::once(&proposer)) {
            by_name.insert(agent.name.clone(), agent.clone());
        }
        Self {
            proposer,
            stakeholders,
            by_name,
        }
    }

    /// Get the proposer
    pub fn proposer(&self) -> &AgentHandle {
        &self.proposer
    }

    /// Get the stakeholders in registration order
    pub fn stakeholders(&self) -> &[AgentHandle] {
        &self.stakeholders
    }

    /// Stakeholders first, proposer last
    pub fn all(&self) -> Vec<AgentHandle> {
        self.stakeholders
            .iter()
            .chain(std::iter::once(&self.proposer))
            .cloned()
            .collect()
    }

    /// Look up an agent by name
    pub fn get(&self, name: &str) -> Option<&AgentHandle> {
        self.by_name.get(name)
    }

    /// Agent names, stakeholders first, proposer last
    pub fn names(&self) -> Vec<&str> {
        self.stakeholders
            .iter()
            .chain(std::iter::once(&self.proposer))
            .map(|a| a.name())
            .collect()
    }

    /// Number of agents including the proposer
    pub fn len(&self) -> usize {
        self.stakeholders.len() + 1
    }

    /// Names that appear more than once, or a proposer not in the proposer role
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.proposer.role() != AgentRole::Proposer {
            problems.push(format!("{} is not a proposer", self.proposer.name()));
        }
        if self.by_name.len() != self.len() {
            problems.push("agent names are not unique".to_string());
        }
        problems
    }
}

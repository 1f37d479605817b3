//! Per-agent satisfaction trajectories across every proposal

use std::collections::BTreeMap;

use crate::board::BulletinBoard;
use crate::model::{ProposalId, SATISFACTION_THRESHOLD};

/// One agent's evaluation of one proposal, in posting order
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub proposal_id: ProposalId,
    /// 1-based position of the proposal on the board
    pub round: usize,
    pub score: u8,
    pub unsatisfied: Vec<String>,
    pub suggested: Vec<String>,
}

impl HistoryEntry {
    fn satisfied(&self) -> bool {
        self.score >= SATISFACTION_THRESHOLD
    }
}

/// Score trajectories keyed by agent name
#[derive(Debug, Clone, Default)]
pub struct ScoreHistory {
    agents: BTreeMap<String, Vec<HistoryEntry>>,
}

impl ScoreHistory {
    pub fn from_board(board: &BulletinBoard) -> Self {
        let mut history = Self::default();
        for (index, proposal) in board.proposals().iter().enumerate() {
            for eval in board.evaluations_for(proposal.id) {
                history.push(
                    eval.agent_name,
                    HistoryEntry {
                        proposal_id: proposal.id,
                        round: index + 1,
                        score: eval.satisfaction_score,
                        unsatisfied: eval.unsatisfied_preferences,
                        suggested: eval.suggested_changes,
                    },
                );
            }
        }
        history
    }

    pub fn push(&mut self, agent: impl Into<String>, entry: HistoryEntry) {
        self.agents.entry(agent.into()).or_default().push(entry);
    }

    pub fn trajectory(&self, agent: &str) -> &[HistoryEntry] {
        self.agents.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Agents in name order with their trajectories
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[HistoryEntry])> {
        self.agents.iter().map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Unsatisfied agents whose score and complaint have not moved over
    /// their last `window` evaluations.
    pub fn stalled_agents(&self, window: usize) -> Vec<&str> {
        let window = window.max(2);
        self.iter()
            .filter(|(_, entries)| {
                if entries.len() < window {
                    return false;
                }
                let recent = &entries[entries.len() - window..];
                let first = &recent[0];
                !first.satisfied()
                    && recent
                        .iter()
                        .all(|e| e.score == first.score && e.unsatisfied == first.unsatisfied)
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Agents that started unsatisfied, crossed the bar, and stayed above it.
    pub fn settled_agents(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entries)| {
                match entries.iter().position(HistoryEntry::satisfied) {
                    Some(first) if first > 0 => entries[first..].iter().all(HistoryEntry::satisfied),
                    _ => false,
                }
            })
            .map(|(name, _)| name)
            .collect()
    }
}

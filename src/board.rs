//! Shared bulletin board - the only channel between parties

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{
    Evaluation, Feedback, PaymentRoute, Proposal, ProposalDraft, ProposalId,
    SATISFACTION_THRESHOLD,
};
use crate::roster::Roster;

/// Append/replace-only ledger of proposals and evaluations
///
/// Proposals are shared as `Arc<Proposal>` and never mutated after
/// insertion. Evaluations are upserted per `(proposal_id, agent_name)`.
pub struct BulletinBoard {
    proposals: RwLock<Vec<Arc<Proposal>>>,
    evaluations: RwLock<HashMap<ProposalId, BTreeMap<String, Evaluation>>>,
    current_round: RwLock<u32>,
}

impl BulletinBoard {
    /// Create an empty board at round 0
    pub fn new() -> Self {
        Self {
            proposals: RwLock::new(Vec::new()),
            evaluations: RwLock::new(HashMap::new()),
            current_round: RwLock::new(0),
        }
    }

    /// Record a new proposal and return its id
    pub fn post_proposal(&self, author: &str, draft: ProposalDraft) -> ProposalId {
        let mut side_payments: BTreeMap<PaymentRoute, f64> = BTreeMap::new();
        for offer in draft.side_payments {
            let Some(amount) = offer.amount.as_number() else {
                warn!(from = %offer.from, to = %offer.to, amount = %offer.amount, "Skipping side payment with non-numeric amount");
                continue;
            };
            // A non-positive transfer would offset the payer's real outflows.
            if amount <= 0.0 {
                warn!(from = %offer.from, to = %offer.to, amount, "Skipping side payment with non-positive amount");
                continue;
            }
            *side_payments
                .entry(PaymentRoute::new(offer.from, offer.to))
                .or_insert(0.0) += amount;
        }

        let round = self.current_round();
        let mut proposals = self.proposals.write();
        let id = proposals.len();
        proposals.push(Arc::new(Proposal {
            id,
            author: author.to_string(),
            round,
            created_at: Utc::now(),
            base_plan: draft.base_plan,
            modifications: draft.modifications,
            compensation: draft.compensation,
            side_payments,
            commitments: draft.commitments,
            total_cost: draft.total_cost,
            rationale: draft.rationale,
        }));
        drop(proposals);

        info!(proposal_id = id, author, round, "Posted proposal");
        id
    }

    /// Insert or replace an agent's evaluation of a proposal
    pub fn post_evaluation(&self, evaluation: Evaluation) {
        debug!(
            agent = %evaluation.agent_name,
            proposal_id = evaluation.proposal_id,
            score = evaluation.satisfaction_score,
            "Posted evaluation"
        );
        self.evaluations
            .write()
            .entry(evaluation.proposal_id)
            .or_default()
            .insert(evaluation.agent_name.clone(), evaluation);
    }

    /// Get the most recently posted proposal
    pub fn latest_proposal(&self) -> Option<Arc<Proposal>> {
        self.proposals.read().last().cloned()
    }

    /// Get a proposal by id
    pub fn proposal(&self, id: ProposalId) -> Option<Arc<Proposal>> {
        self.proposals.read().get(id).cloned()
    }

    /// Snapshot of every proposal in posting order
    pub fn proposals(&self) -> Vec<Arc<Proposal>> {
        self.proposals.read().clone()
    }

    /// Number of proposals posted so far
    pub fn proposal_count(&self) -> usize {
        self.proposals.read().len()
    }

    /// Evaluations recorded for a proposal, ordered by agent name
    pub fn evaluations_for(&self, id: ProposalId) -> Vec<Evaluation> {
        self.evaluations
            .read()
            .get(&id)
            .map(|evals| evals.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get one agent's evaluation of a proposal
    pub fn evaluation(&self, id: ProposalId, agent: &str) -> Option<Evaluation> {
        self.evaluations
            .read()
            .get(&id)
            .and_then(|evals| evals.get(agent).cloned())
    }

    /// True iff every required agent scored at least `threshold`.
    ///
    /// An agent with no recorded evaluation counts as score 0.
    pub fn check_unanimous<S: AsRef<str>>(
        &self,
        id: ProposalId,
        required_agents: &[S],
        threshold: u8,
    ) -> bool {
        let evaluations = self.evaluations.read();
        let Some(evals) = evaluations.get(&id) else {
            return false;
        };
        required_agents.iter().all(|agent| {
            evals
                .get(agent.as_ref())
                .map_or(0, |e| e.satisfaction_score)
                >= threshold
        })
    }

    /// [`Self::check_unanimous`] at the standard satisfaction bar
    pub fn is_unanimous<S: AsRef<str>>(&self, id: ProposalId, required_agents: &[S]) -> bool {
        self.check_unanimous(id, required_agents, SATISFACTION_THRESHOLD)
    }

    /// One summary per evaluator of a proposal
    pub fn feedback_for(&self, id: ProposalId) -> Vec<Feedback> {
        self.evaluations
            .read()
            .get(&id)
            .map(|evals| evals.values().map(Feedback::from).collect())
            .unwrap_or_default()
    }

    /// Move to the next round and return its number
    pub fn advance_round(&self) -> u32 {
        let mut round = self.current_round.write();
        *round += 1;
        *round
    }

    /// Get the current round; 0 before the first evaluation round
    pub fn current_round(&self) -> u32 {
        *self.current_round.read()
    }

    /// Check each payer's total outgoing side payments against its budget.
    ///
    /// Payers that are not registered agents carry no budget and are
    /// reported but never flagged.
    pub fn validate_side_payments(&self, proposal: &Proposal, agents: &Roster) -> BudgetReport {
        let lines = proposal
            .outflows()
            .into_iter()
            .map(|(payer, total)| BudgetLine {
                payer: payer.to_string(),
                total,
                budget: agents.get(payer).map(|a| a.payment_budget),
            })
            .collect();
        BudgetReport { lines }
    }
}

impl Default for BulletinBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// One payer's outgoing total versus its budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLine {
    /// Agent named as `from` in the side payments
    pub payer: String,
    /// Sum of every outgoing side payment
    pub total: f64,
    /// `None` when the payer is not a registered agent
    pub budget: Option<f64>,
}

impl BudgetLine {
    /// Check if the total fits the budget; unknown payers always fit
    pub fn within_budget(&self) -> bool {
        self.budget.map_or(true, |budget| self.total <= budget)
    }
}

/// Audit trail of a side-payment validation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BudgetReport {
    /// One line per payer, in payer order
    pub lines: Vec<BudgetLine>,
}

impl BudgetReport {
    /// Check if no payer exceeds its budget
    pub fn is_valid(&self) -> bool {
        self.lines.iter().all(BudgetLine::within_budget)
    }

    /// Lines whose payer exceeds its budget
    pub fn violations(&self) -> impl Iterator<Item = &BudgetLine> {
        self.lines.iter().filter(|line| !line.within_budget())
    }
}

impl fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return f.write_str("No side payments to validate");
        }
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match line.budget {
                Some(budget) if line.total > budget => write!(
                    f,
                    "{} exceeds payment budget: ${:.0} > ${:.0}",
                    line.payer, line.total, budget
                )?,
                Some(budget) => write!(
                    f,
                    "{} within budget: ${:.0} <= ${:.0}",
                    line.payer, line.total, budget
                )?,
                None => write!(f, "{} pays ${:.0} (no registered budget)", line.payer, line.total)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, SidePaymentOffer};
    use crate::test_support::{agent_with_budget, evaluation, proposer};

    fn offer(from: &str, to: &str, amount: AttrValue) -> SidePaymentOffer {
        SidePaymentOffer {
            from: from.into(),
            to: to.into(),
            amount,
            reason: String::new(),
        }
    }

    #[test]
    fn test_proposal_ids_are_dense() {
        let board = BulletinBoard::new();
        for expected in 0..5 {
            assert_eq!(board.proposal_count(), expected);
            let id = board.post_proposal("dev", ProposalDraft::default());
            assert_eq!(id, expected);
        }
        assert_eq!(board.latest_proposal().map(|p| p.id), Some(4));
    }

    #[test]
    fn test_latest_proposal_empty() {
        let board = BulletinBoard::new();
        assert!(board.latest_proposal().is_none());
    }

    #[test]
    fn test_proposal_records_current_round() {
        let board = BulletinBoard::new();
        board.post_proposal("dev", ProposalDraft::default());
        board.advance_round();
        board.advance_round();
        let id = board.post_proposal("dev", ProposalDraft::default());
        assert_eq!(board.proposal(0).map(|p| p.round), Some(0));
        assert_eq!(board.proposal(id).map(|p| p.round), Some(2));
    }

    #[test]
    fn test_side_payments_skip_bad_amounts_and_sum_routes() {
        let board = BulletinBoard::new();
        let draft = ProposalDraft {
            side_payments: vec![
                offer("alice", "bob", AttrValue::Number(100.0)),
                offer("alice", "bob", AttrValue::Text("$50".into())),
                offer("bob", "alice", AttrValue::Text("a lot".into())),
                offer("carol", "bob", AttrValue::Boolean(true)),
            ],
            ..Default::default()
        };
        let id = board.post_proposal("dev", draft);
        let proposal = board.proposal(id).unwrap();

        assert_eq!(proposal.side_payments.len(), 1);
        assert_eq!(
            proposal.side_payments.get(&PaymentRoute::new("alice", "bob")),
            Some(&150.0)
        );
    }

    #[test]
    fn test_evaluation_upsert() {
        let board = BulletinBoard::new();
        let id = board.post_proposal("dev", ProposalDraft::default());
        board.post_evaluation(evaluation("alice", id, 2));
        board.post_evaluation(evaluation("alice", id, 5));

        let evals = board.evaluations_for(id);
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].satisfaction_score, 5);
    }

    #[test]
    fn test_unanimous_requires_every_agent() {
        let board = BulletinBoard::new();
        let id = board.post_proposal("dev", ProposalDraft::default());
        assert!(!board.is_unanimous(id, &["alice"]));

        board.post_evaluation(evaluation("alice", id, 5));
        board.post_evaluation(evaluation("bob", id, 4));
        assert!(board.is_unanimous(id, &["alice", "bob"]));

        // carol never evaluated
        assert!(!board.is_unanimous(id, &["alice", "bob", "carol"]));

        board.post_evaluation(evaluation("bob", id, 3));
        assert!(!board.is_unanimous(id, &["alice", "bob"]));
        assert!(board.check_unanimous(id, &["alice", "bob"], 3));
    }

    #[test]
    fn test_feedback_flags_satisfaction() {
        let board = BulletinBoard::new();
        let id = board.post_proposal("dev", ProposalDraft::default());
        board.post_evaluation(evaluation("alice", id, 4));
        board.post_evaluation(evaluation("bob", id, 3));

        let feedback = board.feedback_for(id);
        assert_eq!(feedback.len(), 2);
        assert!(feedback.iter().find(|f| f.agent == "alice").unwrap().satisfied);
        assert!(!feedback.iter().find(|f| f.agent == "bob").unwrap().satisfied);
        assert!(board.feedback_for(id + 1).is_empty());
    }

    #[test]
    fn test_advance_round() {
        let board = BulletinBoard::new();
        assert_eq!(board.current_round(), 0);
        assert_eq!(board.advance_round(), 1);
        assert_eq!(board.advance_round(), 2);
    }

    #[test]
    fn test_validate_side_payments() {
        let board = BulletinBoard::new();
        let roster = Roster::new(
            proposer("dev"),
            vec![agent_with_budget("alice", 1000.0), agent_with_budget("bob", 0.0)],
        );

        let at_budget = board.post_proposal(
            "dev",
            ProposalDraft {
                side_payments: vec![
                    offer("alice", "bob", AttrValue::Number(600.0)),
                    offer("alice", "dev", AttrValue::Number(400.0)),
                ],
                ..Default::default()
            },
        );
        let report = board.validate_side_payments(&board.proposal(at_budget).unwrap(), &roster);
        assert!(report.is_valid());
        assert!(report.to_string().contains("alice within budget"));

        let over = board.post_proposal(
            "dev",
            ProposalDraft {
                side_payments: vec![
                    offer("alice", "bob", AttrValue::Number(600.0)),
                    offer("alice", "dev", AttrValue::Number(401.0)),
                    offer("bob", "alice", AttrValue::Number(10.0)),
                ],
                ..Default::default()
            },
        );
        let report = board.validate_side_payments(&board.proposal(over).unwrap(), &roster);
        assert!(!report.is_valid());
        let offenders: Vec<_> = report.violations().map(|l| l.payer.as_str()).collect();
        assert_eq!(offenders, vec!["alice", "bob"]);
    }

    #[test]
    fn test_non_positive_amounts_cannot_hide_overspend() {
        let board = BulletinBoard::new();
        let roster = Roster::new(
            proposer("dev"),
            vec![agent_with_budget("alice", 1000.0), agent_with_budget("carol", 0.0)],
        );
        let id = board.post_proposal(
            "dev",
            ProposalDraft {
                side_payments: vec![
                    offer("alice", "bob", AttrValue::Number(1500.0)),
                    offer("alice", "carol", AttrValue::Number(-600.0)),
                    offer("carol", "bob", AttrValue::Text("$0".into())),
                ],
                ..Default::default()
            },
        );
        let proposal = board.proposal(id).unwrap();

        assert_eq!(proposal.side_payments.len(), 1);
        assert_eq!(proposal.net_position("carol").net(), 0.0);
        assert_eq!(proposal.outflows().get("alice"), Some(&1500.0));

        let report = board.validate_side_payments(&proposal, &roster);
        assert!(!report.is_valid());
        assert!(report.to_string().contains("alice exceeds payment budget: $1500 > $1000"));
    }

    #[test]
    fn test_unregistered_payer_is_not_flagged() {
        let board = BulletinBoard::new();
        let roster = Roster::new(proposer("dev"), vec![]);
        let id = board.post_proposal(
            "dev",
            ProposalDraft {
                side_payments: vec![offer("city", "dev", AttrValue::Number(1e6))],
                ..Default::default()
            },
        );
        let report = board.validate_side_payments(&board.proposal(id).unwrap(), &roster);
        assert!(report.is_valid());
        assert_eq!(
            BudgetReport::default().to_string(),
            "No side payments to validate"
        );
    }
}

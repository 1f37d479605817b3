//! Agent implementation - one negotiating party

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::board::BulletinBoard;
use crate::error::{NegotiationError, Result};
use crate::history::ScoreHistory;
use crate::model::{Evaluation, Feedback, Preference, Proposal, ProposalDraft, SATISFACTION_THRESHOLD};
use crate::oracle::{JudgmentKind, JudgmentRequest, Oracle};
use crate::parse;
use crate::prompt;

/// Role an agent plays in the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Posts the opening arrangement and every revision
    Proposer,
    /// Any other party whose preferences must be met
    Stakeholder,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposer => f.write_str("proposer"),
            Self::Stakeholder => f.write_str("stakeholder"),
        }
    }
}

/// The proposer's verdict on whether another round can help
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuationJudgment {
    /// Whether another synthesis round is worth running
    pub should_continue: bool,
    /// Oracle reasoning, or the reason for a short-circuit
    pub rationale: String,
}

/// A single negotiating party
///
/// Agents hold no negotiation state of their own; everything they learn
/// and say goes through the [`BulletinBoard`].
pub struct Agent {
    /// Unique within a negotiation; used as the board key
    pub name: String,
    /// Proposer or stakeholder
    pub role: AgentRole,
    /// Private constraints, in the order the human gave them
    pub preferences: Vec<Preference>,
    /// Ceiling on outgoing side payments per round
    pub payment_budget: f64,
    oracle: Arc<dyn Oracle>,
}

impl Agent {
    /// Create an agent; a negative budget is clamped to zero
    pub fn new(
        name: impl Into<String>,
        role: AgentRole,
        preferences: Vec<Preference>,
        payment_budget: f64,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let name = name.into();
        debug!(agent = %name, %role, oracle = oracle.name(), "Creating agent");
        Self {
            name,
            role,
            preferences,
            payment_budget: payment_budget.max(0.0),
            oracle,
        }
    }

    /// Create the proposer; proposers never pay side payments
    pub fn proposer(
        name: impl Into<String>,
        preferences: Vec<Preference>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self::new(name, AgentRole::Proposer, preferences, 0.0, oracle)
    }

    /// Create a stakeholder with a monthly side-payment budget
    pub fn stakeholder(
        name: impl Into<String>,
        preferences: Vec<Preference>,
        payment_budget: f64,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self::new(name, AgentRole::Stakeholder, preferences, payment_budget, oracle)
    }

    /// Check if this agent drafts proposals
    pub fn is_proposer(&self) -> bool {
        self.role == AgentRole::Proposer
    }

    async fn ask(&self, kind: JudgmentKind, prompt: String) -> Result<String> {
        let response = self
            .oracle
            .judge(JudgmentRequest {
                kind,
                agent: self.name.clone(),
                prompt,
            })
            .await?;
        Ok(response.text)
    }

    fn require_proposer(&self) -> Result<()> {
        if self.is_proposer() {
            Ok(())
        } else {
            Err(NegotiationError::NotProposer(self.name.clone()))
        }
    }

    /// Judge a proposal against this agent's preferences and post the result.
    #[instrument(skip_all, fields(agent = %self.name, proposal_id = proposal.id))]
    pub async fn evaluate_proposal(
        &self,
        proposal: &Proposal,
        board: &BulletinBoard,
    ) -> Result<Evaluation> {
        let others: Vec<Evaluation> = board
            .evaluations_for(proposal.id)
            .into_iter()
            .filter(|e| e.agent_name != self.name)
            .collect();
        let request = prompt::evaluation(self, proposal, &proposal.net_position(&self.name), &others);

        let text = self.ask(JudgmentKind::Evaluation, request).await?;
        let fields = parse::evaluation(&text).map_err(|e| {
            warn!(error = %e, "Unparseable evaluation");
            NegotiationError::parse(&self.name, e)
        })?;

        // The proposer's prompt carries no bargaining section.
        let signals = if self.is_proposer() {
            parse::BargainingSignals::default()
        } else {
            fields.signals
        };

        let evaluation = Evaluation {
            agent_name: self.name.clone(),
            proposal_id: proposal.id,
            satisfaction_score: fields.score,
            explanation: fields.explanation,
            unsatisfied_preferences: fields.unsatisfied,
            suggested_changes: fields.suggested,
            created_at: Utc::now(),
            willing_to_accept_payment: signals.willing_to_accept,
            willing_to_pay: signals.willing_to_pay,
            payment_capacity_estimate: signals.capacity_estimate,
        };
        board.post_evaluation(evaluation.clone());

        debug!(score = evaluation.satisfaction_score, "Evaluated proposal");
        Ok(evaluation)
    }

    /// Draft a revised proposal from the public feedback on `current`.
    ///
    /// The draft is returned, not posted.
    #[instrument(skip_all, fields(agent = %self.name, proposal_id = current.id))]
    pub async fn synthesize_proposal(
        &self,
        current: &Proposal,
        all_agents: &[AgentHandle],
        board: &BulletinBoard,
    ) -> Result<ProposalDraft> {
        self.require_proposer()?;

        let feedback = board.feedback_for(current.id);
        let buckets = FeedbackBuckets::from_feedback(&feedback);
        let request = prompt::synthesis(self, current, &feedback, &buckets, all_agents);

        let text = self.ask(JudgmentKind::Synthesis, request).await?;
        let draft = parse::proposal(&text).map_err(|e| {
            warn!(error = %e, "Unparseable synthesized proposal");
            NegotiationError::parse(&self.name, e)
        })?;

        info!(
            modifications = draft.modifications.len(),
            side_payments = draft.side_payments.len(),
            total_cost = draft.total_cost,
            "Synthesized proposal"
        );
        Ok(draft)
    }

    /// Decide whether another synthesis round can still help.
    ///
    /// A judgment that cannot be parsed means continue.
    #[instrument(skip_all, fields(agent = %self.name, proposal_id = current.id))]
    pub async fn should_continue(
        &self,
        current: &Proposal,
        all_agents: &[AgentHandle],
        board: &BulletinBoard,
    ) -> Result<ContinuationJudgment> {
        self.require_proposer()?;

        let feedback = board.feedback_for(current.id);
        if feedback.is_empty() {
            return Ok(ContinuationJudgment {
                should_continue: true,
                rationale: "No feedback yet. Continuing negotiation.".into(),
            });
        }
        if feedback.iter().all(|f| f.satisfied) {
            return Ok(ContinuationJudgment {
                should_continue: false,
                rationale: "All agents satisfied. Negotiation complete.".into(),
            });
        }

        let history = ScoreHistory::from_board(board);
        let request = prompt::continuation(&feedback, &history, all_agents);
        let text = self.ask(JudgmentKind::Continuation, request).await?;

        match parse::continuation(&text) {
            Ok(fields) => Ok(ContinuationJudgment {
                should_continue: fields.should_continue,
                rationale: fields.rationale,
            }),
            Err(e) => {
                warn!(error = %e, "Unparseable continuation judgment, continuing");
                Ok(ContinuationJudgment {
                    should_continue: true,
                    rationale: "Could not parse continuation judgment. Continuing negotiation."
                        .into(),
                })
            }
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("preferences", &self.preferences)
            .field("payment_budget", &self.payment_budget)
            .field("oracle", &self.oracle.name())
            .finish()
    }
}

/// Feedback grouped the way synthesis needs it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackBuckets {
    /// Score >= 4: must not regress
    pub protect: Vec<String>,
    /// Score 3
    pub improve: Vec<String>,
    /// Score <= 2
    pub priority_fix: Vec<String>,
    /// Agents willing to pay, with their capacity estimate
    pub willing_to_pay: Vec<(String, String)>,
    /// Agents willing to accept payment to compromise
    pub willing_to_accept: Vec<String>,
    /// Agents that signalled neither willingness
    pub not_interested: Vec<String>,
}

impl FeedbackBuckets {
    /// Bucket feedback by score and bargaining signal
    pub fn from_feedback(feedback: &[Feedback]) -> Self {
        let mut buckets = Self::default();
        for fb in feedback {
            let agent = fb.agent.clone();
            match fb.score {
                s if s >= SATISFACTION_THRESHOLD => buckets.protect.push(agent.clone()),
                3 => buckets.improve.push(agent.clone()),
                _ => buckets.priority_fix.push(agent.clone()),
            }
            if fb.willing_to_pay {
                buckets
                    .willing_to_pay
                    .push((agent.clone(), fb.capacity_estimate.clone()));
            }
            if fb.willing_to_accept {
                buckets.willing_to_accept.push(agent.clone());
            }
            if !fb.willing_to_pay && !fb.willing_to_accept {
                buckets.not_interested.push(agent);
            }
        }
        buckets
    }

    /// Agents scoring below the satisfaction bar
    pub fn unsatisfied_count(&self) -> usize {
        self.improve.len() + self.priority_fix.len()
    }

    /// Close enough to unanimity that only surgical additions are safe
    pub fn near_unanimous(&self) -> bool {
        self.unsatisfied_count() <= 2
    }
}

/// Shared handle to an agent
#[derive(Clone, Debug)]
pub struct AgentHandle {
    inner: Arc<Agent>,
}

impl AgentHandle {
    /// Wrap an agent for sharing across tasks
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    /// Get the agent name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the agent role
    pub fn role(&self) -> AgentRole {
        self.inner.role
    }

    /// Get the underlying agent
    pub fn inner(&self) -> &Agent {
        &self.inner
    }
}

impl From<Agent> for AgentHandle {
    fn from(agent: Agent) -> Self {
        Self::new(agent)
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

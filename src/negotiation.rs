//! Negotiation driver - runs rounds until agreement, stop, or failure

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::agent::AgentHandle;
use crate::board::{BudgetReport, BulletinBoard};
use crate::channel::{NegotiationEvent, UpdateSink};
use crate::config::NegotiationConfig;
use crate::error::{NegotiationError, Result};
use crate::model::{Attributes, Evaluation, Proposal, ProposalDraft, SATISFACTION_THRESHOLD};
use crate::roster::Roster;

/// Largest round-over-round drop in average satisfaction that is tolerated
pub const REGRESSION_TOLERANCE: f64 = 0.2;

// Averages are means of small integers; keep an exact 0.2 drop on the safe side.
const REGRESSION_EPSILON: f64 = 1e-9;

/// Terminal state of a run, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    ParetoStop,
    AbortedRegression,
    AbortedBudget,
    Exhausted,
}

/// How a negotiation ended
#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    /// Every agent scored the proposal at or above the bar
    Success { proposal: Arc<Proposal>, rounds: u32 },
    /// The proposer judged further improvement impossible without harm
    ParetoStop {
        proposal: Arc<Proposal>,
        rounds: u32,
        rationale: String,
    },
    /// Average satisfaction fell by more than [`REGRESSION_TOLERANCE`]
    AbortedRegression { previous: f64, current: f64, rounds: u32 },
    /// A synthesized proposal asked some payer for more than its budget
    AbortedBudget {
        proposal: Arc<Proposal>,
        report: BudgetReport,
        rounds: u32,
    },
    /// Round budget ran out
    Exhausted { rounds: u32 },
}

impl NegotiationOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::ParetoStop { .. } => OutcomeKind::ParetoStop,
            Self::AbortedRegression { .. } => OutcomeKind::AbortedRegression,
            Self::AbortedBudget { .. } => OutcomeKind::AbortedBudget,
            Self::Exhausted { .. } => OutcomeKind::Exhausted,
        }
    }

    pub fn rounds(&self) -> u32 {
        match self {
            Self::Success { rounds, .. }
            | Self::ParetoStop { rounds, .. }
            | Self::AbortedRegression { rounds, .. }
            | Self::AbortedBudget { rounds, .. }
            | Self::Exhausted { rounds } => *rounds,
        }
    }

    /// The agreed proposal; `None` on every abort path
    pub fn proposal(&self) -> Option<&Arc<Proposal>> {
        match self {
            Self::Success { proposal, .. } | Self::ParetoStop { proposal, .. } => Some(proposal),
            _ => None,
        }
    }

    pub fn into_proposal(self) -> Option<Arc<Proposal>> {
        match self {
            Self::Success { proposal, .. } | Self::ParetoStop { proposal, .. } => Some(proposal),
            _ => None,
        }
    }

    pub fn is_agreement(&self) -> bool {
        self.proposal().is_some()
    }
}

/// One negotiation run over a shared board
pub struct Negotiation {
    id: Uuid,
    roster: Roster,
    board: Arc<BulletinBoard>,
    config: NegotiationConfig,
    opening_plan: Attributes,
    updates: UpdateSink,
}

impl Negotiation {
    pub fn new(proposer: AgentHandle, stakeholders: Vec<AgentHandle>, board: Arc<BulletinBoard>) -> Self {
        Self {
            id: Uuid::new_v4(),
            roster: Roster::new(proposer, stakeholders),
            board,
            config: NegotiationConfig::default(),
            opening_plan: Attributes::new(),
            updates: UpdateSink::disabled(),
        }
    }

    pub fn with_config(mut self, config: NegotiationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.config.max_rounds = max_rounds;
        self
    }

    /// Base plan of the opening proposal
    pub fn with_opening_plan(mut self, plan: Attributes) -> Self {
        self.opening_plan = plan;
        self
    }

    pub fn with_updates(mut self, updates: UpdateSink) -> Self {
        self.updates = updates;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn board(&self) -> &Arc<BulletinBoard> {
        &self.board
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Run to completion and return the agreed proposal, if any.
    pub async fn run(&self) -> Result<Option<Arc<Proposal>>> {
        Ok(self.run_to_outcome().await?.into_proposal())
    }

    /// Run to completion and report how the negotiation ended.
    ///
    /// Oracle and parse failures are returned as errors; every
    /// protocol-level ending is an `Ok` outcome.
    #[instrument(skip(self), fields(run_id = %self.id))]
    pub async fn run_to_outcome(&self) -> Result<NegotiationOutcome> {
        let problems = self.roster.problems();
        if !problems.is_empty() {
            return Err(NegotiationError::Config(problems.join("; ")));
        }

        let outcome = self.drive().await?;
        info!(outcome = ?outcome.kind(), rounds = outcome.rounds(), "Negotiation finished");
        self.updates.emit(NegotiationEvent::Finished {
            outcome: outcome.kind(),
            rounds: outcome.rounds(),
            proposal_id: outcome.proposal().map(|p| p.id),
        });
        Ok(outcome)
    }

    async fn drive(&self) -> Result<NegotiationOutcome> {
        let proposer = self.roster.proposer().clone();
        let all_agents = self.roster.all();

        let opening = ProposalDraft::opening(
            self.opening_plan.clone(),
            self.roster.stakeholders().iter().map(|a| a.name()),
        );
        let mut current = self.post(&proposer, opening)?;
        let mut previous_average = 0.0;

        for round in 1..=self.config.max_rounds {
            let board_round = self.board.advance_round();
            debug!(round, board_round, proposal_id = current.id, "Starting round");

            let evaluations = self.evaluate_round(&current, board_round).await?;
            let scores: BTreeMap<String, u8> = evaluations
                .iter()
                .map(|e| (e.agent_name.clone(), e.satisfaction_score))
                .collect();
            let average = mean(evaluations.iter().map(|e| e.satisfaction_score));

            info!(round, average, "Round evaluated");
            self.updates.emit(NegotiationEvent::RoundCompleted {
                round: board_round,
                proposal_id: current.id,
                average,
                scores,
            });

            if round > 1 && previous_average - average > REGRESSION_TOLERANCE + REGRESSION_EPSILON {
                warn!(previous = previous_average, current = average, "Satisfaction regressed");
                return Ok(NegotiationOutcome::AbortedRegression {
                    previous: previous_average,
                    current: average,
                    rounds: round,
                });
            }
            previous_average = average;

            if evaluations
                .iter()
                .all(|e| e.satisfaction_score >= SATISFACTION_THRESHOLD)
            {
                return Ok(NegotiationOutcome::Success {
                    proposal: current,
                    rounds: round,
                });
            }

            let judgment = proposer
                .should_continue(&current, &all_agents, &self.board)
                .await?;
            self.updates.emit(NegotiationEvent::ContinuationJudged {
                round: board_round,
                should_continue: judgment.should_continue,
                rationale: judgment.rationale.clone(),
            });
            if !judgment.should_continue {
                return Ok(NegotiationOutcome::ParetoStop {
                    proposal: current,
                    rounds: round,
                    rationale: judgment.rationale,
                });
            }

            let draft = proposer
                .synthesize_proposal(&current, &all_agents, &self.board)
                .await?;
            current = self.post(&proposer, draft)?;

            let report = self.board.validate_side_payments(&current, &self.roster);
            self.updates.emit(NegotiationEvent::SidePaymentsValidated {
                round: board_round,
                proposal_id: current.id,
                valid: report.is_valid(),
                report: report.to_string(),
            });
            if !report.is_valid() {
                warn!(report = %report, "Side payments exceed budget");
                return Ok(NegotiationOutcome::AbortedBudget {
                    proposal: current,
                    report,
                    rounds: round,
                });
            }
        }

        Ok(NegotiationOutcome::Exhausted {
            rounds: self.config.max_rounds,
        })
    }

    fn post(&self, author: &AgentHandle, draft: ProposalDraft) -> Result<Arc<Proposal>> {
        self.board.post_proposal(author.name(), draft);
        let proposal = self.board.latest_proposal().ok_or(NegotiationError::EmptyBoard)?;
        self.updates.emit(NegotiationEvent::ProposalPosted {
            round: proposal.round,
            proposal_id: proposal.id,
            author: proposal.author.clone(),
        });
        Ok(proposal)
    }

    /// Every agent evaluates `proposal` in parallel; returns once all have.
    ///
    /// Results come back stakeholders first, proposer last. The first
    /// failure aborts the remaining evaluations.
    async fn evaluate_round(&self, proposal: &Arc<Proposal>, round: u32) -> Result<Vec<Evaluation>> {
        let agents = self.roster.all();
        let mut tasks = JoinSet::new();

        for (slot, agent) in agents.iter().enumerate() {
            let agent = agent.clone();
            let proposal = Arc::clone(proposal);
            let board = Arc::clone(&self.board);
            let updates = self.updates.clone();
            tasks.spawn(async move {
                let evaluation = agent.evaluate_proposal(&proposal, &board).await?;
                updates.emit(NegotiationEvent::EvaluationPosted {
                    round,
                    proposal_id: proposal.id,
                    agent: evaluation.agent_name.clone(),
                    score: evaluation.satisfaction_score,
                    satisfied: evaluation.is_satisfied(),
                });
                Ok::<_, NegotiationError>((slot, evaluation))
            });
        }

        let mut results: Vec<Option<Evaluation>> = vec![None; agents.len()];
        while let Some(joined) = tasks.join_next().await {
            let (slot, evaluation) = joined.map_err(|e| NegotiationError::Worker(e.to_string()))??;
            results[slot] = Some(evaluation);
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| NegotiationError::Worker("evaluation result missing".into()))
    }
}

fn mean(scores: impl Iterator<Item = u8>) -> f64 {
    let (sum, count) = scores.fold((0u32, 0u32), |(sum, count), s| (sum + u32::from(s), count + 1));
    if count == 0 {
        0.0
    } else {
        f64::from(sum) / f64::from(count)
    }
}

/// Run a negotiation with default settings apart from the round budget.
pub async fn run(
    proposer: AgentHandle,
    stakeholders: Vec<AgentHandle>,
    board: Arc<BulletinBoard>,
    max_rounds: u32,
    on_update: Option<UpdateSink>,
) -> Result<Option<Arc<Proposal>>> {
    Negotiation::new(proposer, stakeholders, board)
        .with_max_rounds(max_rounds)
        .with_updates(on_update.unwrap_or_default())
        .run()
        .await
}

//! # Parley
//!
//! Decentralized multi-party negotiation over a shared bulletin board.
//!
//! One proposer and any number of stakeholders hold private preferences.
//! They never talk to each other directly: every proposal and every
//! evaluation is posted to an append-only board that all of them read.
//! Natural-language judgment (scoring, drafting) is delegated to an
//! external [`Oracle`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         NEGOTIATION DRIVER                         │
//! │   opening ─► evaluate ─► consensus? ─► continue? ─► synthesize     │
//! │                  ▲                                      │          │
//! │                  └──────────── validate budgets ◄───────┘          │
//! └───────────────────────────────┬───────────────────────────────────┘
//!                                 │ post / read
//!                                 ▼
//!                  ┌──────────────────────────────┐
//!                  │        BULLETIN BOARD         │
//!                  │  proposals · evaluations ·    │
//!                  │  round counter                │
//!                  └──────────────────────────────┘
//!                    ▲          ▲          ▲
//!             ┌──────┴───┐ ┌────┴─────┐ ┌──┴───────┐
//!             │ Proposer │ │ Stakeh.  │ │ Stakeh.  │ ... evaluate in parallel
//!             └──────┬───┘ └────┬─────┘ └──┬───────┘
//!                    └──────────┼──────────┘
//!                               ▼
//!                         ┌──────────┐
//!                         │  Oracle  │
//!                         └──────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Proposal**: an immutable arrangement with compensation and side payments
//! - **Evaluation**: one agent's 1-5 score of one proposal
//! - **Side payment**: a voluntary monthly transfer between two parties
//! - **Outcome**: success, Pareto stop, regression abort, budget abort, or exhaustion

pub mod agent;
pub mod board;
pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod negotiation;
pub mod oracle;
pub mod parse;
pub mod prompt;
pub mod roster;
pub mod scenario;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, AgentHandle, AgentRole, ContinuationJudgment};
pub use board::{BudgetReport, BulletinBoard};
pub use channel::{update_channel, NegotiationEvent, UpdateSink, UpdateStream};
pub use config::{NegotiationConfig, OracleConfig, Settings};
pub use error::{NegotiationError, OracleError, ParseError, Result};
pub use model::{
    AttrValue, Attributes, Evaluation, PaymentRoute, Preference, Proposal, ProposalDraft,
    ProposalId, SATISFACTION_THRESHOLD,
};
pub use negotiation::{run, Negotiation, NegotiationOutcome, OutcomeKind, REGRESSION_TOLERANCE};
pub use oracle::{ChatCompletionsOracle, JudgmentKind, JudgmentRequest, JudgmentResponse, Oracle};
pub use roster::Roster;

//! Negotiation error types

use thiserror::Error;

/// Failures talking to the judgment backend
#[derive(Debug, Error)]
pub enum OracleError {
    /// Backend answered with a non-success status
    #[error("Oracle returned HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// Request never completed
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered 2xx but the body was not usable
    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// A required field was absent or malformed in a judgment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Required tag <{0}> not found in response")]
    MissingField(String),

    #[error("Field <{field}> has unusable value {value:?}")]
    InvalidValue { field: String, value: String },
}

/// Errors that abort a negotiation run
///
/// Protocol-normal terminations (regression, budget violation, round
/// exhaustion) are not errors; see [`crate::NegotiationOutcome`].
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// Judgment call failed at the transport level
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Judgment came back without a required field
    #[error("Could not parse judgment for {agent}: {source}")]
    Parse {
        agent: String,
        #[source]
        source: ParseError,
    },

    /// Proposer-only operation called on a stakeholder
    #[error("Agent {0} is not the proposer")]
    NotProposer(String),

    /// Opening proposal could not be read back
    #[error("Bulletin board has no proposals")]
    EmptyBoard,

    /// An evaluation task panicked or was cancelled
    #[error("Evaluation worker failed: {0}")]
    Worker(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NegotiationError {
    pub(crate) fn parse(agent: &str, source: ParseError) -> Self {
        Self::Parse {
            agent: agent.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, NegotiationError>;

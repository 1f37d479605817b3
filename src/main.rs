//! Parley - run the bundled negotiation demo against a chat-completions oracle

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley::{
    scenario, update_channel, BulletinBoard, ChatCompletionsOracle, Negotiation, NegotiationEvent,
    NegotiationOutcome, Oracle, Settings,
};

/// Parley CLI
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Decentralized multi-party negotiation demo", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Evaluation rounds before giving up
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Oracle model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Log level
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "PARLEY_LOG_JSON")]
    json: bool,
}

fn log_event(event: &NegotiationEvent) {
    match event {
        NegotiationEvent::ProposalPosted { round, proposal_id, author } => {
            info!(round, proposal_id, %author, "Proposal posted");
        }
        NegotiationEvent::EvaluationPosted { agent, score, satisfied, .. } => {
            info!(%agent, score, satisfied, "Evaluation posted");
        }
        NegotiationEvent::RoundCompleted { round, average, .. } => {
            info!(round, average, "Round completed");
        }
        NegotiationEvent::ContinuationJudged { should_continue, rationale, .. } => {
            info!(should_continue, %rationale, "Continuation judged");
        }
        NegotiationEvent::SidePaymentsValidated { valid, report, .. } => {
            if *valid {
                info!("{report}");
            } else {
                warn!("{report}");
            }
        }
        NegotiationEvent::Finished { outcome, rounds, .. } => {
            info!(?outcome, rounds, "Finished");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration, then apply CLI overrides
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(max_rounds) = cli.max_rounds {
        settings.negotiation.max_rounds = max_rounds;
    }
    if let Some(model) = cli.model {
        settings.oracle.model = model;
    }
    settings.validate()?;

    let oracle: Arc<dyn Oracle> =
        Arc::new(ChatCompletionsOracle::new(settings.oracle.clone()).context("building oracle")?);
    let demo = scenario::public_health(Arc::clone(&oracle), oracle);

    let (sink, mut events) = update_channel();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
        }
    });

    let board = Arc::new(BulletinBoard::new());
    let negotiation = Negotiation::new(demo.proposer, demo.stakeholders, board)
        .with_config(settings.negotiation.clone())
        .with_opening_plan(demo.opening_plan)
        .with_updates(sink);
    info!(run_id = %negotiation.id(), model = %settings.oracle.model, "Starting negotiation");

    let outcome = negotiation.run_to_outcome().await;
    // Closing the sink lets the logger drain and exit.
    drop(negotiation);
    let _ = logger.await;

    match outcome? {
        NegotiationOutcome::Success { proposal, .. } | NegotiationOutcome::ParetoStop { proposal, .. } => {
            println!("{}", serde_json::to_string_pretty(proposal.as_ref())?);
        }
        other => println!("No agreement: {:?}", other.kind()),
    }
    Ok(())
}

//! Judgment request text
//!
//! Each builder renders the context an agent is allowed to see into a
//! prompt whose answer format matches what [`crate::parse`] reads back.

use std::fmt::Write;

use crate::agent::{Agent, AgentHandle, FeedbackBuckets};
use crate::history::ScoreHistory;
use crate::model::{Evaluation, Feedback, NetPosition, Preference, Proposal, SATISFACTION_THRESHOLD};

const SCORE_SCALE: &str = "\
Rate your satisfaction on a scale of 1-5:
5 = All requirements fully met, completely satisfied
4 = Core requirements met, only minor issues remain
3 = Significant requirements met, but notable gaps exist
2 = Some requirements addressed, many critical ones unmet
1 = Few or no requirements met";

pub fn money(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.0}", -amount)
    } else {
        format!("${amount:.0}")
    }
}

fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return format!("  {empty}");
    }
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn preferences(prefs: &[Preference]) -> String {
    prefs
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn status(score: u8) -> &'static str {
    match score {
        s if s >= SATISFACTION_THRESHOLD => "satisfied",
        3 => "partially satisfied",
        _ => "unsatisfied",
    }
}

/// Human-readable rendering of a proposal
pub fn format_proposal(proposal: &Proposal) -> String {
    let mut out = String::from("Base Plan:\n");
    for (key, value) in proposal.base_plan.iter() {
        let _ = writeln!(out, "  {key}: {value}");
    }

    if !proposal.modifications.is_empty() {
        out.push_str("\nModifications:\n");
        for m in &proposal.modifications {
            let kind = m.get("type").map(ToString::to_string).unwrap_or_else(|| "unknown".into());
            let _ = write!(out, "  - {kind}");
            if let Some(cost) = m.get("cost") {
                let cost = cost.as_number().map(money).unwrap_or_else(|| cost.to_string());
                let _ = write!(out, " ({cost})");
            }
            if let Some(benefit) = m.get("benefit") {
                let _ = write!(out, ": {benefit}");
            }
            out.push('\n');
        }
    }

    if !proposal.compensation.is_empty() {
        out.push_str("\nCompensation (proposer to stakeholders):\n");
        for (recipient, amount) in &proposal.compensation {
            let _ = writeln!(out, "  - {recipient}: {}", money(*amount));
        }
    }

    if !proposal.side_payments.is_empty() {
        out.push_str("\nSide Payments (agent to agent):\n");
        for (route, amount) in &proposal.side_payments {
            let _ = writeln!(out, "  - {route}: {}/month", money(*amount));
        }
    }

    if !proposal.commitments.is_empty() {
        out.push_str("\nCommitments:\n");
        for commitment in &proposal.commitments {
            let _ = writeln!(out, "  - {commitment}");
        }
    }

    let _ = write!(out, "\nTotal Cost: {}", money(proposal.total_cost));
    out
}

fn net_position_section(position: &NetPosition) -> String {
    if position.net() == 0.0 {
        return String::new();
    }
    let mut out = format!("\nNET FINANCIAL POSITION: {}/month", money(position.net()));
    if position.compensation > 0.0 {
        let _ = write!(out, "\n  From proposer: {}", money(position.compensation));
    }
    if position.received > 0.0 {
        let _ = write!(out, "\n  From other agents (side payments): {}", money(position.received));
    }
    if position.paid > 0.0 {
        let _ = write!(out, "\n  You pay to other agents: {}", money(position.paid));
    }
    out
}

fn others_section(others: &[Evaluation]) -> String {
    if others.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nOTHER AGENTS' EVALUATIONS:\n");
    for other in others {
        let score = other.satisfaction_score;
        let _ = writeln!(out, "- {}: {}/5 ({})", other.agent_name, score, status(score));
        if score < SATISFACTION_THRESHOLD && !other.suggested_changes.is_empty() {
            let top: Vec<&str> = other.suggested_changes.iter().take(2).map(String::as_str).collect();
            let _ = writeln!(out, "  Suggestions: {}", top.join(", "));
        }
    }
    out
}

/// Evaluation request for one agent
pub fn evaluation(
    agent: &Agent,
    proposal: &Proposal,
    position: &NetPosition,
    others: &[Evaluation],
) -> String {
    let prefs = preferences(&agent.preferences);
    let listing = format_proposal(proposal);

    if agent.is_proposer() {
        return format!(
            "You represent {name}, evaluating a proposal YOU created.

YOUR CONSTRAINTS (check ONLY these):
{prefs}

CURRENT PROPOSAL:
{listing}

Check only whether this proposal meets YOUR OWN constraints (budget, timeline,
project requirements). Other parties judge their own constraints.

{SCORE_SCALE}

Respond in this format:
<evaluation>
  <satisfaction_score>1-5</satisfaction_score>
  <explanation>which of your constraints are and are not met</explanation>
  <unsatisfied_preferences>
    <preference>constraint not met or only partially met</preference>
  </unsatisfied_preferences>
  <suggested_changes>
    <change>what would need to change (mention the score it would move you to)</change>
  </suggested_changes>
</evaluation>",
            name = agent.name,
        );
    }

    let budget = if agent.payment_budget > 0.0 {
        format!("{}/month", money(agent.payment_budget))
    } else {
        "no budget for payments (you can only receive, not pay)".to_string()
    };

    format!(
        "You represent {name}, evaluating a proposal.

YOUR SIDE PAYMENT BUDGET: {budget}

HUMAN'S STATED OUTCOMES (respect these exactly):
{prefs}

CURRENT PROPOSAL:
{listing}{net}{others}

SIDE PAYMENTS:
Conflicting preferences between parties can be resolved by voluntary
bilateral payments. If you are unsatisfied, consider whether paying another
party to accept your preferred outcome would leave you better off. If another
party is unsatisfied, consider whether accepting payment to compromise would
leave you better off. Both sides must be strictly better off than the status quo.

RULES:
1. Never question or redefine what the human wants.
2. Judge whether the proposal's METHODS achieve the human's OUTCOMES.
3. If unsatisfied, suggest concrete methods that would fix it.

{SCORE_SCALE}

Respond in this format:
<evaluation>
  <satisfaction_score>1-5</satisfaction_score>
  <explanation>your score, referencing the human's specific preferences</explanation>
  <unsatisfied_preferences>
    <preference>preference not met or only partially met</preference>
  </unsatisfied_preferences>
  <suggested_changes>
    <change>specific method to improve satisfaction (mention the score it would move you to)</change>
  </suggested_changes>
  <side_payment_interest>
    <willing_to_accept>true/false</willing_to_accept>
    <willing_to_pay>true/false</willing_to_pay>
    <payment_capacity_estimate>your maximum monthly payment and what for</payment_capacity_estimate>
  </side_payment_interest>
</evaluation>",
        name = agent.name,
        net = net_position_section(position),
        others = others_section(others),
    )
}

fn signals_section(buckets: &FeedbackBuckets) -> String {
    let mut out = String::from("BARGAINING SIGNALS:\n");
    if buckets.willing_to_pay.is_empty() && buckets.willing_to_accept.is_empty() {
        out.push_str("  (no agent has signalled interest in side payments)\n");
        return out;
    }
    if !buckets.willing_to_pay.is_empty() {
        out.push_str("Willing to PAY for preferred outcomes:\n");
        for (agent, estimate) in &buckets.willing_to_pay {
            let estimate = if estimate.is_empty() { "(amount not specified)" } else { estimate.as_str() };
            let _ = writeln!(out, "  - {agent}: {estimate}");
        }
    }
    if !buckets.willing_to_accept.is_empty() {
        out.push_str("Willing to ACCEPT payment to compromise:\n");
        for agent in &buckets.willing_to_accept {
            let _ = writeln!(out, "  - {agent}");
        }
    }
    out
}

fn conflict_section(feedback: &[Feedback]) -> String {
    let unsatisfied: Vec<&Feedback> = feedback.iter().filter(|f| !f.satisfied).collect();
    if unsatisfied.len() < 2 {
        return String::new();
    }
    let mut out = String::from("\nCONFLICTS BETWEEN UNSATISFIED AGENTS:\n");
    for fb in unsatisfied {
        let wants = fb.unsatisfied.first().map(String::as_str).unwrap_or("unclear");
        let _ = writeln!(out, "{}:\n  Wants: {wants}", fb.agent);
        if let Some(suggests) = fb.suggested.first() {
            let _ = writeln!(out, "  Suggests: {suggests}");
        }
    }
    out.push_str(
        "If agent A values outcome X more than agent B values its opposite, A can pay B to \
accept X and both end up better off. Express such trades as side_payments.\n",
    );
    out
}

/// Synthesis request for the proposer
pub fn synthesis(
    agent: &Agent,
    current: &Proposal,
    feedback: &[Feedback],
    buckets: &FeedbackBuckets,
    all_agents: &[AgentHandle],
) -> String {
    let average = if feedback.is_empty() {
        0.0
    } else {
        feedback.iter().map(|f| f64::from(f.score)).sum::<f64>() / feedback.len() as f64
    };

    let strategy = if buckets.near_unanimous() {
        format!(
            "STRATEGY: {satisfied}/{total} agents are already satisfied. Their outcomes are locked.
First check whether the remaining agents can be satisfied by side payments between
parties that signalled willingness. Only then add small, surgical modifications paid
for by proposer compensation. Never remove or reduce anything a satisfied agent relies on.",
            satisfied = buckets.protect.len(),
            total = feedback.len(),
        )
    } else {
        "STRATEGY: Start with side payments. Match unsatisfied agents with opposing
preferences: one willing to pay, one willing to accept. Only where no such trade
resolves a conflict, look for modifications that help several agents at once."
            .to_string()
    };

    let mut unsatisfied_feedback = String::new();
    for fb in feedback.iter().filter(|f| !f.satisfied) {
        let suggested: Vec<&str> = fb.suggested.iter().take(3).map(String::as_str).collect();
        let _ = write!(
            unsatisfied_feedback,
            "\n{}:\n  Unsatisfied: {}\n  Suggests: {}\n",
            fb.agent,
            fb.unsatisfied.join(", "),
            suggested.join(", "),
        );
    }

    let mut budgets = String::new();
    for other in all_agents {
        let _ = writeln!(budgets, "  - {}: {}/month", other.name, money(other.payment_budget));
    }

    format!(
        "You are synthesizing an improved proposal from PUBLIC feedback.

PROPOSER CONSTRAINTS:
{prefs}

CURRENT SATISFACTION (average {average:.1}/5):

HIGH (4-5/5) - DO NOT BREAK:
{protect}

MODERATE (3/5) - IMPROVE IF POSSIBLE:
{improve}

LOW (1-2/5) - PRIORITY FIXES:
{priority}

{signals}{conflicts}
SIDE PAYMENT BUDGETS (no payer may exceed its budget):
{budgets}
{strategy}

CURRENT PROPOSAL:
{listing}

FEEDBACK FROM UNSATISFIED AGENTS:
{unsatisfied_feedback}
Create a proposal that satisfies more agents without lowering any satisfied agent.
You may add physical modifications, operational commitments, design changes,
proposer compensation, and side payments between any two agents. Give every
agent at least the exact compensation amount it requires.

Respond in this format:
<improved_proposal>
  <base_plan>
    <attribute_name>value</attribute_name>
  </base_plan>
  <modifications>
    <modification>
      <type>type of modification</type>
      <cost>numeric cost</cost>
      <benefit>which agents this helps and how</benefit>
    </modification>
  </modifications>
  <compensation>
    <payment>
      <recipient>agent name</recipient>
      <amount>amount</amount>
    </payment>
  </compensation>
  <side_payments>
    <payment>
      <from>paying agent</from>
      <to>receiving agent</to>
      <amount>monthly amount</amount>
      <reason>why both sides are better off</reason>
    </payment>
  </side_payments>
  <commitments>
    <commitment>operational commitment</commitment>
  </commitments>
  <total_cost>total cost including compensation, excluding side payments</total_cost>
  <rationale>why this bundle satisfies more agents</rationale>
</improved_proposal>",
        prefs = preferences(&agent.preferences),
        protect = bullet_list(&buckets.protect, "(none yet)"),
        improve = bullet_list(&buckets.improve, "(none)"),
        priority = bullet_list(&buckets.priority_fix, "(none)"),
        signals = signals_section(buckets),
        conflicts = conflict_section(feedback),
        listing = format_proposal(current),
    )
}

/// Continuation request for the proposer
pub fn continuation(
    feedback: &[Feedback],
    history: &ScoreHistory,
    all_agents: &[AgentHandle],
) -> String {
    let average = feedback.iter().map(|f| f64::from(f.score)).sum::<f64>() / feedback.len().max(1) as f64;

    let mut satisfied = String::new();
    let mut unsatisfied = String::new();
    for fb in feedback {
        if fb.satisfied {
            let _ = writeln!(satisfied, "  {}: {}/5", fb.agent, fb.score);
        } else {
            let wants: Vec<&str> = fb.unsatisfied.iter().take(3).map(String::as_str).collect();
            let _ = writeln!(unsatisfied, "\n{} ({}/5):\n  Wants: {}", fb.agent, fb.score, wants.join(", "));
        }
    }
    if satisfied.is_empty() {
        satisfied.push_str("  (none yet)\n");
    }

    let mut trajectory = String::new();
    for (agent, entries) in history.iter() {
        let _ = writeln!(trajectory, "\n{agent}:");
        for entry in entries {
            let _ = writeln!(trajectory, "  Round {}: {}/5", entry.round, entry.score);
            if !entry.unsatisfied.is_empty() {
                let top: Vec<&str> = entry.unsatisfied.iter().take(3).map(String::as_str).collect();
                let _ = writeln!(trajectory, "    Unsatisfied: {}", top.join(", "));
            }
            if let Some(suggested) = entry.suggested.first() {
                let _ = writeln!(trajectory, "    Suggested: {suggested}");
            }
        }
    }

    let stalled: Vec<String> = history.stalled_agents(2).into_iter().map(String::from).collect();
    let settled: Vec<String> = history.settled_agents().into_iter().map(String::from).collect();
    let participants: Vec<&str> = all_agents.iter().map(|a| a.name()).collect();

    format!(
        "You are analyzing whether this negotiation can make further progress.

PARTICIPANTS: {participants}

CURRENT STATE:
Average satisfaction: {average:.1}/5

SATISFIED AGENTS (>=4/5):
{satisfied}
UNSATISFIED AGENTS (<4/5):
{unsatisfied}
HISTORICAL SATISFACTION PROGRESSION:
{trajectory}
OBSERVED PATTERNS:
Same score and same complaint on consecutive proposals:
{stalled}
Improved and stayed satisfied:
{settled}

Use the history to decide:
1. Are unsatisfied agents STUCK at the same score with the same complaint?
   That signals a structural incompatibility, not a missing solution.
2. Would satisfying them necessarily break agents who improved and stayed satisfied?
3. Has the negotiation reached a point where any improvement for one agent harms another?

Respond in this format:
<analysis>
  <should_continue>true or false</should_continue>
  <reasoning>which agents are stuck, which improved, and whether progress is still possible</reasoning>
  <recommendation>if stopping, why the current agreement is final; if continuing, what could work</recommendation>
</analysis>",
        participants = participants.join(", "),
        stalled = bullet_list(&stalled, "(none)"),
        settled = bullet_list(&settled, "(none)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BulletinBoard;
    use crate::model::{Attributes, AttrValue, ProposalDraft, SidePaymentOffer};
    use crate::test_support::evaluation;

    fn sample_proposal() -> std::sync::Arc<Proposal> {
        let board = BulletinBoard::new();
        let mut draft = ProposalDraft::opening(Attributes::new().with("stories", 2.0), ["alice"]);
        draft.modifications.push(
            Attributes::new()
                .with("type", "sound wall")
                .with("cost", 15000.0)
                .with("benefit", "quiet"),
        );
        draft.side_payments.push(SidePaymentOffer {
            from: "bob".into(),
            to: "alice".into(),
            amount: AttrValue::Number(200.0),
            reason: String::new(),
        });
        draft.commitments.push("No night work".into());
        draft.total_cost = 240000.0;
        board.post_proposal("dev", draft);
        board.latest_proposal().unwrap()
    }

    #[test]
    fn test_money() {
        assert_eq!(money(3000.0), "$3000");
        assert_eq!(money(-200.4), "-$200");
    }

    #[test]
    fn test_format_proposal() {
        let text = format_proposal(&sample_proposal());
        assert!(text.contains("stories: 2"));
        assert!(text.contains("sound wall ($15000): quiet"));
        assert!(text.contains("alice: $0"));
        assert!(text.contains("bob → alice: $200/month"));
        assert!(text.contains("No night work"));
        assert!(text.ends_with("Total Cost: $240000"));
    }

    #[test]
    fn test_conflict_section_needs_two_unsatisfied() {
        let one = vec![Feedback::from(&evaluation("a", 0, 2)), Feedback::from(&evaluation("b", 0, 5))];
        assert!(conflict_section(&one).is_empty());

        let two = vec![Feedback::from(&evaluation("a", 0, 2)), Feedback::from(&evaluation("b", 0, 3))];
        let section = conflict_section(&two);
        assert!(section.contains("a:"));
        assert!(section.contains("b:"));
    }

    #[test]
    fn test_continuation_lists_history() {
        let mut history = ScoreHistory::default();
        for round in 1..=2 {
            history.push(
                "alice",
                crate::history::HistoryEntry {
                    proposal_id: round - 1,
                    round,
                    score: 2,
                    unsatisfied: vec!["height".into()],
                    suggested: vec![],
                },
            );
        }
        let feedback = vec![Feedback::from(&evaluation("alice", 1, 2))];
        let text = continuation(&feedback, &history, &[]);
        assert!(text.contains("Round 1: 2/5"));
        assert!(text.contains("Round 2: 2/5"));
        assert!(text.contains("  - alice"));
    }
}

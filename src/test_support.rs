//! Helpers shared by unit tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::agent::{Agent, AgentHandle};
use crate::error::OracleError;
use crate::model::{Evaluation, ProposalId, SATISFACTION_THRESHOLD};
use crate::oracle::{JudgmentKind, JudgmentRequest, JudgmentResponse, Oracle};

type Script = dyn Fn(&JudgmentRequest, usize) -> Result<JudgmentResponse, OracleError> + Send + Sync;

/// Oracle that answers from a closure
///
/// The closure also receives how many earlier requests of the same kind
/// were made, so scripts can vary their answers by round.
pub struct ScriptedOracle {
    script: Box<Script>,
    calls: Mutex<HashMap<JudgmentKind, usize>>,
    prompts: Mutex<HashMap<JudgmentKind, String>>,
}

impl ScriptedOracle {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&JudgmentRequest, usize) -> Result<JudgmentResponse, OracleError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            prompts: Mutex::new(HashMap::new()),
        })
    }

    pub fn calls(&self, kind: JudgmentKind) -> usize {
        self.calls.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn last_prompt(&self, kind: JudgmentKind) -> Option<String> {
        self.prompts.lock().get(&kind).cloned()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn judge(&self, request: JudgmentRequest) -> Result<JudgmentResponse, OracleError> {
        let prior = {
            let mut calls = self.calls.lock();
            let count = calls.entry(request.kind).or_insert(0);
            let prior = *count;
            *count += 1;
            prior
        };
        self.prompts.lock().insert(request.kind, request.prompt.clone());
        (self.script)(&request, prior)
    }
}

pub fn evaluation(agent: &str, proposal_id: ProposalId, score: u8) -> Evaluation {
    let unsatisfied = if score < SATISFACTION_THRESHOLD {
        vec![format!("{agent} concern")]
    } else {
        Vec::new()
    };
    Evaluation {
        agent_name: agent.to_string(),
        proposal_id,
        satisfaction_score: score,
        explanation: format!("{agent} scored {score}"),
        unsatisfied_preferences: unsatisfied,
        suggested_changes: Vec::new(),
        created_at: Utc::now(),
        willing_to_accept_payment: false,
        willing_to_pay: false,
        payment_capacity_estimate: String::new(),
    }
}

pub fn evaluation_response(score: u8, explanation: &str, willing_to_accept: bool) -> JudgmentResponse {
    let unsatisfied = if score < SATISFACTION_THRESHOLD {
        "<preference>height</preference>"
    } else {
        ""
    };
    JudgmentResponse::new(format!(
        "<evaluation>\n\
         <satisfaction_score>{score}</satisfaction_score>\n\
         <explanation>{explanation}</explanation>\n\
         <unsatisfied_preferences>{unsatisfied}</unsatisfied_preferences>\n\
         <suggested_changes></suggested_changes>\n\
         <side_payment_interest>\n\
         <willing_to_accept>{willing_to_accept}</willing_to_accept>\n\
         <willing_to_pay>false</willing_to_pay>\n\
         <payment_capacity_estimate>none</payment_capacity_estimate>\n\
         </side_payment_interest>\n\
         </evaluation>"
    ))
}

/// Synthesized proposal with the given `(from, to, amount)` side payments
pub fn proposal_response(side_payments: &[(&str, &str, f64)]) -> JudgmentResponse {
    let payments: String = side_payments
        .iter()
        .map(|(from, to, amount)| {
            format!(
                "<payment><from>{from}</from><to>{to}</to><amount>{amount}</amount>\
                 <reason>trade</reason></payment>"
            )
        })
        .collect();
    JudgmentResponse::new(format!(
        "<proposal>\n\
         <base_plan><stories>2</stories></base_plan>\n\
         <modifications><modification><type>sound wall</type><cost>15000</cost>\
         <benefit>quiet</benefit></modification></modifications>\n\
         <compensation><payment><recipient>alice</recipient><amount>500</amount></payment></compensation>\n\
         <side_payments>{payments}</side_payments>\n\
         <commitment>No night work</commitment>\n\
         <total_cost>240000</total_cost>\n\
         <rationale>Lower the building</rationale>\n\
         </proposal>"
    ))
}

pub fn continuation_response(should_continue: bool) -> JudgmentResponse {
    JudgmentResponse::new(format!(
        "<should_continue>{should_continue}</should_continue>\n\
         <reasoning>Scores are stuck on the same complaints.</reasoning>\n\
         <recommendation>Try a smaller building.</recommendation>"
    ))
}

pub fn agent_with_budget(name: &str, budget: f64) -> AgentHandle {
    let oracle = ScriptedOracle::new(|_, _| Ok(JudgmentResponse::new("")));
    AgentHandle::new(Agent::stakeholder(name, Vec::new(), budget, oracle))
}

pub fn proposer(name: &str) -> AgentHandle {
    let oracle = ScriptedOracle::new(|_, _| Ok(JudgmentResponse::new("")));
    AgentHandle::new(Agent::proposer(name, Vec::new(), oracle))
}

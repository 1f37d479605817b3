//! Bundled demo: a public-health policy negotiation

use std::sync::Arc;

use crate::agent::{Agent, AgentHandle};
use crate::model::{AttrValue, Attributes, Preference};
use crate::oracle::Oracle;

/// The parties plus the opening plan they negotiate from
#[derive(Debug, Clone)]
pub struct Scenario {
    pub proposer: AgentHandle,
    pub stakeholders: Vec<AgentHandle>,
    pub opening_plan: Attributes,
}

/// Numeric values become thresholds; anything else is folded into the topic.
fn preference(topic: &str, value: impl Into<AttrValue>) -> Preference {
    match value.into() {
        AttrValue::Number(n) => Preference::new(topic, n),
        other => Preference::required(format!("{topic} = {other}")),
    }
}

fn stakeholder(
    name: &str,
    budget: f64,
    preferences: Vec<Preference>,
    oracle: &Arc<dyn Oracle>,
) -> AgentHandle {
    AgentHandle::new(Agent::stakeholder(name, preferences, budget, Arc::clone(oracle)))
}

/// One policy maker and five affected parties
///
/// The proposer and the stakeholders may use different oracles.
pub fn public_health(proposer_oracle: Arc<dyn Oracle>, stakeholder_oracle: Arc<dyn Oracle>) -> Scenario {
    let proposer = AgentHandle::new(Agent::proposer(
        "Policy_Maker",
        vec![
            preference("total_budget_under", 50_000_000.0),
            preference("case_rate_target_below", 50.0),
        ],
        proposer_oracle,
    ));

    let oracle = &stakeholder_oracle;
    let stakeholders = vec![
        stakeholder(
            "Business_Owner",
            15_000.0,
            vec![
                preference("max_capacity_reduction", 30.0),
                preference("mask_requirement_acceptance", "customers_only"),
                preference("air_filtration_investment_max", 5_000.0),
                preference("revenue_loss_tolerance", 20.0),
                preference("compensation_required_monthly", 10_000.0),
                preference("delivery_pivot_capability", true),
                preference("outdoor_space_available", false),
            ],
            oracle,
        ),
        stakeholder(
            "Healthcare_Worker",
            15_000.0,
            vec![
                preference("min_mask_compliance_rate", 80.0),
                preference("min_air_changes_per_hour", 6.0),
                preference("max_acceptable_case_rate", 20.0),
                preference("work_from_home_requirement", "hybrid"),
                preference("priority_medical_access", true),
            ],
            oracle,
        ),
        stakeholder(
            "Parent",
            3_000.0,
            vec![
                preference("school_format_preference", "in_person"),
                preference("child_mask_tolerance_hours", 4.0),
                preference("activity_restriction_acceptance", "moderate"),
                preference("childcare_subsidy_needed", 2_000.0),
                preference("testing_frequency_acceptable", "weekly"),
                preference("vaccine_requirement_support", false),
            ],
            oracle,
        ),
        stakeholder(
            "Essential_Worker",
            0.0,
            vec![
                preference("hazard_pay_minimum", 5.0),
                preference("ppe_provision_required", "full"),
                preference("sick_leave_days_needed", 14.0),
                preference("testing_provided_frequency", "twice_weekly"),
                preference("transport_subsidy_needed", 200.0),
                preference("shift_flexibility_needed", true),
            ],
            oracle,
        ),
        stakeholder(
            "Small_Landlord",
            8_000.0,
            vec![
                preference("rent_freeze_tolerance_months", 3.0),
                preference("eviction_moratorium_acceptance", false),
                preference("property_tax_relief_needed", 30.0),
                preference("maintenance_delay_acceptable", "emergency_only"),
                preference("tenant_support_contribution", 500.0),
                preference("commercial_tenant_flexibility", "moderate"),
            ],
            oracle,
        ),
    ];

    let opening_plan = Attributes::new()
        .with("type", "covid_policy")
        .with("mask_mandate", "none")
        .with("capacity_limits", "none")
        .with("business_restrictions", "none");

    Scenario {
        proposer,
        stakeholders,
        opening_plan,
    }
}

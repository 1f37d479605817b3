//! Records exchanged over the bulletin board

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Index of a proposal on the board
pub type ProposalId = usize;

/// Satisfaction bar shared by unanimity checks and feedback bucketing
pub const SATISFACTION_THRESHOLD: u8 = 4;

/// A single attribute value in a base plan or modification block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl AttrValue {
    /// Coerce raw tagged text, turning numeric-looking strings into numbers.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Boolean(false);
        }
        match parse_amount(trimmed) {
            Some(n) => Self::Number(n),
            None => Self::Text(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => parse_amount(s),
            Self::Boolean(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            // Beyond this the cast would saturate.
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Parse an amount such as `3000`, `$3,000` or `2500.50`.
pub(crate) fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Insertion-ordered attribute map
///
/// Serializes as a map; deserializing keeps the source's key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttrValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, AttrValue>> for Attributes {
    fn from(map: BTreeMap<String, AttrValue>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttributesVisitor;

        impl<'de> Visitor<'de> for AttributesVisitor {
            type Value = Attributes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of attribute values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Attributes, A::Error> {
                let mut attrs = Attributes::new();
                while let Some((key, value)) = map.next_entry::<String, AttrValue>()? {
                    attrs.insert(key, value);
                }
                Ok(attrs)
            }
        }

        deserializer.deserialize_map(AttributesVisitor)
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A private constraint held by one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub topic: String,
    /// `None` means required, with no numeric target
    pub threshold: Option<f64>,
}

impl Preference {
    pub fn new(topic: impl Into<String>, threshold: f64) -> Self {
        Self {
            topic: topic.into(),
            threshold: Some(threshold),
        }
    }

    pub fn required(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            threshold: None,
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.threshold {
            Some(t) => write!(f, "{}: {}", self.topic, AttrValue::Number(t)),
            None => write!(f, "{}: required", self.topic),
        }
    }
}

/// Ordered (payer, payee) key for a side payment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentRoute {
    pub payer: String,
    pub payee: String,
}

impl PaymentRoute {
    pub fn new(payer: impl Into<String>, payee: impl Into<String>) -> Self {
        Self {
            payer: payer.into(),
            payee: payee.into(),
        }
    }
}

impl fmt::Display for PaymentRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.payer, self.payee)
    }
}

/// A side payment as proposed, before the board validates its amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidePaymentOffer {
    pub from: String,
    pub to: String,
    pub amount: AttrValue,
    #[serde(default)]
    pub reason: String,
}

/// Loosely-typed proposal input handed to [`crate::BulletinBoard::post_proposal`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalDraft {
    pub base_plan: Attributes,
    pub modifications: Vec<Attributes>,
    pub compensation: BTreeMap<String, f64>,
    pub side_payments: Vec<SidePaymentOffer>,
    pub commitments: Vec<String>,
    pub total_cost: f64,
    pub rationale: String,
}

impl ProposalDraft {
    /// Zero-modification opening: every stakeholder starts at 0 compensation.
    pub fn opening<'a>(base_plan: Attributes, stakeholders: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            base_plan,
            compensation: stakeholders
                .into_iter()
                .map(|name| (name.to_string(), 0.0))
                .collect(),
            ..Default::default()
        }
    }
}

/// Immutable proposal as recorded on the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub author: String,
    pub round: u32,
    pub created_at: DateTime<Utc>,
    pub base_plan: Attributes,
    pub modifications: Vec<Attributes>,
    pub compensation: BTreeMap<String, f64>,
    #[serde(serialize_with = "serialize_side_payments")]
    pub side_payments: BTreeMap<PaymentRoute, f64>,
    pub commitments: Vec<String>,
    pub total_cost: f64,
    pub rationale: String,
}

fn serialize_side_payments<S: Serializer>(
    payments: &BTreeMap<PaymentRoute, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Flow<'a> {
        from: &'a str,
        to: &'a str,
        amount: f64,
    }
    serializer.collect_seq(payments.iter().map(|(route, amount)| Flow {
        from: &route.payer,
        to: &route.payee,
        amount: *amount,
    }))
}

impl Proposal {
    /// What `agent` gains or pays under this proposal
    pub fn net_position(&self, agent: &str) -> NetPosition {
        let compensation = self.compensation.get(agent).copied().unwrap_or(0.0);
        let mut received = 0.0;
        let mut paid = 0.0;
        for (route, amount) in &self.side_payments {
            if route.payee == agent {
                received += amount;
            }
            if route.payer == agent {
                paid += amount;
            }
        }
        NetPosition {
            compensation,
            received,
            paid,
        }
    }

    /// Total outgoing side payments per payer
    pub fn outflows(&self) -> BTreeMap<&str, f64> {
        let mut totals = BTreeMap::new();
        for (route, amount) in &self.side_payments {
            *totals.entry(route.payer.as_str()).or_insert(0.0) += amount;
        }
        totals
    }
}

/// Financial position of one agent under one proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetPosition {
    pub compensation: f64,
    pub received: f64,
    pub paid: f64,
}

impl NetPosition {
    pub fn net(&self) -> f64 {
        self.compensation + self.received - self.paid
    }
}

/// One agent's judgment of one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub agent_name: String,
    pub proposal_id: ProposalId,
    pub satisfaction_score: u8,
    pub explanation: String,
    pub unsatisfied_preferences: Vec<String>,
    pub suggested_changes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub willing_to_accept_payment: bool,
    #[serde(default)]
    pub willing_to_pay: bool,
    #[serde(default)]
    pub payment_capacity_estimate: String,
}

impl Evaluation {
    pub fn is_satisfied(&self) -> bool {
        self.satisfaction_score >= SATISFACTION_THRESHOLD
    }
}

/// Public summary of an evaluation, as read back by other agents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub agent: String,
    pub score: u8,
    pub satisfied: bool,
    pub unsatisfied: Vec<String>,
    pub suggested: Vec<String>,
    pub willing_to_accept: bool,
    pub willing_to_pay: bool,
    pub capacity_estimate: String,
}

impl From<&Evaluation> for Feedback {
    fn from(eval: &Evaluation) -> Self {
        Self {
            agent: eval.agent_name.clone(),
            score: eval.satisfaction_score,
            satisfied: eval.is_satisfied(),
            unsatisfied: eval.unsatisfied_preferences.clone(),
            suggested: eval.suggested_changes.clone(),
            willing_to_accept: eval.willing_to_accept_payment,
            willing_to_pay: eval.willing_to_pay,
            capacity_estimate: eval.payment_capacity_estimate.clone(),
        }
    }
}

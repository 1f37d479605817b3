//! Tolerant parser for tagged-section judgments
//!
//! Oracle responses are free text containing `<tag>value</tag>` sections.
//! Required fields surface [`ParseError`]; optional ones come back as
//! `Option` so callers can fall back to a default without an error path.

use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

use crate::error::ParseError;
use crate::model::{
    parse_amount, AttrValue, Attributes, ProposalDraft, SidePaymentOffer,
};

lazy_static! {
    static ref OPEN_TAG: Regex = Regex::new(r"<([A-Za-z_][A-Za-z0-9_\-]*)>").unwrap();
    /// Compiled `<tag>...</tag>` patterns, keyed by tag name
    static ref TAG_PATTERNS: RwLock<HashMap<String, Regex>> = RwLock::new(HashMap::new());
}

/// Parse result for one judgment
pub type Parsed<T> = std::result::Result<T, ParseError>;

fn tag_pattern(tag: &str) -> Regex {
    if let Some(pattern) = TAG_PATTERNS.read().get(tag) {
        return pattern.clone();
    }
    let escaped = regex::escape(tag);
    // Escaped tag names always form a valid pattern.
    let pattern = Regex::new(&format!(r"(?s)<{escaped}>(.*?)</{escaped}>")).unwrap();
    TAG_PATTERNS
        .write()
        .entry(tag.to_string())
        .or_insert(pattern)
        .clone()
}

/// First `<tag>` section, trimmed, if present
pub fn optional_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    tag_pattern(tag)
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// First `<tag>` section, or [`ParseError::MissingField`]
pub fn required_tag<'a>(text: &'a str, tag: &str) -> Parsed<&'a str> {
    optional_tag(text, tag).ok_or_else(|| ParseError::MissingField(tag.to_string()))
}

/// Every `<tag>` section in order, trimmed, empties dropped
pub fn tag_list<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    tag_pattern(tag)
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Direct child elements of a section as `(name, inner)` pairs
pub fn children(text: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(caps) = OPEN_TAG.captures_at(text, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let close = format!("</{}>", name.as_str());
        match text[whole.end()..].find(&close) {
            Some(offset) => {
                let inner_end = whole.end() + offset;
                out.push((name.as_str(), text[whole.end()..inner_end].trim()));
                pos = inner_end + close.len();
            }
            None => pos = whole.end(),
        }
    }
    out
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    let lowered = raw.trim().to_ascii_lowercase();
    // Answers often look like "true - I would accept".
    let head = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|s| !s.is_empty())?;
    match head {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn attributes(section: &str) -> Attributes {
    let mut attrs = Attributes::new();
    for (name, inner) in children(section) {
        attrs.insert(name, AttrValue::from_text(inner));
    }
    attrs
}

/// Fields of an evaluation judgment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationFields {
    pub score: u8,
    pub explanation: String,
    pub unsatisfied: Vec<String>,
    pub suggested: Vec<String>,
    pub signals: BargainingSignals,
}

/// Willingness to trade, as signalled by a stakeholder
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BargainingSignals {
    pub willing_to_accept: bool,
    pub willing_to_pay: bool,
    pub capacity_estimate: String,
}

pub fn evaluation(text: &str) -> Parsed<EvaluationFields> {
    let raw_score = required_tag(text, "satisfaction_score")?;
    let score = raw_score
        .parse::<u8>()
        .ok()
        .filter(|s| (1..=5).contains(s))
        .ok_or_else(|| ParseError::InvalidValue {
            field: "satisfaction_score".into(),
            value: raw_score.to_string(),
        })?;
    let explanation = required_tag(text, "explanation")?.to_string();

    let unsatisfied_section = optional_tag(text, "unsatisfied_preferences").unwrap_or(text);
    let suggested_section = optional_tag(text, "suggested_changes").unwrap_or(text);

    Ok(EvaluationFields {
        score,
        explanation,
        unsatisfied: owned(tag_list(unsatisfied_section, "preference")),
        suggested: owned(tag_list(suggested_section, "change")),
        signals: bargaining_signals(text),
    })
}

/// Optional bargaining section; anything missing or unreadable is a default.
pub fn bargaining_signals(text: &str) -> BargainingSignals {
    let Some(section) = optional_tag(text, "side_payment_interest") else {
        return BargainingSignals::default();
    };
    BargainingSignals {
        willing_to_accept: optional_tag(section, "willing_to_accept")
            .and_then(parse_bool)
            .unwrap_or(false),
        willing_to_pay: optional_tag(section, "willing_to_pay")
            .and_then(parse_bool)
            .unwrap_or(false),
        capacity_estimate: optional_tag(section, "payment_capacity_estimate")
            .unwrap_or_default()
            .to_string(),
    }
}

/// Parse a synthesized proposal. Only the base plan is required.
pub fn proposal(text: &str) -> Parsed<ProposalDraft> {
    let base_plan = attributes(required_tag(text, "base_plan")?);

    let modifications = optional_tag(text, "modifications")
        .map(|section| {
            tag_list(section, "modification")
                .into_iter()
                .map(attributes)
                .filter(|attrs| !attrs.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let compensation = optional_tag(text, "compensation")
        .map(|section| {
            tag_list(section, "payment")
                .into_iter()
                .filter_map(|block| {
                    let recipient = optional_tag(block, "recipient")?;
                    let amount = optional_tag(block, "amount").and_then(parse_amount)?;
                    Some((recipient.to_string(), amount))
                })
                .collect()
        })
        .unwrap_or_default();

    let side_payments = optional_tag(text, "side_payments")
        .map(|section| {
            tag_list(section, "payment")
                .into_iter()
                .filter_map(|block| {
                    let from = optional_tag(block, "from")?;
                    let to = optional_tag(block, "to")?;
                    let amount = optional_tag(block, "amount").and_then(parse_amount)?;
                    if amount <= 0.0 {
                        warn!(from, to, amount, "Dropping side payment with non-positive amount");
                        return None;
                    }
                    Some(SidePaymentOffer {
                        from: from.to_string(),
                        to: to.to_string(),
                        amount: AttrValue::Number(amount),
                        reason: optional_tag(block, "reason").unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ProposalDraft {
        base_plan,
        modifications,
        compensation,
        side_payments,
        commitments: owned(tag_list(text, "commitment")),
        total_cost: optional_tag(text, "total_cost")
            .and_then(parse_amount)
            .unwrap_or(0.0),
        rationale: optional_tag(text, "rationale").unwrap_or_default().to_string(),
    })
}

/// Continue/stop decision with its explanation
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationFields {
    pub should_continue: bool,
    pub rationale: String,
}

pub fn continuation(text: &str) -> Parsed<ContinuationFields> {
    let raw = required_tag(text, "should_continue")?;
    let should_continue = parse_bool(raw).ok_or_else(|| ParseError::InvalidValue {
        field: "should_continue".into(),
        value: raw.to_string(),
    })?;
    let reasoning = required_tag(text, "reasoning")?;
    let rationale = match optional_tag(text, "recommendation") {
        Some(rec) if !rec.is_empty() => format!("{reasoning}\n\n{rec}"),
        _ => reasoning.to_string(),
    };
    Ok(ContinuationFields {
        should_continue,
        rationale,
    })
}

fn owned(items: Vec<&str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVALUATION: &str = r#"
Here is my take.
<evaluation>
  <satisfaction_score> 3 </satisfaction_score>
  <explanation>Height is fine but compensation is short.</explanation>
  <unsatisfied_preferences>
    <preference>compensation_required_monthly</preference>
  </unsatisfied_preferences>
  <suggested_changes>
    <change>Raise compensation to $3,000</change>
    <change></change>
  </suggested_changes>
  <side_payment_interest>
    <willing_to_accept>true - happy to take payment</willing_to_accept>
    <willing_to_pay>maybe</willing_to_pay>
    <payment_capacity_estimate>Up to $500/month</payment_capacity_estimate>
  </side_payment_interest>
</evaluation>"#;

    #[test]
    fn test_required_and_optional_tags() {
        assert_eq!(required_tag("<a> x </a>", "a"), Ok("x"));
        assert_eq!(
            required_tag("<a>x</a>", "b"),
            Err(ParseError::MissingField("b".into()))
        );
        assert_eq!(optional_tag("<a>\nmulti\nline\n</a>", "a"), Some("multi\nline"));
    }

    #[test]
    fn test_children_skips_unclosed() {
        let kids = children("<type>housing</type><broken><stories>2</stories>");
        assert_eq!(kids, vec![("type", "housing"), ("stories", "2")]);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool(" false, never"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_evaluation_fields() {
        let fields = evaluation(EVALUATION).unwrap();
        assert_eq!(fields.score, 3);
        assert_eq!(fields.unsatisfied, vec!["compensation_required_monthly"]);
        assert_eq!(fields.suggested, vec!["Raise compensation to $3,000"]);
        assert!(fields.signals.willing_to_accept);
        assert!(!fields.signals.willing_to_pay);
        assert_eq!(fields.signals.capacity_estimate, "Up to $500/month");
    }

    #[test]
    fn test_evaluation_missing_required() {
        let err = evaluation("<satisfaction_score>4</satisfaction_score>").unwrap_err();
        assert_eq!(err, ParseError::MissingField("explanation".into()));

        let err = evaluation("<satisfaction_score>9</satisfaction_score><explanation>x</explanation>")
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { .. }));
    }

    #[test]
    fn test_evaluation_without_signals() {
        let fields =
            evaluation("<satisfaction_score>5</satisfaction_score><explanation>ok</explanation>")
                .unwrap();
        assert_eq!(fields.signals, BargainingSignals::default());
        assert!(fields.unsatisfied.is_empty());
    }

    #[test]
    fn test_proposal_fields() {
        let text = r#"
<improved_proposal>
  <base_plan><type>mixed_use</type><stories>2</stories><size_sqft>12,000</size_sqft></base_plan>
  <modifications>
    <modification><type>sound wall</type><cost>$15,000</cost><benefit>quiet</benefit></modification>
    <modification></modification>
  </modifications>
  <compensation>
    <payment><recipient>alice</recipient><amount>3000</amount></payment>
    <payment><recipient>bob</recipient><amount>TBD</amount></payment>
  </compensation>
  <side_payments>
    <payment><from>bob</from><to>alice</to><amount>200</amount><reason>swap</reason></payment>
    <payment><from>bob</from><amount>10</amount></payment>
  </side_payments>
  <commitments><commitment>No deliveries after 9pm</commitment></commitments>
  <total_cost>not sure</total_cost>
  <rationale>Keeps everyone whole.</rationale>
</improved_proposal>"#;
        let draft = proposal(text).unwrap();

        assert_eq!(draft.base_plan.get("stories"), Some(&AttrValue::Number(2.0)));
        assert_eq!(draft.base_plan.get("size_sqft"), Some(&AttrValue::Number(12000.0)));
        assert_eq!(draft.modifications.len(), 1);
        assert_eq!(
            draft.modifications[0].get("cost"),
            Some(&AttrValue::Number(15000.0))
        );
        assert_eq!(draft.compensation.len(), 1);
        assert_eq!(draft.compensation.get("alice"), Some(&3000.0));
        assert_eq!(draft.side_payments.len(), 1);
        assert_eq!(draft.side_payments[0].reason, "swap");
        assert_eq!(draft.commitments, vec!["No deliveries after 9pm"]);
        assert_eq!(draft.total_cost, 0.0);
        assert_eq!(draft.rationale, "Keeps everyone whole.");
    }

    #[test]
    fn test_proposal_drops_non_positive_side_payments() {
        let draft = proposal(
            "<base_plan><stories>2</stories></base_plan>
<side_payments>
  <payment><from>alice</from><to>bob</to><amount>1500</amount></payment>
  <payment><from>alice</from><to>carol</to><amount>-600</amount></payment>
  <payment><from>carol</from><to>bob</to><amount>$0</amount></payment>
</side_payments>",
        )
        .unwrap();

        assert_eq!(draft.side_payments.len(), 1);
        assert_eq!(draft.side_payments[0].to, "bob");
        assert_eq!(draft.side_payments[0].amount, AttrValue::Number(1500.0));
    }

    #[test]
    fn test_tag_patterns_are_compiled_once() {
        assert_eq!(optional_tag("<cached_tag>a</cached_tag>", "cached_tag"), Some("a"));
        assert!(TAG_PATTERNS.read().contains_key("cached_tag"));

        let first = tag_pattern("cached_tag");
        let second = tag_pattern("cached_tag");
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(optional_tag("<cached_tag> b </cached_tag>", "cached_tag"), Some("b"));
    }

    #[test]
    fn test_proposal_requires_base_plan() {
        assert_eq!(
            proposal("<rationale>none</rationale>").unwrap_err(),
            ParseError::MissingField("base_plan".into())
        );
    }

    #[test]
    fn test_continuation_fields() {
        let fields = continuation(
            "<should_continue>false</should_continue><reasoning>stuck</reasoning><recommendation>stop here</recommendation>",
        )
        .unwrap();
        assert!(!fields.should_continue);
        assert_eq!(fields.rationale, "stuck\n\nstop here");

        assert!(continuation("<should_continue>perhaps</should_continue><reasoning>x</reasoning>").is_err());
    }
}

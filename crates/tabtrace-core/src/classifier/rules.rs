//! Stage 1 — procedural rule pass
//!
//! Rules are evaluated in descending priority; the first whose condition
//! matches determines the stage's output. Conditions are pure: same visit,
//! same result, always.

use regex::Regex;

use crate::model::{ProceduralRule, RuleAction, RuleCondition, RuleField, Visit};

/// What Stage 1 contributes to the final arbitration step, or an immediate
/// decision that skips the rest of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    pub forced: Option<ForcedDecision>,
    pub prefer_type: Option<crate::model::Classification>,
    pub confidence_boost: f32,
}

#[derive(Debug, Clone, Copy)]
pub enum ForcedDecision {
    AlwaysProcess,
    NeverProcess,
}

/// Evaluate `rules` (already sorted by descending priority) against `visit`,
/// given the size of the visit's tab group.
pub fn evaluate(rules: &[ProceduralRule], visit: &Visit, tab_group_size: usize) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    for rule in rules {
        if !matches(&rule.condition, visit, tab_group_size) {
            continue;
        }
        match &rule.action {
            RuleAction::AlwaysProcess => {
                outcome.forced = Some(ForcedDecision::AlwaysProcess);
                return outcome;
            }
            RuleAction::NeverProcess => {
                outcome.forced = Some(ForcedDecision::NeverProcess);
                return outcome;
            }
            RuleAction::PreferType { page_type } => {
                if outcome.prefer_type.is_none() {
                    outcome.prefer_type = Some(*page_type);
                }
            }
            RuleAction::BoostConfidence { delta } => {
                outcome.confidence_boost += delta;
            }
        }
    }

    outcome
}

fn matches(condition: &RuleCondition, visit: &Visit, tab_group_size: usize) -> bool {
    match condition {
        RuleCondition::Equals { field, value } => {
            field_value(*field, visit, tab_group_size) == *value
        }
        RuleCondition::Contains { field, value } => {
            field_value(*field, visit, tab_group_size).contains(value.as_str())
        }
        RuleCondition::MatchesRegex { field, pattern } => Regex::new(pattern)
            .map(|re| re.is_match(&field_value(*field, visit, tab_group_size)))
            .unwrap_or(false),
        RuleCondition::InSet { field, values } => {
            let v = field_value(*field, visit, tab_group_size);
            values.iter().any(|candidate| candidate == &v)
        }
        RuleCondition::And { conditions } => conditions
            .iter()
            .all(|c| matches(c, visit, tab_group_size)),
        RuleCondition::Or { conditions } => conditions
            .iter()
            .any(|c| matches(c, visit, tab_group_size)),
        RuleCondition::Not { condition } => !matches(condition, visit, tab_group_size),
    }
}

fn field_value(field: RuleField, visit: &Visit, tab_group_size: usize) -> String {
    match field {
        RuleField::UrlHost => url_host(&visit.url),
        RuleField::UrlPath => url_path(&visit.url),
        RuleField::UrlQuery => url_query(&visit.url),
        RuleField::Title => visit.title.clone(),
        RuleField::ContentFirst2k => visit.raw_content.chars().take(2000).collect(),
        RuleField::TabGroupSize => tab_group_size.to_string(),
    }
}

fn strip_scheme(url: &str) -> &str {
    url.split("://").nth(1).unwrap_or(url)
}

fn url_host(url: &str) -> String {
    let rest = strip_scheme(url);
    let host_and_rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    host_and_rest.to_string()
}

fn url_path(url: &str) -> String {
    let rest = strip_scheme(url);
    match rest.find('/') {
        Some(idx) => rest[idx..].split(['?', '#']).next().unwrap_or("").to_string(),
        None => String::new(),
    }
}

fn url_query(url: &str) -> String {
    url.split_once('?')
        .map(|(_, q)| q.split('#').next().unwrap_or("").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Classification;
    use chrono::Utc;

    fn visit(url: &str) -> Visit {
        Visit {
            id: "v1".to_string(),
            url: url.to_string(),
            page_loaded_at: Utc::now(),
            tab_id: "tab1".to_string(),
            opener_tab_id: None,
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            raw_content: "hello world".to_string(),
            title: "Example Title".to_string(),
        }
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        assert_eq!(url_host("https://example.com/p?q=1"), "example.com");
    }

    #[test]
    fn never_process_short_circuits_remaining_rules() {
        let rules = vec![
            ProceduralRule {
                id: "r1".to_string(),
                priority: 100,
                condition: RuleCondition::Equals {
                    field: RuleField::UrlHost,
                    value: "example.com".to_string(),
                },
                action: RuleAction::NeverProcess,
            },
            ProceduralRule {
                id: "r2".to_string(),
                priority: 1,
                condition: RuleCondition::Equals {
                    field: RuleField::UrlHost,
                    value: "example.com".to_string(),
                },
                action: RuleAction::AlwaysProcess,
            },
        ];
        let outcome = evaluate(&rules, &visit("https://example.com/p"), 1);
        assert!(matches!(outcome.forced, Some(ForcedDecision::NeverProcess)));
    }

    #[test]
    fn prefer_type_and_boost_confidence_accumulate() {
        let rules = vec![
            ProceduralRule {
                id: "r1".to_string(),
                priority: 10,
                condition: RuleCondition::Contains {
                    field: RuleField::Title,
                    value: "Example".to_string(),
                },
                action: RuleAction::PreferType {
                    page_type: Classification::Leisure,
                },
            },
            ProceduralRule {
                id: "r2".to_string(),
                priority: 5,
                condition: RuleCondition::Contains {
                    field: RuleField::ContentFirst2k,
                    value: "hello".to_string(),
                },
                action: RuleAction::BoostConfidence { delta: 0.1 },
            },
        ];
        let outcome = evaluate(&rules, &visit("https://example.com/p"), 1);
        assert_eq!(outcome.prefer_type, Some(Classification::Leisure));
        assert!((outcome.confidence_boost - 0.1).abs() < 1e-6);
    }
}

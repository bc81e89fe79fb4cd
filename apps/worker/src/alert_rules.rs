use std::path::Path;

use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId};
use custodian_domain::{AccessAction, AlertRule, AlertRuleKind, OutcomeKind};

/// Loads rules from a JSON array file, or the built-in set when no path is
/// configured.
pub fn load_alert_rules(path: Option<&Path>, system_principal: PrincipalId) -> AppResult<Vec<AlertRule>> {
    let Some(path) = path else {
        return default_alert_rules(system_principal);
    };

    let contents = std::fs::read_to_string(path).map_err(|error| {
        AppError::Validation(format!(
            "failed to read alert rules from '{}': {error}",
            path.display()
        ))
    })?;
    parse_alert_rules(contents.as_str())
}

pub fn parse_alert_rules(contents: &str) -> AppResult<Vec<AlertRule>> {
    let rules: Vec<AlertRule> = serde_json::from_str(contents)
        .map_err(|error| AppError::Validation(format!("invalid alert rules: {error}")))?;
    if rules.is_empty() {
        return Err(AppError::Validation(
            "alert rules file must define at least one rule".to_owned(),
        ));
    }

    for rule in &rules {
        rule.validate()?;
    }

    Ok(rules)
}

/// Denied bursts, bulk export, deletion outside the service identity and
/// volume spikes over a principal's own baseline.
pub fn default_alert_rules(system_principal: PrincipalId) -> AppResult<Vec<AlertRule>> {
    Ok(vec![
        AlertRule::new(
            NonEmptyString::new("repeated-denials")?,
            AlertRuleKind::OutcomeBurst {
                outcome: OutcomeKind::Denied,
            },
            5,
            300,
        )?,
        AlertRule::new(
            NonEmptyString::new("bulk-export")?,
            AlertRuleKind::ActionBurst {
                action: AccessAction::PhiExport,
            },
            20,
            600,
        )?,
        AlertRule::new(
            NonEmptyString::new("delete-outside-service-identity")?,
            AlertRuleKind::ActionOutsideIdentity {
                action: AccessAction::PhiDelete,
                allowed_principal: system_principal,
            },
            1,
            60,
        )?,
        AlertRule::new(
            NonEmptyString::new("volume-above-baseline")?,
            AlertRuleKind::VolumeAboveBaseline {
                multiplier_percent: 400,
                min_events: 50,
            },
            1,
            3_600,
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use custodian_core::{AppError, PrincipalId};
    use custodian_domain::{AccessAction, AlertRuleKind};

    use super::{default_alert_rules, load_alert_rules, parse_alert_rules};

    #[test]
    fn rules_file_uses_tagged_kinds() {
        let rules = match parse_alert_rules(
            r#"[
                {"name": "bulk-export", "type": "action_burst", "action": "phi-export",
                 "threshold": 3, "window_seconds": 60},
                {"name": "denials", "type": "outcome_burst", "outcome": "denied",
                 "threshold": 2, "window_seconds": 30}
            ]"#,
        ) {
            Ok(rules) => rules,
            Err(error) => panic!("rules rejected: {error}"),
        };

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name(), "bulk-export");
        assert_eq!(
            rules[0].kind(),
            &AlertRuleKind::ActionBurst {
                action: AccessAction::PhiExport
            }
        );
        assert_eq!(rules[1].threshold(), 2);
    }

    #[test]
    fn zero_threshold_in_file_is_rejected() {
        let result = parse_alert_rules(
            r#"[{"name": "noisy", "type": "outcome_burst", "outcome": "failure",
                 "threshold": 0, "window_seconds": 30}]"#,
        );

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn empty_rules_file_is_rejected() {
        assert!(matches!(
            parse_alert_rules("[]"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn missing_path_falls_back_to_defaults_bound_to_the_service_identity() {
        let system_principal = PrincipalId::new();

        let rules = match load_alert_rules(None, system_principal) {
            Ok(rules) => rules,
            Err(error) => panic!("defaults rejected: {error}"),
        };

        assert_eq!(rules.len(), 4);
        assert!(rules.iter().any(|rule| matches!(
            rule.kind(),
            AlertRuleKind::ActionOutsideIdentity { allowed_principal, .. }
                if *allowed_principal == system_principal
        )));
        match default_alert_rules(system_principal) {
            Ok(defaults) => assert_eq!(defaults, rules),
            Err(error) => panic!("defaults rejected: {error}"),
        }
    }
}

//! Alerting monitor over the hot audit tier.
//!
//! Polls records after a cursor and evaluates declarative rules per
//! principal using record time, so lag behind writers never changes which
//! alerts fire. Writers never wait on the monitor.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodian_core::{AppResult, PrincipalId};
use custodian_domain::{AccessAlert, AlertRule, AlertRuleKind, AuditRecord};
use serde::Serialize;

use crate::{AlertEvent, AlertNotifier, AuditLogStore};

/// Number of past windows that make up a volume baseline.
const BASELINE_WINDOWS: i32 = 8;

/// Counters for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Records evaluated.
    pub records: usize,
    /// Alerts raised.
    pub alerts: usize,
    /// Cursor after the poll.
    pub cursor: Option<u64>,
}

#[derive(Debug, Default)]
struct RuleWindow {
    events: VecDeque<DateTime<Utc>>,
    quiet_until: Option<DateTime<Utc>>,
}

/// Polling subscriber that raises access alerts.
pub struct AlertMonitor {
    store: Arc<dyn AuditLogStore>,
    notifier: Arc<dyn AlertNotifier>,
    rules: Vec<AlertRule>,
    cursor: Option<u64>,
    windows: HashMap<(usize, PrincipalId), RuleWindow>,
}

impl AlertMonitor {
    /// Creates a monitor that starts after `start_cursor`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AuditLogStore>,
        notifier: Arc<dyn AlertNotifier>,
        rules: Vec<AlertRule>,
        start_cursor: Option<u64>,
    ) -> Self {
        Self {
            store,
            notifier,
            rules,
            cursor: start_cursor,
            windows: HashMap::new(),
        }
    }

    /// Returns the last evaluated record id.
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Evaluates up to `limit` new records.
    pub async fn poll(&mut self, limit: usize) -> AppResult<PollReport> {
        let records = self.store.list_hot_after(self.cursor, limit).await?;
        let mut report = PollReport {
            records: records.len(),
            ..PollReport::default()
        };

        for record in &records {
            for alert in self.observe(record) {
                report.alerts += 1;
                tracing::warn!(
                    rule = %alert.rule,
                    principal_id = %alert.principal_id,
                    event_count = alert.event_count,
                    trigger_record_id = alert.trigger_record_id,
                    "access alert raised"
                );
                if let Err(error) = self.notifier.notify(AlertEvent::Access(alert)).await {
                    tracing::error!(error = %error, "failed to deliver access alert");
                }
            }
            self.cursor = Some(record.record_id());
        }

        if let Some(last) = records.last() {
            self.evict_idle(last.recorded_at());
        }

        report.cursor = self.cursor;
        Ok(report)
    }

    fn observe(&mut self, record: &AuditRecord) -> Vec<AccessAlert> {
        let principal_id = record.entry().principal_id();
        let mut alerts = Vec::new();

        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.matches(record) {
                continue;
            }
            let window = self.windows.entry((index, principal_id)).or_default();
            if let Some(alert) = evaluate(rule, window, record) {
                alerts.push(alert);
            }
        }

        alerts
    }

    /// Drops windows with no retained events and no running quiet period.
    fn evict_idle(&mut self, now: DateTime<Utc>) {
        let rules = &self.rules;
        self.windows.retain(|(index, _), window| {
            let Some(rule) = rules.get(*index) else {
                return false;
            };
            let retain_after = now - retained_span(rule);
            window.events.back().is_some_and(|last| *last > retain_after)
                || window.quiet_until.is_some_and(|until| now < until)
        });
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

fn retained_span(rule: &AlertRule) -> chrono::Duration {
    match rule.kind() {
        AlertRuleKind::VolumeAboveBaseline { .. } => rule.window() * (BASELINE_WINDOWS + 1),
        _ => rule.window(),
    }
}

fn evaluate(rule: &AlertRule, window: &mut RuleWindow, record: &AuditRecord) -> Option<AccessAlert> {
    let at = record.recorded_at();
    let span = rule.window();
    let retain_after = at - retained_span(rule);
    while window
        .events
        .front()
        .is_some_and(|first| *first <= retain_after)
    {
        window.events.pop_front();
    }
    window.events.push_back(at);

    if window.quiet_until.is_some_and(|until| at < until) {
        return None;
    }

    let window_from = at - span;
    let current = window.events.iter().filter(|event| **event > window_from).count();
    let current = u32::try_from(current).unwrap_or(u32::MAX);

    let fires = match rule.kind() {
        AlertRuleKind::VolumeAboveBaseline {
            multiplier_percent,
            min_events,
        } => {
            let history = u32::try_from(window.events.len())
                .unwrap_or(u32::MAX)
                .saturating_sub(current);
            current >= rule.threshold()
                && current >= *min_events
                && u64::from(current) * 100 * u64::from(BASELINE_WINDOWS.unsigned_abs())
                    > u64::from(history) * u64::from(*multiplier_percent)
        }
        _ => current >= rule.threshold(),
    };
    if !fires {
        return None;
    }

    // Every delete outside the service identity is reported on its own.
    if !matches!(rule.kind(), AlertRuleKind::ActionOutsideIdentity { .. }) {
        window.quiet_until = Some(at + span);
    }
    let window_start = window
        .events
        .iter()
        .find(|event| **event > window_from)
        .copied()
        .unwrap_or(at);

    Some(AccessAlert {
        rule: rule.name().to_owned(),
        principal_id: record.entry().principal_id(),
        event_count: current,
        window_start,
        trigger_record_id: record.record_id(),
        resource: record.entry().resource().clone(),
    })
}

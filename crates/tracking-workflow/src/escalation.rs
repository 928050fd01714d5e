//! 升级评估
//!
//! 比较当前时间与每条记录的升级计划，按级别发出升级告警

use chrono::{DateTime, Utc};
use tracing::warn;
use tracking_core::{
    schedule_is_well_formed, AccountabilityRecord, EscalationAlert, EscalationLevel,
};

/// 评估一批记录，返回本次应发出的告警
///
/// 每条记录的 `last_escalated_level` 会被推进；同一 `now` 重复调用不会重复发出告警。
pub fn evaluate(records: &mut [AccountabilityRecord], now: DateTime<Utc>) -> Vec<EscalationAlert> {
    records
        .iter_mut()
        .filter_map(|record| evaluate_record(record, now))
        .collect()
}

/// 评估单条记录
pub fn evaluate_record(
    record: &mut AccountabilityRecord,
    now: DateTime<Utc>,
) -> Option<EscalationAlert> {
    let level = due_level(record, now)?;
    let alert = build_alert(record, &level, now);
    record.last_escalated_level = level.level;
    Some(alert)
}

/// 当前应触发的最高级别（不修改记录）
///
/// 只考虑已到期且高于 `last_escalated_level` 的级别；升级计划不合法的记录被跳过。
pub fn due_level(record: &AccountabilityRecord, now: DateTime<Utc>) -> Option<EscalationLevel> {
    if !record.status.is_open() {
        return None;
    }

    if !schedule_is_well_formed(&record.escalation_levels) {
        warn!(
            "Skipping record {} with malformed escalation schedule",
            record.record_ref()
        );
        return None;
    }

    let elapsed = record.elapsed_minutes(now);
    record
        .escalation_levels
        .iter()
        .filter(|level| {
            level.offset_minutes <= elapsed && level.level > record.last_escalated_level
        })
        .max_by_key(|level| level.level)
        .copied()
}

/// 构造告警
pub fn build_alert(
    record: &AccountabilityRecord,
    level: &EscalationLevel,
    now: DateTime<Utc>,
) -> EscalationAlert {
    let elapsed = record.elapsed_minutes(now);
    let overdue = elapsed > record.time_limit_minutes;

    if overdue {
        warn!(
            "Record {} is past its {} minute deadline ({} minutes elapsed)",
            record.record_ref(),
            record.time_limit_minutes,
            elapsed
        );
    }

    EscalationAlert {
        record_ref: record.record_ref(),
        result_id: record.result_id.clone(),
        patient_id: record.patient_id.clone(),
        priority: record.priority,
        level: level.level,
        action: level.action,
        triggered_at: now,
        minutes_overdue: elapsed - level.offset_minutes,
        overdue,
    }
}

/// 已超过时限且仍未解决的记录
pub fn overdue_records(
    records: &[AccountabilityRecord],
    now: DateTime<Utc>,
) -> Vec<&AccountabilityRecord> {
    records.iter().filter(|record| record.is_overdue(now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use tracking_core::{
        ActionKind, ActorContext, EscalationAction, Priority, RecordStatus, ResultKind,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn critical_record() -> AccountabilityRecord {
        AccountabilityRecord {
            id: Some("task-1".to_string()),
            result_id: "obs-1".to_string(),
            resource_kind: ResultKind::Observation,
            patient_id: "p1".to_string(),
            created_at: t0(),
            effective_time: None,
            actor_context: ActorContext::default(),
            required_actions: [ActionKind::Acknowledge].into_iter().collect(),
            completed_actions: BTreeSet::new(),
            status: RecordStatus::PendingReview,
            priority: Priority::Critical,
            time_limit_minutes: 30,
            escalation_levels: vec![
                EscalationLevel::new(1, 15, EscalationAction::Reminder),
                EscalationLevel::new(2, 30, EscalationAction::SupervisorNotification),
            ],
            last_escalated_level: 0,
            resolved_at: None,
            cancel_reason: None,
        }
    }

    #[test]
    fn test_two_step_escalation() {
        let mut records = vec![critical_record()];

        let alerts = evaluate(&mut records, t0() + Duration::minutes(16));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 1);
        assert_eq!(alerts[0].action, EscalationAction::Reminder);
        assert_eq!(alerts[0].minutes_overdue, 1);
        assert!(!alerts[0].overdue);
        assert_eq!(records[0].last_escalated_level, 1);

        let alerts = evaluate(&mut records, t0() + Duration::minutes(31));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 2);
        assert_eq!(alerts[0].action, EscalationAction::SupervisorNotification);
        assert!(alerts[0].overdue);
        assert_eq!(records[0].last_escalated_level, 2);
    }

    #[test]
    fn test_same_now_is_idempotent() {
        let mut records = vec![critical_record()];
        let now = t0() + Duration::minutes(20);

        assert_eq!(evaluate(&mut records, now).len(), 1);
        assert!(evaluate(&mut records, now).is_empty());
    }

    #[test]
    fn test_level_non_decreasing() {
        let mut records = vec![critical_record()];
        let mut previous = 0;
        for minutes in [0, 5, 15, 15, 29, 30, 45, 120] {
            evaluate(&mut records, t0() + Duration::minutes(minutes));
            assert!(records[0].last_escalated_level >= previous);
            previous = records[0].last_escalated_level;
        }
        assert_eq!(previous, 2);
    }

    #[test]
    fn test_late_evaluation_fires_highest_level_once() {
        let mut records = vec![critical_record()];
        let alerts = evaluate(&mut records, t0() + Duration::minutes(45));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 2);
        assert_eq!(alerts[0].minutes_overdue, 15);
        assert!(evaluate(&mut records, t0() + Duration::minutes(500)).is_empty());
    }

    #[test]
    fn test_closed_and_early_records_are_quiet() {
        let mut resolved = critical_record();
        resolved.status = RecordStatus::Resolved;
        let mut cancelled = critical_record();
        cancelled.status = RecordStatus::Cancelled;
        let fresh = critical_record();

        let mut records = vec![resolved, cancelled, fresh];
        assert!(evaluate(&mut records, t0() + Duration::minutes(10)).is_empty());

        let alerts = evaluate(&mut records, t0() + Duration::minutes(60));
        assert_eq!(alerts.len(), 1);
        assert_eq!(records[0].last_escalated_level, 0);
    }

    #[test]
    fn test_malformed_schedule_skipped() {
        let mut broken = critical_record();
        broken.escalation_levels.clear();
        let mut records = vec![broken, critical_record()];

        let alerts = evaluate(&mut records, t0() + Duration::minutes(16));
        assert_eq!(alerts.len(), 1);
        assert_eq!(records[0].last_escalated_level, 0);
        assert_eq!(records[1].last_escalated_level, 1);
    }

    #[test]
    fn test_in_progress_keeps_escalating() {
        let mut partial = critical_record();
        partial.status = RecordStatus::InProgress;
        let mut records = vec![partial];

        assert_eq!(evaluate(&mut records, t0() + Duration::minutes(16)).len(), 1);
    }

    #[test]
    fn test_overdue_records() {
        let mut resolved = critical_record();
        resolved.status = RecordStatus::Resolved;
        let records = vec![critical_record(), resolved];

        assert!(overdue_records(&records, t0() + Duration::minutes(30)).is_empty());
        assert_eq!(overdue_records(&records, t0() + Duration::minutes(31)).len(), 1);
    }
}

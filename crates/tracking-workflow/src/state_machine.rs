//! 追踪记录状态机
//!
//! 管理责任追踪记录的状态转换

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracking_core::{AccountabilityRecord, ActionKind, RecordStatus, Result, TrackingError};

/// 记录状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    StartReview,
    Resolve,
    Cancel,
    Reopen,
}

/// 记录状态机
#[derive(Debug)]
pub struct RecordStateMachine {
    transitions: HashMap<(RecordStatus, RecordEvent), RecordStatus>,
}

impl RecordStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert(
            (RecordStatus::PendingReview, RecordEvent::StartReview),
            RecordStatus::InProgress,
        );
        transitions.insert(
            (RecordStatus::PendingReview, RecordEvent::Resolve),
            RecordStatus::Resolved,
        );
        transitions.insert(
            (RecordStatus::InProgress, RecordEvent::Resolve),
            RecordStatus::Resolved,
        );
        transitions.insert(
            (RecordStatus::PendingReview, RecordEvent::Cancel),
            RecordStatus::Cancelled,
        );
        transitions.insert(
            (RecordStatus::InProgress, RecordEvent::Cancel),
            RecordStatus::Cancelled,
        );
        transitions.insert((RecordStatus::Resolved, RecordEvent::Reopen), RecordStatus::InProgress);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: RecordStatus, event: RecordEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: RecordStatus, event: RecordEvent) -> Result<RecordStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| TrackingError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 记录一个已完成的动作，并推进状态
    ///
    /// 首个动作使记录进入处理中；全部必需动作完成后记录被解决。
    pub fn complete_action(
        &self,
        record: &mut AccountabilityRecord,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<RecordStatus> {
        if !record.status.is_open() {
            return Err(TrackingError::InvalidStateTransition {
                from: format!("{:?}", record.status),
                event: format!("Complete({:?})", action),
            });
        }

        record.completed_actions.insert(action);

        if record.status == RecordStatus::PendingReview && !record.all_actions_completed() {
            record.status = self.transition(record.status, RecordEvent::StartReview)?;
        }

        if record.all_actions_completed() {
            record.status = self.transition(record.status, RecordEvent::Resolve)?;
            record.resolved_at = Some(now);
            tracing::info!("Accountability record for result {} resolved", record.result_id);
        }

        Ok(record.status)
    }

    /// 撤销一个已完成的动作，已解决的记录重新打开
    pub fn retract_action(
        &self,
        record: &mut AccountabilityRecord,
        action: ActionKind,
    ) -> Result<RecordStatus> {
        if !record.completed_actions.remove(&action) {
            return Ok(record.status);
        }

        if record.status == RecordStatus::Resolved && !record.all_actions_completed() {
            record.status = self.transition(record.status, RecordEvent::Reopen)?;
            record.resolved_at = None;
        }

        Ok(record.status)
    }

    /// 显式取消记录
    pub fn cancel(&self, record: &mut AccountabilityRecord, reason: &str) -> Result<RecordStatus> {
        record.status = self.transition(record.status, RecordEvent::Cancel)?;
        record.cancel_reason = Some(reason.to_string());
        Ok(record.status)
    }
}

impl Default for RecordStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tracking_core::{ActorContext, Priority, ResultKind};

    fn record(required: &[ActionKind]) -> AccountabilityRecord {
        AccountabilityRecord {
            id: Some("t-1".to_string()),
            result_id: "obs-1".to_string(),
            resource_kind: ResultKind::Observation,
            patient_id: "p1".to_string(),
            created_at: Utc::now(),
            effective_time: None,
            actor_context: ActorContext::default(),
            required_actions: required.iter().copied().collect(),
            completed_actions: BTreeSet::new(),
            status: RecordStatus::PendingReview,
            priority: Priority::High,
            time_limit_minutes: 60,
            escalation_levels: Vec::new(),
            last_escalated_level: 0,
            resolved_at: None,
            cancel_reason: None,
        }
    }

    #[test]
    fn test_valid_transitions() {
        let sm = RecordStateMachine::new();

        assert!(sm.can_transition(RecordStatus::PendingReview, RecordEvent::StartReview));
        assert!(sm.can_transition(RecordStatus::InProgress, RecordEvent::Resolve));
        assert!(sm.can_transition(RecordStatus::Resolved, RecordEvent::Reopen));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = RecordStateMachine::new();

        assert!(!sm.can_transition(RecordStatus::Resolved, RecordEvent::Cancel));
        assert!(!sm.can_transition(RecordStatus::Cancelled, RecordEvent::StartReview));
        assert!(sm.transition(RecordStatus::Cancelled, RecordEvent::Reopen).is_err());
    }

    #[test]
    fn test_partial_then_full_completion() {
        let sm = RecordStateMachine::new();
        let mut rec = record(&[ActionKind::Acknowledge, ActionKind::Review]);

        let status = sm.complete_action(&mut rec, ActionKind::Acknowledge, Utc::now()).unwrap();
        assert_eq!(status, RecordStatus::InProgress);
        assert!(rec.resolved_at.is_none());

        let status = sm.complete_action(&mut rec, ActionKind::Review, Utc::now()).unwrap();
        assert_eq!(status, RecordStatus::Resolved);
        assert!(rec.resolved_at.is_some());

        // 已解决的记录不能再完成动作
        assert!(sm.complete_action(&mut rec, ActionKind::Document, Utc::now()).is_err());
    }

    #[test]
    fn test_single_action_resolves_directly() {
        let sm = RecordStateMachine::new();
        let mut rec = record(&[ActionKind::Review]);

        let status = sm.complete_action(&mut rec, ActionKind::Review, Utc::now()).unwrap();
        assert_eq!(status, RecordStatus::Resolved);
    }

    #[test]
    fn test_retract_reopens() {
        let sm = RecordStateMachine::new();
        let mut rec = record(&[ActionKind::Review]);
        sm.complete_action(&mut rec, ActionKind::Review, Utc::now()).unwrap();

        let status = sm.retract_action(&mut rec, ActionKind::Review).unwrap();
        assert_eq!(status, RecordStatus::InProgress);
        assert!(rec.resolved_at.is_none());
    }

    #[test]
    fn test_cancel() {
        let sm = RecordStateMachine::new();
        let mut rec = record(&[ActionKind::Review]);

        let status = sm.cancel(&mut rec, "duplicate result").unwrap();
        assert_eq!(status, RecordStatus::Cancelled);
        assert_eq!(rec.cancel_reason.as_deref(), Some("duplicate result"));
        assert!(sm.cancel(&mut rec, "again").is_err());
    }
}

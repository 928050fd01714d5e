//! 责任追踪
//!
//! 为新结果建立追踪记录：附加优先级、必需动作、时限与升级计划并持久化

use crate::classifier::classify_result;
use crate::resolver::ProviderResolver;
use crate::rules::RuleTable;
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracking_core::{
    AccountabilityRecord, Priority, PriorityRule, RecordStatus, Result, ResultRecord,
    TrackingError,
};

/// 责任追踪器
pub struct AccountabilityTracker {
    resolver: Arc<ProviderResolver>,
    store: Arc<dyn RecordStore>,
    rules: RwLock<RuleTable>,
}

impl std::fmt::Debug for AccountabilityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountabilityTracker")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl AccountabilityTracker {
    pub fn new(
        resolver: Arc<ProviderResolver>,
        store: Arc<dyn RecordStore>,
        rules: RuleTable,
    ) -> Self {
        Self {
            resolver,
            store,
            rules: RwLock::new(rules),
        }
    }

    /// 为结果建立追踪记录
    pub async fn track(
        &self,
        result: &ResultRecord,
        order_ref: Option<&str>,
    ) -> Result<AccountabilityRecord> {
        self.track_at(result, order_ref, Utc::now()).await
    }

    /// 以指定创建时间建立追踪记录
    pub async fn track_at(
        &self,
        result: &ResultRecord,
        order_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AccountabilityRecord> {
        // 1. 参与者上下文（解析失败降级为占位参与者）
        let actor_context = self.resolver.extract_actor_context(result, order_ref).await;

        // 2. 优先级分类
        let priority = classify_result(result);

        // 3. 复制规则（按值），之后修改规则表不影响已签发记录
        let rule = self.rule(priority).await;

        let mut record = AccountabilityRecord {
            id: None,
            result_id: result.id.clone(),
            resource_kind: result.kind,
            patient_id: result.patient_id(),
            created_at: now,
            effective_time: result.effective_time,
            actor_context,
            required_actions: rule.required_actions,
            completed_actions: BTreeSet::new(),
            status: RecordStatus::PendingReview,
            priority,
            time_limit_minutes: rule.time_limit_minutes,
            escalation_levels: rule.escalation_levels,
            last_escalated_level: 0,
            resolved_at: None,
            cancel_reason: None,
        };

        // 4. 持久化
        let record_id = self.store.persist(&record).await.map_err(|e| match e {
            TrackingError::Persistence(_) => e,
            other => TrackingError::Persistence(other.to_string()),
        })?;
        record.id = Some(record_id);

        tracing::info!(
            "Tracking {} {} for patient {} as {} (deadline {})",
            record.resource_kind.as_str(),
            record.result_id,
            record.patient_id,
            priority.as_str(),
            record.deadline()
        );

        Ok(record)
    }

    /// 当前规则（副本）
    pub async fn rule(&self, priority: Priority) -> PriorityRule {
        self.rules.read().await.rule(priority).clone()
    }

    /// 替换规则
    pub async fn set_rule(&self, priority: Priority, rule: PriorityRule) -> Result<()> {
        self.rules.write().await.set_rule(priority, rule)
    }
}

//! 责任追踪引擎
//!
//! 协调解析、追踪、升级评估和结果聚合的核心引擎

use crate::{
    aggregator::{ProviderInvolvement, ProviderResultAggregator, ProviderResultsMode},
    escalation,
    resolver::ProviderResolver,
    rules::RuleTable,
    source::ClinicalDataSource,
    state_machine::RecordStateMachine,
    store::RecordStore,
    tracker::AccountabilityTracker,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracking_core::{
    AccountabilityRecord, ActionKind, Actor, ActorContext, EscalationAlert, Priority,
    PriorityRule, RecordStatus, Result, ResultRecord,
};

/// 责任追踪引擎
///
/// 每个进程/服务生命周期内构造一次，持有唯一的参与者缓存。
#[derive(Debug)]
pub struct AccountabilityEngine {
    source: Arc<dyn ClinicalDataSource>,
    store: Arc<dyn RecordStore>,
    resolver: Arc<ProviderResolver>,
    tracker: AccountabilityTracker,
    aggregator: ProviderResultAggregator,
    state_machine: RecordStateMachine,
}

impl AccountabilityEngine {
    /// 使用默认规则表创建引擎
    pub fn new(source: Arc<dyn ClinicalDataSource>, store: Arc<dyn RecordStore>) -> Self {
        Self::with_rules(source, store, RuleTable::default())
    }

    /// 使用指定规则表创建引擎
    pub fn with_rules(
        source: Arc<dyn ClinicalDataSource>,
        store: Arc<dyn RecordStore>,
        rules: RuleTable,
    ) -> Self {
        let resolver = Arc::new(ProviderResolver::new(source.clone()));
        let tracker = AccountabilityTracker::new(resolver.clone(), store.clone(), rules);
        let aggregator = ProviderResultAggregator::new(source.clone(), resolver.clone());

        Self {
            source,
            store,
            resolver,
            tracker,
            aggregator,
            state_machine: RecordStateMachine::new(),
        }
    }

    /// 为结果建立追踪记录
    pub async fn track(
        &self,
        result: &ResultRecord,
        order_ref: Option<&str>,
    ) -> Result<AccountabilityRecord> {
        self.tracker.track(result, order_ref).await
    }

    /// 按ID读取结果并建立追踪记录
    pub async fn track_result(
        &self,
        result_id: &str,
        order_ref: Option<&str>,
    ) -> Result<AccountabilityRecord> {
        let result = self.source.read_result(result_id).await?;
        self.tracker.track(&result, order_ref).await
    }

    /// 评估给定记录（纯内存，不写入存储）
    pub fn evaluate(
        &self,
        records: &mut [AccountabilityRecord],
        now: DateTime<Utc>,
    ) -> Vec<EscalationAlert> {
        escalation::evaluate(records, now)
    }

    /// 扫描存储中的待处理记录并发出升级告警
    ///
    /// 每个告警在发出前都以比较并交换的方式推进存储中的级别，
    /// 并发扫描时只有一方能发出同一级别的告警。
    pub async fn sweep(
        &self,
        patient_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationAlert>> {
        let records = self.store.list_pending(patient_id).await?;

        let candidates: Vec<(String, u32, EscalationAlert)> = records
            .iter()
            .filter_map(|record| {
                let record_id = record.id.clone()?;
                let level = escalation::due_level(record, now)?;
                let alert = escalation::build_alert(record, &level, now);
                Some((record_id, record.last_escalated_level, alert))
            })
            .collect();

        let claims = candidates.into_iter().map(|(record_id, expected, alert)| async move {
            match self
                .store
                .compare_and_set_escalation(&record_id, expected, alert.level)
                .await
            {
                Ok(true) => Some(alert),
                Ok(false) => {
                    tracing::debug!(
                        "Escalation of {} to level {} already claimed",
                        record_id,
                        alert.level
                    );
                    None
                }
                Err(e) => {
                    tracing::error!("Failed to advance escalation for {}: {}", record_id, e);
                    None
                }
            }
        });
        let outcomes = join_all(claims).await;

        let alerts: Vec<EscalationAlert> = outcomes.into_iter().flatten().collect();
        for alert in &alerts {
            tracing::warn!(
                "Escalation level {} ({:?}) for {} [{}], {} minutes past trigger{}",
                alert.level,
                alert.action,
                alert.record_ref,
                alert.priority.as_str(),
                alert.minutes_overdue,
                if alert.overdue { ", OVERDUE" } else { "" }
            );
        }

        Ok(alerts)
    }

    /// 记录动作完成
    pub async fn complete_action(
        &self,
        record_id: &str,
        action: ActionKind,
    ) -> Result<AccountabilityRecord> {
        let mut record = self.store.get(record_id).await?;
        self.state_machine.complete_action(&mut record, action, Utc::now())?;
        self.store.update(&record).await?;

        tracing::info!(
            "Action {:?} completed on record {} (status {:?})",
            action,
            record_id,
            record.status
        );
        Ok(record)
    }

    /// 撤销动作
    pub async fn retract_action(
        &self,
        record_id: &str,
        action: ActionKind,
    ) -> Result<AccountabilityRecord> {
        let mut record = self.store.get(record_id).await?;
        self.state_machine.retract_action(&mut record, action)?;
        self.store.update(&record).await?;
        Ok(record)
    }

    /// 取消追踪记录
    pub async fn cancel(&self, record_id: &str, reason: &str) -> Result<AccountabilityRecord> {
        let mut record = self.store.get(record_id).await?;
        self.state_machine.cancel(&mut record, reason)?;
        self.store.update(&record).await?;

        tracing::info!("Record {} cancelled: {}", record_id, reason);
        Ok(record)
    }

    /// 已超时的待处理记录
    pub async fn overdue(
        &self,
        patient_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountabilityRecord>> {
        let records = self.store.list_pending(patient_id).await?;
        Ok(escalation::overdue_records(&records, now)
            .into_iter()
            .cloned()
            .collect())
    }

    /// 查询医生相关的结果
    pub async fn provider_results(
        &self,
        patient_id: &str,
        provider_ref: &str,
        mode: ProviderResultsMode,
    ) -> Result<Vec<ResultRecord>> {
        self.aggregator
            .get_provider_results(patient_id, provider_ref, mode)
            .await
    }

    /// 统计参与患者诊疗的医生/组织
    pub async fn patient_providers(&self, patient_id: &str) -> Result<Vec<ProviderInvolvement>> {
        self.aggregator.get_patient_providers(patient_id).await
    }

    /// 解析参与者
    pub async fn resolve_actor(&self, reference: &str) -> Actor {
        self.resolver.resolve_actor(reference).await
    }

    /// 提取结果的参与者上下文
    pub async fn extract_actor_context(
        &self,
        result: &ResultRecord,
        order_ref: Option<&str>,
    ) -> ActorContext {
        self.resolver.extract_actor_context(result, order_ref).await
    }

    /// 清空参与者缓存
    pub async fn clear_cache(&self) {
        self.resolver.clear_cache().await
    }

    /// 替换某一优先级的规则
    pub async fn set_rule(&self, priority: Priority, rule: PriorityRule) -> Result<()> {
        self.tracker.set_rule(priority, rule).await
    }

    /// 获取追踪概览
    pub async fn overview(&self, now: DateTime<Utc>) -> Result<TrackingOverview> {
        let records = self.store.list_pending(None).await?;

        let mut overview = TrackingOverview {
            pending_review: 0,
            in_progress: 0,
            overdue: 0,
            by_priority: HashMap::new(),
        };

        for record in &records {
            match record.status {
                RecordStatus::PendingReview => overview.pending_review += 1,
                RecordStatus::InProgress => overview.in_progress += 1,
                _ => {}
            }
            if record.is_overdue(now) {
                overview.overdue += 1;
            }
            *overview.by_priority.entry(record.priority).or_insert(0) += 1;
        }

        Ok(overview)
    }

    /// 获取解析器实例
    pub fn resolver(&self) -> &Arc<ProviderResolver> {
        &self.resolver
    }

    /// 获取存储实例
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}

/// 追踪概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingOverview {
    pub pending_review: usize,
    pub in_progress: usize,
    pub overdue: usize,
    pub by_priority: HashMap<Priority, usize>,
}

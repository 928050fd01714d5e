//! 核心数据模型定义

use crate::reference::{Reference, ReferenceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 占位参与者的显示名称
pub const UNKNOWN_PROVIDER: &str = "Unknown Provider";

/// 被追踪结果的资源类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Observation,      // 检验/观察
    DiagnosticReport, // 诊断报告
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Observation => "Observation",
            ResultKind::DiagnosticReport => "DiagnosticReport",
        }
    }
}

/// 数值结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

/// 参考范围（上下限可缺省）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl ReferenceRange {
    /// 数值是否落在范围之外
    pub fn excludes(&self, value: f64) -> bool {
        self.low.map_or(false, |low| value < low) || self.high.map_or(false, |high| value > high)
    }
}

/// 临床结果记录（只读，来自上游临床数据存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub kind: ResultKind,
    pub subject_ref: String,
    pub effective_time: Option<DateTime<Utc>>,
    pub interpretation_codes: Vec<String>,
    pub order_ref: Option<String>,
    pub performer_refs: Vec<String>,
    pub reporter_ref: Option<String>,
    pub value: Option<Quantity>,
    pub reference_range: Option<ReferenceRange>,
    pub display: Option<String>,
}

impl ResultRecord {
    /// 创建仅含必填字段的结果记录
    pub fn new(id: impl Into<String>, kind: ResultKind, subject_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            subject_ref: subject_ref.into(),
            effective_time: None,
            interpretation_codes: Vec::new(),
            order_ref: None,
            performer_refs: Vec::new(),
            reporter_ref: None,
            value: None,
            reference_range: None,
            display: None,
        }
    }

    /// 主要执行者（第一个非组织的执行者）
    pub fn performer_ref(&self) -> Option<&str> {
        self.performer_refs
            .iter()
            .find(|r| !is_organization_ref(r))
            .map(String::as_str)
    }

    /// 执行组织（第一个组织类型的执行者）
    pub fn performing_organization_ref(&self) -> Option<&str> {
        self.performer_refs
            .iter()
            .find(|r| is_organization_ref(r))
            .map(String::as_str)
    }

    /// 患者ID
    pub fn patient_id(&self) -> String {
        id_of(&self.subject_ref)
    }

    /// 结果自身的引用
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.id)
    }

    /// 数值是否超出参考范围
    pub fn value_out_of_range(&self) -> bool {
        match (&self.value, &self.reference_range) {
            (Some(quantity), Some(range)) => range.excludes(quantity.value),
            _ => false,
        }
    }
}

/// 检查/检验申请单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub subject_ref: String,
    pub requester_ref: Option<String>,
    pub performer_refs: Vec<String>,
    pub authored_on: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub display: Option<String>,
}

impl OrderRecord {
    pub fn reference(&self) -> String {
        format!("ServiceRequest/{}", self.id)
    }
}

/// 联系方式
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// 外部存储返回的原始参与者记录（医生或组织）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActorRecord {
    pub reference: Reference,
    pub name: Option<String>,
    pub specialty_or_type: Option<String>,
    pub organization_ref: Option<String>,
    pub contact: ContactInfo,
    pub active: Option<bool>,
}

/// 医生执业角色记录，用于补充专科、所属机构和科室
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: String,
    pub practitioner_ref: Option<String>,
    pub organization_ref: Option<String>,
    pub specialty: Option<String>,
    pub department: Option<String>,
    pub active: bool,
}

/// 参与者类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Provider,
    Organization,
}

/// 已解析的参与者（医生或组织）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub reference: String,
    pub kind: ActorKind,
    pub display_name: String,
    pub specialty_or_type: Option<String>,
    pub organization_ref: Option<String>,
    pub department: Option<String>,
    pub contact: ContactInfo,
    pub active: bool,
}

impl Actor {
    /// 解析失败时使用的占位参与者
    pub fn placeholder(reference: &str) -> Self {
        let parsed = Reference::parse(reference).ok();
        let kind = match parsed.as_ref().map(|r| &r.kind) {
            Some(ReferenceKind::Organization) => ActorKind::Organization,
            _ => ActorKind::Provider,
        };
        Self {
            id: parsed.map(|r| r.id).unwrap_or_else(|| reference.to_string()),
            reference: reference.to_string(),
            kind,
            display_name: UNKNOWN_PROVIDER.to_string(),
            specialty_or_type: None,
            organization_ref: None,
            department: None,
            contact: ContactInfo::default(),
            active: false,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        !self.active && self.display_name == UNKNOWN_PROVIDER
    }
}

/// 某一结果相关的参与者上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActorContext {
    pub ordering: Option<Actor>,
    pub performing: Option<Actor>,
    pub reporting: Option<Actor>,
    pub responsible: Option<Actor>,
}

/// 优先级（声明顺序即严重程度顺序）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Routine,  // 常规
    High,     // 异常
    Critical, // 危急
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Routine => "routine",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn all() -> [Priority; 3] {
        [Priority::Critical, Priority::High, Priority::Routine]
    }
}

/// 需要完成的处理动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Acknowledge,   // 确认收到
    Review,        // 审阅结果
    NotifyPatient, // 通知患者
    FollowUp,      // 安排随访
    Document,      // 记录处理意见
}

/// 升级动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Reminder,               // 提醒
    SupervisorNotification, // 通知上级
    DepartmentAlert,        // 科室告警
}

/// 升级级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationLevel {
    pub level: u32,
    pub offset_minutes: i64,
    pub action: EscalationAction,
}

impl EscalationLevel {
    pub fn new(level: u32, offset_minutes: i64, action: EscalationAction) -> Self {
        Self { level, offset_minutes, action }
    }
}

/// 检查升级计划是否合法：非空、级别从1连续编号、偏移严格递增且为正
pub fn schedule_is_well_formed(levels: &[EscalationLevel]) -> bool {
    if levels.is_empty() {
        return false;
    }
    let numbered = levels
        .iter()
        .enumerate()
        .all(|(i, l)| l.level as usize == i + 1);
    let increasing = levels[0].offset_minutes > 0
        && levels.windows(2).all(|w| w[0].offset_minutes < w[1].offset_minutes);
    numbered && increasing
}

/// 优先级规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityRule {
    pub required_actions: BTreeSet<ActionKind>,
    pub time_limit_minutes: i64,
    pub escalation_levels: Vec<EscalationLevel>,
}

/// 追踪记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    PendingReview, // 待审阅
    InProgress,    // 处理中
    Resolved,      // 已解决
    Cancelled,     // 已取消
}

impl RecordStatus {
    /// 是否仍处于追踪中
    pub fn is_open(&self) -> bool {
        matches!(self, RecordStatus::PendingReview | RecordStatus::InProgress)
    }
}

/// 责任追踪记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountabilityRecord {
    pub id: Option<String>,
    pub result_id: String,
    pub resource_kind: ResultKind,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub effective_time: Option<DateTime<Utc>>,
    pub actor_context: ActorContext,
    pub required_actions: BTreeSet<ActionKind>,
    pub completed_actions: BTreeSet<ActionKind>,
    pub status: RecordStatus,
    pub priority: Priority,
    pub time_limit_minutes: i64,
    pub escalation_levels: Vec<EscalationLevel>,
    pub last_escalated_level: u32,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl AccountabilityRecord {
    /// 告警中使用的记录引用：已持久化时为记录ID，否则为结果引用
    pub fn record_ref(&self) -> String {
        match &self.id {
            Some(id) => format!("Task/{}", id),
            None => format!("{}/{}", self.resource_kind.as_str(), self.result_id),
        }
    }

    /// 自创建以来经过的分钟数
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_minutes()
    }

    /// 硬性截止时间，超出可表示范围时取最大时间
    pub fn deadline(&self) -> DateTime<Utc> {
        chrono::Duration::try_minutes(self.time_limit_minutes)
            .and_then(|limit| self.created_at.checked_add_signed(limit))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 是否已超过时限且仍未解决
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.elapsed_minutes(now) > self.time_limit_minutes
    }

    /// 所有必需动作是否已完成
    pub fn all_actions_completed(&self) -> bool {
        self.required_actions.is_subset(&self.completed_actions)
    }

    /// 尚未完成的动作
    pub fn outstanding_actions(&self) -> Vec<ActionKind> {
        self.required_actions
            .difference(&self.completed_actions)
            .copied()
            .collect()
    }
}

/// 升级告警（仅在发出时存在，不单独持久化）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationAlert {
    pub record_ref: String,
    pub result_id: String,
    pub patient_id: String,
    pub priority: Priority,
    pub level: u32,
    pub action: EscalationAction,
    pub triggered_at: DateTime<Utc>,
    pub minutes_overdue: i64,
    pub overdue: bool,
}

fn is_organization_ref(raw: &str) -> bool {
    Reference::parse(raw).map(|r| r.is_organization()).unwrap_or(false)
}

fn id_of(raw: &str) -> String {
    Reference::parse(raw)
        .map(|r| r.id)
        .unwrap_or_else(|_| raw.to_string())
}

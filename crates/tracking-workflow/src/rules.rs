//! 优先级规则表
//!
//! 优先级 → {必需动作, 时限, 升级计划} 的静态映射

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracking_core::{
    schedule_is_well_formed, ActionKind, EscalationAction, EscalationLevel, Priority,
    PriorityRule, Result, TrackingError,
};

/// 时限上限：一年
pub const MAX_TIME_LIMIT_MINUTES: i64 = 366 * 24 * 60;

/// 规则表配置（可部分覆盖默认规则）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTableConfig {
    pub critical: Option<PriorityRule>,
    pub high: Option<PriorityRule>,
    pub routine: Option<PriorityRule>,
}

/// 经过校验的规则表
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: HashMap<Priority, PriorityRule>,
}

impl RuleTable {
    /// 使用三个层级的规则构建规则表，并校验每条规则
    pub fn new(critical: PriorityRule, high: PriorityRule, routine: PriorityRule) -> Result<Self> {
        let mut rules = HashMap::new();
        rules.insert(Priority::Critical, critical);
        rules.insert(Priority::High, high);
        rules.insert(Priority::Routine, routine);

        for (priority, rule) in &rules {
            validate_rule(*priority, rule)?;
        }

        Ok(Self { rules })
    }

    /// 在默认规则表基础上应用配置覆盖
    pub fn from_config(config: &RuleTableConfig) -> Result<Self> {
        let defaults = Self::default();
        let pick = |priority: Priority, custom: &Option<PriorityRule>| {
            custom
                .clone()
                .unwrap_or_else(|| defaults.rule(priority).clone())
        };

        Self::new(
            pick(Priority::Critical, &config.critical),
            pick(Priority::High, &config.high),
            pick(Priority::Routine, &config.routine),
        )
    }

    /// 获取某一优先级的规则
    pub fn rule(&self, priority: Priority) -> &PriorityRule {
        // new() 保证三个层级都存在
        &self.rules[&priority]
    }

    /// 替换某一优先级的规则（已签发的记录不受影响）
    pub fn set_rule(&mut self, priority: Priority, rule: PriorityRule) -> Result<()> {
        validate_rule(priority, &rule)?;
        self.rules.insert(priority, rule);
        Ok(())
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let actions = |kinds: &[ActionKind]| kinds.iter().copied().collect::<BTreeSet<_>>();

        let mut rules = HashMap::new();
        rules.insert(
            Priority::Critical,
            PriorityRule {
                required_actions: actions(&[
                    ActionKind::Acknowledge,
                    ActionKind::Review,
                    ActionKind::NotifyPatient,
                ]),
                time_limit_minutes: 60,
                escalation_levels: vec![
                    EscalationLevel::new(1, 15, EscalationAction::Reminder),
                    EscalationLevel::new(2, 30, EscalationAction::SupervisorNotification),
                    EscalationLevel::new(3, 60, EscalationAction::DepartmentAlert),
                ],
            },
        );
        rules.insert(
            Priority::High,
            PriorityRule {
                required_actions: actions(&[ActionKind::Acknowledge, ActionKind::Review]),
                time_limit_minutes: 24 * 60,
                escalation_levels: vec![
                    EscalationLevel::new(1, 4 * 60, EscalationAction::Reminder),
                    EscalationLevel::new(2, 12 * 60, EscalationAction::SupervisorNotification),
                    EscalationLevel::new(3, 24 * 60, EscalationAction::DepartmentAlert),
                ],
            },
        );
        rules.insert(
            Priority::Routine,
            PriorityRule {
                required_actions: actions(&[ActionKind::Review]),
                time_limit_minutes: 7 * 24 * 60,
                escalation_levels: vec![
                    EscalationLevel::new(1, 3 * 24 * 60, EscalationAction::Reminder),
                    EscalationLevel::new(2, 7 * 24 * 60, EscalationAction::SupervisorNotification),
                ],
            },
        );

        Self { rules }
    }
}

/// 校验单条规则：升级计划合法，且时限等于最后一级的偏移
fn validate_rule(priority: Priority, rule: &PriorityRule) -> Result<()> {
    if rule.required_actions.is_empty() {
        return Err(TrackingError::InvalidRuleTable(format!(
            "{} rule has no required actions",
            priority.as_str()
        )));
    }

    if !schedule_is_well_formed(&rule.escalation_levels) {
        return Err(TrackingError::InvalidRuleTable(format!(
            "{} rule has a malformed escalation schedule",
            priority.as_str()
        )));
    }

    let last_offset = rule
        .escalation_levels
        .last()
        .map(|l| l.offset_minutes)
        .unwrap_or_default();
    if rule.time_limit_minutes != last_offset {
        return Err(TrackingError::InvalidRuleTable(format!(
            "{} rule time limit {} does not match final escalation offset {}",
            priority.as_str(),
            rule.time_limit_minutes,
            last_offset
        )));
    }

    if rule.time_limit_minutes > MAX_TIME_LIMIT_MINUTES {
        return Err(TrackingError::InvalidRuleTable(format!(
            "{} rule time limit {} exceeds {} minutes",
            priority.as_str(),
            rule.time_limit_minutes,
            MAX_TIME_LIMIT_MINUTES
        )));
    }

    Ok(())
}

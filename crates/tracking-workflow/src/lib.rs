//! # 责任追踪工作流模块
//!
//! 提供检验/检查结果的责任追踪功能，包括：
//! - 优先级分类：根据结果判读代码确定优先级
//! - 规则表：每个优先级的必需动作、时限和升级计划
//! - 参与者解析：带单次请求缓存的医生/组织解析
//! - 责任追踪：为结果建立追踪记录并推进其生命周期
//! - 升级评估：按时间推进升级级别并发出告警
//! - 结果聚合：按医生查询结果及统计参与医生

pub mod aggregator;
pub mod classifier;
pub mod engine;
pub mod escalation;
pub mod resolver;
pub mod rules;
pub mod source;
pub mod state_machine;
pub mod store;
pub mod tracker;

// 重新导出主要类型
pub use aggregator::{
    Involvement, ProviderInvolvement, ProviderResultAggregator, ProviderResultsMode,
};
pub use classifier::{classify, classify_result};
pub use engine::{AccountabilityEngine, TrackingOverview};
pub use resolver::ProviderResolver;
pub use rules::{RuleTable, RuleTableConfig};
pub use source::{ClinicalDataSource, InMemoryClinicalSource, OrderQuery, ResultQuery};
pub use state_machine::{RecordEvent, RecordStateMachine};
pub use store::{InMemoryRecordStore, RecordStore};
pub use tracker::AccountabilityTracker;

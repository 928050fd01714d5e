//! 临床数据访问接口
//!
//! 引擎只消费这些接口，不定义上游存储的实现

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracking_core::{
    OrderRecord, RawActorRecord, Reference, Result, ResultRecord, RoleRecord, TrackingError,
};

/// 申请单查询条件
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub patient_id: String,
    pub requester: Option<String>,
}

/// 结果查询条件
#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    pub patient_id: String,
    /// 结果的来源申请单，空表示不限
    pub based_on: Vec<String>,
    pub performer: Option<String>,
}

/// 临床数据源接口
#[async_trait]
pub trait ClinicalDataSource: Send + Sync {
    /// 读取单个结果
    async fn read_result(&self, id: &str) -> Result<ResultRecord>;

    /// 读取申请单
    async fn read_order(&self, reference: &Reference) -> Result<OrderRecord>;

    /// 搜索申请单
    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderRecord>>;

    /// 搜索结果
    async fn search_results(&self, query: &ResultQuery) -> Result<Vec<ResultRecord>>;

    /// 读取医生或组织
    async fn read_actor(&self, reference: &Reference) -> Result<RawActorRecord>;

    /// 搜索医生的执业角色
    async fn search_roles(&self, practitioner: &Reference) -> Result<Vec<RoleRecord>>;
}

impl std::fmt::Debug for dyn ClinicalDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClinicalDataSource")
    }
}

/// 内存数据源
///
/// 用于演示和测试，可模拟网络延迟和指定参与者的读取失败，并统计调用次数。
#[derive(Debug, Default)]
pub struct InMemoryClinicalSource {
    results: RwLock<HashMap<String, ResultRecord>>,
    orders: RwLock<HashMap<String, OrderRecord>>,
    actors: RwLock<HashMap<String, RawActorRecord>>,
    roles: RwLock<Vec<RoleRecord>>,
    failing_actors: RwLock<Vec<String>>,
    latency: Option<Duration>,
    actor_reads: AtomicUsize,
    role_searches: AtomicUsize,
}

impl InMemoryClinicalSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次读取参与者前等待的模拟延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn add_result(&self, result: ResultRecord) {
        self.results.write().await.insert(result.id.clone(), result);
    }

    pub async fn add_order(&self, order: OrderRecord) {
        self.orders.write().await.insert(order.id.clone(), order);
    }

    pub async fn add_actor(&self, actor: RawActorRecord) {
        self.actors.write().await.insert(actor.reference.key(), actor);
    }

    pub async fn add_role(&self, role: RoleRecord) {
        self.roles.write().await.push(role);
    }

    /// 使指定参与者的读取返回网络错误
    pub async fn fail_actor(&self, reference: &str) {
        let key = canonical(reference);
        self.failing_actors.write().await.push(key);
    }

    /// 参与者读取次数
    pub fn actor_reads(&self) -> usize {
        self.actor_reads.load(Ordering::SeqCst)
    }

    /// 执业角色搜索次数
    pub fn role_searches(&self) -> usize {
        self.role_searches.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClinicalDataSource for InMemoryClinicalSource {
    async fn read_result(&self, id: &str) -> Result<ResultRecord> {
        self.results
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TrackingError::NotFound(format!("result {}", id)))
    }

    async fn read_order(&self, reference: &Reference) -> Result<OrderRecord> {
        self.orders
            .read()
            .await
            .get(&reference.id)
            .cloned()
            .ok_or_else(|| TrackingError::NotFound(format!("order {}", reference)))
    }

    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderRecord>> {
        let requester = query.requester.as_deref().map(canonical);
        let mut orders: Vec<OrderRecord> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| same_patient(&order.subject_ref, &query.patient_id))
            .filter(|order| match &requester {
                Some(requester) => {
                    order.requester_ref.as_deref().map(canonical).as_ref() == Some(requester)
                }
                None => true,
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orders)
    }

    async fn search_results(&self, query: &ResultQuery) -> Result<Vec<ResultRecord>> {
        let based_on: Vec<String> = query.based_on.iter().map(|r| canonical(r)).collect();
        let performer = query.performer.as_deref().map(canonical);

        let mut results: Vec<ResultRecord> = self
            .results
            .read()
            .await
            .values()
            .filter(|result| same_patient(&result.subject_ref, &query.patient_id))
            .filter(|result| {
                based_on.is_empty()
                    || result
                        .order_ref
                        .as_deref()
                        .map(|r| based_on.contains(&canonical(r)))
                        .unwrap_or(false)
            })
            .filter(|result| match &performer {
                Some(performer) => result.performer_refs.iter().any(|r| &canonical(r) == performer),
                None => true,
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn read_actor(&self, reference: &Reference) -> Result<RawActorRecord> {
        self.actor_reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let key = reference.key();
        if self.failing_actors.read().await.contains(&key) {
            return Err(TrackingError::Network(format!("simulated failure reading {}", key)));
        }

        self.actors
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| TrackingError::NotFound(key))
    }

    async fn search_roles(&self, practitioner: &Reference) -> Result<Vec<RoleRecord>> {
        self.role_searches.fetch_add(1, Ordering::SeqCst);
        let key = practitioner.key();
        Ok(self
            .roles
            .read()
            .await
            .iter()
            .filter(|role| role.practitioner_ref.as_deref().map(canonical).as_ref() == Some(&key))
            .cloned()
            .collect())
    }
}

/// 引用的规范化键，无法解析时保留原样
pub(crate) fn canonical(raw: &str) -> String {
    Reference::parse(raw)
        .map(|r| r.key())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn same_patient(subject_ref: &str, patient_id: &str) -> bool {
    let subject = Reference::parse(subject_ref).map(|r| r.id).ok();
    let patient = Reference::parse(patient_id).map(|r| r.id).ok();
    subject.is_some() && subject == patient
}

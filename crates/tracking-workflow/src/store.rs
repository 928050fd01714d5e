//! 追踪记录存储
//!
//! 责任追踪记录的持久化接口与内存实现

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracking_core::{AccountabilityRecord, Reference, Result, TrackingError};
use uuid::Uuid;

/// 追踪记录存储接口
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 持久化新记录，返回记录ID
    async fn persist(&self, record: &AccountabilityRecord) -> Result<String>;

    /// 更新已有记录
    ///
    /// 实现必须保证 `last_escalated_level` 不会因为旧副本的写入而回退。
    async fn update(&self, record: &AccountabilityRecord) -> Result<()>;

    /// 读取记录
    async fn get(&self, record_id: &str) -> Result<AccountabilityRecord>;

    /// 列出仍在追踪中的记录，`patient_id` 为空时返回全部
    async fn list_pending(&self, patient_id: Option<&str>) -> Result<Vec<AccountabilityRecord>>;

    /// 原子地推进升级级别：仅当记录仍在追踪中且当前值等于 `expected` 时写入 `new_level`
    async fn compare_and_set_escalation(
        &self,
        record_id: &str,
        expected: u32,
        new_level: u32,
    ) -> Result<bool>;
}

impl std::fmt::Debug for dyn RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordStore")
    }
}

/// 内存记录存储
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, AccountabilityRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟写入失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 记录总数
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackingError::Persistence("store is not accepting writes".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn persist(&self, record: &AccountabilityRecord) -> Result<String> {
        self.check_writable()?;

        let record_id = Uuid::new_v4().to_string();
        let mut stored = record.clone();
        stored.id = Some(record_id.clone());

        self.records.write().await.insert(record_id.clone(), stored);
        Ok(record_id)
    }

    async fn update(&self, record: &AccountabilityRecord) -> Result<()> {
        self.check_writable()?;

        let record_id = record
            .id
            .as_deref()
            .ok_or_else(|| TrackingError::Persistence("record has no id".to_string()))?;

        let mut records = self.records.write().await;
        let existing = records
            .get_mut(record_id)
            .ok_or_else(|| TrackingError::NotFound(format!("record {}", record_id)))?;

        let level = existing.last_escalated_level.max(record.last_escalated_level);
        *existing = record.clone();
        existing.last_escalated_level = level;
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<AccountabilityRecord> {
        self.records
            .read()
            .await
            .get(record_id)
            .cloned()
            .ok_or_else(|| TrackingError::NotFound(format!("record {}", record_id)))
    }

    async fn list_pending(&self, patient_id: Option<&str>) -> Result<Vec<AccountabilityRecord>> {
        // 同时接受 `p1` 与 `Patient/p1` 形式
        let patient = patient_id
            .map(|p| Reference::parse(p).map(|r| r.id).unwrap_or_else(|_| p.to_string()));

        let mut pending: Vec<AccountabilityRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.status.is_open())
            .filter(|record| patient.as_ref().map_or(true, |p| &record.patient_id == p))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn compare_and_set_escalation(
        &self,
        record_id: &str,
        expected: u32,
        new_level: u32,
    ) -> Result<bool> {
        self.check_writable()?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| TrackingError::NotFound(format!("record {}", record_id)))?;

        if !record.status.is_open()
            || record.last_escalated_level != expected
            || new_level <= expected
        {
            return Ok(false);
        }

        record.last_escalated_level = new_level;
        Ok(true)
    }
}

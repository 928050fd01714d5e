//! FHIR服务器连接器
//!
//! 通过 REST 接口读取临床数据，并以 Task 资源保存追踪记录。

use crate::fhir;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracking_core::{
    AccountabilityRecord, OrderRecord, RawActorRecord, Reference, Result, ResultRecord,
    RoleRecord, TrackingError,
};
use tracking_workflow::{ClinicalDataSource, OrderQuery, RecordStore, ResultQuery};

/// 单次搜索最多跟随的分页数
const MAX_SEARCH_PAGES: usize = 20;

/// 每页条目数
const PAGE_SIZE: usize = 100;

/// 条件更新冲突后的最大重试次数
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// 认证配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticationConfig {
    #[default]
    None,
    BasicAuth { username: String, password: String },
    BearerToken { token: String },
}

/// FHIR 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthenticationConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// FHIR 连接器
#[derive(Debug, Clone)]
pub struct FhirConnector {
    base_url: String,
    auth: AuthenticationConfig,
    client: reqwest::Client,
}

impl FhirConnector {
    pub fn new(config: &FhirConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(TrackingError::Config("fhir.base_url is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackingError::Config(format!("failed to build HTTP client: {}", e)))?;

        info!("FHIR connector targeting {}", config.base_url);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn is_own_url(&self, url: &str) -> bool {
        url.strip_prefix(self.base_url.as_str())
            .map_or(false, |rest| {
                rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')
            })
    }

    /// 添加认证头
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/fhir+json");
        match &self.auth {
            AuthenticationConfig::None => request,
            AuthenticationConfig::BasicAuth { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthenticationConfig::BearerToken { token } => request.bearer_auth(token),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| TrackingError::Network(e.to_string()))
    }

    /// 读取单个资源
    async fn read_resource(&self, resource_type: &str, id: &str) -> Result<Value> {
        let path = format!("{}/{}", resource_type, id);
        let response = self.send(self.client.get(self.url(&path))).await?;
        json_body(&path, response).await
    }

    /// 搜索资源，跟随分页链接
    async fn search(&self, resource_type: &str, params: &[(&str, String)]) -> Result<Vec<Value>> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("_count", PAGE_SIZE.to_string()));

        let response = self
            .send(self.client.get(self.url(resource_type)).query(&query))
            .await?;
        let mut bundle = json_body(resource_type, response).await?;

        let mut resources = Vec::new();
        for page in 1.. {
            resources.extend(
                fhir::bundle_resources(&bundle)?
                    .into_iter()
                    .filter(|r| {
                        r.get("resourceType").and_then(Value::as_str) == Some(resource_type)
                    })
                    .cloned(),
            );

            let Some(next) = fhir::next_link(&bundle) else {
                break;
            };
            if page >= MAX_SEARCH_PAGES {
                warn!("Search {} truncated after {} pages", resource_type, page);
                break;
            }

            // 凭据只发往配置的服务器
            if !self.is_own_url(&next) {
                return Err(TrackingError::Network(format!(
                    "refusing to follow {} paging link outside {}",
                    resource_type, self.base_url
                )));
            }

            let response = self.send(self.client.get(&next)).await?;
            bundle = json_body(resource_type, response).await?;
        }

        debug!("Search {} returned {} resources", resource_type, resources.len());
        Ok(resources)
    }

    /// 发送资源；`version` 存在时作为条件更新
    async fn write_resource(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        version: Option<&str>,
    ) -> Result<Value> {
        let mut request = self
            .client
            .request(method, self.url(path))
            .header("Content-Type", "application/fhir+json")
            .header("Prefer", "return=representation")
            .json(body);
        if let Some(version) = version {
            request = request.header("If-Match", format!("W/\"{}\"", version));
        }

        let response = self.send(request).await?;
        json_body(path, response).await
    }

    async fn read_task(&self, record_id: &str) -> Result<(AccountabilityRecord, Option<String>)> {
        let task = self.read_resource("Task", record_id).await?;
        Ok((fhir::task_to_record(&task)?, fhir::version_id(&task)))
    }

    async fn put_task(&self, record: &AccountabilityRecord, version: Option<&str>) -> Result<()> {
        let record_id = record
            .id
            .as_deref()
            .ok_or_else(|| TrackingError::Persistence("record has no id".to_string()))?;
        let task = fhir::record_to_task(record)?;
        self.write_resource(Method::PUT, &format!("Task/{}", record_id), &task, version)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClinicalDataSource for FhirConnector {
    async fn read_result(&self, id: &str) -> Result<ResultRecord> {
        match self.read_resource("Observation", id).await {
            Ok(resource) => fhir::parse_result(&resource),
            Err(e) if e.is_not_found() => {
                let resource = self.read_resource("DiagnosticReport", id).await?;
                fhir::parse_result(&resource)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_order(&self, reference: &Reference) -> Result<OrderRecord> {
        let resource = self.read_resource("ServiceRequest", &reference.id).await?;
        fhir::parse_order(&resource)
    }

    async fn search_orders(&self, query: &OrderQuery) -> Result<Vec<OrderRecord>> {
        let mut params = vec![("subject", patient_reference(&query.patient_id)?)];
        if let Some(requester) = &query.requester {
            params.push(("requester", Reference::parse(requester)?.key()));
        }

        let resources = self.search("ServiceRequest", &params).await?;
        resources.iter().map(fhir::parse_order).collect()
    }

    async fn search_results(&self, query: &ResultQuery) -> Result<Vec<ResultRecord>> {
        let mut params = vec![("subject", patient_reference(&query.patient_id)?)];
        if !query.based_on.is_empty() {
            params.push(("based-on", query.based_on.join(",")));
        }
        if let Some(performer) = &query.performer {
            params.push(("performer", Reference::parse(performer)?.key()));
        }

        let (observations, reports) = tokio::join!(
            self.search("Observation", &params),
            self.search("DiagnosticReport", &params),
        );

        let (observations, reports) = (observations?, reports?);
        observations
            .iter()
            .chain(reports.iter())
            .map(fhir::parse_result)
            .collect()
    }

    async fn read_actor(&self, reference: &Reference) -> Result<RawActorRecord> {
        let resource_type = reference.kind.type_name().ok_or_else(|| {
            TrackingError::InvalidReference(format!("{} has no resource type", reference.id))
        })?;
        let resource = self.read_resource(resource_type, &reference.id).await?;
        fhir::parse_actor(&resource)
    }

    async fn search_roles(&self, practitioner: &Reference) -> Result<Vec<RoleRecord>> {
        let resources = self
            .search("PractitionerRole", &[("practitioner", practitioner.key())])
            .await?;
        resources.iter().map(fhir::parse_role).collect()
    }
}

#[async_trait]
impl RecordStore for FhirConnector {
    async fn persist(&self, record: &AccountabilityRecord) -> Result<String> {
        let mut task = fhir::record_to_task(record)?;
        if let Some(task) = task.as_object_mut() {
            task.remove("id");
        }

        let created = self
            .write_resource(Method::POST, "Task", &task, None)
            .await
            .map_err(|e| TrackingError::Persistence(e.to_string()))?;

        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TrackingError::Persistence("server returned Task without id".to_string())
            })
    }

    async fn update(&self, record: &AccountabilityRecord) -> Result<()> {
        let record_id = record
            .id
            .as_deref()
            .ok_or_else(|| TrackingError::Persistence("record has no id".to_string()))?;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let (current, version) = self.read_task(record_id).await?;

            let mut next = record.clone();
            next.last_escalated_level = next.last_escalated_level.max(current.last_escalated_level);

            match self.put_task(&next, version.as_deref()).await {
                Ok(()) => return Ok(()),
                Err(TrackingError::Conflict(_)) => {
                    debug!("Task/{} changed during update (attempt {})", record_id, attempt);
                }
                Err(e) => return Err(TrackingError::Persistence(e.to_string())),
            }
        }

        Err(TrackingError::Conflict(format!(
            "Task/{} kept changing during update",
            record_id
        )))
    }

    async fn get(&self, record_id: &str) -> Result<AccountabilityRecord> {
        Ok(self.read_task(record_id).await?.0)
    }

    async fn list_pending(&self, patient_id: Option<&str>) -> Result<Vec<AccountabilityRecord>> {
        let mut params = vec![
            ("code", format!("{}|{}", fhir::TASK_CODE_SYSTEM, fhir::TASK_CODE)),
            ("status", "requested,in-progress".to_string()),
        ];
        if let Some(patient_id) = patient_id {
            params.push(("patient", patient_reference(patient_id)?));
        }

        let mut records = Vec::new();
        for task in self.search("Task", &params).await? {
            match fhir::task_to_record(&task) {
                Ok(record) if record.status.is_open() => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable tracking task: {}", e),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn compare_and_set_escalation(
        &self,
        record_id: &str,
        expected: u32,
        new_level: u32,
    ) -> Result<bool> {
        let (mut record, version) = self.read_task(record_id).await?;
        if !record.status.is_open()
            || record.last_escalated_level != expected
            || new_level <= expected
        {
            return Ok(false);
        }

        let version = version.ok_or_else(|| {
            TrackingError::Persistence(format!("Task/{} has no versionId", record_id))
        })?;

        record.last_escalated_level = new_level;
        match self.put_task(&record, Some(&version)).await {
            Ok(()) => Ok(true),
            Err(TrackingError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 患者ID或引用统一为 `Patient/<id>`
fn patient_reference(patient_id: &str) -> Result<String> {
    let reference = Reference::parse(patient_id)?;
    Ok(format!("Patient/{}", reference.id))
}

/// 校验响应状态并解析JSON
async fn json_body(target: &str, response: Response) -> Result<Value> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| TrackingError::Parse(format!("{}: {}", target, e)));
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(target, status, &body))
}

/// 非成功状态码映射为错误
fn status_error(target: &str, status: StatusCode, body: &str) -> TrackingError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => TrackingError::NotFound(target.to_string()),
        StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
            TrackingError::Conflict(format!("{} was modified concurrently", target))
        }
        _ => TrackingError::Network(format!("{} returned {}: {}", target, status, body)),
    }
}

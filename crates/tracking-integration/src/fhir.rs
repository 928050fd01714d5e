//! FHIR R4 资源映射
//!
//! 只解析引擎消费的字段：
//! - Observation / DiagnosticReport → [`ResultRecord`]
//! - ServiceRequest → [`OrderRecord`]
//! - Practitioner / Organization → [`RawActorRecord`]
//! - PractitionerRole → [`RoleRecord`]
//! - Task ↔ [`AccountabilityRecord`]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracking_core::{
    AccountabilityRecord, ActionKind, ActorContext, ContactInfo, EscalationLevel, OrderRecord,
    Priority, Quantity, RawActorRecord, RecordStatus, Reference, ReferenceKind, ReferenceRange,
    Result, ResultKind, ResultRecord, RoleRecord, TrackingError,
};

/// 追踪状态扩展的URL
pub const TASK_STATE_EXTENSION: &str =
    "https://clinical-accountability.example.org/fhir/StructureDefinition/tracking-state";

/// 追踪任务的 Task.code
pub const TASK_CODE_SYSTEM: &str =
    "https://clinical-accountability.example.org/fhir/CodeSystem/task";
pub const TASK_CODE: &str = "result-accountability";

/// Task 无法直接表达的追踪字段，序列化后放在扩展中
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskState {
    resource_kind: ResultKind,
    effective_time: Option<DateTime<Utc>>,
    actor_context: ActorContext,
    required_actions: BTreeSet<ActionKind>,
    completed_actions: BTreeSet<ActionKind>,
    time_limit_minutes: i64,
    escalation_levels: Vec<EscalationLevel>,
    last_escalated_level: u32,
    resolved_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
}

/// 解析 Observation 或 DiagnosticReport
pub fn parse_result(resource: &Value) -> Result<ResultRecord> {
    let kind = match resource_type(resource)? {
        "Observation" => ResultKind::Observation,
        "DiagnosticReport" => ResultKind::DiagnosticReport,
        other => {
            return Err(TrackingError::Parse(format!(
                "expected Observation or DiagnosticReport, received {}",
                other
            )))
        }
    };
    let id = resource_id(resource)?;
    let subject = reference_field(resource, "subject")
        .ok_or_else(|| TrackingError::Parse(format!("{}/{} has no subject", kind.as_str(), id)))?;

    let mut result = ResultRecord::new(id, kind, subject);
    result.effective_time = ["effectiveDateTime", "effectiveInstant", "issued"]
        .iter()
        .find_map(|key| resource.get(*key).and_then(Value::as_str).and_then(parse_datetime))
        .or_else(|| {
            resource
                .pointer("/effectivePeriod/start")
                .and_then(Value::as_str)
                .and_then(parse_datetime)
        });

    // DiagnosticReport 没有 interpretation，使用 conclusionCode
    let codes_key = match kind {
        ResultKind::Observation => "interpretation",
        ResultKind::DiagnosticReport => "conclusionCode",
    };
    result.interpretation_codes = resource
        .get(codes_key)
        .and_then(Value::as_array)
        .map(|concepts| concepts.iter().flat_map(coding_codes).collect())
        .unwrap_or_default();

    result.order_ref = reference_list(resource, "basedOn").into_iter().next();
    result.performer_refs = reference_list(resource, "performer");
    if kind == ResultKind::DiagnosticReport {
        result.reporter_ref = reference_list(resource, "resultsInterpreter").into_iter().next();
    }

    result.value = resource.get("valueQuantity").and_then(|q| {
        Some(Quantity {
            value: q.get("value")?.as_f64()?,
            unit: q
                .get("unit")
                .or_else(|| q.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    });
    result.reference_range = resource
        .pointer("/referenceRange/0")
        .map(|range| ReferenceRange {
            low: range.pointer("/low/value").and_then(Value::as_f64),
            high: range.pointer("/high/value").and_then(Value::as_f64),
        })
        .filter(|range| range.low.is_some() || range.high.is_some());
    result.display = resource.get("code").and_then(codeable_text);

    Ok(result)
}

/// 解析 ServiceRequest
pub fn parse_order(resource: &Value) -> Result<OrderRecord> {
    expect_type(resource, "ServiceRequest")?;
    let id = resource_id(resource)?;

    Ok(OrderRecord {
        subject_ref: reference_field(resource, "subject")
            .ok_or_else(|| TrackingError::Parse(format!("ServiceRequest/{} has no subject", id)))?,
        requester_ref: reference_field(resource, "requester"),
        performer_refs: reference_list(resource, "performer"),
        authored_on: resource
            .get("authoredOn")
            .and_then(Value::as_str)
            .and_then(parse_datetime),
        status: string_field(resource, "status"),
        display: resource.get("code").and_then(codeable_text),
        id,
    })
}

/// 解析 Practitioner 或 Organization
pub fn parse_actor(resource: &Value) -> Result<RawActorRecord> {
    let id = resource_id(resource)?;

    match resource_type(resource)? {
        "Practitioner" => Ok(RawActorRecord {
            reference: Reference::new(ReferenceKind::Practitioner, &id),
            name: resource
                .pointer("/name/0")
                .and_then(human_name),
            specialty_or_type: resource
                .pointer("/qualification/0/code")
                .and_then(codeable_text),
            organization_ref: None,
            contact: contact_info(resource),
            active: resource.get("active").and_then(Value::as_bool),
        }),
        "Organization" => Ok(RawActorRecord {
            reference: Reference::new(ReferenceKind::Organization, &id),
            name: string_field(resource, "name"),
            specialty_or_type: resource.pointer("/type/0").and_then(codeable_text),
            organization_ref: reference_field(resource, "partOf"),
            contact: contact_info(resource),
            active: resource.get("active").and_then(Value::as_bool),
        }),
        other => Err(TrackingError::Parse(format!(
            "expected Practitioner or Organization, received {}",
            other
        ))),
    }
}

/// 解析 PractitionerRole
pub fn parse_role(resource: &Value) -> Result<RoleRecord> {
    expect_type(resource, "PractitionerRole")?;

    Ok(RoleRecord {
        id: resource_id(resource)?,
        practitioner_ref: reference_field(resource, "practitioner"),
        organization_ref: reference_field(resource, "organization"),
        specialty: resource.pointer("/specialty/0").and_then(codeable_text),
        department: ["/healthcareService/0/display", "/location/0/display"]
            .iter()
            .find_map(|pointer| resource.pointer(pointer).and_then(Value::as_str))
            .map(str::to_string),
        active: resource.get("active").and_then(Value::as_bool).unwrap_or(true),
    })
}

/// 搜索结果 Bundle 中的资源
pub fn bundle_resources(bundle: &Value) -> Result<Vec<&Value>> {
    expect_type(bundle, "Bundle")?;

    Ok(bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(|entry| entry.get("resource")).collect())
        .unwrap_or_default())
}

/// Bundle 的下一页链接
pub fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| string_field(link, "url"))
}

/// 资源的 meta.versionId
pub fn version_id(resource: &Value) -> Option<String> {
    resource
        .pointer("/meta/versionId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 追踪记录 → Task
pub fn record_to_task(record: &AccountabilityRecord) -> Result<Value> {
    let state = TaskState {
        resource_kind: record.resource_kind,
        effective_time: record.effective_time,
        actor_context: record.actor_context.clone(),
        required_actions: record.required_actions.clone(),
        completed_actions: record.completed_actions.clone(),
        time_limit_minutes: record.time_limit_minutes,
        escalation_levels: record.escalation_levels.clone(),
        last_escalated_level: record.last_escalated_level,
        resolved_at: record.resolved_at,
        cancel_reason: record.cancel_reason.clone(),
    };

    let mut task = json!({
        "resourceType": "Task",
        "status": task_status(record.status),
        "intent": "order",
        "priority": task_priority(record.priority),
        "code": {
            "coding": [{ "system": TASK_CODE_SYSTEM, "code": TASK_CODE }]
        },
        "focus": { "reference": format!("{}/{}", record.resource_kind.as_str(), record.result_id) },
        "for": { "reference": format!("Patient/{}", record.patient_id) },
        "authoredOn": record.created_at.to_rfc3339(),
        "extension": [{
            "url": TASK_STATE_EXTENSION,
            "valueString": serde_json::to_string(&state)?
        }]
    });

    if let Some(id) = &record.id {
        task["id"] = json!(id);
    }
    if let Some(owner) = record.actor_context.responsible.as_ref() {
        task["owner"] = json!({ "reference": owner.reference, "display": owner.display_name });
    }
    if let Some(resolved_at) = record.resolved_at {
        task["executionPeriod"] = json!({
            "start": record.created_at.to_rfc3339(),
            "end": resolved_at.to_rfc3339()
        });
    }
    if let Some(reason) = &record.cancel_reason {
        task["statusReason"] = json!({ "text": reason });
    }

    Ok(task)
}

/// Task → 追踪记录
pub fn task_to_record(task: &Value) -> Result<AccountabilityRecord> {
    expect_type(task, "Task")?;
    let id = resource_id(task)?;
    let missing = |field: &str| TrackingError::Parse(format!("Task/{} has no {}", id, field));

    let state: TaskState = task
        .get("extension")
        .and_then(Value::as_array)
        .and_then(|extensions| {
            extensions
                .iter()
                .find(|ext| ext.get("url").and_then(Value::as_str) == Some(TASK_STATE_EXTENSION))
        })
        .and_then(|ext| ext.get("valueString").and_then(Value::as_str))
        .map(serde_json::from_str)
        .ok_or_else(|| missing("tracking-state extension"))??;

    let focus = reference_field(task, "focus").ok_or_else(|| missing("focus"))?;
    let patient = reference_field(task, "for").ok_or_else(|| missing("for"))?;
    let status = string_field(task, "status")
        .as_deref()
        .and_then(record_status)
        .ok_or_else(|| missing("recognised status"))?;
    let priority = string_field(task, "priority")
        .as_deref()
        .and_then(record_priority)
        .ok_or_else(|| missing("recognised priority"))?;
    let created_at = task
        .get("authoredOn")
        .and_then(Value::as_str)
        .and_then(parse_datetime)
        .ok_or_else(|| missing("authoredOn"))?;

    Ok(AccountabilityRecord {
        id: Some(id.clone()),
        result_id: Reference::parse(&focus)?.id,
        resource_kind: state.resource_kind,
        patient_id: Reference::parse(&patient)?.id,
        created_at,
        effective_time: state.effective_time,
        actor_context: state.actor_context,
        required_actions: state.required_actions,
        completed_actions: state.completed_actions,
        status,
        priority,
        time_limit_minutes: state.time_limit_minutes,
        escalation_levels: state.escalation_levels,
        last_escalated_level: state.last_escalated_level,
        resolved_at: state.resolved_at,
        cancel_reason: state.cancel_reason,
    })
}

pub fn task_status(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::PendingReview => "requested",
        RecordStatus::InProgress => "in-progress",
        RecordStatus::Resolved => "completed",
        RecordStatus::Cancelled => "cancelled",
    }
}

fn record_status(status: &str) -> Option<RecordStatus> {
    match status {
        "requested" => Some(RecordStatus::PendingReview),
        "in-progress" => Some(RecordStatus::InProgress),
        "completed" => Some(RecordStatus::Resolved),
        "cancelled" => Some(RecordStatus::Cancelled),
        _ => None,
    }
}

fn task_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "stat",
        Priority::High => "urgent",
        Priority::Routine => "routine",
    }
}

fn record_priority(priority: &str) -> Option<Priority> {
    match priority {
        "stat" | "asap" => Some(Priority::Critical),
        "urgent" => Some(Priority::High),
        "routine" => Some(Priority::Routine),
        _ => None,
    }
}

fn resource_type(resource: &Value) -> Result<&str> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| TrackingError::Parse("missing resourceType".to_string()))
}

fn expect_type(resource: &Value, expected: &str) -> Result<()> {
    let actual = resource_type(resource)?;
    if actual != expected {
        return Err(TrackingError::Parse(format!(
            "expected resourceType {}, received {}",
            expected, actual
        )));
    }
    Ok(())
}

fn resource_id(resource: &Value) -> Result<String> {
    string_field(resource, "id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TrackingError::Parse("missing resource id".to_string()))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn reference_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|r| string_field(r, "reference"))
}

fn reference_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|refs| refs.iter().filter_map(|r| string_field(r, "reference")).collect())
        .unwrap_or_default()
}

fn coding_codes(concept: &Value) -> Vec<String> {
    concept
        .get("coding")
        .and_then(Value::as_array)
        .map(|codings| codings.iter().filter_map(|c| string_field(c, "code")).collect())
        .unwrap_or_default()
}

fn codeable_text(concept: &Value) -> Option<String> {
    string_field(concept, "text").or_else(|| {
        let coding = concept.pointer("/coding/0")?;
        string_field(coding, "display").or_else(|| string_field(coding, "code"))
    })
}

fn human_name(name: &Value) -> Option<String> {
    if let Some(text) = string_field(name, "text") {
        return Some(text);
    }

    let parts: Vec<&str> = ["prefix", "given"]
        .iter()
        .filter_map(|key| name.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .chain(name.get("family").and_then(Value::as_str))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn contact_info(resource: &Value) -> ContactInfo {
    let telecom = resource
        .get("telecom")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let find = |system: &str| {
        telecom
            .iter()
            .find(|t| t.get("system").and_then(Value::as_str) == Some(system))
            .and_then(|t| string_field(t, "value"))
    };

    ContactInfo {
        email: find("email"),
        phone: find("phone"),
    }
}

/// 解析FHIR日期时间，仅有日期时按当日零点（UTC）
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

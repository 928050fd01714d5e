//! 资源引用解析
//!
//! 将 `Type/id`、绝对URL、`urn:uuid:` 等形式的引用字符串统一解析为 [`Reference`]

use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 引用指向的资源类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Practitioner,
    PractitionerRole,
    Organization,
    Patient,
    ServiceRequest,
    Observation,
    DiagnosticReport,
    Task,
    Other(String), // 其他已命名资源类型
    Unknown,       // 无类型信息 (urn:uuid 或裸ID)
}

impl ReferenceKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "Practitioner" => ReferenceKind::Practitioner,
            "PractitionerRole" => ReferenceKind::PractitionerRole,
            "Organization" => ReferenceKind::Organization,
            "Patient" => ReferenceKind::Patient,
            "ServiceRequest" => ReferenceKind::ServiceRequest,
            "Observation" => ReferenceKind::Observation,
            "DiagnosticReport" => ReferenceKind::DiagnosticReport,
            "Task" => ReferenceKind::Task,
            other => ReferenceKind::Other(other.to_string()),
        }
    }

    /// 资源类型名称，未知类型返回 `None`
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ReferenceKind::Practitioner => Some("Practitioner"),
            ReferenceKind::PractitionerRole => Some("PractitionerRole"),
            ReferenceKind::Organization => Some("Organization"),
            ReferenceKind::Patient => Some("Patient"),
            ReferenceKind::ServiceRequest => Some("ServiceRequest"),
            ReferenceKind::Observation => Some("Observation"),
            ReferenceKind::DiagnosticReport => Some("DiagnosticReport"),
            ReferenceKind::Task => Some("Task"),
            ReferenceKind::Other(name) => Some(name.as_str()),
            ReferenceKind::Unknown => None,
        }
    }
}

/// 类型化的资源引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    /// 解析引用字符串
    ///
    /// 支持的形式：
    /// - `Practitioner/123`
    /// - `https://fhir.example.org/r4/Practitioner/123/_history/2`
    /// - `urn:uuid:0f4c...`
    /// - 裸ID `123`（类型未知）
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackingError::InvalidReference("empty reference".to_string()));
        }

        if trimmed.starts_with('#') {
            return Err(TrackingError::InvalidReference(format!(
                "contained reference cannot be resolved: {}",
                trimmed
            )));
        }

        if let Some(rest) = trimmed
            .strip_prefix("urn:uuid:")
            .or_else(|| trimmed.strip_prefix("urn:oid:"))
        {
            return Self::with_valid_id(ReferenceKind::Unknown, rest, raw);
        }

        // 去掉查询串与片段
        let path = trimmed
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default();

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(pos) = segments.iter().position(|s| *s == "_history") {
            segments.truncate(pos);
        }

        match segments.as_slice() {
            [] => Err(TrackingError::InvalidReference(format!("no id in reference: {}", raw))),
            [id] => Self::with_valid_id(ReferenceKind::Unknown, id, raw),
            [.., kind, id] => {
                if !is_resource_type(kind) {
                    return Err(TrackingError::InvalidReference(format!(
                        "unrecognized resource type '{}' in reference: {}",
                        kind, raw
                    )));
                }
                Self::with_valid_id(ReferenceKind::from_type_name(kind), id, raw)
            }
        }
    }

    fn with_valid_id(kind: ReferenceKind, id: &str, raw: &str) -> Result<Self> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(TrackingError::InvalidReference(format!(
                "invalid id '{}' in reference: {}",
                id, raw
            )));
        }
        Ok(Self::new(kind, id))
    }

    /// 规范化键：`Type/id`，未知类型时仅为 `id`
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// 是否指向组织
    pub fn is_organization(&self) -> bool {
        self.kind == ReferenceKind::Organization
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.type_name() {
            Some(name) => write!(f, "{}/{}", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

fn is_resource_type(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_reference() {
        let reference = Reference::parse("Practitioner/P1").unwrap();
        assert_eq!(reference.kind, ReferenceKind::Practitioner);
        assert_eq!(reference.id, "P1");
        assert_eq!(reference.key(), "Practitioner/P1");
    }

    #[test]
    fn test_absolute_url_with_history() {
        let reference =
            Reference::parse("https://fhir.example.org/r4/Organization/org-7/_history/3").unwrap();
        assert_eq!(reference.kind, ReferenceKind::Organization);
        assert_eq!(reference.id, "org-7");
        assert!(reference.is_organization());
    }

    #[test]
    fn test_urn_uuid() {
        let reference = Reference::parse("urn:uuid:9b2c1d3e-0000-4a4b-8c8d-123456789abc").unwrap();
        assert_eq!(reference.kind, ReferenceKind::Unknown);
        assert_eq!(reference.id, "9b2c1d3e-0000-4a4b-8c8d-123456789abc");
        assert_eq!(reference.key(), "9b2c1d3e-0000-4a4b-8c8d-123456789abc");
    }

    #[test]
    fn test_bare_id_and_unlisted_type() {
        assert_eq!(Reference::parse(" 42 ").unwrap().kind, ReferenceKind::Unknown);

        let reference = Reference::parse("Device/pump-1").unwrap();
        assert_eq!(reference.kind, ReferenceKind::Other("Device".to_string()));
        assert_eq!(reference.key(), "Device/pump-1");
    }

    #[test]
    fn test_query_string_is_ignored() {
        let reference = Reference::parse("Patient/abc?_format=json").unwrap();
        assert_eq!(reference.kind, ReferenceKind::Patient);
        assert_eq!(reference.id, "abc");
    }

    #[test]
    fn test_invalid_references() {
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("   ").is_err());
        assert!(Reference::parse("#contained-1").is_err());
        assert!(Reference::parse("urn:uuid:").is_err());
        assert!(Reference::parse("Practitioner/bad id").is_err());
        assert!(Reference::parse("practitioner/P1").is_err());
        assert!(Reference::parse("/").is_err());
    }
}

//! 医生/组织解析
//!
//! 将引用解析为 [`Actor`]，按原始引用字符串缓存；同一引用的并发请求共享一次读取。

use crate::source::ClinicalDataSource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};
use tracking_core::{
    Actor, ActorContext, ActorKind, RawActorRecord, Reference, ReferenceKind, Result,
    ResultRecord, RoleRecord, TrackingError,
};

type ActorCache = RwLock<HashMap<String, Arc<OnceCell<Actor>>>>;

/// 参与者解析器
pub struct ProviderResolver {
    source: Arc<dyn ClinicalDataSource>,
    /// 医生缓存
    actors: ActorCache,
    /// 组织缓存
    organizations: ActorCache,
}

impl std::fmt::Debug for ProviderResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderResolver").finish_non_exhaustive()
    }
}

impl ProviderResolver {
    pub fn new(source: Arc<dyn ClinicalDataSource>) -> Self {
        Self {
            source,
            actors: RwLock::new(HashMap::new()),
            organizations: RwLock::new(HashMap::new()),
        }
    }

    /// 解析参与者，失败时返回占位参与者（不缓存失败）
    pub async fn resolve_actor(&self, reference: &str) -> Actor {
        match self.try_resolve_actor(reference).await {
            Ok(actor) => actor,
            Err(e) => {
                warn!("Failed to resolve actor {}: {}", reference, e);
                Actor::placeholder(reference)
            }
        }
    }

    /// 解析参与者，失败时返回错误
    pub async fn try_resolve_actor(&self, reference: &str) -> Result<Actor> {
        let parsed = Reference::parse(reference)?;
        let cache = if parsed.is_organization() {
            &self.organizations
        } else {
            &self.actors
        };

        let cell = Self::cell_for(cache, reference).await;
        if let Some(actor) = cell.get() {
            debug!("Actor cache hit for {}", reference);
            return Ok(actor.clone());
        }

        let actor = cell
            .get_or_try_init(|| self.fetch_actor(&parsed, reference))
            .await?;
        Ok(actor.clone())
    }

    /// 清空医生与组织缓存
    pub async fn clear_cache(&self) {
        self.actors.write().await.clear();
        self.organizations.write().await.clear();
        debug!("Actor caches cleared");
    }

    /// 已缓存（含正在读取）的引用数量
    pub async fn cached_entries(&self) -> usize {
        self.actors.read().await.len() + self.organizations.read().await.len()
    }

    /// 提取结果的参与者上下文
    ///
    /// 四个位置独立并发解析，任一位置失败不影响其他位置。
    /// `order_override` 优先于结果自身记录的申请单引用。
    pub async fn extract_actor_context(
        &self,
        result: &ResultRecord,
        order_override: Option<&str>,
    ) -> ActorContext {
        let order_ref = order_override.or(result.order_ref.as_deref());

        let (ordering, performing, reporting, responsible) = tokio::join!(
            self.resolve_ordering(order_ref),
            self.resolve_optional(result.performer_ref()),
            self.resolve_optional(result.reporter_ref.as_deref()),
            self.resolve_optional(result.performing_organization_ref()),
        );

        // 没有执行组织时，由开单医生负责
        let responsible = responsible.or_else(|| ordering.clone());

        ActorContext {
            ordering,
            performing,
            reporting,
            responsible,
        }
    }

    async fn resolve_optional(&self, reference: Option<&str>) -> Option<Actor> {
        match reference {
            Some(reference) => Some(self.resolve_actor(reference).await),
            None => None,
        }
    }

    /// 通过申请单找到开单医生
    async fn resolve_ordering(&self, order_ref: Option<&str>) -> Option<Actor> {
        let order_ref = order_ref?;

        let order = match Reference::parse(order_ref) {
            Ok(reference) => self.source.read_order(&reference).await,
            Err(e) => Err(e),
        };

        match order {
            Ok(order) => self.resolve_optional(order.requester_ref.as_deref()).await,
            Err(e) => {
                warn!("Failed to read order {}: {}", order_ref, e);
                Some(Actor::placeholder(order_ref))
            }
        }
    }

    async fn cell_for(cache: &ActorCache, reference: &str) -> Arc<OnceCell<Actor>> {
        if let Some(cell) = cache.read().await.get(reference) {
            return cell.clone();
        }
        cache
            .write()
            .await
            .entry(reference.to_string())
            .or_default()
            .clone()
    }

    async fn fetch_actor(&self, reference: &Reference, raw: &str) -> Result<Actor> {
        let to_resolution_error =
            |e: TrackingError| TrackingError::Resolution(format!("{}: {}", raw, e));

        if reference.kind != ReferenceKind::Practitioner {
            let record = self
                .source
                .read_actor(reference)
                .await
                .map_err(to_resolution_error)?;
            return Ok(build_actor(raw, record, None));
        }

        let (record, roles) = tokio::join!(
            self.source.read_actor(reference),
            self.source.search_roles(reference),
        );
        let record = record.map_err(to_resolution_error)?;

        let role = match roles {
            Ok(roles) => pick_role(roles),
            Err(e) => {
                warn!("Failed to load roles for {}: {}", raw, e);
                None
            }
        };

        debug!("Resolved actor {}", raw);
        Ok(build_actor(raw, record, role))
    }
}

/// 优先选择在职角色
fn pick_role(roles: Vec<RoleRecord>) -> Option<RoleRecord> {
    let mut roles = roles;
    match roles.iter().position(|role| role.active) {
        Some(pos) => Some(roles.swap_remove(pos)),
        None => roles.into_iter().next(),
    }
}

fn build_actor(raw: &str, record: RawActorRecord, role: Option<RoleRecord>) -> Actor {
    let kind = if record.reference.is_organization() {
        ActorKind::Organization
    } else {
        ActorKind::Provider
    };

    let (role_specialty, role_org, department) = match role {
        Some(role) => (role.specialty, role.organization_ref, role.department),
        None => (None, None, None),
    };

    Actor {
        display_name: record
            .name
            .unwrap_or_else(|| record.reference.key()),
        id: record.reference.id,
        reference: raw.to_string(),
        kind,
        specialty_or_type: role_specialty.or(record.specialty_or_type),
        organization_ref: role_org.or(record.organization_ref),
        department,
        contact: record.contact,
        active: record.active.unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryClinicalSource;
    use std::time::Duration;
    use tracking_core::{ContactInfo, OrderRecord, ResultKind, UNKNOWN_PROVIDER};

    fn practitioner(id: &str, name: &str) -> RawActorRecord {
        RawActorRecord {
            reference: Reference::new(ReferenceKind::Practitioner, id),
            name: Some(name.to_string()),
            specialty_or_type: None,
            organization_ref: None,
            contact: ContactInfo {
                email: Some(format!("{}@hospital.example", id)),
                phone: None,
            },
            active: Some(true),
        }
    }

    fn organization(id: &str, name: &str) -> RawActorRecord {
        RawActorRecord {
            reference: Reference::new(ReferenceKind::Organization, id),
            name: Some(name.to_string()),
            specialty_or_type: Some("laboratory".to_string()),
            organization_ref: None,
            contact: ContactInfo::default(),
            active: Some(true),
        }
    }

    #[tokio::test]
    async fn test_second_lookup_is_cache_hit() {
        let source = Arc::new(InMemoryClinicalSource::new());
        source.add_actor(practitioner("P1", "Dr. Chen")).await;
        let resolver = ProviderResolver::new(source.clone());

        let first = resolver.resolve_actor("Practitioner/P1").await;
        let second = resolver.resolve_actor("Practitioner/P1").await;

        assert_eq!(first, second);
        assert_eq!(first.display_name, "Dr. Chen");
        assert_eq!(source.actor_reads(), 1);
        assert_eq!(source.role_searches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let source = Arc::new(
            InMemoryClinicalSource::new().with_latency(Duration::from_millis(50)),
        );
        source.add_actor(practitioner("P1", "Dr. Chen")).await;
        let resolver = ProviderResolver::new(source.clone());
        assert_eq!(resolver.cached_entries().await, 0);

        let (a, b, c) = tokio::join!(
            resolver.resolve_actor("Practitioner/P1"),
            resolver.resolve_actor("Practitioner/P1"),
            resolver.resolve_actor("Practitioner/P1"),
        );

        assert_eq!(source.actor_reads(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn test_failure_returns_placeholder_and_is_not_cached() {
        let source = Arc::new(InMemoryClinicalSource::new());
        let resolver = ProviderResolver::new(source.clone());

        let actor = resolver.resolve_actor("Practitioner/missing").await;
        assert_eq!(actor.display_name, UNKNOWN_PROVIDER);
        assert_eq!(actor.id, "missing");
        assert!(!actor.active);

        // 之后数据可用时，重试必须重新读取
        source.add_actor(practitioner("missing", "Dr. Late")).await;
        let actor = resolver.resolve_actor("Practitioner/missing").await;
        assert_eq!(actor.display_name, "Dr. Late");
        assert_eq!(source.actor_reads(), 2);
    }

    #[tokio::test]
    async fn test_role_enrichment() {
        let source = Arc::new(InMemoryClinicalSource::new());
        source.add_actor(practitioner("P2", "Dr. Osei")).await;
        source
            .add_role(RoleRecord {
                id: "role-old".to_string(),
                practitioner_ref: Some("Practitioner/P2".to_string()),
                organization_ref: Some("Organization/old".to_string()),
                specialty: Some("General practice".to_string()),
                department: None,
                active: false,
            })
            .await;
        source
            .add_role(RoleRecord {
                id: "role-1".to_string(),
                practitioner_ref: Some("Practitioner/P2".to_string()),
                organization_ref: Some("Organization/main".to_string()),
                specialty: Some("Nephrology".to_string()),
                department: Some("Renal Unit".to_string()),
                active: true,
            })
            .await;
        let resolver = ProviderResolver::new(source);

        let actor = resolver.resolve_actor("Practitioner/P2").await;
        assert_eq!(actor.specialty_or_type.as_deref(), Some("Nephrology"));
        assert_eq!(actor.organization_ref.as_deref(), Some("Organization/main"));
        assert_eq!(actor.department.as_deref(), Some("Renal Unit"));
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let source = Arc::new(InMemoryClinicalSource::new());
        source.add_actor(organization("lab", "Central Lab")).await;
        let resolver = ProviderResolver::new(source.clone());

        let actor = resolver.resolve_actor("Organization/lab").await;
        assert_eq!(actor.kind, ActorKind::Organization);
        resolver.resolve_actor("Organization/lab").await;
        assert_eq!(source.actor_reads(), 1);
        // 组织不查询执业角色
        assert_eq!(source.role_searches(), 0);

        resolver.clear_cache().await;
        assert_eq!(resolver.cached_entries().await, 0);
        resolver.resolve_actor("Organization/lab").await;
        assert_eq!(source.actor_reads(), 2);
    }

    #[tokio::test]
    async fn test_context_survives_partial_failure() {
        let source = Arc::new(InMemoryClinicalSource::new());
        source
            .add_order(OrderRecord {
                id: "ord-1".to_string(),
                subject_ref: "Patient/p1".to_string(),
                requester_ref: Some("Practitioner/orderer".to_string()),
                performer_refs: Vec::new(),
                authored_on: None,
                status: Some("active".to_string()),
                display: None,
            })
            .await;
        source.add_actor(practitioner("orderer", "Dr. Order")).await;
        source.fail_actor("Practitioner/orderer").await;
        source.add_actor(practitioner("tech", "Tech Lee")).await;
        source.add_actor(practitioner("path", "Dr. Patel")).await;
        source.add_actor(organization("lab", "Central Lab")).await;

        let mut result = ResultRecord::new("obs-1", ResultKind::Observation, "Patient/p1");
        result.order_ref = Some("ServiceRequest/ord-1".to_string());
        result.performer_refs = vec![
            "Practitioner/tech".to_string(),
            "Organization/lab".to_string(),
        ];
        result.reporter_ref = Some("Practitioner/path".to_string());

        let resolver = ProviderResolver::new(source);
        let context = resolver.extract_actor_context(&result, None).await;

        assert_eq!(context.ordering.unwrap().display_name, UNKNOWN_PROVIDER);
        assert_eq!(context.performing.unwrap().display_name, "Tech Lee");
        assert_eq!(context.reporting.unwrap().display_name, "Dr. Patel");
        assert_eq!(context.responsible.unwrap().display_name, "Central Lab");
    }

    #[tokio::test]
    async fn test_responsible_falls_back_to_ordering() {
        let source = Arc::new(InMemoryClinicalSource::new());
        source
            .add_order(OrderRecord {
                id: "ord-2".to_string(),
                subject_ref: "Patient/p1".to_string(),
                requester_ref: Some("Practitioner/orderer".to_string()),
                performer_refs: Vec::new(),
                authored_on: None,
                status: None,
                display: None,
            })
            .await;
        source.add_actor(practitioner("orderer", "Dr. Order")).await;

        let result = ResultRecord::new("obs-2", ResultKind::Observation, "Patient/p1");
        let resolver = ProviderResolver::new(source);
        let context = resolver
            .extract_actor_context(&result, Some("ServiceRequest/ord-2"))
            .await;

        assert_eq!(context.ordering.as_ref().unwrap().display_name, "Dr. Order");
        assert_eq!(context.responsible, context.ordering);
        assert!(context.performing.is_none());
        assert!(context.reporting.is_none());
    }
}

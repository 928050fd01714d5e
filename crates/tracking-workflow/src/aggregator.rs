//! 医生结果聚合
//!
//! 按医生查询患者的结果，以及统计参与患者诊疗的医生/组织

use crate::resolver::ProviderResolver;
use crate::source::{canonical, ClinicalDataSource, OrderQuery, ResultQuery};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracking_core::{Actor, Reference, Result, ResultRecord};

/// 查询模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderResultsMode {
    Ordered,   // 由该医生开单
    Performed, // 由该医生执行
    All,       // 两者并集
}

/// 参与方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Involvement {
    Ordering,
    Performing,
    Reporting,
}

/// 医生/组织在患者诊疗中的参与统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInvolvement {
    pub actor: Actor,
    pub involvement: BTreeSet<Involvement>,
    pub result_count: usize,
}

#[derive(Debug, Default)]
struct Tally {
    reference: String,
    involvement: BTreeSet<Involvement>,
    count: usize,
}

/// 医生结果聚合器
pub struct ProviderResultAggregator {
    source: Arc<dyn ClinicalDataSource>,
    resolver: Arc<ProviderResolver>,
}

impl std::fmt::Debug for ProviderResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderResultAggregator")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl ProviderResultAggregator {
    pub fn new(source: Arc<dyn ClinicalDataSource>, resolver: Arc<ProviderResolver>) -> Self {
        Self { source, resolver }
    }

    /// 查询医生相关的结果，按生效时间倒序（无时间的排在最后）
    pub async fn get_provider_results(
        &self,
        patient_id: &str,
        provider_ref: &str,
        mode: ProviderResultsMode,
    ) -> Result<Vec<ResultRecord>> {
        let mut results = match mode {
            ProviderResultsMode::Ordered => self.ordered_results(patient_id, provider_ref).await?,
            ProviderResultsMode::Performed => {
                self.performed_results(patient_id, provider_ref).await?
            }
            ProviderResultsMode::All => {
                let (ordered, performed) = tokio::join!(
                    self.ordered_results(patient_id, provider_ref),
                    self.performed_results(patient_id, provider_ref),
                );

                let mut seen = HashSet::new();
                ordered?
                    .into_iter()
                    .chain(performed?)
                    .filter(|result| seen.insert(result.id.clone()))
                    .collect()
            }
        };

        results.sort_by(|a, b| b.effective_time.cmp(&a.effective_time));
        Ok(results)
    }

    async fn ordered_results(
        &self,
        patient_id: &str,
        provider_ref: &str,
    ) -> Result<Vec<ResultRecord>> {
        let orders = self
            .source
            .search_orders(&OrderQuery {
                patient_id: patient_id.to_string(),
                requester: Some(provider_ref.to_string()),
            })
            .await?;

        if orders.is_empty() {
            return Ok(Vec::new());
        }

        self.source
            .search_results(&ResultQuery {
                patient_id: patient_id.to_string(),
                based_on: orders.iter().map(|order| order.reference()).collect(),
                performer: None,
            })
            .await
    }

    async fn performed_results(
        &self,
        patient_id: &str,
        provider_ref: &str,
    ) -> Result<Vec<ResultRecord>> {
        self.source
            .search_results(&ResultQuery {
                patient_id: patient_id.to_string(),
                based_on: Vec::new(),
                performer: Some(provider_ref.to_string()),
            })
            .await
    }

    /// 统计参与患者诊疗的医生/组织，按出现次数倒序
    ///
    /// 无法解析的参与者不出现在结果中。
    pub async fn get_patient_providers(
        &self,
        patient_id: &str,
    ) -> Result<Vec<ProviderInvolvement>> {
        let order_query = OrderQuery {
            patient_id: patient_id.to_string(),
            requester: None,
        };
        let result_query = ResultQuery {
            patient_id: patient_id.to_string(),
            ..Default::default()
        };
        let (orders, results) = tokio::join!(
            self.source.search_orders(&order_query),
            self.source.search_results(&result_query),
        );

        let mut tallies: HashMap<String, Tally> = HashMap::new();
        let mut count = |reference: &str, involvement: Involvement| {
            if Reference::parse(reference).is_err() {
                return;
            }
            let entry = tallies.entry(canonical(reference)).or_insert_with(|| Tally {
                reference: reference.to_string(),
                ..Default::default()
            });
            entry.involvement.insert(involvement);
            entry.count += 1;
        };

        for order in &orders? {
            if let Some(requester) = &order.requester_ref {
                count(requester, Involvement::Ordering);
            }
        }

        for result in &results? {
            for performer in &result.performer_refs {
                count(performer, Involvement::Performing);
            }
            if let Some(reporter) = &result.reporter_ref {
                count(reporter, Involvement::Reporting);
            }
        }

        let resolved = join_all(tallies.into_values().map(|tally| async move {
            match self.resolver.try_resolve_actor(&tally.reference).await {
                Ok(actor) => Some(ProviderInvolvement {
                    actor,
                    involvement: tally.involvement,
                    result_count: tally.count,
                }),
                Err(e) => {
                    tracing::debug!("Excluding unresolvable actor {}: {}", tally.reference, e);
                    None
                }
            }
        }))
        .await;

        let mut providers: Vec<ProviderInvolvement> = resolved.into_iter().flatten().collect();
        providers.sort_by(|a, b| {
            b.result_count
                .cmp(&a.result_count)
                .then_with(|| a.actor.display_name.cmp(&b.actor.display_name))
        });
        Ok(providers)
    }
}

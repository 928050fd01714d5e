//! 责任追踪引擎演示程序
//!
//! 展示结果追踪、参与者解析、按时间推进的升级告警，以及动作完成后的关闭

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracking_core::{
    ActionKind, ContactInfo, OrderRecord, Quantity, RawActorRecord, Reference, ReferenceKind,
    ReferenceRange, ResultKind, ResultRecord, RoleRecord,
};
use tracking_workflow::{
    AccountabilityEngine, InMemoryClinicalSource, InMemoryRecordStore, ProviderResultsMode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 临床结果责任追踪演示\n");

    // 1. 准备临床数据
    let source = Arc::new(InMemoryClinicalSource::new());
    setup_providers(&source).await;
    let results = setup_results(&source).await;
    println!("✅ 加载了 {} 个结果", results.len());

    let store = Arc::new(InMemoryRecordStore::new());
    let engine = AccountabilityEngine::new(source.clone(), store.clone());

    // 2. 为每个结果建立追踪记录
    let mut records = Vec::new();
    for result in &results {
        let record = engine.track(result, None).await?;
        println!(
            "📋 {} → 优先级 {}，时限 {} 分钟，负责人 {}",
            result.display.as_deref().unwrap_or(&result.id),
            record.priority.as_str(),
            record.time_limit_minutes,
            record
                .actor_context
                .responsible
                .as_ref()
                .map(|a| a.display_name.as_str())
                .unwrap_or("-")
        );
        records.push(record);
    }
    println!("   参与者读取次数: {}", source.actor_reads());

    // 3. 模拟时间推进
    let start = records[0].created_at;
    for minutes in [10, 16, 31, 61] {
        let now = start + Duration::minutes(minutes);
        let alerts = engine.sweep(None, now).await?;
        println!("\n⏰ T+{} 分钟: {} 条升级告警", minutes, alerts.len());
        for alert in &alerts {
            println!(
                "   - {} 级别 {} {:?}{}",
                alert.result_id,
                alert.level,
                alert.action,
                if alert.overdue { " (已超时)" } else { "" }
            );
        }
    }

    // 4. 处理常规结果
    let routine_id = records[2].id.clone().unwrap_or_default();
    let resolved = engine.complete_action(&routine_id, ActionKind::Review).await?;
    println!("\n✅ {} 审阅完成，状态: {:?}", resolved.result_id, resolved.status);

    // 5. 系统概览
    let overview = engine.overview(start + Duration::minutes(61)).await?;
    println!("\n📊 追踪概览:");
    println!("   待审阅: {}", overview.pending_review);
    println!("   处理中: {}", overview.in_progress);
    println!("   已超时: {}", overview.overdue);

    // 6. 医生视角
    let ordered = engine
        .provider_results("p-1", "Practitioner/dr-ortiz", ProviderResultsMode::All)
        .await?;
    println!("\n👩‍⚕️ Dr. Ortiz 相关结果: {}", ordered.len());

    for provider in engine.patient_providers("p-1").await? {
        println!(
            "   - {} ({:?}): {} 次",
            provider.actor.display_name, provider.involvement, provider.result_count
        );
    }

    println!("\n🎉 演示完成!");
    Ok(())
}

async fn setup_providers(source: &InMemoryClinicalSource) {
    let practitioner = |id: &str, name: &str| RawActorRecord {
        reference: Reference::new(ReferenceKind::Practitioner, id),
        name: Some(name.to_string()),
        specialty_or_type: None,
        organization_ref: None,
        contact: ContactInfo {
            email: Some(format!("{}@example.org", id)),
            phone: None,
        },
        active: Some(true),
    };

    source.add_actor(practitioner("dr-ortiz", "Dr. Elena Ortiz")).await;
    source.add_actor(practitioner("lab-tech-3", "Sam Whitaker")).await;
    source.add_actor(practitioner("rad-9", "Dr. Priya Natarajan")).await;
    source
        .add_actor(RawActorRecord {
            reference: Reference::new(ReferenceKind::Organization, "central-lab"),
            name: Some("Central Laboratory".to_string()),
            specialty_or_type: Some("Laboratory".to_string()),
            organization_ref: None,
            contact: ContactInfo::default(),
            active: Some(true),
        })
        .await;
    source
        .add_role(RoleRecord {
            id: "role-ortiz".to_string(),
            practitioner_ref: Some("Practitioner/dr-ortiz".to_string()),
            organization_ref: Some("Organization/st-mary".to_string()),
            specialty: Some("Nephrology".to_string()),
            department: Some("Renal Unit".to_string()),
            active: true,
        })
        .await;
    source
        .add_order(OrderRecord {
            id: "sr-55".to_string(),
            subject_ref: "Patient/p-1".to_string(),
            requester_ref: Some("Practitioner/dr-ortiz".to_string()),
            performer_refs: vec!["Organization/central-lab".to_string()],
            authored_on: Some(Utc::now()),
            status: Some("active".to_string()),
            display: Some("Basic metabolic panel".to_string()),
        })
        .await;
}

async fn setup_results(source: &InMemoryClinicalSource) -> Vec<ResultRecord> {
    // 危急值
    let mut potassium = ResultRecord::new("obs-k", ResultKind::Observation, "Patient/p-1");
    potassium.display = Some("Potassium".to_string());
    potassium.interpretation_codes = vec!["HH".to_string()];
    potassium.order_ref = Some("ServiceRequest/sr-55".to_string());
    potassium.performer_refs = vec![
        "Organization/central-lab".to_string(),
        "Practitioner/lab-tech-3".to_string(),
    ];
    potassium.value = Some(Quantity {
        value: 6.8,
        unit: Some("mmol/L".to_string()),
    });
    potassium.effective_time = Some(Utc::now());

    // 无判读代码，但数值超出参考范围
    let mut sodium = ResultRecord::new("obs-na", ResultKind::Observation, "Patient/p-1");
    sodium.display = Some("Sodium".to_string());
    sodium.order_ref = Some("ServiceRequest/sr-55".to_string());
    sodium.value = Some(Quantity {
        value: 131.0,
        unit: Some("mmol/L".to_string()),
    });
    sodium.reference_range = Some(ReferenceRange {
        low: Some(135.0),
        high: Some(145.0),
    });

    // 常规报告
    let mut report = ResultRecord::new("dr-cxr", ResultKind::DiagnosticReport, "Patient/p-1");
    report.display = Some("Chest X-ray".to_string());
    report.interpretation_codes = vec!["N".to_string()];
    report.reporter_ref = Some("Practitioner/rad-9".to_string());
    report.performer_refs = vec!["Practitioner/rad-9".to_string()];
    report.effective_time = Some(Utc::now() - Duration::days(1));

    let results = vec![potassium, sodium, report];
    for result in &results {
        source.add_result(result.clone()).await;
    }
    results
}

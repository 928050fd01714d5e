//! 责任追踪服务主程序

mod settings;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use settings::{ServerConfig, SweepConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracking_integration::FhirConnector;
use tracking_workflow::AccountabilityEngine;

/// 责任追踪服务命令行参数
#[derive(Parser, Debug)]
#[command(name = "tracking-server")]
#[command(about = "临床结果责任追踪与升级服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/tracking.toml")]
    config: String,

    /// 日志级别（默认使用配置文件中的 logging.level）
    #[arg(short, long)]
    log_level: Option<String>,

    /// 只执行一次扫描后退出
    #[arg(long)]
    once: bool,

    /// 启动时为这些结果建立追踪记录
    #[arg(long = "track", value_name = "RESULT_ID")]
    track: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let server_config = ServerConfig::load(&args.config)?;

    // 初始化日志
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| server_config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level.as_str())
        .init();

    info!("启动责任追踪服务...");
    server_config.validate()?;

    info!("服务配置:");
    info!("  FHIR服务器: {}", server_config.fhir.base_url);
    info!("  扫描间隔: {}秒", server_config.sweep.interval_secs);
    if !server_config.sweep.patients.is_empty() {
        info!("  扫描患者: {}", server_config.sweep.patients.join(", "));
    }

    let rules = server_config.rule_table()?;
    let connector = Arc::new(
        FhirConnector::new(&server_config.fhir).context("Failed to create FHIR connector")?,
    );
    let engine = AccountabilityEngine::with_rules(connector.clone(), connector, rules);

    for result_id in &args.track {
        match engine.track_result(result_id, None).await {
            Ok(record) => info!(
                "Tracking {} as {} (record {})",
                result_id,
                record.priority.as_str(),
                record.record_ref()
            ),
            Err(e) => error!("Failed to track result {}: {}", result_id, e),
        }
    }

    if args.once {
        run_sweep(&engine, &server_config.sweep).await;
        return Ok(());
    }

    let period = Duration::from_secs(server_config.sweep.interval_secs);
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => run_sweep(&engine, &server_config.sweep).await,
            _ = tokio::signal::ctrl_c() => {
                info!("收到停止信号，服务退出");
                break;
            }
        }
    }

    Ok(())
}

/// 执行一轮升级扫描并输出超时概况
async fn run_sweep(engine: &AccountabilityEngine, sweep: &SweepConfig) {
    let now = Utc::now();

    let targets: Vec<Option<&str>> = if sweep.patients.is_empty() {
        vec![None]
    } else {
        sweep.patients.iter().map(|p| Some(p.as_str())).collect()
    };

    let mut emitted = 0;
    for patient in targets {
        match engine.sweep(patient, now).await {
            Ok(alerts) => emitted += alerts.len(),
            Err(e) => error!("Escalation sweep failed for {:?}: {}", patient, e),
        }
    }

    match engine.overview(now).await {
        Ok(overview) => {
            info!(
                "Sweep complete: {} alerts, {} pending review, {} in progress, {} overdue",
                emitted, overview.pending_review, overview.in_progress, overview.overdue
            );
            if overview.overdue > 0 {
                if let Ok(overdue) = engine.overdue(None, now).await {
                    for record in overdue {
                        warn!(
                            "Overdue: {} for patient {} ({} minutes past {} minute limit)",
                            record.record_ref(),
                            record.patient_id,
                            record.elapsed_minutes(now) - record.time_limit_minutes,
                            record.time_limit_minutes
                        );
                    }
                }
            }
        }
        Err(e) => error!("Failed to build tracking overview: {}", e),
    }
}

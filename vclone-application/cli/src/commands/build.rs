//! 构建命令

use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tracing::warn;
use vclone_builder::{Artifact, BuildReport, CloneBuilder};
use vclone_common::ARTIFACT_STATE_URI;
use vclone_driver::{DriverFactory, Simulator, VsphereClientFactory};

use super::common::load_config;
use super::output::{print_json, print_table};

pub async fn handle(config: Option<String>, simulate: bool, format: &str) -> Result<()> {
    let (path, config) = load_config(config)?;
    println!("{} 加载配置: {}", "⏳".cyan(), path.display());

    let factory: Arc<dyn DriverFactory> = if simulate {
        println!("{} 使用模拟器执行构建", "ℹ".yellow());
        Arc::new(Simulator::new())
    } else {
        Arc::new(VsphereClientFactory::default())
    };

    let builder = CloneBuilder::new(config, factory);

    // Ctrl-C 取消正在运行的构建
    let cancel = builder.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消构建");
            cancel.cancel();
        }
    });

    match builder.run().await {
        Ok((artifact, report)) => {
            if format == "json" {
                println!("{}", artifact.to_json()?);
            } else {
                print_report(&report);
                print_artifact(&artifact);
            }
            Ok(())
        }
        Err(err) => {
            if format == "json" {
                print_json(&err.report)?;
            } else {
                print_report(&err.report);
            }

            for warning in &err.warnings {
                println!("{} {}", "⚠".yellow(), warning);
            }
            if !err.retained.is_empty() {
                println!("\n{} 以下变更已保留，需要手动处理:", "ℹ".yellow());
                for effect in &err.retained {
                    println!("  - {}", effect);
                }
            }

            let stage = err.stage;
            Err(err).with_context(|| format!("构建在阶段 [{}] 失败", stage))
        }
    }
}

fn print_report(report: &BuildReport) {
    println!();
    print_table(&report.steps);
    println!();

    let summary = format!(
        "共 {} 个阶段: 成功 {}, 失败 {}, 跳过 {} (耗时 {:?})",
        report.total_steps,
        report.success_count,
        report.failed_count,
        report.skipped_count,
        report.duration
    );
    if report.is_success() {
        println!("{} {}", "✓".green(), summary);
    } else {
        println!("{} {}", "✗".red(), summary);
    }
}

fn print_artifact(artifact: &Artifact) {
    println!("\n{} 构建产物: {}", "✓".green(), artifact.to_string().bold());
    println!("  构建器:   {}", artifact.builder_id());
    println!("  虚拟机:   {}", artifact.vm().reference);

    let image = artifact.provenance();
    println!("  区域:     {}", image.provider_region);
    if let Some(source) = &image.source_image_id {
        println!("  克隆源:   {}", source);
    }
    for (key, value) in &image.labels {
        println!("  {:<22} {}", key, value);
    }
    for file in artifact.files() {
        println!("  文件:     {}", file.display());
    }
    if artifact.state(ARTIFACT_STATE_URI).is_some() {
        println!("  溯源元数据: {}", ARTIFACT_STATE_URI);
    }
}

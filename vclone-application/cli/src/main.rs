//! vclone CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vclone")]
#[command(about = "vclone - vSphere 克隆定制镜像构建工具", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行构建
    Build {
        /// 配置文件路径（缺省时自动查找）
        #[arg(short, long)]
        config: Option<String>,

        /// 使用内置模拟器代替真实 vCenter
        #[arg(long)]
        simulate: bool,

        /// 输出格式 (table/json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 校验配置文件（不连接 vCenter）
    Validate {
        /// 配置文件路径（缺省时自动查找）
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志，RUST_LOG 优先于 --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vclone CLI 启动");

    match cli.command {
        Commands::Build {
            config,
            simulate,
            format,
        } => commands::build::handle(config, simulate, &format).await?,
        Commands::Validate { config } => commands::validate::handle(config)?,
    }

    Ok(())
}

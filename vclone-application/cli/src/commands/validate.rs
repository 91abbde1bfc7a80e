//! 配置校验命令

use anyhow::{bail, Result};
use colored::Colorize;
use vclone_builder::{BuildError, StageSet};

use super::common::load_config;

pub fn handle(config: Option<String>) -> Result<()> {
    let (path, mut config) = load_config(config)?;
    println!("{} 校验配置: {}", "⏳".cyan(), path.display());

    match config.prepare() {
        Ok(()) => {
            println!("{} 配置有效", "✓".green());
            println!("  虚拟机:   {}", config.location.vm_name);
            println!("  克隆源:   {}", config.clone.template);

            let stages = StageSet::from_config(&config).enabled();
            if stages.is_empty() {
                println!("  后处理:   无");
            } else {
                let names: Vec<String> = stages.iter().map(|s| s.to_string()).collect();
                println!("  后处理:   {}", names.join(" → "));
            }
            Ok(())
        }
        Err(BuildError::InvalidConfig(errors)) => {
            println!("{} 发现 {} 个配置问题:", "✗".red(), errors.len());
            for err in &errors {
                println!("  * {}", err);
            }
            bail!("配置校验失败: {}", path.display())
        }
        Err(err) => Err(err.into()),
    }
}

//! 公共工具函数模块

use anyhow::{Context, Result};
use std::path::PathBuf;
use vclone_builder::Config;

/// 确定配置文件路径：命令行参数优先，否则按默认位置查找
pub fn resolve_config_path(path: Option<String>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::find_config_file()
            .context("未指定配置文件，且默认位置 (./vclone.toml, ~/.config/vclone/) 均不存在"),
    }
}

/// 加载配置文件并应用环境变量覆盖
pub fn load_config(path: Option<String>) -> Result<(PathBuf, Config)> {
    let path = resolve_config_path(path)?;
    let config = Config::load(&path)?;
    Ok((path, config))
}

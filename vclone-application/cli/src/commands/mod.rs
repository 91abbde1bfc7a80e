//! CLI 命令处理模块

pub mod build;
pub mod common; // 公共工具函数
pub mod output;
pub mod validate;

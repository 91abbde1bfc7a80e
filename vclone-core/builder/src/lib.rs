//! vclone 构建核心
//!
//! 从已有虚拟机或模板克隆出新虚拟机，完成硬件配置与客户机定制，
//! 等待客户机网络就绪后执行后处理（快照、转换模板、导出、内容库导入），
//! 最终组装为不可变的构建产物。
//!
//! # 流水线
//!
//! ```text
//! 配置校验 → 连接 → 解析克隆源 → 克隆 → 硬件配置 → 挂载光驱/软驱 → 客户机定制
//!   → 开机 → 等待定制完成 → 等待 IP → 关机 → 移除可移动设备
//!   → 快照 → 转换模板 → 导出 → 导入内容库 → 组装产物
//! ```
//!
//! # 示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use vclone_builder::{CloneBuilder, Config};
//! use vclone_driver::VsphereClientFactory;
//!
//! let config = Config::load(std::path::Path::new("build.yaml"))?;
//! let (artifact, report) = CloneBuilder::new(config, Arc::new(VsphereClientFactory::default()))
//!     .run()
//!     .await?;
//! println!("{}", artifact);
//! ```

pub mod artifact;
pub mod clone;
pub mod config;
pub mod connection;
pub mod customize;
pub mod error;
pub mod hardware;
pub mod media;
pub mod pipeline;
pub mod poll;
pub mod power;
pub mod report;
pub mod resolver;
pub mod stages;

pub use artifact::{Artifact, ArtifactAssembler, LocationLabels, BUILDER_ID, PROVIDER_NAME};
pub use clone::{CloneExecutor, CloneOutcome, CloneSpec, VmHandle, VmState};
pub use config::Config;
pub use connection::{Connection, Placement};
pub use customize::{CustomizationEngine, CustomizationState, IpWaitPolicy};
pub use error::{BuildError, PipelineError, Result};
pub use pipeline::CloneBuilder;
pub use poll::{Poll, PollPolicy, WaitError};
pub use report::{BuildReport, Stage, StepReport, StepStatus};
pub use resolver::{SourceReference, TemplateResolver};
pub use stages::{StageOutputs, StageSet};

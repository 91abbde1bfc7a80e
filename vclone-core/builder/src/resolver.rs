//! 克隆源解析

use std::fmt;
use tracing::debug;
use uuid::Uuid;
use vclone_driver::{VmQuery, VmSummary};

use crate::connection::Connection;
use crate::error::{BuildError, Result};

/// 克隆源引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    /// 清单路径，例如 `/DC0/vm/templates/base`
    Path(String),
    Name(String),
    Uuid(String),
}

impl SourceReference {
    /// 包含 `/` 视为路径；可解析为 UUID 的视为 UUID（统一为小写连字符格式）；其余视为名称
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('/') {
            return Self::Path(raw.to_string());
        }
        match Uuid::parse_str(raw) {
            Ok(uuid) => Self::Uuid(uuid.hyphenated().to_string()),
            Err(_) => Self::Name(raw.to_string()),
        }
    }

    fn query(&self) -> VmQuery {
        match self {
            Self::Path(p) => VmQuery::Path(p.clone()),
            Self::Name(n) => VmQuery::Name(n.clone()),
            Self::Uuid(u) => VmQuery::Uuid(u.clone()),
        }
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(v) | Self::Name(v) | Self::Uuid(v) => write!(f, "{}", v),
        }
    }
}

/// 克隆源解析器（只读）
pub struct TemplateResolver<'a> {
    conn: &'a Connection,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn resolve(&self, reference: &SourceReference) -> Result<VmSummary> {
        let mut found = self.conn.driver().find_vms(&reference.query()).await?;
        debug!("解析克隆源 {}: {} 个结果", reference, found.len());

        match found.len() {
            0 => Err(BuildError::SourceNotFound(reference.to_string())),
            1 => Ok(found.remove(0)),
            _ => Err(BuildError::AmbiguousSource {
                reference: reference.to_string(),
                candidates: found.into_iter().map(|vm| vm.path).collect(),
            }),
        }
    }
}

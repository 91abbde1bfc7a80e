//! 导出阶段
//!
//! 申请导出租约，写出 OVF 描述符并下载磁盘文件，按需生成清单 (`.mf`)
//! 并打包为 OVA。无论成功与否都会结束租约。

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vclone_driver::Driver;

use crate::clone::VmHandle;
use crate::config::{ExportConfig, ExportFormat, ManifestAlgorithm};
use crate::error::{BuildError, Result};
use crate::report::Stage;

/// 导出结果
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

/// 导出虚拟机
pub async fn export(
    driver: &dyn Driver,
    vm: &VmHandle,
    config: &ExportConfig,
    cancel: &CancellationToken,
) -> Result<ExportOutput> {
    let directory = config
        .output_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("output-{}", vm.name)));
    let name = config.file_name().to_string();

    prepare_directory(&directory, config.force).await?;
    info!("导出虚拟机 {} 到 {}", vm.name, directory.display());

    let lease = driver.export_lease(&vm.reference).await?;
    let downloaded = download_all(driver, &lease, &directory, &name, cancel).await;

    // 租约必须结束
    if let Err(e) = driver.complete_export(&vm.reference).await {
        warn!("结束导出租约失败: {}", e);
        if downloaded.is_ok() {
            return Err(e.into());
        }
    }
    let mut files = downloaded?;

    if let Some(label) = config.manifest.label() {
        let manifest = directory.join(format!("{}.mf", name));
        write_manifest(config.manifest, label, &files, &manifest).await?;
        files.push(manifest);
    }

    if config.format == ExportFormat::Ova {
        let ova = directory.join(format!("{}.ova", name));
        files = pack_ova(files, ova).await?;
    }

    info!("导出完成: {} 个文件", files.len());
    Ok(ExportOutput { directory, files })
}

async fn prepare_directory(directory: &Path, force: bool) -> Result<()> {
    if tokio::fs::try_exists(directory).await? {
        if !force {
            return Err(BuildError::StageExecution {
                stage: Stage::Export,
                reason: format!(
                    "输出目录已存在: {} (设置 'force' 以覆盖)",
                    directory.display()
                ),
            });
        }
        warn!("删除已存在的输出目录: {}", directory.display());
        tokio::fs::remove_dir_all(directory).await?;
    }
    tokio::fs::create_dir_all(directory).await?;
    Ok(())
}

async fn download_all(
    driver: &dyn Driver,
    lease: &vclone_driver::ExportLease,
    directory: &Path,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let descriptor = directory.join(format!("{}.ovf", name));
    tokio::fs::write(&descriptor, lease.descriptor.as_bytes()).await?;
    let mut files = vec![descriptor];

    for item in &lease.items {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled {
                operation: "导出".to_string(),
            });
        }
        let dest = directory.join(local_file_name(&item.name)?);
        debug!("下载 {} ({} 字节)", item.name, item.size);
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BuildError::Cancelled { operation: "导出".to_string() });
            }
            written = driver.download(item, &dest) => written?,
        };
        debug!("已写入 {}: {} 字节", dest.display(), written);
        files.push(dest);
    }

    Ok(files)
}

/// 租约文件名只能是单个普通路径分量
fn local_file_name(name: &str) -> Result<&OsStr> {
    let path = Path::new(name);
    match path.file_name() {
        Some(file) if path.components().count() == 1 && !name.contains('\\') => Ok(file),
        _ => Err(BuildError::StageExecution {
            stage: Stage::Export,
            reason: format!("导出租约包含非法文件名: {:?}", name),
        }),
    }
}

/// 计算文件摘要
fn digest_file(algorithm: ManifestAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let hash = match algorithm {
        ManifestAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            io::copy(&mut file, &mut hasher)?;
            hex::encode(hasher.finalize())
        }
        ManifestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            hex::encode(hasher.finalize())
        }
        ManifestAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)?;
            hex::encode(hasher.finalize())
        }
        ManifestAlgorithm::None => String::new(),
    };
    Ok(hash)
}

/// 生成清单，每行格式为 `SHA256(file.vmdk)= <hex>`
async fn write_manifest(
    algorithm: ManifestAlgorithm,
    label: &'static str,
    files: &[PathBuf],
    manifest: &Path,
) -> Result<()> {
    let files = files.to_vec();
    let manifest = manifest.to_path_buf();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut out = File::create(&manifest)?;
        for path in &files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            writeln!(out, "{}({})= {}", label, file_name, digest_file(algorithm, path)?)?;
        }
        out.flush()
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

    Ok(())
}

/// 打包为 OVA（描述符必须是第一个条目），打包后删除散件
async fn pack_ova(files: Vec<PathBuf>, ova: PathBuf) -> Result<Vec<PathBuf>> {
    let result = tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
        let mut builder = tar::Builder::new(File::create(&ova)?);
        for path in &files {
            let entry_name = path
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "无效的文件名"))?;
            builder.append_path_with_name(path, entry_name)?;
        }
        builder.into_inner()?.flush()?;

        for path in &files {
            std::fs::remove_file(path)?;
        }
        Ok(ova)
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

    Ok(vec![result])
}

//! 构建流水线
//!
//! 按固定顺序执行各阶段，任一阶段失败立即停止，不做自动重试。
//!
//! 清理策略：
//! - 移除可移动设备及之前的阶段失败（或取消）时删除已克隆的虚拟机，删除失败记为警告
//! - 后处理阶段失败时保留虚拟机，并在错误中列出已生效的变更
//! - 无论成功与否，返回前都会释放会话

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vclone_driver::{Driver, DriverFactory};

use crate::artifact::{Artifact, ArtifactAssembler, LocationLabels};
use crate::clone::{CloneExecutor, CloneSpec, VmHandle, VmState};
use crate::config::Config;
use crate::connection::Connection;
use crate::customize::{self, CustomizationEngine, IpWaitPolicy};
use crate::error::{BuildError, PipelineError, Result};
use crate::hardware;
use crate::media;
use crate::power;
use crate::report::{BuildReport, Stage, StepReport};
use crate::resolver::{SourceReference, TemplateResolver};
use crate::stages::{export, library, snapshot, template, StageOutputs};

/// 克隆构建器
pub struct CloneBuilder {
    config: Config,
    factory: Arc<dyn DriverFactory>,
    cancel: CancellationToken,
}

/// 单次运行的可变状态
struct Run {
    report: BuildReport,
    stage: Stage,
    started: Instant,
    conn: Option<Arc<Connection>>,
    vm: Option<VmHandle>,
    outputs: StageOutputs,
    warnings: Vec<String>,
}

impl Run {
    fn new(name: &str) -> Self {
        Self {
            report: BuildReport::new(name),
            stage: Stage::Validate,
            started: Instant::now(),
            conn: None,
            vm: None,
            outputs: StageOutputs::default(),
            warnings: Vec::new(),
        }
    }

    /// 进入阶段（阶段之间检查取消）
    fn begin(&mut self, stage: Stage, cancel: &CancellationToken) -> Result<()> {
        self.stage = stage;
        self.started = Instant::now();
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled {
                operation: stage.display_name().to_string(),
            });
        }
        info!("阶段 [{}] 开始", stage);
        Ok(())
    }

    fn done(&mut self, output: Option<String>) {
        let elapsed = self.started.elapsed();
        info!("阶段 [{}] 完成 ({:?})", self.stage, elapsed);
        self.report
            .add_step(StepReport::success(self.stage, elapsed, output));
    }

    fn skip(&mut self, stage: Stage) {
        self.report.add_step(StepReport::skipped(stage));
    }
}

impl CloneBuilder {
    pub fn new(config: Config, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            config,
            factory,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部取消信号
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 执行构建
    pub async fn run(mut self) -> std::result::Result<(Artifact, BuildReport), PipelineError> {
        let mut run = Run::new(&self.config.location.vm_name);
        info!("开始构建: {}", self.config.location.vm_name);

        let result = self.execute(&mut run).await;

        match result {
            Ok(artifact) => {
                if let Some(conn) = run.conn.take() {
                    conn.close().await;
                }
                run.report.finalize();
                info!(
                    "构建完成: {} ({:?})",
                    artifact.id(),
                    run.report.duration
                );
                Ok((artifact, run.report))
            }
            Err(source) => {
                let stage = run.stage;
                error!("阶段 [{}] 失败: {}", stage, source);
                run.report.add_step(StepReport::failed(
                    stage,
                    run.started.elapsed(),
                    source.to_string(),
                ));

                if let BuildError::CloneTask {
                    orphan: Some(orphan),
                    ..
                } = &source
                {
                    run.warnings
                        .push(format!("残留虚拟机需手动清理: {}", orphan));
                }

                let retained = self.cleanup(&mut run, stage).await;
                if let Some(conn) = run.conn.take() {
                    conn.close().await;
                }
                run.report.finalize();

                Err(PipelineError {
                    stage,
                    source,
                    warnings: run.warnings,
                    retained,
                    report: run.report,
                })
            }
        }
    }

    async fn execute(&mut self, run: &mut Run) -> Result<Artifact> {
        let cancel = self.cancel.clone();

        // 配置校验（不访问远端）
        run.begin(Stage::Validate, &cancel)?;
        self.config.prepare()?;
        let config = &self.config;
        let spec = CloneSpec::from_config(config);
        spec.validate()?;
        run.done(None);

        // 连接并解析放置位置
        run.begin(Stage::Connect, &cancel)?;
        let conn = Arc::new(Connection::open(self.factory.as_ref(), &config.connect).await?);
        run.conn = Some(conn.clone());
        let placement = conn.resolve_placement(&config.location).await?;
        let driver: &dyn Driver = conn.driver().as_ref();
        run.done(Some(format!(
            "{} / {}",
            conn.endpoint().server,
            placement.datacenter.name
        )));

        run.begin(Stage::ResolveSource, &cancel)?;
        let source = TemplateResolver::new(&conn)
            .resolve(&SourceReference::parse(&config.clone.template))
            .await?;
        run.done(Some(format!("{} ({})", source.path, source.reference)));

        run.begin(Stage::Clone, &cancel)?;
        let poll = config.poll.policy(config.clone.task_timeout);
        let outcome = CloneExecutor::new(&conn, poll.clone(), &cancel)
            .execute(&source, &spec, &placement)
            .await?;
        let mut vm = outcome.vm;
        run.vm = Some(vm.clone());
        run.done(Some(format!("{} ({:?})", vm.reference, outcome.duration)));

        run.begin(Stage::ConfigureHardware, &cancel)?;
        let changed = hardware::configure(driver, &vm, &config.hardware).await?;
        run.done(changed.then(|| "已修改".to_string()));

        if media::needs_attach(&config.cdrom, &config.floppy) {
            run.begin(Stage::AttachMedia, &cancel)?;
            let added = media::attach(driver, &vm, &config.cdrom, &config.floppy).await?;
            run.done(Some(format!("{} 个设备", added)));
        } else {
            run.skip(Stage::AttachMedia);
        }

        let mut engine = match &config.customize {
            Some(customize) => {
                run.begin(Stage::Customize, &cancel)?;
                let spec = customize::build_spec(customize)?;
                let mut engine = CustomizationEngine::new(driver, &vm, poll.clone(), &cancel);
                engine.submit(&spec).await?;
                run.done(Some(spec.identity.kind().to_string()));
                Some(engine)
            }
            None => {
                run.skip(Stage::Customize);
                None
            }
        };

        run.begin(Stage::PowerOn, &cancel)?;
        power::power_on(driver, &vm, &config.boot, &cancel).await?;
        run.done(None);

        match (&mut engine, &config.customize) {
            (Some(engine), Some(customize)) => {
                run.begin(Stage::WaitCustomization, &cancel)?;
                engine.wait_applied(customize.timeout).await?;
                run.done(None);
            }
            _ => run.skip(Stage::WaitCustomization),
        }

        run.begin(Stage::WaitForIp, &cancel)?;
        let ip_policy = IpWaitPolicy::from(&config.wait_ip);
        let ip = match engine.as_mut() {
            Some(engine) => engine.wait_ready(&ip_policy).await?,
            None => customize::wait_for_ip(driver, &vm, &poll, &ip_policy, &cancel).await?,
        };
        drop(engine);
        run.done(Some(ip.to_string()));

        run.begin(Stage::Shutdown, &cancel)?;
        power::shutdown(driver, &vm, &config.shutdown, &poll, &cancel).await?;
        run.done(None);

        if media::needs_detach(&config.cdrom, &config.floppy) {
            run.begin(Stage::DetachMedia, &cancel)?;
            let removed = media::detach(driver, &vm, &config.cdrom, &config.floppy).await?;
            run.done(Some(format!("{} 个设备", removed)));
        } else {
            run.skip(Stage::DetachMedia);
        }

        // ---------- 后处理 ----------

        let mut state_data: BTreeMap<String, Value> = BTreeMap::new();
        state_data.insert("ip_address".to_string(), Value::String(ip.to_string()));

        if config.create_snapshot {
            run.begin(Stage::Snapshot, &cancel)?;
            let snap = snapshot::create(driver, &vm, &config.snapshot_name)
                .await
                .map_err(|e| e.into_stage(Stage::Snapshot))?;
            state_data.insert("snapshot".to_string(), Value::String(snap.name.clone()));
            run.outputs.snapshot = Some(snap);
            run.done(Some(config.snapshot_name.clone()));
        } else {
            run.skip(Stage::Snapshot);
        }

        if config.convert_to_template {
            run.begin(Stage::ConvertToTemplate, &cancel)?;
            template::convert(driver, &mut vm)
                .await
                .map_err(|e| e.into_stage(Stage::ConvertToTemplate))?;
            run.vm = Some(vm.clone());
            run.outputs.template = true;
            state_data.insert("template".to_string(), Value::Bool(true));
            run.done(None);
        } else {
            run.skip(Stage::ConvertToTemplate);
        }

        if let Some(export_config) = &config.export {
            run.begin(Stage::Export, &cancel)?;
            let exported = export::export(driver, &vm, export_config, &cancel)
                .await
                .map_err(|e| e.into_stage(Stage::Export))?;
            state_data.insert(
                "export_directory".to_string(),
                Value::String(exported.directory.display().to_string()),
            );
            run.outputs.export_dir = Some(exported.directory.clone());
            run.outputs.export_files = exported.files;
            run.done(Some(exported.directory.display().to_string()));
        } else {
            run.skip(Stage::Export);
        }

        if let Some(library_config) = &config.content_library_destination {
            run.begin(Stage::ContentLibraryImport, &cancel)?;
            let item = library::import(&conn, &vm, library_config)
                .await
                .map_err(|e| e.into_stage(Stage::ContentLibraryImport))?;
            state_data.insert(
                "content_library_item".to_string(),
                Value::String(item.to_string()),
            );
            run.outputs.library_item = Some(item.clone());
            run.done(Some(item.to_string()));
        } else {
            run.skip(Stage::ContentLibraryImport);
        }

        // ---------- 组装产物 ----------

        run.begin(Stage::Assemble, &cancel)?;
        let location = LocationLabels {
            cluster: placement.cluster.as_ref().map(|o| o.name.clone()),
            host: placement.host.as_ref().map(|o| o.name.clone()),
            datastore: placement.datastore.as_ref().map(|o| o.name.clone()),
        };
        let provenance = ArtifactAssembler::new(driver)
            .provenance(&vm, &location, Some(&source.path))
            .await
            .map_err(|e| e.into_stage(Stage::Assemble))?;

        let artifact = Artifact::new(
            vm,
            location,
            Some(source.path.clone()),
            run.outputs.export_files.clone(),
            state_data,
            provenance,
            self.factory.clone(),
            conn.endpoint().clone(),
            conn.credentials().clone(),
        );
        run.done(Some(artifact.to_string()));

        Ok(artifact)
    }

    /// 失败后的清理，返回保留下来的效果
    async fn cleanup(&self, run: &mut Run, stage: Stage) -> Vec<String> {
        let (Some(vm), Some(conn)) = (run.vm.clone(), run.conn.clone()) else {
            return Vec::new();
        };

        if !stage.destroys_on_failure() {
            let retained = run.outputs.retained_effects(&vm.name);
            for effect in &retained {
                warn!("保留: {}", effect);
            }
            return retained;
        }

        info!("清理已克隆的虚拟机: {}", vm.name);
        let driver = conn.driver().as_ref();
        if vm.state == VmState::Mutable {
            if let Err(e) = power::force_off(driver, &vm).await {
                run.warnings
                    .push(format!("关闭虚拟机 {} 失败: {}", vm.name, e));
            }
        }
        match driver.destroy_vm(&vm.reference).await {
            Ok(()) => {
                run.vm = None;
                Vec::new()
            }
            Err(e) => {
                warn!("删除虚拟机 {} 失败: {}", vm.name, e);
                run.warnings.push(format!(
                    "删除虚拟机 {} ({}) 失败，需手动清理: {}",
                    vm.name, vm.reference, e
                ));
                vec![format!("虚拟机 '{}' 未能删除", vm.name)]
            }
        }
    }
}

//! 客户机定制
//!
//! 状态机：未定制 → 已下发 → 已生效 → 客户机就绪。
//! 每一步都有独立超时：确认超时报告 `CustomizationTimeout`，
//! 网络未就绪报告 `GuestUnreachable`，两者可区分。

use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vclone_driver::{
    AdapterMapping, CustomizationSpec, CustomizationStatus, Driver, GlobalIpSettings, Identity,
    IpSetting, LinuxPrep, ObjectRef, Sysprep,
};

use crate::clone::VmHandle;
use crate::config::{CustomizeConfig, NetworkInterface, WaitIpConfig};
use crate::error::{BuildError, Result};
use crate::poll::{poll_until, Poll, PollPolicy, WaitError};

/// 定制状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomizationState {
    NotCustomized,
    Submitted,
    Applied,
    GuestReady,
}

/// 等待 IP 的策略
#[derive(Debug, Clone)]
pub struct IpWaitPolicy {
    pub timeout: Duration,

    /// IP 保持不变的时长
    pub settle: Duration,

    /// 地址过滤
    pub filter: IpNet,
}

impl From<&WaitIpConfig> for IpWaitPolicy {
    fn from(config: &WaitIpConfig) -> Self {
        Self {
            timeout: config.ip_wait_timeout,
            settle: config.ip_settle_timeout,
            filter: config.ip_wait_address,
        }
    }
}

/// 客户机定制引擎
pub struct CustomizationEngine<'a> {
    driver: &'a dyn Driver,
    vm: &'a VmHandle,
    poll: PollPolicy,
    cancel: &'a CancellationToken,
    state: CustomizationState,
}

impl<'a> CustomizationEngine<'a> {
    pub fn new(
        driver: &'a dyn Driver,
        vm: &'a VmHandle,
        poll: PollPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            driver,
            vm,
            poll,
            cancel,
            state: CustomizationState::NotCustomized,
        }
    }

    pub fn state(&self) -> CustomizationState {
        self.state
    }

    /// 下发定制规范（每台虚拟机只允许一次）
    pub async fn submit(&mut self, spec: &CustomizationSpec) -> Result<()> {
        if self.state != CustomizationState::NotCustomized {
            return Err(BuildError::InvalidCloneSpec(format!(
                "虚拟机 {} 已下发过定制规范",
                self.vm.name
            )));
        }

        info!("下发客户机定制 ({}): {}", spec.identity.kind(), self.vm.name);
        self.driver.customize(&self.vm.reference, spec).await?;
        self.state = CustomizationState::Submitted;
        Ok(())
    }

    /// 等待客户机确认定制完成
    pub async fn wait_applied(&mut self, timeout: Duration) -> Result<()> {
        if self.state != CustomizationState::Submitted {
            return Err(BuildError::InvalidCloneSpec(format!(
                "虚拟机 {} 尚未下发定制规范",
                self.vm.name
            )));
        }

        let policy = self.poll.with_timeout(timeout);
        let driver = self.driver;
        let handle: &'a VmHandle = self.vm;
        let vm = &handle.reference;
        let name = &handle.name;

        let waited = poll_until(&policy, self.cancel, || async move {
            let status = driver.customization_status(vm).await?;
            debug!("客户机定制状态 {}: {:?}", name, status);
            match status {
                CustomizationStatus::Succeeded => Ok(Poll::Ready(())),
                CustomizationStatus::Failed(reason) => Err(BuildError::CustomizationFailed {
                    vm: name.clone(),
                    reason,
                }),
                _ => Ok(Poll::Pending),
            }
        })
        .await;

        match waited {
            Ok(()) => {
                info!("客户机定制已生效: {}", name);
                self.state = CustomizationState::Applied;
                Ok(())
            }
            Err(WaitError::TimedOut { waited }) => Err(BuildError::CustomizationTimeout {
                vm: name.clone(),
                waited,
            }),
            Err(WaitError::Cancelled) => Err(BuildError::Cancelled {
                operation: "等待客户机定制".to_string(),
            }),
            Err(WaitError::Failed(e)) => Err(e),
        }
    }

    /// 等待客户机网络就绪
    pub async fn wait_ready(&mut self, policy: &IpWaitPolicy) -> Result<IpAddr> {
        if self.state != CustomizationState::Applied {
            return Err(BuildError::InvalidCloneSpec(format!(
                "虚拟机 {} 的客户机定制尚未生效",
                self.vm.name
            )));
        }

        let ip = wait_for_ip(self.driver, self.vm, &self.poll, policy, self.cancel).await?;
        self.state = CustomizationState::GuestReady;
        Ok(ip)
    }
}

/// 等待客户机上报符合过滤条件且稳定的 IP
///
/// 未配置客户机定制时流水线也直接使用该函数。
pub async fn wait_for_ip(
    driver: &dyn Driver,
    vm: &VmHandle,
    poll: &PollPolicy,
    policy: &IpWaitPolicy,
    cancel: &CancellationToken,
) -> Result<IpAddr> {
    info!("等待客户机 IP: {} (过滤 {})", vm.name, policy.filter);

    let reference: &ObjectRef = &vm.reference;
    let filter = policy.filter;
    let settle = policy.settle;
    let candidate: Arc<Mutex<Option<(IpAddr, Instant)>>> = Arc::new(Mutex::new(None));

    let waited = poll_until(&poll.with_timeout(policy.timeout), cancel, || {
        let candidate = candidate.clone();
        async move {
            let net = driver.guest_net(reference).await?;
            let found = net.ip_addresses.into_iter().find(|ip| filter.contains(ip));

            let mut guard = candidate
                .lock()
                .map_err(|_| BuildError::InvalidField("IP 等待状态被破坏".to_string()))?;
            let ready = match (found, *guard) {
                (None, _) => {
                    *guard = None;
                    None
                }
                (Some(ip), Some((prev, since))) if prev == ip => {
                    (since.elapsed() >= settle).then_some(ip)
                }
                (Some(ip), _) => {
                    debug!("客户机上报 IP {}，等待稳定 {:?}", ip, settle);
                    *guard = Some((ip, Instant::now()));
                    settle.is_zero().then_some(ip)
                }
            };

            Ok::<_, BuildError>(ready.map(Poll::Ready).unwrap_or(Poll::Pending))
        }
    })
    .await;

    match waited {
        Ok(ip) => {
            info!("客户机 IP: {} -> {}", vm.name, ip);
            Ok(ip)
        }
        Err(WaitError::TimedOut { waited }) => Err(BuildError::GuestUnreachable {
            vm: vm.name.clone(),
            waited,
        }),
        Err(WaitError::Cancelled) => Err(BuildError::Cancelled {
            operation: "等待客户机 IP".to_string(),
        }),
        Err(WaitError::Failed(e)) => Err(e),
    }
}

/// 由配置生成定制规范
pub fn build_spec(config: &CustomizeConfig) -> Result<CustomizationSpec> {
    let identity = if let Some(linux) = &config.linux_options {
        Identity::Linux(LinuxPrep {
            host_name: linux.host_name.clone(),
            domain: linux.domain.clone(),
            time_zone: linux.time_zone.clone(),
            hw_clock_utc: linux.hw_clock_utc,
        })
    } else if let Some(windows) = &config.windows_options {
        Identity::Sysprep(Sysprep {
            computer_name: windows.computer_name.clone(),
            full_name: windows.full_name.clone(),
            organization_name: windows.organization_name.clone(),
            product_key: windows.product_key.clone(),
            admin_password: windows.admin_password.clone(),
            time_zone: windows.time_zone,
            auto_logon: windows.auto_logon,
            auto_logon_count: windows.auto_logon_count,
            run_once_command_list: windows.run_once_command_list.clone(),
            join_domain: windows.join_domain.clone(),
            domain_admin: windows.domain_admin.clone(),
            domain_admin_password: windows.domain_admin_password.clone(),
            workgroup: windows.workgroup.clone(),
        })
    } else if let Some(text) = &config.windows_sysprep_text {
        Identity::SysprepText(text.clone())
    } else {
        return Err(BuildError::InvalidField(
            "客户机定制缺少身份设置".to_string(),
        ));
    };

    let mut gateways = Vec::new();
    if let Some(gw) = config.ipv4_gateway {
        gateways.push(IpAddr::V4(gw));
    }
    if let Some(gw) = config.ipv6_gateway {
        gateways.push(IpAddr::V6(gw));
    }

    let adapters = config
        .network_interface
        .iter()
        .enumerate()
        .map(|(i, iface)| adapter_mapping(iface, if i == 0 { &gateways } else { &[] }))
        .collect();

    Ok(CustomizationSpec {
        identity,
        adapters,
        global_ip: GlobalIpSettings {
            dns_servers: config.dns_server_list.clone(),
            dns_suffixes: config.dns_suffix_list.clone(),
        },
    })
}

/// 网关只设置在第一块网卡上
fn adapter_mapping(iface: &NetworkInterface, gateways: &[IpAddr]) -> AdapterMapping {
    let ipv4 = match (iface.ipv4_address, iface.ipv4_netmask) {
        (Some(address), Some(prefix)) => IpSetting::Static {
            address: IpAddr::V4(address),
            prefix,
        },
        _ => IpSetting::Dhcp,
    };
    let ipv6 = match (iface.ipv6_address, iface.ipv6_netmask) {
        (Some(address), Some(prefix)) => Some(IpSetting::Static {
            address: IpAddr::V6(address),
            prefix,
        }),
        _ => None,
    };

    let static_v4 = matches!(ipv4, IpSetting::Static { .. });
    AdapterMapping {
        ipv4,
        gateways: gateways
            .iter()
            .copied()
            .filter(|gw| gw.is_ipv6() || static_v4)
            .collect(),
        ipv6,
        dns_servers: iface.dns_server_list.clone(),
        dns_domain: iface.dns_domain.clone(),
    }
}

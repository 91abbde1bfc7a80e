//! 客户机定制与网络 API

use reqwest::Method;
use serde_json::json;
use std::net::IpAddr;
use tracing::info;

use crate::client::VsphereClient;
use crate::error::Result;
use crate::models::{
    AdapterMapping, CustomizationSpec, CustomizationStatus, GuestNetInfo, Identity, IpSetting,
};

/// 客户机 API
pub struct GuestApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> GuestApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 下发定制规范
    pub async fn customize(&self, vm_id: &str, spec: &CustomizationSpec) -> Result<()> {
        info!("下发客户机定制: {} ({})", vm_id, spec.identity.kind());
        self.client
            .execute(
                Method::PUT,
                &format!("/api/vcenter/vm/{}/guest/customization", vm_id),
                Some(json!({ "spec": customization_body(spec) })),
            )
            .await
    }

    /// 查询定制状态
    pub async fn customization_status(&self, vm_id: &str) -> Result<CustomizationStatus> {
        let value: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/guest/customization", vm_id),
                None::<()>,
            )
            .await?;

        let status = match value["status"].as_str().unwrap_or("IDLE") {
            "PENDING" => CustomizationStatus::Pending,
            "RUNNING" => CustomizationStatus::Running,
            "SUCCEEDED" => CustomizationStatus::Succeeded,
            "FAILED" => CustomizationStatus::Failed(
                value["error"]
                    .as_str()
                    .unwrap_or("客户机未返回失败原因")
                    .to_string(),
            ),
            _ => CustomizationStatus::Idle,
        };
        Ok(status)
    }

    /// 查询客户机网络
    pub async fn networking(&self, vm_id: &str) -> Result<GuestNetInfo> {
        let tools: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/tools", vm_id),
                None::<()>,
            )
            .await?;
        let tools_running = tools["run_state"].as_str() == Some("RUNNING");

        if !tools_running {
            return Ok(GuestNetInfo::default());
        }

        let interfaces: Vec<serde_json::Value> = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/guest/networking/interfaces", vm_id),
                None::<()>,
            )
            .await?;

        let ip_addresses = interfaces
            .iter()
            .filter_map(|iface| iface["ip"]["ip_addresses"].as_array())
            .flatten()
            .filter_map(|addr| addr["ip_address"].as_str())
            .filter_map(|s| s.parse::<IpAddr>().ok())
            .collect();

        Ok(GuestNetInfo {
            tools_running,
            ip_addresses,
        })
    }

    /// 通过客户机工具关机
    pub async fn shutdown(&self, vm_id: &str) -> Result<()> {
        info!("客户机关机: {}", vm_id);
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/guest/power?action=shutdown", vm_id),
                None::<()>,
            )
            .await
    }
}

/// 定制规范的线上格式
pub(crate) fn customization_body(spec: &CustomizationSpec) -> serde_json::Value {
    let configuration_spec = match &spec.identity {
        Identity::Linux(linux) => json!({
            "linux_config": {
                "hostname": { "type": "FIXED", "fixed_name": linux.host_name },
                "domain": linux.domain,
                "time_zone": linux.time_zone,
                "script_text": null,
            }
        }),
        Identity::Sysprep(sysprep) => {
            let domain = match &sysprep.join_domain {
                Some(domain) => json!({
                    "type": "DOMAIN",
                    "domain": domain,
                    "domain_username": sysprep.domain_admin,
                    "domain_password": sysprep.domain_admin_password,
                }),
                None => json!({
                    "type": "WORKGROUP",
                    "workgroup": sysprep.workgroup.clone().unwrap_or_else(|| "WORKGROUP".into()),
                }),
            };
            json!({
                "windows_config": {
                    "reboot": "REBOOT",
                    "sysprep": {
                        "gui_run_once_commands": sysprep.run_once_command_list,
                        "user_data": {
                            "computer_name": {
                                "type": "FIXED",
                                "fixed_name": sysprep.computer_name,
                            },
                            "full_name": sysprep.full_name,
                            "organization": sysprep.organization_name,
                            "product_key": sysprep.product_key.clone().unwrap_or_default(),
                        },
                        "gui_unattended": {
                            "auto_logon": sysprep.auto_logon,
                            "auto_logon_count": sysprep.auto_logon_count,
                            "password": sysprep.admin_password,
                            "time_zone": sysprep.time_zone,
                        },
                        "domain": domain,
                    }
                }
            })
        }
        Identity::SysprepText(text) => json!({
            "windows_config": { "reboot": "REBOOT", "sysprep_xml": text }
        }),
    };

    let interfaces: Vec<_> = spec.adapters.iter().map(adapter_body).collect();

    json!({
        "configuration_spec": configuration_spec,
        "global_DNS_settings": {
            "dns_servers": spec.global_ip.dns_servers,
            "dns_suffix_list": spec.global_ip.dns_suffixes,
        },
        "interfaces": interfaces,
    })
}

fn adapter_body(adapter: &AdapterMapping) -> serde_json::Value {
    let ipv4 = match adapter.ipv4 {
        IpSetting::Dhcp => json!({ "type": "DHCP" }),
        IpSetting::Static { address, prefix } => json!({
            "type": "STATIC",
            "ip_address": address,
            "prefix": prefix,
            "gateways": adapter.gateways.iter().filter(|g| g.is_ipv4()).collect::<Vec<_>>(),
        }),
    };

    let mut body = json!({
        "adapter": {
            "ipv4": ipv4,
            "dns_servers": adapter.dns_servers,
            "dns_domain": adapter.dns_domain,
        }
    });

    if let Some(IpSetting::Static { address, prefix }) = adapter.ipv6 {
        body["adapter"]["ipv6"] = json!({
            "type": "STATIC",
            "ipv6": [ { "ip_address": address, "prefix": prefix } ],
            "gateways": adapter.gateways.iter().filter(|g| g.is_ipv6()).collect::<Vec<_>>(),
        });
    } else if adapter.ipv6.is_some() {
        body["adapter"]["ipv6"] = json!({ "type": "DHCP" });
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GlobalIpSettings, LinuxPrep};

    #[test]
    fn test_linux_static_body() {
        let spec = CustomizationSpec {
            identity: Identity::Linux(LinuxPrep {
                host_name: "web01".into(),
                domain: "example.local".into(),
                time_zone: Some("Asia/Shanghai".into()),
                hw_clock_utc: true,
            }),
            adapters: vec![AdapterMapping {
                ipv4: IpSetting::Static {
                    address: "10.0.0.10".parse().unwrap(),
                    prefix: 24,
                },
                gateways: vec!["10.0.0.1".parse().unwrap()],
                ..Default::default()
            }],
            global_ip: GlobalIpSettings::default(),
        };

        let body = customization_body(&spec);
        assert_eq!(
            body["configuration_spec"]["linux_config"]["hostname"]["fixed_name"],
            "web01"
        );
        let ipv4 = &body["interfaces"][0]["adapter"]["ipv4"];
        assert_eq!(ipv4["type"], "STATIC");
        assert_eq!(ipv4["ip_address"], "10.0.0.10");
        assert_eq!(ipv4["gateways"][0], "10.0.0.1");
    }

    #[test]
    fn test_sysprep_text_body() {
        let spec = CustomizationSpec {
            identity: Identity::SysprepText("<unattend/>".into()),
            adapters: vec![AdapterMapping::default()],
            global_ip: GlobalIpSettings::default(),
        };
        let body = customization_body(&spec);
        assert_eq!(
            body["configuration_spec"]["windows_config"]["sysprep_xml"],
            "<unattend/>"
        );
        assert_eq!(body["interfaces"][0]["adapter"]["ipv4"]["type"], "DHCP");
    }
}

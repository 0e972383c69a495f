//! Pod DNS settings

use std::net::IpAddr;

#[cfg(test)]
use mockall::automock;

use kubosh_common::k8s::{PodDnsConfig, PodDnsConfigOption};
use kubosh_common::manifest::Manifest;

use crate::error::ConversionError;
use crate::Result;

/// DNS policy letting the cluster resolver handle everything
pub const DNS_POLICY_CLUSTER_FIRST: &str = "ClusterFirst";

/// DNS policy where the pod's `dnsConfig` is authoritative
pub const DNS_POLICY_NONE: &str = "None";

/// DNS policy and optional explicit resolver config for a pod
#[derive(Clone, Debug, PartialEq)]
pub struct DnsSetting {
    /// Pod DNS policy
    pub policy: String,
    /// Resolver config, required when the policy is `None`
    pub config: Option<PodDnsConfig>,
}

/// Derives pod DNS settings for a deployment
#[cfg_attr(test, automock)]
pub trait DnsSettings {
    /// DNS settings for pods of `manifest` in `namespace`.
    ///
    /// `service_ip` is the address of the deployment's DNS service, empty when
    /// the cluster resolver should be used directly.
    fn dns_setting(&self, manifest: &Manifest, service_ip: &str, namespace: &str) -> Result<DnsSetting>;
}

/// Points pods at a deployment DNS service when one is given
#[derive(Clone, Debug)]
pub struct ClusterDns {
    cluster_domain: String,
}

impl Default for ClusterDns {
    fn default() -> Self {
        Self::new("cluster.local")
    }
}

impl ClusterDns {
    /// Resolver for a cluster with the given domain
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
        }
    }
}

impl DnsSettings for ClusterDns {
    fn dns_setting(&self, _manifest: &Manifest, service_ip: &str, namespace: &str) -> Result<DnsSetting> {
        if service_ip.is_empty() {
            return Ok(DnsSetting {
                policy: DNS_POLICY_CLUSTER_FIRST.to_string(),
                config: None,
            });
        }

        let ip: IpAddr = service_ip
            .parse()
            .map_err(|_| ConversionError::dns(format!("'{}' is not an IP address", service_ip)))?;

        Ok(DnsSetting {
            policy: DNS_POLICY_NONE.to_string(),
            config: Some(PodDnsConfig {
                nameservers: vec![ip.to_string()],
                searches: vec![
                    format!("{}.svc.{}", namespace, self.cluster_domain),
                    format!("svc.{}", self.cluster_domain),
                    self.cluster_domain.clone(),
                ],
                options: vec![PodDnsConfigOption {
                    name: "ndots".to_string(),
                    value: Some("5".to_string()),
                }],
            }),
        })
    }
}

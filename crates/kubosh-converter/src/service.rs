//! Network services for service instance groups
//!
//! One service per instance, addressed by availability zone and ordinal, plus
//! one headless service that governs the stateful set's network identity.

use std::collections::BTreeMap;

use kubosh_common::bpm::{BpmConfigs, Port};
use kubosh_common::kube_utils::{HasApiResource, ObjectMeta};
use kubosh_common::manifest::InstanceGroup;
use kubosh_common::{
    names, LABEL_ACTIVE_POD, LABEL_ACTIVE_POD_VALUE, LABEL_AZ_INDEX, LABEL_DEPLOYMENT_NAME,
    LABEL_INSTANCE_GROUP_NAME, LABEL_POD_ORDINAL,
};

use crate::error::ConversionError;
use crate::workload::{Service, ServicePort, ServiceSpec};
use crate::Result;

/// Ports declared by the jobs of an instance group, first declaration wins
pub fn collect_ports(ig: &InstanceGroup, bpm_configs: &BpmConfigs) -> Result<Vec<Port>> {
    let mut ports: Vec<Port> = Vec::new();
    for job in &ig.jobs {
        let config = bpm_configs
            .get(&job.name)
            .map_err(|_| ConversionError::missing_bpm_config(&job.name))?;
        for port in &config.ports {
            if !ports.iter().any(|p| p.name == port.name) {
                ports.push(port.clone());
            }
        }
    }
    Ok(ports)
}

/// Selector matching every pod of an instance group
pub fn instance_group_selector(deployment_name: &str, instance_group: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DEPLOYMENT_NAME.to_string(), deployment_name.to_string()),
        (LABEL_INSTANCE_GROUP_NAME.to_string(), instance_group.to_string()),
    ])
}

/// Builds services for one instance group
pub struct ServiceCompiler<'a> {
    ig: &'a InstanceGroup,
    namespace: &'a str,
    deployment_name: &'a str,
}

impl<'a> ServiceCompiler<'a> {
    /// Create a compiler for `ig` deployed as `deployment_name` into `namespace`
    pub fn new(ig: &'a InstanceGroup, namespace: &'a str, deployment_name: &'a str) -> Self {
        Self {
            ig,
            namespace,
            deployment_name,
        }
    }

    /// Per-instance services followed by the headless service.
    ///
    /// Without ports nothing is exposed and no services are produced.
    pub fn compile(&self, ports: &[Port], active_passive: bool) -> Vec<Service> {
        if ports.is_empty() {
            return Vec::new();
        }
        let service_ports: Vec<ServicePort> = ports
            .iter()
            .map(|p| ServicePort {
                name: p.name.clone(),
                port: p.internal,
                target_port: Some(p.internal),
                protocol: p.protocol.clone(),
            })
            .collect();

        let mut services = Vec::new();
        if self.ig.azs.is_empty() {
            for ordinal in 0..self.ig.instances {
                services.push(self.instance_service(None, ordinal, &service_ports));
            }
        } else {
            for az_index in 0..self.ig.azs.len() {
                for ordinal in 0..self.ig.instances {
                    services.push(self.instance_service(Some(az_index), ordinal, &service_ports));
                }
            }
        }
        services.push(self.headless_service(&service_ports, active_passive));
        services
    }

    /// Name of the headless service
    pub fn headless_name(&self) -> String {
        names::headless_service_name(&self.ig.name)
    }

    fn instance_service(&self, az_index: Option<usize>, ordinal: u32, ports: &[ServicePort]) -> Service {
        let mut selector = instance_group_selector(self.deployment_name, &self.ig.name);
        selector.insert(
            LABEL_AZ_INDEX.to_string(),
            az_index.unwrap_or_default().to_string(),
        );
        selector.insert(LABEL_POD_ORDINAL.to_string(), ordinal.to_string());

        self.service(
            names::instance_service_name(&self.ig.name, az_index, ordinal),
            selector,
            ports,
            None,
        )
    }

    fn headless_service(&self, ports: &[ServicePort], active_passive: bool) -> Service {
        let mut selector = instance_group_selector(self.deployment_name, &self.ig.name);
        if active_passive {
            selector.insert(
                LABEL_ACTIVE_POD.to_string(),
                LABEL_ACTIVE_POD_VALUE.to_string(),
            );
        }
        self.service(self.headless_name(), selector, ports, Some("None".to_string()))
    }

    fn service(
        &self,
        name: String,
        selector: BTreeMap<String, String>,
        ports: &[ServicePort],
        cluster_ip: Option<String>,
    ) -> Service {
        Service {
            api_version: Service::API_VERSION.to_string(),
            kind: Service::KIND.to_string(),
            metadata: ObjectMeta::new(name, self.namespace)
                .with_label(LABEL_DEPLOYMENT_NAME, self.deployment_name)
                .with_label(LABEL_INSTANCE_GROUP_NAME, &self.ig.name),
            spec: ServiceSpec {
                selector,
                ports: ports.to_vec(),
                cluster_ip,
            },
        }
    }
}

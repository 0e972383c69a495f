//! Workload types produced by the compiler
//!
//! - `BoshStatefulSet`: stateful workload for service instance groups
//! - `BoshJob`: run-to-completion workload for errands
//! - `Service`: per-instance and headless network services
//!
//! Shared types (Container, Volume, PersistentVolumeClaim, ...) come from
//! `kubosh_common::k8s`.

use std::collections::BTreeMap;

use kubosh_common::k8s::{
    Container, LabelSelector, LocalObjectReference, PersistentVolumeClaim, PodDnsConfig,
    ProbeSpec, Toleration, Volume,
};
use kubosh_common::kube_utils::{HasApiResource, ObjectMeta};
use serde::{Deserialize, Serialize};

// =============================================================================
// Pod template
// =============================================================================

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Service account name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Whether to automount the service account token into pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
    /// Containers
    pub containers: Vec<Container>,
    /// Init containers (run before main containers)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Affinity, passed through from the instance group settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,
    /// Tolerations for scheduling onto tainted nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Image pull secrets for authenticating to private registries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Seconds between SIGTERM and SIGKILL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    /// DNS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    /// DNS resolver config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDnsConfig>,
    /// Restart policy (Always, OnFailure, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
}

// =============================================================================
// StatefulSet
// =============================================================================

/// Kubernetes StatefulSet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: StatefulSetSpec,
}

impl HasApiResource for StatefulSet {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "StatefulSet";
}

/// StatefulSet spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    /// Number of replicas
    pub replicas: u32,
    /// Label selector
    pub selector: LabelSelector,
    /// Headless service governing the pods' network identity
    pub service_name: String,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Stateful workload for a service instance group
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoshStatefulSet {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: BoshStatefulSetSpec,
}

impl HasApiResource for BoshStatefulSet {
    const API_VERSION: &'static str = "kubosh.io/v1alpha1";
    const KIND: &'static str = "BoshStatefulSet";
}

/// BoshStatefulSet spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoshStatefulSetSpec {
    /// Availability zones; one StatefulSet per zone is created from the template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Roll pods when referenced config or secrets change
    pub update_on_config_change: bool,
    /// Probes deciding the active pod, keyed by container name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub active_passive_probes: BTreeMap<String, ProbeSpec>,
    /// StatefulSet template
    pub template: StatefulSet,
}

// =============================================================================
// Job
// =============================================================================

/// Kubernetes batch Job
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: JobSpec,
}

impl HasApiResource for Job {
    const API_VERSION: &'static str = "batch/v1";
    const KIND: &'static str = "Job";
}

/// Job spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Errand run strategy
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStrategy {
    /// Run when an operator triggers the errand
    Manual,
    /// Run once automatically
    Once,
}

/// Trigger of a BoshJob
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    /// When to run
    pub strategy: TriggerStrategy,
}

/// Run-to-completion workload for an errand instance group
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoshJob {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: BoshJobSpec,
}

impl HasApiResource for BoshJob {
    const API_VERSION: &'static str = "kubosh.io/v1alpha1";
    const KIND: &'static str = "BoshJob";
}

/// BoshJob spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoshJobSpec {
    /// When to run the errand
    pub trigger: Trigger,
    /// Re-run when referenced config or secrets change
    pub update_on_config_change: bool,
    /// Job template
    pub template: Job,
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

impl HasApiResource for Service {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
}

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
    /// `None` for headless services
    #[serde(rename = "clusterIP", default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    pub name: String,
    /// Port number
    pub port: u16,
    /// Target port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Protocol
    pub protocol: String,
}

// =============================================================================
// Compiled bundle
// =============================================================================

/// Everything compiled for one instance group
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BpmResources {
    /// Stateful workloads (service instance groups)
    pub stateful_sets: Vec<BoshStatefulSet>,
    /// Run-to-completion workloads (errands)
    pub jobs: Vec<BoshJob>,
    /// Network services
    pub services: Vec<Service>,
    /// Claims to create before the workload
    pub pvcs: Vec<PersistentVolumeClaim>,
}

impl BpmResources {
    /// Check if anything was compiled
    pub fn is_empty(&self) -> bool {
        self.stateful_sets.is_empty()
            && self.jobs.is_empty()
            && self.services.is_empty()
            && self.pvcs.is_empty()
    }

    /// All objects as JSON values, claims first so they exist before the
    /// workloads that mount them
    pub fn to_documents(&self) -> serde_json::Result<Vec<serde_json::Value>> {
        let mut documents = Vec::new();
        for pvc in &self.pvcs {
            documents.push(serde_json::to_value(pvc)?);
        }
        for service in &self.services {
            documents.push(serde_json::to_value(service)?);
        }
        for sts in &self.stateful_sets {
            documents.push(serde_json::to_value(sts)?);
        }
        for job in &self.jobs {
            documents.push(serde_json::to_value(job)?);
        }
        Ok(documents)
    }
}

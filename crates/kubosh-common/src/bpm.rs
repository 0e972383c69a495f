//! BOSH Process Manager configuration
//!
//! One [`BpmConfig`] per job, describing the processes that make up the job
//! plus the Kubernetes-facing run block (probes, security context, ports).

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::k8s::{K8sSecurityContext, ProbeSpec};
use crate::manifest::PostStart;
use crate::{Error, Result};

/// BPM configuration of one job
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BpmConfig {
    /// Processes in declaration order
    #[serde(default)]
    pub processes: Vec<Process>,
    /// Kubernetes run settings
    #[serde(default)]
    pub run: RunConfig,
    /// Ports the job listens on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    /// Post-start gating declared by the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_start: Option<PostStart>,
}

impl BpmConfig {
    /// True when any process declares an active/passive probe
    pub fn has_active_passive_probes(&self) -> bool {
        !self.run.active_passive_probes.is_empty()
    }
}

/// One supervised process
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Process {
    /// Process name, unique within the job
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Static environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Linux capabilities to add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Resource limits
    #[serde(default)]
    pub limits: Limits,
    /// Resource requests
    #[serde(default)]
    pub requests: Requests,
    /// Mount the job's slice of the data directory
    #[serde(default)]
    pub ephemeral_disk: bool,
    /// Mount the job's slice of the persistent store
    #[serde(default)]
    pub persistent_disk: bool,
    /// Extra volumes under the data, store or sys/run roots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volumes: Vec<BpmVolume>,
    /// Privileged settings
    #[serde(default, rename = "unsafe")]
    pub unsafe_config: UnsafeConfig,
    /// Lifecycle hooks
    #[serde(default)]
    pub hooks: Hooks,
}

/// Process resource limits
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Limits {
    /// Memory quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// CPU quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Open file descriptors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_files: Option<u64>,
    /// Process count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<u64>,
}

/// Process resource requests
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Requests {
    /// Memory quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// CPU quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

/// Volume declared by a process
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BpmVolume {
    /// Absolute path inside the container
    pub path: String,
    /// Mount read-write
    #[serde(default)]
    pub writable: bool,
    /// Allow executing files from the volume
    #[serde(default)]
    pub allow_executions: bool,
    /// Mount without creating the directory
    #[serde(default)]
    pub mount_only: bool,
}

/// `unsafe` block of a process
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct UnsafeConfig {
    /// Run the container privileged
    #[serde(default)]
    pub privileged: bool,
    /// Volumes at arbitrary paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrestricted_volumes: Vec<BpmVolume>,
}

/// Process hooks
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Hooks {
    /// Script run before the process starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_start: Option<String>,
}

/// Kubernetes run settings of a job
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RunConfig {
    /// Probes keyed by process name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub healthcheck: BTreeMap<String, HealthCheck>,
    /// Security context template for every process container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<K8sSecurityContext>,
    /// Active/passive probes keyed by process name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub active_passive_probes: BTreeMap<String, ProbeSpec>,
}

/// Readiness and liveness probes of one process
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HealthCheck {
    /// Readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeSpec>,
    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeSpec>,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// Port a job listens on
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Port {
    /// Port name, also used as the service port name
    pub name: String,
    /// Protocol (TCP or UDP)
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Port number inside the pod
    pub internal: u16,
}

/// BPM configurations keyed by job name
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct BpmConfigs(pub BTreeMap<String, BpmConfig>);

impl BpmConfigs {
    /// Look up the config of a job
    pub fn get(&self, job: &str) -> Result<&BpmConfig> {
        self.0
            .get(job)
            .ok_or_else(|| Error::not_found("bpm config for job", job))
    }

    /// Add or replace the config of a job
    pub fn insert(&mut self, job: impl Into<String>, config: BpmConfig) {
        self.0.insert(job.into(), config);
    }
}

impl FromIterator<(String, BpmConfig)> for BpmConfigs {
    fn from_iter<T: IntoIterator<Item = (String, BpmConfig)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

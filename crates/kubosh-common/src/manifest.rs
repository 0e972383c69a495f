//! Resolved BOSH deployment manifest
//!
//! The manifest arrives fully interpolated (variables, ops files and links are
//! resolved upstream). These types only describe what the workload compiler
//! reads; unknown keys are ignored by serde.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::k8s::{EnvVar, ExecAction, LocalObjectReference, Toleration};
use crate::{Error, Result};

/// A resolved BOSH deployment manifest
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Manifest {
    /// Deployment name
    pub name: String,
    /// Releases referenced by jobs
    #[serde(default)]
    pub releases: Vec<Release>,
    /// Stemcells referenced by instance groups
    #[serde(default)]
    pub stemcells: Vec<Stemcell>,
    /// Instance groups in manifest order
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,
    /// Deployment-wide update block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
}

impl Manifest {
    /// Look up an instance group by name
    pub fn instance_group(&self, name: &str) -> Result<&InstanceGroup> {
        self.instance_groups
            .iter()
            .find(|ig| ig.name == name)
            .ok_or_else(|| Error::not_found("instance group", name))
    }

    /// Look up a release by name
    pub fn release(&self, name: &str) -> Result<&Release> {
        self.releases
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::not_found("release", name))
    }

    /// Resolve the container image for a job of an instance group.
    ///
    /// The image is `<url>/<release>:<os>-<stemcell version>-<release version>`.
    /// The stemcell comes from the release itself when it pins one, otherwise
    /// from the instance group's stemcell alias.
    pub fn release_image(&self, instance_group: &str, job: &str) -> Result<String> {
        let ig = self.instance_group(instance_group)?;
        let job = ig
            .jobs
            .iter()
            .find(|j| j.name == job)
            .ok_or_else(|| Error::not_found("job", format!("{}/{}", instance_group, job)))?;
        let release = self.release(&job.release)?;

        let url = release.url.as_deref().ok_or_else(|| {
            Error::validation_for(
                format!("release {}", release.name),
                "release has no url to derive an image from",
            )
        })?;

        let (os, stemcell_version) = match &release.stemcell {
            Some(pinned) => (pinned.os.as_str(), pinned.version.as_str()),
            None => {
                let stemcell = self.stemcell_for(ig)?;
                (stemcell.os.as_str(), stemcell.version.as_str())
            }
        };

        Ok(format!(
            "{}/{}:{}-{}-{}",
            url.trim_end_matches('/'),
            release.name,
            os,
            stemcell_version,
            release.version
        ))
    }

    fn stemcell_for(&self, ig: &InstanceGroup) -> Result<&Stemcell> {
        match &ig.stemcell {
            Some(alias) => self
                .stemcells
                .iter()
                .find(|s| &s.alias == alias)
                .ok_or_else(|| Error::not_found("stemcell", alias.clone())),
            None => match self.stemcells.as_slice() {
                [only] => Ok(only),
                _ => Err(Error::validation_for(
                    format!("instance group {}", ig.name),
                    "no stemcell alias set and the manifest does not declare exactly one stemcell",
                )),
            },
        }
    }
}

/// A BOSH release
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Release {
    /// Release name
    pub name: String,
    /// Release version
    pub version: String,
    /// Registry path holding the release images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Stemcell the release images were built on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<ReleaseStemcell>,
}

/// Stemcell pinned by a release
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReleaseStemcell {
    /// Operating system
    pub os: String,
    /// Stemcell version
    pub version: String,
}

/// A stemcell declared at deployment level
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Stemcell {
    /// Alias instance groups refer to
    pub alias: String,
    /// Operating system
    pub os: String,
    /// Stemcell version
    pub version: String,
}

/// Instance group lifecycle
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Long-running service (the default)
    #[default]
    Service,
    /// Run-to-completion, triggered manually
    Errand,
    /// Run-to-completion, triggered once automatically
    AutoErrand,
}

impl Lifecycle {
    /// True for both errand kinds
    pub fn is_errand(self) -> bool {
        matches!(self, Lifecycle::Errand | Lifecycle::AutoErrand)
    }
}

/// A named, horizontally scaled group of co-located jobs
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InstanceGroup {
    /// Name, unique within the deployment
    pub name: String,
    /// Instances per availability zone
    #[serde(default)]
    pub instances: u32,
    /// Availability zones in declaration order
    #[serde(default)]
    pub azs: Vec<String>,
    /// Lifecycle kind
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Persistent disk size in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk: Option<i64>,
    /// Storage class for the persistent disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk_type: Option<String>,
    /// Stemcell alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<String>,
    /// Jobs in manifest order
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Instance group update block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
    /// Agent environment
    #[serde(default)]
    pub env: AgentEnv,
}

impl InstanceGroup {
    /// Agent settings bag
    pub fn settings(&self) -> &AgentSettings {
        &self.env.bosh.agent.settings
    }

    /// Positive persistent disk size in MiB, if declared
    pub fn persistent_disk_size(&self) -> Option<i64> {
        self.persistent_disk.filter(|size| *size > 0)
    }
}

/// `env` block of an instance group
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AgentEnv {
    /// `env.bosh`
    #[serde(default)]
    pub bosh: BoshEnv,
}

/// `env.bosh` block
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BoshEnv {
    /// `env.bosh.agent`
    #[serde(default)]
    pub agent: Agent,
}

/// `env.bosh.agent` block
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Agent {
    /// `env.bosh.agent.settings`
    #[serde(default)]
    pub settings: AgentSettings,
}

/// Pod-level settings for an instance group
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AgentSettings {
    /// Pod affinity, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,
    /// Pod tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Service account for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Whether to mount the service account token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
    /// Pull secrets for release images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Extra labels on workloads and pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Extra annotations on workloads and pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Keep failing hook containers alive for inspection
    #[serde(default)]
    pub debug: bool,
    /// Do not add the log-tailing sidecar
    #[serde(default)]
    pub disable_log_sidecar: bool,
    /// Pod termination grace period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    /// Back the data directory with a claim instead of an emptyDir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_disk: Option<EphemeralDiskSettings>,
}

/// Claim-backed data directory
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EphemeralDiskSettings {
    /// Claim size as a quantity (e.g. "10Gi")
    pub size: String,
    /// Storage class for the claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// A job inside an instance group
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Job {
    /// Job name
    pub name: String,
    /// Release providing the job
    pub release: String,
    /// Job properties
    #[serde(default)]
    pub properties: JobProperties,
}

/// Job properties: the kubosh extension block plus opaque release properties
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct JobProperties {
    /// Kubernetes-specific job settings
    #[serde(default)]
    pub kubosh: JobExtension,
    /// Everything else, consumed by template rendering
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// `properties.kubosh` block of a job
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct JobExtension {
    /// Service that must be reachable before the job starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_service: Option<String>,
    /// Keep failing hook containers alive for inspection
    #[serde(default)]
    pub debug: bool,
    /// Extra environment for every process of the job
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
    /// Post-start gating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_start: Option<PostStart>,
}

/// Post-start gating configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PostStart {
    /// Command that must succeed before post-start runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PostStartCondition>,
}

/// Post-start condition
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PostStartCondition {
    /// Command to poll
    pub exec: ExecAction,
}

/// Watch time as written in a manifest: milliseconds or a `min-max` range
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum WatchTime {
    /// Plain milliseconds
    Millis(i64),
    /// "<ms>" or "<min>-<max>"
    Text(String),
}

impl WatchTime {
    /// Resolve to milliseconds; ranges resolve to their upper bound.
    ///
    /// `field` names the manifest key for error messages.
    pub fn resolve(&self, field: &str) -> Result<u64> {
        match self {
            WatchTime::Millis(ms) => u64::try_from(*ms).map_err(|_| {
                Error::validation_for(field, format!("'{}' must not be negative", ms))
            }),
            WatchTime::Text(raw) => {
                let upper = match raw.split_once('-') {
                    Some((lower, upper)) => {
                        parse_millis(lower, raw, field)?;
                        upper
                    }
                    None => raw.as_str(),
                };
                parse_millis(upper, raw, field)
            }
        }
    }
}

fn parse_millis(part: &str, raw: &str, field: &str) -> Result<u64> {
    part.trim().parse::<u64>().map_err(|_| {
        Error::validation_for(
            field,
            format!("'{}' is not a watch time (expected '<ms>' or '<min>-<max>')", raw),
        )
    })
}

/// Update block of a deployment or instance group
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Update {
    /// Number of canary instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canaries: Option<u32>,
    /// Instances updated in parallel (count or percentage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<serde_json::Value>,
    /// Time to wait for canaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_watch_time: Option<WatchTime>,
    /// Time to wait for updated instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_watch_time: Option<WatchTime>,
    /// Update instance groups one after another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: cache
releases:
- name: redis
  version: "36.15.0"
  url: docker.io/cfcontainerization
- name: pinned
  version: "1.0"
  url: registry.local/
  stemcell:
    os: opensuse-42.3
    version: "36.g03b4653-30.80-7.0.0_367.g6b06e343"
stemcells:
- alias: default
  os: opensuse-42.3
  version: "28.g837c5b3-30.263-7.0.0_234.gcd7d1132"
instance_groups:
- name: redis-slave
  instances: 2
  azs: [z1, z2]
  lifecycle: errand
  persistent_disk: 1024
  stemcell: default
  jobs:
  - name: redis-server
    release: redis
    properties:
      port: 6379
      kubosh:
        debug: true
        envs:
        - name: FOO
          value: bar
  - name: helper
    release: pinned
  update:
    canary_watch_time: 1200-20000
    update_watch_time: 30000
"#;

    fn manifest() -> Manifest {
        serde_yaml::from_str(MANIFEST).unwrap()
    }

    #[test]
    fn parses_instance_group() {
        let m = manifest();
        let ig = m.instance_group("redis-slave").unwrap();
        assert_eq!(ig.instances, 2);
        assert_eq!(ig.azs, vec!["z1", "z2"]);
        assert_eq!(ig.lifecycle, Lifecycle::Errand);
        assert!(ig.lifecycle.is_errand());
        assert_eq!(ig.persistent_disk_size(), Some(1024));
        let job = &ig.jobs[0];
        assert!(job.properties.kubosh.debug);
        assert_eq!(job.properties.kubosh.envs[0].name, "FOO");
        assert_eq!(job.properties.other["port"], 6379);
    }

    #[test]
    fn lifecycle_defaults_to_service() {
        let ig: InstanceGroup = serde_yaml::from_str("name: web").unwrap();
        assert_eq!(ig.lifecycle, Lifecycle::Service);
        assert!(!ig.lifecycle.is_errand());
        let auto: Lifecycle = serde_yaml::from_str("auto-errand").unwrap();
        assert_eq!(auto, Lifecycle::AutoErrand);
    }

    #[test]
    fn zero_persistent_disk_counts_as_absent() {
        let ig = InstanceGroup {
            persistent_disk: Some(0),
            ..Default::default()
        };
        assert_eq!(ig.persistent_disk_size(), None);
    }

    #[test]
    fn release_image_uses_instance_group_stemcell() {
        let image = manifest()
            .release_image("redis-slave", "redis-server")
            .unwrap();
        assert_eq!(
            image,
            "docker.io/cfcontainerization/redis:opensuse-42.3-28.g837c5b3-30.263-7.0.0_234.gcd7d1132-36.15.0"
        );
    }

    #[test]
    fn release_image_prefers_release_stemcell() {
        let image = manifest().release_image("redis-slave", "helper").unwrap();
        assert_eq!(
            image,
            "registry.local/pinned:opensuse-42.3-36.g03b4653-30.80-7.0.0_367.g6b06e343-1.0"
        );
    }

    #[test]
    fn release_image_unknown_job() {
        let err = manifest()
            .release_image("redis-slave", "nope")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.to_string().contains("redis-slave/nope"));
    }

    #[test]
    fn release_image_unknown_instance_group() {
        let err = manifest().release_image("missing", "redis-server").unwrap_err();
        assert_eq!(err.to_string(), "instance group 'missing' not found");
    }

    #[test]
    fn watch_time_resolution() {
        let m = manifest();
        let update = m.instance_groups[0].update.as_ref().unwrap();
        let canary = update.canary_watch_time.as_ref().unwrap();
        assert_eq!(canary.resolve("canary_watch_time").unwrap(), 20000);
        let upd = update.update_watch_time.as_ref().unwrap();
        assert_eq!(upd.resolve("update_watch_time").unwrap(), 30000);
        assert_eq!(
            WatchTime::Text(" 500 ".to_string()).resolve("x").unwrap(),
            500
        );
    }

    #[test]
    fn malformed_watch_time_is_rejected_with_value() {
        for raw in ["abc", "10-abc", "1-2-3", ""] {
            let err = WatchTime::Text(raw.to_string())
                .resolve("canary_watch_time")
                .unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("canary_watch_time"), "{msg}");
        }
        assert!(WatchTime::Millis(-1).resolve("update_watch_time").is_err());
    }
}

//! Resource assembler
//!
//! Compiles one instance group into the bundle of workloads, services and
//! claims that runs it. Service instance groups become a `BoshStatefulSet`
//! plus services; errands become a `BoshJob`.

use std::collections::BTreeMap;

use kubosh_common::bpm::{BpmConfig, BpmConfigs};
use kubosh_common::k8s::{LabelSelector, PersistentVolumeClaim, ProbeSpec, Volume};
use kubosh_common::kube_utils::{HasApiResource, ObjectMeta};
use kubosh_common::manifest::{InstanceGroup, Lifecycle, Manifest, Update};
use kubosh_common::{
    names, ANNOTATION_CANARY_WATCH_TIME, ANNOTATION_UPDATE_WATCH_TIME, LABEL_DEPLOYMENT_NAME,
    LABEL_DEPLOYMENT_VERSION, LABEL_INSTANCE_GROUP_NAME,
};
use tracing::{debug, info, instrument};

use crate::config::OperatorImage;
use crate::container::ContainerFactory;
use crate::disk::Disks;
use crate::dns::DnsSettings;
use crate::error::ConversionError;
use crate::image::ReleaseImageProvider;
use crate::service::{collect_ports, instance_group_selector, ServiceCompiler};
use crate::volume::VolumeFactory;
use crate::workload::{
    BoshJob, BoshJobSpec, BoshStatefulSet, BoshStatefulSetSpec, BpmResources, Job, JobSpec,
    PodMeta, PodSpec, PodTemplateSpec, StatefulSet, StatefulSetSpec, Trigger, TriggerStrategy,
};
use crate::Result;

/// Workload version of the first rollout
const INITIAL_WORKLOAD_VERSION: &str = "1";

/// Everything needed to compile one instance group
#[derive(Clone, Copy, Debug)]
pub struct ResourcesInput<'a> {
    /// Resolved deployment manifest
    pub manifest: &'a Manifest,
    /// Target namespace
    pub namespace: &'a str,
    /// Name of the deployment resource
    pub deployment_name: &'a str,
    /// Address of the deployment DNS service, empty for cluster DNS
    pub service_ip: &'a str,
    /// Version of the workload being compiled
    pub workload_version: &'a str,
    /// Instance group to compile
    pub instance_group: &'a InstanceGroup,
    /// BPM configs of the instance group's jobs
    pub bpm_configs: &'a BpmConfigs,
    /// Version of the resolved properties secret
    pub resolved_properties_version: &'a str,
}

/// Compiles instance groups into Kubernetes resources
pub struct Converter<'a> {
    release_images: &'a dyn ReleaseImageProvider,
    dns: &'a dyn DnsSettings,
    operator_image: Option<OperatorImage>,
}

impl<'a> Converter<'a> {
    /// Create a converter using the given collaborators
    pub fn new(release_images: &'a dyn ReleaseImageProvider, dns: &'a dyn DnsSettings) -> Self {
        Self {
            release_images,
            dns,
            operator_image: None,
        }
    }

    /// Use a specific operator image instead of the process-wide one
    pub fn with_operator_image(mut self, operator_image: OperatorImage) -> Self {
        self.operator_image = Some(operator_image);
        self
    }

    /// Compile one instance group.
    ///
    /// Errors are wrapped with the instance group name; no partial output is
    /// returned.
    #[instrument(skip_all, fields(instance_group = %input.instance_group.name))]
    pub fn resources(&self, input: &ResourcesInput<'_>) -> Result<BpmResources> {
        self.compile(input)
            .map_err(|e| e.for_instance_group(&input.instance_group.name))
    }

    fn compile(&self, input: &ResourcesInput<'_>) -> Result<BpmResources> {
        let ig = input.instance_group;
        let settings = ig.settings();

        let volumes = VolumeFactory::new(&input.manifest.name, input.namespace);
        let default_disks = volumes.default_disks(ig, input.resolved_properties_version);
        let bpm_disks = volumes.bpm_disks(ig, input.bpm_configs)?;

        let errand = ig.lifecycle.is_errand();
        let mut factory = ContainerFactory::new(
            &ig.name,
            errand,
            input.resolved_properties_version,
            settings.disable_log_sidecar,
            self.release_images,
            input.bpm_configs,
        )
        .with_initial_rollout(input.workload_version == INITIAL_WORKLOAD_VERSION)
        .with_debug(settings.debug);
        if let Some(image) = &self.operator_image {
            factory = factory.with_operator_image(image.clone());
        }

        let default_mounts = default_disks.volume_mounts();
        let required_service = ig
            .jobs
            .iter()
            .find_map(|job| job.properties.kubosh.required_service.as_deref());

        let init_containers =
            factory.jobs_to_init_containers(&ig.jobs, &default_mounts, &bpm_disks, required_service)?;
        let containers = factory.jobs_to_containers(&ig.jobs, &default_mounts, &bpm_disks)?;

        let dns = self
            .dns
            .dns_setting(input.manifest, input.service_ip, input.namespace)?;

        let pod_spec = PodSpec {
            service_account_name: settings.service_account_name.clone(),
            automount_service_account_token: settings.automount_service_account_token,
            containers,
            init_containers,
            volumes: pod_volumes(&default_disks, &bpm_disks),
            affinity: settings.affinity.clone(),
            tolerations: settings.tolerations.clone(),
            image_pull_secrets: settings.image_pull_secrets.clone(),
            termination_grace_period_seconds: settings.termination_grace_period_seconds,
            dns_policy: Some(dns.policy),
            dns_config: dns.config,
            restart_policy: None,
        };

        let mut resources = BpmResources {
            pvcs: claims(&default_disks, &bpm_disks),
            ..Default::default()
        };

        match ig.lifecycle {
            Lifecycle::Service => {
                let ports = collect_ports(ig, input.bpm_configs)?;
                let active_passive = self.active_passive_probes(input)?;
                let scoped_to_active = declares_active_passive(ig, input.bpm_configs);
                let services = ServiceCompiler::new(ig, input.namespace, input.deployment_name);

                let annotations = watch_time_annotations(ig, input.manifest)?;
                resources.stateful_sets.push(self.stateful_set(
                    input,
                    pod_spec,
                    services.headless_name(),
                    active_passive,
                    annotations,
                ));
                resources.services = services.compile(&ports, scoped_to_active);
            }
            Lifecycle::Errand | Lifecycle::AutoErrand => {
                resources.jobs.push(self.job(input, pod_spec));
            }
        }

        info!(
            lifecycle = ?ig.lifecycle,
            stateful_sets = resources.stateful_sets.len(),
            jobs = resources.jobs.len(),
            services = resources.services.len(),
            pvcs = resources.pvcs.len(),
            "compiled instance group"
        );
        Ok(resources)
    }

    /// Active/passive probes of every job, keyed by container name
    fn active_passive_probes(
        &self,
        input: &ResourcesInput<'_>,
    ) -> Result<BTreeMap<String, ProbeSpec>> {
        let mut probes = BTreeMap::new();
        for job in &input.instance_group.jobs {
            let config = input
                .bpm_configs
                .get(&job.name)
                .map_err(|_| ConversionError::missing_bpm_config(&job.name))?;
            for process in &config.processes {
                if let Some(probe) = config.run.active_passive_probes.get(&process.name) {
                    probes.insert(names::container_name(&job.name, &process.name), probe.clone());
                }
            }
        }
        Ok(probes)
    }

    fn stateful_set(
        &self,
        input: &ResourcesInput<'_>,
        pod_spec: PodSpec,
        service_name: String,
        active_passive_probes: BTreeMap<String, ProbeSpec>,
        annotations: BTreeMap<String, String>,
    ) -> BoshStatefulSet {
        let ig = input.instance_group;
        let metadata = self.workload_meta(input);

        let template = StatefulSet {
            api_version: StatefulSet::API_VERSION.to_string(),
            kind: StatefulSet::KIND.to_string(),
            metadata: metadata.clone().with_annotations(&annotations),
            spec: StatefulSetSpec {
                replicas: ig.instances,
                selector: LabelSelector {
                    match_labels: instance_group_selector(input.deployment_name, &ig.name),
                },
                service_name,
                template: PodTemplateSpec {
                    metadata: pod_meta(input),
                    spec: pod_spec,
                },
            },
        };

        debug!(zones = ig.azs.len(), replicas = ig.instances, "assembled stateful set");
        BoshStatefulSet {
            api_version: BoshStatefulSet::API_VERSION.to_string(),
            kind: BoshStatefulSet::KIND.to_string(),
            metadata,
            spec: BoshStatefulSetSpec {
                zones: ig.azs.clone(),
                update_on_config_change: true,
                active_passive_probes,
                template,
            },
        }
    }

    fn job(&self, input: &ResourcesInput<'_>, mut pod_spec: PodSpec) -> BoshJob {
        let (strategy, restart_policy) = match input.instance_group.lifecycle {
            Lifecycle::AutoErrand => (TriggerStrategy::Once, "OnFailure"),
            _ => (TriggerStrategy::Manual, "Never"),
        };
        pod_spec.restart_policy = Some(restart_policy.to_string());
        let metadata = self.workload_meta(input);

        BoshJob {
            api_version: BoshJob::API_VERSION.to_string(),
            kind: BoshJob::KIND.to_string(),
            metadata: metadata.clone(),
            spec: BoshJobSpec {
                trigger: Trigger { strategy },
                update_on_config_change: true,
                template: Job {
                    api_version: Job::API_VERSION.to_string(),
                    kind: Job::KIND.to_string(),
                    metadata,
                    spec: JobSpec {
                        template: PodTemplateSpec {
                            metadata: pod_meta(input),
                            spec: pod_spec,
                        },
                    },
                },
            },
        }
    }

    /// Workload metadata, carrying the version label
    fn workload_meta(&self, input: &ResourcesInput<'_>) -> ObjectMeta {
        let settings = input.instance_group.settings();
        ObjectMeta::new(names::sanitize_dns_label(&input.instance_group.name), input.namespace)
            .with_labels(&settings.labels)
            .with_annotations(&settings.annotations)
            .with_label(LABEL_DEPLOYMENT_NAME, input.deployment_name)
            .with_label(LABEL_INSTANCE_GROUP_NAME, &input.instance_group.name)
            .with_label(LABEL_DEPLOYMENT_VERSION, input.workload_version)
    }
}

/// True when any job of the instance group declares an active/passive probe
fn declares_active_passive(ig: &InstanceGroup, bpm_configs: &BpmConfigs) -> bool {
    ig.jobs
        .iter()
        .filter_map(|job| bpm_configs.get(&job.name).ok())
        .any(BpmConfig::has_active_passive_probes)
}

/// Pod labels leave out the version so unrelated changes don't roll pods
fn pod_meta(input: &ResourcesInput<'_>) -> PodMeta {
    let settings = input.instance_group.settings();
    let mut labels = settings.labels.clone();
    labels.extend(instance_group_selector(
        input.deployment_name,
        &input.instance_group.name,
    ));
    PodMeta {
        labels,
        annotations: settings.annotations.clone(),
    }
}

/// Default volumes then BPM volumes, first of each name wins
fn pod_volumes(default_disks: &Disks, bpm_disks: &Disks) -> Vec<Volume> {
    let mut volumes: Vec<Volume> = Vec::new();
    for volume in default_disks.volumes().into_iter().chain(bpm_disks.volumes()) {
        if !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }
    volumes
}

fn claims(default_disks: &Disks, bpm_disks: &Disks) -> Vec<PersistentVolumeClaim> {
    let mut pvcs = default_disks.pvcs();
    pvcs.extend(bpm_disks.pvcs());
    pvcs
}

/// Canary and update watch times in milliseconds, from the instance group's
/// update block with the manifest-level block as fallback
fn watch_time_annotations(ig: &InstanceGroup, manifest: &Manifest) -> Result<BTreeMap<String, String>> {
    let blocks: Vec<&Update> = [ig.update.as_ref(), manifest.update.as_ref()]
        .into_iter()
        .flatten()
        .collect();

    let mut annotations = BTreeMap::new();
    if let Some(canary) = blocks.iter().find_map(|u| u.canary_watch_time.as_ref()) {
        annotations.insert(
            ANNOTATION_CANARY_WATCH_TIME.to_string(),
            canary.resolve("update.canary_watch_time")?.to_string(),
        );
    }
    if let Some(update) = blocks.iter().find_map(|u| u.update_watch_time.as_ref()) {
        annotations.insert(
            ANNOTATION_UPDATE_WATCH_TIME.to_string(),
            update.resolve("update.update_watch_time")?.to_string(),
        );
    }
    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsSetting, MockDnsSettings};
    use crate::image::MockReleaseImageProvider;
    use kubosh_common::bpm::{BpmConfig, Port, Process};
    use kubosh_common::k8s::ExecAction;
    use kubosh_common::manifest::{Job as ManifestJob, WatchTime};
    use kubosh_common::LABEL_ACTIVE_POD;

    fn images() -> MockReleaseImageProvider {
        let mut mock = MockReleaseImageProvider::new();
        mock.expect_release_image()
            .returning(|_, job| Ok(format!("registry/{}:1", job)));
        mock
    }

    fn dns() -> MockDnsSettings {
        let mut mock = MockDnsSettings::new();
        mock.expect_dns_setting().returning(|_, _, _| {
            Ok(DnsSetting {
                policy: "ClusterFirst".to_string(),
                config: None,
            })
        });
        mock
    }

    fn instance_group(lifecycle: Lifecycle) -> InstanceGroup {
        InstanceGroup {
            name: "nats".to_string(),
            instances: 2,
            azs: vec!["z1".to_string(), "z2".to_string()],
            lifecycle,
            jobs: vec![ManifestJob {
                name: "nats".to_string(),
                release: "nats".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn configs(active_passive: bool) -> BpmConfigs {
        let mut config = BpmConfig {
            processes: vec![Process {
                name: "nats".to_string(),
                executable: "/var/vcap/packages/gnatsd/bin/gnatsd".to_string(),
                ..Default::default()
            }],
            ports: vec![Port {
                name: "nats".to_string(),
                protocol: "TCP".to_string(),
                internal: 4222,
            }],
            ..Default::default()
        };
        if active_passive {
            config.run.active_passive_probes.insert(
                "nats".to_string(),
                ProbeSpec {
                    exec: Some(ExecAction {
                        command: vec!["/bin/is-leader".to_string()],
                    }),
                    ..Default::default()
                },
            );
        }
        [("nats".to_string(), config)].into_iter().collect()
    }

    fn manifest() -> Manifest {
        Manifest {
            name: "scf".to_string(),
            ..Default::default()
        }
    }

    fn input<'a>(
        manifest: &'a Manifest,
        ig: &'a InstanceGroup,
        configs: &'a BpmConfigs,
    ) -> ResourcesInput<'a> {
        ResourcesInput {
            manifest,
            namespace: "cf",
            deployment_name: "scf",
            service_ip: "",
            workload_version: "2",
            instance_group: ig,
            bpm_configs: configs,
            resolved_properties_version: "5",
        }
    }

    fn converter<'a>(images: &'a MockReleaseImageProvider, dns: &'a MockDnsSettings) -> Converter<'a> {
        Converter::new(images, dns).with_operator_image(OperatorImage::new("kubosh/operator:1"))
    }

    #[test]
    fn service_lifecycle_builds_stateful_set_and_services() {
        let (images, dns, manifest) = (images(), dns(), manifest());
        let ig = instance_group(Lifecycle::Service);
        let configs = configs(false);
        let resources = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap();

        assert_eq!(resources.stateful_sets.len(), 1);
        assert!(resources.jobs.is_empty());
        assert_eq!(resources.services.len(), 5);

        let sts = &resources.stateful_sets[0];
        assert_eq!(sts.spec.zones, vec!["z1", "z2"]);
        assert_eq!(sts.metadata.labels[LABEL_DEPLOYMENT_VERSION], "2");
        let inner = &sts.spec.template.spec;
        assert_eq!(inner.replicas, 2);
        assert_eq!(inner.service_name, "nats");
        assert!(!inner.template.metadata.labels.contains_key(LABEL_DEPLOYMENT_VERSION));
        assert_eq!(inner.template.spec.dns_policy.as_deref(), Some("ClusterFirst"));
        assert!(inner.template.spec.restart_policy.is_none());
        let volumes: Vec<_> = inner.template.spec.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            volumes,
            vec!["rendering-data", "jobs-dir", "data-dir", "sys-dir", "ig-resolved"]
        );
    }

    #[test]
    fn active_passive_probes_are_keyed_by_container() {
        let (images, dns, manifest) = (images(), dns(), manifest());
        let ig = instance_group(Lifecycle::Service);
        let configs = configs(true);
        let resources = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap();
        let probes = &resources.stateful_sets[0].spec.active_passive_probes;
        assert!(probes.contains_key("nats-nats"));
        let headless = resources.services.last().unwrap();
        assert!(headless.spec.selector.contains_key(LABEL_ACTIVE_POD));
    }

    #[test]
    fn active_passive_probe_without_process_still_scopes_headless() {
        let (images, dns, manifest) = (images(), dns(), manifest());
        let ig = instance_group(Lifecycle::Service);
        let mut configs = configs(false);
        let base = configs.get("nats").unwrap().clone();
        configs.insert(
            "nats",
            BpmConfig {
                run: kubosh_common::bpm::RunConfig {
                    active_passive_probes: [("leader".to_string(), ProbeSpec::default())]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                },
                ..base
            },
        );
        let resources = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap();
        assert!(resources.stateful_sets[0].spec.active_passive_probes.is_empty());
        let headless = resources.services.last().unwrap();
        assert!(headless.spec.selector.contains_key(LABEL_ACTIVE_POD));
    }

    #[test]
    fn auto_errand_runs_once_on_failure() {
        let (images, dns, manifest) = (images(), dns(), manifest());
        let ig = instance_group(Lifecycle::AutoErrand);
        let configs = configs(false);
        let resources = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap();
        assert!(resources.services.is_empty());
        let job = &resources.jobs[0];
        assert_eq!(job.spec.trigger.strategy, TriggerStrategy::Once);
        assert_eq!(
            job.spec.template.spec.template.spec.restart_policy.as_deref(),
            Some("OnFailure")
        );
    }

    #[test]
    fn manual_errand_never_restarts() {
        let (images, dns, manifest) = (images(), dns(), manifest());
        let ig = instance_group(Lifecycle::Errand);
        let configs = configs(false);
        let resources = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap();
        let job = &resources.jobs[0];
        assert_eq!(job.spec.trigger.strategy, TriggerStrategy::Manual);
        assert_eq!(
            job.spec.template.spec.template.spec.restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn watch_times_fall_back_to_manifest() {
        let mut manifest = manifest();
        manifest.update = Some(Update {
            canary_watch_time: Some(WatchTime::Text("1000-30000".to_string())),
            update_watch_time: Some(WatchTime::Millis(5000)),
            ..Default::default()
        });
        let mut ig = instance_group(Lifecycle::Service);
        ig.update = Some(Update {
            update_watch_time: Some(WatchTime::Text("7000".to_string())),
            ..Default::default()
        });
        let annotations = watch_time_annotations(&ig, &manifest).unwrap();
        assert_eq!(annotations[ANNOTATION_CANARY_WATCH_TIME], "30000");
        assert_eq!(annotations[ANNOTATION_UPDATE_WATCH_TIME], "7000");
    }

    #[test]
    fn malformed_watch_time_fails_with_value() {
        let (images, dns, mut manifest) = (images(), dns(), manifest());
        manifest.update = Some(Update {
            canary_watch_time: Some(WatchTime::Text("soon".to_string())),
            ..Default::default()
        });
        let ig = instance_group(Lifecycle::Service);
        let configs = configs(false);
        let err = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap_err();
        let display = err.to_string();
        assert!(display.contains("'nats'"), "{display}");
        assert!(display.contains("soon"), "{display}");
    }

    #[test]
    fn dns_failure_is_wrapped() {
        let (images, manifest) = (images(), manifest());
        let mut dns = MockDnsSettings::new();
        dns.expect_dns_setting()
            .returning(|_, _, _| Err(ConversionError::dns("no resolver")));
        let ig = instance_group(Lifecycle::Service);
        let configs = configs(false);
        let err = converter(&images, &dns)
            .resources(&input(&manifest, &ig, &configs))
            .unwrap_err();
        assert!(matches!(err, ConversionError::InstanceGroup { .. }));
        assert!(err.to_string().contains("no resolver"));
    }
}

//! Container factory
//!
//! Turns the jobs of an instance group into run containers (one per BPM
//! process, plus the log sidecar) and the ordered init containers that prepare
//! the pod. Jobs are walked in manifest order and processes in config order.

pub mod drain;
mod init;

use std::collections::{BTreeMap, BTreeSet};

use kubosh_common::bpm::{BpmConfig, BpmConfigs, Process};
use kubosh_common::k8s::{
    Capabilities, Container, EnvVar, K8sSecurityContext, Lifecycle, ResourceQuantity,
    ResourceRequirements, VolumeMount,
};
use kubosh_common::manifest::{Job, PostStartCondition};
use kubosh_common::{names, quantity};
use tracing::debug;

use crate::config::{image_pull_policy, OperatorImage};
use crate::disk::{Disks, LABEL_EPHEMERAL, LABEL_JOB_NAME, LABEL_PERSISTENT, LABEL_PROCESS_NAME};
use crate::error::ConversionError;
use crate::image::ReleaseImageProvider;
use crate::volume_names::SYS_DIR;
use crate::Result;

/// Supervisor staged into the rendering volume by the container-run copier
pub const CONTAINER_RUN_PATH: &str = "/var/vcap/all-releases/container-run/container-run";

/// Init process wrapping operator commands and errand processes
pub const DUMB_INIT: &str = "/usr/bin/dumb-init";

/// Name of the log-tailing sidecar
pub const LOG_SIDECAR_NAME: &str = "logs";

/// Defaults for the env vars the pod mutator fills in per pod
const DEFAULT_ENV: [(&str, &str); 3] = [("POD_ORDINAL", "0"), ("REPLICAS", "1"), ("AZ_INDEX", "0")];

/// Builds containers for one instance group
pub struct ContainerFactory<'a> {
    instance_group_name: String,
    errand: bool,
    resolved_properties_version: String,
    disable_log_sidecar: bool,
    release_images: &'a dyn ReleaseImageProvider,
    bpm_configs: &'a BpmConfigs,
    operator_image: OperatorImage,
    initial_rollout: bool,
    debug: bool,
}

impl<'a> ContainerFactory<'a> {
    /// Create a factory scoped to one instance group
    pub fn new(
        instance_group_name: impl Into<String>,
        errand: bool,
        resolved_properties_version: impl Into<String>,
        disable_log_sidecar: bool,
        release_images: &'a dyn ReleaseImageProvider,
        bpm_configs: &'a BpmConfigs,
    ) -> Self {
        Self {
            instance_group_name: instance_group_name.into(),
            errand,
            resolved_properties_version: resolved_properties_version.into(),
            disable_log_sidecar,
            release_images,
            bpm_configs,
            operator_image: OperatorImage::global().clone(),
            initial_rollout: false,
            debug: false,
        }
    }

    /// Use a specific operator image instead of the process-wide one
    pub fn with_operator_image(mut self, operator_image: OperatorImage) -> Self {
        self.operator_image = operator_image;
        self
    }

    /// Mark the compilation as the instance group's first rollout
    pub fn with_initial_rollout(mut self, initial_rollout: bool) -> Self {
        self.initial_rollout = initial_rollout;
        self
    }

    /// Keep failing hook containers alive for an hour for every job
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// One container per BPM process of every job, then the log sidecar.
    ///
    /// Each container mounts the default mounts, then the job's ephemeral and
    /// persistent disks, then the process's own disks, deduplicated by path.
    pub fn jobs_to_containers(
        &self,
        jobs: &[Job],
        default_mounts: &[VolumeMount],
        bpm_disks: &Disks,
    ) -> Result<Vec<Container>> {
        if jobs.is_empty() {
            return Err(ConversionError::NoJobs {
                instance_group: self.instance_group_name.clone(),
            });
        }

        let total_processes = self.total_processes(jobs)?;
        let mut containers = Vec::with_capacity(total_processes + 1);
        let mut owners: BTreeMap<String, &str> = BTreeMap::new();

        for job in jobs {
            let config = self.bpm_config(job)?;
            let image = self.job_image(job)?;
            let condition = post_start_condition(job, config);

            for (index, process) in config.processes.iter().enumerate() {
                let name = names::container_name(&job.name, &process.name);
                if let Some(first_job) = owners.insert(name.clone(), job.name.as_str()) {
                    return Err(ConversionError::DuplicateContainerName {
                        name,
                        first_job: first_job.to_string(),
                        second_job: job.name.clone(),
                    });
                }
                let mounts = process_mounts(default_mounts, bpm_disks, &job.name, &process.name);
                let container = self.process_container(
                    job,
                    config,
                    process,
                    &image,
                    mounts,
                    (index == 0).then_some(condition),
                    total_processes,
                );
                containers.push(container);
            }
        }

        if !self.errand && !self.disable_log_sidecar {
            containers.push(self.log_sidecar());
        }

        debug!(
            instance_group = %self.instance_group_name,
            containers = containers.len(),
            "compiled run containers"
        );
        Ok(containers)
    }

    fn total_processes(&self, jobs: &[Job]) -> Result<usize> {
        jobs.iter()
            .map(|job| self.bpm_config(job).map(|c| c.processes.len()))
            .sum()
    }

    fn bpm_config(&self, job: &Job) -> Result<&'a BpmConfig> {
        self.bpm_configs
            .get(&job.name)
            .map_err(|_| ConversionError::missing_bpm_config(&job.name))
    }

    fn job_image(&self, job: &Job) -> Result<String> {
        self.release_images
            .release_image(&self.instance_group_name, &job.name)
            .map_err(|source| ConversionError::ReleaseImage {
                job: job.name.clone(),
                source,
            })
    }

    /// `post_start` is `Some` only for the first process of a job and carries
    /// the job's optional condition.
    #[allow(clippy::too_many_arguments)]
    fn process_container(
        &self,
        job: &Job,
        config: &BpmConfig,
        process: &Process,
        image: &str,
        volume_mounts: Vec<VolumeMount>,
        post_start: Option<Option<&PostStartCondition>>,
        total_processes: usize,
    ) -> Container {
        let name = names::container_name(&job.name, &process.name);
        let (command, args) = self.process_command(job, process, post_start);
        let health = config.run.healthcheck.get(&process.name);

        Container {
            name: name.clone(),
            image: image.to_string(),
            image_pull_policy: Some(image_pull_policy(image)),
            command: Some(command),
            args: Some(args),
            working_dir: Some(
                process
                    .workdir
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", crate::JOBS_DIR, job.name)),
            ),
            env: process_env(job, process),
            resources: process_resources(process),
            liveness_probe: health.and_then(|h| h.liveness_probe.clone()),
            readiness_probe: health.and_then(|h| h.readiness_probe.clone()),
            lifecycle: Some(Lifecycle {
                post_start: None,
                pre_stop: Some(drain::drain_handler(&job.name, &name, total_processes)),
            }),
            volume_mounts,
            security_context: Some(process_security_context(config, process)),
        }
    }

    fn process_command(
        &self,
        job: &Job,
        process: &Process,
        post_start: Option<Option<&PostStartCondition>>,
    ) -> (Vec<String>, Vec<String>) {
        if self.errand {
            let mut args = vec![process.executable.clone()];
            args.extend(process.args.iter().cloned());
            return (vec![DUMB_INIT.to_string(), "--".to_string()], args);
        }

        let mut args = vec![
            "--job-name".to_string(),
            job.name.clone(),
            "--process-name".to_string(),
            process.name.clone(),
        ];
        if let Some(condition) = post_start {
            args.push("--post-start-name".to_string());
            args.push(format!("{}/{}/bin/post-start", crate::JOBS_DIR, job.name));
            if let Some((command, command_args)) =
                condition.and_then(|c| c.exec.command.split_first())
            {
                args.push("--post-start-condition-command-name".to_string());
                args.push(command.clone());
                for arg in command_args {
                    args.push("--post-start-condition-command-arg".to_string());
                    args.push(arg.clone());
                }
            }
        }
        args.push("--".to_string());
        args.push(process.executable.clone());
        args.extend(process.args.iter().cloned());

        (vec![CONTAINER_RUN_PATH.to_string()], args)
    }

    fn log_sidecar(&self) -> Container {
        Container {
            name: LOG_SIDECAR_NAME.to_string(),
            command: Some(vec![DUMB_INIT.to_string(), "--".to_string()]),
            args: Some(vec![
                "kubosh".to_string(),
                "util".to_string(),
                "tail-logs".to_string(),
            ]),
            volume_mounts: vec![VolumeMount::new(SYS_DIR, crate::SYS_DIR).read_only(true)],
            ..self.operator_container()
        }
    }

    /// Base container running the operator image
    fn operator_container(&self) -> Container {
        Container {
            image: self.operator_image.image.clone(),
            image_pull_policy: Some(self.operator_image.pull_policy.clone()),
            ..Default::default()
        }
    }

    fn job_debug(&self, job: &Job) -> bool {
        self.debug || job.properties.kubosh.debug
    }
}

/// Job-level condition wins over the one in the BPM config
fn post_start_condition<'c>(job: &'c Job, config: &'c BpmConfig) -> Option<&'c PostStartCondition> {
    job.properties
        .kubosh
        .post_start
        .as_ref()
        .and_then(|p| p.condition.as_ref())
        .or_else(|| config.post_start.as_ref().and_then(|p| p.condition.as_ref()))
}

/// Default mounts, then the job's ephemeral and persistent disks, then the
/// process's own disks; the first mount for a path wins.
pub(crate) fn process_mounts(
    default_mounts: &[VolumeMount],
    bpm_disks: &Disks,
    job: &str,
    process: &str,
) -> Vec<VolumeMount> {
    let job_disks = bpm_disks.filter(LABEL_JOB_NAME, job);
    let mounts = default_mounts
        .iter()
        .cloned()
        .chain(job_disks.filter(LABEL_EPHEMERAL, "true").volume_mounts())
        .chain(job_disks.filter(LABEL_PERSISTENT, "true").volume_mounts())
        .chain(job_disks.filter(LABEL_PROCESS_NAME, process).volume_mounts());
    dedup_mounts(mounts)
}

/// Keep the earliest mount for each mount path
pub(crate) fn dedup_mounts(mounts: impl IntoIterator<Item = VolumeMount>) -> Vec<VolumeMount> {
    let mut seen = BTreeSet::new();
    mounts
        .into_iter()
        .filter(|m| seen.insert(m.mount_path.clone()))
        .collect()
}

/// Process env, then job env (replacing same-named entries in place), then
/// defaults for names still unset
fn process_env(job: &Job, process: &Process) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = process
        .env
        .iter()
        .map(|(name, value)| EnvVar::literal(name, value))
        .collect();

    for extra in &job.properties.kubosh.envs {
        match env.iter_mut().find(|e| e.name == extra.name) {
            Some(existing) => *existing = extra.clone(),
            None => env.push(extra.clone()),
        }
    }

    for (name, value) in DEFAULT_ENV {
        if !env.iter().any(|e| e.name == name) {
            env.push(EnvVar::literal(name, value));
        }
    }

    env
}

/// Unparsable quantities are left unset instead of failing the compilation.
/// `open_files` and `processes` have no container-level equivalent.
fn process_resources(process: &Process) -> Option<ResourceRequirements> {
    let requests = ResourceQuantity {
        cpu: process.requests.cpu.as_deref().and_then(quantity::parse_cpu),
        memory: process.requests.memory.as_deref().and_then(quantity::parse_memory),
    };
    let limits = ResourceQuantity {
        cpu: process.limits.cpu.as_deref().and_then(quantity::parse_cpu),
        memory: process.limits.memory.as_deref().and_then(quantity::parse_memory),
    };

    if requests.is_empty() && limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
    })
}

fn process_security_context(config: &BpmConfig, process: &Process) -> K8sSecurityContext {
    let mut context = config.run.security_context.clone().unwrap_or_default();

    if !process.capabilities.is_empty() {
        let capabilities = context.capabilities.get_or_insert_with(Capabilities::default);
        let add = capabilities.add.get_or_insert_with(Vec::new);
        for capability in &process.capabilities {
            if !add.contains(capability) {
                add.push(capability.clone());
            }
        }
    }
    if process.unsafe_config.privileged {
        context.privileged = Some(true);
    }
    context.run_as_user.get_or_insert(0);

    context
}

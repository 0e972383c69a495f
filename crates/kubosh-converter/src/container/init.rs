//! Init containers
//!
//! Fixed order: supervisor staging (services only), one spec copier per
//! release, template rendering, directory creation, the optional wait for a
//! required service, BOSH pre-start per job and BPM pre-start per hooked
//! process.

use kubosh_common::k8s::{Container, EnvVar, VolumeMount};
use kubosh_common::manifest::Job;
use kubosh_common::names::sanitize_dns_label;

use super::{dedup_mounts, process_mounts, process_security_context, ContainerFactory, DUMB_INIT};
use crate::config::image_pull_policy;
use crate::disk::{Disks, LABEL_JOB_NAME};
use crate::volume_names::RENDERING_DATA;
use crate::Result;

/// Where release images keep their job specs and templates
const JOBS_SRC_DIR: &str = "/var/vcap/jobs-src";

/// Where the supervisor binary lives in the operator image
const CONTAINER_RUN_SRC: &str = "/usr/local/bin/container-run";

/// Seconds a failing hook container stays alive in debug mode
const DEBUG_WINDOW_SECONDS: u32 = 3600;

impl ContainerFactory<'_> {
    /// Init containers preparing a pod of the instance group
    pub fn jobs_to_init_containers(
        &self,
        jobs: &[Job],
        default_mounts: &[VolumeMount],
        bpm_disks: &Disks,
        required_service: Option<&str>,
    ) -> Result<Vec<Container>> {
        let mut containers = Vec::new();

        if !self.errand {
            containers.push(self.container_run_copier());
        }

        let mut releases: Vec<&str> = Vec::new();
        for job in jobs {
            if releases.contains(&job.release.as_str()) {
                continue;
            }
            releases.push(&job.release);
            let image = self.job_image(job)?;
            containers.push(spec_copier(&job.release, &image));
        }

        containers.push(self.template_render(default_mounts));
        containers.push(self.create_dirs(jobs, default_mounts));

        if let Some(service) = required_service {
            containers.push(self.wait_for(service));
        }

        for job in jobs {
            let image = self.job_image(job)?;
            let job_mounts = bpm_disks.filter(LABEL_JOB_NAME, &job.name).volume_mounts();
            let mounts = dedup_mounts(default_mounts.iter().cloned().chain(job_mounts));
            let pre_start = format!("{}/{}/bin/pre-start", crate::JOBS_DIR, job.name);
            let script = format!("if [ -x {0} ]; then {0}; fi", pre_start);

            containers.push(Container {
                name: sanitize_dns_label(&format!("bosh-pre-start-{}", job.name)),
                image: image.clone(),
                image_pull_policy: Some(image_pull_policy(&image)),
                command: Some(shell()),
                args: Some(vec![debug_window(&script, self.job_debug(job))]),
                volume_mounts: mounts,
                ..Default::default()
            });
        }

        for job in jobs {
            let config = self.bpm_config(job)?;
            let hooked: Vec<_> = config
                .processes
                .iter()
                .filter_map(|p| p.hooks.pre_start.as_ref().map(|hook| (p, hook)))
                .collect();
            if hooked.is_empty() {
                continue;
            }
            let image = self.job_image(job)?;

            for (process, hook) in hooked {
                containers.push(Container {
                    name: sanitize_dns_label(&format!("bpm-pre-start-{}-{}", job.name, process.name)),
                    image: image.clone(),
                    image_pull_policy: Some(image_pull_policy(&image)),
                    command: Some(shell()),
                    args: Some(vec![debug_window(hook, self.job_debug(job))]),
                    working_dir: Some(format!("{}/{}", crate::JOBS_DIR, job.name)),
                    volume_mounts: process_mounts(default_mounts, bpm_disks, &job.name, &process.name),
                    security_context: Some(process_security_context(config, process)),
                    ..Default::default()
                });
            }
        }

        Ok(containers)
    }

    fn container_run_copier(&self) -> Container {
        let target = super::CONTAINER_RUN_PATH;
        let dir = target.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(target);
        Container {
            name: "container-run-copier".to_string(),
            command: Some(shell()),
            args: Some(vec![format!(
                "mkdir -p {} && cp {} {}",
                dir, CONTAINER_RUN_SRC, target
            )]),
            volume_mounts: vec![rendering_mount()],
            ..self.operator_container()
        }
    }

    fn template_render(&self, default_mounts: &[VolumeMount]) -> Container {
        Container {
            name: "template-render".to_string(),
            command: Some(vec![DUMB_INIT.to_string(), "--".to_string()]),
            args: Some(vec![
                "kubosh".to_string(),
                "util".to_string(),
                "template-render".to_string(),
            ]),
            env: vec![
                EnvVar::literal("INSTANCE_GROUP_NAME", &self.instance_group_name),
                EnvVar::literal("RESOLVED_PROPERTIES_VERSION", &self.resolved_properties_version),
                EnvVar::literal(
                    "BOSH_MANIFEST_PATH",
                    format!("{}/properties.yaml", crate::RESOLVED_PROPERTIES_DIR),
                ),
                EnvVar::literal("JOBS_DIR", crate::RENDERING_DATA_DIR),
                EnvVar::literal("INITIAL_ROLLOUT", self.initial_rollout.to_string()),
                EnvVar::from_field("POD_IP", "status.podIP"),
            ],
            volume_mounts: default_mounts.to_vec(),
            ..self.operator_container()
        }
    }

    fn create_dirs(&self, jobs: &[Job], default_mounts: &[VolumeMount]) -> Container {
        let dirs: Vec<String> = jobs
            .iter()
            .flat_map(|job| {
                [
                    format!("{}/{}", crate::DATA_DIR, job.name),
                    format!("{}/log/{}", crate::SYS_DIR, job.name),
                    format!("{}/{}", crate::SYS_RUN_DIR, job.name),
                ]
            })
            .collect();
        Container {
            name: "create-dirs".to_string(),
            command: Some(shell()),
            args: Some(vec![format!("mkdir -p {}", dirs.join(" "))]),
            volume_mounts: default_mounts.to_vec(),
            ..self.operator_container()
        }
    }

    fn wait_for(&self, service: &str) -> Container {
        Container {
            name: "wait-for".to_string(),
            command: Some(vec![DUMB_INIT.to_string(), "--".to_string()]),
            args: Some(vec![
                "kubosh".to_string(),
                "util".to_string(),
                "wait".to_string(),
                service.to_string(),
            ]),
            ..self.operator_container()
        }
    }
}

fn spec_copier(release: &str, image: &str) -> Container {
    let target = format!("{}/jobs-src/{}", crate::RENDERING_DATA_DIR, release);
    Container {
        name: sanitize_dns_label(&format!("spec-copier-{}", release)),
        image: image.to_string(),
        image_pull_policy: Some(image_pull_policy(image)),
        command: Some(shell()),
        args: Some(vec![format!(
            "mkdir -p {0} && cp -ar {1}/* {0}",
            target, JOBS_SRC_DIR
        )]),
        volume_mounts: vec![rendering_mount()],
        ..Default::default()
    }
}

fn rendering_mount() -> VolumeMount {
    VolumeMount::new(RENDERING_DATA, crate::RENDERING_DATA_DIR)
}

fn shell() -> Vec<String> {
    vec!["/bin/sh".to_string(), "-xc".to_string()]
}

/// In debug mode a failing script keeps the container alive for inspection
fn debug_window(script: &str, debug: bool) -> String {
    if debug {
        format!(
            "( {} ) || ( echo \"Debug window 1hr\" ; sleep {} )",
            script, DEBUG_WINDOW_SECONDS
        )
    } else {
        script.to_string()
    }
}

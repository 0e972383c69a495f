//! Volume factory
//!
//! Produces the fixed default disks every instance group mounts and the
//! variable disks driven by BPM process declarations (ephemeral, persistent,
//! additional and unrestricted volumes).

use kubosh_common::bpm::{BpmConfigs, BpmVolume, Process};
use kubosh_common::k8s::{PersistentVolumeClaim, Volume, VolumeMount};
use kubosh_common::manifest::InstanceGroup;
use kubosh_common::names;
use regex::Regex;
use tracing::{debug, warn};

use crate::disk::{
    Disk, Disks, LABEL_EPHEMERAL, LABEL_JOB_NAME, LABEL_PERSISTENT, LABEL_PROCESS_NAME,
};
use crate::error::ConversionError;
use crate::volume_names::{DATA_DIR, JOBS_DIR, RENDERING_DATA, RESOLVED_PROPERTIES, STORE_DIR, SYS_DIR};
use crate::Result;

/// Roots an additional volume may live under
const ADDITIONAL_VOLUME_ROOTS: [&str; 3] = [crate::DATA_DIR, crate::STORE_DIR, crate::SYS_RUN_DIR];

/// Captures the root and the path below it
const ADDITIONAL_VOLUME_PATTERN: &str = r"^(/var/vcap/data|/var/vcap/store|/var/vcap/sys/run)/(.+?)/*$";

/// Builds disks for one manifest in one namespace
#[derive(Clone, Debug)]
pub struct VolumeFactory {
    manifest_name: String,
    namespace: String,
}

impl VolumeFactory {
    /// Create a factory for `manifest_name` deployed into `namespace`
    pub fn new(manifest_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            manifest_name: manifest_name.into(),
            namespace: namespace.into(),
        }
    }

    /// Disks every pod of the instance group mounts, in a fixed order.
    ///
    /// The resolved properties secret name is derived from the manifest,
    /// instance group and `resolved_properties_version`, so the same version
    /// always yields the same secret.
    pub fn default_disks(&self, ig: &InstanceGroup, resolved_properties_version: &str) -> Disks {
        let mut disks = Disks::new();

        disks.push(Disk::new(
            Some(Volume::from_empty_dir(RENDERING_DATA)),
            Some(VolumeMount::new(RENDERING_DATA, crate::RENDERING_DATA_DIR)),
        ));
        disks.push(Disk::new(
            Some(Volume::from_empty_dir(JOBS_DIR)),
            Some(VolumeMount::new(JOBS_DIR, crate::JOBS_DIR)),
        ));
        disks.push(self.data_dir_disk(ig));
        disks.push(Disk::new(
            Some(Volume::from_empty_dir(SYS_DIR)),
            Some(VolumeMount::new(SYS_DIR, crate::SYS_DIR)),
        ));

        let secret_name = names::resolved_properties_secret_name(
            &self.manifest_name,
            &ig.name,
            resolved_properties_version,
        );
        disks.push(Disk::new(
            Some(Volume::from_secret(RESOLVED_PROPERTIES, secret_name)),
            Some(VolumeMount::new(RESOLVED_PROPERTIES, crate::RESOLVED_PROPERTIES_DIR).read_only(true)),
        ));

        disks
    }

    fn data_dir_disk(&self, ig: &InstanceGroup) -> Disk {
        let mount = VolumeMount::new(DATA_DIR, crate::DATA_DIR);
        match &ig.settings().ephemeral_disk {
            Some(ephemeral) => {
                let claim_name = names::ephemeral_claim_name(&self.manifest_name, &ig.name);
                let pvc = PersistentVolumeClaim::new(
                    &claim_name,
                    &self.namespace,
                    &ephemeral.size,
                    ephemeral.storage_class.clone(),
                );
                Disk::new(Some(Volume::from_pvc(DATA_DIR, claim_name)), Some(mount)).with_pvc(pvc)
            }
            None => Disk::new(Some(Volume::from_empty_dir(DATA_DIR)), Some(mount)),
        }
    }

    /// Disks requested by the BPM processes of every job of the instance group.
    ///
    /// Jobs are walked in manifest order and processes in config order so the
    /// result is deterministic.
    pub fn bpm_disks(&self, ig: &InstanceGroup, bpm_configs: &BpmConfigs) -> Result<Disks> {
        let path_pattern = Regex::new(ADDITIONAL_VOLUME_PATTERN).map_err(|e| {
            ConversionError::Manifest(kubosh_common::Error::validation(e.to_string()))
        })?;

        let mut disks = Disks::new();
        let mut persistent_claim = self.persistent_claim(ig);

        for job in &ig.jobs {
            let config = bpm_configs
                .get(&job.name)
                .map_err(|_| ConversionError::missing_bpm_config(&job.name))?;

            let mut has_ephemeral = false;
            let mut has_persistent = false;

            for process in &config.processes {
                let (additional, unrestricted) = classify_volumes(&job.name, process);

                for volume in &additional {
                    let mut disk = additional_volume_disk(&path_pattern, volume)?
                        .with_label(LABEL_JOB_NAME, &job.name)
                        .with_label(LABEL_PROCESS_NAME, &process.name);
                    if disk.volume_mount.as_ref().is_some_and(|m| m.name == STORE_DIR) {
                        self.require_persistent_disk(ig, &job.name, &process.name)?;
                        disk = attach_store_volume(disk, &mut persistent_claim);
                    }
                    disks.push(disk);
                }

                for (index, volume) in unrestricted {
                    let name = names::unrestricted_volume_name(&job.name, &process.name, index);
                    let mount = VolumeMount::new(&name, &volume.path).read_only(!volume.writable);
                    disks.push(
                        Disk::new(Some(Volume::from_empty_dir(name)), Some(mount))
                            .with_label(LABEL_JOB_NAME, &job.name)
                            .with_label(LABEL_PROCESS_NAME, &process.name),
                    );
                }

                has_ephemeral |= process.ephemeral_disk;
                if process.persistent_disk {
                    self.require_persistent_disk(ig, &job.name, &process.name)?;
                    has_persistent = true;
                }
            }

            if has_ephemeral {
                let mount = VolumeMount::new(DATA_DIR, format!("{}/{}", crate::DATA_DIR, job.name))
                    .with_sub_path(&job.name);
                disks.push(
                    Disk::new(None, Some(mount))
                        .with_label(LABEL_JOB_NAME, &job.name)
                        .with_label(LABEL_EPHEMERAL, "true"),
                );
            }

            if has_persistent {
                let mount =
                    VolumeMount::new(STORE_DIR, format!("{}/{}", crate::STORE_DIR, job.name))
                        .with_sub_path(&job.name);
                let disk = Disk::new(None, Some(mount))
                    .with_label(LABEL_JOB_NAME, &job.name)
                    .with_label(LABEL_PERSISTENT, "true");
                disks.push(attach_store_volume(disk, &mut persistent_claim));
            }
        }

        debug!(instance_group = %ig.name, disks = disks.len(), "generated bpm disks");
        Ok(disks)
    }

    fn persistent_claim(&self, ig: &InstanceGroup) -> Option<PersistentVolumeClaim> {
        ig.persistent_disk_size().map(|size| {
            PersistentVolumeClaim::new(
                names::persistent_claim_name(&self.manifest_name, &ig.name),
                &self.namespace,
                format!("{}Mi", size),
                ig.persistent_disk_type.clone(),
            )
        })
    }

    fn require_persistent_disk(&self, ig: &InstanceGroup, job: &str, process: &str) -> Result<()> {
        if ig.persistent_disk_size().is_some() {
            return Ok(());
        }
        Err(ConversionError::PersistentDiskRequired {
            instance_group: ig.name.clone(),
            job: job.to_string(),
            process: process.to_string(),
        })
    }
}

/// The first disk mounting the store takes the claim and the pod volume.
fn attach_store_volume(disk: Disk, claim: &mut Option<PersistentVolumeClaim>) -> Disk {
    match claim.take() {
        Some(pvc) => {
            let volume = Volume::from_pvc(STORE_DIR, &pvc.metadata.name);
            Disk {
                volume: Some(volume),
                ..disk.with_pvc(pvc)
            }
        }
        None => disk,
    }
}

/// Split a process's volumes into additional volumes and the unrestricted
/// ones that keep their literal path, tagged with their declared index.
fn classify_volumes<'a>(job: &str, process: &'a Process) -> (Vec<&'a BpmVolume>, Vec<(usize, &'a BpmVolume)>) {
    let mut additional: Vec<&BpmVolume> = process.additional_volumes.iter().collect();
    let mut unrestricted = Vec::new();

    for (index, volume) in process.unsafe_config.unrestricted_volumes.iter().enumerate() {
        if is_under(&volume.path, crate::JOBS_DIR) || volume.path == crate::JOBS_DIR {
            debug!(job, process = %process.name, path = %volume.path, "skipping unrestricted volume inside the jobs directory");
            continue;
        }
        if ADDITIONAL_VOLUME_ROOTS.iter().any(|root| is_under(&volume.path, root)) {
            warn!(
                job,
                process = %process.name,
                path = %volume.path,
                "unrestricted volume is below a managed root; mounting it as an additional volume"
            );
            additional.push(volume);
            continue;
        }
        unrestricted.push((index, volume));
    }

    (additional, unrestricted)
}

/// True when `path` is strictly below `root`, comparing whole segments
fn is_under(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.trim_matches('/').is_empty())
}

/// Sub-paths must stay below their root: no empty, `.` or `..` segments
fn is_relative_path(path: &str) -> bool {
    path.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

fn additional_volume_disk(pattern: &Regex, volume: &BpmVolume) -> Result<Disk> {
    let captures = pattern
        .captures(&volume.path)
        .ok_or_else(|| ConversionError::invalid_additional_volume_path(&volume.path))?;
    let root = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let rest = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    if !is_relative_path(rest) {
        return Err(ConversionError::invalid_additional_volume_path(&volume.path));
    }

    let (volume_name, sub_path) = match root {
        crate::DATA_DIR => (DATA_DIR, rest.to_string()),
        crate::STORE_DIR => (STORE_DIR, rest.to_string()),
        _ => (SYS_DIR, format!("run/{}", rest)),
    };

    let mount = VolumeMount::new(volume_name, &volume.path)
        .with_sub_path(sub_path)
        .read_only(!volume.writable);
    Ok(Disk::new(None, Some(mount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubosh_common::bpm::{BpmConfig, UnsafeConfig};
    use kubosh_common::manifest::{EphemeralDiskSettings, Job};

    fn job(name: &str) -> Job {
        Job {
            name: name.to_string(),
            release: "redis".to_string(),
            ..Default::default()
        }
    }

    fn ig(jobs: &[&str]) -> InstanceGroup {
        InstanceGroup {
            name: "redis-slave".to_string(),
            instances: 1,
            jobs: jobs.iter().map(|j| job(j)).collect(),
            ..Default::default()
        }
    }

    fn process(name: &str) -> Process {
        Process {
            name: name.to_string(),
            executable: "/bin/true".to_string(),
            ..Default::default()
        }
    }

    fn configs(entries: Vec<(&str, Vec<Process>)>) -> BpmConfigs {
        entries
            .into_iter()
            .map(|(job, processes)| {
                (
                    job.to_string(),
                    BpmConfig {
                        processes,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn volume(path: &str, writable: bool) -> BpmVolume {
        BpmVolume {
            path: path.to_string(),
            writable,
            ..Default::default()
        }
    }

    fn factory() -> VolumeFactory {
        VolumeFactory::new("cache", "default")
    }

    #[test]
    fn default_disks_fixed_order() {
        let disks = factory().default_disks(&ig(&["redis-server"]), "3");
        let names: Vec<_> = disks.volumes().into_iter().map(|v| v.name).collect();
        assert_eq!(
            names,
            vec!["rendering-data", "jobs-dir", "data-dir", "sys-dir", "ig-resolved"]
        );
        let secret = disks.volumes()[4].secret.clone().unwrap();
        assert_eq!(secret.secret_name, "cache.ig-resolved.redis-slave-v3");
        assert!(disks.pvcs().is_empty());
        assert_eq!(disks.volume_mounts()[4].read_only, Some(true));
    }

    #[test]
    fn default_disks_are_stable_per_version() {
        let f = factory();
        let group = ig(&["redis-server"]);
        assert_eq!(f.default_disks(&group, "1"), f.default_disks(&group, "1"));
        assert_ne!(f.default_disks(&group, "1"), f.default_disks(&group, "2"));
    }

    #[test]
    fn ephemeral_disk_setting_backs_data_dir_with_claim() {
        let mut group = ig(&["redis-server"]);
        group.env.bosh.agent.settings.ephemeral_disk = Some(EphemeralDiskSettings {
            size: "10Gi".to_string(),
            storage_class: Some("local".to_string()),
        });
        let disks = factory().default_disks(&group, "1");
        let pvcs = disks.pvcs();
        assert_eq!(pvcs.len(), 1);
        assert_eq!(pvcs[0].metadata.name, "cache-redis-slave-ephemeral");
        assert_eq!(pvcs[0].spec.resources.requests.storage, "10Gi");
        let data = &disks.volumes()[2];
        assert_eq!(
            data.persistent_volume_claim.as_ref().unwrap().claim_name,
            "cache-redis-slave-ephemeral"
        );
    }

    #[test]
    fn missing_bpm_config_fails() {
        let err = factory()
            .bpm_disks(&ig(&["redis-server"]), &BpmConfigs::default())
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingBpmConfig { ref job } if job == "redis-server"));
    }

    #[test]
    fn ephemeral_disk_mounts_job_slice() {
        let mut redis = process("redis");
        redis.ephemeral_disk = true;
        let mut other = process("other");
        other.ephemeral_disk = true;
        let disks = factory()
            .bpm_disks(&ig(&["redis-server"]), &configs(vec![("redis-server", vec![redis, other])]))
            .unwrap();
        let ephemeral = disks.filter(LABEL_EPHEMERAL, "true");
        assert_eq!(ephemeral.len(), 1);
        let mount = &ephemeral.volume_mounts()[0];
        assert_eq!(mount.name, "data-dir");
        assert_eq!(mount.mount_path, "/var/vcap/data/redis-server");
        assert_eq!(mount.sub_path.as_deref(), Some("redis-server"));
        assert!(ephemeral.volumes().is_empty());
    }

    #[test]
    fn persistent_disk_requires_size() {
        let mut pg = process("pg");
        pg.persistent_disk = true;
        let err = factory()
            .bpm_disks(&ig(&["postgres"]), &configs(vec![("postgres", vec![pg])]))
            .unwrap_err();
        assert!(err.to_string().contains("redis-slave"));
    }

    #[test]
    fn persistent_claim_is_shared_across_jobs() {
        let mut group = ig(&["postgres", "backup"]);
        group.persistent_disk = Some(2048);
        group.persistent_disk_type = Some("fast".to_string());
        let mut pg = process("pg");
        pg.persistent_disk = true;
        let mut backup = process("backup");
        backup.persistent_disk = true;
        let disks = factory()
            .bpm_disks(
                &group,
                &configs(vec![("postgres", vec![pg]), ("backup", vec![backup])]),
            )
            .unwrap();

        let pvcs = disks.pvcs();
        assert_eq!(pvcs.len(), 1);
        assert_eq!(pvcs[0].metadata.name, "cache-redis-slave-pvc");
        assert_eq!(pvcs[0].spec.resources.requests.storage, "2048Mi");
        assert_eq!(pvcs[0].spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(disks.volumes().len(), 1);

        let backup_mounts = disks
            .filter(LABEL_JOB_NAME, "backup")
            .filter(LABEL_PERSISTENT, "true")
            .volume_mounts();
        assert_eq!(backup_mounts[0].mount_path, "/var/vcap/store/backup");
        assert_eq!(backup_mounts[0].sub_path.as_deref(), Some("backup"));
    }

    #[test]
    fn additional_volumes_under_allowed_roots() {
        let mut group = ig(&["redis-server"]);
        group.persistent_disk = Some(100);
        let mut redis = process("redis");
        redis.additional_volumes = vec![
            volume("/var/vcap/data/redis/sockets", true),
            volume("/var/vcap/store/redis/aof/", false),
            volume("/var/vcap/sys/run/redis", false),
        ];
        let disks = factory()
            .bpm_disks(&group, &configs(vec![("redis-server", vec![redis])]))
            .unwrap();
        let mounts = disks.filter(LABEL_PROCESS_NAME, "redis").volume_mounts();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].name, "data-dir");
        assert_eq!(mounts[0].sub_path.as_deref(), Some("redis/sockets"));
        assert_eq!(mounts[0].read_only, None);
        assert_eq!(mounts[1].name, "store-dir");
        assert_eq!(mounts[1].sub_path.as_deref(), Some("redis/aof"));
        assert_eq!(mounts[1].read_only, Some(true));
        assert_eq!(mounts[2].name, "sys-dir");
        assert_eq!(mounts[2].sub_path.as_deref(), Some("run/redis"));
        assert_eq!(disks.pvcs().len(), 1);
    }

    #[test]
    fn additional_volume_outside_roots_is_rejected() {
        for path in [
            "/sys/add1",
            "/var/vcap/data",
            "/var/vcap/sys/log/x",
            "/var/vcap/database/x",
            "/var/vcap/data/../../etc",
            "/var/vcap/data//abs",
            "/var/vcap/sys/run/./x/..",
        ] {
            let mut redis = process("redis");
            redis.additional_volumes = vec![volume(path, false)];
            let err = factory()
                .bpm_disks(&ig(&["redis-server"]), &configs(vec![("redis-server", vec![redis])]))
                .unwrap_err();
            assert!(err.to_string().contains(path), "{path}: {err}");
        }
    }

    #[test]
    fn reclassified_volume_cannot_escape_root() {
        let mut redis = process("redis");
        redis.unsafe_config = UnsafeConfig {
            unrestricted_volumes: vec![volume("/var/vcap/store/../../../etc", true)],
            ..Default::default()
        };
        let err = factory()
            .bpm_disks(&ig(&["redis-server"]), &configs(vec![("redis-server", vec![redis])]))
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidAdditionalVolumePath { .. }), "{err}");
    }

    #[test]
    fn nested_sub_paths_are_kept() {
        assert!(is_relative_path("redis/sockets"));
        assert!(!is_relative_path("redis/../sockets"));
        assert!(!is_relative_path("/abs"));
        assert!(!is_relative_path("./x"));
    }

    #[test]
    fn store_additional_volume_requires_persistent_disk() {
        let mut redis = process("redis");
        redis.additional_volumes = vec![volume("/var/vcap/store/redis", true)];
        let err = factory()
            .bpm_disks(&ig(&["redis-server"]), &configs(vec![("redis-server", vec![redis])]))
            .unwrap_err();
        assert!(matches!(err, ConversionError::PersistentDiskRequired { .. }));
    }

    #[test]
    fn unrestricted_volumes_are_classified() {
        let mut redis = process("redis");
        redis.unsafe_config = UnsafeConfig {
            privileged: false,
            unrestricted_volumes: vec![
                volume("/var/vcap/jobs/redis-server/config", false),
                volume("/var/vcap/data/redis/tmp", true),
                volume("/var/vcap/data", false),
                volume("/dev/log", true),
                volume("/var/vcap/sys/runner", false),
            ],
        };
        let disks = factory()
            .bpm_disks(&ig(&["redis-server"]), &configs(vec![("redis-server", vec![redis])]))
            .unwrap();
        let mounts = disks.volume_mounts();
        let paths: Vec<_> = mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/var/vcap/data/redis/tmp", "/var/vcap/data", "/dev/log", "/var/vcap/sys/runner"]
        );
        assert_eq!(mounts[0].name, "data-dir");
        assert_eq!(mounts[0].sub_path.as_deref(), Some("redis/tmp"));
        assert_eq!(mounts[1].name, "bpm-unrestricted-volume-redis-server-redis-2");
        assert_eq!(mounts[1].read_only, Some(true));
        assert_eq!(mounts[2].name, "bpm-unrestricted-volume-redis-server-redis-3");
        assert_eq!(mounts[2].read_only, None);
        assert!(mounts[2].sub_path.is_none());
        assert_eq!(disks.volumes().len(), 3);
    }

    #[test]
    fn segment_aware_prefix() {
        assert!(is_under("/var/vcap/data/x", "/var/vcap/data"));
        assert!(!is_under("/var/vcap/database", "/var/vcap/data"));
        assert!(!is_under("/var/vcap/data", "/var/vcap/data"));
        assert!(!is_under("/var/vcap/data/", "/var/vcap/data"));
    }
}

//! Disk model
//!
//! A [`Disk`] bundles an optional claim, pod volume and mount with a small
//! label set. Factories emit disks in a flat ordered list; consumers pick the
//! ones they need by label instead of holding references into each other.

use std::collections::BTreeMap;

use kubosh_common::k8s::{PersistentVolumeClaim, Volume, VolumeMount};

/// Label naming the job a disk belongs to
pub const LABEL_JOB_NAME: &str = "job_name";

/// Label naming the process a disk belongs to
pub const LABEL_PROCESS_NAME: &str = "process_name";

/// Label marking the per-job data directory disk
pub const LABEL_EPHEMERAL: &str = "ephemeral";

/// Label marking the per-job persistent store disk
pub const LABEL_PERSISTENT: &str = "persistent";

/// One unit of storage
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Disk {
    /// Claim to create alongside the workload
    pub pvc: Option<PersistentVolumeClaim>,
    /// Pod volume
    pub volume: Option<Volume>,
    /// Container mount
    pub volume_mount: Option<VolumeMount>,
    /// Classification labels, only used for filtering
    pub labels: BTreeMap<String, String>,
}

impl Disk {
    /// Disk carrying a volume and its mount
    pub fn new(volume: Option<Volume>, volume_mount: Option<VolumeMount>) -> Self {
        Self {
            pvc: None,
            volume,
            volume_mount,
            labels: BTreeMap::new(),
        }
    }

    /// Attach a claim
    pub fn with_pvc(mut self, pvc: PersistentVolumeClaim) -> Self {
        self.pvc = Some(pvc);
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    /// Exact label match
    pub fn matches_filter(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// Ordered collection of disks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Disks(Vec<Disk>);

impl Disks {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a disk
    pub fn push(&mut self, disk: Disk) {
        self.0.push(disk);
    }

    /// Disks whose label `key` equals `value`, in order
    pub fn filter(&self, key: &str, value: &str) -> Disks {
        Disks(
            self.0
                .iter()
                .filter(|d| d.matches_filter(key, value))
                .cloned()
                .collect(),
        )
    }

    /// Pod volumes, in order
    pub fn volumes(&self) -> Vec<Volume> {
        self.0.iter().filter_map(|d| d.volume.clone()).collect()
    }

    /// Container mounts, in order
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.0.iter().filter_map(|d| d.volume_mount.clone()).collect()
    }

    /// Claims, in order
    pub fn pvcs(&self) -> Vec<PersistentVolumeClaim> {
        self.0.iter().filter_map(|d| d.pvc.clone()).collect()
    }

    /// Iterate over the disks
    pub fn iter(&self) -> std::slice::Iter<'_, Disk> {
        self.0.iter()
    }

    /// Number of disks
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no disks
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Disk> for Disks {
    fn from_iter<T: IntoIterator<Item = Disk>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Disks {
    type Item = &'a Disk;
    type IntoIter = std::slice::Iter<'a, Disk>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disks() -> Disks {
        [
            Disk::new(
                Some(Volume::from_empty_dir("a")),
                Some(VolumeMount::new("a", "/a")),
            )
            .with_label(LABEL_JOB_NAME, "redis")
            .with_label(LABEL_EPHEMERAL, "true"),
            Disk::new(None, Some(VolumeMount::new("b", "/b"))).with_label(LABEL_JOB_NAME, "redis"),
            Disk::new(Some(Volume::from_pvc("c", "claim")), None)
                .with_pvc(PersistentVolumeClaim::new("claim", "ns", "1Mi", None))
                .with_label(LABEL_JOB_NAME, "sentinel"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn filter_matches_exact_labels() {
        let all = disks();
        assert_eq!(all.filter(LABEL_JOB_NAME, "redis").len(), 2);
        assert_eq!(all.filter(LABEL_JOB_NAME, "red").len(), 0);
        let ephemeral = all
            .filter(LABEL_JOB_NAME, "redis")
            .filter(LABEL_EPHEMERAL, "true");
        assert_eq!(ephemeral.len(), 1);
        assert!(all.filter(LABEL_PERSISTENT, "true").is_empty());
    }

    #[test]
    fn projections_keep_order_and_skip_missing() {
        let all = disks();
        let volumes: Vec<_> = all.volumes().into_iter().map(|v| v.name).collect();
        assert_eq!(volumes, vec!["a", "c"]);
        let mounts: Vec<_> = all.volume_mounts().into_iter().map(|m| m.mount_path).collect();
        assert_eq!(mounts, vec!["/a", "/b"]);
        assert_eq!(all.pvcs().len(), 1);
    }
}

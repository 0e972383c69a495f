//! Release image resolution

#[cfg(test)]
use mockall::automock;

use kubosh_common::manifest::Manifest;

/// Resolves the container image that carries a job's release
///
/// Implementations are typically a cached lookup; a failure aborts the whole
/// compilation of the instance group.
#[cfg_attr(test, automock)]
pub trait ReleaseImageProvider {
    /// Image reference for `job` of `instance_group`
    fn release_image(&self, instance_group: &str, job: &str) -> kubosh_common::Result<String>;
}

impl ReleaseImageProvider for Manifest {
    fn release_image(&self, instance_group: &str, job: &str) -> kubosh_common::Result<String> {
        Manifest::release_image(self, instance_group, job)
    }
}

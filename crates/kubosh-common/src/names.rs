//! Deterministic names for generated objects
//!
//! Every name is a pure function of manifest identity so repeated compilations
//! produce the same objects.

/// Sanitize a string into a valid K8s DNS label.
///
/// DNS labels: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`, max 63 chars.
pub fn sanitize_dns_label(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.len() > 63 {
        trimmed[..63].trim_end_matches('-').to_string()
    } else {
        trimmed.to_string()
    }
}

/// Name of the container running `process` of `job`
pub fn container_name(job: &str, process: &str) -> String {
    sanitize_dns_label(&format!("{}-{}", job, process))
}

/// Secret holding the resolved properties of an instance group
pub fn resolved_properties_secret_name(manifest: &str, instance_group: &str, version: &str) -> String {
    format!("{}.ig-resolved.{}-v{}", manifest, instance_group, version)
}

/// Claim backing the persistent store of an instance group
pub fn persistent_claim_name(manifest: &str, instance_group: &str) -> String {
    format!("{}-{}-pvc", manifest, instance_group)
}

/// Claim backing the data directory when an ephemeral disk size is set
pub fn ephemeral_claim_name(manifest: &str, instance_group: &str) -> String {
    format!("{}-{}-ephemeral", manifest, instance_group)
}

/// Scratch volume for the `index`-th unrestricted volume of a process
pub fn unrestricted_volume_name(job: &str, process: &str, index: usize) -> String {
    sanitize_dns_label(&format!(
        "bpm-unrestricted-volume-{}-{}-{}",
        job, process, index
    ))
}

/// Headless service governing the stateful set of an instance group
pub fn headless_service_name(instance_group: &str) -> String {
    sanitize_dns_label(instance_group)
}

/// Service addressing a single instance; `az_index` is `None` without zones
pub fn instance_service_name(instance_group: &str, az_index: Option<usize>, ordinal: u32) -> String {
    match az_index {
        Some(az) => sanitize_dns_label(&format!("{}-z{}-{}", instance_group, az, ordinal)),
        None => sanitize_dns_label(&format!("{}-{}", instance_group, ordinal)),
    }
}

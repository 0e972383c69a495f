//! Operator image configuration
//!
//! Operator-supplied containers (template rendering, log tailing, waiting for
//! services, directory creation, supervisor staging) all run the operator's
//! own image. The image is process-wide configuration: read once from the
//! environment, or set explicitly at startup.

use std::sync::OnceLock;

/// Environment variable holding the operator image
pub const OPERATOR_IMAGE_ENV: &str = "KUBOSH_OPERATOR_IMAGE";

/// Environment variable holding the operator image pull policy
pub const OPERATOR_IMAGE_PULL_POLICY_ENV: &str = "KUBOSH_OPERATOR_IMAGE_PULL_POLICY";

/// Image used when nothing is configured
pub const DEFAULT_OPERATOR_IMAGE: &str = "ghcr.io/kubosh/kubosh-operator:latest";

static GLOBAL: OnceLock<OperatorImage> = OnceLock::new();

/// Image and pull policy for operator-supplied containers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorImage {
    /// Image reference
    pub image: String,
    /// Pull policy (Always, IfNotPresent, Never)
    pub pull_policy: String,
}

impl OperatorImage {
    /// Image with a pull policy derived from its tag
    pub fn new(image: impl Into<String>) -> Self {
        let image = image.into();
        let pull_policy = image_pull_policy(&image);
        Self { image, pull_policy }
    }

    /// Override the pull policy
    pub fn with_pull_policy(mut self, pull_policy: impl Into<String>) -> Self {
        self.pull_policy = pull_policy.into();
        self
    }

    /// Read the image from the environment, falling back to the default
    pub fn from_env() -> Self {
        let image = std::env::var(OPERATOR_IMAGE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_OPERATOR_IMAGE.to_string());
        let configured = Self::new(image);
        match std::env::var(OPERATOR_IMAGE_PULL_POLICY_ENV) {
            Ok(policy) if !policy.is_empty() => configured.with_pull_policy(policy),
            _ => configured,
        }
    }

    /// Process-wide image, initialized from the environment on first use
    pub fn global() -> &'static OperatorImage {
        GLOBAL.get_or_init(Self::from_env)
    }

    /// Set the process-wide image.
    ///
    /// Returns the rejected value when the image was already initialized.
    pub fn set_global(image: OperatorImage) -> Result<(), OperatorImage> {
        GLOBAL.set(image)
    }
}

/// Determine image pull policy based on image tag
pub(crate) fn image_pull_policy(image: &str) -> String {
    if image.ends_with(":latest") || !image.contains(':') {
        "Always".to_string()
    } else {
        "IfNotPresent".to_string()
    }
}

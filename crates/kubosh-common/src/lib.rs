//! Common types for kubosh: the BOSH manifest and BPM model, Kubernetes
//! object types, naming helpers, errors and logging setup.

pub mod bpm;
pub mod error;
pub mod k8s;
pub mod kube_utils;
pub mod manifest;
pub mod names;
pub mod quantity;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key for the standard managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for the managed-by label on everything kubosh generates
pub const LABEL_MANAGED_BY_KUBOSH: &str = "kubosh";

/// Label carrying the BOSH deployment name
pub const LABEL_DEPLOYMENT_NAME: &str = "kubosh.io/deployment-name";

/// Label carrying the instance group name
pub const LABEL_INSTANCE_GROUP_NAME: &str = "kubosh.io/instance-group-name";

/// Label carrying the workload version; kept off pod templates
pub const LABEL_DEPLOYMENT_VERSION: &str = "kubosh.io/deployment-version";

/// Label set on pods with their availability zone index
pub const LABEL_AZ_INDEX: &str = "kubosh.io/az-index";

/// Label set on pods with their ordinal inside the zone
pub const LABEL_POD_ORDINAL: &str = "kubosh.io/pod-ordinal";

/// Label the active/passive controller sets on the active pod
pub const LABEL_ACTIVE_POD: &str = "kubosh.io/pod-active";

/// Value of [`LABEL_ACTIVE_POD`] on the active pod
pub const LABEL_ACTIVE_POD_VALUE: &str = "active";

/// Annotation with the canary watch time in milliseconds
pub const ANNOTATION_CANARY_WATCH_TIME: &str = "kubosh.io/canary-watch-time";

/// Annotation with the update watch time in milliseconds
pub const ANNOTATION_UPDATE_WATCH_TIME: &str = "kubosh.io/update-watch-time";

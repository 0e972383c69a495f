//! BOSH-to-Kubernetes workload compiler
//!
//! Turns one resolved instance group plus the BPM configs of its jobs into
//! the Kubernetes objects that run it:
//!
//! - [`volume::VolumeFactory`] computes the default and BPM-driven [`disk::Disks`]
//! - [`container::ContainerFactory`] builds init and run containers
//! - [`resources::Converter`] branches on lifecycle and assembles [`workload::BpmResources`]
//!
//! Compilation is pure and deterministic: identical inputs yield identical
//! output, so callers can diff the result against live state.

pub mod config;
pub mod container;
pub mod disk;
pub mod dns;
pub mod error;
pub mod image;
pub mod resources;
pub mod service;
pub mod volume;
pub mod workload;

pub use config::OperatorImage;
pub use container::ContainerFactory;
pub use disk::{Disk, Disks};
pub use dns::{ClusterDns, DnsSetting, DnsSettings};
pub use error::ConversionError;
pub use image::ReleaseImageProvider;
pub use resources::{Converter, ResourcesInput};
pub use volume::VolumeFactory;
pub use workload::BpmResources;

/// Result type alias for compilation
pub type Result<T> = std::result::Result<T, ConversionError>;

/// Root of everything the template renderer writes
pub const RENDERING_DATA_DIR: &str = "/var/vcap/all-releases";

/// Rendered job directories
pub const JOBS_DIR: &str = "/var/vcap/jobs";

/// Job-local scratch data
pub const DATA_DIR: &str = "/var/vcap/data";

/// Persistent store
pub const STORE_DIR: &str = "/var/vcap/store";

/// Logs and run state
pub const SYS_DIR: &str = "/var/vcap/sys";

/// Run state below [`SYS_DIR`]
pub const SYS_RUN_DIR: &str = "/var/vcap/sys/run";

/// Mount point of the resolved properties secret
pub const RESOLVED_PROPERTIES_DIR: &str = "/var/vcap/all-releases/ig-resolved";

/// Volume names of the default disks
pub mod volume_names {
    /// Template rendering scratch space
    pub const RENDERING_DATA: &str = "rendering-data";
    /// Rendered jobs
    pub const JOBS_DIR: &str = "jobs-dir";
    /// Data directory
    pub const DATA_DIR: &str = "data-dir";
    /// Sys directory
    pub const SYS_DIR: &str = "sys-dir";
    /// Persistent store
    pub const STORE_DIR: &str = "store-dir";
    /// Resolved properties secret
    pub const RESOLVED_PROPERTIES: &str = "ig-resolved";
}

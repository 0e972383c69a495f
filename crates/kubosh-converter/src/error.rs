//! Compilation error types
//!
//! Validation errors carry the offending value so the manifest author can
//! fix it from the error alone.

/// Errors that can occur while compiling an instance group
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("no bpm config found for job '{job}'")]
    MissingBpmConfig { job: String },

    #[error("instance group '{instance_group}' has no jobs")]
    NoJobs { instance_group: String },

    #[error(
        "container name '{name}' is produced by a process of job '{first_job}' and a process of \
         job '{second_job}'; rename one of the processes"
    )]
    DuplicateContainerName {
        name: String,
        first_job: String,
        second_job: String,
    },

    #[error(
        "additional volume path '{path}' must be below /var/vcap/data, /var/vcap/store or \
         /var/vcap/sys/run; use unsafe.unrestricted_volumes for other paths"
    )]
    InvalidAdditionalVolumePath { path: String },

    #[error(
        "process '{process}' of job '{job}' requests a persistent disk but instance group \
         '{instance_group}' declares no persistent_disk"
    )]
    PersistentDiskRequired {
        instance_group: String,
        job: String,
        process: String,
    },

    #[error("failed to resolve release image for job '{job}': {source}")]
    ReleaseImage {
        job: String,
        source: kubosh_common::Error,
    },

    #[error("{0}")]
    Manifest(#[from] kubosh_common::Error),

    #[error("dns settings: {message}")]
    Dns { message: String },

    #[error("instance group '{instance_group}': {source}")]
    InstanceGroup {
        instance_group: String,
        source: Box<ConversionError>,
    },
}

impl ConversionError {
    /// Attach instance group context
    pub fn for_instance_group(self, instance_group: &str) -> Self {
        match self {
            Self::InstanceGroup { .. } => self,
            other => Self::InstanceGroup {
                instance_group: instance_group.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Create a missing BPM config error
    pub fn missing_bpm_config(job: &str) -> Self {
        Self::MissingBpmConfig {
            job: job.to_string(),
        }
    }

    /// Create an invalid additional volume path error
    pub fn invalid_additional_volume_path(path: &str) -> Self {
        Self::InvalidAdditionalVolumePath {
            path: path.to_string(),
        }
    }

    /// Create a dns settings error
    pub fn dns(message: impl Into<String>) -> Self {
        Self::Dns {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_path_display_names_path() {
        let err = ConversionError::invalid_additional_volume_path("/sys/add1");
        let display = err.to_string();
        assert!(display.contains("/sys/add1"));
        assert!(display.contains("unrestricted_volumes"));
    }

    #[test]
    fn persistent_disk_display_names_instance_group() {
        let err = ConversionError::PersistentDiskRequired {
            instance_group: "db".to_string(),
            job: "postgres".to_string(),
            process: "pg".to_string(),
        };
        assert!(err.to_string().contains("'db'"));
    }

    #[test]
    fn instance_group_context_wraps_once() {
        let err = ConversionError::missing_bpm_config("redis")
            .for_instance_group("cache")
            .for_instance_group("other");
        let display = err.to_string();
        assert!(display.starts_with("instance group 'cache'"));
        assert!(display.contains("'redis'"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn common_errors_convert() {
        let err: ConversionError = kubosh_common::Error::validation_for("x", "y").into();
        assert!(matches!(err, ConversionError::Manifest(_)));
    }
}

//! Compile command

use std::path::PathBuf;

use clap::Args;
use kubosh_common::bpm::BpmConfigs;
use kubosh_common::manifest::{InstanceGroup, Manifest};
use kubosh_converter::{ClusterDns, Converter, OperatorImage, ResourcesInput};
use tracing::info;

use super::read_yaml;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Resolved deployment manifest
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// BPM configs of the deployment's jobs, keyed by job name
    #[arg(short, long)]
    pub bpm: PathBuf,

    /// Instance groups to compile (all when omitted)
    #[arg(short = 'g', long = "instance-group")]
    pub instance_groups: Vec<String>,

    /// Target namespace
    #[arg(short, long, env = "KUBOSH_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Deployment resource name (defaults to the manifest name)
    #[arg(long)]
    pub deployment_name: Option<String>,

    /// Address of the deployment DNS service
    #[arg(long, default_value = "")]
    pub service_ip: String,

    /// Cluster DNS domain
    #[arg(long, env = "KUBOSH_CLUSTER_DOMAIN", default_value = "cluster.local")]
    pub cluster_domain: String,

    /// Version of the workloads being compiled
    #[arg(long, default_value = "1")]
    pub workload_version: String,

    /// Version of the resolved properties secrets
    #[arg(long, default_value = "1")]
    pub resolved_properties_version: String,

    /// Operator image for init containers and sidecars
    #[arg(long, env = "KUBOSH_OPERATOR_IMAGE")]
    pub operator_image: Option<String>,
}

pub fn run(args: CompileArgs) -> Result<()> {
    let manifest: Manifest = read_yaml(&args.manifest)?;
    let bpm_configs: BpmConfigs = read_yaml(&args.bpm)?;
    print!("{}", compile(&args, &manifest, &bpm_configs)?);
    Ok(())
}

/// Compile the selected instance groups into one multi-document YAML stream
pub fn compile(args: &CompileArgs, manifest: &Manifest, bpm_configs: &BpmConfigs) -> Result<String> {
    let dns = ClusterDns::new(&args.cluster_domain);
    let mut converter = Converter::new(manifest, &dns);
    if let Some(image) = &args.operator_image {
        converter = converter.with_operator_image(OperatorImage::new(image));
    }
    let deployment_name = args.deployment_name.as_deref().unwrap_or(&manifest.name);

    let mut documents = Vec::new();
    for ig in select_instance_groups(manifest, &args.instance_groups)? {
        let resources = converter.resources(&ResourcesInput {
            manifest,
            namespace: &args.namespace,
            deployment_name,
            service_ip: &args.service_ip,
            workload_version: &args.workload_version,
            instance_group: ig,
            bpm_configs,
            resolved_properties_version: &args.resolved_properties_version,
        })?;
        documents.extend(resources.to_documents()?);
    }

    info!(documents = documents.len(), "compiled deployment {}", manifest.name);
    render_documents(&documents)
}

/// Instance groups by name in the order given, or every group in manifest order
fn select_instance_groups<'a>(manifest: &'a Manifest, names: &[String]) -> Result<Vec<&'a InstanceGroup>> {
    if names.is_empty() {
        return Ok(manifest.instance_groups.iter().collect());
    }
    names
        .iter()
        .map(|name| manifest.instance_group(name).map_err(Error::from))
        .collect()
}

fn render_documents(documents: &[serde_json::Value]) -> Result<String> {
    let mut out = String::new();
    for document in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(document)?);
    }
    Ok(out)
}

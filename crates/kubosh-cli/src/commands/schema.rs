//! Schema command

use clap::{Args, ValueEnum};
use kubosh_common::bpm::BpmConfigs;
use kubosh_common::manifest::Manifest;
use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::Result;

/// Input documents with a published schema
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Document {
    /// BPM configs keyed by job name
    Bpm,
    /// Deployment manifest
    Manifest,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Document to describe
    #[arg(value_enum, default_value = "bpm")]
    pub document: Document,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&schema(args.document))?);
    Ok(())
}

fn schema(document: Document) -> RootSchema {
    match document {
        Document::Bpm => schema_for!(BpmConfigs),
        Document::Manifest => schema_for!(Manifest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_schema_describes_processes() {
        let json = serde_json::to_value(schema(Document::Bpm)).unwrap();
        let text = json.to_string();
        assert!(text.contains("processes"));
        assert!(text.contains("additional_volumes"));
    }

    #[test]
    fn manifest_schema_describes_instance_groups() {
        let json = serde_json::to_value(schema(Document::Manifest)).unwrap();
        assert!(json.to_string().contains("instance_groups"));
    }
}

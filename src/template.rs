use std::{collections::{BTreeMap, BTreeSet}, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::{topological_order_by, Stack, Stage};
use crate::resources::DeletionPolicy;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// A CloudFormation template. Resources and outputs are kept in ordered
/// maps so the same stack always serializes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: String::new(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl Template {
    pub fn from_stack(stack: &Stack) -> Self {
        let mut template = Template {
            description: stack.description().to_string(),
            ..Default::default()
        };
        for node in stack.nodes() {
            let deletion_policy = node.resource.deletion_policy();
            let resource = TemplateResource {
                ty: node.resource.type_string().to_string(),
                properties: node.resource.properties(),
                depends_on: node.depends_on.iter().map(|d| d.to_string()).collect(),
                deletion_policy,
                update_replace_policy: deletion_policy,
            };
            template.resources.insert(node.id.to_string(), resource);
        }
        for (name, output) in stack.outputs() {
            template.outputs.insert(name.clone(), TemplateOutput {
                description: output.description.clone(),
                value: output.value.clone(),
            });
        }
        template
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// we make it pretty so if a user needs to look at the stack in the
    /// CloudFormation console, it looks nice.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a TemplateResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }

    pub fn edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.resources.iter()
            .map(|(id, r)| (id.clone(), r.depends_on.iter().cloned().collect()))
            .collect()
    }

    /// dependency order, with earlier stages first among resources that are
    /// ready at the same time.
    pub fn apply_order(&self) -> Result<Vec<String>> {
        topological_order_by(&self.edges(), |id| {
            self.resources.get(id)
                .and_then(|r| Stage::completed_by(&r.ty))
                .unwrap_or(Stage::ZoneResolved)
        })
    }

    pub fn file_name(stack_name: &str) -> String {
        format!("{stack_name}.template.json")
    }

    pub fn write_to<P: AsRef<Path>>(&self, out_dir: P, stack_name: &str) -> Result<PathBuf> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(Self::file_name(stack_name));
        let mut body = self.to_json_pretty()?;
        body.push('\n');
        std::fs::write(&path, body)?;
        tracing::info!(path = %path.display(), resources = self.resources.len(), "wrote template");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StackBuilder;
    use crate::resources::*;

    fn small_stack() -> Stack {
        let mut builder = StackBuilder::new("small").description("a bucket and its policy");
        let bucket = builder.add(LogicalId::new("Bucket").unwrap(), Bucket::private(RemovalPolicy::DestroyWithContents)).unwrap();
        let oai = builder.add(LogicalId::new("Oai").unwrap(), OriginAccessIdentity { comment: "c".into() }).unwrap();
        builder.add(LogicalId::new("Policy").unwrap(), BucketPolicy { bucket: bucket.clone(), access_identity: oai }).unwrap();
        builder.output("BucketName", "the bucket", get_ref(&bucket));
        builder.build().unwrap()
    }

    #[test]
    fn renders_resources_with_dependencies() {
        let template = Template::from_stack(&small_stack());
        assert_eq!(template.version, "2010-09-09");
        assert_eq!(template.resources.len(), 3);
        let policy = &template.resources["Policy"];
        assert_eq!(policy.ty, BUCKET_POLICY_TYPE);
        assert_eq!(policy.depends_on, vec!["Bucket", "Oai"]);
        let bucket = &template.resources["Bucket"];
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::Delete));
        assert_eq!(bucket.update_replace_policy, Some(DeletionPolicy::Delete));
        assert_eq!(template.outputs["BucketName"].value, get_ref(&LogicalId::new("Bucket").unwrap()));
    }

    #[test]
    fn json_shape_matches_cloudformation() {
        let json: Value = serde_json::from_str(&Template::from_stack(&small_stack()).to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(json["Resources"]["Bucket"]["DeletionPolicy"], "Delete");
        assert!(json["Resources"]["Oai"].get("DependsOn").is_none());
        assert_eq!(json["Outputs"]["BucketName"]["Value"]["Ref"], "Bucket");
    }

    #[test]
    fn reads_back_what_it_writes() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::from_stack(&small_stack());
        let path = template.write_to(dir.path(), "small").unwrap();
        assert!(path.ends_with("small.template.json"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(Template::from_json(&contents).unwrap(), template);
    }
}

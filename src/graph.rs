//! The explicit dependency graph a stack is made of.
//!
//! Resources are registered into a [`StackBuilder`] one at a time. Every
//! resource must be registered after everything it references, so the
//! registration order is always a valid apply order and the graph can never
//! contain a cycle. Templates loaded from elsewhere go through
//! [`topological_order`] instead.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::resources::{self, CfnResource, LogicalId};

/// How far a stack instance has come. Each stage is reached once every
/// resource that completes it has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Undeclared,
    ZoneResolved,
    CertificatePending,
    CertificateIssued,
    BucketReady,
    AccessBound,
    DistributionDeployed,
    DnsBound,
    Stable,
}

impl Stage {
    /// the stage a stack reaches once a resource of this type exists.
    pub fn completed_by(resource_type: &str) -> Option<Stage> {
        match resource_type {
            resources::CERTIFICATE_TYPE => Some(Stage::CertificateIssued),
            resources::BUCKET_TYPE
            | resources::ROLE_TYPE
            | resources::FUNCTION_TYPE
            | resources::BUCKET_CLEANUP_TYPE => Some(Stage::BucketReady),
            resources::ORIGIN_ACCESS_IDENTITY_TYPE | resources::BUCKET_POLICY_TYPE => Some(Stage::AccessBound),
            resources::DISTRIBUTION_TYPE => Some(Stage::DistributionDeployed),
            resources::RECORD_SET_TYPE => Some(Stage::DnsBound),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Undeclared => "undeclared",
            Stage::ZoneResolved => "zone-resolved",
            Stage::CertificatePending => "certificate-pending",
            Stage::CertificateIssued => "certificate-issued",
            Stage::BucketReady => "bucket-ready",
            Stage::AccessBound => "access-bound",
            Stage::DistributionDeployed => "distribution-deployed",
            Stage::DnsBound => "dns-bound",
            Stage::Stable => "stable",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Node {
    pub id: LogicalId,
    pub resource: Box<dyn CfnResource>,
    pub depends_on: BTreeSet<LogicalId>,
}

impl Node {
    pub fn stage(&self) -> Option<Stage> {
        Stage::completed_by(self.resource.type_string())
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    pub description: String,
    pub value: Value,
}

#[derive(Debug)]
pub struct StackBuilder {
    name: String,
    description: String,
    nodes: Vec<Node>,
    index: BTreeMap<LogicalId, usize>,
    outputs: BTreeMap<String, Output>,
}

impl StackBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            nodes: vec![],
            index: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// registers `resource` under `id`. Everything it references must already
    /// be registered.
    pub fn add<R: CfnResource + 'static>(&mut self, id: LogicalId, resource: R) -> Result<LogicalId> {
        self.add_after(id, resource, &[])
    }

    /// like [`StackBuilder::add`], with ordering edges the properties don't imply.
    pub fn add_after<R: CfnResource + 'static>(&mut self, id: LogicalId, resource: R, after: &[LogicalId]) -> Result<LogicalId> {
        if self.index.contains_key(&id) {
            return Err(Error::graph(format!("Logical id {id} is registered more than once in stack {}", self.name)));
        }
        let mut depends_on = BTreeSet::new();
        for dep in resource.references().into_iter().chain(after.iter().cloned()) {
            if !self.index.contains_key(&dep) {
                if resource.type_string() == resources::RECORD_SET_TYPE {
                    return Err(Error::AliasTargetUnresolved(dep.to_string()));
                }
                return Err(Error::graph(format!("{id} depends on {dep}, which is not registered in stack {}", self.name)));
            }
            depends_on.insert(dep);
        }
        tracing::debug!(stack = %self.name, %id, ty = resource.type_string(), deps = depends_on.len(), "registered resource");
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node { id: id.clone(), resource: Box::new(resource), depends_on });
        Ok(id)
    }

    pub fn output<S: Into<String>, D: Into<String>>(&mut self, name: S, description: D, value: Value) {
        self.outputs.insert(name.into(), Output { description: description.into(), value });
    }

    pub fn build(self) -> Result<Stack> {
        if self.nodes.is_empty() {
            return Err(Error::graph(format!("Stack {} has no resources", self.name)));
        }
        for (name, output) in &self.outputs {
            if let Some(id) = resources::referenced_id(&output.value) {
                if !self.nodes.iter().any(|n| n.id.as_str() == id) {
                    return Err(Error::graph(format!("Output {name} references unknown resource {id}")));
                }
            }
        }
        Ok(Stack {
            name: self.name,
            description: self.description,
            nodes: self.nodes,
            index: self.index,
            outputs: self.outputs,
        })
    }
}

/// A finished, immutable resource graph.
#[derive(Debug)]
pub struct Stack {
    name: String,
    description: String,
    nodes: Vec<Node>,
    index: BTreeMap<LogicalId, usize>,
    outputs: BTreeMap<String, Output>,
}

impl Stack {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// nodes in registration order, which is a valid apply order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    pub fn nodes_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.resource.type_string() == resource_type)
    }

    pub fn dependencies_of(&self, id: &LogicalId) -> Option<&BTreeSet<LogicalId>> {
        self.index.get(id).map(|i| &self.nodes[*i].depends_on)
    }

    pub fn dependents_of(&self, id: &LogicalId) -> Vec<&LogicalId> {
        self.nodes.iter().filter(|n| n.depends_on.contains(id)).map(|n| &n.id).collect()
    }

    pub fn edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.nodes.iter()
            .map(|n| (n.id.to_string(), n.depends_on.iter().map(|d| d.to_string()).collect()))
            .collect()
    }
}

/// Kahn's algorithm over `id -> dependencies`. Ties are broken by name so
/// the result is stable.
pub fn topological_order(edges: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    topological_order_by(edges, |_| ())
}

/// like [`topological_order`], but of everything that is ready, the lowest
/// `rank` goes first. Name still breaks ties within a rank.
pub fn topological_order_by<K, F>(edges: &BTreeMap<String, BTreeSet<String>>, rank: F) -> Result<Vec<String>>
where
    K: Ord,
    F: Fn(&str) -> K,
{
    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in edges {
        remaining.insert(id.as_str(), deps.len());
        for dep in deps {
            if !edges.contains_key(dep) {
                return Err(Error::graph(format!("{id} depends on {dep}, which does not exist")));
            }
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }
    let mut ready: BTreeSet<(K, &str)> = remaining.iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| (rank(*id), *id))
        .collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).map(|d| d.as_slice()).unwrap_or_default() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((rank(*dependent), *dependent));
                }
            }
        }
    }
    if order.len() != edges.len() {
        let stuck: Vec<&str> = remaining.iter().filter(|(_, n)| **n > 0).map(|(id, _)| *id).collect();
        return Err(Error::graph(format!("Dependency cycle between {}", stuck.join(", "))));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    #[test]
    fn references_become_edges() {
        let mut builder = StackBuilder::new("test");
        builder.add(id("Bucket"), Bucket::private(RemovalPolicy::DestroyWithContents)).unwrap();
        builder.add(id("Oai"), OriginAccessIdentity { comment: "x".into() }).unwrap();
        builder.add(id("Policy"), BucketPolicy { bucket: id("Bucket"), access_identity: id("Oai") }).unwrap();
        let stack = builder.build().unwrap();
        let deps = stack.dependencies_of(&id("Policy")).unwrap();
        assert_eq!(deps.iter().map(|d| d.as_str()).collect::<Vec<_>>(), vec!["Bucket", "Oai"]);
        assert_eq!(stack.dependents_of(&id("Bucket")), vec![&id("Policy")]);
        assert_eq!(stack.node("Policy").unwrap().stage(), Some(Stage::AccessBound));
    }

    #[test]
    fn rejects_dangling_references() {
        let mut builder = StackBuilder::new("test");
        let err = builder.add(id("Policy"), BucketPolicy { bucket: id("Bucket"), access_identity: id("Oai") }).unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
    }

    #[test]
    fn dangling_alias_target_is_reported_as_such() {
        let mut builder = StackBuilder::new("test");
        let record = AliasRecord {
            hosted_zone_id: "Z1".into(),
            name: "example.com".into(),
            record_type: RecordType::A,
            distribution: id("Distribution"),
        };
        let err = builder.add(id("ARecord"), record).unwrap_err();
        assert!(matches!(err, Error::AliasTargetUnresolved(ref target) if target == "Distribution"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut builder = StackBuilder::new("test");
        builder.add(id("Bucket"), Bucket::private(RemovalPolicy::Retain)).unwrap();
        assert!(builder.add(id("Bucket"), Bucket::private(RemovalPolicy::Retain)).is_err());
    }

    #[test]
    fn outputs_must_reference_known_resources() {
        let mut builder = StackBuilder::new("test");
        builder.add(id("Bucket"), Bucket::private(RemovalPolicy::Retain)).unwrap();
        builder.output("Missing", "nope", get_ref(&id("Other")));
        assert!(builder.build().is_err());
    }

    #[test]
    fn topological_order_is_stable() {
        let mut edges = BTreeMap::new();
        edges.insert("C".to_string(), BTreeSet::from(["A".to_string(), "B".to_string()]));
        edges.insert("B".to_string(), BTreeSet::from(["A".to_string()]));
        edges.insert("A".to_string(), BTreeSet::new());
        edges.insert("D".to_string(), BTreeSet::new());
        assert_eq!(topological_order(&edges).unwrap(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn lower_rank_goes_first_when_ready() {
        let mut edges = BTreeMap::new();
        edges.insert("Access".to_string(), BTreeSet::new());
        edges.insert("Bucket".to_string(), BTreeSet::new());
        edges.insert("Policy".to_string(), BTreeSet::from(["Access".to_string(), "Bucket".to_string()]));
        let stage = |id: &str| match id {
            "Bucket" => Stage::BucketReady,
            _ => Stage::AccessBound,
        };
        assert_eq!(topological_order_by(&edges, stage).unwrap(), vec!["Bucket", "Access", "Policy"]);
        assert_eq!(topological_order(&edges).unwrap(), vec!["Access", "Bucket", "Policy"]);
    }

    #[test]
    fn topological_order_detects_cycles() {
        let mut edges = BTreeMap::new();
        edges.insert("A".to_string(), BTreeSet::from(["B".to_string()]));
        edges.insert("B".to_string(), BTreeSet::from(["A".to_string()]));
        let err = topological_order(&edges).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::ZoneResolved < Stage::CertificatePending);
        assert!(Stage::DnsBound < Stage::Stable);
        assert_eq!(Stage::completed_by(DISTRIBUTION_TYPE), Some(Stage::DistributionDeployed));
        assert_eq!(Stage::completed_by("AWS::SQS::Queue"), None);
    }
}

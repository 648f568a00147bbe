use std::{collections::{BTreeMap, BTreeSet}, sync::{Mutex, MutexGuard}};

use async_trait::async_trait;
use serde_json::Value;

use super::{Provisioner, StackStatus};
use crate::assets::AssetManifest;
use crate::error::{Error, Result};
use crate::graph::Stage;
use crate::resources::{self, referenced_id};
use crate::template::{Template, TemplateResource};

/// How certificate validation ends for every certificate the backend creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CertificateOutcome {
    #[default]
    Issued,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: String,
}

#[derive(Debug)]
struct DeployedStack {
    template: Template,
    resources: BTreeMap<String, PhysicalResource>,
    status: StackStatus,
    /// object key -> checksum
    objects: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
struct State {
    stacks: BTreeMap<String, DeployedStack>,
    /// (record name, record type) -> the stack that owns it. Route 53 refuses
    /// to create a record that already exists, whoever created it.
    records: BTreeMap<(String, String), String>,
    certificate_outcome: CertificateOutcome,
    denied_types: BTreeSet<String>,
    next_id: u64,
}

/// An in-process stand in for the provisioning engine. Every instance is an
/// independent account: nothing is shared between two backends.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

fn record_key(resource: &TemplateResource) -> (String, String) {
    let name = resource.properties["Name"].as_str().unwrap_or_default().to_string();
    let ty = resource.properties["Type"].as_str().unwrap_or_default().to_string();
    (name, ty)
}

fn attribute(resource: &PhysicalResource, attr: &str) -> String {
    match attr {
        "DomainName" => format!("{}.cloudfront.net", resource.physical_id),
        "Arn" => format!("arn:aws:memory:::{}", resource.physical_id),
        _ => format!("{}.{attr}", resource.physical_id),
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate_outcome(mut self, outcome: CertificateOutcome) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.certificate_outcome = outcome;
        }
        self
    }

    /// every attempt to create a resource of this type is denied.
    pub fn deny_resource_type<S: Into<String>>(mut self, resource_type: S) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.denied_types.insert(resource_type.into());
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| Error::backend("memory backend state is poisoned"))
    }

    /// stores every file of `manifest` in the stack's bucket, the way the
    /// deployment step would. Returns how many objects were written.
    pub fn upload(&self, stack_name: &str, manifest: &AssetManifest) -> Result<usize> {
        let mut state = self.lock()?;
        let deployed = state.stacks.get_mut(stack_name)
            .ok_or_else(|| Error::backend(format!("Stack {stack_name} does not exist")))?;
        if deployed.status != StackStatus::Stable {
            return Err(Error::backend(format!("Stack {stack_name} is not stable, refusing to upload")));
        }
        if !deployed.resources.values().any(|r| r.resource_type == resources::BUCKET_TYPE) {
            return Err(Error::backend(format!("Stack {stack_name} has no bucket to upload into")));
        }
        for entry in &manifest.entries {
            deployed.objects.insert(entry.key.clone(), entry.checksum);
        }
        tracing::debug!(stack = stack_name, objects = manifest.entries.len(), "uploaded assets");
        Ok(manifest.entries.len())
    }

    pub fn objects(&self, stack_name: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state.stacks.get(stack_name).map(|d| d.objects.keys().cloned().collect()).unwrap_or_default())
    }

    pub fn resources(&self, stack_name: &str) -> Result<Vec<PhysicalResource>> {
        let state = self.lock()?;
        Ok(state.stacks.get(stack_name).map(|d| d.resources.values().cloned().collect()).unwrap_or_default())
    }

    pub fn record_owner(&self, name: &str, record_type: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(state.records.get(&(name.to_string(), record_type.to_string())).cloned())
    }

    pub fn stack_names(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.stacks.keys().cloned().collect())
    }
}

impl State {
    fn physical_id(&mut self, stack_name: &str, logical_id: &str) -> String {
        self.next_id += 1;
        format!("{}-{}-{:06}", stack_name, logical_id.to_ascii_lowercase(), self.next_id)
    }

    /// creates (or keeps) every resource in dependency order, moving the
    /// stack's stage forward as it goes.
    fn apply_resources(&mut self, stack_name: &str, deployed: &mut DeployedStack) -> Result<()> {
        let template = deployed.template.clone();
        let order = template.apply_order()?;
        let mut stage = Stage::ZoneResolved;
        deployed.status = StackStatus::InProgress { stage };
        for id in order {
            let resource = &template.resources[&id];
            let own_stage = Stage::completed_by(&resource.ty);
            if let Err(e) = self.create(stack_name, &id, resource, deployed) {
                let failed_at = match e {
                    Error::CertificateValidationFailed { .. } | Error::CertificateValidationTimeout(_) => Stage::CertificatePending,
                    _ => own_stage.unwrap_or(stage),
                };
                tracing::warn!(stack = stack_name, resource = %id, stage = %failed_at, "apply failed: {e}");
                deployed.status = StackStatus::Failed { stage: failed_at, reason: e.to_string() };
                return Err(e);
            }
            if let Some(reached) = own_stage.filter(|reached| *reached > stage) {
                tracing::debug!(stack = stack_name, stage = %reached, "stage reached");
                stage = reached;
            }
            deployed.status = StackStatus::InProgress { stage };
        }
        deployed.status = StackStatus::Stable;
        Ok(())
    }

    fn create(&mut self, stack_name: &str, id: &str, resource: &TemplateResource, deployed: &mut DeployedStack) -> Result<()> {
        if resource.ty == resources::RECORD_SET_TYPE {
            let target = resource.properties.pointer("/AliasTarget/DNSName").and_then(referenced_id);
            let resolved = target
                .and_then(|t| deployed.resources.get(t))
                .map(|r| r.resource_type == resources::DISTRIBUTION_TYPE)
                .unwrap_or(false);
            if !resolved {
                return Err(Error::AliasTargetUnresolved(target.unwrap_or("<none>").to_string()));
            }
            let key = record_key(resource);
            if let Some(owner) = self.records.get(&key).filter(|o| o.as_str() != stack_name) {
                return Err(Error::ResourceConflict {
                    logical_id: id.to_string(),
                    reason: format!("record {} {} is already owned by stack {owner}", key.0, key.1),
                });
            }
            self.records.insert(key, stack_name.to_string());
        }
        // already there from a previous apply: reconciled in place, never duplicated
        if deployed.resources.contains_key(id) {
            return Ok(());
        }
        if self.denied_types.contains(&resource.ty) {
            return Err(Error::PolicyDenied { logical_id: id.to_string(), resource_type: resource.ty.clone() });
        }
        if resource.ty == resources::CERTIFICATE_TYPE {
            deployed.status = StackStatus::InProgress { stage: Stage::CertificatePending };
            let domain = resource.properties["DomainName"].as_str().unwrap_or_default().to_string();
            match &self.certificate_outcome {
                CertificateOutcome::Issued => {}
                CertificateOutcome::Failed(reason) => {
                    return Err(Error::CertificateValidationFailed { domain, reason: reason.clone() });
                }
                CertificateOutcome::TimedOut => return Err(Error::CertificateValidationTimeout(domain)),
            }
        }
        let physical_id = self.physical_id(stack_name, id);
        deployed.resources.insert(id.to_string(), PhysicalResource {
            logical_id: id.to_string(),
            resource_type: resource.ty.clone(),
            physical_id,
        });
        Ok(())
    }
}

impl DeployedStack {
    fn resolve(&self, value: &Value) -> Result<String> {
        if let Some(s) = value.as_str() {
            return Ok(s.to_string());
        }
        let id = referenced_id(value)
            .ok_or_else(|| Error::backend(format!("Cannot evaluate output value {value}")))?;
        let resource = self.resources.get(id)
            .ok_or_else(|| Error::backend(format!("Output references {id}, which was never created")))?;
        if value.get("Ref").is_some() {
            return Ok(resource.physical_id.clone());
        }
        let attr = value.pointer("/Fn::GetAtt/1").and_then(Value::as_str).unwrap_or_default();
        Ok(attribute(resource, attr))
    }

    fn outputs(&self) -> Result<BTreeMap<String, String>> {
        self.template.outputs.iter()
            .map(|(name, output)| Ok((name.clone(), self.resolve(&output.value)?)))
            .collect()
    }
}

#[async_trait]
impl Provisioner for MemoryBackend {
    async fn apply(&self, stack_name: &str, template: &Template) -> Result<BTreeMap<String, String>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut deployed = state.stacks.remove(stack_name).unwrap_or_else(|| DeployedStack {
            template: template.clone(),
            resources: BTreeMap::new(),
            status: StackStatus::InProgress { stage: Stage::Undeclared },
            objects: BTreeMap::new(),
        });
        deployed.template = template.clone();

        // whatever the new template no longer declares goes away
        let declared: BTreeSet<(String, String)> = template.resources_of_type(resources::RECORD_SET_TYPE)
            .map(|(_, r)| record_key(r))
            .collect();
        state.records.retain(|key, owner| owner.as_str() != stack_name || declared.contains(key));
        deployed.resources.retain(|id, _| template.resources.contains_key(id));

        let result = state.apply_resources(stack_name, &mut deployed);
        let outputs = match result {
            Ok(()) => deployed.outputs(),
            Err(e) => Err(e),
        };
        state.stacks.insert(stack_name.to_string(), deployed);
        let outputs = outputs?;
        tracing::info!(stack = stack_name, outputs = outputs.len(), "stack stable");
        Ok(outputs)
    }

    async fn teardown(&self, stack_name: &str) -> Result<()> {
        let mut state = self.lock()?;
        let deployed = state.stacks.get_mut(stack_name)
            .ok_or_else(|| Error::backend(format!("Stack {stack_name} does not exist")))?;
        let has_cleanup = deployed.resources.values().any(|r| r.resource_type == resources::BUCKET_CLEANUP_TYPE);
        if !deployed.objects.is_empty() && !has_cleanup {
            let reason = format!("bucket in {stack_name} still holds {} objects", deployed.objects.len());
            deployed.status = StackStatus::Failed { stage: deployed.status.stage(), reason: reason.clone() };
            return Err(Error::backend(reason));
        }
        let purged = deployed.objects.len();
        state.stacks.remove(stack_name);
        state.records.retain(|_, owner| owner.as_str() != stack_name);
        tracing::info!(stack = stack_name, purged, "stack deleted");
        Ok(())
    }

    async fn status(&self, stack_name: &str) -> Result<Option<StackStatus>> {
        Ok(self.lock()?.stacks.get(stack_name).map(|d| d.status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::resources::HostedZone;
    use crate::site::SiteStack;

    fn site(domain: &str) -> SiteStack {
        SiteStack::build(&SiteConfig::new(domain, false, "./website"), &HostedZone::new(domain, "Z1")).unwrap()
    }

    #[tokio::test]
    async fn apply_reaches_stable_with_outputs() {
        let backend = MemoryBackend::new();
        let site = site("example.com");
        let outputs = backend.apply(site.name(), &site.template).await.unwrap();
        assert_eq!(backend.status(site.name()).await.unwrap(), Some(StackStatus::Stable));
        assert!(outputs["DistributionDomainName"].ends_with(".cloudfront.net"));
        assert!(outputs["BucketName"].starts_with("example-com-site-staticwebsite-"));
        assert_eq!(backend.resources(site.name()).unwrap().len(), 12);
        assert_eq!(backend.record_owner("www.example.com.", "AAAA").unwrap().as_deref(), Some("example-com-site"));
    }

    #[tokio::test]
    async fn reapply_does_not_duplicate() {
        let backend = MemoryBackend::new();
        let site = site("example.com");
        backend.apply(site.name(), &site.template).await.unwrap();
        let before = backend.resources(site.name()).unwrap();
        backend.apply(site.name(), &site.template).await.unwrap();
        assert_eq!(backend.resources(site.name()).unwrap(), before);
    }

    #[tokio::test]
    async fn certificate_failure_stops_before_the_bucket() {
        let backend = MemoryBackend::new().with_certificate_outcome(CertificateOutcome::TimedOut);
        let site = site("example.com");
        let err = backend.apply(site.name(), &site.template).await.unwrap_err();
        assert!(matches!(err, Error::CertificateValidationTimeout(ref d) if d == "*.example.com"));
        match backend.status(site.name()).await.unwrap() {
            Some(StackStatus::Failed { stage, .. }) => assert_eq!(stage, Stage::CertificatePending),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(backend.resources(site.name()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_policy_keeps_earlier_resources() {
        let backend = MemoryBackend::new().deny_resource_type(resources::BUCKET_POLICY_TYPE);
        let site = site("example.com");
        let err = backend.apply(site.name(), &site.template).await.unwrap_err();
        assert!(matches!(err, Error::PolicyDenied { .. }));
        let created: Vec<String> = backend.resources(site.name()).unwrap().into_iter().map(|r| r.resource_type).collect();
        assert!(created.contains(&resources::CERTIFICATE_TYPE.to_string()));
        assert!(created.contains(&resources::BUCKET_TYPE.to_string()));
        assert!(!created.contains(&resources::DISTRIBUTION_TYPE.to_string()));
        assert_eq!(backend.status(site.name()).await.unwrap().unwrap().stage(), Stage::AccessBound);
    }

    #[tokio::test]
    async fn denied_bucket_fails_at_bucket_ready() {
        let backend = MemoryBackend::new().deny_resource_type(resources::BUCKET_TYPE);
        let site = site("example.com");
        let err = backend.apply(site.name(), &site.template).await.unwrap_err();
        assert!(matches!(err, Error::PolicyDenied { ref resource_type, .. } if resource_type == resources::BUCKET_TYPE));
        match backend.status(site.name()).await.unwrap() {
            Some(StackStatus::Failed { stage, .. }) => assert_eq!(stage, Stage::BucketReady),
            other => panic!("unexpected status {other:?}"),
        }
        let created: Vec<String> = backend.resources(site.name()).unwrap().into_iter().map(|r| r.resource_type).collect();
        assert_eq!(created, vec![resources::CERTIFICATE_TYPE.to_string()]);
    }

    #[tokio::test]
    async fn denied_distribution_fails_at_distribution_deployed() {
        let backend = MemoryBackend::new().deny_resource_type(resources::DISTRIBUTION_TYPE);
        let site = site("example.com");
        assert!(backend.apply(site.name(), &site.template).await.is_err());
        assert_eq!(backend.status(site.name()).await.unwrap().unwrap().stage(), Stage::DistributionDeployed);
        assert_eq!(backend.resources(site.name()).unwrap().len(), 7);
    }

    #[tokio::test]
    async fn same_records_in_two_stacks_conflict() {
        let backend = MemoryBackend::new();
        let first = site("example.com");
        backend.apply("first", &first.template).await.unwrap();
        let err = backend.apply("second", &first.template).await.unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));
        match backend.status("second").await.unwrap() {
            Some(StackStatus::Failed { stage, .. }) => assert_eq!(stage, Stage::DnsBound),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn teardown_purges_objects_and_releases_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();
        let manifest = AssetManifest::scan(dir.path()).unwrap();

        let backend = MemoryBackend::new();
        let site = site("example.com");
        backend.apply(site.name(), &site.template).await.unwrap();
        assert_eq!(backend.upload(site.name(), &manifest).unwrap(), 1);
        assert_eq!(backend.objects(site.name()).unwrap(), vec!["index.html"]);
        backend.teardown(site.name()).await.unwrap();
        assert_eq!(backend.status(site.name()).await.unwrap(), None);
        assert!(backend.objects(site.name()).unwrap().is_empty());
        assert_eq!(backend.record_owner("example.com.", "A").unwrap(), None);
    }

    #[tokio::test]
    async fn teardown_without_cleanup_refuses_a_full_bucket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();
        let manifest = AssetManifest::scan(dir.path()).unwrap();

        let mut template = site("example.com").template;
        template.resources.remove(crate::site::CLEANUP_ID);
        let backend = MemoryBackend::new();
        backend.apply("no-cleanup", &template).await.unwrap();
        backend.upload("no-cleanup", &manifest).unwrap();
        assert!(backend.teardown("no-cleanup").await.is_err());
        assert_eq!(backend.objects("no-cleanup").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_stack_cannot_be_torn_down() {
        assert!(MemoryBackend::new().teardown("missing").await.is_err());
    }
}

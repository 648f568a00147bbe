use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{self as cfn, Capability, OnFailure, ResourceStatus};
use tokio::time::{sleep, Duration};

use super::{certificate_error, Provisioner, StackStatus};
use crate::error::{Error, Result};
use crate::graph::Stage;
use crate::resources::CERTIFICATE_TYPE;
use crate::template::Template;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Hands templates to CloudFormation. The stack is created with rollback
/// disabled, so a failed apply leaves what it created for inspection.
#[derive(Debug, Clone)]
pub struct CloudFormationBackend {
    client: aws_sdk_cloudformation::Client,
    poll_interval: Duration,
}

fn sdk_error<E: std::error::Error>(e: E) -> String {
    format!("{}", DisplayErrorContext(e))
}

enum Progress {
    Done(cfn::Stack),
    Waiting,
    Failed(String),
}

fn classify(stack: &cfn::Stack) -> Progress {
    use cfn::StackStatus as S;
    match stack.stack_status() {
        Some(S::CreateComplete | S::UpdateComplete | S::ImportComplete | S::DeleteComplete) => Progress::Done(stack.clone()),
        Some(
            S::CreateInProgress
            | S::DeleteInProgress
            | S::ImportInProgress
            | S::ReviewInProgress
            | S::UpdateCompleteCleanupInProgress
            | S::UpdateInProgress
            | S::RollbackInProgress
            | S::UpdateRollbackInProgress
            | S::UpdateRollbackCompleteCleanupInProgress
            | S::ImportRollbackInProgress,
        ) => Progress::Waiting,
        _ => Progress::Failed(stack.stack_status_reason().unwrap_or("Failed to get stack failure reason").to_string()),
    }
}

impl CloudFormationBackend {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(sdk_config),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn describe_stack(&self, name: &str) -> Result<Option<cfn::Stack>> {
        match self.client.describe_stacks().stack_name(name).send().await {
            Ok(d) => Ok(d.stacks().first().cloned()),
            Err(e) => {
                let e_str = sdk_error(e);
                if e_str.contains("does not exist") {
                    return Ok(None);
                }
                Err(Error::backend(e_str))
            }
        }
    }

    /// the furthest stage every created resource adds up to, and the stage and
    /// reason of the first resource that failed, if any.
    async fn resource_stages(&self, name: &str) -> Result<(Stage, Option<(Stage, String)>)> {
        let resp = self.client.describe_stack_resources().stack_name(name).send().await
            .map_err(|e| Error::backend(sdk_error(e)))?;
        let mut reached = Stage::ZoneResolved;
        let mut failed = None;
        for resource in resp.stack_resources() {
            let ty = resource.resource_type().unwrap_or_default();
            let Some(stage) = Stage::completed_by(ty) else { continue };
            match resource.resource_status() {
                Some(ResourceStatus::CreateComplete | ResourceStatus::UpdateComplete) => reached = reached.max(stage),
                Some(ResourceStatus::CreateFailed | ResourceStatus::UpdateFailed) if failed.is_none() => {
                    let failed_at = if ty == CERTIFICATE_TYPE { Stage::CertificatePending } else { stage };
                    let reason = resource.resource_status_reason().unwrap_or("resource failed without a reason");
                    failed = Some((failed_at, reason.to_string()));
                }
                Some(ResourceStatus::CreateInProgress) if ty == CERTIFICATE_TYPE => {
                    reached = reached.max(Stage::CertificatePending);
                }
                _ => {}
            }
        }
        Ok((reached, failed))
    }

    async fn create_or_update_stack(&self, name: &str, body: &str) -> Result<bool> {
        if self.describe_stack(name).await?.is_some() {
            tracing::info!(stack = name, "updating stack");
            let sent = self.client.update_stack()
                .capabilities(Capability::CapabilityIam)
                .disable_rollback(true)
                .stack_name(name)
                .template_body(body)
                .send()
                .await;
            if let Err(e) = sent {
                let e_str = sdk_error(e);
                if e_str.contains("No updates are to be performed") {
                    tracing::info!(stack = name, "stack is already up to date");
                    return Ok(false);
                }
                return Err(Error::backend(e_str));
            }
        } else {
            tracing::info!(stack = name, "creating stack");
            self.client.create_stack()
                .on_failure(OnFailure::DoNothing)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .send()
                .await
                .map_err(|e| Error::backend(sdk_error(e)))?;
        }
        Ok(true)
    }

    async fn wait_for_output(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let mut last = Stage::Undeclared;
        loop {
            sleep(self.poll_interval).await;
            let stack = self.describe_stack(name).await?
                .ok_or_else(|| Error::backend(format!("Stack {name} not found")))?;
            match classify(&stack) {
                Progress::Done(stack) => {
                    let mut out = BTreeMap::new();
                    for output in stack.outputs() {
                        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
                            out.insert(key.to_string(), val.to_string());
                        }
                    }
                    return Ok(out);
                }
                Progress::Waiting => {
                    let (reached, _) = self.resource_stages(name).await?;
                    if reached != last {
                        tracing::info!(stack = name, stage = %reached, "waiting");
                        last = reached;
                    }
                }
                Progress::Failed(reason) => return Err(Error::backend(reason)),
            }
        }
    }
}

#[async_trait]
impl Provisioner for CloudFormationBackend {
    async fn apply(&self, stack_name: &str, template: &Template) -> Result<BTreeMap<String, String>> {
        let body = template.to_json_pretty()?;
        self.create_or_update_stack(stack_name, &body).await?;
        match self.wait_for_output(stack_name).await {
            Ok(outputs) => Ok(outputs),
            Err(e) => {
                if let Some(StackStatus::Failed { stage: Stage::CertificatePending, reason }) = self.status(stack_name).await? {
                    let domain = template.resources_of_type(CERTIFICATE_TYPE)
                        .find_map(|(_, r)| r.properties["DomainName"].as_str().map(str::to_string))
                        .unwrap_or_default();
                    return Err(certificate_error(domain, reason));
                }
                Err(e)
            }
        }
    }

    async fn teardown(&self, stack_name: &str) -> Result<()> {
        if self.describe_stack(stack_name).await?.is_none() {
            return Err(Error::backend(format!("Stack {stack_name} does not exist")));
        }
        self.client.delete_stack().stack_name(stack_name).send().await
            .map_err(|e| Error::backend(sdk_error(e)))?;
        tracing::info!(stack = stack_name, "deleting stack");
        loop {
            sleep(self.poll_interval).await;
            let Some(stack) = self.describe_stack(stack_name).await? else { return Ok(()) };
            match stack.stack_status() {
                Some(cfn::StackStatus::DeleteComplete) => return Ok(()),
                Some(cfn::StackStatus::DeleteFailed) => {
                    let reason = stack.stack_status_reason().unwrap_or("delete failed");
                    return Err(Error::backend(format!("Failed to delete stack {stack_name}: {reason}")));
                }
                _ => {}
            }
        }
    }

    async fn status(&self, stack_name: &str) -> Result<Option<StackStatus>> {
        let Some(stack) = self.describe_stack(stack_name).await? else { return Ok(None) };
        let (reached, failed) = self.resource_stages(stack_name).await?;
        Ok(Some(match classify(&stack) {
            Progress::Done(_) => StackStatus::Stable,
            Progress::Waiting => StackStatus::InProgress { stage: reached },
            Progress::Failed(reason) => match failed {
                Some((stage, resource_reason)) => StackStatus::Failed { stage, reason: resource_reason },
                None => StackStatus::Failed { stage: reached, reason },
            },
        }))
    }
}

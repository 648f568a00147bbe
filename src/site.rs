//! The site stack: one parameterized constructor, instantiated once per domain.

use crate::checks::{self, CheckReport};
use crate::config::{Config, SiteConfig};
use crate::error::{Error, Result};
use crate::graph::{Stack, StackBuilder};
use crate::resources::*;
use crate::template::Template;
use crate::zone::ZoneResolver;

pub const CERTIFICATE_ID: &str = "Certificate";
pub const BUCKET_ID: &str = "StaticWebsite";
pub const CLEANUP_ROLE_ID: &str = "StaticWebsiteCleanupRole";
pub const CLEANUP_FUNCTION_ID: &str = "StaticWebsiteCleanupFunction";
pub const CLEANUP_ID: &str = "StaticWebsiteCleanup";
pub const ACCESS_IDENTITY_ID: &str = "CloudfrontAccess";
pub const BUCKET_POLICY_ID: &str = "StaticWebsitePolicy";
pub const DISTRIBUTION_ID: &str = "Distribution";

/// A synthesized, checked site stack.
#[derive(Debug)]
pub struct SiteStack {
    pub config: SiteConfig,
    pub zone: HostedZone,
    pub stack: Stack,
    pub template: Template,
    pub report: CheckReport,
}

impl SiteStack {
    /// declares every resource for one site against an already resolved zone,
    /// then synthesizes and checks the template.
    pub fn build(config: &SiteConfig, zone: &HostedZone) -> Result<Self> {
        config.validate()?;
        let stack = declare(config, zone)?;
        let template = Template::from_stack(&stack);
        let report = checks::check_site(config, stack.name(), &template)?;
        Ok(Self { config: config.clone(), zone: zone.clone(), stack, template, report })
    }

    pub fn name(&self) -> &str {
        self.stack.name()
    }
}

/// Zone → Certificate → Bucket → Access Bridge → Distribution → DNS Records
pub fn declare(config: &SiteConfig, zone: &HostedZone) -> Result<Stack> {
    let stack_name = config.stack_name()?;
    for name in config.alias_names() {
        if !zone.contains(&name) {
            return Err(Error::inconsistent(&stack_name, format!(
                "{name} cannot be declared in hosted zone {} ({})", zone.name, zone.id
            )));
        }
    }
    // every certificate name is validated through records in this zone
    for name in config.certificate_alternative_names() {
        let validated = name.strip_prefix("*.").unwrap_or(&name);
        if !zone.contains(validated) {
            return Err(Error::inconsistent(&stack_name, format!(
                "certificate name {name} cannot be validated in hosted zone {} ({})", zone.name, zone.id
            )));
        }
    }
    let mut builder = StackBuilder::new(&stack_name).description(config.comment());

    let certificate = builder.add(
        LogicalId::new(CERTIFICATE_ID)?,
        Certificate::new(config.certificate_domain(), config.certificate_alternative_names(), zone.id.as_str())?,
    )?;

    let bucket = builder.add(LogicalId::new(BUCKET_ID)?, Bucket::private(RemovalPolicy::DestroyWithContents))?;
    let role = builder.add(LogicalId::new(CLEANUP_ROLE_ID)?, CleanupRole { bucket: bucket.clone() })?;
    let function = builder.add(LogicalId::new(CLEANUP_FUNCTION_ID)?, CleanupFunction { role })?;
    builder.add(LogicalId::new(CLEANUP_ID)?, BucketCleanup { function, bucket: bucket.clone() })?;

    let access_identity = builder.add(
        LogicalId::new(ACCESS_IDENTITY_ID)?,
        OriginAccessIdentity { comment: format!("Read access to the {} bucket", config.domain) },
    )?;
    let policy = builder.add(
        LogicalId::new(BUCKET_POLICY_ID)?,
        BucketPolicy { bucket: bucket.clone(), access_identity: access_identity.clone() },
    )?;

    let error_responses = if config.spa_routing {
        ErrorResponse::spa_fallbacks(&config.default_document, config.error_caching_min_ttl)
    } else {
        vec![]
    };
    // the policy has to exist before cloudfront first reads through the identity
    let distribution = builder.add_after(
        LogicalId::new(DISTRIBUTION_ID)?,
        Distribution {
            comment: config.comment(),
            aliases: config.alias_names(),
            default_root_object: config.default_document.clone(),
            certificate: certificate.clone(),
            bucket: bucket.clone(),
            access_identity,
            price_class: config.price_class,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            compress: true,
            error_responses,
        },
        &[policy],
    )?;

    for name in config.alias_names() {
        for record_type in [RecordType::A, RecordType::Aaaa] {
            builder.add(
                LogicalId::sanitized(record_type.id_prefix(), &name)?,
                AliasRecord {
                    hosted_zone_id: zone.id.clone(),
                    name: name.clone(),
                    record_type,
                    distribution: distribution.clone(),
                },
            )?;
        }
    }

    builder.output("BucketName", "Bucket the site content is uploaded to", get_ref(&bucket));
    builder.output("DistributionId", "CloudFront distribution id", get_ref(&distribution));
    builder.output("DistributionDomainName", "CloudFront domain name", get_att(&distribution, "DomainName"));
    builder.output("CertificateArn", "ACM certificate used by the distribution", get_ref(&certificate));
    builder.build()
}

/// Resolves every site's zone and builds its stack. Sites are independent, so
/// one failing stops the run before anything is written.
pub async fn build_all(config: &Config, resolver: &dyn ZoneResolver) -> Result<Vec<SiteStack>> {
    let mut out = Vec::with_capacity(config.sites.len());
    for site in &config.sites {
        let zone = resolver.resolve(&site.domain).await?;
        tracing::info!(domain = %site.domain, zone = %zone.id, "resolved zone");
        let built = SiteStack::build(site, &zone)?;
        tracing::info!(stack = built.name(), resources = built.template.resources.len(), "synthesized stack");
        out.push(built);
    }
    Ok(out)
}

//! Resolving a domain to the hosted zone that already holds its records.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resources::HostedZone;

#[async_trait]
pub trait ZoneResolver: Send + Sync {
    /// the closest enclosing hosted zone for `domain`. Read only.
    async fn resolve(&self, domain: &str) -> Result<HostedZone>;
}

/// Zones that are known ahead of time, eg: pinned in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticZones {
    zones: BTreeMap<String, String>,
}

impl StaticZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone<S: Into<String>, I: Into<String>>(mut self, name: S, id: I) -> Self {
        let zone = HostedZone::new(name, id);
        self.zones.insert(zone.name, zone.id);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        config.sites.iter()
            .filter_map(|site| site.hosted_zone_id.as_ref().map(|id| (site.domain.clone(), id.clone())))
            .fold(Self::new(), |zones, (name, id)| zones.with_zone(name, id))
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[async_trait]
impl ZoneResolver for StaticZones {
    async fn resolve(&self, domain: &str) -> Result<HostedZone> {
        // try the domain itself, then each parent, but never a bare tld
        let domain = domain.trim_end_matches('.');
        let mut candidate = domain;
        loop {
            if let Some(id) = self.zones.get(candidate) {
                return Ok(HostedZone::new(candidate, id.clone()));
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return Err(Error::ZoneNotFound(domain.to_string())),
            }
        }
    }
}

/// Asks each resolver in turn. Only [`Error::ZoneNotFound`] moves on to the
/// next one, any other error is returned as is.
#[derive(Default)]
pub struct FirstOf {
    resolvers: Vec<Box<dyn ZoneResolver>>,
}

impl FirstOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn or<R: ZoneResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

#[async_trait]
impl ZoneResolver for FirstOf {
    async fn resolve(&self, domain: &str) -> Result<HostedZone> {
        for resolver in &self.resolvers {
            match resolver.resolve(domain).await {
                Err(Error::ZoneNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(Error::ZoneNotFound(domain.trim_end_matches('.').to_string()))
    }
}

#[cfg(feature = "aws")]
pub use route53_lookup::Route53Zones;

#[cfg(feature = "aws")]
mod route53_lookup {
    use super::*;

    /// Looks zones up by name in the account the sdk config points at.
    /// Private zones are skipped since public records can't live there.
    pub struct Route53Zones {
        client: aws_sdk_route53::Client,
    }

    impl Route53Zones {
        pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
            Self { client: aws_sdk_route53::Client::new(sdk_config) }
        }
    }

    #[async_trait]
    impl ZoneResolver for Route53Zones {
        async fn resolve(&self, domain: &str) -> Result<HostedZone> {
            let domain = domain.trim_end_matches('.');
            let mut candidate = domain;
            loop {
                let wanted = format!("{candidate}.");
                let resp = self.client.list_hosted_zones_by_name()
                    .dns_name(&wanted)
                    .send()
                    .await
                    .map_err(|e| Error::backend(format!("Failed to list hosted zones for {candidate}\n{}", aws_sdk_route53::error::DisplayErrorContext(&e))))?;
                let found = resp.hosted_zones().iter().find(|z| {
                    let private = z.config().map(|c| c.private_zone()).unwrap_or(false);
                    z.name() == wanted && !private
                });
                if let Some(zone) = found {
                    tracing::debug!(domain, zone = zone.name(), id = zone.id(), "resolved hosted zone");
                    return Ok(HostedZone::new(zone.name(), zone.id()));
                }
                match candidate.split_once('.') {
                    Some((_, parent)) if parent.contains('.') => candidate = parent,
                    _ => return Err(Error::ZoneNotFound(domain.to_string())),
                }
            }
        }
    }
}

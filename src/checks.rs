//! Static consistency checks run against a synthesized template, before it is
//! ever handed to a provisioning backend. Each check catches a class of
//! failure that would otherwise only show up at apply time or, worse, at
//! TLS handshake time.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::{SiteConfig, MAX_ERROR_CACHING_MIN_TTL};
use crate::error::{Error, Result};
use crate::resources::*;
use crate::template::{Template, TemplateResource};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub stack: String,
    pub certificate_names: Vec<String>,
    pub aliases: Vec<String>,
    /// `(name, type)` of every alias record, eg: `("www.example.com.", "AAAA")`
    pub records: Vec<(String, String)>,
    /// things that pass but that an operator should know about.
    pub warnings: Vec<String>,
}

fn strings_at(value: &Value, pointer: &str) -> Vec<String> {
    match value.pointer(pointer) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => vec![],
    }
}

fn exactly_one<'a>(stack: &str, template: &'a Template, ty: &'a str) -> Result<(&'a String, &'a TemplateResource)> {
    let found: Vec<_> = template.resources_of_type(ty).collect();
    match found.as_slice() {
        [one] => Ok(*one),
        _ => Err(Error::inconsistent(stack, format!("expected exactly one {ty}, found {}", found.len()))),
    }
}

/// the access identity named in `origin-access-identity/cloudfront/${Id}`
fn origin_identity(origin: &Value) -> Option<&str> {
    origin.pointer("/S3OriginConfig/OriginAccessIdentity/Fn::Sub")
        .and_then(Value::as_str)
        .and_then(|s| s.strip_prefix("origin-access-identity/cloudfront/${"))
        .and_then(|s| s.strip_suffix('}'))
}

/// Checks every site stack invariant that can be decided from the template alone.
pub fn check_template(stack: &str, template: &Template) -> Result<CheckReport> {
    let fail = |reason: String| Error::inconsistent(stack, reason);
    let mut report = CheckReport { stack: stack.to_string(), ..Default::default() };

    let (cert_id, cert) = exactly_one(stack, template, CERTIFICATE_TYPE)?;
    report.certificate_names = strings_at(&cert.properties, "/DomainName");
    report.certificate_names.extend(strings_at(&cert.properties, "/SubjectAlternativeNames"));
    let covered = |host: &str| report.certificate_names.iter().any(|name| name_covers(name, host));

    let (dist_id, dist) = exactly_one(stack, template, DISTRIBUTION_TYPE)?;
    let dist_config = &dist.properties["DistributionConfig"];
    if dist_config.pointer("/ViewerCertificate/AcmCertificateArn").and_then(referenced_id) != Some(cert_id.as_str()) {
        return Err(fail(format!("distribution {dist_id} does not use certificate {cert_id}")));
    }
    let aliases = strings_at(dist_config, "/Aliases");
    for alias in &aliases {
        if !covered(alias) {
            return Err(fail(format!("distribution alias {alias} is not covered by certificate names {:?}", report.certificate_names)));
        }
    }
    match dist_config.pointer("/DefaultCacheBehavior/ViewerProtocolPolicy").and_then(Value::as_str) {
        Some("redirect-to-https") | Some("https-only") => {}
        other => return Err(fail(format!("distribution {dist_id} allows plaintext viewers ({other:?})"))),
    }

    let mut seen = BTreeSet::new();
    for (id, record) in template.resources_of_type(RECORD_SET_TYPE) {
        let name = record.properties["Name"].as_str().unwrap_or_default().to_string();
        let ty = record.properties["Type"].as_str().unwrap_or_default().to_string();
        let target = record.properties.pointer("/AliasTarget/DNSName").and_then(referenced_id);
        if target != Some(dist_id.as_str()) {
            return Err(fail(format!("record {id} does not alias distribution {dist_id}")));
        }
        let host = name.trim_end_matches('.');
        if !covered(host) {
            return Err(fail(format!("record {name} is not covered by certificate names {:?}", report.certificate_names)));
        }
        if !aliases.iter().any(|a| a == host) {
            return Err(fail(format!("record {name} points at distribution {dist_id}, which does not list it as an alias")));
        }
        if !seen.insert((name.clone(), ty.clone())) {
            return Err(fail(format!("record {name} {ty} is declared more than once")));
        }
    }
    report.records = seen.into_iter().collect();
    report.aliases = aliases;

    let identities: BTreeSet<&str> = template.resources_of_type(ORIGIN_ACCESS_IDENTITY_TYPE).map(|(id, _)| id.as_str()).collect();
    let origins = dist_config["Origins"].as_array().cloned().unwrap_or_default();
    for (bucket_id, bucket) in template.resources_of_type(BUCKET_TYPE) {
        for flag in ["BlockPublicAcls", "BlockPublicPolicy", "IgnorePublicAcls", "RestrictPublicBuckets"] {
            if bucket.properties["PublicAccessBlockConfiguration"][flag] != Value::Bool(true) {
                return Err(fail(format!("bucket {bucket_id} does not set {flag}")));
            }
        }
        if bucket.deletion_policy == Some(DeletionPolicy::Delete) {
            let warning = format!("bucket {bucket_id} and every object in it are deleted when {stack} is deleted");
            tracing::warn!(stack, bucket = %bucket_id, "{warning}");
            report.warnings.push(warning);
        }

        let reader = origins.iter()
            .find(|o| o.get("DomainName").and_then(referenced_id) == Some(bucket_id.as_str()))
            .and_then(origin_identity)
            .map(str::to_string)
            .ok_or_else(|| fail(format!("no distribution origin reads bucket {bucket_id} through an origin access identity")))?;
        let policies: Vec<_> = template.resources_of_type(BUCKET_POLICY_TYPE)
            .filter(|(_, p)| referenced_id(&p.properties["Bucket"]) == Some(bucket_id.as_str()))
            .collect();
        if policies.len() != 1 {
            return Err(fail(format!("bucket {bucket_id} has {} bucket policies, exactly one granting the access identity is required", policies.len())));
        }
        let objects = sub(format!("${{{bucket_id}.Arn}}/*"));
        for (policy_id, policy) in policies {
            let statements = policy.properties.pointer("/PolicyDocument/Statement")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if statements.len() != 1 {
                return Err(fail(format!("policy {policy_id} must hold exactly one statement, found {}", statements.len())));
            }
            let statement = &statements[0];
            let principal = statement.pointer("/Principal/CanonicalUser").and_then(referenced_id);
            let principal = match principal {
                Some(p) if identities.contains(p) => p,
                _ => return Err(fail(format!("policy {policy_id} grants access to something other than an origin access identity"))),
            };
            if reader != principal {
                return Err(fail(format!("policy {policy_id} grants {principal}, which is not the identity the distribution reads {bucket_id} with")));
            }
            if statement["Effect"] != "Allow" || strings_at(statement, "/Action") != vec!["s3:GetObject".to_string()] {
                return Err(fail(format!("policy {policy_id} must only allow s3:GetObject")));
            }
            if statement["Resource"] != objects {
                return Err(fail(format!("policy {policy_id} must be scoped to the objects of {bucket_id}, found {}", statement["Resource"])));
            }
        }
    }
    Ok(report)
}

/// [`check_template`] plus what the site's config says the template should contain.
pub fn check_site(config: &SiteConfig, stack: &str, template: &Template) -> Result<CheckReport> {
    let report = check_template(stack, template)?;
    let fail = |reason: String| Error::inconsistent(stack, reason);

    let mut expected: Vec<(String, String)> = config.alias_names().into_iter()
        .flat_map(|name| [RecordType::A, RecordType::Aaaa].map(|t| (format!("{name}."), t.as_str().to_string())))
        .collect();
    expected.sort();
    if report.records != expected {
        return Err(fail(format!("expected records {expected:?}, found {:?}", report.records)));
    }
    if report.aliases != config.alias_names() {
        return Err(fail(format!("expected distribution aliases {:?}, found {:?}", config.alias_names(), report.aliases)));
    }

    let (_, dist) = exactly_one(stack, template, DISTRIBUTION_TYPE)?;
    let dist_config = &dist.properties["DistributionConfig"];
    if dist_config["DefaultRootObject"] != config.default_document.as_str() {
        return Err(fail(format!("distribution does not serve {} for /", config.default_document)));
    }
    let responses = dist_config.get("CustomErrorResponses").and_then(Value::as_array).cloned().unwrap_or_default();
    if config.spa_routing {
        let page = format!("/{}", config.default_document);
        for code in [403u64, 404] {
            let remapped = responses.iter().any(|r| {
                r["ErrorCode"].as_u64() == Some(code)
                    && r["ResponseCode"].as_u64() == Some(200)
                    && r["ResponsePagePath"] == page.as_str()
                    && r["ErrorCachingMinTTL"].as_u64().map(|ttl| ttl <= MAX_ERROR_CACHING_MIN_TTL).unwrap_or(false)
            });
            if !remapped {
                return Err(fail(format!("spa routing is on but {code} is not remapped to {page}")));
            }
        }
    } else if !responses.is_empty() {
        return Err(fail("spa routing is off but the distribution remaps error responses".to_string()));
    }
    Ok(report)
}

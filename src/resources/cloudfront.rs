use super::*;

use crate::config::PriceClass;

pub const ORIGIN_ACCESS_IDENTITY_TYPE: &str = "AWS::CloudFront::CloudFrontOriginAccessIdentity";
pub const DISTRIBUTION_TYPE: &str = "AWS::CloudFront::Distribution";

/// caching optimized:
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-caching-optimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// the hosted zone every cloudfront distribution lives in. Alias records
/// pointing at a distribution must use this as their target zone.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

#[derive(Debug, Clone)]
pub struct OriginAccessIdentity {
    pub comment: String,
}

impl CfnResource for OriginAccessIdentity {
    fn type_string(&self) -> &'static str {
        ORIGIN_ACCESS_IDENTITY_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "CloudFrontOriginAccessIdentityConfig": { "Comment": self.comment }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerProtocolPolicy {
    RedirectToHttps,
    HttpsOnly,
    AllowAll,
}

impl ViewerProtocolPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewerProtocolPolicy::RedirectToHttps => "redirect-to-https",
            ViewerProtocolPolicy::HttpsOnly => "https-only",
            ViewerProtocolPolicy::AllowAll => "allow-all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error_code: u16,
    pub response_code: u16,
    pub response_page_path: String,
    pub error_caching_min_ttl: u64,
}

impl ErrorResponse {
    /// 403 and 404 both serve the default document with a 200 so client side
    /// routing can handle any path. S3 answers 403 for missing keys when the
    /// reader has no list permission, which is the case behind an access identity.
    pub fn spa_fallbacks(default_document: &str, error_caching_min_ttl: u64) -> Vec<Self> {
        [403, 404].into_iter()
            .map(|error_code| ErrorResponse {
                error_code,
                response_code: 200,
                response_page_path: format!("/{default_document}"),
                error_caching_min_ttl,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Distribution {
    pub comment: String,
    pub aliases: Vec<String>,
    pub default_root_object: String,
    pub certificate: LogicalId,
    pub bucket: LogicalId,
    pub access_identity: LogicalId,
    pub price_class: PriceClass,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub compress: bool,
    /// empty means origin error codes pass through unchanged.
    pub error_responses: Vec<ErrorResponse>,
}

impl Distribution {
    const ORIGIN_ID: &'static str = "origin0";
}

impl CfnResource for Distribution {
    fn type_string(&self) -> &'static str {
        DISTRIBUTION_TYPE
    }

    fn properties(&self) -> Value {
        let mut config = json!({
            "Enabled": true,
            "Comment": self.comment,
            "Aliases": self.aliases,
            "DefaultRootObject": self.default_root_object,
            "HttpVersion": "http2",
            "IPV6Enabled": true,
            "PriceClass": self.price_class.as_str(),
            "ViewerCertificate": {
                "AcmCertificateArn": get_ref(&self.certificate),
                "MinimumProtocolVersion": "TLSv1.2_2021",
                "SslSupportMethod": "sni-only",
            },
            "Origins": [{
                "Id": Self::ORIGIN_ID,
                "DomainName": get_att(&self.bucket, "RegionalDomainName"),
                "S3OriginConfig": {
                    "OriginAccessIdentity": sub(format!("origin-access-identity/cloudfront/${{{}}}", self.access_identity)),
                },
            }],
            "DefaultCacheBehavior": {
                "TargetOriginId": Self::ORIGIN_ID,
                "ViewerProtocolPolicy": self.viewer_protocol_policy.as_str(),
                "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
                "Compress": self.compress,
                "AllowedMethods": ["GET", "HEAD"],
            },
        });
        if !self.error_responses.is_empty() {
            let responses: Vec<Value> = self.error_responses.iter()
                .map(|r| json!({
                    "ErrorCode": r.error_code,
                    "ResponseCode": r.response_code,
                    "ResponsePagePath": r.response_page_path,
                    "ErrorCachingMinTTL": r.error_caching_min_ttl,
                }))
                .collect();
            config["CustomErrorResponses"] = Value::Array(responses);
        }
        json!({ "DistributionConfig": config })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.certificate.clone(), self.bucket.clone(), self.access_identity.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(error_responses: Vec<ErrorResponse>) -> Distribution {
        Distribution {
            comment: "test".into(),
            aliases: vec!["example.com".into(), "www.example.com".into()],
            default_root_object: "index.html".into(),
            certificate: LogicalId::new("Certificate").unwrap(),
            bucket: LogicalId::new("StaticWebsite").unwrap(),
            access_identity: LogicalId::new("CloudfrontAccess").unwrap(),
            price_class: PriceClass::PriceClass100,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            compress: true,
            error_responses,
        }
    }

    #[test]
    fn fronts_bucket_through_identity() {
        let props = distribution(vec![]).properties();
        let config = &props["DistributionConfig"];
        assert_eq!(config["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(config["DefaultCacheBehavior"]["Compress"], true);
        assert_eq!(config["PriceClass"], "PriceClass_100");
        assert_eq!(config["DefaultRootObject"], "index.html");
        assert_eq!(
            config["Origins"][0]["S3OriginConfig"]["OriginAccessIdentity"],
            sub("origin-access-identity/cloudfront/${CloudfrontAccess}")
        );
        assert!(config.get("CustomErrorResponses").is_none());
    }

    #[test]
    fn spa_fallbacks_map_to_default_document() {
        let responses = ErrorResponse::spa_fallbacks("index.html", 300);
        let props = distribution(responses).properties();
        let errors = props["DistributionConfig"]["CustomErrorResponses"].as_array().unwrap();
        let codes: Vec<u64> = errors.iter().map(|e| e["ErrorCode"].as_u64().unwrap()).collect();
        assert_eq!(codes, vec![403, 404]);
        for e in errors {
            assert_eq!(e["ResponseCode"], 200);
            assert_eq!(e["ResponsePagePath"], "/index.html");
            assert_eq!(e["ErrorCachingMinTTL"], 300);
        }
    }
}

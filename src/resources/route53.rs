use super::*;

pub const RECORD_SET_TYPE: &str = "AWS::Route53::RecordSet";

/// A handle to a hosted zone that already exists. Never created or deleted
/// by a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZone {
    /// without the trailing dot, eg: `example.com`
    pub name: String,
    /// the bare id, without the `/hostedzone/` prefix
    pub id: String,
}

impl HostedZone {
    pub fn new<S: Into<String>, I: Into<String>>(name: S, id: I) -> Self {
        let name = name.into().trim_end_matches('.').to_string();
        let id = id.into();
        let id = id.strip_prefix("/hostedzone/").unwrap_or(&id).to_string();
        Self { name, id }
    }

    /// whether records for `domain` can live in this zone.
    pub fn contains(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.');
        domain == self.name || domain.ends_with(&format!(".{}", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            RecordType::A => "ARecord",
            RecordType::Aaaa => "AaaaRecord",
        }
    }
}

/// An alias record pointing a name at a cloudfront distribution.
#[derive(Debug, Clone)]
pub struct AliasRecord {
    pub hosted_zone_id: String,
    pub name: String,
    pub record_type: RecordType,
    pub distribution: LogicalId,
}

impl AliasRecord {
    /// route53 names are fully qualified and end in a dot.
    pub fn fqdn(&self) -> String {
        let mut name = self.name.clone();
        if !name.ends_with('.') {
            name.push('.');
        }
        name
    }
}

impl CfnResource for AliasRecord {
    fn type_string(&self) -> &'static str {
        RECORD_SET_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "HostedZoneId": self.hosted_zone_id,
            "Name": self.fqdn(),
            "Type": self.record_type.as_str(),
            "AliasTarget": {
                "DNSName": get_att(&self.distribution, "DomainName"),
                "HostedZoneId": super::CLOUDFRONT_HOSTED_ZONE_ID,
                "EvaluateTargetHealth": false,
            },
        })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.distribution.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_handle_normalizes_name_and_id() {
        let zone = HostedZone::new("example.com.", "/hostedzone/Z123");
        assert_eq!(zone.name, "example.com");
        assert_eq!(zone.id, "Z123");
        assert!(zone.contains("www.example.com"));
        assert!(zone.contains("example.com."));
        assert!(!zone.contains("badexample.com"));
    }

    #[test]
    fn record_targets_distribution_domain() {
        let record = AliasRecord {
            hosted_zone_id: "Z123".into(),
            name: "www.example.com".into(),
            record_type: RecordType::Aaaa,
            distribution: LogicalId::new("Distribution").unwrap(),
        };
        let props = record.properties();
        assert_eq!(props["Name"], "www.example.com.");
        assert_eq!(props["Type"], "AAAA");
        assert_eq!(props["AliasTarget"]["HostedZoneId"], CLOUDFRONT_HOSTED_ZONE_ID);
        assert_eq!(props["AliasTarget"]["DNSName"], json!({ "Fn::GetAtt": ["Distribution", "DomainName"] }));
    }
}

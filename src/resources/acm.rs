use super::*;

pub const CERTIFICATE_TYPE: &str = "AWS::CertificateManager::Certificate";

/// An ACM certificate validated through DNS records in a Route 53 hosted zone.
/// This only works if:
/// - The domain you'd like to get a certificate for is hosted in Route 53
/// - The hosted zone resides in the same account as the stack.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Must be fully qualified. Can have 1 optional wildcard as the first label.
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    /// where cloudformation inserts the validation records.
    pub hosted_zone_id: String,
}

impl Certificate {
    pub fn new<S: Into<String>, Z: Into<String>>(domain_name: S, subject_alternative_names: Vec<String>, hosted_zone_id: Z) -> Result<Self> {
        let domain_name = domain_name.into();
        for name in std::iter::once(&domain_name).chain(subject_alternative_names.iter()) {
            crate::config::validate_domain(name, true)?;
        }
        Ok(Self { domain_name, subject_alternative_names, hosted_zone_id: hosted_zone_id.into() })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.domain_name.as_str()).chain(self.subject_alternative_names.iter().map(String::as_str))
    }

    /// whether a TLS handshake for `host` would be accepted by this certificate.
    pub fn covers(&self, host: &str) -> bool {
        self.names().any(|name| name_covers(name, host))
    }
}

/// `*.example.com` covers exactly one extra label: `www.example.com` but not
/// `example.com` or `a.b.example.com`.
pub fn name_covers(name: &str, host: &str) -> bool {
    let host = host.trim_end_matches('.');
    match name.strip_prefix("*.") {
        Some(parent) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == parent,
            None => false,
        },
        None => name == host,
    }
}

impl CfnResource for Certificate {
    fn type_string(&self) -> &'static str {
        CERTIFICATE_TYPE
    }

    fn properties(&self) -> Value {
        let validation_options: Vec<Value> = self.names()
            .map(|name| json!({ "DomainName": name, "HostedZoneId": self.hosted_zone_id }))
            .collect();
        let mut props = json!({
            "DomainName": self.domain_name,
            "ValidationMethod": "DNS",
            "DomainValidationOptions": validation_options,
        });
        if !self.subject_alternative_names.is_empty() {
            props["SubjectAlternativeNames"] = json!(self.subject_alternative_names);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_covers_one_label() {
        assert!(name_covers("*.example.com", "www.example.com"));
        assert!(name_covers("*.example.com", "www.example.com."));
        assert!(!name_covers("*.example.com", "example.com"));
        assert!(!name_covers("*.example.com", "a.b.example.com"));
        assert!(name_covers("example.com", "example.com"));
        assert!(!name_covers("example.com", "www.example.com"));
    }

    #[test]
    fn apex_and_www_are_covered() {
        let cert = Certificate::new("*.example.com", vec!["example.com".into()], "Z1").unwrap();
        assert!(cert.covers("example.com"));
        assert!(cert.covers("www.example.com"));
        assert!(!cert.covers("example.org"));
    }

    #[test]
    fn one_validation_option_per_name() {
        let cert = Certificate::new("*.example.com", vec!["example.com".into()], "Z1").unwrap();
        let props = cert.properties();
        assert_eq!(props["ValidationMethod"], "DNS");
        assert_eq!(props["SubjectAlternativeNames"], json!(["example.com"]));
        let options = props["DomainValidationOptions"].as_array().unwrap();
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|o| o["HostedZoneId"] == "Z1"));
    }

    #[test]
    fn rejects_misplaced_wildcards() {
        assert!(Certificate::new("www.*.example.com", vec![], "Z1").is_err());
    }
}

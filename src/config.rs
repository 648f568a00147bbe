use std::{collections::BTreeSet, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_DOCUMENT: &str = "index.html";
pub const DEFAULT_ERROR_CACHING_MIN_TTL: u64 = 300;
/// cloudfront rejects error caching ttls above one year
pub const MAX_ERROR_CACHING_MIN_TTL: u64 = 31_536_000;
/// cloudfront only accepts ACM certificates issued in us-east-1, and the
/// certificate lives in the same stack as the distribution.
pub const CERTIFICATE_REGION: &str = "us-east-1";
pub const DEFAULT_OUT_DIR: &str = "cdk.out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriceClass {
    /// the cheapest: north america, europe, israel
    #[default]
    #[serde(rename = "PriceClass_100")]
    PriceClass100,
    #[serde(rename = "PriceClass_200")]
    PriceClass200,
    #[serde(rename = "PriceClass_All")]
    PriceClassAll,
}

impl PriceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceClass::PriceClass100 => "PriceClass_100",
            PriceClass::PriceClass200 => "PriceClass_200",
            PriceClass::PriceClassAll => "PriceClass_All",
        }
    }
}

/// Everything that differs between two site stacks.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// the apex domain, eg: `example.com`. The certificate is requested for
    /// `*.example.com` with `example.com` as an alternative name, and records
    /// are created for `example.com` and `www.example.com`.
    pub domain: String,

    /// extra certificate alternative names on top of the apex.
    #[serde(default)]
    pub alternative_names: Vec<String>,

    /// the object served for requests to `/`. Must be a bare file name.
    #[serde(default = "default_document")]
    pub default_document: String,

    #[serde(default)]
    pub price_class: PriceClass,

    /// remap 403 and 404 origin responses to the default document with a 200.
    /// There is intentionally no default: every site must say which it wants.
    pub spa_routing: bool,

    /// local directory that gets uploaded verbatim into the content bucket.
    pub asset_path: PathBuf,

    /// pins zone resolution to a known hosted zone id instead of looking it up.
    #[serde(default)]
    pub hosted_zone_id: Option<String>,

    /// only used when spa_routing is on.
    #[serde(default = "default_error_caching_min_ttl")]
    pub error_caching_min_ttl: u64,

    #[serde(default)]
    pub comment: Option<String>,

    /// if left empty, the stack name is derived from the domain.
    #[serde(default)]
    pub stack_name: Option<String>,
}

fn default_document() -> String {
    DEFAULT_DOCUMENT.to_string()
}

fn default_error_caching_min_ttl() -> u64 {
    DEFAULT_ERROR_CACHING_MIN_TTL
}

fn default_region() -> String {
    CERTIFICATE_REGION.to_string()
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUT_DIR)
}

impl SiteConfig {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(domain: S, spa_routing: bool, asset_path: P) -> Self {
        Self {
            domain: domain.into(),
            alternative_names: vec![],
            default_document: default_document(),
            price_class: PriceClass::default(),
            spa_routing,
            asset_path: asset_path.into(),
            hosted_zone_id: None,
            error_caching_min_ttl: DEFAULT_ERROR_CACHING_MIN_TTL,
            comment: None,
            stack_name: None,
        }
    }

    pub fn www_domain(&self) -> String {
        format!("www.{}", self.domain)
    }

    /// the names the distribution answers to, and that get alias records.
    pub fn alias_names(&self) -> Vec<String> {
        vec![self.domain.clone(), self.www_domain()]
    }

    pub fn certificate_domain(&self) -> String {
        format!("*.{}", self.domain)
    }

    /// apex first, then any configured extras, without duplicates.
    pub fn certificate_alternative_names(&self) -> Vec<String> {
        let primary = self.certificate_domain();
        let mut seen = BTreeSet::new();
        let mut out = vec![];
        for name in std::iter::once(&self.domain).chain(self.alternative_names.iter()) {
            if *name == primary {
                continue;
            }
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
        out
    }

    pub fn comment(&self) -> String {
        match &self.comment {
            Some(c) => c.clone(),
            None => format!("Static website for {}", self.domain),
        }
    }

    pub fn stack_name(&self) -> Result<String> {
        let stack_name = match &self.stack_name {
            Some(s) if !s.is_empty() => s.clone(),
            _ => {
                let mut stack_name = format!("{}-site", self.domain.replace('.', "-"));
                stack_name.truncate(128);
                stack_name
            }
        };
        validate_stack_name(&stack_name)?;
        Ok(stack_name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_domain(&self.domain, false)?;
        for name in &self.alternative_names {
            validate_domain(name, true)?;
        }
        let doc = &self.default_document;
        if doc.is_empty() || doc.contains('/') || doc.contains('\\') || doc == "." || doc == ".." {
            return Err(Error::config(format!(
                "default_document for {} must be a bare file name, found '{doc}'", self.domain
            )));
        }
        if self.error_caching_min_ttl > MAX_ERROR_CACHING_MIN_TTL {
            return Err(Error::config(format!(
                "error_caching_min_ttl for {} must be at most {MAX_ERROR_CACHING_MIN_TTL} seconds", self.domain
            )));
        }
        if let Some(id) = &self.hosted_zone_id {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::config(format!(
                    "hosted_zone_id for {} must be the bare id without the /hostedzone/ prefix, found '{id}'", self.domain
                )));
            }
        }
        if self.asset_path.as_os_str().is_empty() {
            return Err(Error::config(format!("asset_path for {} must not be empty", self.domain)));
        }
        self.stack_name()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_region")]
    pub region: String,

    /// where synthesized templates are written.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    #[serde(rename = "site", default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    pub fn new(sites: Vec<SiteConfig>) -> Self {
        Self { region: default_region(), out_dir: default_out_dir(), sites }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), sites = config.sites.len(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region != CERTIFICATE_REGION {
            return Err(Error::config(format!(
                "region must be {CERTIFICATE_REGION}: cloudfront only accepts certificates issued there, found '{}'",
                self.region
            )));
        }
        if self.sites.is_empty() {
            return Err(Error::config("at least one [[site]] must be declared"));
        }
        let mut domains = BTreeSet::new();
        let mut stack_names = BTreeSet::new();
        for site in &self.sites {
            site.validate()?;
            if !domains.insert(site.domain.clone()) {
                return Err(Error::config(format!("domain {} is declared more than once", site.domain)));
            }
            let stack_name = site.stack_name()?;
            if !stack_names.insert(stack_name.clone()) {
                return Err(Error::config(format!("stack name {stack_name} is used by more than one site")));
            }
        }
        Ok(())
    }
}

/// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
/// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> Result<()> {
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let starts_alpha = stack_name.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    let valid_chars = stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !starts_alpha || !valid_chars || stack_name.len() > 128 {
        return Err(Error::config(format!("Invalid stack name {stack_name}\n{restriction}")));
    }
    Ok(())
}

/// Checks that `name` is a fully qualified, lowercase domain without a trailing dot.
/// A wildcard is only accepted as the first label, eg: `*.example.com`.
pub fn validate_domain(name: &str, allow_wildcard: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_domain(name, "must not be empty"));
    }
    if name.len() > 253 {
        return Err(Error::invalid_domain(name, "must be at most 253 characters"));
    }
    if name.ends_with('.') {
        return Err(Error::invalid_domain(name, "must not end with a dot"));
    }
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(Error::invalid_domain(name, "must have at least two labels"));
    }
    for (i, label) in labels.iter().enumerate() {
        if *label == "*" {
            if !allow_wildcard {
                return Err(Error::invalid_domain(name, "wildcards are not allowed here"));
            }
            if i != 0 {
                return Err(Error::invalid_domain(name, "a wildcard must be the first label, eg: \"*.something.com\""));
            }
            continue;
        }
        if label.is_empty() || label.len() > 63 {
            return Err(Error::invalid_domain(name, "every label must be 1 to 63 characters"));
        }
        if !label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(Error::invalid_domain(name, "labels may only contain lowercase letters, digits and hyphens"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::invalid_domain(name, "labels must not start or end with a hyphen"));
        }
    }
    if allow_wildcard && labels.len() == 2 && labels[0] == "*" {
        return Err(Error::invalid_domain(name, "a wildcard cannot cover a top level domain"));
    }
    Ok(())
}

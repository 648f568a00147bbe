//! CloudFormation resource declarations. Each type here knows its
//! CloudFormation type string, how to render its properties, and which other
//! logical resources it refers to.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

mod acm;
pub use acm::*;
mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod route53;
pub use route53::*;

/// The name of a resource inside a template. CloudFormation only
/// accepts alphanumeric logical ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > 255 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::graph(format!("Invalid logical id '{id}'. Must be 1 to 255 alphanumeric characters")));
        }
        Ok(Self(id))
    }

    /// `prefix` followed by `name` with everything that isn't alphanumeric
    /// removed, eg: `ARecord` + `www.example.com` => `ARecordwwwexamplecom`.
    pub fn sanitized(prefix: &str, name: &str) -> Result<Self> {
        let cleaned: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        Self::new(format!("{prefix}{cleaned}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

/// A resource that can be written into a CloudFormation template.
pub trait CfnResource: fmt::Debug + Send + Sync {
    fn type_string(&self) -> &'static str;

    fn properties(&self) -> Value;

    /// every logical id this resource points at through `Ref`/`Fn::GetAtt`/`Fn::Sub`.
    fn references(&self) -> Vec<LogicalId> {
        vec![]
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        None
    }
}

pub fn get_ref(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

pub fn get_att(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}

pub fn sub<S: AsRef<str>>(template: S) -> Value {
    json!({ "Fn::Sub": template.as_ref() })
}

/// the logical id a `Ref` or `Fn::GetAtt` value points at, if it is one.
pub fn referenced_id(value: &Value) -> Option<&str> {
    if let Some(id) = value.get("Ref").and_then(Value::as_str) {
        return Some(id);
    }
    value.get("Fn::GetAtt")
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(Value::as_str)
}

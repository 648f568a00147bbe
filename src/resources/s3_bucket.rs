use super::*;

pub const BUCKET_TYPE: &str = "AWS::S3::Bucket";
pub const BUCKET_POLICY_TYPE: &str = "AWS::S3::BucketPolicy";
pub const ROLE_TYPE: &str = "AWS::IAM::Role";
pub const FUNCTION_TYPE: &str = "AWS::Lambda::Function";
pub const BUCKET_CLEANUP_TYPE: &str = "Custom::BucketCleanup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    pub fn block_all() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }

    pub fn is_fully_blocked(&self) -> bool {
        self.block_public_acls && self.block_public_policy && self.ignore_public_acls && self.restrict_public_buckets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// the bucket and every object in it are deleted with the stack.
    DestroyWithContents,
    Retain,
}

/// A private, S3-managed-encryption bucket. The cloudformation name is left
/// for cloudformation to generate from the logical id.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub public_access_block: PublicAccessBlock,
    pub removal: RemovalPolicy,
}

impl Bucket {
    pub fn private(removal: RemovalPolicy) -> Self {
        Self { public_access_block: PublicAccessBlock::block_all(), removal }
    }
}

impl CfnResource for Bucket {
    fn type_string(&self) -> &'static str {
        BUCKET_TYPE
    }

    fn properties(&self) -> Value {
        let block = &self.public_access_block;
        json!({
            "AccessControl": "Private",
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [
                    { "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" } }
                ]
            },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": block.block_public_acls,
                "BlockPublicPolicy": block.block_public_policy,
                "IgnorePublicAcls": block.ignore_public_acls,
                "RestrictPublicBuckets": block.restrict_public_buckets,
            },
        })
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        match self.removal {
            RemovalPolicy::DestroyWithContents => Some(DeletionPolicy::Delete),
            RemovalPolicy::Retain => Some(DeletionPolicy::Retain),
        }
    }
}

/// Grants a cloudfront origin access identity read access to every object in
/// a bucket, and nothing else.
#[derive(Debug, Clone)]
pub struct BucketPolicy {
    pub bucket: LogicalId,
    pub access_identity: LogicalId,
}

impl CfnResource for BucketPolicy {
    fn type_string(&self) -> &'static str {
        BUCKET_POLICY_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "Bucket": get_ref(&self.bucket),
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": "s3:GetObject",
                    "Principal": { "CanonicalUser": get_att(&self.access_identity, "S3CanonicalUserId") },
                    "Resource": sub(format!("${{{}.Arn}}/*", self.bucket)),
                }],
            },
        })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.bucket.clone(), self.access_identity.clone()]
    }
}

/// The role the cleanup function runs as. Its bucket permissions are attached
/// to the role, so the bucket policy never has to mention it.
#[derive(Debug, Clone)]
pub struct CleanupRole {
    pub bucket: LogicalId,
}

impl CfnResource for CleanupRole {
    fn type_string(&self) -> &'static str {
        ROLE_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "ManagedPolicyArns": [
                sub("arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole")
            ],
            "Policies": [{
                "PolicyName": "bucket-cleanup",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "s3:DeleteObject",
                            "s3:DeleteObjectVersion",
                            "s3:ListBucket",
                            "s3:ListBucketVersions",
                        ],
                        "Resource": [
                            get_att(&self.bucket, "Arn"),
                            sub(format!("${{{}.Arn}}/*", self.bucket)),
                        ],
                    }],
                },
            }],
        })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.bucket.clone()]
    }
}

const CLEANUP_HANDLER: &str = r#"import boto3
import cfnresponse

def handler(event, context):
    status = cfnresponse.SUCCESS
    try:
        if event['RequestType'] == 'Delete':
            bucket = boto3.resource('s3').Bucket(event['ResourceProperties']['BucketName'])
            bucket.object_versions.delete()
            bucket.objects.all().delete()
    except Exception as e:
        print('Error emptying bucket: %s' % e)
        status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {})
"#;

/// s3 buckets in cloudformation cannot be deleted if they contain objects.
/// this function empties the bucket when the stack gets deleted.
#[derive(Debug, Clone)]
pub struct CleanupFunction {
    pub role: LogicalId,
}

impl CfnResource for CleanupFunction {
    fn type_string(&self) -> &'static str {
        FUNCTION_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "Runtime": "python3.12",
            "Handler": "index.handler",
            "Timeout": 900,
            "Role": get_att(&self.role, "Arn"),
            "Code": { "ZipFile": CLEANUP_HANDLER },
        })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.role.clone()]
    }
}

#[derive(Debug, Clone)]
pub struct BucketCleanup {
    pub function: LogicalId,
    pub bucket: LogicalId,
}

impl CfnResource for BucketCleanup {
    fn type_string(&self) -> &'static str {
        BUCKET_CLEANUP_TYPE
    }

    fn properties(&self) -> Value {
        json!({
            "ServiceToken": get_att(&self.function, "Arn"),
            "BucketName": get_ref(&self.bucket),
        })
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.function.clone(), self.bucket.clone()]
    }
}

//! AWS SDK client initialisation for KMS and S3.
//!
//! Both clients share one [`aws_config::SdkConfig`] resolved through the
//! standard credential chain. An endpoint override redirects S3 to a
//! compatible service (MinIO, LocalStack).

pub mod clients;

pub use clients::AwsClients;

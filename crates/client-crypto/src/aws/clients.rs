//! AWS SDK client bundle.

use anyhow::Result;
use aws_config::{BehaviorVersion, Region};

/// KMS and S3 clients built from one shared SDK configuration.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// KMS client backing [`crate::master::AwsKmsClient`].
    pub kms: aws_sdk_kms::Client,
    /// S3 client backing [`crate::transport::S3Transport`].
    pub s3: aws_sdk_s3::Client,
}

impl AwsClients {
    /// Initialise both clients.
    ///
    /// `region` overrides the region from the environment. `s3_endpoint_url`
    /// points S3 at a compatible service and switches to path-style
    /// addressing, which such services generally require.
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK config cannot be loaded.
    pub async fn init(region: Option<&str>, s3_endpoint_url: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_owned()));
        }
        let config = loader.load().await;

        let kms = aws_sdk_kms::Client::new(&config);

        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
        if let Some(endpoint) = s3_endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let s3 = aws_sdk_s3::Client::from_conf(s3_config.build());

        Ok(Self { kms, s3 })
    }
}

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    Client,
};
use tracing::{debug, info, instrument};
use voicelog_common::types::RawObjectRef;

use super::{config::S3SourceConfig, ObjectSource};
use crate::error::FetchError;

/// Export documents stored in an S3 (or S3-compatible) bucket
#[derive(Clone)]
pub struct S3ObjectSource {
    client: Client,
    bucket: String,
}

impl S3ObjectSource {
    pub async fn new(config: &S3SourceConfig) -> Self {
        debug!("Initializing S3 source with config: {:?}", config);

        let mut builder = match config.static_credentials() {
            Some((access_key, secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "voicelog-source");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!("S3 source initialized for bucket: {}", config.bucket);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<RawObjectRef>, FetchError> {
        let mut refs = Vec::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| classify(prefix, e))?;
            pages += 1;

            refs.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(RawObjectRef::new),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!(
            "Listed {} objects in s3://{}/{} over {} pages",
            refs.len(),
            self.bucket,
            prefix,
            pages
        );

        Ok(refs)
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| FetchError::Transport(format!("{}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

fn classify<E, R>(target: &str, err: SdkError<E, R>) -> FetchError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = match &err {
        SdkError::ServiceError(service) => service.err().code().map(str::to_string),
        _ => None,
    };
    let message = format!("{}: {}", target, DisplayErrorContext(&err));

    match code.as_deref() {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => FetchError::NotFound(message),
        Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            FetchError::AccessDenied(message)
        }
        _ => FetchError::Transport(message),
    }
}

use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use log::debug;
use tokio::runtime::{Builder, Runtime};

use super::{ObjectClient, ObjectStoreError, UploadedPart};
use crate::settings::S3Settings;

fn request_error<E: std::error::Error>(e: E) -> ObjectStoreError {
    ObjectStoreError::Request(DisplayErrorContext(e).to_string())
}

/// A connection to an S3-compatible endpoint.
///
/// Each connection drives its own single-threaded runtime,
/// so requests block the calling thread.
pub struct S3Client {
    client: Client,
    runtime: Runtime,
}

impl S3Client {
    pub fn new(settings: &S3Settings) -> Result<Self, ObjectStoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ObjectStoreError::Runtime(e.to_string()))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let Some(endpoint) = settings.endpoint.as_ref() {
            loader = loader.endpoint_url(endpoint);
        }
        loader = match (
            settings.access_key_id.as_ref(),
            settings.secret_access_key.as_ref(),
        ) {
            (Some(id), Some(secret)) => loader.credentials_provider(Credentials::new(
                id,
                secret,
                settings.session_token.clone(),
                None,
                "zarr-sink",
            )),
            _ => loader.credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            ),
        };
        let sdk_config = runtime.block_on(loader.load());
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        debug!(
            "Connected S3 client to {}",
            settings.endpoint.as_deref().unwrap_or("default endpoint")
        );
        Ok(Self {
            client: Client::from_conf(config),
            runtime,
        })
    }
}

impl ObjectClient for S3Client {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        let res = self
            .runtime
            .block_on(self.client.head_bucket().bucket(bucket).send());
        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e.as_service_error().map_or(false, |s| s.is_not_found())
                    || e.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if not_found {
                    Ok(false)
                } else {
                    Err(request_error(e))
                }
            }
        }
    }

    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map(|_| ())
            .map_err(request_error)
    }

    fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, ObjectStoreError> {
        let resp = self
            .runtime
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .send(),
            )
            .map_err(request_error)?;
        resp.upload_id().map(|s| s.to_owned()).ok_or_else(|| {
            ObjectStoreError::Request(format!("no upload ID returned for {bucket}/{key}"))
        })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ObjectStoreError> {
        let resp = self
            .runtime
            .block_on(
                self.client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(request_error)?;
        resp.e_tag().map(|s| s.to_owned()).ok_or_else(|| {
            ObjectStoreError::Request(format!("no ETag returned for part {part_number}"))
        })
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), ObjectStoreError> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag.clone())
                    .build()
            })
            .collect::<Vec<_>>();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        self.runtime
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send(),
            )
            .map(|_| ())
            .map_err(request_error)
    }

    fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError> {
        self.runtime
            .block_on(
                self.client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send(),
            )
            .map(|_| ())
            .map_err(request_error)
    }
}

use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutMultipartOpts, PutOptions,
    WriteMultipart,
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::checksum::{self, Algorithm};

/// Objects below this size go up as a single request; larger ones switch to
/// multipart.
const UPLOAD_CUTOFF: u64 = 10 * 1024 * 1024;
/// Multipart upload part size.
const UPLOAD_PART_SIZE: usize = 10 * 1024 * 1024;
/// Upper bound on in-flight parts per upload.
const UPLOAD_CONCURRENCY: usize = 5;

/// Connection settings for an S3-compatible bucket.
#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Local,
    S3,
    Http,
}

/// Uniform file operations over a local directory, an S3-compatible bucket,
/// or an HTTP origin. Shared between the sync engine (destination) and the
/// downloaders (vendor sources).
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ObjectStore>,
    backend: Backend,
}

impl ArtifactStore {
    /// A store rooted at a local directory. Used by tests and local runs.
    pub fn local(root: &FsPath) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating store root {}", root.display()))?;
        let store = LocalFileSystem::new_with_prefix(root)
            .with_context(|| format!("opening store root {}", root.display()))?;
        Ok(Self {
            inner: Arc::new(store),
            backend: Backend::Local,
        })
    }

    /// An S3-compatible bucket. Path-style addressing and HTTP/1 keep this
    /// compatible with non-AWS endpoints; bucket existence is not probed.
    pub fn s3(config: &S3Config) -> Result<Self> {
        let client_options = ClientOptions::new().with_allow_http(true).with_http1_only();
        let mut builder = AmazonS3Builder::new()
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_virtual_hosted_style_request(false)
            .with_client_options(client_options);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder
            .build()
            .with_context(|| format!("configuring bucket {}", config.bucket))?;
        Ok(Self {
            inner: Arc::new(store),
            backend: Backend::S3,
        })
    }

    /// A read-only HTTP origin, addressed relative to `base_url`.
    pub fn http(base_url: &str) -> Result<Self> {
        let store = HttpBuilder::new()
            .with_url(base_url)
            .with_client_options(ClientOptions::new().with_allow_http(true))
            .build()
            .with_context(|| format!("configuring HTTP origin {base_url}"))?;
        Ok(Self {
            inner: Arc::new(store),
            backend: Backend::Http,
        })
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.inner.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(error) => Err(error).with_context(|| format!("stat {key}")),
        }
    }

    /// Streams a local file into the store under `key`. On the S3 backend the
    /// file's md5 rides along as object metadata.
    pub async fn put_file(&self, key: &str, source: &FsPath) -> Result<()> {
        let md5 = checksum::compute(source, Algorithm::Md5).await?;
        let mut attributes = Attributes::new();
        if self.backend == Backend::S3 {
            // the local backend rejects custom attributes
            attributes.insert(Attribute::Metadata("md5".into()), md5.clone().into());
        }

        let size = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("stat {}", source.display()))?
            .len();
        if size < UPLOAD_CUTOFF {
            // one request below the cutoff
            let body = tokio::fs::read(source)
                .await
                .with_context(|| format!("reading {}", source.display()))?;
            let opts = PutOptions {
                attributes,
                ..Default::default()
            };
            self.inner
                .put_opts(&Path::from(key), body.into(), opts)
                .await
                .with_context(|| format!("uploading {key}"))?;
        } else {
            let opts = PutMultipartOpts {
                attributes,
                ..Default::default()
            };
            let upload = self
                .inner
                .put_multipart_opts(&Path::from(key), opts)
                .await
                .with_context(|| format!("starting upload of {key}"))?;
            let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_PART_SIZE);
            let mut file = File::open(source)
                .await
                .with_context(|| format!("opening {} for upload", source.display()))?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .with_context(|| format!("reading {}", source.display()))?;
                if n == 0 {
                    break;
                }
                writer
                    .wait_for_capacity(UPLOAD_CONCURRENCY)
                    .await
                    .with_context(|| format!("uploading {key}"))?;
                writer.write(&buf[..n]);
            }
            writer
                .finish()
                .await
                .with_context(|| format!("finishing upload of {key}"))?;
        }
        debug!(key, md5 = %md5, size, "uploaded object");
        Ok(())
    }

    /// Streams object `key` into `writer`.
    pub async fn copy_to_writer<W>(&self, key: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.stream_object(&Path::from(key), key, writer).await
    }

    /// Streams object `key` into a local file at `dest`.
    pub async fn get_to_file(&self, key: &str, dest: &FsPath) -> Result<()> {
        let mut file = File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        self.copy_to_writer(key, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    /// Streams an absolute URL into `writer` through an HTTP backend rooted
    /// at the URL's origin. The URL's query, if any, does not map to an
    /// object path and is dropped.
    pub async fn copy_url_to_writer<W>(url: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let parsed = Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
        let mut base = parsed.clone();
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        let source = Self::http(base.as_str())?;
        let location = Path::from_url_path(parsed.path().trim_start_matches('/'))
            .with_context(|| format!("invalid object path in {url}"))?;
        source.stream_object(&location, url, writer).await
    }

    async fn stream_object<W>(&self, location: &Path, name: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let result = self
            .inner
            .get(location)
            .await
            .with_context(|| format!("fetching {name}"))?;
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("reading {name}"))?;
            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("copying {name}"))?;
        }
        Ok(())
    }
}

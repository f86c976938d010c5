//! Resolves a `StormTopology`'s declared `jarSource` to a local file the
//! operator process can read and hand to [`storm_client::StormApiClient::submit_topology`].
//!
//! Three source kinds, uniform result: every branch below produces a
//! [`JarResolution`] pointing at a file under the operator's jar cache
//! directory, verified (or stamped, if no checksum was declared) against a
//! `ChecksumSpec`.

pub mod fragments;
pub mod job;

use crate::checksum;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use kube::Client;
use storm_types::common::{ChecksumAlgorithm, ChecksumSpec, JarSourceSpec};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Outcome of resolving a jar source: where it landed, and its verified
/// identity.
#[derive(Debug, Clone)]
pub struct JarResolution {
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Context a single resolution needs beyond the declared source: where to
/// cache the result, how long a container-image extraction Job may run, and
/// the client/metrics needed to drive one.
pub struct ResolveContext<'a> {
    pub client: Client,
    pub namespace: &'a str,
    pub topology: &'a str,
    pub cache_dir: &'a Path,
    pub extraction_timeout: Duration,
    pub metrics: &'a Metrics,
}

/// Resolves `source` into a [`JarResolution`], verifying against `checksum`
/// when declared and otherwise computing + recording one. Exactly one of
/// `source`'s three fields must be set; callers are expected to have
/// validated that already (see the topology reconciler's Validating phase).
pub async fn resolve(
    ctx: &ResolveContext<'_>,
    source: &JarSourceSpec,
    checksum_spec: Option<&ChecksumSpec>,
) -> Result<JarResolution> {
    let dest = cache_path(ctx.cache_dir, ctx.namespace, ctx.topology);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let start = tokio::time::Instant::now();
    let size_bytes = if let Some(url) = &source.url {
        download_url(url, &dest).await?
    } else if let Some(s3) = &source.s3 {
        download_s3(s3, &dest).await?
    } else if let Some(container) = &source.container {
        job::extract(ctx, container, &dest).await?
    } else {
        return Err(Error::UserInputError(
            "jarSource has none of url/container/s3 set".to_owned(),
        ));
    };

    ctx.metrics
        .storm
        .topology_jar_download_duration_seconds
        .get_or_create(&crate::metrics::TopologyLabels {
            topology: ctx.topology.to_owned(),
            namespace: ctx.namespace.to_owned(),
        })
        .observe(start.elapsed().as_secs_f64());
    ctx.metrics
        .storm
        .topology_jar_size_bytes
        .get_or_create(&crate::metrics::TopologyLabels {
            topology: ctx.topology.to_owned(),
            namespace: ctx.namespace.to_owned(),
        })
        .observe(size_bytes as f64);

    let bytes = tokio::fs::read(&dest).await?;
    let checksum = match checksum_spec {
        Some(spec) => {
            checksum::verify(spec, &bytes)?;
            spec.value.clone()
        }
        None => checksum::digest(ChecksumAlgorithm::Sha256, &bytes),
    };

    info!(
        msg = "resolved topology jar",
        namespace = ctx.namespace,
        topology = ctx.topology,
        size_bytes,
        path = %dest.display(),
    );

    Ok(JarResolution {
        path: dest,
        checksum,
        size_bytes,
    })
}

/// Deterministic local path a resolved jar for `(namespace, topology)` lands
/// at. Exposed so the topology reconciler can locate an already-resolved
/// jar (e.g. when re-entering the `Submitting` phase) without re-running
/// [`resolve`].
pub fn cache_path(cache_dir: &Path, namespace: &str, topology: &str) -> PathBuf {
    cache_dir.join(namespace).join(format!("{topology}.jar"))
}

async fn download_url(url: &str, dest: &Path) -> Result<u64> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::Permanent(format!("failed to GET jar from {url}: {e}")))?
        .error_for_status()
        .map_err(|e| Error::Permanent(format!("jar url {url} returned an error status: {e}")))?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut size = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Permanent(format!("error streaming jar body: {e}")))?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(size)
}

async fn download_s3(
    source: &storm_types::common::S3JarSource,
    dest: &Path,
) -> Result<u64> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &source.region {
        loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &source.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;
    let client = aws_sdk_s3::Client::new(&config);

    let response = client
        .get_object()
        .bucket(&source.bucket)
        .key(&source.key)
        .send()
        .await
        .map_err(|e| Error::Permanent(format!("s3 GetObject {}/{} failed: {e}", source.bucket, source.key)))?;

    let body = response
        .body
        .collect()
        .await
        .map_err(|e| Error::Permanent(format!("failed reading s3 object body: {e}")))?
        .into_bytes();

    let mut file = tokio::fs::File::create(dest).await?;
    file.write_all(&body).await?;
    file.flush().await?;
    Ok(body.len() as u64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_path_is_one_jar_per_topology() {
        let a = cache_path(Path::new("/cache"), "ns1", "topo-a");
        let b = cache_path(Path::new("/cache"), "ns1", "topo-b");
        let c = cache_path(Path::new("/cache"), "ns2", "topo-a");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Path::new("/cache/ns1/topo-a.jar"));
    }
}

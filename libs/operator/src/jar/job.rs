//! Job-mode container-image jar extraction: copies a jar out of a user
//! image into the shared jar cache PVC, then a small utility container
//! computes the checksum/size sidecar files the resolver reads back.

use crate::error::{Error, Result};
use crate::jar::ResolveContext;

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use storm_types::common::{ChecksumAlgorithm, ContainerJarSource};
use tracing::{info, warn};

const FIELD_MANAGER: &str = "storm-operator";
const JAR_CACHE_CLAIM: &str = "storm-operator-jar-cache";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn job_name(topology: &str) -> String {
    format!("{topology}-jar-extractor")
}

fn checksum_command(algorithm: ChecksumAlgorithm) -> &'static str {
    match algorithm {
        ChecksumAlgorithm::Md5 => "md5sum",
        ChecksumAlgorithm::Sha256 => "sha256sum",
        ChecksumAlgorithm::Sha512 => "sha512sum",
    }
}

/// Runs (or reuses) a Job that copies `source.path` out of `source.image`
/// and into `dest`, alongside `<dest>.size` and `<dest>.<algo>sum` sidecar
/// files, then reads those sidecars back. Returns the real values the
/// finalize container observed — never a stubbed or recomputed one.
pub async fn extract(
    ctx: &ResolveContext<'_>,
    source: &ContainerJarSource,
    dest: &Path,
) -> Result<u64> {
    let algorithm = ChecksumAlgorithm::Sha256;
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ctx.namespace);
    let name = job_name(ctx.topology);

    match jobs.get_opt(&name).await.map_err(Error::from)? {
        Some(existing) if job_succeeded(&existing) => {
            info!(msg = "reusing completed jar extraction job", job = %name);
        }
        Some(existing) if job_failed(&existing) => {
            warn!(msg = "recreating failed jar extraction job", job = %name);
            jobs.delete(&name, &DeleteParams::default())
                .await
                .map_err(Error::from)?;
            create_job(&jobs, ctx, source, dest, algorithm).await?;
            wait_for_completion(&jobs, &name, ctx.extraction_timeout).await?;
        }
        Some(_) => {
            // still running from a previous reconcile
            wait_for_completion(&jobs, &name, ctx.extraction_timeout).await?;
        }
        None => {
            create_job(&jobs, ctx, source, dest, algorithm).await?;
            wait_for_completion(&jobs, &name, ctx.extraction_timeout).await?;
        }
    }

    read_size_sidecar(dest).await
}

async fn create_job(
    jobs: &Api<Job>,
    ctx: &ResolveContext<'_>,
    source: &ContainerJarSource,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<()> {
    let name = job_name(ctx.topology);
    let dest_str = dest.to_string_lossy().to_string();
    let sum_path = format!("{dest_str}.{}", checksum_suffix(algorithm));
    let size_path = format!("{dest_str}.size");
    let sum_cmd = checksum_command(algorithm);

    let labels = [("app.kubernetes.io/managed-by".to_owned(), "storm-operator".to_owned())]
        .into_iter()
        .collect();

    let job = Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ctx.namespace.to_owned()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_owned()),
                    init_containers: Some(vec![Container {
                        name: "copy-jar".to_owned(),
                        image: Some(source.image.clone()),
                        command: Some(vec!["cp".to_owned(), source.path.clone(), "/staging/jar".to_owned()]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "staging".to_owned(),
                            mount_path: "/staging".to_owned(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: "finalize".to_owned(),
                        image: Some("busybox:stable".to_owned()),
                        command: Some(vec!["sh".to_owned(), "-c".to_owned()]),
                        args: Some(vec![format!(
                            "mkdir -p $(dirname {dest_str}) && cp /staging/jar {dest_str} && \
                             {sum_cmd} {dest_str} | cut -d' ' -f1 > {sum_path} && \
                             stat -c%s {dest_str} > {size_path}"
                        )]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "staging".to_owned(),
                                mount_path: "/staging".to_owned(),
                                read_only: Some(true),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "jar-cache".to_owned(),
                                mount_path: ctx.cache_dir.to_string_lossy().to_string(),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "staging".to_owned(),
                            empty_dir: Some(Default::default()),
                            ..Default::default()
                        },
                        Volume {
                            name: "jar-cache".to_owned(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: JAR_CACHE_CLAIM.to_owned(),
                                read_only: Some(false),
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };

    jobs.create(&PostParams::default(), &job)
        .await
        .map_err(Error::from)?;
    info!(msg = "created jar extraction job", job = %name);
    Ok(())
}

fn checksum_suffix(algorithm: ChecksumAlgorithm) -> &'static str {
    match algorithm {
        ChecksumAlgorithm::Md5 => "md5",
        ChecksumAlgorithm::Sha256 => "sha256",
        ChecksumAlgorithm::Sha512 => "sha512",
    }
}

fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .map(|n| n > 0)
        .unwrap_or(false)
}

fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.failed)
        .map(|n| n > 0)
        .unwrap_or(false)
}

async fn wait_for_completion(jobs: &Api<Job>, name: &str, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = jobs.get(name).await.map_err(Error::from)?;
        if job_succeeded(&job) {
            return Ok(());
        }
        if job_failed(&job) {
            let message = job
                .status
                .and_then(|s| s.conditions)
                .and_then(|cs| cs.into_iter().find(|c| c.type_ == "Failed"))
                .map(|c| c.message.unwrap_or_default())
                .unwrap_or_else(|| "jar extraction job failed".to_owned());
            return Err(Error::Permanent(message));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Permanent(format!(
                "jar extraction job {name} did not complete within {timeout:?}"
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn read_size_sidecar(dest: &Path) -> Result<u64> {
    let size_path = format!("{}.size", dest.to_string_lossy());
    let contents = tokio::fs::read_to_string(&size_path).await?;
    contents
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::Permanent(format!("malformed size sidecar {size_path}: {e}")))
}

trait JobsExt {
    async fn get_opt(&self, name: &str) -> kube::Result<Option<Job>>;
}

impl JobsExt for Api<Job> {
    async fn get_opt(&self, name: &str) -> kube::Result<Option<Job>> {
        match self.get(name).await {
            Ok(job) => Ok(Some(job)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e),
        }
    }
}

use k8s_openapi::api::core::v1::SecretKeySelector;
use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

/// Checksum algorithms accepted for JAR verification.
///
/// Anything outside this set is a permanent validation failure, never a
/// transient one: an unknown algorithm name cannot start succeeding on
/// retry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    #[default]
    Sha256,
    Sha512,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ChecksumSpec {
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

/// Supported shapes for materializing the supervisor workload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub enum DeploymentMode {
    #[default]
    Deployment,
    DaemonSet,
}

/// How a `containerImage` JAR source is made available to the topology worker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub enum ExtractionMode {
    #[default]
    Job,
    InitContainer,
    Sidecar,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub repository: String,
    #[serde(default = "default_image_tag")]
    pub tag: String,
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// One of `url`, `container` or `s3` must be set; the others must be absent.
/// Represented as a struct of options (rather than a `serde`-internally-tagged
/// enum) because the Kubernetes OpenAPI schema this renders to has no native
/// sum-type support — the mutual exclusivity is a runtime invariant enforced
/// by the topology reconciler's validation phase, not by the wire shape.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct JarSourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerJarSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3JarSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ContainerJarSource {
    pub image: String,
    pub path: String,
    #[serde(default)]
    pub extraction_mode: ExtractionMode,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct S3JarSource {
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_secret_ref: Option<SecretKeySelector>,
}

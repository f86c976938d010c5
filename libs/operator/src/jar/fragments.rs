//! `initContainer`/`sidecar` extraction modes don't run as a one-shot Job;
//! they're pod-spec fragments folded into a worker pool's own
//! `PodTemplateSpec` so a topology's workers carry their jar locally,
//! without a round-trip through the operator's jar cache.

use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};
use storm_types::common::ContainerJarSource;

pub const JAR_VOLUME_NAME: &str = "storm-jar";
pub const JAR_MOUNT_PATH: &str = "/storm/jar";
pub const JAR_FILE_PATH: &str = "/storm/jar/topology.jar";

/// The shared `emptyDir` both the extraction container and the worker's
/// main container mount the resolved jar through.
pub fn jar_volume() -> Volume {
    Volume {
        name: JAR_VOLUME_NAME.to_owned(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    }
}

fn jar_volume_mount(read_only: bool) -> VolumeMount {
    VolumeMount {
        name: JAR_VOLUME_NAME.to_owned(),
        mount_path: JAR_MOUNT_PATH.to_owned(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

/// An `initContainer` that copies the jar out of `source.image` before the
/// main worker container starts, then exits.
pub fn init_container(source: &ContainerJarSource) -> Container {
    Container {
        name: "jar-extractor".to_owned(),
        image: Some(source.image.clone()),
        command: Some(vec!["cp".to_owned(), source.path.clone(), JAR_FILE_PATH.to_owned()]),
        volume_mounts: Some(vec![jar_volume_mount(false)]),
        ..Default::default()
    }
}

/// A sidecar that copies the jar then idles, for topologies that expect
/// the jar container to remain alive alongside the worker (e.g. one that
/// also tails and reexports logs from the jar's own bundled diagnostics).
pub fn sidecar_container(source: &ContainerJarSource) -> Container {
    Container {
        name: "jar-sidecar".to_owned(),
        image: Some(source.image.clone()),
        command: Some(vec!["sh".to_owned(), "-c".to_owned()]),
        args: Some(vec![format!(
            "cp {} {JAR_FILE_PATH} && sleep infinity",
            source.path
        )]),
        volume_mounts: Some(vec![jar_volume_mount(false)]),
        ..Default::default()
    }
}

/// The read-only mount the worker's main container needs to see the jar
/// either extraction mode above placed at [`JAR_FILE_PATH`].
pub fn worker_volume_mount() -> VolumeMount {
    jar_volume_mount(true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_container_copies_from_declared_path() {
        let source = ContainerJarSource {
            image: "registry/topo:1.0".to_owned(),
            path: "/app/topology.jar".to_owned(),
            extraction_mode: Default::default(),
        };
        let c = init_container(&source);
        assert_eq!(c.image.as_deref(), Some("registry/topo:1.0"));
        assert_eq!(
            c.command.unwrap(),
            vec!["cp", "/app/topology.jar", JAR_FILE_PATH]
        );
    }
}

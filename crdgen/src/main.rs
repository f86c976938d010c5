//! Writes the generated CRD manifests for the three Storm resource kinds
//! to `../crds`, one YAML document per file, so they can be applied with
//! `kubectl apply -f crds/` ahead of installing the operator itself.

use kube::CustomResourceExt;
use std::fs;
use storm_types::{StormCluster, StormTopology, StormWorkerPool};

fn write_crd(dir: &str, file_name: &str, yaml: String) {
    let path = format!("{dir}/{file_name}");
    fs::write(&path, yaml).unwrap_or_else(|e| panic!("failed to write {path}: {e}"));
    println!("wrote {path}");
}

fn main() {
    let dir = "../crds";
    fs::create_dir_all(dir).unwrap_or_else(|e| panic!("failed to create {dir}: {e}"));

    write_crd(
        dir,
        "storm.apache.org_stormclusters.yaml",
        serde_yaml::to_string(&StormCluster::crd()).expect("StormCluster schema is serializable"),
    );
    write_crd(
        dir,
        "storm.apache.org_stormtopologies.yaml",
        serde_yaml::to_string(&StormTopology::crd()).expect("StormTopology schema is serializable"),
    );
    write_crd(
        dir,
        "storm.apache.org_stormworkerpools.yaml",
        serde_yaml::to_string(&StormWorkerPool::crd()).expect("StormWorkerPool schema is serializable"),
    );
}

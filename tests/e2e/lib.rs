#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions, Condition};
    use kube::ResourceExt;
    use storm_types::common::{ContainerJarSource, ExtractionMode, ImageSpec, JarSourceSpec};
    use storm_types::cluster::{StormCluster, StormClusterSpec};
    use storm_types::topology::{StormTopology, StormTopologySpec};
    use storm_types::workerpool::{StormWorkerPool, StormWorkerPoolSpec};

    fn is_pool_ready() -> impl Condition<StormWorkerPool> {
        |obj: Option<&StormWorkerPool>| {
            if let Some(pool) = &obj {
                if let Some(status) = &pool.status {
                    return status.phase == storm_types::workerpool::StormWorkerPoolPhase::Ready;
                }
            }
            false
        }
    }

    fn is_pool_not_ready() -> impl Condition<StormWorkerPool> {
        |obj: Option<&StormWorkerPool>| {
            if let Some(pool) = &obj {
                if let Some(status) = &pool.status {
                    return status.phase != storm_types::workerpool::StormWorkerPoolPhase::Ready;
                }
            }
            true
        }
    }

    fn is_deployment_ready() -> impl Condition<Deployment> {
        |obj: Option<&Deployment>| {
            if let Some(deployment) = &obj {
                if let Some(status) = &deployment.status {
                    return status.replicas == status.updated_replicas
                        && status.replicas == status.ready_replicas;
                }
            }
            false
        }
    }

    async fn wait_for<R, C>(api: Api<R>, name: &str, condition: C)
    where
        R: kube::Resource
            + Clone
            + std::fmt::Debug
            + for<'de> k8s_openapi::serde::Deserialize<'de>
            + 'static
            + Send,
        C: Condition<R>,
    {
        tokio::time::timeout(
            Duration::from_secs(60),
            await_condition(api, name, condition),
        )
        .await
        .unwrap()
        .unwrap();
    }

    /// A container-mode topology jar source lets the reconciler build a pod
    /// template without contacting a real Nimbus: the worker-pool reconciler
    /// only reads `jar_source.container` to decide which extraction
    /// fragments to inject, never the topology's own submission status.
    fn topology_spec(cluster: &str) -> StormTopologySpec {
        StormTopologySpec {
            cluster_ref: cluster.to_string(),
            jar_source: JarSourceSpec {
                container: Some(ContainerJarSource {
                    image: "example.invalid/topologies/wordcount:latest".to_string(),
                    path: "/jars/wordcount.jar".to_string(),
                    extraction_mode: ExtractionMode::InitContainer,
                }),
                ..Default::default()
            },
            main_class: "org.apache.storm.starter.WordCountTopology".to_string(),
            ..Default::default()
        }
    }

    fn cluster_spec() -> StormClusterSpec {
        StormClusterSpec {
            image: ImageSpec {
                repository: "storm".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn setup(name: &str) -> (Api<StormWorkerPool>, Api<Deployment>) {
        let client = Client::try_default().await.unwrap();

        let cluster_api = Api::<StormCluster>::namespaced(client.clone(), "default");
        let cluster = StormCluster::new(name, cluster_spec());
        cluster_api
            .create(&PostParams::default(), &cluster)
            .await
            .unwrap();

        let topology_api = Api::<StormTopology>::namespaced(client.clone(), "default");
        let topology = StormTopology::new(name, topology_spec(name));
        topology_api
            .create(&PostParams::default(), &topology)
            .await
            .unwrap();

        let pool_api = Api::<StormWorkerPool>::namespaced(client.clone(), "default");
        let pool = StormWorkerPool::new(
            name,
            StormWorkerPoolSpec {
                topology_ref: name.to_string(),
                replicas: Some(1),
                ..Default::default()
            },
        );
        pool_api.create(&PostParams::default(), &pool).await.unwrap();

        let deployment_api = Api::<Deployment>::namespaced(client.clone(), "default");
        wait_for(deployment_api.clone(), name, is_deployment_ready()).await;
        wait_for(pool_api.clone(), name, is_pool_ready()).await;
        (pool_api, deployment_api)
    }

    #[tokio::test]
    async fn worker_pool_create() {
        let name = "test-create";
        setup(name).await;
    }

    #[tokio::test]
    async fn worker_pool_delete_deployment() {
        let name = "test-delete-deployment";
        let (pool_api, deployment_api) = setup(name).await;

        let deploy = deployment_api.get(name).await.unwrap();
        deployment_api
            .delete(name, &Default::default())
            .await
            .unwrap();

        wait_for(
            deployment_api.clone(),
            name,
            conditions::is_deleted(&deploy.uid().unwrap()),
        )
        .await;
        wait_for(deployment_api.clone(), name, is_deployment_ready()).await;
        wait_for(pool_api.clone(), name, is_pool_ready()).await;

        let check_deploy_deleted = deployment_api.get(name).await.unwrap();

        pool_api.delete(name, &Default::default()).await.unwrap();

        wait_for(
            deployment_api,
            name,
            conditions::is_deleted(&check_deploy_deleted.uid().unwrap()),
        )
        .await;
    }

    #[tokio::test]
    async fn worker_pool_delete_pool() {
        let name = "test-delete-pool";
        let (pool_api, deployment_api) = setup(name).await;

        let deploy = deployment_api.get(name).await.unwrap();
        let pool = pool_api.get(name).await.unwrap();
        pool_api.delete(name, &Default::default()).await.unwrap();

        wait_for(
            pool_api.clone(),
            name,
            conditions::is_deleted(&pool.uid().unwrap()),
        )
        .await;

        wait_for(
            deployment_api.clone(),
            name,
            conditions::is_deleted(&deploy.uid().unwrap()),
        )
        .await;
    }

    #[tokio::test]
    async fn worker_pool_change_replicas_reverted_by_deployment_drift() {
        let name = "test-change-deployment";
        let (pool_api, deployment_api) = setup(name).await;

        let mut deploy = deployment_api.get(name).await.unwrap();
        deploy.spec.as_mut().unwrap().replicas = Some(2);
        deploy.metadata.managed_fields = None;
        deployment_api
            .patch(
                name,
                &PatchParams::apply("e2e-tests").force(),
                &Patch::Apply(&deploy),
            )
            .await
            .unwrap();

        wait_for(pool_api.clone(), name, is_pool_not_ready()).await;
        wait_for(pool_api.clone(), name, is_pool_ready()).await;

        let check_deploy_replicas = deployment_api.get(name).await.unwrap();
        assert_eq!(check_deploy_replicas.spec.unwrap().replicas.unwrap(), 1);
    }

    #[tokio::test]
    async fn worker_pool_change_replicas() {
        let name = "test-change-pool";
        let (pool_api, deployment_api) = setup(name).await;

        let mut pool = pool_api.get(name).await.unwrap();
        pool.spec.replicas = Some(2);
        pool.metadata.managed_fields = None;
        pool_api
            .patch(
                name,
                &PatchParams::apply("e2e-tests").force(),
                &Patch::Apply(&pool),
            )
            .await
            .unwrap();

        wait_for(pool_api.clone(), name, is_pool_not_ready()).await;
        wait_for(pool_api.clone(), name, is_pool_ready()).await;

        let check_deploy_replicas = deployment_api.get(name).await.unwrap();
        assert_eq!(check_deploy_replicas.spec.unwrap().replicas.unwrap(), 2);
    }
}

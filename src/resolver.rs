//! Pod/service → (pod identity, container port) lookup (§4.1).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container,
    Pod,
    Service,
};
use kube::api::ListParams;
use kube::{
    Api,
    Client,
};

use crate::error::Error;
use crate::target::ResolvedTarget;

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn find_pod_by_service(
        &self, namespace: &str, service_name: &str,
    ) -> Result<ResolvedTarget, Error>;

    async fn find_pod_by_name(&self, namespace: &str, pod_name: &str)
        -> Result<ResolvedTarget, Error>;
}

/// Resolves pods and services against a live cluster API.
pub struct KubeResolver {
    client: Client,
}

impl KubeResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for KubeResolver {
    async fn find_pod_by_service(
        &self, namespace: &str, service_name: &str,
    ) -> Result<ResolvedTarget, Error> {
        tracing::debug!(namespace, service_name, "finding service");
        let svc_api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = svc_api
            .get(service_name)
            .await
            .map_err(|e| Error::Resolve(format!("could not find service {service_name}: {e}")))?;

        let selector = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        tracing::debug!(selector, "finding pods by selector");

        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&selector);
        let pods = pod_api
            .list(&lp)
            .await
            .map_err(|e| Error::Resolve(format!("could not list pods for selector {selector}: {e}")))?;

        if pods.items.is_empty() {
            return Err(Error::Resolve(format!("no pod matched selector {selector}")));
        }
        // Deliberately the first item in API-returned order, not the "ready" one.
        // Preserved per the upstream design: reconnect handles transient unreadiness.
        let pod = &pods.items[0];
        first_container_port(pod, namespace)
    }

    async fn find_pod_by_name(
        &self, namespace: &str, pod_name: &str,
    ) -> Result<ResolvedTarget, Error> {
        tracing::debug!(namespace, pod_name, "finding pod");
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pod_api
            .get(pod_name)
            .await
            .map_err(|e| Error::Resolve(format!("could not find pod {pod_name}: {e}")))?;
        first_container_port(&pod, namespace)
    }
}

fn first_container_port(pod: &Pod, namespace: &str) -> Result<ResolvedTarget, Error> {
    let pod_name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Resolve("pod has no name".into()))?;

    let containers: &[Container] = pod
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        if let Some(ports) = &container.ports {
            if let Some(port) = ports.first() {
                return Ok(ResolvedTarget {
                    namespace: namespace.to_string(),
                    pod_name,
                    container_port: port.container_port,
                });
            }
        }
    }
    Err(Error::Resolve(format!("no container port in pod {pod_name}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use http::{
        Request,
        Response,
    };
    use k8s_openapi::api::core::v1::{
        ContainerPort,
        PodSpec,
        ServicePort,
        ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::List;
    use kube::client::Body;
    use tower_test::mock;

    use super::*;

    fn mock_client() -> (Client, mock::Handle<Request<Body>, Response<Body>>) {
        let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        (Client::new(mock_service, "test-ns"), handle)
    }

    fn mock_pod(name: &str, labels: BTreeMap<String, String>, port: i32) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("test-ns".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    ports: Some(vec![ContainerPort {
                        container_port: port,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    fn mock_service_obj(name: &str, selector: BTreeMap<String, String>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("test-ns".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector),
                ports: Some(vec![ServicePort { port: 80, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn find_pod_by_service_picks_first_pod_and_first_port() {
        let (client, mut handle) = mock_client();
        let resolver = KubeResolver::new(client);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service GET expected");
            assert_eq!(request.method(), "GET");
            assert_eq!(request.uri().path(), "/api/v1/namespaces/test-ns/services/my-svc");
            let selector = BTreeMap::from([("app".to_string(), "demo".to_string())]);
            let svc = mock_service_obj("my-svc", selector);
            send.send_response(
                Response::builder().body(Body::from(serde_json::to_vec(&svc).unwrap())).unwrap(),
            );

            let (request, send) = handle.next_request().await.expect("pod LIST expected");
            assert_eq!(request.uri().path(), "/api/v1/namespaces/test-ns/pods");
            let labels = BTreeMap::from([("app".to_string(), "demo".to_string())]);
            let pods = List {
                items: vec![
                    mock_pod("pod-a", labels.clone(), 18888),
                    mock_pod("pod-b", labels, 19999),
                ],
                ..Default::default()
            };
            send.send_response(
                Response::builder().body(Body::from(serde_json::to_vec(&pods).unwrap())).unwrap(),
            );
        });

        let resolved = resolver.find_pod_by_service("test-ns", "my-svc").await.unwrap();
        server.await.unwrap();

        assert_eq!(resolved.pod_name, "pod-a");
        assert_eq!(resolved.container_port, 18888);
    }

    #[tokio::test]
    async fn find_pod_by_service_fails_on_empty_selector_match() {
        let (client, mut handle) = mock_client();
        let resolver = KubeResolver::new(client);

        let server = tokio::spawn(async move {
            let (_, send) = handle.next_request().await.unwrap();
            let svc = mock_service_obj("my-svc", BTreeMap::from([("app".to_string(), "demo".to_string())]));
            send.send_response(
                Response::builder().body(Body::from(serde_json::to_vec(&svc).unwrap())).unwrap(),
            );
            let (_, send) = handle.next_request().await.unwrap();
            let pods: List<Pod> = List { items: vec![], ..Default::default() };
            send.send_response(
                Response::builder().body(Body::from(serde_json::to_vec(&pods).unwrap())).unwrap(),
            );
        });

        let err = resolver.find_pod_by_service("test-ns", "my-svc").await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, Error::Resolve(_)));
    }

    #[test]
    fn first_container_port_scans_declaration_order() {
        let mut pod = mock_pod("p", BTreeMap::new(), 1234);
        pod.spec.as_mut().unwrap().containers.insert(
            0,
            Container { ports: None, ..Default::default() },
        );
        let resolved = first_container_port(&pod, "ns").unwrap();
        assert_eq!(resolved.container_port, 1234);
    }
}

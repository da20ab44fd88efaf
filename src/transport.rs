//! Credential-bearing HTTP transport construction (§10.3).
//!
//! Starts from an insecure-TLS base (upstream certificate validation is a
//! non-goal, §1) and layers `kube::Config`'s own base-URI and auth layers on
//! top, which already implement the exec-plugin / bearer-token / auth-provider
//! merge and reject exec+auth-provider combinations.

use bytes::Bytes;
use http::{
    Request,
    Response,
};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper_util::rt::TokioExecutor;
use kube::client::ConfigExt;
use kube::{
    Client,
    Config,
};
use tower::util::BoxCloneService;
use tower::{
    ServiceBuilder,
    ServiceExt,
};

use crate::error::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The reverse proxy's outbound transport: carries the cluster credential,
/// talks to whatever host/scheme the request director sets (always
/// `localhost:<transit_port>`, never the apiserver), so it is built with the
/// auth layer only — no `base_uri_layer`.
pub type Upstream = BoxCloneService<Request<BoxBody<Bytes, BoxError>>, Response<BoxBody<Bytes, BoxError>>, BoxError>;

/// Builds a `kube::Client` whose requests already carry the cluster
/// credential, against an upstream transport that never validates TLS.
pub async fn new_client(mut config: Config) -> Result<Client, Error> {
    config.accept_invalid_certs = true;

    let https_connector = config
        .rustls_https_connector()
        .map_err(|e| Error::TransportBuild(format!("could not build the HTTPS connector: {e}")))?;

    let auth_layer = config
        .auth_layer()
        .map_err(|e| Error::TransportBuild(format!("could not build the auth layer: {e}")))?;

    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .option_layer(auth_layer)
        .service(
            hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https_connector),
        );

    Ok(Client::new(service, config.default_namespace.clone()))
}

/// Builds the reverse proxy's outbound transport (§4.3 / §6): insecure-TLS,
/// credential-injecting, and pointed at nothing in particular — the request
/// director rewrites the URL on every call.
pub async fn new_upstream_transport(mut config: Config) -> Result<Upstream, Error> {
    config.accept_invalid_certs = true;

    let https_connector = config
        .rustls_https_connector()
        .map_err(|e| Error::TransportBuild(format!("could not build the HTTPS connector: {e}")))?;

    let auth_layer = config
        .auth_layer()
        .map_err(|e| Error::TransportBuild(format!("could not build the auth layer: {e}")))?;

    let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .build::<_, BoxBody<Bytes, BoxError>>(https_connector);

    let service = ServiceBuilder::new()
        .option_layer(auth_layer)
        .map_response(|res: Response<_>| res.map(|b: hyper::body::Incoming| b.map_err(BoxError::from).boxed()))
        .map_err(BoxError::from)
        .service(client);

    Ok(service.boxed_clone())
}

/// Loads cluster configuration the way the standard Kubernetes client tooling
/// does: `KUBECONFIG` env var, falling back to `~/.kube/config`, honoring an
/// explicit path/context/cluster/user override.
pub async fn load_config(
    kubeconfig: Option<&str>, context: Option<&str>, cluster: Option<&str>, user: Option<&str>,
) -> Result<Config, Error> {
    let options = kube::config::KubeConfigOptions {
        context: context.map(str::to_string),
        cluster: cluster.map(str::to_string),
        user: user.map(str::to_string),
    };

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|e| Error::ConfigLoad(format!("could not read kubeconfig {path}: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::ConfigLoad(e.to_string()))?
        }
        None => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::ConfigLoad(e.to_string()))?,
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn load_config_reports_unreadable_path() {
        let err = load_config(Some("/nonexistent/kubeconfig"), None, None, None).await.unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[tokio::test]
    async fn load_config_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
apiVersion: v1
kind: Config
clusters:
- name: test-cluster
  cluster:
    server: https://example.invalid:6443
contexts:
- name: test-context
  context:
    cluster: test-cluster
    user: test-user
current-context: test-context
users:
- name: test-user
  user:
    token: fake-token
"#
        )
        .unwrap();

        let config = load_config(Some(path.to_str().unwrap()), None, None, None).await.unwrap();
        assert_eq!(config.cluster_url.as_str(), "https://example.invalid:6443/");
    }
}

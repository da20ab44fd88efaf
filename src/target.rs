//! Immutable inputs and resolver outputs (§3 TargetSpec / ResolvedTarget).

use url::Url;

use crate::error::Error;

/// The hostname component of a [`TargetSpec`]'s URL, classified by the `.svc`
/// suffix convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTarget {
    Service(String),
    Pod(String),
}

/// Immutable input to one supervisor invocation.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    url: Url,
    namespace: String,
    bind_addresses: Vec<String>,
    skip_open_browser: bool,
}

impl TargetSpec {
    pub fn new(
        url: Url, namespace: impl Into<String>, bind_addresses: Vec<String>,
        skip_open_browser: bool,
    ) -> Result<Self, Error> {
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(Error::Resolve(format!("target URL {url} has no hostname")));
        }
        if bind_addresses.is_empty() {
            return Err(Error::Resolve("at least one bind address is required".into()));
        }
        Ok(Self {
            url,
            namespace: namespace.into(),
            bind_addresses,
            skip_open_browser,
        })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn bind_addresses(&self) -> &[String] {
        &self.bind_addresses
    }

    pub fn skip_open_browser(&self) -> bool {
        self.skip_open_browser
    }

    /// `.svc`-suffixed hostnames route to service lookup (suffix stripped first);
    /// anything else is taken as a bare pod name.
    pub fn host_target(&self) -> HostTarget {
        let host = self.url.host_str().expect("validated in new()");
        match host.strip_suffix(".svc") {
            Some(service_name) => HostTarget::Service(service_name.to_string()),
            None => HostTarget::Pod(host.to_string()),
        }
    }
}

/// Produced once by the resolver, then frozen for the lifetime of one
/// supervisor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub namespace: String,
    pub pod_name: String,
    pub container_port: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn classifies_bare_pod_hostname() {
        let t = TargetSpec::new(url("https://podname"), "ns", vec!["127.0.0.1:8000".into()], false)
            .unwrap();
        assert_eq!(t.host_target(), HostTarget::Pod("podname".into()));
    }

    #[test]
    fn classifies_svc_hostname() {
        let t = TargetSpec::new(
            url("https://servicename.svc"),
            "ns",
            vec!["127.0.0.1:8000".into()],
            false,
        )
        .unwrap();
        assert_eq!(t.host_target(), HostTarget::Service("servicename".into()));
    }

    #[test]
    fn rejects_empty_bind_addresses() {
        let err = TargetSpec::new(url("https://podname"), "ns", vec![], false).unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
    }
}

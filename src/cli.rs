//! Command-line surface (§10.2).

use clap::Parser;

const DEFAULT_ADDRESSES: [&str; 2] = ["127.0.0.1:18000", "127.0.0.1:28000"];

#[derive(Parser, Debug)]
#[command(name = "kauthproxy")]
#[command(about = "Forwards a Kubernetes pod or service to a local, credential-injecting HTTP(S) proxy")]
#[command(long_about = "Forwards a Kubernetes pod or service to a local, credential-injecting HTTP(S) proxy.\n\n\
When the target resolves to a service with more than one matching pod, the first pod returned \
by the API server is used regardless of its readiness; a pod that is Pending or Terminating at \
the moment of resolution is handled by the automatic reconnect loop, not by picking a different pod.")]
#[command(version)]
pub struct Cli {
    /// Target URL: scheme + either a bare pod name or a `<service>.svc` hostname.
    #[arg(value_name = "URL")]
    pub target_url: String,

    /// Local bind candidate, tried in order until one succeeds. Repeatable.
    #[arg(long = "address", value_name = "HOST:PORT")]
    pub addresses: Vec<String>,

    /// Path to the kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config).
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use.
    #[arg(long, value_name = "NAME")]
    pub context: Option<String>,

    /// Kubeconfig cluster to use.
    #[arg(long, value_name = "NAME")]
    pub cluster: Option<String>,

    /// Kubeconfig user to use.
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Namespace the target pod or service lives in (defaults to the active
    /// kubeconfig context's namespace when omitted).
    #[arg(short = 'n', long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Do not open a browser once the proxy is ready.
    #[arg(long)]
    pub skip_open_browser: bool,

    /// Verbosity: repeat for more detail (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Resolves the effective bind-address list, falling back to the
    /// documented defaults when `--address` was never passed.
    pub fn bind_addresses(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            DEFAULT_ADDRESSES.iter().map(|s| s.to_string()).collect()
        } else {
            self.addresses.clone()
        }
    }

    /// Cross-flag checks clap's declarative attributes cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.target_url)
            .map_err(|e| format!("invalid target URL {:?}: {e}", self.target_url))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported URL scheme {other:?}, expected http or https")),
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(format!("target URL {:?} has no hostname", self.target_url));
        }
        for address in &self.addresses {
            if address.parse::<std::net::SocketAddr>().is_err() {
                return Err(format!("invalid --address {address:?}, expected host:port"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let cli = Cli {
            target_url: "ftp://podname".into(),
            addresses: vec![],
            kubeconfig: None,
            context: None,
            cluster: None,
            user: None,
            namespace: None,
            skip_open_browser: false,
            verbose: 0,
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn bind_addresses_falls_back_to_defaults() {
        let cli = Cli {
            target_url: "https://podname".into(),
            addresses: vec![],
            kubeconfig: None,
            context: None,
            cluster: None,
            user: None,
            namespace: None,
            skip_open_browser: false,
            verbose: 0,
        };
        assert_eq!(cli.bind_addresses(), vec!["127.0.0.1:18000", "127.0.0.1:28000"]);
    }
}

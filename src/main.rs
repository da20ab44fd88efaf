//! Process entry point (§10.2): parses flags, initializes logging, builds the
//! cluster client and credential transport, wires the [`Supervisor`] and its
//! concrete collaborators, and translates the cancellation sentinel into the
//! process exit code.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use kauthproxy::browser::SystemBrowserOpener;
use kauthproxy::cli::Cli;
use kauthproxy::error::Error;
use kauthproxy::forwarder::KubePortForwarder;
use kauthproxy::port_alloc::LoopbackPortAllocator;
use kauthproxy::proxy::HttpReverseProxy;
use kauthproxy::resolver::KubeResolver;
use kauthproxy::supervisor::{
    Supervisor,
    TransportFactory,
};
use kauthproxy::target::TargetSpec;
use kauthproxy::transport::{
    self,
    Upstream,
};
use kube::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Builds the reverse proxy's credential-bearing transport from the already
/// loaded cluster config, one fresh service per call (§4.4.1 step 4).
struct ConfigTransportFactory {
    config: Config,
}

#[async_trait]
impl TransportFactory for ConfigTransportFactory {
    async fn new_transport(&self) -> Result<Upstream, Error> {
        transport::new_upstream_transport(self.config.clone()).await
    }
}

/// Maps `-v/--verbose` count and `RUST_LOG` to a tracing filter (§10.1):
/// `0 → warn`, `1 → info`, `2 → debug`, `3+ → trace`, with `RUST_LOG`
/// composed on top so explicit target directives still apply.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kauthproxy={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(message) = cli.validate() {
        eprintln!("error: {message}");
        std::process::exit(1);
    }

    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, shutting down");
            cancel_for_signal.cancel();
        }
    });

    let exit_code = match run(cli, cancel).await {
        Ok(()) => 0,
        Err(e) => {
            if e.is_cancelled() {
                0
            } else {
                eprintln!("error: {e:#}");
                1
            }
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), Error> {
    let url = url::Url::parse(&cli.target_url)
        .map_err(|e| Error::Resolve(format!("invalid target URL {:?}: {e}", cli.target_url)))?;

    let config = transport::load_config(
        cli.kubeconfig.as_deref(),
        cli.context.as_deref(),
        cli.cluster.as_deref(),
        cli.user.as_deref(),
    )
    .await?;

    // Standard kube client-config flag semantics: `-n` overrides, otherwise
    // fall back to the namespace the active kubeconfig context resolved to.
    let namespace = cli.namespace.clone().unwrap_or_else(|| config.default_namespace.clone());
    let spec = TargetSpec::new(url, namespace, cli.bind_addresses(), cli.skip_open_browser)?;

    let client = transport::new_client(config.clone()).await?;

    let supervisor = Supervisor::new(
        Arc::new(KubeResolver::new(client.clone())),
        Arc::new(KubePortForwarder::new(client)),
        Arc::new(HttpReverseProxy),
        Arc::new(LoopbackPortAllocator),
        Arc::new(SystemBrowserOpener),
        Arc::new(ConfigTransportFactory { config }),
    );

    Err(supervisor.run(cancel, spec).await)
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use sshmesh::config::{resolve_via, ConfigSource, FileConfigSource};
use sshmesh::events::{EventSink, TracingEventSink};
use sshmesh::pool::{BufferPool, FORWARDER_BUF_SIZE};
use sshmesh::portal::PortalServer;
use sshmesh::ssh::{AcceptAllHostKeys, Chain, ForwardRule, PortForwarder};

fn init_logging() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Thin binary: read config, wire up a `Chain` + its `PortForwarder`s and a
/// `PortalServer`, run until Ctrl-C. Real deployments will have a
/// management layer (out of scope, spec §1) in this role instead.
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "sshmesh.yaml".to_string());
    let source = FileConfigSource {
        path: PathBuf::from(config_path),
    };
    let config = source.load().context("loading fabric config")?;

    let pool = BufferPool::new(FORWARDER_BUF_SIZE);
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    // Each forward rule gets its own chain, dialed through only the hops it
    // names in `via` — rules with disjoint `via` lists don't share a chain
    // even if they happen to overlap in hops.
    for rule in &config.forwards {
        let rule_hops = resolve_via(&config.hops, &rule.via)
            .with_context(|| format!("resolving via for forward rule {}", rule.local_listen_addr))?;
        let mut chain = Chain::with_events(rule_hops, Arc::new(AcceptAllHostKeys), events.clone())?;
        chain.connect().await.context("connecting ssh chain")?;
        let chain = Arc::new(chain);

        let forward_rule = ForwardRule {
            local_listen_addr: rule.local_listen_addr.clone(),
            remote_host: rule.remote_host.clone(),
            remote_port: rule.remote_port,
        };
        let forwarder = PortForwarder::with_events(chain, forward_rule, pool.clone(), events.clone());
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { forwarder.run(rx).await.map_err(anyhow::Error::from) });
    }

    if let Some(portal_cfg) = &config.portal_server {
        if portal_cfg.enabled {
            let server = Arc::new(PortalServer::with_events(portal_cfg, pool.clone(), events.clone())?);
            for mapping in &config.mappings {
                if mapping.enabled {
                    // The portal backend dial is direct TCP with no chain-tunneling
                    // concept, so `via` is validated here (a typo fails fast at
                    // startup) but otherwise unused against this mapping.
                    resolve_via(&config.hops, &mapping.via)
                        .with_context(|| format!("resolving via for mapping {}", mapping.id))?;
                    server.register_mapping(mapping.clone()).await;
                }
            }
            let rx = shutdown_rx.clone();
            let server = server.clone();
            tasks.spawn(async move { server.run(rx).await.map_err(anyhow::Error::from) });
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("sshmeshd: shutdown signal received");
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result.context("task panicked")? {
            tracing::error!(error = %err, "sshmeshd: task exited with error");
        }
    }

    Ok(())
}

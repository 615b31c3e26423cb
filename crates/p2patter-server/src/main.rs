//! P2Patter server: the name registry or one owner's microblog.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use p2patter_server::{Args, MicroblogNode, RegistryNode, Role};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "p2patter_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let (role, config) = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol_version = p2patter_proto::PROTOCOL_VERSION,
        listen_address = %config.listen_address,
        "starting P2Patter server"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_signal.send(());
    });

    let result = match role {
        Role::Registry => {
            let node = RegistryNode::start(&config)?;
            node.run_until_shutdown(shutdown_rx).await
        }
        Role::Microblog { registry, name } => {
            // A taken name is fatal; nothing has been served yet.
            let node = MicroblogNode::start(&config, &registry, &name).await?;
            node.run_until_shutdown(shutdown_rx).await
        }
    };

    match result {
        Ok(()) => {
            tracing::info!("server shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "server error");
            Err(e.into())
        }
    }
}

//! The publish, delete, and follow commands.

use std::sync::Arc;

use p2patter_client::{CallbackEndpoint, ClientConfig, FollowerSession, RegistryClient};
use p2patter_core::{Directory, MicroblogRef};

use crate::error::CliError;
use crate::formatter::Formatter;

/// Connect to the registry and check that it answers.
async fn registry(
    config: &ClientConfig,
    callbacks: Option<Arc<CallbackEndpoint>>,
) -> Result<RegistryClient, CliError> {
    let registry = RegistryClient::connect(config.clone(), callbacks)
        .await
        .map_err(|e| CliError::Connectivity(format!("no registry at {}: {}", config.address, e)))?;
    registry
        .ping()
        .await
        .map_err(|e| CliError::Connectivity(format!("no registry at {}: {}", config.address, e)))?;
    Ok(registry)
}

/// Post `text` to `owner`'s microblog and return the rendered message.
pub async fn publish(config: &ClientConfig, owner: &str, text: &str) -> Result<String, CliError> {
    let microblog = registry(config, None).await?.lookup(owner).await?;
    Ok(microblog.post_message(text).await?)
}

/// Remove message `serial` from `owner`'s microblog and return its rendered
/// form.
pub async fn delete(config: &ClientConfig, owner: &str, serial: u64) -> Result<String, CliError> {
    let microblog = registry(config, None).await?.lookup(owner).await?;
    Ok(microblog.delete_message(serial).await?)
}

/// Follow `names`, printing the initial snapshot and then every delivered
/// item, until ctrl-c.
pub async fn follow(
    config: &ClientConfig,
    names: &[String],
    callback_address: &str,
    formatter: &dyn Formatter,
) -> Result<(), CliError> {
    let callbacks = CallbackEndpoint::bind(callback_address)?;
    let registry = registry(config, Some(Arc::clone(&callbacks))).await?;
    let (session, mut feed) = FollowerSession::start(Arc::new(registry), names.iter().cloned()).await?;

    let pending = session.pending();
    if !pending.is_empty() {
        tracing::info!(names = ?pending, "waiting for owners to come online");
    }

    loop {
        tokio::select! {
            item = feed.recv() => match item {
                Some(item) => {
                    for entry in formatter.format_item(&item) {
                        println!("{}", entry);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    callbacks.shutdown();
    Ok(())
}

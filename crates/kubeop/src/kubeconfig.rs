//! Kubernetes client construction.

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

fn config_options(context: Option<&str>) -> KubeConfigOptions {
    KubeConfigOptions {
        context: context.map(str::to_string),
        ..KubeConfigOptions::default()
    }
}

/// Read a kubeconfig path, which may be a list in `KUBECONFIG` form. Later
/// files fill in what earlier ones leave unset.
fn read_kubeconfig(paths: &Path) -> Result<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;
    for path in std::env::split_paths(paths).filter(|p| !p.as_os_str().is_empty()) {
        debug!(path = %path.display(), "Reading kubeconfig");
        let next = Kubeconfig::read_from(&path)
            .with_context(|| format!("Failed to read kubeconfig from {}", path.display()))?;
        merged = Some(match merged {
            Some(current) => current
                .merge(next)
                .with_context(|| format!("Failed to merge kubeconfig {}", path.display()))?,
            None => next,
        });
    }
    merged.with_context(|| format!("No kubeconfig files in '{}'", paths.display()))
}

/// Build a client from an explicit kubeconfig and context, falling back to
/// the usual discovery (in-cluster or `~/.kube/config`).
///
/// # Errors
///
/// Returns an error if the kubeconfig cannot be read or the client cannot be
/// configured.
pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let options = config_options(context);

    let config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), ?context, "Loading kubeconfig");
            let kubeconfig = read_kubeconfig(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("Failed to create Kubernetes config from kubeconfig")?
        }
        None if context.is_some() => Config::from_kubeconfig(&options)
            .await
            .context("Failed to load kubeconfig context")?,
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes config")?,
    };

    Client::try_from(config).context("Failed to create Kubernetes client")
}

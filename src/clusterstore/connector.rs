//! Credential loading and client construction for one application cluster

use crate::crd::{Cluster, APP_LABEL, SKIP_TLS_VERIFY_ANNOTATION};
use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Config, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const TLS_CA_KEY: &str = "tls.ca";

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cluster {cluster}: credentials secret {namespace}/{cluster} not found")]
    SecretNotFound { cluster: String, namespace: String },

    #[error("cluster {cluster}: secret has no {key:?} entry")]
    MissingCredential { cluster: String, key: &'static str },

    #[error("cluster {cluster}: failed to read credentials: {source}")]
    SecretLookup {
        cluster: String,
        #[source]
        source: StoreError,
    },

    #[error("cluster {cluster}: failed to render kubeconfig: {source}")]
    RenderKubeconfig {
        cluster: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cluster {cluster}: invalid client configuration: {source}")]
    Kubeconfig {
        cluster: String,
        #[source]
        source: KubeconfigError,
    },

    #[error("cluster {cluster}: failed to build client: {source}")]
    Client {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("cluster {cluster}: API server unreachable: {source}")]
    RemoteUnreachable {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("cluster {cluster}: timed out after {timeout:?} waiting for the API server")]
    Timeout { cluster: String, timeout: Duration },

    #[error("cluster {cluster}: cache did not sync within {timeout:?}")]
    CacheSync { cluster: String, timeout: Duration },
}

/// Aborts the cache's watch task once the last client clone is dropped
#[derive(Debug)]
struct CacheGuard(JoinHandle<()>);

impl Drop for CacheGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A ready client for one application cluster plus its workload cache
///
/// Cheap to clone. The cache lives as long as any clone does.
#[derive(Clone)]
pub struct ClusterClient {
    name: String,
    client: Client,
    deployments: Store<Deployment>,
    _cache: Option<Arc<CacheGuard>>,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("name", &self.name)
            .field("cached_deployments", &self.deployments.state().len())
            .finish()
    }
}

impl ClusterClient {
    /// Wrap a client whose cache is fed elsewhere (or not at all)
    pub fn new(name: impl Into<String>, client: Client, deployments: Store<Deployment>) -> Self {
        Self {
            name: name.into(),
            client,
            deployments,
            _cache: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Release workloads (`Deployment`s labeled with the app label) seen in this cluster
    pub fn deployments(&self) -> &Store<Deployment> {
        &self.deployments
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub fn new_mock(name: &str) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut config = kube::Config::new("https://localhost:8080".parse().unwrap());
        config.default_namespace = "default".to_string();
        config.accept_invalid_certs = true;
        let client = Client::try_from(config).unwrap();

        let (deployments, _writer) = reflector::store::<Deployment>();
        Self::new(name, client, deployments)
    }
}

/// Produces a ready `ClusterClient` for a Cluster, or the reason it cannot
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, cluster: &Cluster) -> Result<ClusterClient, ConnectError>;
}

/// PEM material read from a cluster's credentials Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
    /// `None` means the system trust store is used
    pub ca: Option<Vec<u8>>,
}

impl Credentials {
    pub fn from_secret(cluster: &str, secret: &Secret) -> Result<Self, ConnectError> {
        let data = secret.data.clone().unwrap_or_default();
        let field = |key: &'static str| data.get(key).map(|b| b.0.clone()).filter(|b| !b.is_empty());

        let cert = field(TLS_CERT_KEY).ok_or_else(|| ConnectError::MissingCredential {
            cluster: cluster.to_string(),
            key: TLS_CERT_KEY,
        })?;
        let key = field(TLS_KEY_KEY).ok_or_else(|| ConnectError::MissingCredential {
            cluster: cluster.to_string(),
            key: TLS_KEY_KEY,
        })?;

        Ok(Self {
            cert,
            key,
            ca: field(TLS_CA_KEY),
        })
    }
}

/// Read the skip-verify annotation from the Cluster, then from its Secret
///
/// Values that do not parse as a boolean are ignored.
pub fn skip_tls_verify(cluster: &Cluster, secret: Option<&Secret>) -> bool {
    let name = cluster.name_any();
    let sources = [
        ("Cluster", cluster.annotations().get(SKIP_TLS_VERIFY_ANNOTATION)),
        (
            "Secret",
            secret.and_then(|s| s.annotations().get(SKIP_TLS_VERIFY_ANNOTATION)),
        ),
    ];

    for (source, value) in sources {
        let Some(raw) = value else { continue };
        match parse_bool(raw) {
            Some(skip) => return skip,
            None => warn!(
                cluster = %name,
                source,
                value = %raw,
                "Ignoring unparseable TLS skip-verify annotation"
            ),
        }
    }
    false
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Single-context kubeconfig for one cluster
pub fn build_kubeconfig(
    cluster: &Cluster,
    credentials: &Credentials,
    insecure: bool,
) -> Result<Kubeconfig, serde_json::Error> {
    let name = cluster.name_any();

    let mut endpoint = serde_json::json!({ "server": cluster.spec.api_master });
    if insecure {
        endpoint["insecure-skip-tls-verify"] = serde_json::Value::Bool(true);
    } else if let Some(ca) = &credentials.ca {
        endpoint["certificate-authority-data"] = STANDARD.encode(ca).into();
    }

    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": name, "cluster": endpoint }],
        "users": [{
            "name": name,
            "user": {
                "client-certificate-data": STANDARD.encode(&credentials.cert),
                "client-key-data": STANDARD.encode(&credentials.key),
            }
        }],
        "contexts": [{ "name": name, "context": { "cluster": name, "user": name } }],
        "current-context": name,
    }))
}

/// Connects to clusters using credentials from the management cluster
pub struct KubeConnector {
    secrets: Arc<dyn ObjectStore<Secret>>,
    secrets_namespace: String,
    client_timeout: Duration,
    cache_sync_timeout: Duration,
}

impl KubeConnector {
    pub fn new(
        secrets: Arc<dyn ObjectStore<Secret>>,
        secrets_namespace: impl Into<String>,
        client_timeout: Duration,
        cache_sync_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            secrets_namespace: secrets_namespace.into(),
            client_timeout,
            cache_sync_timeout,
        }
    }

    async fn load_secret(&self, cluster: &str) -> Result<Secret, ConnectError> {
        self.secrets
            .get(&self.secrets_namespace, cluster)
            .await
            .map_err(|source| ConnectError::SecretLookup {
                cluster: cluster.to_string(),
                source,
            })?
            .ok_or_else(|| ConnectError::SecretNotFound {
                cluster: cluster.to_string(),
                namespace: self.secrets_namespace.clone(),
            })
    }

    async fn start_cache(&self, name: &str, client: &Client) -> Result<ClusterClient, ConnectError> {
        let (reader, writer) = reflector::store::<Deployment>();
        let api: Api<Deployment> = Api::all(client.clone());
        let stream = watcher(api, watcher::Config::default().labels(APP_LABEL))
            .default_backoff()
            .reflect(writer)
            .applied_objects();

        let cluster = name.to_string();
        let task = tokio::spawn(async move {
            stream
                .for_each(|event| {
                    if let Err(e) = event {
                        debug!(cluster = %cluster, error = %e, "Workload cache watch error");
                    }
                    futures::future::ready(())
                })
                .await;
        });
        let guard = Arc::new(CacheGuard(task));

        match tokio::time::timeout(self.cache_sync_timeout, reader.wait_until_ready()).await {
            Ok(Ok(())) => Ok(ClusterClient {
                name: name.to_string(),
                client: client.clone(),
                deployments: reader,
                _cache: Some(guard),
            }),
            // Dropping the guard stops the watch
            _ => Err(ConnectError::CacheSync {
                cluster: name.to_string(),
                timeout: self.cache_sync_timeout,
            }),
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, cluster: &Cluster) -> Result<ClusterClient, ConnectError> {
        let name = cluster.name_any();
        let secret = self.load_secret(&name).await?;
        let credentials = Credentials::from_secret(&name, &secret)?;

        let insecure = skip_tls_verify(cluster, Some(&secret));
        if insecure {
            warn!(
                cluster = %name,
                "TLS verification disabled for cluster by annotation"
            );
        }

        let kubeconfig = build_kubeconfig(cluster, &credentials, insecure).map_err(|source| {
            ConnectError::RenderKubeconfig {
                cluster: name.clone(),
                source,
            }
        })?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|source| ConnectError::Kubeconfig {
                cluster: name.clone(),
                source,
            })?;
        config.connect_timeout = Some(self.client_timeout);
        config.read_timeout = Some(self.client_timeout);

        let client = Client::try_from(config).map_err(|source| ConnectError::Client {
            cluster: name.clone(),
            source,
        })?;

        match tokio::time::timeout(self.client_timeout, client.apiserver_version()).await {
            Ok(Ok(version)) => {
                debug!(cluster = %name, version = %version.git_version, "API server reachable");
            }
            Ok(Err(source)) => {
                return Err(ConnectError::RemoteUnreachable {
                    cluster: name,
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    cluster: name,
                    timeout: self.client_timeout,
                })
            }
        }

        let ready = self.start_cache(&name, &client).await?;
        info!(cluster = %name, server = %cluster.spec.api_master, "Cluster client ready");
        Ok(ready)
    }
}

#[cfg(test)]
#[path = "connector_test.rs"]
mod tests;

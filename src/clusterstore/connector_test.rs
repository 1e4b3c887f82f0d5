#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity
#![allow(clippy::expect_used)] // Tests can use expect for better error messages

use super::*;
use crate::crd::ClusterSpec;
use crate::store::MemoryStore;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

fn cluster(name: &str) -> Cluster {
    Cluster::new(
        name,
        ClusterSpec {
            api_master: format!("https://{name}.example.com:6443"),
            region: "eu-west".to_string(),
            ..Default::default()
        },
    )
}

fn secret(name: &str, entries: &[(&str, &str)]) -> Secret {
    let data: BTreeMap<String, ByteString> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect();
    Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("shipper-system".to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

fn annotate<K: kube::Resource>(obj: &mut K, value: &str) {
    obj.meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(SKIP_TLS_VERIFY_ANNOTATION.to_string(), value.to_string());
}

#[test]
fn test_credentials_with_optional_ca() {
    let with_ca = secret(
        "kube-a",
        &[("tls.crt", "CERT"), ("tls.key", "KEY"), ("tls.ca", "CA")],
    );
    let without_ca = secret("kube-a", &[("tls.crt", "CERT"), ("tls.key", "KEY")]);

    let creds = Credentials::from_secret("kube-a", &with_ca).unwrap();
    assert_eq!(creds.cert, b"CERT");
    assert_eq!(creds.ca.as_deref(), Some(&b"CA"[..]));

    let creds = Credentials::from_secret("kube-a", &without_ca).unwrap();
    assert_eq!(creds.ca, None, "absent CA falls back to the system trust store");
}

#[test]
fn test_credentials_require_cert_and_key() {
    let no_key = secret("kube-a", &[("tls.crt", "CERT")]);

    let err = Credentials::from_secret("kube-a", &no_key).unwrap_err();

    assert!(
        matches!(err, ConnectError::MissingCredential { key: "tls.key", .. }),
        "got {err:?}"
    );
}

#[test]
fn test_skip_tls_verify_defaults_to_false() {
    assert!(!skip_tls_verify(&cluster("kube-a"), None));
}

#[test]
fn test_skip_tls_verify_cluster_annotation_wins() {
    let mut c = cluster("kube-a");
    annotate(&mut c, "false");
    let mut s = secret("kube-a", &[]);
    annotate(&mut s, "true");

    assert!(!skip_tls_verify(&c, Some(&s)));
}

#[test]
fn test_skip_tls_verify_from_secret_annotation() {
    let mut s = secret("kube-a", &[]);
    annotate(&mut s, "True");

    assert!(skip_tls_verify(&cluster("kube-a"), Some(&s)));
}

#[test]
fn test_unparseable_skip_tls_verify_is_ignored() {
    let mut c = cluster("kube-a");
    annotate(&mut c, "yes please");

    assert!(!skip_tls_verify(&c, None));
}

#[test]
fn test_kubeconfig_carries_ca_and_client_cert() {
    let creds = Credentials {
        cert: b"CERT".to_vec(),
        key: b"KEY".to_vec(),
        ca: Some(b"CA".to_vec()),
    };

    let kubeconfig = build_kubeconfig(&cluster("kube-a"), &creds, false).unwrap();

    assert_eq!(kubeconfig.current_context.as_deref(), Some("kube-a"));
    let endpoint = kubeconfig.clusters[0].cluster.as_ref().unwrap();
    assert_eq!(
        endpoint.server.as_deref(),
        Some("https://kube-a.example.com:6443")
    );
    assert_eq!(
        endpoint.certificate_authority_data.as_deref(),
        Some(STANDARD.encode("CA").as_str())
    );
    assert_ne!(endpoint.insecure_skip_tls_verify, Some(true));

    let user = kubeconfig.auth_infos[0].auth_info.as_ref().unwrap();
    assert_eq!(
        user.client_certificate_data.as_deref(),
        Some(STANDARD.encode("CERT").as_str())
    );
}

#[test]
fn test_insecure_kubeconfig_drops_ca() {
    let creds = Credentials {
        cert: b"CERT".to_vec(),
        key: b"KEY".to_vec(),
        ca: Some(b"CA".to_vec()),
    };

    let kubeconfig = build_kubeconfig(&cluster("kube-a"), &creds, true).unwrap();

    let endpoint = kubeconfig.clusters[0].cluster.as_ref().unwrap();
    assert_eq!(endpoint.insecure_skip_tls_verify, Some(true));
    assert_eq!(endpoint.certificate_authority_data, None);
}

#[tokio::test]
async fn test_connect_without_secret_fails() {
    let secrets = Arc::new(MemoryStore::<Secret>::new());
    let connector = KubeConnector::new(
        secrets,
        "shipper-system",
        Duration::from_secs(1),
        Duration::from_secs(1),
    );

    let err = connector.connect(&cluster("kube-a")).await.unwrap_err();

    assert!(
        matches!(err, ConnectError::SecretNotFound { ref cluster, .. } if cluster == "kube-a"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_connect_with_incomplete_secret_fails() {
    let secrets = Arc::new(MemoryStore::<Secret>::new());
    secrets
        .create("shipper-system", &secret("kube-a", &[("tls.key", "KEY")]))
        .await
        .unwrap();
    let connector = KubeConnector::new(
        secrets,
        "shipper-system",
        Duration::from_secs(1),
        Duration::from_secs(1),
    );

    let err = connector.connect(&cluster("kube-a")).await.unwrap_err();

    assert!(
        matches!(err, ConnectError::MissingCredential { key: "tls.crt", .. }),
        "got {err:?}"
    );
}

//! Warden HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use warden_common::store::GeneratorStateStore;
use warden_lifecycle::CredentialLedger;
use warden_trust::TrustRegistry;

use crate::auth::{AuthRequest, AuthenticatorRegistry};
use crate::cert::{load_tls_config, ClientCertChain};
use crate::error::Error;
use crate::generators::Generator;
use crate::handlers::{generate_secret, read_secret, revoke_credentials_of, revoke_self};
use crate::secret_store::SecretStoreClient;

/// Largest request body buffered for authentication
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM
    pub cert_pem: String,
    /// TLS private key PEM
    pub key_pem: String,
    /// SPIFFE trust bundle PEM; client certificates are only requested when set
    pub spiffe_bundle_pem: Option<String>,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Authenticators, tried in registration order
    pub authenticators: Arc<AuthenticatorRegistry>,
    /// Policies and federation providers
    pub registry: Arc<TrustRegistry>,
    /// Record of issued credentials
    pub ledger: Arc<CredentialLedger>,
    /// Generator state persistence
    pub states: Arc<dyn GeneratorStateStore>,
    /// Generator collaborator
    pub generator: Arc<dyn Generator>,
    /// Secret store collaborator
    pub secrets: Arc<dyn SecretStoreClient>,
}

/// Authenticate every request and attach the resulting `AuthInfo`
///
/// The body is buffered because the OIDC authenticator reads a CA hint
/// from it; handlers see the same bytes afterwards.
async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let (mut parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::BadRequest(format!("failed to read body: {}", e)))?;

    let auth_request = AuthRequest {
        headers: parts.headers.clone(),
        body: body.clone(),
        client_certs: parts.extensions.get::<ClientCertChain>().cloned(),
    };
    let info = state.authenticators.authenticate(&auth_request).await?;
    parts.extensions.insert(info);

    Ok(next.run(Request::from_parts(parts, Body::from(body))).await)
}

/// Build the router; everything except `/healthz` requires authentication
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/secretstore/{secretStoreName}/secrets/{secretName}",
            post(read_secret),
        )
        .route(
            "/generators/{generatorNamespace}/{generatorKind}/{generatorName}",
            post(generate_secret).delete(revoke_self),
        )
        .route(
            "/generators/{generatorNamespace}/revoke",
            post(revoke_credentials_of),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve `app` over TLS on an already bound listener
///
/// Each connection's peer certificate chain is attached to its requests as
/// a [`ClientCertChain`] extension.
pub async fn serve(listener: TcpListener, tls: Arc<rustls::ServerConfig>, app: Router) {
    let acceptor = TlsAcceptor::from(tls);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let chain = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(ClientCertChain::from_peer);

            let service = app.map_request(move |mut request: Request<Incoming>| {
                if let Some(chain) = &chain {
                    request.extensions_mut().insert(chain.clone());
                }
                request
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                .await
            {
                debug!(peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Start the Warden server
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<(), Error> {
    let tls = load_tls_config(
        config.cert_pem.as_bytes(),
        config.key_pem.as_bytes(),
        config.spiffe_bundle_pem.as_deref().map(str::as_bytes),
    )?;

    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {}: {}", config.addr, e)))?;

    info!(
        addr = %config.addr,
        authenticators = ?state.authenticators.names(),
        "Starting warden server"
    );
    serve(listener, tls, router(state)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use rustls::pki_types::pem::PemObject;
    use rustls::pki_types::{PrivateKeyDer, ServerName};
    use rustls::RootCertStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;

    use warden_common::crd::{
        identity_name, AuthMethod, AuthorizationSpec, FederationKind, FederationRef, GeneratorRef,
        GeneratorStateScope, Subject, WorkloadKind,
    };
    use warden_common::store::memory::InMemoryStore;
    use warden_common::store::IdentityStore;
    use warden_common::OWNER_LABEL;

    use crate::auth::oidc_fixtures::{
        mint_token, oidc_policy, pod_claims, spawn_jwks_server, trusting_registry, KID, SUBJECT,
    };
    use crate::auth::spiffe_fixtures::WORKLOAD_ID;
    use crate::auth::{
        AuthInfo, Authenticator, KubeAttributes, MockAuthenticator, ObjectIdentity,
        OidcAuthenticator, SpiffeAuthenticator,
    };
    use crate::cert::parse_certificates;
    use crate::cert::tests::TestPki;
    use crate::generators::{Generated, MockGenerator, OwnerAttributes, Resource};
    use crate::secret_store::{InMemorySecretStore, MockSecretStoreClient};

    struct Harness {
        state: AppState,
        store: Arc<InMemoryStore>,
    }

    fn harness(
        authenticator: Arc<dyn Authenticator>,
        registry: Arc<TrustRegistry>,
        generator: Arc<dyn Generator>,
        secrets: Arc<dyn SecretStoreClient>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState {
            authenticators: Arc::new(AuthenticatorRegistry::new().register("test", authenticator)),
            registry,
            ledger: Arc::new(CredentialLedger::new(store.clone())),
            states: store.clone(),
            generator,
            secrets,
        };
        Harness { state, store }
    }

    fn vault_generator() -> MockGenerator {
        let mut generator = MockGenerator::new();
        generator.expect_generate().returning(|_, _, _| {
            Ok(Generated {
                data: BTreeMap::from([("token".to_string(), "abc".to_string())]),
                state: BTreeMap::from([("lease".to_string(), "l1".to_string())]),
            })
        });
        generator
    }

    fn g1_policy(issuer: &str) -> AuthorizationSpec {
        AuthorizationSpec {
            allowed_generators: vec![GeneratorRef::new("g1", "Vault", "ns2")],
            allowed_cluster_secret_stores: vec!["vault".into()],
            allowed_generator_states: vec![GeneratorStateScope {
                namespace: "ns2".into(),
            }],
            ..oidc_policy(issuer)
        }
    }

    fn fixed_identity() -> MockAuthenticator {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_authenticate().returning(|_| {
            Ok(AuthInfo {
                method: AuthMethod::Oidc,
                provider: "https://issuer".into(),
                subject: SUBJECT.into(),
                kube_attributes: Some(KubeAttributes {
                    namespace: "ns1".into(),
                    service_account: Some(ObjectIdentity {
                        name: "app".into(),
                        uid: "sa-uid".into(),
                    }),
                    pod: Some(ObjectIdentity {
                        name: "app-0".into(),
                        uid: "pod-uid".into(),
                    }),
                }),
            })
        });
        authenticator
    }

    fn registry_for_fixed_identity() -> Arc<TrustRegistry> {
        let registry = Arc::new(TrustRegistry::new());
        registry.add_policy("https://issuer", "policy", g1_policy("https://issuer"));
        registry
    }

    async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()));
        (status, value)
    }

    // ==========================================================================
    // Story: A workload generates a credential with its projected token
    // ==========================================================================

    #[tokio::test]
    async fn oidc_workload_generates_vault_credential() {
        let addr = spawn_jwks_server().await;
        let issuer = format!("http://{}", addr);
        let registry = trusting_registry(&issuer, g1_policy(&issuer));
        let Harness { state, store } = harness(
            Arc::new(OidcAuthenticator::new(registry.clone(), vec![])),
            registry,
            Arc::new(vault_generator()),
            Arc::new(MockSecretStoreClient::new()),
        );
        let token = mint_token(&issuer, KID, pod_claims());

        let (status, body) =
            send(&state, Method::POST, "/generators/ns2/Vault/g1", Some(&token), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"token": "abc"}));

        let states = store.generator_states_in("ns2");
        assert_eq!(states.len(), 1);
        let labels = states[0].metadata.labels.clone().unwrap();
        assert_eq!(labels[OWNER_LABEL], "app-0");
        assert_eq!(states[0].spec.state["lease"], "l1");
        // Workload lives in ns1, so no cross-namespace owner reference
        assert!(states[0].metadata.owner_references.is_none());

        let identity = IdentityStore::get(store.as_ref(), &identity_name(SUBJECT))
            .await
            .unwrap();
        assert_eq!(identity.spec.provider, issuer);
        assert_eq!(identity.spec.credentials.len(), 1);
        let credential = &identity.spec.credentials[0];
        assert_eq!(credential.source_ref.kind, "Vault");
        assert_eq!(
            credential.state_ref.as_ref().unwrap().name,
            states[0].metadata.name.clone().unwrap()
        );
        let binding = credential.workload_binding.as_ref().unwrap();
        assert_eq!(binding.kind, WorkloadKind::Pod);
        assert_eq!(binding.uid, "pod-uid");
    }

    #[tokio::test]
    async fn generator_receives_the_requesting_pod_as_resource() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_authenticate().returning(|_| {
            Ok(AuthInfo {
                method: AuthMethod::Oidc,
                provider: "https://iss".into(),
                subject: SUBJECT.into(),
                kube_attributes: Some(KubeAttributes {
                    namespace: "ns".into(),
                    service_account: Some(ObjectIdentity {
                        name: "sa".into(),
                        uid: "sa-u".into(),
                    }),
                    pod: Some(ObjectIdentity {
                        name: "p1".into(),
                        uid: "u1".into(),
                    }),
                }),
            })
        });

        let expected = Resource {
            name: "g1".into(),
            owner: "p1".into(),
            owner_attributes: OwnerAttributes {
                namespace: "ns".into(),
                issuer: "https://iss".into(),
                service_account_uid: "sa-u".into(),
                service_account_name: "sa".into(),
                pod_uid: Some("u1".into()),
            },
            auth_method: AuthMethod::Oidc,
        };
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(move |generator, namespace, resource| {
                *generator == GeneratorRef::new("g1", "Vault", "ns2")
                    && namespace == "ns2"
                    && *resource == expected
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(Generated {
                    data: BTreeMap::from([("token".to_string(), "abc".to_string())]),
                    state: BTreeMap::new(),
                })
            });

        let registry = Arc::new(TrustRegistry::new());
        registry.add_policy("https://iss", "policy", g1_policy("https://iss"));
        let Harness { state, store } = harness(
            Arc::new(authenticator),
            registry,
            Arc::new(generator),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, body) = send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"token": "abc"}));

        let states = store.generator_states_in("ns2");
        assert_eq!(states[0].metadata.labels.clone().unwrap()[OWNER_LABEL], "p1");
        let identity = IdentityStore::get(store.as_ref(), &identity_name(SUBJECT))
            .await
            .unwrap();
        let binding = identity.spec.credentials[0].workload_binding.clone().unwrap();
        assert_eq!((binding.name.as_str(), binding.uid.as_str()), ("p1", "u1"));
    }

    #[tokio::test]
    async fn regenerating_keeps_one_credential_per_slot() {
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(vault_generator()),
            Arc::new(MockSecretStoreClient::new()),
        );

        for _ in 0..3 {
            let (status, _) = send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
            assert_eq!(status, StatusCode::OK);
        }

        let identity = IdentityStore::get(store.as_ref(), &identity_name(SUBJECT))
            .await
            .unwrap();
        assert_eq!(identity.spec.credentials.len(), 1);
        assert_eq!(store.generator_states_in("ns2").len(), 3);
    }

    // ==========================================================================
    // Story: Requests outside the allow-list never reach collaborators
    // ==========================================================================

    #[tokio::test]
    async fn unlisted_generator_is_not_found() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().never();
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(generator),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, _) = send(&state, Method::POST, "/generators/ns2/Vault/g2", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, Method::POST, "/generators/ns3/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(store.generator_states_in("ns2").is_empty());
    }

    #[tokio::test]
    async fn unlisted_secret_store_is_not_found() {
        let mut secrets = MockSecretStoreClient::new();
        secrets.expect_get_secret().never();
        let Harness { state, .. } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(MockGenerator::new()),
            Arc::new(secrets),
        );

        let (status, _) =
            send(&state, Method::POST, "/secretstore/aws/secrets/db", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn untrusted_issuer_is_not_found() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().never();
        let Harness { state, .. } = harness(
            Arc::new(fixed_identity()),
            Arc::new(TrustRegistry::new()),
            Arc::new(generator),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, _) = send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ==========================================================================
    // Story: Authentication failures are 401 with the last error
    // ==========================================================================

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let registry = registry_for_fixed_identity();
        let Harness { state, .. } = harness(
            Arc::new(OidcAuthenticator::new(registry.clone(), vec![])),
            registry,
            Arc::new(MockGenerator::new()),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, body) =
            send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!("missing bearer token"));
    }

    #[tokio::test]
    async fn healthz_needs_no_authentication() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_authenticate().never();
        let Harness { state, .. } = harness(
            Arc::new(authenticator),
            Arc::new(TrustRegistry::new()),
            Arc::new(MockGenerator::new()),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, body) = send(&state, Method::GET, "/healthz", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!("ok"));
    }

    // ==========================================================================
    // Story: Missing workload coordinates and collaborator errors are 400
    // ==========================================================================

    #[tokio::test]
    async fn identity_without_kube_attributes_is_bad_request() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_authenticate().returning(|_| {
            Ok(AuthInfo {
                method: AuthMethod::Oidc,
                provider: "https://issuer".into(),
                subject: SUBJECT.into(),
                kube_attributes: None,
            })
        });
        let Harness { state, .. } = harness(
            Arc::new(authenticator),
            registry_for_fixed_identity(),
            Arc::new(MockGenerator::new()),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, body) =
            send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!("missing kubernetes attributes"));
    }

    #[tokio::test]
    async fn generator_errors_are_passed_through() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().returning(|_, _, _| {
            Err(crate::generators::GeneratorError::Failed("vault sealed".into()))
        });
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(generator),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, body) =
            send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!("vault sealed"));
        assert!(IdentityStore::list(store.as_ref()).await.unwrap().is_empty());
    }

    // ==========================================================================
    // Story: Secrets are read from allowed stores
    // ==========================================================================

    #[tokio::test]
    async fn allowed_store_returns_the_secret_string() {
        let secrets = InMemorySecretStore::new();
        secrets.insert("vault", "db", "s3cret");
        let Harness { state, .. } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(MockGenerator::new()),
            secrets.shared(),
        );

        let (status, body) =
            send(&state, Method::POST, "/secretstore/vault/secrets/db", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!("s3cret"));

        let (status, _) =
            send(&state, Method::POST, "/secretstore/vault/secrets/other", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ==========================================================================
    // Story: Credentials are revoked by label
    // ==========================================================================

    #[tokio::test]
    async fn workload_revokes_its_own_states() {
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(vault_generator()),
            Arc::new(MockSecretStoreClient::new()),
        );
        send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(store.generator_states_in("ns2").len(), 1);

        let (status, body) =
            send(&state, Method::DELETE, "/generators/ns2/Vault/g1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!("GeneratorState deleted"));
        assert!(store.generator_states_in("ns2").is_empty());
    }

    #[tokio::test]
    async fn credentials_of_another_owner_are_revoked() {
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(vault_generator()),
            Arc::new(MockSecretStoreClient::new()),
        );
        send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;

        let (status, _) = send(
            &state,
            Method::POST,
            "/generators/ns2/revoke",
            None,
            Some(serde_json::json!({"owner": "someone-else", "namespace": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.generator_states_in("ns2").len(), 1);

        let (status, body) = send(
            &state,
            Method::POST,
            "/generators/ns1/revoke",
            None,
            Some(serde_json::json!({"owner": "app-0", "namespace": "ns2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!("GeneratorState deleted"));
        assert!(store.generator_states_in("ns2").is_empty());
    }

    #[tokio::test]
    async fn revocation_outside_allowed_namespaces_is_not_found() {
        let Harness { state, .. } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(MockGenerator::new()),
            Arc::new(MockSecretStoreClient::new()),
        );

        let (status, _) = send(
            &state,
            Method::POST,
            "/generators/ns9/revoke",
            None,
            Some(serde_json::json!({"owner": "app-0", "namespace": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &state,
            Method::POST,
            "/generators/ns2/revoke",
            None,
            Some(serde_json::json!({"namespace": "ns2"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!("missing owner"));
    }

    async fn send_raw(
        state: &AppState,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> (StatusCode, axum::body::Bytes) {
        let mut builder = axum::http::Request::builder().method(Method::POST).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let response = router(state.clone())
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    #[tokio::test]
    async fn malformed_revoke_bodies_are_bad_requests() {
        let Harness { state, store } = harness(
            Arc::new(fixed_identity()),
            registry_for_fixed_identity(),
            Arc::new(vault_generator()),
            Arc::new(MockSecretStoreClient::new()),
        );
        send(&state, Method::POST, "/generators/ns2/Vault/g1", None, None).await;

        let cases = [
            (None, r#"{"owner": "app-0"}"#),
            (Some("application/json"), r#"{"owner": 5}"#),
            (Some("application/json"), r#"{"owner": "#),
        ];
        for (content_type, body) in cases {
            let (status, bytes) =
                send_raw(&state, "/generators/ns2/revoke", content_type, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            let message: String = serde_json::from_slice(&bytes).unwrap();
            assert!(!message.is_empty());
        }
        assert_eq!(store.generator_states_in("ns2").len(), 1);
    }

    // ==========================================================================
    // Story: SPIFFE workloads authenticate over mutual TLS
    // ==========================================================================

    async fn tls_request(
        addr: SocketAddr,
        pki: &TestPki,
        client_identity: Option<&str>,
        request: &str,
    ) -> String {
        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(pki.ca_cert_pem.as_bytes()).unwrap() {
            roots.add(cert).unwrap();
        }
        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots);
        let config = match client_identity {
            Some(uri) => {
                let (cert_pem, key_pem) = pki.client_cert(uri);
                builder
                    .with_client_auth_cert(
                        parse_certificates(cert_pem.as_bytes()).unwrap(),
                        PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).unwrap(),
                    )
                    .unwrap()
            }
            None => builder.with_no_client_auth(),
        };

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut stream = TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        // The server may close without close_notify; the bytes read so far are enough
        let _ = stream.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn spiffe_client_certificate_reaches_the_authenticator() {
        let pki = TestPki::new();
        let registry = Arc::new(TrustRegistry::new());
        registry.add_policy(
            "cluster.local",
            "spiffe-policy",
            AuthorizationSpec {
                federation_ref: FederationRef::new(FederationKind::SpiffeFederation, "mesh"),
                subject: Subject::spiffe(WORKLOAD_ID),
                allowed_cluster_secret_stores: vec!["vault".into()],
                allowed_generators: vec![],
                allowed_generator_states: vec![],
            },
        );
        let secrets = InMemorySecretStore::new();
        secrets.insert("vault", "db", "s3cret");
        let Harness { state, .. } = harness(
            Arc::new(SpiffeAuthenticator::new()),
            registry,
            Arc::new(MockGenerator::new()),
            secrets.shared(),
        );

        let tls = load_tls_config(
            pki.server_cert_pem.as_bytes(),
            pki.server_key_pem.as_bytes(),
            Some(pki.ca_cert_pem.as_bytes()),
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, tls, router(state)));

        let request = "POST /secretstore/vault/secrets/db HTTP/1.1\r\n\
                       Host: localhost\r\n\
                       Content-Length: 0\r\n\
                       Connection: close\r\n\r\n";

        let response = tls_request(addr, &pki, Some(WORKLOAD_ID), request).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains("\"s3cret\""), "{}", response);

        let response = tls_request(addr, &pki, None, request).await;
        assert!(response.starts_with("HTTP/1.1 401"), "{}", response);
        assert!(response.contains("no client certificate"), "{}", response);
    }
}

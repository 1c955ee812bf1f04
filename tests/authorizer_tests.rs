//! End-to-end authorizer tests against mock JWKS endpoints.
//!
//! Tokens are minted with the RSA keys in `tests/fixtures/` and verified
//! through the real HTTP key source, cache, resolver and verifier.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode, get_current_timestamp};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenant_authorizer::Error;
use tenant_authorizer::authorizer::{Authorizer, AuthorizerResponse, Invocation};
use tenant_authorizer::config::{Config, DenyMode, DirectoryConfig, DirectoryKind};
use tenant_authorizer::directory::StaticDirectory;
use tenant_authorizer::policy::{AuthorizationDecision, Effect};

const POOL_A: &str = "us-east-1_PoolA";
const POOL_B: &str = "us-east-1_PoolB";
const KID_A: &str = "pool-a-key-1";
const KID_B: &str = "pool-b-key-1";
const TENANT: &str = "77b2be20-f30a-40c6-bfff-376112832f95";
const METHOD_ARN: &str = "arn:aws:execute-api:us-east-1:123456789012:abcdef1234/prod/GET/products";
const RESOURCE: &str = "arn:aws:execute-api:us-east-1:123456789012:abcdef1234/prod/*/*";

const JWKS_A: &str = include_str!("fixtures/pool_a_jwks.json");
const JWKS_A_PADDED: &str = include_str!("fixtures/pool_a_jwks_sign_padded.json");
const JWKS_B: &str = include_str!("fixtures/pool_b_jwks.json");
const PEM_A: &[u8] = include_bytes!("fixtures/pool_a_private.pem");
const PEM_B: &[u8] = include_bytes!("fixtures/pool_b_private.pem");

// ============================================================================
// Helpers
// ============================================================================

fn jwks_path(pool: &str) -> String {
    format!("/{pool}/.well-known/jwks.json")
}

/// Serve `body` as `pool`'s JWKS, expecting exactly `calls` fetches.
async fn serve_jwks(server: &MockServer, pool: &str, body: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path(jwks_path(pool)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .expect(calls)
        .mount(server)
        .await;
}

fn config(server: &MockServer, deny_mode: DenyMode) -> Config {
    Config {
        region: "us-east-1".to_string(),
        issuer_base_url: server.uri(),
        deny_mode,
        fetch_timeout: Duration::from_millis(500),
        directory: DirectoryConfig {
            kind: DirectoryKind::Static,
            issuers: Vec::new(),
            page_size: 60,
            ..DirectoryConfig::default()
        },
        ..Config::default()
    }
}

fn authorizer(server: &MockServer, deny_mode: DenyMode) -> Authorizer {
    Authorizer::from_config(&config(server, deny_mode)).unwrap()
}

/// Authorizer whose cache was warmed with `pools`.
async fn warm_authorizer(server: &MockServer, pools: &[&str]) -> Authorizer {
    let authorizer = authorizer(server, DenyMode::Policy);
    let directory = StaticDirectory::new(pools.iter().map(ToString::to_string).collect());
    authorizer.cache().initialize(&directory).await;
    authorizer
}

fn claims(server: &MockServer, pool: &str, exp: u64) -> Value {
    json!({
        "sub": "5f1b7c1e-0000-4000-8000-000000000001",
        "iss": format!("{}/{pool}", server.uri()),
        "exp": exp,
        "token_use": "id",
        "cognito:username": "alice",
        "custom:tenant_id": TENANT,
    })
}

fn sign(claims: &Value, kid: &str, pem: &[u8]) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

fn in_one_hour() -> u64 {
    get_current_timestamp() + 3600
}

fn token_event(token: &str) -> Value {
    json!({
        "type": "TOKEN",
        "authorizationToken": format!("Bearer {token}"),
        "methodArn": METHOD_ARN,
    })
}

async fn decide(authorizer: &Authorizer, event: &Value) -> AuthorizationDecision {
    match authorizer.handle(event, &Invocation::default()).await.unwrap() {
        AuthorizerResponse::Decision(decision) => decision,
        AuthorizerResponse::Acknowledged {} => panic!("expected a decision"),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn warmup_ping_is_acknowledged_without_key_access() {
    // GIVEN: an issuer that must not be contacted
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 0).await;
    let authorizer = authorizer(&server, DenyMode::Policy);

    // WHEN: a warm-up ping arrives
    let response = authorizer
        .handle(&json!({"source": "warmup"}), &Invocation::default())
        .await
        .unwrap();

    // THEN: the benign empty response is returned and the cache is untouched
    assert_eq!(serde_json::to_value(&response).unwrap(), json!({}));
    assert_eq!(authorizer.cache().stats().issuers, 0);
}

#[tokio::test]
async fn valid_token_is_allowed_with_tenant_context() {
    // GIVEN: a warmed cache holding pool A's keys
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);

    // WHEN: the token is authorized
    let decision = decide(&authorizer, &token_event(&token)).await;

    // THEN: the stage is allowed and the tenant is forwarded
    assert_eq!(
        serde_json::to_value(&decision).unwrap(),
        json!({
            "principalId": "123456789012",
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "execute-api:Invoke",
                    "Effect": "Allow",
                    "Resource": [RESOURCE]
                }]
            },
            "context": {"TenantId": TENANT}
        })
    );
}

#[tokio::test]
async fn unlisted_pool_is_discovered_from_iss() {
    // GIVEN: pool B was created after cold start
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    serve_jwks(&server, POOL_B, JWKS_B, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_B, in_one_hour()), KID_B, PEM_B);

    // WHEN: the first pool B token arrives
    let decision = decide(&authorizer, &token_event(&token)).await;

    // THEN: its keys are fetched once and the request is allowed
    assert_eq!(decision.effect(), Effect::Allow);
    assert_eq!(decision.tenant_id(), Some(TENANT));
    assert_eq!(authorizer.cache().stats().issuers, 2);
}

#[tokio::test]
async fn unknown_issuer_with_404_is_denied() {
    // GIVEN: an issuer whose discovery endpoint answers 404
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(jwks_path("us-east-1_Gone")))
        .respond_with(ResponseTemplate::new(404).set_body_string("User pool does not exist"))
        .expect(1)
        .mount(&server)
        .await;
    let authorizer = authorizer(&server, DenyMode::Policy);
    let token = sign(&claims(&server, "us-east-1_Gone", in_one_hour()), KID_A, PEM_A);

    // WHEN: a token from that issuer is authorized
    let decision = decide(&authorizer, &token_event(&token)).await;

    // THEN: it is denied with an empty context
    assert_eq!(decision.effect(), Effect::Deny);
    assert_eq!(decision.principal_id, "123456789012");
    assert!(decision.context.is_empty());
    assert_eq!(authorizer.cache().stats().refresh_failures, 1);
}

#[tokio::test]
async fn missing_tenant_claim_is_denied() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let mut claims = claims(&server, POOL_A, in_one_hour());
    claims.as_object_mut().unwrap().remove("custom:tenant_id");
    let token = sign(&claims, KID_A, PEM_A);

    let err = authorizer.verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, Error::InvalidToken(ref reason) if reason.contains("tenant")));

    let decision = decide(&authorizer, &token_event(&token)).await;
    assert_eq!(decision.effect(), Effect::Deny);
}

#[tokio::test]
async fn empty_tenant_claim_is_denied() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let mut claims = claims(&server, POOL_A, in_one_hour());
    claims["custom:tenant_id"] = json!("");
    let token = sign(&claims, KID_A, PEM_A);

    let decision = decide(&authorizer, &token_event(&token)).await;

    assert_eq!(decision.effect(), Effect::Deny);
}

// ============================================================================
// Verification properties
// ============================================================================

#[tokio::test]
async fn expiry_is_checked_with_five_seconds_of_skew() {
    // GIVEN: a token that expires at T
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let expires_at = get_current_timestamp() - 60;
    let bearer = format!("Bearer {}", sign(&claims(&server, POOL_A, expires_at), KID_A, PEM_A));
    let verifier = authorizer.verifier();

    // THEN: it is accepted up to T + 5s
    let claims = verifier.verify_at(&bearer, expires_at + 5).await.unwrap();
    assert_eq!(claims.expires_at, expires_at);

    // AND: rejected from T + 6s on
    let err = verifier.verify_at(&bearer, expires_at + 6).await.unwrap_err();
    assert!(matches!(err, Error::InvalidToken(ref reason) if reason.contains("expired")));
}

#[tokio::test]
async fn verification_is_idempotent() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);

    let first = authorizer.verifier().verify(&token).await.unwrap();
    let second = authorizer.verifier().verify(&token).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.tenant_id, TENANT);
    assert_eq!(first.issuer, POOL_A);
    assert_eq!(first.username.as_deref(), Some("alice"));
    assert_eq!(authorizer.cache().stats().hits, 2);
}

#[tokio::test]
async fn unknown_kid_triggers_exactly_one_refresh() {
    // GIVEN: a warmed pool A (one fetch) and a token naming a kid it never published
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 2).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), "pool-a-key-2", PEM_A);

    // WHEN: it is verified
    let err = authorizer.verifier().verify(&token).await.unwrap_err();

    // THEN: the resolver refreshed once (second fetch) and gave up
    assert!(matches!(err, Error::UnknownKey { ref kid, .. } if kid == "pool-a-key-2"));
    assert_eq!(err.issuer(), Some(POOL_A));
}

#[tokio::test]
async fn rotated_key_is_picked_up_after_refresh() {
    // GIVEN: a cache warmed before pool A rotated in the sign-padded key set
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(jwks_path(POOL_A)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"keys":[]}"#, "application/json"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    serve_jwks(&server, POOL_A, JWKS_A_PADDED, 1).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);

    // WHEN: a token signed with the new key arrives
    let claims = authorizer.verifier().verify(&token).await.unwrap();

    // THEN: the 0x00-prefixed modulus verifies after the single refresh
    assert_eq!(claims.tenant_id, TENANT);
}

#[tokio::test]
async fn non_rsa_key_cannot_verify() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 2).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), "pool-a-ec", PEM_A);

    let decision = decide(&authorizer, &token_event(&token)).await;

    assert_eq!(decision.effect(), Effect::Deny);
    assert_eq!(authorizer.cache().get(POOL_A).unwrap().len(), 2);
}

#[tokio::test]
async fn signature_from_another_pool_is_rejected() {
    // GIVEN: a token claiming pool A's kid but signed with pool B's private key
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_B);

    let err = authorizer.verifier().verify(&token).await.unwrap_err();

    assert!(matches!(err, Error::InvalidToken(_)));
}

#[tokio::test]
async fn issuer_outside_base_url_is_never_fetched() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 0).await;
    let authorizer = authorizer(&server, DenyMode::Policy);
    let mut claims = claims(&server, POOL_A, in_one_hour());
    claims["iss"] = json!(format!("https://attacker.example.com/{POOL_A}"));
    let token = sign(&claims, KID_A, PEM_A);

    let err = authorizer.verifier().verify(&token).await.unwrap_err();

    assert!(matches!(err, Error::InvalidToken(ref reason) if reason.contains("untrusted issuer")));
}

#[tokio::test]
async fn token_without_iss_is_resolved_by_scanning_all_pools() {
    // GIVEN: two warmed pools and a legacy token without `iss`
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    serve_jwks(&server, POOL_B, JWKS_B, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A, POOL_B]).await;
    let mut claims = claims(&server, POOL_B, in_one_hour());
    claims.as_object_mut().unwrap().remove("iss");
    let token = sign(&claims, KID_B, PEM_B);

    // WHEN: it is verified
    let verified = authorizer.verifier().verify(&token).await.unwrap();

    // THEN: the key is found in pool B without extra fetches
    assert_eq!(verified.issuer, POOL_B);
}

// ============================================================================
// Failure signalling and deadlines
// ============================================================================

#[tokio::test]
async fn unauthorized_mode_fails_invocation() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = authorizer(&server, DenyMode::Unauthorized);
    let mut claims = claims(&server, POOL_A, in_one_hour());
    claims.as_object_mut().unwrap().remove("custom:tenant_id");
    let token = sign(&claims, KID_A, PEM_A);

    let err = authorizer
        .handle(&token_event(&token), &Invocation::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Unauthorized");
}

#[tokio::test]
async fn malformed_event_fails_invocation() {
    let server = MockServer::start().await;
    let authorizer = authorizer(&server, DenyMode::Policy);

    let err = authorizer
        .handle(&json!({"authorizationToken": "Bearer x"}), &Invocation::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedEvent(_)));
}

#[tokio::test]
async fn slow_discovery_times_out_and_denies() {
    // GIVEN: a JWKS endpoint slower than the fetch timeout
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(jwks_path(POOL_A)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(JWKS_A, "application/json")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let authorizer = authorizer(&server, DenyMode::Policy);
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);

    // WHEN: a request arrives
    let started = Instant::now();
    let decision = decide(&authorizer, &token_event(&token)).await;

    // THEN: it is denied well before the endpoint would have answered
    assert_eq!(decision.effect(), Effect::Deny);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn verification_is_abandoned_before_the_deadline() {
    // GIVEN: a generous fetch timeout but only 1.3s left in the invocation
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(jwks_path(POOL_A)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(JWKS_A, "application/json")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let config = Config {
        fetch_timeout: Duration::from_secs(10),
        ..config(&server, DenyMode::Policy)
    };
    let authorizer = Authorizer::from_config(&config).unwrap();
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);
    let invocation = Invocation {
        request_id: "req-deadline".to_string(),
        deadline: Some(Instant::now() + Duration::from_millis(1300)),
    };

    // WHEN: the request is handled
    let started = Instant::now();
    let response = authorizer.handle(&token_event(&token), &invocation).await.unwrap();

    // THEN: a deny is returned while the 1s slack is still available
    assert_eq!(response.decision().map(AuthorizationDecision::effect), Some(Effect::Deny));
    assert!(started.elapsed() < Duration::from_millis(1000));
}

// ============================================================================
// REQUEST authorizer and header helper
// ============================================================================

#[tokio::test]
async fn request_event_is_authorized_from_headers() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);
    let event = json!({
        "type": "REQUEST",
        "headers": {"authorization": format!("bearer {token}")},
        "requestContext": {"accountId": "123456789012", "apiId": "abcdef1234", "stage": "prod"}
    });

    let decision = decide(&authorizer, &event).await;

    assert_eq!(decision.effect(), Effect::Allow);
    assert_eq!(decision.policy_document.statement[0].resource, vec![RESOURCE.to_string()]);
    assert_eq!(decision.tenant_id(), Some(TENANT));
}

#[tokio::test]
async fn tenant_id_is_read_from_proxy_headers() {
    let server = MockServer::start().await;
    serve_jwks(&server, POOL_A, JWKS_A, 1).await;
    let authorizer = warm_authorizer(&server, &[POOL_A]).await;
    let token = sign(&claims(&server, POOL_A, in_one_hour()), KID_A, PEM_A);
    let headers = HashMap::from([("Authorization".to_string(), format!("Bearer {token}"))]);

    let tenant = authorizer.verifier().tenant_id_from_headers(&headers).await.unwrap();

    assert_eq!(tenant, TENANT);
}

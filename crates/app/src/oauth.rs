use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
    Form,
};
use axum_extra::extract::cookie::CookieJar;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use kick_calories_kick::{AuthorizeUrlParams, OAuthError};
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::error::FlowError;
use crate::pages;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::session::{session_cookie, session_id, PendingAuthorization};

const OAUTH_SCOPES: &[&str] = &["user:read", "channel:read", "events:subscribe", "chat:write"];
const CODE_VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManualCodeForm {
    #[serde(default)]
    pub code: Option<String>,
}

/// Starts a PKCE authorization for this browser and links to Kick.
///
/// Any pending authorization of the same session is replaced.
pub async fn start(State(state): State<AppState>, jar: CookieJar) -> Result<Response, ProblemResponse> {
    let now = state.now();
    let code_verifier = generate_code_verifier();
    let code_challenge = compute_code_challenge(&code_verifier);
    let state_value = generate_state();

    let authorize_url = state
        .oauth_client()
        .authorize_url(&AuthorizeUrlParams {
            state: &state_value,
            redirect_uri: state.redirect_uri(),
            code_challenge: &code_challenge,
            scopes: OAUTH_SCOPES,
        })
        .map_err(|err| {
            error!(stage = "oauth", error = %err, "failed to build authorize url");
            ProblemResponse::internal("failed to build Kick authorize URL")
        })?;

    let pending = PendingAuthorization {
        code_verifier,
        state: state_value,
    };

    let existing = match session_id(&jar) {
        Some(id) => state
            .sessions()
            .update(&id, now, |session| session.pending = Some(pending.clone()))
            .await
            .map(|_| id),
        None => None,
    };
    let id = match existing {
        Some(id) => id,
        None => {
            let id = state.sessions().create(now).await;
            state
                .sessions()
                .update(&id, now, |session| session.pending = Some(pending))
                .await;
            id
        }
    };

    info!(stage = "oauth", "authorization started");
    let jar = jar.add(session_cookie(id, state.secure_cookies()));
    let page = pages::render(&pages::AuthorizePage {
        authorize_url: authorize_url.as_str(),
    })?;
    Ok((jar, page).into_response())
}

/// Completes the authorization: verifies `state`, exchanges `code` and
/// stores the access token in the session.
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<Html<String>, FlowError> {
    let result = complete_authorization(&state, &jar, query).await;
    let label = match &result {
        Ok(()) => "success",
        Err(err) => err.problem_type(),
    };
    counter!("oauth_callbacks_total", "result" => label).increment(1);

    result?;
    Ok(pages::render(&pages::AuthorizedPage)?)
}

async fn complete_authorization(
    state: &AppState,
    jar: &CookieJar,
    query: CallbackQuery,
) -> Result<(), FlowError> {
    if let Some(error_code) = query.error {
        warn!(
            stage = "oauth",
            error = %error_code,
            description = query.error_description.as_deref(),
            "authorization denied by provider"
        );
        let detail = match query.error_description {
            Some(description) if !description.is_empty() => format!("{error_code}: {description}"),
            _ => error_code,
        };
        return Err(FlowError::AuthorizationDenied(detail));
    }

    let now = state.now();
    let Some(id) = session_id(jar) else {
        warn!(stage = "oauth", "callback without session cookie");
        return Err(FlowError::StateMismatch);
    };
    let returned_state = query.state.unwrap_or_default();
    let code = query.code.filter(|code| !code.is_empty());

    // State is compared before the code is inspected; a mismatch keeps the
    // pending authorization so the legitimate redirect can still complete.
    let pending = state
        .sessions()
        .update(&id, now, |session| {
            let state_matches = session
                .pending
                .as_ref()
                .is_some_and(|pending| !returned_state.is_empty() && pending.state == returned_state);
            if !state_matches {
                return Err(FlowError::StateMismatch);
            }
            if code.is_none() {
                return Err(FlowError::MissingCode);
            }
            session.pending.take().ok_or(FlowError::StateMismatch)
        })
        .await
        .unwrap_or(Err(FlowError::StateMismatch))
        .inspect_err(|err| warn!(stage = "oauth", error = %err, "callback rejected"))?;

    let Some(code) = code else {
        return Err(FlowError::MissingCode);
    };

    let token = state
        .oauth_client()
        .exchange_code(&code, &pending.code_verifier, state.redirect_uri())
        .await
        .map_err(|err| {
            warn!(stage = "oauth", error = %err, "failed to exchange authorization code");
            FlowError::TokenExchangeFailed(exchange_failure_detail(&err))
        })?;

    state
        .sessions()
        .update(&id, state.now(), |session| {
            session.access_token = Some(token.access_token);
        })
        .await
        .ok_or(FlowError::StateMismatch)?;

    info!(stage = "oauth", "authorization completed");
    Ok(())
}

/// Fallback for a code pasted into a form. Echoes the code without
/// exchanging it.
pub async fn manual_callback(Form(form): Form<ManualCodeForm>) -> Result<Html<String>, FlowError> {
    match form.code.filter(|code| !code.is_empty()) {
        Some(code) => {
            info!(stage = "oauth", "manual authorization code received");
            Ok(pages::render(&pages::ManualCodePage { code: &code })?)
        }
        None => Err(FlowError::MissingCode),
    }
}

fn exchange_failure_detail(err: &OAuthError) -> String {
    match err {
        OAuthError::Status { status, .. } => format!("token endpoint returned {status}"),
        OAuthError::Decode(_) => "token response did not contain an access token".to_string(),
        other => other.to_string(),
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn generate_code_verifier() -> String {
    random_token(CODE_VERIFIER_BYTES)
}

pub(crate) fn compute_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub(crate) fn generate_state() -> String {
    random_token(STATE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::test_support::{cookie_header, TestContext, REDIRECT_URI};

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn problem_type(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        body["type"].as_str().unwrap().to_string()
    }

    fn callback_request(uri: &str, session_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(id) = session_id {
            builder = builder.header(header::COOKIE, cookie_header(id));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn mock_token<'a>(context: &'a TestContext, verifier: &str, access_token: &str) -> httpmock::Mock<'a> {
        context.server().mock(|when, then| {
            when.method("POST")
                .path("/oauth/token")
                .body_contains("grant_type=authorization_code")
                .body_contains(format!("code_verifier={verifier}"));
            then.status(200)
                .header("content-type", "application/json")
                .body(json!({ "access_token": access_token }).to_string());
        })
    }

    #[test]
    fn verifier_is_43_url_safe_characters() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(verifier
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn challenge_is_base64url_sha256_of_verifier() {
        let verifier = generate_code_verifier();
        let challenge = compute_code_challenge(&verifier);
        let decoded = URL_SAFE_NO_PAD.decode(&challenge).expect("base64url");
        assert_eq!(decoded, Sha256::digest(verifier.as_bytes()).to_vec());
        assert!(!challenge.contains('='));
        assert_eq!(challenge, compute_code_challenge(&verifier));
    }

    #[test]
    fn challenge_matches_rfc7636_example() {
        assert_eq!(
            compute_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFXlFWL-c"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn state_is_random() {
        assert_ne!(generate_state(), generate_state());
    }

    #[tokio::test]
    async fn start_sets_cookie_and_links_to_kick() {
        let context = TestContext::new().await;
        let response = context
            .router()
            .oneshot(callback_request("/auth", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("set-cookie")
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("kc_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));

        let body = body_text(response).await;
        assert!(body.contains("https://id.kick.com/oauth/authorize?"));
        assert!(body.contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn start_replaces_pending_authorization_of_existing_session() {
        let context = TestContext::new().await;
        let id = context.session_with_pending("old-state", "old-verifier").await;

        let response = context
            .router()
            .oneshot(callback_request("/auth", Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let session = context
            .state
            .sessions()
            .get(&id, context.now)
            .await
            .expect("session");
        let pending = session.pending.expect("pending");
        assert_ne!(pending.state, "old-state");
        assert_eq!(pending.code_verifier.len(), 43);
    }

    #[tokio::test]
    async fn auth_then_callback_completes_flow() {
        let context = TestContext::with_mock().await;
        let response = context
            .router()
            .oneshot(callback_request("/auth", None))
            .await
            .unwrap();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let id = cookie
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix("kc_session="))
            .unwrap()
            .to_string();

        let pending = context
            .state
            .sessions()
            .get(&id, context.now)
            .await
            .unwrap()
            .pending
            .unwrap();
        let token_mock = mock_token(&context, &pending.code_verifier, "T");

        let response = context
            .router()
            .oneshot(callback_request(
                &format!("/callback?code=abc&state={}", pending.state),
                Some(&id),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        token_mock.assert();
        let session = context.state.sessions().get(&id, context.now).await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("T"));
        assert!(session.pending.is_none());
    }

    #[tokio::test]
    async fn callback_sends_pkce_form_and_stores_token() {
        let context = TestContext::with_mock().await;
        let id = context.session_with_pending("s1", "verifier-1").await;
        let token_mock = context.server().mock(|when, then| {
            when.method("POST")
                .path("/oauth/token")
                .body_contains("client_id=client")
                .body_contains("client_secret=secret")
                .body_contains("code=the-code")
                .body_contains("code_verifier=verifier-1")
                .body_contains(format!(
                    "redirect_uri={}",
                    url::form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>()
                ));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"T","token_type":"Bearer","expires_in":3600}"#);
        });

        let response = context
            .router()
            .oneshot(callback_request("/callback?code=the-code&state=s1", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("/setup"));
        token_mock.assert();
        let session = context.state.sessions().get(&id, context.now).await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn callback_with_wrong_state_is_rejected_and_keeps_pending() {
        let context = TestContext::with_mock().await;
        let id = context.session_with_pending("s1", "v1").await;
        let token_mock = mock_token(&context, "v1", "T");

        let response = context
            .router()
            .oneshot(callback_request("/callback?code=abc&state=other", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "state_mismatch");
        token_mock.assert_hits(0);

        let session = context.state.sessions().get(&id, context.now).await.unwrap();
        assert!(session.access_token.is_none());
        assert_eq!(session.pending.unwrap().state, "s1");
    }

    #[tokio::test]
    async fn state_is_checked_before_code() {
        let context = TestContext::new().await;
        let id = context.session_with_pending("s1", "v1").await;

        let response = context
            .router()
            .oneshot(callback_request("/callback?state=other", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "state_mismatch");
    }

    #[tokio::test]
    async fn callback_without_session_is_state_mismatch() {
        let context = TestContext::new().await;
        let response = context
            .router()
            .oneshot(callback_request("/callback?code=abc&state=s1", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "state_mismatch");
    }

    #[tokio::test]
    async fn callback_without_code_is_missing_code() {
        let context = TestContext::new().await;
        let id = context.session_with_pending("s1", "v1").await;

        let response = context
            .router()
            .oneshot(callback_request("/callback?state=s1&code=", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "missing_code");
        let session = context.state.sessions().get(&id, context.now).await.unwrap();
        assert!(session.pending.is_some());
    }

    #[tokio::test]
    async fn provider_error_is_authorization_denied() {
        let context = TestContext::new().await;
        let id = context.session_with_pending("s1", "v1").await;

        let response = context
            .router()
            .oneshot(callback_request(
                "/callback?error=access_denied&error_description=nope&state=s1",
                Some(&id),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "authorization_denied");
    }

    #[tokio::test]
    async fn token_endpoint_failure_is_token_exchange_failed() {
        let context = TestContext::with_mock().await;
        let id = context.session_with_pending("s1", "v1").await;
        context.server().mock(|when, then| {
            when.method("POST").path("/oauth/token");
            then.status(400).body(r#"{"error":"invalid_grant"}"#);
        });

        let response = context
            .router()
            .oneshot(callback_request("/callback?code=abc&state=s1", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "token_exchange_failed");
        let session = context.state.sessions().get(&id, context.now).await.unwrap();
        assert!(session.access_token.is_none());
    }

    #[tokio::test]
    async fn token_response_without_access_token_is_rejected() {
        let context = TestContext::with_mock().await;
        let id = context.session_with_pending("s1", "v1").await;
        context.server().mock(|when, then| {
            when.method("POST").path("/oauth/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"token_type":"Bearer"}"#);
        });

        let response = context
            .router()
            .oneshot(callback_request("/callback?code=abc&state=s1", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "token_exchange_failed");
    }

    #[tokio::test]
    async fn manual_callback_echoes_code() {
        let context = TestContext::new().await;
        let response = context
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("code=%3Cb%3Exyz"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let body = body_text(response).await;
        assert!(body.contains("<code>&lt;b&gt;xyz</code>"));
        assert!(!body.contains("<b>xyz"));
    }

    #[tokio::test]
    async fn manual_callback_without_code_is_missing_code() {
        let context = TestContext::new().await;
        let response = context
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem_type(response).await, "missing_code");
    }
}

use std::env;
use std::io;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::{Input, Password};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::http::{Api, RequestError};
use crate::session::{self, Session};

const PRIMARY_COOKIE: &str = "cztoken";
const SECONDARY_COOKIE: &str = "website_2";
const VERIFICATION_PENDING: &str = "VERIFICATION_PENDING";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("two-factor verification was requested but no verification cookie was issued")]
    MissingChallengeCookie,
    #[error("login response (status {status}) did not set the {cookie} cookie")]
    MissingSessionCookie {
        cookie: &'static str,
        status: StatusCode,
    },
    #[error("request failed while logging in")]
    Transport(#[from] RequestError),
    #[error("failed to read {what}")]
    Prompt {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Source of interactive answers during login.
pub trait Prompt {
    fn ask(&mut self, label: &str, secret: bool) -> io::Result<String>;
}

pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&mut self, label: &str, secret: bool) -> io::Result<String> {
        let answer = if secret {
            Password::new().with_prompt(label).interact()
        } else {
            Input::<String>::new().with_prompt(label).interact_text()
        };
        answer.map_err(io::Error::other)
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginReply {
    status: String,
    #[serde(rename = "2fa_token")]
    tfa_token: String,
    truncated_phone_number: String,
}

#[derive(Debug, Serialize)]
struct VerifyPinRequest<'a> {
    #[serde(rename = "2fa_token")]
    tfa_token: &'a str,
    pin: &'a str,
}

/// Credentials supplied outside the stored session; they take precedence
/// over it and are never written back.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());
        Self {
            email: var("NEST_EMAIL"),
            password: var("NEST_PASSWORD"),
        }
    }
}

struct ResponseCookie {
    name: String,
    value: String,
    path: Option<String>,
}

/// Makes sure `session` holds working primary and secondary tokens, logging
/// in or exchanging tokens as needed, and attaches it to `api`.
///
/// Login is attempted at most once; failures are returned to the caller.
pub async fn ensure_session(
    api: &mut Api,
    session: &mut Session,
    env_credentials: &EnvCredentials,
    prompt: &mut dyn Prompt,
) -> Result<(), AuthError> {
    api.attach(session);

    if !primary_token_valid(api, session).await? {
        login(api, session, env_credentials, prompt).await?;
        api.attach(session);
    }

    if !secondary_token_valid(api, session).await? {
        exchange_secondary_token(api, session).await?;
        api.attach(session);
    }

    Ok(())
}

async fn primary_token_valid(api: &Api, session: &Session) -> Result<bool, AuthError> {
    if session.cz_token.is_empty() {
        return Ok(false);
    }

    let request = api
        .request(Method::GET, &api.endpoints().session.url)
        .header(AUTHORIZATION, format!("Basic {}", session.cz_token));
    let status = api.send(request).await?.status();
    info!(%status, "validated primary token");
    Ok(status == StatusCode::OK)
}

async fn secondary_token_valid(api: &Api, session: &Session) -> Result<bool, AuthError> {
    if session.website_2.is_empty() {
        return Ok(false);
    }

    let status = api.get(&api.endpoints().site_login.url).await?.status();
    info!(%status, "validated secondary token");
    Ok(status == StatusCode::OK)
}

/// A stored password that the login endpoint rejects is forgotten, so the
/// next run prompts for a new one.
async fn login(
    api: &Api,
    session: &mut Session,
    env_credentials: &EnvCredentials,
    prompt: &mut dyn Prompt,
) -> Result<(), AuthError> {
    let email = credential(
        env_credentials.email.as_deref(),
        &session.email,
        "Email",
        false,
        prompt,
    )?;
    let stored_password = env_credentials.password.is_none() && !session.password.is_empty();
    let password = credential(
        env_credentials.password.as_deref(),
        &session.password,
        "Password",
        true,
        prompt,
    )?;

    info!(%email, "logging in");
    let request = api
        .bare_request(Method::POST, &api.endpoints().session.url)
        .json(&LoginRequest {
            email: &email,
            password: &password,
        });
    let (status, cookies, body) = read_reply(api.send(request).await?).await?;
    info!(%status, "got login response");

    let reply: LoginReply = serde_json::from_str(&body).unwrap_or_default();
    let (status, cookies) = if reply.status == VERIFICATION_PENDING {
        verify_pin(api, &reply, &cookies, prompt).await?
    } else {
        if stored_password && find_cookie(&cookies, PRIMARY_COOKIE).is_none() {
            warn!(%email, %status, "stored password was rejected; it will be asked for next time");
            session.password.clear();
        }
        (status, cookies)
    };

    let token = find_cookie(&cookies, PRIMARY_COOKIE).ok_or(AuthError::MissingSessionCookie {
        cookie: PRIMARY_COOKIE,
        status,
    })?;

    session.email = email;
    session.password = password;
    session.cz_token = token;
    Ok(())
}

async fn verify_pin(
    api: &Api,
    reply: &LoginReply,
    cookies: &[ResponseCookie],
    prompt: &mut dyn Prompt,
) -> Result<(StatusCode, Vec<ResponseCookie>), AuthError> {
    let verify_path = api.endpoints().verify_pin.path();
    let challenge = cookies
        .iter()
        .find(|cookie| cookie.path.is_some() && cookie.path == verify_path)
        .ok_or(AuthError::MissingChallengeCookie)?;

    info!(
        phone = %reply.truncated_phone_number,
        "two-factor verification required"
    );
    let pin = prompt
        .ask("2FA Pin", false)
        .map_err(|source| AuthError::Prompt {
            what: "verification code",
            source,
        })?;

    let request = api
        .bare_request(Method::POST, &api.endpoints().verify_pin.url)
        .header(
            reqwest::header::COOKIE,
            format!("{}={}", challenge.name, challenge.value),
        )
        .json(&VerifyPinRequest {
            tfa_token: &reply.tfa_token,
            pin: pin.trim(),
        });
    let (status, cookies, _) = read_reply(api.send(request).await?).await?;
    info!(%status, "got verification response");
    Ok((status, cookies))
}

async fn exchange_secondary_token(api: &Api, session: &mut Session) -> Result<(), AuthError> {
    let request = api
        .bare_request(Method::POST, &api.endpoints().site_login.url)
        .form(&[("access_token", session.cz_token.as_str())]);
    let (status, cookies, _) = read_reply(api.send(request).await?).await?;
    info!(%status, "exchanged primary token");

    session.website_2 =
        find_cookie(&cookies, SECONDARY_COOKIE).ok_or(AuthError::MissingSessionCookie {
            cookie: SECONDARY_COOKIE,
            status,
        })?;
    Ok(())
}

fn credential(
    supplied: Option<&str>,
    stored: &str,
    label: &'static str,
    secret: bool,
    prompt: &mut dyn Prompt,
) -> Result<String, AuthError> {
    if let Some(value) = supplied {
        return Ok(value.to_string());
    }
    if !stored.is_empty() {
        return Ok(stored.to_string());
    }
    prompt
        .ask(label, secret)
        .map(|value| value.trim().to_string())
        .map_err(|source| AuthError::Prompt {
            what: label,
            source,
        })
}

async fn read_reply(
    response: Response,
) -> Result<(StatusCode, Vec<ResponseCookie>, String), AuthError> {
    let status = response.status();
    let cookies = response
        .cookies()
        .map(|cookie| ResponseCookie {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            path: cookie.path().map(str::to_string),
        })
        .collect();
    let body = response.text().await.map_err(RequestError::from)?;
    Ok((status, cookies, body))
}

fn find_cookie(cookies: &[ResponseCookie], name: &str) -> Option<String> {
    cookies
        .iter()
        .find(|cookie| cookie.name == name)
        .map(|cookie| cookie.value.clone())
}

/// Loads the stored session, refreshes it against the service and saves it
/// again, returning a client ready for clip operations.
pub(crate) async fn open_session(config: &Config) -> Result<Api> {
    let mut session = session::load_session()?;
    let mut api = Api::new(config.endpoints.clone()).context("failed to build HTTP client")?;

    let env_credentials = EnvCredentials::from_env();
    let outcome =
        ensure_session(&mut api, &mut session, &env_credentials, &mut TerminalPrompt).await;
    if let Err(err) = session::save_session(&session) {
        warn!(error = %err, "failed to persist session");
    }
    outcome.context("failed to establish a session")?;
    Ok(api)
}

#[derive(Debug, Args)]
#[command(about = "Log in (if needed) and store the session tokens")]
pub struct LoginArgs {
    #[arg(long, help = "Discard stored tokens and password and log in from scratch")]
    pub force: bool,
}

pub async fn run(args: LoginArgs) -> Result<()> {
    let config = config::load_config()?;
    if args.force {
        let mut session = session::load_session()?;
        session.clear_tokens();
        session.password.clear();
        session::save_session(&session)?;
    }

    open_session(&config).await?;
    println!("{}", "Session is valid.".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::endpoints::Endpoints;

    /// Answers prompts from a fixed table; unknown labels are an error.
    struct ScriptedPrompt(HashMap<&'static str, &'static str>);

    impl Prompt for ScriptedPrompt {
        fn ask(&mut self, label: &str, _secret: bool) -> io::Result<String> {
            self.0
                .get(label)
                .map(|answer| answer.to_string())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, label.to_string()))
        }
    }

    fn no_prompts() -> ScriptedPrompt {
        ScriptedPrompt(HashMap::new())
    }

    fn no_env() -> EnvCredentials {
        EnvCredentials::default()
    }

    fn stored_credentials() -> Session {
        Session {
            email: "me@example.com".into(),
            password: "secret".into(),
            ..Session::default()
        }
    }

    async fn mount_exchange(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/dropcam/api/login"))
            .and(body_string_contains("access_token="))
            .respond_with(
                ResponseTemplate::new(200).append_header("set-cookie", "website_2=site; Path=/"),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn valid_tokens_skip_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .and(header("authorization", "Basic cz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dropcam/api/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = Session {
            cz_token: "cz".into(),
            website_2: "w2".into(),
            ..stored_credentials()
        };
        let before = session.clone();

        ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap();
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn login_without_two_factor_takes_cookie_from_login_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_partial_json(json!({ "password": "secret" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "cztoken=fresh; Path=/")
                    .set_body_json(json!({ "status": "OK" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_exchange(&server).await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = stored_credentials();

        ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap();
        assert_eq!(session.cz_token, "fresh");
        assert_eq!(session.website_2, "site");
    }

    #[tokio::test]
    async fn rejected_primary_token_triggers_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200).append_header("set-cookie", "cztoken=renewed; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_exchange(&server).await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = Session {
            cz_token: "stale".into(),
            ..stored_credentials()
        };

        ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap();
        assert_eq!(session.cz_token, "renewed");
    }

    #[tokio::test]
    async fn two_factor_login_submits_pin_with_challenge_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "unrelated=1; Path=/")
                    .append_header("set-cookie", "tfa=challenge; Path=/api/0.1/2fa/verify_pin")
                    .set_body_json(json!({
                        "status": "VERIFICATION_PENDING",
                        "2fa_token": "tfa-token",
                        "truncated_phone_number": "3172"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/0.1/2fa/verify_pin"))
            .and(header("cookie", "tfa=challenge"))
            .and(body_partial_json(json!({ "2fa_token": "tfa-token", "pin": "123456" })))
            .respond_with(
                ResponseTemplate::new(200).append_header("set-cookie", "cztoken=verified; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_exchange(&server).await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = stored_credentials();
        let mut prompt = ScriptedPrompt(HashMap::from([("2FA Pin", "123456")]));

        ensure_session(&mut api, &mut session, &no_env(), &mut prompt)
            .await
            .unwrap();
        assert_eq!(session.cz_token, "verified");
        assert_eq!(session.website_2, "site");
    }

    #[tokio::test]
    async fn two_factor_without_challenge_cookie_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "unrelated=1; Path=/")
                    .set_body_json(json!({ "status": "VERIFICATION_PENDING", "2fa_token": "t" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/0.1/2fa/verify_pin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = stored_credentials();
        let mut prompt = ScriptedPrompt(HashMap::from([("2FA Pin", "123456")]));

        let err = ensure_session(&mut api, &mut session, &no_env(), &mut prompt)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingChallengeCookie));
        assert!(session.cz_token.is_empty());
    }

    #[tokio::test]
    async fn login_without_session_cookie_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "status": "BAD" })))
            .mount(&server)
            .await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = stored_credentials();

        let err = ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::MissingSessionCookie { cookie: "cztoken", status } if status == StatusCode::UNAUTHORIZED
        ));
    }

    #[tokio::test]
    async fn rejected_secondary_token_is_exchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dropcam/api/login"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dropcam/api/login"))
            .and(body_string_contains("access_token=cz"))
            .respond_with(
                ResponseTemplate::new(200).append_header("set-cookie", "website_2=renewed; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = Session {
            cz_token: "cz".into(),
            website_2: "expired".into(),
            ..stored_credentials()
        };

        ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap();
        assert_eq!(session.cz_token, "cz");
        assert_eq!(session.website_2, "renewed");
    }

    async fn mount_password_check(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_partial_json(json!({ "password": "new" })))
            .respond_with(
                ResponseTemplate::new(200).append_header("set-cookie", "cztoken=fresh; Path=/"),
            )
            .with_priority(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "status": "BAD" })))
            .with_priority(2)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn rejected_stored_password_is_asked_for_next_time() {
        let server = MockServer::start().await;
        mount_password_check(&server).await;
        mount_exchange(&server).await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = Session {
            password: "old".into(),
            ..stored_credentials()
        };
        let mut prompt = ScriptedPrompt(HashMap::from([("Password", "new")]));

        let err = ensure_session(&mut api, &mut session, &no_env(), &mut prompt)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingSessionCookie { cookie: "cztoken", .. }));
        assert!(session.password.is_empty());
        assert_eq!(session.email, "me@example.com");

        ensure_session(&mut api, &mut session, &no_env(), &mut prompt)
            .await
            .unwrap();
        assert_eq!(session.password, "new");
        assert_eq!(session.cz_token, "fresh");
    }

    #[tokio::test]
    async fn environment_credentials_win_and_are_not_forgotten() {
        let server = MockServer::start().await;
        mount_password_check(&server).await;

        let mut api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let mut session = stored_credentials();
        let env_credentials = EnvCredentials {
            email: None,
            password: Some("typo".into()),
        };

        let err = ensure_session(&mut api, &mut session, &env_credentials, &mut no_prompts())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingSessionCookie { .. }));
        assert_eq!(session.password, "secret");
    }

    #[tokio::test]
    async fn transport_failure_is_fatal() {
        // Nothing listens on the discard port.
        let mut api = Api::new(Endpoints::for_host("http://127.0.0.1:9")).unwrap();
        let mut session = Session {
            cz_token: "cz".into(),
            ..stored_credentials()
        };

        let err = ensure_session(&mut api, &mut session, &no_env(), &mut no_prompts())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{fs_utils, paths};

/// Credentials and tokens persisted between invocations.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Session {
    pub email: String,
    pub password: String,
    /// Primary token issued by the login endpoint.
    #[serde(rename = "czToken")]
    pub cz_token: String,
    /// Secondary site cookie exchanged for the primary token.
    #[serde(rename = "website2")]
    pub website_2: String,
    pub n: String,
    pub user_token: String,
}

impl Session {
    /// `Cookie` header value built from every token that is set.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<String> = [
            ("cztoken", &self.cz_token),
            ("website_2", &self.website_2),
            ("n", &self.n),
            ("user_token", &self.user_token),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    pub fn clear_tokens(&mut self) {
        self.cz_token.clear();
        self.website_2.clear();
        self.n.clear();
        self.user_token.clear();
    }
}

pub(crate) fn load_session_from(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Ok(Session::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read session at {}", path.display()))?;
    let session: Session = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse session at {}", path.display()))?;
    Ok(session)
}

pub(crate) fn save_session_to(path: &Path, session: &Session) -> Result<()> {
    fs_utils::write_json_private(path, session)
        .with_context(|| format!("failed to save session to {}", path.display()))
}

pub(crate) fn load_session() -> Result<Session> {
    load_session_from(&paths::session_path()?)
}

pub(crate) fn save_session(session: &Session) -> Result<()> {
    save_session_to(&paths::session_path()?, session)
}

#[derive(Debug, Args)]
#[command(about = "Inspect or reset the stored session")]
pub struct SessionArgs {
    #[arg(long, help = "Print the stored session (secrets masked)")]
    pub show: bool,
    #[arg(long, help = "Forget stored tokens; the next command logs in again")]
    pub clear: bool,
}

pub fn run(args: SessionArgs) -> Result<()> {
    if !args.show && !args.clear {
        bail!("at least one flag is required; use --show or --clear");
    }

    let mut session = load_session()?;
    if args.clear {
        session.clear_tokens();
        save_session(&session)?;
        println!("Session tokens cleared.");
    }
    if args.show {
        print_session(&session)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct DisplaySession {
    email: Option<String>,
    password: Option<String>,
    cz_token: Option<String>,
    website_2: Option<String>,
    n: Option<String>,
    user_token: Option<String>,
}

fn print_session(session: &Session) -> Result<()> {
    let display = DisplaySession {
        email: non_empty(&session.email).map(str::to_string),
        password: mask_value(&session.password),
        cz_token: mask_value(&session.cz_token),
        website_2: mask_value(&session.website_2),
        n: mask_value(&session.n),
        user_token: mask_value(&session.user_token),
    };
    let json = serde_json::to_string_pretty(&display).context("failed to format session")?;
    println!("{json}");
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn mask_value(value: &str) -> Option<String> {
    non_empty(value).map(|_| "********".to_string())
}

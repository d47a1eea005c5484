use anyhow::{Result, bail};
use clap::Args;

use crate::session::{self, Session};

#[derive(Debug, Args)]
#[command(about = "Import session tokens from a browser Cookie header")]
pub struct CookieArgs {
    #[arg(long, value_name = "HEADER", help = "Cookie header copied from a logged-in browser")]
    pub cookie: String,
}

pub fn run(args: CookieArgs) -> Result<()> {
    let mut session = session::load_session()?;
    let imported = import_cookie_header(&mut session, &args.cookie);
    if imported.is_empty() {
        bail!("no session tokens found in the cookie header");
    }

    session::save_session(&session)?;
    println!("Imported {}.", imported.join(", "));
    Ok(())
}

/// `name=value` pairs of a `Cookie` header, with or without the header name.
fn parse_cookie_header(raw: &str) -> Vec<(&str, &str)> {
    let raw = raw.trim();
    let raw = raw
        .split_once(':')
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("cookie"))
        .map_or(raw, |(_, value)| value);

    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim(), value.trim().trim_matches('"')))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Copies known tokens from `raw` into `session`, returning the cookie names
/// that were taken.
fn import_cookie_header(session: &mut Session, raw: &str) -> Vec<&'static str> {
    let mut imported = Vec::new();
    for (name, value) in parse_cookie_header(raw) {
        let (slot, label) = match name {
            "user_token" => (&mut session.user_token, "user_token"),
            "n" => (&mut session.n, "n"),
            "cztoken" => (&mut session.cz_token, "cztoken"),
            "website_2" => (&mut session.website_2, "website_2"),
            _ => continue,
        };
        *slot = value.to_string();
        if !imported.contains(&label) {
            imported.push(label);
        }
    }
    imported
}

use anyhow::{Context, Result};
use clap::Args;

use crate::{auth, clip, config};

#[derive(Debug, Args)]
#[command(about = "Delete a specific clip")]
pub struct DeleteArgs {
    #[arg(long, help = "Clip id")]
    pub id: i64,
}

pub async fn run(args: DeleteArgs) -> Result<()> {
    let config = config::load_config()?;
    let api = auth::open_session(&config).await?;
    clip::delete(&api, args.id)
        .await
        .with_context(|| format!("failed to delete clip {}", args.id))?;
    println!("Deleted clip {}.", args.id);
    Ok(())
}

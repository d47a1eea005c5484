use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::clip::{self, Clip};
use crate::{auth, config};

#[derive(Debug, Args)]
#[command(about = "List video clips")]
pub struct ListArgs {
    #[arg(long, help = "Print the clips as JSON instead of a table")]
    pub json: bool,
}

pub async fn run(args: ListArgs) -> Result<()> {
    let config = config::load_config()?;
    let api = auth::open_session(&config).await?;
    let clips = clip::list(&api).await.context("failed to list clips")?;

    if args.json {
        let out = serde_json::to_string_pretty(&clips).context("failed to format clips")?;
        println!("{out}");
        return Ok(());
    }

    if clips.is_empty() {
        println!("No clips.");
        return Ok(());
    }

    let rows: Vec<Row> = clips.iter().map(Row::from).collect();
    print_table(&rows);
    Ok(())
}

struct Row {
    id: String,
    start: String,
    length: String,
    title: String,
    filename: String,
}

impl From<&Clip> for Row {
    fn from(clip: &Clip) -> Self {
        Self {
            id: clip.id.to_string(),
            start: clip
                .started_at()
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            length: format!("{}s", clip.length_seconds.round()),
            title: clip.title.clone(),
            filename: clip.filename.clone(),
        }
    }
}

fn column_width(rows: &[Row], header: &str, cell: impl Fn(&Row) -> &str) -> usize {
    rows.iter()
        .map(|row| cell(row).len())
        .max()
        .unwrap_or(0)
        .max(header.len())
}

fn print_table(rows: &[Row]) {
    let id_width = column_width(rows, "id", |row| row.id.as_str());
    let start_width = column_width(rows, "start", |row| row.start.as_str());
    let length_width = column_width(rows, "length", |row| row.length.as_str());
    let title_width = column_width(rows, "title", |row| row.title.as_str());

    let header = format!(
        "{:<id_width$}  {:<start_width$}  {:>length_width$}  {:<title_width$}  {}",
        "id", "start", "length", "title", "filename",
    );
    println!("{}", header.bold());

    for row in rows {
        println!(
            "{:<id_width$}  {:<start_width$}  {:>length_width$}  {:<title_width$}  {}",
            row.id, row.start, row.length, row.title, row.filename,
        );
    }
}

//! Images command - list built images

use crate::cli::args::{ImagesArgs, OutputFormat};
use crate::cli::commands::{format_size, open_store};
use crate::config::Config;
use crate::error::SlipwayResult;
use crate::layer::Image;
use serde::Serialize;

/// An image with the tags pointing at it
#[derive(Debug, Serialize)]
struct ImageRow {
    id: String,
    tags: Vec<String>,
    base: String,
    layers: usize,
    size_bytes: u64,
    created_at: String,
}

impl ImageRow {
    fn new(image: &Image, tags: Vec<String>) -> Self {
        Self {
            id: image.id.clone(),
            tags,
            base: image.config.base.clone(),
            layers: image.layers.len(),
            size_bytes: image.size_bytes(),
            created_at: image.created_at.to_rfc3339(),
        }
    }
}

/// Execute the images command
pub async fn execute(args: ImagesArgs, config: &Config) -> SlipwayResult<()> {
    let store = open_store(config).await?;

    let mut rows = vec![];
    for image in store.list_images().await? {
        let tags = store.tags_for(&image.id).await?;
        rows.push(ImageRow::new(&image, tags));
    }

    match args.format {
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}", row.id);
            }
        }
    }
    Ok(())
}

fn print_table(rows: &[ImageRow]) {
    if rows.is_empty() {
        println!("No images found.");
        return;
    }

    println!(
        "{:<14} {:<20} {:<28} {:>6} {:>10}  {:<20}",
        "IMAGE", "TAGS", "BASE", "LAYERS", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(104));

    for row in rows {
        let tags = if row.tags.is_empty() {
            "-".to_string()
        } else {
            row.tags.join(",")
        };
        let created = row
            .created_at
            .get(..16)
            .unwrap_or(&row.created_at)
            .replace('T', " ");
        println!(
            "{:<14} {:<20} {:<28} {:>6} {:>10}  {:<20}",
            &row.id[..12.min(row.id.len())],
            tags,
            row.base,
            row.layers,
            format_size(row.size_bytes),
            created,
        );
    }

    println!();
    println!("Total: {} image(s)", rows.len());
}

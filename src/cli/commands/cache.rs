//! Cache command - inspect and clean the layer store

use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::cli::commands::{format_size, open_store};
use crate::config::Config;
use crate::error::SlipwayResult;
use crate::layer::{Layer, LayerStore};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> SlipwayResult<()> {
    let store = open_store(config).await?;

    match args.action {
        CacheAction::List { format } => list_layers(&store, format).await,
        CacheAction::Prune { dry_run } => prune_layers(&store, dry_run).await,
        CacheAction::Clear { yes } => clear_store(&store, yes).await,
    }
}

async fn list_layers(store: &LayerStore, format: OutputFormat) -> SlipwayResult<()> {
    let layers = store.list_layers().await?;

    if layers.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("No layers in {}.", store.root().display());
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_layer_table(&layers),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&layers)?),
        OutputFormat::Plain => {
            for layer in &layers {
                println!("{}", layer.fingerprint);
            }
        }
    }
    Ok(())
}

fn print_layer_table(layers: &[Layer]) {
    println!(
        "{:<14} {:<21} {:<14} {:>10}  {:<20}",
        "LAYER", "KIND", "PARENT", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(84));

    for layer in layers {
        let parent = layer
            .parent
            .as_ref()
            .map(|p| p.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<14} {:<21} {:<14} {:>10}  {:<20}",
            layer.fingerprint.short(),
            layer.kind,
            parent,
            format_size(layer.size_bytes),
            layer.created_at.format("%Y-%m-%d %H:%M"),
        );
    }

    let total: u64 = layers.iter().map(|l| l.size_bytes).sum();
    println!();
    println!("Total: {} layer(s), {}", layers.len(), format_size(total));
}

async fn prune_layers(store: &LayerStore, dry_run: bool) -> SlipwayResult<()> {
    let unreferenced = store.unreferenced_layers().await?;

    if unreferenced.is_empty() {
        println!("No unreferenced layers.");
        return Ok(());
    }

    println!("Found {} unreferenced layer(s):", unreferenced.len());
    for layer in &unreferenced {
        println!(
            "  {} {} {} ({})",
            style("•").red(),
            layer.fingerprint.short(),
            layer.kind,
            format_size(layer.size_bytes)
        );
    }

    if dry_run {
        println!();
        println!("Dry run - no layers removed.");
        return Ok(());
    }

    let removed = store.prune().await?;
    let freed: u64 = removed.iter().map(|l| l.size_bytes).sum();
    println!(
        "{} removed {} layer(s), freed {}",
        style("✓").green(),
        removed.len(),
        format_size(freed)
    );
    Ok(())
}

async fn clear_store(store: &LayerStore, skip_confirm: bool) -> SlipwayResult<()> {
    let ctx = UiContext::detect().with_auto_yes(skip_confirm);
    let layers = store.list_layers().await?;
    let images = store.list_images().await?;

    if layers.is_empty() && images.is_empty() {
        println!("Layer store is already empty.");
        return Ok(());
    }

    println!(
        "This will remove {} image(s) and {} layer(s) from {}",
        images.len(),
        layers.len(),
        store.root().display()
    );

    if !ui::confirm(&ctx, "Are you sure?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    store.clear().await?;
    ui::step_ok(&ctx, "Layer store cleared");
    Ok(())
}

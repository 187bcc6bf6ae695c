//! Inspect command - show an image's layers and launch metadata

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::cli::commands::{format_size, open_store};
use crate::config::Config;
use crate::error::SlipwayResult;
use crate::layer::Image;
use crate::ui::{self, UiContext};

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> SlipwayResult<()> {
    let store = open_store(config).await?;
    let image = store.resolve_image(&args.image).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&image)?),
        OutputFormat::Plain => {
            for layer in &image.layers {
                println!("{}", layer.fingerprint);
            }
        }
        OutputFormat::Table => {
            let tags = store.tags_for(&image.id).await?;
            print_details(&UiContext::detect(), &image, &tags);
        }
    }
    Ok(())
}

fn print_details(ctx: &UiContext, image: &Image, tags: &[String]) {
    ui::key_value(ctx, "Image", &image.id);
    if !tags.is_empty() {
        ui::key_value(ctx, "Tags", &tags.join(", "));
    }
    ui::key_value(ctx, "Base", &image.config.base);
    ui::key_value(ctx, "Workdir", &image.config.workdir);
    let port = image
        .config
        .exposed_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    ui::key_value(ctx, "Port", &port);
    ui::key_value(ctx, "Created", &image.created_at.to_rfc3339());

    ui::note(ctx, "Entrypoint", &image.config.entrypoint.join(" "));

    if !image.config.env.is_empty() {
        let env = image
            .config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        ui::note(ctx, "Environment", &env);
    }

    ui::section(ctx, "Layers");
    for (index, layer) in image.layers.iter().enumerate() {
        ui::step_info(
            ctx,
            &format!(
                "{} {:<21} {} {:>10}  {}",
                index + 1,
                layer.kind,
                layer.fingerprint.short(),
                format_size(layer.size_bytes),
                layer.description
            ),
        );
    }
    ui::key_value(ctx, "Total size", &format_size(image.size_bytes()));
}

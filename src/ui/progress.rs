//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::layer::{CacheOutcome, Layer};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Layer-by-layer build progress.
///
/// Interactive terminals get an indicatif bar advanced once per committed
/// layer; plain output prints one `[n/total]` line per layer.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
    total: usize,
    done: usize,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, label: &str, total: usize) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total as u64);
            let template = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Building {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}");
            if let Ok(template) = template {
                bar.set_style(
                    template
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Building {}...", label);
            None
        };
        Self {
            bar,
            total,
            done: 0,
        }
    }

    /// Record a committed or reused layer
    pub fn on_layer(&mut self, layer: &Layer) {
        self.done += 1;
        let line = layer_line(layer);
        match &self.bar {
            Some(bar) => {
                bar.set_position(self.done as u64);
                bar.set_message(line);
            }
            None => println!("  [{}/{}] {}", self.done, self.total, line),
        }
    }

    /// Number of layers reported so far
    pub fn completed(&self) -> usize {
        self.done
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn layer_line(layer: &Layer) -> String {
    let outcome = match layer.outcome {
        CacheOutcome::Hit => style(layer.outcome.to_string()).green().to_string(),
        CacheOutcome::Miss => style(layer.outcome.to_string()).yellow().to_string(),
    };
    format!("{} {} {}", layer.kind, layer.fingerprint.short(), outcome)
}

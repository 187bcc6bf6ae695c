//! Confirmation prompt with non-interactive fallback

use super::context::UiContext;
use crate::error::{SlipwayError, SlipwayResult};

/// Ask a yes/no question; non-interactive runs get `default`, auto-yes gets `true`
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> SlipwayResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    let answer = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| SlipwayError::User(format!("Prompt task failed: {}", e)))?;

    answer.map_err(|e| SlipwayError::User(format!("Prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_interactive_returns_default() {
        let ctx = UiContext::non_interactive();
        assert!(!confirm(&ctx, "Delete?", false).await.unwrap());
        assert!(confirm(&ctx, "Delete?", true).await.unwrap());
    }

    #[tokio::test]
    async fn auto_yes_approves() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Delete?", false).await.unwrap());
    }
}

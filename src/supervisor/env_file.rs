//! dotenv-style environment files
//!
//! `KEY=VALUE` per line, optional `export ` prefix, `#` comments, and
//! single- or double-quoted values. Double quotes understand `\n`, `\t`,
//! `\"` and `\\`.

use crate::error::{SlipwayError, SlipwayResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Read and parse an environment file
pub async fn load(path: &Path) -> SlipwayResult<BTreeMap<String, String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SlipwayError::io(format!("reading env file {}", path.display()), e))?;
    parse(&content).map_err(|e| match e {
        SlipwayError::LaunchInvalid(reason) => {
            SlipwayError::LaunchInvalid(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })
}

pub fn parse(content: &str) -> SlipwayResult<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let invalid = |reason: &str| {
            SlipwayError::LaunchInvalid(format!("env file line {}: {}", index + 1, reason))
        };

        let (key, value) = line.split_once('=').ok_or_else(|| invalid("expected KEY=VALUE"))?;
        let key = key.trim();
        let valid_key = key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(invalid(&format!("invalid variable name '{}'", key)));
        }

        vars.insert(key.to_string(), parse_value(value.trim()).map_err(|r| invalid(&r))?);
    }

    Ok(vars)
}

fn parse_value(value: &str) -> Result<String, String> {
    if let Some(rest) = value.strip_prefix('\'') {
        let end = rest.find('\'').ok_or("unterminated single quote")?;
        return Ok(rest[..end].to_string());
    }

    if let Some(rest) = value.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return Ok(out),
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }
        return Err("unterminated double quote".to_string());
    }

    // Unquoted: a ` #` starts a trailing comment
    let value = match value.find(" #") {
        Some(i) => &value[..i],
        None => value,
    };
    Ok(value.trim_end().to_string())
}

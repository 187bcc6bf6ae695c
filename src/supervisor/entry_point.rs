//! Application entry points
//!
//! An entry point is `module:callable`, e.g. `app:flask_app` or
//! `service.web:application`. Before any socket is bound the supervisor
//! checks that the module file exists on the search path and may bind the
//! callable at module level, so a typo fails fast instead of after N
//! workers have started.

use crate::error::{SlipwayError, SlipwayResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// A parsed `module:callable` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    module: String,
    callable: String,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl EntryPoint {
    pub fn parse(s: &str) -> SlipwayResult<Self> {
        let invalid = || SlipwayError::EntryPointInvalid(s.to_string());
        let (module, callable) = s.trim().split_once(':').ok_or_else(invalid)?;

        if module.is_empty() || !module.split('.').all(is_identifier) || !is_identifier(callable) {
            return Err(invalid());
        }

        Ok(Self {
            module: module.to_string(),
            callable: callable.to_string(),
        })
    }

    /// Dotted module path
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Name of the callable inside the module
    pub fn callable(&self) -> &str {
        &self.callable
    }

    /// Relative files the module may live in: `a/b.py` or `a/b/__init__.py`
    pub fn module_files(&self) -> [PathBuf; 2] {
        let base: PathBuf = self.module.split('.').collect();
        [base.with_extension("py"), base.join("__init__.py")]
    }
}

impl FromStr for EntryPoint {
    type Err = SlipwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.callable)
    }
}

/// An entry point located on disk
#[derive(Debug, Clone)]
pub struct ResolvedEntryPoint {
    pub entry_point: EntryPoint,
    pub module_file: PathBuf,
}

/// Checks that an entry point can be loaded before workers start
pub trait EntryPointResolver: Send + Sync {
    /// Fails with `EntryPointUnresolvable`
    fn resolve(&self, entry_point: &EntryPoint) -> SlipwayResult<ResolvedEntryPoint>;
}

/// Resolves modules against a list of source roots
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    search_path: Vec<PathBuf>,
}

impl ModuleResolver {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    fn find_module(&self, entry_point: &EntryPoint) -> Option<PathBuf> {
        self.search_path
            .iter()
            .flat_map(|root| entry_point.module_files().map(|rel| root.join(rel)))
            .find(|candidate| candidate.is_file())
    }
}

impl EntryPointResolver for ModuleResolver {
    fn resolve(&self, entry_point: &EntryPoint) -> SlipwayResult<ResolvedEntryPoint> {
        let unresolvable = |reason: String| SlipwayError::EntryPointUnresolvable {
            entry_point: entry_point.to_string(),
            reason,
        };

        let module_file = self.find_module(entry_point).ok_or_else(|| {
            let searched: Vec<String> = self
                .search_path
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            unresolvable(format!(
                "no module named '{}' (searched {})",
                entry_point.module(),
                searched.join(", ")
            ))
        })?;

        let source = std::fs::read_to_string(&module_file)
            .map_err(|e| unresolvable(format!("cannot read {}: {}", module_file.display(), e)))?;

        if !binds_name(&source, entry_point.callable()) {
            return Err(unresolvable(format!(
                "module '{}' defines no top-level '{}'",
                entry_point.module(),
                entry_point.callable()
            )));
        }

        debug!("Entry point {} found in {}", entry_point, module_file.display());
        Ok(ResolvedEntryPoint {
            entry_point: entry_point.clone(),
            module_file,
        })
    }
}

/// Whether `source` may bind `name` at module level.
///
/// Works on logical statements, so bracketed and backslash continuations
/// count as one line. Bindings inside `if`/`try`/`with`/`for`/`while`
/// blocks count; bindings inside `def` or `class` bodies do not. A star
/// import is taken as a possible binding.
fn binds_name(source: &str, name: &str) -> bool {
    // (indent, opens a function or class scope) for each enclosing header
    let mut blocks: Vec<(usize, bool)> = vec![];

    for stmt in statements(source) {
        while blocks.last().is_some_and(|&(indent, _)| indent >= stmt.indent) {
            blocks.pop();
        }
        let module_level = if blocks.is_empty() {
            stmt.indent == 0
        } else {
            blocks.iter().all(|&(_, scope)| !scope)
        };

        let text = stmt.text.as_str();
        let opens_scope = SCOPE_KEYWORDS.iter().any(|kw| starts_with_keyword(text, kw));
        if text.ends_with(':') {
            blocks.push((stmt.indent, opens_scope));
            if module_level && opens_scope && line_binds(text, name) {
                return true;
            }
            continue;
        }
        if !module_level {
            continue;
        }

        let body = if opens_scope {
            text
        } else {
            inline_body(text).unwrap_or(text)
        };
        if line_binds(body, name) {
            return true;
        }
    }
    false
}

const SCOPE_KEYWORDS: [&str; 3] = ["def", "async def", "class"];

const BLOCK_KEYWORDS: [&str; 11] = [
    "if", "elif", "else", "try", "except", "finally", "with", "async with", "for", "async for",
    "while",
];

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

/// Body of a one-line block statement: `try: from fast import app`
fn inline_body(text: &str) -> Option<&str> {
    if !BLOCK_KEYWORDS.iter().any(|kw| starts_with_keyword(text, kw)) {
        return None;
    }

    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 && !text[i + 1..].starts_with('=') => {
                    return Some(text[i + 1..].trim());
                }
                _ => {}
            },
        }
    }
    None
}

/// A logical statement with comments removed and continuations joined
#[derive(Debug)]
struct Statement {
    indent: usize,
    text: String,
}

fn statements(source: &str) -> Vec<Statement> {
    let mut out = vec![];
    let mut text = String::new();
    let mut indent = 0;
    let mut depth = 0usize;
    let mut quote: Option<(char, bool)> = None;
    let mut pending = false;

    let flush = |out: &mut Vec<Statement>, indent: usize, text: &mut String| {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(Statement {
                indent,
                text: trimmed.to_string(),
            });
        }
        text.clear();
    };

    for line in source.lines() {
        let body = line.trim_start();
        if pending {
            text.push(' ');
        } else {
            indent = line.len() - body.len();
        }

        let chars: Vec<char> = body.chars().collect();
        let mut continued = false;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some((q, triple)) = quote {
                text.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        text.push(next);
                    }
                    i += 2;
                    continue;
                }
                if c == q {
                    if !triple {
                        quote = None;
                    } else if chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                        text.push(q);
                        text.push(q);
                        quote = None;
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '\'' | '"' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    quote = Some((c, triple));
                    if triple {
                        text.push(c);
                        text.push(c);
                        i += 2;
                    }
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                '\\' if i + 1 == chars.len() => {
                    continued = true;
                    i += 1;
                    continue;
                }
                ';' if depth == 0 => {
                    flush(&mut out, indent, &mut text);
                    i += 1;
                    continue;
                }
                _ => {}
            }
            text.push(c);
            i += 1;
        }

        if matches!(quote, Some((_, false))) {
            quote = None;
        }
        pending = continued || depth > 0 || quote.is_some();
        if !pending {
            flush(&mut out, indent, &mut text);
        }
    }
    flush(&mut out, indent, &mut text);
    out
}

fn line_binds(line: &str, name: &str) -> bool {
    fn ident_end<'a>(s: &'a str, name: &str) -> Option<&'a str> {
        s.strip_prefix(name)
            .filter(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
            .map(str::trim_start)
    }

    for keyword in ["def ", "async def ", "class "] {
        if let Some(rest) = line.strip_prefix(keyword) {
            return ident_end(rest.trim_start(), name)
                .is_some_and(|r| r.starts_with('(') || r.starts_with(':'));
        }
    }

    if let Some(rest) = line.strip_prefix("from ") {
        return rest
            .split_once(" import ")
            .is_some_and(|(_, names)| imported_names(names).any(|n| n == name || n == "*"));
    }
    if let Some(rest) = line.strip_prefix("import ") {
        return imported_names(rest).any(|n| n == name);
    }

    // `name = ...`, `name: T = ...`, `a, name = ...`
    let Some((targets, _)) = line.split_once('=') else {
        return false;
    };
    if targets.ends_with(['=', '!', '<', '>']) || line[targets.len()..].starts_with("==") {
        return false;
    }
    targets
        .split(',')
        .map(|t| t.split(':').next().unwrap_or("").trim())
        .any(|t| t == name)
}

/// Names bound by an import list: `a, b as c` binds `a` and `c`
fn imported_names(list: &str) -> impl Iterator<Item = &str> {
    list.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .filter_map(|item| {
            let item = item.trim();
            let bound = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item.split('.').next().unwrap_or(""),
            };
            (!bound.is_empty()).then_some(bound)
        })
}

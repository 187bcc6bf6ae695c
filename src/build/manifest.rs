//! Dependency manifest parsing
//!
//! A manifest is a requirements-style file: one `name<op>version` entry per
//! line, `#` comments and blank lines ignored. Entry order is preserved.
//!
//! ```text
//! flask==3.0
//! requests>=2.31,<3
//! gunicorn~=22.0
//! ```

use crate::error::{SlipwayError, SlipwayResult};
use semver::Version;
use std::fmt;
use std::path::Path;

/// Comparison operator of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Compatible,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Compatible => "~=",
        }
    }
}

/// A single `<op><version>` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub op: Op,
    pub version: Version,
    /// Number of release components written (`3.0` is 2)
    precision: usize,
    /// Trailing `.*` on `==`/`!=`
    wildcard: bool,
}

impl Constraint {
    fn parse(clause: &str) -> Result<Self, String> {
        let clause = clause.trim();
        let ops = [
            ("~=", Op::Compatible),
            ("==", Op::Eq),
            ("!=", Op::Ne),
            (">=", Op::Ge),
            ("<=", Op::Le),
            (">", Op::Gt),
            ("<", Op::Lt),
        ];
        let (op, raw) = ops
            .iter()
            .find_map(|(prefix, op)| clause.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| format!("missing comparison operator in '{}'", clause))?;

        let (raw, wildcard) = match raw.strip_suffix(".*") {
            Some(prefix) => {
                if !matches!(op, Op::Eq | Op::Ne) {
                    return Err(format!("wildcard only allowed with == or != in '{}'", clause));
                }
                (prefix, true)
            }
            None => (raw, false),
        };

        let (version, precision) = parse_version(raw)?;
        if op == Op::Compatible && precision < 2 {
            return Err(format!("~= needs at least two version components in '{}'", clause));
        }

        Ok(Self {
            op,
            version,
            precision,
            wildcard,
        })
    }

    /// Whether `candidate` satisfies this clause
    pub fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Op::Eq if self.wildcard => same_prefix(&self.version, candidate, self.precision),
            Op::Eq => candidate == &self.version,
            Op::Ne if self.wildcard => !same_prefix(&self.version, candidate, self.precision),
            Op::Ne => candidate != &self.version,
            Op::Ge => candidate >= &self.version,
            Op::Le => candidate <= &self.version,
            Op::Gt => candidate > &self.version,
            Op::Lt => candidate < &self.version,
            Op::Compatible => {
                candidate >= &self.version
                    && same_prefix(&self.version, candidate, self.precision - 1)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [self.version.major, self.version.minor, self.version.patch];
        let written: Vec<String> = parts[..self.precision.min(3)]
            .iter()
            .map(|p| p.to_string())
            .collect();
        write!(f, "{}{}", self.op.as_str(), written.join("."))?;
        if !self.version.pre.is_empty() {
            write!(f, "-{}", self.version.pre)?;
        }
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

fn same_prefix(a: &Version, b: &Version, components: usize) -> bool {
    let a = [a.major, a.minor, a.patch];
    let b = [b.major, b.minor, b.patch];
    a[..components.min(3)] == b[..components.min(3)]
}

/// Parse a release version leniently: `3` and `3.0` pad to `3.0.0`.
///
/// Returns the version and how many release components were written.
pub fn parse_version(raw: &str) -> Result<(Version, usize), String> {
    let raw = raw.trim();
    let (release, pre) = match raw.split_once('-') {
        Some((release, pre)) => (release, Some(pre)),
        None => (raw, None),
    };

    let parts: Vec<&str> = release.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(format!("invalid version '{}'", raw));
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("invalid version component '{}' in '{}'", part, raw))?;
    }

    let mut padded = format!("{}.{}.{}", numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
        padded.push('-');
        padded.push_str(pre);
    }
    let version = Version::parse(&padded).map_err(|e| format!("invalid version '{}': {}", raw, e))?;
    Ok((version, parts.len()))
}

/// Normalize a package name: lowercase, with `_` and `.` folded to `-`
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['_', '.'], "-")
}

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized package name
    pub name: String,
    /// All clauses must hold; empty means any version
    pub constraints: Vec<Constraint>,
}

impl Requirement {
    /// Whether `version` satisfies every clause
    pub fn matches(&self, version: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(version))
    }

    /// Constraint clauses joined with `,`
    pub fn constraint_str(&self) -> String {
        self.constraints
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.constraint_str())
    }
}

/// Ordered list of requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    pub requirements: Vec<Requirement>,
}

impl DependencyManifest {
    /// Read and parse a manifest file
    pub async fn from_file(path: &Path) -> SlipwayResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SlipwayError::install(format!("reading manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse manifest text
    pub fn parse(content: &str) -> SlipwayResult<Self> {
        let mut requirements: Vec<Requirement> = Vec::new();

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let err = |reason: String| SlipwayError::ManifestParse {
                line: line_no,
                reason,
            };

            let line = match raw.find('#') {
                Some(i) => &raw[..i],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('-') {
                return Err(err(format!("installer options are not supported: '{}'", line)));
            }
            if line.contains(';') {
                return Err(err("environment markers are not supported".to_string()));
            }

            let split = line
                .find(|c: char| matches!(c, '=' | '!' | '<' | '>' | '~'))
                .unwrap_or(line.len());
            let (name, spec) = line.split_at(split);
            let name = name.trim();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(err(format!("invalid package name '{}'", name)));
            }

            let constraints = if spec.trim().is_empty() {
                vec![]
            } else {
                spec.split(',')
                    .map(Constraint::parse)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(err)?
            };

            let name = normalize_name(name);
            if requirements.iter().any(|r| r.name == name) {
                return Err(err(format!("duplicate requirement '{}'", name)));
            }
            requirements.push(Requirement { name, constraints });
        }

        Ok(Self { requirements })
    }

    /// (package-name, version-constraint) pairs in manifest order
    pub fn entries(&self) -> Vec<(String, String)> {
        self.requirements
            .iter()
            .map(|r| (r.name.clone(), r.constraint_str()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

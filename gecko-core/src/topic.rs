//! # Topic Expressions
//!
//! Compiled patterns used to route sessions to interceptors and drivers.
//!
//! Topics are `/`-separated levels. An expression matches a topic level by
//! level:
//!
//! | Level | Matches |
//! |-------|---------|
//! | `name` | exactly `name` |
//! | `+` | any single level |
//! | `#` | zero or more trailing levels (last level only) |
//!
//! ```rust,ignore
//! let expr = TopicExpr::new("/devices/+/state/#")?;
//! assert!(expr.matches("/devices/door-1/state/open"));
//! assert!(!expr.matches("/devices/door-1/command"));
//! ```

use crate::error::TopicError;
use std::{fmt, str::FromStr};

const SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    Single,
    Multi,
}

/// An immutable, compiled topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicExpr {
    source: String,
    levels: Vec<Level>,
}

impl TopicExpr {
    /// Compile a topic expression.
    pub fn new(expr: &str) -> Result<Self, TopicError> {
        if expr.is_empty() {
            return Err(TopicError::Empty);
        }
        let raw: Vec<&str> = expr.split(SEPARATOR).collect();
        let last = raw.len() - 1;
        let mut levels = Vec::with_capacity(raw.len());
        for (idx, level) in raw.into_iter().enumerate() {
            let compiled = match level {
                MULTI_LEVEL if idx == last => Level::Multi,
                MULTI_LEVEL => return Err(TopicError::MisplacedMultiLevel(expr.to_string())),
                SINGLE_LEVEL => Level::Single,
                other if other.contains(['#', '+']) => {
                    return Err(TopicError::PartialWildcard(expr.to_string()));
                }
                other => Level::Literal(other.to_string()),
            };
            levels.push(compiled);
        }
        Ok(Self {
            source: expr.to_string(),
            levels,
        })
    }

    /// Compile every expression in `exprs`, failing on the first invalid one.
    pub fn parse_all<I, S>(exprs: I) -> Result<Vec<Self>, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        exprs.into_iter().map(|e| Self::new(e.as_ref())).collect()
    }

    /// The expression text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if `topic` matches this expression.
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split(SEPARATOR);
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

/// Returns `true` iff at least one of `exprs` matches `topic`.
///
/// An empty list matches nothing: a component that declares no topics never
/// fires.
pub fn any_matches(exprs: &[TopicExpr], topic: &str) -> bool {
    exprs.iter().any(|expr| expr.matches(topic))
}

impl FromStr for TopicExpr {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TopicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

//! # Template Rendering
//!
//! DockhandSecret `data` values are Go-template-style strings whose actions
//! call secret backends:
//!
//! ```text
//! postgres://app:<< vault "secret/data/db" "password" >>@db:5432/app
//! ```
//!
//! Parsing resolves function names and arity up front so a malformed template
//! fails before any backend is contacted. Rendering is asynchronous and
//! all-or-nothing: [`render_data`] either returns every rendered value or the
//! first error, tagged with the data key that produced it.

pub mod parser;
pub mod render;

pub use parser::{Expr, Node, Template, parse};
pub use render::{render, render_data};

use crate::provider::BackendError;
use std::str::FromStr;

/// Action delimiters. Defaults to `<<` / `>>` so values can carry `{{ }}`
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::alternate()
    }
}

impl Delimiters {
    /// The `<<` / `>>` pair
    #[must_use]
    pub fn alternate() -> Self {
        Self {
            left: "<<".to_string(),
            right: ">>".to_string(),
        }
    }

    /// Go's standard `{{` / `}}` pair
    #[must_use]
    pub fn braces() -> Self {
        Self {
            left: "{{".to_string(),
            right: "}}".to_string(),
        }
    }
}

/// Parses `left,right`, e.g. `<<,>>`
impl FromStr for Delimiters {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (left, right) = s
            .split_once(',')
            .map(|(l, r)| (l.trim(), r.trim()))
            .filter(|(l, r)| !l.is_empty() && !r.is_empty())
            .ok_or_else(|| {
                TemplateError::Delimiters(format!("expected 'left,right', got '{s}'"))
            })?;

        if left == right {
            return Err(TemplateError::Delimiters(
                "left and right delimiters must differ".to_string(),
            ));
        }

        Ok(Self {
            left: left.to_string(),
            right: right.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template delimiters: {0}")]
    Delimiters(String),

    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),

    #[error("wrong number of args for {function}: want {expected} got {found}")]
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("error calling {function}: {source}")]
    Call {
        function: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("data key '{key}': {source}")]
    Data {
        key: String,
        #[source]
        source: Box<TemplateError>,
    },
}

impl TemplateError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        TemplateError::Parse {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delimiters() {
        let d = Delimiters::default();
        assert_eq!(d.left, "<<");
        assert_eq!(d.right, ">>");
        assert_eq!(d, Delimiters::alternate());
    }

    #[test]
    fn test_parse_brace_delimiters() {
        let d: Delimiters = "{{,}}".parse().unwrap();
        assert_eq!(d, Delimiters::braces());
    }

    #[test]
    fn test_parse_alternate_delimiters() {
        let d: Delimiters = "<<,>>".parse().unwrap();
        assert_eq!(d, Delimiters::alternate());
    }

    #[test]
    fn test_reject_malformed_delimiters() {
        assert!("<<".parse::<Delimiters>().is_err());
        assert!(",>>".parse::<Delimiters>().is_err());
        assert!("%%,%%".parse::<Delimiters>().is_err());
    }
}

//! Placeholder syntax for references into the resource graph.
//!
//! Serialized programs refer to values that only exist after provisioning
//! through placeholders the engine substitutes during apply.
//!
//! # Placeholder Format
//!
//! - `${<resource>.<key-path>}` - a key path on a provisioned resource,
//!   e.g. `${bucket.arn}` or `${site.tags.owner}`
//!
//! # Escaping
//!
//! A literal `${` is written as `$${` (and a literal `$${` as `$$${`).
//! `$` characters not followed by `{` pass through unchanged, so shell
//! variables like `$HOME` need no escaping.
//!
//! # Example
//!
//! ```
//! use stratus_lib::placeholder::{parse, Placeholder, Segment};
//!
//! let segments = parse("${bucket.arn}/*").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::new("bucket", "arn")),
//!     Segment::Literal("/*".to_string()),
//! ]);
//! ```

use thiserror::Error;

/// A parsed reference to a key path on a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placeholder {
  pub resource: String,
  pub path: String,
}

impl Placeholder {
  pub fn new(resource: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      path: path.into(),
    }
  }
}

impl std::fmt::Display for Placeholder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "${{{}.{}}}", self.resource, self.path)
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (escapes already removed)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("invalid name '{name}': {reason}")]
  InvalidName { name: String, reason: &'static str },

  #[error("invalid key path '{path}': {reason}")]
  InvalidKeyPath { path: String, reason: &'static str },

  #[error("unresolved reference: {resource}.{path}")]
  Unresolved { resource: String, path: String },
}

/// Resolves placeholders to concrete text.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError>;
}

/// Check that a resource name can appear inside a placeholder.
///
/// Names are non-empty and made of ASCII letters, digits, `-` and `_`.
pub fn validate_name(name: &str) -> Result<(), PlaceholderError> {
  let invalid = |reason| PlaceholderError::InvalidName {
    name: name.to_string(),
    reason,
  };

  if name.is_empty() {
    return Err(invalid("name is empty"));
  }
  if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
    return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
  }
  Ok(())
}

/// Check that a key path can appear inside a placeholder.
///
/// A key path is one or more non-empty segments separated by `.`; list
/// indexing such as `endpoints[0]` is allowed inside a segment.
pub fn validate_key_path(path: &str) -> Result<(), PlaceholderError> {
  let invalid = |reason| PlaceholderError::InvalidKeyPath {
    path: path.to_string(),
    reason,
  };

  if path.is_empty() {
    return Err(invalid("key path is empty"));
  }
  if path.split('.').any(str::is_empty) {
    return Err(invalid("key path has an empty segment"));
  }
  if path.chars().any(|c| c.is_whitespace() || matches!(c, '$' | '{' | '}')) {
    return Err(invalid("whitespace, '$', '{' and '}' are not allowed"));
  }
  Ok(())
}

/// Escape literal text so the engine never reads it as a placeholder.
///
/// Every run of `$` directly before `{` gains one extra `$`, which [`parse`]
/// removes again.
pub fn escape(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  let mut run = 0;

  for ch in text.chars() {
    match ch {
      '$' => run += 1,
      '{' if run > 0 => {
        escaped.extend(std::iter::repeat_n('$', run + 1));
        escaped.push('{');
        run = 0;
      }
      _ => {
        escaped.extend(std::iter::repeat_n('$', run));
        escaped.push(ch);
        run = 0;
      }
    }
  }
  escaped.extend(std::iter::repeat_n('$', run));
  escaped
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or its content is not a
/// valid `<resource>.<key-path>` pair.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    let mut run = 1;
    while chars.next_if(|(_, c)| *c == '$').is_some() {
      run += 1;
    }

    if chars.next_if(|(_, c)| *c == '{').is_none() {
      // Shell-style `$VAR` or `$$` pass through unchanged
      literal.extend(std::iter::repeat_n('$', run));
      continue;
    }

    if run > 1 {
      // Escaped: one `$` is dropped and the rest is literal text
      literal.extend(std::iter::repeat_n('$', run - 1));
      literal.push('{');
      continue;
    }

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }

    let mut content = String::new();
    let mut found_close = false;
    for (_, c) in chars.by_ref() {
      if c == '}' {
        found_close = true;
        break;
      }
      content.push(c);
    }

    if !found_close {
      return Err(PlaceholderError::Unclosed(pos));
    }

    segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content between `${` and `}`.
fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  let (resource, path) = content
    .split_once('.')
    .ok_or_else(|| PlaceholderError::Malformed(format!("missing key path in '{content}'")))?;

  validate_name(resource)?;
  validate_key_path(path)?;

  Ok(Placeholder::new(resource, path))
}

/// Substitute all placeholders in a string using the provided resolver.
///
/// Escaped sequences come out as their literal text.
///
/// # Errors
///
/// Returns an error if parsing fails or the resolver cannot resolve a
/// placeholder.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::with_capacity(input.len());

  for segment in parse(input)? {
    match segment {
      Segment::Literal(text) => result.push_str(&text),
      Segment::Placeholder(placeholder) => result.push_str(&resolver.resolve(&placeholder)?),
    }
  }

  Ok(result)
}

/// Collect the placeholders in a string, in order of appearance.
pub fn placeholders(input: &str) -> Result<Vec<Placeholder>, PlaceholderError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|segment| match segment {
        Segment::Placeholder(p) => Some(p),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}

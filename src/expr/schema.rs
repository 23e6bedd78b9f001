//! Statically declared variable schema for condition compilation.
//!
//! # Responsibilities
//! - Describe the kind of every variable visible to a condition
//! - Resolve dotted field paths to kinds at compile time
//!
//! # Design Decisions
//! - The schema is an explicit value built by hand, not derived by
//!   reflection or macros, so it can be inspected and tested directly
//! - Field access through a list maps over the elements: a `string`
//!   field reached through `list<object>` resolves to `list<string>`

use std::collections::BTreeMap;

/// Static kind of a value, known at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Bool,
    Number,
    String,
    List(Box<Kind>),
    Object(BTreeMap<String, Kind>),
    /// Kind of the `null` literal; comparable with `==`/`!=` only.
    Null,
}

impl Kind {
    pub fn list(inner: Kind) -> Kind {
        Kind::List(Box::new(inner))
    }

    pub fn object<I>(fields: I) -> Kind
    where
        I: IntoIterator<Item = (&'static str, Kind)>,
    {
        Kind::Object(
            fields
                .into_iter()
                .map(|(name, kind)| (name.to_string(), kind))
                .collect(),
        )
    }

    /// Human-readable kind name for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Kind::Bool => "bool".to_string(),
            Kind::Number => "number".to_string(),
            Kind::String => "string".to_string(),
            Kind::List(inner) => format!("list<{}>", inner.describe()),
            Kind::Object(_) => "object".to_string(),
            Kind::Null => "null".to_string(),
        }
    }
}

/// The set of variables a condition may reference, with their kinds.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    vars: BTreeMap<String, Kind>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. Later declarations replace earlier ones.
    pub fn declare(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.vars.insert(name.into(), kind);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Kind> {
        self.vars.get(name)
    }

    /// Resolve a dotted path (`payload.attachments.title`) to its kind.
    ///
    /// Traversing a field through a list wraps the result in `list<..>`,
    /// once per list level.
    pub fn resolve(&self, path: &[String]) -> Option<Kind> {
        let (root, rest) = path.split_first()?;
        let mut kind = self.vars.get(root)?.clone();
        for segment in rest {
            kind = resolve_field(&kind, segment)?;
        }
        Some(kind)
    }
}

fn resolve_field(kind: &Kind, field: &str) -> Option<Kind> {
    match kind {
        Kind::Object(fields) => fields.get(field).cloned(),
        Kind::List(inner) => {
            let element = resolve_field(inner, field)?;
            Some(Kind::list(element))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new()
            .declare("team_id", Kind::String)
            .declare(
                "payload",
                Kind::object([
                    ("text", Kind::String),
                    (
                        "attachments",
                        Kind::list(Kind::object([("title", Kind::String)])),
                    ),
                ]),
            )
    }

    #[test]
    fn test_resolve_scalar() {
        let schema = sample();
        assert_eq!(
            schema.resolve(&["team_id".to_string()]),
            Some(Kind::String)
        );
        assert_eq!(
            schema.resolve(&["payload".to_string(), "text".to_string()]),
            Some(Kind::String)
        );
    }

    #[test]
    fn test_resolve_through_list() {
        let schema = sample();
        let kind = schema
            .resolve(&[
                "payload".to_string(),
                "attachments".to_string(),
                "title".to_string(),
            ])
            .unwrap();
        assert_eq!(kind, Kind::list(Kind::String));
    }

    #[test]
    fn test_resolve_unknown() {
        let schema = sample();
        assert_eq!(schema.resolve(&["bogus".to_string()]), None);
        assert_eq!(
            schema.resolve(&["payload".to_string(), "bogus".to_string()]),
            None
        );
    }
}

//! Named query parameters.
//!
//! Query text may reference parameters as `:name`. A `::` sequence (SQL cast)
//! is never a placeholder, and nothing inside single-quoted literals or
//! double-quoted identifiers is scanned. Binding resolves every placeholder
//! against a [`ParamMap`]; each backend then renders the bound query in its
//! own placeholder style.

use std::collections::BTreeMap;

use crate::error::{FolioError, Result};
use crate::value::Value;

pub type ParamMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Query text split into literal runs and placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    raw: String,
    segments: Vec<Segment>,
}

/// How a backend wants positional parameters written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, …`; a name used twice reuses its index (PostgreSQL).
    Dollar,
    /// `?` once per occurrence (MySQL, ODBC).
    Question,
}

impl QueryTemplate {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut quote: Option<char> = None;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if let Some(q) = quote {
                literal.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    literal.push(c);
                }
                ':' => match chars.peek() {
                    Some(':') => {
                        chars.next();
                        literal.push_str("::");
                    }
                    Some(&n) if n.is_ascii_alphabetic() || n == '_' => {
                        let mut name = String::new();
                        while let Some(&n) = chars.peek() {
                            if n.is_ascii_alphanumeric() || n == '_' {
                                name.push(n);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Placeholder(name));
                    }
                    _ => literal.push(c),
                },
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for seg in &self.segments {
            if let Segment::Placeholder(name) = seg {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Resolve every placeholder against `params`.
    ///
    /// `query_name` is only used for the error report.
    pub fn bind(&self, query_name: &str, params: &ParamMap) -> Result<BoundQuery> {
        let mut values = ParamMap::new();
        for name in self.placeholders() {
            let value = params
                .get(name)
                .ok_or_else(|| FolioError::UnboundParameter {
                    query: query_name.to_string(),
                    name: name.to_string(),
                })?;
            values.insert(name.to_string(), value.clone());
        }
        Ok(BoundQuery {
            template: self.clone(),
            values,
        })
    }
}

/// A query whose placeholders all have values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    template: QueryTemplate,
    values: ParamMap,
}

impl BoundQuery {
    pub fn raw(&self) -> &str {
        self.template.raw()
    }

    /// The values of the parameters the query actually references.
    pub fn params(&self) -> &ParamMap {
        &self.values
    }

    /// Render with positional placeholders, returning the values in bind order.
    pub fn positional(&self, style: PlaceholderStyle) -> (String, Vec<Value>) {
        let mut sql = String::with_capacity(self.template.raw.len());
        let mut binds: Vec<Value> = Vec::new();
        let mut order: Vec<&str> = Vec::new();

        for seg in &self.template.segments {
            match seg {
                Segment::Literal(text) => sql.push_str(text),
                Segment::Placeholder(name) => {
                    let value = self.values.get(name).cloned().unwrap_or(Value::Null);
                    match style {
                        PlaceholderStyle::Dollar => {
                            let idx = match order.iter().position(|n| n == name) {
                                Some(i) => i,
                                None => {
                                    order.push(name);
                                    binds.push(value);
                                    order.len() - 1
                                }
                            };
                            sql.push_str(&format!("${}", idx + 1));
                        }
                        PlaceholderStyle::Question => {
                            binds.push(value);
                            sql.push('?');
                        }
                    }
                }
            }
        }
        (sql, binds)
    }

    /// Render with every placeholder replaced by its value's text, unquoted.
    ///
    /// Used by backends whose "query" is a file path or table name.
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.template.raw.len());
        for seg in &self.template.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(v) = self.values.get(name) {
                        out.push_str(&v.to_string());
                    }
                }
            }
        }
        out
    }

    /// Canonical serialization of the bound values, sorted by name.
    pub fn canonical_params(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.canonical()))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_placeholders() {
        let t = QueryTemplate::parse("SELECT * FROM orders WHERE month = :month AND region = :region");
        assert_eq!(t.placeholders(), vec!["month", "region"]);
    }

    #[test]
    fn test_cast_is_not_placeholder() {
        let t = QueryTemplate::parse("SELECT amount::text FROM t WHERE id = :id");
        assert_eq!(t.placeholders(), vec!["id"]);
        let bound = t.bind("q", &params(&[("id", Value::Number(3.0))])).unwrap();
        let (sql, binds) = bound.positional(PlaceholderStyle::Dollar);
        assert_eq!(sql, "SELECT amount::text FROM t WHERE id = $1");
        assert_eq!(binds, vec![Value::Number(3.0)]);
    }

    #[test]
    fn test_quoted_text_is_not_scanned() {
        let t = QueryTemplate::parse("SELECT ':nope', \"col:x\" FROM t WHERE a = :yes");
        assert_eq!(t.placeholders(), vec!["yes"]);
    }

    #[test]
    fn test_lone_colon_is_literal() {
        let t = QueryTemplate::parse("SELECT '10:30' AS t, 1 : 2");
        assert!(t.placeholders().is_empty());
        let bound = t.bind("q", &ParamMap::new()).unwrap();
        assert_eq!(bound.inline(), "SELECT '10:30' AS t, 1 : 2");
    }

    #[test]
    fn test_unbound_parameter() {
        let t = QueryTemplate::parse("SELECT * FROM t WHERE a = :a AND b = :b");
        let err = t.bind("orders", &params(&[("a", Value::Number(1.0))])).unwrap_err();
        match err {
            FolioError::UnboundParameter { query, name } => {
                assert_eq!(query, "orders");
                assert_eq!(name, "b");
            }
            other => panic!("expected UnboundParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_dollar_style_reuses_index() {
        let t = QueryTemplate::parse("SELECT * FROM t WHERE a = :x OR b = :y OR c = :x");
        let bound = t
            .bind("q", &params(&[("x", Value::text("1")), ("y", Value::text("2"))]))
            .unwrap();
        let (sql, binds) = bound.positional(PlaceholderStyle::Dollar);
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 OR b = $2 OR c = $1");
        assert_eq!(binds, vec![Value::text("1"), Value::text("2")]);
    }

    #[test]
    fn test_question_style_binds_each_occurrence() {
        let t = QueryTemplate::parse("SELECT * FROM t WHERE a = :x OR c = :x");
        let bound = t.bind("q", &params(&[("x", Value::text("1"))])).unwrap();
        let (sql, binds) = bound.positional(PlaceholderStyle::Question);
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? OR c = ?");
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn test_inline_for_file_paths() {
        let t = QueryTemplate::parse("exports/orders_:month.csv");
        let bound = t.bind("q", &params(&[("month", Value::text("2024_01"))])).unwrap();
        assert_eq!(bound.inline(), "exports/orders_2024_01.csv");
    }

    #[test]
    fn test_canonical_params_only_include_referenced() {
        let t = QueryTemplate::parse("SELECT :b, :a");
        let bound = t
            .bind(
                "q",
                &params(&[
                    ("a", Value::Number(1.0)),
                    ("b", Value::text("x")),
                    ("unused", Value::text("zzz")),
                ]),
            )
            .unwrap();
        assert_eq!(bound.canonical_params(), "a=n:1.0&b=t1:x");
    }
}

//! Patterns tested by `match` arms

use serde::{Deserialize, Serialize};

use super::Expr;

/// A pattern in a `case` arm
///
/// Case patterns name a case of the subject's enum and hold one
/// subpattern per associated value, so patterns nest as deeply as the
/// values they destructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// `_`: matches anything
    Wildcard,
    /// `let name`: matches anything and binds it for the arm's body
    Binding(String),
    /// `.name(...)`: matches the named case, then each associated value
    Case {
        name: String,
        #[serde(default)]
        values: Vec<Pattern>,
    },
    /// Matches a value equal to the expression's
    Value(Expr),
}

impl Pattern {
    /// `let name`
    #[must_use]
    pub fn bind(name: impl Into<String>) -> Self {
        Pattern::Binding(name.into())
    }

    /// `.name(values...)`
    #[must_use]
    pub fn case(name: impl Into<String>, values: Vec<Pattern>) -> Self {
        Pattern::Case {
            name: name.into(),
            values,
        }
    }

    /// An equality test
    #[must_use]
    pub fn value(expr: Expr) -> Self {
        Pattern::Value(expr)
    }

    /// Names bound by this pattern, in the order they are bound
    #[must_use]
    pub fn bindings(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_bindings(&mut names);
        names
    }

    fn collect_bindings<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Pattern::Binding(name) => names.push(name),
            Pattern::Case { values, .. } => {
                for value in values {
                    value.collect_bindings(names);
                }
            }
            Pattern::Wildcard | Pattern::Value(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_bindings_in_order() {
        let pattern = Pattern::case(
            "foo",
            vec![
                Pattern::bind("a"),
                Pattern::case("fizz", vec![Pattern::bind("b")]),
                Pattern::Wildcard,
            ],
        );
        assert_eq!(pattern.bindings(), vec!["a", "b"]);
    }

    #[test]
    fn pattern_json_shape() {
        let json = r#"{ "case": { "name": "bar", "values": [{ "binding": "b" }] } }"#;
        let parsed: Pattern = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, Pattern::case("bar", vec![Pattern::bind("b")]));

        let bare: Pattern = serde_json::from_str(r#"{ "case": { "name": "red" } }"#).unwrap();
        assert_eq!(bare, Pattern::case("red", vec![]));
        assert_eq!(serde_json::to_string(&Pattern::Wildcard).unwrap(), r#""wildcard""#);
    }
}

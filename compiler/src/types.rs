// types.rs — The Tempo value type lattice.
//
// Types attached to expressions and header declarations. Unknown is the
// degraded type assigned when inference cannot proceed (errored children,
// disabled type checking); it is assignable in both directions so that a
// single root error does not cascade through every enclosing expression.

use std::fmt;

/// A Tempo value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempoType {
    Unknown,
    Any,
    Null,
    Bool,
    Int,
    Float,
    String,
    Html,
    Attributes,
    Uri,
    Js,
    Css,
    List(Box<TempoType>),
}

impl TempoType {
    /// Parse a declared type as written in a template header.
    /// `?` is the explicit unknown type.
    pub fn parse(text: &str) -> Option<TempoType> {
        let text = text.trim();
        if let Some(inner) = text
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return TempoType::parse(inner).map(|t| TempoType::List(Box::new(t)));
        }
        match text {
            "?" => Some(TempoType::Unknown),
            "any" => Some(TempoType::Any),
            "null" => Some(TempoType::Null),
            "bool" => Some(TempoType::Bool),
            "int" => Some(TempoType::Int),
            "float" => Some(TempoType::Float),
            "number" => Some(TempoType::Float),
            "string" => Some(TempoType::String),
            "html" => Some(TempoType::Html),
            "attributes" => Some(TempoType::Attributes),
            "uri" => Some(TempoType::Uri),
            "js" => Some(TempoType::Js),
            "css" => Some(TempoType::Css),
            _ => None,
        }
    }

    /// Whether a value of type `from` is acceptable where `self` is
    /// expected. Unknown and Any absorb everything in both directions;
    /// Int widens to Float; every non-null type accepts Null.
    pub fn is_assignable_from(&self, from: &TempoType) -> bool {
        use TempoType::*;
        match (self, from) {
            (Unknown, _) | (_, Unknown) => true,
            (Any, _) | (_, Any) => true,
            (_, Null) => true,
            (Float, Int) => true,
            (List(a), List(b)) => a.is_assignable_from(b),
            (a, b) => a == b,
        }
    }

    /// Least common type of two inferred types, used for conditional
    /// branches and list literals. Falls back to Unknown when the sides
    /// do not unify.
    pub fn common(a: &TempoType, b: &TempoType) -> TempoType {
        use TempoType::*;
        if a == b {
            return a.clone();
        }
        match (a, b) {
            (Unknown, other) | (other, Unknown) => other.clone(),
            (Null, other) | (other, Null) => other.clone(),
            (Int, Float) | (Float, Int) => Float,
            (List(x), List(y)) => List(Box::new(TempoType::common(x, y))),
            _ => Unknown,
        }
    }

    /// Whether arithmetic is defined on this type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TempoType::Int | TempoType::Float | TempoType::Unknown)
    }
}

impl fmt::Display for TempoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempoType::Unknown => write!(f, "?"),
            TempoType::Any => write!(f, "any"),
            TempoType::Null => write!(f, "null"),
            TempoType::Bool => write!(f, "bool"),
            TempoType::Int => write!(f, "int"),
            TempoType::Float => write!(f, "float"),
            TempoType::String => write!(f, "string"),
            TempoType::Html => write!(f, "html"),
            TempoType::Attributes => write!(f, "attributes"),
            TempoType::Uri => write!(f, "uri"),
            TempoType::Js => write!(f, "js"),
            TempoType::Css => write!(f, "css"),
            TempoType::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

//! Filter domains in prefix notation.
//!
//! A domain is a list of terms `(field, operator, value)` and logical operators
//! `&`, `|` and `!` written in Polish notation. Consecutive top-level items are
//! implicitly joined with `&`, so `[A, '|', B, C]` means `A and (B or C)`.

use crate::error::{ReportError, Result};
use crate::value::{Record, Value};
use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    ILike,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::ILike => "ilike",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        let op = match op.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Term {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => field_equals(actual, &self.value),
            Operator::Ne => !field_equals(actual, &self.value),
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                let expected = coerce_like(&self.value, actual);
                match actual.partial_cmp_value(&expected) {
                    Some(ord) => match self.operator {
                        Operator::Lt => ord.is_lt(),
                        Operator::Le => ord.is_le(),
                        Operator::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    },
                    None => false,
                }
            }
            Operator::In | Operator::NotIn => {
                let found = match &self.value {
                    Value::List(items) => items.iter().any(|item| field_equals(actual, item)),
                    other => field_equals(actual, other),
                };
                found == (self.operator == Operator::In)
            }
            Operator::Like | Operator::ILike => {
                let (Some(haystack), Some(needle)) = (actual.as_text(), self.value.as_text())
                else {
                    return false;
                };
                if self.operator == Operator::ILike {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    haystack.contains(needle)
                }
            }
        }
    }
}

/// `field = False` also selects unset fields.
fn field_equals(actual: &Value, expected: &Value) -> bool {
    if matches!(expected, Value::Bool(false)) && actual.is_null() {
        return true;
    }
    actual.loose_eq(&coerce_like(expected, actual))
}

/// Text literals compared against date fields are read as dates.
fn coerce_like(expected: &Value, actual: &Value) -> Value {
    match (expected, actual) {
        (Value::Text(s), Value::Date(_)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or_else(|_| expected.clone()),
        (Value::Text(s), Value::DateTime(_)) => {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(Value::DateTime)
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Value::Date))
                .unwrap_or_else(|_| expected.clone())
        }
        _ => expected.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainItem {
    And,
    Or,
    Not,
    Term(Term),
}

impl DomainItem {
    fn arity(&self) -> i32 {
        match self {
            DomainItem::And | DomainItem::Or => 2,
            DomainItem::Not => 1,
            DomainItem::Term(_) => 0,
        }
    }
}

impl Serialize for DomainItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DomainItem::And => serializer.serialize_str("&"),
            DomainItem::Or => serializer.serialize_str("|"),
            DomainItem::Not => serializer.serialize_str("!"),
            DomainItem::Term(term) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&term.field)?;
                seq.serialize_element(term.operator.as_str())?;
                seq.serialize_element(&term.value)?;
                seq.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Domain(Vec<DomainItem>);

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.push_term(Term::new(field, op, value));
        self
    }

    pub fn push_term(&mut self, term: Term) {
        self.0.push(DomainItem::Term(term));
    }

    pub fn push(&mut self, item: DomainItem) {
        self.0.push(item);
    }

    pub fn items(&self) -> &[DomainItem] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the textual form, e.g. `[('state', '=', 'posted'), '|', ('a', '>', 1), ('b', '=', None)]`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let invalid = |details: String| ReportError::InvalidDomain {
            domain: text.to_string(),
            details,
        };

        let mut parser = LiteralParser::new(text);
        let root = parser.parse_value().map_err(invalid)?;
        parser.expect_end().map_err(invalid)?;

        let Value::List(items) = root else {
            return Err(invalid("a domain must be a list".to_string()));
        };

        let mut domain = Self::new();
        for item in items {
            match item {
                Value::Text(op) => match op.as_str() {
                    "&" => domain.push(DomainItem::And),
                    "|" => domain.push(DomainItem::Or),
                    "!" => domain.push(DomainItem::Not),
                    other => return Err(invalid(format!("unknown logical operator '{}'", other))),
                },
                Value::List(parts) if parts.len() == 3 => {
                    let mut parts = parts.into_iter();
                    let (field, op, value) = match (parts.next(), parts.next(), parts.next()) {
                        (Some(Value::Text(field)), Some(Value::Text(op)), Some(value)) => {
                            (field, op, value)
                        }
                        _ => return Err(invalid("malformed term".to_string())),
                    };
                    let operator = Operator::parse(&op)
                        .ok_or_else(|| invalid(format!("unsupported operator '{}'", op)))?;
                    domain.push_term(Term {
                        field,
                        operator,
                        value,
                    });
                }
                other => return Err(invalid(format!("unexpected domain item {}", other))),
            }
        }
        domain.normalized()
    }

    /// Makes every implicit `&` explicit so the domain can be nested in another one.
    pub fn normalized(&self) -> Result<Self> {
        if self.0.is_empty() {
            return Ok(Self::new());
        }
        let mut result: Vec<DomainItem> = Vec::with_capacity(self.0.len() + 1);
        let mut expected = 1;
        for item in &self.0 {
            if expected == 0 {
                result.insert(0, DomainItem::And);
                expected = 1;
            }
            expected += item.arity() - 1;
            result.push(item.clone());
        }
        if expected != 0 {
            return Err(ReportError::InvalidDomain {
                domain: self.to_string(),
                details: "logical operators are missing operands".to_string(),
            });
        }
        Ok(Self(result))
    }

    /// Conjunction of several domains; empty domains are ignored.
    pub fn and_all<'a, I>(domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        let normalized: Vec<Domain> = domains
            .into_iter()
            .filter(|d| !d.is_empty())
            .map(Domain::normalized)
            .collect::<Result<_>>()?;

        let mut items = Vec::new();
        for _ in 1..normalized.len() {
            items.push(DomainItem::And);
        }
        for domain in normalized {
            items.extend(domain.0);
        }
        Ok(Self(items))
    }

    pub fn matches(&self, record: &Record) -> Result<bool> {
        let normalized = self.normalized()?;
        if normalized.is_empty() {
            return Ok(true);
        }
        let mut pos = 0;
        Ok(eval_prefix(&normalized.0, &mut pos, record))
    }
}

fn eval_prefix(items: &[DomainItem], pos: &mut usize, record: &Record) -> bool {
    let item = &items[*pos];
    *pos += 1;
    match item {
        DomainItem::Term(term) => term.matches(record),
        DomainItem::Not => !eval_prefix(items, pos, record),
        DomainItem::And => {
            let left = eval_prefix(items, pos, record);
            let right = eval_prefix(items, pos, record);
            left && right
        }
        DomainItem::Or => {
            let left = eval_prefix(items, pos, record);
            let right = eval_prefix(items, pos, record);
            left || right
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, item) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match item {
                DomainItem::And => write!(f, "'&'")?,
                DomainItem::Or => write!(f, "'|'")?,
                DomainItem::Not => write!(f, "'!'")?,
                DomainItem::Term(term) => {
                    let value = match &term.value {
                        Value::Text(s) => format!("'{}'", s),
                        other => other.to_string(),
                    };
                    write!(f, "('{}', '{}', {})", term.field, term.operator.as_str(), value)?
                }
            }
        }
        write!(f, "]")
    }
}

/// Reads list/tuple literals made of strings, numbers, `True`, `False` and `None`.
struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect_end(&mut self) -> std::result::Result<(), String> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(format!("unexpected '{}' at offset {}", c, self.pos)),
        }
    }

    fn parse_value(&mut self) -> std::result::Result<Value, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('[') => self.parse_sequence(']'),
            Some('(') => self.parse_sequence(')'),
            Some(q @ ('\'' | '"')) => self.parse_string(q),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                    self.bump();
                }
                match &self.src[start..self.pos] {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::Null),
                    other => Err(format!("unexpected name '{}'", other)),
                }
            }
            Some(c) => Err(format!("unexpected '{}' at offset {}", c, self.pos)),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn parse_sequence(&mut self, close: char) -> std::result::Result<Value, String> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::List(items)),
                Some(c) => return Err(format!("expected ',' or '{}', found '{}'", close, c)),
                None => return Err(format!("missing closing '{}'", close)),
            }
        }
    }

    fn parse_string(&mut self, quote: char) -> std::result::Result<Value, String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated string".to_string()),
                },
                Some(c) if c == quote => return Ok(Value::Text(out)),
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn parse_number(&mut self) -> std::result::Result<Value, String> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E'))
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Value::Number)
            .map_err(|_| format!("invalid number '{}'", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_and_match() {
        let domain =
            Domain::parse("[('state', '=', 'done'), '|', ('amount', '>', 100), ('vip', '=', True)]")
                .unwrap();
        // implicit conjunctions are made explicit
        assert_eq!(domain.items().len(), 5);
        assert_eq!(domain.items()[0], DomainItem::And);
        assert!(domain
            .to_string()
            .starts_with("['&', ('state', '=', 'done'), '|', ('amount', '>', 100)"));

        let big = record(&[("state", "done".into()), ("amount", 150.0.into())]);
        let vip = record(&[
            ("state", "done".into()),
            ("amount", 10.0.into()),
            ("vip", true.into()),
        ]);
        let small = record(&[("state", "done".into()), ("amount", 10.0.into())]);
        let draft = record(&[("state", "draft".into()), ("amount", 150.0.into())]);

        assert!(domain.matches(&big).unwrap());
        assert!(domain.matches(&vip).unwrap());
        assert!(!domain.matches(&small).unwrap());
        assert!(!domain.matches(&draft).unwrap());
    }

    #[test]
    fn test_normalize_adds_implicit_and() {
        let domain = Domain::new()
            .with_term("a", Operator::Eq, 1.0)
            .with_term("b", Operator::Eq, 2.0);
        let normalized = domain.normalized().unwrap();
        assert_eq!(normalized.items()[0], DomainItem::And);
        assert_eq!(normalized.items().len(), 3);
    }

    #[test]
    fn test_and_all_keeps_or_groups_intact() {
        let base = Domain::parse("['|', ('a', '=', 1), ('b', '=', 1)]").unwrap();
        let extra = Domain::new().with_term("c", Operator::Eq, 1.0);
        let combined = Domain::and_all([&base, &Domain::new(), &extra]).unwrap();

        let only_a = record(&[("a", 1.0.into())]);
        let a_and_c = record(&[("a", 1.0.into()), ("c", 1.0.into())]);
        assert!(!combined.matches(&only_a).unwrap());
        assert!(combined.matches(&a_and_c).unwrap());
    }

    #[test]
    fn test_false_matches_unset_field() {
        let domain = Domain::parse("['|', ('company_id', '=', False), ('company_id', '=', 3)]")
            .unwrap();
        assert!(domain.matches(&record(&[])).unwrap());
        assert!(domain.matches(&record(&[("company_id", 3.0.into())])).unwrap());
        assert!(!domain.matches(&record(&[("company_id", 4.0.into())])).unwrap());
    }

    #[test]
    fn test_date_text_coercion() {
        let domain = Domain::parse("[('date', '>=', '2024-01-01')]").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(domain.matches(&record(&[("date", date.into())])).unwrap());
    }

    #[test]
    fn test_in_and_like() {
        let domain = Domain::parse("[('state', 'in', ['a', 'b']), ('name', 'ilike', 'INV')]")
            .unwrap();
        assert!(domain
            .matches(&record(&[("state", "b".into()), ("name", "inv/001".into())]))
            .unwrap());
        assert!(!domain
            .matches(&record(&[("state", "c".into()), ("name", "inv/001".into())]))
            .unwrap());
    }

    #[test]
    fn test_invalid_domains() {
        assert!(Domain::parse("[('a', '~', 1)]").is_err());
        assert!(Domain::parse("['|', ('a', '=', 1)]").is_err());
        assert!(Domain::parse("('a', '=', 1)").is_err());
        assert!(Domain::parse("[('a', '=', 1)").is_err());
        assert!(Domain::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn test_serializes_to_list_form() {
        let domain = Domain::new()
            .with_term("state", Operator::NotIn, Value::List(vec!["draft".into()]));
        let json = serde_json::to_string(&domain).unwrap();
        assert_eq!(json, r#"[["state","not in",["draft"]]]"#);
    }
}

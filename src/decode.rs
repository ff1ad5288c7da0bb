use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::DataError;
use crate::models::{StudentClass, Subject};

// Date formats used by the upstream service.
pub const DATE_FORMAT: &str = "%d/%m/%Y";
pub const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

// One entry of an attribute guide: walk `path` in the raw payload, coerce the
// located value, store it under `field` in the decoded record.
pub struct AttributeMapping {
    pub path: &'static str,
    pub field: &'static str,
    pub coerce: Coerce,
}

// Static, per-entity-kind table consulted by `decode`.
pub type AttributeGuide = &'static [AttributeMapping];

// The coercions an attribute guide can declare. `Subject` and `StudentClass`
// recursively construct a nested entity from the resolved sub-document.
pub enum Coerce {
    Str,
    Bool,
    Int,
    Date,
    DateTime,
    StripHtml,
    Subject,
    StudentClass,
}

// A value produced by a coercion, keyed by field name in a `DecodedRecord`.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Str(String),
    Bool(bool),
    Int(i64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Subject(Subject),
    StudentClass(StudentClass),
}

impl Field {
    pub fn into_str(self) -> Option<String> {
        match self {
            Field::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            Field::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_int(self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            Field::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_datetime(self) -> Option<NaiveDateTime> {
        match self {
            Field::DateTime(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_subject(self) -> Option<Subject> {
        match self {
            Field::Subject(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_student_class(self) -> Option<StudentClass> {
        match self {
            Field::StudentClass(c) => Some(c),
            _ => None,
        }
    }
}

// Ephemeral output of one `decode` call. Every field declared in the guide is
// present as a key; absent paths map to `None`. Entity constructors take the
// values out and the record is dropped.
#[derive(Debug, Default)]
pub struct DecodedRecord {
    fields: HashMap<&'static str, Field>,
}

impl DecodedRecord {
    pub fn take(&mut self, field: &'static str) -> Option<Field> {
        self.fields.remove(field)
    }

    pub fn take_str(&mut self, field: &'static str) -> Option<String> {
        self.take(field).and_then(Field::into_str)
    }

    pub fn take_bool(&mut self, field: &'static str) -> Option<bool> {
        self.take(field).and_then(Field::into_bool)
    }

    pub fn take_int(&mut self, field: &'static str) -> Option<i64> {
        self.take(field).and_then(Field::into_int)
    }

    pub fn take_date(&mut self, field: &'static str) -> Option<NaiveDate> {
        self.take(field).and_then(Field::into_date)
    }

    pub fn take_datetime(&mut self, field: &'static str) -> Option<NaiveDateTime> {
        self.take(field).and_then(Field::into_datetime)
    }

    pub fn take_subject(&mut self, field: &'static str) -> Option<Subject> {
        self.take(field).and_then(Field::into_subject)
    }
}

// Walks `document` along a comma-delimited path, e.g. "note,V". A missing key
// (or a JSON null) at any depth is the expected "field not sent" case and
// yields Ok(None); a present non-object value met before the path is exhausted
// means the payload is malformed and is an error.
pub fn resolve<'a>(document: &'a Value, path: &str) -> Result<Option<&'a Value>, DataError> {
    let mut current = document;
    for segment in path.split(',') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            _ => {
                return Err(DataError::UnexpectedShape {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        }
    }
    if current.is_null() {
        return Ok(None);
    }
    Ok(Some(current))
}

// Like `resolve`, but for values the upstream service always sends.
pub fn resolve_required<'a>(document: &'a Value, path: &str) -> Result<&'a Value, DataError> {
    resolve(document, path)?.ok_or_else(|| DataError::MissingValue {
        path: path.to_string(),
    })
}

// Applies an attribute guide to a raw payload. Absent paths are skipped (the
// record then answers `None` for them); located values are coerced, and a
// coercion failure is reported with the field and path it occurred on.
pub fn decode(guide: AttributeGuide, document: &Value) -> Result<DecodedRecord, DataError> {
    let mut record = DecodedRecord::default();
    for mapping in guide {
        if let Some(value) = resolve(document, mapping.path)? {
            let coerced =
                apply(&mapping.coerce, value).map_err(|reason| DataError::Coercion {
                    field: mapping.field,
                    path: mapping.path,
                    reason,
                })?;
            record.fields.insert(mapping.field, coerced);
        }
    }
    Ok(record)
}

fn apply(coerce: &Coerce, value: &Value) -> Result<Field, String> {
    match coerce {
        Coerce::Str => as_string(value).map(Field::Str),
        Coerce::Bool => match value {
            Value::Bool(b) => Ok(Field::Bool(*b)),
            other => Err(format!("expected a boolean, got {other}")),
        },
        Coerce::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(Field::Int)
                .ok_or_else(|| format!("expected an integer, got {n}")),
            // The service sometimes sends numeric fields as strings.
            Value::String(s) => s
                .parse()
                .map(Field::Int)
                .map_err(|_| format!("expected an integer, got {s:?}")),
            other => Err(format!("expected an integer, got {other}")),
        },
        Coerce::Date => {
            let s = as_string(value)?;
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map(Field::Date)
                .map_err(|e| format!("invalid date {s:?}: {e}"))
        }
        Coerce::DateTime => {
            let s = as_string(value)?;
            NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
                .map(Field::DateTime)
                .map_err(|e| format!("invalid datetime {s:?}: {e}"))
        }
        Coerce::StripHtml => as_string(value).map(|s| Field::Str(strip_html(&s))),
        Coerce::Subject => Subject::new(value)
            .map(Field::Subject)
            .map_err(|e| e.to_string()),
        Coerce::StudentClass => StudentClass::new(value)
            .map(Field::StudentClass)
            .map_err(|e| e.to_string()),
    }
}

fn as_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("expected a string, got {other}")),
    }
}

// Removes HTML-ish markup from free-text fields, keeping only the text.
pub fn strip_html(raw: &str) -> String {
    HTML_TAG.replace_all(raw, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GUIDE: AttributeGuide = &[
        AttributeMapping {
            path: "N",
            field: "id",
            coerce: Coerce::Str,
        },
        AttributeMapping {
            path: "note,V",
            field: "grade",
            coerce: Coerce::Str,
        },
        AttributeMapping {
            path: "date,V",
            field: "date",
            coerce: Coerce::Date,
        },
    ];

    #[test]
    fn resolve_walks_nested_objects() {
        let doc = json!({"a": {"b": {"c": 3}}});
        let found = resolve(&doc, "a,b,c").unwrap();
        assert_eq!(found, Some(&json!(3)));
    }

    #[test]
    fn resolve_missing_key_is_absent_not_an_error() {
        let doc = json!({"a": {"b": 1}});
        assert!(resolve(&doc, "a,z").unwrap().is_none());
        assert!(resolve(&doc, "z,b").unwrap().is_none());
    }

    #[test]
    fn resolve_null_is_absent() {
        let doc = json!({"note": null});
        assert!(resolve(&doc, "note").unwrap().is_none());
        assert!(resolve(&doc, "note,V").unwrap().is_none());
    }

    #[test]
    fn resolve_through_non_object_is_malformed() {
        let doc = json!({"a": 5});
        let err = resolve(&doc, "a,b").unwrap_err();
        assert!(matches!(err, DataError::UnexpectedShape { .. }));
    }

    #[test]
    fn decode_fills_every_declared_field() {
        let doc = json!({"N": "12", "note": {"V": "17.5"}, "date": {"V": "03/04/2024"}});
        let mut record = decode(GUIDE, &doc).unwrap();
        assert_eq!(record.take_str("id").as_deref(), Some("12"));
        assert_eq!(record.take_str("grade").as_deref(), Some("17.5"));
        assert_eq!(
            record.take_date("date"),
            NaiveDate::from_ymd_opt(2024, 4, 3)
        );
    }

    #[test]
    fn decode_missing_path_yields_none_without_error() {
        let doc = json!({"N": "12"});
        let mut record = decode(GUIDE, &doc).unwrap();
        assert_eq!(record.take_str("id").as_deref(), Some("12"));
        assert_eq!(record.take_str("grade"), None);
        assert_eq!(record.take_date("date"), None);
    }

    #[test]
    fn decode_reports_coercion_failures_with_context() {
        let doc = json!({"date": {"V": "not a date"}});
        let err = decode(GUIDE, &doc).unwrap_err();
        match err {
            DataError::Coercion { field, path, .. } => {
                assert_eq!(field, "date");
                assert_eq!(path, "date,V");
            }
            other => panic!("expected a coercion error, got {other}"),
        }
    }

    #[test]
    fn strip_html_removes_tags_only() {
        assert_eq!(
            strip_html("<p>Exercices <b>1 et 2</b> p. 34</p>"),
            "Exercices 1 et 2 p. 34"
        );
        assert_eq!(strip_html("no markup"), "no markup");
    }
}

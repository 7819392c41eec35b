//! Runtime values flowing between the interpreter and effect providers.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde::ser::SerializeMap;

use crate::ir::Scalar;
use crate::money::Money;

/// One table row. Keyed by column name; `BTreeMap` keeps serialization and
/// iteration order deterministic.
pub type Row = BTreeMap<String, Datum>;

/// Tables are plain row vectors, replaced wholesale by table-algebra ops.
pub type Rows = Vec<Row>;

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Money(Money),
    Date(NaiveDate),
    Row(Row),
    Rows(Rows),
}

impl Datum {
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "boolean",
            Datum::Number(_) => "number",
            Datum::Str(_) => "string",
            Datum::Money(_) => "money",
            Datum::Date(_) => "date",
            Datum::Row(_) => "row",
            Datum::Rows(_) => "table",
        }
    }

    pub fn from_scalar(scalar: &Scalar) -> Datum {
        match scalar {
            Scalar::Null => Datum::Null,
            Scalar::Bool(value) => Datum::Bool(*value),
            Scalar::Number(value) => Datum::Number(*value),
            Scalar::Str(value) => Datum::Str(value.clone()),
            Scalar::Money(money) => Datum::Money(*money),
            Scalar::Date(date) => Datum::Date(*date),
            Scalar::Range(range) => Datum::Str(range.to_string()),
        }
    }

    /// Scalar form for substituting a bound variable back into an
    /// expression tree. Rows and tables have no scalar form.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Datum::Null => Some(Scalar::Null),
            Datum::Bool(value) => Some(Scalar::Bool(*value)),
            Datum::Number(value) => Some(Scalar::Number(*value)),
            Datum::Str(value) => Some(Scalar::Str(value.clone())),
            Datum::Money(money) => Some(Scalar::Money(*money)),
            Datum::Date(date) => Some(Scalar::Date(*date)),
            Datum::Row(_) | Datum::Rows(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<Rows> {
        match self {
            Datum::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

impl Serialize for Datum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Datum::Null => serializer.serialize_unit(),
            Datum::Bool(value) => serializer.serialize_bool(*value),
            Datum::Number(value) => serializer.serialize_f64(*value),
            Datum::Str(value) => serializer.serialize_str(value),
            Datum::Money(money) => money.serialize(serializer),
            Datum::Date(date) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("date", &date.format("%Y-%m-%d").to_string())?;
                map.end()
            }
            Datum::Row(row) => row.serialize(serializer),
            Datum::Rows(rows) => rows.serialize(serializer),
        }
    }
}

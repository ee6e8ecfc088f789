//! Value conversion from sea-query to may_postgres parameters.
//!
//! The conversion follows a two-pass pattern:
//! 1. First pass: collect all values into typed vectors
//! 2. Second pass: create references to the stored values
//!
//! so the references handed to the driver stay valid for the closure's scope.

use crate::executor::StoreError;
use chrono::{NaiveDate, NaiveDateTime};
use may_postgres::types::ToSql;
use sea_query::{Value, Values};

/// Convert sea-query values to `ToSql` parameters and run `f` with them.
///
/// Parameter order is exactly the order of `values`, which is the order the
/// placeholders (`$1`, `$2`, ...) were emitted by the query builder.
///
/// # Errors
///
/// Returns `StoreError::QueryError` for value types partition columns never hold.
pub fn with_converted_params<F, R>(values: &Values, f: F) -> Result<R, StoreError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, StoreError>,
{
    let mut strings: Vec<Option<String>> = Vec::new();
    let mut big_ints: Vec<Option<i64>> = Vec::new();
    let mut dates: Vec<Option<NaiveDate>> = Vec::new();
    let mut timestamps: Vec<Option<NaiveDateTime>> = Vec::new();

    // First pass: collect all values into typed vectors
    for value in values.iter() {
        match value {
            Value::String(s) => strings.push(s.clone()),
            Value::BigInt(i) => big_ints.push(*i),
            Value::Int(i) => big_ints.push(i.map(i64::from)),
            Value::ChronoDate(d) => dates.push(d.as_ref().map(|d| {
                let date: &NaiveDate = d;
                *date
            })),
            Value::ChronoDateTime(ts) => timestamps.push(ts.as_ref().map(|ts| {
                let ts: &NaiveDateTime = ts;
                *ts
            })),
            _ => {
                return Err(StoreError::QueryError(format!(
                    "Unsupported value type in query: {value:?}"
                )));
            }
        }
    }

    // Second pass: create references to the stored values
    let mut string_idx = 0;
    let mut big_int_idx = 0;
    let mut date_idx = 0;
    let mut timestamp_idx = 0;

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.iter().count());

    for value in values.iter() {
        match value {
            Value::String(_) => {
                params.push(&strings[string_idx] as &dyn ToSql);
                string_idx += 1;
            }
            Value::BigInt(_) | Value::Int(_) => {
                params.push(&big_ints[big_int_idx] as &dyn ToSql);
                big_int_idx += 1;
            }
            Value::ChronoDate(_) => {
                params.push(&dates[date_idx] as &dyn ToSql);
                date_idx += 1;
            }
            Value::ChronoDateTime(_) => {
                params.push(&timestamps[timestamp_idx] as &dyn ToSql);
                timestamp_idx += 1;
            }
            _ => unreachable!("rejected in the first pass"),
        }
    }

    f(&params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_keep_placeholder_order() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let values = Values(vec![
            Value::from("SN-1".to_string()),
            Value::from(date),
            Value::from("%ACME%".to_string()),
            Value::from(7i64),
        ]);
        let rendered = with_converted_params(&values, |params| {
            Ok(params.iter().map(|p| format!("{p:?}")).collect::<Vec<_>>())
        })
        .unwrap();
        assert_eq!(
            rendered,
            vec![
                "Some(\"SN-1\")",
                "Some(2024-01-31)",
                "Some(\"%ACME%\")",
                "Some(7)",
            ]
        );
    }

    #[test]
    fn test_unsupported_value_is_rejected() {
        let values = Values(vec![Value::Bool(Some(true))]);
        let result = with_converted_params(&values, |_| Ok(()));
        assert!(matches!(result, Err(StoreError::QueryError(_))));
    }
}

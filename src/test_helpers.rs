//! Scripted executor for unit tests.
//!
//! `MockExecutor` records every statement with its bound parameters and answers from
//! a queue of scripted responses. Transaction control statements (`BEGIN...`,
//! `COMMIT`, `ROLLBACK`) succeed without consuming the queue; use
//! [`MockExecutor::fail_when`] to make any statement fail.

use crate::executor::{StoreError, StoreExecutor};
use crate::value::FieldMap;
use may_postgres::types::ToSql;
use std::cell::RefCell;
use std::collections::VecDeque;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Rows affected, for `execute`
    Affected(u64),
    /// Result rows, for `query_records`
    Rows(Vec<FieldMap>),
    /// Backend failure
    Error(String),
}

/// A statement as the executor saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub sql: String,
    /// `Debug` rendering of each bound parameter, in order
    pub params: Vec<String>,
}

#[derive(Default)]
pub struct MockExecutor {
    responses: RefCell<VecDeque<MockResponse>>,
    failures: RefCell<Vec<(String, String)>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_affected(&self, rows: u64) -> &Self {
        self.responses
            .borrow_mut()
            .push_back(MockResponse::Affected(rows));
        self
    }

    pub fn push_rows(&self, rows: Vec<FieldMap>) -> &Self {
        self.responses.borrow_mut().push_back(MockResponse::Rows(rows));
        self
    }

    /// Rows for a `COUNT(*) AS "count"` style query.
    pub fn push_count(&self, count: i64) -> &Self {
        self.push_rows(vec![FieldMap::new().with("count", count)])
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.responses
            .borrow_mut()
            .push_back(MockResponse::Error(message.to_string()));
        self
    }

    /// Fail every statement whose SQL contains `fragment`.
    pub fn fail_when(&self, fragment: &str, message: &str) -> &Self {
        self.failures
            .borrow_mut()
            .push((fragment.to_string(), message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.sql.clone()).collect()
    }

    /// Statements other than transaction control.
    pub fn data_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !is_transaction_control(s))
            .collect()
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.borrow().len()
    }

    fn record(&self, query: &str, params: &[&dyn ToSql]) -> Result<Option<MockResponse>, StoreError> {
        self.calls.borrow_mut().push(RecordedCall {
            sql: query.to_string(),
            params: params.iter().map(|p| format!("{p:?}")).collect(),
        });
        if let Some((_, message)) = self
            .failures
            .borrow()
            .iter()
            .find(|(fragment, _)| query.contains(fragment.as_str()))
        {
            return Err(StoreError::Storage(message.clone()));
        }
        if is_transaction_control(query) {
            return Ok(None);
        }
        match self.responses.borrow_mut().pop_front() {
            Some(MockResponse::Error(message)) => Err(StoreError::Storage(message)),
            other => Ok(other),
        }
    }
}

fn is_transaction_control(query: &str) -> bool {
    query.starts_with("BEGIN") || query == "COMMIT" || query == "ROLLBACK"
}

impl StoreExecutor for MockExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        Ok(match self.record(query, params)? {
            Some(MockResponse::Affected(n)) => n,
            Some(MockResponse::Rows(rows)) => rows.len() as u64,
            _ => 0,
        })
    }

    fn query_records(
        &self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<FieldMap>, StoreError> {
        Ok(match self.record(query, params)? {
            Some(MockResponse::Rows(rows)) => rows,
            _ => Vec::new(),
        })
    }
}

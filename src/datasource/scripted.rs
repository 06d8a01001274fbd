//! Scripted data source for tests and demos

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{DataSource, DataSourceError, TableSchema};
use crate::domain::QueryRows;

/// Replays queued results in order and records every statement it receives.
///
/// Once the queue is drained the fallback result (if any) is returned for
/// every further call.
#[derive(Debug, Default)]
pub struct ScriptedDataSource {
    responses: Mutex<VecDeque<Result<QueryRows, DataSourceError>>>,
    fallback: Option<Result<QueryRows, DataSourceError>>,
    schema: Vec<TableSchema>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDataSource {
    pub fn new(responses: Vec<Result<QueryRows, DataSourceError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Answer every call with the same result.
    pub fn always(result: Result<QueryRows, DataSourceError>) -> Self {
        Self::new(Vec::new()).with_fallback(result)
    }

    pub fn with_fallback(mut self, result: Result<QueryRows, DataSourceError>) -> Self {
        self.fallback = Some(result);
        self
    }

    pub fn with_schema(mut self, schema: Vec<TableSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Sleep before answering, to exercise deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Statements received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl DataSource for ScriptedDataSource {
    async fn execute_readonly(
        &self,
        sql: &str,
        _timeout: Duration,
        fetch_limit: usize,
    ) -> Result<QueryRows, DataSourceError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let result = match next.or_else(|| self.fallback.clone()) {
            Some(result) => result,
            None => Err(DataSourceError::Query("no scripted response".to_string())),
        };

        result.map(|mut rows| {
            rows.rows.truncate(fetch_limit);
            rows
        })
    }

    async fn describe_schema(&self) -> Result<Vec<TableSchema>, DataSourceError> {
        Ok(self.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn rows(n: usize) -> QueryRows {
        QueryRows::new(
            vec!["n".to_string()],
            (0..n).map(|i| vec![Value::from(i as i64)]).collect(),
        )
    }

    #[tokio::test]
    async fn test_replays_in_order_then_errors() {
        let source = ScriptedDataSource::new(vec![
            Err(DataSourceError::Query("syntax error".to_string())),
            Ok(rows(2)),
        ]);

        let first = source.execute_readonly("SELECT a", Duration::from_secs(1), 10).await;
        assert!(first.is_err());
        let second = source.execute_readonly("SELECT b", Duration::from_secs(1), 10).await;
        assert_eq!(second.unwrap().len(), 2);
        let third = source.execute_readonly("SELECT c", Duration::from_secs(1), 10).await;
        assert_eq!(third.unwrap_err(), DataSourceError::Query("no scripted response".to_string()));

        assert_eq!(source.calls(), vec!["SELECT a", "SELECT b", "SELECT c"]);
    }

    #[tokio::test]
    async fn test_fallback_and_fetch_limit() {
        let source = ScriptedDataSource::always(Ok(rows(10)));
        for _ in 0..3 {
            let result = source.execute_readonly("SELECT n", Duration::from_secs(1), 4).await.unwrap();
            assert_eq!(result.len(), 4);
        }
        assert_eq!(source.call_count(), 3);
    }
}

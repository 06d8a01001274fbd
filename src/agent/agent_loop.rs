//! Agent loop - generate, validate, execute, repair.
//!
//! One run handles one utterance. Every attempt starts from the same history
//! snapshot; only the repair context changes between attempts. Retriable
//! failures are fed back into generation until the attempt budget runs out.

use std::sync::Arc;

use super::signal::StopSignal;
use crate::datasource::DataSource;
use crate::domain::{
    CandidateStatement, ErrorKind, Exchange, ExchangeOutcome, ExecutionOutcome, LoopResult, TurnOutcome,
};
use crate::generator::{GenerationRequest, RepairContext, StatementGenerator};
use crate::guard::ExecutionGuard;
use crate::history::ConversationHistory;
use crate::validation::{StatementValidator, ValidationVerdict};

/// Default attempt budget per turn
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Generator invocations allowed per turn (at least 1)
    pub max_attempts: u32,
    /// Whether failed exchanges are shown to the generator
    pub include_failed_in_context: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            include_failed_in_context: true,
        }
    }
}

#[derive(Debug)]
enum State {
    Generating,
    Validating(CandidateStatement),
    Executing(CandidateStatement),
    Repairing {
        failed_statement: Option<String>,
        kind: ErrorKind,
        message: String,
    },
    Terminal(TurnOutcome),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Generating => "generating",
            State::Validating(_) => "validating",
            State::Executing(_) => "executing",
            State::Repairing { .. } => "repairing",
            State::Terminal(_) => "terminal",
        }
    }

    fn is_checkpoint(&self) -> bool {
        matches!(self, State::Generating | State::Validating(_) | State::Executing(_))
    }
}

/// Coordinates generator, validator and guard for one turn at a time.
///
/// Holds no conversation state; the caller lends the history for each run.
pub struct AgentLoop<G, D>
where
    G: StatementGenerator,
    D: DataSource,
{
    generator: Arc<G>,
    validator: StatementValidator,
    guard: ExecutionGuard<D>,
    config: AgentConfig,
}

impl<G, D> AgentLoop<G, D>
where
    G: StatementGenerator,
    D: DataSource,
{
    pub fn new(generator: Arc<G>, validator: StatementValidator, guard: ExecutionGuard<D>, config: AgentConfig) -> Self {
        let config = AgentConfig {
            max_attempts: config.max_attempts.max(1),
            ..config
        };
        Self {
            generator,
            validator,
            guard,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one turn to a terminal state.
    ///
    /// Appends exactly one Exchange to `history` unless the turn is cancelled.
    pub async fn run(&self, utterance: &str, history: &mut ConversationHistory, stop: &dyn StopSignal) -> LoopResult {
        let context = history.context(self.config.include_failed_in_context);
        let mut attempts: u32 = 0;
        let mut repair: Option<RepairContext> = None;
        let mut last_statement: Option<String> = None;
        let mut state = State::Generating;

        loop {
            if state.is_checkpoint() && stop.should_stop().await {
                tracing::info!(attempts, state = state.name(), "turn cancelled");
                return LoopResult {
                    final_statement: last_statement,
                    outcome: TurnOutcome::Failure {
                        kind: ErrorKind::Cancelled,
                        message: "turn cancelled".to_string(),
                    },
                    attempts_used: attempts,
                };
            }

            tracing::debug!(attempt = attempts, state = state.name(), "agent state");

            state = match state {
                State::Generating => {
                    attempts += 1;
                    let request = GenerationRequest {
                        utterance: utterance.to_string(),
                        history: context.clone(),
                        repair: repair.take(),
                    };
                    match self.generator.generate(&request).await {
                        Ok(candidate) => {
                            last_statement = Some(candidate.text.clone());
                            State::Validating(candidate)
                        }
                        Err(err) => State::Repairing {
                            failed_statement: None,
                            kind: ErrorKind::GenerationFailure,
                            message: err.to_string(),
                        },
                    }
                }

                State::Validating(candidate) => {
                    tracing::debug!(attempt = attempts, repair = candidate.is_repair(), sql = %candidate.text, "validating");
                    match self.validator.validate(&candidate.text) {
                        ValidationVerdict::Accepted => State::Executing(candidate),
                        verdict => State::Repairing {
                            message: verdict.repair_message().unwrap_or_default(),
                            failed_statement: Some(candidate.text),
                            kind: ErrorKind::ValidationRejection,
                        },
                    }
                }

                State::Executing(candidate) => match self.guard.execute(&candidate.text).await {
                    ExecutionOutcome::Success(success) => State::Terminal(TurnOutcome::Success(success)),
                    ExecutionOutcome::Failure { kind, message } if kind.is_retriable() => State::Repairing {
                        failed_statement: Some(candidate.text),
                        kind,
                        message,
                    },
                    ExecutionOutcome::Failure { kind, message } => State::Terminal(TurnOutcome::Failure { kind, message }),
                },

                State::Repairing {
                    failed_statement,
                    kind,
                    message,
                } => {
                    tracing::info!(attempt = attempts, kind = %kind, message = %message, "attempt failed");
                    if attempts >= self.config.max_attempts {
                        State::Terminal(TurnOutcome::Failure {
                            kind: ErrorKind::MaxAttemptsExceeded,
                            message: format!("gave up after {} attempts; last failure {}: {}", attempts, kind, message),
                        })
                    } else {
                        repair = Some(RepairContext::new(attempts + 1, failed_statement, kind, message));
                        State::Generating
                    }
                }

                State::Terminal(outcome) => {
                    let exchange = Exchange::new(utterance, last_statement.clone(), ExchangeOutcome::from(&outcome));
                    history.append(exchange);

                    match &outcome {
                        TurnOutcome::Success(success) => {
                            tracing::info!(attempts, rows = success.row_count, "turn succeeded")
                        }
                        TurnOutcome::Failure { kind, .. } => tracing::info!(attempts, kind = %kind, "turn failed"),
                    }

                    return LoopResult {
                        final_statement: last_statement,
                        outcome,
                        attempts_used: attempts,
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::agent::{CancelFlag, NoOpStopSignal};
    use crate::datasource::{DataSourceError, ScriptedDataSource};
    use crate::domain::QueryRows;
    use crate::generator::{GenerationError, ScriptedGenerator};
    use crate::guard::GuardConfig;

    fn rows(n: usize) -> QueryRows {
        QueryRows::new(
            vec!["title".to_string()],
            (0..n).map(|i| vec![Value::from(format!("t{}", i))]).collect(),
        )
    }

    fn agent(
        generator: ScriptedGenerator,
        source: ScriptedDataSource,
        max_attempts: u32,
    ) -> (Arc<ScriptedGenerator>, Arc<ScriptedDataSource>, AgentLoop<ScriptedGenerator, ScriptedDataSource>) {
        let generator = Arc::new(generator);
        let source = Arc::new(source);
        let guard = ExecutionGuard::new(
            Arc::clone(&source),
            GuardConfig {
                max_rows: 100,
                timeout: Duration::from_secs(5),
            },
        );
        let agent = AgentLoop::new(
            Arc::clone(&generator),
            StatementValidator::default(),
            guard,
            AgentConfig {
                max_attempts,
                include_failed_in_context: true,
            },
        );
        (generator, source, agent)
    }

    /// Stops at the n-th checkpoint (1-based).
    struct StopAt {
        at: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl StopSignal for StopAt {
        async fn should_stop(&self) -> bool {
            self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.at
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::with_statements(["SELECT title FROM movies"]),
            ScriptedDataSource::always(Ok(rows(2))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("list titles", &mut history, &NoOpStopSignal).await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.final_statement.as_deref(), Some("SELECT title FROM movies"));
        assert_eq!(generator.call_count(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.recent()[0].outcome,
            ExchangeOutcome::Success("2 rows".to_string())
        );
    }

    #[tokio::test]
    async fn test_syntax_error_triggers_repair() {
        let (generator, source, agent) = agent(
            ScriptedGenerator::with_statements(["SELECT titel FROM movies", "SELECT title FROM movies"]),
            ScriptedDataSource::new(vec![
                Err(DataSourceError::Query("no such column: titel".to_string())),
                Ok(rows(1)),
            ]),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("list titles", &mut history, &NoOpStopSignal).await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts_used, 2);
        assert_eq!(source.call_count(), 2);

        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].repair.is_none());
        let repair = requests[1].repair.as_ref().unwrap();
        assert_eq!(repair.kind, ErrorKind::SyntaxError);
        assert_eq!(repair.attempt, 2);
        assert!(repair.message.contains("no such column: titel"));
        assert_eq!(repair.failed_statement.as_deref(), Some("SELECT titel FROM movies"));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_permission_error_is_terminal() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::always(Ok("SELECT title FROM movies".to_string())),
            ScriptedDataSource::always(Err(DataSourceError::Query("permission denied for table movies".to_string()))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("list titles", &mut history, &NoOpStopSignal).await;

        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::PermissionError));
        assert_eq!(result.attempts_used, 1);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(history.len(), 1);
        assert!(!history.recent()[0].succeeded());
    }

    #[tokio::test]
    async fn test_connection_and_timeout_are_terminal() {
        for (err, kind) in [
            (DataSourceError::Connection("refused".to_string()), ErrorKind::ConnectionError),
            (DataSourceError::Timeout(Duration::from_secs(1)), ErrorKind::Timeout),
        ] {
            let (generator, _, agent) = agent(
                ScriptedGenerator::always(Ok("SELECT 1".to_string())),
                ScriptedDataSource::always(Err(err)),
                3,
            );
            let mut history = ConversationHistory::new(3);
            let result = agent.run("q", &mut history, &NoOpStopSignal).await;
            assert_eq!(result.outcome.error_kind(), Some(kind));
            assert_eq!(generator.call_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_validation_rejection_is_fed_back() {
        let (generator, source, agent) = agent(
            ScriptedGenerator::with_statements(["DELETE FROM movies", "SELECT title FROM movies"]),
            ScriptedDataSource::always(Ok(rows(1))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("remove movies", &mut history, &NoOpStopSignal).await;

        assert!(result.outcome.is_success());
        assert_eq!(source.calls(), vec!["SELECT title FROM movies"]);
        let repair = generator.requests()[1].repair.clone().unwrap();
        assert_eq!(repair.kind, ErrorKind::ValidationRejection);
        assert!(repair.message.contains("violated rule 'not_read_only'"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_retried() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::new(vec![
                Err(GenerationError::NotAQuery("Sorry".to_string())),
                Ok("SELECT 1".to_string()),
            ]),
            ScriptedDataSource::always(Ok(rows(1))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("q", &mut history, &NoOpStopSignal).await;

        assert!(result.outcome.is_success());
        let repair = generator.requests()[1].repair.clone().unwrap();
        assert_eq!(repair.kind, ErrorKind::GenerationFailure);
        assert!(repair.failed_statement.is_none());
    }

    #[tokio::test]
    async fn test_budget_is_shared_and_bounded() {
        let (generator, source, agent) = agent(
            ScriptedGenerator::new(vec![
                Err(GenerationError::Empty),
                Ok("DROP TABLE movies".to_string()),
                Ok("SELEC 1".to_string()),
                Ok("SELECT 1".to_string()),
            ]),
            ScriptedDataSource::always(Err(DataSourceError::Query("near \"SELEC\": syntax error".to_string()))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("q", &mut history, &NoOpStopSignal).await;

        assert_eq!(generator.call_count(), 3);
        assert_eq!(source.call_count(), 0);
        assert_eq!(result.attempts_used, 3);
        match &result.outcome {
            TurnOutcome::Failure { kind, message } => {
                assert_eq!(*kind, ErrorKind::MaxAttemptsExceeded);
                assert!(message.contains("validation_rejection"), "{}", message);
            }
            other => panic!("expected failure: {:?}", other),
        }
        assert_eq!(result.final_statement.as_deref(), Some("SELEC 1"));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_carries_last_failure() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::always(Ok("SELECT titel FROM movies".to_string())),
            ScriptedDataSource::always(Err(DataSourceError::Query("no such column: titel".to_string()))),
            3,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("q", &mut history, &NoOpStopSignal).await;

        assert_eq!(generator.call_count(), 3);
        match result.outcome {
            TurnOutcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::MaxAttemptsExceeded);
                assert!(message.contains("syntax_error: no such column: titel"));
            }
            other => panic!("expected failure: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_clamped_to_one() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::always(Ok("SELEC 1".to_string())),
            ScriptedDataSource::always(Err(DataSourceError::Query("syntax error".to_string()))),
            0,
        );
        let mut history = ConversationHistory::new(3);

        let result = agent.run("q", &mut history, &NoOpStopSignal).await;
        assert_eq!(agent.config().max_attempts, 1);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::MaxAttemptsExceeded));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_appends_nothing() {
        let (generator, _, agent) = agent(
            ScriptedGenerator::always(Ok("SELECT 1".to_string())),
            ScriptedDataSource::always(Ok(rows(1))),
            3,
        );
        let mut history = ConversationHistory::new(3);
        let flag = CancelFlag::new();
        flag.cancel();

        let result = agent.run("q", &mut history, &flag).await;

        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(result.attempts_used, 0);
        assert_eq!(generator.call_count(), 0);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let (generator, source, agent) = agent(
            ScriptedGenerator::always(Ok("SELECT 1".to_string())),
            ScriptedDataSource::always(Ok(rows(1))),
            3,
        );
        let mut history = ConversationHistory::new(3);
        let stop = StopAt {
            at: 3,
            seen: AtomicUsize::new(0),
        };

        let result = agent.run("q", &mut history, &stop).await;

        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(result.final_statement.as_deref(), Some("SELECT 1"));
        assert_eq!(generator.call_count(), 1);
        assert_eq!(source.call_count(), 0);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_context_respects_include_failed() {
        let generator = Arc::new(ScriptedGenerator::always(Ok("SELECT 1".to_string())));
        let source = Arc::new(ScriptedDataSource::always(Ok(rows(1))));
        let agent = AgentLoop::new(
            Arc::clone(&generator),
            StatementValidator::default(),
            ExecutionGuard::new(source, GuardConfig::default()),
            AgentConfig {
                max_attempts: 3,
                include_failed_in_context: false,
            },
        );

        let mut history = ConversationHistory::new(3);
        history.append(Exchange::new(
            "bad",
            None,
            ExchangeOutcome::Failure {
                kind: ErrorKind::MaxAttemptsExceeded,
                message: "x".to_string(),
            },
        ));
        history.append(Exchange::new("good", Some("SELECT 1".to_string()), ExchangeOutcome::Success("1 row".to_string())));

        agent.run("again", &mut history, &NoOpStopSignal).await;

        let seen: Vec<String> = generator.requests()[0]
            .history
            .iter()
            .map(|e| e.utterance.clone())
            .collect();
        assert_eq!(seen, vec!["good"]);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_same_inputs_same_result() {
        let mut seed = ConversationHistory::new(3);
        seed.append(Exchange::new(
            "action movies",
            Some("SELECT title FROM movies WHERE genre = 'Action'".to_string()),
            ExchangeOutcome::Success("3 rows".to_string()),
        ));

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let (_, _, agent) = agent(
                ScriptedGenerator::with_statements([
                    "SELECT titel FROM movies WHERE genre = 'Action'",
                    "SELECT title FROM movies WHERE genre = 'Action'",
                ]),
                ScriptedDataSource::new(vec![
                    Err(DataSourceError::Query("no such column: titel".to_string())),
                    Ok(rows(2)),
                ]),
                3,
            );
            let mut history = seed.clone();
            let result = agent.run("only from 2020", &mut history, &NoOpStopSignal).await;
            outcomes.push((result, history));
        }

        let (first_result, first_history) = &outcomes[0];
        let (second_result, second_history) = &outcomes[1];
        assert!(first_result.outcome.is_success());
        assert_eq!(first_result.attempts_used, 2);
        assert_eq!(first_result.final_statement, second_result.final_statement);
        assert_eq!(first_result.attempts_used, second_result.attempts_used);
        assert_eq!(first_result.outcome.error_kind(), second_result.outcome.error_kind());
        assert_eq!(first_history.len(), second_history.len());
        for (a, b) in first_history.iter().zip(second_history.iter()) {
            assert!(a.same_turn(b));
        }
    }
}

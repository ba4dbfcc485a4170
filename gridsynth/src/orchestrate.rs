//! Generate → validate → retry loop for a single task.
//!
//! The loop is driven by [`AttemptState`]; this module performs the side
//! effects each state calls for (prompting, generation, validation,
//! persistence, logging) and feeds the resulting events back in.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::attempt::{
    AttemptEvent, AttemptRecord, AttemptResult, AttemptState, Candidate, Refinement,
};
use crate::core::extract::extract_code;
use crate::core::prompt::PromptComposer;
use crate::core::task::{Task, TaskId};
use crate::io::generation::{GenerationClient, TextGenerator};
use crate::io::progress_log::{ProgressRecord, ProgressSink};
use crate::io::sandbox::Sandbox;
use crate::io::solution_store::SolutionStore;
use crate::validator::AttemptValidator;

/// Terminal result of one task's attempt loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Either `Accepted` or `Exhausted`.
    pub final_state: AttemptState,
    /// Attempt history in strictly increasing attempt order.
    pub records: Vec<AttemptRecord>,
}

impl TaskOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.final_state, AttemptState::Accepted { .. })
    }

    /// Generation attempts made for the task.
    pub fn attempts(&self) -> usize {
        self.records.len()
    }

    /// The accepted candidate, if any.
    pub fn accepted(&self) -> Option<&Candidate> {
        self.records
            .last()
            .filter(|record| record.result.is_accepted())
            .and_then(|record| record.candidate.as_ref())
    }
}

/// Runs the attempt loop for tasks, one at a time.
pub struct AttemptOrchestrator<'a, G, S> {
    client: &'a mut GenerationClient<G>,
    composer: &'a PromptComposer,
    validator: &'a AttemptValidator<S>,
    max_attempts: u32,
}

impl<'a, G: TextGenerator, S: Sandbox> AttemptOrchestrator<'a, G, S> {
    pub fn new(
        client: &'a mut GenerationClient<G>,
        composer: &'a PromptComposer,
        validator: &'a AttemptValidator<S>,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            composer,
            validator,
            max_attempts,
        }
    }

    /// Generation calls issued through this orchestrator's client.
    pub fn calls(&self) -> u64 {
        self.client.calls()
    }

    /// Drive `task` to `Accepted` or `Exhausted`.
    ///
    /// Service failures and rejected verdicts are folded into the next
    /// attempt's prompt. Only unexpected faults (sandbox, store or log
    /// failures) are returned as errors.
    #[instrument(skip_all, fields(task_id = %task.id(), max_attempts = self.max_attempts))]
    pub fn run_task<St: SolutionStore, L: ProgressSink>(
        &mut self,
        task: &Task,
        store: &mut St,
        log: &mut L,
    ) -> Result<TaskOutcome> {
        let max = self.max_attempts;
        let mut state = AttemptState::Init.next(AttemptEvent::Begin, max)?;
        let mut refinement: Option<Refinement> = None;
        let mut records = Vec::new();

        while let AttemptState::Generating { attempt } = state {
            let mode = if refinement.is_some() { "refinement" } else { "initial" };
            info!(attempt, mode, "generating candidate");
            let prompt = self.composer.compose(task, refinement.as_ref())?;

            let raw = match self.client.generate(&prompt) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(attempt, err = %err, "generation failed");
                    let result = AttemptResult::ServiceFailed(err.to_string());
                    // Without a prior candidate there is nothing to refine.
                    refinement = refinement.map(|prior| Refinement {
                        candidate: prior.candidate,
                        feedback: result.clone(),
                    });
                    records.push(self.record(task.id(), attempt, None, result, log)?);
                    state = state.next(AttemptEvent::ServiceFailed, max)?;
                    continue;
                }
            };
            state = state.next(AttemptEvent::Generated, max)?;

            let candidate = Candidate {
                task_id: task.id(),
                attempt,
                source: extract_code(&raw),
            };
            state = state.next(AttemptEvent::Extracted, max)?;

            let verdict = match self.validator.check_syntax(&candidate.source)? {
                Some(rejection) => rejection,
                None => {
                    state = state.next(AttemptEvent::SyntaxPassed, max)?;
                    self.validator.check_semantics(task, &candidate.source)?
                }
            };

            if verdict.is_accepted() {
                info!(attempt, verdict = %verdict, "candidate accepted");
                state = state.next(AttemptEvent::Accepted, max)?;
                store.save(task.id(), &candidate.source)?;
                let result = AttemptResult::Judged(verdict);
                records.push(self.record(task.id(), attempt, Some(candidate), result, log)?);
            } else {
                info!(attempt, status = verdict.status(), verdict = %verdict, "candidate rejected");
                state = state.next(AttemptEvent::Rejected, max)?;
                store.save_failed(task.id(), attempt, &candidate.source)?;
                let result = AttemptResult::Judged(verdict);
                refinement = Some(Refinement {
                    candidate: candidate.clone(),
                    feedback: result.clone(),
                });
                records.push(self.record(task.id(), attempt, Some(candidate), result, log)?);
            }
        }

        if let AttemptState::Exhausted { attempts } = state {
            warn!(attempts, "attempts exhausted without an accepted candidate");
        }
        Ok(TaskOutcome {
            task_id: task.id(),
            final_state: state,
            records,
        })
    }

    fn record<L: ProgressSink>(
        &self,
        task_id: TaskId,
        attempt: u32,
        candidate: Option<Candidate>,
        result: AttemptResult,
        log: &mut L,
    ) -> Result<AttemptRecord> {
        let record = AttemptRecord {
            task_id,
            attempt,
            candidate,
            result,
            timestamp: Utc::now(),
        };
        log.append(&ProgressRecord::from_attempt(&record, self.client.calls()))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::DEFAULT_EVAL_EXAMPLES;
    use crate::core::verdict::Verdict;
    use crate::io::config::GenerationConfig;
    use crate::io::generation::ServiceError;
    use crate::test_support::{
        MemoryLog, MemoryStore, ScriptedGenerator, ScriptedProgram, ScriptedSandbox,
        reverse_rows_task,
    };

    const REVERSE: &str = "def p(g):\n    return g[::-1]";
    const BROKEN: &str = "def p(g:\n    return g[::-1]";

    fn fenced(source: &str) -> String {
        format!("Here is the solution:\n```python\n{source}\n```\n")
    }

    struct Harness {
        client: GenerationClient<ScriptedGenerator>,
        composer: PromptComposer,
        validator: AttemptValidator<ScriptedSandbox>,
        store: MemoryStore,
        log: MemoryLog,
    }

    impl Harness {
        fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
            let config = GenerationConfig {
                min_interval_ms: 0,
                ..GenerationConfig::default()
            };
            let sandbox = ScriptedSandbox::new()
                .with(REVERSE, ScriptedProgram::reverse_rows())
                .with(
                    BROKEN,
                    ScriptedProgram::SyntaxError("'(' was never closed (line 1)".to_string()),
                );
            Self {
                client: GenerationClient::new(ScriptedGenerator::new(replies), &config),
                composer: PromptComposer::new("p", DEFAULT_EVAL_EXAMPLES).expect("composer"),
                validator: AttemptValidator::new(sandbox, 10_000),
                store: MemoryStore::default(),
                log: MemoryLog::default(),
            }
        }

        fn run(&mut self, task: &Task, max_attempts: u32) -> TaskOutcome {
            let mut orchestrator = AttemptOrchestrator::new(
                &mut self.client,
                &self.composer,
                &self.validator,
                max_attempts,
            );
            orchestrator
                .run_task(task, &mut self.store, &mut self.log)
                .expect("run task")
        }
    }

    #[test]
    fn accepted_first_attempt_issues_no_refinement() {
        let mut harness = Harness::new(vec![Ok(fenced(REVERSE))]);
        let task = reverse_rows_task(1);

        let outcome = harness.run(&task, 3);

        assert_eq!(outcome.final_state, AttemptState::Accepted { attempt: 1 });
        assert_eq!(harness.client.calls(), 1);
        assert_eq!(outcome.accepted().map(|c| c.source.as_str()), Some(REVERSE));
        assert_eq!(harness.store.solution(task.id()), Some(REVERSE));
        assert_eq!(harness.log.rows.len(), 1);
        assert_eq!(harness.log.rows[0].details, "api_calls=1,attempt=1");
    }

    #[test]
    fn syntax_error_feeds_refinement_prompt() {
        let mut harness = Harness::new(vec![Ok(fenced(BROKEN)), Ok(fenced(REVERSE))]);
        let task = reverse_rows_task(1);

        let outcome = harness.run(&task, 3);

        assert_eq!(outcome.final_state, AttemptState::Accepted { attempt: 2 });
        let requests = harness.client.backend().requests();
        assert_eq!(requests.len(), 2);
        let refinement = &requests[1].user_prompt;
        assert!(refinement.contains("Syntax error: '(' was never closed (line 1)"));
        assert!(refinement.contains(BROKEN));
        assert_eq!(harness.store.failed_attempts(), vec![(task.id(), 1)]);
        assert_eq!(harness.log.rows[0].status, "syntax_error");
    }

    #[test]
    fn attempts_are_bounded() {
        for max_attempts in 1..=3 {
            let replies = (0..5).map(|_| Ok(fenced(BROKEN))).collect();
            let mut harness = Harness::new(replies);
            let outcome = harness.run(&reverse_rows_task(1), max_attempts);

            assert_eq!(
                outcome.final_state,
                AttemptState::Exhausted {
                    attempts: max_attempts
                }
            );
            assert_eq!(harness.client.calls(), u64::from(max_attempts));
            assert_eq!(outcome.attempts(), max_attempts as usize);
            assert!(outcome.accepted().is_none());
            assert!(harness.store.solution(reverse_rows_task(1).id()).is_none());
        }
    }

    #[test]
    fn service_failure_before_any_candidate_reuses_initial_prompt() {
        let mut harness = Harness::new(vec![
            Err(ServiceError::Transport("connection reset".to_string())),
            Ok(fenced(REVERSE)),
        ]);
        let outcome = harness.run(&reverse_rows_task(1), 2);

        assert!(outcome.is_accepted());
        let requests = harness.client.backend().requests();
        assert_eq!(requests[0].user_prompt, requests[1].user_prompt);
        assert_eq!(harness.log.rows[0].status, "exception");
        assert!(outcome.records[0].candidate.is_none());
    }

    #[test]
    fn service_failure_after_candidate_quotes_latest_feedback() {
        let mut harness = Harness::new(vec![
            Ok(fenced(BROKEN)),
            Err(ServiceError::Quota("tokens per minute".to_string())),
            Ok(fenced(REVERSE)),
        ]);
        let outcome = harness.run(&reverse_rows_task(1), 3);

        assert_eq!(outcome.final_state, AttemptState::Accepted { attempt: 3 });
        let requests = harness.client.backend().requests();
        let third = &requests[2].user_prompt;
        assert!(third.contains(BROKEN));
        assert!(third.contains("Exception: rate limit or quota exceeded"));
    }

    #[test]
    fn records_are_in_attempt_order() {
        let mut harness = Harness::new(vec![
            Ok("no code here".to_string()),
            Ok(fenced(BROKEN)),
            Ok(fenced(REVERSE)),
        ]);
        let outcome = harness.run(&reverse_rows_task(1), 3);
        let attempts: Vec<u32> = outcome.records.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(matches!(
            outcome.records[0].result,
            AttemptResult::Judged(Verdict::MissingEntryPoint { .. })
        ));
    }
}

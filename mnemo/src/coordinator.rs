//! Atomic Coordinator (C8, §4.9) — ordered apply with compensation-based rollback.
//!
//! A transaction is a sequence of [`Step`]s built by the caller in SR order.
//! Each step's `forward` runs; on success its `compensation` (if any) is
//! pushed onto a stack. A required step's failure aborts the whole
//! transaction and unwinds the stack in reverse, best-effort. A
//! non-required step's failure is recorded but does not abort — this is
//! what keeps a GS or CS outage from blocking an RS-durable write.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Backend, MnemoError};

pub type AsyncOp = BoxFuture<'static, Result<(), MnemoError>>;

/// One step of a transaction: a named operation against `backend`, with an
/// optional compensation to run if a later required step fails.
pub struct Step {
    pub backend: Backend,
    pub op_name: &'static str,
    pub required: bool,
    pub forward: Box<dyn FnOnce() -> AsyncOp + Send>,
    pub compensation: Option<Box<dyn FnOnce() -> AsyncOp + Send>>,
}

impl Step {
    pub fn new(
        backend: Backend,
        op_name: &'static str,
        required: bool,
        forward: impl FnOnce() -> AsyncOp + Send + 'static,
    ) -> Self {
        Self {
            backend,
            op_name,
            required,
            forward: Box::new(forward),
            compensation: None,
        }
    }

    #[must_use]
    pub fn with_compensation(mut self, compensation: impl FnOnce() -> AsyncOp + Send + 'static) -> Self {
        self.compensation = Some(Box::new(compensation));
        self
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub backend: Backend,
    pub op_name: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

/// `{transaction_id, affected_backends, per_backend_results}` from §4.9 step 5.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub transaction_id: String,
    pub affected_backends: Vec<Backend>,
    pub fallback_reasons: HashMap<Backend, String>,
    pub per_backend_results: Vec<StepOutcome>,
    pub aborted: bool,
}

impl TransactionReport {
    pub fn success(&self) -> bool {
        !self.aborted
    }
}

#[derive(Default)]
pub struct AtomicCoordinator;

impl AtomicCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Runs `steps` in order, applying the failure-class rules from §4.9:
    /// a required step's failure aborts and rolls back every compensation
    /// collected so far, in reverse order; a non-required step's failure is
    /// recorded in `fallback_reasons` and execution continues.
    #[tracing::instrument(skip(self, steps))]
    pub async fn run(&self, steps: Vec<Step>) -> TransactionReport {
        let transaction_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("atomic_transaction", transaction_id = %transaction_id);
        let _enter = span.enter();

        let mut compensations: Vec<(Backend, Box<dyn FnOnce() -> AsyncOp + Send>)> = Vec::new();
        let mut results = Vec::new();
        let mut affected = Vec::new();
        let mut fallback_reasons = HashMap::new();
        let mut aborted = false;

        for step in steps {
            let backend = step.backend;
            let op_name = step.op_name;
            let required = step.required;
            let forward = step.forward;
            let compensation = step.compensation;

            match (forward)().await {
                Ok(()) => {
                    tracing::info!(backend = %backend, op = op_name, "step committed");
                    results.push(StepOutcome {
                        backend,
                        op_name,
                        success: true,
                        error: None,
                    });
                    affected.push(backend);
                    if let Some(comp) = compensation {
                        compensations.push((backend, comp));
                    }
                }
                Err(err) => {
                    tracing::warn!(backend = %backend, op = op_name, error = %err, "step failed");
                    results.push(StepOutcome {
                        backend,
                        op_name,
                        success: false,
                        error: Some(err.message.clone()),
                    });
                    fallback_reasons.insert(backend, err.message.clone());
                    if required {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if aborted {
            for (backend, comp) in compensations.into_iter().rev() {
                if let Err(err) = (comp)().await {
                    tracing::warn!(backend = %backend, error = %err, "compensation failed");
                }
            }
            affected.clear();
        }

        TransactionReport {
            transaction_id,
            affected_backends: affected,
            fallback_reasons,
            per_backend_results: results,
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn ok_step(backend: Backend, required: bool) -> Step {
        Step::new(backend, "noop", required, || Box::pin(async { Ok(()) }))
    }

    fn failing_step(backend: Backend, required: bool) -> Step {
        Step::new(backend, "noop", required, move || {
            Box::pin(async move { Err(MnemoError::backend_failed(backend, "boom")) })
        })
    }

    #[tokio::test]
    async fn all_steps_succeed_reports_every_backend() {
        let coordinator = AtomicCoordinator::new();
        let report = coordinator
            .run(vec![
                ok_step(Backend::Rs, true),
                ok_step(Backend::Vi, false),
                ok_step(Backend::Gs, false),
            ])
            .await;

        assert!(report.success());
        assert_eq!(report.affected_backends, vec![Backend::Rs, Backend::Vi, Backend::Gs]);
        assert!(report.fallback_reasons.is_empty());
    }

    #[tokio::test]
    async fn non_required_failure_does_not_abort() {
        let coordinator = AtomicCoordinator::new();
        let report = coordinator
            .run(vec![ok_step(Backend::Rs, true), failing_step(Backend::Gs, false)])
            .await;

        assert!(report.success());
        assert_eq!(report.affected_backends, vec![Backend::Rs]);
        assert!(report.fallback_reasons.contains_key(&Backend::Gs));
    }

    #[tokio::test]
    async fn required_failure_rolls_back_prior_steps() {
        let compensated = Arc::new(AtomicBool::new(false));
        let compensated_clone = compensated.clone();

        let step1 = Step::new(Backend::Rs, "create", true, || Box::pin(async { Ok(()) }))
            .with_compensation(move || {
                let compensated = compensated_clone.clone();
                Box::pin(async move {
                    compensated.store(true, Ordering::SeqCst);
                    Ok(())
                })
            });
        let step2 = Step::new(Backend::Vi, "add", true, || {
            Box::pin(async { Err(MnemoError::backend_failed(Backend::Vi, "disk full")) })
        });

        let coordinator = AtomicCoordinator::new();
        let report = coordinator.run(vec![step1, step2]).await;

        assert!(!report.success());
        assert!(report.affected_backends.is_empty());
        assert!(compensated.load(Ordering::SeqCst));
    }
}

//! A small saga runner: ordered steps, each with an optional compensation.
//!
//! Steps run in order against a shared context. When a step fails, every
//! previously completed step is compensated in reverse order and the original
//! error is returned together with any compensation errors. Compensation
//! errors are logged and collected; they never replace the original error.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

/// Future returned by step actions and compensations.
pub type StepFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;

/// One step of a saga.
pub trait SagaStep<Ctx, E> {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Performs the step, recording whatever it produced in `ctx`.
    fn execute<'a>(&'a self, ctx: &'a mut Ctx) -> StepFuture<'a, E>;

    /// Undoes the step. Steps with nothing to undo return `None`.
    fn compensate<'a>(&'a self, _ctx: &'a Ctx) -> Option<StepFuture<'a, E>> {
        None
    }
}

/// A compensation that failed during rollback.
#[derive(Debug)]
pub struct CompensationError<E> {
    /// Step whose compensation failed.
    pub step: &'static str,
    /// Error returned by the compensation.
    pub source: E,
}

impl<E: fmt::Display> fmt::Display for CompensationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compensating `{}` failed: {}", self.step, self.source)
    }
}

/// A failed saga run after rollback.
#[derive(Debug)]
pub struct SagaFailure<E> {
    /// Step that failed.
    pub step: &'static str,
    /// Error returned by the failing step.
    pub error: E,
    /// Errors raised while compensating earlier steps.
    pub compensation_errors: Vec<CompensationError<E>>,
}

/// Drives steps against a context and remembers what must be undone.
pub struct Saga<Ctx, E> {
    ctx: Ctx,
    completed: Vec<Box<dyn SagaStep<Ctx, E>>>,
}

impl<Ctx, E: fmt::Display> Saga<Ctx, E> {
    /// Starts a saga over `ctx` with no completed steps.
    #[must_use]
    pub fn new(ctx: Ctx) -> Self {
        Self {
            ctx,
            completed: Vec::new(),
        }
    }

    /// Shared context.
    #[must_use]
    pub const fn context(&self) -> &Ctx {
        &self.ctx
    }

    /// Mutable access to the shared context.
    #[must_use]
    pub const fn context_mut(&mut self) -> &mut Ctx {
        &mut self.ctx
    }

    /// Names of completed steps, oldest first.
    #[must_use]
    pub fn completed(&self) -> Vec<&'static str> {
        self.completed.iter().map(|step| step.name()).collect()
    }

    /// Consumes the saga, returning the context without compensating.
    #[must_use]
    pub fn into_context(self) -> Ctx {
        self.ctx
    }

    /// Runs `steps` in order. On the first failure every completed step,
    /// including those from earlier calls, is compensated in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`SagaFailure`] carrying the failing step's error and any
    /// compensation errors.
    pub async fn run(&mut self, steps: Vec<Box<dyn SagaStep<Ctx, E>>>) -> Result<(), SagaFailure<E>> {
        for step in steps {
            let name = step.name();
            debug!(step = name, "saga step starting");
            match step.execute(&mut self.ctx).await {
                Ok(()) => {
                    debug!(step = name, "saga step completed");
                    self.completed.push(step);
                }
                Err(error) => {
                    warn!(step = name, %error, "saga step failed; rolling back");
                    let compensation_errors = self.rollback().await;
                    return Err(SagaFailure {
                        step: name,
                        error,
                        compensation_errors,
                    });
                }
            }
        }
        Ok(())
    }

    /// Compensates every completed step in reverse order and forgets them.
    ///
    /// Every compensation is attempted even when an earlier one fails.
    pub async fn rollback(&mut self) -> Vec<CompensationError<E>> {
        let mut errors = Vec::new();
        while let Some(step) = self.completed.pop() {
            let name = step.name();
            let Some(compensation) = step.compensate(&self.ctx) else {
                continue;
            };
            debug!(step = name, "compensating saga step");
            if let Err(source) = compensation.await {
                warn!(step = name, error = %source, "compensation failed");
                errors.push(CompensationError { step: name, source });
            }
        }
        errors
    }
}

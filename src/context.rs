//! Execution context for the strata CLI.
//!
//! Provides task-local storage for the global `--verbose` and `--dry-run`
//! flags. Uses tokio::task_local so the context survives await points and
//! thread migrations, with a thread-local fallback for synchronous paths.

use std::cell::RefCell;
use std::future::Future;

thread_local! {
    static SYNC_CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

tokio::task_local! {
    static ASYNC_CONTEXT: ExecutionContext;
}

/// Global execution context for the current CLI invocation
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext {
    /// Show git commands being executed
    pub verbose: bool,
    /// Preview operations without executing them
    pub dry_run: bool,
}

impl ExecutionContext {
    pub fn new(verbose: bool, dry_run: bool) -> Self {
        Self { verbose, dry_run }
    }

    /// Initialize the thread-local context (for synchronous code paths)
    pub fn init(verbose: bool, dry_run: bool) {
        SYNC_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = ExecutionContext { verbose, dry_run };
        });
    }

    /// Check if verbose mode is enabled.
    ///
    /// Checks task-local context first (async code), falls back to thread-local.
    pub fn is_verbose() -> bool {
        if let Ok(verbose) = ASYNC_CONTEXT.try_with(|ctx| ctx.verbose) {
            return verbose;
        }
        SYNC_CONTEXT.with(|ctx| ctx.borrow().verbose)
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run() -> bool {
        if let Ok(dry_run) = ASYNC_CONTEXT.try_with(|ctx| ctx.dry_run) {
            return dry_run;
        }
        SYNC_CONTEXT.with(|ctx| ctx.borrow().dry_run)
    }
}

/// Run an async function with the given execution context.
///
/// The context is propagated across .await points and thread migrations.
pub async fn with_context<F, T>(ctx: ExecutionContext, f: F) -> T
where
    F: Future<Output = T>,
{
    ASYNC_CONTEXT.scope(ctx, f).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context() {
        ExecutionContext::init(false, false);
        assert!(!ExecutionContext::is_verbose());
        assert!(!ExecutionContext::is_dry_run());
    }

    #[test]
    fn test_flags_roundtrip() {
        ExecutionContext::init(true, true);
        assert!(ExecutionContext::is_verbose());
        assert!(ExecutionContext::is_dry_run());
        ExecutionContext::init(false, false);
    }

    #[tokio::test]
    async fn test_async_context_propagation() {
        let ctx = ExecutionContext::new(true, true);
        with_context(ctx, async {
            assert!(ExecutionContext::is_verbose());
            tokio::task::yield_now().await;
            assert!(ExecutionContext::is_dry_run());
        })
        .await;
    }

    #[tokio::test]
    async fn test_async_context_isolation() {
        ExecutionContext::init(false, false);
        let ctx = ExecutionContext::new(true, false);
        with_context(ctx, async {
            assert!(ExecutionContext::is_verbose());
        })
        .await;
        assert!(!ExecutionContext::is_verbose());
    }
}

//! Configuration for rule bases and sessions.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Sender, TrySendError, bounded};
use trellis_foundation::{Error, Result};

// =============================================================================
// Rule Base Configuration
// =============================================================================

/// Build-time options for a rule base.
#[derive(Clone, Debug)]
pub struct RuleBaseConfig {
    /// Minimum number of literal-equality alpha siblings on one field before
    /// facts are dispatched through a hash table instead of tested one by one.
    pub alpha_hash_threshold: usize,

    /// Whether patterns only react to modifications of the fields they read.
    /// When false, every modification re-propagates.
    pub property_reactive: bool,

    /// Whether equality joins on stable-hash fields use hash indexes.
    pub indexing_enabled: bool,

    /// Predicate evaluations before background promotion is requested.
    /// Zero disables promotion.
    pub jit_threshold: u32,
}

impl Default for RuleBaseConfig {
    fn default() -> Self {
        Self {
            alpha_hash_threshold: 3,
            property_reactive: true,
            indexing_enabled: true,
            jit_threshold: 20,
        }
    }
}

impl RuleBaseConfig {
    /// A configuration with every optimization turned off.
    ///
    /// Useful as a reference when checking that optimizations do not change
    /// results.
    #[must_use]
    pub fn unoptimized() -> Self {
        Self {
            alpha_hash_threshold: usize::MAX,
            property_reactive: false,
            indexing_enabled: false,
            jit_threshold: 0,
        }
    }

    /// Builder method to set the alpha hashing threshold.
    #[must_use]
    pub fn with_alpha_hash_threshold(mut self, threshold: usize) -> Self {
        self.alpha_hash_threshold = threshold;
        self
    }

    /// Builder method to enable/disable property reactivity.
    #[must_use]
    pub fn with_property_reactive(mut self, enabled: bool) -> Self {
        self.property_reactive = enabled;
        self
    }

    /// Builder method to enable/disable join indexing.
    #[must_use]
    pub fn with_indexing(mut self, enabled: bool) -> Self {
        self.indexing_enabled = enabled;
        self
    }

    /// Builder method to set the promotion threshold.
    #[must_use]
    pub fn with_jit_threshold(mut self, threshold: u32) -> Self {
        self.jit_threshold = threshold;
        self
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// How stated inserts of equal facts are grouped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EqualityBehavior {
    /// Every stated insert creates a new handle.
    Identity,
    /// A stated insert of a fact equal to a live one returns the existing handle.
    #[default]
    Equality,
}

/// Tie-breaker between activations of equal salience.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Earliest triggered fires first.
    #[default]
    Fifo,
    /// Latest triggered fires first.
    Lifo,
    /// Activation whose most recent fact is newest fires first, then FIFO.
    FactRecency,
}

/// Runtime options for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Stated-insert equality semantics.
    pub equality: EqualityBehavior,

    /// Conflict resolution among equal salience.
    pub conflict_strategy: ConflictStrategy,

    /// Kill switch: maximum activations a single fire loop may fire.
    pub max_activations: Option<usize>,

    /// Whether the trace ring buffer records events.
    pub trace_enabled: bool,

    /// Trace ring buffer capacity.
    pub trace_buffer_size: usize,

    /// Worker context for background predicate promotion.
    pub execution: Option<ExecutionContext>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            equality: EqualityBehavior::Equality,
            conflict_strategy: ConflictStrategy::Fifo,
            max_activations: None,
            trace_enabled: false,
            trace_buffer_size: 1000,
            execution: None,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with tracing enabled.
    #[must_use]
    pub fn traced() -> Self {
        Self {
            trace_enabled: true,
            ..Self::default()
        }
    }

    /// Builder method to set equality behavior.
    #[must_use]
    pub fn with_equality(mut self, equality: EqualityBehavior) -> Self {
        self.equality = equality;
        self
    }

    /// Builder method to set the conflict strategy.
    #[must_use]
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Builder method to set the activation kill switch.
    #[must_use]
    pub fn with_max_activations(mut self, max: usize) -> Self {
        self.max_activations = Some(max);
        self
    }

    /// Builder method to enable/disable tracing.
    #[must_use]
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Builder method to set the trace buffer capacity.
    #[must_use]
    pub fn with_trace_buffer_size(mut self, size: usize) -> Self {
        self.trace_buffer_size = size;
        self
    }

    /// Builder method to set the background execution context.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = Some(execution);
        self
    }
}

// =============================================================================
// Execution Context
// =============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
enum Executor {
    Immediate,
    Pool { tx: Sender<Job>, capacity: usize },
}

/// Where fire-and-forget background work runs.
///
/// Passed explicitly through [`SessionConfig`]; the engine never starts
/// threads on its own. Cloning shares the same workers, which exit once every
/// clone has been dropped and the queue is drained.
#[derive(Clone)]
pub struct ExecutionContext {
    executor: Arc<Executor>,
}

impl ExecutionContext {
    /// Runs submitted work synchronously on the submitting thread.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            executor: Arc::new(Executor::Immediate),
        }
    }

    /// Starts a pool of named worker threads fed by a bounded queue.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn pool(workers: usize, queue_capacity: usize) -> Result<Self> {
        let workers = workers.max(1);
        let capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(capacity);

        for idx in 0..workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("trellis-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|e| Error::internal(format!("failed to spawn worker: {e}")))?;
        }

        Ok(Self {
            executor: Arc::new(Executor::Pool { tx, capacity }),
        })
    }

    /// Submits a job. Returns false if the job was dropped because the
    /// queue is full or the workers are gone.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.executor.as_ref() {
            Executor::Immediate => {
                job();
                true
            }
            Executor::Pool { tx, capacity } => match tx.try_send(Box::new(job)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(capacity, "execution queue full, dropping job");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.executor.as_ref() {
            Executor::Immediate => write!(f, "ExecutionContext(immediate)"),
            Executor::Pool { capacity, .. } => {
                write!(f, "ExecutionContext(pool, capacity {capacity})")
            }
        }
    }
}

use crate::TaskError;
use core::fmt;

/// A self-contained unit of computation that a [`Server`] can execute.
///
/// Implementations hold only their own input operands and must not mutate
/// shared state: `execute` may run on any worker thread, and the same task
/// value may be submitted many times and executed concurrently.
///
/// The server keeps a reference-counted pointer to the task only until a
/// worker has executed it.
///
/// # Example
///
/// ```
/// use ferrotask::{Task, TaskError};
///
/// struct Double(f64);
///
/// impl Task<f64> for Double {
///     fn execute(&self) -> Result<f64, TaskError> {
///         Ok(self.0 * 2.0)
///     }
///
///     fn label(&self) -> &str {
///         "Double"
///     }
/// }
///
/// assert_eq!(Double(4.0).execute(), Ok(8.0));
/// ```
///
/// [`Server`]: crate::Server
pub trait Task<V>: Send + Sync {
    /// Runs the computation.
    ///
    /// A panic inside `execute` is caught by the worker and reported to the
    /// caller as a [`TaskError`] with [`TaskError::panicked`] set.
    fn execute(&self) -> Result<V, TaskError>;

    /// A short human-readable name used in logs and errors.
    fn label(&self) -> &str;
}

/// Adapts a closure into a [`Task`].
///
/// ```
/// use ferrotask::{FnTask, Task, TaskError};
///
/// let task = FnTask::new("Answer", || Ok::<_, TaskError>(42_u32));
/// assert_eq!(task.execute(), Ok(42));
/// assert_eq!(task.label(), "Answer");
/// ```
pub struct FnTask<F> {
    label: String,
    f: F,
}

impl<F> FnTask<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<V, F> Task<V> for FnTask<F>
where
    F: Fn() -> Result<V, TaskError> + Send + Sync,
{
    fn execute(&self) -> Result<V, TaskError> {
        (self.f)()
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("label", &self.label).finish()
    }
}

/// What [`Server::stop`] does with tasks that are still queued.
///
/// Tasks a worker has already started always run to completion and publish
/// their result, whatever the policy.
///
/// [`Server::stop`]: crate::Server::stop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ShutdownPolicy {
    /// Queued tasks are never executed. Awaiting their handles, before or
    /// after `stop` returns, fails with [`Error::ServerStopped`].
    ///
    /// [`Error::ServerStopped`]: crate::Error::ServerStopped
    #[default]
    Abandon,
    /// Workers keep draining the queue; `stop` returns once every task
    /// submitted before it has been executed.
    Drain,
}

/// Tunables for a [`Server`].
///
/// ```
/// use ferrotask::{ServerConfig, ShutdownPolicy};
///
/// let config = ServerConfig::default()
///     .with_shutdown_policy(ShutdownPolicy::Drain)
///     .with_thread_name_prefix("kernel");
/// assert_eq!(config.thread_name_prefix, "kernel");
/// ```
///
/// [`Server`]: crate::Server
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    pub shutdown_policy: ShutdownPolicy,
    /// Workers are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Stack size for worker threads; `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_policy: ShutdownPolicy::default(),
            thread_name_prefix: String::from("ferrotask-worker"),
            stack_size: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

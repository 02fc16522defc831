use anyhow::bail;
use clap::{Parser, ValueEnum};
use ferrotask::{ServerConfig, ShutdownPolicy};

/// Which workload to drive through the server.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Scalar kernels (pow, sin, sqrt) from several submitting threads.
    Mixed,
    /// Row-blocked matrix-vector product.
    Matvec,
}

/// Command-line arguments for the `ferrotask-bench` binary.
///
/// Every option falls back to an environment variable, which may in turn be
/// set from a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferrotask-bench",
    version,
    about = "Benchmarks the ferrotask compute server"
)]
pub struct CliArgs {
    /// Workload to run.
    ///
    /// Environment variable: `SCENARIO`
    #[arg(long, env = "SCENARIO", value_enum, default_value_t = Scenario::Mixed)]
    pub scenario: Scenario,

    /// Number of worker threads in the measured run. Defaults to the number
    /// of logical CPUs.
    ///
    /// Environment variable: `WORKERS`
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Tasks each submitting thread sends in the `mixed` scenario.
    ///
    /// Environment variable: `TASKS_PER_KIND`
    #[arg(long, env = "TASKS_PER_KIND", default_value_t = 100_000)]
    pub tasks_per_kind: usize,

    /// Submitting threads in the `mixed` scenario. Thread `i` submits kernel
    /// `i % 3`.
    ///
    /// Environment variable: `SUBMITTERS`
    #[arg(long, env = "SUBMITTERS", default_value_t = 3)]
    pub submitters: usize,

    /// Matrix rows in the `matvec` scenario.
    ///
    /// Environment variable: `ROWS`
    #[arg(long, env = "ROWS", default_value_t = 2048)]
    pub rows: usize,

    /// Matrix columns in the `matvec` scenario.
    ///
    /// Environment variable: `COLS`
    #[arg(long, env = "COLS", default_value_t = 2048)]
    pub cols: usize,

    /// Rows computed by a single task in the `matvec` scenario.
    ///
    /// Environment variable: `ROWS_PER_TASK`
    #[arg(long, env = "ROWS_PER_TASK", default_value_t = 32)]
    pub rows_per_task: usize,

    /// Execute queued tasks on shutdown instead of dropping them.
    #[arg(long, default_value_t = false)]
    pub drain: bool,
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub scenario: Scenario,
    pub workers: usize,
    pub tasks_per_kind: usize,
    pub submitters: usize,
    pub rows: usize,
    pub cols: usize,
    pub rows_per_task: usize,
    pub server: ServerConfig,
}

impl TryFrom<CliArgs> for BenchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let workers = args.workers.unwrap_or_else(num_cpus::get);
        if workers == 0 {
            bail!("WORKERS must be greater than 0");
        }

        match args.scenario {
            Scenario::Mixed => {
                if args.submitters == 0 {
                    bail!("SUBMITTERS must be greater than 0");
                }
                if args.tasks_per_kind == 0 {
                    bail!("TASKS_PER_KIND must be greater than 0");
                }
            }
            Scenario::Matvec => {
                if args.rows == 0 || args.cols == 0 {
                    bail!("ROWS and COLS must be greater than 0");
                }
                if args.rows_per_task == 0 {
                    bail!("ROWS_PER_TASK must be greater than 0");
                }
                if args.rows.checked_mul(args.cols).is_none() {
                    bail!(
                        "Matrix of {} x {} elements overflows usize",
                        args.rows,
                        args.cols
                    );
                }
            }
        }

        let shutdown_policy = if args.drain {
            ShutdownPolicy::Drain
        } else {
            ShutdownPolicy::Abandon
        };

        Ok(Self {
            scenario: args.scenario,
            workers,
            tasks_per_kind: args.tasks_per_kind,
            submitters: args.submitters,
            rows: args.rows,
            cols: args.cols,
            rows_per_task: args.rows_per_task,
            server: ServerConfig::default().with_shutdown_policy(shutdown_policy),
        })
    }
}

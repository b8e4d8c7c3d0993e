//! Flowgraph Driver Trait and Implementations
mod coop;
pub use coop::CoopScheduler;

pub(crate) mod process;
pub use process::ProcessScheduler;

use crate::runtime::config;
use crate::runtime::Error;
use crate::runtime::Flowgraph;
use crate::runtime::Topology;

/// A driver executing a prepared flowgraph.
pub trait Scheduler {
    /// Start execution.
    ///
    /// The cooperative driver runs the graph to completion before returning
    /// [ExecState::Finished]; the process driver forks one child per block
    /// and returns the parent-side state immediately.
    fn start(&self, fg: &mut Flowgraph, topology: &Topology) -> Result<ExecState, Error>;
}

/// Parent-side execution state after [Scheduler::start].
#[derive(Debug)]
pub enum ExecState {
    /// The graph ran to completion synchronously.
    Finished,
    /// One child process per block is running.
    Children(Vec<Child>),
}

/// A forked block process.
#[derive(Debug)]
pub struct Child {
    pub(crate) name: String,
    pub(crate) pid: libc::pid_t,
    pub(crate) is_source: bool,
    pub(crate) reaped: bool,
    pub(crate) exit_status: Option<i32>,
}

/// The driver selected by the `multiprocess` config option
/// (process-per-block by default).
#[derive(Debug)]
pub enum DefaultScheduler {
    Coop(CoopScheduler),
    Process(ProcessScheduler),
}

impl DefaultScheduler {
    pub fn from_config() -> DefaultScheduler {
        if config::config().multiprocess {
            DefaultScheduler::Process(ProcessScheduler::new())
        } else {
            DefaultScheduler::Coop(CoopScheduler::new())
        }
    }
}

impl Scheduler for DefaultScheduler {
    fn start(&self, fg: &mut Flowgraph, topology: &Topology) -> Result<ExecState, Error> {
        match self {
            DefaultScheduler::Coop(s) => s.start(fg, topology),
            DefaultScheduler::Process(s) => s.start(fg, topology),
        }
    }
}

use crate::runtime;
use crate::runtime::scheduler::process;
use crate::runtime::scheduler::Child;
use crate::runtime::scheduler::CoopScheduler;
use crate::runtime::scheduler::DefaultScheduler;
use crate::runtime::scheduler::ExecState;
use crate::runtime::scheduler::ProcessScheduler;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::Error;
use crate::runtime::Flowgraph;

/// This is the [Runtime] that runs a [Flowgraph] to completion.
///
/// [Runtime]s are generic over the [Scheduler] driving the graph. The
/// default is selected by the `multiprocess` config option.
pub struct Runtime<S> {
    scheduler: S,
}

impl Runtime<DefaultScheduler> {
    /// Constructs a [Runtime] with the configured default driver.
    pub fn new() -> Self {
        runtime::init();
        Runtime {
            scheduler: DefaultScheduler::from_config(),
        }
    }
}

impl Default for Runtime<DefaultScheduler> {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime<CoopScheduler> {
    /// A runtime driving the graph cooperatively in the current task.
    pub fn cooperative() -> Self {
        Self::with_scheduler(CoopScheduler::new())
    }
}

impl Runtime<ProcessScheduler> {
    /// A runtime forking one process per block.
    pub fn multiprocess() -> Self {
        Self::with_scheduler(ProcessScheduler::new())
    }
}

impl<S: Scheduler> Runtime<S> {
    /// Constructs a [Runtime] with a given [Scheduler].
    pub fn with_scheduler(scheduler: S) -> Self {
        runtime::init();
        Runtime { scheduler }
    }

    /// Start the flowgraph and block until it terminates, either on natural
    /// EOF cascade or on the termination signal. Returns the flowgraph for
    /// inspection.
    pub fn run(&self, fg: Flowgraph) -> Result<Flowgraph, Error> {
        let mut handle = self.start(fg)?;
        handle.wait()?;
        Ok(handle.flowgraph())
    }

    /// Prepare and start the flowgraph.
    ///
    /// Construction-time errors (malformed topology, type or rate
    /// mismatches) surface here, before any block is forked.
    pub fn start(&self, mut fg: Flowgraph) -> Result<FlowgraphHandle, Error> {
        let topology = fg.prepare()?;
        let state = self.scheduler.start(&mut fg, &topology)?;
        Ok(FlowgraphHandle::new(fg, state))
    }
}

/// Parent-side handle to a started flowgraph.
pub struct FlowgraphHandle {
    fg: Flowgraph,
    children: Vec<Child>,
    running: bool,
}

impl FlowgraphHandle {
    fn new(fg: Flowgraph, state: ExecState) -> FlowgraphHandle {
        match state {
            ExecState::Finished => FlowgraphHandle {
                fg,
                children: Vec::new(),
                running: false,
            },
            ExecState::Children(children) => FlowgraphHandle {
                fg,
                children,
                running: true,
            },
        }
    }

    /// Block until the graph has terminated.
    ///
    /// Returns when either the termination signal arrives (the graph is
    /// stopped) or a child exits (shutdown is in progress, everything is
    /// reaped). Fails if any block process exited with a nonzero status.
    pub fn wait(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }
        let result = process::wait_children(&mut self.children);
        self.running = false;
        result
    }

    /// Politely stop the graph: signal every source, let EOF cascade, reap.
    ///
    /// A no-op on a graph that is not running; calling it twice is safe.
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }
        let result = process::stop_children(&mut self.children);
        self.running = false;
        result
    }

    /// Whether any block is still running (non-blocking poll).
    pub fn status(&mut self) -> Result<bool, Error> {
        if !self.running {
            return Ok(false);
        }
        let alive = process::poll_children(&mut self.children)?;
        if !alive {
            self.running = false;
        }
        Ok(alive)
    }

    /// Give back the flowgraph, e.g. to inspect sink kernels.
    pub fn flowgraph(self) -> Flowgraph {
        self.fg
    }
}

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Once;

use crate::runtime::scheduler::ExecState;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::BlockId;
use crate::runtime::Error;
use crate::runtime::Flowgraph;
use crate::runtime::Topology;
use crate::runtime::WorkResult;

static TERMINATE: AtomicBool = AtomicBool::new(false);
static INSTALL: Once = Once::new();

extern "C" fn on_terminate(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
}

fn install_terminate_handler() {
    INSTALL.call_once(|| unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    });
}

/// Single-task round-robin driver.
///
/// Ticks every block in execution order. A block with nothing to produce
/// puts its transitive downstream on the tick's skip set; a block reporting
/// EOF ends the run. The termination signal is polled once per pass.
#[derive(Debug, Default)]
pub struct CoopScheduler;

impl CoopScheduler {
    pub fn new() -> CoopScheduler {
        CoopScheduler
    }
}

impl Scheduler for CoopScheduler {
    fn start(&self, fg: &mut Flowgraph, topology: &Topology) -> Result<ExecState, Error> {
        install_terminate_handler();
        TERMINATE.store(false, Ordering::Relaxed);

        // the driver must never suspend inside a read
        for &id in topology.order() {
            let block = fg.block_mut(BlockId(id)).ok_or(Error::InvalidBlock)?;
            for input in block.sio_mut().inputs_mut().iter_mut() {
                input
                    .reader_mut()
                    .expect("prepared graph has bound pipes")
                    .set_nonblocking(true)?;
            }
        }

        let mut run_err: Option<Error> = None;
        'run: loop {
            let mut skip: HashSet<usize> = HashSet::new();
            for &id in topology.order() {
                if skip.contains(&id) {
                    continue;
                }
                let block = fg.block_mut(BlockId(id)).ok_or(Error::InvalidBlock)?;
                match block.run_once(false) {
                    Ok(WorkResult::Produced) => {}
                    Ok(WorkResult::Idle) => {
                        skip.extend(topology.skip_set(id).iter().copied());
                    }
                    Ok(WorkResult::Eof) => {
                        debug!("{}: eof, terminating graph", fg.block_ref(BlockId(id)).unwrap().name());
                        break 'run;
                    }
                    Err(e) => {
                        error!("{e}");
                        run_err = Some(e);
                        break 'run;
                    }
                }
            }
            if TERMINATE.load(Ordering::Relaxed) {
                info!("termination signal received");
                break;
            }
        }

        // cleanup is called on every block exactly once
        for &id in topology.order() {
            let block = fg.block_mut(BlockId(id)).ok_or(Error::InvalidBlock)?;
            if let Err(e) = block.deinit() {
                error!("{e}");
                run_err.get_or_insert(e);
            }
        }

        match run_err {
            Some(e) => Err(e),
            None => Ok(ExecState::Finished),
        }
    }
}

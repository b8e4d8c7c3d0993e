use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::runtime::scheduler::Child;
use crate::runtime::scheduler::ExecState;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::BlockId;
use crate::runtime::Error;
use crate::runtime::Flowgraph;
use crate::runtime::Topology;

// fd sweep upper bound when _SC_OPEN_MAX is unbounded
const FD_SWEEP_LIMIT: libc::c_long = 65536;

extern "C" fn sigchld_noop(_sig: libc::c_int) {}

/// Install a no-op SIGCHLD handler.
///
/// Some platforms discard SIGCHLD by default, which would defeat the
/// synchronous sigwait-based demultiplexing in [wait_children].
fn install_sigchld_handler() -> Result<(), Error> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigchld_noop as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            return Err(Error::os("sigaction"));
        }
    }
    Ok(())
}

fn signal_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGCHLD);
        set
    }
}

/// Block SIGINT and SIGCHLD on the calling thread so no signal is lost
/// between fork and wait.
fn block_signals() -> Result<(), Error> {
    let set = signal_set();
    let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if ret != 0 {
        return Err(Error::os("pthread_sigmask"));
    }
    Ok(())
}

/// Wait for the termination or child-exited signal.
///
/// Returns `None` on timeout. The timeout exists because a process-directed
/// SIGCHLD may be consumed by the no-op handler on a thread that has it
/// unblocked; the caller then falls back to a liveness poll.
#[cfg(target_os = "linux")]
fn wait_signal() -> Result<Option<libc::c_int>, Error> {
    let set = signal_set();
    let timeout = libc::timespec {
        tv_sec: 0,
        tv_nsec: 100_000_000,
    };
    let sig = unsafe { libc::sigtimedwait(&set, std::ptr::null_mut(), &timeout) };
    if sig < 0 {
        let e = std::io::Error::last_os_error();
        return match e.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(None),
            _ => Err(Error::Os {
                call: "sigtimedwait",
                errno: e,
            }),
        };
    }
    Ok(Some(sig))
}

#[cfg(not(target_os = "linux"))]
fn wait_signal() -> Result<Option<libc::c_int>, Error> {
    let set = signal_set();
    let mut sig: libc::c_int = 0;
    let ret = unsafe { libc::sigwait(&set, &mut sig) };
    if ret != 0 {
        return Err(Error::os("sigwait"));
    }
    Ok(Some(sig))
}

/// Process-per-block driver.
///
/// Forks one child per block in execution order. Each child keeps only its
/// own pipe ends and auxiliary files open, then loops the block until EOF.
/// The parent closes every pipe end it holds and controls the graph through
/// [wait_children], [stop_children] and [poll_children].
#[derive(Debug, Default)]
pub struct ProcessScheduler;

impl ProcessScheduler {
    pub fn new() -> ProcessScheduler {
        ProcessScheduler
    }
}

impl Scheduler for ProcessScheduler {
    fn start(&self, fg: &mut Flowgraph, topology: &Topology) -> Result<ExecState, Error> {
        install_sigchld_handler()?;
        block_signals()?;

        let mut children: Vec<Child> = Vec::new();
        for &id in topology.order() {
            let block = fg.block_ref(BlockId(id)).ok_or(Error::InvalidBlock)?;
            let name = block.name().to_string();
            let is_source = block.is_source();

            match unsafe { libc::fork() } {
                -1 => {
                    let err = Error::os("fork");
                    // tear down what we already started
                    let _ = stop_children(&mut children);
                    return Err(err);
                }
                0 => {
                    let code = child_main(fg, id);
                    unsafe { libc::_exit(code) };
                }
                pid => {
                    debug!("forked {} (pid {})", name, pid);
                    children.push(Child {
                        name,
                        pid,
                        is_source,
                        reaped: false,
                        exit_status: None,
                    });
                }
            }
        }

        // the parent holds both ends of every pipe; close them all so it is
        // never an accidental reader or writer
        let ids: Vec<usize> = topology.order().to_vec();
        for id in ids {
            if let Some(block) = fg.block_mut(BlockId(id)) {
                block.sio_mut().close_all();
            }
        }

        info!("started {} block processes", children.len());
        Ok(ExecState::Children(children))
    }
}

/// Child-side entry: preserve this block's descriptors, close everything
/// else, run the block until EOF, clean up.
fn child_main(fg: &mut Flowgraph, id: usize) -> i32 {
    let mut keep: HashSet<RawFd> = [0, 1, 2].into_iter().collect();
    keep.extend(fg.block_ref(BlockId(id)).unwrap().files());
    close_stray_fds(&keep);

    // the parent masked its signals before forking; undo for this process
    unsafe {
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }

    let block = fg.block_mut(BlockId(id)).unwrap();
    let name = block.name().to_string();
    let result = catch_unwind(AssertUnwindSafe(|| {
        block.run()?;
        block.deinit()
    }));
    match result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            eprintln!("{name}: {e}");
            1
        }
        Err(_) => {
            eprintln!("{name}: panicked");
            1
        }
    }
}

fn close_stray_fds(keep: &HashSet<RawFd>) {
    let mut limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if limit <= 0 || limit > FD_SWEEP_LIMIT {
        limit = FD_SWEEP_LIMIT;
    }
    for fd in 3..limit as RawFd {
        if !keep.contains(&fd) {
            unsafe { libc::close(fd) };
        }
    }
}

/// Block until the graph terminates.
///
/// Demultiplexes the termination signal and child-exit synchronously: on
/// SIGINT the sources are stopped; on SIGCHLD every child is reaped. Any
/// child exit means shutdown is in progress, so all children are awaited.
pub(crate) fn wait_children(children: &mut Vec<Child>) -> Result<(), Error> {
    loop {
        match wait_signal()? {
            Some(sig) if sig == libc::SIGINT => {
                info!("termination signal received; stopping sources");
                signal_sources(children);
                break;
            }
            Some(_) => break,
            None => {
                // missed-signal fallback: all children gone means shutdown
                if !poll_children(children)? {
                    break;
                }
            }
        }
    }
    reap_all(children)?;
    surface_failures(children)
}

/// Politely terminate: SIGTERM every source, then reap everything. Closed
/// source pipes surface EOF downstream, so the rest of the graph exits on
/// its own.
pub(crate) fn stop_children(children: &mut Vec<Child>) -> Result<(), Error> {
    signal_sources(children);
    reap_all(children)?;
    surface_failures(children)
}

/// Non-blocking liveness poll: reaps already-exited children, returns
/// whether any child is still alive.
pub(crate) fn poll_children(children: &mut Vec<Child>) -> Result<bool, Error> {
    for c in children.iter_mut().filter(|c| !c.reaped) {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(c.pid, &mut status, libc::WNOHANG) };
        match ret {
            0 => {}
            p if p == c.pid => record_exit(c, status),
            _ => {
                let e = std::io::Error::last_os_error();
                if e.raw_os_error() == Some(libc::ECHILD) {
                    c.reaped = true;
                } else if e.raw_os_error() != Some(libc::EINTR) {
                    return Err(Error::Os {
                        call: "waitpid",
                        errno: e,
                    });
                }
            }
        }
    }
    Ok(children.iter().any(|c| !c.reaped))
}

fn signal_sources(children: &[Child]) {
    for c in children.iter().filter(|c| c.is_source && !c.reaped) {
        debug!("terminating source {} (pid {})", c.name, c.pid);
        unsafe { libc::kill(c.pid, libc::SIGTERM) };
    }
}

fn reap_all(children: &mut Vec<Child>) -> Result<(), Error> {
    for c in children.iter_mut().filter(|c| !c.reaped) {
        loop {
            let mut status: libc::c_int = 0;
            let ret = unsafe { libc::waitpid(c.pid, &mut status, 0) };
            if ret == c.pid {
                record_exit(c, status);
                break;
            }
            let e = std::io::Error::last_os_error();
            match e.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => {
                    c.reaped = true;
                    break;
                }
                _ => {
                    return Err(Error::Os {
                        call: "waitpid",
                        errno: e,
                    })
                }
            }
        }
    }
    Ok(())
}

fn record_exit(c: &mut Child, status: libc::c_int) {
    c.reaped = true;
    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        debug!("{} (pid {}) exited with status {}", c.name, c.pid, code);
        c.exit_status = Some(code);
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        debug!("{} (pid {}) killed by signal {}", c.name, c.pid, sig);
        // SIGTERM is how stop() ends sources; anything else is a failure
        c.exit_status = if sig == libc::SIGTERM { Some(0) } else { Some(128 + sig) };
    }
}

fn surface_failures(children: &[Child]) -> Result<(), Error> {
    for c in children.iter() {
        if let Some(code) = c.exit_status {
            if code != 0 {
                return Err(Error::BlockRuntime {
                    block: c.name.clone(),
                    msg: format!("block process exited with status {code}"),
                });
            }
        }
    }
    Ok(())
}

//! Signal blocking: mirrors the original tool's `pthread_sigmask` dance so
//! that worker threads never see `SIGTERM`/`SIGINT`/`SIGQUIT`/`SIGHUP`
//! delivered mid-syscall, and the main thread is the only one that ever
//! unblocks (`SIGPIPE` stays blocked everywhere — nothing here writes to a
//! closed pipe on purpose).

use std::io;
use std::mem::MaybeUninit;

fn signal_set() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        let mut set = set.assume_init();
        libc::sigaddset(&mut set, libc::SIGTERM);
        libc::sigaddset(&mut set, libc::SIGPIPE);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGQUIT);
        libc::sigaddset(&mut set, libc::SIGHUP);
        set
    }
}

/// Blocks the run's signal set on the calling thread. Called once before
/// any worker threads are spawned so every thread inherits the mask.
pub(crate) fn block_all() -> io::Result<()> {
    let set = signal_set();
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Unblocks everything except `SIGPIPE` on the calling thread (the main
/// thread, after every worker has been spawned and inherited the blocked
/// mask).
pub(crate) fn unblock_except_sigpipe() -> io::Result<()> {
    let mut set = signal_set();
    unsafe { libc::sigdelset(&mut set, libc::SIGPIPE) };
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

use crate::proc::{self, Channel, Pid, current_proc, current_proc_and_data_mut};
use crate::syscall::{SyscallArgs, SyscallError};
use crate::trap::TICKS_LOCK;

pub fn sys_exit(args: &SyscallArgs) -> ! {
    let n = args.get_int(0);
    proc::exit(n);
}

pub fn sys_getpid(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.proc().inner.lock().pid;
    Ok(*pid)
}

pub fn sys_fork(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    match log!(proc::fork()) {
        Ok(pid) => Ok(*pid),
        Err(_) => err!(SyscallError::ResourceUnavailable),
    }
}

pub fn sys_wait(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let addr = args.get_addr(0);
    match proc::wait(addr) {
        Some(pid) => Ok(*pid),
        None => err!(SyscallError::NoChildren),
    }
}

/// Like `sys_wait`, but also reports the reaped child's accumulated run and wait ticks through
/// user pointers, matching the `wtime`/`rtime` out-params in the syscall's table entry.
pub fn sys_waitx(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let addr = args.get_addr(0);
    let wtime_addr = args.get_addr(1);
    let rtime_addr = args.get_addr(2);

    match proc::waitx(addr) {
        Some((pid, rtime, wtime)) => {
            if log!(proc::copy_to_user(&wtime.to_le_bytes(), wtime_addr)).is_err()
                || log!(proc::copy_to_user(&rtime.to_le_bytes(), rtime_addr)).is_err()
            {
                err!(SyscallError::BadAddress);
            }
            Ok(*pid)
        }
        None => err!(SyscallError::NoChildren),
    }
}

pub fn sys_sbrk(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let size = args.get_int(0);
    let addr = args.proc().data().size;

    match unsafe { log!(proc::grow(size)) } {
        Ok(_) => Ok(addr),
        Err(_) => err!(SyscallError::OutOfMemory),
    }
}

pub fn sys_sleep(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let duration = args.get_int(0).max(0) as usize;

    let mut ticks = TICKS_LOCK.lock();
    let ticks0 = *ticks;

    while *ticks - ticks0 < duration {
        if current_proc().is_killed() {
            err!(SyscallError::Interrupted);
        }

        ticks = proc::sleep(Channel::Ticks, ticks);
    }

    Ok(0)
}

pub fn sys_kill(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;

    // # Safety: used only to search the table for a matching pid, not to mint a fresh one.
    if proc::kill(unsafe { Pid::from_usize(pid) }) {
        Ok(0)
    } else {
        err!(SyscallError::NoProcess)
    }
}

pub fn sys_uptime(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    let ticks = *TICKS_LOCK.lock();
    Ok(ticks)
}

/// Sets the caller's strace mask; the syscall dispatcher consults it to decide which syscalls to
/// log.
pub fn sys_trace(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let mask = args.get_int(0) as u32;
    proc::strace(mask);
    Ok(0)
}

/// Sets the caller's lottery ticket weight.
pub fn sys_settickets(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let n = args.get_int(0);

    if n <= 0 {
        err!(SyscallError::InvalidArgument);
    }

    Ok(proc::settickets(n as usize))
}

/// Replaces `pid`'s static priority, returning its previous value.
pub fn sys_set_priority(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let new_priority = args.get_int(0) as i32;
    let pid = args.get_int(1).max(0) as usize;

    // # Safety: used only to search the table for a matching pid.
    let prev = proc::set_priority(new_priority, unsafe { Pid::from_usize(pid) });

    if prev < 0 {
        err!(SyscallError::NoProcess);
    }

    Ok(prev as usize)
}

/// Arms a periodic alarm: every `interval` ticks the process is diverted into `handler` on
/// return to user space, until `sigreturn` is called from the handler.
pub fn sys_sigalarm(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let interval = args.get_int(0).max(0) as usize;
    let handler = args.get_raw(1);

    let (_proc, data) = current_proc_and_data_mut();
    data.num_ticks = interval;
    data.curr_ticks = 0;
    data.sig_handler = handler;

    Ok(0)
}

/// Restores the trapframe snapshotted when the alarm handler was dispatched and clears the
/// re-entrancy guard.
///
/// Returns the snapshot's saved `a0` so that the dispatcher's `trapframe.a0 = result` write does
/// not clobber the just-restored register -- the process resumes with every register, including
/// `a0`, bit-identical to the moment the alarm fired.
pub fn sys_sigreturn(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    let (_proc, data) = current_proc_and_data_mut();

    let snapshot = (**data.trapframe_copy.as_ref().expect("sigreturn snapshot")).clone();
    let saved_a0 = snapshot.a0;

    *data.trapframe_mut() = snapshot;
    data.alarm_is_set = false;

    Ok(saved_a0)
}

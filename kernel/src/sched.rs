//! Scheduling policies.
//!
//! Exactly one of `sched-rr`, `sched-fcfs`, `sched-lottery`, `sched-pbs` is active at a time,
//! selected at build time via Cargo features. `sched-rr` is the default. MLFQ is reserved but not
//! implemented (its queueing infrastructure never worked in the source this was ported from).

use crate::proc::{Cpu, Proc, ProcInner, ProcState, PROC_TABLE};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::swtch::swtch;

/// Runs the chosen process: mark it `Running`, assign it to the CPU, switch into its context, and
/// reclaim the CPU slot when it switches back.
fn dispatch(cpu: &mut Cpu, proc: &'static Proc, mut inner: SpinLockGuard<'static, ProcInner>) {
    inner.state = ProcState::Running;
    cpu.proc.replace(proc);

    // `inner` stays locked across the switch and is handed off to the resumed side: a freshly
    // forked process releases it via `force_unlock` in `fork_ret`, while a process resuming after
    // `yield`/`sleep` releases the lock it itself re-acquired in `sched()`. Either way this guard's
    // `Drop`, once we come back here, is what pairs with that resumed side's acquisition.
    //
    // # Safety: proc.inner is locked by us until the process switches back, at which point it
    // reacquires the lock itself before returning here.
    unsafe { swtch(&mut cpu.context, &proc.data().context) };

    cpu.proc.take();
}

/// Round-robin: run every `Runnable` process once per sweep, in table order.
/// Preemptive: timer ticks cause the running process to `yield` back here.
/// Returns true if any process was dispatched.
#[cfg(not(any(
    feature = "sched-fcfs",
    feature = "sched-lottery",
    feature = "sched-pbs"
)))]
pub fn run(cpu: &mut Cpu) -> bool {
    let mut ran = false;

    for proc in PROC_TABLE.iter() {
        let inner = proc.inner.lock();

        if inner.state != ProcState::Runnable {
            continue;
        }

        dispatch(cpu, proc, inner);
        ran = true;
    }

    ran
}

/// First-come-first-served: run the `Runnable` process with the smallest `birth_time`.
/// Non-preemptive: once dispatched, a process keeps the CPU until it blocks or exits.
/// Returns true if a process was dispatched.
#[cfg(feature = "sched-fcfs")]
pub fn run(cpu: &mut Cpu) -> bool {
    let mut oldest: Option<(&'static Proc, SpinLockGuard<'static, ProcInner>, usize)> = None;

    for proc in PROC_TABLE.iter() {
        let inner = proc.inner.lock();

        if inner.state != ProcState::Runnable {
            continue;
        }

        let birth_time = inner.birth_time;
        let is_older = oldest.as_ref().is_none_or(|(_, _, t)| birth_time < *t);

        if is_older {
            // dropping the previous `oldest` here releases its lock
            oldest = Some((proc, inner, birth_time));
        }
    }

    match oldest {
        Some((proc, inner, _)) => {
            dispatch(cpu, proc, inner);
            true
        }
        None => false,
    }
}

/// xorshift-style 4-stream PRNG with hard-coded seeds, used by the lottery scheduler.
/// Acceptable for a teaching kernel; production use would seed from a device or tick entropy.
struct XorShift4 {
    z1: u64,
    z2: u64,
    z3: u64,
    z4: u64,
}

impl XorShift4 {
    const fn new() -> Self {
        Self {
            z1: 5234254,
            z2: 1764237,
            z3: 3986790,
            z4: 9823476,
        }
    }

    fn next(&mut self) -> u64 {
        let mut b = ((self.z1 << 6) ^ self.z1) >> 5;
        self.z1 = ((self.z1 & 75643) << 13) ^ b;

        b = ((self.z2 << 23) ^ self.z2) >> 12;
        self.z2 = ((self.z2 & 873256) << 17) ^ b;

        b = ((self.z3 << 13) ^ self.z3) >> 19;
        self.z3 = ((self.z3 & 71549) << 7) ^ b;

        b = ((self.z4 << 3) ^ self.z4) >> 11;
        self.z4 = ((self.z4 & 326565) << 13) ^ b;

        (self.z1 ^ self.z2 ^ self.z3 ^ self.z4) / 2
    }
}

#[cfg(feature = "sched-lottery")]
static RNG: SpinLock<XorShift4> = SpinLock::new(XorShift4::new(), "lottery_rng");

/// Lottery: sum tickets across `Runnable` processes, draw a number in that range, and run the
/// process whose cumulative ticket range covers the draw. Preemptive.
/// Returns true if a process was dispatched.
#[cfg(feature = "sched-lottery")]
pub fn run(cpu: &mut Cpu) -> bool {
    let mut total_tickets: usize = 0;

    for proc in PROC_TABLE.iter() {
        let inner = proc.inner.lock();
        if inner.state == ProcState::Runnable {
            total_tickets += inner.num_tickets;
        }
    }

    if total_tickets == 0 {
        return false;
    }

    let draw = (RNG.lock().next() as usize) % total_tickets;

    let mut ticket_count = 0;
    for proc in PROC_TABLE.iter() {
        let inner = proc.inner.lock();

        if inner.state != ProcState::Runnable {
            continue;
        }

        ticket_count += inner.num_tickets;
        if ticket_count > draw {
            dispatch(cpu, proc, inner);
            return true;
        }
    }

    false
}

/// Dynamic priority as used by the priority-based scheduler: smaller is more preferred.
pub fn dynamic_priority(static_priority: i32, sleep_time: usize, running_time: usize) -> i32 {
    if sleep_time + running_time == 0 {
        return 5;
    }

    let niceness = 10 * (sleep_time as i32) / ((sleep_time + running_time) as i32);
    (static_priority - niceness + 5).clamp(0, 100)
}

/// Priority-based: run the `Runnable` process with the smallest `dynamic_priority`, recomputed at
/// each dispatch from its recent sleep:run ratio. Ties go to the first in table order.
/// Non-preemptive: once dispatched, a process keeps the CPU until it blocks or exits.
/// Returns true if a process was dispatched.
#[cfg(feature = "sched-pbs")]
pub fn run(cpu: &mut Cpu) -> bool {
    let mut chosen: Option<(&'static Proc, SpinLockGuard<'static, ProcInner>)> = None;

    for proc in PROC_TABLE.iter() {
        let mut inner = proc.inner.lock();

        if inner.state != ProcState::Runnable {
            continue;
        }

        inner.dynamic_priority =
            dynamic_priority(inner.static_priority, inner.sleep_time, inner.running_time);

        let is_better = chosen
            .as_ref()
            .is_none_or(|(_, c)| inner.dynamic_priority < c.dynamic_priority);

        if is_better {
            chosen = Some((proc, inner));
        }
    }

    match chosen {
        Some((proc, mut inner)) => {
            inner.sleep_time = 0;
            dispatch(cpu, proc, inner);
            true
        }
        None => false,
    }
}

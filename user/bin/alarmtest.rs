#![no_std]
#![no_main]

use core::sync::atomic::{AtomicUsize, Ordering};

use user::*;

// Alarm period, in ticks. Short enough to fire a handful of times while `busy_spin` below runs.
const ALARM_INTERVAL: usize = 4;

// How long the foreground work spins for, in ticks of wall-clock uptime.
const SPIN_TICKS: usize = 20;

static HANDLER_FIRED: AtomicUsize = AtomicUsize::new(0);

// Entered directly at the trapframe's `epc` when the alarm fires; never called normally. Must end
// in `sigreturn()`, which overwrites our trapframe with the pre-alarm snapshot so execution resumes
// at the instruction the timer tick interrupted rather than returning here.
extern "C" fn on_alarm() {
    HANDLER_FIRED.fetch_add(1, Ordering::Relaxed);
    sigreturn().expect("alarmtest: sigreturn failed");
}

// Burns ticks without giving up the CPU voluntarily, so the only way the handler gets a chance to
// run is via the timer-driven alarm check in user-trap.
fn busy_spin(ticks: usize) {
    let start = uptime();
    while uptime().saturating_sub(start) < ticks {}
}

#[unsafe(no_mangle)]
fn main(_args: Args) {
    println!("arming alarm: every {} ticks", ALARM_INTERVAL);

    sigalarm(ALARM_INTERVAL, on_alarm as usize).expect("alarmtest: sigalarm failed");

    busy_spin(SPIN_TICKS);

    let fired = HANDLER_FIRED.load(Ordering::Relaxed);
    println!("handler fired {} times over {} ticks", fired, SPIN_TICKS);

    if fired == 0 {
        exit_with_msg("alarmtest: handler never fired");
    }

    // Disarm before exiting so a lingering tick can't fire the handler after we're gone.
    sigalarm(0, 0).expect("alarmtest: disarm failed");

    exit(0);
}

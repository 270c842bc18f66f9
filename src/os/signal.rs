//! Emulated signal actions and the plumbing that carries host signals into the running process.
//!
//! The host handler only records the signal in a pending set. The engine polls that set between
//! instructions and runs the emulated handler itself, so emulated code never runs in signal context.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{host, Os};

/// What the program asked to happen when a signal arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    /// Run the emulated handler at this address.
    Catch(u16),
}

/// The sigaction record of one emulated signal.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalAction {
    pub handler: u16,
    pub mask: u16,
    pub flags: u16,
}

/// The signal actions of one process, indexed by emulated signal number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalActionTable {
    actions: Vec<SignalAction>,
}
impl SignalActionTable {
    /// A table of `nsig` default actions.
    pub fn new(nsig: usize) -> Self {
        Self { actions: vec![SignalAction::default(); nsig] }
    }
    /// The action of `sig`. Numbers outside the table have the default action.
    pub fn get(&self, sig: u16) -> SignalAction {
        self.actions.get(sig as usize).copied().unwrap_or_default()
    }
    /// Replaces the action of `sig` and returns the old one, or `None` if there is no such signal.
    pub fn set(&mut self, sig: u16, action: SignalAction) -> Option<SignalAction> {
        let slot = self.actions.get_mut(sig as usize)?;
        Some(std::mem::replace(slot, action))
    }
    /// Reverts every caught signal to the default action, as exec does. Ignored signals stay ignored.
    pub fn reset_caught<O: Os>(&mut self) {
        for action in self.actions.iter_mut() {
            if let Disposition::Catch(_) = O::disposition(action.handler) {
                action.handler = 0;
            }
        }
    }
}

static PENDING: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT: Cell<Option<u16>> = Cell::new(None);
}

/// The host-side handler: marks the signal pending and nothing else.
pub(crate) extern "C" fn on_host_signal(sig: libc::c_int) {
    if (0..64).contains(&sig) {
        PENDING.fetch_or(1 << sig, Ordering::SeqCst);
    }
}

/// Marks a host signal as pending, exactly as if it had been delivered.
pub fn raise_pending(host_sig: i32) {
    on_host_signal(host_sig);
}

/// Takes one pending signal that `O` maps, returning its emulated number.
pub fn take_pending<O: Os>() -> Option<u16> {
    if PENDING.load(Ordering::Relaxed) == 0 { return None; }
    for sig in 0..O::NSIG as u16 {
        if let Some(h) = O::host_signal(sig) {
            let bit = 1u64 << h;
            if PENDING.fetch_and(!bit, Ordering::SeqCst) & bit != 0 {
                return Some(sig);
            }
        }
    }
    None
}

/// Sets the pid of the process host signals are delivered into and returns the previous one.
pub fn set_current(pid: Option<u16>) -> Option<u16> {
    CURRENT.with(|c| c.replace(pid))
}
/// The pid of the process host signals are delivered into.
#[cfg(test)]
pub fn current() -> Option<u16> {
    CURRENT.with(|c| c.get())
}

/// Installs the host disposition for one host signal.
pub fn install(host_sig: i32, disposition: Disposition) {
    host::set_disposition(host_sig, disposition);
}

/// Makes the host dispositions match `table`, or puts every mapped signal back to default if `reset` is set.
pub fn switch_signals<O: Os>(table: &SignalActionTable, reset: bool) {
    for sig in 0..O::NSIG as u16 {
        if let Some(h) = O::host_signal(sig) {
            let d = if reset { Disposition::Default } else { O::disposition(table.get(sig).handler) };
            install(h, d);
        }
    }
}

#[test]
fn test_signal_table() {
    let mut t = SignalActionTable::new(12);
    assert_eq!(t.get(2), SignalAction::default());
    assert_eq!(t.set(11, SignalAction::default()), Some(SignalAction::default()));
    assert_eq!(t.set(12, SignalAction::default()), None);
    let action = SignalAction { handler: 0x120, mask: 3, flags: 0 };
    assert_eq!(t.set(2, action), Some(SignalAction::default()));
    assert_eq!(t.get(2), action);
    assert_eq!(t.set(40, action), None);
    assert_eq!(t.get(40), SignalAction::default());
}

#[test]
fn test_current_process() {
    assert_eq!(current(), None);
    assert_eq!(set_current(Some(3)), None);
    assert_eq!(set_current(Some(4)), Some(3));
    assert_eq!(current(), Some(4));
    set_current(None);
}

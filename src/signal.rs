use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

pub static FLAG_SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handlerfunc(_signum: c_int) {
    FLAG_SHUTDOWN.store(true, Ordering::Relaxed);
}

/// SIGINT and SIGTERM stop dispatching; running classifications finish.
pub fn install_signal_handler() -> nix::Result<()> {
    let handler = SigHandler::Handler(handlerfunc);
    for signal in [Signal::SIGTERM, Signal::SIGINT] {
        let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
        // SAFETY: the handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

#[test]
fn test_sigterm_sets_flag() {
    install_signal_handler().unwrap();
    nix::sys::signal::raise(Signal::SIGTERM).unwrap();
    assert!(FLAG_SHUTDOWN.load(Ordering::Relaxed));
    FLAG_SHUTDOWN.store(false, Ordering::Relaxed);
}

//! Relays termination requests (SIGINT/SIGTERM, console Ctrl-C) to a handler.
//!
//! The first request is handed to the handler so the server can be stopped
//! cleanly. A second one restores the default disposition and re-raises it,
//! so an impatient user can still kill us.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

lazy_static! {
    static ref HANDLER: Mutex<Option<Box<dyn Fn() + Send>>> = Mutex::new(None);
}

static RECEIVED: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
#[allow(unsafe_code)]
pub fn install_handler<F>(handler: F)
where
    F: Fn() + 'static + Send + Sync,
{
    use nix::sys::signal::*;
    use std::thread;

    // Mask the termination signals. The mask propagates to all threads
    // started after this point; spawned servers reset it before exec.
    let mut mask = SigSet::empty();
    mask.add(SIGTERM);
    mask.add(SIGINT);
    if let Err(err) = mask.thread_set_mask() {
        warn!("Unable to set signal mask, interrupts will kill immediately: {}", err);
        return;
    }

    set_handler(handler);

    thread::spawn(move || loop {
        let sig = match mask.wait() {
            Ok(sig) => sig,
            Err(err) => {
                warn!("Unable to wait for signals: {}", err);
                break;
            }
        };
        debug!("Received {:?}", sig);

        if invoke() {
            continue;
        }

        // Restore default behavior for the signal, unmask it and re-raise.
        unsafe {
            let _ = sigaction(
                sig,
                &SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
            );
        }

        let mut new_mask = SigSet::empty();
        new_mask.add(sig);
        let _ = new_mask.thread_unblock();
        let _ = raise(sig);
        break;
    });
}

#[cfg(windows)]
#[allow(unsafe_code)]
pub fn install_handler<F>(handler: F)
where
    F: Fn() + 'static + Send + Sync,
{
    use winapi::shared::minwindef::{BOOL, DWORD, FALSE, TRUE};
    use winapi::um::consoleapi::SetConsoleCtrlHandler;

    unsafe extern "system" fn ctrl_handler(_: DWORD) -> BOOL {
        if invoke() {
            TRUE
        } else {
            FALSE
        }
    }

    set_handler(handler);

    unsafe {
        SetConsoleCtrlHandler(Some(ctrl_handler), TRUE);
    }
}

/// Runs the handler for the first request. Returns false when the request
/// should fall through to the default action instead.
fn invoke() -> bool {
    if RECEIVED.fetch_add(1, Ordering::SeqCst) > 0 {
        return false;
    }

    match HANDLER.lock() {
        Ok(guard) => {
            if let Some(handler) = guard.as_ref() {
                handler();
            }
            true
        }
        Err(_) => false,
    }
}

fn set_handler<F>(handler: F)
where
    F: Fn() + 'static + Send + Sync,
{
    if let Ok(mut guard) = HANDLER.lock() {
        *guard = Some(Box::new(handler));
    }
}

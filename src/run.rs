use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::{LaunchConfig, SupervisorConfig};
use crate::error::Result;
use crate::signal;
use crate::supervisor::{Phase, Supervisor};

/// Launches the server and drives the supervisor until it settles back to
/// idle, either because the server went away or because a stop requested by
/// SIGINT/SIGTERM was confirmed.
pub fn run(launch: &LaunchConfig, config: SupervisorConfig) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        signal::install_handler(move || interrupted.store(true, Ordering::SeqCst));
    }

    let interval = config.poll_interval;
    let mut supervisor = Supervisor::new(config);
    supervisor.start(launch)?;

    loop {
        if interrupted.swap(false, Ordering::SeqCst) {
            debug!("Interrupted while {}", supervisor.phase());
            supervisor.stop();
        }

        if !supervisor.tick(Instant::now()) {
            break;
        }

        thread::sleep(interval);
    }

    debug_assert_eq!(supervisor.phase(), Phase::Idle);
    Ok(())
}

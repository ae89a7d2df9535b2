use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use atomic_update_core::INTERRUPTED_EXIT_CODE;
use atomic_update_stage::TransactionContext;
use nix::sys::signal::{SigSet, Signal};
use tracing::{error, warn};

/// Blocks SIGINT and SIGTERM in this thread (and every thread spawned after
/// it) and hands them to a dedicated thread that discards the transaction
/// and exits. The handler waits for the command in flight, and the main
/// flow issues no further command once the handler started. The signals
/// stay blocked while teardown runs, so repeated interrupts are ignored
/// until the process is gone. Spawned commands start with an empty signal
/// mask.
pub(crate) fn install(ctx: Arc<TransactionContext>) -> Result<()> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()
        .context("failed blocking interrupt signals")?;

    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let signal = match mask.wait() {
                Ok(signal) => signal,
                Err(err) => {
                    error!("failed waiting for interrupt signals: {err}");
                    return;
                }
            };
            warn!("Received {}, cleaning up", signal.as_str());
            if let Err(err) = ctx.interrupt() {
                error!("{err:#}");
            }
            std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
        })
        .context("failed spawning interrupt handler")?;
    Ok(())
}

/// Once an interrupt is being handled the calling thread never returns: the
/// handler exits the process when teardown is done.
pub(crate) fn wait_if_interrupted(ctx: &TransactionContext) {
    if !ctx.is_interrupted() {
        return;
    }
    loop {
        thread::park();
    }
}

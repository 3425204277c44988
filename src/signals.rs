use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio_util::sync::CancellationToken;

/// Exit status used when the user insists on stopping (128 + SIGINT).
const FORCED_EXIT: i32 = 130;

/// What should we do when the user stops this program?
///
/// The first SIGINT/SIGTERM cancels the run, which still removes the
/// container. A second one exits immediately.
pub fn handle_shutdown(cancel: CancellationToken) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for signal in signals.forever() {
            if cancel.is_cancelled() {
                log::error!("Received signal {signal} again, exiting without cleanup");
                std::process::exit(FORCED_EXIT);
            }
            log::warn!("Received signal {signal}, stopping the container");
            cancel.cancel();
        }
    });

    Ok(())
}

use clap::Parser;
use std::panic::{self, PanicHookInfo};
use wxbeacon2_listener::app::{self, Options};
use wxbeacon2_listener::logging;
use wxbeacon2_listener::scanner::RealScanner;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(why) = logging::init(options.verbose) {
        eprintln!("error: {}", why);
        std::process::exit(EXIT_ERROR);
    }

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    };

    let mut stdout = std::io::stdout().lock();
    match app::run_with_io(options, &RealScanner, shutdown, &mut stdout).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}

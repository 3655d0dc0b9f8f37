use std::io;

use git_statusd::daemon::Daemon;
use git_statusd::options::Options;

fn main() {
    let opts = match Options::parse(std::env::args().skip(1)) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("git-statusd: {err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(opts.log_level)
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut daemon = Daemon::new(opts);
    if let Err(err) = daemon.run(stdin.lock(), &mut stdout.lock()) {
        tracing::error!(error = %err, "request loop terminated");
        std::process::exit(1);
    }
}

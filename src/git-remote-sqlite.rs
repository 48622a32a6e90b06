use std::env;

fn main() {
    let level = git_remote_sqlite::logger::env_level().unwrap_or(log::Level::Warn);
    if let Err(e) = git_remote_sqlite::logger::init(level) {
        eprintln!("fatal: failed to initialize logger: {e}");
        std::process::exit(1);
    }

    let args: Vec<String> = env::args().skip(1).collect();

    if let Err(err) = git_remote_sqlite::run(&args) {
        log::error!("{err}");
        eprintln!("fatal: {err}");
        std::process::exit(1);
    }
}

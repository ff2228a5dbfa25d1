mod cli;
mod compute;
mod config;
mod present;
mod source;
mod telemetry;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    telemetry::init();
    cli::dispatch()
}

use clap::Parser;
use xrdemo::Settings;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::parse();
    let result = xrdemo::run(&settings);
    std::process::exit(xrdemo::exit_code(&result));
}

mod actions;
mod cli;
mod config;
mod context;
mod cooldown;
mod cursor;
mod dispatch;
mod frames;
mod gestures;
mod input;
mod ipc;
mod landmarks;
mod logging;
mod pipeline;
mod session;
mod source;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod anki;
mod cli;
mod coda;
mod config;
mod error;
mod generator;
mod groq;
mod http;
mod output;
mod record;
mod run;
mod store;
#[cfg(test)]
mod test_support;
mod util;

use crate::cli::RootArgs;
use crate::coda::CodaClient;
use crate::config::Config;
use crate::groq::GroqClient;
use crate::store::FlashcardStore;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    if config::load_env_file(&args.env_file)? {
        tracing::debug!(path = %args.env_file.display(), "loaded env file");
    }
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let source = CodaClient::new(config.coda.clone(), config.http_timeout);
    let model = GroqClient::new(config.groq.clone(), config.http_timeout);
    let store = FlashcardStore::new(args.store.clone());
    let options = args.run_options();

    let result = run::run(&source, &model, &store, &options)?;
    print!("{}", output::render_report(&result, store.path()));
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

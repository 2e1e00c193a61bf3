use std::{process::exit, sync::Arc};

use dotenvy::dotenv;
use log::{error, info, LevelFilter};

use crate::{
    catalog::Catalog,
    config::Config,
    http::AppState,
    repository::{InMemoryRepository, Repository},
};

mod catalog;
mod config;
mod coordinator;
mod error;
mod game;
mod handles;
mod hub;
mod http;
mod protocol;
mod repository;
mod session;
mod token;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    dotenv().ok();

    env_logger::builder()
        .filter_module("trivia_server", LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            exit(1);
        }
    };

    let catalog = match Catalog::load(&config.questions_file_path) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!("failed to load question catalog: {err}");
            exit(1);
        }
    };
    info!("loaded {} questions", catalog.len());

    let repository: Arc<dyn Repository> = InMemoryRepository::new(config.repository_ttl);
    let hub = hub::spawn(
        Arc::new(catalog),
        repository.clone(),
        config.countdown_duration,
        config.question_duration,
    );

    let config = Arc::new(config);
    let listen_addr = config.listen_addr;
    let state = AppState { hub, repository, config };
    let router = http::router(state);

    info!("starting trivia-server v{VERSION} on {listen_addr}");

    if let Err(err) = axum::Server::bind(&listen_addr)
        .serve(router.into_make_service())
        .await
    {
        error!("server error: {err}");
        exit(1);
    }
}

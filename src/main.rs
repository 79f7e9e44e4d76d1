use acme_server::{http, Config, Engine};

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => {
            eyre::bail!("usage: acme-server <config.json>");
        }
    };

    log::info!(
        "starting ACME server for {} (dialect {:?})",
        config.host,
        config.acme_version,
    );

    let engine = Engine::new(config)?;
    http::run(engine).await
}

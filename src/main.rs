use log::{error, info};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use login_service::integration::{self, Config};
use login_service::state::AppState;

#[tokio::main]
async fn main() {
    let cfg = Config::default();

    if let Err(e) = run(&cfg).await {
        error!("Login service stopped: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: &Config) -> integration::Result<()> {
    let state = AppState::init(cfg)?;

    let cors = CorsLayer::new()
        .allow_origin(cfg.env.allow_origin()?)
        .allow_methods(cfg.env.allow_methods())
        .allow_headers(cfg.env.allow_headers());

    let app = login_service::app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = cfg.env.addr();
    info!("Starting login service on {addr}");

    match cfg.env.ssl_config()? {
        Some(tls) => {
            axum_server::bind_openssl(addr, tls)
                .serve(app.into_make_service())
                .await?
        }
        None => {
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?
        }
    }

    Ok(())
}

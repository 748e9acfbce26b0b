use quizroom_server::api::routes;
use quizroom_server::config::Config;
use quizroom_server::coordinator::Coordinator;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let coordinator = Coordinator::new(&config);

    let addr = config.bind_address();
    tracing::info!(port = addr.1, "Starting quiz room coordinator");

    warp::serve(routes::routes(coordinator)).run(addr).await;
}

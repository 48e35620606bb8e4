use ebook_forge::config::Config;
use ebook_forge::render::PdfRenderer;
use ebook_forge::routes::{self, AppState, JobStore};
use ebook_forge::services::{
    AllowListedFetcher, HistorySink, HostAllowList, HttpImageClient, ImageFetcher,
    InMemoryCreditStore, InMemoryHistory, JsonFileHistory, LLMClient,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::from_env()?;

    let llm = Arc::new(LLMClient::new(&config.llm));
    let allowed_hosts = HostAllowList::new(&config.cover_allowed_hosts)
        .allow_url_host(&config.pipeline.placeholder_base_url)
        .allow_url_host(&config.image.api_url);
    let images = Arc::new(HttpImageClient::new(
        &config.image,
        config.pipeline.call_timeout,
        allowed_hosts.clone(),
    )?);
    let fetcher: Arc<dyn ImageFetcher> =
        Arc::new(AllowListedFetcher::new(images.clone(), allowed_hosts));
    let history: Arc<dyn HistorySink> = match &config.history_dir {
        Some(dir) => {
            tracing::info!("Persisting history to {}", dir.display());
            Arc::new(JsonFileHistory::new(dir.clone()))
        }
        None => Arc::new(InMemoryHistory::new()),
    };

    let assembler = ebook_forge::build_assembler(llm, images, history.clone(), &config.pipeline);

    let app_state = AppState {
        assembler: Arc::new(assembler),
        renderer: Arc::new(PdfRenderer::default()),
        images: fetcher,
        credits: Arc::new(InMemoryCreditStore::new(config.default_credits)),
        history,
        jobs: Arc::new(JobStore::new(config.job_ttl, config.max_jobs)),
        min_topic_len: config.min_topic_len,
    };

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::AllowMethods::any())
                .allow_headers(tower_http::cors::AllowHeaders::any()),
        );

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

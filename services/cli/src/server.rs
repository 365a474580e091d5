use crate::cli::ServeArgs;
use crate::infra::{AppState, PipelineFactory};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use cv_tagger::config::AppConfig;
use cv_tagger::error::AppError;
use cv_tagger::telemetry;
use cv_tagger::workflows::cv_pipeline::RunBoard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let factory = PipelineFactory::from_config(&config)?;
    let board = Arc::new(RunBoard::new(factory));

    let app = with_service_routes(board)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        upload_enabled = config.pipeline.upload_enabled,
        "cv tagging service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

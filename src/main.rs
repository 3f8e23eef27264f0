use std::{sync::Arc, time::Duration};

use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    let db_arc = Arc::new(db_pool);
    if cfg.auto_migrate {
        api::db::run_migrations(&db_arc).await?;
    }

    // Init events
    let (event_sender, event_rx) = api::events::EventSender::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    // Build services
    let order_store: Arc<dyn api::services::orders::OrderStore> = Arc::new(
        api::services::orders::OrderService::new(db_arc.clone(), Some(event_sender.clone())),
    );
    let gateway: Arc<dyn api::services::payments::PaymentGateway> =
        Arc::new(api::services::payments::HttpPaymentGateway::new(&cfg.gateway)?);
    let confirmations: Arc<dyn api::services::notifications::ConfirmationSender> =
        match &cfg.notify_url {
            Some(url) => Arc::new(api::services::notifications::WebhookConfirmationSender::new(
                url.clone(),
                cfg.notify_timeout_secs,
            )?),
            None => Arc::new(api::services::notifications::LogConfirmationSender),
        };

    let checkout_service = Arc::new(api::services::checkout::CheckoutService::new(
        order_store.clone(),
        gateway,
        confirmations,
        event_sender.clone(),
        cfg.currency.clone(),
    ));

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        checkout_service,
        order_store,
    };

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = api::handlers::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer);

    let addr = cfg.server_addr();
    info!("storefront-api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

mod alert_layer;
mod auth;
mod availability;
mod booking;
mod config;
mod db;
mod handlers;
mod hours;
mod models;
mod notify;
mod payment;
mod rate_limit;
mod repository;
mod stripe;
mod time;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use availability::Resolver;
use config::Config;
use hours::BusinessHours;
use notify::{Notifier, ResendMailer};
use rate_limit::{
    rate_limit_account, rate_limit_admin, rate_limit_booking, rate_limit_public, RateLimiter,
};
use repository::SqliteStore;
use stripe::{CheckoutProvider, StripeCheckout};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: SqliteStore,
    pub hours: BusinessHours,
    pub resolver: Resolver,
    pub checkout: Arc<dyn CheckoutProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub session_secret: String,
    pub webhook_secret: String,
    /// Storefront base for links handed back to customers.
    pub site_url: url::Url,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
/// Vite dev server, allowed alongside SITE_URL.
const DEV_ORIGIN: &str = "http://localhost:5173";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Read before tracing so the alert layer can use the mailer.
    let config = Config::from_env()?;
    let mailer = ResendMailer::new(config.resend_api_key.clone(), config.email_from.clone())?;

    // ── Tracing: console + optional e-mail alerts on errors ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match &config.admin_email {
        Some(to) if mailer.is_configured() => {
            let alerts = alert_layer::EmailAlertLayer::new(mailer.clone(), to.clone());
            registry.with(alerts).init();
        }
        _ => registry.init(),
    }
    config.log_missing_integrations();

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("cannot open database {}", config.database_url))?;

    db::run_migrations(&pool).await?;

    let site_url = config.storefront_url()?;
    let checkout = StripeCheckout::new(
        config.stripe_secret_key.clone(),
        site_url.clone(),
        config.currency.clone(),
    )?;

    let state = Arc::new(AppState {
        store: SqliteStore::new(pool),
        hours: config.business_hours.clone(),
        resolver: Resolver::default(),
        checkout: Arc::new(checkout),
        notifier: Arc::new(mailer),
        session_secret: config.session_secret.clone(),
        webhook_secret: config.stripe_webhook_secret.clone(),
        site_url,
        started_at: Instant::now(),
    });

    let rate_limiter = RateLimiter::with_default_tiers();

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    let app = build_router(state, rate_limiter)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config)?);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Studio booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Whitelist SITE_URL (plus the dev server) when configured, otherwise allow any.
fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = match &config.site_url {
        Some(site) => {
            let origin = site.origin().ascii_serialization();
            let origins = vec![
                HeaderValue::from_str(&origin)
                    .with_context(|| format!("SITE_URL origin is not a header value: {origin}"))?,
                HeaderValue::from_static(DEV_ORIGIN),
            ];
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::new().allow_origin(Any),
    };
    Ok(cors.allow_methods(Any).allow_headers(Any))
}

/// All API routes, grouped by rate-limit tier.
pub fn build_router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    // 1. No-limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/webhooks/stripe",
            post(handlers::payment::stripe_webhook),
        );

    // 2. Public: catalog and availability reads
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route("/api/services/{id}", get(handlers::client::get_service))
        .route(
            "/api/bookings/availability",
            get(handlers::client::availability_feed),
        )
        .route(
            "/api/appointments/slots",
            get(handlers::client::appointment_slots),
        )
        .route(
            "/api/business-hours",
            get(handlers::client::business_hours),
        )
        .route("/api/time-off", get(handlers::client::list_time_off))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_booking));

    // 4. Account: signed-in customer endpoints
    let account_routes = Router::new()
        .route("/api/bookings/my", get(handlers::client::my_bookings))
        .route(
            "/api/bookings/my/counts",
            get(handlers::client::my_booking_counts),
        )
        .route("/api/bookings/{id}", get(handlers::client::get_booking))
        .route(
            "/api/bookings/{id}/cancel",
            post(handlers::client::cancel_booking),
        )
        .route("/api/account", delete(handlers::client::delete_account))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_account));

    // 5. Admin
    let admin_routes = Router::new()
        .route("/api/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/reschedule",
            put(handlers::admin::reschedule_booking),
        )
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route(
            "/api/admin/services/{id}",
            put(handlers::admin::update_service).delete(handlers::admin::delete_service),
        )
        .route(
            "/api/admin/services/{id}/variants",
            post(handlers::admin::create_variant),
        )
        .route(
            "/api/admin/variants/{id}",
            delete(handlers::admin::delete_variant),
        )
        .route("/api/admin/email", post(handlers::admin::send_email))
        .layer(from_fn_with_state(limiter, rate_limit_admin));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .with_state(state)
}

use axum::Router;
use tracing::{error, info};

use crate::health::{self, HealthState};
use crate::settings::{self, SettingsState};

pub fn router(settings: SettingsState, health: HealthState) -> Router {
    settings::router(settings).merge(health::router(health))
}

pub async fn spawn(bind_address: &str, port: u16, router: Router) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "settings and health endpoints started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use secrecy::ExposeSecret;

use nearme_api::app::{AppServices, build_app};
use nearme_auth::HashingCost;
use nearme_infra::{
    config::AuthConfig,
    oauth::{GoogleProvider, IdentityProvider},
    store::{InMemoryStore, PostgresStore, SessionStore, UserStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nearme_observability::init();

    let config = AuthConfig::from_env().context("loading configuration")?;

    let (users, sessions): (Arc<dyn UserStore>, Arc<dyn SessionStore>) = match &config.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresStore::connect(url.expose_secret())
                    .await
                    .context("connecting to postgres")?,
            );
            store.ensure_schema().await.context("applying schema")?;
            tracing::info!("using postgres store");
            (store.clone() as Arc<dyn UserStore>, store as Arc<dyn SessionStore>)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; accounts and sessions live in memory only");
            let store = Arc::new(InMemoryStore::new());
            (store.clone() as Arc<dyn UserStore>, store as Arc<dyn SessionStore>)
        }
    };

    let provider: Arc<dyn IdentityProvider> = Arc::new(
        GoogleProvider::new(config.google.clone()).context("building google provider")?,
    );

    let services = Arc::new(
        AppServices::build(&config, users, sessions, provider, HashingCost::default())
            .context("wiring services")?,
    );

    if let Some(admin) = &config.bootstrap_admin {
        services
            .accounts
            .bootstrap_admin(
                &admin.email,
                &admin.username,
                admin.password.expose_secret(),
                Utc::now(),
            )
            .await
            .context("creating bootstrap admin")?;
    }

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

//! Fetch a push-notification token for the service account in `GOOGLE_APPLICATION_CREDENTIALS`
//!
//! Run with `RUST_LOG=fcm_auth=debug` to see the exchange.

use fcm_auth::{ServiceAccount, TokenProvider, FIREBASE_MESSAGING_SCOPE};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(service_account) = ServiceAccount::from_env()? else {
        return Err("GOOGLE_APPLICATION_CREDENTIALS is not set".into());
    };

    let project_id = service_account.project_id().await?;
    let token = service_account.token(FIREBASE_MESSAGING_SCOPE).await?;
    println!(
        "project {project_id}: token valid until {}",
        token.expires_at()
    );
    Ok(())
}

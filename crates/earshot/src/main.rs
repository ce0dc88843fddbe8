//! `earshot-server`: a standalone voice server.
//!
//! ```text
//! earshot-server [config.toml]
//! ```
//!
//! Without a path, built-in defaults are used. Anyone with a non-blank
//! username may join; embed the library to plug in real authentication.

use earshot::prelude::*;

#[tokio::main]
async fn main() -> Result<(), EarshotError> {
    let config = match std::env::args().nth(1) {
        Some(path) => VoiceConfig::load(&path)?,
        None => VoiceConfig::default(),
    };
    earshot::init_tracing(&config.log_filter);

    let server = VoiceServerBuilder::new()
        .config(config)
        .build(OpenAuthenticator)
        .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received"),
            Err(e) => tracing::error!(error = %e, "cannot listen for interrupt"),
        }
        shutdown.send_replace(true);
    });

    server.run().await
}

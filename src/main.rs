use std::{io::Write, process};

use quire::{
    application::{dispatch::DispatchRequest, error::AppError},
    config,
    infra::{app::Application, error::InfraError, http, telemetry},
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = Application::from_settings(&settings)?;

    // Drops expired entries that no lookup reaches.
    let purge_cache = app.cache.clone();
    let purge_interval = settings.cache.purge_interval;
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_interval);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = purge_cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    });

    let result = serve_http(&settings, &app).await;

    purge_handle.abort();
    let _ = purge_handle.await;

    result
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let app = Application::from_settings(&settings)?;
    let request = DispatchRequest::get(args.host.as_str(), &args.uri).with_elevated(args.elevated);

    let response = app.dispatcher.handle(&request).await?;
    info!(
        target = "quire::render",
        uri = args.uri.as_str(),
        status = response.status().as_u16(),
        "Rendered request"
    );
    if let Some(location) = response.headers().get(axum::http::header::LOCATION) {
        info!(
            target = "quire::render",
            location = ?location,
            "Response is a redirect"
        );
    }

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(response.body())
        .and_then(|()| stdout.flush())
        .map_err(InfraError::Output)?;

    app.dispatcher.terminate(&request, &response).await;
    Ok(())
}

async fn serve_http(settings: &config::Settings, app: &Application) -> Result<(), AppError> {
    let public_router = http::build_router(app.http_state(settings.site.preview_token.clone()));
    let admin_router = http::build_admin_router(app.admin_state());

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(InfraError::bind(settings.server.public_addr))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(InfraError::bind(settings.server.admin_addr))?;

    info!(
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "Listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = stop_tx.send(true);
            }
            Err(err) => {
                // Keep the sender alive: a dropped sender would stop the servers.
                warn!(error = %err, "Cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        stopped(stop_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(InfraError::Serve)?;
        }
        () = deadline => {
            warn!(
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#![feature(error_generic_member_access)]

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::sync::mpsc::channel;
use tokio::{select, spawn};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::api::ApiState;
use crate::app::AdminApp;
use crate::auth::HttpAuthProvider;
use crate::repository::PgNetworkRepository;

mod admin;
mod api;
mod app;
mod auth;
mod background_services;
mod cache;
mod dal;
mod map_controller;
mod model;
mod repository;
mod route_builder;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_timeout(Duration::from_millis(1000))
        .with_endpoint(
            dotenvy::var("OTLP_ENDPOINT").unwrap_or("http://localhost:4317".to_string()),
        )
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name("transit_network_admin")
                .build(),
        )
        .build();

    let tracer = provider.tracer("transit_network_admin");

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::daily("./logs", "transit_network_admin.log");
    let (non_blocking_appender, _guard) = tracing_appender::non_blocking(appender);

    // A layer that logs events to rolling files.
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .pretty();

    Registry::default()
        .with(telemetry_layer)
        .with(file_log)
        .with(env_filter)
        .init();

    let db_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = sqlx::PgPool::connect(&db_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let auth_url = env::var("AUTH_URL").context("AUTH_URL is not set")?;

    let mut app = AdminApp::new(
        PgNetworkRepository::new(pool),
        HttpAuthProvider::new(auth_url),
    );
    app.load_initial().await?;

    let graph = app.graph();
    let sessions = app.sessions();

    let (command_sender, command_receiver) = channel(32);

    let dispatcher = spawn(app.run(command_receiver));
    let refresher = spawn(background_services::session_refresher::run(
        sessions.clone(),
        command_sender.clone(),
    ));

    let bind_addr = env::var("BIND_ADDR").unwrap_or("0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {bind_addr}");

    let state = ApiState {
        commands: command_sender,
        graph,
        sessions,
    };
    let server = spawn(async move {
        axum::serve(listener, api::router(state))
            .with_graceful_shutdown(async {
                _ = tokio::signal::ctrl_c().await;
            })
            .await
    });

    select! {
        res = dispatcher => {
            if let Err(err) = res {
                error!("{:?}", err);
            }
        },
        res = refresher => {
            if let Err(err) = res {
                error!("{:?}", err);
            }
        },
        res = server => {
            match res {
                Ok(Err(err)) => error!("{err}"),
                Err(err) => error!("{:?}", err),
                Ok(Ok(())) => {}
            }
        },
    }

    Ok(())
}

#![allow(dead_code)]

use std::sync::OnceLock;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlq::{Queue, QueueOptions, Store};
use sqlq_server::{api::create_router, AppState};
use tower::ServiceExt as _;

pub struct TestApp {
    pub router: Router,
    pub queue: Queue,
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_options(QueueOptions::new("http")).await
    }

    pub async fn with_options(options: QueueOptions) -> anyhow::Result<Self> {
        init_tracing();

        let store = Store::connect_in_memory()
            .await
            .context("open in-memory store")?;
        store.migrate().await.context("migrate store")?;

        let queue = Queue::new(store, options).context("open queue")?;
        let router = create_router(AppState::from_queue(queue.clone()));

        Ok(Self { router, queue })
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Bytes)> {
        let body = match body {
            Some(value) => Body::from(serde_json::to_vec(&value)?),
            None => Body::empty(),
        };
        self.raw_request(method, path_and_query, body).await
    }

    pub async fn raw_request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Body,
    ) -> anyhow::Result<(StatusCode, Bytes)> {
        let request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("content-type", "application/json")
            .body(body)
            .context("build request")?;

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, body))
    }
}

pub fn text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).into_owned()
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "sqlq_server=info,sqlq=info,sqlx=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

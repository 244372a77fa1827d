//! Shared utilities for integration tests.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{routing::get, Router};
use greenlight::net::Listener;
use greenlight::{BackgroundTasks, Level, Logger, Server, ServerConfig, ServerError, ServerState, Signal};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// In-memory log sink that can be inspected while the logger writes to it.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn entries(&self) -> Vec<serde_json::Value> {
        let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        raw.lines()
            .map(|line| serde_json::from_str(line).expect("every line is a JSON object"))
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| entry["message"].as_str().unwrap().to_string())
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Router with a healthcheck and a handler that sleeps for `delay`.
pub fn slow_router(delay: Duration) -> Router {
    greenlight::http::handlers::routes("development").route(
        "/slow",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "done"
        }),
    )
}

pub fn test_config(grace: Duration) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".into();
    config.port = 0;
    config.shutdown.grace_period_ms = grace.as_millis() as u64;
    config
}

/// A server running on an ephemeral port with a manual shutdown trigger.
pub struct TestServer {
    pub addr: SocketAddr,
    pub log: SharedBuf,
    pub tasks: BackgroundTasks,
    pub state: watch::Receiver<ServerState>,
    pub handle: JoinHandle<Result<(), ServerError>>,
    trigger: Option<oneshot::Sender<Signal>>,
}

impl TestServer {
    pub async fn start(config: ServerConfig, router: Router) -> Self {
        let log = SharedBuf::default();
        let logger = Arc::new(Logger::new(log.clone(), Level::Info));
        let tasks = BackgroundTasks::new(Arc::clone(&logger));

        let listener = Listener::bind(&config.bind_address(), config.listener.max_connections)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::new(config, logger, tasks.clone(), router);
        let state = server.state();
        let (trigger, signal) = oneshot::channel::<Signal>();

        let handle = tokio::spawn(server.run(listener, async move {
            match signal.await {
                Ok(signal) => signal,
                Err(_) => std::future::pending().await,
            }
        }));

        Self {
            addr,
            log,
            tasks,
            state,
            handle,
            trigger: Some(trigger),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Deliver a termination signal. Only the first call has an effect.
    pub fn signal(&mut self, signal: Signal) {
        if let Some(trigger) = self.trigger.take() {
            let _ = trigger.send(signal);
        }
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

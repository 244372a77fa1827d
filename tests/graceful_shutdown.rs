//! Graceful shutdown scenarios against a live server.

use std::time::{Duration, Instant};

use greenlight::lifecycle::ShutdownError;
use greenlight::net::Listener;
use greenlight::{BackgroundTasks, Level, Logger, Server, ServerError, ServerState, Signal};
use std::sync::Arc;

mod common;
use common::{client, slow_router, test_config, SharedBuf, TestServer};

#[tokio::test]
async fn idle_server_stops_cleanly() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(5)),
        slow_router(Duration::ZERO),
    )
    .await;

    let res = client().get(server.url("/v1/healthcheck")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "available");
    assert_eq!(body["system_info"]["environment"], "development");

    server.signal(Signal::Interrupt);
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("shutdown should finish")
        .unwrap();
    assert!(result.is_ok(), "unexpected error: {result:?}");

    assert_eq!(
        server.log.messages(),
        vec![
            "starting server",
            "shutting down server",
            "completing background tasks",
            "stopped server"
        ]
    );
    let entries = server.log.entries();
    assert_eq!(entries[0]["properties"]["env"], "development");
    assert_eq!(entries[1]["properties"]["signal"], "interrupt");
    assert_eq!(*server.state.borrow(), ServerState::Stopped);
}

#[tokio::test]
async fn listener_is_closed_after_shutdown() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(5)),
        slow_router(Duration::ZERO),
    )
    .await;

    server.signal(Signal::Terminate);
    server.handle.await.unwrap().unwrap();

    assert!(tokio::net::TcpStream::connect(server.addr).await.is_err());
    assert_eq!(server.log.entries()[1]["properties"]["signal"], "terminated");
}

#[tokio::test]
async fn in_flight_request_finishes_within_grace_period() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(5)),
        slow_router(Duration::from_millis(300)),
    )
    .await;

    let url = server.url("/slow");
    let request = tokio::spawn(async move { client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.signal(Signal::Interrupt);

    let res = request.await.unwrap().expect("in-flight request completes");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "done");

    server.handle.await.unwrap().unwrap();
    assert_eq!(server.log.messages().last().unwrap(), "stopped server");
}

#[tokio::test]
async fn slow_handler_is_not_cut_short_during_drain() {
    let mut config = test_config(Duration::from_secs(5));
    config.timeouts.read_header_secs = 1;
    let mut server = TestServer::start(config, slow_router(Duration::from_millis(1500))).await;

    let url = server.url("/slow");
    let request = tokio::spawn(async move { client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.signal(Signal::Interrupt);

    let res = request.await.unwrap().expect("handler runs to completion");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "done");

    server.handle.await.unwrap().unwrap();
    assert_eq!(server.log.messages().last().unwrap(), "stopped server");
}

#[tokio::test]
async fn request_outliving_grace_period_fails_shutdown() {
    let mut server = TestServer::start(
        test_config(Duration::from_millis(200)),
        slow_router(Duration::from_secs(3)),
    )
    .await;

    let url = server.url("/slow");
    let _request = tokio::spawn(async move { client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.signal(Signal::Interrupt);
    let result = tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("deadline bounds the wait")
        .unwrap();

    match result {
        Err(ServerError::Shutdown(ShutdownError::DeadlineExceeded { remaining, .. })) => {
            assert!(remaining >= 1)
        }
        other => panic!("expected deadline exceeded, got {other:?}"),
    }

    let messages = server.log.messages();
    assert!(messages.contains(&"shutting down server".to_string()));
    assert!(!messages.contains(&"completing background tasks".to_string()));
    assert!(!messages.contains(&"stopped server".to_string()));
    assert_eq!(*server.state.borrow(), ServerState::Draining);
}

#[tokio::test]
async fn idle_keep_alive_connection_does_not_delay_shutdown() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(10)),
        slow_router(Duration::ZERO),
    )
    .await;

    // Keep the client (and its pooled connection) alive across the shutdown.
    let client = client();
    let res = client.get(server.url("/v1/healthcheck")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    res.bytes().await.unwrap();

    let started = Instant::now();
    server.signal(Signal::Interrupt);
    server.handle.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(client);
}

#[tokio::test]
async fn background_tasks_are_awaited_past_grace_period() {
    let mut server = TestServer::start(
        test_config(Duration::from_millis(50)),
        slow_router(Duration::ZERO),
    )
    .await;

    let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    server.tasks.spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    server.signal(Signal::Interrupt);
    server.handle.await.unwrap().unwrap();

    assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(server.log.messages().last().unwrap(), "stopped server");
}

#[tokio::test]
async fn released_registrations_do_not_block_stop() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(1)),
        slow_router(Duration::ZERO),
    )
    .await;

    let guards: Vec<_> = (0..4).map(|_| server.tasks.register()).collect();
    drop(guards);

    server.signal(Signal::Interrupt);
    tokio::time::timeout(Duration::from_secs(1), server.handle)
        .await
        .expect("nothing outstanding")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn leaked_registration_blocks_stop() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(1)),
        slow_router(Duration::ZERO),
    )
    .await;

    let mut guards: Vec<_> = (0..3).map(|_| server.tasks.register()).collect();
    guards.truncate(1);

    server.signal(Signal::Interrupt);
    let handle = &mut server.handle;
    assert!(
        tokio::time::timeout(Duration::from_millis(500), handle).await.is_err(),
        "one task still registered"
    );
    assert_eq!(
        server.log.messages().last().unwrap(),
        "completing background tasks"
    );

    drop(guards);
    tokio::time::timeout(Duration::from_secs(1), server.handle)
        .await
        .expect("released")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn responses_carry_request_id() {
    let mut server = TestServer::start(
        test_config(Duration::from_secs(1)),
        slow_router(Duration::ZERO),
    )
    .await;

    let res = client().get(server.url("/v1/healthcheck")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));

    server.signal(Signal::Interrupt);
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_aborts_without_drain() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config(Duration::from_secs(1));
    config.port = taken.local_addr().unwrap().port();

    let log = SharedBuf::default();
    let logger = Arc::new(Logger::new(log.clone(), Level::Info));
    let tasks = BackgroundTasks::new(Arc::clone(&logger));
    let server = Server::new(config, logger, tasks, slow_router(Duration::ZERO));

    let err = server.serve().await.unwrap_err();
    assert!(matches!(err, ServerError::Listener(_)));
    assert!(!err.is_closed());
    assert!(log.messages().is_empty());
}

#[tokio::test]
async fn simple_mode_serves_without_drain() {
    let log = SharedBuf::default();
    let logger = Arc::new(Logger::new(log.clone(), Level::Info));
    let tasks = BackgroundTasks::new(Arc::clone(&logger));
    let listener = Listener::bind("127.0.0.1:0", 16).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(
        test_config(Duration::from_secs(1)),
        logger,
        tasks,
        slow_router(Duration::ZERO),
    );
    let handle = tokio::spawn(server.run_simple(listener));

    let res = client()
        .get(format!("http://{addr}/v1/healthcheck"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(log.messages(), vec!["starting server"]);

    handle.abort();
}

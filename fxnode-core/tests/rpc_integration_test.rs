use anyhow::Result;
use fxnode::Value;
use fxnode_core::comms::rpc::{base_methods, RpcClient, RpcPool, RpcServer};
use fxnode_core::{Address, Node, RpcArgs, RpcError};
use std::time::Duration;
use tokio::time::timeout;

const STOP_TIMEOUT: Option<Duration> = Some(Duration::from_secs(1));

async fn start_server() -> Result<RpcServer> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut methods = base_methods();
    methods
        .register("add", |args: RpcArgs| {
            let total: i64 = args.args.iter().filter_map(Value::as_i64).sum();
            Ok(Value::from(total))
        })
        .register("greet", |args: RpcArgs| {
            let name = args.string(0, "name")?;
            let greeting = args
                .get(1, "greeting")
                .and_then(Value::as_str)
                .unwrap_or("hello")
                .to_string();
            Ok(Value::from(format!("{}, {}", greeting, name)))
        })
        .register("fail", |_| Err(RpcError::application("boom")));

    let server = RpcServer::bind("rpc-test", &Address::localhost(), methods).await?;
    server.start().await?;
    Ok(server)
}

#[tokio::test]
async fn test_request_round_trips() -> Result<()> {
    let server = start_server().await?;
    let mut client = RpcClient::connect(&server.server_address()).await?;

    let echoed = client
        .request("echo", RpcArgs::new().arg("ping"))
        .await?;
    assert_eq!(echoed, Value::from("ping"));

    let sum = client
        .request("add", RpcArgs::new().arg(1).arg(2).arg(39))
        .await?;
    assert_eq!(sum, Value::from(42));

    server.stop(STOP_TIMEOUT).await;
    Ok(())
}

#[tokio::test]
async fn test_positional_and_keyword_arguments() -> Result<()> {
    let server = start_server().await?;
    let mut client = RpcClient::connect(&server.server_address()).await?;

    let positional = client
        .request("greet", RpcArgs::new().arg("A").arg("hi"))
        .await?;
    assert_eq!(positional, Value::from("hi, A"));

    let keywords = client
        .request("greet", RpcArgs::new().kwarg("name", "B"))
        .await?;
    assert_eq!(keywords, Value::from("hello, B"));

    server.stop(STOP_TIMEOUT).await;
    Ok(())
}

#[tokio::test]
async fn test_remote_errors_keep_the_connection() -> Result<()> {
    let server = start_server().await?;
    let mut client = RpcClient::connect(&server.server_address()).await?;

    match client.request("fail", RpcArgs::new()).await {
        Err(RpcError::Remote(message)) => assert_eq!(message, "boom"),
        other => panic!("expected remote error, got {:?}", other),
    }
    match client.request("missing", RpcArgs::new()).await {
        Err(RpcError::Remote(message)) => assert_eq!(message, "method not found: missing"),
        other => panic!("expected remote error, got {:?}", other),
    }
    match client.request("greet", RpcArgs::new()).await {
        Err(RpcError::Remote(message)) => assert!(message.contains("name"), "{}", message),
        other => panic!("expected remote error, got {:?}", other),
    }

    // Application errors do not poison the connection.
    assert!(client.is_usable());
    assert_eq!(client.request("echo", RpcArgs::new().arg(7)).await?, Value::from(7));

    server.stop(STOP_TIMEOUT).await;
    Ok(())
}

#[tokio::test]
async fn test_notify_never_reports_failures() -> Result<()> {
    let server = start_server().await?;
    let mut client = RpcClient::connect(&server.server_address()).await?;

    client.notify("fail", RpcArgs::new()).await?;
    client.notify("missing", RpcArgs::new()).await?;
    // The connection still answers requests after the failed notifications.
    assert_eq!(
        client.request("echo", RpcArgs::new().arg("after")).await?,
        Value::from("after")
    );

    server.stop(STOP_TIMEOUT).await;
    Ok(())
}

#[tokio::test]
async fn test_pool_reuses_and_invalidates() -> Result<()> {
    let server = start_server().await?;
    let address = server.server_address();
    let pool = RpcPool::new();

    assert_eq!(pool.request(&address, "echo", RpcArgs::new().arg(1)).await?, Value::from(1));
    assert_eq!(pool.idle_count(&address), 1);

    {
        let mut first = pool.connection(&address).await?;
        let mut second = pool.connection(&address).await?;
        assert_eq!(pool.idle_count(&address), 0);
        first.request("echo", RpcArgs::new().arg("a")).await?;
        second.request("echo", RpcArgs::new().arg("b")).await?;
    }
    assert_eq!(pool.idle_count(&address), 2);

    // A call abandoned mid-flight leaves its connection out of the pool.
    {
        let mut conn = pool.connection(&address).await?;
        let _ = timeout(
            Duration::from_nanos(1),
            conn.request("echo", RpcArgs::new().arg("slow")),
        )
        .await;
        if !conn.is_usable() {
            drop(conn);
            assert_eq!(pool.idle_count(&address), 1);
        }
    }

    server.stop(STOP_TIMEOUT).await;
    pool.clear();
    assert_eq!(pool.idle_count(&address), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_clients_get_their_own_replies() -> Result<()> {
    let server = start_server().await?;
    let address = server.server_address();
    let pool = RpcPool::new();

    let mut tasks = Vec::new();
    for i in 0..16i64 {
        let pool = pool.clone();
        let address = address.clone();
        tasks.push(tokio::spawn(async move {
            let mut replies = Vec::new();
            for j in 0..10i64 {
                let value = pool
                    .request(&address, "add", RpcArgs::new().arg(i * 100).arg(j))
                    .await?;
                replies.push((i * 100 + j, value));
            }
            Ok::<_, RpcError>(replies)
        }));
    }
    for task in tasks {
        for (expected, value) in task.await?? {
            assert_eq!(value, Value::from(expected));
        }
    }

    server.stop(STOP_TIMEOUT).await;
    Ok(())
}

#[tokio::test]
async fn test_stop_closes_open_connections() -> Result<()> {
    let server = start_server().await?;
    let mut client = RpcClient::connect(&server.server_address()).await?;
    client.request("echo", RpcArgs::new().arg(1)).await?;

    server.stop(STOP_TIMEOUT).await;
    assert!(server.join(Some(Duration::from_secs(1))).await);
    assert!(!server.is_running());

    let outcome = timeout(Duration::from_secs(1), client.request("echo", RpcArgs::new())).await?;
    assert!(outcome.is_err());
    assert!(!client.is_usable());
    Ok(())
}

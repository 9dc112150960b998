//! End-to-end scenarios over loopback TCP.

use std::time::Duration;

use framelink::{
    AckPolicy, Command, Connection, LinkConfig, LinkState, Received, open_client, open_server,
};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn expect_command(conn: &Connection) -> Command {
    match timeout(Duration::from_secs(5), conn.recv_one()).await {
        Ok(Received::Command(cmd)) => cmd,
        Ok(Received::Closed) => panic!("connection closed while waiting for a command"),
        Err(_) => panic!("timed out waiting for a command"),
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    cond()
}

async fn connected_pair(server_cfg: LinkConfig, client_cfg: LinkConfig) -> (Connection, Connection) {
    let server = open_server("127.0.0.1", 0, server_cfg).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let client = open_client("127.0.0.1", port, client_cfg).unwrap();
    assert!(
        wait_until(|| client.is_open(), Duration::from_secs(5)).await,
        "client never connected"
    );
    (server, client)
}

#[tokio::test]
async fn round_trips_frames_in_both_directions() {
    init_logging();
    let (server, client) = connected_pair(LinkConfig::default(), LinkConfig::default()).await;

    client.send(0x00B0, vec![0xFACE, 0x0BAD, -1]);
    assert_eq!(
        expect_command(&server).await,
        Command::new(0x00B0, vec![0xFACE, 0x0BAD, -1])
    );

    server.send(0x0001, vec![]);
    assert_eq!(expect_command(&client).await, Command::new(0x0001, vec![]));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn preserves_fifo_order_over_the_wire() {
    init_logging();
    let (server, client) = connected_pair(LinkConfig::default(), LinkConfig::default()).await;

    for i in 0..20 {
        client.send(i as u16, vec![i, -i]);
    }
    for i in 0..20 {
        assert_eq!(expect_command(&server).await, Command::new(i as u16, vec![i as i32, -(i as i32)]));
    }

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn heartbeats_keep_the_link_alive_but_are_never_delivered() {
    init_logging();
    let heartbeat_cfg = LinkConfig {
        use_heartbeat: true,
        ..LinkConfig::default()
    };
    let (server, client) = connected_pair(heartbeat_cfg.clone(), heartbeat_cfg).await;

    client.send(0x42, vec![7]);
    assert_eq!(expect_command(&server).await, Command::new(0x42, vec![7]));

    // Several heartbeat periods with no application traffic. Both
    // sides must stay connected and deliver nothing.
    sleep(Duration::from_millis(2500)).await;
    assert!(client.is_open(), "client link dropped despite heartbeats");
    assert!(server.is_open(), "server link dropped despite heartbeats");
    assert!(server.recv_many(100).is_empty());
    assert!(client.recv_many(100).is_empty());

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn silent_peer_triggers_idle_timeout_and_reconnect() {
    init_logging();
    // A bare listener that accepts and then stays silent, so the
    // client's idle deadline is never refreshed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = open_client(
        "127.0.0.1",
        port,
        LinkConfig {
            use_heartbeat: true,
            ..LinkConfig::default()
        },
    )
    .unwrap();

    let (_first, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never connected")
        .unwrap();

    // No heartbeats arrive, so the client drops the link within the
    // idle deadline and comes back for another attempt.
    timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never reconnected after the silent link")
        .unwrap();

    client.close().await;
}

#[tokio::test]
async fn close_wakes_a_blocked_reader_promptly() {
    init_logging();
    let server = open_server("127.0.0.1", 0, LinkConfig::default())
        .await
        .unwrap();

    let reader = {
        let server = server.clone();
        tokio::spawn(async move { server.recv_one().await })
    };
    sleep(Duration::from_millis(50)).await; // let the reader block

    server.close().await;
    let received = timeout(Duration::from_millis(100), reader)
        .await
        .expect("blocked reader was not woken by close")
        .unwrap();
    assert_eq!(received, Received::Closed);
    assert!(!server.is_open());
    assert_eq!(server.state(), LinkState::Stopped);
}

#[tokio::test]
async fn stop_reading_returns_closed_without_dropping_the_link() {
    init_logging();
    let (server, client) = connected_pair(LinkConfig::default(), LinkConfig::default()).await;

    client.stop_reading();
    assert_eq!(client.recv_one().await, Received::Closed);
    assert!(client.is_open(), "stop_reading must not tear the link down");

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn server_delivers_frames_from_sequential_peers_in_order() {
    init_logging();
    let server = open_server("127.0.0.1", 0, LinkConfig::default())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let first = open_client("127.0.0.1", port, LinkConfig::default()).unwrap();
    assert!(wait_until(|| first.is_open(), Duration::from_secs(5)).await);
    first.send(0x01, vec![11]);
    assert_eq!(expect_command(&server).await, Command::new(0x01, vec![11]));
    first.close().await;

    let second = open_client("127.0.0.1", port, LinkConfig::default()).unwrap();
    assert!(wait_until(|| second.is_open(), Duration::from_secs(5)).await);
    second.send(0x02, vec![22]);
    assert_eq!(expect_command(&server).await, Command::new(0x02, vec![22]));
    second.close().await;

    server.close().await;
}

#[tokio::test]
async fn client_drops_commands_while_disconnected() {
    init_logging();
    // Find a port with nothing listening on it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = open_client("127.0.0.1", port, LinkConfig::default()).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(!client.is_open());

    // Dropped with a log notice; nothing is queued for a future link.
    client.send(0x5, vec![1]);
    client.close().await;
}

#[tokio::test]
async fn client_acknowledges_frames_when_configured() {
    init_logging();
    let (server, client) = connected_pair(
        LinkConfig::default(),
        LinkConfig {
            ack: AckPolicy::FrameBytes,
            ..LinkConfig::default()
        },
    )
    .await;

    server.send(0x30, vec![5, 6]);
    assert_eq!(expect_command(&client).await, Command::new(0x30, vec![5, 6]));
    // The ack carries the received frame's byte count: 14 + 4 * 2.
    assert_eq!(expect_command(&server).await, Command::new(0x30, vec![22]));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn monitor_link_observes_liveness_without_decoding() {
    init_logging();
    let (server, client) = connected_pair(
        LinkConfig::default(),
        LinkConfig {
            monitor_link: true,
            ..LinkConfig::default()
        },
    )
    .await;

    // Traffic on a monitor link proves liveness but is never decoded
    // into commands.
    server.send(0x9, vec![1, 2, 3]);
    sleep(Duration::from_millis(200)).await;
    assert!(client.recv_many(10).is_empty());
    assert!(client.is_open());

    // Once the server goes away the zero-length read drops the link.
    server.close().await;
    assert!(
        wait_until(|| !client.is_open(), Duration::from_secs(2)).await,
        "monitor client never noticed the peer going away"
    );
    client.close().await;
}

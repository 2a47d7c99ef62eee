//! Client and server drivers talking over an in-process tokio stream.

#![cfg(feature = "async-tokio")]

use std::time::Duration;

use sansws::driver::{self, Event, ForwardingHandler};
use sansws::{
    ClientFactory, ClientOptions, Handler, MemoryTransport, Message, ServerFactory, ServerOptions,
    WebSocketChannel,
};
use tokio::time::timeout;

struct Echo;

impl Handler for Echo {
    fn on_message(&mut self, channel: &mut dyn WebSocketChannel, message: Message) {
        let is_binary = matches!(message, Message::Binary(_));
        let _ = channel.send_message(message.as_bytes(), is_binary);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_echo_over_duplex() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(4096);

    let server = ServerFactory::new(ServerOptions::default())
        .unwrap()
        .build(MemoryTransport::new("tcp:127.0.0.1:40000"), Echo);
    let (_server_handle, server_commands) = driver::channel(8);
    let server_task = tokio::spawn(driver::run(server_io, server, server_commands));

    let options = ClientOptions::default().with_url("ws://localhost:9000/").unwrap();
    let (handler, mut events) = ForwardingHandler::new();
    let client = ClientFactory::new(options)
        .unwrap()
        .build(MemoryTransport::new("tcp:127.0.0.1:9000"), handler);
    let (handle, client_commands) = driver::channel(8);
    let client_task = tokio::spawn(driver::run(client_io, client, client_commands));

    assert_eq!(events.recv().await, Some(Event::Open { protocol: None }));

    handle.send_text("hello").await.unwrap();
    handle.send_binary(vec![0u8; 10_000]).await.unwrap();
    handle.ping(b"p".to_vec()).await.unwrap();

    assert_eq!(events.recv().await, Some(Event::Message(Message::text("hello"))));
    assert_eq!(
        events.recv().await,
        Some(Event::Message(Message::Binary(vec![0u8; 10_000])))
    );
    assert_eq!(events.recv().await, Some(Event::Message(Message::Pong(b"p".to_vec()))));

    handle.close(Some(1000), Some("bye")).await.unwrap();
    assert_eq!(
        events.recv().await,
        Some(Event::Closed {
            was_clean: true,
            code: Some(1000),
            reason: None
        })
    );

    timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), client_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(handle.send_text("late").await.is_err());
}

#[tokio::test]
async fn test_peer_disconnect_reported() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(4096);

    let options = ClientOptions::default().with_url("ws://localhost:9000/").unwrap();
    let (handler, mut events) = ForwardingHandler::new();
    let client = ClientFactory::new(options)
        .unwrap()
        .build(MemoryTransport::new("tcp:127.0.0.1:9000"), handler);
    let (_handle, commands) = driver::channel(1);
    let client_task = tokio::spawn(driver::run(client_io, client, commands));

    drop(server_io);

    let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    let Some(Event::Closed {
        was_clean, code, ..
    }) = event
    else {
        panic!("expected close, got {event:?}");
    };
    assert!(!was_clean);
    assert_eq!(code, Some(1006));
    let _ = timeout(Duration::from_secs(5), client_task).await.unwrap();
}

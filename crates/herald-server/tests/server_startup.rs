use std::time::Duration;

use herald_server::{
    AppConfig, BackendsConfig, CacheBackend, QueueBackend, ServerBuilder, ServerError,
    StoreBackend,
};

fn memory_config(port: u16) -> AppConfig {
    let mut cfg = AppConfig {
        backends: BackendsConfig {
            store: StoreBackend::Memory,
            queue: QueueBackend::Memory,
        },
        ..Default::default()
    };
    cfg.server.host = "127.0.0.1".into();
    cfg.server.port = port;
    cfg.cache.backend = CacheBackend::Local;
    cfg
}

#[tokio::test]
async fn occupied_address_fails_run_without_hanging() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let server = ServerBuilder::new()
        .with_config(memory_config(port))
        .build()
        .await
        .unwrap();
    assert_eq!(server.addr().port(), port);

    let result = tokio::time::timeout(Duration::from_secs(5), server.run())
        .await
        .expect("run returns instead of waiting on workers");

    match result {
        Err(ServerError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::AddrInUse),
        other => panic!("expected a bind error, got {other:?}"),
    }
}

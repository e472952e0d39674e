//! Proxy and connection lifetime behavior: cleanup registry, teardown,
//! ownership release, close hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use skiff_proxy::{CallError, Connection, ImplOwnership, ServerProxy};
use skiff_testkit::counter::{Counter, CounterClient, CounterServer, TallyCounter, counter_methods};
use skiff_testkit::{FailingTransport, LoopbackTransport, PendingTransport, Router};

fn loopback() -> (Arc<Router>, Connection) {
    let router = Arc::new(Router::new());
    let connection = Connection::new(Arc::new(LoopbackTransport::new(router.clone())));
    (router, connection)
}

/// Counter that counts its own drops instead of anything useful.
struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Counter for DropCounter {
    async fn increment(&self, _delta: i32) -> i32 {
        0
    }
}

// ============================================================================
// Client proxies vs. connection teardown
// ============================================================================

#[tokio::test]
async fn teardown_runs_every_proxy_cleanup_exactly_once() {
    let (router, connection) = loopback();
    let capability = router.export(Arc::new(CounterServer::owned(
        TallyCounter::new(),
        connection.clone(),
    )));

    let clients: Vec<_> = (0..3)
        .map(|_| CounterClient::new(capability, connection.clone(), false))
        .collect();
    assert_eq!(connection.cleanup_count(), 3);

    connection.close();
    assert_eq!(connection.cleanup_count(), 0);

    // Every proxy was invalidated, none left dangling.
    for client in &clients {
        assert!(client.proxy().is_invalidated());
        let result = client.increment(1).await;
        assert!(matches!(result, Err(CallError::ConnectionClosed)));
    }

    // Dropping invalidated proxies must not disturb the closed connection.
    drop(clients);
    assert_eq!(connection.cleanup_count(), 0);
}

#[tokio::test]
async fn in_flight_calls_resolve_when_the_connection_dies() {
    let connection = Connection::new(Arc::new(PendingTransport));
    let client = CounterClient::new(skiff_wire::CapabilityId::new(1), connection.clone(), false);

    let call = {
        let client = CounterClient::new(skiff_wire::CapabilityId::new(1), connection.clone(), false);
        tokio::spawn(async move { client.increment(1).await })
    };
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    connection.close();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(CallError::ConnectionClosed)));

    // And new calls fail straight away.
    let result = client.increment(1).await;
    assert!(matches!(result, Err(CallError::ConnectionClosed)));
}

#[tokio::test]
async fn transport_failures_are_not_remote_errors() {
    let connection = Connection::new(Arc::new(FailingTransport));
    let client = CounterClient::new(skiff_wire::CapabilityId::new(1), connection, false);

    let result = client.increment(1).await;
    match result {
        Err(e) => assert!(e.is_connection_error(), "unexpected: {e}"),
        Ok(_) => panic!("transport failure produced a value"),
    }
}

#[tokio::test]
async fn dropping_the_owning_proxy_closes_the_connection() {
    let (router, connection) = loopback();
    let capability = router.export(Arc::new(CounterServer::owned(
        TallyCounter::new(),
        connection.clone(),
    )));

    let client = CounterClient::new(capability, connection.clone(), true);
    assert!(!connection.is_closed());
    drop(client);
    assert!(connection.is_closed());
}

// ============================================================================
// Server-side ownership
// ============================================================================

#[tokio::test]
async fn owned_implementation_is_released_exactly_once() {
    let (router, connection) = loopback();
    let drops = Arc::new(AtomicUsize::new(0));
    let server = Arc::new(CounterServer::owned(
        DropCounter {
            drops: drops.clone(),
        },
        connection.clone(),
    ));
    assert_eq!(server.proxy().ownership(), ImplOwnership::Owned);
    let capability = router.export(server.clone());

    // Destroy through the client, then tear everything down; the native
    // object must go exactly once.
    let client = CounterClient::new(capability, connection, false);
    client.destroy().await.unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    router.revoke(capability);
    drop(server);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn borrowed_implementation_is_released_by_its_owner_not_the_proxy() {
    let (router, connection) = loopback();
    let drops = Arc::new(AtomicUsize::new(0));
    let native = Arc::new(DropCounter {
        drops: drops.clone(),
    });

    let server = Arc::new(CounterServer::borrowed(native.clone(), connection.clone()));
    assert_eq!(server.proxy().ownership(), ImplOwnership::Borrowed);
    let capability = router.export(server);

    // The native side registers a close hook that revokes the capability
    // when the referenced object's life ends.
    let hook = {
        let router = router.clone();
        connection.add_close_hook(move || {
            router.revoke(capability);
        })
    };

    let client = CounterClient::new(capability, connection.clone(), false);
    client.increment(1).await.unwrap();

    // Native lifetime boundary reached: trigger the hook early.
    assert!(connection.trigger_close_hook(hook));
    let result = client.increment(1).await;
    assert!(matches!(
        result,
        Err(CallError::Remote(skiff_proxy::RemoteError::TargetDestroyed))
    ));

    // The proxy never owned the native object.
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(native);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invoke_destroy_twice_matches_invoke_destroy_once() {
    let (_router, connection) = loopback();
    let drops = Arc::new(AtomicUsize::new(0));
    let proxy = ServerProxy::owned(
        DropCounter {
            drops: drops.clone(),
        },
        connection,
        counter_methods(),
    );

    proxy.invoke_destroy();
    let after_once = drops.load(Ordering::SeqCst);
    proxy.invoke_destroy();
    assert_eq!(drops.load(Ordering::SeqCst), after_once);
    assert_eq!(after_once, 1);
    assert!(proxy.implementation().is_none());
}

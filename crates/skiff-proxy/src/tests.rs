use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use skiff_wire::{CapabilityId, MethodId, Payload, Request, RequestId, Response};

use super::*;
use crate::errors::remote_error_code;
use crate::method::error_payload;

// ============================================================================
// Test transports
// ============================================================================

/// Answers every request with an encoded unit result.
struct UnitTransport;

impl Transport for UnitTransport {
    fn roundtrip(&self, request: Request) -> BoxTransportFuture<'_> {
        Box::pin(std::future::ready(Ok(Response {
            request_id: request.request_id,
            payload: encode_ok(&()).unwrap(),
        })))
    }
}

/// Never answers; in-flight calls stay pending until the connection dies.
struct StalledTransport;

impl Transport for StalledTransport {
    fn roundtrip(&self, _request: Request) -> BoxTransportFuture<'_> {
        Box::pin(std::future::pending::<io::Result<Response>>())
    }
}

/// Fails every request at the transport level.
struct BrokenTransport;

impl Transport for BrokenTransport {
    fn roundtrip(&self, _request: Request) -> BoxTransportFuture<'_> {
        Box::pin(std::future::ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "wire cut",
        ))))
    }
}

/// Records each request's target and method, then answers unit.
#[derive(Default)]
struct CountingTransport {
    seen: Mutex<Vec<(CapabilityId, MethodId)>>,
}

impl Transport for CountingTransport {
    fn roundtrip(&self, request: Request) -> BoxTransportFuture<'_> {
        self.seen.lock().push((request.target, request.method));
        Box::pin(std::future::ready(Ok(Response {
            request_id: request.request_id,
            payload: encode_ok(&()).unwrap(),
        })))
    }
}

fn unit_connection() -> Connection {
    Connection::new(Arc::new(UnitTransport))
}

// ============================================================================
// Request IDs
// ============================================================================

#[test]
fn request_id_generator_is_monotonic_from_one() {
    let ids = RequestIdGenerator::new();
    assert_eq!(ids.next(), 1);
    assert_eq!(ids.next(), 2);
    assert_eq!(ids.next(), 3);
}

// ============================================================================
// Cleanup registry
// ============================================================================

#[test]
fn cleanups_run_in_reverse_registration_order() {
    let connection = unit_connection();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3u32 {
        let order = order.clone();
        connection.register_cleanup(move || order.lock().push(i));
    }
    connection.close();
    assert_eq!(*order.lock(), vec![2, 1, 0]);
}

#[test]
fn unregistered_cleanup_does_not_run() {
    let connection = unit_connection();
    let ran = Arc::new(AtomicUsize::new(0));

    let first = {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };
    {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(10, Ordering::SeqCst);
        });
    }

    assert!(connection.unregister_cleanup(first));
    connection.close();
    assert_eq!(ran.load(Ordering::SeqCst), 10);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "unregistered twice")]
fn double_unregister_is_a_programming_error() {
    let connection = unit_connection();
    let handle = connection.register_cleanup(|| {});
    assert!(connection.unregister_cleanup(handle));
    connection.unregister_cleanup(handle);
}

#[test]
fn register_after_close_runs_immediately() {
    let connection = unit_connection();
    connection.close();

    let ran = Arc::new(AtomicUsize::new(0));
    let handle = {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(handle.is_vacant());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!connection.unregister_cleanup(handle));
}

#[test]
fn close_runs_cleanups_exactly_once() {
    let connection = unit_connection();
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
    connection.close();
    connection.close();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_cleanup_does_not_block_the_rest() {
    let connection = unit_connection();
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
    connection.register_cleanup(|| panic!("cleanup gone wrong"));
    {
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(10, Ordering::SeqCst);
        });
    }
    connection.close();
    assert_eq!(ran.load(Ordering::SeqCst), 11);
}

#[test]
fn triggered_close_hook_runs_once_and_not_at_teardown() {
    let connection = unit_connection();
    let ran = Arc::new(AtomicUsize::new(0));
    let hook = {
        let ran = ran.clone();
        connection.add_close_hook(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(connection.trigger_close_hook(hook));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!connection.trigger_close_hook(hook));

    connection.close();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_last_handle_runs_remaining_cleanups() {
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let connection = unit_connection();
        let ran = ran.clone();
        connection.register_cleanup(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Calls and teardown
// ============================================================================

#[tokio::test]
async fn call_after_close_fails_immediately() {
    let connection = unit_connection();
    connection.close();
    let result = connection
        .call(CapabilityId::new(1), MethodId::new(1), Payload::new())
        .await;
    assert!(matches!(result, Err(TransportError::ConnectionClosed)));
}

#[tokio::test]
async fn close_fails_in_flight_calls() {
    let connection = Connection::new(Arc::new(StalledTransport));
    let task = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .call(CapabilityId::new(1), MethodId::new(1), Payload::new())
                .await
        })
    };

    // Let the call reach the transport before tearing down.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    connection.close();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionClosed)));
}

#[tokio::test]
async fn transport_failure_surfaces_as_io_error() {
    let connection = Connection::new(Arc::new(BrokenTransport));
    let result = connection
        .call(CapabilityId::new(1), MethodId::new(1), Payload::new())
        .await;
    assert!(matches!(result, Err(TransportError::Io(_))));
}

// ============================================================================
// Client proxy lifecycle
// ============================================================================

static DESTROY_FIELDS: [Accessor; 0] = [];
static DESTROY_DESCRIPTOR: MethodDescriptor =
    MethodDescriptor::new(0xdead, "test.destroy", &DESTROY_FIELDS);

#[test]
fn dropping_a_proxy_unregisters_its_cleanup() {
    let connection = unit_connection();
    let first = ClientProxy::new(CapabilityId::new(1), connection.clone(), false);
    let second = ClientProxy::new(CapabilityId::new(2), connection.clone(), false);
    assert_eq!(connection.cleanup_count(), 2);

    drop(first);
    assert_eq!(connection.cleanup_count(), 1);

    drop(second);
    assert_eq!(connection.cleanup_count(), 0);
}

#[tokio::test]
async fn connection_teardown_invalidates_live_proxies() {
    let connection = unit_connection();
    let proxy = ClientProxy::new(CapabilityId::new(1), connection.clone(), false);
    assert!(!proxy.is_invalidated());

    connection.close();
    assert!(proxy.is_invalidated());

    let result: Result<(), CallError> = proxy.call(&DESTROY_DESCRIPTOR, &()).await;
    assert!(matches!(result, Err(CallError::ConnectionClosed)));

    // Dropping afterwards must not double-unregister anything.
    drop(proxy);
}

#[test]
fn destroy_connection_proxy_closes_the_connection() {
    let connection = unit_connection();
    let proxy = ClientProxy::new(CapabilityId::new(1), connection.clone(), true);
    assert!(!connection.is_closed());
    drop(proxy);
    assert!(connection.is_closed());
}

#[tokio::test]
async fn explicit_destroy_sends_the_hook_once() {
    let transport = Arc::new(CountingTransport::default());
    let connection = Connection::new(transport.clone());
    let proxy = ClientProxy::new(CapabilityId::new(7), connection.clone(), false)
        .with_destroy(&DESTROY_DESCRIPTOR);

    proxy.destroy().await.unwrap();
    proxy.destroy().await.unwrap();
    assert_eq!(
        *transport.seen.lock(),
        vec![(CapabilityId::new(7), DESTROY_DESCRIPTOR.id)]
    );

    // Drop must not send it again either.
    drop(proxy);
    tokio::task::yield_now().await;
    assert_eq!(transport.seen.lock().len(), 1);
}

#[tokio::test]
async fn dropping_an_undestroyed_proxy_fires_the_hook() {
    let transport = Arc::new(CountingTransport::default());
    let connection = Connection::new(transport.clone());
    let proxy = ClientProxy::new(CapabilityId::new(9), connection.clone(), false)
        .with_destroy(&DESTROY_DESCRIPTOR);

    drop(proxy);
    // The hook goes out on a spawned task; give it a chance to run.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(
        *transport.seen.lock(),
        vec![(CapabilityId::new(9), DESTROY_DESCRIPTOR.id)]
    );
}

// ============================================================================
// Result framing
// ============================================================================

#[test]
fn ok_value_roundtrips() {
    let payload = encode_ok(&42i32).unwrap();
    let value: i32 = decode_response::<i32, String>(&payload).unwrap();
    assert_eq!(value, 42);
}

#[test]
fn user_error_roundtrips() {
    let payload = encode_user_error(&"boom".to_string()).unwrap();
    let result = decode_response::<i32, String>(&payload);
    match result {
        Err(CallError::Remote(RemoteError::User(message))) => assert_eq!(message, "boom"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn bare_error_discriminants_decode() {
    let cases = [
        (remote_error_code::UNKNOWN_METHOD, RemoteError::UnknownMethod),
        (remote_error_code::INVALID_PAYLOAD, RemoteError::InvalidPayload),
        (
            remote_error_code::TARGET_DESTROYED,
            RemoteError::TargetDestroyed,
        ),
        (remote_error_code::INTERNAL, RemoteError::Internal),
    ];
    for (code, expected) in cases {
        let result = decode_response::<i32, String>(&error_payload(code));
        match result {
            Err(CallError::Remote(remote)) => assert_eq!(remote, expected),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

#[test]
fn malformed_frames_are_rejected() {
    assert!(matches!(
        decode_response::<i32, String>(&[]),
        Err(CallError::Protocol(DecodeError::EmptyPayload))
    ));
    assert!(matches!(
        decode_response::<i32, String>(&[1]),
        Err(CallError::Protocol(DecodeError::TruncatedError))
    ));
    assert!(matches!(
        decode_response::<i32, String>(&[1, 99]),
        Err(CallError::Protocol(DecodeError::UnknownErrorDiscriminant(99)))
    ));
    assert!(matches!(
        decode_response::<i32, String>(&[7]),
        Err(CallError::Protocol(DecodeError::InvalidResultDiscriminant(7)))
    ));
}

// ============================================================================
// Method dispatch
// ============================================================================

static ADD_FIELDS: [Accessor; 3] = [
    Accessor::new(Field::new("a", 0), FieldFlags::IN),
    Accessor::new(Field::new("b", 1), FieldFlags::IN),
    Accessor::new(Field::new("sum", 2), FieldFlags::OUT),
];
static ADD_DESCRIPTOR: MethodDescriptor = MethodDescriptor::new(10, "adder.add", &ADD_FIELDS);

static FAIL_FIELDS: [Accessor; 1] = [Accessor::new(Field::new("message", 0), FieldFlags::IN)];
static FAIL_DESCRIPTOR: MethodDescriptor = MethodDescriptor::new(11, "adder.fail", &FAIL_FIELDS);

struct Adder;

impl Adder {
    async fn add(&self, a: i32, b: i32) -> i32 {
        a + b
    }

    async fn fail(&self, message: String) -> Result<(), String> {
        Err(message)
    }
}

fn invoke_add(implementation: Arc<Adder>, cx: ServerContext, payload: Payload) -> BoxInvokeFuture {
    invoke_call_infallible(cx, payload, move |(a, b): (i32, i32)| async move {
        implementation.add(a, b).await
    })
}

fn invoke_fail(implementation: Arc<Adder>, cx: ServerContext, payload: Payload) -> BoxInvokeFuture {
    invoke_call(cx, payload, move |(message,): (String,)| async move {
        implementation.fail(message).await
    })
}

fn adder_methods() -> Vec<MethodEntry<Adder>> {
    vec![
        MethodEntry::new(&ADD_DESCRIPTOR, invoke_add),
        MethodEntry::new(&FAIL_DESCRIPTOR, invoke_fail),
    ]
}

fn call_context(method: &MethodDescriptor) -> CallContext {
    CallContext::new(CapabilityId::new(1), RequestId::new(1), method.id)
}

#[tokio::test]
async fn dispatch_invokes_the_native_method() {
    let server = ServerProxy::owned(Adder, unit_connection(), adder_methods());
    let payload = facet_postcard::to_vec(&(2i32, 3i32)).unwrap();
    let response = server.dispatch(call_context(&ADD_DESCRIPTOR), payload).await;
    let sum: i32 = decode_response::<i32, Infallible>(&response).unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn dispatch_passes_user_errors_through() {
    let server = ServerProxy::owned(Adder, unit_connection(), adder_methods());
    let payload = facet_postcard::to_vec(&("no good".to_string(),)).unwrap();
    let response = server
        .dispatch(call_context(&FAIL_DESCRIPTOR), payload)
        .await;
    let result = decode_response::<(), String>(&response);
    match result {
        Err(CallError::Remote(RemoteError::User(message))) => assert_eq!(message, "no good"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn dispatch_rejects_undeserializable_payloads() {
    let server = ServerProxy::owned(Adder, unit_connection(), adder_methods());
    let response = server
        .dispatch(call_context(&ADD_DESCRIPTOR), vec![0xff])
        .await;
    let result = decode_response::<i32, Infallible>(&response);
    assert!(matches!(
        result,
        Err(CallError::Remote(RemoteError::InvalidPayload))
    ));
}

#[tokio::test]
async fn dispatch_answers_unknown_method() {
    let server = ServerProxy::owned(Adder, unit_connection(), Vec::new());
    let response = server
        .dispatch(call_context(&ADD_DESCRIPTOR), Payload::new())
        .await;
    let result = decode_response::<i32, Infallible>(&response);
    assert!(matches!(
        result,
        Err(CallError::Remote(RemoteError::UnknownMethod))
    ));
}

#[tokio::test]
async fn lifecycle_entry_answers_unit_without_an_implementation_method() {
    let entry = MethodEntry::<Adder>::lifecycle(&DESTROY_DESCRIPTOR);
    let cx = ServerContext::new(call_context(&DESTROY_DESCRIPTOR), unit_connection());
    let response = (entry.invoke)(Arc::new(Adder), cx, vec![1, 2, 3]).await;
    decode_response::<(), Infallible>(&response).unwrap();
}

#[test]
fn descriptor_field_directions() {
    let ins: Vec<_> = ADD_DESCRIPTOR.in_fields().map(|a| a.field.name).collect();
    let outs: Vec<_> = ADD_DESCRIPTOR.out_fields().map(|a| a.field.name).collect();
    assert_eq!(ins, vec!["a", "b"]);
    assert_eq!(outs, vec!["sum"]);
}

// ============================================================================
// Server proxy lifecycle
// ============================================================================

struct Probe {
    drops: Arc<AtomicUsize>,
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn owned_implementation_is_released_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let server = ServerProxy::owned(
        Probe {
            drops: drops.clone(),
        },
        unit_connection(),
        Vec::new(),
    );
    assert_eq!(server.ownership(), ImplOwnership::Owned);

    server.invoke_destroy();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Again, and at drop: still exactly one release.
    server.invoke_destroy();
    drop(server);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn borrowed_implementation_outlives_the_proxy() {
    let drops = Arc::new(AtomicUsize::new(0));
    let shared = Arc::new(Probe {
        drops: drops.clone(),
    });
    let server = ServerProxy::borrowed(shared.clone(), unit_connection(), Vec::new());
    assert_eq!(server.ownership(), ImplOwnership::Borrowed);

    drop(server);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(shared);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_after_invoke_destroy_answers_target_destroyed() {
    let server = ServerProxy::owned(Adder, unit_connection(), adder_methods());
    server.invoke_destroy();

    let payload = facet_postcard::to_vec(&(2i32, 3i32)).unwrap();
    let response = server.dispatch(call_context(&ADD_DESCRIPTOR), payload).await;
    let result = decode_response::<i32, Infallible>(&response);
    assert!(matches!(
        result,
        Err(CallError::Remote(RemoteError::TargetDestroyed))
    ));
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn local_callback_invokes_the_function_value() {
    let callback = LocalCallback::new(|(x,): (i32,)| x * 2);
    let doubled = callback.call((21,)).await.unwrap();
    assert_eq!(doubled, 42);
}

#[tokio::test]
async fn callback_server_round_trips_through_the_framing() {
    let callback: Arc<dyn Callback<(i32,), i32>> =
        Arc::new(LocalCallback::new(|(x,): (i32,)| x + 1));
    let server = CallbackServer::new(callback);

    let cx = CallContext::new(
        CapabilityId::new(3),
        RequestId::new(1),
        CALLBACK_DESCRIPTOR.id,
    );
    let payload = facet_postcard::to_vec(&(41i32,)).unwrap();
    let response = server.dispatch(cx, payload).await;
    let value: i32 = decode_response::<i32, Infallible>(&response).unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn callback_server_rejects_other_methods() {
    let callback: Arc<dyn Callback<(i32,), i32>> = Arc::new(LocalCallback::new(|(x,): (i32,)| x));
    let server = CallbackServer::new(callback);

    let cx = CallContext::new(CapabilityId::new(3), RequestId::new(1), MethodId::new(999));
    let response = server.dispatch(cx, Payload::new()).await;
    let result = decode_response::<i32, Infallible>(&response);
    assert!(matches!(
        result,
        Err(CallError::Remote(RemoteError::UnknownMethod))
    ));
}

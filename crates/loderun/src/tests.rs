//! Tests for the runtime against an in-process store and loopback transports.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use lodepack::Value;
use lodepack::ValueType;
use loderpc::FailureReason;
use loderpc::MessageProtocol;
use loderpc::Protocols;
use loderpc::RemoteError;
use loderpc::RequestDatagram;
use loderpc::StatusCode;

use crate::config::RpcConfig;
use crate::directory::DirectoryLayout;
use crate::directory::ServiceLocation;
use crate::discovery::ServiceDiscoverer;
use crate::dispatch::Dispatcher;
use crate::frame;
use crate::proxy::CallError;
use crate::proxy::ClientFactory;
use crate::proxy::RemoteStub;
use crate::registrar::LocalServices;
use crate::registrar::ServiceBinding;
use crate::registrar::ServiceRegistrar;
use crate::registry;
use crate::registry::ChildEvent;
use crate::registry::ChildWatch;
use crate::registry::CoordinationStore;
use crate::registry::CreateMode;
use crate::registry::memory::MemorySession;
use crate::registry::memory::MemoryStore;
use crate::transport;
use crate::transport::Transport;

crate::service! {
    /// Test service covering values, collections, failures and panics.
    pub trait Echo: "demo.Echo" {
        fn echo(text: String) -> String;
        fn sum(values: Vec<i64>) -> i64;
        fn fail(message: String) -> ();
        fn explode() -> ();
    }
    pub client EchoClient;
    pub server EchoServer;
}

struct Parrot;

#[crate::async_trait]
impl Echo for Parrot {
    async fn echo(&self, text: String) -> Result<String, CallError> {
        Ok(text)
    }

    async fn sum(&self, values: Vec<i64>) -> Result<i64, CallError> {
        Ok(values.iter().sum())
    }

    async fn fail(&self, message: String) -> Result<(), CallError> {
        Err(CallError::raised("IllegalArgument", message))
    }

    async fn explode(&self) -> Result<(), CallError> {
        panic!("parrot exploded")
    }
}

fn echo_binding() -> ServiceBinding {
    ServiceBinding::new(EchoServer::new(Parrot))
}

fn config() -> RpcConfig {
    RpcConfig::default().with_advertise_host("127.0.0.1")
}

/// Routes each call to the dispatcher registered for the target address.
#[derive(Default)]
struct LoopbackTransport {
    routes: DashMap<String, Arc<Dispatcher>>,
    calls: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl LoopbackTransport {
    fn route(&self, address: &str, dispatcher: Arc<Dispatcher>) {
        self.routes.insert(address.to_string(), dispatcher);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, payload: &[u8], location: &ServiceLocation) -> transport::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(location.address().to_string());
        let dispatcher = self
            .routes
            .get(location.address())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| transport::Error::Connect {
                address: location.address().to_string(),
                reason: "connection refused".into(),
            })?;
        Ok(dispatcher.handle(payload).await)
    }
}

/// A provider process: its own store session, bindings and dispatcher.
async fn provider(store: &MemoryStore, address: &str) -> (ServiceRegistrar, Arc<Dispatcher>) {
    let registrar = ServiceRegistrar::new(&config(), Arc::new(store.connect()), address);
    registrar.register(echo_binding()).await.unwrap();
    let dispatcher = Arc::new(Dispatcher::new(MessageProtocol::binary(), registrar.services()));
    (registrar, dispatcher)
}

fn consumer(store: &MemoryStore, transport: Arc<LoopbackTransport>) -> ClientFactory {
    let discoverer = Arc::new(ServiceDiscoverer::new(Arc::new(store.connect()), config().layout()));
    ClientFactory::new(discoverer, Protocols::supported(), transport)
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// --- Memory store ---

#[tokio::test]
async fn test_memory_create_requires_parent() {
    let session = MemoryStore::new().connect();
    let err = session.create("/a/b", CreateMode::Persistent).await.unwrap_err();
    assert_eq!(err, registry::Error::NoNode("/a".into()));

    session.ensure_path("/a").await.unwrap();
    session.create("/a/b", CreateMode::Persistent).await.unwrap();
    assert_eq!(
        session.create("/a/b", CreateMode::Persistent).await.unwrap_err(),
        registry::Error::NodeExists("/a/b".into())
    );
}

#[tokio::test]
async fn test_memory_ensure_path_is_idempotent() {
    let session = MemoryStore::new().connect();
    session.ensure_path("/rpc/service/demo.Echo").await.unwrap();
    session.ensure_path("/rpc/service/demo.Echo").await.unwrap();
    assert_eq!(session.children("/rpc/service").await.unwrap(), vec!["demo.Echo"]);
    assert_eq!(session.children("/").await.unwrap(), vec!["rpc"]);
}

#[tokio::test]
async fn test_memory_rejects_bad_paths() {
    let session = MemoryStore::new().connect();
    for path in ["", "rpc", "/rpc/", "/rpc//service"] {
        assert_eq!(
            session.exists(path).await.unwrap_err(),
            registry::Error::InvalidPath(path.into()),
            "path {:?}",
            path
        );
    }
}

#[tokio::test]
async fn test_memory_delete_semantics() {
    let session = MemoryStore::new().connect();
    session.ensure_path("/a/b").await.unwrap();
    assert_eq!(session.delete("/a").await.unwrap_err(), registry::Error::NotEmpty("/a".into()));
    assert_eq!(session.delete("/a/c").await.unwrap_err(), registry::Error::NoNode("/a/c".into()));
    session.delete("/a/b").await.unwrap();
    session.delete("/a").await.unwrap();
    assert!(!session.exists("/a").await.unwrap());
}

#[tokio::test]
async fn test_memory_ephemeral_nodes_end_with_session() {
    let store = MemoryStore::new();
    let owner = store.connect();
    let observer = store.connect();

    owner.ensure_path("/svc").await.unwrap();
    owner.create("/svc/node", CreateMode::Ephemeral).await.unwrap();
    assert_eq!(
        owner.create("/svc/node/child", CreateMode::Persistent).await.unwrap_err(),
        registry::Error::EphemeralParent("/svc/node".into())
    );
    assert_eq!(observer.children("/svc").await.unwrap(), vec!["node"]);

    owner.close().await;
    assert!(observer.children("/svc").await.unwrap().is_empty());
    assert!(observer.exists("/svc").await.unwrap());
    assert_eq!(owner.exists("/svc").await.unwrap_err(), registry::Error::SessionClosed);

    let crashed = store.connect();
    crashed.create("/svc/other", CreateMode::Ephemeral).await.unwrap();
    drop(crashed);
    assert!(observer.children("/svc").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_watch_reports_children() {
    let store = MemoryStore::new();
    let writer = store.connect();
    let watcher = store.connect();

    // Watch before the path exists.
    let mut watch = watcher.watch_children("/svc").await.unwrap();
    writer.ensure_path("/svc").await.unwrap();
    writer.create("/svc/x", CreateMode::Ephemeral).await.unwrap();
    writer.delete("/svc/x").await.unwrap();

    assert_eq!(watch.recv().await, Some(ChildEvent::Added("x".into())));
    assert_eq!(watch.recv().await, Some(ChildEvent::Removed("x".into())));

    watcher.close().await;
    assert_eq!(watch.recv().await, None);
}

// --- Directory & config ---

#[test]
fn test_location_node_name() {
    let location = ServiceLocation::new("demo.Echo", "10.0.0.7:19000", "binary");
    let node = location.to_node_name().unwrap();
    assert!(!node.contains('/'));
    assert!(!node.contains('{'));
    assert_eq!(ServiceLocation::from_node_name(&node).unwrap(), location);

    assert!(ServiceLocation::from_node_name("not-json").is_err());
    assert!(ServiceLocation::from_node_name("%FF%FE").is_err());
}

#[test]
fn test_directory_layout() {
    let layout = DirectoryLayout::new("rpc");
    assert_eq!(layout.root(), "/rpc/service");
    assert_eq!(layout.service_path("demo.Echo"), "/rpc/service/demo.Echo");

    let location = ServiceLocation::new("demo.Echo", "h:1", "json");
    let path = layout.provider_path(&location).unwrap();
    assert!(path.starts_with("/rpc/service/demo.Echo/"));
    assert_eq!(registry::leaf(&path), location.to_node_name().unwrap());
}

#[test]
fn test_config_defaults_and_overrides() {
    let defaults = RpcConfig::default();
    assert_eq!(defaults.server_port, 19000);
    assert_eq!(defaults.namespace, "rpc");
    assert_eq!(defaults.protocol, "binary");
    assert_eq!(defaults.backlog, 100);
    assert_eq!(defaults.call_timeout(), Duration::from_secs(30));

    let parsed = RpcConfig::from_json(r#"{ "server_port": 7000, "protocol": "json" }"#).unwrap();
    assert_eq!(parsed.server_port, 7000);
    assert_eq!(parsed.protocol, "json");
    assert_eq!(parsed.namespace, "rpc");

    assert_eq!(config().advertised_address(7000), "127.0.0.1:7000");
    assert!(!RpcConfig::default().advertised_address(1).is_empty());
}

#[test]
fn test_config_timeouts_saturate() {
    let config = RpcConfig::default()
        .with_call_timeout(Duration::MAX)
        .with_connect_timeout(Duration::from_millis(1500));
    assert_eq!(config.call_timeout_ms, u64::MAX);
    assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
}

// --- Framing ---

#[tokio::test]
async fn test_frames_over_a_stream() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    frame::write_frame(&mut client, b"first", 64).await.unwrap();
    frame::write_frame(&mut client, b"", 64).await.unwrap();
    drop(client);

    assert_eq!(frame::read_frame(&mut server, 64).await.unwrap(), Some(b"first".to_vec()));
    assert_eq!(frame::read_frame(&mut server, 64).await.unwrap(), Some(Vec::new()));
    assert_eq!(frame::read_frame(&mut server, 64).await.unwrap(), None);
}

#[tokio::test]
async fn test_frame_limits() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let err = frame::write_frame(&mut client, &[0u8; 65], 64).await.unwrap_err();
    assert_eq!(err, transport::Error::PayloadTooLarge(65));

    frame::write_frame(&mut client, &[0u8; 65], 128).await.unwrap();
    let err = frame::read_frame(&mut server, 64).await.unwrap_err();
    assert_eq!(err, transport::Error::PayloadTooLarge(65));
}

#[tokio::test]
async fn test_truncated_frame() {
    use tokio::io::AsyncWriteExt;

    let (mut client, mut server) = tokio::io::duplex(1024);
    client.write_all(&10u32.to_be_bytes()).await.unwrap();
    client.write_all(b"abc").await.unwrap();
    drop(client);

    let err = frame::read_frame(&mut server, 64).await.unwrap_err();
    assert!(matches!(err, transport::Error::ConnectionLost(_)));
}

#[tokio::test]
async fn test_truncated_frame_header() {
    use tokio::io::AsyncWriteExt;

    let (mut client, mut server) = tokio::io::duplex(1024);
    frame::write_frame(&mut client, b"whole", 64).await.unwrap();
    client.write_all(&[0, 0]).await.unwrap();
    drop(client);

    assert_eq!(frame::read_frame(&mut server, 64).await.unwrap(), Some(b"whole".to_vec()));
    let err = frame::read_frame(&mut server, 64).await.unwrap_err();
    assert!(matches!(err, transport::Error::ConnectionLost(_)));
}

// --- Dispatcher ---

fn dispatcher() -> Dispatcher {
    let services = Arc::new(LocalServices::new());
    services.bind(echo_binding());
    Dispatcher::new(MessageProtocol::binary(), services)
}

fn request(method: &str, types: Vec<ValueType>, args: Vec<Value>) -> RequestDatagram {
    RequestDatagram::new("demo.Echo", method, types, args)
}

#[tokio::test]
async fn test_dispatch_success() {
    let rsp = dispatcher()
        .dispatch(request("echo", vec![ValueType::String], vec![Value::from("ping")]))
        .await;
    assert_eq!(rsp.status(), StatusCode::Success);
    assert_eq!(rsp.return_value(), Some(&Value::from("ping")));
}

#[tokio::test]
async fn test_dispatch_unknown_service() {
    let rsp = dispatcher()
        .dispatch(RequestDatagram::new("demo.Nope", "echo", vec![], vec![]))
        .await;
    assert_eq!(rsp.status(), StatusCode::NotFound);
    assert_eq!(rsp.error_value().map(|e| &e.reason), Some(&FailureReason::ServiceNotFound));
}

#[tokio::test]
async fn test_dispatch_unknown_method_or_overload() {
    let dispatcher = dispatcher();
    for req in [
        request("shout", vec![ValueType::String], vec![Value::from("x")]),
        request("echo", vec![ValueType::I64], vec![Value::I64(1)]),
        request("echo", vec![], vec![]),
    ] {
        let rsp = dispatcher.dispatch(req).await;
        assert_eq!(rsp.status(), StatusCode::Error);
        assert_eq!(rsp.error_value().map(|e| &e.reason), Some(&FailureReason::MethodNotFound));
    }
}

#[tokio::test]
async fn test_dispatch_argument_mismatch() {
    let dispatcher = dispatcher();
    for req in [
        request("echo", vec![ValueType::String], vec![]),
        request("echo", vec![ValueType::String], vec![Value::I64(3)]),
        request("sum", vec![ValueType::list(ValueType::I64)], vec![Value::List(vec![Value::from("x")])]),
    ] {
        let rsp = dispatcher.dispatch(req).await;
        assert_eq!(rsp.status(), StatusCode::Error);
        assert_eq!(rsp.error_value().map(|e| &e.reason), Some(&FailureReason::ArgumentMismatch));
    }
}

#[tokio::test]
async fn test_dispatch_raised_and_panicked() {
    let dispatcher = dispatcher();

    let rsp = dispatcher
        .dispatch(request("fail", vec![ValueType::String], vec![Value::from("bad input")]))
        .await;
    assert_eq!(rsp.status(), StatusCode::Error);
    assert_eq!(rsp.error_value(), Some(&RemoteError::raised("IllegalArgument", "bad input")));

    let rsp = dispatcher.dispatch(request("explode", vec![], vec![])).await;
    assert_eq!(rsp.status(), StatusCode::Error);
    let error = rsp.error_value().unwrap();
    assert_eq!(error.kind(), Some("panic"));
    assert_eq!(error.message, "parrot exploded");
}

#[tokio::test]
async fn test_dispatcher_answers_garbage() {
    let dispatcher = dispatcher();
    let protocol = MessageProtocol::binary();

    for garbage in [&b""[..], &b"\xff\x00\x01"[..], &b"{\"service\":1}"[..]] {
        let rsp = protocol.unmarshal_response(&dispatcher.handle(garbage).await).unwrap();
        assert_eq!(rsp.status(), StatusCode::Error);
        assert_eq!(rsp.error_value().map(|e| &e.reason), Some(&FailureReason::MalformedRequest));
    }
}

/// Answers every call with a float JSON cannot carry.
struct Unbounded;

#[async_trait::async_trait]
impl crate::dispatch::Dispatch for Unbounded {
    fn interface(&self) -> &str {
        "demo.Unbounded"
    }

    async fn invoke(&self, _: &str, _: &[ValueType], _: Vec<Value>) -> Result<Value, RemoteError> {
        Ok(Value::F64(f64::INFINITY))
    }
}

#[tokio::test]
async fn test_unencodable_result_becomes_error() {
    let services = Arc::new(LocalServices::new());
    services.bind(ServiceBinding::new(Unbounded));
    let protocol = MessageProtocol::json();
    let dispatcher = Dispatcher::new(protocol.clone(), services);

    let req = RequestDatagram::new("demo.Unbounded", "limit", vec![], vec![]);
    let bytes = dispatcher.handle(&protocol.marshal_request(&req).unwrap()).await;
    let rsp = protocol.unmarshal_response(&bytes).unwrap();
    assert_eq!(rsp.status(), StatusCode::Error);
    assert_eq!(rsp.error_value().and_then(|e| e.kind()), Some("EncodeError"));
}

#[tokio::test]
async fn test_oversized_response_becomes_error() {
    let dispatcher = dispatcher();
    let protocol = MessageProtocol::binary();
    let req = request("echo", vec![ValueType::String], vec![Value::from("x".repeat(512))]);
    let payload = protocol.marshal_request(&req).unwrap();

    let bytes = dispatcher.handle_bounded(&payload, 4096).await;
    let rsp = protocol.unmarshal_response(&bytes).unwrap();
    assert_eq!(rsp.status(), StatusCode::Success);

    let bytes = dispatcher.handle_bounded(&payload, 256).await;
    assert!(bytes.len() <= 256);
    let rsp = protocol.unmarshal_response(&bytes).unwrap();
    assert_eq!(rsp.status(), StatusCode::Error);
    assert_eq!(rsp.error_value().and_then(|e| e.kind()), Some("ResponseTooLarge"));
}

// --- Registrar ---

#[tokio::test]
async fn test_register_twice_leaves_one_entry() {
    let store = MemoryStore::new();
    let registrar = ServiceRegistrar::new(&config(), Arc::new(store.connect()), "127.0.0.1:19000");

    let first = registrar.register(echo_binding()).await.unwrap();
    let second = registrar.register(echo_binding()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, ServiceLocation::new("demo.Echo", "127.0.0.1:19000", "binary"));

    assert_eq!(registrar.bindings().len(), 1);
    assert_eq!(registrar.binding("demo.Echo").map(|b| b.interface().to_string()), Some("demo.Echo".into()));
    assert!(registrar.binding("demo.Nope").is_none());

    let observer = store.connect();
    let children = observer.children("/rpc/service/demo.Echo").await.unwrap();
    assert_eq!(children, vec![first.to_node_name().unwrap()]);

    registrar.close().await;
    assert!(observer.children("/rpc/service/demo.Echo").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregister() {
    let store = MemoryStore::new();
    let registrar = ServiceRegistrar::new(&config(), Arc::new(store.connect()), "h:1");
    registrar.register(echo_binding()).await.unwrap();

    assert!(registrar.unregister("demo.Echo").await.unwrap().is_some());
    assert!(registrar.binding("demo.Echo").is_none());
    assert!(store.connect().children("/rpc/service/demo.Echo").await.unwrap().is_empty());
    assert!(registrar.unregister("demo.Echo").await.unwrap().is_none());
}

// --- Discoverer ---

#[tokio::test]
async fn test_resolve_unknown_service_is_empty() {
    let store = MemoryStore::new();
    let discoverer = ServiceDiscoverer::new(Arc::new(store.connect()), config().layout());
    assert!(discoverer.resolve("demo.Nope").await.is_empty());
    assert_eq!(discoverer.cached("demo.Nope"), Some(Vec::new()));
    assert!(discoverer.is_watching("demo.Nope"));
}

#[tokio::test]
async fn test_cache_follows_providers() {
    let store = MemoryStore::new();
    let discoverer = ServiceDiscoverer::new(Arc::new(store.connect()), config().layout());

    let (a, _) = provider(&store, "10.0.0.1:19000").await;
    assert_eq!(discoverer.resolve("demo.Echo").await, vec![a.location("demo.Echo")]);

    let (b, _) = provider(&store, "10.0.0.2:19000").await;
    assert!(eventually(|| discoverer.cached("demo.Echo").map_or(0, |l| l.len()) == 2).await);

    a.close().await;
    assert!(eventually(|| discoverer.cached("demo.Echo") == Some(vec![b.location("demo.Echo")])).await);
    assert_eq!(discoverer.resolve("demo.Echo").await, vec![b.location("demo.Echo")]);

    b.close().await;
    assert!(eventually(|| discoverer.cached("demo.Echo") == Some(Vec::new())).await);
}

#[tokio::test]
async fn test_undecodable_entries_are_skipped() {
    let store = MemoryStore::new();
    let (registrar, _) = provider(&store, "h:1").await;
    let other = store.connect();
    other.create("/rpc/service/demo.Echo/garbage", CreateMode::Ephemeral).await.unwrap();

    let discoverer = ServiceDiscoverer::new(Arc::new(store.connect()), config().layout());
    assert_eq!(discoverer.resolve("demo.Echo").await, vec![registrar.location("demo.Echo")]);
}

#[tokio::test]
async fn test_forget_and_close() {
    let store = MemoryStore::new();
    let discoverer = ServiceDiscoverer::new(Arc::new(store.connect()), config().layout());
    discoverer.resolve("demo.Echo").await;
    discoverer.resolve("demo.Other").await;

    discoverer.forget("demo.Echo");
    assert!(!discoverer.is_watching("demo.Echo"));
    assert_eq!(discoverer.cached("demo.Echo"), None);
    assert!(discoverer.is_watching("demo.Other"));

    discoverer.close().await;
    assert!(!discoverer.is_watching("demo.Other"));
    // A closed session cannot list, which resolves to nothing and is not cached.
    assert!(discoverer.resolve("demo.Other").await.is_empty());
    assert_eq!(discoverer.cached("demo.Other"), None);
}

/// A session that can refuse watches, cut live watches and hold back listings.
struct UnreliableStore {
    inner: MemorySession,
    refused_watches: AtomicUsize,
    delayed_listings: AtomicUsize,
    delay: Duration,
    forwarders: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl UnreliableStore {
    fn new(inner: MemorySession) -> Self {
        Self {
            inner,
            refused_watches: AtomicUsize::new(0),
            delayed_listings: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    fn refuse_watches(self, count: usize) -> Self {
        self.refused_watches.store(count, Ordering::SeqCst);
        self
    }

    fn delay_listings(self, count: usize) -> Self {
        self.delayed_listings.store(count, Ordering::SeqCst);
        self
    }

    /// Ends every watch handed out so far.
    fn cut_watches(&self) {
        for forwarder in self.forwarders.lock().unwrap().drain(..) {
            forwarder.abort();
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait::async_trait]
impl CoordinationStore for UnreliableStore {
    async fn exists(&self, path: &str) -> registry::Result<bool> {
        self.inner.exists(path).await
    }

    async fn create(&self, path: &str, mode: CreateMode) -> registry::Result<()> {
        self.inner.create(path, mode).await
    }

    async fn ensure_path(&self, path: &str) -> registry::Result<()> {
        self.inner.ensure_path(path).await
    }

    async fn delete(&self, path: &str) -> registry::Result<()> {
        self.inner.delete(path).await
    }

    async fn children(&self, path: &str) -> registry::Result<Vec<String>> {
        // Snapshot first, answer late: the answer is stale by the time it lands.
        let children = self.inner.children(path).await;
        if take_one(&self.delayed_listings) {
            tokio::time::sleep(self.delay).await;
        }
        children
    }

    async fn watch_children(&self, path: &str) -> registry::Result<ChildWatch> {
        if take_one(&self.refused_watches) {
            return Err(registry::Error::Backend("watch refused".into()));
        }
        let mut upstream = self.inner.watch_children(path).await?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = upstream.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        self.forwarders.lock().unwrap().push(forwarder);
        Ok(rx)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_unwatched_listing_is_not_cached() {
    let store = MemoryStore::new();
    let session = UnreliableStore::new(store.connect()).refuse_watches(1);
    let discoverer = ServiceDiscoverer::new(Arc::new(session), config().layout());

    assert!(discoverer.resolve("demo.Echo").await.is_empty());
    assert!(!discoverer.is_watching("demo.Echo"));
    assert_eq!(discoverer.cached("demo.Echo"), None);

    let (registrar, _) = provider(&store, "10.0.0.1:19000").await;
    assert_eq!(discoverer.resolve("demo.Echo").await, vec![registrar.location("demo.Echo")]);
    assert!(discoverer.is_watching("demo.Echo"));
    assert_eq!(discoverer.cached("demo.Echo"), Some(vec![registrar.location("demo.Echo")]));
}

#[tokio::test]
async fn test_ended_watch_drops_cache() {
    let store = MemoryStore::new();
    let session = Arc::new(UnreliableStore::new(store.connect()));
    let discoverer = ServiceDiscoverer::new(session.clone(), config().layout());

    assert!(discoverer.resolve("demo.Echo").await.is_empty());
    assert!(discoverer.is_watching("demo.Echo"));

    session.cut_watches();
    assert!(eventually(|| !discoverer.is_watching("demo.Echo")).await);
    assert_eq!(discoverer.cached("demo.Echo"), None);

    let (registrar, _) = provider(&store, "10.0.0.1:19000").await;
    assert_eq!(discoverer.resolve("demo.Echo").await, vec![registrar.location("demo.Echo")]);
    assert!(discoverer.is_watching("demo.Echo"));

    let (_other, _) = provider(&store, "10.0.0.2:19000").await;
    assert!(eventually(|| discoverer.cached("demo.Echo").map_or(0, |l| l.len()) == 2).await);
}

#[tokio::test]
async fn test_slow_first_listing_keeps_newer_refresh() {
    let store = MemoryStore::new();
    let session = UnreliableStore::new(store.connect()).delay_listings(1);
    let discoverer = Arc::new(ServiceDiscoverer::new(Arc::new(session), config().layout()));

    let first = tokio::spawn({
        let discoverer = discoverer.clone();
        async move { discoverer.resolve("demo.Echo").await }
    });
    assert!(eventually(|| discoverer.is_watching("demo.Echo")).await);

    let (registrar, _) = provider(&store, "10.0.0.1:19000").await;
    let expected = vec![registrar.location("demo.Echo")];
    assert!(eventually(|| discoverer.cached("demo.Echo").as_ref() == Some(&expected)).await);

    assert_eq!(first.await.unwrap(), expected);
    assert_eq!(discoverer.cached("demo.Echo"), Some(expected.clone()));
    assert_eq!(discoverer.resolve("demo.Echo").await, expected);
}

// --- Proxy ---

#[tokio::test]
async fn test_no_provider_fails_before_io() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::default());
    let client: EchoClient = consumer(&store, transport.clone()).client();

    let err = client.echo("ping".into()).await.unwrap_err();
    assert_eq!(err, CallError::NoProviderAvailable("demo.Echo".into()));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_typed_client_round_trip() {
    let store = MemoryStore::new();
    let (registrar, dispatcher) = provider(&store, "10.0.0.1:19000").await;
    let transport = Arc::new(LoopbackTransport::default());
    transport.route(registrar.address(), dispatcher);
    let client: EchoClient = consumer(&store, transport.clone()).client();

    assert_eq!(client.echo("ping".into()).await.unwrap(), "ping");
    assert_eq!(client.sum(vec![1, 2, 3]).await.unwrap(), 6);

    let err = client.fail("no".into()).await.unwrap_err();
    assert_eq!(err.remote(), Some(&RemoteError::raised("IllegalArgument", "no")));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_client_identity_is_local() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::default());
    let client: EchoClient = consumer(&store, transport.clone()).client();

    assert_eq!(client.to_string(), "remote demo.Echo");
    assert_eq!(format!("{:?}", client), "EchoClient(demo.Echo)");
    assert_eq!(client.proxy().interface(), EchoClient::INTERFACE);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_untyped_proxy_reports_remote_failures() {
    let store = MemoryStore::new();
    let (registrar, dispatcher) = provider(&store, "h:1").await;
    let transport = Arc::new(LoopbackTransport::default());
    transport.route(registrar.address(), dispatcher);
    let proxy = consumer(&store, transport).proxy("demo.Echo");

    let err = proxy.invoke("shout", vec![ValueType::String], vec![Value::from("x")]).await.unwrap_err();
    assert_eq!(err.remote().map(|e| &e.reason), Some(&FailureReason::MethodNotFound));

    let err = proxy.invoke("echo", vec![ValueType::String], vec![Value::I64(1)]).await.unwrap_err();
    assert_eq!(err.remote().map(|e| &e.reason), Some(&FailureReason::ArgumentMismatch));
}

#[tokio::test]
async fn test_transport_failure_is_not_remote() {
    let store = MemoryStore::new();
    let (_registrar, _) = provider(&store, "10.9.9.9:1").await;
    let client: EchoClient = consumer(&store, Arc::new(LoopbackTransport::default())).client();

    let err = client.echo("ping".into()).await.unwrap_err();
    assert!(matches!(err, CallError::Transport(transport::Error::Connect { .. })));
    assert!(err.remote().is_none());
}

#[tokio::test]
async fn test_unsupported_protocol() {
    let store = MemoryStore::new();
    let cfg = config().with_protocol("myprotocol");
    let registrar = ServiceRegistrar::new(&cfg, Arc::new(store.connect()), "h:1");
    registrar.register(echo_binding()).await.unwrap();

    let transport = Arc::new(LoopbackTransport::default());
    let client: EchoClient = consumer(&store, transport.clone()).client();
    let err = client.echo("ping".into()).await.unwrap_err();
    assert_eq!(err, CallError::UnsupportedProtocol("myprotocol".into()));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_random_selection_uses_every_provider() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::default());
    let mut providers = Vec::new();
    for address in ["10.0.0.1:19000", "10.0.0.2:19000"] {
        let (registrar, dispatcher) = provider(&store, address).await;
        transport.route(address, dispatcher);
        providers.push(registrar);
    }
    let client: EchoClient = consumer(&store, transport.clone()).client();

    for _ in 0..64 {
        assert_eq!(client.echo("x".into()).await.unwrap(), "x");
    }
    let targets = transport.targets.lock().unwrap();
    assert!(targets.iter().any(|t| t == "10.0.0.1:19000"));
    assert!(targets.iter().any(|t| t == "10.0.0.2:19000"));
}

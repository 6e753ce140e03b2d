use std::any::TypeId;
use std::sync::Arc;

use parking_lot::Mutex;
use socketkit::prelude::*;
use socketkit::transport::LocalTransport;
use socketkit::{
    AppEventContext, RunningSockets, SocketControllersOptions, SocketRuntime, TypeContainer,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Orders;

impl Orders {
    async fn place(self: Arc<Self>, call: Invocation) -> anyhow::Result<Value> {
        let item: String = call.payload(0)?;
        Ok(json!({ "item": item }))
    }

    async fn cancel(self: Arc<Self>, _call: Invocation) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Audit {
    log: Mutex<Vec<String>>,
}

impl Audit {
    async fn record(self: Arc<Self>, call: Invocation) -> anyhow::Result<()> {
        let ctx = call
            .app_event
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("not an application event"))?;
        let origin = ctx
            .io_context
            .as_ref()
            .map(|io| io.event_name.clone())
            .unwrap_or_else(|| "direct".to_string());
        self.log
            .lock()
            .push(format!("{}:{}:{}", ctx.event_name, origin, ctx.data));
        Ok(())
    }

    async fn count(self: Arc<Self>, _call: Invocation) -> anyhow::Result<()> {
        self.log.lock().push("count".to_string());
        Ok(())
    }
}

fn orders(store: &mut MetadataStore) -> Result<ControllerClass, ConfigError> {
    Controller::<Orders>::new("Orders")
        .decorate(namespace("/orders"))
        .method(
            "place",
            Orders::place,
            [socket_on("place"), message_body(0), app_emit("order.placed")],
        )
        .method("cancel", Orders::cancel, [socket_on("cancel"), app_emit("order.cancelled")])
        .register(store)
}

fn audit(store: &mut MetadataStore) -> Result<ControllerClass, ConfigError> {
    Controller::<Audit>::new("Audit")
        .method("record", Audit::record, [app_on("order.placed"), app_on("order.manual")])
        .method("count", Audit::count, [app_on("order.placed")])
        .register(store)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn start() -> (Arc<LocalTransport>, Arc<Audit>, RunningSockets) {
    let transport = Arc::new(LocalTransport::new());
    let audit_instance = Arc::new(Audit::default());
    let container = Arc::new(TypeContainer::new());
    container.register(Arc::new(Orders));
    container.register(audit_instance.clone());

    let mut store = MetadataStore::new();
    let classes = vec![orders(&mut store).unwrap(), audit(&mut store).unwrap()];
    let opts = SocketControllersOptions::new(transport.clone())
        .container(container)
        .controllers(store, classes);
    let running = SocketRuntime::new(opts, CancellationToken::new())
        .start()
        .unwrap();
    (transport, audit_instance, running)
}

#[tokio::test]
async fn handler_results_are_published_with_their_transport_context() {
    let (transport, audit, running) = start();
    assert_eq!(running.app_events().listener_count("order.placed"), 2);

    let socket = transport.connect("/orders").await.unwrap();
    socket.dispatch("place", vec![json!("book")]).await.unwrap();
    settle().await;

    let mut log = audit.log.lock().clone();
    log.sort();
    assert_eq!(log, vec!["count", r#"order.placed:place:{"item":"book"}"#]);
}

#[tokio::test]
async fn empty_results_are_not_published() {
    let (transport, audit, running) = start();
    let socket = transport.connect("/orders").await.unwrap();

    socket.dispatch("cancel", vec![]).await.unwrap();
    settle().await;

    assert_eq!(running.app_events().listener_count("order.cancelled"), 0);
    assert!(audit.log.lock().is_empty());
}

#[tokio::test]
async fn events_can_be_emitted_directly_on_the_bus() {
    let (_transport, audit, running) = start();

    let dispatch = running
        .app_events()
        .emit(AppEventContext::new("order.manual", json!(7)));
    assert_eq!(dispatch.len(), 1);
    assert!(dispatch.wait().await.iter().all(Result::is_ok));

    assert_eq!(audit.log.lock().clone(), vec!["order.manual:direct:7"]);
}

#[tokio::test]
async fn listeners_can_be_removed() {
    let (transport, audit, running) = start();
    let bus = running.app_events();

    assert!(bus.off("order.placed", TypeId::of::<Audit>(), "count"));
    assert!(!bus.off("order.placed", TypeId::of::<Audit>(), "count"));
    assert_eq!(bus.listener_count("order.placed"), 1);

    let socket = transport.connect("/orders").await.unwrap();
    socket.dispatch("place", vec![json!("pen")]).await.unwrap();
    settle().await;
    assert_eq!(audit.log.lock().len(), 1);

    assert_eq!(bus.off_all("order.placed"), 1);
    bus.remove_all_listeners();
    assert_eq!(bus.listener_count("order.manual"), 0);
    assert!(bus.emit(AppEventContext::new("order.manual", json!(1))).is_empty());
}

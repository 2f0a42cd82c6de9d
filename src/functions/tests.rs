use super::watcher::{next_delay, ReconnectConfig, StreamEnd, Watcher};
use super::*;
use crate::database::listen::ServerEvent;
use crate::database::{DatabaseError, FirebaseDatabase};
use futures::{stream, StreamExt};
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(EventContext, Change)>>,
}

#[async_trait]
impl QueueHandler for Recorder {
    async fn handle(&self, ctx: &EventContext, change: &Change) -> Report {
        self.calls.lock().unwrap().push((ctx.clone(), change.clone()));
        Report::default()
    }
}

/// Hangs on `-N1` and forwards every other record.
struct Stalling {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl QueueHandler for Stalling {
    async fn handle(&self, ctx: &EventContext, _change: &Change) -> Report {
        if ctx.resource.ends_with("/-N1") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let _ = self.tx.send(ctx.resource.clone());
        Report::default()
    }
}

struct Forwarder {
    tx: mpsc::UnboundedSender<(EventContext, Change)>,
}

#[async_trait]
impl QueueHandler for Forwarder {
    async fn handle(&self, ctx: &EventContext, change: &Change) -> Report {
        let _ = self.tx.send((ctx.clone(), change.clone()));
        Report::default()
    }
}

fn database_for(server: &MockServer) -> FirebaseDatabase {
    let client = ClientBuilder::new(Client::new()).build();
    FirebaseDatabase::new_with_client(client, Url::parse(&server.base_url()).unwrap())
}

fn watcher_for(function: Function, database: &FirebaseDatabase) -> Watcher {
    watcher_with_timeout(function, database, Duration::from_secs(5))
}

fn watcher_with_timeout(function: Function, database: &FirebaseDatabase, timeout: Duration) -> Watcher {
    let reference = database.reference(&function.pattern.queue_path()).unwrap();
    Watcher::new(
        Arc::new(function),
        reference,
        timeout,
        ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            idle_timeout: Duration::from_millis(200),
        },
    )
}

fn queue_events() -> Vec<Result<ServerEvent, DatabaseError>> {
    vec![
        Ok(ServerEvent::Put {
            path: "/".to_string(),
            data: json!({ "-N1": { "uidToDelete": "u1", "requestedByAdmin": "admin" } }),
        }),
        Ok(ServerEvent::KeepAlive),
        Ok(ServerEvent::Put {
            path: "/-N1".to_string(),
            data: Value::Null,
        }),
        Ok(ServerEvent::Put {
            path: "/-N2".to_string(),
            data: json!({ "uidToDelete": "u2", "requestedByAdmin": "admin" }),
        }),
    ]
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
}

#[test]
fn test_path_pattern_parse() {
    let pattern = PathPattern::parse("/admin_alerts_queue/{pushId}").unwrap();
    assert_eq!(pattern.queue_path(), "admin_alerts_queue");
    assert_eq!(pattern.param(), "pushId");
    assert_eq!(pattern.resource("-Nabc"), "admin_alerts_queue/-Nabc");
    assert_eq!(pattern.to_string(), "/admin_alerts_queue/{pushId}");

    let nested = PathPattern::parse("tenants/acme/queue/{id}").unwrap();
    assert_eq!(nested.queue_path(), "tenants/acme/queue");
}

#[test]
fn test_path_pattern_rejects_bad_templates() {
    for template in [
        "",
        "/",
        "/{pushId}",
        "/admin_alerts_queue",
        "/admin_alerts_queue/{}",
        "/{tenant}/queue/{pushId}",
        "/bad.queue/{pushId}",
    ] {
        assert!(
            matches!(PathPattern::parse(template), Err(FunctionsError::InvalidPattern { .. })),
            "{:?} should be rejected",
            template
        );
    }
}

#[test]
fn test_change_kind() {
    let value = json!({ "title": "a" });
    assert_eq!(Change::new(None, Some(value.clone())).kind(), Some(ChangeKind::Create));
    assert_eq!(
        Change::new(Some(value.clone()), Some(json!({ "title": "b" }))).kind(),
        Some(ChangeKind::Update)
    );
    assert_eq!(Change::new(Some(value.clone()), None).kind(), Some(ChangeKind::Delete));
    assert_eq!(Change::new(Some(value.clone()), Some(value)).kind(), None);
    assert_eq!(Change::default().kind(), None);
}

#[test]
fn test_trigger_kinds() {
    assert!(TriggerKind::OnWrite.fires_on(ChangeKind::Create));
    assert!(TriggerKind::OnWrite.fires_on(ChangeKind::Update));
    assert!(TriggerKind::OnWrite.fires_on(ChangeKind::Delete));
    assert!(TriggerKind::OnCreate.fires_on(ChangeKind::Create));
    assert!(!TriggerKind::OnCreate.fires_on(ChangeKind::Update));
    assert!(!TriggerKind::OnCreate.fires_on(ChangeKind::Delete));
}

#[test]
fn test_event_context() {
    let function = Function::on_write(
        "onAttendanceAlert",
        "/admin_alerts_queue/{pushId}",
        Arc::new(Recorder::default()),
    )
    .unwrap();
    let change = Change::new(None, Some(json!({ "employeeName": "Sara" })));

    let first = EventContext::new(&function, "-N1", &change);
    let again = EventContext::new(&function, "-N1", &change);
    let other = EventContext::new(&function, "-N2", &change);

    assert_eq!(first.function, "onAttendanceAlert");
    assert_eq!(first.resource, "admin_alerts_queue/-N1");
    assert_eq!(first.param("pushId"), Some("-N1"));
    assert_eq!(first.fingerprint.len(), 16);
    assert_eq!(first.fingerprint, again.fingerprint);
    assert_ne!(first.fingerprint, other.fingerprint);
}

#[test]
fn test_report() {
    let mut report = Report::default();
    assert!(report.is_empty());

    report.record(Step::Dispatch, StepOutcome::Failed("unavailable".to_string()));
    report.record(Step::Drain, StepOutcome::Ok);

    assert_eq!(report.failures(), 1);
    assert_eq!(report.outcome(Step::Drain), Some(&StepOutcome::Ok));
    assert_eq!(report.outcome(Step::DeleteIdentity), None);
    assert_eq!(
        StepOutcome::from_result(&Err::<(), _>("boom")),
        StepOutcome::Failed("boom".to_string())
    );
    assert!(StepOutcome::from_result(&Ok::<_, String>(1)).is_ok());
}

#[test]
fn test_next_delay() {
    let config = ReconnectConfig::default();
    assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    assert_eq!(next_delay(Duration::from_secs(20), &config), Duration::from_secs(30));
}

#[test]
fn test_duplicate_function_names() {
    let server = MockServer::start();
    let mut runtime = Runtime::new(Arc::new(database_for(&server)));
    let handler: Arc<dyn QueueHandler> = Arc::new(Recorder::default());

    runtime
        .register(Function::on_write("onBroadcast", "/notifications_queue/{pushId}", handler.clone()).unwrap())
        .unwrap();
    let duplicate = runtime.register(
        Function::on_create("onBroadcast", "/delete_requests/{pushId}", handler).unwrap(),
    );

    assert!(matches!(duplicate, Err(FunctionsError::DuplicateFunction(_))));
    assert_eq!(runtime.functions().len(), 1);
}

#[tokio::test]
async fn test_on_create_ignores_deletes() {
    let server = MockServer::start();
    let database = database_for(&server);
    let recorder = Arc::new(Recorder::default());
    let watcher = watcher_for(
        Function::on_create("onDeleteUserRequest", "/delete_requests/{pushId}", recorder.clone()).unwrap(),
        &database,
    );

    let mut tasks = JoinSet::new();
    let end = watcher
        .consume(stream::iter(queue_events()), &mut tasks, &CancellationToken::new())
        .await;
    drain(&mut tasks).await;

    assert_eq!(end, StreamEnd::Closed);
    let calls = recorder.calls.lock().unwrap();
    let mut resources: Vec<&str> = calls.iter().map(|(ctx, _)| ctx.resource.as_str()).collect();
    resources.sort();
    assert_eq!(resources, vec!["delete_requests/-N1", "delete_requests/-N2"]);
    assert!(calls.iter().all(|(_, change)| change.before.is_none()));
}

#[tokio::test]
async fn test_on_write_sees_every_change() {
    let server = MockServer::start();
    let database = database_for(&server);
    let recorder = Arc::new(Recorder::default());
    let watcher = watcher_for(
        Function::on_write("onBroadcast", "/notifications_queue/{pushId}", recorder.clone()).unwrap(),
        &database,
    );

    let mut tasks = JoinSet::new();
    watcher
        .consume(stream::iter(queue_events()), &mut tasks, &CancellationToken::new())
        .await;
    drain(&mut tasks).await;

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    let deletes = calls
        .iter()
        .filter(|(_, change)| change.kind() == Some(ChangeKind::Delete))
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn test_consume_stops_on_server_events() {
    let server = MockServer::start();
    let database = database_for(&server);
    let watcher = watcher_for(
        Function::on_write("onBroadcast", "/notifications_queue/{pushId}", Arc::new(Recorder::default())).unwrap(),
        &database,
    );
    let mut tasks = JoinSet::new();
    let cancel = CancellationToken::new();

    let end = watcher
        .consume(
            stream::iter(vec![Ok(ServerEvent::Cancel("Permission denied".to_string()))]),
            &mut tasks,
            &cancel,
        )
        .await;
    assert_eq!(end, StreamEnd::Cancelled("Permission denied".to_string()));

    let end = watcher
        .consume(stream::iter(vec![Ok(ServerEvent::AuthRevoked)]), &mut tasks, &cancel)
        .await;
    assert_eq!(end, StreamEnd::AuthRevoked);

    let end = watcher
        .consume(
            stream::iter(vec![Err(DatabaseError::StreamError("bad utf-8".to_string()))]),
            &mut tasks,
            &cancel,
        )
        .await;
    assert!(matches!(end, StreamEnd::Failed(_)));

    cancel.cancel();
    let end = watcher
        .consume(stream::pending::<Result<ServerEvent, DatabaseError>>(), &mut tasks, &cancel)
        .await;
    assert_eq!(end, StreamEnd::Shutdown);
}

#[tokio::test]
async fn test_watcher_redelivers_pending_records_after_reconnect() {
    let server = MockServer::start();
    let database = database_for(&server);

    let _mock = server.mock(|when, then| {
        when.method(GET)
            .path("/admin_alerts_queue.json")
            .header("accept", "text/event-stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body("event: put\ndata: {\"path\":\"/\",\"data\":{\"-N1\":{\"employeeName\":\"Sara\",\"type\":\"check_in\"}}}\n\n");
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = watcher_for(
        Function::on_write("onAttendanceAlert", "/admin_alerts_queue/{pushId}", Arc::new(Forwarder { tx })).unwrap(),
        &database,
    );

    let cancel = CancellationToken::new();
    let running = tokio::spawn(watcher.run(cancel.clone()));

    let (first_ctx, first_change) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let (second_ctx, _) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first_ctx.resource, "admin_alerts_queue/-N1");
    assert_eq!(first_change.kind(), Some(ChangeKind::Create));
    assert_eq!(first_ctx.fingerprint, second_ctx.fingerprint);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_silent_stream_is_abandoned() {
    let server = MockServer::start();
    let database = database_for(&server);
    let recorder = Arc::new(Recorder::default());
    let watcher = watcher_for(
        Function::on_write("onAttendanceAlert", "/admin_alerts_queue/{pushId}", recorder.clone()).unwrap(),
        &database,
    );

    let events = stream::iter(vec![Ok(ServerEvent::Put {
        path: "/".to_string(),
        data: json!({ "-N1": { "employeeName": "Sara" } }),
    })])
    .chain(stream::pending());

    let mut tasks = JoinSet::new();
    let end = tokio::time::timeout(
        Duration::from_secs(5),
        watcher.consume(events, &mut tasks, &CancellationToken::new()),
    )
    .await
    .unwrap();
    drain(&mut tasks).await;

    assert!(matches!(end, StreamEnd::Failed(_)));
    assert_eq!(recorder.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_invocation_times_out_without_blocking_others() {
    let server = MockServer::start();
    let database = database_for(&server);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = watcher_with_timeout(
        Function::on_write("onBroadcast", "/notifications_queue/{pushId}", Arc::new(Stalling { tx })).unwrap(),
        &database,
        Duration::from_millis(100),
    );

    let events = stream::iter(vec![Ok(ServerEvent::Put {
        path: "/".to_string(),
        data: json!({ "-N1": { "title": "slow" }, "-N2": { "title": "fast" } }),
    })]);

    let mut tasks = JoinSet::new();
    let end = watcher
        .consume(events, &mut tasks, &CancellationToken::new())
        .await;
    assert_eq!(end, StreamEnd::Closed);

    tokio::time::timeout(Duration::from_secs(5), drain(&mut tasks))
        .await
        .unwrap();

    let mut delivered = Vec::new();
    while let Ok(resource) = rx.try_recv() {
        delivered.push(resource);
    }
    assert_eq!(delivered, vec!["notifications_queue/-N2".to_string()]);
}

//! End-to-end tests for the service over a real worker thread, plus a few
//! hand-driven worker ports for the failure paths a well-behaved worker never
//! produces.

use std::sync::Arc;
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::error::Error;
use crate::error::FamilyError;
use crate::family::Family;
use crate::family::Operation;
use crate::id::ObjectId;
use crate::message::Message;
use crate::message::Outcome;
use crate::message::RequestKind;
use crate::progress;
use crate::progress::ProgressEmitter;
use crate::service::Service;
use crate::transport;
use crate::worker::WorkerHandle;

/// A family whose objects are plain integers.
struct Counter;

#[derive(Debug)]
enum CounterOp {
    Add(i64),
    /// Emits 1..=steps and returns `steps`.
    Count { steps: u64 },
    /// Emits 2 then 1.
    Rewind,
    Fail,
    Panic,
    Sleep(u64),
}

impl Operation for CounterOp {
    fn tag(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Count { .. } => "count",
            Self::Rewind => "rewind",
            Self::Fail => "fail",
            Self::Panic => "panic",
            Self::Sleep(_) => "sleep",
        }
    }

    fn progress_max(&self) -> Option<u64> {
        match self {
            Self::Count { steps } => Some(*steps),
            _ => None,
        }
    }
}

impl Family for Counter {
    const NAME: &'static str = "counter";
    type Args = i64;
    type Op = CounterOp;
    type Output = i64;
    type Contents = i64;
    type Object = i64;

    fn create(&mut self, start: i64) -> Result<i64, FamilyError> {
        if start < 0 {
            return Err(FamilyError::new("start must not be negative"));
        }
        Ok(start)
    }

    fn apply(
        &mut self,
        value: &mut i64,
        op: CounterOp,
        progress: &mut ProgressEmitter<'_>,
    ) -> Result<i64, FamilyError> {
        match op {
            CounterOp::Add(n) => *value += n,
            CounterOp::Count { steps } => {
                for step in 1..=steps {
                    progress.emit(step)?;
                }
                return Ok(steps as i64);
            }
            CounterOp::Rewind => {
                progress.emit(2)?;
                progress.emit(1)?;
            }
            CounterOp::Fail => return Err(FamilyError::new("refused")),
            CounterOp::Panic => panic!("counter exploded"),
            CounterOp::Sleep(ms) => std::thread::sleep(Duration::from_millis(ms)),
        }
        Ok(*value)
    }

    fn transfer(&mut self, value: i64) -> i64 {
        value
    }
}

fn start() -> (Service<Counter>, WorkerHandle<Counter>) {
    crate::spawn(Counter, WorkerConfig::new("counter-test")).expect("worker should spawn")
}

/// Polls `cond` until it holds, failing the test after a few seconds.
async fn settle(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_create_mints_distinct_ids() {
    let (service, _handle) = start();

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(service.create(n).await.expect("create should succeed"));
    }

    assert_eq!(ids[0], ObjectId(1));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_invoke_mutates_worker_object() {
    let (service, _handle) = start();
    let id = service.create(5).await.expect("create");

    assert_eq!(service.invoke(id, CounterOp::Add(3), None).await.expect("add"), 8);
    assert_eq!(service.invoke(id, CounterOp::Add(-8), None).await.expect("add"), 0);
    assert_eq!(service.transfer(id).await.expect("transfer"), 0);
}

#[tokio::test]
async fn test_progress_arrives_in_order_and_stream_ends() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");
    let (sink, mut stream) = progress::channel(64);

    let output = service
        .invoke(id, CounterOp::Count { steps: 20 }, Some(sink))
        .await
        .expect("count");

    assert_eq!(output, 20);
    assert_eq!(stream.drain(), (1..=20).collect::<Vec<u64>>());
    assert!(stream.next().await.is_none());
    assert_eq!(service.dropped_progress(), 0);
}

#[tokio::test]
async fn test_slow_reader_still_sees_the_final_value() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");
    let (sink, mut stream) = progress::channel(2);

    let output = service
        .invoke(id, CounterOp::Count { steps: 5 }, Some(sink))
        .await
        .expect("count");

    assert_eq!(output, 5);
    let seen = stream.drain();
    assert_eq!(seen, vec![1, 2, 5]);
    assert!(stream.is_finished());
    assert_eq!(service.dropped_progress(), 2);
}

#[tokio::test]
async fn test_progress_without_sink_is_not_sent() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");

    service.invoke(id, CounterOp::Count { steps: 50 }, None).await.expect("count");

    assert_eq!(service.dropped_progress(), 0);
}

#[tokio::test]
async fn test_regressing_progress_fails_operation() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");
    let (sink, mut stream) = progress::channel(8);

    let err = service.invoke(id, CounterOp::Rewind, Some(sink)).await.unwrap_err();

    match err {
        Error::OperationFailed(reason) => {
            assert!(reason.contains("backwards"), "reason was {reason}")
        }
        other => panic!("expected OperationFailed, got {other:?}"),
    }
    assert_eq!(stream.drain(), vec![2]);
}

#[tokio::test]
async fn test_operation_failure_keeps_object_usable() {
    let (service, _handle) = start();
    let id = service.create(1).await.expect("create");

    let err = service.invoke(id, CounterOp::Fail, None).await.unwrap_err();
    assert_eq!(err, Error::OperationFailed("fail: refused".into()));

    assert_eq!(service.invoke(id, CounterOp::Add(1), None).await.expect("add"), 2);
}

#[tokio::test]
async fn test_panic_is_contained_by_worker() {
    let (service, _handle) = start();
    let id = service.create(1).await.expect("create");
    let other = service.create(10).await.expect("create");

    let err = service.invoke(id, CounterOp::Panic, None).await.unwrap_err();
    match err {
        Error::OperationFailed(reason) => {
            assert!(reason.contains("counter exploded"), "reason was {reason}")
        }
        other => panic!("expected OperationFailed, got {other:?}"),
    }

    assert!(!service.is_closed());
    assert_eq!(service.invoke(other, CounterOp::Add(1), None).await.expect("add"), 11);
}

#[tokio::test]
async fn test_creation_failure_mints_no_id() {
    let (service, _handle) = start();

    let err = service.create(-1).await.unwrap_err();
    assert_eq!(err, Error::CreationFailed("start must not be negative".into()));

    assert_eq!(service.create(0).await.expect("create"), ObjectId(1));
}

#[tokio::test]
async fn test_unknown_identifier() {
    let (service, _handle) = start();

    let err = service.invoke(ObjectId(42), CounterOp::Add(1), None).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(ObjectId(42)));

    let err = service.transfer(ObjectId(42)).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(ObjectId(42)));
}

#[tokio::test]
async fn test_transfer_ends_object_lifetime() {
    let (service, _handle) = start();
    let id = service.create(7).await.expect("create");

    assert_eq!(service.transfer(id).await.expect("transfer"), 7);

    let err = service.invoke(id, CounterOp::Add(1), None).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(id));
    let err = service.delete(id).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(id));
    let err = service.transfer(id).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(id));
}

#[tokio::test]
async fn test_requests_racing_a_transfer_see_unknown_identifier() {
    let (service, _handle) = start();
    let id = service.create(3).await.expect("create");

    let (contents, op, again) = tokio::join!(
        service.transfer(id),
        service.invoke(id, CounterOp::Add(1), None),
        service.transfer(id),
    );

    assert_eq!(contents.expect("transfer"), 3);
    assert_eq!(op.unwrap_err(), Error::UnknownIdentifier(id));
    assert_eq!(again.unwrap_err(), Error::UnknownIdentifier(id));
}

#[tokio::test]
async fn test_delete_twice() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");

    service.delete(id).await.expect("first delete");
    let err = service.delete(id).await.unwrap_err();
    assert_eq!(err, Error::UnknownIdentifier(id));
}

#[tokio::test]
async fn test_same_id_requests_complete_in_send_order() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");

    let (a, b, c) = tokio::join!(
        service.invoke(id, CounterOp::Add(1), None),
        service.invoke(id, CounterOp::Add(10), None),
        service.invoke(id, CounterOp::Add(100), None),
    );

    assert_eq!((a.expect("a"), b.expect("b"), c.expect("c")), (1, 11, 111));
}

#[tokio::test]
async fn test_abandoned_request_reply_is_orphaned() {
    let (service, _handle) = start();
    let id = service.create(0).await.expect("create");
    let (sink, stream) = progress::channel(8);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(10),
        service.invoke(id, CounterOp::Sleep(200), Some(sink)),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(stream.is_finished());

    settle(|| service.orphaned_replies() == 1).await;
    assert_eq!(service.pending(), 0);
    assert_eq!(service.invoke(id, CounterOp::Add(2), None).await.expect("add"), 2);
}

#[tokio::test]
async fn test_terminate_fails_later_requests() {
    let (service, handle) = start();
    let id = service.create(0).await.expect("create");

    assert_eq!(handle.name(), "counter-test");
    handle.terminate();
    settle(|| service.is_closed()).await;
    settle(|| handle.is_finished()).await;

    let err = service.invoke(id, CounterOp::Add(1), None).await.unwrap_err();
    assert!(matches!(err, Error::TransportLost(_)));

    let shutdown = handle.shutdown().expect("worker thread should join");
    assert_eq!(shutdown.live_objects, 1);
}

#[tokio::test]
async fn test_transport_loss_rejects_every_outstanding_request() {
    let (transport, mut port) = transport::pair::<Counter>();
    let service = Arc::new(Service::new("manual", transport));
    let (sink, mut stream) = progress::channel(8);

    let counting = tokio::spawn({
        let service = service.clone();
        async move { service.invoke(ObjectId(1), CounterOp::Count { steps: 10 }, Some(sink)).await }
    });
    let creating = tokio::spawn({
        let service = service.clone();
        async move { service.create(0).await }
    });

    let envelopes = [
        port.recv().await.expect("first envelope"),
        port.recv().await.expect("second envelope"),
    ];
    let generic = envelopes
        .iter()
        .find(|e| e.request.kind() == RequestKind::Generic)
        .map(|e| e.seq)
        .expect("one generic request");

    port.send(Message::Progress { seq: generic, value: 1 }).expect("send progress");
    assert_eq!(stream.next().await.map(|p| p.value), Some(1));

    drop(port);

    let counted = counting.await.expect("task should not panic");
    let created = creating.await.expect("task should not panic");
    assert!(matches!(counted, Err(Error::TransportLost(_))));
    assert!(matches!(created, Err(Error::TransportLost(_))));
    assert!(stream.next().await.is_none());
    assert_eq!(service.closed_reason().as_deref(), Some("worker channel closed"));
    assert!(matches!(service.create(1).await, Err(Error::TransportLost(_))));
}

#[tokio::test]
async fn test_late_progress_is_dropped() {
    let (transport, mut port) = transport::pair::<Counter>();
    let service = Service::new("manual", transport);
    let (sink, mut stream) = progress::channel(8);

    let invoke = service.invoke(ObjectId(1), CounterOp::Count { steps: 3 }, Some(sink));
    let respond = async {
        let envelope = port.recv().await.expect("envelope");
        let seq = envelope.seq;
        port.send(Message::Progress { seq, value: 1 }).expect("send");
        port.send(Message::Reply { seq, status: Ok(Outcome::Applied(3)) }).expect("send");
        port.send(Message::Progress { seq, value: 2 }).expect("send");
    };
    let (output, ()) = tokio::join!(invoke, respond);

    assert_eq!(output.expect("invoke"), 3);
    settle(|| service.dropped_progress() == 1).await;
    assert_eq!(stream.drain(), vec![1]);
    assert!(stream.is_finished());
    assert!(!service.is_closed());
}

#[tokio::test]
async fn test_duplicate_reply_closes_service() {
    let (transport, mut port) = transport::pair::<Counter>();
    let service = Service::new("manual", transport);

    let create = service.create(0);
    let respond = async {
        let envelope = port.recv().await.expect("envelope");
        for _ in 0..2 {
            let status = Ok(Outcome::Created(ObjectId(1)));
            port.send(Message::Reply { seq: envelope.seq, status }).expect("send");
        }
    };
    let (id, ()) = tokio::join!(create, respond);

    assert_eq!(id.expect("first reply resolves"), ObjectId(1));
    settle(|| service.is_closed()).await;
    let reason = service.closed_reason().unwrap_or_default();
    assert!(reason.starts_with("protocol violation"), "reason was {reason}");
    assert!(matches!(service.create(1).await, Err(Error::TransportLost(_))));
    drop(port);
}

#[tokio::test]
async fn test_mismatched_reply_kind_is_a_violation() {
    let (transport, mut port) = transport::pair::<Counter>();
    let service = Service::new("manual", transport);

    let create = service.create(0);
    let respond = async {
        let envelope = port.recv().await.expect("envelope");
        let status = Ok(Outcome::Deleted);
        port.send(Message::Reply { seq: envelope.seq, status }).expect("send");
    };
    let (result, ()) = tokio::join!(create, respond);

    assert!(matches!(result, Err(Error::TransportLost(_))));
    settle(|| service.is_closed()).await;
    drop(port);
}

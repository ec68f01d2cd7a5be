/*!
 * Name Service and Message Queue Tests
 */

use nix::errno::Errno;
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;
use tcs_ipc::{
    name_path, Event, IpcBackend, IpcConfig, IpcContext, LocalKernel, Message, PulseCode, Status,
};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_name_open_reaches_registered_process() {
    let kernel = LocalKernel::with_defaults();
    let server = IpcContext::spawn(&kernel, "dome", IpcConfig::default());
    let client = IpcContext::spawn(&kernel, "sequencer", IpcConfig::default());

    let channel = server.name_attach("dome").expect("register");
    assert_eq!(server.channel(), Some(channel));

    let connection = client.name_open("dome").expect("open by name");
    thread::scope(|s| {
        s.spawn(|| {
            let (event, handle) = server.receive(WAIT).expect("receive");
            assert_eq!(event, Event::Message(Message::new(b"open shutter".to_vec())));
            server.reply(handle, &Message::new(b"ok".to_vec())).expect("reply");
        });
        let reply = client
            .send(connection, &Message::new(b"open shutter".to_vec()), WAIT)
            .expect("send by name");
        assert_eq!(reply.payload, b"ok");
    });

    client.name_close(connection).expect("close");
    let err = client.name_close(connection).expect_err("second close");
    assert!(matches!(err, Status::NoNameClose(_)));
}

#[test]
fn test_duplicate_name_rejected() {
    let kernel = LocalKernel::with_defaults();
    let first = IpcContext::spawn(&kernel, "first", IpcConfig::default());
    let second = IpcContext::spawn(&kernel, "second", IpcConfig::default());

    first.name_attach("guider").expect("register");
    let err = second.name_attach("guider").expect_err("name taken");
    assert!(matches!(err, Status::NoPrefixAttach(_)));
    assert_eq!(err.errno(), Some(Errno::EEXIST));
}

#[test]
fn test_unknown_or_withdrawn_name() {
    let kernel = LocalKernel::with_defaults();
    let server = IpcContext::spawn(&kernel, "server", IpcConfig::default());
    let client = IpcContext::spawn(&kernel, "client", IpcConfig::default());

    let err = client.name_open("nowhere").expect_err("never registered");
    assert!(matches!(err, Status::NoNameOpen(_)));
    assert_eq!(err.errno(), Some(Errno::ENOENT));

    server.name_attach("filter-wheel").expect("register");
    server.name_detach("filter-wheel").expect("withdraw");
    let err = client.name_open("filter-wheel").expect_err("withdrawn");
    assert_eq!(err.errno(), Some(Errno::ENOENT));
}

#[test]
fn test_name_vanishes_with_owner() {
    let kernel = LocalKernel::with_defaults();
    let server = IpcContext::spawn(&kernel, "server", IpcConfig::default());
    let client = IpcContext::spawn(&kernel, "client", IpcConfig::default());

    server.name_attach("rotator").expect("register");
    kernel.terminate(server.pid()).expect("terminate");

    assert_eq!(kernel.path_resolve(&name_path("rotator")), Err(Errno::ENOENT));
    let err = client.name_open("rotator").expect_err("owner gone");
    assert!(matches!(err, Status::NoNameOpen(_)));
}

#[test]
fn test_queue_is_bounded_fifo() {
    let kernel = LocalKernel::with_defaults();
    let producer = IpcContext::spawn(&kernel, "producer", IpcConfig::default());
    let consumer = IpcContext::spawn(&kernel, "consumer", IpcConfig::default());

    let tx = producer.mq_open("commands", 2).expect("producer open");
    let rx = consumer.mq_open("commands", 2).expect("consumer open");
    assert_eq!(tx.id(), rx.id());

    producer.mq_send(&tx, b"slew").expect("first");
    producer.mq_send(&tx, b"track").expect("second");
    let err = producer.mq_send(&tx, b"park").expect_err("queue full");
    assert!(matches!(err, Status::MessageSendError(_)));
    assert_eq!(err.errno(), Some(Errno::EAGAIN));

    assert_eq!(consumer.mq_receive(&rx).expect("first"), b"slew");
    assert_eq!(consumer.mq_receive(&rx).expect("second"), b"track");
    let err = consumer.mq_receive(&rx).expect_err("queue empty");
    assert!(matches!(err, Status::MessageReceiveError(_)));
    assert_eq!(err.errno(), Some(Errno::EAGAIN));

    consumer.mq_close(rx.clone()).expect("close");
    let err = consumer.mq_close(rx).expect_err("already closed");
    assert!(matches!(err, Status::NoNameClose(_)));
    producer.mq_close(tx).expect("last close");
}

#[test]
fn test_invalid_queue_open_rejected() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "ctx", IpcConfig::default());

    let err = ctx.mq_open("empty", 0).expect_err("zero capacity");
    assert!(matches!(err, Status::NoNameOpen(_)));
    assert_eq!(err.errno(), Some(Errno::EINVAL));
}

#[test]
fn test_queue_empty_pulse_fires_on_drain() {
    let kernel = LocalKernel::with_defaults();
    let owner = IpcContext::spawn(&kernel, "owner", IpcConfig::default());
    let producer = IpcContext::spawn(&kernel, "producer", IpcConfig::default());

    let queue = owner.mq_open("telemetry", 8).expect("open");
    let source = owner.create_pulse_on_queue_empty(&queue).expect("notify");
    let feed = producer.mq_open("telemetry", 8).expect("producer open");

    producer.mq_send(&feed, b"a").expect("send");
    producer.mq_send(&feed, b"b").expect("send");

    owner.mq_receive(&queue).expect("first");
    let err = owner.receive(Some(Duration::ZERO)).expect_err("not drained yet");
    assert!(matches!(err, Status::WouldBlock(_)));

    owner.mq_receive(&queue).expect("second");
    let (event, _) = owner.receive(WAIT).expect("drain pulse");
    assert_eq!(
        event,
        Event::Pulse {
            code: PulseCode::MqueueEmpty,
            sender_value: source.as_pulse_value()
        }
    );
}

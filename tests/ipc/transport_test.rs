/*!
 * Message Transport Tests
 * Send/receive/reply, timeouts, no-block sends and kernel notices
 */

use nix::errno::Errno;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tcs_ipc::core::limits::MAX_MESSAGE_SIZE;
use tcs_ipc::{
    Event, IpcConfig, IpcContext, LocalKernel, Message, MessageHeader, PulseCode, ReplyHandle,
    Status,
};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn node(kernel: &Arc<LocalKernel>, name: &str) -> IpcContext {
    IpcContext::spawn(kernel, name, IpcConfig::default())
}

/// Server with its channel up, and a client connected to it
fn pair(kernel: &Arc<LocalKernel>, server_config: IpcConfig) -> (IpcContext, IpcContext, tcs_ipc::ConnectionHandle) {
    let server = IpcContext::spawn(kernel, "server", server_config);
    server.get_or_create_channel().expect("server channel");
    let client = node(kernel, "client");
    let (_, connection) = client
        .find_connection(server.pid())
        .expect("client should find the server channel");
    (server, client, connection)
}

/// Answer `count` messages with the payload reversed and the header kept
fn serve_reversed(server: &IpcContext, count: usize) {
    for _ in 0..count {
        let (event, handle) = server.receive(WAIT).expect("server receive");
        let Event::Message(message) = event else {
            panic!("expected a message, got {:?}", event);
        };
        let mut payload = message.payload;
        payload.reverse();
        server
            .reply(handle, &Message::with_header(message.header, payload))
            .expect("server reply");
    }
}

#[test]
fn test_send_receives_reply() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::default());

    thread::scope(|s| {
        s.spawn(|| serve_reversed(&server, 1));
        let reply = client
            .send(connection, &Message::new(b"focus".to_vec()), WAIT)
            .expect("send");
        assert_eq!(reply.payload, b"sucof");
    });

    assert_eq!(client.stats().messages_sent, 1);
    assert_eq!(server.stats().messages_received, 1);
    assert_eq!(server.stats().replies_sent, 1);
}

#[test]
fn test_reply_status_reaches_sender() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::default());

    thread::scope(|s| {
        s.spawn(|| {
            let (_, handle) = server.receive(WAIT).expect("server receive");
            server
                .reply_status(handle, 42, &Message::empty())
                .expect("reply with status");
        });
        let reply = client
            .transact(connection, &Message::empty(), WAIT)
            .expect("transact");
        assert_eq!(reply.status, 42);
    });
}

#[test]
fn test_error_reply_fails_send() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::default());

    thread::scope(|s| {
        s.spawn(|| {
            let (_, handle) = server.receive(WAIT).expect("server receive");
            server.reply_error(handle, Errno::EBUSY).expect("error reply");
        });
        let err = client
            .send(connection, &Message::empty(), WAIT)
            .expect_err("send should fail");
        assert!(matches!(err, Status::MessageSendError(_)));
        assert_eq!(err.errno(), Some(Errno::EBUSY));
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_payload_survives_round_trip(
        payload in prop::collection::vec(any::<u8>(), 0..=MAX_MESSAGE_SIZE),
        msg_type in 0u16..0x100,
    ) {
        let kernel = LocalKernel::with_defaults();
        let (server, client, connection) = pair(&kernel, IpcConfig::default());
        let request = Message::with_header(MessageHeader::with_type(msg_type), payload.clone());

        let reply = thread::scope(|s| {
            s.spawn(|| serve_reversed(&server, 1));
            client.send(connection, &request, WAIT)
        });
        let reply = reply.expect("round trip");

        let mut expected = payload;
        expected.reverse();
        prop_assert_eq!(reply.header.msg_type(), msg_type);
        prop_assert_eq!(reply.payload, expected);
    }
}

#[test]
fn test_oversize_send_rejected_by_kernel() {
    let kernel = LocalKernel::with_defaults();
    let (_server, client, connection) = pair(&kernel, IpcConfig::default());

    let err = client
        .send(connection, &Message::new(vec![0; MAX_MESSAGE_SIZE + 1]), WAIT)
        .expect_err("oversize send");
    assert!(matches!(err, Status::MessageSendError(_)));
    assert_eq!(err.errno(), Some(Errno::E2BIG));
}

#[test]
fn test_zero_timeout_receive_would_block() {
    let kernel = LocalKernel::with_defaults();
    let ctx = node(&kernel, "poller");

    let err = ctx.receive(Some(Duration::ZERO)).expect_err("nothing pending");
    assert!(matches!(err, Status::WouldBlock(_)));

    let err = ctx
        .receive(Some(Duration::from_millis(30)))
        .expect_err("nothing pending");
    assert!(matches!(err, Status::Timeout { .. }));
}

#[test]
fn test_send_times_out_without_receiver() {
    let kernel = LocalKernel::with_defaults();
    let (_server, client, connection) = pair(&kernel, IpcConfig::default());

    let err = client
        .send(connection, &Message::empty(), Some(Duration::from_millis(30)))
        .expect_err("nobody receives");
    assert!(err.is_timeout());
}

#[test]
fn test_default_send_timeout_applies() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "server");
    server.get_or_create_channel().expect("server channel");
    let client = IpcContext::spawn(
        &kernel,
        "client",
        IpcConfig::new().with_send_timeout(Duration::from_millis(30)),
    );
    let (_, connection) = client.find_connection(server.pid()).expect("find server");

    let err = client
        .send(connection, &Message::empty(), None)
        .expect_err("default timeout");
    assert!(err.is_timeout());
}

#[test]
fn test_signal_interrupts_receive() {
    let kernel = LocalKernel::with_defaults();
    let ctx = node(&kernel, "sleeper");
    ctx.get_or_create_channel().expect("channel");

    kernel.signal(ctx.pid()).expect("signal");
    let err = ctx.receive(None).expect_err("signalled");
    assert!(err.is_interrupted());
}

#[test]
fn test_device_message_rejected_on_plain_channel() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::default());

    thread::scope(|s| {
        let sender = s.spawn(|| {
            let request = Message::with_header(MessageHeader::with_type(0x101), Vec::new());
            client.send(connection, &request, WAIT)
        });

        let err = server.receive(WAIT).expect_err("device message");
        assert!(matches!(err, Status::MessageReceiveError(_)));
        assert_eq!(err.errno(), Some(Errno::ENOSYS));

        let err = sender
            .join()
            .expect("sender thread")
            .expect_err("sender sees the rejection");
        assert_eq!(err.errno(), Some(Errno::ENOSYS));
    });
}

#[test]
fn test_reply_to_pulse_rejected() {
    let kernel = LocalKernel::with_defaults();
    let ctx = node(&kernel, "server");

    let err = ctx
        .reply(ReplyHandle::Pulse(3), &Message::empty())
        .expect_err("pulses carry no sender");
    assert!(matches!(err, Status::MessageReplyError(_)));
    assert_eq!(err.errno(), Some(Errno::EINVAL));
}

#[test]
fn test_send_to_process_releases_connection() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "server");
    server.get_or_create_channel().expect("server channel");
    let client = node(&kernel, "client");

    thread::scope(|s| {
        s.spawn(|| serve_reversed(&server, 1));
        let reply = client
            .send_to_process(server.pid(), &Message::new(b"ab".to_vec()), WAIT)
            .expect("send to process");
        assert_eq!(reply.payload, b"ba");
    });

    // The transient connection's disconnect is absorbed, nothing else arrives
    let err = server
        .receive(Some(Duration::from_millis(50)))
        .expect_err("nothing left");
    assert!(err.is_timeout());
    assert_eq!(server.stats().disconnects_absorbed, 1);
}

#[test]
fn test_no_block_sends_keep_their_own_results() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "server");
    server.get_or_create_channel().expect("server channel");
    let client = node(&kernel, "client");

    thread::scope(|s| {
        s.spawn(|| serve_reversed(&server, 2));

        let first = client
            .send_no_block(server.pid(), &Message::new(b"one".to_vec()))
            .expect("first no-block send");
        let second = client
            .send_no_block(server.pid(), &Message::new(b"two".to_vec()))
            .expect("second no-block send");
        assert_ne!(first.connection(), second.connection());

        assert_eq!(second.wait(WAIT).expect("second reply").payload, b"owt");
        assert_eq!(first.wait(WAIT).expect("first reply").payload, b"eno");
    });
    assert_eq!(client.stats().no_block_sends, 2);
}

#[test]
fn test_no_block_result_polled() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, _) = pair(&kernel, IpcConfig::default());

    let pending = client
        .send_no_block(server.pid(), &Message::new(b"poll".to_vec()))
        .expect("no-block send");
    assert!(pending.try_result().is_none());

    serve_reversed(&server, 1);
    let mut result = None;
    for _ in 0..500 {
        result = pending.try_result();
        if result.is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let reply = result.expect("worker finished").expect("reply");
    assert_eq!(reply.payload, b"llop");
}

#[test]
fn test_no_block_worker_honours_default_timeout() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "silent");
    server.get_or_create_channel().expect("server channel");
    let client = IpcContext::spawn(
        &kernel,
        "client",
        IpcConfig::new().with_send_timeout(Duration::from_millis(50)),
    );

    // Nobody ever receives on the server channel
    let pending = client
        .send_no_block(server.pid(), &Message::empty())
        .expect("no-block send");
    let err = pending.wait(WAIT).expect_err("worker gives up");
    assert!(matches!(err, Status::Timeout { .. }), "{:?}", err);
}

#[test]
fn test_no_block_send_to_unknown_process_fails_fast() {
    let kernel = LocalKernel::with_defaults();
    let client = node(&kernel, "client");

    let err = client
        .send_no_block(9999, &Message::empty())
        .expect_err("no such process");
    assert!(matches!(err, Status::NoAttach(_)));
}

#[test]
fn test_unblock_absorbed_by_default() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::default());

    thread::scope(|s| {
        let sender = s.spawn(|| {
            client.send(connection, &Message::empty(), Some(Duration::from_millis(50)))
        });
        let (event, _) = server.receive(WAIT).expect("message");
        assert!(matches!(event, Event::Message(_)));
        let err = sender.join().expect("sender thread").expect_err("send times out");
        assert!(err.is_timeout());
    });

    let err = server
        .receive(Some(Duration::from_millis(50)))
        .expect_err("unblock is absorbed");
    assert!(err.is_timeout());
    assert_eq!(server.stats().unblocks_absorbed, 1);
}

#[test]
fn test_unblock_surfaced_when_configured() {
    let kernel = LocalKernel::with_defaults();
    let (server, client, connection) = pair(&kernel, IpcConfig::new().with_system_pulses(true));

    thread::scope(|s| {
        let sender = s.spawn(|| {
            client.send(connection, &Message::empty(), Some(Duration::from_millis(50)))
        });
        let (_, handle) = server.receive(WAIT).expect("message");
        sender.join().expect("sender thread").expect_err("send times out");

        let (event, _) = server.receive(WAIT).expect("unblock pulse");
        let Event::Pulse { code, sender_value } = event else {
            panic!("expected a pulse, got {:?}", event);
        };
        assert_eq!(code, PulseCode::Unblock);
        assert_eq!(handle, ReplyHandle::Message(i64::from(sender_value)));

        // The sender is gone, so the late reply fails
        assert!(server.reply(handle, &Message::empty()).is_err());
    });
}

#[test]
fn test_coid_death_surfaced_when_configured() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "server");
    server.get_or_create_channel().expect("server channel");
    let client = IpcContext::spawn(&kernel, "client", IpcConfig::new().with_system_pulses(true));
    client.get_or_create_channel().expect("client channel");
    let (_, connection) = client.find_connection(server.pid()).expect("find server");

    kernel.terminate(server.pid()).expect("terminate server");

    let (event, _) = client.receive(WAIT).expect("coid death pulse");
    assert_eq!(
        event,
        Event::Pulse {
            code: PulseCode::CoidDeath,
            sender_value: connection.coid()
        }
    );
}

#[test]
fn test_coid_death_absorbed_by_default() {
    let kernel = LocalKernel::with_defaults();
    let server = node(&kernel, "server");
    server.get_or_create_channel().expect("server channel");
    let client = node(&kernel, "client");
    client.get_or_create_channel().expect("client channel");
    client.find_connection(server.pid()).expect("find server");

    kernel.terminate(server.pid()).expect("terminate server");

    let err = client
        .receive(Some(Duration::from_millis(50)))
        .expect_err("coid death is absorbed");
    assert!(err.is_timeout());
    assert_eq!(client.stats().coid_deaths_absorbed, 1);
}

/*!
 * Resource Manager Tests
 * A scratch device driven through the client API
 */

use nix::errno::Errno;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tcs_ipc::{
    ControlReply, DeviceHandlers, DeviceState, IpcConfig, IpcContext, LocalKernel, Message, Ocb,
    Origin, PulseCode, ResourceManager, ResourceRequest, Status,
};

/// Control code: echo the input reversed, `ret_val` is its length
const ECHO_REVERSED: i32 = 1;
/// Control code: return 16 bytes regardless of capacity
const DUMP: i32 = 2;
/// Opens with this flag are refused
const FORBIDDEN_IOFLAG: u32 = 0xdead;

#[derive(Default)]
struct Scratch {
    contents: Vec<u8>,
    closes: Arc<AtomicUsize>,
}

impl Scratch {
    fn with_contents(contents: &[u8]) -> Self {
        Self {
            contents: contents.to_vec(),
            ..Default::default()
        }
    }
}

impl DeviceHandlers for Scratch {
    fn open(&mut self, _path: &str, ioflag: u32, _origin: &Origin) -> Result<(), Errno> {
        if ioflag == FORBIDDEN_IOFLAG {
            return Err(Errno::EACCES);
        }
        Ok(())
    }

    fn close(&mut self, _ocb: &Ocb, _origin: &Origin) -> Result<(), Errno> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, ocb: &Ocb, length: usize) -> Result<Vec<u8>, Errno> {
        let start = (ocb.offset as usize).min(self.contents.len());
        let end = start.saturating_add(length).min(self.contents.len());
        Ok(self.contents[start..end].to_vec())
    }

    fn write(&mut self, ocb: &Ocb, bytes: &[u8]) -> Result<usize, Errno> {
        let start = ocb.offset as usize;
        if self.contents.len() < start + bytes.len() {
            self.contents.resize(start + bytes.len(), 0);
        }
        self.contents[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn control(
        &mut self,
        _ocb: &Ocb,
        code: i32,
        input: &[u8],
        _out_capacity: usize,
    ) -> Result<ControlReply, Errno> {
        match code {
            ECHO_REVERSED => {
                let out: Vec<u8> = input.iter().rev().copied().collect();
                Ok(ControlReply::new(out.len() as i32, out))
            }
            DUMP => Ok(ControlReply::new(16, (0..16).collect())),
            _ => Err(Errno::ENOTTY),
        }
    }
}

fn register(kernel: &Arc<LocalKernel>, handlers: Scratch) -> ResourceManager<Scratch> {
    let node = IpcContext::spawn(kernel, "scratch-node", IpcConfig::default());
    ResourceManager::register_device(&node, "scratch", handlers).expect("register device")
}

fn client(kernel: &Arc<LocalKernel>) -> IpcContext {
    IpcContext::spawn(
        kernel,
        "client",
        IpcConfig::new().with_send_timeout(Duration::from_secs(5)),
    )
}

/// Run the device loop while `body` drives it from this thread
fn serve<H: DeviceHandlers, R>(device: &mut ResourceManager<H>, body: impl FnOnce() -> R) -> R {
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        let server = s.spawn(|| device.run(&stop));
        let result = body();
        stop.store(true, Ordering::Release);
        server
            .join()
            .expect("device thread")
            .expect("device loop");
        result
    })
}

#[test]
fn test_read_write_report_counts() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    assert_eq!(device.path(), "/dev/scratch");
    let client = client(&kernel);

    serve(&mut device, || {
        let mut writer = client.open_device("/dev/scratch", 0).expect("open writer");
        assert_eq!(writer.write(b"hello world").expect("write"), 11);
        // Offset moved past the write
        assert_eq!(writer.read(4).expect("read at end"), b"");

        let mut reader = client.open_device("/dev/scratch", 0).expect("open reader");
        assert_eq!(reader.read(5).expect("first read"), b"hello");
        assert_eq!(reader.read(100).expect("second read"), b" world");
        assert_eq!(reader.read(10).expect("read at end"), b"");

        writer.close().expect("close writer");
        reader.close().expect("close reader");
    });

    assert_eq!(device.open_count(), 0);
    assert_eq!(device.handlers().closes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_control_output_truncated_to_capacity() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    let client = client(&kernel);

    serve(&mut device, || {
        let mut file = client.open_device("/dev/scratch", 0).expect("open");

        let echo = file.control(ECHO_REVERSED, b"abc", 8).expect("echo");
        assert_eq!(echo, ControlReply::new(3, b"cba".to_vec()));

        let dump = file.control(DUMP, &[], 4).expect("dump");
        assert_eq!(dump.ret_val, 16);
        assert_eq!(dump.out, vec![0, 1, 2, 3]);

        let err = file.control(99, &[], 0).expect_err("unknown code");
        assert!(matches!(err, Status::DeviceControlError(_)));
        assert_eq!(err.errno(), Some(Errno::ENOTTY));
    });
}

/// Handlers that hand back more than asked and claim more than they took
#[derive(Default)]
struct Overeager {
    contents: Vec<u8>,
}

impl DeviceHandlers for Overeager {
    fn read(&mut self, ocb: &Ocb, _length: usize) -> Result<Vec<u8>, Errno> {
        let start = (ocb.offset as usize).min(self.contents.len());
        Ok(self.contents[start..].to_vec())
    }

    fn write(&mut self, _ocb: &Ocb, bytes: &[u8]) -> Result<usize, Errno> {
        self.contents.extend_from_slice(bytes);
        Ok(bytes.len() + 10)
    }
}

#[test]
fn test_counts_clamped_to_request() {
    let kernel = LocalKernel::with_defaults();
    let node = IpcContext::spawn(&kernel, "overeager-node", IpcConfig::default());
    let mut device =
        ResourceManager::register_device(&node, "overeager", Overeager::default()).expect("register");
    let client = client(&kernel);

    serve(&mut device, || {
        let mut writer = client.open_device("/dev/overeager", 0).expect("open writer");
        assert_eq!(writer.write(b"abc").expect("write"), 3);
        assert_eq!(writer.write(b"def").expect("write"), 3);
        writer.close().expect("close writer");

        let mut reader = client.open_device("/dev/overeager", 0).expect("open reader");
        assert_eq!(reader.read(2).expect("short read"), b"ab");
        // Offset moved by what was returned, not by what the handler produced
        assert_eq!(reader.read(3).expect("next read"), b"cde");
        assert_eq!(reader.read(10).expect("tail"), b"f");
        reader.close().expect("close reader");
    });
    assert_eq!(device.handlers().contents, b"abcdef");
}

#[test]
fn test_default_handlers_report_enosys() {
    struct Inert;
    impl DeviceHandlers for Inert {}

    let kernel = LocalKernel::with_defaults();
    let node = IpcContext::spawn(&kernel, "inert-node", IpcConfig::default());
    let mut device = ResourceManager::register_device(&node, "inert", Inert).expect("register");
    let client = client(&kernel);

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        let server = s.spawn(|| device.run(&stop));

        let mut file = client.open_device("/dev/inert", 0).expect("open");
        let err = file.read(8).expect_err("no read handler");
        assert!(matches!(err, Status::MessageReadError(_)));
        assert_eq!(err.errno(), Some(Errno::ENOSYS));
        let err = file.write(b"x").expect_err("no write handler");
        assert!(matches!(err, Status::MessageWriteError(_)));
        assert_eq!(err.errno(), Some(Errno::ENOSYS));
        file.close().expect("close");

        stop.store(true, Ordering::Release);
        server.join().expect("device thread").expect("device loop");
    });
}

#[test]
fn test_dup_starts_from_source_offset() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::with_contents(b"0123456789"));
    let client = client(&kernel);

    let original = serve(&mut device, || {
        let mut original = client.open_device("/dev/scratch", 0).expect("open");
        assert_eq!(original.read(4).expect("read"), b"0123");

        let mut copy = original.dup().expect("dup");
        assert_ne!(copy.connection(), original.connection());
        assert_eq!(copy.read(3).expect("read copy"), b"456");
        assert_eq!(original.read(2).expect("read original"), b"45");

        copy.close().expect("close copy");
        original
    });
    assert_eq!(device.open_count(), 1);

    serve(&mut device, || original.close().expect("close original"));
    assert_eq!(device.open_count(), 0);
}

#[test]
fn test_open_rejections() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    let client = client(&kernel);

    serve(&mut device, || {
        let err = client
            .open_device("/dev/scratch", FORBIDDEN_IOFLAG)
            .expect_err("refused by the device");
        assert!(matches!(err, Status::FileError(_)));
        assert_eq!(err.errno(), Some(Errno::EACCES));
    });

    let err = client.open_device("/dev/missing", 0).expect_err("no such device");
    assert!(matches!(err, Status::FileError(_)));
    assert_eq!(err.errno(), Some(Errno::ENOENT));
    assert_eq!(device.open_count(), 0);
}

#[test]
fn test_client_death_closes_its_open() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    let client = client(&kernel);

    let file = serve(&mut device, || client.open_device("/dev/scratch", 0).expect("open"));
    assert_eq!(device.open_count(), 1);

    kernel.terminate(client.pid()).expect("terminate client");
    let err = device
        .receive_request(Some(Duration::from_millis(50)))
        .expect_err("only a disconnect is pending");
    assert!(err.is_timeout());

    assert_eq!(device.open_count(), 0);
    assert_eq!(device.handlers().closes.load(Ordering::SeqCst), 1);
    drop(file);
}

#[test]
fn test_client_cannot_forge_disconnect() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::with_contents(b"abcdef"));
    let client = client(&kernel);

    serve(&mut device, || {
        let mut file = client.open_device("/dev/scratch", 0).expect("open");
        assert_eq!(file.read(2).expect("read"), b"ab");

        let err = client
            .send_pulse(file.connection(), PulseCode::Disconnect, 0)
            .expect_err("kernel code");
        assert_eq!(err.errno(), Some(Errno::EINVAL));

        // The open survives with its offset
        assert_eq!(file.read(2).expect("read after"), b"cd");
        file.close().expect("close");
    });
    assert_eq!(device.handlers().closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_two_step_dispatch() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    assert_eq!(device.state(), DeviceState::Registered);
    let client = client(&kernel);

    thread::scope(|s| {
        let opener = s.spawn(|| client.open_device("/dev/scratch", 0o2));

        let request = device
            .receive_request(Some(Duration::from_secs(5)))
            .expect("open request");
        assert_eq!(device.state(), DeviceState::Dispatching);
        let ResourceRequest::Open { ref path, ioflag, .. } = request else {
            panic!("expected an open, got {:?}", request);
        };
        assert_eq!(path, "/dev/scratch");
        assert_eq!(ioflag, 0o2);
        assert_eq!(request.origin().pid, client.pid());

        device.dispatch(request).expect("dispatch");
        assert_eq!(device.state(), DeviceState::AwaitingRequest);

        let file = opener.join().expect("opener thread").expect("open");
        assert_eq!(file.path(), "/dev/scratch");
        assert_eq!(device.open_count(), 1);

        let closer = s.spawn(move || file.close());
        device
            .handle_next(Some(Duration::from_secs(5)))
            .expect("close request");
        closer.join().expect("closer thread").expect("close");
    });
    assert_eq!(device.open_count(), 0);
}

#[test]
fn test_plain_message_to_device_rejected() {
    let kernel = LocalKernel::with_defaults();
    let mut device = register(&kernel, Scratch::default());
    let client = client(&kernel);

    serve(&mut device, || {
        let (_, connection) = client.find_connection(device_pid(&kernel)).expect("find device");
        let err = client
            .send(connection, &Message::new(b"raw".to_vec()), None)
            .expect_err("not a device request");
        assert_eq!(err.errno(), Some(Errno::ENOSYS));
    });
}

#[test]
fn test_unregister_withdraws_path() {
    let kernel = LocalKernel::with_defaults();
    let device = register(&kernel, Scratch::default());
    let client = client(&kernel);

    device.unregister().expect("unregister");
    let err = client.open_device("/dev/scratch", 0).expect_err("withdrawn");
    assert_eq!(err.errno(), Some(Errno::ENOENT));
}

/// Pid of the process serving `/dev/scratch`
fn device_pid(kernel: &Arc<LocalKernel>) -> u32 {
    use tcs_ipc::IpcBackend;
    kernel.path_resolve("/dev/scratch").expect("device registered").0
}

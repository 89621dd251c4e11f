#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use unflink::config::LinkSettings;
use unflink::device::{BootSettings, CartType, DeviceError, DeviceResult, ProtocolVer, Session, UploadHandle, UsbDataType};
use unflink::protocol::Packet;
use unflink::serial::{Connector, PortIo};
use unflink::transport::{DeviceProbe, Transport};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Smallest chunk size the settings accept, so small ROMs still span chunks
pub const TEST_CHUNK: u32 = 0x1000;

pub fn test_settings() -> LinkSettings {
    LinkSettings {
        upload_chunk_size: TEST_CHUNK,
        poll_interval_ms: 1,
        reset_timeout_ms: 50,
        ..Default::default()
    }
}

#[derive(Default)]
pub struct MockState {
    pub open: bool,
    pub opens: u32,
    pub closes: u32,
    pub fail_open: Option<DeviceError>,
    pub begun: Option<(u32, BootSettings)>,
    pub written: Vec<u8>,
    pub chunks: usize,
    pub finished: Option<BootSettings>,
    pub cancel_after: Option<(usize, UploadHandle)>,
    pub sent: Vec<(UsbDataType, Vec<u8>, ProtocolVer)>,
    pub inbound: VecDeque<Packet>,
}

pub type Shared = Arc<Mutex<MockState>>;

pub struct MockTransport {
    cart: CartType,
    state: Shared,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn cart_type(&self) -> CartType {
        self.cart
    }

    async fn open(&mut self) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.fail_open {
            return Err(e);
        }
        if state.open {
            return Err(DeviceError::UsbBusy);
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    async fn begin_upload(&mut self, size: u32, boot: &BootSettings) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.begun = Some((size, *boot));
        state.written.clear();
        state.chunks = 0;
        Ok(())
    }

    async fn write_rom(&mut self, offset: u32, chunk: &[u8]) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        assert_eq!(offset as usize, state.written.len());
        state.written.extend_from_slice(chunk);
        state.chunks += 1;
        if let Some((after, handle)) = &state.cancel_after {
            if state.chunks == *after {
                handle.cancel();
            }
        }
        Ok(())
    }

    async fn finish_upload(&mut self, boot: &BootSettings) -> DeviceResult<()> {
        self.state.lock().unwrap().finished = Some(*boot);
        Ok(())
    }

    async fn send_data(&mut self, kind: UsbDataType, payload: &[u8], protocol: ProtocolVer) -> DeviceResult<()> {
        self.state.lock().unwrap().sent.push((kind, payload.to_vec(), protocol));
        Ok(())
    }

    async fn receive_data(&mut self, _protocol: ProtocolVer) -> DeviceResult<Option<Packet>> {
        Ok(self.state.lock().unwrap().inbound.pop_front())
    }
}

/// Probe that "finds" one cart of a fixed family, or nothing
pub struct MockProbe {
    cart: Option<CartType>,
    state: Shared,
}

#[async_trait::async_trait]
impl DeviceProbe for MockProbe {
    async fn find(&mut self, preferred: CartType) -> DeviceResult<Box<dyn Transport>> {
        match self.cart {
            Some(cart) if preferred == CartType::None || preferred == cart => Ok(Box::new(MockTransport {
                cart,
                state: self.state.clone(),
            })),
            _ => Err(DeviceError::NotCart),
        }
    }
}

pub fn mock_probe(cart: Option<CartType>) -> (Box<dyn DeviceProbe>, Shared) {
    let state = Shared::default();
    let probe = MockProbe { cart, state: state.clone() };
    (Box::new(probe), state)
}

pub fn mock_session(cart: Option<CartType>) -> (Session, Shared) {
    let (probe, state) = mock_probe(cart);
    (Session::with_settings(probe, test_settings()).unwrap(), state)
}

/// Session that has been initialized, found and opened on a mock cart
pub async fn open_session(cart: CartType) -> (Session, Shared) {
    init_logging();
    let (mut session, state) = mock_session(Some(cart));
    session.initialize().await;
    session.find().await.unwrap();
    session.open().await.unwrap();
    (session, state)
}

/// Scripted serial link: reads are served from `rx`, writes land in `tx`.
/// DSR mirrors DTR unless `dsr_stuck` pins it.
#[derive(Default)]
pub struct PortScript {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub dtr: bool,
    pub dsr_stuck: Option<bool>,
    pub clears: u32,
    pub connects: u32,
}

impl PortScript {
    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }
}

pub struct MockPort {
    script: Arc<Mutex<PortScript>>,
}

impl PortIo for MockPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.script.lock().unwrap().tx.extend_from_slice(data);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.rx.len() < buf.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "script exhausted"));
        }
        for b in buf.iter_mut() {
            *b = script.rx.pop_front().unwrap();
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.script.lock().unwrap().rx.len() as u32)
    }

    fn clear(&mut self) -> io::Result<()> {
        // scripted replies must survive the purge issued at open
        self.script.lock().unwrap().clears += 1;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.script.lock().unwrap().dtr = level;
        Ok(())
    }

    fn dsr(&mut self) -> io::Result<bool> {
        let script = self.script.lock().unwrap();
        Ok(script.dsr_stuck.unwrap_or(script.dtr))
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

pub fn scripted_port() -> (Connector, Arc<Mutex<PortScript>>) {
    let script = Arc::new(Mutex::new(PortScript::default()));
    let handle = script.clone();
    let connector: Connector = Box::new(move || {
        handle.lock().unwrap().connects += 1;
        Ok(Box::new(MockPort { script: handle.clone() }) as Box<dyn PortIo>)
    });
    (connector, script)
}

/// `CMP` reply to an SC64 command
pub fn sc64_reply(id: u8, data: &[u8]) -> Vec<u8> {
    sc64_frame(b"CMP", id, data)
}

pub fn sc64_frame(tag: &[u8; 3], id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(tag);
    out.push(id);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Replies an SC64 running firmware `major.minor.0` gives during open
pub fn sc64_handshake(major: u16, minor: u16) -> Vec<u8> {
    let mut version = Vec::new();
    version.extend_from_slice(&major.to_be_bytes());
    version.extend_from_slice(&minor.to_be_bytes());
    version.extend_from_slice(&0u32.to_be_bytes());

    let mut out = sc64_reply(b'v', b"SCv2");
    out.extend(sc64_reply(b'V', &version));
    out
}

/// Big-endian ROM image with a valid header magic and zeroed bootcode
pub fn z64_rom(size: usize) -> Vec<u8> {
    let mut rom = vec![0u8; size];
    rom[..4].copy_from_slice(&[0x80, 0x37, 0x12, 0x40]);
    for (i, b) in rom.iter_mut().enumerate().skip(0x1000) {
        *b = (i % 251) as u8;
    }
    rom
}

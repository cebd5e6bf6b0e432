use crate::consts::{self, InIdx, OutIdx};
use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::{debug, info, warn};

/// Digital IO collaborator used by the control loop.
pub trait DigitalIo {
    /// Latest raw level of an input (true = high). Must not block.
    fn read(&self, input: InIdx) -> bool;
    /// Drive an output high or low. Must not block.
    fn write(&mut self, output: OutIdx, high: bool);
}

/// In-memory IO, used by tests.
#[derive(Debug, Default)]
pub struct MemoryIo {
    inputs: u16,
    outputs: HashMap<OutIdx, bool>,
}

impl MemoryIo {
    /// All inputs start at the given level.
    pub fn new(level: bool) -> Self {
        Self {
            inputs: if level { u16::MAX } else { 0 },
            outputs: HashMap::new(),
        }
    }

    pub fn set_input(&mut self, input: InIdx, high: bool) {
        if input >= consts::INPUT_COUNT {
            return;
        }
        if high {
            self.inputs |= 1 << input;
        } else {
            self.inputs &= !(1 << input);
        }
    }

    /// Last level written to the output; None if never driven.
    pub fn output(&self, output: OutIdx) -> Option<bool> {
        self.outputs.get(&output).copied()
    }
}

impl DigitalIo for MemoryIo {
    fn read(&self, input: InIdx) -> bool {
        level_of(self.inputs, input)
    }

    fn write(&mut self, output: OutIdx, high: bool) {
        self.outputs.insert(output, high);
    }
}

fn level_of(mask: u16, input: InIdx) -> bool {
    input < consts::INPUT_COUNT && mask & (1 << input) != 0
}

const PREAMBULE_LENGTH: usize = 2;
/// addr + type + length + 8 bytes of data.
const FRAME_BODY_LENGTH: usize = 3 + 8;
/// Every frame on the wire has the same size.
const FRAME_LENGTH: usize = PREAMBULE_LENGTH + FRAME_BODY_LENGTH;

/// Synchronization byte 1.
const SYNC_BYTE_1: u8 = 0x21; // !
/// Sync byte 2 for 3+8 byte content
const SYNC_BYTE_2: u8 = 0x7C; // |
const PREAMBULE: [u8; PREAMBULE_LENGTH] = [SYNC_BYTE_1, SYNC_BYTE_2];

mod frame_type {
    /// Board -> host: u16 LE bitmask of raw input levels.
    pub const INPUT_LEVELS: u8 = 0x05;
    /// Host -> board: [output, 0 = low / 1 = high]
    pub const SET_OUTPUT: u8 = 0x08;
    /// Host -> board: ask for INPUT_LEVELS.
    pub const REQUEST_STATUS: u8 = 0x0D;
}

/// Single frame exchanged with the IO board.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    addr: u8,
    frame_type: u8,
    length: u8,
    data: [u8; 8],
}

impl Frame {
    fn new(frame_type: u8, data: &[u8]) -> Self {
        debug_assert!(data.len() <= 8, "frame data is at most 8 bytes");
        let length = data.len().min(8);
        let mut frame = Self {
            addr: 0,
            frame_type,
            length: length as u8,
            data: [0; 8],
        };
        frame.data[0..length].copy_from_slice(&data[0..length]);
        frame
    }

    pub fn set_output(output: OutIdx, high: bool) -> Self {
        Self::new(frame_type::SET_OUTPUT, &[output, high as u8])
    }

    pub fn request_status() -> Self {
        Self::new(frame_type::REQUEST_STATUS, &[])
    }

    /// Decode a frame body (without preambule).
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.len() < 3 {
            return None;
        }
        let length = body[2] as usize;
        if length > 8 || body.len() < 3 + length {
            return None;
        }
        let mut frame = Self::new(body[1], &body[3..3 + length]);
        frame.addr = body[0];
        Some(frame)
    }

    /// Encode with preambule, ready for the wire.
    pub fn to_bytes(&self) -> [u8; FRAME_LENGTH] {
        let mut buf = [0u8; FRAME_LENGTH];
        buf[0..PREAMBULE_LENGTH].copy_from_slice(&PREAMBULE);
        buf[2] = self.addr;
        buf[3] = self.frame_type;
        buf[4] = self.length;
        buf[5..5 + self.length as usize].copy_from_slice(&self.data[0..self.length as usize]);
        buf
    }

    /// Input levels bitmask, if this is a level report.
    pub fn input_levels(&self) -> Option<u16> {
        if self.frame_type != frame_type::INPUT_LEVELS || self.length != 2 {
            return None;
        }
        Some(u16::from_le_bytes([self.data[0], self.data[1]]))
    }
}

/// Serial stream codec. Bytes in front of a preambule are dropped, so the
/// stream resynchronizes after noise or a truncated frame.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        loop {
            let Some(start) = src.windows(PREAMBULE_LENGTH).position(|w| w == PREAMBULE) else {
                // A trailing '!' may be the first half of the next preambule.
                let keep = usize::from(src.last() == Some(&SYNC_BYTE_1));
                if src.len() > keep {
                    info!(
                        "Synchronization failed - preambule error. Skipping {:02x?}",
                        &src[..src.len() - keep]
                    );
                    src.advance(src.len() - keep);
                }
                return Ok(None);
            };
            if start > 0 {
                info!(
                    "Synchronization failed - preambule error. Skipping {:02x?}",
                    &src[..start]
                );
                src.advance(start);
            }

            if src.len() < FRAME_LENGTH {
                src.reserve(FRAME_LENGTH - src.len());
                return Ok(None);
            }

            match Frame::from_body(&src[PREAMBULE_LENGTH..FRAME_LENGTH]) {
                Some(frame) => {
                    src.advance(FRAME_LENGTH);
                    return Ok(Some(frame));
                }
                None => {
                    info!("Invalid frame. Skipping {:02x?}", &src[..FRAME_LENGTH]);
                    // Look for the next preambule past this one.
                    src.advance(1);
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.to_bytes());
        Ok(())
    }
}

/// IO board attached over a USB serial port.
pub struct SerialIo {
    levels: watch::Receiver<u16>,
    tx: mpsc::Sender<Frame>,
    pub reader: JoinHandle<anyhow::Result<()>>,
    pub writer: JoinHandle<anyhow::Result<()>>,
}

impl DigitalIo for SerialIo {
    fn read(&self, input: InIdx) -> bool {
        level_of(*self.levels.borrow(), input)
    }

    fn write(&mut self, output: OutIdx, high: bool) {
        if let Err(err) = self.tx.try_send(Frame::set_output(output, high)) {
            warn!("Unable to queue output {} change: {}", output, err);
        }
    }
}

async fn reader<R>(port: R, levels: watch::Sender<u16>) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(port, FrameCodec);
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        debug!("USB->RX: {:?}", frame);

        match frame.input_levels() {
            Some(mask) => {
                levels.send_replace(mask);
            }
            None => debug!("Ignoring frame type {:#04x}", frame.frame_type),
        }
    }
    anyhow::bail!("Reader disconnected");
}

async fn writer<W>(port: W, mut channel: mpsc::Receiver<Frame>) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut port = FramedWrite::new(port, FrameCodec);
    while let Some(frame) = channel.recv().await {
        debug!("TX->USB: {:?}", frame);
        if let Err(err) = port.send(frame).await {
            anyhow::bail!("Error while sending to port {:?}", err);
        }
    }
    Ok(())
}

/// Open the serial port, start reader/writer tasks and wait (bounded) for
/// the first level report. Inputs read high until one arrives.
#[tracing::instrument]
pub async fn run(port_name: String, baud_rate: u32) -> anyhow::Result<SerialIo> {
    let builder = tokio_serial::new(port_name, baud_rate);
    let stream = tokio_serial::SerialStream::open(&builder)?;
    let (port_read, port_write) = tokio::io::split(stream);

    let (out_tx, out_rx) = mpsc::channel(15);
    let (levels_tx, mut levels_rx) = watch::channel(u16::MAX);

    let reader_handle = tokio::spawn(reader(port_read, levels_tx));
    let writer_handle = tokio::spawn(writer(port_write, out_rx));

    out_tx.send(Frame::request_status()).await?;
    let first_report = tokio::time::timeout(consts::IO_STARTUP_WAIT, levels_rx.changed()).await;
    match first_report {
        Ok(Ok(())) => info!("Initial input levels {:016b}", *levels_rx.borrow_and_update()),
        Ok(Err(_)) => anyhow::bail!("IO board reader finished before the first report"),
        Err(_) => warn!("No input report from IO board yet, assuming idle levels"),
    }

    Ok(SerialIo {
        levels: levels_rx,
        tx: out_tx,
        reader: reader_handle,
        writer: writer_handle,
    })
}

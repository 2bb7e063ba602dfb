//! Point-to-point message passing between processes.
//!
//! Communication only happens between parallel regions. Messages are byte buffers so that the
//! transport does not need to know the layout of the staged data.
use crossbeam::channel::{unbounded, Receiver, Sender};
use eyre::{bail, ensure, eyre};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Sends a message to `dest`. Must not block on the receiver.
    fn send(&self, dest: usize, message: Vec<u8>) -> eyre::Result<()>;

    /// Receives the next message from `source`, in the order the messages were sent.
    fn recv(&self, source: usize) -> eyre::Result<Vec<u8>>;

    /// Whether the transport can read and write device-resident buffers directly. Otherwise
    /// staged data passes through host memory.
    fn supports_device_buffers(&self) -> bool {
        false
    }
}

/// A communicator for a single process.
#[derive(Debug, Default, Copy, Clone)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _message: Vec<u8>) -> eyre::Result<()> {
        bail!("SerialCommunicator: cannot send to rank {} without peers", dest)
    }

    fn recv(&self, source: usize) -> eyre::Result<Vec<u8>> {
        bail!("SerialCommunicator: cannot receive from rank {} without peers", source)
    }
}

/// In-process communicator simulating one rank per thread over channels.
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
    device_buffers: bool,
}

impl ThreadCommunicator {
    /// Creates one connected communicator per rank.
    pub fn group(size: usize) -> Vec<Self> {
        let channels: Vec<Vec<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>> = (0..size)
            .map(|_| (0..size).map(|_| unbounded()).collect())
            .collect();
        (0..size)
            .map(|rank| Self {
                rank,
                senders: (0..size).map(|dest| channels[rank][dest].0.clone()).collect(),
                receivers: (0..size)
                    .map(|source| channels[source][rank].1.clone())
                    .collect(),
                device_buffers: false,
            })
            .collect()
    }

    pub fn with_device_buffers(mut self, device_buffers: bool) -> Self {
        self.device_buffers = device_buffers;
        self
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, message: Vec<u8>) -> eyre::Result<()> {
        let sender = self
            .senders
            .get(dest)
            .ok_or_else(|| eyre!("ThreadCommunicator: rank {} does not exist", dest))?;
        sender
            .send(message)
            .map_err(|_| eyre!("ThreadCommunicator: rank {} hung up", dest))
    }

    fn recv(&self, source: usize) -> eyre::Result<Vec<u8>> {
        let receiver = self
            .receivers
            .get(source)
            .ok_or_else(|| eyre!("ThreadCommunicator: rank {} does not exist", source))?;
        receiver
            .recv()
            .map_err(|_| eyre!("ThreadCommunicator: rank {} hung up", source))
    }

    fn supports_device_buffers(&self) -> bool {
        self.device_buffers
    }
}

pub fn encode_u64s(values: impl IntoIterator<Item = u64>) -> Vec<u8> {
    values.into_iter().flat_map(u64::to_le_bytes).collect()
}

pub fn decode_u64s(bytes: &[u8]) -> eyre::Result<Vec<u64>> {
    ensure!(bytes.len() % 8 == 0, "message length {} is not a multiple of 8", bytes.len());
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect())
}

pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_f64s(bytes: &[u8]) -> eyre::Result<Vec<f64>> {
    Ok(decode_u64s(bytes)?.into_iter().map(f64::from_bits).collect())
}

//! In-memory controller for simulation and tests
//!
//! A [`ControllerImage`] is a shared, mutable process image (data blocks plus
//! marker memory) with fault injection. [`SimulatedController`] reads from it
//! through the normal [`RegisterClient`] seam, and [`SimulatedFleet`] hands out
//! one image per crane id.

use super::register_client::{get_bool, get_int, set_bool, set_int, BlockId, ClientFactory, RegisterClient, RegisterError};
use crate::config::DeviceConfig;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ImageState {
    blocks: HashMap<BlockId, Vec<u8>>,
    online: bool,
    fail_connects: u32,
    fail_reads: u32,
    stall_reads: u32,
    panic_reads: u32,
    failing_blocks: HashSet<BlockId>,
    connect_attempts: u64,
    read_attempts: u64,
}

/// Shared process image of one simulated controller.
#[derive(Debug, Clone)]
pub struct ControllerImage {
    inner: Arc<Mutex<ImageState>>,
}

impl Default for ControllerImage {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerImage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ImageState {
                blocks: HashMap::new(),
                online: true,
                fail_connects: 0,
                fail_reads: 0,
                stall_reads: 0,
                panic_reads: 0,
                failing_blocks: HashSet::new(),
                connect_attempts: 0,
                read_attempts: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ImageState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_int(&self, block: BlockId, byte: u32, value: i16) {
        let mut state = self.lock();
        set_int(state.blocks.entry(block).or_default(), byte as usize, value);
    }

    pub fn set_bit(&self, block: BlockId, byte: u32, bit: u8, value: bool) {
        let mut state = self.lock();
        set_bool(state.blocks.entry(block).or_default(), byte as usize, bit, value);
    }

    pub fn int(&self, block: BlockId, byte: u32) -> i16 {
        let state = self.lock();
        state
            .blocks
            .get(&block)
            .and_then(|b| get_int(b, byte as usize))
            .unwrap_or(0)
    }

    pub fn bit(&self, block: BlockId, byte: u32, bit: u8) -> bool {
        let state = self.lock();
        state
            .blocks
            .get(&block)
            .and_then(|b| get_bool(b, byte as usize, bit))
            .unwrap_or(false)
    }

    /// Take the controller off the network (connects and reads fail).
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.lock().fail_reads = count;
    }

    /// The next `count` reads never complete.
    pub fn stall_next_reads(&self, count: u32) {
        self.lock().stall_reads = count;
    }

    /// The next `count` reads panic inside the client, as a driver bug would.
    pub fn panic_next_reads(&self, count: u32) {
        self.lock().panic_reads = count;
    }

    /// Make every read of `block` fail until cleared.
    pub fn fail_block(&self, block: BlockId, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_blocks.insert(block);
        } else {
            state.failing_blocks.remove(&block);
        }
    }

    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    pub fn read_attempts(&self) -> u64 {
        self.lock().read_attempts
    }
}

enum ReadPlan {
    Data(Vec<u8>),
    Fail(String),
    Offline,
    Stall,
    Panic,
}

/// [`RegisterClient`] backed by a [`ControllerImage`].
pub struct SimulatedController {
    image: ControllerImage,
    connected: bool,
}

impl SimulatedController {
    pub fn new(image: ControllerImage) -> Self {
        Self {
            image,
            connected: false,
        }
    }

    fn plan_read(&self, block: BlockId, offset: u32, length: usize) -> ReadPlan {
        let mut state = self.image.lock();
        state.read_attempts += 1;

        if !state.online {
            return ReadPlan::Offline;
        }
        if state.panic_reads > 0 {
            state.panic_reads -= 1;
            return ReadPlan::Panic;
        }
        if state.stall_reads > 0 {
            state.stall_reads -= 1;
            return ReadPlan::Stall;
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return ReadPlan::Fail("injected read failure".to_string());
        }
        if state.failing_blocks.contains(&block) {
            return ReadPlan::Fail(format!("{} not accessible", block));
        }

        let start = offset as usize;
        let mut out = vec![0u8; length];
        if let Some(data) = state.blocks.get(&block) {
            for (i, byte) in out.iter_mut().enumerate() {
                if let Some(v) = data.get(start + i) {
                    *byte = *v;
                }
            }
        }
        ReadPlan::Data(out)
    }
}

#[async_trait]
impl RegisterClient for SimulatedController {
    async fn connect(&mut self, address: &str, _rack: u16, _slot: u16) -> Result<(), RegisterError> {
        let mut state = self.image.lock();
        state.connect_attempts += 1;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(RegisterError::ConnectionFailed {
                address: address.to_string(),
                message: "injected connect failure".to_string(),
            });
        }
        if !state.online {
            return Err(RegisterError::ConnectionFailed {
                address: address.to_string(),
                message: "controller unreachable".to_string(),
            });
        }

        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_block(&mut self, block: BlockId, offset: u32, length: usize) -> Result<Vec<u8>, RegisterError> {
        if !self.connected {
            return Err(RegisterError::NotConnected);
        }

        // Lock is released before any await.
        match self.plan_read(block, offset, length) {
            ReadPlan::Data(data) => Ok(data),
            ReadPlan::Fail(message) => Err(RegisterError::ReadFailed {
                block,
                offset,
                length,
                message,
            }),
            ReadPlan::Offline => {
                self.connected = false;
                Err(RegisterError::ReadFailed {
                    block,
                    offset,
                    length,
                    message: "connection reset by peer".to_string(),
                })
            }
            ReadPlan::Panic => panic!("injected controller panic reading {block}"),
            ReadPlan::Stall => {
                std::future::pending::<()>().await;
                Err(RegisterError::NotConnected)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn client_name(&self) -> &str {
        "simulated"
    }
}

/// Hands out one shared [`ControllerImage`] per crane id.
#[derive(Debug, Default)]
pub struct SimulatedFleet {
    images: Mutex<HashMap<String, ControllerImage>>,
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image for `device_id`, created on first use.
    pub fn image(&self, device_id: &str) -> ControllerImage {
        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        images.entry(device_id.to_string()).or_default().clone()
    }
}

impl ClientFactory for SimulatedFleet {
    type Client = SimulatedController;

    fn create(&self, device: &DeviceConfig) -> SimulatedController {
        SimulatedController::new(self.image(&device.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_past_written_data_are_zero() {
        let image = ControllerImage::new();
        image.set_int(BlockId::DataBlock(57), 8, 250);

        let mut client = SimulatedController::new(image.clone());
        client.connect("sim", 0, 2).await.unwrap();

        let data = client.read_block(BlockId::DataBlock(57), 8, 4).await.unwrap();
        assert_eq!(data, vec![0x00, 0xFA, 0x00, 0x00]);

        let empty = client.read_block(BlockId::DataBlock(99), 0, 3).await.unwrap();
        assert_eq!(empty, vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let image = ControllerImage::new();
        let mut client = SimulatedController::new(image.clone());
        client.connect("sim", 0, 2).await.unwrap();

        image.fail_next_reads(1);
        assert!(client.read_block(BlockId::Marker, 103, 1).await.is_err());
        assert!(client.read_block(BlockId::Marker, 103, 1).await.is_ok());
        assert_eq!(image.read_attempts(), 2);
    }

    #[tokio::test]
    async fn test_offline_drops_connection() {
        let image = ControllerImage::new();
        let mut client = SimulatedController::new(image.clone());
        client.connect("sim", 0, 2).await.unwrap();

        image.set_online(false);
        assert!(client.read_block(BlockId::DataBlock(57), 8, 2).await.is_err());
        assert!(!client.is_connected());
        assert!(client.connect("sim", 0, 2).await.is_err());
    }

    #[test]
    fn test_fleet_shares_image_per_device() {
        let fleet = SimulatedFleet::new();
        fleet.image("A").set_int(BlockId::DataBlock(57), 8, 42);
        assert_eq!(fleet.image("A").int(BlockId::DataBlock(57), 8), 42);
        assert_eq!(fleet.image("B").int(BlockId::DataBlock(57), 8), 0);
    }
}

//! Per-crane connection lifecycle
//!
//! `DeviceSession` wraps a [`RegisterClient`] with time-bounded connects and
//! reads plus typed accessors for the configured register map. It never retries:
//! any error means the session is dead and the worker decides when to reconnect.

use super::register_client::{get_bool, get_int, BlockId, RegisterAddress, RegisterClient, RegisterError};
use crate::config::DeviceConfig;
use std::time::Duration;

/// Connection health counters for one crane.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    /// Successful connects
    pub connects: u64,
    /// Failed or timed-out connects
    pub connect_failures: u64,
    /// Successful block reads
    pub reads: u64,
    /// Failed block reads (including timeouts)
    pub read_failures: u64,
    /// Connect or read attempts that hit their deadline
    pub timeouts: u64,
}

/// One crane's register session.
pub struct DeviceSession<C: RegisterClient> {
    device: DeviceConfig,
    client: C,
    connect_timeout: Duration,
    read_timeout: Duration,
    stats: SessionStats,
}

impl<C: RegisterClient> DeviceSession<C> {
    pub fn new(device: DeviceConfig, client: C, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            device,
            client,
            connect_timeout,
            read_timeout,
            stats: SessionStats::default(),
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn client_name(&self) -> &str {
        self.client.client_name()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Open the session within the connect timeout.
    pub async fn connect(&mut self) -> Result<(), RegisterError> {
        let address = self.device.address.clone();
        let result = tokio::time::timeout(
            self.connect_timeout,
            self.client.connect(&address, self.device.rack, self.device.slot),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                self.stats.connects += 1;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.connect_failures += 1;
                self.client.disconnect().await;
                Err(e)
            }
            Err(_) => {
                self.stats.connect_failures += 1;
                self.stats.timeouts += 1;
                self.client.disconnect().await;
                Err(RegisterError::ConnectTimeout {
                    address,
                    timeout_ms: duration_ms(self.connect_timeout),
                })
            }
        }
    }

    /// Liveness as reported by the transport. No I/O.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Read raw bytes within the read timeout. A short read is an error.
    pub async fn read_block(&mut self, block: BlockId, offset: u32, length: usize) -> Result<Vec<u8>, RegisterError> {
        let result = tokio::time::timeout(self.read_timeout, self.client.read_block(block, offset, length)).await;

        let outcome = match result {
            Ok(Ok(data)) if data.len() < length => Err(RegisterError::ShortRead {
                block,
                offset,
                expected: length,
                actual: data.len(),
            }),
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.stats.timeouts += 1;
                Err(RegisterError::ReadTimeout {
                    block,
                    offset,
                    timeout_ms: duration_ms(self.read_timeout),
                })
            }
        };

        match outcome {
            Ok(data) => {
                self.stats.reads += 1;
                Ok(data)
            }
            Err(e) => {
                self.stats.read_failures += 1;
                Err(e)
            }
        }
    }

    /// Read the 16-bit signed integer at `address`.
    pub async fn read_int(&mut self, address: &RegisterAddress) -> Result<i16, RegisterError> {
        let data = self.read_block(address.block(), address.byte, 2).await?;
        get_int(&data, 0).ok_or(RegisterError::ShortRead {
            block: address.block(),
            offset: address.byte,
            expected: 2,
            actual: data.len(),
        })
    }

    /// Read the boolean at `address` (byte + bit).
    pub async fn read_bit(&mut self, address: &RegisterAddress) -> Result<bool, RegisterError> {
        let data = self.read_block(address.block(), address.byte, 1).await?;
        get_bool(&data, 0, address.bit).ok_or(RegisterError::ShortRead {
            block: address.block(),
            offset: address.byte,
            expected: 1,
            actual: data.len(),
        })
    }

    /// Release the session. Idempotent.
    pub async fn disconnect(&mut self) {
        self.client.disconnect().await;
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::simulated::{ControllerImage, SimulatedController};

    fn device() -> DeviceConfig {
        DeviceConfig {
            id: "RMG_01".to_string(),
            address: "10.0.0.1".to_string(),
            rack: 0,
            slot: 2,
        }
    }

    fn session(image: &ControllerImage) -> DeviceSession<SimulatedController> {
        DeviceSession::new(
            device(),
            SimulatedController::new(image.clone()),
            Duration::from_secs(5),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_connect_and_typed_reads() {
        let image = ControllerImage::new();
        image.set_int(BlockId::DataBlock(57), 8, -320);
        image.set_bit(BlockId::DataBlock(58), 185, 1, true);

        let mut s = session(&image);
        assert!(!s.is_connected());
        s.connect().await.unwrap();
        assert!(s.is_connected());

        let order = s.read_int(&RegisterAddress::db_word(57, 8)).await.unwrap();
        assert_eq!(order, -320);
        let locked = s.read_bit(&RegisterAddress::db_bit(58, 185, 1)).await.unwrap();
        assert!(locked);

        assert_eq!(s.stats().connects, 1);
        assert_eq!(s.stats().reads, 2);
    }

    #[tokio::test]
    async fn test_read_without_connect_fails() {
        let image = ControllerImage::new();
        let mut s = session(&image);
        let err = s.read_int(&RegisterAddress::db_word(57, 8)).await.unwrap_err();
        assert!(matches!(err, RegisterError::NotConnected));
        assert_eq!(s.stats().read_failures, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_counted() {
        let image = ControllerImage::new();
        image.fail_next_connects(1);
        let mut s = session(&image);

        assert!(s.connect().await.unwrap_err().is_connection_error());
        assert!(!s.is_connected());
        s.connect().await.unwrap();
        assert_eq!(s.stats().connect_failures, 1);
        assert_eq!(s.stats().connects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_read_times_out() {
        let image = ControllerImage::new();
        let mut s = session(&image);
        s.connect().await.unwrap();
        image.stall_next_reads(1);

        let err = s.read_int(&RegisterAddress::db_word(57, 8)).await.unwrap_err();
        assert!(matches!(err, RegisterError::ReadTimeout { timeout_ms: 2000, .. }));
        assert_eq!(s.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let image = ControllerImage::new();
        let mut s = session(&image);
        s.connect().await.unwrap();
        s.disconnect().await;
        s.disconnect().await;
        assert!(!s.is_connected());
    }
}

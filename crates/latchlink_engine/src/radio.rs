//! Single-slot access to the device.

use crate::device::DeviceOps;

/// Owns the device and hands out at most one radio exchange per tick.
///
/// Every component reaches the device through [`Radio::exchange`], so the
/// one-exchange-per-tick rule holds no matter which component asks first.
#[derive(Debug)]
pub struct Radio<D> {
    device: D,
    used_this_tick: bool,
    exchanges: u64,
}

impl<D: DeviceOps> Radio<D> {
    /// Wraps a device.
    pub fn new(device: D) -> Self {
        Self {
            device,
            used_this_tick: false,
            exchanges: 0,
        }
    }

    /// Frees the slot for a new tick.
    pub fn begin_tick(&mut self) {
        self.used_this_tick = false;
    }

    /// Whether an exchange is still available this tick.
    pub fn is_free(&self) -> bool {
        !self.used_this_tick
    }

    /// Whether this tick's exchange has been spent.
    pub fn used_this_tick(&self) -> bool {
        self.used_this_tick
    }

    /// Total exchanges since construction.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Runs one exchange, or returns `None` if the slot is taken.
    pub fn exchange<R>(&mut self, op: impl FnOnce(&mut D) -> R) -> Option<R> {
        if self.used_this_tick {
            return None;
        }
        self.used_this_tick = true;
        self.exchanges += 1;
        Some(op(&mut self.device))
    }

    /// The device, for local reads that cost no exchange.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access for local reads such as fetching a filled buffer.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

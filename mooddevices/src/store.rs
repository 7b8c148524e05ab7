//! Storage of the last state pushed to devices

use crate::payload::DeviceState;
use parking_lot::Mutex;

/// Where the bridge keeps what each device was last told
///
/// Device registries live outside this crate; they plug in here.
pub trait DeviceStateStore: Send + Sync {
    fn load(&self) -> DeviceState;
    fn save(&self, state: DeviceState);
}

#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    state: Mutex<DeviceState>,
}

impl MemoryDeviceStore {
    pub fn new(initial: DeviceState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }
}

impl DeviceStateStore for MemoryDeviceStore {
    fn load(&self) -> DeviceState {
        self.state.lock().clone()
    }

    fn save(&self, state: DeviceState) {
        *self.state.lock() = state;
    }
}

// Device registry and lifecycle. Grounded on class_backplane.py's
// `BackPlane`, generalized from its single-threaded "cycle every device
// once per loop iteration" model to one OS thread per device (spec.md §5):
// `run()` here powers the buses on, starts every device on its own thread,
// waits for HALT, powers off, and joins every thread rather than polling a
// `finished` flag -- `JoinHandle::join` already blocks until a thread's
// `run()` returns, so there's nothing left for a flag to report that the
// join doesn't already express.

use std::thread::JoinHandle;
use std::time::Duration;

use crate::bus::{AddressBus, Bus, ControlBus, DataBus, InterruptBus};
use crate::device::{self, interrupts, Device};

pub struct Backplane {
    address_bus: AddressBus,
    data_bus: DataBus,
    control_bus: ControlBus,
    interrupt_bus: InterruptBus,
    devices: Vec<Box<dyn Device>>,
    handles: Vec<JoinHandle<()>>,
}

impl Backplane {
    pub fn new() -> Self {
        let (address_bus, data_bus, control_bus, interrupt_bus) = Bus::buses();
        Backplane {
            address_bus,
            data_bus,
            control_bus,
            interrupt_bus,
            devices: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn address_bus(&self) -> AddressBus {
        self.address_bus.clone()
    }
    pub fn data_bus(&self) -> DataBus {
        self.data_bus.clone()
    }
    pub fn control_bus(&self) -> ControlBus {
        self.control_bus.clone()
    }
    pub fn interrupt_bus(&self) -> InterruptBus {
        self.interrupt_bus.clone()
    }

    /// Registers a device. Overlap between device windows is the builder's
    /// responsibility to warn about (spec.md §4.3); the backplane itself
    /// never refuses a device.
    pub fn add_device(&mut self, device: Box<dyn Device>) {
        self.devices.push(device);
    }

    /// Powers the machine on, starts every registered device on its own
    /// thread, blocks until HALT is observed, powers off, and joins every
    /// device thread before returning.
    pub fn run(mut self) {
        self.control_bus.lock().set_power_on(true);
        log::info!("backplane: {} device(s) starting", self.devices.len());

        for device in self.devices.drain(..) {
            let id = device.id().to_string();
            log::debug!("backplane: starting device {id}");
            self.handles.push(device::spawn(device));
        }

        loop {
            let halted = self.control_bus.lock().test_interrupt(interrupts::HALT);
            if halted {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        log::info!("backplane: HALT observed, powering off");
        self.control_bus.lock().set_power_on(false);

        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("<device>").to_string();
            if let Err(err) = handle.join() {
                log::error!("backplane: device {name} panicked: {err:?}");
            }
        }
        log::info!("backplane: all devices finished");
    }
}

impl Default for Backplane {
    fn default() -> Self {
        Self::new()
    }
}

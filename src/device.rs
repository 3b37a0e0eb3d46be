// Device trait and the shared context every concrete device embeds.
//
// The reference machine expresses this as class inheritance: every device
// extends BaseDevice, which carries the starting address, size, bus handles
// and a log_message helper. Rust has no implementation inheritance, so the
// bases become a DeviceContext each device holds by composition, plus a
// Device trait for the one polymorphic operation the backplane needs: run
// the device's own loop on its own thread.

use std::thread::{self, JoinHandle};

use rand::Rng;

use crate::bus::{AddressBus, Cell, ControlBus, DataBus, InterruptBus};

/// Interrupt line numbers with a fixed machine meaning. Device-specific
/// interrupts are configured separately per spec section 4.1.
///
/// `HALT` is `0` here, not the `9` `class_interrupts.py` assigns it -- a
/// deliberate divergence, not a drift: `interrupt_awaiting` picks the
/// lowest pending number as highest priority, and `0` both avoids colliding
/// with `Option<Cell>`'s `None` sentinel used elsewhere for "no interrupt"
/// and keeps HALT able to preempt every device interrupt unconditionally.
/// Recorded in DESIGN.md's `device.rs` entry.
pub mod interrupts {
    use super::Cell;

    pub const HALT: Cell = 0;
}

/// Carries the address-space window, bus handles and identity every device
/// needs. Concrete devices embed one of these and delegate to it for the
/// bookkeeping `BaseDevice` used to provide.
pub struct DeviceContext {
    pub id: String,
    pub starting_address: Cell,
    pub size: Cell,
    pub address_bus: AddressBus,
    pub data_bus: DataBus,
    pub control_bus: ControlBus,
    pub interrupt_bus: InterruptBus,
}

impl DeviceContext {
    pub fn new(
        class_name: &str,
        starting_address: Cell,
        size: Cell,
        address_bus: AddressBus,
        data_bus: DataBus,
        control_bus: ControlBus,
        interrupt_bus: InterruptBus,
    ) -> Self {
        let tag: u32 = rand::thread_rng().gen_range(0..1_000_000);
        DeviceContext {
            id: format!("{class_name}-{tag:06}"),
            starting_address,
            size,
            address_bus,
            data_bus,
            control_bus,
            interrupt_bus,
        }
    }

    /// Whether `address` falls inside this device's attached window.
    pub fn address_is_valid(&self, address: Cell) -> bool {
        address >= self.starting_address && address < self.starting_address + self.size
    }

    pub fn offset(&self, address: Cell) -> usize {
        (address - self.starting_address) as usize
    }

    fn log_prefix(&self) -> String {
        format!("[{}]", self.id)
    }

    pub fn trace(&self, message: &str) {
        log::trace!("{} {}", self.log_prefix(), message);
    }

    pub fn debug(&self, message: &str) {
        log::debug!("{} {}", self.log_prefix(), message);
    }
}

/// A device attached to the backplane. Every device runs its own loop on
/// its own thread once started; `run` takes ownership of the boxed device
/// so the thread is the sole owner of its state for its lifetime.
pub trait Device: Send {
    fn id(&self) -> &str;
    fn run(self: Box<Self>);
}

/// Spawns `device`'s loop on a dedicated OS thread, named after its id for
/// diagnostics (visible in a debugger or a panic backtrace).
pub fn spawn(device: Box<dyn Device>) -> JoinHandle<()> {
    let name = device.id().to_string();
    thread::Builder::new()
        .name(name)
        .spawn(move || device.run())
        .expect("failed to spawn device thread")
}

// Read-only memory. Grounded on class_rom.py: a fixed cell image that
// serves read transactions exactly like RAM but silently ignores writes
// (the reference boots from `[LR,1,1, LR,2,2, ADD, DEBUG, JMP,0]` when no
// image is supplied; we keep that as the zero-argument default boot image).

use crate::bus::Cell;
use crate::device::{interrupts, Device, DeviceContext};
use crate::error::{BuildError, CompileError};

/// `LR 1 1; LR 2 2; ADD; DEBUG; JMP 0` — loads 1 into R1 and 2 into R2,
/// adds them into R3, prints the machine state, then loops forever.
pub const DEFAULT_BOOT_IMAGE: &[Cell] = &[1, 1, 1, 1, 2, 2, 5, 10, 11, 0];

pub struct Rom {
    ctx: DeviceContext,
    cells: Vec<Cell>,
}

impl Rom {
    pub fn new(ctx: DeviceContext, image: Vec<Cell>) -> Result<Self, BuildError> {
        let size = ctx.size as usize;
        if image.len() > size {
            return Err(BuildError::Compile(CompileError::CapacityExceeded {
                compiled: image.len(),
                capacity: size,
            }));
        }
        let mut cells = vec![0; size];
        cells[..image.len()].copy_from_slice(&image);
        Ok(Rom { ctx, cells })
    }
}

impl Device for Rom {
    fn id(&self) -> &str {
        &self.ctx.id
    }

    fn run(mut self: Box<Self>) {
        loop {
            let mut lock = self.ctx.control_bus.lock();
            if !lock.power_on() || lock.test_interrupt(interrupts::HALT) {
                break;
            }
            let address = lock.address();
            if !self.ctx.address_is_valid(address) {
                continue;
            }
            let offset = self.ctx.offset(address);
            if lock.read_request() {
                lock.set_data(self.cells[offset]);
                lock.set_read_request(false);
                lock.set_response(true);
            } else if lock.write_request() {
                self.ctx.debug("write to ROM ignored");
                lock.set_write_request(false);
                lock.set_response(true);
            }
        }
        self.ctx.trace("stopped");
    }
}

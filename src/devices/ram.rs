// Random-access memory. Grounded on class_ram.py: a flat cell array that
// rejects an oversized boot image up front and otherwise answers read and
// write transactions within its attached window.

use crate::bus::Cell;
use crate::device::{interrupts, Device, DeviceContext};
use crate::error::{BuildError, CompileError};

pub struct Ram {
    ctx: DeviceContext,
    cells: Vec<Cell>,
}

impl Ram {
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
        Ok(Ram { ctx, cells })
    }
}

impl Device for Ram {
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
                let value = lock.data();
                self.cells[offset] = value;
                lock.set_write_request(false);
                lock.set_response(true);
            }
        }
        self.ctx.trace("stopped");
    }
}

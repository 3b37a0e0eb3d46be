// Machine assembly from a flat list of device specs. Grounded on
// main.py's `MachineBuilder`: turn one `DeviceSpec` per `--flag` into a
// concrete device wired to a shared `Backplane`, warning rather than
// refusing when two windows overlap (spec.md §4.3, §7's advisory
// `BusConfiguration`).

use std::path::PathBuf;

use crate::backplane::Backplane;
use crate::bus::Cell;
use crate::compiler;
use crate::device::DeviceContext;
use crate::devices::{Console, Ram, RealTimeClock, Rom, SoundCard};
use crate::error::BuildError;
use crate::processor::Processor;

/// One `--flag` worth of device configuration, already key=value parsed.
/// Mirrors the CLI table in spec.md §6.
#[derive(Debug, Clone)]
pub enum DeviceSpec {
    Ram { address: Cell, size: Cell },
    Rom { address: Cell, size: Cell, image: Vec<Cell> },
    Processor { address: Cell },
    Console { address: Cell, interrupt: Cell, width: usize, height: usize },
    Compiler { address: Cell, size: Cell, program: PathBuf },
    SoundCard { address: Cell },
    Rtc { address: Cell, interrupt: Cell },
}

/// One device's `[start, start+size)` window, recorded purely so the
/// builder can warn about overlaps after everything is placed.
struct Window {
    id: &'static str,
    start: Cell,
    size: Cell,
}

fn windows_overlap(a: &Window, b: &Window) -> bool {
    a.start < b.start + b.size && b.start < a.start + a.size
}

fn warn_on_overlaps(windows: &[Window]) {
    for i in 0..windows.len() {
        for j in (i + 1)..windows.len() {
            if windows_overlap(&windows[i], &windows[j]) {
                log::warn!(
                    "backplane: address windows for {} and {} overlap",
                    windows[i].id,
                    windows[j].id
                );
            }
        }
    }
}

/// Builds a `Backplane` populated with one device per `spec`, in order.
/// `--compiler` entries compile their program and load the result into
/// the RAM occupying the same window rather than adding a device of
/// their own, matching `MachineBuilder.build`'s treatment of compiler
/// specs as a loader step rather than a bus participant.
pub fn build(specs: Vec<DeviceSpec>) -> Result<Backplane, BuildError> {
    let mut backplane = Backplane::new();
    let mut windows = Vec::new();
    let mut compiled_images: Vec<(Cell, Cell, Vec<Cell>)> = Vec::new();

    for spec in &specs {
        match spec {
            DeviceSpec::Compiler { address, size, program } => {
                let cells = compiler::compile(program, *address)?;
                if cells.len() as Cell > *size {
                    return Err(BuildError::Compile(crate::error::CompileError::CapacityExceeded {
                        compiled: cells.len(),
                        capacity: *size as usize,
                    }));
                }
                compiled_images.push((*address, *size, cells));
            }
            _ => {}
        }
    }

    for spec in specs {
        match spec {
            DeviceSpec::Ram { address, size } => {
                let image = compiled_images
                    .iter()
                    .find(|(addr, sz, _)| *addr == address && *sz == size)
                    .map(|(_, _, cells)| cells.clone())
                    .unwrap_or_default();
                windows.push(Window { id: "ram", start: address, size });
                let ctx = DeviceContext::new("Ram", address, size, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(Ram::new(ctx, image)?));
            }
            DeviceSpec::Rom { address, size, image } => {
                windows.push(Window { id: "rom", start: address, size });
                let ctx = DeviceContext::new("Rom", address, size, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(Rom::new(ctx, image)?));
            }
            DeviceSpec::Processor { address } => {
                windows.push(Window { id: "processor", start: address, size: 1 });
                let ctx = DeviceContext::new("Processor", address, 0, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(Processor::new(ctx)));
            }
            DeviceSpec::Console { address, interrupt, width, height } => {
                windows.push(Window { id: "console", start: address, size: 1 });
                let ctx = DeviceContext::new("Console", address, 1, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(Console::new(ctx, interrupt, width, height)));
            }
            DeviceSpec::Compiler { .. } => {
                // Loader step only; folded into the matching RAM's image above.
            }
            DeviceSpec::SoundCard { address } => {
                windows.push(Window { id: "soundcard", start: address, size: 1 });
                let ctx = DeviceContext::new("SoundCard", address, 1, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(SoundCard::new(ctx)));
            }
            DeviceSpec::Rtc { address, interrupt } => {
                windows.push(Window { id: "rtc", start: address, size: 8 });
                let ctx = DeviceContext::new("RealTimeClock", address, 8, backplane.address_bus(), backplane.data_bus(), backplane.control_bus(), backplane.interrupt_bus());
                backplane.add_device(Box::new(RealTimeClock::new(ctx, interrupt)));
            }
        }
    }

    warn_on_overlaps(&windows);
    Ok(backplane)
}

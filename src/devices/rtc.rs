// Real-time clock. Grounded on real_time_clock.py: an eight-cell readable
// window `[utc_whole, utc_frac, year, month, day, hour, minute, second]`.
// `utc_whole`/`utc_frac` are a writable offset (whole seconds and
// hundredths) added to wall-clock time before it is broken down into the
// remaining six cells; a periodic tick recomputes cells 2..7 and raises a
// configured interrupt. The reference never clears that interrupt on read
// -- only the next tick does -- so we keep that behavior rather than
// "fixing" it (spec open question, resolved in DESIGN.md).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};

use crate::bus::Cell;
use crate::device::{interrupts, Device, DeviceContext};

const CELL_COUNT: usize = 8;
const DEFAULT_INTERVAL_MS: i64 = 1000;

struct ClockState {
    offset_whole: Cell,
    offset_frac: Cell,
    broken_down: [Cell; 6],
}

fn adjusted_now(offset_whole: Cell, offset_frac: Cell) -> DateTime<Utc> {
    let offset_ms = offset_whole * 1000 + offset_frac * 10;
    Utc::now() + ChronoDuration::milliseconds(offset_ms)
}

fn break_down(now: DateTime<Utc>) -> [Cell; 6] {
    [
        i64::from(now.year()),
        i64::from(now.month()),
        i64::from(now.day()),
        i64::from(now.hour()),
        i64::from(now.minute()),
        i64::from(now.second()),
    ]
}

pub struct RealTimeClock {
    ctx: DeviceContext,
    state: Arc<Mutex<ClockState>>,
    _timer: timer::Timer,
    _guard: timer::Guard,
}

impl RealTimeClock {
    pub fn new(ctx: DeviceContext, configured_interrupt: Cell) -> Self {
        Self::with_interval(ctx, configured_interrupt, DEFAULT_INTERVAL_MS)
    }

    pub fn with_interval(ctx: DeviceContext, configured_interrupt: Cell, interval_ms: i64) -> Self {
        let state = Arc::new(Mutex::new(ClockState {
            offset_whole: 0,
            offset_frac: 0,
            broken_down: break_down(adjusted_now(0, 0)),
        }));
        let timer = timer::Timer::new();
        let tick_state = Arc::clone(&state);
        let control_bus = ctx.control_bus.clone();
        let guard = timer.schedule_repeating(chrono::Duration::milliseconds(interval_ms), move || {
            let mut guard = tick_state.lock().expect("rtc state mutex poisoned");
            let now = adjusted_now(guard.offset_whole, guard.offset_frac);
            guard.broken_down = break_down(now);
            drop(guard);
            control_bus.lock().set_interrupt(configured_interrupt);
        });
        RealTimeClock { ctx, state, _timer: timer, _guard: guard }
    }

    fn read_cell(&self, offset: usize) -> Cell {
        let state = self.state.lock().expect("rtc state mutex poisoned");
        match offset {
            0 => state.offset_whole,
            1 => state.offset_frac,
            n if n < CELL_COUNT => state.broken_down[n - 2],
            _ => 0,
        }
    }

    fn write_cell(&self, offset: usize, value: Cell) {
        let mut state = self.state.lock().expect("rtc state mutex poisoned");
        match offset {
            0 => state.offset_whole = value,
            1 => state.offset_frac = value,
            _ => self.ctx.debug("write to a computed RTC cell ignored"),
        }
    }
}

impl Device for RealTimeClock {
    fn id(&self) -> &str {
        &self.ctx.id
    }

    fn run(self: Box<Self>) {
        loop {
            let mut lock = self.ctx.control_bus.lock();
            if !lock.power_on() || lock.test_interrupt(interrupts::HALT) {
                break;
            }
            let address = lock.address();
            if self.ctx.address_is_valid(address) {
                let offset = self.ctx.offset(address);
                if lock.read_request() {
                    let value = self.read_cell(offset);
                    lock.set_data(value);
                    lock.set_read_request(false);
                    lock.set_response(true);
                } else if lock.write_request() {
                    let value = lock.data();
                    self.write_cell(offset, value);
                    lock.set_write_request(false);
                    lock.set_response(true);
                }
            }
        }
        self.ctx.trace("stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use std::time::Duration;

    fn ctx() -> DeviceContext {
        let (a, d, c, i) = Bus::buses();
        DeviceContext::new("RealTimeClock", 100, CELL_COUNT as Cell, a, d, c, i)
    }

    #[test]
    fn offset_cells_are_writable_and_readable_back() {
        let rtc = RealTimeClock::with_interval(ctx(), 3, 10_000);
        rtc.write_cell(0, 42);
        rtc.write_cell(1, 7);
        assert_eq!(rtc.read_cell(0), 42);
        assert_eq!(rtc.read_cell(1), 7);
    }

    #[test]
    fn writes_to_computed_cells_are_ignored() {
        let rtc = RealTimeClock::with_interval(ctx(), 3, 10_000);
        let before = rtc.read_cell(2);
        rtc.write_cell(2, 9999);
        assert_eq!(rtc.read_cell(2), before);
    }

    #[test]
    fn a_tick_raises_the_configured_interrupt() {
        let (a, d, c, i) = Bus::buses();
        let ctx = DeviceContext::new("RealTimeClock", 100, CELL_COUNT as Cell, a, d, c.clone(), i);
        let _rtc = RealTimeClock::with_interval(ctx, 3, 5);
        std::thread::sleep(Duration::from_millis(50));
        assert!(c.lock().test_interrupt(3));
    }
}

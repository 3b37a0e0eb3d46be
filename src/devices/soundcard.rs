// Tone generator. Grounded on class_soundcard.py: each write appends one
// cell to a command queue. A frame is `duration_ms, (freq*100, volume*10)+,
// END_OF_FRAME(-1)`; a transaction is `frame+, END_OF_TRANSACTION(-2)`. A
// background worker wakes whenever the queue gains data, drains whole
// transactions, and plays each frame's tones concurrently to completion
// before starting the next frame.
//
// The reference builds its own PCM sine buffers with numpy and plays them
// through sounddevice. rodio already provides a mixer and a `SineWave`
// source, so playback is delegated to it instead of hand-rolling PCM.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rodio::{OutputStream, Sink, Source};

use crate::bus::Cell;
use crate::device::{interrupts, Device, DeviceContext};

const END_OF_FRAME: Cell = -1;
const END_OF_TRANSACTION: Cell = -2;

#[derive(Debug, PartialEq)]
struct Frame {
    duration_ms: Cell,
    tones: Vec<(Cell, Cell)>, // (freq * 100, volume * 10), as written to the bus
}

struct Queue {
    cells: VecDeque<Cell>,
}

pub struct SoundCard {
    ctx: DeviceContext,
    queue: Arc<Mutex<Queue>>,
    arrived: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    player: Option<JoinHandle<()>>,
}

impl SoundCard {
    pub fn new(ctx: DeviceContext) -> Self {
        let queue = Arc::new(Mutex::new(Queue { cells: VecDeque::new() }));
        let arrived = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let player = spawn_player(Arc::clone(&queue), Arc::clone(&arrived), Arc::clone(&shutdown));
        SoundCard { ctx, queue, arrived, shutdown, player: Some(player) }
    }
}

/// Background worker: wakes whenever the command queue gains data, drains
/// one transaction's worth of frames, and plays them before looking for
/// more work. Mirrors `process_queue`'s loop without numpy's buffer math.
///
/// Only exits once `shutdown` is set *and* no complete transaction is left
/// to drain, so a queued transaction still plays out even if the bus powers
/// off mid-frame: `SoundCard::run` joins this handle before returning,
/// which is what makes "finished" mean "finished playing", not merely
/// "stopped accepting new writes".
fn spawn_player(queue: Arc<Mutex<Queue>>, arrived: Arc<Condvar>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("soundcard-player".into())
        .spawn(move || loop {
            let transaction = {
                let mut guard = queue.lock().expect("soundcard queue mutex poisoned");
                loop {
                    if guard.cells.contains(&END_OF_TRANSACTION) {
                        break;
                    }
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    guard = arrived.wait(guard).expect("soundcard queue mutex poisoned");
                }
                drain_transaction(&mut guard.cells)
            };
            play_transaction(&transaction);
        })
        .expect("failed to spawn soundcard player thread")
}

/// Pulls whole frames off the front of the queue, stopping once
/// END_OF_TRANSACTION is consumed.
fn drain_transaction(cells: &mut VecDeque<Cell>) -> Vec<Frame> {
    let mut transaction = Vec::new();
    while let Some(first) = cells.pop_front() {
        if first == END_OF_TRANSACTION {
            break;
        }
        let duration_ms = first;
        let mut tones = Vec::new();
        loop {
            match cells.pop_front() {
                Some(END_OF_FRAME) | None => break,
                Some(freq_scaled) => match cells.pop_front() {
                    Some(volume_scaled) => tones.push((freq_scaled, volume_scaled)),
                    None => break,
                },
            }
        }
        transaction.push(Frame { duration_ms, tones });
    }
    transaction
}

fn play_transaction(frames: &[Frame]) {
    let Ok((_stream, handle)) = OutputStream::try_default() else {
        log::warn!("soundcard: no audio output device available");
        for frame in frames {
            thread::sleep(Duration::from_millis(frame.duration_ms.max(0) as u64));
        }
        return;
    };
    for frame in frames {
        let duration = Duration::from_millis(frame.duration_ms.max(0) as u64);
        let mut sinks = Vec::with_capacity(frame.tones.len());
        for &(freq_scaled, volume_scaled) in &frame.tones {
            let frequency = (freq_scaled as f32 / 100.0).max(1.0);
            let amplitude = (volume_scaled as f32 / 10.0).clamp(0.0, 1.0);
            if let Ok(sink) = Sink::try_new(&handle) {
                let tone = rodio::source::SineWave::new(frequency).take_duration(duration).amplify(amplitude);
                sink.append(tone);
                sinks.push(sink);
            }
        }
        thread::sleep(duration);
        for sink in sinks {
            sink.stop();
        }
    }
}

impl Device for SoundCard {
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
            if self.ctx.address_is_valid(address) && lock.write_request() {
                let value = lock.data();
                {
                    let mut guard = self.queue.lock().expect("soundcard queue mutex poisoned");
                    guard.cells.push_back(value);
                }
                self.arrived.notify_one();
                lock.set_write_request(false);
                lock.set_response(true);
            }
        }
        // Powering off stops accepting new writes, but any transaction
        // already queued must still finish playing before this device
        // reports itself finished (spec.md §4.8).
        self.shutdown.store(true, Ordering::Release);
        self.arrived.notify_one();
        if let Some(player) = self.player.take() {
            if let Err(err) = player.join() {
                log::error!("{} player thread panicked: {err:?}", self.ctx.id);
            }
        }
        self.ctx.trace("stopped");
    }
}

// Text console. Grounded on class_consolev4.py, the most complete console
// variant in the reference machine: control characters (CR, LF, TAB, FF,
// BS) are interpreted rather than printed onto a fixed `width x height`
// character grid, SGR color escapes recolor subsequent output, and a
// background reader feeds typed keys back to the program through a read
// transaction plus a configured interrupt line.
//
// termion replaces the reference's raw ANSI byte-strings with typed color
// and cursor primitives for the optional live terminal echo; the escape
// parsing, grid scrolling and backspace-wrap logic are reimplemented from
// the Python source since termion has no equivalent for any of them.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use termion::color;

use crate::bus::Cell;
use crate::device::{interrupts, Device, DeviceContext};

/// Writes the SGR foreground escape for `code` to the live terminal echo,
/// matching the color table in class_consolev4.py. Unknown codes are
/// ignored. termion's `Color` trait isn't object-safe for `Fg`, so each
/// color is written from its own arm rather than dispatched dynamically.
fn write_sgr_fg(out: &mut impl Write, code: u8) -> io::Result<()> {
    match code {
        30 => write!(out, "{}", color::Fg(color::Black)),
        31 => write!(out, "{}", color::Fg(color::Red)),
        32 => write!(out, "{}", color::Fg(color::Green)),
        33 => write!(out, "{}", color::Fg(color::Yellow)), // "orange" in the reference
        34 => write!(out, "{}", color::Fg(color::Blue)),
        35 => write!(out, "{}", color::Fg(color::Magenta)), // "purple" in the reference
        36 => write!(out, "{}", color::Fg(color::Cyan)),
        37 => write!(out, "{}", color::Fg(color::White)),
        _ => Ok(()),
    }
}

enum Escape {
    None,
    Started,
    Collecting(Vec<u8>),
}

pub struct Console {
    ctx: DeviceContext,
    configured_interrupt: Cell,
    input: Arc<Mutex<VecDeque<u8>>>,
    width: usize,
    height: usize,
    rows: Vec<Vec<u8>>,
    cursor_x: usize,
    cursor_y: usize,
    escape: Escape,
    stdout: io::Stdout,
}

impl Console {
    pub fn new(ctx: DeviceContext, configured_interrupt: Cell, width: usize, height: usize) -> Self {
        let input = Arc::new(Mutex::new(VecDeque::new()));
        spawn_reader(Arc::clone(&input));
        let width = width.max(1);
        let height = height.max(1);
        Console {
            ctx,
            configured_interrupt,
            input,
            width,
            height,
            rows: vec![vec![b' '; width]; height],
            cursor_x: 0,
            cursor_y: 0,
            escape: Escape::None,
            stdout: io::stdout(),
        }
    }

    /// The grid's current contents as newline-joined rows, for tests and
    /// the optional terminal dump. Trailing padding spaces are kept so the
    /// row length always equals `width`.
    pub fn render_to_string(&self) -> String {
        self.rows
            .iter()
            .map(|row| String::from_utf8_lossy(row).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn handle_byte(&mut self, byte: u8) {
        match &mut self.escape {
            Escape::None if byte == 0x1b => {
                self.escape = Escape::Started;
                return;
            }
            Escape::Started => {
                if byte == b'[' {
                    self.escape = Escape::Collecting(Vec::new());
                } else if byte == 0x1b {
                    self.escape = Escape::None;
                    self.put_and_advance(0x1b);
                } else {
                    self.escape = Escape::None;
                }
                return;
            }
            Escape::Collecting(buf) => {
                if byte.is_ascii_digit() || byte == b';' {
                    buf.push(byte);
                } else {
                    if byte == b'm' {
                        self.apply_sgr(buf.clone());
                    }
                    self.escape = Escape::None;
                }
                return;
            }
            Escape::None => {}
        }

        match byte {
            b'\r' => self.cursor_x = 0,
            b'\n' => self.newline(),
            b'\t' => self.cursor_x = (self.cursor_x + 4).min(self.width - 1),
            0x0c => self.form_feed(),
            0x08 => self.backspace(),
            _ => self.put_and_advance(byte),
        }
    }

    fn put_and_advance(&mut self, byte: u8) {
        self.rows[self.cursor_y][self.cursor_x] = byte;
        let _ = write!(self.stdout, "{}", byte as char);
        self.cursor_x += 1;
        if self.cursor_x >= self.width {
            self.cursor_x = 0;
            self.newline();
        }
        let _ = self.stdout.flush();
    }

    fn newline(&mut self) {
        self.cursor_y += 1;
        if self.cursor_y >= self.height {
            self.rows.remove(0);
            self.rows.push(vec![b' '; self.width]);
            self.cursor_y = self.height - 1;
        }
        let _ = write!(self.stdout, "\r\n");
        let _ = self.stdout.flush();
    }

    fn form_feed(&mut self) {
        self.rows = vec![vec![b' '; self.width]; self.height];
        self.cursor_x = 0;
        self.cursor_y = 0;
        let _ = write!(self.stdout, "{}{}", termion::clear::All, termion::cursor::Goto(1, 1));
        let _ = self.stdout.flush();
    }

    /// Move left; at column zero wrap to the end of the non-blank run on
    /// the previous row; then blank the character under the cursor.
    fn backspace(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            let row = &self.rows[self.cursor_y];
            let last_non_space = row.iter().rposition(|&b| b != b' ').map(|i| i + 1).unwrap_or(0);
            self.cursor_x = last_non_space.min(self.width - 1);
        } else {
            return;
        }
        self.rows[self.cursor_y][self.cursor_x] = b' ';
        let _ = write!(self.stdout, "{} {}", termion::cursor::Left(1), termion::cursor::Left(1));
        let _ = self.stdout.flush();
    }

    fn apply_sgr(&mut self, digits: Vec<u8>) {
        let text = String::from_utf8_lossy(&digits);
        let code: u8 = text.parse().unwrap_or(0);
        if code == 0 {
            let _ = write!(self.stdout, "{}", color::Fg(color::Reset));
        } else {
            let _ = write_sgr_fg(&mut self.stdout, code);
        }
        let _ = self.stdout.flush();
    }
}

fn spawn_reader(input: Arc<Mutex<VecDeque<u8>>>) {
    thread::Builder::new()
        .name("console-reader".into())
        .spawn(move || {
            let mut byte = [0u8; 1];
            loop {
                match io::stdin().read(&mut byte) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        input.lock().expect("console input mutex poisoned").push_back(byte[0]);
                    }
                }
            }
        })
        .expect("failed to spawn console reader thread");
}

impl Device for Console {
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
            if self.ctx.address_is_valid(address) {
                if lock.write_request() {
                    let value = lock.data();
                    lock.set_write_request(false);
                    lock.set_response(true);
                    drop(lock);
                    self.handle_byte((value & 0xff) as u8);
                    lock = self.ctx.control_bus.lock();
                } else if lock.read_request() {
                    let next = self.input.lock().expect("console input mutex poisoned").pop_front();
                    lock.set_data(next.map(|b| b as Cell).unwrap_or(0));
                    lock.set_read_request(false);
                    lock.set_response(true);
                }
            }
            if self.input.lock().expect("console input mutex poisoned").is_empty() {
                lock.clear_interrupt(self.configured_interrupt);
            } else {
                lock.set_interrupt(self.configured_interrupt);
            }
        }
        self.ctx.trace("stopped");
    }
}

// Concrete device implementations. Each owns a `DeviceContext` (bus handles,
// address window, id) and implements `Device::run` as a loop that takes the
// control-bus lock, services at most one pending transaction, then drops
// the lock (which yields the thread) and loops again. This mirrors
// BaseDevice's cycle contract from the reference machine, generalized from
// "called once per backplane tick" to "repeated on a dedicated thread".

pub mod console;
pub mod ram;
pub mod rom;
pub mod rtc;
pub mod soundcard;

pub use console::Console;
pub use ram::Ram;
pub use rom::Rom;
pub use rtc::RealTimeClock;
pub use soundcard::SoundCard;

//! Rubbish: a fantasy 32-bit machine emulator. A backplane carries four
//! shared buses (address, data, control, interrupt); devices -- RAM, ROM,
//! a processor, a text console, a sound card, a real-time clock -- each run
//! on their own thread and communicate exclusively through bus transactions
//! serialized by the control bus's lock.

pub mod backplane;
pub mod builder;
pub mod bus;
pub mod cli;
pub mod compiler;
pub mod device;
pub mod devices;
pub mod error;
pub mod processor;

//! psspi - driver for a FIFO-buffered full-duplex SPI bus controller
//!
//! This crate drives a memory-mapped SPI controller whose only buffering
//! is a pair of fixed-depth hardware FIFOs. A transfer moves a
//! caller-supplied byte sequence across the bus, transmitting and
//! receiving simultaneously, in one of two modes: interrupt-driven
//! (non-blocking, completion reported through a status callback) or
//! polled (blocking until done).
//!
//! All register access goes through the injectable [`RegisterPort`]
//! trait: [`Mmio`] implements it over the controller's base address on
//! real hardware, and tests substitute a deterministic software model.
//!
//! # Example
//!
//! ```ignore
//! use psspi::{Mmio, Options, SpiPs};
//!
//! let port = unsafe { Mmio::new(0xE000_6000 as *mut u32) };
//! let mut spi = SpiPs::new(port);
//!
//! spi.set_options(Options::MASTER | Options::MANUAL_CS)?;
//! spi.set_slave_select(0)?;
//!
//! let tx = [0x9F, 0x00, 0x00, 0x00];
//! let mut rx = [0u8; 4];
//! spi.polled_transfer(&tx, Some(&mut rx))?;
//! ```
//!
//! The driver performs no internal locking; see the notes on
//! [`SpiPs::transfer`] and [`SpiPs`] for the single-caller assumptions.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod controller;
mod error;
mod port;
pub mod regs;
mod transfer;

pub use controller::{Options, SpiPs, StatusEvent, StatusHandler};
pub use error::{Error, Result};
pub use port::{Mmio, RegisterPort};
pub use regs::FIFO_DEPTH;

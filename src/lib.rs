//! Patch editing core for the GAIA SH-01 synthesizer.
//!
//! The device exposes its sound parameters as a byte-addressed memory map that
//! is read and written with Roland RQ1/DT1 SysEx. This crate models that memory
//! ([`patch::Patch`] made of [`block::ParameterBlock`]s), speaks the protocol
//! ([`protocol`], [`sync`], [`session`]), and converts to and from the editor's
//! patch files ([`patch_file`]) and the device's USB backup dumps ([`svd`]).

pub mod address;
pub mod block;
pub mod config;
pub mod control;
pub mod error;
pub mod field;
pub mod layout;
pub mod midi_io;
pub mod notify;
pub mod patch;
pub mod patch_file;
pub mod protocol;
pub mod session;
pub mod svd;
pub mod sync;
pub mod transport;

pub use address::Address;
pub use block::{BlockChange, ChangeOrigin, ParameterBlock};
pub use error::{Error, Result};
pub use field::{Field, TextField};
pub use layout::{Location, Slot};
pub use patch::{Patch, PatchEvent};
pub use protocol::{Message, Mismatch};
pub use session::{Session, SessionEvent};
pub use transport::Transport;

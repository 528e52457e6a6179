//! Transport implementations
//!
//! This module contains implementations of the [`Transport`] trait, the
//! byte-level link the controller owns exclusively. A transport moves whole
//! lines; framing, trimming and parsing belong to [`crate::protocol`].

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::MockDevice;
pub use serial_adapter::SerialAdapter;

use crate::error::StageResult;

/// Duplex line channel to the controller.
///
/// Implementations are used strictly sequentially: one `write_line` is
/// always followed by exactly one `read_line` before the next write.
pub trait Transport {
    /// Write one command line. `line` already carries its terminator.
    fn write_line(&mut self, line: &str) -> StageResult<()>;

    /// Read one response line, including its line ending if any.
    fn read_line(&mut self) -> StageResult<String>;

    /// Bytes waiting in the input buffer.
    fn bytes_pending(&mut self) -> StageResult<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        (**self).write_line(line)
    }

    fn read_line(&mut self) -> StageResult<String> {
        (**self).read_line()
    }

    fn bytes_pending(&mut self) -> StageResult<usize> {
        (**self).bytes_pending()
    }
}

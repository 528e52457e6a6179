//! Serial port transport for the MS-2000 (9600 baud, CR-terminated commands)

use crate::adapters::Transport;
use crate::error::{StageError, StageResult};
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Default baud rate of the MS-2000.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial transport for RS-232 / USB communication
///
/// This adapter wraps the serialport crate with blocking, line-oriented I/O.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600)
    baud_rate: u32,

    /// Read timeout for a complete response line
    timeout: Duration,

    /// The open serial port
    #[cfg(feature = "instrument_serial")]
    port: Box<dyn SerialPort>,
}

impl SerialAdapter {
    /// Open a serial port with the default read timeout
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (9600 for the MS-2000)
    pub fn open(port_name: &str, baud_rate: u32) -> StageResult<Self> {
        Self::open_with_timeout(port_name, baud_rate, DEFAULT_READ_TIMEOUT)
    }

    /// Open a serial port with a custom read timeout
    #[cfg(feature = "instrument_serial")]
    pub fn open_with_timeout(
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> StageResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                StageError::Transport(format!(
                    "No connection on port '{}' at {} baud: {}",
                    port_name, baud_rate, e
                ))
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);
        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            port,
        })
    }

    /// Open a serial port with a custom read timeout
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open_with_timeout(
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> StageResult<Self> {
        let _ = (port_name, baud_rate, timeout);
        Err(StageError::SerialFeatureDisabled)
    }

    /// Port name this adapter was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Configured read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialAdapter {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        use std::io::Write;

        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> StageResult<String> {
        use std::io::Read;

        // Read byte by byte so nothing past the line ending is consumed
        let mut response = Vec::new();
        let mut buffer = [0u8; 1];
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() > self.timeout {
                return Err(StageError::Timeout(self.timeout));
            }

            match self.port.read(&mut buffer) {
                Ok(1) => {
                    response.push(buffer[0]);
                    if buffer[0] == b'\n' {
                        break;
                    }
                }
                Ok(_) => {
                    return Err(StageError::Transport(format!(
                        "Unexpected EOF on '{}'",
                        self.port_name
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(StageError::Timeout(self.timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }

        String::from_utf8(response)
            .map_err(|e| StageError::Transport(format!("Non-ASCII response: {}", e)))
    }

    fn bytes_pending(&mut self) -> StageResult<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| StageError::Transport(e.to_string()))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialAdapter {
    fn write_line(&mut self, _line: &str) -> StageResult<()> {
        Err(StageError::SerialFeatureDisabled)
    }

    fn read_line(&mut self) -> StageResult<String> {
        Err(StageError::SerialFeatureDisabled)
    }

    fn bytes_pending(&mut self) -> StageResult<usize> {
        Err(StageError::SerialFeatureDisabled)
    }
}

impl Drop for SerialAdapter {
    fn drop(&mut self) {
        debug!("Serial port '{}' closed", self.port_name);
    }
}

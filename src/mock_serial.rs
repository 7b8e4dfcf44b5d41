//! We use this mocking module in unit tests to emulate a serial link to a Modbus device.

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 512>,
    /// Queued response frames, read back to back
    read_buffer: heapless::Vec<u8, 512>,
    /// Current position in the read buffer
    read_position: usize,
    /// Simulate write errors
    should_error_on_write: bool,
    /// Error returned by every read, if set
    read_error: Option<MockSerialError>,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum MockSerialError {
    /// Simulated timeout error
    #[error("Simulated timeout")]
    Timeout,
    /// Simulated buffer overflow
    #[error("Simulated buffer overflow")]
    BufferOverflow,
    /// Generic simulated error for testing
    #[error("Simulated error")]
    SimulatedError,
    /// Would block - no data available
    #[error("Would block")]
    WouldBlock,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if let Some(err) = self.read_error {
            return Err(err);
        }
        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::WouldBlock);
        }

        let available = &self.read_buffer[self.read_position..];
        let bytes_to_read = core::cmp::min(buf.len(), available.len());
        buf[..bytes_to_read].copy_from_slice(&available[..bytes_to_read]);

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            should_error_on_write: false,
            read_error: None,
        }
    }

    /// Queue a response frame behind any already queued.
    pub fn push_response(&mut self, frame: &[u8]) -> Result<(), MockSerialError> {
        self.read_buffer
            .extend_from_slice(frame)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure an error for every read to fail with
    pub fn set_read_error(&mut self, error: Option<MockSerialError>) {
        self.read_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_queued_responses_read_in_order() {
        let mut mock = MockSerial::new();
        mock.push_response(b"first").unwrap();
        mock.push_response(b"second").unwrap();

        let mut buffer = [0u8; 5];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"first");

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 6);
        assert_eq!(&buffer[..6], b"second");

        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::WouldBlock)));
    }

    #[test]
    fn test_write_collects_everything() {
        let mut mock = MockSerial::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 600]; // Larger than 512 byte capacity
        assert!(matches!(
            mock.write(&large_data),
            Err(MockSerialError::BufferOverflow)
        ));
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.push_response(b"data").unwrap();
        mock.set_read_error(Some(MockSerialError::Timeout));
        let mut buffer = [0u8; 4];
        let err = mock.read(&mut buffer).unwrap_err();
        assert_eq!(err.kind(), embedded_io::ErrorKind::TimedOut);

        mock.set_read_error(None);
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);

        mock.set_write_error(true);
        assert!(mock.write(b"x").is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());
    }
}

//! Register and variable I/O towards a device.
//!
//! Adapters only talk to a [`Transport`]. [`ModbusFramed`] implements it for any byte stream
//! implementing [`embedded_io::Read`] & [`embedded_io::Write`], such as a serial port or a
//! TCP socket.

use embedded_io::Error as _;
use rmodbus::{ModbusProto, client::ModbusRequest};
use tracing::trace;

use crate::error::TransportError;

/// Maximum registers per read request allowed by Modbus.
const MAX_READ: u16 = 125;
/// Maximum registers per write request allowed by Modbus.
const MAX_WRITE: usize = 123;

/// The device side collaborator. Calls block until the device answers or the
/// underlying stream gives up.
pub trait Transport {
    /// Read `count` consecutive holding registers starting at `address`.
    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError>;

    /// Write consecutive holding registers starting at `address`.
    fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<(), TransportError>;

    /// Read a named HIL variable.
    fn read_variable(&mut self, _name: &str) -> Result<f64, TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Write a named HIL variable.
    fn write_variable(&mut self, _name: &str, _value: f64) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Read a named HIL vector variable.
    fn read_vector(&mut self, _name: &str) -> Result<Vec<f64>, TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Write a named HIL vector variable.
    fn write_vector(&mut self, _name: &str, _values: &[f64]) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Release the connection.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Modbus framing, RTU or TCP, on top of a byte stream.
///
/// `L` is the size of the frame buffers.
pub struct ModbusFramed<S: embedded_io::Read + embedded_io::Write, const L: usize = 264> {
    interface: S,
    unit_id: u8,
    proto: ModbusProto,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> ModbusFramed<S, L> {
    /// Create a Modbus RTU transport, e.g. over RS485.
    pub fn rtu(interface: S, unit_id: u8) -> Self {
        Self {
            interface,
            unit_id,
            proto: ModbusProto::Rtu,
        }
    }

    /// Create a Modbus TCP transport over an established stream.
    pub fn tcp(interface: S, unit_id: u8) -> Self {
        Self {
            interface,
            unit_id,
            proto: ModbusProto::TcpUdp,
        }
    }

    /// Give back the underlying stream.
    pub fn release(self) -> S {
        self.interface
    }

    /// Bytes before the function code in a response.
    fn header_len(&self) -> usize {
        match self.proto {
            ModbusProto::Rtu | ModbusProto::Ascii => 1,
            ModbusProto::TcpUdp => 7,
        }
    }

    /// Bytes after the PDU in a response.
    fn trailer_len(&self) -> usize {
        match self.proto {
            ModbusProto::Rtu | ModbusProto::Ascii => 2,
            ModbusProto::TcpUdp => 0,
        }
    }

    /// Send a request and collect a response of `pdu_len` bytes (function code onwards).
    ///
    /// Exception responses are recognised early so we don't sit waiting for bytes that
    /// will never arrive.
    fn transact(
        &mut self,
        request: &[u8],
        pdu_len: usize,
    ) -> Result<heapless::Vec<u8, L>, TransportError> {
        self.interface
            .write_all(request)
            .map_err(|e| TransportError::Io(e.kind()))?;
        trace!(request = ?request, "modbus tx");

        let header = self.header_len();
        let expected = header + pdu_len + self.trailer_len();
        let exception_len = header + 2 + self.trailer_len();

        let mut buff: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut temp_buf = [0u8; 16];
        loop {
            let want = (expected - buff.len()).min(temp_buf.len());
            match self.interface.read(&mut temp_buf[..want]) {
                Ok(0) => return Err(TransportError::InvalidResponse),
                Ok(bytes_read) => {
                    buff.extend_from_slice(&temp_buf[..bytes_read])
                        .map_err(|_| TransportError::BufferError)?;
                    if buff.len() >= expected {
                        break;
                    }
                    let is_exception = buff.get(header).is_some_and(|fc| fc & 0x80 != 0);
                    if is_exception && buff.len() >= exception_len {
                        break;
                    }
                }
                Err(e) => {
                    let kind = e.kind();
                    // Stream went quiet, let the parser judge what we have.
                    if matches!(
                        kind,
                        embedded_io::ErrorKind::Other | embedded_io::ErrorKind::TimedOut
                    ) && !buff.is_empty()
                    {
                        break;
                    }
                    if kind == embedded_io::ErrorKind::TimedOut {
                        return Err(TransportError::Timeout);
                    }
                    return Err(TransportError::Io(kind));
                }
            }
        }
        trace!(response = ?buff.as_slice(), "modbus rx");
        Ok(buff)
    }

    fn read_chunk(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let mut request: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = ModbusRequest::new(self.unit_id, self.proto);
        req.generate_get_holdings(address, count, &mut request)?;

        // Function code, byte count, then the data.
        let response = self.transact(&request, 2 + 2 * count as usize)?;

        let mut parsed_data: heapless::Vec<u16, { MAX_READ as usize }> = heapless::Vec::new();
        req.parse_u16(&response, &mut parsed_data)?;
        if parsed_data.len() != count as usize {
            return Err(TransportError::InvalidResponse);
        }
        Ok(parsed_data.to_vec())
    }

    fn write_chunk(&mut self, address: u16, words: &[u16]) -> Result<(), TransportError> {
        let mut request: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = ModbusRequest::new(self.unit_id, self.proto);
        match words {
            [single] => req.generate_set_holding(address, *single, &mut request)?,
            _ => req.generate_set_holdings_bulk(address, words, &mut request)?,
        }

        // Both echo function code, address and value/count.
        let response = self.transact(&request, 5)?;
        req.parse_ok(&response)?;
        // A single register write echoes the request verbatim.
        if words.len() == 1 && request.as_slice() != response.as_slice() {
            return Err(TransportError::InvalidResponse);
        }
        Ok(())
    }
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Transport for ModbusFramed<S, L> {
    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let mut words = Vec::with_capacity(count as usize);
        let mut offset = 0;
        while offset < count {
            let chunk = (count - offset).min(MAX_READ);
            words.extend(self.read_chunk(address.wrapping_add(offset), chunk)?);
            offset += chunk;
        }
        Ok(words)
    }

    fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<(), TransportError> {
        for (i, chunk) in words.chunks(MAX_WRITE).enumerate() {
            self.write_chunk(address.wrapping_add((i * MAX_WRITE) as u16), chunk)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.interface
            .flush()
            .map_err(|e| TransportError::Io(e.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::MockSerial;

    #[test]
    fn test_write_single_register() {
        let mut mock_serial = MockSerial::new();
        let ideal_written = [0x01, 0x06, 0x00, 0x10, 0x12, 0x34, 0x85, 0x78];
        mock_serial.push_response(&ideal_written).unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        transport.write_registers(0x10, &[0x1234]).unwrap();

        assert_eq!(transport.interface.written_data(), ideal_written.as_slice());
    }

    #[test]
    fn test_write_single_register_bad_echo() {
        let mut mock_serial = MockSerial::new();
        // Device echoed a different value, CRC computed for that frame.
        mock_serial
            .push_response(&[0x01, 0x06, 0x00, 0x00, 0x09, 0x60, 0x8F, 0xB2])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let result = transport.write_registers(0x10, &[0x1234]);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_multiple_registers() {
        let mut mock_serial = MockSerial::new();
        mock_serial
            .push_response(&[0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x40, 0x0D])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        transport.write_registers(0x10, &[0x0001, 0x0002]).unwrap();

        let ideal_written = [
            0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02, 0x22, 0xA2,
        ];
        assert_eq!(transport.interface.written_data(), ideal_written.as_slice());
    }

    #[test]
    fn test_read_single_register() {
        let mut mock_serial = MockSerial::new();
        // CRC calculated using: https://homepages.plus.net/dougrice/dev/modbus/crc.html
        mock_serial
            .push_response(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let words = transport.read_registers(0x20, 1).unwrap();
        assert_eq!(words, vec![0x5678]);

        let ideal_written = [0x01, 0x03, 0x00, 0x20, 0x00, 0x01, 0x85, 0xC0];
        assert_eq!(transport.interface.written_data(), ideal_written.as_slice());
    }

    #[test]
    fn test_read_two_registers() {
        let mut mock_serial = MockSerial::new();
        mock_serial
            .push_response(&[0x01, 0x03, 0x04, 0x00, 0x00, 0x04, 0x32, 0x79, 0x26])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let words = transport.read_registers(0x0100, 2).unwrap();
        assert_eq!(words, vec![0x0000, 0x0432]);

        let ideal_written = [0x01, 0x03, 0x01, 0x00, 0x00, 0x02, 0xC5, 0xF7];
        assert_eq!(transport.interface.written_data(), ideal_written.as_slice());
    }

    #[test]
    fn test_read_bad_crc() {
        let mut mock_serial = MockSerial::new();
        mock_serial
            .push_response(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x00, 0x00])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let result = transport.read_registers(0x20, 1);
        match result {
            // If parsing somehow succeeds, verify we got the expected value
            Ok(words) => assert_eq!(words, vec![0x5678]),
            Err(TransportError::Modbus(_)) => {}
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_exception_response() {
        let mut mock_serial = MockSerial::new();
        // Illegal data address.
        mock_serial.push_response(&[0x01, 0x83, 0x02, 0xC0, 0xF1]).unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let result = transport.read_registers(0x0100, 2);
        assert!(matches!(result, Err(TransportError::Modbus(_))));
    }

    #[test]
    fn test_back_to_back_transactions() {
        let mut mock_serial = MockSerial::new();
        mock_serial
            .push_response(&[0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6])
            .unwrap();
        mock_serial
            .push_response(&[0x01, 0x06, 0x00, 0x10, 0x12, 0x34, 0x85, 0x78])
            .unwrap();

        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        assert_eq!(transport.read_registers(0x20, 1).unwrap(), vec![0x5678]);
        transport.write_registers(0x10, &[0x1234]).unwrap();
    }

    #[test]
    fn test_no_response() {
        let mock_serial = MockSerial::new();
        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        let result = transport.read_registers(0x20, 1);
        assert_eq!(result, Err(TransportError::Io(embedded_io::ErrorKind::Other)));
    }

    #[test]
    fn test_read_timeout() {
        let mut mock_serial = MockSerial::new();
        mock_serial.set_read_error(Some(crate::mock_serial::MockSerialError::Timeout));
        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        assert_eq!(transport.read_registers(0x20, 1), Err(TransportError::Timeout));
    }

    #[test]
    fn test_variables_unsupported() {
        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(MockSerial::new(), 0x01);
        assert_eq!(
            transport.read_variable("GSF_Q"),
            Err(TransportError::Unsupported)
        );
    }

    #[test]
    fn test_write_error() {
        let mut mock_serial = MockSerial::new();
        mock_serial.set_write_error(true);
        let mut transport: ModbusFramed<MockSerial> = ModbusFramed::rtu(mock_serial, 0x01);
        assert!(matches!(
            transport.write_registers(0x10, &[1]),
            Err(TransportError::Io(_))
        ));
    }
}

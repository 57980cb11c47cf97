//! In-memory adapter simulator for tests.
//!
//! [`MockAdapter`] implements [`Transport`] and plays the role of the adapter
//! firmware: it parses the command frames written to it, runs them against a
//! set of simulated register-file I2C devices, and queues the responses the
//! real adapter would send. Every layer above the transport can therefore be
//! tested through genuine wire frames.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;

use super::{Transport, TransportError};

const CMD_WRITE: u8 = 0x91;
const CMD_READ: u8 = 0x92;
const CMD_SET_MODE: u8 = 0x94;
const CMD_CLEAR_BUS: u8 = 0x98;
const CMD_WRITE_AND_READ: u8 = 0x9B;
const CMD_DEVICE_INFO: u8 = 0xA7;

const STATUS_NONE: u8 = 0;
const STATUS_ADDRESS_NACK: u8 = 8;

/// A register-file I2C target.
///
/// Registers are `width` bytes wide and stored back to back, MSB first.
/// Reads and writes walk the store byte by byte from the selected register,
/// so byte-wide devices see an auto-incrementing register pointer and
/// word-wide devices return each register as a whole.
#[derive(Debug, Clone)]
pub(crate) struct SimDevice {
    /// Raw register store; register `r` starts at byte `r * width`.
    pub registers: Vec<u8>,
    width: usize,
    cursor: usize,
    /// Per-register sequences returned by successive reads. The last value
    /// repeats once the sequence is down to one entry. Byte-wide only.
    scripts: HashMap<u8, VecDeque<u8>>,
    /// Number of times each register has been read.
    pub reads: HashMap<u8, usize>,
}

impl SimDevice {
    /// Device with 256 byte-wide registers.
    pub fn new() -> Self {
        Self::with_width(1)
    }

    /// Device with 256 16-bit registers.
    pub fn word_registers() -> Self {
        Self::with_width(2)
    }

    fn with_width(width: usize) -> Self {
        Self {
            registers: vec![0; 256 * width],
            width,
            cursor: 0,
            scripts: HashMap::new(),
            reads: HashMap::new(),
        }
    }

    /// Store `values` starting at the first byte of register `start`.
    pub fn with_registers(mut self, start: u8, values: &[u8]) -> Self {
        let base = start as usize * self.width;
        for (i, value) in values.iter().enumerate() {
            let at = (base + i) % self.registers.len();
            self.registers[at] = *value;
        }
        self
    }

    pub fn with_script(mut self, reg: u8, values: &[u8]) -> Self {
        self.scripts.insert(reg, values.iter().copied().collect());
        self
    }

    pub fn reads_of(&self, reg: u8) -> usize {
        self.reads.get(&reg).copied().unwrap_or(0)
    }

    /// Contents of a word-wide register.
    pub fn word(&self, reg: u8) -> u16 {
        let at = reg as usize * self.width;
        u16::from_be_bytes([self.registers[at], self.registers[at + 1]])
    }

    fn advance(&mut self) -> usize {
        let at = self.cursor;
        self.cursor = (self.cursor + 1) % self.registers.len();
        at
    }

    fn write(&mut self, reg: u8, data: &[u8]) {
        self.cursor = reg as usize * self.width;
        for byte in data {
            let at = self.advance();
            self.registers[at] = *byte;
        }
    }

    fn read(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| {
                let at = self.advance();
                let reg = (at / self.width) as u8;
                if at % self.width != 0 {
                    return self.registers[at];
                }
                *self.reads.entry(reg).or_default() += 1;
                match self.scripts.get_mut(&reg) {
                    Some(script) if script.len() > 1 => script.pop_front().unwrap_or_default(),
                    Some(script) => script.front().copied().unwrap_or_default(),
                    None => self.registers[at],
                }
            })
            .collect()
    }
}

/// Build a raw get-device-info response (length byte + payload).
pub(crate) fn device_info_response(
    version: u8,
    vendor_id: u16,
    product_id: u16,
    firmware_bcd: u16,
    modification: &[u8; 8],
    serial: &[u8; 12],
) -> Vec<u8> {
    let mut response = vec![28, version];
    response.extend_from_slice(&vendor_id.to_le_bytes());
    response.extend_from_slice(&product_id.to_le_bytes());
    response.extend_from_slice(&firmware_bcd.to_le_bytes());
    response.extend_from_slice(modification);
    response.extend_from_slice(serial);
    response
}

/// Simulated adapter.
pub(crate) struct MockAdapter {
    connected: bool,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    /// Simulated targets by 7-bit address.
    pub devices: BTreeMap<u8, SimDevice>,
    /// Every byte the host wrote, in order.
    pub written: Vec<u8>,
    /// Last I2C mode selected by the host.
    pub mode: Option<u8>,
    pub bus_clears: usize,
    /// Raw response to the get-device-info command.
    pub device_info: Vec<u8>,
    /// Replaces the computed status bytes for the next scan burst.
    pub scan_response: Option<Vec<u8>>,
    /// Drop this many trailing bytes from the next response.
    pub truncate_next: Option<usize>,
    /// Hand out at most this many bytes per read.
    pub chunk: Option<usize>,
    /// This many reads return nothing while the response stays queued, as
    /// when a reply arrives after the host stopped waiting for it.
    pub stalled_reads: usize,
}

impl MockAdapter {
    pub fn new() -> Self {
        let serial: [u8; 12] = std::array::from_fn(|i| i as u8 + 1);
        Self {
            connected: true,
            pending: Vec::new(),
            rx: VecDeque::new(),
            devices: BTreeMap::new(),
            written: Vec::new(),
            mode: None,
            bus_clears: 0,
            device_info: device_info_response(0, 0x1FFB, 0x2502, 0x0102, b"-\0\0\0\0\0\0\0", &serial),
            scan_response: None,
            truncate_next: None,
            chunk: None,
            stalled_reads: 0,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::new()
        }
    }

    pub fn with_device(mut self, addr: u8, device: SimDevice) -> Self {
        self.devices.insert(addr, device);
        self
    }

    pub fn device(&self, addr: u8) -> &SimDevice {
        &self.devices[&addr]
    }

    fn respond(&mut self, mut response: Vec<u8>) {
        if let Some(n) = self.truncate_next.take() {
            response.truncate(response.len().saturating_sub(n));
        }
        self.rx.extend(response);
    }

    fn status_for(&self, addr: u8) -> u8 {
        if self.devices.contains_key(&addr) {
            STATUS_NONE
        } else {
            STATUS_ADDRESS_NACK
        }
    }

    fn read_device(&mut self, addr: u8, size: usize) -> Vec<u8> {
        let mut response = Vec::with_capacity(size + 1);
        match self.devices.get_mut(&addr) {
            Some(device) => {
                response.push(STATUS_NONE);
                response.extend(device.read(size));
            }
            None => {
                response.push(STATUS_ADDRESS_NACK);
                response.resize(size + 1, 0);
            }
        }
        response
    }

    /// Try to execute the frame at the front of `pending`. Returns the number
    /// of bytes consumed, or `None` when the frame is still incomplete.
    fn execute(&mut self) -> Option<usize> {
        let frame = self.pending.clone();
        let cmd = *frame.first()?;
        match cmd {
            CMD_WRITE => {
                if frame.len() >= 128 * 3 && is_scan_burst(&frame) {
                    let statuses = match self.scan_response.take() {
                        Some(statuses) => statuses,
                        None => (0..128u8).map(|addr| self.status_for(addr)).collect(),
                    };
                    self.respond(statuses);
                    return Some(128 * 3);
                }
                let len = *frame.get(2)? as usize;
                let need = 3 + len;
                if frame.len() < need {
                    return None;
                }
                let addr = frame[1];
                let status = self.status_for(addr);
                if len > 0 {
                    if let Some(device) = self.devices.get_mut(&addr) {
                        device.write(frame[3], &frame[4..need]);
                    }
                }
                self.respond(vec![status]);
                Some(need)
            }
            CMD_READ => {
                if frame.len() < 3 {
                    return None;
                }
                let response = self.read_device(frame[1], frame[2] as usize);
                self.respond(response);
                Some(3)
            }
            CMD_WRITE_AND_READ => {
                if frame.len() < 5 {
                    return None;
                }
                let (addr, size, reg) = (frame[1], frame[3] as usize, frame[4]);
                if let Some(device) = self.devices.get_mut(&addr) {
                    device.write(reg, &[]);
                }
                let response = self.read_device(addr, size);
                self.respond(response);
                Some(5)
            }
            CMD_SET_MODE => {
                self.mode = Some(*frame.get(1)?);
                Some(2)
            }
            CMD_CLEAR_BUS => {
                self.bus_clears += 1;
                Some(1)
            }
            CMD_DEVICE_INFO => {
                let response = self.device_info.clone();
                self.respond(response);
                Some(1)
            }
            // Resynchronize on garbage
            _ => Some(1),
        }
    }
}

fn is_scan_burst(frame: &[u8]) -> bool {
    (0..128).all(|i| {
        let probe = &frame[i * 3..i * 3 + 3];
        probe == [CMD_WRITE, i as u8, 0]
    })
}

#[async_trait]
impl Transport for MockAdapter {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.written.extend_from_slice(data);
        self.pending.extend_from_slice(data);
        while let Some(consumed) = self.execute() {
            self.pending.drain(..consumed);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.stalled_reads > 0 {
            self.stalled_reads -= 1;
            return Ok(0);
        }
        let limit = self.chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(self.rx.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_registers_do_not_overlap() {
        let mut device = SimDevice::word_registers()
            .with_registers(0x05, &[0xC1, 0x90])
            .with_registers(0x06, &[0x00, 0x54])
            .with_registers(0x07, &[0x04, 0x00]);

        assert_eq!(device.word(0x05), 0xC190);
        assert_eq!(device.word(0x06), 0x0054);
        assert_eq!(device.word(0x07), 0x0400);

        device.write(0x06, &[]);
        assert_eq!(device.read(2), [0x00, 0x54]);
        assert_eq!(device.reads_of(0x06), 1);
        assert_eq!(device.reads_of(0x07), 0);
    }

    #[test]
    fn test_byte_registers_auto_increment() {
        let mut device = SimDevice::new().with_registers(0x24, &[1, 2, 3]);
        device.write(0x24, &[]);
        assert_eq!(device.read(3), [1, 2, 3]);
        assert_eq!(device.reads_of(0x26), 1);
    }

    #[tokio::test]
    async fn test_discard_drops_queued_response() {
        let mut mock = MockAdapter::new();
        mock.write_all(&[CMD_DEVICE_INFO]).await.unwrap();
        mock.discard_input().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).await.unwrap(), 0);
    }
}

//! PNI RM3100 geomagnetic sensor driver.
//!
//! The RM3100 measures each axis by counting oscillator cycles; the cycle
//! count register per axis trades resolution for conversion time, and the
//! gain (counts per microtesla) follows from it. This driver uses single-shot
//! POLL measurements:
//!
//! ```text
//! Idle -> Triggered -> WaitingDrdy -> Reading -> Decoded -> Idle
//! ```
//!
//! A POLL command starts a conversion, the STATUS register's DRDY bit is
//! polled with a bounded number of attempts, and the 9 result bytes are read
//! from MX. Continuous measurement mode is not supported.

use std::time::Duration;

use crate::error::ValidationError;
use crate::hw_trait::i2c::I2c;
use crate::hw_trait::{HwError, Result};
use crate::tracing::prelude::*;

/// Default I2C address (SA0 and SA1 low)
pub const DEFAULT_ADDRESS: u8 = 0x20;

/// Value of the REVID register on supported parts
pub const EXPECTED_REVID: u8 = 0x22;

pub const MAX_CYCLE_COUNT: u16 = 800;
pub const DEFAULT_CYCLE_COUNT: u16 = 400;
pub const DEFAULT_NOS: u8 = 60;
pub const DEFAULT_TMRC: u8 = 0x96;

/// Start a single measurement on all three axes
pub const POLL_XYZ: u8 = 0x70;

/// STATUS bit set when a measurement is ready
pub const STATUS_DRDY: u8 = 0x80;

/// RM3100 register addresses
#[allow(dead_code)]
pub mod regs {
    /// Single-measurement trigger
    pub const POLL: u8 = 0x00;
    /// Continuous measurement mode
    pub const CMM: u8 = 0x01;
    /// Cycle count, X axis (MSB, LSB)
    pub const CCX: u8 = 0x04;
    pub const CCY: u8 = 0x06;
    pub const CCZ: u8 = 0x08;
    /// Averaging divisor
    pub const NOS: u8 = 0x0A;
    /// Continuous-mode update rate
    pub const TMRC: u8 = 0x0B;
    /// Measurement results, 3 bytes per axis, X first
    pub const MX: u8 = 0x24;
    pub const BIST: u8 = 0x33;
    pub const STATUS: u8 = 0x34;
    pub const HSHAKE: u8 = 0x35;
    pub const REVID: u8 = 0x36;
}

/// Gain in counts per microtesla for a cycle count.
pub fn gain(cycle_count: u16) -> u16 {
    (0.3671 * f64::from(cycle_count) + 1.5).floor() as u16
}

/// Continuous-mode update rates (Hz) and their TMRC codes.
const SAMPLE_RATES: [(u16, u8); 8] = [
    (2, 0x0A),
    (4, 0x09),
    (8, 0x08),
    (16, 0x07),
    (31, 0x06),
    (62, 0x05),
    (125, 0x04),
    (220, 0x03),
];

/// Round a requested update rate up to one the sensor supports.
///
/// Returns the rate and its TMRC code. Requests above 220 Hz clamp to 220.
pub fn supported_sample_rate(hz: u16) -> (u16, u8) {
    SAMPLE_RATES
        .iter()
        .copied()
        .find(|&(rate, _)| rate >= hz)
        .unwrap_or(SAMPLE_RATES[SAMPLE_RATES.len() - 1])
}

/// A validated per-axis cycle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleCount(u16);

impl CycleCount {
    pub fn new(value: u16) -> std::result::Result<Self, ValidationError> {
        if (1..=MAX_CYCLE_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::CycleCountOutOfRange(value))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn gain(self) -> u16 {
        gain(self.0)
    }
}

impl Default for CycleCount {
    fn default() -> Self {
        Self(DEFAULT_CYCLE_COUNT)
    }
}

impl TryFrom<u16> for CycleCount {
    type Error = ValidationError;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Cycle counts and averaging used to turn raw counts into microtesla.
///
/// Gains are always derived from the cycle counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationParams {
    cycle_counts: [CycleCount; 3],
    nos: u8,
}

impl CalibrationParams {
    pub fn new(cycle_counts: [CycleCount; 3], nos: u8) -> std::result::Result<Self, ValidationError> {
        if nos == 0 {
            return Err(ValidationError::ZeroNos);
        }
        Ok(Self { cycle_counts, nos })
    }

    /// Same cycle count on every axis.
    pub fn uniform(cycle_count: u16, nos: u8) -> std::result::Result<Self, ValidationError> {
        let cc = CycleCount::new(cycle_count)?;
        Self::new([cc; 3], nos)
    }

    pub fn cycle_counts(&self) -> [CycleCount; 3] {
        self.cycle_counts
    }

    pub fn nos(&self) -> u8 {
        self.nos
    }

    pub fn gains(&self) -> [u16; 3] {
        self.cycle_counts.map(CycleCount::gain)
    }

    /// Convert a raw sample to microtesla.
    pub fn normalize(&self, sample: &SensorSample) -> MagneticField {
        let [gx, gy, gz] = self.gains().map(f64::from);
        let nos = f64::from(self.nos);
        MagneticField {
            x: f64::from(sample.x) / nos / gx,
            y: f64::from(sample.y) / nos / gy,
            z: f64::from(sample.z) / nos / gz,
        }
    }
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            cycle_counts: [CycleCount::default(); 3],
            nos: DEFAULT_NOS,
        }
    }
}

/// Raw signed 24-bit counts for the three axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSample {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SensorSample {
    /// Assemble one axis from its big-endian 24-bit two's-complement bytes.
    pub fn decode_axis(bytes: [u8; 3]) -> i32 {
        (i32::from(bytes[0] as i8) << 16) | (i32::from(bytes[1]) << 8) | i32::from(bytes[2])
    }

    /// Decode the 9 bytes read from MX.
    pub fn from_bytes(bytes: &[u8; 9]) -> Self {
        Self {
            x: Self::decode_axis([bytes[0], bytes[1], bytes[2]]),
            y: Self::decode_axis([bytes[3], bytes[4], bytes[5]]),
            z: Self::decode_axis([bytes[6], bytes[7], bytes[8]]),
        }
    }
}

/// Field strength in microtesla.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MagneticField {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Bounds on the DRDY wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between STATUS reads
    pub drdy_delay: Duration,
    /// STATUS reads before giving up
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            drdy_delay: Duration::from_millis(10),
            max_polls: 100,
        }
    }
}

/// Where the driver is in a POLL measurement.
///
/// [`Rm3100::trigger`], [`Rm3100::poll_ready`] and
/// [`Rm3100::read_measurement`] step through these in order; any failure
/// drops back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    /// POLL written, STATUS not read yet
    Triggered,
    /// STATUS read without DRDY
    WaitingDrdy,
    /// DRDY seen, measurement not read yet
    Reading,
    /// Measurement read and decoded
    Decoded,
}

/// RM3100 driver
pub struct Rm3100<I: I2c> {
    i2c: I,
    address: u8,
    calibration: CalibrationParams,
    poll: PollConfig,
    state: PollState,
}

impl<I: I2c> Rm3100<I> {
    /// Create a new RM3100 driver with default address
    pub fn new(i2c: I) -> Self {
        Self::new_with_address(i2c, DEFAULT_ADDRESS)
    }

    /// Create a new RM3100 driver with custom address
    pub fn new_with_address(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            calibration: CalibrationParams::default(),
            poll: PollConfig::default(),
            state: PollState::Idle,
        }
    }

    /// Use `calibration` for normalization. Nothing is written to the
    /// sensor until [`apply_calibration`](Self::apply_calibration).
    pub fn with_calibration(mut self, calibration: CalibrationParams) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn calibration(&self) -> &CalibrationParams {
        &self.calibration
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, reg, &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c.write(self.address, reg, &[value]).await
    }

    /// Read REVID and check it against the supported revision.
    pub async fn verify(&mut self) -> Result<u8> {
        let revid = self.read_register(regs::REVID).await?;
        if revid != EXPECTED_REVID {
            return Err(ValidationError::UnexpectedRevision {
                found: revid,
                expected: EXPECTED_REVID,
            }
            .into());
        }
        info!(addr = %format!("{:#04x}", self.address), revid = %format!("{:#04x}", revid), "RM3100 detected");
        Ok(revid)
    }

    /// Write all three cycle-count registers in one burst.
    pub async fn set_cycle_counts(&mut self, counts: [CycleCount; 3]) -> Result<()> {
        let mut data = [0u8; 6];
        for (chunk, cc) in data.chunks_exact_mut(2).zip(counts) {
            chunk.copy_from_slice(&cc.get().to_be_bytes());
        }
        self.i2c.write(self.address, regs::CCX, &data).await?;

        self.calibration.cycle_counts = counts;
        debug!(
            counts = ?counts.map(CycleCount::get),
            gains = ?self.calibration.gains(),
            "RM3100 cycle counts set"
        );
        Ok(())
    }

    /// Read back the X, Y and Z cycle counts.
    pub async fn read_cycle_counts(&mut self) -> Result<[u16; 3]> {
        let mut data = [0u8; 6];
        self.i2c.write_read(self.address, regs::CCX, &mut data).await?;
        Ok([
            u16::from_be_bytes([data[0], data[1]]),
            u16::from_be_bytes([data[2], data[3]]),
            u16::from_be_bytes([data[4], data[5]]),
        ])
    }

    pub async fn set_nos(&mut self, nos: u8) -> Result<()> {
        if nos == 0 {
            return Err(ValidationError::ZeroNos.into());
        }
        self.write_register(regs::NOS, nos).await?;
        self.calibration.nos = nos;
        Ok(())
    }

    pub async fn set_tmrc(&mut self, code: u8) -> Result<()> {
        self.write_register(regs::TMRC, code).await
    }

    /// Program the continuous-mode update rate. Returns the rate selected.
    pub async fn set_sample_rate(&mut self, hz: u16) -> Result<u16> {
        let (rate, code) = supported_sample_rate(hz);
        self.set_tmrc(code).await?;
        debug!(requested = hz, rate, tmrc = %format!("{:#04x}", code), "RM3100 sample rate set");
        Ok(rate)
    }

    /// Write the configured cycle counts and NOS to the sensor.
    ///
    /// With `verify`, the cycle-count registers are read back and compared.
    pub async fn apply_calibration(&mut self, verify: bool) -> Result<()> {
        let calibration = self.calibration;
        self.set_cycle_counts(calibration.cycle_counts).await?;

        if verify {
            let written = calibration.cycle_counts.map(CycleCount::get);
            let read = self.read_cycle_counts().await?;
            if read != written {
                return Err(ValidationError::CycleCountMismatch { written, read }.into());
            }
        }

        self.set_nos(calibration.nos).await
    }

    async fn data_ready(&mut self) -> Result<bool> {
        Ok(self.read_register(regs::STATUS).await? & STATUS_DRDY != 0)
    }

    /// Start a single measurement on all three axes.
    pub async fn trigger(&mut self) -> Result<()> {
        self.state = PollState::Idle;
        self.write_register(regs::POLL, POLL_XYZ).await?;
        self.state = PollState::Triggered;
        Ok(())
    }

    /// Read STATUS once. Returns whether DRDY is set.
    pub async fn poll_ready(&mut self) -> Result<bool> {
        match self.data_ready().await {
            Ok(ready) => {
                self.state = if ready {
                    PollState::Reading
                } else {
                    PollState::WaitingDrdy
                };
                Ok(ready)
            }
            Err(e) => {
                self.state = PollState::Idle;
                Err(e)
            }
        }
    }

    /// Poll STATUS until DRDY is set. Returns the number of reads it took.
    pub async fn wait_for_data_ready(&mut self) -> Result<u32> {
        for attempt in 1..=self.poll.max_polls {
            if self.poll_ready().await? {
                return Ok(attempt);
            }
            if attempt < self.poll.max_polls {
                tokio::time::sleep(self.poll.drdy_delay).await;
            }
        }

        self.state = PollState::Idle;
        Err(HwError::Timeout {
            what: "RM3100 data ready",
            attempts: self.poll.max_polls,
        })
    }

    /// Read and decode the measurement once DRDY has been seen.
    pub async fn read_measurement(&mut self) -> Result<SensorSample> {
        if self.state != PollState::Reading {
            return Err(HwError::InvalidParameter(format!(
                "no measurement ready (state {:?})",
                self.state
            )));
        }

        self.state = PollState::Idle;
        let mut raw = [0u8; 9];
        self.i2c.write_read(self.address, regs::MX, &mut raw).await?;

        self.state = PollState::Decoded;
        Ok(SensorSample::from_bytes(&raw))
    }

    /// Take one POLL measurement.
    ///
    /// The state returns to [`PollState::Idle`] whether or not the cycle
    /// succeeds; a failed cycle is not retried.
    pub async fn read_poll(&mut self) -> Result<SensorSample> {
        let result = self.poll_cycle().await;
        self.state = PollState::Idle;
        result
    }

    async fn poll_cycle(&mut self) -> Result<SensorSample> {
        self.trigger().await?;
        let polls = self.wait_for_data_ready().await?;
        let sample = self.read_measurement().await?;
        trace!(polls, x = sample.x, y = sample.y, z = sample.z, "RM3100 sample");
        Ok(sample)
    }

    /// Take one POLL measurement and convert it to microtesla.
    pub async fn read_field(&mut self) -> Result<(SensorSample, MagneticField)> {
        let sample = self.read_poll().await?;
        Ok((sample, self.calibration.normalize(&sample)))
    }
}

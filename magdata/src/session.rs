//! Acquisition session.
//!
//! A [`Session`] owns one adapter and the configuration for the sensors on
//! its bus. It performs the bring-up sequence once and then produces one
//! [`Reading`] per call to [`sample`](Session::sample).

use crate::config::SessionConfig;
use crate::error::Result;
use crate::mgmt_protocol::pololu::{DeviceInfo, PololuAdapter};
use crate::peripheral::mcp9808::{Mcp9808, TemperatureReading};
use crate::peripheral::rm3100::{CalibrationParams, MagneticField, Rm3100, SensorSample};
use crate::tracing::prelude::*;
use crate::transport::{SerialTransport, Transport};

/// One acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// `None` when no local sensor is configured or its read failed
    pub local_temperature: Option<TemperatureReading>,
    /// `None` when the read failed
    pub remote_temperature: Option<TemperatureReading>,
    pub raw: SensorSample,
    pub field: MagneticField,
}

pub struct Session<T: Transport> {
    adapter: PololuAdapter<T>,
    config: SessionConfig,
    calibration: CalibrationParams,
    device_info: Option<DeviceInfo>,
}

impl Session<SerialTransport> {
    /// Connect to the adapter named in `config`.
    pub async fn open(config: SessionConfig) -> Result<Self> {
        let transport = SerialTransport::open(config.port.as_str()).await?;
        Ok(Self::new(PololuAdapter::new(transport), config))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(adapter: PololuAdapter<T>, config: SessionConfig) -> Self {
        let calibration = config.calibration;
        Self {
            adapter,
            config,
            calibration,
            device_info: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Calibration in effect on the magnetometer.
    pub fn calibration(&self) -> &CalibrationParams {
        &self.calibration
    }

    /// Adapter identity, once [`initialize`](Self::initialize) has run.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn adapter(&self) -> &PololuAdapter<T> {
        &self.adapter
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    fn magnetometer(&mut self) -> Rm3100<&mut PololuAdapter<T>> {
        Rm3100::new_with_address(&mut self.adapter, self.config.mag_address)
            .with_calibration(self.calibration)
            .with_poll_config(self.config.poll)
    }

    /// Bring up the adapter and every sensor.
    pub async fn initialize(&mut self) -> Result<()> {
        let info = self.adapter.get_device_info().await?;
        info.validate_identity()?;
        info!(
            vendor = %format!("{:#06x}", info.vendor_id),
            product = %format!("{:#06x}", info.product_id),
            firmware = %info.firmware_version(),
            modification = %info.firmware_modification(),
            serial = %info.serial_number(),
            "Adapter identified"
        );
        self.device_info = Some(info);

        self.adapter.clear_bus().await?;
        let mode = self.adapter.set_frequency(self.config.bus_khz).await?;
        info!(khz = mode.khz(), "I2C bus configured");

        let verify = self.config.verify_cycle_counts;
        let mut mag = self.magnetometer();
        mag.verify().await?;
        mag.apply_calibration(verify).await?;
        let calibration = *mag.calibration();
        self.calibration = calibration;
        info!(
            cycle_counts = ?calibration.cycle_counts().map(|cc| cc.get()),
            gains = ?calibration.gains(),
            nos = calibration.nos(),
            "Magnetometer configured"
        );

        Mcp9808::new_with_address(&mut self.adapter, self.config.remote_temp_address)
            .verify()
            .await?;
        if let Some(addr) = self.config.local_temp_address {
            Mcp9808::new_with_address(&mut self.adapter, addr)
                .verify()
                .await?;
        }

        Ok(())
    }

    async fn read_temperature(&mut self, addr: u8) -> Option<TemperatureReading> {
        match Mcp9808::new_with_address(&mut self.adapter, addr)
            .read_temperature()
            .await
        {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(addr = %format!("{:#04x}", addr), error = %e, "Temperature read failed");
                None
            }
        }
    }

    /// Read the temperatures, then take one magnetometer measurement.
    ///
    /// A failed temperature read is logged and reported as `None`; a failed
    /// magnetometer measurement fails the whole cycle.
    pub async fn sample(&mut self) -> Result<Reading> {
        let local_temperature = match self.config.local_temp_address {
            Some(addr) => self.read_temperature(addr).await,
            None => None,
        };
        let remote_temperature = self.read_temperature(self.config.remote_temp_address).await;

        let (raw, field) = self.magnetometer().read_field().await?;

        Ok(Reading {
            local_temperature,
            remote_temperature,
            raw,
            field,
        })
    }

    /// Addresses that acknowledge on the bus.
    pub async fn scan(&mut self, max_results: usize) -> Result<Vec<u8>> {
        Ok(self.adapter.scan(max_results).await?)
    }

    pub fn close(&mut self) {
        self.adapter.disconnect();
    }
}

//! Three-channel INA3221 shunt/bus monitor over blocking I2C.

use core::fmt::Debug;

use embedded_hal::i2c::I2c;
use thiserror::Error;

use crate::{
    hal::{PowerMonitor, SensorError},
    types::{PowerReading, POWER_CHANNELS},
};

pub const DEFAULT_ADDRESS: u8 = 0x40;
pub const DEFAULT_SHUNT_OHMS: f32 = 0.1;

mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const SHUNT_CH1: u8 = 0x01;
    pub const BUS_CH1: u8 = 0x02;
    pub const MANUFACTURER_ID: u8 = 0xFE;
}

const MANUFACTURER_TI: u16 = 0x5449;
// All channels on, 16 averages, 1.1 ms conversions, continuous shunt + bus.
const CONFIG_CONTINUOUS: u16 = 0x7527;

const SHUNT_LSB_V: f32 = 40e-6;
const BUS_LSB_V: f32 = 8e-3;

#[derive(Debug, Error)]
pub enum Ina3221Error<E: Debug> {
    #[error("i2c: {0:?}")]
    I2c(E),
    #[error("unexpected manufacturer id {0:#06x}")]
    UnknownDevice(u16),
    #[error("channel {0} out of range")]
    InvalidChannel(usize),
}

impl<E: Debug> From<Ina3221Error<E>> for SensorError {
    fn from(err: Ina3221Error<E>) -> Self {
        match err {
            Ina3221Error::I2c(inner) => SensorError::Bus(format!("{inner:?}")),
            Ina3221Error::UnknownDevice(id) => {
                SensorError::NotFound(format!("manufacturer id {id:#06x}"))
            }
            Ina3221Error::InvalidChannel(channel) => SensorError::InvalidChannel(channel),
        }
    }
}

#[derive(Debug)]
pub struct Ina3221<I2C> {
    i2c: I2C,
    address: u8,
    shunt_ohms: [f32; POWER_CHANNELS],
}

impl<I2C: I2c> Ina3221<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            shunt_ohms: [DEFAULT_SHUNT_OHMS; POWER_CHANNELS],
        }
    }

    /// Checks the manufacturer id and starts continuous conversion.
    pub fn probe(&mut self) -> Result<(), Ina3221Error<I2C::Error>> {
        let id = self.read_register(reg::MANUFACTURER_ID)?;
        if id != MANUFACTURER_TI {
            return Err(Ina3221Error::UnknownDevice(id));
        }
        self.write_register(reg::CONFIG, CONFIG_CONTINUOUS)
    }

    pub fn measure(&mut self, channel: usize) -> Result<PowerReading, Ina3221Error<I2C::Error>> {
        let ohms = *self
            .shunt_ohms
            .get(channel)
            .ok_or(Ina3221Error::InvalidChannel(channel))?;
        // Registers are laid out as shunt/bus pairs per channel.
        let offset = (channel as u8) * 2;

        let shunt_raw = self.read_register(reg::SHUNT_CH1 + offset)?;
        let bus_raw = self.read_register(reg::BUS_CH1 + offset)?;

        let shunt_voltage = f32::from(register_value(shunt_raw)) * SHUNT_LSB_V;
        let bus_voltage = f32::from(register_value(bus_raw)) * BUS_LSB_V;
        let current = if ohms > 0.0 { shunt_voltage / ohms } else { 0.0 };

        Ok(PowerReading::from_measurements(bus_voltage, shunt_voltage, current))
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn read_register(&mut self, register: u8) -> Result<u16, Ina3221Error<I2C::Error>> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(Ina3221Error::I2c)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_register(&mut self, register: u8, value: u16) -> Result<(), Ina3221Error<I2C::Error>> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c
            .write(self.address, &[register, hi, lo])
            .map_err(Ina3221Error::I2c)
    }
}

/// Signed 13-bit measurement in the upper bits of the register.
fn register_value(raw: u16) -> i16 {
    (raw as i16) >> 3
}

impl<I2C: I2c> PowerMonitor for Ina3221<I2C> {
    fn init(&mut self) -> Result<(), SensorError> {
        self.probe().map_err(SensorError::from)
    }

    fn read_channel(&mut self, channel: usize) -> Result<PowerReading, SensorError> {
        self.measure(channel).map_err(SensorError::from)
    }
}

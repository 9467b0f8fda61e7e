//! RFM69 packet radio driver
//!
//! Register-level driver for HopeRF RFM69 modules (W/HW/CW/HCW) speaking
//! the common node-addressed packet format:
//!
//! ```text
//! | len | target | sender | ctl | payload (len - 3 bytes) |
//! ```
//!
//! [`Rfm69`] is generic over the `embedded-hal` SPI and GPIO traits, so it
//! runs on any bus implementation. With the `rfm69` feature enabled,
//! [`SpidevRfm69`] opens the module through Linux spidev and gpio-cdev when
//! the radio source initialises it.
//!
//! The module is configured for 55.5 kbps FSK with a two-byte sync word
//! (`0x2D`, network id), variable-length packets with CRC and no
//! encryption. Address filtering is done in software so broadcast frames
//! are accepted too. Frames that request an ACK are answered when
//! `auto_acknowledge` is set.

use crate::config::RadioConfig;
use crate::error::{BridgeError, Result};
use crate::source::RadioDriver;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Operation, SpiDevice};
use std::time::{Duration, Instant};

#[allow(dead_code)]
mod reg {
    pub const FIFO: u8 = 0x00;
    pub const OPMODE: u8 = 0x01;
    pub const DATAMODUL: u8 = 0x02;
    pub const BITRATEMSB: u8 = 0x03;
    pub const BITRATELSB: u8 = 0x04;
    pub const FDEVMSB: u8 = 0x05;
    pub const FDEVLSB: u8 = 0x06;
    pub const FRFMSB: u8 = 0x07;
    pub const FRFMID: u8 = 0x08;
    pub const FRFLSB: u8 = 0x09;
    pub const VERSION: u8 = 0x10;
    pub const PALEVEL: u8 = 0x11;
    pub const OCP: u8 = 0x13;
    pub const RXBW: u8 = 0x19;
    pub const RSSIVALUE: u8 = 0x24;
    pub const DIOMAPPING1: u8 = 0x25;
    pub const DIOMAPPING2: u8 = 0x26;
    pub const IRQFLAGS1: u8 = 0x27;
    pub const IRQFLAGS2: u8 = 0x28;
    pub const RSSITHRESH: u8 = 0x29;
    pub const SYNCCONFIG: u8 = 0x2E;
    pub const SYNCVALUE1: u8 = 0x2F;
    pub const SYNCVALUE2: u8 = 0x30;
    pub const PACKETCONFIG1: u8 = 0x37;
    pub const PAYLOADLENGTH: u8 = 0x38;
    pub const NODEADRS: u8 = 0x39;
    pub const BROADCASTADRS: u8 = 0x3A;
    pub const FIFOTHRESH: u8 = 0x3C;
    pub const PACKETCONFIG2: u8 = 0x3D;
    pub const TEMP1: u8 = 0x4E;
    pub const TEMP2: u8 = 0x4F;
    pub const TESTPA1: u8 = 0x5A;
    pub const TESTPA2: u8 = 0x5C;
    pub const TESTDAGC: u8 = 0x6F;
}

/// Silicon revision reported by every RFM69 in `RegVersion`
const CHIP_VERSION: u8 = 0x24;

/// Address every node accepts
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Longest frame the FIFO holds, header included
const MAX_FRAME_LEN: usize = 66;

const WRITE_FLAG: u8 = 0x80;
const IRQ1_MODE_READY: u8 = 0x80;
const IRQ2_FIFO_OVERRUN: u8 = 0x10;
const IRQ2_PACKET_SENT: u8 = 0x08;
const IRQ2_PAYLOAD_READY: u8 = 0x04;
const PACKET2_RX_RESTART: u8 = 0x04;
const TEMP1_MEAS_START: u8 = 0x08;
const TEMP1_MEAS_RUNNING: u8 = 0x04;
const CTL_SEND_ACK: u8 = 0x80;
const CTL_REQUEST_ACK: u8 = 0x40;

/// Offset of the uncalibrated temperature reading
const COARSE_TEMP_COEF: i16 = -90;

/// Crystal frequency over 2^19
const FSTEP_HZ: f64 = 32_000_000.0 / 524_288.0;

const MODE_READY_TIMEOUT: Duration = Duration::from_millis(50);
const PACKET_SENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Register writes applied at every init, before the per-node values
const BASE_CONFIG: &[(u8, u8)] = &[
    // Sequencer on, standby
    (reg::OPMODE, 0x04),
    // Packet mode, FSK, no shaping
    (reg::DATAMODUL, 0x00),
    // 55.5 kbps
    (reg::BITRATEMSB, 0x02),
    (reg::BITRATELSB, 0x40),
    // 50 kHz deviation
    (reg::FDEVMSB, 0x03),
    (reg::FDEVLSB, 0x33),
    (reg::RXBW, 0x42),
    // DIO0 = PayloadReady, ClkOut off
    (reg::DIOMAPPING1, 0x40),
    (reg::DIOMAPPING2, 0x07),
    (reg::IRQFLAGS2, IRQ2_FIFO_OVERRUN),
    // -110 dBm
    (reg::RSSITHRESH, 220),
    // Sync on, two bytes
    (reg::SYNCCONFIG, 0x88),
    (reg::SYNCVALUE1, 0x2D),
    // Variable length, CRC on, no address filtering
    (reg::PACKETCONFIG1, 0x90),
    (reg::PAYLOADLENGTH, MAX_FRAME_LEN as u8),
    (reg::BROADCASTADRS, BROADCAST_ADDRESS),
    (reg::FIFOTHRESH, 0x8F),
    // Auto RX restart, AES off
    (reg::PACKETCONFIG2, 0x12),
    // Fading margin improvement
    (reg::TESTDAGC, 0x30),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sleep,
    Standby,
    Tx,
    Rx,
}

impl Mode {
    fn bits(self) -> u8 {
        match self {
            Mode::Sleep => 0x00,
            Mode::Standby => 0x04,
            Mode::Tx => 0x0C,
            Mode::Rx => 0x10,
        }
    }
}

/// A frame addressed to this node (or broadcast)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: u8,
    pub target: u8,
    pub ack_requested: bool,
    pub rssi_dbm: i16,
    pub payload: Vec<u8>,
}

/// Frequency register value for a carrier in MHz
fn frf_for(frequency_mhz: u32) -> Result<u32> {
    if !(290..=1020).contains(&frequency_mhz) {
        return Err(BridgeError::Config(format!(
            "radio frequency {} MHz is outside the RFM69 range",
            frequency_mhz
        )));
    }
    Ok((f64::from(frequency_mhz) * 1_000_000.0 / FSTEP_HZ).round() as u32)
}

fn bus_error<E: embedded_hal::spi::Error>(e: E) -> BridgeError {
    BridgeError::SourceRead(format!("SPI transfer failed: {:?}", e.kind()))
}

fn pin_error<E: embedded_hal::digital::Error>(e: E) -> BridgeError {
    BridgeError::SourceRead(format!("reset pin failed: {:?}", e.kind()))
}

/// RFM69 on an SPI bus with an optional reset line
pub struct Rfm69<SPI, RST> {
    spi: SPI,
    reset: Option<RST>,
    node_id: u8,
    high_power: bool,
    auto_acknowledge: bool,
    mode: Mode,
}

impl<SPI, RST> Rfm69<SPI, RST>
where
    SPI: SpiDevice,
    RST: OutputPin,
{
    /// Wrap the bus; nothing is sent until [`RadioDriver::init`]
    pub fn new(spi: SPI, reset: Option<RST>) -> Self {
        Self {
            spi,
            reset,
            node_id: 0,
            high_power: false,
            auto_acknowledge: false,
            mode: Mode::Standby,
        }
    }

    fn read_reg(&mut self, addr: u8) -> Result<u8> {
        let mut buf = [addr & !WRITE_FLAG, 0];
        self.spi.transfer_in_place(&mut buf).map_err(bus_error)?;
        Ok(buf[1])
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> Result<()> {
        self.spi
            .write(&[addr | WRITE_FLAG, value])
            .map_err(bus_error)
    }

    fn wait_for(&mut self, addr: u8, mask: u8, timeout: Duration, what: &str) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.read_reg(addr)? & mask == 0 {
            if Instant::now() >= deadline {
                return Err(BridgeError::SourceRead(format!("radio {} timed out", what)));
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        if self.mode == mode {
            return Ok(());
        }
        let opmode = self.read_reg(reg::OPMODE)?;
        self.write_reg(reg::OPMODE, (opmode & 0xE3) | mode.bits())?;

        // High-power modules need the PA boost only while transmitting.
        if self.high_power {
            match mode {
                Mode::Tx => {
                    self.write_reg(reg::TESTPA1, 0x5D)?;
                    self.write_reg(reg::TESTPA2, 0x7C)?;
                }
                Mode::Rx => {
                    self.write_reg(reg::TESTPA1, 0x55)?;
                    self.write_reg(reg::TESTPA2, 0x70)?;
                }
                _ => {}
            }
        }

        if mode != Mode::Sleep {
            self.wait_for(reg::IRQFLAGS1, IRQ1_MODE_READY, MODE_READY_TIMEOUT, "mode change")?;
        }
        self.mode = mode;
        Ok(())
    }

    fn pulse_reset(&mut self) -> Result<()> {
        if let Some(pin) = self.reset.as_mut() {
            pin.set_high().map_err(pin_error)?;
            std::thread::sleep(Duration::from_millis(1));
            pin.set_low().map_err(pin_error)?;
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        let frf = frf_for(config.frequency_mhz)?;

        self.pulse_reset()?;
        let version = self.read_reg(reg::VERSION)?;
        if version != CHIP_VERSION {
            return Err(BridgeError::SourceUnavailable(format!(
                "no RFM69 on the bus (version register reads 0x{:02X})",
                version
            )));
        }

        for &(addr, value) in BASE_CONFIG {
            self.write_reg(addr, value)?;
        }
        let [_, msb, mid, lsb] = frf.to_be_bytes();
        self.write_reg(reg::FRFMSB, msb)?;
        self.write_reg(reg::FRFMID, mid)?;
        self.write_reg(reg::FRFLSB, lsb)?;
        self.write_reg(reg::SYNCVALUE2, config.network_id)?;
        self.write_reg(reg::NODEADRS, config.node_id)?;

        self.high_power = config.high_power;
        if self.high_power {
            // Over-current protection off, PA1 + PA2, full power
            self.write_reg(reg::OCP, 0x0F)?;
            self.write_reg(reg::PALEVEL, 0x40 | 0x20 | 0x1F)?;
        } else {
            self.write_reg(reg::PALEVEL, 0x80 | 0x1F)?;
        }

        self.node_id = config.node_id;
        self.auto_acknowledge = config.auto_acknowledge;
        // BASE_CONFIG left the chip in standby.
        self.mode = Mode::Sleep;
        self.set_mode(Mode::Standby)
    }

    /// Die temperature in degrees Celsius (uncalibrated, about ±2 °C)
    pub fn temperature(&mut self) -> Result<i16> {
        self.set_mode(Mode::Standby)?;
        self.write_reg(reg::TEMP1, TEMP1_MEAS_START)?;
        let deadline = Instant::now() + MODE_READY_TIMEOUT;
        while self.read_reg(reg::TEMP1)? & TEMP1_MEAS_RUNNING != 0 {
            if Instant::now() >= deadline {
                return Err(BridgeError::SourceRead(
                    "radio temperature measurement timed out".to_string(),
                ));
            }
            std::thread::yield_now();
        }
        let raw = self.read_reg(reg::TEMP2)?;
        // Rising temperature lowers the raw value.
        Ok(i16::from(!raw) + COARSE_TEMP_COEF)
    }

    /// Take the frame waiting in the FIFO, if any, and keep listening
    pub fn receive_frame(&mut self) -> Result<Option<Frame>> {
        if self.mode != Mode::Rx {
            if self.read_reg(reg::IRQFLAGS2)? & IRQ2_PAYLOAD_READY != 0 {
                let config2 = self.read_reg(reg::PACKETCONFIG2)?;
                self.write_reg(reg::PACKETCONFIG2, (config2 & 0xFB) | PACKET2_RX_RESTART)?;
            }
            self.set_mode(Mode::Rx)?;
        }

        if self.read_reg(reg::IRQFLAGS2)? & IRQ2_PAYLOAD_READY == 0 {
            return Ok(None);
        }
        let rssi_dbm = -i16::from(self.read_reg(reg::RSSIVALUE)?) / 2;

        self.set_mode(Mode::Standby)?;
        let len = usize::from(self.read_reg(reg::FIFO)?).min(MAX_FRAME_LEN);
        let mut frame = None;
        if len >= 3 {
            let mut buf = vec![0u8; len];
            self.spi
                .transaction(&mut [Operation::Write(&[reg::FIFO]), Operation::Read(&mut buf)])
                .map_err(bus_error)?;

            let (target, sender, ctl) = (buf[0], buf[1], buf[2]);
            if target == self.node_id || target == BROADCAST_ADDRESS {
                frame = Some(Frame {
                    sender,
                    target,
                    ack_requested: ctl & CTL_REQUEST_ACK != 0,
                    rssi_dbm,
                    payload: buf.split_off(3),
                });
            } else {
                tracing::trace!(target, sender, "Radio frame for another node ignored");
            }
        }

        if let Some(frame) = &frame {
            if self.auto_acknowledge && frame.ack_requested && frame.target == self.node_id {
                if let Err(e) = self.send_ack(frame.sender) {
                    tracing::warn!(to = frame.sender, "Radio ACK failed: {}", e);
                }
            }
        }
        self.set_mode(Mode::Rx)?;
        Ok(frame)
    }

    fn send_ack(&mut self, to: u8) -> Result<()> {
        self.set_mode(Mode::Standby)?;
        self.spi
            .write(&[reg::FIFO | WRITE_FLAG, 3, to, self.node_id, CTL_SEND_ACK])
            .map_err(bus_error)?;
        self.set_mode(Mode::Tx)?;
        let sent = self.wait_for(reg::IRQFLAGS2, IRQ2_PACKET_SENT, PACKET_SENT_TIMEOUT, "ACK");
        self.set_mode(Mode::Standby)?;
        sent
    }
}

impl<SPI, RST> RadioDriver for Rfm69<SPI, RST>
where
    SPI: SpiDevice + Send,
    RST: OutputPin + Send,
{
    fn init(&mut self, config: &RadioConfig) -> Result<()> {
        self.configure(config)
    }

    fn receive(&mut self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .receive_frame()?
            .map(|frame| {
                tracing::debug!(
                    sender = frame.sender,
                    rssi_dbm = frame.rssi_dbm,
                    bytes = frame.payload.len(),
                    "Radio frame received"
                );
                vec![frame.payload]
            })
            .unwrap_or_default())
    }

    fn read_temperature(&mut self) -> Option<f32> {
        match self.temperature() {
            Ok(celsius) => Some(f32::from(celsius)),
            Err(e) => {
                tracing::debug!("Radio temperature unavailable: {}", e);
                None
            }
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.set_mode(Mode::Sleep) {
            tracing::debug!("Radio sleep failed: {}", e);
        }
    }
}

#[cfg(feature = "rfm69")]
pub use linux::SpidevRfm69;

#[cfg(feature = "rfm69")]
mod linux {
    use super::Rfm69;
    use crate::config::RadioConfig;
    use crate::error::{BridgeError, Result};
    use crate::source::RadioDriver;
    use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
    use linux_embedded_hal::{CdevPin, SpidevDevice};

    /// RFM69 on Linux spidev, reset through gpio-cdev
    ///
    /// The bus is opened on every [`RadioDriver::init`], so a module that
    /// failed (or a spidev node that appeared late) is picked up on the
    /// next poll.
    #[derive(Default)]
    pub struct SpidevRfm69 {
        radio: Option<Rfm69<SpidevDevice, CdevPin>>,
    }

    impl SpidevRfm69 {
        pub fn new() -> Self {
            Self::default()
        }

        fn radio(&mut self) -> Result<&mut Rfm69<SpidevDevice, CdevPin>> {
            self.radio
                .as_mut()
                .ok_or_else(|| BridgeError::SourceUnavailable("radio not opened".to_string()))
        }
    }

    fn unavailable(what: &str, e: impl std::fmt::Debug) -> BridgeError {
        BridgeError::SourceUnavailable(format!("{}: {:?}", what, e))
    }

    fn open_reset(config: &RadioConfig) -> Result<Option<CdevPin>> {
        let Some(offset) = config.reset_pin else {
            return Ok(None);
        };
        let mut chip = Chip::new(&config.gpio_chip)
            .map_err(|e| unavailable(&format!("cannot open {}", config.gpio_chip.display()), e))?;
        let handle = chip
            .get_line(offset)
            .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, "packet-bridge"))
            .map_err(|e| unavailable(&format!("cannot claim reset line {}", offset), e))?;
        CdevPin::new(handle)
            .map(Some)
            .map_err(|e| unavailable("reset line", e))
    }

    impl RadioDriver for SpidevRfm69 {
        fn init(&mut self, config: &RadioConfig) -> Result<()> {
            self.radio = None;

            let mut spi = SpidevDevice::open(&config.spi_device).map_err(|e| {
                unavailable(&format!("cannot open {}", config.spi_device.display()), e)
            })?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(config.spi_speed_hz)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.0
                .configure(&options)
                .map_err(|e| unavailable("cannot configure spidev", e))?;

            let mut radio = Rfm69::new(spi, open_reset(config)?);
            radio.init(config)?;
            self.radio = Some(radio);
            Ok(())
        }

        fn receive(&mut self) -> Result<Vec<Vec<u8>>> {
            self.radio()?.receive()
        }

        fn read_temperature(&mut self) -> Option<f32> {
            self.radio.as_mut().and_then(|radio| radio.read_temperature())
        }

        fn shutdown(&mut self) {
            if let Some(mut radio) = self.radio.take() {
                radio.shutdown();
            }
        }
    }
}

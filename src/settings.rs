//! Settings related to the serial link and the co-processor protocol.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings related to the serial port and the link protocol and
/// acts as a [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate used once the application firmware runs.
    pub baud_rate: u32,
    /// The baud rate used to talk to the mask ROM loader.
    pub rom_baud_rate: u32,
    /// The baud rate the flasher stub switches to after launch. Passed to the
    /// stub as its launch parameter.
    pub stub_baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Path to the co-processor firmware image, with its MD5 digest appended
    /// as the last 16 bytes. When not set, no provisioning is attempted and
    /// the co-processor runs whatever it has in flash.
    pub firmware_image: Option<String>,
    /// Path to the flasher stub container.
    pub stub_image: Option<String>,

    /// Bound for every wait on the peer's readiness or response, in
    /// microseconds.
    pub transport_timeout_us: u64,
    /// How long a join attempt may take, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How many provisioning cycles are attempted before falling back.
    pub max_loader_tries: usize,
    /// Draw a progress bar while the image is flashed.
    pub show_progress: bool,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 2_000_000,
                rom_baud_rate: 115_200,
                stub_baud_rate: 2_000_000,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                firmware_image: None,
                stub_image: None,
                transport_timeout_us: 20_000,
                connect_timeout_ms: 10_000,
                max_loader_tries: 8,
                show_progress: false,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the application baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the ROM loader baud rate in symbols-per-second
    pub fn rom_baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.rom_baud_rate = baud_rate;
        self
    }

    /// Set the flasher stub baud rate in symbols-per-second
    pub fn stub_baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.stub_baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the path to the firmware image
    pub fn firmware_image<'a>(mut self, image: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.firmware_image = Some(image.into().as_ref().to_owned());
        self
    }

    /// Set the path to the flasher stub
    pub fn stub_image<'a>(mut self, image: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.stub_image = Some(image.into().as_ref().to_owned());
        self
    }

    /// Set the bound on readiness and response waits, in microseconds
    pub fn transport_timeout_us(mut self, timeout: u64) -> Self {
        self.settings.transport_timeout_us = timeout;
        self
    }

    /// Set how long a join attempt may take, in milliseconds
    pub fn connect_timeout_ms(mut self, timeout: u64) -> Self {
        self.settings.connect_timeout_ms = timeout;
        self
    }

    /// Set the number of provisioning cycles tried before falling back
    pub fn max_loader_tries(mut self, tries: usize) -> Self {
        self.settings.max_loader_tries = tries;
        self
    }

    /// Show or hide the flashing progress bar
    pub fn show_progress(mut self, show: bool) -> Self {
        self.settings.show_progress = show;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 2_000_000,
            rom_baud_rate: 115_200,
            stub_baud_rate: 2_000_000,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            firmware_image: None,
            stub_image: None,
            transport_timeout_us: 20_000,
            connect_timeout_ms: 10_000,
            max_loader_tries: 8,
            show_progress: false,
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn baud_rates() {
    let settings = SettingsBuilder::new()
        .baud_rate(921_600)
        .rom_baud_rate(74_880)
        .stub_baud_rate(460_800)
        .finalize();
    assert_eq!(settings.baud_rate, 921_600);
    assert_eq!(settings.rom_baud_rate, 74_880);
    assert_eq!(settings.stub_baud_rate, 460_800);
}

#[test]
fn line_settings() {
    let settings = SettingsBuilder::new()
        .data_bits(DataBits::Seven)
        .flow_control(FlowControl::Hardware)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .finalize();
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.flow_control, FlowControl::Hardware);
    assert_eq!(settings.parity, Parity::Even);
    assert_eq!(settings.stop_bits, StopBits::Two);
}

#[test]
fn images() {
    let settings = SettingsBuilder::new()
        .firmware_image("wifi_firmware.bin")
        .stub_image("esp_stub.bin")
        .finalize();
    assert_eq!(settings.firmware_image.unwrap(), "wifi_firmware.bin");
    assert_eq!(settings.stub_image.unwrap(), "esp_stub.bin");
}

#[test]
fn timeouts_and_retries() {
    let settings = SettingsBuilder::new()
        .transport_timeout_us(5_000)
        .connect_timeout_ms(2_000)
        .max_loader_tries(3)
        .show_progress(true)
        .finalize();
    assert_eq!(settings.transport_timeout_us, 5_000);
    assert_eq!(settings.connect_timeout_ms, 2_000);
    assert_eq!(settings.max_loader_tries, 3);
    assert!(settings.show_progress);
}

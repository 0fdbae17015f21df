//! Firmware provisioning of the co-processor.
//!
//! With the boot strap set to ROM, the host syncs with the mask ROM loader,
//! downloads the flasher stub to RAM and starts it. The stub reports the MD5
//! of the image in flash, which is reconciled against the image file and the
//! configuration:
//!
//! | file = cfg | cfg = flash | file = flash | verdict                |
//! |------------|-------------|--------------|------------------------|
//! | yes        | yes         | yes          | `RunExisting`          |
//! | yes        | no          | no           | `FlashFromFile`        |
//! | no         | yes         | no           | `RunExistingStaleFile` |
//! | no         | no          | yes          | `AdoptFileDigest`      |
//! | no         | no          | no           | `BestEffort`           |
//!
//! Only `FlashFromFile` writes the flash; the digest is read back afterwards
//! and must match the file.

pub mod image;
pub mod reconcile;
pub mod rom_loader;
pub mod slip;
pub mod stub_flasher;

use std::io::{Read, Seek};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::config::ConfigStore;
use crate::error::ProvisionError;
use crate::hal::{Clock, LinkIo};
use crate::settings::Settings;

pub use image::{FileImages, FirmwareImage, ImageSource, MemoryImages, ReadSeek, StubImage};
pub use reconcile::{reconcile, Reconciliation};

use rom_loader::RomLoader;
use slip::SlipPort;
use stub_flasher::StubFlasher;

/// The stub needs a moment after switching baud rates.
const STUB_SETTLE_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Flash was left alone.
    Verified(Reconciliation),
    /// The image was written and read back.
    Flashed,
}

/// Run one provisioning cycle. The co-processor must already be held in its
/// ROM loader. `verdict` receives the reconciliation result as soon as it is
/// known, so a later failure still tells the caller what was decided.
pub fn provision<P: LinkIo, C: Clock, R: Read + Seek>(
    io: &mut P,
    clock: &mut C,
    settings: &Settings,
    config: &mut dyn ConfigStore,
    image: &mut FirmwareImage<R>,
    stub: &StubImage,
    verdict: &mut Option<Reconciliation>,
) -> Result<Outcome, ProvisionError> {
    let mut loader = RomLoader::new(SlipPort::new(io, clock));
    loader.sync()?;
    loader.load_stub(stub, settings.stub_baud_rate)?;

    let mut port = loader.into_port();
    port.discard_input()?;
    port.set_baud_rate(settings.stub_baud_rate)?;
    port.delay_ms(STUB_SETTLE_MS);
    let mut flasher = StubFlasher::new(port);
    flasher.wait_greeting()?;

    let firmware = config.firmware();
    let flash_digest = flasher.flash_digest(0, firmware.length)?;
    let file_digest = image.digest()?;

    let decision = reconcile(&file_digest, &firmware.md5, &flash_digest);
    *verdict = Some(decision);
    debug!("reconciliation: {:?}", decision);

    match decision {
        Reconciliation::RunExisting => {
            info!("Wifi firmware image valid");
            return Ok(Outcome::Verified(decision));
        }
        Reconciliation::RunExistingStaleFile => {
            warn!("Wifi firmware file digest mismatch, possible bad file load");
            return Ok(Outcome::Verified(decision));
        }
        Reconciliation::AdoptFileDigest => {
            warn!("Wifi firmware digest restored from file");
            config.set_firmware_md5(file_digest);
            return Ok(Outcome::Verified(decision));
        }
        Reconciliation::BestEffort => {
            warn!("Wifi firmware digests disagree, trying to run anyway");
            return Ok(Outcome::Verified(decision));
        }
        Reconciliation::FlashFromFile => {}
    }

    if image.payload_len() != firmware.length as u64 {
        return Err(ProvisionError::ImageLengthMismatch {
            file: image.payload_len(),
            config: firmware.length,
        });
    }

    info!("Loading wifi firmware: {} bytes", firmware.length);
    let progress = progress_bar(settings.show_progress, firmware.length as u64);
    let result = flasher.flash_write(0, &mut image.payload()?, firmware.length, &progress);
    match &result {
        Ok(()) => progress.finish_and_clear(),
        Err(_) => progress.abandon(),
    }
    result?;

    let written = flasher.flash_digest(0, firmware.length)?;
    if written != file_digest {
        return Err(ProvisionError::DigestMismatch);
    }
    info!("Wifi flash load done");
    Ok(Outcome::Flashed)
}

fn progress_bar(visible: bool, len: u64) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::default_bar()
        .template("[WC] ⏩ Flashing [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .progress_chars("=>-"));
    pb
}

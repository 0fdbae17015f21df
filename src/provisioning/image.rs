//! Firmware image and flasher stub containers.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;

use log::debug;

use crate::config::MD5_LEN;
use crate::error::ProvisionError;

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

// FirmwareImage ===============================================================

/// Co-processor firmware file: the image bytes followed by their MD5.
pub struct FirmwareImage<R: Read + Seek> {
    reader: R,
    payload_len: u64,
}

impl<R: Read + Seek> FirmwareImage<R> {
    pub fn open(mut reader: R) -> Result<Self, ProvisionError> {
        let total = reader.seek(SeekFrom::End(0))?;
        if total < MD5_LEN as u64 {
            return Err(ProvisionError::ImageTooShort);
        }
        Ok(FirmwareImage {
            reader,
            payload_len: total - MD5_LEN as u64,
        })
    }

    /// Image length without the trailing digest.
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// The digest stored at the end of the file.
    pub fn digest(&mut self) -> io::Result<[u8; MD5_LEN]> {
        let mut md5 = [0u8; MD5_LEN];
        self.reader.seek(SeekFrom::Start(self.payload_len))?;
        self.reader.read_exact(&mut md5)?;
        Ok(md5)
    }

    /// Reader over the image bytes, from the start.
    pub fn payload(&mut self) -> io::Result<io::Take<&mut R>> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok((&mut self.reader).take(self.payload_len))
    }
}

// StubImage ===================================================================

/// Flasher stub as loaded into the co-processor's RAM.
///
/// File layout, all header fields u32 little endian:
/// `[entry][params_start][data_start][code_len][code][data]`, where the data
/// segment is whatever follows the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubImage {
    pub entry: u32,
    /// Load address of the launch parameter, directly followed by the code.
    pub params_start: u32,
    pub data_start: u32,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
}

const STUB_HEADER_LEN: usize = 16;

impl StubImage {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProvisionError> {
        if bytes.len() < STUB_HEADER_LEN {
            return Err(ProvisionError::InvalidStub("truncated header"));
        }
        let field = |i: usize| {
            let at = 4 * i;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let code_len = field(3) as usize;
        let rest = &bytes[STUB_HEADER_LEN..];
        if code_len == 0 || code_len > rest.len() {
            return Err(ProvisionError::InvalidStub("bad code length"));
        }
        Ok(StubImage {
            entry: field(0),
            params_start: field(1),
            data_start: field(2),
            code: rest[..code_len].to_vec(),
            data: rest[code_len..].to_vec(),
        })
    }

    pub fn read_from(mut reader: impl Read) -> Result<Self, ProvisionError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }
}

// Sources =====================================================================

/// Where the provisioning state gets its images from.
pub trait ImageSource {
    /// The firmware image, `None` when there is none to offer.
    fn firmware(&mut self) -> io::Result<Option<Box<dyn ReadSeek>>>;

    fn stub(&mut self) -> Result<Option<StubImage>, ProvisionError>;
}

/// Images read from the filesystem on every provisioning attempt.
#[derive(Debug, Clone, Default)]
pub struct FileImages {
    pub firmware: Option<PathBuf>,
    pub stub: Option<PathBuf>,
}

impl ImageSource for FileImages {
    fn firmware(&mut self) -> io::Result<Option<Box<dyn ReadSeek>>> {
        let path = match &self.firmware {
            Some(path) => path,
            None => return Ok(None),
        };
        match File::open(path) {
            Ok(file) => Ok(Some(Box::new(file) as Box<dyn ReadSeek>)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} not found", path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn stub(&mut self) -> Result<Option<StubImage>, ProvisionError> {
        match &self.stub {
            Some(path) => Ok(Some(StubImage::read_from(File::open(path)?)?)),
            None => Ok(None),
        }
    }
}

/// Images held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryImages {
    pub firmware: Option<Vec<u8>>,
    pub stub: Option<StubImage>,
}

impl ImageSource for MemoryImages {
    fn firmware(&mut self) -> io::Result<Option<Box<dyn ReadSeek>>> {
        Ok(self
            .firmware
            .clone()
            .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn ReadSeek>))
    }

    fn stub(&mut self) -> Result<Option<StubImage>, ProvisionError> {
        Ok(self.stub.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn firmware_image_splits_payload_and_digest() {
    let mut file = vec![0xe9, 1, 2, 3, 4];
    file.extend_from_slice(&[0xab; MD5_LEN]);
    let mut image = FirmwareImage::open(Cursor::new(file)).unwrap();
    assert_eq!(image.payload_len(), 5);
    assert_eq!(image.digest().unwrap(), [0xab; MD5_LEN]);

    let mut payload = Vec::new();
    image.payload().unwrap().read_to_end(&mut payload).unwrap();
    assert_eq!(payload, vec![0xe9, 1, 2, 3, 4]);
}

#[test]
fn firmware_image_needs_a_digest() {
    assert!(matches!(
        FirmwareImage::open(Cursor::new(vec![0u8; 15])),
        Err(ProvisionError::ImageTooShort)
    ));
}

#[test]
fn stub_container() {
    let mut raw = Vec::new();
    for v in [0x4010_0004u32, 0x4010_0000, 0x3ffe_8000, 3].iter() {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    raw.extend_from_slice(&[1, 2, 3, 9, 9]);

    let stub = StubImage::parse(&raw).unwrap();
    assert_eq!(stub.entry, 0x4010_0004);
    assert_eq!(stub.params_start, 0x4010_0000);
    assert_eq!(stub.data_start, 0x3ffe_8000);
    assert_eq!(stub.code, vec![1, 2, 3]);
    assert_eq!(stub.data, vec![9, 9]);

    raw[12] = 200;
    assert!(StubImage::parse(&raw).is_err());
    assert!(StubImage::parse(&raw[..10]).is_err());
}

#[test]
fn missing_firmware_file_is_not_an_error() {
    let mut images = FileImages {
        firmware: Some(PathBuf::from("/nonexistent/wifi_firmware.bin")),
        stub: None,
    };
    assert!(images.firmware().unwrap().is_none());
    assert!(images.stub().unwrap().is_none());
}

//! MFRC522 card reader as an evidence source

use doorlock_core::app_state::{FromTruncated, NodeError};
use doorlock_core::evidence::{CaptureError, Evidence, EvidenceSource, TagUid};
use embedded_hal::spi::SpiDevice;
use heapless::String;
use log::{debug, info, warn};
use mfrc522::comm::blocking::spi::SpiInterface;
use mfrc522::{Error as ReaderError, Initialized, Mfrc522};

pub struct RfidReader<SPI: SpiDevice> {
    reader: Mfrc522<SpiInterface<SPI>, Initialized>,
    last: Option<TagUid>,
}

impl<SPI: SpiDevice> RfidReader<SPI> {
    pub fn new(spi: SPI) -> Result<Self, NodeError> {
        let mut reader = Mfrc522::new(SpiInterface::new(spi))
            .init()
            .map_err(|_| NodeError::HardwareInit(String::from_truncated("MFRC522 init")))?;

        match reader.version() {
            // 0x91 and 0x92 are the genuine v1.0/v2.0 chips; clones report 0x12 or 0x88
            Ok(version) => info!("MFRC522 ready (version {:#04x})", version),
            Err(_) => {
                return Err(NodeError::HardwareInit(String::from_truncated(
                    "MFRC522 not responding",
                )));
            }
        }

        Ok(Self { reader, last: None })
    }

    fn read_card(&mut self) -> Result<Option<TagUid>, CaptureError> {
        let atqa = match self.reader.reqa() {
            Ok(atqa) => atqa,
            // No card in the field
            Err(ReaderError::Timeout) => return Ok(None),
            Err(e) => return Err(map_reader_error(&e)),
        };

        let uid = self.reader.select(&atqa).map_err(|e| map_reader_error(&e))?;
        let tag = TagUid::new(uid.as_bytes())?;

        if self.reader.hlta().is_err() {
            // The card stays active and answers the next REQA again
            debug!("HLTA not acknowledged by {}", tag);
        }

        Ok(Some(tag))
    }
}

fn map_reader_error<E>(e: &ReaderError<E>) -> CaptureError {
    match e {
        ReaderError::Timeout => CaptureError::NoResponse,
        ReaderError::BufferOverflow | ReaderError::NoRoom => CaptureError::Overflow,
        _ => CaptureError::Corrupt,
    }
}

impl<SPI: SpiDevice> EvidenceSource for RfidReader<SPI> {
    async fn acquire(&mut self) -> Result<bool, CaptureError> {
        self.last = None;
        match self.read_card() {
            Ok(Some(tag)) => {
                self.last = Some(tag);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!("Card read failed: {}", e);
                Err(e)
            }
        }
    }

    fn evidence(&self) -> Option<Evidence<'_>> {
        self.last.clone().map(Evidence::Tag)
    }
}

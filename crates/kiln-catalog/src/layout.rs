//! Binary catalog layout
//!
//! The catalog is one flat little-endian buffer, fields in order:
//!
//! ```text
//! bundleCount:          u16
//! assetCount:           u16
//! addresses:            u32[assetCount]            sorted ascending
//! depSpans:             (u16 start, u16 count)[bundleCount]
//!                       start is a byte offset into depData,
//!                       indexed by canonical bundle index
//! correspondingBundle:  u16[assetCount]            1:1 with addresses
//! bundleIds:            u16[bundleCount]           raw ids, sorted ascending
//! depData:              u16[]                      flattened canonical indices
//! ```
//!
//! This layout is the wire format shared by the build tool and the run-time
//! reader; both sides in this crate derive every section offset from the two
//! header counts, so the byte positions below are the single source of truth.

use kiln_core::{KilnError, Result};

pub(crate) const HEADER_LEN: usize = 4;
pub(crate) const SPAN_RECORD_LEN: usize = 4;

/// Byte offset of every section, computed once from the header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sections {
    pub bundle_count: u16,
    pub asset_count: u16,
    pub addresses: usize,
    pub dep_spans: usize,
    pub corresponding: usize,
    pub bundle_ids: usize,
    pub dep_data: usize,
    pub total_len: usize,
}

impl Sections {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(KilnError::CatalogTruncated(format!(
                "{} bytes is too short for the 4-byte header",
                buf.len()
            )));
        }

        let bundle_count = read_u16(buf, 0);
        let asset_count = read_u16(buf, 2);
        let bc = bundle_count as usize;
        let ac = asset_count as usize;

        let addresses = HEADER_LEN;
        let dep_spans = addresses + 4 * ac;
        let corresponding = dep_spans + SPAN_RECORD_LEN * bc;
        let bundle_ids = corresponding + 2 * ac;
        let dep_data = bundle_ids + 2 * bc;

        if buf.len() < dep_data {
            return Err(KilnError::CatalogTruncated(format!(
                "fixed sections need {} bytes, buffer has {}",
                dep_data,
                buf.len()
            )));
        }
        if (buf.len() - dep_data) % 2 != 0 {
            return Err(KilnError::CatalogMalformed(
                "dependency data has odd byte length".to_string(),
            ));
        }

        Ok(Self {
            bundle_count,
            asset_count,
            addresses,
            dep_spans,
            corresponding,
            bundle_ids,
            dep_data,
            total_len: buf.len(),
        })
    }

    /// Length of the dependency data section in bytes.
    pub fn dep_data_len(&self) -> usize {
        self.total_len - self.dep_data
    }
}

pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

//! Run-time catalog reader
//!
//! Parses the flat binary catalog once, then answers lookups with fixed-offset
//! reads against the backing buffer. No section is copied out: dependency
//! lists are returned as [`DepSpan`] views directly into the buffer.

use crate::layout::{self, Sections};
use kiln_core::{Address, BundleId, BundleIndex, KilnError, Result};

/// Read-only view of a built catalog.
///
/// Generic over the buffer owner so the same reader works for heap-owned,
/// memory-mapped, or borrowed catalog bytes. Every accessor takes `&self` and
/// keeps no mutable state past the one-time parse, so a reader can be shared
/// freely between reader threads.
pub struct CatalogReader<B: AsRef<[u8]>> {
    buf: B,
    sections: Sections,
}

impl<B: AsRef<[u8]>> CatalogReader<B> {
    /// Parse a catalog buffer.
    ///
    /// Validates the section layout and every dependency span eagerly, so the
    /// accessors never have to re-check bounds against a corrupt buffer.
    pub fn new(buf: B) -> Result<Self> {
        let sections = Sections::parse(buf.as_ref())?;

        let reader = Self { buf, sections };
        let bytes = reader.buf.as_ref();
        let dep_len = reader.sections.dep_data_len();
        for i in 0..reader.sections.bundle_count as usize {
            let record = reader.sections.dep_spans + layout::SPAN_RECORD_LEN * i;
            let start = layout::read_u16(bytes, record) as usize;
            let count = layout::read_u16(bytes, record + 2) as usize;
            if start % 2 != 0 {
                return Err(KilnError::CatalogMalformed(format!(
                    "dependency span for bundle index {} starts at odd offset {}",
                    i, start
                )));
            }
            if count > 0 && start + 2 * count > dep_len {
                return Err(KilnError::CatalogMalformed(format!(
                    "dependency span for bundle index {} ({} entries at byte {}) \
                     overruns {} bytes of dependency data",
                    i, count, start, dep_len
                )));
            }
        }

        Ok(reader)
    }

    /// Number of bundles in the catalog.
    pub fn bundle_count(&self) -> u16 {
        self.sections.bundle_count
    }

    /// Number of directly addressable items in the catalog.
    pub fn asset_count(&self) -> u16 {
        self.sections.asset_count
    }

    /// Canonical index of a raw bundle id.
    ///
    /// Binary search over the sorted `bundleIds` section; an id the catalog
    /// was not built with is an error.
    pub fn bundle_index_of(&self, raw: BundleId) -> Result<BundleIndex> {
        let bytes = self.buf.as_ref();
        let base = self.sections.bundle_ids;
        let mut lo = 0usize;
        let mut hi = self.sections.bundle_count as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let value = layout::read_u16(bytes, base + 2 * mid);
            match value.cmp(&raw.raw()) {
                std::cmp::Ordering::Equal => return Ok(BundleIndex::from_raw(mid as u16)),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(KilnError::UnknownBundleId(raw))
    }

    /// Canonical index of the bundle that owns an address.
    ///
    /// Binary search over the sorted `addresses` section, then the paired
    /// read from `correspondingBundle`.
    pub fn bundle_containing(&self, address: Address) -> Result<BundleIndex> {
        let bytes = self.buf.as_ref();
        let base = self.sections.addresses;
        let mut lo = 0usize;
        let mut hi = self.sections.asset_count as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let value = layout::read_u32(bytes, base + 4 * mid);
            match value.cmp(&address.raw()) {
                std::cmp::Ordering::Equal => {
                    let owner = layout::read_u16(bytes, self.sections.corresponding + 2 * mid);
                    return Ok(BundleIndex::from_raw(owner));
                }
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(KilnError::UnknownAddress(address))
    }

    /// Dependency list of a bundle, as a view into the shared data section.
    pub fn dependencies_of(&self, index: BundleIndex) -> Result<DepSpan<'_>> {
        self.check_index(index)?;
        let bytes = self.buf.as_ref();
        let record = self.sections.dep_spans + layout::SPAN_RECORD_LEN * index.as_usize();
        let start = layout::read_u16(bytes, record);
        let count = layout::read_u16(bytes, record + 2) as usize;
        // Zero-count spans may carry any start offset; never dereference it.
        let slice = if count == 0 {
            &[]
        } else {
            let begin = self.sections.dep_data + start as usize;
            &bytes[begin..begin + 2 * count]
        };
        Ok(DepSpan {
            bytes: slice,
            start,
        })
    }

    /// Raw id of the bundle at a canonical index.
    pub fn raw_id_of(&self, index: BundleIndex) -> Result<BundleId> {
        self.check_index(index)?;
        let raw = layout::read_u16(
            self.buf.as_ref(),
            self.sections.bundle_ids + 2 * index.as_usize(),
        );
        Ok(BundleId::from_raw(raw))
    }

    /// All raw bundle ids in canonical order.
    ///
    /// Used to seed the resolution engine's index-to-raw-id table.
    pub fn bundle_ids(&self) -> impl Iterator<Item = BundleId> + '_ {
        let bytes = self.buf.as_ref();
        let base = self.sections.bundle_ids;
        (0..self.sections.bundle_count as usize)
            .map(move |i| BundleId::from_raw(layout::read_u16(bytes, base + 2 * i)))
    }

    fn check_index(&self, index: BundleIndex) -> Result<()> {
        if index.raw() >= self.sections.bundle_count {
            return Err(KilnError::IndexOutOfRange {
                index,
                count: self.sections.bundle_count,
            });
        }
        Ok(())
    }
}

/// A bundle's dependency list: a (start, count) slice of the catalog's shared
/// dependency array.
///
/// This is a view, not a copy; every access reads the backing catalog buffer.
/// Lists are small, so containment tests are linear scans.
#[derive(Clone, Copy)]
pub struct DepSpan<'a> {
    bytes: &'a [u8],
    start: u16,
}

impl<'a> DepSpan<'a> {
    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.bytes.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset of this span within the shared dependency data section.
    ///
    /// Bundles whose dependency sets are subsets of another bundle's share
    /// that bundle's emitted range, which this offset makes observable.
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Random access by position.
    pub fn get(&self, i: usize) -> Option<BundleIndex> {
        if i < self.len() {
            Some(BundleIndex::from_raw(layout::read_u16(self.bytes, 2 * i)))
        } else {
            None
        }
    }

    /// Whether the list contains a canonical index.
    pub fn contains(&self, index: BundleIndex) -> bool {
        self.iter().any(|dep| dep == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = BundleIndex> + 'a {
        let bytes = self.bytes;
        (0..bytes.len() / 2).map(move |i| BundleIndex::from_raw(layout::read_u16(bytes, 2 * i)))
    }

    /// The list expanded to a vector, mostly for tests and tooling.
    pub fn to_vec(&self) -> Vec<BundleIndex> {
        self.iter().collect()
    }
}

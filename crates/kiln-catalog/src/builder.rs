//! Build-time catalog construction
//!
//! Collects content entries, canonicalizes the bundle set, compresses the
//! per-bundle dependency lists into a shared flattened array, and emits the
//! flat binary buffer described in [`crate::layout`].
//!
//! Dependency compression exploits that many bundles' dependency sets are
//! subsets of a shared "super-bundle" set: whenever one bundle's sorted list
//! appears as a contiguous run inside another's, the smaller bundle's span
//! simply points into the larger bundle's already-written range instead of
//! duplicating it.

use crate::layout::{put_u16, put_u32};
use crate::reader::CatalogReader;
use crate::types::CatalogEntry;
use kiln_core::{Address, BundleId, BundleIndex, KilnError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Accumulates entries and bundle declarations, then builds the catalog.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: Vec<CatalogEntry>,
    declared: BTreeSet<BundleId>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a bundle that may own no entries of its own.
    ///
    /// Bundles referenced as entry owners or dependency targets are collected
    /// automatically; this is for bundles known only to the build layout.
    pub fn declare_bundle(&mut self, id: BundleId) {
        self.declared.insert(id);
    }

    /// Add one content entry.
    pub fn add_entry(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    /// Build the binary catalog.
    ///
    /// Fails on any build invariant violation: missing built-in bundles,
    /// duplicate live addresses, section overflow, or a dependency span that
    /// does not reconstruct its source set (the latter indicates a bug in the
    /// compression, not bad input data).
    pub fn build(&self) -> Result<Vec<u8>> {
        let (ids, index_of) = self.canonicalize()?;
        let dep_lists = self.dependency_lists(&ids, &index_of);
        let (spans, dep_data) = compress_dependencies(&ids, &dep_lists)?;
        let addressed = self.collect_addresses(&ids, &index_of)?;

        let mut buf = Vec::new();
        put_u16(&mut buf, ids.len() as u16);
        put_u16(&mut buf, addressed.len() as u16);
        for &(address, _) in &addressed {
            put_u32(&mut buf, address);
        }
        for &(start, count) in &spans {
            put_u16(&mut buf, start);
            put_u16(&mut buf, count);
        }
        for &(_, owner) in &addressed {
            put_u16(&mut buf, owner);
        }
        for id in &ids {
            put_u16(&mut buf, id.raw());
        }
        buf.extend_from_slice(&dep_data);

        self.validate(&buf, &ids, &dep_lists)?;
        Ok(buf)
    }

    /// Sort the full bundle id universe ascending and assign canonical
    /// indices. The universe is declared bundles plus every entry owner and
    /// dependency target.
    fn canonicalize(&self) -> Result<(Vec<BundleId>, BTreeMap<BundleId, u16>)> {
        let mut set = self.declared.clone();
        for entry in &self.entries {
            set.insert(entry.bundle);
            for &dep in &entry.dependencies {
                set.insert(dep);
            }
        }

        if !set.contains(&BundleId::BUILTIN_MAIN) {
            return Err(KilnError::MissingBuiltin(BundleId::BUILTIN_MAIN));
        }
        if !set.contains(&BundleId::BUILTIN_SHARED) {
            return Err(KilnError::MissingBuiltin(BundleId::BUILTIN_SHARED));
        }
        if set.contains(&BundleId::from_raw(0)) {
            return Err(KilnError::CatalogMalformed(
                "bundle id #0000 is reserved and may not be used".to_string(),
            ));
        }
        if set.len() > u16::MAX as usize {
            return Err(KilnError::CatalogOverflow(format!(
                "{} bundles exceed the 16-bit bundle count",
                set.len()
            )));
        }

        let ids: Vec<BundleId> = set.into_iter().collect();
        let index_of = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u16))
            .collect();
        Ok((ids, index_of))
    }

    /// Per-bundle dependency set: the union over the bundle's entries, minus
    /// the bundle itself and the built-ins, as sorted canonical indices.
    fn dependency_lists(
        &self,
        ids: &[BundleId],
        index_of: &BTreeMap<BundleId, u16>,
    ) -> Vec<Vec<u16>> {
        let mut sets: Vec<BTreeSet<u16>> = vec![BTreeSet::new(); ids.len()];
        for entry in &self.entries {
            let owner = index_of[&entry.bundle] as usize;
            for &dep in &entry.dependencies {
                if dep == entry.bundle || dep.is_builtin() {
                    continue;
                }
                sets[owner].insert(index_of[&dep]);
            }
        }
        sets.into_iter()
            .map(|set| set.into_iter().collect())
            .collect()
    }

    /// Entries that are live in the address table: those with an address
    /// whose owning bundle has direct address access.
    fn collect_addresses(
        &self,
        ids: &[BundleId],
        index_of: &BTreeMap<BundleId, u16>,
    ) -> Result<Vec<(u32, u16)>> {
        let mut addressed: Vec<(u32, u16)> = self
            .entries
            .iter()
            .filter(|entry| entry.bundle.has_direct_access())
            .filter_map(|entry| {
                entry
                    .address
                    .map(|address| (address.raw(), index_of[&entry.bundle]))
            })
            .collect();
        addressed.sort();

        for pair in addressed.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(KilnError::DuplicateAddress {
                    address: Address::from_raw(pair[0].0),
                    first: ids[pair[0].1 as usize],
                    second: ids[pair[1].1 as usize],
                });
            }
        }
        if addressed.len() > u16::MAX as usize {
            return Err(KilnError::CatalogOverflow(format!(
                "{} addresses exceed the 16-bit asset count",
                addressed.len()
            )));
        }
        Ok(addressed)
    }

    /// Re-read every span from the emitted buffer through the real reader and
    /// assert set equality with the computed dependency sets. A mismatch here
    /// is a compression bug and aborts the build.
    fn validate(&self, buf: &[u8], ids: &[BundleId], dep_lists: &[Vec<u16>]) -> Result<()> {
        let reader = CatalogReader::new(buf)?;
        for (i, expected) in dep_lists.iter().enumerate() {
            let span = reader.dependencies_of(BundleIndex::from_raw(i as u16))?;
            let got: BTreeSet<u16> = span.iter().map(|idx| idx.raw()).collect();
            let want: BTreeSet<u16> = expected.iter().copied().collect();
            if got != want {
                return Err(KilnError::DepSpanMismatch(ids[i]));
            }
        }
        Ok(())
    }
}

/// Collapse the per-bundle dependency lists into one shared array.
///
/// Builds a forest: a bundle whose sorted list is a contiguous run of another
/// bundle's ("sequential subset") becomes that bundle's child and reuses a
/// slice of the parent's emitted range. Only roots write data. When several
/// parents qualify, the lowest canonical index wins; a candidate parent must
/// have a strictly longer list, or an equal list at a lower index, which keeps
/// the attachment relation acyclic.
fn compress_dependencies(
    ids: &[BundleId],
    dep_lists: &[Vec<u16>],
) -> Result<(Vec<(u16, u16)>, Vec<u8>)> {
    let n = dep_lists.len();
    let mut parent: Vec<Option<usize>> = vec![None; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];

    for child in 0..n {
        let cd = &dep_lists[child];
        if cd.is_empty() {
            continue; // empty sets get the zero span directly
        }
        for cand in 0..n {
            if cand == child {
                continue;
            }
            let pd = &dep_lists[cand];
            let eligible = pd.len() > cd.len() || (pd.len() == cd.len() && cand < child);
            if eligible && is_sequential_subset(cd, pd) {
                parent[child] = Some(cand);
                children[cand].push(child);
                break;
            }
        }
    }

    let mut spans: Vec<(u16, u16)> = vec![(0, 0); n];
    let mut dep_data: Vec<u8> = Vec::new();

    for root in 0..n {
        if parent[root].is_some() || dep_lists[root].is_empty() {
            continue;
        }
        let root_list = &dep_lists[root];
        let start = dep_data.len();
        if start + 2 * root_list.len() > u16::MAX as usize + 1 {
            return Err(KilnError::CatalogOverflow(
                "dependency data exceeds the 64 KiB span address range".to_string(),
            ));
        }
        for &dep in root_list {
            put_u16(&mut dep_data, dep);
        }
        spans[root] = (start as u16, root_list.len() as u16);

        // Flatten the subtree, then emit descendants in canonical order.
        let mut descendants = Vec::new();
        let mut stack = children[root].clone();
        while let Some(node) = stack.pop() {
            descendants.push(node);
            stack.extend_from_slice(&children[node]);
        }
        descendants.sort_unstable();

        for desc in descendants {
            let list = &dep_lists[desc];
            if list.is_empty() {
                spans[desc] = (0, 0);
                continue;
            }
            // A descendant's run is contiguous within every ancestor, so its
            // first element locates the whole run inside the root's data.
            let pos = root_list
                .iter()
                .position(|&value| value == list[0])
                .ok_or(KilnError::DepSpanMismatch(ids[desc]))?;
            spans[desc] = ((start + 2 * pos) as u16, list.len() as u16);
        }
    }

    Ok((spans, dep_data))
}

/// Whether `child` appears as one contiguous run inside `parent`.
///
/// Both lists are sorted ascending with no duplicates.
fn is_sequential_subset(child: &[u16], parent: &[u16]) -> bool {
    if child.is_empty() {
        return true;
    }
    match parent.iter().position(|&value| value == child[0]) {
        Some(pos) => parent[pos..].len() >= child.len() && &parent[pos..pos + child.len()] == child,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u16) -> BundleId {
        BundleId::from_raw(raw)
    }

    fn entry(bundle: u16, deps: &[u16]) -> CatalogEntry {
        CatalogEntry {
            bundle: id(bundle),
            address: None,
            dependencies: deps.iter().copied().map(id).collect(),
        }
    }

    fn builder_with_builtins() -> CatalogBuilder {
        let mut builder = CatalogBuilder::new();
        builder.declare_bundle(BundleId::BUILTIN_MAIN);
        builder.declare_bundle(BundleId::BUILTIN_SHARED);
        builder
    }

    #[test]
    fn test_builtins_occupy_first_indices() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0401, &[]));
        builder.add_entry(entry(0x0900, &[]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        assert_eq!(
            reader.raw_id_of(BundleIndex::from_raw(0)).unwrap(),
            BundleId::BUILTIN_MAIN
        );
        assert_eq!(
            reader.raw_id_of(BundleIndex::from_raw(1)).unwrap(),
            BundleId::BUILTIN_SHARED
        );
    }

    #[test]
    fn test_missing_builtin_fails() {
        let mut builder = CatalogBuilder::new();
        builder.declare_bundle(BundleId::BUILTIN_MAIN);
        builder.add_entry(entry(0x0401, &[]));
        assert!(matches!(
            builder.build(),
            Err(KilnError::MissingBuiltin(id)) if id == BundleId::BUILTIN_SHARED
        ));

        assert!(matches!(
            CatalogBuilder::new().build(),
            Err(KilnError::MissingBuiltin(_))
        ));
    }

    #[test]
    fn test_duplicate_address_fails() {
        let mut builder = builder_with_builtins();
        let address = Address::from_name("props/old_chair");
        builder.add_entry(CatalogEntry {
            bundle: BundleId::BUILTIN_MAIN,
            address: Some(address),
            dependencies: vec![],
        });
        builder.add_entry(CatalogEntry {
            bundle: id(0x0009),
            address: Some(address),
            dependencies: vec![],
        });
        assert!(matches!(
            builder.build(),
            Err(KilnError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn test_address_lookup_roundtrip() {
        let mut builder = builder_with_builtins();
        let chair = Address::from_name("props/old_chair");
        let lamp = Address::from_name("props/lamp");
        builder.add_entry(CatalogEntry {
            bundle: id(0x0009),
            address: Some(chair),
            dependencies: vec![id(0x0401)],
        });
        builder.add_entry(CatalogEntry {
            bundle: BundleId::BUILTIN_MAIN,
            address: Some(lamp),
            dependencies: vec![],
        });
        // Addressed entry in a non-direct-access bundle: excluded from the table.
        builder.add_entry(CatalogEntry {
            bundle: id(0x0401),
            address: Some(Address::from_name("hidden/thing")),
            dependencies: vec![],
        });

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        assert_eq!(reader.asset_count(), 2);

        let owner = reader.bundle_containing(chair).unwrap();
        assert_eq!(reader.raw_id_of(owner).unwrap(), id(0x0009));
        let owner = reader.bundle_containing(lamp).unwrap();
        assert_eq!(reader.raw_id_of(owner).unwrap(), BundleId::BUILTIN_MAIN);

        assert!(reader
            .bundle_containing(Address::from_name("hidden/thing"))
            .is_err());
    }

    #[test]
    fn test_dependency_sets_roundtrip() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0401, &[0x0601, 0x0603]));
        builder.add_entry(entry(0x0401, &[0x0602]));
        builder.add_entry(entry(0x0402, &[0x0601]));
        builder.add_entry(entry(0x0603, &[]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();

        let a = reader.bundle_index_of(id(0x0401)).unwrap();
        let span = reader.dependencies_of(a).unwrap();
        let mut got: Vec<u16> = span.iter().map(|i| i.raw()).collect();
        got.sort_unstable();
        let expect: Vec<u16> = [0x0601, 0x0602, 0x0603]
            .iter()
            .map(|&raw| reader.bundle_index_of(id(raw)).unwrap().raw())
            .collect();
        assert_eq!(got, expect);

        let b = reader.bundle_index_of(id(0x0402)).unwrap();
        let span = reader.dependencies_of(b).unwrap();
        assert_eq!(span.len(), 1);
        assert_eq!(
            span.get(0).unwrap(),
            reader.bundle_index_of(id(0x0601)).unwrap()
        );
    }

    #[test]
    fn test_self_and_builtin_deps_dropped() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0401, &[0x0401, 0x0001, 0x0002, 0x0601]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        let idx = reader.bundle_index_of(id(0x0401)).unwrap();
        let span = reader.dependencies_of(idx).unwrap();
        assert_eq!(span.len(), 1);
        assert_eq!(
            span.get(0).unwrap(),
            reader.bundle_index_of(id(0x0601)).unwrap()
        );
    }

    #[test]
    fn test_subset_spans_share_bytes() {
        let mut builder = builder_with_builtins();
        // A depends on three bundles, B on a sequential subset of them.
        builder.add_entry(entry(0x0401, &[0x0601, 0x0602, 0x0603]));
        builder.add_entry(entry(0x0402, &[0x0601, 0x0602]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();

        let a = reader.bundle_index_of(id(0x0401)).unwrap();
        let b = reader.bundle_index_of(id(0x0402)).unwrap();
        let span_a = reader.dependencies_of(a).unwrap();
        let span_b = reader.dependencies_of(b).unwrap();

        // B's span starts where A's does and lies inside A's range.
        assert_eq!(span_b.start(), span_a.start());
        assert_eq!(span_a.len(), 3);
        assert_eq!(span_b.len(), 2);

        // Only A's list was written: 3 words of dependency data total.
        assert_eq!(dep_data_words(&reader), 3);
    }

    /// Total dependency words actually emitted, measured as the furthest span end.
    fn dep_data_words<B: AsRef<[u8]>>(reader: &CatalogReader<B>) -> usize {
        let mut max_end = 0;
        for i in 0..reader.bundle_count() {
            let span = reader.dependencies_of(BundleIndex::from_raw(i)).unwrap();
            max_end = max_end.max(span.start() as usize + 2 * span.len());
        }
        max_end / 2
    }

    #[test]
    fn test_middle_run_subset_shares_bytes() {
        let mut builder = builder_with_builtins();
        // C's list {0602, 0603} is a run in the middle of A's {0601..0604}.
        builder.add_entry(entry(0x0401, &[0x0601, 0x0602, 0x0603, 0x0604]));
        builder.add_entry(entry(0x0403, &[0x0602, 0x0603]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        let a = reader.bundle_index_of(id(0x0401)).unwrap();
        let c = reader.bundle_index_of(id(0x0403)).unwrap();
        let span_a = reader.dependencies_of(a).unwrap();
        let span_c = reader.dependencies_of(c).unwrap();
        assert_eq!(span_c.start(), span_a.start() + 2);
        assert_eq!(span_c.to_vec(), span_a.to_vec()[1..3].to_vec());
    }

    #[test]
    fn test_non_sequential_subset_not_shared() {
        let mut builder = builder_with_builtins();
        // D's set {0601, 0603} is a subset of A's but not a contiguous run.
        builder.add_entry(entry(0x0401, &[0x0601, 0x0602, 0x0603]));
        builder.add_entry(entry(0x0404, &[0x0601, 0x0603]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        let a = reader.bundle_index_of(id(0x0401)).unwrap();
        let d = reader.bundle_index_of(id(0x0404)).unwrap();
        let span_a = reader.dependencies_of(a).unwrap();
        let span_d = reader.dependencies_of(d).unwrap();
        // D wrote its own data after A's.
        assert_eq!(span_d.start() as usize, span_a.start() as usize + 2 * span_a.len());
    }

    #[test]
    fn test_equal_sets_share_one_emission() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0401, &[0x0601, 0x0602]));
        builder.add_entry(entry(0x0402, &[0x0601, 0x0602]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        let a = reader.bundle_index_of(id(0x0401)).unwrap();
        let b = reader.bundle_index_of(id(0x0402)).unwrap();
        let span_a = reader.dependencies_of(a).unwrap();
        let span_b = reader.dependencies_of(b).unwrap();
        assert_eq!(span_a.start(), span_b.start());
        assert_eq!(span_a.to_vec(), span_b.to_vec());
    }

    #[test]
    fn test_dependency_only_bundle_gets_index() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0401, &[0x0601]));

        let buf = builder.build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        // 0x0601 owns no entries but is still a catalog bundle.
        assert!(reader.bundle_index_of(id(0x0601)).is_ok());
        assert_eq!(reader.bundle_count(), 4);
    }

    #[test]
    fn test_bundle_id_zero_rejected() {
        let mut builder = builder_with_builtins();
        builder.add_entry(entry(0x0000, &[]));
        assert!(matches!(
            builder.build(),
            Err(KilnError::CatalogMalformed(_))
        ));
    }

    #[test]
    fn test_is_sequential_subset() {
        assert!(is_sequential_subset(&[2, 3], &[1, 2, 3, 4]));
        assert!(is_sequential_subset(&[1, 2, 3], &[1, 2, 3]));
        assert!(is_sequential_subset(&[], &[1]));
        assert!(!is_sequential_subset(&[1, 3], &[1, 2, 3]));
        assert!(!is_sequential_subset(&[4, 5], &[1, 2, 3]));
        assert!(!is_sequential_subset(&[3, 4], &[1, 2, 3]));
    }
}

//! Catalog commands

use anyhow::{Context, Result};
use kiln_catalog::{BundleManifest, CatalogReader};
use kiln_core::{Address, BundleId, BundleIndex};
use std::fs;

pub fn run_build(manifest_path: &str, output: &str) -> Result<()> {
    let manifest = BundleManifest::from_file(manifest_path)
        .with_context(|| format!("failed to load manifest {}", manifest_path))?;
    let buf = manifest.into_builder()?.build()?;

    let reader = CatalogReader::new(buf.as_slice())?;
    fs::write(output, &buf).with_context(|| format!("failed to write {}", output))?;

    println!(
        "Catalog: {} bundle(s), {} asset(s) -> {} ({} bytes)",
        reader.bundle_count(),
        reader.asset_count(),
        output,
        buf.len()
    );
    Ok(())
}

pub fn run_inspect(path: &str, format: &str) -> Result<()> {
    let buf = fs::read(path).with_context(|| format!("failed to read {}", path))?;
    let reader = CatalogReader::new(buf)?;

    if format == "json" {
        let bundles: Vec<serde_json::Value> = (0..reader.bundle_count())
            .map(|i| -> kiln_core::Result<serde_json::Value> {
                let index = BundleIndex::from_raw(i);
                let id = reader.raw_id_of(index)?;
                let deps: Vec<String> = reader
                    .dependencies_of(index)?
                    .iter()
                    .map(|dep| reader.raw_id_of(dep).map(|raw| raw.to_string()))
                    .collect::<kiln_core::Result<_>>()?;
                Ok(serde_json::json!({
                    "index": i,
                    "id": id.to_string(),
                    "major": id.major(),
                    "minor": id.minor(),
                    "direct_access": id.has_direct_access(),
                    "deps": deps,
                }))
            })
            .collect::<kiln_core::Result<_>>()?;
        let summary = serde_json::json!({
            "bundle_count": reader.bundle_count(),
            "asset_count": reader.asset_count(),
            "bundles": bundles,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Catalog: {}", path);
    println!("  Bundles: {}", reader.bundle_count());
    println!("  Assets: {}", reader.asset_count());
    for i in 0..reader.bundle_count() {
        let index = BundleIndex::from_raw(i);
        let id = reader.raw_id_of(index)?;
        let span = reader.dependencies_of(index)?;
        let deps: Vec<String> = span
            .iter()
            .map(|dep| reader.raw_id_of(dep).map(|raw| raw.to_string()))
            .collect::<kiln_core::Result<_>>()?;
        if deps.is_empty() {
            println!("  [{}] {}", i, id);
        } else {
            println!("  [{}] {} -> {}", i, id, deps.join(", "));
        }
    }
    Ok(())
}

pub fn run_lookup(path: &str, name: &str) -> Result<()> {
    let buf = fs::read(path).with_context(|| format!("failed to read {}", path))?;
    let reader = CatalogReader::new(buf)?;

    let address = Address::from_name(name);
    let index = reader
        .bundle_containing(address)
        .with_context(|| format!("no bundle owns '{}'", name))?;
    let id = reader.raw_id_of(index)?;

    println!(
        "'{}' (address {}) -> bundle {} (index {})",
        name, address, id, index
    );
    Ok(())
}

pub fn run_deps(path: &str, id_text: &str) -> Result<()> {
    let raw = parse_bundle_id(id_text)?;
    let buf = fs::read(path).with_context(|| format!("failed to read {}", path))?;
    let reader = CatalogReader::new(buf)?;

    let index = reader.bundle_index_of(raw)?;
    let span = reader.dependencies_of(index)?;
    if span.is_empty() {
        println!("{} has no dependencies", raw);
        return Ok(());
    }

    println!("{} depends on {} bundle(s):", raw, span.len());
    for dep in span.iter() {
        println!("  {} (index {})", reader.raw_id_of(dep)?, dep);
    }
    Ok(())
}

/// Parse a raw bundle id written as hex, with or without a `0x` or `#` prefix.
fn parse_bundle_id(text: &str) -> Result<BundleId> {
    let digits = text
        .trim_start_matches('#')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let raw = u16::from_str_radix(digits, 16)
        .with_context(|| format!("'{}' is not a bundle id", text))?;
    Ok(BundleId::from_raw(raw))
}

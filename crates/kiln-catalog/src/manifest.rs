//! TOML authoring manifest
//!
//! The build-time input format: bundles are declared with a human-readable
//! key and a raw id, entries name their owning bundle and dependencies by
//! key. Addresses are derived here by hashing entry names; the shipped
//! catalog never stores the names themselves.
//!
//! ```toml
//! [[bundle]]
//! key = "environment"
//! id = 0x0401
//!
//! [[entry]]
//! bundle = "environment"
//! name = "props/old_chair"
//! deps = ["textures"]
//! ```

use crate::builder::CatalogBuilder;
use crate::types::CatalogEntry;
use kiln_core::{Address, BundleId, KilnError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// A bundle declaration: logical key to raw id.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleDecl {
    pub key: String,
    pub id: BundleId,
}

/// One entry declaration.
///
/// `name` is optional; entries without one are not directly addressable.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryDecl {
    pub bundle: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub deps: Vec<String>,
}

/// The parsed authoring manifest.
#[derive(Debug, Default, Deserialize)]
pub struct BundleManifest {
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<BundleDecl>,
    #[serde(default, rename = "entry")]
    pub entries: Vec<EntryDecl>,
}

impl BundleManifest {
    /// Parse a manifest from TOML text.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| KilnError::ManifestError(format!("failed to parse manifest: {}", e)))
    }

    /// Parse a manifest file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    /// Resolve keys to ids and produce a ready-to-build catalog builder.
    ///
    /// The two built-in bundles are declared implicitly. Duplicate keys,
    /// duplicate ids, unknown key references, and duplicate entry names are
    /// manifest errors; address-level collisions between distinct names are
    /// still caught later by the builder.
    pub fn into_builder(&self) -> Result<CatalogBuilder> {
        let mut by_key: HashMap<&str, BundleId> = HashMap::new();
        let mut seen_ids: HashSet<BundleId> = HashSet::new();
        for decl in &self.bundles {
            if by_key.insert(decl.key.as_str(), decl.id).is_some() {
                return Err(KilnError::ManifestError(format!(
                    "bundle key '{}' declared twice",
                    decl.key
                )));
            }
            if !seen_ids.insert(decl.id) {
                return Err(KilnError::ManifestError(format!(
                    "bundle id {} declared twice",
                    decl.id
                )));
            }
        }

        let mut builder = CatalogBuilder::new();
        builder.declare_bundle(BundleId::BUILTIN_MAIN);
        builder.declare_bundle(BundleId::BUILTIN_SHARED);
        for decl in &self.bundles {
            builder.declare_bundle(decl.id);
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for entry in &self.entries {
            let owner = *by_key.get(entry.bundle.as_str()).ok_or_else(|| {
                KilnError::ManifestError(format!("entry references unknown bundle '{}'", entry.bundle))
            })?;

            let address = match &entry.name {
                Some(name) => {
                    if !seen_names.insert(name.as_str()) {
                        return Err(KilnError::ManifestError(format!(
                            "entry name '{}' declared twice",
                            name
                        )));
                    }
                    Some(Address::from_name(name))
                }
                None => None,
            };

            let mut dependencies = Vec::with_capacity(entry.deps.len());
            for dep_key in &entry.deps {
                let dep = *by_key.get(dep_key.as_str()).ok_or_else(|| {
                    KilnError::ManifestError(format!(
                        "entry in bundle '{}' depends on unknown bundle '{}'",
                        entry.bundle, dep_key
                    ))
                })?;
                dependencies.push(dep);
            }

            builder.add_entry(CatalogEntry {
                bundle: owner,
                address,
                dependencies,
            });
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::CatalogReader;

    const SAMPLE: &str = r#"
[[bundle]]
key = "ui"
id = 0x0009

[[bundle]]
key = "environment"
id = 0x0401

[[bundle]]
key = "textures"
id = 0x0601

[[entry]]
bundle = "ui"
name = "ui/title_screen"
deps = ["textures"]

[[entry]]
bundle = "environment"
deps = ["textures"]
"#;

    #[test]
    fn test_parse_and_build() {
        let manifest = BundleManifest::from_str(SAMPLE).unwrap();
        assert_eq!(manifest.bundles.len(), 3);
        assert_eq!(manifest.entries.len(), 2);

        let buf = manifest.into_builder().unwrap().build().unwrap();
        let reader = CatalogReader::new(buf).unwrap();
        // builtins + ui + environment + textures
        assert_eq!(reader.bundle_count(), 5);
        assert_eq!(reader.asset_count(), 1);

        let owner = reader
            .bundle_containing(Address::from_name("ui/title_screen"))
            .unwrap();
        assert_eq!(reader.raw_id_of(owner).unwrap(), BundleId::from_raw(0x0009));
    }

    #[test]
    fn test_unknown_bundle_key() {
        let manifest = BundleManifest::from_str(
            r#"
[[entry]]
bundle = "nowhere"
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_builder(),
            Err(KilnError::ManifestError(_))
        ));
    }

    #[test]
    fn test_unknown_dep_key() {
        let manifest = BundleManifest::from_str(
            r#"
[[bundle]]
key = "ui"
id = 9

[[entry]]
bundle = "ui"
deps = ["missing"]
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_builder(),
            Err(KilnError::ManifestError(_))
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let manifest = BundleManifest::from_str(
            r#"
[[bundle]]
key = "ui"
id = 9

[[bundle]]
key = "ui"
id = 10
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_builder(),
            Err(KilnError::ManifestError(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let manifest = BundleManifest::from_str(
            r#"
[[bundle]]
key = "ui"
id = 9

[[entry]]
bundle = "ui"
name = "ui/panel"

[[entry]]
bundle = "ui"
name = "ui/panel"
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_builder(),
            Err(KilnError::ManifestError(_))
        ));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            BundleManifest::from_str("not [ valid"),
            Err(KilnError::ManifestError(_))
        ));
    }
}

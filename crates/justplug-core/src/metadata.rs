//! Reading plugin metadata out of a module's static descriptor.
//!
//! Only the `justplug_descriptor` symbol is touched here. No module code runs
//! before its metadata has been validated.

use justplug_sdk::abi::{symbols, RawDescriptor, RawSlice};
use justplug_sdk::{is_valid_plugin_name, Dependency, PluginMetadata};
use semver::{Version, VersionReq};

use crate::error::MetadataError;
use crate::library::LibraryHandle;

/// Copy the metadata out of an opened module.
pub fn read_metadata(handle: &LibraryHandle) -> Result<PluginMetadata, MetadataError> {
    let address = handle
        .resolve_symbol(symbols::DESCRIPTOR)
        .map_err(|_| MetadataError::MissingSymbol(symbols::DESCRIPTOR.to_string()))?;

    // SAFETY: the module exports `justplug_descriptor` as a `RawDescriptor`
    // static; it stays valid while `handle` is open.
    unsafe { parse_descriptor(&*(address as *const RawDescriptor)) }
}

/// Validate a raw descriptor and copy it into owned metadata.
///
/// # Safety
/// Every slice in `raw` must be null or valid for its length.
pub unsafe fn parse_descriptor(raw: &RawDescriptor) -> Result<PluginMetadata, MetadataError> {
    let name = text(&raw.name, "name")?;
    if name.is_empty() {
        return Err(MetadataError::Malformed("empty plugin name".to_string()));
    }
    if !is_valid_plugin_name(&name) {
        return Err(MetadataError::Malformed(format!(
            "invalid plugin name '{}'",
            name
        )));
    }

    let version = text(&raw.version, "version")?;
    let version = Version::parse(&version).map_err(|e| {
        MetadataError::Malformed(format!("invalid version '{}' for {}: {}", version, name, e))
    })?;

    let mut dependencies = Vec::new();
    for (i, dep) in raw.dependencies().iter().enumerate() {
        let dep_name = text(&dep.name, "dependency name")?;
        if !is_valid_plugin_name(&dep_name) {
            return Err(MetadataError::Malformed(format!(
                "invalid name '{}' for dependency #{} of {}",
                dep_name, i, name
            )));
        }
        let requirement = text(&dep.version, "dependency version")?;
        let requirement = if requirement.trim().is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(&requirement).map_err(|e| {
                MetadataError::Malformed(format!(
                    "invalid version requirement '{}' on {}: {}",
                    requirement, dep_name, e
                ))
            })?
        };
        dependencies.push(Dependency::new(dep_name, requirement));
    }

    Ok(PluginMetadata {
        name,
        pretty_name: text(&raw.pretty_name, "pretty name")?,
        version,
        api_version: raw.api_version,
        author: text(&raw.author, "author")?,
        description: text(&raw.description, "description")?,
        url: text(&raw.url, "url")?,
        license: text(&raw.license, "license")?,
        copyright: text(&raw.copyright, "copyright")?,
        dependencies,
    })
}

unsafe fn text(slice: &RawSlice, field: &str) -> Result<String, MetadataError> {
    slice
        .to_str()
        .map(str::to_string)
        .map_err(|e| MetadataError::Malformed(format!("{} is not valid UTF-8: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use justplug_sdk::abi::{RawDependency, PLUGIN_API_VERSION};

    static DEPS: [RawDependency; 2] = [
        RawDependency::new("logger", ">=1.1"),
        RawDependency::new("storage", ""),
    ];

    #[test]
    fn test_parse_full_descriptor() {
        static RAW: RawDescriptor = RawDescriptor::new("reporter", "2.1.0")
            .with_pretty_name("Reporter")
            .with_author("JustPlug Contributors")
            .with_license("MIT")
            .with_dependencies(&DEPS);

        let meta = unsafe { parse_descriptor(&RAW) }.unwrap();
        assert_eq!(meta.name, "reporter");
        assert_eq!(meta.version, Version::new(2, 1, 0));
        assert_eq!(meta.api_version, PLUGIN_API_VERSION);
        assert_eq!(meta.pretty_name, "Reporter");
        assert_eq!(meta.license, "MIT");
        assert_eq!(
            meta.dependency_names().collect::<Vec<_>>(),
            vec!["logger", "storage"]
        );
        assert_eq!(meta.dependencies[1].version, VersionReq::STAR);
    }

    #[test]
    fn test_malformed_descriptors() {
        static EMPTY_NAME: RawDescriptor = RawDescriptor::new("", "1.0.0");
        static BAD_NAME: RawDescriptor = RawDescriptor::new("not-an-ident", "1.0.0");
        static BAD_VERSION: RawDescriptor = RawDescriptor::new("ok", "one");
        static BAD_DEP_DEPS: [RawDependency; 1] = [RawDependency::new("x", "~~1")];
        static BAD_DEP: RawDescriptor =
            RawDescriptor::new("ok", "1.0.0").with_dependencies(&BAD_DEP_DEPS);

        for raw in [&EMPTY_NAME, &BAD_NAME, &BAD_VERSION, &BAD_DEP] {
            let err = unsafe { parse_descriptor(raw) }.unwrap_err();
            assert!(matches!(err, MetadataError::Malformed(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_invalid_utf8() {
        static BYTES: [u8; 2] = [0xff, 0xfe];
        static RAW: RawDescriptor = RawDescriptor {
            name: RawSlice {
                ptr: BYTES.as_ptr(),
                len: 2,
            },
            ..RawDescriptor::new("placeholder", "1.0.0")
        };
        let err = unsafe { parse_descriptor(&RAW) }.unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}

//! Bundled `google/protobuf/*.proto` sources

use include_dir::{include_dir, Dir};

static WELL_KNOWN: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/well_known");

/// Source of a bundled import such as `google/protobuf/timestamp.proto`
pub fn source(path: &str) -> Option<&'static str> {
    WELL_KNOWN.get_file(path).and_then(|file| file.contents_utf8())
}

/// True for import paths served from the bundle. These never need a reference.
pub fn is_well_known(path: &str) -> bool {
    source(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_files() {
        for path in [
            "google/protobuf/any.proto",
            "google/protobuf/duration.proto",
            "google/protobuf/empty.proto",
            "google/protobuf/field_mask.proto",
            "google/protobuf/struct.proto",
            "google/protobuf/timestamp.proto",
            "google/protobuf/wrappers.proto",
            "google/protobuf/descriptor.proto",
        ] {
            assert!(is_well_known(path), "{path} should be bundled");
        }
        assert!(!is_well_known("google/protobuf/unknown.proto"));
        assert!(source("google/protobuf/timestamp.proto").unwrap().contains("message Timestamp"));
    }
}

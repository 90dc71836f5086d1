//! Well-known Google import prefixes, files, and option messages.
//!
//! Imports under these prefixes are treated as opaque placeholders: they are
//! never read from disk and never recursed into, but the type names they
//! would define are made resolvable so schemas that use them still lower to
//! descriptors.

/// Import path prefixes that are satisfied without touching the filesystem.
pub const WELL_KNOWN_PREFIXES: [&str; 3] = ["google/protobuf/", "google/type/", "google/api/"];

/// The canonical well-known files under `google/protobuf/`.
pub const WELL_KNOWN_FILES: [&str; 10] = [
    "any",
    "api",
    "duration",
    "empty",
    "field_mask",
    "source_context",
    "struct",
    "timestamp",
    "type",
    "wrappers",
];

/// The only messages proto3 `extend` blocks may target.
pub const EXTEND_TARGETS: [&str; 7] = [
    "google.protobuf.FileOptions",
    "google.protobuf.MessageOptions",
    "google.protobuf.FieldOptions",
    "google.protobuf.EnumOptions",
    "google.protobuf.EnumValueOptions",
    "google.protobuf.ServiceOptions",
    "google.protobuf.MethodOptions",
];

/// Returns `true` if `import_path` names a well-known placeholder file.
pub fn is_well_known_import(import_path: &str) -> bool {
    WELL_KNOWN_PREFIXES
        .iter()
        .any(|prefix| import_path.starts_with(prefix))
}

/// Returns `true` if `target` (with or without a leading `.`) is a legal
/// proto3 extend target.
pub fn is_extend_target(target: &str) -> bool {
    let target = target.strip_prefix('.').unwrap_or(target);
    EXTEND_TARGETS.contains(&target)
}

/// Message type names exported by a well-known placeholder import, used to
/// seed the descriptor builder's symbol table. Returns fully qualified names
/// without the leading `.`.
pub fn symbols_for_import(import_path: &str) -> &'static [&'static str] {
    match import_path {
        "google/protobuf/any.proto" => &["google.protobuf.Any"],
        "google/protobuf/api.proto" => &[
            "google.protobuf.Api",
            "google.protobuf.Method",
            "google.protobuf.Mixin",
        ],
        "google/protobuf/duration.proto" => &["google.protobuf.Duration"],
        "google/protobuf/empty.proto" => &["google.protobuf.Empty"],
        "google/protobuf/field_mask.proto" => &["google.protobuf.FieldMask"],
        "google/protobuf/source_context.proto" => &["google.protobuf.SourceContext"],
        "google/protobuf/struct.proto" => &[
            "google.protobuf.Struct",
            "google.protobuf.Value",
            "google.protobuf.ListValue",
            "google.protobuf.NullValue",
        ],
        "google/protobuf/timestamp.proto" => &["google.protobuf.Timestamp"],
        "google/protobuf/type.proto" => &[
            "google.protobuf.Type",
            "google.protobuf.Field",
            "google.protobuf.Enum",
            "google.protobuf.EnumValue",
            "google.protobuf.Option",
            "google.protobuf.Syntax",
        ],
        "google/protobuf/wrappers.proto" => &[
            "google.protobuf.DoubleValue",
            "google.protobuf.FloatValue",
            "google.protobuf.Int64Value",
            "google.protobuf.UInt64Value",
            "google.protobuf.Int32Value",
            "google.protobuf.UInt32Value",
            "google.protobuf.BoolValue",
            "google.protobuf.StringValue",
            "google.protobuf.BytesValue",
        ],
        "google/protobuf/descriptor.proto" => &EXTEND_TARGETS,
        _ => &[],
    }
}

//! Descriptor emission scenarios, including the serialized round trip
//! through `prost`.

use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{FileDescriptorProto, FileDescriptorSet};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn map_desugaring() {
    init_logging();
    let descriptor = protoparse::parse_string_to_descriptor(
        r#"syntax = "proto3"; message Outer { map<string, int32> counts = 3; }"#,
        "outer.proto",
    )
    .unwrap();

    let outer = &descriptor.message_type[0];
    let entry = &outer.nested_type[0];
    assert_eq!(entry.name.as_deref(), Some("CountsEntry"));
    assert_eq!(entry.options.as_ref().unwrap().map_entry, Some(true));
    assert_eq!(entry.field[0].name.as_deref(), Some("key"));
    assert_eq!(entry.field[0].number, Some(1));
    assert_eq!(entry.field[0].r#type(), Type::String);
    assert_eq!(entry.field[1].name.as_deref(), Some("value"));
    assert_eq!(entry.field[1].number, Some(2));
    assert_eq!(entry.field[1].r#type(), Type::Int32);

    let counts = &outer.field[0];
    assert_eq!(counts.number, Some(3));
    assert_eq!(counts.label(), Label::Repeated);
    assert_eq!(counts.r#type(), Type::Message);
    assert!(counts.type_name.as_deref().unwrap().ends_with("CountsEntry"));
}

#[test]
fn fully_qualified_names_carry_a_leading_dot() {
    init_logging();
    let descriptor = protoparse::parse_string_to_descriptor(
        r#"syntax = "proto3";
        package a.b;
        enum Status { UNKNOWN = 0; ACTIVE = 1; }
        message Holder { Status status = 1; }
        service Api { rpc Get (Holder) returns (Holder); }"#,
        "status.proto",
    )
    .unwrap();

    assert_eq!(
        descriptor.message_type[0].field[0].type_name.as_deref(),
        Some(".a.b.Status")
    );
    let method = &descriptor.service[0].method[0];
    assert_eq!(method.input_type.as_deref(), Some(".a.b.Holder"));
    assert_eq!(method.output_type.as_deref(), Some(".a.b.Holder"));
}

/// Round trip through the canonical serialized descriptor form: names,
/// signatures, and qualified references all survive.
#[test]
fn descriptor_round_trip() {
    init_logging();
    let descriptor = protoparse::parse_string_to_descriptor(
        r#"syntax = "proto3";
        package rt;

        enum Color { COLOR_UNSPECIFIED = 0; COLOR_RED = 1; }

        message Item {
            string id = 1;
            Color color = 2;
            map<string, int64> counts = 3;
            oneof payload { string text = 4; bytes blob = 5; }
        }

        service Inventory {
            rpc Get (Item) returns (Item);
            rpc Watch (Item) returns (stream Item);
        }"#,
        "rt.proto",
    )
    .unwrap();

    let set = FileDescriptorSet {
        file: vec![descriptor.clone()],
    };
    let bytes = set.encode_to_vec();
    let decoded = FileDescriptorSet::decode(bytes.as_slice()).unwrap();
    assert_eq!(decoded.file.len(), 1);
    let reparsed: &FileDescriptorProto = &decoded.file[0];

    assert_eq!(reparsed, &descriptor);

    let message_names: Vec<_> = reparsed
        .message_type
        .iter()
        .map(|m| m.name.as_deref().unwrap())
        .collect();
    assert_eq!(message_names, vec!["Item"]);
    assert_eq!(
        reparsed.enum_type[0].name.as_deref(),
        Some("Color")
    );
    let signatures: Vec<_> = reparsed.service[0]
        .method
        .iter()
        .map(|m| {
            (
                m.name.as_deref().unwrap(),
                m.input_type.as_deref().unwrap(),
                m.output_type.as_deref().unwrap(),
                m.server_streaming.unwrap_or(false),
            )
        })
        .collect();
    assert_eq!(
        signatures,
        vec![
            ("Get", ".rt.Item", ".rt.Item", false),
            ("Watch", ".rt.Item", ".rt.Item", true),
        ]
    );
}

#[test]
fn descriptors_for_an_import_graph() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("base.proto"),
        "syntax = \"proto3\";\npackage test.base;\nmessage Base { string id = 1; }\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("user.proto"),
        "syntax = \"proto3\";\n\
         package test.user;\n\
         import \"base.proto\";\n\
         message User { test.base.Base base = 1; }\n",
    )
    .unwrap();

    let descriptors = protoparse::parse_file_to_descriptors(
        dir.path().join("user.proto"),
        &[dir.path().to_owned()],
        false,
    )
    .unwrap();

    // Dependencies come first.
    assert_eq!(descriptors[0].name.as_deref(), Some("base.proto"));
    assert_eq!(descriptors[1].name.as_deref(), Some("user.proto"));
    assert_eq!(descriptors[1].dependency, vec!["base.proto"]);
    assert_eq!(
        descriptors[1].message_type[0].field[0].type_name.as_deref(),
        Some(".test.base.Base")
    );
}

#[test]
fn directory_descriptors_resolve_siblings() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("kind.proto"),
        "syntax = \"proto3\";\npackage dirset;\nenum Kind { KIND_UNSPECIFIED = 0; }\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("thing.proto"),
        "syntax = \"proto3\";\n\
         package dirset;\n\
         import \"kind.proto\";\n\
         message Thing { Kind kind = 1; }\n",
    )
    .unwrap();

    let descriptors = protoparse::parse_directory_to_descriptors(dir.path(), false).unwrap();
    assert_eq!(descriptors.len(), 2);
    let thing = descriptors
        .iter()
        .find(|d| d.name.as_deref() == Some("thing.proto"))
        .unwrap();
    assert_eq!(
        thing.message_type[0].field[0].type_name.as_deref(),
        Some(".dirset.Kind")
    );
}

#[test]
fn well_known_types_resolve_without_disk_access() {
    init_logging();
    let descriptor = protoparse::parse_string_to_descriptor(
        r#"syntax = "proto3";
        import "google/protobuf/timestamp.proto";
        import "google/protobuf/duration.proto";
        message Window {
            google.protobuf.Timestamp start = 1;
            google.protobuf.Duration length = 2;
        }"#,
        "window.proto",
    )
    .unwrap();

    let window = &descriptor.message_type[0];
    assert_eq!(
        window.field[0].type_name.as_deref(),
        Some(".google.protobuf.Timestamp")
    );
    assert_eq!(
        window.field[1].type_name.as_deref(),
        Some(".google.protobuf.Duration")
    );
}

#[test]
fn custom_options_become_uninterpreted_records() {
    init_logging();
    let descriptor = protoparse::parse_string_to_descriptor(
        r#"syntax = "proto3";
        import "google/protobuf/descriptor.proto";
        option (my.file_opt) = { retries: 3 backoff: "linear" };
        message M {
            int32 a = 1 [(my.field_opt) = 42];
        }"#,
        "custom.proto",
    )
    .unwrap();

    let file_options = descriptor.options.unwrap();
    let record = &file_options.uninterpreted_option[0];
    assert!(record.name[0].is_extension);
    assert_eq!(record.name[0].name_part, "my.file_opt");
    assert_eq!(
        record.aggregate_value.as_deref(),
        Some("retries: 3 backoff: \"linear\"")
    );

    let field_options = descriptor.message_type[0].field[0].options.as_ref().unwrap();
    assert_eq!(
        field_options.uninterpreted_option[0].positive_int_value,
        Some(42)
    );
}

//! In-memory representation of a single parsed `.proto` file.
//!
//! Nodes are plain data: tagged variants with public fields, owned by the
//! [`File`] they belong to. Declaration order is preserved everywhere, since
//! descriptor emission depends on it.

/// A complete `.proto` source file.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct File {
    /// The declared syntax version, `"proto3"` for every file this crate
    /// accepts. `None` if the file did not declare one (reported as an
    /// error, but parsing continues as proto3).
    pub syntax: Option<String>,
    /// Dotted package identifier.
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub options: Vec<ProtoOption>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enumeration>,
    pub services: Vec<Service>,
    pub extends: Vec<Extend>,
}

impl File {
    /// Looks up a top-level message by name.
    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Looks up a top-level enum by name.
    pub fn enumeration(&self, name: &str) -> Option<&Enumeration> {
        self.enums.iter().find(|e| e.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportKind {
    Plain,
    Public,
    Weak,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    /// The quoted path exactly as written in `import "…";`.
    pub path: String,
    pub kind: ImportKind,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Message {
    pub name: String,
    pub fields: Vec<Field>,
    pub oneofs: Vec<Oneof>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enumeration>,
    pub options: Vec<ProtoOption>,
    pub reserved_ranges: Vec<ReservedRange>,
    pub reserved_names: Vec<String>,
}

impl Message {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All fields declared in the message, including those inside oneofs,
    /// in declaration order of their groups.
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .chain(self.oneofs.iter().flat_map(|o| o.fields.iter()))
    }
}

/// An inclusive reserved number range. `reserved 5;` is `5..=5`; the `max`
/// keyword maps to the largest valid field number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservedRange {
    pub start: i32,
    pub end: i32,
}

impl ReservedRange {
    pub fn contains(&self, number: i32) -> bool {
        self.start <= number && number <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    /// proto3 default presence; no label written in source.
    Singular,
    Optional,
    Repeated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub ty: FieldType,
    pub options: Vec<ProtoOption>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// A named message or enum reference, possibly dotted and possibly
    /// fully qualified with a leading `.`.
    Named(String),
    Map(MapType),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapType {
    pub key: ScalarType,
    /// Any non-map scalar, enum, or message type.
    pub value: Box<FieldType>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        use ScalarType::*;
        match self {
            Double => "double",
            Float => "float",
            Int32 => "int32",
            Int64 => "int64",
            Uint32 => "uint32",
            Uint64 => "uint64",
            Sint32 => "sint32",
            Sint64 => "sint64",
            Fixed32 => "fixed32",
            Fixed64 => "fixed64",
            Sfixed32 => "sfixed32",
            Sfixed64 => "sfixed64",
            Bool => "bool",
            String => "string",
            Bytes => "bytes",
        }
    }

    /// Map keys are restricted to integral types, `bool`, and `string`.
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(self, ScalarType::Double | ScalarType::Float | ScalarType::Bytes)
    }

    /// Whether a repeated field of this type can carry `[packed = true]`.
    pub fn is_packable(&self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Oneof {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Enumeration {
    pub name: String,
    pub values: Vec<EnumValue>,
    pub options: Vec<ProtoOption>,
}

impl Enumeration {
    /// True if the enum carries `option allow_alias = true;`.
    pub fn allows_alias(&self) -> bool {
        self.options.iter().any(|o| {
            o.name.is_plain("allow_alias") && o.value == OptionValue::Bool(true)
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
    pub options: Vec<ProtoOption>,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Service {
    pub name: String,
    pub methods: Vec<Method>,
    pub options: Vec<ProtoOption>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<ProtoOption>,
}

/// An `extend google.protobuf.XxxOptions { … }` block. proto3 restricts the
/// target to the well-known option messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Extend {
    pub target: String,
    pub fields: Vec<Field>,
}

/// A single `option name = value;` or a `[name = value]` list element.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtoOption {
    pub name: OptionName,
    pub value: OptionValue,
}

/// An option name: a sequence of parts, each either a plain identifier or a
/// parenthesized extension name. `(my.ext).field` has two parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionName {
    pub parts: Vec<OptionNamePart>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionNamePart {
    pub name: String,
    pub is_extension: bool,
}

impl OptionName {
    pub fn plain(name: &str) -> OptionName {
        OptionName {
            parts: vec![OptionNamePart {
                name: name.to_owned(),
                is_extension: false,
            }],
        }
    }

    /// True for a single non-extension part equal to `name`.
    pub fn is_plain(&self, name: &str) -> bool {
        matches!(&self.parts[..], [part] if !part.is_extension && part.name == name)
    }

    /// True if any part is a parenthesized extension name.
    pub fn is_custom(&self) -> bool {
        self.parts.iter().any(|p| p.is_extension)
    }
}

impl std::fmt::Display for OptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            if part.is_extension {
                write!(f, "({})", part.name)?;
            } else {
                f.write_str(&part.name)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A bare identifier, e.g. an enum constant like `SPEED`.
    Ident(String),
    /// A brace-delimited message literal: ordered key/value pairs.
    Message(Vec<(String, OptionValue)>),
    List(Vec<OptionValue>),
}

impl OptionValue {
    /// Renders the value roughly as it appeared in source, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            OptionValue::String(s) => format!("\"{s}\""),
            OptionValue::Int(i) => i.to_string(),
            OptionValue::Float(f) => f.to_string(),
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Ident(i) => i.clone(),
            OptionValue::Message(_) => "{…}".to_owned(),
            OptionValue::List(_) => "[…]".to_owned(),
        }
    }
}

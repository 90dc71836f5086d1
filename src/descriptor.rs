//! Lowering of parsed ASTs into Protocol Buffers file descriptors.
//!
//! The builder performs qualified type-name resolution against a symbol
//! table assembled from the file itself, its resolved dependencies, and the
//! types exported by well-known placeholder imports. Map fields are
//! desugared into synthetic `*Entry` messages exactly the way protoc does,
//! and fully qualified type references are emitted with a leading `.`.

use std::collections::HashMap;

use heck::{ToLowerCamelCase, ToUpperCamelCase};
use itertools::Itertools;
use log::debug;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::uninterpreted_option::NamePart;
use prost_types::{
    file_options::OptimizeMode, method_options::IdempotencyLevel, DescriptorProto,
    EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto, EnumValueOptions,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, FileOptions, MessageOptions,
    MethodDescriptorProto, MethodOptions, OneofDescriptorProto, ServiceDescriptorProto,
    ServiceOptions, UninterpretedOption,
};

use crate::ast::{
    Enumeration, Extend, Field, FieldType, File, ImportKind, Label as AstLabel, Message, Method,
    OptionValue, ProtoOption, ScalarType, Service,
};
use crate::error::BuildError;
use crate::well_known;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SymbolKind {
    Message,
    Enum,
}

/// Lowers ASTs into [`FileDescriptorProto`] records.
///
/// Register every dependency with [`DescriptorBuilder::add_symbols`] before
/// calling [`DescriptorBuilder::build`]; the file being built registers its
/// own types automatically.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    /// Fully qualified type name (no leading dot) to kind.
    symbols: HashMap<String, SymbolKind>,
}

/// Builds a descriptor for `file`, resolving names against `dependencies`.
pub fn file_to_descriptor(
    name: &str,
    file: &File,
    dependencies: &[&File],
) -> Result<FileDescriptorProto, BuildError> {
    let mut builder = DescriptorBuilder::new();
    for dependency in dependencies {
        builder.add_symbols(dependency);
    }
    builder.build(name, file)
}

impl DescriptorBuilder {
    pub fn new() -> DescriptorBuilder {
        DescriptorBuilder::default()
    }

    /// Registers the types declared by `file` (and the well-known types
    /// implied by its placeholder imports) for name resolution.
    pub fn add_symbols(&mut self, file: &File) {
        let package = file.package.clone().unwrap_or_default();
        for message in &file.messages {
            self.add_message_symbols(&package, message);
        }
        for enumeration in &file.enums {
            self.symbols
                .insert(qualify(&package, &enumeration.name), SymbolKind::Enum);
        }
        for import in &file.imports {
            if well_known::is_well_known_import(&import.path) {
                for symbol in well_known::symbols_for_import(&import.path) {
                    self.symbols
                        .insert((*symbol).to_owned(), SymbolKind::Message);
                }
            }
        }
    }

    fn add_message_symbols(&mut self, scope: &str, message: &Message) {
        let fq_name = qualify(scope, &message.name);
        for nested in &message.messages {
            self.add_message_symbols(&fq_name, nested);
        }
        for enumeration in &message.enums {
            self.symbols
                .insert(qualify(&fq_name, &enumeration.name), SymbolKind::Enum);
        }
        self.symbols.insert(fq_name, SymbolKind::Message);
    }

    /// Lowers `file` to its descriptor. `name` becomes the descriptor's
    /// file name (conventionally the import path of the file).
    pub fn build(&mut self, name: &str, file: &File) -> Result<FileDescriptorProto, BuildError> {
        self.add_symbols(file);
        let package = file.package.clone().unwrap_or_default();

        let mut descriptor = FileDescriptorProto {
            name: Some(name.to_owned()),
            package: file.package.clone(),
            syntax: Some("proto3".to_owned()),
            ..FileDescriptorProto::default()
        };

        for (index, import) in file.imports.iter().enumerate() {
            descriptor.dependency.push(import.path.clone());
            match import.kind {
                ImportKind::Public => descriptor.public_dependency.push(index as i32),
                ImportKind::Weak => descriptor.weak_dependency.push(index as i32),
                ImportKind::Plain => {}
            }
        }

        for message in &file.messages {
            descriptor
                .message_type
                .push(self.lower_message(&package, message)?);
        }
        for enumeration in &file.enums {
            descriptor.enum_type.push(self.lower_enum(enumeration)?);
        }
        for service in &file.services {
            descriptor.service.push(self.lower_service(&package, service)?);
        }
        for extend in &file.extends {
            for field in &extend.fields {
                descriptor
                    .extension
                    .push(self.lower_extension(&package, extend, field)?);
            }
        }

        descriptor.options = self.lower_file_options(&file.options)?;
        debug!(
            "built descriptor for {name}: {} message(s), {} enum(s), {} service(s)",
            descriptor.message_type.len(),
            descriptor.enum_type.len(),
            descriptor.service.len()
        );
        Ok(descriptor)
    }

    fn lower_message(&self, scope: &str, message: &Message) -> Result<DescriptorProto, BuildError> {
        let fq_name = qualify(scope, &message.name);
        let mut descriptor = DescriptorProto {
            name: Some(message.name.clone()),
            ..DescriptorProto::default()
        };

        for field in &message.fields {
            let lowered = self.lower_field(&fq_name, field, None, &mut descriptor)?;
            descriptor.field.push(lowered);
        }

        for (index, oneof) in message.oneofs.iter().enumerate() {
            if oneof.fields.is_empty() {
                return Err(BuildError::EmptyOneof(oneof.name.clone()));
            }
            descriptor.oneof_decl.push(OneofDescriptorProto {
                name: Some(oneof.name.clone()),
                options: None,
            });
            for field in &oneof.fields {
                if matches!(field.ty, FieldType::Map(_)) {
                    return Err(BuildError::NestedMapNotAllowed(field.name.clone()));
                }
                let lowered =
                    self.lower_field(&fq_name, field, Some(index as i32), &mut descriptor)?;
                descriptor.field.push(lowered);
            }
        }

        for nested in &message.messages {
            descriptor
                .nested_type
                .push(self.lower_message(&fq_name, nested)?);
        }
        for enumeration in &message.enums {
            descriptor.enum_type.push(self.lower_enum(enumeration)?);
        }

        for range in &message.reserved_ranges {
            descriptor
                .reserved_range
                .push(prost_types::descriptor_proto::ReservedRange {
                    start: Some(range.start),
                    // Descriptor reserved ranges are end-exclusive.
                    end: Some(range.end.saturating_add(1)),
                });
        }
        descriptor.reserved_name = message.reserved_names.clone();

        descriptor.options = self.lower_message_options(&message.options)?;
        Ok(descriptor)
    }

    /// Lowers one field. Map fields additionally synthesize their entry
    /// message into `parent.nested_type`.
    fn lower_field(
        &self,
        scope: &str,
        field: &Field,
        oneof_index: Option<i32>,
        parent: &mut DescriptorProto,
    ) -> Result<FieldDescriptorProto, BuildError> {
        let mut descriptor = FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: Some(field.number),
            json_name: Some(field.name.to_lower_camel_case()),
            oneof_index,
            ..FieldDescriptorProto::default()
        };

        match &field.ty {
            FieldType::Scalar(scalar) => {
                descriptor.set_type(scalar_type(*scalar));
                descriptor.set_label(lower_label(field.label));
            }
            FieldType::Named(reference) => {
                let (fq, kind) = self.resolve(reference, scope)?;
                descriptor.set_type(match kind {
                    SymbolKind::Message => Type::Message,
                    SymbolKind::Enum => Type::Enum,
                });
                descriptor.type_name = Some(fq);
                descriptor.set_label(lower_label(field.label));
            }
            FieldType::Map(map) => {
                if field.label == AstLabel::Repeated {
                    return Err(BuildError::NestedMapNotAllowed(field.name.clone()));
                }
                let entry = self.synthesize_map_entry(scope, field, map)?;
                let entry_fq = format!(".{}", qualify(scope, entry.name()));
                parent.nested_type.push(entry);
                descriptor.set_type(Type::Message);
                descriptor.type_name = Some(entry_fq);
                descriptor.set_label(Label::Repeated);
            }
        }

        if field.label == AstLabel::Optional && !matches!(field.ty, FieldType::Map(_)) {
            descriptor.proto3_optional = Some(true);
        }

        descriptor.options = self.lower_field_options(field, &descriptor)?;
        Ok(descriptor)
    }

    /// `map<K, V> name = N;` becomes a nested `<Name>Entry` message with
    /// `key = 1` / `value = 2` and `map_entry = true`.
    fn synthesize_map_entry(
        &self,
        scope: &str,
        field: &Field,
        map: &crate::ast::MapType,
    ) -> Result<DescriptorProto, BuildError> {
        let entry_name = format!("{}Entry", field.name.to_upper_camel_case());

        let mut key = FieldDescriptorProto {
            name: Some("key".to_owned()),
            number: Some(1),
            json_name: Some("key".to_owned()),
            ..FieldDescriptorProto::default()
        };
        key.set_type(scalar_type(map.key));
        key.set_label(Label::Optional);

        let mut value = FieldDescriptorProto {
            name: Some("value".to_owned()),
            number: Some(2),
            json_name: Some("value".to_owned()),
            ..FieldDescriptorProto::default()
        };
        value.set_label(Label::Optional);
        match map.value.as_ref() {
            FieldType::Scalar(scalar) => value.set_type(scalar_type(*scalar)),
            FieldType::Named(reference) => {
                let (fq, kind) = self.resolve(reference, scope)?;
                value.set_type(match kind {
                    SymbolKind::Message => Type::Message,
                    SymbolKind::Enum => Type::Enum,
                });
                value.type_name = Some(fq);
            }
            FieldType::Map(_) => {
                return Err(BuildError::NestedMapNotAllowed(field.name.clone()))
            }
        }

        Ok(DescriptorProto {
            name: Some(entry_name),
            field: vec![key, value],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..MessageOptions::default()
            }),
            ..DescriptorProto::default()
        })
    }

    fn lower_enum(&self, enumeration: &Enumeration) -> Result<EnumDescriptorProto, BuildError> {
        if enumeration.values.is_empty() {
            return Err(BuildError::EmptyEnum(enumeration.name.clone()));
        }
        if !enumeration.allows_alias() && enumeration.values[0].number != 0 {
            return Err(BuildError::FirstEnumValueNotZero(enumeration.name.clone()));
        }

        let mut descriptor = EnumDescriptorProto {
            name: Some(enumeration.name.clone()),
            ..EnumDescriptorProto::default()
        };
        for value in &enumeration.values {
            descriptor.value.push(EnumValueDescriptorProto {
                name: Some(value.name.clone()),
                number: Some(value.number),
                options: self.lower_enum_value_options(&value.options)?,
            });
        }
        descriptor.options = self.lower_enum_options(&enumeration.options)?;
        Ok(descriptor)
    }

    fn lower_service(
        &self,
        package: &str,
        service: &Service,
    ) -> Result<ServiceDescriptorProto, BuildError> {
        let mut descriptor = ServiceDescriptorProto {
            name: Some(service.name.clone()),
            ..ServiceDescriptorProto::default()
        };
        for method in &service.methods {
            descriptor.method.push(self.lower_method(package, method)?);
        }
        descriptor.options = self.lower_service_options(&service.options)?;
        Ok(descriptor)
    }

    fn lower_method(
        &self,
        package: &str,
        method: &Method,
    ) -> Result<MethodDescriptorProto, BuildError> {
        let (input_type, _) = self.resolve(&method.input_type, package)?;
        let (output_type, _) = self.resolve(&method.output_type, package)?;
        Ok(MethodDescriptorProto {
            name: Some(method.name.clone()),
            input_type: Some(input_type),
            output_type: Some(output_type),
            client_streaming: method.client_streaming.then_some(true),
            server_streaming: method.server_streaming.then_some(true),
            options: self.lower_method_options(&method.options)?,
        })
    }

    fn lower_extension(
        &self,
        package: &str,
        extend: &Extend,
        field: &Field,
    ) -> Result<FieldDescriptorProto, BuildError> {
        if !well_known::is_extend_target(&extend.target) {
            return Err(BuildError::UndefinedType {
                reference: extend.target.clone(),
                container: "extend".to_owned(),
            });
        }
        let extendee = format!(".{}", extend.target.trim_start_matches('.'));
        let mut descriptor = self.lower_field(
            package,
            field,
            None,
            // Extensions cannot be maps, so the parent is never touched.
            &mut DescriptorProto::default(),
        )?;
        descriptor.extendee = Some(extendee);
        Ok(descriptor)
    }

    /// Resolves a type reference from the innermost scope outward and
    /// returns the `.`-prefixed fully qualified name.
    fn resolve(&self, reference: &str, scope: &str) -> Result<(String, SymbolKind), BuildError> {
        if let Some(absolute) = reference.strip_prefix('.') {
            if let Some(&kind) = self.symbols.get(absolute) {
                return Ok((format!(".{absolute}"), kind));
            }
            return Err(BuildError::UndefinedType {
                reference: reference.to_owned(),
                container: container_name(scope),
            });
        }

        let mut prefix = scope;
        loop {
            let candidate = qualify(prefix, reference);
            if let Some(&kind) = self.symbols.get(&candidate) {
                return Ok((format!(".{candidate}"), kind));
            }
            match prefix.rfind('.') {
                Some(dot) => prefix = &prefix[..dot],
                None if !prefix.is_empty() => prefix = "",
                None => {
                    return Err(BuildError::UndefinedType {
                        reference: reference.to_owned(),
                        container: container_name(scope),
                    })
                }
            }
        }
    }

    // Option lowering -------------------------------------------------------

    fn lower_file_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<FileOptions>, BuildError> {
        let mut lowered = FileOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "java_package" => lowered.java_package = Some(expect_string(option)?),
                "java_outer_classname" => {
                    lowered.java_outer_classname = Some(expect_string(option)?)
                }
                "java_multiple_files" => lowered.java_multiple_files = Some(expect_bool(option)?),
                "java_generic_services" => {
                    lowered.java_generic_services = Some(expect_bool(option)?)
                }
                "java_string_check_utf8" => {
                    lowered.java_string_check_utf8 = Some(expect_bool(option)?)
                }
                "go_package" => lowered.go_package = Some(expect_string(option)?),
                "cc_generic_services" => lowered.cc_generic_services = Some(expect_bool(option)?),
                "py_generic_services" => lowered.py_generic_services = Some(expect_bool(option)?),
                "cc_enable_arenas" => lowered.cc_enable_arenas = Some(expect_bool(option)?),
                "objc_class_prefix" => lowered.objc_class_prefix = Some(expect_string(option)?),
                "csharp_namespace" => lowered.csharp_namespace = Some(expect_string(option)?),
                "swift_prefix" => lowered.swift_prefix = Some(expect_string(option)?),
                "php_class_prefix" => lowered.php_class_prefix = Some(expect_string(option)?),
                "php_namespace" => lowered.php_namespace = Some(expect_string(option)?),
                "php_metadata_namespace" => {
                    lowered.php_metadata_namespace = Some(expect_string(option)?)
                }
                "ruby_package" => lowered.ruby_package = Some(expect_string(option)?),
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                "optimize_for" => {
                    let mode = match &option.value {
                        OptionValue::Ident(ident) => match ident.as_str() {
                            "SPEED" => OptimizeMode::Speed,
                            "CODE_SIZE" => OptimizeMode::CodeSize,
                            "LITE_RUNTIME" => OptimizeMode::LiteRuntime,
                            _ => return Err(invalid_value(option)),
                        },
                        _ => return Err(invalid_value(option)),
                    };
                    lowered.optimize_for = Some(mode as i32);
                }
                "java_generate_equals_and_hash" => {
                    return Err(BuildError::UnsupportedOption(name))
                }
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_message_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<MessageOptions>, BuildError> {
        let mut lowered = MessageOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                "no_standard_descriptor_accessor" => {
                    lowered.no_standard_descriptor_accessor = Some(expect_bool(option)?)
                }
                "message_set_wire_format" => return Err(BuildError::UnsupportedOption(name)),
                "map_entry" => return Err(invalid_value(option)),
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_field_options(
        &self,
        field: &Field,
        descriptor: &FieldDescriptorProto,
    ) -> Result<Option<FieldOptions>, BuildError> {
        let mut lowered = FieldOptions::default();
        for option in &field.options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                "packed" => {
                    let packed = expect_bool(option)?;
                    if packed && !is_packable(descriptor) {
                        return Err(BuildError::UnpackableFieldType {
                            field: field.name.clone(),
                            ty: type_description(&field.ty),
                        });
                    }
                    lowered.packed = Some(packed);
                }
                "ctype" | "jstype" | "lazy" | "unverified_lazy" | "weak" | "debug_redact"
                | "retention" | "targets" => return Err(BuildError::UnsupportedOption(name)),
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_enum_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<EnumOptions>, BuildError> {
        let mut lowered = EnumOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "allow_alias" => lowered.allow_alias = Some(expect_bool(option)?),
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_enum_value_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<EnumValueOptions>, BuildError> {
        let mut lowered = EnumValueOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_service_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<ServiceOptions>, BuildError> {
        let mut lowered = ServiceOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }

    fn lower_method_options(
        &self,
        options: &[ProtoOption],
    ) -> Result<Option<MethodOptions>, BuildError> {
        let mut lowered = MethodOptions::default();
        for option in options {
            if option.name.is_custom() {
                lowered.uninterpreted_option.push(uninterpreted(option));
                continue;
            }
            let name = option.name.to_string();
            match name.as_str() {
                "deprecated" => lowered.deprecated = Some(expect_bool(option)?),
                "idempotency_level" => {
                    let level = match &option.value {
                        OptionValue::Ident(ident) => match ident.as_str() {
                            "IDEMPOTENCY_UNKNOWN" => IdempotencyLevel::IdempotencyUnknown,
                            "NO_SIDE_EFFECTS" => IdempotencyLevel::NoSideEffects,
                            "IDEMPOTENT" => IdempotencyLevel::Idempotent,
                            _ => return Err(invalid_value(option)),
                        },
                        _ => return Err(invalid_value(option)),
                    };
                    lowered.idempotency_level = Some(level as i32);
                }
                _ => return Err(BuildError::UnknownOption(name)),
            }
        }
        Ok(non_default(lowered))
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{scope}.{name}")
    }
}

fn container_name(scope: &str) -> String {
    if scope.is_empty() {
        "<file scope>".to_owned()
    } else {
        scope.to_owned()
    }
}

fn lower_label(label: AstLabel) -> Label {
    match label {
        AstLabel::Singular | AstLabel::Optional => Label::Optional,
        AstLabel::Repeated => Label::Repeated,
    }
}

fn scalar_type(scalar: ScalarType) -> Type {
    match scalar {
        ScalarType::Double => Type::Double,
        ScalarType::Float => Type::Float,
        ScalarType::Int32 => Type::Int32,
        ScalarType::Int64 => Type::Int64,
        ScalarType::Uint32 => Type::Uint32,
        ScalarType::Uint64 => Type::Uint64,
        ScalarType::Sint32 => Type::Sint32,
        ScalarType::Sint64 => Type::Sint64,
        ScalarType::Fixed32 => Type::Fixed32,
        ScalarType::Fixed64 => Type::Fixed64,
        ScalarType::Sfixed32 => Type::Sfixed32,
        ScalarType::Sfixed64 => Type::Sfixed64,
        ScalarType::Bool => Type::Bool,
        ScalarType::String => Type::String,
        ScalarType::Bytes => Type::Bytes,
    }
}

fn is_packable(descriptor: &FieldDescriptorProto) -> bool {
    descriptor.label() == Label::Repeated
        && !matches!(
            descriptor.r#type(),
            Type::String | Type::Bytes | Type::Message | Type::Group
        )
}

fn type_description(ty: &FieldType) -> String {
    match ty {
        FieldType::Scalar(scalar) => scalar.as_str().to_owned(),
        FieldType::Named(name) => name.clone(),
        FieldType::Map(_) => "map".to_owned(),
    }
}

fn expect_bool(option: &ProtoOption) -> Result<bool, BuildError> {
    match option.value {
        OptionValue::Bool(value) => Ok(value),
        _ => Err(invalid_value(option)),
    }
}

fn expect_string(option: &ProtoOption) -> Result<String, BuildError> {
    match &option.value {
        OptionValue::String(value) => Ok(value.clone()),
        _ => Err(invalid_value(option)),
    }
}

fn invalid_value(option: &ProtoOption) -> BuildError {
    BuildError::InvalidOptionValue {
        option: option.name.to_string(),
        value: option.value.describe(),
    }
}

fn non_default<T: Default + PartialEq>(options: T) -> Option<T> {
    if options == T::default() {
        None
    } else {
        Some(options)
    }
}

/// Custom options are preserved as uninterpreted records keeping the
/// parenthesized name path and the original value.
fn uninterpreted(option: &ProtoOption) -> UninterpretedOption {
    let mut record = UninterpretedOption {
        name: option
            .name
            .parts
            .iter()
            .map(|part| NamePart {
                name_part: part.name.clone(),
                is_extension: part.is_extension,
            })
            .collect(),
        ..UninterpretedOption::default()
    };
    match &option.value {
        OptionValue::String(value) => record.string_value = Some(value.clone().into_bytes()),
        OptionValue::Int(value) if *value >= 0 => {
            record.positive_int_value = Some(*value as u64)
        }
        OptionValue::Int(value) => record.negative_int_value = Some(*value),
        OptionValue::Float(value) => record.double_value = Some(*value),
        OptionValue::Bool(value) => record.identifier_value = Some(value.to_string()),
        OptionValue::Ident(value) => record.identifier_value = Some(value.clone()),
        OptionValue::Message(entries) => {
            record.aggregate_value = Some(render_aggregate(entries))
        }
        OptionValue::List(_) => record.aggregate_value = Some(render_value(&option.value)),
    }
    record
}

fn render_aggregate(entries: &[(String, OptionValue)]) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{key}: {}", render_value(value)))
        .join(" ")
}

fn render_value(value: &OptionValue) -> String {
    match value {
        OptionValue::String(s) => format!("\"{s}\""),
        OptionValue::Int(i) => i.to_string(),
        OptionValue::Float(f) => f.to_string(),
        OptionValue::Bool(b) => b.to_string(),
        OptionValue::Ident(i) => i.clone(),
        OptionValue::Message(entries) => format!("{{ {} }}", render_aggregate(entries)),
        OptionValue::List(values) => {
            format!("[{}]", values.iter().map(render_value).join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn descriptor_for(source: &str) -> FileDescriptorProto {
        let (file, errors) = parser::parse(source);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        file_to_descriptor("test.proto", &file, &[]).unwrap()
    }

    fn build_err(source: &str) -> BuildError {
        let (file, errors) = parser::parse(source);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        file_to_descriptor("test.proto", &file, &[]).unwrap_err()
    }

    #[test]
    fn qualified_enum_reference() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            package a.b;
            enum Status { UNKNOWN = 0; ACTIVE = 1; }
            message Holder { Status status = 1; }"#,
        );
        assert_eq!(descriptor.package.as_deref(), Some("a.b"));
        let field = &descriptor.message_type[0].field[0];
        assert_eq!(field.type_name.as_deref(), Some(".a.b.Status"));
        assert_eq!(field.r#type(), Type::Enum);
    }

    #[test]
    fn map_desugaring() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3"; message Outer { map<string, int32> counts = 3; }"#,
        );
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
        assert_eq!(counts.type_name.as_deref(), Some(".Outer.CountsEntry"));
    }

    #[test]
    fn nested_scope_resolution() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            package pkg;
            message Outer {
                message Inner { string id = 1; }
                Inner inner = 1;
                Outer recursive = 2;
            }"#,
        );
        let outer = &descriptor.message_type[0];
        assert_eq!(
            outer.field[0].type_name.as_deref(),
            Some(".pkg.Outer.Inner")
        );
        assert_eq!(outer.field[1].type_name.as_deref(), Some(".pkg.Outer"));
    }

    #[test]
    fn undefined_type() {
        let err = build_err(r#"syntax = "proto3"; message M { Missing x = 1; }"#);
        assert_eq!(
            err,
            BuildError::UndefinedType {
                reference: "Missing".to_owned(),
                container: "M".to_owned(),
            }
        );
    }

    #[test]
    fn oneof_lowering() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            message M {
                oneof choice { string a = 1; int32 b = 2; }
            }"#,
        );
        let message = &descriptor.message_type[0];
        assert_eq!(message.oneof_decl[0].name.as_deref(), Some("choice"));
        assert_eq!(message.field[0].oneof_index, Some(0));
        assert_eq!(message.field[1].oneof_index, Some(0));
    }

    #[test]
    fn proto3_optional_flag() {
        let descriptor =
            descriptor_for(r#"syntax = "proto3"; message M { optional string a = 1; }"#);
        let field = &descriptor.message_type[0].field[0];
        assert_eq!(field.proto3_optional, Some(true));
        assert_eq!(field.label(), Label::Optional);
    }

    #[test]
    fn first_enum_value_must_be_zero() {
        let err = build_err(r#"syntax = "proto3"; enum E { ONE = 1; }"#);
        assert_eq!(err, BuildError::FirstEnumValueNotZero("E".to_owned()));
    }

    #[test]
    fn service_lowering() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            package svc;
            message Req {}
            message Resp {}
            service Api {
                rpc Call (Req) returns (stream Resp);
            }"#,
        );
        let method = &descriptor.service[0].method[0];
        assert_eq!(method.input_type.as_deref(), Some(".svc.Req"));
        assert_eq!(method.output_type.as_deref(), Some(".svc.Resp"));
        assert_eq!(method.client_streaming, None);
        assert_eq!(method.server_streaming, Some(true));
    }

    #[test]
    fn extension_lowering() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            import "google/protobuf/descriptor.proto";
            extend google.protobuf.FieldOptions { string tag = 50001; }"#,
        );
        let extension = &descriptor.extension[0];
        assert_eq!(
            extension.extendee.as_deref(),
            Some(".google.protobuf.FieldOptions")
        );
        assert_eq!(extension.number, Some(50001));
    }

    #[test]
    fn well_known_seeding() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            import "google/protobuf/timestamp.proto";
            message Event { google.protobuf.Timestamp at = 1; }"#,
        );
        let field = &descriptor.message_type[0].field[0];
        assert_eq!(
            field.type_name.as_deref(),
            Some(".google.protobuf.Timestamp")
        );
        assert_eq!(descriptor.dependency, vec!["google/protobuf/timestamp.proto"]);
    }

    #[test]
    fn file_options_lowering() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3";
            option java_package = "com.example.foo";
            option optimize_for = SPEED;
            option (custom.opt) = "kept";"#,
        );
        let options = descriptor.options.unwrap();
        assert_eq!(options.java_package.as_deref(), Some("com.example.foo"));
        assert_eq!(options.optimize_for, Some(OptimizeMode::Speed as i32));
        let custom = &options.uninterpreted_option[0];
        assert_eq!(custom.name[0].name_part, "custom.opt");
        assert!(custom.name[0].is_extension);
        assert_eq!(custom.string_value.as_deref(), Some(&b"kept"[..]));
    }

    #[test]
    fn unknown_and_invalid_options() {
        assert_eq!(
            build_err(r#"syntax = "proto3"; option nonsense = true;"#),
            BuildError::UnknownOption("nonsense".to_owned())
        );
        assert!(matches!(
            build_err(r#"syntax = "proto3"; option java_package = true;"#),
            BuildError::InvalidOptionValue { .. }
        ));
    }

    #[test]
    fn packed_validation() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3"; message M { repeated int32 a = 1 [packed = true]; }"#,
        );
        let options = descriptor.message_type[0].field[0].options.as_ref().unwrap();
        assert_eq!(options.packed, Some(true));

        assert!(matches!(
            build_err(r#"syntax = "proto3"; message M { repeated string a = 1 [packed = true]; }"#),
            BuildError::UnpackableFieldType { .. }
        ));
        assert!(matches!(
            build_err(r#"syntax = "proto3"; message M { int32 a = 1 [packed = true]; }"#),
            BuildError::UnpackableFieldType { .. }
        ));
    }

    #[test]
    fn reserved_ranges_are_end_exclusive() {
        let descriptor = descriptor_for(
            r#"syntax = "proto3"; message M { reserved 5, 9 to 11; reserved "gone"; }"#,
        );
        let message = &descriptor.message_type[0];
        assert_eq!(message.reserved_range[0].start, Some(5));
        assert_eq!(message.reserved_range[0].end, Some(6));
        assert_eq!(message.reserved_range[1].start, Some(9));
        assert_eq!(message.reserved_range[1].end, Some(12));
        assert_eq!(message.reserved_name, vec!["gone"]);
    }

    #[test]
    fn dependency_indices() {
        let (file, errors) = parser::parse(
            r#"syntax = "proto3";
            import "google/protobuf/any.proto";
            import public "google/protobuf/empty.proto";
            import weak "google/protobuf/duration.proto";"#,
        );
        assert!(errors.is_empty());
        let descriptor = file_to_descriptor("deps.proto", &file, &[]).unwrap();
        assert_eq!(descriptor.dependency.len(), 3);
        assert_eq!(descriptor.public_dependency, vec![1]);
        assert_eq!(descriptor.weak_dependency, vec![2]);
    }

    #[test]
    fn cross_file_resolution() {
        let (base, errors) = parser::parse(
            r#"syntax = "proto3"; package test.base; message Base { string id = 1; }"#,
        );
        assert!(errors.is_empty());
        let (user, errors) = parser::parse(
            r#"syntax = "proto3";
            package test.user;
            import "base.proto";
            message User { test.base.Base base = 1; }"#,
        );
        assert!(errors.is_empty());

        let descriptor = file_to_descriptor("user.proto", &user, &[&base]).unwrap();
        assert_eq!(
            descriptor.message_type[0].field[0].type_name.as_deref(),
            Some(".test.base.Base")
        );
    }
}

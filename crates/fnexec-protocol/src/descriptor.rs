//! Protobuf descriptor of the `v1beta1` schema.
//!
//! The messages in [`crate::v1beta1`] are written by hand rather than
//! generated by `protoc`, so the descriptor served over gRPC reflection is
//! assembled here. It must stay in step with the `#[prost]` tags.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    ServiceDescriptorProto,
};

use crate::v1beta1::PACKAGE;

/// Path of the schema file, as upstream tooling names it.
pub const FILE_NAME: &str = "apiextensions/fn/proto/v1beta1/run_function.proto";

const STRUCT: &str = ".google.protobuf.Struct";
const DURATION: &str = ".google.protobuf.Duration";

/// Descriptor set holding the schema file and its service.
pub fn file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![file_descriptor()],
    }
}

/// Descriptor of the schema file.
pub fn file_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(FILE_NAME.to_string()),
        package: Some(PACKAGE.to_string()),
        dependency: vec![
            "google/protobuf/struct.proto".to_string(),
            "google/protobuf/duration.proto".to_string(),
        ],
        message_type: vec![
            message(
                "RunFunctionRequest",
                vec![
                    singular("meta", 1, Type::Message, Some(&local("RequestMeta"))),
                    singular("observed", 2, Type::Message, Some(&local("State"))),
                    singular("desired", 3, Type::Message, Some(&local("State"))),
                    singular("input", 4, Type::Message, Some(STRUCT)),
                    singular("context", 5, Type::Message, Some(STRUCT)),
                ],
            ),
            message(
                "RequestMeta",
                vec![singular("tag", 1, Type::String, None)],
            ),
            message(
                "RunFunctionResponse",
                vec![
                    singular("meta", 1, Type::Message, Some(&local("ResponseMeta"))),
                    singular("desired", 2, Type::Message, Some(&local("State"))),
                    repeated("results", 3, Type::Message, Some(&local("Result"))),
                    singular("context", 4, Type::Message, Some(STRUCT)),
                ],
            ),
            message(
                "ResponseMeta",
                vec![
                    singular("tag", 1, Type::String, None),
                    singular("ttl", 2, Type::Message, Some(DURATION)),
                ],
            ),
            message(
                "Result",
                vec![
                    singular("severity", 1, Type::Enum, Some(&local("Severity"))),
                    singular("message", 2, Type::String, None),
                ],
            ),
            DescriptorProto {
                nested_type: vec![map_entry(
                    "ResourcesEntry",
                    Type::Message,
                    Some(&local("Resource")),
                )],
                ..message(
                    "State",
                    vec![
                        singular("composite", 1, Type::Message, Some(&local("Resource"))),
                        repeated(
                            "resources",
                            2,
                            Type::Message,
                            Some(&local("State.ResourcesEntry")),
                        ),
                    ],
                )
            },
            DescriptorProto {
                nested_type: vec![map_entry("ConnectionDetailsEntry", Type::Bytes, None)],
                ..message(
                    "Resource",
                    vec![
                        singular("resource", 1, Type::Message, Some(STRUCT)),
                        repeated(
                            "connection_details",
                            2,
                            Type::Message,
                            Some(&local("Resource.ConnectionDetailsEntry")),
                        ),
                        singular("ready", 3, Type::Enum, Some(&local("Ready"))),
                    ],
                )
            },
        ],
        enum_type: vec![
            enumeration(
                "Ready",
                &[("READY_UNSPECIFIED", 0), ("READY_TRUE", 1), ("READY_FALSE", 2)],
            ),
            enumeration(
                "Severity",
                &[
                    ("SEVERITY_UNSPECIFIED", 0),
                    ("SEVERITY_FATAL", 1),
                    ("SEVERITY_WARNING", 2),
                    ("SEVERITY_NORMAL", 3),
                ],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("FunctionRunnerService".to_string()),
            method: vec![MethodDescriptorProto {
                name: Some("RunFunction".to_string()),
                input_type: Some(local("RunFunctionRequest")),
                output_type: Some(local("RunFunctionResponse")),
                ..Default::default()
            }],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn local(name: &str) -> String {
    format!(".{PACKAGE}.{name}")
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field,
        ..Default::default()
    }
}

fn map_entry(name: &str, value: Type, value_type: Option<&str>) -> DescriptorProto {
    DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(
            name,
            vec![
                singular("key", 1, Type::String, None),
                singular("value", 2, value, value_type),
            ],
        )
    }
}

fn singular(name: &str, number: i32, kind: Type, type_name: Option<&str>) -> FieldDescriptorProto {
    field(name, number, Label::Optional, kind, type_name)
}

fn repeated(name: &str, number: i32, kind: Type, type_name: Option<&str>) -> FieldDescriptorProto {
    field(name, number, Label::Repeated, kind, type_name)
}

fn field(
    name: &str,
    number: i32,
    label: Label,
    kind: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(kind as i32),
        type_name: type_name.map(str::to_string),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

// protoc's lowerCamelCase for field JSON names.
fn json_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::SERVICE_NAME;
    use pretty_assertions::assert_eq;

    fn find<'a>(file: &'a FileDescriptorProto, name: &str) -> &'a DescriptorProto {
        file.message_type
            .iter()
            .find(|m| m.name() == name)
            .unwrap_or_else(|| panic!("no message {name}"))
    }

    #[test]
    fn test_service_matches_grpc_path() {
        let file = file_descriptor();
        let service = &file.service[0];
        assert_eq!(format!("{}.{}", file.package(), service.name()), SERVICE_NAME);
        assert_eq!(service.method[0].name(), "RunFunction");
        assert_eq!(
            service.method[0].input_type(),
            ".apiextensions.fn.proto.v1beta1.RunFunctionRequest"
        );
    }

    #[test]
    fn test_map_fields_point_at_entry_messages() {
        let file = file_descriptor();
        let resource = find(&file, "Resource");
        let details = &resource.field[1];
        assert_eq!(details.json_name(), "connectionDetails");
        assert_eq!(details.label(), Label::Repeated);
        assert_eq!(
            details.type_name(),
            ".apiextensions.fn.proto.v1beta1.Resource.ConnectionDetailsEntry"
        );

        let entry = &resource.nested_type[0];
        assert_eq!(entry.name(), "ConnectionDetailsEntry");
        assert!(entry.options.as_ref().unwrap().map_entry());
        assert_eq!(entry.field[1].r#type(), Type::Bytes);
    }

    #[test]
    fn test_every_type_reference_resolves() {
        let file = file_descriptor();
        let mut known: Vec<String> = vec![STRUCT.to_string(), DURATION.to_string()];
        for m in &file.message_type {
            known.push(local(m.name()));
            for nested in &m.nested_type {
                known.push(local(&format!("{}.{}", m.name(), nested.name())));
            }
        }
        known.extend(file.enum_type.iter().map(|e| local(e.name())));

        let fields = file
            .message_type
            .iter()
            .flat_map(|m| m.field.iter().chain(m.nested_type.iter().flat_map(|n| &n.field)));
        for field in fields.filter(|f| f.type_name.is_some()) {
            assert!(known.iter().any(|k| k == field.type_name()), "{}", field.type_name());
        }
    }
}

//! JSON-Schema derivation from Rust signatures
//!
//! Parameter types map to JSON-type equivalents: integers and floats to
//! `integer`/`number`, `String`/`&str` to `string`, `Vec<T>` to an array of
//! the mapped `T`, map types to objects with `additionalProperties`, and
//! `Option<T>` to `anyOf [T, null]`. Unknown types map to the empty schema
//! (anything goes) rather than failing.

use serde_json::{json, Value};
use syn::{GenericArgument, PathArguments, Type};

use super::{ParamInfo, SignatureInfo};
use crate::inspector::docstring::DocInfo;

/// Map a Rust type to a JSON-schema fragment.
pub fn map_type(ty: &Type) -> Value {
    match ty {
        Type::Reference(reference) => map_type(&reference.elem),
        Type::Paren(paren) => map_type(&paren.elem),
        Type::Slice(slice) => json!({"type": "array", "items": map_type(&slice.elem)}),
        Type::Array(array) => json!({"type": "array", "items": map_type(&array.elem)}),
        Type::Tuple(tuple) if tuple.elems.is_empty() => json!({"type": "null"}),
        Type::Tuple(tuple) => json!({
            "type": "array",
            "prefixItems": tuple.elems.iter().map(map_type).collect::<Vec<_>>(),
        }),
        Type::Path(path) => map_path_type(path),
        _ => json!({}),
    }
}

fn map_path_type(path: &syn::TypePath) -> Value {
    let Some(segment) = path.path.segments.last() else {
        return json!({});
    };
    let ident = segment.ident.to_string();
    match ident.as_str() {
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" => json!({"type": "integer"}),
        "f32" | "f64" => json!({"type": "number"}),
        "bool" => json!({"type": "boolean"}),
        "String" | "str" | "char" | "PathBuf" | "Path" | "OsString" => json!({"type": "string"}),
        "Value" => json!({}),
        "Option" => {
            let inner = first_type_argument(segment)
                .map(map_type)
                .unwrap_or_else(|| json!({}));
            json!({"anyOf": [inner, {"type": "null"}]})
        }
        "Vec" | "VecDeque" | "HashSet" | "BTreeSet" => {
            let items = first_type_argument(segment)
                .map(map_type)
                .unwrap_or_else(|| json!({}));
            json!({"type": "array", "items": items})
        }
        "HashMap" | "BTreeMap" => {
            let values = second_type_argument(segment)
                .map(map_type)
                .unwrap_or_else(|| json!({}));
            json!({"type": "object", "additionalProperties": values})
        }
        "Result" => first_type_argument(segment)
            .map(map_type)
            .unwrap_or_else(|| json!({})),
        "Box" | "Arc" | "Rc" | "Cow" => first_type_argument(segment)
            .map(map_type)
            .unwrap_or_else(|| json!({})),
        _ => json!({}),
    }
}

fn nth_type_argument(segment: &syn::PathSegment, n: usize) -> Option<&Type> {
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .nth(n),
        _ => None,
    }
}

fn first_type_argument(segment: &syn::PathSegment) -> Option<&Type> {
    nth_type_argument(segment, 0)
}

fn second_type_argument(segment: &syn::PathSegment) -> Option<&Type> {
    nth_type_argument(segment, 1)
}

/// Whether a parameter schema admits null (derived from `Option`).
fn is_optional(schema: &Value) -> bool {
    schema
        .get("anyOf")
        .and_then(Value::as_array)
        .map(|branches| branches.iter().any(|b| b.get("type") == Some(&json!("null"))))
        .unwrap_or(false)
}

/// Build the object schema for a signature: parameters become properties,
/// non-optional ones are required, rest-parameters are omitted and
/// reflected via `additionalProperties`.
pub fn object_schema(signature: &SignatureInfo) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in &signature.params {
        if param.is_rest {
            continue;
        }
        properties.insert(param.name.clone(), param.schema.clone());
        if !is_optional(&param.schema) {
            required.push(json!(param.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": signature.has_kwargs,
    })
}

/// Derive the MCP tool definition for a function.
pub fn mcp_tool(signature: &SignatureInfo, doc: &DocInfo) -> Value {
    json!({
        "name": signature.name,
        "description": doc.summary,
        "inputSchema": object_schema(signature),
    })
}

/// Schema fragment for the return type, `{}` when unknown.
pub fn return_schema(signature: &SignatureInfo) -> Value {
    signature
        .return_type
        .as_deref()
        .and_then(|text| syn::parse_str::<Type>(text).ok())
        .map(|ty| map_type(&ty))
        .unwrap_or_else(|| json!({}))
}

pub(super) fn param_info(name: &str, ty: &Type, is_rest: bool) -> ParamInfo {
    ParamInfo {
        name: name.to_string(),
        type_text: Some(type_text(ty)),
        schema: map_type(ty),
        is_rest,
    }
}

/// Render a type the way it appears in source, with token-stream spacing
/// collapsed.
pub fn type_text(ty: &Type) -> String {
    quote::ToTokens::to_token_stream(ty)
        .to_string()
        .replace(" :: ", "::")
        .replace(" < ", "<")
        .replace(" > ", ">")
        .replace(" >", ">")
        .replace("& ", "&")
        .replace(" ,", ",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_type(text: &str) -> Type {
        syn::parse_str(text).unwrap()
    }

    #[test]
    fn scalar_types() {
        assert_eq!(map_type(&parse_type("i64")), json!({"type": "integer"}));
        assert_eq!(map_type(&parse_type("usize")), json!({"type": "integer"}));
        assert_eq!(map_type(&parse_type("f64")), json!({"type": "number"}));
        assert_eq!(map_type(&parse_type("bool")), json!({"type": "boolean"}));
        assert_eq!(map_type(&parse_type("String")), json!({"type": "string"}));
        assert_eq!(map_type(&parse_type("&str")), json!({"type": "string"}));
    }

    #[test]
    fn option_becomes_any_of_with_null() {
        assert_eq!(
            map_type(&parse_type("Option<String>")),
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]})
        );
    }

    #[test]
    fn nested_generics_recurse() {
        assert_eq!(
            map_type(&parse_type("Vec<Option<i32>>")),
            json!({
                "type": "array",
                "items": {"anyOf": [{"type": "integer"}, {"type": "null"}]},
            })
        );
        assert_eq!(
            map_type(&parse_type("HashMap<String, Vec<f64>>")),
            json!({
                "type": "object",
                "additionalProperties": {"type": "array", "items": {"type": "number"}},
            })
        );
    }

    #[test]
    fn unit_is_null_and_unknown_is_open() {
        assert_eq!(map_type(&parse_type("()")), json!({"type": "null"}));
        assert_eq!(map_type(&parse_type("MyCustomThing")), json!({}));
    }

    #[test]
    fn smart_pointers_unwrap() {
        assert_eq!(map_type(&parse_type("Box<u32>")), json!({"type": "integer"}));
        assert_eq!(
            map_type(&parse_type("Arc<Vec<String>>")),
            json!({"type": "array", "items": {"type": "string"}})
        );
    }

    #[test]
    fn result_maps_ok_branch() {
        assert_eq!(
            map_type(&parse_type("Result<bool, Error>")),
            json!({"type": "boolean"})
        );
    }

    #[test]
    fn type_text_is_compact() {
        assert_eq!(type_text(&parse_type("Vec<Option<i32>>")), "Vec<Option<i32>>");
        assert_eq!(type_text(&parse_type("std::string::String")), "std::string::String");
    }
}

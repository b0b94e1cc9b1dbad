//! Handler parameter schemas.
//!
//! Rust has no runtime signature reflection, so a handler declares its
//! parameters with a [`Signature`] and each annotated parameter type supplies a
//! [`TypeShape`] through the [`Reflect`] trait. [`reflect`] turns the pair into
//! a serialisable [`SchemaDescription`] for introspection.
//!
//! Integer, float, string and boolean types map to the primitive labels
//! `"int"`, `"float"`, `"str"` and `"bool"`. Structs declared through
//! [`reflect_struct!`](crate::reflect_struct) expand into nested descriptions.
//! Anything else (containers, generics, `serde_json::Value`) is labelled with a
//! best-effort rendering of its type name.
//!
//! ```ignore
//! use beatbox_core::reflect_struct;
//! use beatbox_core::schema::{reflect, Signature};
//!
//! reflect_struct! {
//!     #[derive(serde::Deserialize)]
//!     pub struct Move { x: i64, y: i64 }
//! }
//!
//! let schema = reflect(&Signature::new().arg::<Move>("mv"));
//! assert_eq!(schema.positional_args, vec!["mv"]);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nested structs deeper than this are labelled instead of expanded.
pub const MAX_REFLECT_DEPTH: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Type shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Primitive kinds that are never expanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Any integer type.
    Int,
    /// `f32` / `f64`.
    Float,
    /// Strings and chars.
    Str,
    /// `bool`.
    Bool,
}

impl Primitive {
    /// Wire label used in [`SchemaDescription::annotations`].
    pub fn label(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        }
    }
}

/// One named field of a reflected struct.
///
/// The field's shape is a function so that self-referential types are only
/// expanded on demand.
#[derive(Clone, Copy, Debug)]
pub struct FieldShape {
    /// Field name.
    pub name: &'static str,
    /// Produces the field type's shape.
    pub shape: fn() -> TypeShape,
}

/// Structural description of a Rust type.
#[derive(Clone, Debug)]
pub enum TypeShape {
    /// Leaf type with a primitive label.
    Primitive(Primitive),
    /// Struct with named fields, expanded recursively.
    Struct {
        /// Type name, used as the label once [`MAX_REFLECT_DEPTH`] is reached.
        name: &'static str,
        /// Declared fields in order.
        fields: &'static [FieldShape],
    },
    /// Type that cannot be expanded; carries a readable label.
    Opaque(String),
}

impl TypeShape {
    /// Opaque shape labelled with the short name of `T`.
    pub fn opaque<T: ?Sized>() -> Self {
        Self::Opaque(short_type_name(std::any::type_name::<T>()))
    }
}

/// Types that can describe their own shape.
pub trait Reflect {
    /// The type's shape.
    fn shape() -> TypeShape;
}

macro_rules! reflect_primitive {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Reflect for $ty {
                fn shape() -> TypeShape {
                    TypeShape::Primitive($kind)
                }
            }
        )+
    };
}

reflect_primitive!(Primitive::Int => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
reflect_primitive!(Primitive::Float => f32, f64);
reflect_primitive!(Primitive::Str => String, str, char);
reflect_primitive!(Primitive::Bool => bool);

impl<T: Reflect + ?Sized> Reflect for &T {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl<T: Reflect + ?Sized> Reflect for Box<T> {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl<T> Reflect for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::opaque::<Self>()
    }
}

impl<T> Reflect for Vec<T> {
    fn shape() -> TypeShape {
        TypeShape::opaque::<Self>()
    }
}

impl<K, V> Reflect for std::collections::HashMap<K, V> {
    fn shape() -> TypeShape {
        TypeShape::opaque::<Self>()
    }
}

impl<K, V> Reflect for BTreeMap<K, V> {
    fn shape() -> TypeShape {
        TypeShape::opaque::<Self>()
    }
}

impl Reflect for Value {
    fn shape() -> TypeShape {
        TypeShape::Opaque("any".to_owned())
    }
}

/// Declare a struct and implement [`Reflect`] for it.
///
/// Attributes (including `#[derive(..)]` and `#[serde(..)]`) pass through
/// unchanged. Generic structs are not supported.
#[macro_export]
macro_rules! reflect_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::schema::Reflect for $name {
            fn shape() -> $crate::schema::TypeShape {
                const FIELDS: &[$crate::schema::FieldShape] = &[
                    $(
                        $crate::schema::FieldShape {
                            name: stringify!($field),
                            shape: <$ty as $crate::schema::Reflect>::shape,
                        },
                    )*
                ];
                $crate::schema::TypeShape::Struct {
                    name: stringify!($name),
                    fields: FIELDS,
                }
            }
        }
    };
}

/// Strip module paths from a `std::any::type_name` rendering:
/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            segment.push(ch);
        } else {
            out.push_str(segment.rsplit("::").next().unwrap_or_default());
            segment.clear();
            out.push(ch);
        }
    }
    out.push_str(segment.rsplit("::").next().unwrap_or_default());
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Signatures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Param {
    name: String,
    shape: Option<fn() -> TypeShape>,
    default: Option<Value>,
}

/// Declared parameter list of a handler.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    positional: Vec<Param>,
    variadic: Option<String>,
    variadic_keyword: Option<String>,
    keyword_only: Vec<Param>,
}

impl Signature {
    /// Empty signature (no parameters).
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature with one annotated positional parameter.
    pub fn of<T: Reflect + ?Sized>(name: &str) -> Self {
        Self::new().arg::<T>(name)
    }

    /// Append an annotated positional parameter.
    #[must_use]
    pub fn arg<T: Reflect + ?Sized>(mut self, name: &str) -> Self {
        self.positional.push(Param {
            name: name.to_owned(),
            shape: Some(T::shape),
            default: None,
        });
        self
    }

    /// Append an annotated positional parameter with a default value.
    #[must_use]
    pub fn arg_with_default<T: Reflect + ?Sized>(
        mut self,
        name: &str,
        default: impl Into<Value>,
    ) -> Self {
        self.positional.push(Param {
            name: name.to_owned(),
            shape: Some(T::shape),
            default: Some(default.into()),
        });
        self
    }

    /// Append a positional parameter without a type annotation.
    #[must_use]
    pub fn untyped_arg(mut self, name: &str) -> Self {
        self.positional.push(Param {
            name: name.to_owned(),
            shape: None,
            default: None,
        });
        self
    }

    /// Name the variadic positional parameter.
    #[must_use]
    pub fn variadic(mut self, name: &str) -> Self {
        self.variadic = Some(name.to_owned());
        self
    }

    /// Name the variadic keyword parameter.
    #[must_use]
    pub fn variadic_keyword(mut self, name: &str) -> Self {
        self.variadic_keyword = Some(name.to_owned());
        self
    }

    /// Append an annotated keyword-only parameter.
    #[must_use]
    pub fn keyword_only<T: Reflect + ?Sized>(mut self, name: &str, default: Option<Value>) -> Self {
        self.keyword_only.push(Param {
            name: name.to_owned(),
            shape: Some(T::shape),
            default,
        });
        self
    }

    /// Append a keyword-only parameter without a type annotation.
    #[must_use]
    pub fn untyped_keyword_only(mut self, name: &str, default: Option<Value>) -> Self {
        self.keyword_only.push(Param {
            name: name.to_owned(),
            shape: None,
            default,
        });
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Type annotation of one parameter or field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Annotation {
    /// Primitive label or best-effort type name.
    Label(String),
    /// Expanded struct.
    Nested(SchemaDescription),
}

impl Annotation {
    /// The label, if this annotation is not nested.
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(label) => Some(label),
            Self::Nested(_) => None,
        }
    }

    /// The nested description, if any.
    pub fn as_nested(&self) -> Option<&SchemaDescription> {
        match self {
            Self::Label(_) => None,
            Self::Nested(desc) => Some(desc),
        }
    }
}

/// JSON-serialisable description of a handler's parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescription {
    /// Positional parameter names, in order.
    pub positional_args: Vec<String>,
    /// Variadic positional parameter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variadic_args: Option<String>,
    /// Variadic keyword parameter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variadic_keyword_args: Option<String>,
    /// Defaults of the positional parameters that declare one, in order.
    pub defaults: Vec<Value>,
    /// Keyword-only parameter names, in order.
    pub keyword_only_args: Vec<String>,
    /// Defaults of keyword-only parameters, by name.
    pub keyword_only_defaults: BTreeMap<String, Value>,
    /// Annotation of every annotated parameter, by name.
    pub annotations: BTreeMap<String, Annotation>,
}

/// Build the description of a signature. Pure.
pub fn reflect(signature: &Signature) -> SchemaDescription {
    let mut desc = SchemaDescription {
        positional_args: signature.positional.iter().map(|p| p.name.clone()).collect(),
        variadic_args: signature.variadic.clone(),
        variadic_keyword_args: signature.variadic_keyword.clone(),
        defaults: signature
            .positional
            .iter()
            .filter_map(|p| p.default.clone())
            .collect(),
        keyword_only_args: signature.keyword_only.iter().map(|p| p.name.clone()).collect(),
        keyword_only_defaults: signature
            .keyword_only
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect(),
        annotations: BTreeMap::new(),
    };

    for param in signature.positional.iter().chain(&signature.keyword_only) {
        if let Some(shape) = param.shape {
            let _ = desc
                .annotations
                .insert(param.name.clone(), annotate(shape(), 0));
        }
    }
    desc
}

fn annotate(shape: TypeShape, depth: usize) -> Annotation {
    match shape {
        TypeShape::Primitive(p) => Annotation::Label(p.label().to_owned()),
        TypeShape::Opaque(label) => Annotation::Label(label),
        TypeShape::Struct { name, .. } if depth >= MAX_REFLECT_DEPTH => {
            Annotation::Label(name.to_owned())
        }
        TypeShape::Struct { fields, .. } => Annotation::Nested(describe_fields(fields, depth + 1)),
    }
}

fn describe_fields(fields: &[FieldShape], depth: usize) -> SchemaDescription {
    SchemaDescription {
        positional_args: fields.iter().map(|f| f.name.to_owned()).collect(),
        annotations: fields
            .iter()
            .map(|f| (f.name.to_owned(), annotate((f.shape)(), depth)))
            .collect(),
        ..SchemaDescription::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    crate::reflect_struct! {
        #[allow(dead_code)]
        struct Inner {
            d: i64,
        }
    }

    crate::reflect_struct! {
        #[allow(dead_code)]
        struct TestType {
            a: i64,
            b: String,
            c: Inner,
        }
    }

    crate::reflect_struct! {
        #[allow(dead_code)]
        struct Node {
            value: u32,
            next: Box<Node>,
        }
    }

    #[test]
    fn empty_signature() {
        let desc = reflect(&Signature::new());
        assert!(desc.positional_args.is_empty());
        assert!(desc.annotations.is_empty());
        assert!(desc.defaults.is_empty());
        assert!(desc.variadic_args.is_none());
    }

    #[test]
    fn untyped_args_produce_no_annotations() {
        let desc = reflect(&Signature::new().untyped_arg("a").untyped_arg("b"));
        assert_eq!(desc.positional_args, vec!["a", "b"]);
        assert!(desc.annotations.is_empty());
    }

    #[test]
    fn primitive_labels() {
        let desc = reflect(
            &Signature::new()
                .arg::<u8>("n")
                .arg::<f64>("x")
                .arg::<&str>("s")
                .arg::<bool>("flag"),
        );
        assert_eq!(desc.annotations["n"].as_label(), Some("int"));
        assert_eq!(desc.annotations["x"].as_label(), Some("float"));
        assert_eq!(desc.annotations["s"].as_label(), Some("str"));
        assert_eq!(desc.annotations["flag"].as_label(), Some("bool"));
    }

    #[test]
    fn nested_struct_flattens() {
        let desc = reflect(&Signature::of::<TestType>("obj"));
        let obj = desc.annotations["obj"].as_nested().unwrap();
        assert_eq!(obj.positional_args, vec!["a", "b", "c"]);
        assert_eq!(obj.annotations["a"].as_label(), Some("int"));
        assert_eq!(obj.annotations["b"].as_label(), Some("str"));

        let c = obj.annotations["c"].as_nested().unwrap();
        assert_eq!(
            serde_json::to_value(&c.annotations).unwrap(),
            json!({"d": "int"})
        );
    }

    #[test]
    fn generic_types_fall_back_to_label() {
        let desc = reflect(
            &Signature::new()
                .arg::<Vec<i64>>("items")
                .arg::<Option<String>>("maybe")
                .arg::<Value>("raw"),
        );
        assert_eq!(desc.annotations["items"].as_label(), Some("Vec<i64>"));
        assert_eq!(desc.annotations["maybe"].as_label(), Some("Option<String>"));
        assert_eq!(desc.annotations["raw"].as_label(), Some("any"));
    }

    #[test]
    fn recursive_struct_is_depth_limited() {
        let desc = reflect(&Signature::of::<Node>("head"));
        let mut current = &desc.annotations["head"];
        let mut depth = 0;
        while let Some(nested) = current.as_nested() {
            current = &nested.annotations["next"];
            depth += 1;
        }
        assert_eq!(depth, MAX_REFLECT_DEPTH);
        assert_eq!(current.as_label(), Some("Node"));
    }

    #[test]
    fn defaults_and_keyword_only() {
        let desc = reflect(
            &Signature::new()
                .arg::<i64>("a")
                .arg_with_default::<i64>("b", 5)
                .variadic("args")
                .keyword_only::<bool>("strict", Some(json!(true)))
                .untyped_keyword_only("tag", None)
                .variadic_keyword("kwargs"),
        );
        assert_eq!(desc.defaults, vec![json!(5)]);
        assert_eq!(desc.variadic_args.as_deref(), Some("args"));
        assert_eq!(desc.variadic_keyword_args.as_deref(), Some("kwargs"));
        assert_eq!(desc.keyword_only_args, vec!["strict", "tag"]);
        assert_eq!(desc.keyword_only_defaults.get("strict"), Some(&json!(true)));
        assert!(!desc.keyword_only_defaults.contains_key("tag"));
        assert_eq!(desc.annotations["strict"].as_label(), Some("bool"));
        assert!(!desc.annotations.contains_key("tag"));
    }

    #[test]
    fn serialized_keys_are_camel_case() {
        let desc = reflect(&Signature::of::<TestType>("obj"));
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["positionalArgs"], json!(["obj"]));
        assert_eq!(value["annotations"]["obj"]["annotations"]["a"], "int");
        assert_eq!(
            value["annotations"]["obj"]["annotations"]["c"]["annotations"],
            json!({"d": "int"})
        );
        assert!(value.get("variadicArgs").is_none());
        assert!(value.get("keywordOnlyDefaults").is_some());
    }

    #[test]
    fn description_deserializes_back() {
        let desc = reflect(&Signature::of::<TestType>("obj").variadic("rest"));
        let json = serde_json::to_string(&desc).unwrap();
        let back: SchemaDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn short_type_name_strips_paths() {
        assert_eq!(
            short_type_name("alloc::vec::Vec<alloc::string::String>"),
            "Vec<String>"
        );
        assert_eq!(
            short_type_name("std::collections::hash::map::HashMap<i32, bool>"),
            "HashMap<i32, bool>"
        );
        assert_eq!(short_type_name("i64"), "i64");
    }
}

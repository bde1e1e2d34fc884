//! Module Schema
//!
//! Structural description of a module's callable surface: methods, their
//! parameters, nested namespaces and custom types. The script binder walks
//! this same structure to build the namespace a script sees, so the schema a
//! module reports and the surface it exposes cannot drift apart.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Type names every schema may reference without declaring them.
const PRIMITIVE_TYPES: &[&str] = &[
    "any", "boolean", "null", "number", "object", "string", "unknown", "void",
];

// ─────────────────────────────────────────────────────────────────────────────
// Schema types
// ─────────────────────────────────────────────────────────────────────────────

/// Complete description of a module's surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ModuleSchema {
    /// Methods at the module root (`modules.<name>.<method>`)
    #[serde(default)]
    pub methods: Vec<MethodSchema>,
    /// Nested namespaces (`modules.<name>.<ns>.<method>`)
    #[serde(default)]
    pub namespaces: Vec<NamespaceSchema>,
    /// Custom object types referenced by parameters or return values
    #[serde(default)]
    pub types: Vec<TypeSchema>,
}

/// A named group of methods, possibly nested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NamespaceSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodSchema>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceSchema>,
}

/// One callable method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MethodSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSchema>,
    #[serde(default = "default_return_type")]
    pub returns: String,
}

fn default_return_type() -> String {
    "void".to_string()
}

/// A method parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
}

/// A custom object type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TypeSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// A field of a custom type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

impl ModuleSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: MethodSchema) -> Self {
        self.methods.push(method);
        self
    }

    pub fn namespace(mut self, namespace: NamespaceSchema) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn custom_type(mut self, ty: TypeSchema) -> Self {
        self.types.push(ty);
        self
    }
}

impl NamespaceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn method(mut self, method: MethodSchema) -> Self {
        self.methods.push(method);
        self
    }

    pub fn namespace(mut self, namespace: NamespaceSchema) -> Self {
        self.namespaces.push(namespace);
        self
    }
}

impl MethodSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            returns: default_return_type(),
            ..Default::default()
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.params.push(ParamSchema {
            name: name.into(),
            ty: ty.into(),
            optional: false,
        });
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.params.push(ParamSchema {
            name: name.into(),
            ty: ty.into(),
            optional: true,
        });
        self
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.returns = ty.into();
        self
    }
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            ty: ty.into(),
            optional: false,
        });
        self
    }

    pub fn optional_field(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            ty: ty.into(),
            optional: true,
        });
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

impl ModuleSchema {
    /// Every callable method as a dotted path (`"get"`, `"time.now"`), in
    /// declaration order.
    pub fn method_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.methods, &self.namespaces, "", &mut paths);
        paths
    }

    /// Look up a method by dotted path.
    pub fn find_method(&self, path: &str) -> Option<&MethodSchema> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let name = segments.pop()?;

        let mut methods = &self.methods;
        let mut namespaces = &self.namespaces;
        for segment in segments {
            let ns = namespaces.iter().find(|ns| ns.name == segment)?;
            methods = &ns.methods;
            namespaces = &ns.namespaces;
        }
        methods.iter().find(|m| m.name == name)
    }

    /// Validate structure and type references.
    ///
    /// Returns a human-readable reason on the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.methods.is_empty() && self.namespaces.is_empty() {
            return Err("schema declares no methods".to_string());
        }

        let mut declared = HashSet::new();
        for ty in &self.types {
            check_identifier("type", &ty.name)?;
            if PRIMITIVE_TYPES.contains(&ty.name.as_str()) {
                return Err(format!("type {} shadows a primitive type", ty.name));
            }
            if !declared.insert(ty.name.as_str()) {
                return Err(format!("duplicate type {}", ty.name));
            }
        }

        for ty in &self.types {
            let mut fields = HashSet::new();
            for field in &ty.fields {
                check_identifier("field", &field.name)?;
                if !fields.insert(field.name.as_str()) {
                    return Err(format!("duplicate field {}.{}", ty.name, field.name));
                }
                check_type_ref(&field.ty, &declared)
                    .map_err(|e| format!("{}.{}: {}", ty.name, field.name, e))?;
            }
        }

        validate_scope(&self.methods, &self.namespaces, "", &declared)
    }

    /// Render a TypeScript declaration for this module under `modules.<name>`.
    pub fn to_declaration(&self, module_name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "declare namespace modules {{");
        let _ = writeln!(out, "  namespace {} {{", module_name);

        for ty in &self.types {
            if let Some(desc) = &ty.description {
                let _ = writeln!(out, "    /** {} */", desc);
            }
            let _ = writeln!(out, "    interface {} {{", ty.name);
            for field in &ty.fields {
                let marker = if field.optional { "?" } else { "" };
                let _ = writeln!(out, "      {}{}: {};", field.name, marker, field.ty);
            }
            let _ = writeln!(out, "    }}");
        }

        write_scope(&mut out, &self.methods, &self.namespaces, 2);

        let _ = writeln!(out, "  }}");
        let _ = writeln!(out, "}}");
        out
    }
}

fn collect_paths(
    methods: &[MethodSchema],
    namespaces: &[NamespaceSchema],
    prefix: &str,
    out: &mut Vec<String>,
) {
    for method in methods {
        out.push(format!("{}{}", prefix, method.name));
    }
    for ns in namespaces {
        let nested = format!("{}{}.", prefix, ns.name);
        collect_paths(&ns.methods, &ns.namespaces, &nested, out);
    }
}

fn validate_scope(
    methods: &[MethodSchema],
    namespaces: &[NamespaceSchema],
    prefix: &str,
    declared: &HashSet<&str>,
) -> Result<(), String> {
    // Methods and namespaces share one JS object, so their names must not collide.
    let mut names = HashSet::new();

    for method in methods {
        check_identifier("method", &method.name).map_err(|e| format!("{}{}", prefix, e))?;
        if !names.insert(method.name.as_str()) {
            return Err(format!("duplicate member {}{}", prefix, method.name));
        }

        let mut params = HashSet::new();
        let mut seen_optional = false;
        for param in &method.params {
            check_identifier("parameter", &param.name)
                .map_err(|e| format!("{}{}: {}", prefix, method.name, e))?;
            if !params.insert(param.name.as_str()) {
                return Err(format!(
                    "{}{}: duplicate parameter {}",
                    prefix, method.name, param.name
                ));
            }
            if param.ty.trim().is_empty() {
                return Err(format!(
                    "{}{}: parameter {} has no type",
                    prefix, method.name, param.name
                ));
            }
            if seen_optional && !param.optional {
                return Err(format!(
                    "{}{}: required parameter {} follows an optional one",
                    prefix, method.name, param.name
                ));
            }
            seen_optional |= param.optional;
            check_type_ref(&param.ty, declared)
                .map_err(|e| format!("{}{}: {}", prefix, method.name, e))?;
        }

        check_type_ref(&method.returns, declared)
            .map_err(|e| format!("{}{}: {}", prefix, method.name, e))?;
    }

    for ns in namespaces {
        check_identifier("namespace", &ns.name).map_err(|e| format!("{}{}", prefix, e))?;
        if !names.insert(ns.name.as_str()) {
            return Err(format!("duplicate member {}{}", prefix, ns.name));
        }
        if ns.methods.is_empty() && ns.namespaces.is_empty() {
            return Err(format!("namespace {}{} is empty", prefix, ns.name));
        }
        let nested = format!("{}{}.", prefix, ns.name);
        validate_scope(&ns.methods, &ns.namespaces, &nested, declared)?;
    }

    Ok(())
}

/// Check that `name` is usable as a JS property / TS identifier.
fn check_identifier(kind: &str, name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else if name.is_empty() {
        Err(format!("{} name is missing", kind))
    } else {
        Err(format!("invalid {} name {:?}", kind, name))
    }
}

/// A type reference is a primitive or declared type, optionally suffixed by `[]`.
fn check_type_ref(ty: &str, declared: &HashSet<&str>) -> Result<(), String> {
    let mut base = ty.trim();
    while let Some(inner) = base.strip_suffix("[]") {
        base = inner;
    }

    if base.is_empty() {
        return Err("missing type".to_string());
    }
    if PRIMITIVE_TYPES.contains(&base) || declared.contains(base) {
        Ok(())
    } else {
        Err(format!("unknown type {}", base))
    }
}

fn write_scope(out: &mut String, methods: &[MethodSchema], namespaces: &[NamespaceSchema], depth: usize) {
    let indent = "  ".repeat(depth);

    for method in methods {
        if let Some(desc) = &method.description {
            let _ = writeln!(out, "{}/** {} */", indent, desc);
        }
        let params: Vec<String> = method
            .params
            .iter()
            .map(|p| format!("{}{}: {}", p.name, if p.optional { "?" } else { "" }, p.ty))
            .collect();
        let _ = writeln!(
            out,
            "{}function {}({}): {};",
            indent,
            method.name,
            params.join(", "),
            method.returns
        );
    }

    for ns in namespaces {
        if let Some(desc) = &ns.description {
            let _ = writeln!(out, "{}/** {} */", indent, desc);
        }
        let _ = writeln!(out, "{}namespace {} {{", indent, ns.name);
        write_scope(out, &ns.methods, &ns.namespaces, depth + 1);
        let _ = writeln!(out, "{}}}", indent);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

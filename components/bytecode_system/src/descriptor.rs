//! Field and method descriptors.

use std::fmt;

use crate::error::{ClassFormatError, FormatResult};

/// Type named by a field descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Example
    ///
    /// ```
    /// use bytecode_system::FieldType;
    ///
    /// let ty = FieldType::parse("[[Ljava/lang/String;").unwrap();
    /// assert_eq!(ty.array_dimensions(), 2);
    /// assert_eq!(ty.to_string(), "[[Ljava/lang/String;");
    /// ```
    pub fn parse(descriptor: &str) -> FormatResult<Self> {
        let (ty, rest) = parse_field_type(descriptor, descriptor)?;
        if !rest.is_empty() {
            return Err(ClassFormatError::BadDescriptor(descriptor.to_string()));
        }
        Ok(ty)
    }

    /// Stack/local slots used by a value of this type.
    pub fn slot_size(&self) -> usize {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// True for object and array types.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Number of leading array dimensions.
    pub fn array_dimensions(&self) -> usize {
        match self {
            FieldType::Array(component) => 1 + component.array_dimensions(),
            _ => 0,
        }
    }

    /// Name used to look this type up as a class: the internal name for
    /// objects, the descriptor for arrays, the keyword for primitives.
    pub fn class_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            FieldType::Array(_) => self.to_string(),
            primitive => primitive_name(primitive).to_string(),
        }
    }
}

fn primitive_name(ty: &FieldType) -> &'static str {
    match ty {
        FieldType::Byte => "byte",
        FieldType::Char => "char",
        FieldType::Double => "double",
        FieldType::Float => "float",
        FieldType::Int => "int",
        FieldType::Long => "long",
        FieldType::Short => "short",
        FieldType::Boolean => "boolean",
        FieldType::Object(_) | FieldType::Array(_) => "",
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => write!(f, "B"),
            FieldType::Char => write!(f, "C"),
            FieldType::Double => write!(f, "D"),
            FieldType::Float => write!(f, "F"),
            FieldType::Int => write!(f, "I"),
            FieldType::Long => write!(f, "J"),
            FieldType::Short => write!(f, "S"),
            FieldType::Boolean => write!(f, "Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(component) => write!(f, "[{}", component),
        }
    }
}

fn parse_field_type<'a>(input: &'a str, whole: &str) -> FormatResult<(FieldType, &'a str)> {
    let bad = || ClassFormatError::BadDescriptor(whole.to_string());
    let first = input.chars().next().ok_or_else(bad)?;
    let rest = &input[first.len_utf8()..];
    let ty = match first {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        'L' => {
            let end = rest.find(';').ok_or_else(bad)?;
            if end == 0 {
                return Err(bad());
            }
            return Ok((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
        }
        '[' => {
            let (component, rest) = parse_field_type(rest, whole)?;
            return Ok((FieldType::Array(Box::new(component)), rest));
        }
        _ => return Err(bad()),
    };
    Ok((ty, rest))
}

/// Parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in order
    pub parameters: Vec<FieldType>,
    /// Return type; `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(IJ)Ljava/lang/String;`.
    ///
    /// # Example
    ///
    /// ```
    /// use bytecode_system::MethodDescriptor;
    ///
    /// let desc = MethodDescriptor::parse("(IJ[B)V").unwrap();
    /// assert_eq!(desc.parameters.len(), 3);
    /// assert_eq!(desc.parameter_slots(), 4);
    /// assert!(desc.return_type.is_none());
    /// ```
    pub fn parse(descriptor: &str) -> FormatResult<Self> {
        let bad = || ClassFormatError::BadDescriptor(descriptor.to_string());
        let mut rest = descriptor.strip_prefix('(').ok_or_else(bad)?;
        let mut parameters = Vec::new();
        while !rest.starts_with(')') {
            let (ty, next) = parse_field_type(rest, descriptor)?;
            parameters.push(ty);
            rest = next;
        }
        let rest = &rest[1..];
        let return_type = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest).map_err(|_| bad())?)
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Slots taken by the parameters, excluding any receiver.
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(FieldType::slot_size).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for parameter in &self.parameters {
            write!(f, "{}", parameter)?;
        }
        write!(f, ")")?;
        match &self.return_type {
            Some(ty) => write!(f, "{}", ty),
            None => write!(f, "V"),
        }
    }
}

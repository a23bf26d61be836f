//! Type-annotation conversion.
//!
//! Annotated lets, parameters, and returns run a conversion step that may
//! coerce or fail. Numeric conversions are value-preserving (a narrowing
//! that would change the value throws); nominal `define` types validate
//! required fields and inject defaults for missing optional fields, then
//! tag the object with the type name.

use crate::parser::ast::{FieldDef, TypeAnn};
use crate::vm::env::Environment;
use crate::vm::interp::Interp;
use crate::vm::numeric::NumericType;
use crate::vm::value::Value;
use std::sync::Arc;

/// A nominal structural type registered by `define`.
pub struct DefineType {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Environment the `define` appeared in; field defaults evaluate here.
    pub env: Arc<Environment>,
}

impl Interp {
    /// Convert `value` to the annotated type, raising a type error on
    /// failure. Returns the (possibly coerced) value.
    pub fn convert_to(
        &mut self,
        value: Value,
        ty: &TypeAnn,
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        let _ = env;
        match ty {
            TypeAnn::Any => value,
            TypeAnn::I8 => self.convert_numeric(value, NumericType::I8, line),
            TypeAnn::I16 => self.convert_numeric(value, NumericType::I16, line),
            TypeAnn::I32 => self.convert_numeric(value, NumericType::I32, line),
            TypeAnn::I64 => self.convert_numeric(value, NumericType::I64, line),
            TypeAnn::U8 => self.convert_numeric(value, NumericType::U8, line),
            TypeAnn::U16 => self.convert_numeric(value, NumericType::U16, line),
            TypeAnn::U32 => self.convert_numeric(value, NumericType::U32, line),
            TypeAnn::U64 => self.convert_numeric(value, NumericType::U64, line),
            TypeAnn::F32 => self.convert_numeric(value, NumericType::F32, line),
            TypeAnn::F64 => self.convert_numeric(value, NumericType::F64, line),
            TypeAnn::Bool => self.expect_kind(value, "bool", line),
            TypeAnn::Str => self.expect_kind(value, "string", line),
            TypeAnn::Array => self.expect_kind(value, "array", line),
            TypeAnn::Object => self.expect_kind(value, "object", line),
            TypeAnn::Buffer => self.expect_kind(value, "buffer", line),
            TypeAnn::Ptr => self.expect_kind(value, "ptr", line),
            TypeAnn::Rune => match value {
                Value::Rune(_) => value,
                // An integer code point coerces when it is a valid scalar.
                other if other.is_numeric() => {
                    match crate::vm::interp::property::int_index(&other)
                        .ok()
                        .and_then(|code| u32::try_from(code).ok())
                        .and_then(char::from_u32)
                    {
                        Some(c) => Value::Rune(c),
                        None => self.throw(format!(
                            "type error: value is not a valid rune (line {})",
                            line
                        )),
                    }
                }
                other => self.throw(format!(
                    "type error: expected rune, got `{}` (line {})",
                    other.type_name(),
                    line
                )),
            },
            TypeAnn::Named(name) => self.convert_nominal(value, name, line),
        }
    }

    fn expect_kind(&mut self, value: Value, expected: &str, line: u32) -> Value {
        if value.type_name() == expected {
            value
        } else {
            self.throw(format!(
                "type error: expected {}, got `{}` (line {})",
                expected,
                value.type_name(),
                line
            ))
        }
    }

    fn convert_numeric(&mut self, value: Value, target: NumericType, line: u32) -> Value {
        match convert_numeric_value(&value, target) {
            Ok(converted) => converted,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    /// Validate and tag an object against a `define` type: required fields
    /// must be present, optional fields get their default injected, and
    /// annotated fields convert recursively.
    fn convert_nominal(&mut self, value: Value, type_name: &str, line: u32) -> Value {
        let Some(def) = self.shared.types.read().get(type_name).cloned() else {
            return self.throw(format!("unknown type `{}` (line {})", type_name, line));
        };
        let Value::Object(obj) = &value else {
            return self.throw(format!(
                "type error: expected `{}` object, got `{}` (line {})",
                type_name,
                value.type_name(),
                line
            ));
        };
        for field in &def.fields {
            match obj.get(&field.name) {
                Some(field_value) => {
                    if let Some(ty) = &field.ty {
                        let converted = self.convert_to(field_value, ty, line, &def.env);
                        if !self.ctx.flow.is_normal() {
                            return Value::Null;
                        }
                        obj.set(&field.name, converted);
                    }
                }
                None => match &field.default {
                    Some(default) => {
                        let mut injected = self.eval_expr(default, &def.env);
                        if !self.ctx.flow.is_normal() {
                            return Value::Null;
                        }
                        if let Some(ty) = &field.ty {
                            injected = self.convert_to(injected, ty, line, &def.env);
                            if !self.ctx.flow.is_normal() {
                                return Value::Null;
                            }
                        }
                        obj.set(&field.name, injected);
                    }
                    None => {
                        return self.throw(format!(
                            "type error: object is missing required field `{}` of `{}` (line {})",
                            field.name, type_name, line
                        ))
                    }
                },
            }
        }
        obj.set_type_name(Some(def.name.clone()));
        value
    }
}

/// Value-preserving numeric conversion. Integer targets reject fractional
/// floats and out-of-range values; float targets accept any numeric.
fn convert_numeric_value(value: &Value, target: NumericType) -> Result<Value, String> {
    if !value.is_numeric() {
        return Err(format!(
            "type error: expected a numeric value, got `{}`",
            value.type_name()
        ));
    }
    let as_float = |v: &Value| -> f64 {
        match v {
            Value::I8(n) => *n as f64,
            Value::I16(n) => *n as f64,
            Value::I32(n) => *n as f64,
            Value::I64(n) => *n as f64,
            Value::U8(n) => *n as f64,
            Value::U16(n) => *n as f64,
            Value::U32(n) => *n as f64,
            Value::U64(n) => *n as f64,
            Value::F32(f) => *f as f64,
            Value::F64(f) => *f,
            _ => unreachable!(),
        }
    };
    if target.is_float() {
        let f = as_float(value);
        return Ok(match target {
            NumericType::F32 => Value::F32(f as f32),
            _ => Value::F64(f),
        });
    }
    // Integer target: take the wide integer form, rejecting fractional floats.
    let wide: i128 = match value {
        Value::F32(f) => {
            if f.fract() != 0.0 {
                return Err(format!("cannot convert non-integral value {} to an integer", f));
            }
            *f as i128
        }
        Value::F64(f) => {
            if f.fract() != 0.0 {
                return Err(format!("cannot convert non-integral value {} to an integer", f));
            }
            *f as i128
        }
        Value::I8(n) => *n as i128,
        Value::I16(n) => *n as i128,
        Value::I32(n) => *n as i128,
        Value::I64(n) => *n as i128,
        Value::U8(n) => *n as i128,
        Value::U16(n) => *n as i128,
        Value::U32(n) => *n as i128,
        Value::U64(n) => *n as i128,
        _ => unreachable!(),
    };
    let fits = |min: i128, max: i128| -> Result<(), String> {
        if wide < min || wide > max {
            Err(format!("value {} does not fit the annotated type", wide))
        } else {
            Ok(())
        }
    };
    Ok(match target {
        NumericType::I8 => {
            fits(i8::MIN as i128, i8::MAX as i128)?;
            Value::I8(wide as i8)
        }
        NumericType::I16 => {
            fits(i16::MIN as i128, i16::MAX as i128)?;
            Value::I16(wide as i16)
        }
        NumericType::I32 => {
            fits(i32::MIN as i128, i32::MAX as i128)?;
            Value::I32(wide as i32)
        }
        NumericType::I64 => {
            fits(i64::MIN as i128, i64::MAX as i128)?;
            Value::I64(wide as i64)
        }
        NumericType::U8 => {
            fits(0, u8::MAX as i128)?;
            Value::U8(wide as u8)
        }
        NumericType::U16 => {
            fits(0, u16::MAX as i128)?;
            Value::U16(wide as u16)
        }
        NumericType::U32 => {
            fits(0, u32::MAX as i128)?;
            Value::U32(wide as u32)
        }
        NumericType::U64 => {
            fits(0, u64::MAX as i128)?;
            Value::U64(wide as u64)
        }
        NumericType::F32 | NumericType::F64 => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_preserving_narrowing() {
        assert_eq!(
            convert_numeric_value(&Value::I32(200), NumericType::U8).unwrap(),
            Value::U8(200)
        );
        assert!(convert_numeric_value(&Value::I32(300), NumericType::U8).is_err());
        assert!(convert_numeric_value(&Value::I32(-1), NumericType::U32).is_err());
    }

    #[test]
    fn test_float_to_int_requires_integral() {
        assert_eq!(
            convert_numeric_value(&Value::F64(3.0), NumericType::I32).unwrap(),
            Value::I32(3)
        );
        assert!(convert_numeric_value(&Value::F64(3.5), NumericType::I32).is_err());
    }

    #[test]
    fn test_widening_to_float() {
        assert_eq!(
            convert_numeric_value(&Value::I32(3), NumericType::F64).unwrap(),
            Value::F64(3.0)
        );
    }
}

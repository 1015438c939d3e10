//! Valores en tiempo de ejecución y aritmética de promoción.
//!
//! El dominio de ejecución normaliza los enteros a 64 bits con
//! signo y los flotantes a doble precisión; el ancho declarado de
//! cada variable se aplica al momento de almacenar (véase
//! [`truncate_to`]). La aritmética sigue las reglas de C: los
//! enteros promueven a al menos 32 bits, y una operación mixta
//! entero/flotante promueve a flotante.

use crate::ast::Value;
use crate::command::Field;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Puntero a la ranura de un marco vivo.
///
/// Un puntero identifica al marco por su id único, a la variable
/// por nombre y, si apunta dentro de un arreglo, al índice del
/// elemento. Desreferenciar un puntero cuyo marco ya expiró es un
/// error recuperable.
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub frame: u64,
    pub name: String,
    pub index: Option<usize>,
}

/// Un valor vivo dentro del intérprete.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Void,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(ArrayValue),
    Struct(StructValue),
    Pointer(Pointer),
    Object(ObjectHandle),
    Function(String),
}

/// Arreglo con tipo de elemento declarado.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element: String,
    pub values: Vec<RuntimeValue>,
}

/// Instancia de un `struct` de usuario.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: HashMap<String, RuntimeValue>,
}

/// Referencia opaca a un objeto de biblioteca.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHandle {
    pub id: u32,
    pub type_name: String,
}

impl RuntimeValue {
    /// Veracidad al estilo C.
    pub fn truthy(&self) -> bool {
        match self {
            RuntimeValue::Void => false,
            RuntimeValue::Int(v) => *v != 0,
            RuntimeValue::Float(v) => *v != 0.0,
            RuntimeValue::Bool(b) => *b,
            RuntimeValue::Str(s) => !s.is_empty(),
            RuntimeValue::Pointer(_) => true,
            RuntimeValue::Array(_) | RuntimeValue::Struct(_) => true,
            RuntimeValue::Object(_) | RuntimeValue::Function(_) => true,
        }
    }

    /// Reducción a entero, si el valor es numérico.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RuntimeValue::Int(v) => Some(*v),
            RuntimeValue::Float(v) => Some(*v as i64),
            RuntimeValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Reducción a flotante, si el valor es numérico.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RuntimeValue::Int(v) => Some(*v as f64),
            RuntimeValue::Float(v) => Some(*v),
            RuntimeValue::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// Texto con el formato de impresión de Arduino: los flotantes
    /// llevan dos decimales por omisión.
    pub fn display(&self) -> String {
        match self {
            RuntimeValue::Void => String::new(),
            RuntimeValue::Int(v) => v.to_string(),
            RuntimeValue::Float(v) => format!("{:.2}", v),
            RuntimeValue::Bool(b) => (*b as i64).to_string(),
            RuntimeValue::Str(s) => s.clone(),
            RuntimeValue::Array(array) => {
                let mut out = String::from("[");
                for (i, value) in array.values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }

                    let _ = write!(out, "{}", value.display());
                }

                out.push(']');
                out
            }

            RuntimeValue::Struct(s) => format!("<{}>", s.type_name),
            RuntimeValue::Pointer(_) => String::from("<pointer>"),
            RuntimeValue::Object(handle) => format!("<{}#{}>", handle.type_name, handle.id),
            RuntimeValue::Function(name) => format!("<{}>", name),
        }
    }

    /// Proyección a campo primitivo de comando.
    pub fn to_field(&self) -> Field {
        match self {
            RuntimeValue::Bool(b) => Field::Bool(*b),
            RuntimeValue::Int(v) => Field::Int(*v),
            RuntimeValue::Float(v) => Field::Float(*v),
            other => Field::Str(other.display()),
        }
    }
}

impl From<Value> for RuntimeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Void => RuntimeValue::Void,
            Value::Bool(b) => RuntimeValue::Bool(b),
            Value::Int8(v) => RuntimeValue::Int(v as i64),
            Value::UInt8(v) => RuntimeValue::Int(v as i64),
            Value::Int16(v) => RuntimeValue::Int(v as i64),
            Value::UInt16(v) => RuntimeValue::Int(v as i64),
            Value::Int32(v) => RuntimeValue::Int(v as i64),
            Value::UInt32(v) => RuntimeValue::Int(v as i64),
            Value::Int64(v) => RuntimeValue::Int(v),
            Value::UInt64(v) => RuntimeValue::Int(v as i64),
            Value::Float(v) => RuntimeValue::Float(v as f64),
            Value::Double(v) => RuntimeValue::Float(v),
            Value::Str(s) => RuntimeValue::Str(s),
            Value::Null => RuntimeValue::Int(0),
        }
    }
}

/// Falla aritmética que el ejecutor traduce a un comando `ERROR`.
#[derive(Debug, Clone, PartialEq)]
pub enum ArithmeticError {
    /// División o módulo entero entre cero.
    DivisionByZero,

    /// Operandos sin interpretación numérica para el operador.
    TypeMismatch,
}

use crate::ast::BinOp;

/// Aplica un operador binario con las promociones de C.
///
/// Los operadores lógicos no pasan por aquí: el cortocircuito se
/// resuelve en el ejecutor antes de evaluar el operando derecho.
pub fn binary(op: BinOp, lhs: &RuntimeValue, rhs: &RuntimeValue) -> Result<RuntimeValue, ArithmeticError> {
    use BinOp::*;

    // Concatenación de String con `+`
    if let (Add, RuntimeValue::Str(_), _) | (Add, _, RuntimeValue::Str(_)) = (op, lhs, rhs) {
        return Ok(RuntimeValue::Str(format!(
            "{}{}",
            lhs.display(),
            rhs.display()
        )));
    }

    // Igualdad entre strings
    if let (RuntimeValue::Str(a), RuntimeValue::Str(b)) = (lhs, rhs) {
        return match op {
            Equal => Ok(RuntimeValue::Bool(a == b)),
            NotEqual => Ok(RuntimeValue::Bool(a != b)),
            Less => Ok(RuntimeValue::Bool(a < b)),
            LessEq => Ok(RuntimeValue::Bool(a <= b)),
            Greater => Ok(RuntimeValue::Bool(a > b)),
            GreaterEq => Ok(RuntimeValue::Bool(a >= b)),
            _ => Err(ArithmeticError::TypeMismatch),
        };
    }

    let float_domain = matches!(lhs, RuntimeValue::Float(_)) || matches!(rhs, RuntimeValue::Float(_));

    if float_domain {
        let a = lhs.as_float().ok_or(ArithmeticError::TypeMismatch)?;
        let b = rhs.as_float().ok_or(ArithmeticError::TypeMismatch)?;

        return match op {
            Add => Ok(RuntimeValue::Float(a + b)),
            Sub => Ok(RuntimeValue::Float(a - b)),
            Mul => Ok(RuntimeValue::Float(a * b)),

            // La división flotante entre cero produce inf/NaN
            Div => Ok(RuntimeValue::Float(a / b)),
            Mod => Ok(RuntimeValue::Float(a % b)),

            Less => Ok(RuntimeValue::Bool(a < b)),
            LessEq => Ok(RuntimeValue::Bool(a <= b)),
            Greater => Ok(RuntimeValue::Bool(a > b)),
            GreaterEq => Ok(RuntimeValue::Bool(a >= b)),
            Equal => Ok(RuntimeValue::Bool(a == b)),
            NotEqual => Ok(RuntimeValue::Bool(a != b)),

            _ => Err(ArithmeticError::TypeMismatch),
        };
    }

    let a = lhs.as_int().ok_or(ArithmeticError::TypeMismatch)?;
    let b = rhs.as_int().ok_or(ArithmeticError::TypeMismatch)?;

    let value = match op {
        Add => RuntimeValue::Int(a.wrapping_add(b)),
        Sub => RuntimeValue::Int(a.wrapping_sub(b)),
        Mul => RuntimeValue::Int(a.wrapping_mul(b)),

        Div if b == 0 => return Err(ArithmeticError::DivisionByZero),
        Mod if b == 0 => return Err(ArithmeticError::DivisionByZero),
        Div => RuntimeValue::Int(a.wrapping_div(b)),
        Mod => RuntimeValue::Int(a.wrapping_rem(b)),

        Shl => RuntimeValue::Int(a.wrapping_shl(b as u32)),
        Shr => RuntimeValue::Int(a.wrapping_shr(b as u32)),

        BitAnd => RuntimeValue::Int(a & b),
        BitXor => RuntimeValue::Int(a ^ b),
        BitOr => RuntimeValue::Int(a | b),

        Less => RuntimeValue::Bool(a < b),
        LessEq => RuntimeValue::Bool(a <= b),
        Greater => RuntimeValue::Bool(a > b),
        GreaterEq => RuntimeValue::Bool(a >= b),
        Equal => RuntimeValue::Bool(a == b),
        NotEqual => RuntimeValue::Bool(a != b),

        LogicalAnd | LogicalOr | Comma => return Err(ArithmeticError::TypeMismatch),
    };

    Ok(value)
}

/// Ancho y clase de un tipo declarado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeClass {
    Bool,
    Signed(u32),
    Unsigned(u32),
    Float32,
    Float64,
    Text,
    Other,
}

/// Clasifica un nombre de tipo ya resuelto contra sus alias.
///
/// `int` es de 32 bits en todos los perfiles; la interpretación no
/// reproduce anchos dependientes de la tarjeta.
pub fn classify(type_name: &str) -> TypeClass {
    match type_name {
        "bool" | "boolean" => TypeClass::Bool,
        "char" | "int8_t" | "signed char" => TypeClass::Signed(8),
        "byte" | "uint8_t" | "unsigned char" => TypeClass::Unsigned(8),
        "short" | "int16_t" | "short int" => TypeClass::Signed(16),
        "word" | "uint16_t" | "unsigned short" => TypeClass::Unsigned(16),
        "int" | "long" | "int32_t" | "long int" => TypeClass::Signed(32),
        "unsigned int" | "unsigned long" | "uint32_t" | "size_t" => TypeClass::Unsigned(32),
        "long long" | "int64_t" => TypeClass::Signed(64),
        "unsigned long long" | "uint64_t" => TypeClass::Unsigned(64),
        "float" => TypeClass::Float32,
        "double" => TypeClass::Float64,
        "String" => TypeClass::Text,
        _ => TypeClass::Other,
    }
}

/// Tamaño en bytes que reporta `sizeof` para un tipo.
pub fn width(type_name: &str) -> u32 {
    match classify(type_name) {
        TypeClass::Bool => 1,
        TypeClass::Signed(bits) | TypeClass::Unsigned(bits) => bits / 8,
        TypeClass::Float32 => 4,
        TypeClass::Float64 => 8,
        TypeClass::Text => 4,
        TypeClass::Other => 4,
    }
}

/// Ajusta un valor al ancho declarado de la variable que lo recibe.
pub fn truncate_to(type_name: &str, value: RuntimeValue) -> RuntimeValue {
    match classify(type_name) {
        TypeClass::Bool => RuntimeValue::Bool(value.truthy()),

        TypeClass::Signed(bits) => match value.as_int() {
            Some(v) => RuntimeValue::Int(truncate_signed(v, bits)),
            None => value,
        },

        TypeClass::Unsigned(bits) => match value.as_int() {
            Some(v) => RuntimeValue::Int(truncate_unsigned(v, bits)),
            None => value,
        },

        TypeClass::Float32 => match value.as_float() {
            Some(v) => RuntimeValue::Float(v as f32 as f64),
            None => value,
        },

        TypeClass::Float64 => match value.as_float() {
            Some(v) => RuntimeValue::Float(v),
            None => value,
        },

        TypeClass::Text => match value {
            RuntimeValue::Str(_) => value,
            other => RuntimeValue::Str(other.display()),
        },

        TypeClass::Other => value,
    }
}

fn truncate_signed(value: i64, bits: u32) -> i64 {
    match bits {
        8 => value as i8 as i64,
        16 => value as i16 as i64,
        32 => value as i32 as i64,
        _ => value,
    }
}

fn truncate_unsigned(value: i64, bits: u32) -> i64 {
    match bits {
        8 => value as u8 as i64,
        16 => value as u16 as i64,
        32 => value as u32 as i64,
        _ => value,
    }
}

/// Valor por omisión de una variable sin inicializador.
pub fn default_value(type_name: &str) -> RuntimeValue {
    match classify(type_name) {
        TypeClass::Bool => RuntimeValue::Bool(false),
        TypeClass::Float32 | TypeClass::Float64 => RuntimeValue::Float(0.0),
        TypeClass::Text => RuntimeValue::Str(String::new()),
        _ => RuntimeValue::Int(0),
    }
}

//! Formato binario de intercambio del AST.
//!
//! El árbol se serializa a un formato compacto y versionado que
//! permite trasladar el trabajo del toolchain anfitrión hacia el
//! intérprete embebido. El flujo es little-endian de extremo a
//! extremo; los anfitriones big-endian intercambian bytes en la
//! frontera.
//!
//! # Distribución
//! - Encabezado de 16 bytes: magia `ASTP`, versión `u16`, banderas
//!   `u16`, cantidad de nodos `u32` y tamaño en bytes de la tabla
//!   de strings `u32`.
//! - Tabla de strings: un conteo `u32` seguido de entradas
//!   `{u16 longitud, bytes, NUL}`, con relleno de ceros hasta la
//!   siguiente frontera de 4 bytes. Toda string referenciada se
//!   interna aquí; strings idénticas comparten entrada.
//! - Flujo de nodos: registros `{u8 clase, u8 banderas,
//!   u16 tamaño, payload}` en preorden padre-antes-que-hijo. Los
//!   hijos se referencian por índice dentro del flujo.
//!
//! # Ranuras opcionales
//! Las ranuras con nombre ausentes (`else` de un `if`, cláusulas
//! de un `for`) se codifican como un hijo de clase `Empty` y el
//! decodificador las restaura como ausencia.
//!
//! # Integridad
//! Todo índice de hijo debe ser mayor que el índice de su padre y
//! menor que la cantidad total de nodos; una violación es un error
//! duro. Las clases desconocidas dentro de una versión conocida se
//! degradan a nodos de error que preservan la etiqueta cruda.

use crate::{
    ast::{BinOp, Node, NodeKind, UnOp, Value},
    source::Position,
};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Magia del formato.
pub const MAGIC: [u8; 4] = *b"ASTP";

/// Versión vigente, mayor en el byte alto.
pub const VERSION: u16 = 0x0100;

bitflags! {
    /// Banderas por nodo en el formato binario.
    pub struct NodeFlags: u8 {
        const HAS_CHILDREN = 0x01;
        const HAS_VALUE    = 0x02;
        const HAS_METADATA = 0x04;
        const IS_POINTER   = 0x08;
        const IS_REFERENCE = 0x10;
        const IS_CONST     = 0x20;
    }
}

/// Etiquetas del dominio de valores escalares.
mod value_tag {
    pub const VOID: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT8: u8 = 0x02;
    pub const UINT8: u8 = 0x03;
    pub const INT16: u8 = 0x04;
    pub const UINT16: u8 = 0x05;
    pub const INT32: u8 = 0x06;
    pub const UINT32: u8 = 0x07;
    pub const INT64: u8 = 0x08;
    pub const UINT64: u8 = 0x09;
    pub const FLOAT: u8 = 0x0A;
    pub const DOUBLE: u8 = 0x0B;
    pub const STRING: u8 = 0x0C;
    pub const NULL: u8 = 0x0D;
    pub const OPERATOR: u8 = 0x0E;
}

/// Error de codificación o decodificación.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Bad magic number")]
    BadMagic,

    #[error("Unsupported format version {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("Truncated or corrupt stream")]
    Truncated(#[from] io::Error),

    #[error("Child index {child} of node {parent} breaks preorder")]
    ChildIndex { parent: u32, child: u32 },

    #[error("String index {0} out of range")]
    BadStringIndex(u32),

    #[error("Unknown operator code {0:#04x}")]
    BadOperator(u8),

    #[error("Unknown value tag {0:#04x}")]
    BadValueTag(u8),

    #[error("Malformed record for node {0}")]
    MalformedNode(u32),
}

/// Valor transportado en el payload de un registro.
#[derive(Debug, Clone, PartialEq)]
enum WireValue {
    Scalar(Value),
    Str(u32),
    Operator(u8),
}

/// Registro plano de un nodo.
#[derive(Debug, Default)]
struct Record {
    kind: u8,
    flags: u8,
    value: Option<WireValue>,
    metadata: Option<u8>,
    children: Vec<u32>,
}

// ===== codificación =====

/// Serializa un árbol completo.
pub fn encode(root: &Node) -> Vec<u8> {
    let mut writer = Writer {
        strings: Vec::new(),
        interned: HashMap::new(),
        records: Vec::new(),
    };

    writer.flatten(root);
    writer.serialize()
}

struct Writer {
    strings: Vec<String>,
    interned: HashMap<String, u32>,
    records: Vec<Record>,
}

/// Referencia de hijo durante el aplanado.
enum Slot<'a> {
    Filled(&'a Node),
    Absent,
}

impl<'a> From<&'a Node> for Slot<'a> {
    fn from(node: &'a Node) -> Self {
        Slot::Filled(node)
    }
}

impl<'a> From<&'a Option<Box<Node>>> for Slot<'a> {
    fn from(slot: &'a Option<Box<Node>>) -> Self {
        match slot {
            Some(node) => Slot::Filled(node),
            None => Slot::Absent,
        }
    }
}

impl Writer {
    fn intern(&mut self, string: &str) -> u32 {
        if let Some(&index) = self.interned.get(string) {
            return index;
        }

        let index = self.strings.len() as u32;
        self.strings.push(string.to_string());
        self.interned.insert(string.to_string(), index);
        index
    }

    /// Aplana un nodo y sus descendientes en preorden.
    fn flatten(&mut self, node: &Node) -> u32 {
        let index = self.records.len() as u32;
        self.records.push(Record {
            kind: node.kind.tag(),
            ..Record::default()
        });

        let mut flags = NodeFlags::empty();
        let mut slots: Vec<Slot<'_>> = Vec::new();

        match &node.kind {
            NodeKind::Program(items)
            | NodeKind::Compound(items)
            | NodeKind::DeclList(items)
            | NodeKind::ArrayInit(items) => {
                slots.extend(items.iter().map(Slot::from));
            }

            NodeKind::Error { message, raw_kind } => {
                let message = self.intern(message);
                self.records[index as usize].value = Some(WireValue::Str(message));
                if let Some(raw) = raw_kind {
                    self.records[index as usize].metadata = Some(*raw);
                }
            }

            NodeKind::ExprStmt(inner) | NodeKind::Sizeof(inner) => {
                slots.push(Slot::from(inner.as_ref()));
            }

            NodeKind::If {
                condition,
                consequent,
                alternate,
            } => {
                slots.push(Slot::from(condition.as_ref()));
                slots.push(Slot::from(consequent.as_ref()));
                slots.push(Slot::from(alternate));
            }

            NodeKind::While { condition, body } => {
                slots.push(Slot::from(condition.as_ref()));
                slots.push(Slot::from(body.as_ref()));
            }

            NodeKind::DoWhile { body, condition } => {
                slots.push(Slot::from(body.as_ref()));
                slots.push(Slot::from(condition.as_ref()));
            }

            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                slots.push(Slot::from(init));
                slots.push(Slot::from(condition));
                slots.push(Slot::from(update));
                slots.push(Slot::from(body.as_ref()));
            }

            NodeKind::RangeFor {
                decl,
                iterable,
                body,
            } => {
                slots.push(Slot::from(decl.as_ref()));
                slots.push(Slot::from(iterable.as_ref()));
                slots.push(Slot::from(body.as_ref()));
            }

            NodeKind::Switch { scrutinee, cases } => {
                slots.push(Slot::from(scrutinee.as_ref()));
                slots.extend(cases.iter().map(Slot::from));
            }

            NodeKind::Case { label, body } => {
                slots.push(Slot::from(label));
                slots.extend(body.iter().map(Slot::from));
            }

            NodeKind::Return(value) => {
                slots.push(Slot::from(value));
            }

            NodeKind::Break | NodeKind::Continue | NodeKind::Empty => (),

            NodeKind::VarDecl {
                typ,
                name,
                dimensions,
                init,
            } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));

                slots.push(Slot::from(typ.as_ref()));
                slots.push(Slot::from(init));
                slots.extend(dimensions.iter().map(Slot::from));
            }

            NodeKind::FuncDef {
                return_type,
                name,
                params,
                body,
            } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));

                slots.push(Slot::from(return_type.as_ref()));
                slots.push(Slot::from(body.as_ref()));
                slots.extend(params.iter().map(Slot::from));
            }

            NodeKind::FuncDecl {
                return_type,
                name,
                params,
            } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));

                slots.push(Slot::from(return_type.as_ref()));
                slots.extend(params.iter().map(Slot::from));
            }

            NodeKind::Param { typ, name } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));
                slots.push(Slot::from(typ.as_ref()));
            }

            NodeKind::StructDecl { name, fields } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));
                slots.extend(fields.iter().map(Slot::from));
            }

            NodeKind::EnumDecl { name, members } => {
                let value = match name {
                    Some(name) => WireValue::Str(self.intern(name)),
                    None => WireValue::Scalar(Value::Null),
                };

                self.records[index as usize].value = Some(value);
                slots.extend(members.iter().map(Slot::from));
            }

            NodeKind::EnumMember { name, value } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));
                slots.push(Slot::from(value));
            }

            NodeKind::Typedef { typ, name } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));
                slots.push(Slot::from(typ.as_ref()));
            }

            NodeKind::TemplateDecl { param, decl } => {
                let param = self.intern(param);
                self.records[index as usize].value = Some(WireValue::Str(param));
                slots.push(Slot::from(decl.as_ref()));
            }

            NodeKind::BinaryOp { op, lhs, rhs } => {
                self.records[index as usize].value = Some(WireValue::Operator(op.code()));
                slots.push(Slot::from(lhs.as_ref()));
                slots.push(Slot::from(rhs.as_ref()));
            }

            NodeKind::UnaryOp {
                op,
                operand,
                prefix,
            } => {
                self.records[index as usize].value = Some(WireValue::Operator(op.code()));
                self.records[index as usize].metadata = Some(*prefix as u8);
                slots.push(Slot::from(operand.as_ref()));
            }

            NodeKind::Assignment { op, target, value } => {
                let code = op.map(BinOp::code).unwrap_or(0);
                self.records[index as usize].value = Some(WireValue::Operator(code));
                slots.push(Slot::from(target.as_ref()));
                slots.push(Slot::from(value.as_ref()));
            }

            NodeKind::Ternary {
                condition,
                consequent,
                alternate,
            } => {
                slots.push(Slot::from(condition.as_ref()));
                slots.push(Slot::from(consequent.as_ref()));
                slots.push(Slot::from(alternate.as_ref()));
            }

            NodeKind::FuncCall { callee, args } => {
                slots.push(Slot::from(callee.as_ref()));
                slots.extend(args.iter().map(Slot::from));
            }

            NodeKind::MemberAccess {
                object,
                member,
                arrow,
            } => {
                let member = self.intern(member);
                self.records[index as usize].value = Some(WireValue::Str(member));
                if *arrow {
                    flags |= NodeFlags::IS_POINTER;
                }

                slots.push(Slot::from(object.as_ref()));
            }

            NodeKind::ArrayAccess { array, index: idx } => {
                slots.push(Slot::from(array.as_ref()));
                slots.push(Slot::from(idx.as_ref()));
            }

            NodeKind::Cast { typ, operand } => {
                slots.push(Slot::from(typ.as_ref()));
                slots.push(Slot::from(operand.as_ref()));
            }

            NodeKind::NumberLit(value) => {
                self.records[index as usize].value = Some(WireValue::Scalar(value.clone()));
            }

            NodeKind::StringLit(string) => {
                let string = self.intern(string);
                self.records[index as usize].value = Some(WireValue::Str(string));
            }

            NodeKind::CharLit(c) => {
                self.records[index as usize].value = Some(WireValue::Scalar(Value::UInt8(*c)));
            }

            NodeKind::Identifier(id) => {
                let id = self.intern(id);
                self.records[index as usize].value = Some(WireValue::Str(id));
            }

            NodeKind::TypeNode {
                name,
                is_const,
                pointer,
                is_reference,
                template_args,
            } => {
                let name = self.intern(name);
                self.records[index as usize].value = Some(WireValue::Str(name));

                if *is_const {
                    flags |= NodeFlags::IS_CONST;
                }

                if *is_reference {
                    flags |= NodeFlags::IS_REFERENCE;
                }

                if *pointer > 0 {
                    flags |= NodeFlags::IS_POINTER;
                    if *pointer > 1 {
                        self.records[index as usize].metadata = Some(*pointer);
                    }
                }

                slots.extend(template_args.iter().map(Slot::from));
            }
        }

        // Los hijos se aplanan después del padre; el preorden
        // garantiza índice de hijo mayor que el del padre
        let mut children = Vec::with_capacity(slots.len());
        for slot in slots {
            let child = match slot {
                Slot::Filled(node) => self.flatten(node),
                Slot::Absent => self.flatten_absent(),
            };

            children.push(child);
        }

        let record = &mut self.records[index as usize];
        record.children = children;

        if !record.children.is_empty() {
            flags |= NodeFlags::HAS_CHILDREN;
        }

        if record.value.is_some() {
            flags |= NodeFlags::HAS_VALUE;
        }

        if record.metadata.is_some() {
            flags |= NodeFlags::HAS_METADATA;
        }

        record.flags = flags.bits();
        index
    }

    /// Registra el nodo `Empty` que codifica una ranura ausente.
    fn flatten_absent(&mut self) -> u32 {
        let index = self.records.len() as u32;
        self.records.push(Record {
            kind: 0x1C,
            ..Record::default()
        });

        index
    }

    fn serialize(self) -> Vec<u8> {
        let mut table = Vec::new();
        write_string_table(&mut table, &self.strings).expect("memory write");

        let mut out = Vec::new();
        out.write_all(&MAGIC).expect("memory write");
        out.write_u16::<LittleEndian>(VERSION).expect("memory write");
        out.write_u16::<LittleEndian>(0).expect("memory write");
        out.write_u32::<LittleEndian>(self.records.len() as u32)
            .expect("memory write");
        out.write_u32::<LittleEndian>(table.len() as u32)
            .expect("memory write");

        out.extend_from_slice(&table);

        for record in &self.records {
            write_record(&mut out, record).expect("memory write");
        }

        out
    }
}

fn write_string_table(out: &mut Vec<u8>, strings: &[String]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(strings.len() as u32)?;

    for string in strings {
        let bytes = string.as_bytes();
        assert!(bytes.len() <= u16::MAX as usize, "oversized string literal");

        out.write_u16::<LittleEndian>(bytes.len() as u16)?;
        out.write_all(bytes)?;
        out.write_u8(0)?;
    }

    // Relleno hasta la frontera de 4 bytes, contando el encabezado
    // fijo de 16 bytes que precede a la tabla
    while (out.len() + 16) % 4 != 0 {
        out.write_u8(0)?;
    }

    Ok(())
}

fn write_record(out: &mut Vec<u8>, record: &Record) -> io::Result<()> {
    let mut payload = Vec::new();

    if let Some(value) = &record.value {
        write_value(&mut payload, value)?;
    }

    if !record.children.is_empty() {
        payload.write_u16::<LittleEndian>(record.children.len() as u16)?;
        for &child in &record.children {
            payload.write_u32::<LittleEndian>(child)?;
        }
    }

    if let Some(metadata) = record.metadata {
        payload.write_u8(metadata)?;
    }

    assert!(payload.len() <= u16::MAX as usize, "oversized node payload");

    out.write_u8(record.kind)?;
    out.write_u8(record.flags)?;
    out.write_u16::<LittleEndian>(payload.len() as u16)?;
    out.write_all(&payload)?;

    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &WireValue) -> io::Result<()> {
    use value_tag::*;

    match value {
        WireValue::Str(index) => {
            out.write_u8(STRING)?;
            out.write_u32::<LittleEndian>(*index)?;
        }

        WireValue::Operator(code) => {
            out.write_u8(OPERATOR)?;
            out.write_u8(*code)?;
        }

        WireValue::Scalar(value) => match value {
            Value::Void => out.write_u8(VOID)?,
            Value::Null => out.write_u8(NULL)?,

            Value::Bool(v) => {
                out.write_u8(BOOL)?;
                out.write_u8(*v as u8)?;
            }

            Value::Int8(v) => {
                out.write_u8(INT8)?;
                out.write_i8(*v)?;
            }

            Value::UInt8(v) => {
                out.write_u8(UINT8)?;
                out.write_u8(*v)?;
            }

            Value::Int16(v) => {
                out.write_u8(INT16)?;
                out.write_i16::<LittleEndian>(*v)?;
            }

            Value::UInt16(v) => {
                out.write_u8(UINT16)?;
                out.write_u16::<LittleEndian>(*v)?;
            }

            Value::Int32(v) => {
                out.write_u8(INT32)?;
                out.write_i32::<LittleEndian>(*v)?;
            }

            Value::UInt32(v) => {
                out.write_u8(UINT32)?;
                out.write_u32::<LittleEndian>(*v)?;
            }

            Value::Int64(v) => {
                out.write_u8(INT64)?;
                out.write_i64::<LittleEndian>(*v)?;
            }

            Value::UInt64(v) => {
                out.write_u8(UINT64)?;
                out.write_u64::<LittleEndian>(*v)?;
            }

            Value::Float(v) => {
                out.write_u8(FLOAT)?;
                out.write_f32::<LittleEndian>(*v)?;
            }

            Value::Double(v) => {
                out.write_u8(DOUBLE)?;
                out.write_f64::<LittleEndian>(*v)?;
            }

            Value::Str(_) => unreachable!("string scalars are interned"),
        },
    }

    Ok(())
}

// ===== decodificación =====

/// Deserializa un árbol completo. Toda violación del formato es un
/// error duro.
pub fn decode(bytes: &[u8]) -> Result<Node, CodecError> {
    let reader = Reader::parse(bytes)?;
    reader.build(0)
}

/// Variante recuperable: ante un error de formato retorna una raíz
/// de error en vez de fallar.
pub fn decode_or_error(bytes: &[u8]) -> Node {
    match decode(bytes) {
        Ok(node) => node,
        Err(error) => {
            log::warn!("compact AST rejected: {}", error);
            Node::error(error.to_string(), Position::default())
        }
    }
}

struct Reader {
    strings: Vec<String>,
    records: Vec<Record>,
}

impl Reader {
    fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CodecError::BadMagic);
        }

        let version = cursor.read_u16::<LittleEndian>()?;
        if version >> 8 != VERSION >> 8 {
            return Err(CodecError::UnsupportedVersion(version));
        }

        if version & 0xFF != VERSION & 0xFF {
            log::warn!(
                "compact AST minor version {} differs from {}",
                version & 0xFF,
                VERSION & 0xFF
            );
        }

        let _flags = cursor.read_u16::<LittleEndian>()?;
        let node_count = cursor.read_u32::<LittleEndian>()?;
        let table_size = cursor.read_u32::<LittleEndian>()? as u64;

        let strings = Self::parse_strings(&mut cursor)?;

        // La tabla declara su propio tamaño total, relleno incluido
        cursor.set_position(16 + table_size);

        let mut records = Vec::with_capacity(node_count.min(0xFFFF) as usize);
        for index in 0..node_count {
            records.push(Self::parse_record(&mut cursor, index, node_count)?);
        }

        Ok(Reader { strings, records })
    }

    fn parse_strings(cursor: &mut Cursor<&[u8]>) -> Result<Vec<String>, CodecError> {
        let count = cursor.read_u32::<LittleEndian>()?;

        let mut strings = Vec::with_capacity(count.min(0xFFFF) as usize);
        for _ in 0..count {
            let length = cursor.read_u16::<LittleEndian>()? as usize;

            let mut bytes = vec![0u8; length];
            cursor.read_exact(&mut bytes)?;

            // Terminador NUL obligatorio
            if cursor.read_u8()? != 0 {
                return Err(CodecError::Truncated(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "missing string terminator",
                )));
            }

            strings.push(String::from_utf8_lossy(&bytes).into_owned());
        }

        Ok(strings)
    }

    fn parse_record(
        cursor: &mut Cursor<&[u8]>,
        index: u32,
        node_count: u32,
    ) -> Result<Record, CodecError> {
        let kind = cursor.read_u8()?;
        let raw_flags = cursor.read_u8()?;
        let data_size = cursor.read_u16::<LittleEndian>()? as usize;

        let mut payload = vec![0u8; data_size];
        cursor.read_exact(&mut payload)?;

        let flags = NodeFlags::from_bits_truncate(raw_flags);
        let mut payload = Cursor::new(payload.as_slice());

        let value = if flags.contains(NodeFlags::HAS_VALUE) {
            Some(read_value(&mut payload)?)
        } else {
            None
        };

        let mut children = Vec::new();
        if flags.contains(NodeFlags::HAS_CHILDREN) {
            let count = payload.read_u16::<LittleEndian>()?;
            for _ in 0..count {
                let child = payload.read_u32::<LittleEndian>()?;
                if child <= index || child >= node_count {
                    return Err(CodecError::ChildIndex {
                        parent: index,
                        child,
                    });
                }

                children.push(child);
            }
        }

        let metadata = if flags.contains(NodeFlags::HAS_METADATA) {
            Some(payload.read_u8()?)
        } else {
            None
        };

        Ok(Record {
            kind,
            flags: raw_flags,
            value,
            metadata,
            children,
        })
    }

    // ----- reconstrucción del árbol -----

    fn record(&self, index: u32) -> &Record {
        &self.records[index as usize]
    }

    fn string(&self, index: u32) -> Result<String, CodecError> {
        self.strings
            .get(index as usize)
            .cloned()
            .ok_or(CodecError::BadStringIndex(index))
    }

    /// Hijo obligatorio en una ranura fija.
    fn child(&self, index: u32, slot: usize) -> Result<Node, CodecError> {
        let record = self.record(index);
        let child = *record
            .children
            .get(slot)
            .ok_or(CodecError::MalformedNode(index))?;

        self.build(child)
    }

    /// Hijo en ranura opcional; `Empty` codifica la ausencia.
    fn opt_child(&self, index: u32, slot: usize) -> Result<Option<Box<Node>>, CodecError> {
        let record = self.record(index);
        match record.children.get(slot) {
            None => Ok(None),
            Some(&child) => {
                let node = self.build(child)?;
                match node.kind {
                    NodeKind::Empty => Ok(None),
                    _ => Ok(Some(Box::new(node))),
                }
            }
        }
    }

    /// Hijos desde una ranura en adelante.
    fn rest(&self, index: u32, from: usize) -> Result<Vec<Node>, CodecError> {
        let record = self.record(index);
        record
            .children
            .iter()
            .skip(from)
            .map(|&child| self.build(child))
            .collect()
    }

    fn str_value(&self, index: u32) -> Result<String, CodecError> {
        match &self.record(index).value {
            Some(WireValue::Str(string)) => self.string(*string),
            _ => Err(CodecError::MalformedNode(index)),
        }
    }

    fn operator_value(&self, index: u32) -> Result<u8, CodecError> {
        match &self.record(index).value {
            Some(WireValue::Operator(code)) => Ok(*code),
            _ => Err(CodecError::MalformedNode(index)),
        }
    }

    fn build(&self, index: u32) -> Result<Node, CodecError> {
        let record = self.record(index);
        let pos = Position::default();
        let flags = NodeFlags::from_bits_truncate(record.flags);

        let kind = match record.kind {
            0x01 => NodeKind::Program(self.rest(index, 0)?),

            0x02 => NodeKind::Error {
                message: self.str_value(index)?,
                raw_kind: record.metadata,
            },

            0x10 => NodeKind::Compound(self.rest(index, 0)?),
            0x11 => NodeKind::ExprStmt(Box::new(self.child(index, 0)?)),

            0x12 => NodeKind::If {
                condition: Box::new(self.child(index, 0)?),
                consequent: Box::new(self.child(index, 1)?),
                alternate: self.opt_child(index, 2)?,
            },

            0x13 => NodeKind::While {
                condition: Box::new(self.child(index, 0)?),
                body: Box::new(self.child(index, 1)?),
            },

            0x14 => NodeKind::DoWhile {
                body: Box::new(self.child(index, 0)?),
                condition: Box::new(self.child(index, 1)?),
            },

            0x15 => NodeKind::For {
                init: self.opt_child(index, 0)?,
                condition: self.opt_child(index, 1)?,
                update: self.opt_child(index, 2)?,
                body: Box::new(self.child(index, 3)?),
            },

            0x16 => NodeKind::RangeFor {
                decl: Box::new(self.child(index, 0)?),
                iterable: Box::new(self.child(index, 1)?),
                body: Box::new(self.child(index, 2)?),
            },

            0x17 => NodeKind::Switch {
                scrutinee: Box::new(self.child(index, 0)?),
                cases: self.rest(index, 1)?,
            },

            0x18 => NodeKind::Case {
                label: self.opt_child(index, 0)?,
                body: self.rest(index, 1)?,
            },

            0x19 => NodeKind::Return(self.opt_child(index, 0)?),
            0x1A => NodeKind::Break,
            0x1B => NodeKind::Continue,
            0x1C => NodeKind::Empty,

            0x20 => NodeKind::VarDecl {
                typ: Box::new(self.child(index, 0)?),
                name: self.str_value(index)?,
                init: self.opt_child(index, 1)?,
                dimensions: self.rest(index, 2)?,
            },

            0x21 => NodeKind::FuncDef {
                return_type: Box::new(self.child(index, 0)?),
                name: self.str_value(index)?,
                body: Box::new(self.child(index, 1)?),
                params: self.rest(index, 2)?,
            },

            0x22 => NodeKind::FuncDecl {
                return_type: Box::new(self.child(index, 0)?),
                name: self.str_value(index)?,
                params: self.rest(index, 1)?,
            },

            0x23 => NodeKind::Param {
                typ: Box::new(self.child(index, 0)?),
                name: self.str_value(index)?,
            },

            0x24 => NodeKind::StructDecl {
                name: self.str_value(index)?,
                fields: self.rest(index, 0)?,
            },

            0x25 => {
                let name = match &record.value {
                    Some(WireValue::Scalar(Value::Null)) => None,
                    Some(WireValue::Str(string)) => Some(self.string(*string)?),
                    _ => return Err(CodecError::MalformedNode(index)),
                };

                NodeKind::EnumDecl {
                    name,
                    members: self.rest(index, 0)?,
                }
            }

            0x26 => NodeKind::Typedef {
                typ: Box::new(self.child(index, 0)?),
                name: self.str_value(index)?,
            },

            0x27 => NodeKind::TemplateDecl {
                param: self.str_value(index)?,
                decl: Box::new(self.child(index, 0)?),
            },

            0x28 => NodeKind::EnumMember {
                name: self.str_value(index)?,
                value: self.opt_child(index, 0)?,
            },

            0x30 => {
                let code = self.operator_value(index)?;
                NodeKind::BinaryOp {
                    op: BinOp::from_code(code).ok_or(CodecError::BadOperator(code))?,
                    lhs: Box::new(self.child(index, 0)?),
                    rhs: Box::new(self.child(index, 1)?),
                }
            }

            0x31 => {
                let code = self.operator_value(index)?;
                NodeKind::UnaryOp {
                    op: UnOp::from_code(code).ok_or(CodecError::BadOperator(code))?,
                    operand: Box::new(self.child(index, 0)?),
                    prefix: record.metadata.unwrap_or(1) != 0,
                }
            }

            0x32 => {
                let code = self.operator_value(index)?;
                let op = if code == 0 {
                    None
                } else {
                    Some(BinOp::from_code(code).ok_or(CodecError::BadOperator(code))?)
                };

                NodeKind::Assignment {
                    op,
                    target: Box::new(self.child(index, 0)?),
                    value: Box::new(self.child(index, 1)?),
                }
            }

            0x33 => NodeKind::FuncCall {
                callee: Box::new(self.child(index, 0)?),
                args: self.rest(index, 1)?,
            },

            0x34 => NodeKind::MemberAccess {
                object: Box::new(self.child(index, 0)?),
                member: self.str_value(index)?,
                arrow: flags.contains(NodeFlags::IS_POINTER),
            },

            0x35 => NodeKind::ArrayAccess {
                array: Box::new(self.child(index, 0)?),
                index: Box::new(self.child(index, 1)?),
            },

            0x36 => NodeKind::Ternary {
                condition: Box::new(self.child(index, 0)?),
                consequent: Box::new(self.child(index, 1)?),
                alternate: Box::new(self.child(index, 2)?),
            },

            0x37 => NodeKind::Cast {
                typ: Box::new(self.child(index, 0)?),
                operand: Box::new(self.child(index, 1)?),
            },

            0x38 => NodeKind::Sizeof(Box::new(self.child(index, 0)?)),
            0x39 => NodeKind::DeclList(self.rest(index, 0)?),
            0x3B => NodeKind::ArrayInit(self.rest(index, 0)?),

            0x40 => match &record.value {
                Some(WireValue::Scalar(value)) => NodeKind::NumberLit(value.clone()),
                _ => return Err(CodecError::MalformedNode(index)),
            },

            0x41 => NodeKind::StringLit(self.str_value(index)?),

            0x42 => match &record.value {
                Some(WireValue::Scalar(Value::UInt8(c))) => NodeKind::CharLit(*c),
                _ => return Err(CodecError::MalformedNode(index)),
            },

            0x43 => NodeKind::Identifier(self.str_value(index)?),

            0x50 => {
                let pointer = if flags.contains(NodeFlags::IS_POINTER) {
                    record.metadata.unwrap_or(1)
                } else {
                    0
                };

                NodeKind::TypeNode {
                    name: self.str_value(index)?,
                    is_const: flags.contains(NodeFlags::IS_CONST),
                    pointer,
                    is_reference: flags.contains(NodeFlags::IS_REFERENCE),
                    template_args: self.rest(index, 0)?,
                }
            }

            // Clase desconocida dentro de una versión conocida: se
            // degrada a nodo de error preservando la etiqueta
            unknown => {
                log::warn!("unknown node kind {:#04x} at index {}", unknown, index);
                NodeKind::Error {
                    message: format!("Unknown node kind {:#04x}", unknown),
                    raw_kind: Some(unknown),
                }
            }
        };

        Ok(Node::new(kind, pos))
    }
}

fn read_value(cursor: &mut Cursor<&[u8]>) -> Result<WireValue, CodecError> {
    use value_tag::*;

    let tag = cursor.read_u8()?;
    let value = match tag {
        VOID => WireValue::Scalar(Value::Void),
        NULL => WireValue::Scalar(Value::Null),
        BOOL => WireValue::Scalar(Value::Bool(cursor.read_u8()? != 0)),
        INT8 => WireValue::Scalar(Value::Int8(cursor.read_i8()?)),
        UINT8 => WireValue::Scalar(Value::UInt8(cursor.read_u8()?)),
        INT16 => WireValue::Scalar(Value::Int16(cursor.read_i16::<LittleEndian>()?)),
        UINT16 => WireValue::Scalar(Value::UInt16(cursor.read_u16::<LittleEndian>()?)),
        INT32 => WireValue::Scalar(Value::Int32(cursor.read_i32::<LittleEndian>()?)),
        UINT32 => WireValue::Scalar(Value::UInt32(cursor.read_u32::<LittleEndian>()?)),
        INT64 => WireValue::Scalar(Value::Int64(cursor.read_i64::<LittleEndian>()?)),
        UINT64 => WireValue::Scalar(Value::UInt64(cursor.read_u64::<LittleEndian>()?)),
        FLOAT => WireValue::Scalar(Value::Float(cursor.read_f32::<LittleEndian>()?)),
        DOUBLE => WireValue::Scalar(Value::Double(cursor.read_f64::<LittleEndian>()?)),
        STRING => WireValue::Str(cursor.read_u32::<LittleEndian>()?),
        OPERATOR => WireValue::Operator(cursor.read_u8()?),
        tag => return Err(CodecError::BadValueTag(tag)),
    };

    Ok(value)
}

//! Flujo de comandos del intérprete.
//!
//! El intérprete no toca hardware: describe cada efecto observable
//! como un comando estructurado de campos primitivos y lo entrega
//! en orden de emisión a un consumidor registrado. Dos
//! implementaciones independientes deben producir el mismo flujo
//! para el mismo árbol y la misma traza de respuestas; por eso el
//! orden de los campos en la serialización JSON es parte del
//! contrato: siempre `type`, `timestamp` y luego los campos del
//! comando en el orden de su esquema.
//!
//! La marca de tiempo es un reloj simulado en milisegundos que
//! avanza con los `delay` del sketch. Las comparaciones de
//! equivalencia la excluyen.

use serde::Serialize;

/// Un comando emitido, listo para serializar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub timestamp: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Command {
    /// Igualdad campo a campo excluyendo `timestamp`.
    pub fn equivalent(&self, other: &Command) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }
}

/// Tipos de comando.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    VersionInfo,
    ProgramStart,
    ProgramEnd,
    SetupStart,
    SetupEnd,
    LoopStart,
    LoopEnd,
    LoopLimitReached,
    FunctionCall,
    Error,
    Timeout,
    PinMode,
    DigitalWrite,
    AnalogWrite,
    Delay,
    DelayMicroseconds,
    SerialBegin,
    SerialPrint,
    SerialPrintln,
    SerialWrite,
    Tone,
    NoTone,
    AnalogReadRequest,
    DigitalReadRequest,
    MillisRequest,
    MicrosRequest,
    LibraryMethodRequest,
}

/// Un campo primitivo dentro de un comando.
///
/// Los comandos no anidan objetos: todo campo es un primitivo o,
/// en el caso de `args`, una lista plana de primitivos.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Campos de cada tipo de comando, en el orden de su esquema.
///
/// El orden de declaración de los campos dentro de cada variante
/// es el orden en que se serializan; cambiarlo rompe el contrato
/// de equivalencia entre plataformas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `SETUP_START`, `SETUP_END`.
    Empty {},

    /// `VERSION_INFO`.
    VersionInfo {
        component: String,
        version: String,
        status: String,
    },

    /// `PROGRAM_START`, `PROGRAM_END`, `ERROR`, `TIMEOUT`.
    Message { message: String },

    /// `LOOP_START`.
    LoopStart {
        iteration: u32,
        #[serde(rename = "loopType")]
        loop_type: String,
    },

    /// `LOOP_END`.
    LoopEnd {
        iterations: u32,
        #[serde(rename = "limitReached")]
        limit_reached: bool,
    },

    /// `LOOP_LIMIT_REACHED`.
    LoopLimitReached { iterations: u32 },

    /// `FUNCTION_CALL`.
    FunctionCall {
        function: String,
        iteration: u32,
        completed: bool,
    },

    /// `PIN_MODE`.
    PinMode { pin: u32, mode: String },

    /// `DIGITAL_WRITE`, `ANALOG_WRITE`.
    PinWrite { pin: u32, value: i64 },

    /// `DELAY`.
    Delay { ms: u64 },

    /// `DELAY_MICROSECONDS`.
    DelayMicroseconds { us: u64 },

    /// `SERIAL_BEGIN`.
    SerialBegin { baud: i64 },

    /// `SERIAL_PRINT`, `SERIAL_PRINTLN`.
    SerialText {
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// `SERIAL_WRITE`.
    SerialWrite { value: i64 },

    /// `TONE`.
    Tone {
        pin: u32,
        frequency: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },

    /// `NO_TONE`.
    NoTone { pin: u32 },

    /// `ANALOG_READ_REQUEST`, `DIGITAL_READ_REQUEST`.
    PinRequest {
        #[serde(rename = "requestId")]
        request_id: u64,
        pin: u32,
    },

    /// `MILLIS_REQUEST`, `MICROS_REQUEST`.
    ClockRequest {
        #[serde(rename = "requestId")]
        request_id: u64,
    },

    /// `LIBRARY_METHOD_REQUEST`.
    LibraryMethodRequest {
        #[serde(rename = "requestId")]
        request_id: u64,
        object: String,
        method: String,
        args: Vec<Field>,
    },
}

/// Consumidor del flujo de comandos.
///
/// La entrega es síncrona y en orden de emisión, desde el hilo
/// ejecutor del intérprete.
pub trait CommandSink: Send {
    fn emit(&mut self, command: Command);
}

impl<F: FnMut(Command) + Send> CommandSink for F {
    fn emit(&mut self, command: Command) {
        self(command);
    }
}

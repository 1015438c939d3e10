//! Intérprete de sketches de Arduino.
//!
//! Este crate consume un archivo fuente en el dialecto C++ de
//! Arduino y lo ejecuta contra un runtime simulado: en vez de
//! manejar hardware, el intérprete emite un flujo de comandos
//! estructurados (escrituras de pines, retardos, salida serial,
//! llamadas a bibliotecas, marcadores de control de flujo) que un
//! consumidor externo interpreta.
//!
//! El pipeline es lineal: el preprocesador resuelve directivas
//! contra un perfil de plataforma, el parser de descenso recursivo
//! produce un AST tipado, y el intérprete camina ese árbol. El AST
//! puede además serializarse a un formato binario compacto
//! ([`codec`]) para trasladar el trabajo del toolchain anfitrión a
//! la implementación embebida; ambas deben producir flujos de
//! comandos idénticos para la misma entrada.

pub mod ast;
pub mod codec;
pub mod command;
pub mod error;
pub mod interp;
pub mod lex;
pub mod library;
pub mod parse;
pub mod platform;
pub mod preprocess;
pub mod source;

use std::collections::BTreeSet;

use crate::ast::Node;
use crate::lex::LexerError;
use crate::library::LibraryRegistry;
use crate::platform::Platform;
use crate::preprocess::PreprocessorError;
use crate::source::Located;

/// Resultado del frente del pipeline.
#[derive(Debug)]
pub struct Frontend {
    /// Raíz `Program`, posiblemente con subárboles de error.
    pub ast: Node,

    /// Bibliotecas activadas por la plataforma o por `#include`.
    pub activated: BTreeSet<String>,

    pub preprocessor_diagnostics: Vec<Located<PreprocessorError>>,
    pub lexer_diagnostics: Vec<Located<LexerError>>,
}

/// Corre el frente completo sobre un texto fuente: preprocesador,
/// lexer y parser. Ninguna fase detiene a las demás; los errores
/// quedan en los diagnósticos y en nodos de error del árbol.
pub fn frontend(source: &str, platform: Platform) -> Frontend {
    let registry = LibraryRegistry::new();

    let preprocessed = preprocess::preprocess(source, platform, &registry);
    let (tokens, lexer_diagnostics) = lex::tokenize(&preprocessed.code);
    let ast = parse::parse(tokens, registry.class_names());

    Frontend {
        ast,
        activated: preprocessed.activated,
        preprocessor_diagnostics: preprocessed.diagnostics,
        lexer_diagnostics,
    }
}

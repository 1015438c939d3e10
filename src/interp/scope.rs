//! Marcos de alcance léxico.
//!
//! El alcance es una pila de marcos. Cada sentencia compuesta
//! empuja un marco nuevo; las llamadas a función empujan un marco
//! barrera encadenado directamente al marco global, de modo que no
//! existe semántica de closures: la búsqueda recorre del marco más
//! interno hacia afuera, se detiene en la barrera y salta al marco
//! global. El sombreado de nombres está permitido.

use super::value::RuntimeValue;
use std::collections::HashMap;

/// Asociación de un identificador dentro de un marco.
#[derive(Debug, Clone)]
pub struct Binding {
    pub type_name: String,
    pub value: RuntimeValue,
    pub is_const: bool,
}

/// Un marco de la pila de alcances.
#[derive(Debug)]
pub struct Frame {
    /// Identificador único y creciente, usado por los punteros.
    id: u64,

    /// Un marco barrera corta la búsqueda hacia marcos exteriores.
    barrier: bool,

    slots: HashMap<String, Binding>,
}

/// Pila de marcos completa de un intérprete.
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
    next_id: u64,
}

impl ScopeStack {
    /// Crea la pila con su marco global.
    pub fn new() -> Self {
        ScopeStack {
            frames: vec![Frame {
                id: 0,
                barrier: false,
                slots: HashMap::new(),
            }],
            next_id: 1,
        }
    }

    /// Empuja un marco de bloque.
    pub fn push(&mut self) {
        self.push_frame(false);
    }

    /// Empuja el marco barrera de una llamada a función.
    pub fn push_barrier(&mut self) {
        self.push_frame(true);
    }

    fn push_frame(&mut self, barrier: bool) {
        let id = self.next_id;
        self.next_id += 1;

        self.frames.push(Frame {
            id,
            barrier,
            slots: HashMap::new(),
        });
    }

    /// Descarta el marco más interno. El marco global no se
    /// descarta nunca.
    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "global frame popped");
        self.frames.pop();
    }

    /// Id del marco más interno.
    pub fn current_frame(&self) -> u64 {
        self.frames.last().map(|frame| frame.id).unwrap_or(0)
    }

    /// Declara una variable en el marco más interno, sombreando
    /// cualquier asociación exterior del mismo nombre.
    pub fn declare(&mut self, name: String, binding: Binding) {
        if let Some(frame) = self.frames.last_mut() {
            frame.slots.insert(name, binding);
        }
    }

    /// Búsqueda léxica: del marco interno hacia afuera hasta la
    /// barrera, y de ahí al marco global.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        for frame in self.frames.iter().rev() {
            if let Some(binding) = frame.slots.get(name) {
                return Some(binding);
            }

            if frame.barrier {
                break;
            }
        }

        self.frames.first().and_then(|frame| frame.slots.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        let frame_id = self.frame_of(name)?;
        self.binding_in_frame(frame_id, name)
    }

    /// Marco que resuelve un nombre, para construir punteros.
    pub fn frame_of(&self, name: &str) -> Option<u64> {
        for frame in self.frames.iter().rev() {
            if frame.slots.contains_key(name) {
                return Some(frame.id);
            }

            if frame.barrier {
                break;
            }
        }

        match self.frames.first() {
            Some(global) if global.slots.contains_key(name) => Some(global.id),
            _ => None,
        }
    }

    /// Acceso directo por id de marco, usado al desreferenciar
    /// punteros. El marco puede haber expirado.
    pub fn binding_in_frame(&mut self, frame_id: u64, name: &str) -> Option<&mut Binding> {
        self.frames
            .iter_mut()
            .rev()
            .find(|frame| frame.id == frame_id)
            .and_then(|frame| frame.slots.get_mut(name))
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

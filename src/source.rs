//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos que el pipeline construye llevan cuenta
//! de la posición donde ocurren en el código original, lo cual
//! permite señalar un punto exacto cuando se reporta un error de
//! abstracción arbitraria. El preprocesador preserva la numeración
//! de líneas del archivo original, por lo que las posiciones que
//! viajan con tokens y nodos siguen siendo válidas en fases
//! posteriores.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::CharIndices;

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    position: Position,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la posición.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Descarta la posición y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Position, T) {
        (self.position, self.value)
    }

    /// Construye a partir de un valor y una posición.
    pub fn at(value: T, position: Position) -> Self {
        Located { value, position }
    }

    /// Transforma el valor con la misma posición.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            position: self.position,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Una posición línea-columna en un archivo, junto con el
/// desplazamiento en bytes desde el inicio del mismo.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
    offset: u32,
}

impl Position {
    /// Construye una posición explícita.
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Position {
            line,
            column,
            offset,
        }
    }

    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Obtiene el desplazamiento en bytes.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            column: self.column + 1,
            ..self
        }
    }

    /// Incrementa el número de línea y retorna a la columna 1.
    pub fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 1,
            offset: self.offset,
        }
    }

    /// Ajusta la posición a la siguiente columna de tabulador.
    pub fn tab(self) -> Position {
        let column = 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP;
        Position { column, ..self }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

impl Debug for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Transforma un texto fuente en un flujo de caracteres, cada uno
/// asociado a la posición donde inicia.
pub fn chars(source: &str) -> Chars<'_> {
    Chars {
        inner: source.char_indices(),
        next: Position::default(),
    }
}

/// Iterador por carácter sobre un texto en memoria.
///
/// La posición que acompaña a cada carácter corresponde al punto
/// donde ese carácter inicia. Los saltos de línea y tabuladores
/// alteran la posición del carácter siguiente.
pub struct Chars<'a> {
    inner: CharIndices<'a>,
    next: Position,
}

impl Iterator for Chars<'_> {
    type Item = (char, Position);

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, c) = self.inner.next()?;
        let here = Position {
            offset: offset as u32,
            ..self.next
        };

        self.next = match c {
            '\n' => here.newline(),
            '\t' => here.tab(),
            _ => here.advance(),
        };

        Some((c, here))
    }
}

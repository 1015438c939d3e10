//! Agregación y despliegue de diagnósticos.
//!
//! Las fases del pipeline no se detienen ante el primer error:
//! acumulan diagnósticos y continúan con un resultado de mejor
//! esfuerzo. Este módulo reúne esos diagnósticos sin importar la
//! fase que los originó y los despliega de manera uniforme.

use crate::source::{Located, Position};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

/// Un error con posición conocida en el código fuente.
pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn position(&self) -> Position;
}

/// Colección de diagnósticos de una o más fases.
#[derive(Default)]
pub struct Diagnostics {
    kind: Option<&'static str>,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Etiqueta estos diagnósticos con la fase que los produjo.
    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Agrega un diagnóstico individual.
    pub fn push<E: 'static + LocatedError>(&mut self, error: E) {
        self.errors.push(Box::new(error));
    }

    /// Absorbe los diagnósticos de otra colección.
    pub fn append(&mut self, mut other: Diagnostics) {
        self.errors.append(&mut other.errors);
    }

    /// Indica si no hay diagnósticos acumulados.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Cantidad de diagnósticos acumulados.
    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            kind: None,
            errors: vec![Box::new(error)],
        }
    }
}

impl<E: 'static + LocatedError> From<Vec<E>> for Diagnostics {
    fn from(errors: Vec<E>) -> Self {
        let errors = errors
            .into_iter()
            .map(|error| {
                let error: Box<dyn LocatedError> = Box::new(error);
                error
            })
            .collect();

        Diagnostics { kind: None, errors }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        let kind = self.kind.unwrap_or("error");
        for error in &self.errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;
            writeln!(fmt, " --> {}", error.position())?;
        }

        let error_or_errors = if self.errors.len() == 1 {
            "error"
        } else {
            "errors"
        };

        writeln!(
            fmt,
            "Finished with {} {}",
            self.errors.len(),
            error_or_errors
        )
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.val()
    }

    fn position(&self) -> Position {
        Located::position(self)
    }
}

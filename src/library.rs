//! Registro de bibliotecas de Arduino.
//!
//! El registro es una tabla lateral consultada en dos puntos del
//! pipeline: el preprocesador coteja cada `#include` contra los
//! encabezados conocidos para activar bibliotecas, y el intérprete
//! enruta llamadas a métodos sobre objetos de tipos registrados.
//!
//! Cada método declara si se sirve internamente (el intérprete
//! computa el resultado) o externamente (el intérprete emite una
//! petición `LIBRARY_METHOD_REQUEST` y espera un valor del host).
//! Los métodos internos se identifican por una etiqueta de
//! despacho que el intérprete resuelve, de forma que este módulo
//! se mantiene como datos puros.

/// Cantidad de argumentos aceptada por un método.
#[derive(Copy, Clone, Debug)]
pub struct Arity {
    pub min: u8,
    pub max: u8,
}

impl Arity {
    const fn exact(n: u8) -> Self {
        Arity { min: n, max: n }
    }

    const fn range(min: u8, max: u8) -> Self {
        Arity { min, max }
    }

    pub fn accepts(&self, count: usize) -> bool {
        (self.min as usize) <= count && count <= (self.max as usize)
    }
}

/// Forma en que se resuelve un método registrado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// El intérprete computa el resultado localmente.
    Internal(Internal),

    /// Se emite una petición y se espera la respuesta del host.
    External,
}

/// Etiquetas de despacho para métodos servidos internamente.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Internal {
    SerialBegin,
    SerialPrint,
    SerialPrintln,
    SerialWrite,
    ServoAttach,
    ServoDetach,
    ServoAttached,
    ServoRead,
    NeoPixelNumPixels,
    NeoPixelColor,
}

/// Un método conocido de una biblioteca.
#[derive(Copy, Clone, Debug)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub arity: Arity,
    pub dispatch: Dispatch,
}

const fn method(name: &'static str, arity: Arity, dispatch: Dispatch) -> MethodDescriptor {
    MethodDescriptor {
        name,
        arity,
        dispatch,
    }
}

/// Descriptor de una biblioteca completa.
#[derive(Copy, Clone, Debug)]
pub struct LibraryDescriptor {
    /// Nombre del tipo con que se declaran instancias.
    pub type_name: &'static str,

    /// Encabezados cuyo `#include` activa esta biblioteca.
    pub includes: &'static [&'static str],

    /// Cantidad de argumentos aceptada por el constructor.
    pub constructor: Arity,

    /// Métodos estáticos, resueltos por nombre de tipo.
    pub static_methods: &'static [MethodDescriptor],

    /// Métodos de instancia.
    pub instance_methods: &'static [MethodDescriptor],
}

impl LibraryDescriptor {
    /// Busca un método de instancia por nombre.
    pub fn instance_method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.instance_methods
            .iter()
            .find(|method| method.name == name)
    }

    /// Busca un método estático por nombre.
    pub fn static_method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.static_methods
            .iter()
            .find(|method| method.name == name)
    }
}

/// Tabla de bibliotecas conocidas.
const LIBRARIES: &[LibraryDescriptor] = &[
    LibraryDescriptor {
        type_name: "Serial",
        includes: &[],
        constructor: Arity::exact(0),
        static_methods: &[],
        instance_methods: &[
            method("begin", Arity::exact(1), Dispatch::Internal(Internal::SerialBegin)),
            method("print", Arity::range(1, 2), Dispatch::Internal(Internal::SerialPrint)),
            method(
                "println",
                Arity::range(0, 2),
                Dispatch::Internal(Internal::SerialPrintln),
            ),
            method("write", Arity::exact(1), Dispatch::Internal(Internal::SerialWrite)),
        ],
    },
    LibraryDescriptor {
        type_name: "Servo",
        includes: &["Servo.h"],
        constructor: Arity::exact(0),
        static_methods: &[],
        instance_methods: &[
            method(
                "attach",
                Arity::range(1, 3),
                Dispatch::Internal(Internal::ServoAttach),
            ),
            method("detach", Arity::exact(0), Dispatch::Internal(Internal::ServoDetach)),
            method(
                "attached",
                Arity::exact(0),
                Dispatch::Internal(Internal::ServoAttached),
            ),
            method("read", Arity::exact(0), Dispatch::Internal(Internal::ServoRead)),
            method("write", Arity::exact(1), Dispatch::External),
            method("writeMicroseconds", Arity::exact(1), Dispatch::External),
        ],
    },
    LibraryDescriptor {
        type_name: "Adafruit_NeoPixel",
        includes: &["Adafruit_NeoPixel.h"],
        constructor: Arity::range(0, 3),
        static_methods: &[method(
            "Color",
            Arity::range(3, 4),
            Dispatch::Internal(Internal::NeoPixelColor),
        )],
        instance_methods: &[
            method("begin", Arity::exact(0), Dispatch::External),
            method("show", Arity::exact(0), Dispatch::External),
            method("clear", Arity::exact(0), Dispatch::External),
            method("setPixelColor", Arity::range(2, 5), Dispatch::External),
            method("setBrightness", Arity::exact(1), Dispatch::External),
            method("fill", Arity::range(0, 3), Dispatch::External),
            method(
                "numPixels",
                Arity::exact(0),
                Dispatch::Internal(Internal::NeoPixelNumPixels),
            ),
        ],
    },
    LibraryDescriptor {
        type_name: "LiquidCrystal",
        includes: &["LiquidCrystal.h"],
        constructor: Arity::range(4, 6),
        static_methods: &[],
        instance_methods: &[
            method("begin", Arity::exact(2), Dispatch::External),
            method("clear", Arity::exact(0), Dispatch::External),
            method("home", Arity::exact(0), Dispatch::External),
            method("setCursor", Arity::exact(2), Dispatch::External),
            method("print", Arity::exact(1), Dispatch::External),
        ],
    },
];

/// Registro de bibliotecas, construido una vez por corrida.
#[derive(Debug, Default)]
pub struct LibraryRegistry;

impl LibraryRegistry {
    pub fn new() -> Self {
        LibraryRegistry
    }

    /// Busca el descriptor de un tipo registrado.
    pub fn lookup(&self, type_name: &str) -> Option<&'static LibraryDescriptor> {
        LIBRARIES
            .iter()
            .find(|library| library.type_name == type_name)
    }

    /// Coteja el nombre de un encabezado `#include` contra los
    /// encabezados registrados. Un acierto activa la biblioteca.
    pub fn match_include(&self, header: &str) -> Option<&'static str> {
        LIBRARIES
            .iter()
            .find(|library| library.includes.contains(&header))
            .map(|library| library.type_name)
    }

    /// Nombres de tipo registrados, para sembrar la tabla de tipos
    /// del parser.
    pub fn class_names(&self) -> impl Iterator<Item = &'static str> {
        LIBRARIES.iter().map(|library| library.type_name)
    }
}

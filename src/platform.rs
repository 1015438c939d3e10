//! Contexto de plataforma.
//!
//! Cada perfil de tarjeta aporta las definiciones de preprocesador,
//! los alias de pines y las bibliotecas activas de fábrica que el
//! resto del pipeline consulta. Los perfiles son datos estáticos e
//! inmutables: una vez escogida la plataforma no hay mutación.
//!
//! Las definiciones incluyen el conjunto de constantes del core de
//! Arduino (`HIGH`, `OUTPUT`, `LED_BUILTIN`, ...) además de las
//! macros de identidad de la tarjeta, por lo que el preprocesador
//! resuelve la mayoría de identificadores de ambiente antes de que
//! el intérprete los observe.

use std::fmt::{self, Display};
use std::str::FromStr;

/// Perfil de tarjeta objetivo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    /// Arduino UNO R3 (AVR).
    ArduinoUno,

    /// Arduino Nano ESP32.
    Esp32Nano,
}

/// Definiciones comunes a todos los perfiles.
const CORE_DEFINES: &[(&str, &str)] = &[
    ("HIGH", "1"),
    ("LOW", "0"),
    ("INPUT", "0"),
    ("OUTPUT", "1"),
    ("INPUT_PULLUP", "2"),
    ("LSBFIRST", "0"),
    ("MSBFIRST", "1"),
    ("CHANGE", "1"),
    ("FALLING", "2"),
    ("RISING", "3"),
    ("DEC", "10"),
    ("HEX", "16"),
    ("OCT", "8"),
    ("BIN", "2"),
    ("PI", "3.1415926535897932384626433832795"),
    ("HALF_PI", "1.5707963267948966192313216916398"),
    ("TWO_PI", "6.283185307179586476925286766559"),
    ("DEG_TO_RAD", "0.017453292519943295769236907684886"),
    ("RAD_TO_DEG", "57.295779513082320876798154814105"),
    ("ARDUINO", "10819"),
];

impl Platform {
    /// Nombre presentable de la tarjeta.
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::ArduinoUno => "Arduino UNO R3",
            Platform::Esp32Nano => "Arduino Nano ESP32",
        }
    }

    /// Definiciones de preprocesador que la plataforma inyecta,
    /// en orden de declaración.
    pub fn defines(self) -> Vec<(&'static str, &'static str)> {
        let board: &[(&str, &str)] = match self {
            Platform::ArduinoUno => &[
                ("ARDUINO_ARCH_AVR", "1"),
                ("ARDUINO_AVR_UNO", "1"),
                ("__AVR__", "1"),
                ("F_CPU", "16000000L"),
                ("LED_BUILTIN", "13"),
                ("A0", "14"),
                ("A1", "15"),
                ("A2", "16"),
                ("A3", "17"),
                ("A4", "18"),
                ("A5", "19"),
                ("NUM_DIGITAL_PINS", "20"),
            ],

            Platform::Esp32Nano => &[
                ("ARDUINO_ARCH_ESP32", "1"),
                ("ARDUINO_NANO_ESP32", "1"),
                ("ESP32", "1"),
                ("F_CPU", "240000000L"),
                ("LED_BUILTIN", "13"),
                ("A0", "14"),
                ("A1", "15"),
                ("A2", "16"),
                ("A3", "17"),
                ("A4", "18"),
                ("A5", "19"),
                ("A6", "20"),
                ("A7", "21"),
                ("NUM_DIGITAL_PINS", "22"),
            ],
        };

        CORE_DEFINES.iter().chain(board.iter()).copied().collect()
    }

    /// Alias de pines que el intérprete resuelve cuando un
    /// identificador sobrevive al preprocesador sin expandirse.
    pub fn pin_aliases(self) -> &'static [(&'static str, u32)] {
        match self {
            Platform::ArduinoUno => &[
                ("LED_BUILTIN", 13),
                ("A0", 14),
                ("A1", 15),
                ("A2", 16),
                ("A3", 17),
                ("A4", 18),
                ("A5", 19),
            ],

            Platform::Esp32Nano => &[
                ("LED_BUILTIN", 13),
                ("A0", 14),
                ("A1", 15),
                ("A2", 16),
                ("A3", 17),
                ("A4", 18),
                ("A5", 19),
                ("A6", 20),
                ("A7", 21),
            ],
        }
    }

    /// Canal ADC que corresponde a un número de pin.
    ///
    /// `analogRead(A0)` y `analogRead(0)` leen el mismo canal, tal
    /// como lo normalizan los cores de Arduino.
    pub fn analog_channel(self, pin: u32) -> u32 {
        let base = match self {
            Platform::ArduinoUno | Platform::Esp32Nano => 14,
        };

        if pin >= base {
            pin - base
        } else {
            pin
        }
    }

    /// Bibliotecas activas sin necesidad de `#include`.
    pub fn activated_libraries(self) -> &'static [&'static str] {
        match self {
            Platform::ArduinoUno | Platform::Esp32Nano => &["Serial"],
        }
    }
}

impl FromStr for Platform {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "uno" => Ok(Platform::ArduinoUno),
            "esp32-nano" => Ok(Platform::Esp32Nano),
            _ => Err(()),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.display_name())
    }
}

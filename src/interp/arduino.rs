//! Superficie interna de Arduino.
//!
//! Las funciones del core que no dependen de datos externos se
//! resuelven aquí: emiten el comando que describe su efecto y, si
//! corresponde, avanzan el reloj simulado. Las que sí dependen del
//! exterior (`analogRead`, `millis`, ...) emiten su petición y
//! suspenden al ejecutor hasta la respuesta.
//!
//! También viven aquí los manejadores internos del registro de
//! bibliotecas y los métodos de `String`.

use crate::command::{CommandKind, Payload};
use crate::library::Internal;

use super::exec::{Exec, Executor};
use super::value::{ObjectHandle, RuntimeValue};
use crate::ast::{Node, NodeKind};

/// Argumento numérico entero, con cero como omisión.
fn arg_int(args: &[RuntimeValue], index: usize) -> i64 {
    args.get(index).and_then(RuntimeValue::as_int).unwrap_or(0)
}

fn arg_float(args: &[RuntimeValue], index: usize) -> f64 {
    args.get(index)
        .and_then(RuntimeValue::as_float)
        .unwrap_or(0.0)
}

fn arg_pin(args: &[RuntimeValue], index: usize) -> u32 {
    arg_int(args, index).max(0) as u32
}

/// Nombre presentable de un modo de pin.
fn mode_name(mode: i64) -> String {
    match mode {
        0 => "INPUT".to_string(),
        1 => "OUTPUT".to_string(),
        2 => "INPUT_PULLUP".to_string(),
        other => other.to_string(),
    }
}

impl Executor {
    /// Despacha una función del core por nombre. `None` indica que
    /// el nombre no pertenece a la superficie interna.
    pub(super) fn builtin_call(
        &mut self,
        name: &str,
        args: &[RuntimeValue],
    ) -> Option<Exec<RuntimeValue>> {
        let result = match name {
            "pinMode" => {
                let payload = Payload::PinMode {
                    pin: arg_pin(args, 0),
                    mode: mode_name(arg_int(args, 1)),
                };

                self.emit(CommandKind::PinMode, payload)
                    .map(|_| RuntimeValue::Void)
            }

            "digitalWrite" => {
                let payload = Payload::PinWrite {
                    pin: arg_pin(args, 0),
                    value: arg_int(args, 1),
                };

                self.emit(CommandKind::DigitalWrite, payload)
                    .map(|_| RuntimeValue::Void)
            }

            "analogWrite" => {
                let payload = Payload::PinWrite {
                    pin: arg_pin(args, 0),
                    value: arg_int(args, 1),
                };

                self.emit(CommandKind::AnalogWrite, payload)
                    .map(|_| RuntimeValue::Void)
            }

            "delay" => {
                // El comando lleva el instante en que inicia el
                // retardo; el reloj avanza después
                let ms = arg_int(args, 0).max(0) as u64;
                let result = self.emit(CommandKind::Delay, Payload::Delay { ms });
                self.clock_us += ms.saturating_mul(1000);

                result.map(|_| RuntimeValue::Void)
            }

            "delayMicroseconds" => {
                let us = arg_int(args, 0).max(0) as u64;
                let result = self.emit(
                    CommandKind::DelayMicroseconds,
                    Payload::DelayMicroseconds { us },
                );

                self.clock_us += us;
                result.map(|_| RuntimeValue::Void)
            }

            "millis" => self.request(CommandKind::MillisRequest, |id| Payload::ClockRequest {
                request_id: id,
            }),

            "micros" => self.request(CommandKind::MicrosRequest, |id| Payload::ClockRequest {
                request_id: id,
            }),

            "analogRead" => {
                let pin = self.platform.analog_channel(arg_pin(args, 0));
                self.request(CommandKind::AnalogReadRequest, move |id| {
                    Payload::PinRequest {
                        request_id: id,
                        pin,
                    }
                })
            }

            "digitalRead" => {
                let pin = arg_pin(args, 0);
                self.request(CommandKind::DigitalReadRequest, move |id| {
                    Payload::PinRequest {
                        request_id: id,
                        pin,
                    }
                })
            }

            "tone" => {
                let payload = Payload::Tone {
                    pin: arg_pin(args, 0),
                    frequency: arg_int(args, 1),
                    duration: args.get(2).and_then(RuntimeValue::as_int),
                };

                self.emit(CommandKind::Tone, payload)
                    .map(|_| RuntimeValue::Void)
            }

            "noTone" => {
                let payload = Payload::NoTone {
                    pin: arg_pin(args, 0),
                };

                self.emit(CommandKind::NoTone, payload)
                    .map(|_| RuntimeValue::Void)
            }

            "min" => Ok(numeric_pair(args, |a, b| a.min(b), |a, b| a.min(b))),
            "max" => Ok(numeric_pair(args, |a, b| a.max(b), |a, b| a.max(b))),

            "abs" => Ok(match args.first() {
                Some(RuntimeValue::Float(v)) => RuntimeValue::Float(v.abs()),
                other => RuntimeValue::Int(
                    other.and_then(|v| v.as_int()).unwrap_or(0).wrapping_abs(),
                ),
            }),

            "constrain" => {
                let x = args.first().cloned().unwrap_or(RuntimeValue::Int(0));
                let float = matches!(x, RuntimeValue::Float(_));

                if float {
                    let v = arg_float(args, 0)
                        .max(arg_float(args, 1))
                        .min(arg_float(args, 2));

                    Ok(RuntimeValue::Float(v))
                } else {
                    let v = arg_int(args, 0)
                        .max(arg_int(args, 1))
                        .min(arg_int(args, 2));

                    Ok(RuntimeValue::Int(v))
                }
            }

            "map" => {
                let x = arg_int(args, 0);
                let in_min = arg_int(args, 1);
                let in_max = arg_int(args, 2);
                let out_min = arg_int(args, 3);
                let out_max = arg_int(args, 4);

                if in_max == in_min {
                    self.runtime_error("map() with an empty input range")
                } else {
                    let mapped = (x - in_min)
                        .wrapping_mul(out_max - out_min)
                        .wrapping_div(in_max - in_min)
                        .wrapping_add(out_min);

                    Ok(RuntimeValue::Int(mapped))
                }
            }

            "pow" => Ok(RuntimeValue::Float(
                arg_float(args, 0).powf(arg_float(args, 1)),
            )),

            "sqrt" => Ok(RuntimeValue::Float(arg_float(args, 0).sqrt())),

            "sq" => Ok(match args.first() {
                Some(RuntimeValue::Float(v)) => RuntimeValue::Float(v * v),
                other => {
                    let v = other.and_then(|v| v.as_int()).unwrap_or(0);
                    RuntimeValue::Int(v.wrapping_mul(v))
                }
            }),

            "random" => {
                let (low, high) = if args.len() >= 2 {
                    (arg_int(args, 0), arg_int(args, 1))
                } else {
                    (0, arg_int(args, 0))
                };

                Ok(RuntimeValue::Int(self.next_random(low, high)))
            }

            "randomSeed" => {
                self.rng = arg_int(args, 0) as u64;
                Ok(RuntimeValue::Void)
            }

            "String" => Ok(RuntimeValue::Str(
                args.first()
                    .map(RuntimeValue::display)
                    .unwrap_or_default(),
            )),

            _ => return None,
        };

        Some(result)
    }

    /// Generador congruencial determinista del intérprete.
    ///
    /// Sin `randomSeed` la secuencia es fija, de modo que dos
    /// implementaciones producen el mismo flujo de comandos.
    fn next_random(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }

        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        let span = (high - low) as u64;
        low + ((self.rng >> 33) % span) as i64
    }

    /// Manejadores internos del registro de bibliotecas.
    pub(super) fn library_internal(
        &mut self,
        handle: &ObjectHandle,
        tag: Internal,
        args: &[RuntimeValue],
    ) -> Exec<RuntimeValue> {
        match tag {
            Internal::SerialBegin => {
                let payload = Payload::SerialBegin {
                    baud: arg_int(args, 0),
                };

                self.emit(CommandKind::SerialBegin, payload)?;
                Ok(RuntimeValue::Void)
            }

            Internal::SerialPrint | Internal::SerialPrintln => {
                let (value, format) = serial_text(args);
                let kind = match tag {
                    Internal::SerialPrint => CommandKind::SerialPrint,
                    _ => CommandKind::SerialPrintln,
                };

                self.emit(kind, Payload::SerialText { value, format })?;
                Ok(RuntimeValue::Void)
            }

            Internal::SerialWrite => {
                let payload = Payload::SerialWrite {
                    value: arg_int(args, 0),
                };

                self.emit(CommandKind::SerialWrite, payload)?;
                Ok(RuntimeValue::Void)
            }

            Internal::ServoAttach => {
                let pin = RuntimeValue::Int(arg_int(args, 0));
                if let Some(state) = self.objects.get_mut(&handle.id) {
                    state.fields.insert("pin".to_string(), pin);
                }

                Ok(RuntimeValue::Void)
            }

            Internal::ServoDetach => {
                if let Some(state) = self.objects.get_mut(&handle.id) {
                    state.fields.remove("pin");
                }

                Ok(RuntimeValue::Void)
            }

            Internal::ServoAttached => {
                let attached = self
                    .objects
                    .get(&handle.id)
                    .map(|state| state.fields.contains_key("pin"))
                    .unwrap_or(false);

                Ok(RuntimeValue::Bool(attached))
            }

            Internal::ServoRead => {
                let angle = self
                    .objects
                    .get(&handle.id)
                    .and_then(|state| state.fields.get("angle").cloned())
                    .unwrap_or(RuntimeValue::Int(0));

                Ok(angle)
            }

            Internal::NeoPixelNumPixels => {
                let pixels = self
                    .objects
                    .get(&handle.id)
                    .and_then(|state| state.ctor_args.first())
                    .and_then(RuntimeValue::as_int)
                    .unwrap_or(0);

                Ok(RuntimeValue::Int(pixels))
            }

            Internal::NeoPixelColor => {
                let r = arg_int(args, 0) & 0xFF;
                let g = arg_int(args, 1) & 0xFF;
                let b = arg_int(args, 2) & 0xFF;
                let w = arg_int(args, 3) & 0xFF;

                Ok(RuntimeValue::Int((w << 24) | (r << 16) | (g << 8) | b))
            }
        }
    }

    /// Efectos locales de métodos externos que el intérprete
    /// necesita recordar para servir lecturas internas.
    pub(super) fn after_external(
        &mut self,
        handle: &ObjectHandle,
        method: &str,
        args: &[RuntimeValue],
    ) {
        if handle.type_name == "Servo" {
            let field = match method {
                "write" => Some("angle"),
                "writeMicroseconds" => Some("microseconds"),
                _ => None,
            };

            if let (Some(field), Some(state)) = (field, self.objects.get_mut(&handle.id)) {
                let value = args.first().cloned().unwrap_or(RuntimeValue::Int(0));
                state.fields.insert(field.to_string(), value);
            }
        }
    }

    /// Métodos de instancias `String`.
    pub(super) fn string_method(
        &mut self,
        object: &Node,
        current: String,
        method: &str,
        args: Vec<RuntimeValue>,
    ) -> Exec<RuntimeValue> {
        let result = match method {
            "length" => RuntimeValue::Int(current.len() as i64),

            "charAt" => {
                let index = arg_int(&args, 0);
                match current.as_bytes().get(index.max(0) as usize) {
                    Some(&byte) => RuntimeValue::Int(byte as i64),
                    None => RuntimeValue::Int(0),
                }
            }

            "substring" => {
                let from = (arg_int(&args, 0).max(0) as usize).min(current.len());
                let to = if args.len() > 1 {
                    (arg_int(&args, 1).max(0) as usize).min(current.len())
                } else {
                    current.len()
                };

                RuntimeValue::Str(
                    current
                        .get(from..to.max(from))
                        .unwrap_or("")
                        .to_string(),
                )
            }

            "indexOf" => {
                let needle = args
                    .first()
                    .map(RuntimeValue::display)
                    .unwrap_or_default();

                match current.find(&needle) {
                    Some(index) => RuntimeValue::Int(index as i64),
                    None => RuntimeValue::Int(-1),
                }
            }

            "startsWith" => {
                let prefix = args.first().map(RuntimeValue::display).unwrap_or_default();
                RuntimeValue::Bool(current.starts_with(&prefix))
            }

            "endsWith" => {
                let suffix = args.first().map(RuntimeValue::display).unwrap_or_default();
                RuntimeValue::Bool(current.ends_with(&suffix))
            }

            "equals" => {
                let other = args.first().map(RuntimeValue::display).unwrap_or_default();
                RuntimeValue::Bool(current == other)
            }

            "toInt" => RuntimeValue::Int(leading_int(&current)),
            "toFloat" => RuntimeValue::Float(leading_float(&current)),
            "c_str" => RuntimeValue::Str(current),

            // Mutadores en sitio
            "toUpperCase" => return self.mutate_string(object, current.to_uppercase()),
            "toLowerCase" => return self.mutate_string(object, current.to_lowercase()),
            "trim" => return self.mutate_string(object, current.trim().to_string()),

            "concat" => {
                let suffix = args.first().map(RuntimeValue::display).unwrap_or_default();
                let mut combined = current;
                combined.push_str(&suffix);
                self.mutate_string(object, combined)?;
                return Ok(RuntimeValue::Bool(true));
            }

            _ => {
                let message = format!("Method `{}` is undefined for String", method);
                return self.runtime_error(&message);
            }
        };

        Ok(result)
    }

    /// Escribe de vuelta un `String` mutado en su lugar de origen,
    /// cuando este es asignable.
    fn mutate_string(&mut self, object: &Node, updated: String) -> Exec<RuntimeValue> {
        if matches!(
            object.kind,
            NodeKind::Identifier(_)
                | NodeKind::ArrayAccess { .. }
                | NodeKind::MemberAccess { .. }
        ) {
            self.assign(object, RuntimeValue::Str(updated))?;
        }

        Ok(RuntimeValue::Void)
    }
}

/// Convierte una pareja de argumentos preservando el dominio.
fn numeric_pair(
    args: &[RuntimeValue],
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> RuntimeValue {
    let float = args
        .iter()
        .take(2)
        .any(|v| matches!(v, RuntimeValue::Float(_)));

    if float {
        RuntimeValue::Float(float_op(arg_float(args, 0), arg_float(args, 1)))
    } else {
        RuntimeValue::Int(int_op(arg_int(args, 0), arg_int(args, 1)))
    }
}

/// Formato de `Serial.print`: el segundo argumento selecciona base
/// numérica para enteros o cantidad de decimales para flotantes.
fn serial_text(args: &[RuntimeValue]) -> (String, Option<String>) {
    let value = match args.first() {
        Some(value) => value,
        None => return (String::new(), None),
    };

    let selector = match args.get(1).and_then(RuntimeValue::as_int) {
        Some(selector) => selector,
        None => return (value.display(), None),
    };

    if let RuntimeValue::Float(v) = value {
        let decimals = selector.max(0) as usize;
        return (
            format!("{:.*}", decimals, v),
            Some(decimals.to_string()),
        );
    }

    let v = value.as_int().unwrap_or(0);
    match selector {
        2 => (format!("{:b}", v), Some("BIN".to_string())),
        8 => (format!("{:o}", v), Some("OCT".to_string())),
        16 => (format!("{:X}", v), Some("HEX".to_string())),
        _ => (v.to_string(), Some("DEC".to_string())),
    }
}

/// `String::toInt`: prefijo entero del texto, cero si no hay.
fn leading_int(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let mut end = 0;

    for (index, c) in trimmed.char_indices() {
        if c.is_ascii_digit() || (index == 0 && (c == '-' || c == '+')) {
            end = index + c.len_utf8();
        } else {
            break;
        }
    }

    trimmed[..end].parse().unwrap_or(0)
}

fn leading_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;

    for (index, c) in trimmed.char_indices() {
        let numeric = c.is_ascii_digit()
            || (index == 0 && (c == '-' || c == '+'))
            || (c == '.' && !seen_dot);

        if numeric {
            if c == '.' {
                seen_dot = true;
            }

            end = index + c.len_utf8();
        } else {
            break;
        }
    }

    trimmed[..end].parse().unwrap_or(0.0)
}

//! Preprocesamiento condicionado por plataforma.
//!
//! Esta fase consume el texto fuente crudo junto con el contexto
//! de plataforma y produce texto limpio para el parser: sin
//! directivas `#`, con toda rama condicional resuelta y con toda
//! macro expandida. Las líneas que desaparecen (directivas, ramas
//! no tomadas) se sustituyen por líneas en blanco, de manera que
//! la numeración del archivo original se preserva y las fases
//! posteriores reportan posiciones válidas.
//!
//! # Directivas
//! Se reconocen `#define` (objeto y función), `#undef`,
//! `#include`, `#if`/`#elif`/`#else`/`#endif`, `#ifdef`,
//! `#ifndef`, `#pragma` y `#error`. Los `#include` no leen el
//! sistema de archivos: el nombre se coteja contra los encabezados
//! del registro de bibliotecas y un acierto activa la biblioteca
//! correspondiente; el resto se descarta.
//!
//! # Errores
//! Ninguna condición de error detiene el preprocesamiento. Las
//! directivas malformadas y los condicionales sin balancear se
//! acumulan como diagnósticos con la posición original y la fase
//! continúa con un resultado de mejor esfuerzo.

use crate::{
    lex::{self, Token},
    library::LibraryRegistry,
    platform::Platform,
    source::{Located, Position},
};

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Profundidad máxima de reexpansión de macros.
///
/// Las macros autorreferentes convergen a este límite en vez de
/// divergir.
const MACRO_DEPTH: usize = 16;

/// Error de preprocesamiento.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessorError {
    /// Directiva reconocida pero sintácticamente inválida.
    #[error("Malformed `#{0}` directive")]
    MalformedDirective(&'static str),

    /// Directiva que el preprocesador no reconoce.
    #[error("Unknown directive `#{0}`")]
    UnknownDirective(String),

    /// `#elif` o `#else` sin un `#if` abierto, o tras `#else`.
    #[error("`#{0}` without matching `#if`")]
    DanglingBranch(&'static str),

    /// `#endif` sin condicional abierto.
    #[error("`#endif` without matching `#if`")]
    DanglingEndif,

    /// Condicional abierto que llega al final del archivo.
    #[error("Unterminated conditional directive")]
    UnbalancedConditional,

    /// Expresión de `#if`/`#elif` que no se puede evaluar.
    #[error("Cannot evaluate conditional expression: {0}")]
    BadExpression(String),

    /// Directiva `#error` alcanzada por una rama activa.
    #[error("#error: {0}")]
    UserError(String),
}

/// Una macro definida.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    /// Parámetros formales; `None` para macros tipo objeto.
    pub params: Option<Vec<String>>,
    pub body: String,
}

/// Resultado del preprocesamiento.
#[derive(Debug)]
pub struct Preprocessed {
    /// Texto limpio, con la numeración de líneas original.
    pub code: String,

    /// Tabla de macros al final del archivo.
    pub macros: HashMap<String, Macro>,

    /// Bibliotecas activadas por la plataforma o por `#include`.
    pub activated: BTreeSet<String>,

    /// Directivas `#pragma` registradas.
    pub pragmas: Vec<String>,

    pub diagnostics: Vec<Located<PreprocessorError>>,
}

/// Preprocesa un texto fuente completo.
pub fn preprocess(source: &str, platform: Platform, registry: &LibraryRegistry) -> Preprocessed {
    let mut macros = HashMap::new();
    for (name, body) in platform.defines() {
        macros.insert(
            name.to_string(),
            Macro {
                params: None,
                body: body.to_string(),
            },
        );
    }

    let mut activated = BTreeSet::new();
    for library in platform.activated_libraries() {
        activated.insert(library.to_string());
    }

    let preprocessor = Preprocessor {
        registry,
        macros,
        activated,
        pragmas: Vec::new(),
        diagnostics: Vec::new(),
        conditions: Vec::new(),
        output: String::new(),
    };

    preprocessor.process(source)
}

/// Un marco de condicional abierto.
struct Condition {
    opened_at: Position,
    parent_active: bool,
    taken: bool,
    taken_any: bool,
    saw_else: bool,
}

struct Preprocessor<'a> {
    registry: &'a LibraryRegistry,
    macros: HashMap<String, Macro>,
    activated: BTreeSet<String>,
    pragmas: Vec<String>,
    diagnostics: Vec<Located<PreprocessorError>>,
    conditions: Vec<Condition>,
    output: String,
}

impl Preprocessor<'_> {
    fn process(mut self, source: &str) -> Preprocessed {
        let mut lines = source.lines().enumerate();
        let mut offset = 0u32;

        while let Some((index, first)) = lines.next() {
            let start = Position::new(index as u32 + 1, 1, offset);
            offset += first.len() as u32 + 1;

            // Unión de continuaciones con `\`; las líneas físicas
            // absorbidas se compensan con líneas en blanco para no
            // alterar la numeración
            let mut text = first.to_string();
            let mut absorbed = 0;
            while text.ends_with('\\') {
                text.pop();
                match lines.next() {
                    None => break,
                    Some((_, next)) => {
                        offset += next.len() as u32 + 1;
                        absorbed += 1;
                        text.push_str(next);
                    }
                }
            }

            self.line(&text, start);
            for _ in 0..absorbed {
                self.output.push('\n');
            }
        }

        for condition in self.conditions.drain(..).collect::<Vec<_>>() {
            self.diagnostics.push(Located::at(
                PreprocessorError::UnbalancedConditional,
                condition.opened_at,
            ));
        }

        Preprocessed {
            code: self.output,
            macros: self.macros,
            activated: self.activated,
            pragmas: self.pragmas,
            diagnostics: self.diagnostics,
        }
    }

    /// Procesa una línea lógica completa.
    fn line(&mut self, text: &str, start: Position) {
        let trimmed = text.trim_start();
        if let Some(directive) = trimmed.strip_prefix('#') {
            self.directive(directive.trim_start(), start);
            self.output.push('\n');
            return;
        }

        if self.active() {
            let expanded = self.expand(text);
            self.output.push_str(&expanded);
        }

        self.output.push('\n');
    }

    /// Indica si la línea actual pertenece a una rama activa.
    fn active(&self) -> bool {
        self.conditions.last().map(|c| c.taken).unwrap_or(true)
    }

    fn report(&mut self, error: PreprocessorError, at: Position) {
        self.diagnostics.push(Located::at(error, at));
    }

    /// Despacha una directiva ya despojada de `#`.
    fn directive(&mut self, directive: &str, at: Position) {
        let name: String = directive
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();

        let rest = directive[name.len()..].trim();

        match name.as_str() {
            // `#` solitario es válido y no hace nada
            "" => (),

            "define" if self.active() => self.define(rest, at),
            "undef" if self.active() => {
                let id = leading_identifier(rest);
                if id.is_empty() {
                    self.report(PreprocessorError::MalformedDirective("undef"), at);
                } else {
                    self.macros.remove(id);
                }
            }

            "include" if self.active() => self.include(rest, at),

            "if" => {
                let parent_active = self.active();
                let taken = parent_active && self.condition_value(rest, "if", at);
                self.push_condition(at, parent_active, taken);
            }

            "ifdef" | "ifndef" => {
                let parent_active = self.active();
                let id = leading_identifier(rest);

                let taken = if id.is_empty() {
                    self.report(
                        PreprocessorError::MalformedDirective(if name == "ifdef" {
                            "ifdef"
                        } else {
                            "ifndef"
                        }),
                        at,
                    );
                    false
                } else {
                    let defined = self.macros.contains_key(id);
                    parent_active && (defined == (name == "ifdef"))
                };

                self.push_condition(at, parent_active, taken);
            }

            "elif" => match self.conditions.last().map(|c| c.saw_else) {
                None | Some(true) => self.report(PreprocessorError::DanglingBranch("elif"), at),

                Some(false) => {
                    let condition = self.conditions.pop().unwrap();
                    let arm = condition.parent_active && !condition.taken_any;
                    let taken = arm && self.condition_value(rest, "elif", at);

                    self.conditions.push(Condition {
                        taken,
                        taken_any: condition.taken_any || taken,
                        ..condition
                    });
                }
            },

            "else" => match self.conditions.last().map(|c| c.saw_else) {
                None | Some(true) => self.report(PreprocessorError::DanglingBranch("else"), at),

                Some(false) => {
                    let condition = self.conditions.last_mut().unwrap();
                    condition.taken = condition.parent_active && !condition.taken_any;
                    condition.taken_any = true;
                    condition.saw_else = true;
                }
            },

            "endif" => {
                if self.conditions.pop().is_none() {
                    self.report(PreprocessorError::DanglingEndif, at);
                }
            }

            "pragma" if self.active() => self.pragmas.push(rest.to_string()),

            "error" if self.active() => {
                self.report(PreprocessorError::UserError(rest.to_string()), at)
            }

            // Directivas conocidas en rama inactiva: se ignoran
            "define" | "undef" | "include" | "pragma" | "error" => (),

            unknown if self.active() => {
                self.report(PreprocessorError::UnknownDirective(unknown.to_string()), at)
            }

            _ => (),
        }
    }

    fn push_condition(&mut self, at: Position, parent_active: bool, taken: bool) {
        self.conditions.push(Condition {
            opened_at: at,
            parent_active,
            taken,
            taken_any: taken,
            saw_else: false,
        });
    }

    /// Evalúa la expresión de un `#if`/`#elif` activo.
    fn condition_value(&mut self, expr: &str, directive: &'static str, at: Position) -> bool {
        if expr.is_empty() {
            self.report(PreprocessorError::MalformedDirective(directive), at);
            return false;
        }

        match self.eval_condition(expr) {
            Ok(value) => value != 0,
            Err(error) => {
                // Ante un error de evaluación la rama no se toma
                self.report(error, at);
                false
            }
        }
    }

    /// Registra una definición de macro.
    fn define(&mut self, rest: &str, at: Position) {
        let name = leading_identifier(rest);
        if name.is_empty() {
            self.report(PreprocessorError::MalformedDirective("define"), at);
            return;
        }

        // Un comentario de línea no forma parte del cuerpo
        let after = &rest[name.len()..];
        let after = match after.find("//") {
            Some(comment) => &after[..comment],
            None => after,
        };

        // Una macro es tipo función solo si `(` sigue al nombre
        // sin espacios de por medio
        if let Some(params) = after.strip_prefix('(') {
            let close = match params.find(')') {
                None => {
                    self.report(PreprocessorError::MalformedDirective("define"), at);
                    return;
                }

                Some(close) => close,
            };

            let list = &params[..close];
            let body = params[close + 1..].trim().to_string();

            let params: Vec<String> = if list.trim().is_empty() {
                Vec::new()
            } else {
                list.split(',').map(|p| p.trim().to_string()).collect()
            };

            if params
                .iter()
                .any(|p| p.is_empty() || leading_identifier(p).len() != p.len())
            {
                self.report(PreprocessorError::MalformedDirective("define"), at);
                return;
            }

            self.macros.insert(
                name.to_string(),
                Macro {
                    params: Some(params),
                    body,
                },
            );
        } else {
            self.macros.insert(
                name.to_string(),
                Macro {
                    params: None,
                    body: after.trim().to_string(),
                },
            );
        }
    }

    /// Resuelve un `#include` contra el registro de bibliotecas.
    fn include(&mut self, rest: &str, at: Position) {
        let header = if let Some(inner) = rest.strip_prefix('<') {
            inner.find('>').map(|end| &inner[..end])
        } else if let Some(inner) = rest.strip_prefix('"') {
            inner.find('"').map(|end| &inner[..end])
        } else {
            None
        };

        match header {
            None => self.report(PreprocessorError::MalformedDirective("include"), at),
            Some(header) => match self.registry.match_include(header) {
                Some(library) => {
                    self.activated.insert(library.to_string());
                }

                None => {
                    log::debug!("dropping include with no registered library: {}", header);
                }
            },
        }
    }

    /// Expande macros en un texto hasta un punto fijo.
    fn expand(&self, text: &str) -> String {
        let mut current = text.to_string();
        for _ in 0..MACRO_DEPTH {
            let (next, changed) = self.expand_once(&current);
            current = next;
            if !changed {
                break;
            }
        }

        current
    }

    /// Una pasada de expansión sobre el texto.
    ///
    /// Las literales de cadena y de carácter se copian intactas,
    /// igual que los comentarios de línea.
    fn expand_once(&self, text: &str) -> (String, bool) {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut changed = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            match c {
                '"' | '\'' => {
                    i = copy_literal(&chars, i, &mut out);
                }

                '/' if chars.get(i + 1) == Some(&'/') => {
                    out.extend(&chars[i..]);
                    break;
                }

                c if c.is_ascii_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }

                    let word: String = chars[start..i].iter().collect();
                    match self.macros.get(&word) {
                        Some(Macro { params: None, body }) => {
                            out.push_str(body);
                            changed = true;
                        }

                        Some(Macro {
                            params: Some(params),
                            body,
                        }) => {
                            // La invocación requiere `(`; sin ella el
                            // identificador se copia tal cual
                            let mut j = i;
                            while j < chars.len() && chars[j].is_whitespace() {
                                j += 1;
                            }

                            if chars.get(j) == Some(&'(') {
                                match parse_arguments(&chars, j) {
                                    Some((args, end)) => {
                                        if args.len() != params.len() {
                                            log::warn!(
                                                "macro `{}` invoked with {} arguments, expected {}",
                                                word,
                                                args.len(),
                                                params.len()
                                            );
                                        }

                                        out.push_str(&substitute(body, params, &args));
                                        changed = true;
                                        i = end;
                                    }

                                    None => out.push_str(&word),
                                }
                            } else {
                                out.push_str(&word);
                            }
                        }

                        None => out.push_str(&word),
                    }
                }

                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        (out, changed)
    }

    /// Evalúa una expresión condicional en el dominio `i64`.
    ///
    /// `defined` se resuelve antes de expandir macros, como exige
    /// el estándar; después de la expansión, todo identificador
    /// restante evalúa a cero.
    fn eval_condition(&self, expr: &str) -> Result<i64, PreprocessorError> {
        let resolved = self.resolve_defined(expr);
        let expanded = self.expand(&resolved);

        let (tokens, errors) = lex::tokenize(&expanded);
        if let Some(error) = errors.into_iter().next() {
            return Err(PreprocessorError::BadExpression(
                error.into_inner().to_string(),
            ));
        }

        let mut eval = CondEval { tokens, cursor: 0 };
        let value = eval.ternary()?;

        if eval.cursor != eval.tokens.len() {
            return Err(PreprocessorError::BadExpression(format!(
                "unexpected {}",
                eval.tokens[eval.cursor].val()
            )));
        }

        Ok(value)
    }

    /// Sustituye `defined(X)` y `defined X` por `1` o `0`.
    fn resolve_defined(&self, expr: &str) -> String {
        let chars: Vec<char> = expr.chars().collect();
        let mut out = String::with_capacity(expr.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }

                let word: String = chars[start..i].iter().collect();
                if word != "defined" {
                    out.push_str(&word);
                    continue;
                }

                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }

                let parenthesized = chars.get(i) == Some(&'(');
                if parenthesized {
                    i += 1;
                    while i < chars.len() && chars[i].is_whitespace() {
                        i += 1;
                    }
                }

                let id_start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }

                let id: String = chars[id_start..i].iter().collect();
                if parenthesized {
                    while i < chars.len() && chars[i].is_whitespace() {
                        i += 1;
                    }

                    if chars.get(i) == Some(&')') {
                        i += 1;
                    }
                }

                out.push(if self.macros.contains_key(&id) { '1' } else { '0' });
            } else {
                out.push(c);
                i += 1;
            }
        }

        out
    }
}

/// Copia una literal de cadena o carácter sin interpretarla.
fn copy_literal(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push(quote);

    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;

        if c == '\\' && i < chars.len() {
            out.push(chars[i]);
            i += 1;
        } else if c == quote {
            break;
        }
    }

    i
}

/// Separa los argumentos de una invocación de macro tipo función.
///
/// `open` señala el `(` inicial. Retorna los argumentos y el
/// índice tras el `)` de cierre, o `None` si los paréntesis no
/// balancean dentro de la línea.
fn parse_arguments(chars: &[char], open: usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1;
    let mut i = open + 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let mut literal = String::new();
                let end = copy_literal(chars, i, &mut literal);
                current.push_str(&literal);
                i = end;
                continue;
            }

            '(' => {
                depth += 1;
                current.push(c);
            }

            ')' => {
                depth -= 1;
                if depth == 0 {
                    if !current.trim().is_empty() || !args.is_empty() {
                        args.push(current.trim().to_string());
                    }

                    return Some((args, i + 1));
                }

                current.push(c);
            }

            ',' if depth == 1 => {
                args.push(current.trim().to_string());
                current = String::new();
            }

            c => current.push(c),
        }

        i += 1;
    }

    None
}

/// Reemplaza parámetros formales dentro del cuerpo de una macro.
fn substitute(body: &str, params: &[String], args: &[String]) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            i = copy_literal(&chars, i, &mut out);
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }

            let word: String = chars[start..i].iter().collect();
            match params.iter().position(|p| *p == word) {
                Some(index) => out.push_str(args.get(index).map(String::as_str).unwrap_or("")),
                None => out.push_str(&word),
            }
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

fn leading_identifier(text: &str) -> &str {
    let end = text
        .char_indices()
        .find(|&(i, c)| {
            let valid = c.is_ascii_alphanumeric() || c == '_';
            let leading_digit = i == 0 && c.is_ascii_digit();
            !valid || leading_digit
        })
        .map(|(i, _)| i)
        .unwrap_or_else(|| text.len());

    &text[..end]
}

/// Evaluador de expresiones condicionales.
///
/// Gramática C de `#if`: ternario, lógicos con cortocircuito de
/// valor, bit a bit, relacionales, corrimientos y aritmética, todo
/// sobre enteros de 64 bits con signo.
struct CondEval {
    tokens: Vec<Located<Token>>,
    cursor: usize,
}

type Eval = Result<i64, PreprocessorError>;

impl CondEval {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(Located::val)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|t| t.val().clone());
        if token.is_some() {
            self.cursor += 1;
        }

        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        match self.peek() {
            Some(found) if found == token => {
                self.cursor += 1;
                true
            }

            _ => false,
        }
    }

    fn ternary(&mut self) -> Eval {
        let condition = self.logical_or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }

        let consequent = self.ternary()?;
        if !self.eat(&Token::Colon) {
            return Err(PreprocessorError::BadExpression(
                "expected `:` in conditional".to_string(),
            ));
        }

        let alternate = self.ternary()?;
        Ok(if condition != 0 { consequent } else { alternate })
    }

    fn logical_or(&mut self) -> Eval {
        let mut value = self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.logical_and()?;
            value = ((value != 0) || (rhs != 0)) as i64;
        }

        Ok(value)
    }

    fn logical_and(&mut self) -> Eval {
        let mut value = self.bit_or()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.bit_or()?;
            value = ((value != 0) && (rhs != 0)) as i64;
        }

        Ok(value)
    }

    fn bit_or(&mut self) -> Eval {
        let mut value = self.bit_xor()?;
        while self.eat(&Token::Pipe) {
            value |= self.bit_xor()?;
        }

        Ok(value)
    }

    fn bit_xor(&mut self) -> Eval {
        let mut value = self.bit_and()?;
        while self.eat(&Token::Caret) {
            value ^= self.bit_and()?;
        }

        Ok(value)
    }

    fn bit_and(&mut self) -> Eval {
        let mut value = self.equality()?;
        while self.eat(&Token::Amp) {
            value &= self.equality()?;
        }

        Ok(value)
    }

    fn equality(&mut self) -> Eval {
        let mut value = self.relational()?;
        loop {
            if self.eat(&Token::Eq) {
                value = (value == self.relational()?) as i64;
            } else if self.eat(&Token::Ne) {
                value = (value != self.relational()?) as i64;
            } else {
                return Ok(value);
            }
        }
    }

    fn relational(&mut self) -> Eval {
        let mut value = self.shift()?;
        loop {
            if self.eat(&Token::Lt) {
                value = (value < self.shift()?) as i64;
            } else if self.eat(&Token::Le) {
                value = (value <= self.shift()?) as i64;
            } else if self.eat(&Token::Gt) {
                value = (value > self.shift()?) as i64;
            } else if self.eat(&Token::Ge) {
                value = (value >= self.shift()?) as i64;
            } else {
                return Ok(value);
            }
        }
    }

    fn shift(&mut self) -> Eval {
        let mut value = self.additive()?;
        loop {
            if self.eat(&Token::Shl) {
                value = value.wrapping_shl(self.additive()? as u32);
            } else if self.eat(&Token::Shr) {
                value = value.wrapping_shr(self.additive()? as u32);
            } else {
                return Ok(value);
            }
        }
    }

    fn additive(&mut self) -> Eval {
        let mut value = self.multiplicative()?;
        loop {
            if self.eat(&Token::Plus) {
                value = value.wrapping_add(self.multiplicative()?);
            } else if self.eat(&Token::Minus) {
                value = value.wrapping_sub(self.multiplicative()?);
            } else {
                return Ok(value);
            }
        }
    }

    fn multiplicative(&mut self) -> Eval {
        let mut value = self.unary()?;
        loop {
            let division = if self.eat(&Token::Star) {
                value = value.wrapping_mul(self.unary()?);
                continue;
            } else if self.eat(&Token::Slash) {
                true
            } else if self.eat(&Token::Percent) {
                false
            } else {
                return Ok(value);
            };

            let divisor = self.unary()?;
            if divisor == 0 {
                return Err(PreprocessorError::BadExpression(
                    "division by zero".to_string(),
                ));
            }

            value = if division {
                value.wrapping_div(divisor)
            } else {
                value.wrapping_rem(divisor)
            };
        }
    }

    fn unary(&mut self) -> Eval {
        if self.eat(&Token::Not) {
            Ok((self.unary()? == 0) as i64)
        } else if self.eat(&Token::Minus) {
            Ok(self.unary()?.wrapping_neg())
        } else if self.eat(&Token::Plus) {
            self.unary()
        } else if self.eat(&Token::Tilde) {
            Ok(!self.unary()?)
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Eval {
        use crate::lex::Keyword;

        match self.bump() {
            Some(Token::Int { value, .. }) => Ok(value),
            Some(Token::UInt { value, .. }) => Ok(value as i64),
            Some(Token::Char(c)) => Ok(c as i64),
            Some(Token::Keyword(Keyword::True)) => Ok(1),
            Some(Token::Keyword(Keyword::False)) => Ok(0),

            // Identificadores no definidos evalúan a cero
            Some(Token::Id(_)) | Some(Token::Keyword(_)) => Ok(0),

            Some(Token::OpenParen) => {
                let value = self.ternary()?;
                if self.eat(&Token::CloseParen) {
                    Ok(value)
                } else {
                    Err(PreprocessorError::BadExpression(
                        "expected `)`".to_string(),
                    ))
                }
            }

            Some(token) => Err(PreprocessorError::BadExpression(format!(
                "unexpected {}",
                token
            ))),

            None => Err(PreprocessorError::BadExpression(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

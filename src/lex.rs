//! Análisis léxico.
//!
//! # Tokenization
//! Esta fase descompone el texto ya preprocesado en unidades
//! léxicas denominadas tokens. Los espacios en blanco y los
//! comentarios se descartan durante esta operación. Cada token
//! emitido está asociado a la posición en el código fuente donde
//! inicia, lo cual permite rastrear errores tanto en los tokens
//! como en constructos más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el
//! hecho de lo que son y no incluyen lexemas. Los identificadores
//! sí incluyen su lexema original. Las constantes literales se
//! resuelven a sus valores en vez de preservar sus lexemas; los
//! sufijos de enteros (`u`, `l`) y de flotantes (`f`) se reducen
//! a banderas sobre el valor resuelto.
//!
//! # Errores
//! El lexer se recupera de toda condición de error: el texto
//! ofensivo se descarta y el escaneo continúa en el siguiente
//! carácter razonable. De esta forma el parser siempre recibe un
//! flujo de tokens, posiblemente incompleto, y los errores léxicos
//! se reportan como diagnósticos aparte.

use crate::source::{self, Located, Position};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow")]
    IntOverflow,

    /// Constante numérica que no puede interpretarse.
    #[error("Malformed numeric literal `{0}`")]
    BadNumber(String),

    /// Secuencia de escape desconocida.
    #[error("Unknown escape sequence `\\{0}`")]
    BadEscape(char),

    /// Literal de cadena sin terminar.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Literal de carácter sin terminar o vacío.
    #[error("Unterminated character literal")]
    UnterminatedChar,

    /// Comentario de bloque sin terminar.
    #[error("Unterminated block comment")]
    UnterminatedComment,
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir
/// completamente a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identificador.
    Id(String),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero con signo.
    Int { value: i64, long: bool },

    /// Literal de entero sin signo (sufijo `u`).
    UInt { value: u64, long: bool },

    /// Literal de punto flotante. `single` indica sufijo `f`.
    Float { value: f64, single: bool },

    /// Literal de carácter.
    Char(char),

    /// Literal de cadena.
    Str(String),

    /// `=`
    Assign,

    /// `+=`
    PlusAssign,

    /// `-=`
    MinusAssign,

    /// `*=`
    StarAssign,

    /// `/=`
    SlashAssign,

    /// `%=`
    PercentAssign,

    /// `&=`
    AmpAssign,

    /// `|=`
    PipeAssign,

    /// `^=`
    CaretAssign,

    /// `<<=`
    ShlAssign,

    /// `>>=`
    ShrAssign,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Star,

    /// `/`
    Slash,

    /// `%`
    Percent,

    /// `++`
    PlusPlus,

    /// `--`
    MinusMinus,

    /// `==`
    Eq,

    /// `!=`
    Ne,

    /// `<`
    Lt,

    /// `>`
    Gt,

    /// `<=`
    Le,

    /// `>=`
    Ge,

    /// `&&`
    AndAnd,

    /// `||`
    OrOr,

    /// `!`
    Not,

    /// `&`
    Amp,

    /// `|`
    Pipe,

    /// `^`
    Caret,

    /// `~`
    Tilde,

    /// `<<`
    Shl,

    /// `>>`
    Shr,

    /// `?`
    Question,

    /// `:`
    Colon,

    /// `::`
    ColonColon,

    /// `;`
    Semicolon,

    /// `,`
    Comma,

    /// `.`
    Period,

    /// `->`
    Arrow,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenBracket,

    /// `]`
    CloseBracket,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            Int { value, .. } => write!(fmt, "literal `{}`", value),
            UInt { value, .. } => write!(fmt, "literal `{}`", value),
            Float { value, .. } => write!(fmt, "literal `{}`", value),
            Char(c) => write!(fmt, "literal {:?}", c),
            Str(s) => write!(fmt, "literal {:?}", s),
            Assign => fmt.write_str("`=`"),
            PlusAssign => fmt.write_str("`+=`"),
            MinusAssign => fmt.write_str("`-=`"),
            StarAssign => fmt.write_str("`*=`"),
            SlashAssign => fmt.write_str("`/=`"),
            PercentAssign => fmt.write_str("`%=`"),
            AmpAssign => fmt.write_str("`&=`"),
            PipeAssign => fmt.write_str("`|=`"),
            CaretAssign => fmt.write_str("`^=`"),
            ShlAssign => fmt.write_str("`<<=`"),
            ShrAssign => fmt.write_str("`>>=`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Star => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Percent => fmt.write_str("`%`"),
            PlusPlus => fmt.write_str("`++`"),
            MinusMinus => fmt.write_str("`--`"),
            Eq => fmt.write_str("`==`"),
            Ne => fmt.write_str("`!=`"),
            Lt => fmt.write_str("`<`"),
            Gt => fmt.write_str("`>`"),
            Le => fmt.write_str("`<=`"),
            Ge => fmt.write_str("`>=`"),
            AndAnd => fmt.write_str("`&&`"),
            OrOr => fmt.write_str("`||`"),
            Not => fmt.write_str("`!`"),
            Amp => fmt.write_str("`&`"),
            Pipe => fmt.write_str("`|`"),
            Caret => fmt.write_str("`^`"),
            Tilde => fmt.write_str("`~`"),
            Shl => fmt.write_str("`<<`"),
            Shr => fmt.write_str("`>>`"),
            Question => fmt.write_str("`?`"),
            Colon => fmt.write_str("`:`"),
            ColonColon => fmt.write_str("`::`"),
            Semicolon => fmt.write_str("`;`"),
            Comma => fmt.write_str("`,`"),
            Period => fmt.write_str("`.`"),
            Arrow => fmt.write_str("`->`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            OpenBracket => fmt.write_str("`[`"),
            CloseBracket => fmt.write_str("`]`"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Void,
    Bool,
    Boolean,
    Char,
    Byte,
    Word,
    Int,
    Short,
    Long,
    Float,
    Double,
    Unsigned,
    Signed,
    Const,
    Static,
    Volatile,
    Struct,
    Enum,
    Typedef,
    Template,
    Typename,
    Class,
    Sizeof,
    Auto,
    True,
    False,
}

/// Tabla de palabras clave reconocidas.
///
/// A diferencia de los identificadores de usuario, las palabras
/// clave son sensibles a mayúsculas, igual que en C++.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("do", Keyword::Do),
    ("for", Keyword::For),
    ("switch", Keyword::Switch),
    ("case", Keyword::Case),
    ("default", Keyword::Default),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("return", Keyword::Return),
    ("void", Keyword::Void),
    ("bool", Keyword::Bool),
    ("boolean", Keyword::Boolean),
    ("char", Keyword::Char),
    ("byte", Keyword::Byte),
    ("word", Keyword::Word),
    ("int", Keyword::Int),
    ("short", Keyword::Short),
    ("long", Keyword::Long),
    ("float", Keyword::Float),
    ("double", Keyword::Double),
    ("unsigned", Keyword::Unsigned),
    ("signed", Keyword::Signed),
    ("const", Keyword::Const),
    ("static", Keyword::Static),
    ("volatile", Keyword::Volatile),
    ("struct", Keyword::Struct),
    ("enum", Keyword::Enum),
    ("typedef", Keyword::Typedef),
    ("template", Keyword::Template),
    ("typename", Keyword::Typename),
    ("class", Keyword::Class),
    ("sizeof", Keyword::Sizeof),
    ("auto", Keyword::Auto),
    ("true", Keyword::True),
    ("false", Keyword::False),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, _) = KEYWORDS
            .iter()
            .find(|&&(_, keyword)| keyword == *self)
            .expect("keyword missing from table");

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Analizador léxico sobre un flujo de caracteres con posiciones.
pub struct Lexer<'a> {
    source: Peekable<source::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    /// Crea un lexer en estado inicial a partir de un texto.
    pub fn new(code: &'a str) -> Self {
        Lexer {
            source: source::chars(code).peekable(),
        }
    }

    /// Reduce todo el flujo, separando tokens de errores.
    ///
    /// Los errores no detienen el escaneo; el texto irrecuperable
    /// se descarta y la tokenización continúa, de manera que un
    /// programa con errores léxicos aislados todavía produce un
    /// flujo de tokens utilizable por fases posteriores.
    pub fn exhaustive(self) -> (Vec<Located<Token>>, Vec<Located<LexerError>>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        for result in self {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => errors.push(error),
            }
        }

        (tokens, errors)
    }

    fn bump(&mut self) -> Option<(char, Position)> {
        self.source.next()
    }

    fn peek(&mut self) -> Option<char> {
        self.source.peek().map(|&(c, _)| c)
    }

    /// Consume el siguiente carácter si es exactamente `expected`.
    fn eat(&mut self, expected: char) -> bool {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                true
            }

            _ => false,
        }
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Position)>, Located<LexerError>> {
        use Token::*;

        loop {
            let (c, start) = match self.bump() {
                None => return Ok(None),
                Some(next) => next,
            };

            let token = match c {
                c if c.is_whitespace() => continue,

                '/' if self.eat('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }

                        self.bump();
                    }

                    continue;
                }

                '/' if self.eat('*') => {
                    self.block_comment(start)?;
                    continue;
                }

                '/' if self.eat('=') => SlashAssign,
                '/' => Slash,

                '+' if self.eat('+') => PlusPlus,
                '+' if self.eat('=') => PlusAssign,
                '+' => Plus,

                '-' if self.eat('-') => MinusMinus,
                '-' if self.eat('=') => MinusAssign,
                '-' if self.eat('>') => Arrow,
                '-' => Minus,

                '*' if self.eat('=') => StarAssign,
                '*' => Star,

                '%' if self.eat('=') => PercentAssign,
                '%' => Percent,

                '=' if self.eat('=') => Eq,
                '=' => Assign,

                '!' if self.eat('=') => Ne,
                '!' => Not,

                '<' if self.eat('<') => {
                    if self.eat('=') {
                        ShlAssign
                    } else {
                        Shl
                    }
                }
                '<' if self.eat('=') => Le,
                '<' => Lt,

                '>' if self.eat('>') => {
                    if self.eat('=') {
                        ShrAssign
                    } else {
                        Shr
                    }
                }
                '>' if self.eat('=') => Ge,
                '>' => Gt,

                '&' if self.eat('&') => AndAnd,
                '&' if self.eat('=') => AmpAssign,
                '&' => Amp,

                '|' if self.eat('|') => OrOr,
                '|' if self.eat('=') => PipeAssign,
                '|' => Pipe,

                '^' if self.eat('=') => CaretAssign,
                '^' => Caret,

                '~' => Tilde,
                '?' => Question,

                ':' if self.eat(':') => ColonColon,
                ':' => Colon,

                ';' => Semicolon,
                ',' => Comma,
                '.' => Period,
                '(' => OpenParen,
                ')' => CloseParen,
                '{' => OpenCurly,
                '}' => CloseCurly,
                '[' => OpenBracket,
                ']' => CloseBracket,

                '"' => self.string(start)?,
                '\'' => self.character(start)?,

                c if c.is_ascii_digit() => self.number(c, start)?,

                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut word = c.to_string();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            word.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }

                    match self::Keyword::from_str(&word) {
                        Ok(keyword) => Keyword(keyword),
                        Err(()) => Id(word),
                    }
                }

                c => return Err(Located::at(LexerError::BadChar(c), start)),
            };

            return Ok(Some((token, start)));
        }
    }

    /// Descarta un comentario de bloque `/* ... */`.
    fn block_comment(&mut self, start: Position) -> Result<(), Located<LexerError>> {
        loop {
            match self.bump() {
                None => return Err(Located::at(LexerError::UnterminatedComment, start)),
                Some(('*', _)) if self.eat('/') => return Ok(()),
                Some(_) => (),
            }
        }
    }

    /// Escanea una literal de cadena, resolviendo escapes.
    fn string(&mut self, start: Position) -> Result<Token, Located<LexerError>> {
        let mut contents = String::new();
        loop {
            match self.bump() {
                None | Some(('\n', _)) => {
                    return Err(Located::at(LexerError::UnterminatedString, start))
                }

                Some(('"', _)) => return Ok(Token::Str(contents)),
                Some(('\\', position)) => contents.push(self.escape(position)?),
                Some((c, _)) => contents.push(c),
            }
        }
    }

    /// Escanea una literal de carácter.
    fn character(&mut self, start: Position) -> Result<Token, Located<LexerError>> {
        let c = match self.bump() {
            None | Some(('\'', _)) | Some(('\n', _)) => {
                return Err(Located::at(LexerError::UnterminatedChar, start))
            }

            Some(('\\', position)) => self.escape(position)?,
            Some((c, _)) => c,
        };

        if self.eat('\'') {
            Ok(Token::Char(c))
        } else {
            Err(Located::at(LexerError::UnterminatedChar, start))
        }
    }

    /// Resuelve una secuencia de escape, con `\` ya consumido.
    fn escape(&mut self, position: Position) -> Result<char, Located<LexerError>> {
        let c = match self.bump() {
            None => return Err(Located::at(LexerError::UnterminatedString, position)),
            Some((c, _)) => c,
        };

        let resolved = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',

            'x' => {
                let mut code = 0u32;
                let mut digits = 0;
                while let Some(c) = self.peek() {
                    match c.to_digit(16) {
                        Some(digit) if digits < 2 => {
                            code = code * 16 + digit;
                            digits += 1;
                            self.bump();
                        }

                        _ => break,
                    }
                }

                if digits == 0 {
                    return Err(Located::at(LexerError::BadEscape('x'), position));
                }

                (code as u8) as char
            }

            c => return Err(Located::at(LexerError::BadEscape(c), position)),
        };

        Ok(resolved)
    }

    /// Escanea una constante numérica en cualquiera de las bases
    /// y notaciones del lenguaje.
    fn number(&mut self, first: char, start: Position) -> Result<Token, Located<LexerError>> {
        let mut text = first.to_string();

        // Se acumula el lexema completo, incluyendo sufijos y
        // exponentes con signo, y se clasifica al final
        while let Some(c) = self.peek() {
            let significant = c.is_ascii_alphanumeric() || c == '.' || c == '_';
            let exponent_sign = (c == '+' || c == '-')
                && matches!(text.chars().last(), Some('e') | Some('E'))
                && !text.starts_with("0x")
                && !text.starts_with("0X");

            if significant || exponent_sign {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        classify_number(&text).map_err(|error| Located::at(error, start))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, start))) => Some(Ok(Located::at(token, start))),
            Err(error) => Some(Err(error)),
        }
    }
}

/// Tokeniza un texto completo, recuperándose de errores léxicos.
pub fn tokenize(code: &str) -> (Vec<Located<Token>>, Vec<Located<LexerError>>) {
    Lexer::new(code).exhaustive()
}

/// Interpreta el lexema completo de una constante numérica.
fn classify_number(text: &str) -> Result<Token, LexerError> {
    // Los sufijos se despegan antes de interpretar el resto
    let mut body = text;
    let mut unsigned = false;
    let mut long = false;
    let mut single = false;

    loop {
        let lower = body
            .chars()
            .last()
            .map(|c| c.to_ascii_lowercase());

        match lower {
            Some('u') => unsigned = true,
            Some('l') => long = true,
            // `f` es sufijo solo en decimales no hexadecimales
            Some('f') if !has_hex_prefix(body) && is_float_body(trim_last(body)) => single = true,
            _ => break,
        }

        body = trim_last(body);
    }

    let bad = || LexerError::BadNumber(text.to_string());

    if !has_hex_prefix(body) && is_float_body(body) {
        let value: f64 = body.replace('_', "").parse().map_err(|_| bad())?;
        return Ok(Token::Float { value, single });
    }

    let digits = body.replace('_', "");
    let (radix, digits) = if has_hex_prefix(&digits) {
        (16, &digits[2..])
    } else if digits.starts_with("0b") || digits.starts_with("0B") {
        (2, &digits[2..])
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits.as_str())
    };

    if digits.is_empty() {
        return Err(bad());
    }

    let value = u64::from_str_radix(digits, radix).map_err(|error| {
        use std::num::IntErrorKind;

        match error.kind() {
            IntErrorKind::PosOverflow => LexerError::IntOverflow,
            _ => bad(),
        }
    })?;

    if unsigned {
        Ok(Token::UInt { value, long })
    } else if value <= i64::MAX as u64 {
        Ok(Token::Int {
            value: value as i64,
            long,
        })
    } else {
        Err(LexerError::IntOverflow)
    }
}

fn has_hex_prefix(text: &str) -> bool {
    text.starts_with("0x") || text.starts_with("0X")
}

/// Determina si un lexema sin sufijos es de punto flotante.
fn is_float_body(body: &str) -> bool {
    body.contains('.') || body.contains('e') || body.contains('E')
}

fn trim_last(text: &str) -> &str {
    let mut chars = text.chars();
    chars.next_back();
    chars.as_str()
}

//! Análisis sintáctico.
//!
//! Parser de descenso recursivo para el subconjunto de C++ que se
//! escribe en sketches de Arduino: declaraciones con inicializador,
//! funciones, `struct`, `enum`, `typedef`, plantillas de un
//! parámetro, el repertorio completo de sentencias de control y la
//! precedencia estándar de expresiones.
//!
//! # Totalidad
//! El parser nunca falla hacia afuera: ante un error se emite un
//! nodo [`NodeKind::Error`] con el mensaje y la posición, se
//! resincroniza hasta el siguiente `;` o la llave de cierre
//! balanceada, y el análisis continúa. El resultado siempre es un
//! nodo `Program`, posiblemente con subárboles de error.
//!
//! # Detección de declaraciones
//! La gramática de C++ es ambigua entre declaración y expresión.
//! La desambiguación se hace por nombre de tipo: el parser mantiene
//! un conjunto de nombres conocidos, sembrado con los tipos
//! primitivos y las clases del registro de bibliotecas, y alimentado
//! por cada `struct`, `enum` y `typedef` que el propio análisis
//! define.

use std::collections::HashSet;
use thiserror::Error;

use crate::{
    ast::{BinOp, Node, NodeKind, UnOp, Value},
    lex::{Keyword, Token},
    source::{Located, Position},
};

/// Error de análisis sintáctico.
///
/// Estos errores no escapan del parser: se convierten en nodos de
/// error dentro del árbol.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected a type name")]
    ExpectedType,

    #[error("Expected expression, found {0}")]
    ExpectedExpr(Token),

    #[error("Expected statement, found {0}")]
    ExpectedStatement(Token),

    #[error("Invalid declarator")]
    BadDeclarator,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Tipos primitivos que se nombran con identificadores.
const BUILTIN_TYPE_NAMES: &[&str] = &[
    "String", "size_t", "int8_t", "int16_t", "int32_t", "int64_t", "uint8_t", "uint16_t",
    "uint32_t", "uint64_t",
];

/// Analiza un flujo de tokens completo.
///
/// `class_types` siembra la tabla de nombres de tipo con las clases
/// del registro de bibliotecas activas en esta corrida.
pub fn parse<'a, C>(tokens: Vec<Located<Token>>, class_types: C) -> Node
where
    C: IntoIterator<Item = &'a str>,
{
    let mut types: HashSet<String> = BUILTIN_TYPE_NAMES.iter().map(|s| s.to_string()).collect();
    types.extend(class_types.into_iter().map(|s| s.to_string()));

    let mut parser = Parser {
        tokens,
        cursor: 0,
        types,
        last: Position::default(),
    };

    parser.program()
}

type Parse<T> = Result<T, Located<ParserError>>;

struct Parser {
    tokens: Vec<Located<Token>>,
    cursor: usize,
    types: HashSet<String>,
    last: Position,
}

impl Parser {
    // ===== infraestructura de flujo =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(Located::val)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + ahead).map(Located::val)
    }

    /// Posición del token actual, o la última conocida al final.
    fn position(&self) -> Position {
        self.tokens
            .get(self.cursor)
            .map(|token| token.position())
            .unwrap_or(self.last)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        match token {
            None => None,
            Some(token) => {
                self.last = token.position();
                self.cursor += 1;
                Some(token.into_inner())
            }
        }
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.peek() {
            Some(found) if *found == token => {
                self.bump();
                Ok(())
            }

            Some(found) => {
                let found = found.clone();
                self.fail(ParserError::UnexpectedToken(token, found))
            }

            None => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn identifier(&mut self) -> Parse<String> {
        match self.peek() {
            Some(Token::Id(id)) => {
                let id = id.clone();
                self.bump();
                Ok(id)
            }

            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.position()))
    }

    // ===== recuperación =====

    /// Convierte un error en nodo y resincroniza el flujo.
    fn recover(&mut self, error: Located<ParserError>) -> Node {
        let (pos, error) = error.split();
        let node = Node::error(error.to_string(), pos);
        self.synchronize();
        node
    }

    /// Salta hasta el siguiente `;` al nivel actual o hasta que la
    /// llave de cierre del bloque actual quede a la vista.
    fn synchronize(&mut self) {
        let mut depth = 0usize;

        while let Some(token) = self.peek() {
            match token {
                Token::Semicolon if depth == 0 => {
                    self.bump();
                    return;
                }

                Token::CloseCurly if depth == 0 => return,

                Token::OpenCurly => {
                    depth += 1;
                    self.bump();
                }

                Token::CloseCurly => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return;
                    }
                }

                _ => {
                    self.bump();
                }
            }
        }
    }

    // ===== unidad de traducción =====

    fn program(&mut self) -> Node {
        let mut items = Vec::new();

        while !self.at_end() {
            let start = self.cursor;
            match self.top_level() {
                Ok(mut nodes) => items.append(&mut nodes),
                Err(error) => {
                    items.push(self.recover(error));
                }
            }

            // Garantía de progreso ante errores irrecuperables
            if self.cursor == start {
                self.bump();
            }
        }

        Node::new(NodeKind::Program(items), Position::default())
    }

    fn top_level(&mut self) -> Parse<Vec<Node>> {
        match self.peek() {
            None => Ok(Vec::new()),

            Some(Token::Semicolon) => {
                self.bump();
                Ok(Vec::new())
            }

            Some(Token::Keyword(Keyword::Typedef)) => Ok(vec![self.typedef()?]),
            Some(Token::Keyword(Keyword::Template)) => Ok(vec![self.template()?]),
            Some(Token::Keyword(Keyword::Enum)) => Ok(vec![self.enum_decl()?]),

            Some(Token::Keyword(Keyword::Struct)) | Some(Token::Keyword(Keyword::Class))
                if matches!(self.peek_at(2), Some(Token::OpenCurly)) =>
            {
                Ok(vec![self.struct_decl()?])
            }

            _ => Ok(vec![self.declaration_or_function()?]),
        }
    }

    /// Declaración de variables o definición/prototipo de función,
    /// que comparten el prefijo `tipo identificador`.
    fn declaration_or_function(&mut self) -> Parse<Node> {
        let pos = self.position();
        let typ = self.type_name()?;

        // Declarador de puntero a función: `tipo (*nombre)(...)`
        if self.check(&Token::OpenParen) && self.peek_at(1) == Some(&Token::Star) {
            return self.function_pointer(typ, pos);
        }

        let name = self.identifier()?;

        if self.check(&Token::OpenParen) {
            self.function(typ, name, pos)
        } else {
            self.declarators(typ, name, pos)
        }
    }

    fn function(&mut self, return_type: Node, name: String, pos: Position) -> Parse<Node> {
        self.expect(Token::OpenParen)?;
        let params = self.parameters()?;
        self.expect(Token::CloseParen)?;

        if self.eat(&Token::Semicolon) {
            return Ok(Node::new(
                NodeKind::FuncDecl {
                    return_type: Box::new(return_type),
                    name,
                    params,
                },
                pos,
            ));
        }

        let body = self.compound()?;
        Ok(Node::new(
            NodeKind::FuncDef {
                return_type: Box::new(return_type),
                name,
                params,
                body: Box::new(body),
            },
            pos,
        ))
    }

    fn parameters(&mut self) -> Parse<Vec<Node>> {
        let mut params = Vec::new();

        if self.check(&Token::CloseParen) {
            return Ok(params);
        }

        // `(void)` equivale a lista vacía
        if self.check(&Token::Keyword(Keyword::Void))
            && self.peek_at(1) == Some(&Token::CloseParen)
        {
            self.bump();
            return Ok(params);
        }

        loop {
            let pos = self.position();
            let mut typ = self.type_name()?;

            let name = match self.peek() {
                Some(Token::Id(id)) => {
                    let id = id.clone();
                    self.bump();
                    id
                }

                // Parámetro sin nombre en un prototipo
                _ => String::new(),
            };

            // Un parámetro arreglo decae a puntero
            while self.eat(&Token::OpenBracket) {
                if !self.check(&Token::CloseBracket) {
                    self.expression()?;
                }

                self.expect(Token::CloseBracket)?;
                bump_pointer(&mut typ);
            }

            params.push(Node::new(
                NodeKind::Param {
                    typ: Box::new(typ),
                    name,
                },
                pos,
            ));

            if !self.eat(&Token::Comma) {
                return Ok(params);
            }
        }
    }

    /// Declaradores restantes de una declaración de variables, con
    /// el primer nombre ya consumido.
    fn declarators(&mut self, base: Node, first: String, pos: Position) -> Parse<Node> {
        let mut decls = vec![self.declarator(&base, first, pos)?];

        while self.eat(&Token::Comma) {
            let pos = self.position();
            let mut typ = base.clone();
            strip_pointer(&mut typ);

            while self.eat(&Token::Star) {
                bump_pointer(&mut typ);
            }

            let name = self.identifier()?;
            decls.push(self.declarator(&typ, name, pos)?);
        }

        self.expect(Token::Semicolon)?;

        if decls.len() == 1 {
            Ok(decls.pop().unwrap())
        } else {
            Ok(Node::new(NodeKind::DeclList(decls), pos))
        }
    }

    /// Un declarador individual: dimensiones, constructor o
    /// inicializador.
    fn declarator(&mut self, typ: &Node, name: String, pos: Position) -> Parse<Node> {
        let mut dimensions = Vec::new();
        while self.eat(&Token::OpenBracket) {
            if self.check(&Token::CloseBracket) {
                dimensions.push(Node::new(NodeKind::Empty, self.position()));
            } else {
                dimensions.push(self.expression()?);
            }

            self.expect(Token::CloseBracket)?;
        }

        let mut init = None;

        // Construcción directa: `Servo s(...)`; se registra como
        // una llamada al nombre del tipo
        if dimensions.is_empty() && self.check(&Token::OpenParen) {
            if let NodeKind::TypeNode { name: type_name, .. } = &typ.kind {
                let callee = Node::new(NodeKind::Identifier(type_name.clone()), pos);
                self.bump();
                let args = self.arguments()?;
                self.expect(Token::CloseParen)?;

                init = Some(Box::new(Node::new(
                    NodeKind::FuncCall {
                        callee: Box::new(callee),
                        args,
                    },
                    pos,
                )));
            }
        } else if self.eat(&Token::Assign) {
            init = Some(Box::new(self.initializer()?));
        }

        Ok(Node::new(
            NodeKind::VarDecl {
                typ: Box::new(typ.clone()),
                name,
                dimensions,
                init,
            },
            pos,
        ))
    }

    /// Inicializador: expresión de asignación o lista `{ ... }`.
    fn initializer(&mut self) -> Parse<Node> {
        if self.check(&Token::OpenCurly) {
            let pos = self.position();
            self.bump();

            let mut items = Vec::new();
            if !self.check(&Token::CloseCurly) {
                loop {
                    items.push(self.initializer()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }

                    // Coma final permitida
                    if self.check(&Token::CloseCurly) {
                        break;
                    }
                }
            }

            self.expect(Token::CloseCurly)?;
            Ok(Node::new(NodeKind::ArrayInit(items), pos))
        } else {
            self.assignment()
        }
    }

    /// Declarador `tipo (*nombre)(parámetros)`.
    fn function_pointer(&mut self, mut typ: Node, pos: Position) -> Parse<Node> {
        self.expect(Token::OpenParen)?;
        self.expect(Token::Star)?;
        bump_pointer(&mut typ);

        let name = self.identifier()?;
        self.expect(Token::CloseParen)?;

        self.expect(Token::OpenParen)?;
        self.parameters()?;
        self.expect(Token::CloseParen)?;

        let mut init = None;
        if self.eat(&Token::Assign) {
            init = Some(Box::new(self.assignment()?));
        }

        self.expect(Token::Semicolon)?;

        Ok(Node::new(
            NodeKind::VarDecl {
                typ: Box::new(typ),
                name,
                dimensions: Vec::new(),
                init,
            },
            pos,
        ))
    }

    fn typedef(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Typedef)?;

        let typ = self.type_name()?;
        let name = self.identifier()?;
        self.expect(Token::Semicolon)?;

        self.types.insert(name.clone());

        Ok(Node::new(
            NodeKind::Typedef {
                typ: Box::new(typ),
                name,
            },
            pos,
        ))
    }

    fn template(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Template)?;
        self.expect(Token::Lt)?;

        if !self.eat(&Token::Keyword(Keyword::Typename)) {
            self.keyword(Keyword::Class)?;
        }

        let param = self.identifier()?;
        self.expect(Token::Gt)?;

        // El parámetro formal actúa como tipo dentro de la
        // declaración subordinada
        let fresh = self.types.insert(param.clone());
        let decl = self.declaration_or_function()?;
        if fresh {
            self.types.remove(&param);
        }

        Ok(Node::new(
            NodeKind::TemplateDecl {
                param,
                decl: Box::new(decl),
            },
            pos,
        ))
    }

    fn struct_decl(&mut self) -> Parse<Node> {
        let pos = self.position();
        if !self.eat(&Token::Keyword(Keyword::Struct)) {
            self.keyword(Keyword::Class)?;
        }

        let name = self.identifier()?;
        self.types.insert(name.clone());

        self.expect(Token::OpenCurly)?;

        let mut fields = Vec::new();
        while !self.check(&Token::CloseCurly) && !self.at_end() {
            let pos = self.position();
            let typ = self.type_name()?;
            let first = self.identifier()?;
            fields.push(self.declarators(typ, first, pos)?);
        }

        self.expect(Token::CloseCurly)?;
        self.expect(Token::Semicolon)?;

        // Los campos multideclarador se aplanan
        let fields = fields
            .into_iter()
            .flat_map(|field| match field.kind {
                NodeKind::DeclList(decls) => decls,
                _ => vec![field],
            })
            .collect();

        Ok(Node::new(NodeKind::StructDecl { name, fields }, pos))
    }

    fn enum_decl(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Enum)?;

        let name = match self.peek() {
            Some(Token::Id(id)) => {
                let id = id.clone();
                self.bump();
                self.types.insert(id.clone());
                Some(id)
            }

            _ => None,
        };

        self.expect(Token::OpenCurly)?;

        let mut members = Vec::new();
        while !self.check(&Token::CloseCurly) && !self.at_end() {
            let pos = self.position();
            let member = self.identifier()?;

            let value = if self.eat(&Token::Assign) {
                Some(Box::new(self.ternary()?))
            } else {
                None
            };

            members.push(Node::new(NodeKind::EnumMember { name: member, value }, pos));

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect(Token::CloseCurly)?;
        self.expect(Token::Semicolon)?;

        Ok(Node::new(NodeKind::EnumDecl { name, members }, pos))
    }

    // ===== tipos =====

    /// Determina si el token actual puede iniciar un tipo.
    fn at_type(&self) -> bool {
        match self.peek() {
            Some(Token::Keyword(keyword)) => matches!(
                keyword,
                Keyword::Void
                    | Keyword::Bool
                    | Keyword::Boolean
                    | Keyword::Char
                    | Keyword::Byte
                    | Keyword::Word
                    | Keyword::Int
                    | Keyword::Short
                    | Keyword::Long
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Unsigned
                    | Keyword::Signed
                    | Keyword::Const
                    | Keyword::Static
                    | Keyword::Volatile
                    | Keyword::Struct
            ),

            Some(Token::Id(id)) => self.types.contains(id),
            _ => false,
        }
    }

    /// Analiza un nombre de tipo con todas sus decoraciones.
    fn type_name(&mut self) -> Parse<Node> {
        let pos = self.position();

        let mut is_const = false;
        let mut words: Vec<&'static str> = Vec::new();
        let mut named: Option<String> = None;

        loop {
            match self.peek() {
                Some(Token::Keyword(Keyword::Const)) => {
                    self.bump();
                    is_const = true;
                }

                // `static` y `volatile` se aceptan y descartan
                Some(Token::Keyword(Keyword::Static))
                | Some(Token::Keyword(Keyword::Volatile)) => {
                    self.bump();
                }

                Some(Token::Keyword(Keyword::Struct)) => {
                    self.bump();
                    named = Some(self.identifier()?);
                }

                Some(Token::Keyword(keyword)) => {
                    let word = match keyword {
                        Keyword::Void => "void",
                        Keyword::Bool => "bool",
                        Keyword::Boolean => "boolean",
                        Keyword::Char => "char",
                        Keyword::Byte => "byte",
                        Keyword::Word => "word",
                        Keyword::Int => "int",
                        Keyword::Short => "short",
                        Keyword::Long => "long",
                        Keyword::Float => "float",
                        Keyword::Double => "double",
                        Keyword::Unsigned => "unsigned",
                        Keyword::Signed => "signed",
                        _ => break,
                    };

                    self.bump();
                    words.push(word);
                }

                Some(Token::Id(id)) if named.is_none() && words.is_empty() => {
                    if self.types.contains(id) {
                        named = Some(id.clone());
                        self.bump();
                    } else {
                        break;
                    }
                }

                _ => break,
            }

            // Un tipo nombrado no se combina con palabras clave
            if named.is_some() {
                break;
            }
        }

        let name = match named {
            Some(name) => name,
            None if words.is_empty() => return self.fail(ParserError::ExpectedType),

            // `unsigned`/`signed` sin base implican `int`
            None if words == ["unsigned"] => "unsigned int".to_string(),
            None if words == ["signed"] => "int".to_string(),
            None => words.join(" "),
        };

        // Argumentos de plantilla de un solo nivel
        let mut template_args = Vec::new();
        if self.check(&Token::Lt) && self.template_args_ahead() {
            self.bump();
            loop {
                template_args.push(self.type_name()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }

            self.expect(Token::Gt)?;
        }

        let mut pointer = 0u8;
        while self.eat(&Token::Star) {
            pointer = pointer.saturating_add(1);
        }

        let is_reference = self.eat(&Token::Amp);

        // `const` también puede seguir al nombre base
        if self.eat(&Token::Keyword(Keyword::Const)) {
            is_const = true;
        }

        Ok(Node::new(
            NodeKind::TypeNode {
                name,
                is_const,
                pointer,
                is_reference,
                template_args,
            },
            pos,
        ))
    }

    /// Lookahead conservador: `<` abre argumentos de plantilla solo
    /// si un nombre de tipo viene inmediatamente después.
    fn template_args_ahead(&self) -> bool {
        match self.peek_at(1) {
            Some(Token::Id(id)) => self.types.contains(id),
            Some(Token::Keyword(keyword)) => matches!(
                keyword,
                Keyword::Void
                    | Keyword::Bool
                    | Keyword::Char
                    | Keyword::Byte
                    | Keyword::Int
                    | Keyword::Short
                    | Keyword::Long
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Unsigned
                    | Keyword::Signed
            ),

            _ => false,
        }
    }

    // ===== sentencias =====

    fn compound(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        while !self.check(&Token::CloseCurly) {
            if self.at_end() {
                return self.fail(ParserError::MissingToken(Token::CloseCurly));
            }

            let start = self.cursor;
            match self.statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => {
                    statements.push(self.recover(error));
                    if self.cursor == start {
                        self.bump();
                    }
                }
            }
        }

        self.expect(Token::CloseCurly)?;
        Ok(Node::new(NodeKind::Compound(statements), pos))
    }

    fn statement(&mut self) -> Parse<Node> {
        let pos = self.position();

        match self.peek() {
            None => self.fail(ParserError::UnexpectedEof),

            Some(Token::OpenCurly) => self.compound(),

            Some(Token::Semicolon) => {
                self.bump();
                Ok(Node::new(NodeKind::Empty, pos))
            }

            Some(Token::Keyword(Keyword::If)) => self.if_statement(),
            Some(Token::Keyword(Keyword::While)) => self.while_statement(),
            Some(Token::Keyword(Keyword::Do)) => self.do_statement(),
            Some(Token::Keyword(Keyword::For)) => self.for_statement(),
            Some(Token::Keyword(Keyword::Switch)) => self.switch_statement(),

            Some(Token::Keyword(Keyword::Return)) => {
                self.bump();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };

                self.expect(Token::Semicolon)?;
                Ok(Node::new(NodeKind::Return(value), pos))
            }

            Some(Token::Keyword(Keyword::Break)) => {
                self.bump();
                self.expect(Token::Semicolon)?;
                Ok(Node::new(NodeKind::Break, pos))
            }

            Some(Token::Keyword(Keyword::Continue)) => {
                self.bump();
                self.expect(Token::Semicolon)?;
                Ok(Node::new(NodeKind::Continue, pos))
            }

            Some(Token::Keyword(Keyword::Struct))
                if matches!(self.peek_at(2), Some(Token::OpenCurly)) =>
            {
                self.struct_decl()
            }

            Some(Token::Keyword(Keyword::Enum)) => self.enum_decl(),
            Some(Token::Keyword(Keyword::Typedef)) => self.typedef(),

            _ if self.at_declaration() => {
                let pos = self.position();
                let typ = self.type_name()?;

                if self.check(&Token::OpenParen) && self.peek_at(1) == Some(&Token::Star) {
                    return self.function_pointer(typ, pos);
                }

                let name = self.identifier()?;
                self.declarators(typ, name, pos)
            }

            _ => {
                let expr = self.expression()?;
                self.expect(Token::Semicolon)?;
                Ok(Node::new(NodeKind::ExprStmt(Box::new(expr)), pos))
            }
        }
    }

    /// Distingue una declaración local de una expresión.
    ///
    /// Un identificador solo inicia declaración si es un nombre de
    /// tipo conocido; los tipos por palabra clave siempre lo hacen.
    fn at_declaration(&self) -> bool {
        if !self.at_type() {
            return false;
        }

        match self.peek() {
            // `id id`, `id *id`, `id<...>` son declaraciones;
            // cualquier otra continuación es una expresión
            Some(Token::Id(_)) => matches!(
                self.peek_at(1),
                Some(Token::Id(_)) | Some(Token::Star) | Some(Token::Amp) | Some(Token::Lt)
            ),

            _ => true,
        }
    }

    fn if_statement(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::If)?;

        self.expect(Token::OpenParen)?;
        let condition = self.expression()?;
        self.expect(Token::CloseParen)?;

        let consequent = self.statement()?;
        let alternate = if self.eat(&Token::Keyword(Keyword::Else)) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Node::new(
            NodeKind::If {
                condition: Box::new(condition),
                consequent: Box::new(consequent),
                alternate,
            },
            pos,
        ))
    }

    fn while_statement(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::While)?;

        self.expect(Token::OpenParen)?;
        let condition = self.expression()?;
        self.expect(Token::CloseParen)?;

        let body = self.statement()?;
        Ok(Node::new(
            NodeKind::While {
                condition: Box::new(condition),
                body: Box::new(body),
            },
            pos,
        ))
    }

    fn do_statement(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Do)?;

        let body = self.statement()?;

        self.keyword(Keyword::While)?;
        self.expect(Token::OpenParen)?;
        let condition = self.expression()?;
        self.expect(Token::CloseParen)?;
        self.expect(Token::Semicolon)?;

        Ok(Node::new(
            NodeKind::DoWhile {
                body: Box::new(body),
                condition: Box::new(condition),
            },
            pos,
        ))
    }

    fn for_statement(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::For)?;
        self.expect(Token::OpenParen)?;

        // Forma por rango: `for (tipo id : iterable)`
        let snapshot = self.cursor;
        if self.at_type() || self.check(&Token::Keyword(Keyword::Auto)) {
            if let Ok(decl) = self.range_declaration() {
                if self.eat(&Token::Colon) {
                    let iterable = self.expression()?;
                    self.expect(Token::CloseParen)?;
                    let body = self.statement()?;

                    return Ok(Node::new(
                        NodeKind::RangeFor {
                            decl: Box::new(decl),
                            iterable: Box::new(iterable),
                            body: Box::new(body),
                        },
                        pos,
                    ));
                }
            }

            self.cursor = snapshot;
        }

        let init = if self.eat(&Token::Semicolon) {
            None
        } else if self.at_declaration() {
            let pos = self.position();
            let typ = self.type_name()?;
            let name = self.identifier()?;

            // `declarators` consume el `;` que cierra el init
            Some(Box::new(self.declarators(typ, name, pos)?))
        } else {
            let expr = self.expression()?;
            self.expect(Token::Semicolon)?;
            Some(Box::new(expr))
        };

        let condition = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect(Token::Semicolon)?;

        let update = if self.check(&Token::CloseParen) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect(Token::CloseParen)?;

        let body = self.statement()?;
        Ok(Node::new(
            NodeKind::For {
                init,
                condition,
                update,
                body: Box::new(body),
            },
            pos,
        ))
    }

    /// Declaración sin inicializador para el `for` por rango.
    fn range_declaration(&mut self) -> Parse<Node> {
        let pos = self.position();

        if self.eat(&Token::Keyword(Keyword::Auto)) {
            let mut pointer = 0u8;
            while self.eat(&Token::Star) {
                pointer = pointer.saturating_add(1);
            }

            let is_reference = self.eat(&Token::Amp);
            let name = self.identifier()?;

            let typ = Node::new(
                NodeKind::TypeNode {
                    name: "auto".to_string(),
                    is_const: false,
                    pointer,
                    is_reference,
                    template_args: Vec::new(),
                },
                pos,
            );

            return Ok(Node::new(
                NodeKind::VarDecl {
                    typ: Box::new(typ),
                    name,
                    dimensions: Vec::new(),
                    init: None,
                },
                pos,
            ));
        }

        let typ = self.type_name()?;
        let name = self.identifier()?;

        Ok(Node::new(
            NodeKind::VarDecl {
                typ: Box::new(typ),
                name,
                dimensions: Vec::new(),
                init: None,
            },
            pos,
        ))
    }

    fn switch_statement(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Switch)?;

        self.expect(Token::OpenParen)?;
        let scrutinee = self.expression()?;
        self.expect(Token::CloseParen)?;
        self.expect(Token::OpenCurly)?;

        let mut cases = Vec::new();
        while !self.check(&Token::CloseCurly) {
            if self.at_end() {
                return self.fail(ParserError::MissingToken(Token::CloseCurly));
            }

            let pos = self.position();
            let label = if self.eat(&Token::Keyword(Keyword::Case)) {
                let label = self.ternary()?;
                Some(Box::new(label))
            } else if self.eat(&Token::Keyword(Keyword::Default)) {
                None
            } else {
                let found = self.peek().cloned().unwrap();
                return self.fail(ParserError::ExpectedStatement(found));
            };

            self.expect(Token::Colon)?;

            let mut body = Vec::new();
            loop {
                match self.peek() {
                    None
                    | Some(Token::CloseCurly)
                    | Some(Token::Keyword(Keyword::Case))
                    | Some(Token::Keyword(Keyword::Default)) => break,

                    _ => {
                        let start = self.cursor;
                        match self.statement() {
                            Ok(statement) => body.push(statement),
                            Err(error) => {
                                body.push(self.recover(error));
                                if self.cursor == start {
                                    self.bump();
                                }
                            }
                        }
                    }
                }
            }

            cases.push(Node::new(NodeKind::Case { label, body }, pos));
        }

        self.expect(Token::CloseCurly)?;

        Ok(Node::new(
            NodeKind::Switch {
                scrutinee: Box::new(scrutinee),
                cases,
            },
            pos,
        ))
    }

    // ===== expresiones =====

    /// Expresión completa, incluyendo el operador coma.
    fn expression(&mut self) -> Parse<Node> {
        let mut expr = self.assignment()?;

        while self.check(&Token::Comma) {
            let pos = self.position();
            self.bump();
            let rhs = self.assignment()?;

            expr = Node::new(
                NodeKind::BinaryOp {
                    op: BinOp::Comma,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }

        Ok(expr)
    }

    fn assignment(&mut self) -> Parse<Node> {
        let target = self.ternary()?;

        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinOp::Add),
            Some(Token::MinusAssign) => Some(BinOp::Sub),
            Some(Token::StarAssign) => Some(BinOp::Mul),
            Some(Token::SlashAssign) => Some(BinOp::Div),
            Some(Token::PercentAssign) => Some(BinOp::Mod),
            Some(Token::AmpAssign) => Some(BinOp::BitAnd),
            Some(Token::PipeAssign) => Some(BinOp::BitOr),
            Some(Token::CaretAssign) => Some(BinOp::BitXor),
            Some(Token::ShlAssign) => Some(BinOp::Shl),
            Some(Token::ShrAssign) => Some(BinOp::Shr),
            _ => return Ok(target),
        };

        let pos = self.position();
        self.bump();
        let value = self.assignment()?;

        Ok(Node::new(
            NodeKind::Assignment {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            pos,
        ))
    }

    fn ternary(&mut self) -> Parse<Node> {
        let condition = self.binary(0)?;

        if !self.check(&Token::Question) {
            return Ok(condition);
        }

        let pos = self.position();
        self.bump();

        let consequent = self.expression()?;
        self.expect(Token::Colon)?;
        let alternate = self.assignment()?;

        Ok(Node::new(
            NodeKind::Ternary {
                condition: Box::new(condition),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            pos,
        ))
    }

    /// Niveles de precedencia de operadores binarios, del más débil
    /// al más fuerte.
    fn binary(&mut self, level: usize) -> Parse<Node> {
        const LEVELS: &[&[(Token, BinOp)]] = &[
            &[(Token::OrOr, BinOp::LogicalOr)],
            &[(Token::AndAnd, BinOp::LogicalAnd)],
            &[(Token::Pipe, BinOp::BitOr)],
            &[(Token::Caret, BinOp::BitXor)],
            &[(Token::Amp, BinOp::BitAnd)],
            &[(Token::Eq, BinOp::Equal), (Token::Ne, BinOp::NotEqual)],
            &[
                (Token::Lt, BinOp::Less),
                (Token::Le, BinOp::LessEq),
                (Token::Gt, BinOp::Greater),
                (Token::Ge, BinOp::GreaterEq),
            ],
            &[(Token::Shl, BinOp::Shl), (Token::Shr, BinOp::Shr)],
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Mod),
            ],
        ];

        if level >= LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;

        'outer: loop {
            for (token, op) in LEVELS[level] {
                if self.check(token) {
                    let pos = self.position();
                    self.bump();
                    let rhs = self.binary(level + 1)?;

                    lhs = Node::new(
                        NodeKind::BinaryOp {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        pos,
                    );

                    continue 'outer;
                }
            }

            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Parse<Node> {
        let pos = self.position();

        let op = match self.peek() {
            Some(Token::Plus) => Some(UnOp::Plus),
            Some(Token::Minus) => Some(UnOp::Minus),
            Some(Token::Not) => Some(UnOp::Not),
            Some(Token::Tilde) => Some(UnOp::BitNot),
            Some(Token::PlusPlus) => Some(UnOp::Increment),
            Some(Token::MinusMinus) => Some(UnOp::Decrement),
            Some(Token::Star) => Some(UnOp::Deref),
            Some(Token::Amp) => Some(UnOp::AddrOf),
            _ => None,
        };

        if let Some(op) = op {
            self.bump();
            let operand = self.unary()?;

            return Ok(Node::new(
                NodeKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                    prefix: true,
                },
                pos,
            ));
        }

        if self.check(&Token::Keyword(Keyword::Sizeof)) {
            return self.sizeof_expression();
        }

        // Conversión explícita `(tipo) expr`
        if self.check(&Token::OpenParen) {
            let snapshot = self.cursor;
            self.bump();

            if self.at_type() {
                if let Ok(typ) = self.type_name() {
                    if self.eat(&Token::CloseParen) {
                        let operand = self.unary()?;
                        return Ok(Node::new(
                            NodeKind::Cast {
                                typ: Box::new(typ),
                                operand: Box::new(operand),
                            },
                            pos,
                        ));
                    }
                }
            }

            self.cursor = snapshot;
        }

        self.postfix()
    }

    fn sizeof_expression(&mut self) -> Parse<Node> {
        let pos = self.position();
        self.keyword(Keyword::Sizeof)?;

        if self.check(&Token::OpenParen) {
            let snapshot = self.cursor;
            self.bump();

            if self.at_type() {
                if let Ok(typ) = self.type_name() {
                    if self.eat(&Token::CloseParen) {
                        return Ok(Node::new(NodeKind::Sizeof(Box::new(typ)), pos));
                    }
                }
            }

            self.cursor = snapshot;
        }

        let operand = self.unary()?;
        Ok(Node::new(NodeKind::Sizeof(Box::new(operand)), pos))
    }

    fn postfix(&mut self) -> Parse<Node> {
        let mut expr = self.primary()?;

        loop {
            let pos = self.position();

            match self.peek() {
                Some(Token::OpenParen) => {
                    self.bump();
                    let args = self.arguments()?;
                    self.expect(Token::CloseParen)?;

                    expr = Node::new(
                        NodeKind::FuncCall {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    );
                }

                Some(Token::OpenBracket) => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect(Token::CloseBracket)?;

                    expr = Node::new(
                        NodeKind::ArrayAccess {
                            array: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    );
                }

                Some(Token::Period) => {
                    self.bump();
                    let member = self.identifier()?;
                    expr = Node::new(
                        NodeKind::MemberAccess {
                            object: Box::new(expr),
                            member,
                            arrow: false,
                        },
                        pos,
                    );
                }

                Some(Token::Arrow) => {
                    self.bump();
                    let member = self.identifier()?;
                    expr = Node::new(
                        NodeKind::MemberAccess {
                            object: Box::new(expr),
                            member,
                            arrow: true,
                        },
                        pos,
                    );
                }

                Some(Token::PlusPlus) => {
                    self.bump();
                    expr = Node::new(
                        NodeKind::UnaryOp {
                            op: UnOp::Increment,
                            operand: Box::new(expr),
                            prefix: false,
                        },
                        pos,
                    );
                }

                Some(Token::MinusMinus) => {
                    self.bump();
                    expr = Node::new(
                        NodeKind::UnaryOp {
                            op: UnOp::Decrement,
                            operand: Box::new(expr),
                            prefix: false,
                        },
                        pos,
                    );
                }

                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self) -> Parse<Vec<Node>> {
        let mut args = Vec::new();

        if self.check(&Token::CloseParen) {
            return Ok(args);
        }

        loop {
            args.push(self.assignment()?);
            if !self.eat(&Token::Comma) {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Parse<Node> {
        let pos = self.position();

        let kind = match self.peek() {
            None => return self.fail(ParserError::UnexpectedEof),

            Some(Token::Int { value, long }) => {
                let value = *value;
                let long = *long;
                self.bump();

                NodeKind::NumberLit(if !long && value >= i32::MIN as i64 && value <= i32::MAX as i64
                {
                    Value::Int32(value as i32)
                } else {
                    Value::Int64(value)
                })
            }

            Some(Token::UInt { value, long }) => {
                let value = *value;
                let long = *long;
                self.bump();

                NodeKind::NumberLit(if !long && value <= u32::MAX as u64 {
                    Value::UInt32(value as u32)
                } else {
                    Value::UInt64(value)
                })
            }

            Some(Token::Float { value, single }) => {
                let value = *value;
                let single = *single;
                self.bump();

                NodeKind::NumberLit(if single {
                    Value::Float(value as f32)
                } else {
                    Value::Double(value)
                })
            }

            Some(Token::Char(c)) => {
                let c = *c;
                self.bump();
                NodeKind::CharLit(c as u32 as u8)
            }

            Some(Token::Str(s)) => {
                let s = s.clone();
                self.bump();
                NodeKind::StringLit(s)
            }

            Some(Token::Keyword(Keyword::True)) => {
                self.bump();
                NodeKind::NumberLit(Value::Bool(true))
            }

            Some(Token::Keyword(Keyword::False)) => {
                self.bump();
                NodeKind::NumberLit(Value::Bool(false))
            }

            Some(Token::Id(id)) => {
                let id = id.clone();
                self.bump();
                NodeKind::Identifier(id)
            }

            Some(Token::OpenParen) => {
                self.bump();
                let expr = self.expression()?;
                self.expect(Token::CloseParen)?;
                return Ok(expr);
            }

            Some(token) => {
                let token = token.clone();
                return self.fail(ParserError::ExpectedExpr(token));
            }
        };

        Ok(Node::new(kind, pos))
    }
}

/// Incrementa la profundidad de puntero de un nodo de tipo.
fn bump_pointer(typ: &mut Node) {
    if let NodeKind::TypeNode { pointer, .. } = &mut typ.kind {
        *pointer = pointer.saturating_add(1);
    }
}

/// Remueve las decoraciones de puntero de un tipo base clonado.
fn strip_pointer(typ: &mut Node) {
    if let NodeKind::TypeNode { pointer, .. } = &mut typ.kind {
        *pointer = 0;
    }
}

//! Ejecutor de árbol del intérprete.
//!
//! El ejecutor camina el AST de forma recursiva sobre un hilo
//! dedicado. Los efectos observables se describen como comandos y
//! se entregan al consumidor registrado; los datos externos
//! (lecturas de pines, relojes, métodos externos de biblioteca) se
//! obtienen emitiendo una petición y bloqueando el hilo en el
//! canal de respuestas hasta que el anfitrión conteste.
//!
//! El control de flujo no local (`break`, `continue`, `return`,
//! cancelación, errores fatales) viaja por el carril de error de
//! [`Exec`], de manera que cada construcción atrapa exactamente
//! las interrupciones que le corresponden y deja pasar el resto.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use crate::{
    ast::{BinOp, Node, NodeKind, UnOp, Value},
    command::{Command, CommandKind, CommandSink, Payload},
    library::{Dispatch, LibraryRegistry},
    platform::Platform,
};

use super::scope::{Binding, ScopeStack};
use super::value::{
    self, ArrayValue, ObjectHandle, Pointer, RuntimeValue, StructValue,
};
use super::{Control, ExecutionConfig, State};

/// Interrupción del flujo normal de evaluación.
#[derive(Debug)]
pub(super) enum Interrupt {
    Break,
    Continue,
    Return(RuntimeValue),

    /// Cancelación observada; no se emite nada más.
    Stopped,

    /// Error irrecuperable que termina la ejecución.
    Fatal(FatalError),
}

#[derive(Debug)]
pub(super) enum FatalError {
    RecursionLimit,
    InnerLoopLimit { iterations: u32 },
    CommandLimit,
}

pub(super) type Exec<T> = Result<T, Interrupt>;

/// Función de usuario registrada durante el izado.
pub(super) struct Function {
    pub params: Vec<(String, String)>,
    pub body: Node,
}

/// Estado interno de un objeto de biblioteca.
#[derive(Debug, Default)]
pub(super) struct ObjectState {
    pub ctor_args: Vec<RuntimeValue>,
    pub fields: HashMap<String, RuntimeValue>,
}

/// Ruta resuelta hacia una ranura asignable.
enum Place {
    Var { frame: u64, name: String },
    Index { base: Box<Place>, index: usize },
    Field { base: Box<Place>, name: String },
}

pub(super) struct Executor {
    pub(super) platform: Platform,
    pub(super) registry: LibraryRegistry,
    pub(super) config: ExecutionConfig,
    pub(super) scopes: ScopeStack,
    pub(super) objects: HashMap<u32, ObjectState>,
    pub(super) next_object: u32,
    pub(super) clock_us: u64,
    pub(super) rng: u64,

    functions: HashMap<String, Rc<Function>>,
    structs: HashMap<String, Vec<(String, String)>>,
    aliases: HashMap<String, String>,
    next_request: u64,
    emitted: u64,
    call_depth: u32,

    sink: Box<dyn CommandSink>,
    control: Receiver<Control>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<State>>,
}

impl Executor {
    pub(super) fn new(
        platform: Platform,
        config: ExecutionConfig,
        sink: Box<dyn CommandSink>,
        control: Receiver<Control>,
        cancel: Arc<AtomicBool>,
        state: Arc<Mutex<State>>,
    ) -> Self {
        Executor {
            platform,
            registry: LibraryRegistry::new(),
            config,
            scopes: ScopeStack::new(),
            objects: HashMap::new(),
            next_object: 1,
            clock_us: 0,
            rng: 0,
            functions: HashMap::new(),
            structs: HashMap::new(),
            aliases: HashMap::new(),
            next_request: 1,
            emitted: 0,
            call_depth: 0,
            sink,
            control,
            cancel,
            state,
        }
    }

    /// Ejecuta un programa completo hasta su terminación.
    pub(super) fn run(mut self, program: &Node) {
        match self.execute_program(program) {
            Ok(()) | Err(Interrupt::Stopped) => (),
            Err(Interrupt::Fatal(fatal)) => self.finish_fatal(fatal),
            Err(_) => log::warn!("control-flow interrupt escaped the program"),
        }

        self.set_state(State::Terminated);
    }

    fn execute_program(&mut self, program: &Node) -> Exec<()> {
        self.emit(
            CommandKind::VersionInfo,
            Payload::VersionInfo {
                component: "interpreter".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                status: "started".to_string(),
            },
        )?;

        self.emit(
            CommandKind::ProgramStart,
            Payload::Message {
                message: "Program started".to_string(),
            },
        )?;

        let items = match &program.kind {
            NodeKind::Program(items) => items,

            // Una raíz de error proviene del decodificador binario
            NodeKind::Error { message, .. } => {
                let message = message.clone();
                self.runtime_error(&message)?;
                self.emit(
                    CommandKind::ProgramEnd,
                    Payload::Message {
                        message: "Program terminated".to_string(),
                    },
                )?;

                return Ok(());
            }

            _ => return Ok(()),
        };

        // El objeto global `Serial` existe en todos los perfiles
        self.objects.insert(0, ObjectState::default());
        self.scopes.declare(
            "Serial".to_string(),
            Binding {
                type_name: "Serial".to_string(),
                value: RuntimeValue::Object(ObjectHandle {
                    id: 0,
                    type_name: "Serial".to_string(),
                }),
                is_const: false,
            },
        );

        self.hoist(items)?;

        // Las declaraciones globales corren en orden de fuente
        for item in items {
            match &item.kind {
                NodeKind::VarDecl { .. }
                | NodeKind::DeclList(_)
                | NodeKind::Error { .. } => self.exec_stmt(item)?,

                _ => (),
            }
        }

        self.emit(CommandKind::SetupStart, Payload::Empty {})?;
        if self.functions.contains_key("setup") {
            self.call_function("setup", Vec::new())?;
        }
        self.emit(CommandKind::SetupEnd, Payload::Empty {})?;

        let mut iterations = 0u32;
        for iteration in 1..=self.config.max_loop_iterations {
            self.check_cancel()?;

            self.emit(
                CommandKind::LoopStart,
                Payload::LoopStart {
                    iteration,
                    loop_type: "main".to_string(),
                },
            )?;

            self.emit(
                CommandKind::FunctionCall,
                Payload::FunctionCall {
                    function: "loop".to_string(),
                    iteration,
                    completed: false,
                },
            )?;

            if self.functions.contains_key("loop") {
                self.call_function("loop", Vec::new())?;
            }

            self.emit(
                CommandKind::FunctionCall,
                Payload::FunctionCall {
                    function: "loop".to_string(),
                    iteration,
                    completed: true,
                },
            )?;

            iterations = iteration;
        }

        self.emit(
            CommandKind::LoopEnd,
            Payload::LoopEnd {
                iterations,
                limit_reached: true,
            },
        )?;

        self.emit(
            CommandKind::ProgramEnd,
            Payload::Message {
                message: "Program completed".to_string(),
            },
        )?;

        Ok(())
    }

    /// Emite el comando terminal de un error fatal.
    fn finish_fatal(&mut self, fatal: FatalError) {
        let payload = match fatal {
            FatalError::InnerLoopLimit { iterations } => {
                self.emit_terminal(
                    CommandKind::LoopLimitReached,
                    Payload::LoopLimitReached { iterations },
                );

                None
            }

            FatalError::RecursionLimit => Some("Maximum recursion depth exceeded"),
            FatalError::CommandLimit => Some("Command limit reached"),
        };

        if let Some(message) = payload {
            self.emit_terminal(
                CommandKind::Error,
                Payload::Message {
                    message: message.to_string(),
                },
            );
        }

        self.emit_terminal(
            CommandKind::ProgramEnd,
            Payload::Message {
                message: "Program terminated".to_string(),
            },
        );
    }

    /// Emisión directa para comandos terminales, fuera del tope de
    /// comandos pero nunca después de una cancelación.
    fn emit_terminal(&mut self, kind: CommandKind, payload: Payload) {
        if self.cancel.load(Ordering::Relaxed) {
            return;
        }

        self.sink.emit(Command {
            kind,
            timestamp: self.clock_us / 1000,
            payload,
        });
    }

    // ===== infraestructura =====

    fn check_cancel(&self) -> Exec<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Interrupt::Stopped)
        } else {
            Ok(())
        }
    }

    pub(super) fn set_state(&self, new: State) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != State::Terminated {
            *state = new;
        }
    }

    /// Emite un comando, sujeto a cancelación y al tope de
    /// comandos configurado.
    pub(super) fn emit(&mut self, kind: CommandKind, payload: Payload) -> Exec<()> {
        self.check_cancel()?;

        if let Some(max) = self.config.max_commands {
            if self.emitted >= max {
                return Err(Interrupt::Fatal(FatalError::CommandLimit));
            }
        }

        self.emitted += 1;
        self.sink.emit(Command {
            kind,
            timestamp: self.clock_us / 1000,
            payload,
        });

        Ok(())
    }

    /// Emite una petición y suspende hasta su respuesta.
    ///
    /// El estado pasa a `AwaitingResponse` antes de emitir, de modo
    /// que un anfitrión que responda inmediatamente después de ver
    /// el comando nunca encuentre el estado desactualizado.
    pub(super) fn request<F>(&mut self, kind: CommandKind, payload: F) -> Exec<RuntimeValue>
    where
        F: FnOnce(u64) -> Payload,
    {
        let id = self.next_request;
        self.next_request += 1;

        self.set_state(State::AwaitingResponse);
        self.emit(kind, payload(id))?;

        let value = self.await_response(id)?;
        Ok(value.into())
    }

    fn await_response(&mut self, request_id: u64) -> Exec<Value> {
        loop {
            match self.control.recv() {
                // El extremo de control desapareció: nada más que
                // hacer salvo terminar en silencio
                Err(_) => return Err(Interrupt::Stopped),

                Ok(Control::Stop) => return Err(Interrupt::Stopped),

                Ok(Control::Response { request_id: id, value }) if id == request_id => {
                    self.set_state(State::Running);
                    return Ok(value);
                }

                Ok(Control::Response { request_id: id, .. }) => {
                    log::warn!("dropping response for unknown request id {}", id);
                }
            }
        }
    }

    /// Error de ejecución recuperable: se emite `ERROR` y la
    /// evaluación continúa con cero.
    pub(super) fn runtime_error(&mut self, message: &str) -> Exec<RuntimeValue> {
        self.emit(
            CommandKind::Error,
            Payload::Message {
                message: message.to_string(),
            },
        )?;

        Ok(RuntimeValue::Int(0))
    }

    fn scoped<T, F>(&mut self, barrier: bool, body: F) -> Exec<T>
    where
        F: FnOnce(&mut Self) -> Exec<T>,
    {
        if barrier {
            self.scopes.push_barrier();
        } else {
            self.scopes.push();
        }

        let result = body(self);
        self.scopes.pop();
        result
    }

    fn resolve_alias(&self, name: &str) -> String {
        let mut current = name;
        for _ in 0..8 {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }

        current.to_string()
    }

    // ===== izado =====

    /// Registra funciones, structs, enums y typedefs antes de
    /// ejecutar las declaraciones globales.
    fn hoist(&mut self, items: &[Node]) -> Exec<()> {
        for item in items {
            self.hoist_item(item)?;
        }

        Ok(())
    }

    fn hoist_item(&mut self, item: &Node) -> Exec<()> {
        match &item.kind {
            NodeKind::FuncDef {
                name, params, body, ..
            } => {
                let params = params
                    .iter()
                    .filter_map(|param| match &param.kind {
                        NodeKind::Param { typ, name } => {
                            Some((name.clone(), type_base_name(typ)))
                        }

                        _ => None,
                    })
                    .collect();

                self.functions.insert(
                    name.clone(),
                    Rc::new(Function {
                        params,
                        body: (**body).clone(),
                    }),
                );
            }

            NodeKind::StructDecl { name, fields } => {
                let fields = fields
                    .iter()
                    .filter_map(|field| match &field.kind {
                        NodeKind::VarDecl { typ, name, .. } => {
                            Some((name.clone(), type_base_name(typ)))
                        }

                        _ => None,
                    })
                    .collect();

                self.structs.insert(name.clone(), fields);
            }

            NodeKind::EnumDecl { members, .. } => {
                let mut next = 0i64;
                for member in members {
                    if let NodeKind::EnumMember { name, value } = &member.kind {
                        if let Some(expr) = value {
                            let evaluated = self.eval(expr)?;
                            next = evaluated.as_int().unwrap_or(next);
                        }

                        self.scopes.declare(
                            name.clone(),
                            Binding {
                                type_name: "int".to_string(),
                                value: RuntimeValue::Int(next),
                                is_const: true,
                            },
                        );

                        next += 1;
                    }
                }
            }

            NodeKind::Typedef { typ, name } => {
                self.aliases.insert(name.clone(), type_base_name(typ));
            }

            // La genericidad se ignora: la declaración subordinada
            // se iza como si fuera concreta
            NodeKind::TemplateDecl { decl, .. } => self.hoist_item(decl)?,

            _ => (),
        }

        Ok(())
    }

    // ===== sentencias =====

    fn exec_stmt(&mut self, node: &Node) -> Exec<()> {
        self.check_cancel()?;

        match &node.kind {
            NodeKind::Empty
            | NodeKind::FuncDecl { .. }
            | NodeKind::FuncDef { .. }
            | NodeKind::TemplateDecl { .. } => Ok(()),

            NodeKind::Error { message, .. } => {
                let message = message.clone();
                self.runtime_error(&message)?;
                Ok(())
            }

            NodeKind::Compound(items) => self.scoped(false, |this| {
                for item in items {
                    this.exec_stmt(item)?;
                }

                Ok(())
            }),

            NodeKind::ExprStmt(expr) => {
                self.eval(expr)?;
                Ok(())
            }

            NodeKind::VarDecl { .. } => self.declare(node),

            NodeKind::DeclList(decls) => {
                for decl in decls {
                    self.declare(decl)?;
                }

                Ok(())
            }

            NodeKind::StructDecl { .. }
            | NodeKind::EnumDecl { .. }
            | NodeKind::Typedef { .. } => self.hoist_item(node),

            NodeKind::If {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval(condition)?.truthy() {
                    self.exec_stmt(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec_stmt(alternate)
                } else {
                    Ok(())
                }
            }

            NodeKind::While { condition, body } => {
                let mut iterations = 0u32;
                loop {
                    if !self.eval(condition)?.truthy() {
                        return Ok(());
                    }

                    self.bound_iteration(&mut iterations)?;
                    match self.exec_stmt(body) {
                        Err(Interrupt::Break) => return Ok(()),
                        Err(Interrupt::Continue) => continue,
                        other => other?,
                    }
                }
            }

            NodeKind::DoWhile { body, condition } => {
                let mut iterations = 0u32;
                loop {
                    self.bound_iteration(&mut iterations)?;
                    match self.exec_stmt(body) {
                        Err(Interrupt::Break) => return Ok(()),
                        Err(Interrupt::Continue) => (),
                        other => other?,
                    }

                    if !self.eval(condition)?.truthy() {
                        return Ok(());
                    }
                }
            }

            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => self.scoped(false, |this| {
                if let Some(init) = init {
                    this.exec_for_clause(init)?;
                }

                let mut iterations = 0u32;
                loop {
                    let proceed = match condition {
                        Some(condition) => this.eval(condition)?.truthy(),
                        None => true,
                    };

                    if !proceed {
                        return Ok(());
                    }

                    this.bound_iteration(&mut iterations)?;
                    match this.exec_stmt(body) {
                        Err(Interrupt::Break) => return Ok(()),
                        Err(Interrupt::Continue) => (),
                        other => other?,
                    }

                    if let Some(update) = update {
                        this.eval(update)?;
                    }
                }
            }),

            NodeKind::RangeFor {
                decl,
                iterable,
                body,
            } => self.exec_range_for(decl, iterable, body),

            NodeKind::Switch { scrutinee, cases } => self.exec_switch(scrutinee, cases),

            NodeKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => RuntimeValue::Void,
                };

                Err(Interrupt::Return(value))
            }

            NodeKind::Break => Err(Interrupt::Break),
            NodeKind::Continue => Err(Interrupt::Continue),

            // Una expresión suelta en posición de sentencia
            _ => {
                self.eval(node)?;
                Ok(())
            }
        }
    }

    /// Acota los ciclos internos del sketch.
    fn bound_iteration(&mut self, iterations: &mut u32) -> Exec<()> {
        *iterations += 1;
        if *iterations > self.config.max_inner_iterations {
            Err(Interrupt::Fatal(FatalError::InnerLoopLimit {
                iterations: *iterations - 1,
            }))
        } else {
            Ok(())
        }
    }

    /// La cláusula inicial de un `for` puede ser declaración o
    /// expresión.
    fn exec_for_clause(&mut self, clause: &Node) -> Exec<()> {
        match &clause.kind {
            NodeKind::VarDecl { .. } | NodeKind::DeclList(_) => self.exec_stmt(clause),
            _ => {
                self.eval(clause)?;
                Ok(())
            }
        }
    }

    fn exec_range_for(&mut self, decl: &Node, iterable: &Node, body: &Node) -> Exec<()> {
        let (name, type_name) = match &decl.kind {
            NodeKind::VarDecl { typ, name, .. } => (name.clone(), type_base_name(typ)),
            _ => {
                self.runtime_error("Range-based for requires a declaration")?;
                return Ok(());
            }
        };

        let values = match self.eval(iterable)? {
            RuntimeValue::Array(array) => array.values,
            RuntimeValue::Str(s) => s
                .bytes()
                .map(|b| RuntimeValue::Int(b as i64))
                .collect(),

            _ => {
                self.runtime_error("Range-based for requires an array")?;
                return Ok(());
            }
        };

        let mut iterations = 0u32;
        self.scoped(false, |this| {
            this.scopes.declare(
                name.clone(),
                Binding {
                    type_name: type_name.clone(),
                    value: RuntimeValue::Int(0),
                    is_const: false,
                },
            );

            for element in values {
                this.bound_iteration(&mut iterations)?;

                if let Some(binding) = this.scopes.lookup_mut(&name) {
                    binding.value = element;
                }

                match this.exec_stmt(body) {
                    Err(Interrupt::Break) => return Ok(()),
                    Err(Interrupt::Continue) => continue,
                    other => other?,
                }
            }

            Ok(())
        })
    }

    fn exec_switch(&mut self, scrutinee: &Node, cases: &[Node]) -> Exec<()> {
        let selector = self.eval(scrutinee)?.as_int().unwrap_or(0);

        // Primero el caso que iguala, en su defecto `default`
        let mut selected = None;
        let mut default = None;

        for (index, case) in cases.iter().enumerate() {
            if let NodeKind::Case { label, .. } = &case.kind {
                match label {
                    None => default = Some(index),
                    Some(label) => {
                        let label = self.eval(label)?.as_int().unwrap_or(0);
                        if label == selector && selected.is_none() {
                            selected = Some(index);
                        }
                    }
                }
            }
        }

        let start = match selected.or(default) {
            Some(start) => start,
            None => return Ok(()),
        };

        // Ejecución con fall-through desde el caso seleccionado
        self.scoped(false, |this| {
            for case in &cases[start..] {
                if let NodeKind::Case { body, .. } = &case.kind {
                    for statement in body {
                        match this.exec_stmt(statement) {
                            Err(Interrupt::Break) => return Ok(()),
                            other => other?,
                        }
                    }
                }
            }

            Ok(())
        })
    }

    // ===== declaraciones =====

    fn declare(&mut self, node: &Node) -> Exec<()> {
        let (typ, name, dimensions, init) = match &node.kind {
            NodeKind::VarDecl {
                typ,
                name,
                dimensions,
                init,
            } => (typ, name, dimensions, init),

            _ => return Ok(()),
        };

        let (base, is_const, pointer) = match &typ.kind {
            NodeKind::TypeNode {
                name,
                is_const,
                pointer,
                ..
            } => (self.resolve_alias(name), *is_const, *pointer),

            _ => ("int".to_string(), false, 0),
        };

        // Objetos de biblioteca
        if pointer == 0 && dimensions.is_empty() && base != "String" {
            if self.registry.lookup(&base).is_some() {
                return self.construct_object(&base, name, init.as_deref(), is_const);
            }
        }

        let stored_type = decorate_pointer(&base, pointer);

        let value = if !dimensions.is_empty() {
            self.array_binding(&base, dimensions, init.as_deref())?
        } else if pointer > 0 {
            match init {
                Some(expr) => self.eval(expr)?,
                None => RuntimeValue::Int(0),
            }
        } else if self.structs.contains_key(&base) {
            self.struct_binding(&base, init.as_deref())?
        } else {
            match init {
                Some(expr) => {
                    let value = self.eval_initializer(&base, expr)?;
                    value::truncate_to(&base, value)
                }

                None => value::default_value(&base),
            }
        };

        self.scopes.declare(
            name.clone(),
            Binding {
                type_name: stored_type,
                value,
                is_const,
            },
        );

        Ok(())
    }

    /// Un inicializador escalar; la construcción directa
    /// `tipo nombre(args)` se reduce a su primer argumento.
    fn eval_initializer(&mut self, base: &str, init: &Node) -> Exec<RuntimeValue> {
        if let NodeKind::FuncCall { callee, args } = &init.kind {
            if let NodeKind::Identifier(callee_name) = &callee.kind {
                if callee_name == base {
                    return match args.first() {
                        Some(arg) => self.eval(arg),
                        None => Ok(value::default_value(base)),
                    };
                }
            }
        }

        self.eval(init)
    }

    fn construct_object(
        &mut self,
        type_name: &str,
        name: &str,
        init: Option<&Node>,
        is_const: bool,
    ) -> Exec<()> {
        let mut ctor_args = Vec::new();

        if let Some(init) = init {
            if let NodeKind::FuncCall { args, .. } = &init.kind {
                for arg in args {
                    ctor_args.push(self.eval(arg)?);
                }
            }
        }

        let descriptor = self.registry.lookup(type_name);
        if let Some(descriptor) = descriptor {
            if !descriptor.constructor.accepts(ctor_args.len()) {
                let message = format!(
                    "Constructor of `{}` does not take {} arguments",
                    type_name,
                    ctor_args.len()
                );

                self.runtime_error(&message)?;
            }
        }

        let id = self.next_object;
        self.next_object += 1;

        self.objects.insert(
            id,
            ObjectState {
                ctor_args,
                fields: HashMap::new(),
            },
        );

        self.scopes.declare(
            name.to_string(),
            Binding {
                type_name: type_name.to_string(),
                value: RuntimeValue::Object(ObjectHandle {
                    id,
                    type_name: type_name.to_string(),
                }),
                is_const,
            },
        );

        Ok(())
    }

    fn array_binding(
        &mut self,
        element: &str,
        dimensions: &[Node],
        init: Option<&Node>,
    ) -> Exec<RuntimeValue> {
        // `char texto[] = "..."` se almacena como texto
        if let (Some(Node { kind: NodeKind::StringLit(s), .. }), true) = (
            init,
            matches!(value::classify(element), value::TypeClass::Signed(8)),
        ) {
            return Ok(RuntimeValue::Str(s.clone()));
        }

        let mut lengths = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            match &dimension.kind {
                NodeKind::Empty => lengths.push(None),
                _ => {
                    let length = self.eval(dimension)?.as_int().unwrap_or(0);
                    lengths.push(Some(length.max(0) as usize));
                }
            }
        }

        self.array_value(element, &lengths, init)
    }

    fn array_value(
        &mut self,
        element: &str,
        lengths: &[Option<usize>],
        init: Option<&Node>,
    ) -> Exec<RuntimeValue> {
        if lengths.is_empty() {
            return match init {
                Some(node) => {
                    let value = self.eval(node)?;
                    Ok(value::truncate_to(element, value))
                }

                None => Ok(value::default_value(element)),
            };
        }

        let items: &[Node] = match init {
            Some(Node {
                kind: NodeKind::ArrayInit(items),
                ..
            }) => items,

            Some(other) => {
                let value = self.eval(other)?;
                if let RuntimeValue::Array(_) = value {
                    return Ok(value);
                }

                self.runtime_error("Array initializer expected")?;
                &[]
            }

            None => &[],
        };

        let length = lengths[0].unwrap_or(items.len());

        let mut values = Vec::with_capacity(length);
        for index in 0..length {
            let sub_init = items.get(index);
            values.push(self.array_value(element, &lengths[1..], sub_init)?);
        }

        Ok(RuntimeValue::Array(ArrayValue {
            element: element.to_string(),
            values,
        }))
    }

    fn struct_binding(&mut self, type_name: &str, init: Option<&Node>) -> Exec<RuntimeValue> {
        let definition = self.structs.get(type_name).cloned().unwrap_or_default();

        let items: &[Node] = match init {
            Some(Node {
                kind: NodeKind::ArrayInit(items),
                ..
            }) => items,

            Some(other) => {
                let value = self.eval(other)?;
                if let RuntimeValue::Struct(_) = value {
                    return Ok(value);
                }

                self.runtime_error("Struct initializer expected")?;
                &[]
            }

            None => &[],
        };

        let mut fields = HashMap::new();
        for (index, (field, field_type)) in definition.iter().enumerate() {
            let value = match items.get(index) {
                Some(item) => {
                    let value = self.eval(item)?;
                    value::truncate_to(field_type, value)
                }

                None => value::default_value(field_type),
            };

            fields.insert(field.clone(), value);
        }

        Ok(RuntimeValue::Struct(StructValue {
            type_name: type_name.to_string(),
            fields,
        }))
    }

    // ===== expresiones =====

    pub(super) fn eval(&mut self, node: &Node) -> Exec<RuntimeValue> {
        self.check_cancel()?;

        match &node.kind {
            NodeKind::NumberLit(value) => Ok(value.clone().into()),
            NodeKind::StringLit(s) => Ok(RuntimeValue::Str(s.clone())),
            NodeKind::CharLit(c) => Ok(RuntimeValue::Int(*c as i64)),

            NodeKind::Identifier(name) => self.eval_identifier(name),

            NodeKind::Error { message, .. } => {
                let message = message.clone();
                self.runtime_error(&message)
            }

            NodeKind::ArrayInit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }

                Ok(RuntimeValue::Array(ArrayValue {
                    element: "int".to_string(),
                    values,
                }))
            }

            NodeKind::UnaryOp {
                op,
                operand,
                prefix,
            } => self.eval_unary(*op, operand, *prefix),

            NodeKind::BinaryOp { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),

            NodeKind::Assignment { op, target, value } => {
                let mut incoming = self.eval(value)?;

                if let Some(op) = op {
                    let current = self.eval(target)?;
                    incoming = self.apply_binary(*op, &current, &incoming)?;
                }

                self.assign(target, incoming)
            }

            NodeKind::Ternary {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }

            NodeKind::FuncCall { callee, args } => self.eval_call(callee, args),

            NodeKind::MemberAccess {
                object,
                member,
                arrow,
            } => {
                let value = self.member_value(object, member, *arrow)?;
                Ok(value)
            }

            NodeKind::ArrayAccess { array, index } => self.eval_index(array, index),

            NodeKind::Cast { typ, operand } => {
                let value = self.eval(operand)?;
                let target = type_base_name(typ);
                Ok(value::truncate_to(&self.resolve_alias(&target), value))
            }

            NodeKind::Sizeof(operand) => self.eval_sizeof(operand),

            NodeKind::TypeNode { .. } => Ok(RuntimeValue::Void),

            _ => {
                self.runtime_error("Expression expected")
            }
        }
    }

    fn eval_identifier(&mut self, name: &str) -> Exec<RuntimeValue> {
        if let Some(binding) = self.scopes.lookup(name) {
            return Ok(binding.value.clone());
        }

        // Alias de pin de la plataforma que sobrevivió al
        // preprocesador
        if let Some(&(_, pin)) = self
            .platform
            .pin_aliases()
            .iter()
            .find(|(alias, _)| *alias == name)
        {
            return Ok(RuntimeValue::Int(pin as i64));
        }

        if self.functions.contains_key(name) {
            return Ok(RuntimeValue::Function(name.to_string()));
        }

        let message = format!("Undefined identifier `{}`", name);
        self.runtime_error(&message)
    }

    fn eval_unary(&mut self, op: UnOp, operand: &Node, prefix: bool) -> Exec<RuntimeValue> {
        match op {
            UnOp::Increment | UnOp::Decrement => {
                let old = self.eval(operand)?;
                let step = match op {
                    UnOp::Increment => BinOp::Add,
                    _ => BinOp::Sub,
                };

                let new = self.apply_binary(step, &old, &RuntimeValue::Int(1))?;
                let stored = self.assign(operand, new)?;

                Ok(if prefix { stored } else { old })
            }

            UnOp::Deref => {
                let value = self.eval(operand)?;
                match value {
                    RuntimeValue::Pointer(pointer) => self.read_pointer(&pointer),
                    _ => self.runtime_error("Cannot dereference a non-pointer value"),
                }
            }

            UnOp::AddrOf => match self.resolve_place(operand)? {
                Some(place) => match place_pointer(&place) {
                    Some(pointer) => Ok(RuntimeValue::Pointer(pointer)),
                    None => self.runtime_error("Cannot take the address of this expression"),
                },

                None => Ok(RuntimeValue::Int(0)),
            },

            UnOp::Not => {
                let value = self.eval(operand)?;
                Ok(RuntimeValue::Bool(!value.truthy()))
            }

            UnOp::BitNot => {
                let value = self.eval(operand)?;
                match value.as_int() {
                    Some(v) => Ok(RuntimeValue::Int(!v)),
                    None => self.runtime_error("Operand of `~` must be an integer"),
                }
            }

            UnOp::Minus => {
                let value = self.eval(operand)?;
                match value {
                    RuntimeValue::Float(v) => Ok(RuntimeValue::Float(-v)),
                    other => match other.as_int() {
                        Some(v) => Ok(RuntimeValue::Int(v.wrapping_neg())),
                        None => self.runtime_error("Operand of `-` must be numeric"),
                    },
                }
            }

            UnOp::Plus => self.eval(operand),
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Node, rhs: &Node) -> Exec<RuntimeValue> {
        match op {
            // Cortocircuito: el lado no usado no se evalúa
            BinOp::LogicalAnd => {
                if !self.eval(lhs)?.truthy() {
                    return Ok(RuntimeValue::Bool(false));
                }

                let rhs = self.eval(rhs)?;
                Ok(RuntimeValue::Bool(rhs.truthy()))
            }

            BinOp::LogicalOr => {
                if self.eval(lhs)?.truthy() {
                    return Ok(RuntimeValue::Bool(true));
                }

                let rhs = self.eval(rhs)?;
                Ok(RuntimeValue::Bool(rhs.truthy()))
            }

            BinOp::Comma => {
                self.eval(lhs)?;
                self.eval(rhs)
            }

            op => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                self.apply_binary(op, &a, &b)
            }
        }
    }

    fn apply_binary(
        &mut self,
        op: BinOp,
        lhs: &RuntimeValue,
        rhs: &RuntimeValue,
    ) -> Exec<RuntimeValue> {
        match value::binary(op, lhs, rhs) {
            Ok(value) => Ok(value),
            Err(value::ArithmeticError::DivisionByZero) => {
                self.runtime_error("Division by zero")
            }

            Err(value::ArithmeticError::TypeMismatch) => {
                let message = format!("Invalid operands for `{}`", op);
                self.runtime_error(&message)
            }
        }
    }

    fn eval_index(&mut self, array: &Node, index: &Node) -> Exec<RuntimeValue> {
        let base = self.eval(array)?;
        let index = self.eval(index)?.as_int().unwrap_or(-1);

        match base {
            RuntimeValue::Array(ref values) => {
                if index < 0 || index as usize >= values.values.len() {
                    let message = format!("Array index {} out of bounds", index);
                    return self.runtime_error(&message);
                }

                Ok(values.values[index as usize].clone())
            }

            RuntimeValue::Str(ref s) => {
                if index < 0 || index as usize >= s.len() {
                    let message = format!("String index {} out of bounds", index);
                    return self.runtime_error(&message);
                }

                Ok(RuntimeValue::Int(s.as_bytes()[index as usize] as i64))
            }

            RuntimeValue::Pointer(pointer) => {
                let shifted = Pointer {
                    index: Some(index.max(0) as usize),
                    ..pointer
                };

                self.read_pointer(&shifted)
            }

            _ => self.runtime_error("Cannot index a non-array value"),
        }
    }

    fn eval_sizeof(&mut self, operand: &Node) -> Exec<RuntimeValue> {
        let size = match &operand.kind {
            NodeKind::TypeNode { name, pointer, .. } => {
                if *pointer > 0 {
                    4
                } else {
                    value::width(&self.resolve_alias(name)) as i64
                }
            }

            NodeKind::Identifier(name) => match self.scopes.lookup(name) {
                Some(binding) => match &binding.value {
                    RuntimeValue::Array(array) => {
                        value::width(&array.element) as i64 * array.values.len() as i64
                    }

                    RuntimeValue::Str(s) => s.len() as i64 + 1,
                    _ => value::width(&binding.type_name) as i64,
                },

                None => 4,
            },

            NodeKind::ArrayAccess { array, .. } => match &array.kind {
                NodeKind::Identifier(name) => match self.scopes.lookup(name) {
                    Some(binding) => match &binding.value {
                        RuntimeValue::Array(array) => value::width(&array.element) as i64,
                        _ => 4,
                    },

                    None => 4,
                },

                _ => 4,
            },

            _ => {
                let value = self.eval(operand)?;
                match value {
                    RuntimeValue::Bool(_) => 1,
                    RuntimeValue::Float(_) => 4,
                    RuntimeValue::Str(s) => s.len() as i64 + 1,
                    _ => 4,
                }
            }
        };

        Ok(RuntimeValue::Int(size))
    }

    // ===== lugares asignables =====

    /// Resuelve una expresión en posición de destino. `None`
    /// significa que el error ya fue reportado.
    fn resolve_place(&mut self, node: &Node) -> Exec<Option<Place>> {
        match &node.kind {
            NodeKind::Identifier(name) => match self.scopes.frame_of(name) {
                Some(frame) => Ok(Some(Place::Var {
                    frame,
                    name: name.clone(),
                })),

                None => {
                    let message = format!("Undefined identifier `{}`", name);
                    self.runtime_error(&message)?;
                    Ok(None)
                }
            },

            NodeKind::ArrayAccess { array, index } => {
                let base = match self.resolve_place(array)? {
                    Some(base) => base,
                    None => return Ok(None),
                };

                let index = self.eval(index)?.as_int().unwrap_or(-1);
                if index < 0 {
                    self.runtime_error("Negative array index")?;
                    return Ok(None);
                }

                Ok(Some(Place::Index {
                    base: Box::new(base),
                    index: index as usize,
                }))
            }

            NodeKind::MemberAccess {
                object,
                member,
                arrow,
            } => {
                let base = if *arrow {
                    match self.eval(object)? {
                        RuntimeValue::Pointer(pointer) => pointer_place(&pointer),
                        _ => {
                            self.runtime_error("`->` requires a pointer")?;
                            return Ok(None);
                        }
                    }
                } else {
                    match self.resolve_place(object)? {
                        Some(base) => base,
                        None => return Ok(None),
                    }
                };

                Ok(Some(Place::Field {
                    base: Box::new(base),
                    name: member.clone(),
                }))
            }

            NodeKind::UnaryOp {
                op: UnOp::Deref,
                operand,
                ..
            } => match self.eval(operand)? {
                RuntimeValue::Pointer(pointer) => Ok(Some(pointer_place(&pointer))),
                _ => {
                    self.runtime_error("Cannot dereference a non-pointer value")?;
                    Ok(None)
                }
            },

            _ => {
                self.runtime_error("Expression is not assignable")?;
                Ok(None)
            }
        }
    }

    fn place_slot(&mut self, place: &Place) -> Option<&mut RuntimeValue> {
        match place {
            Place::Var { frame, name } => self
                .scopes
                .binding_in_frame(*frame, name)
                .map(|binding| &mut binding.value),

            Place::Index { base, index } => match self.place_slot(base)? {
                RuntimeValue::Array(array) => array.values.get_mut(*index),
                _ => None,
            },

            Place::Field { base, name } => match self.place_slot(base)? {
                RuntimeValue::Struct(s) => s.fields.get_mut(name),
                _ => None,
            },
        }
    }

    /// Tipo con que se trunca el valor que entra en el lugar.
    fn place_type(&mut self, place: &Place) -> Option<String> {
        match place {
            Place::Var { frame, name } => self
                .scopes
                .binding_in_frame(*frame, name)
                .map(|binding| binding.type_name.clone()),

            Place::Index { base, .. } => match self.place_slot(base)? {
                RuntimeValue::Array(array) => Some(array.element.clone()),
                RuntimeValue::Str(_) => Some("char".to_string()),
                _ => None,
            },

            Place::Field { .. } => None,
        }
    }

    fn place_is_const(&mut self, place: &Place) -> bool {
        match place {
            Place::Var { frame, name } => self
                .scopes
                .binding_in_frame(*frame, name)
                .map(|binding| binding.is_const)
                .unwrap_or(false),

            Place::Index { base, .. } | Place::Field { base, .. } => self.place_is_const(base),
        }
    }

    pub(super) fn assign(&mut self, target: &Node, value: RuntimeValue) -> Exec<RuntimeValue> {
        let place = match self.resolve_place(target)? {
            Some(place) => place,

            // El error ya fue reportado; la asignación conserva el
            // valor como resultado de la expresión
            None => return Ok(value),
        };

        if self.place_is_const(&place) {
            self.runtime_error("Cannot assign to a const variable")?;
            return Ok(value);
        }

        let stored = match self.place_type(&place) {
            Some(type_name) => value::truncate_to(&type_name, value),
            None => value,
        };

        if !self.write_place(&place, stored.clone()) {
            self.runtime_error("Assignment target no longer exists")?;
        }

        Ok(stored)
    }

    fn write_place(&mut self, place: &Place, value: RuntimeValue) -> bool {
        // Elemento de un texto almacenado como `char[]`
        if let Place::Index { base, index } = place {
            let byte = value.as_int().map(|v| v as u8);
            if let Some(RuntimeValue::Str(s)) = self.place_slot(base) {
                if let Some(byte) = byte {
                    if *index < s.len() {
                        let mut bytes = std::mem::take(s).into_bytes();
                        bytes[*index] = byte;
                        *s = String::from_utf8_lossy(&bytes).into_owned();
                        return true;
                    }
                }

                return false;
            }
        }

        match self.place_slot(place) {
            Some(slot) => {
                *slot = value;
                true
            }

            None => false,
        }
    }

    fn read_pointer(&mut self, pointer: &Pointer) -> Exec<RuntimeValue> {
        let place = pointer_place(pointer);
        match self.place_slot(&place) {
            Some(slot) => Ok(slot.clone()),
            None => self.runtime_error("Dangling pointer dereference"),
        }
    }

    /// Lectura de miembro fuera de una llamada: campos de structs
    /// y desreferencias `->`.
    fn member_value(&mut self, object: &Node, member: &str, arrow: bool) -> Exec<RuntimeValue> {
        let value = self.eval(object)?;

        let value = if arrow {
            match value {
                RuntimeValue::Pointer(pointer) => self.read_pointer(&pointer)?,
                _ => return self.runtime_error("`->` requires a pointer"),
            }
        } else {
            value
        };

        match value {
            RuntimeValue::Struct(s) => match s.fields.get(member) {
                Some(field) => Ok(field.clone()),
                None => {
                    let message =
                        format!("No field `{}` in struct `{}`", member, s.type_name);
                    self.runtime_error(&message)
                }
            },

            _ => {
                let message = format!("No member `{}` on this value", member);
                self.runtime_error(&message)
            }
        }
    }

    // ===== llamadas =====

    fn eval_call(&mut self, callee: &Node, args: &[Node]) -> Exec<RuntimeValue> {
        if let NodeKind::MemberAccess { object, member, .. } = &callee.kind {
            let mut argv = Vec::with_capacity(args.len());
            for arg in args {
                argv.push(self.eval(arg)?);
            }

            return self.method_call(object, member, argv);
        }

        let name = match &callee.kind {
            NodeKind::Identifier(name) => name.clone(),
            _ => {
                let value = self.eval(callee)?;
                match value {
                    RuntimeValue::Function(name) => name,
                    _ => return self.runtime_error("Expression is not callable"),
                }
            }
        };

        let mut argv = Vec::with_capacity(args.len());
        for arg in args {
            argv.push(self.eval(arg)?);
        }

        self.call_named(&name, argv)
    }

    pub(super) fn call_named(&mut self, name: &str, args: Vec<RuntimeValue>) -> Exec<RuntimeValue> {
        if self.functions.contains_key(name) {
            return self.call_function(name, args);
        }

        if let Some(result) = self.builtin_call(name, &args) {
            return result;
        }

        // Puntero a función almacenado en una variable
        if let Some(binding) = self.scopes.lookup(name) {
            if let RuntimeValue::Function(target) = &binding.value {
                let target = target.clone();
                return self.call_function(&target, args);
            }
        }

        let message = format!("Unknown function `{}`", name);
        self.runtime_error(&message)
    }

    fn call_function(&mut self, name: &str, args: Vec<RuntimeValue>) -> Exec<RuntimeValue> {
        let function = match self.functions.get(name) {
            Some(function) => Rc::clone(function),
            None => {
                let message = format!("Unknown function `{}`", name);
                return self.runtime_error(&message);
            }
        };

        if self.call_depth >= self.config.max_recursion_depth {
            return Err(Interrupt::Fatal(FatalError::RecursionLimit));
        }

        self.call_depth += 1;
        let result = self.scoped(true, |this| {
            let mut args = args.into_iter();
            for (param, param_type) in &function.params {
                let value = match args.next() {
                    Some(value) => value::truncate_to(param_type, value),
                    None => value::default_value(param_type),
                };

                this.scopes.declare(
                    param.clone(),
                    Binding {
                        type_name: param_type.clone(),
                        value,
                        is_const: false,
                    },
                );
            }

            this.exec_stmt(&function.body)
        });

        self.call_depth -= 1;

        match result {
            Ok(()) => Ok(RuntimeValue::Void),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn method_call(
        &mut self,
        object: &Node,
        member: &str,
        args: Vec<RuntimeValue>,
    ) -> Exec<RuntimeValue> {
        let value = match self.eval(object)? {
            // Un receptor puntero se desreferencia primero
            RuntimeValue::Pointer(pointer) => self.read_pointer(&pointer)?,
            value => value,
        };

        match value {
            RuntimeValue::Object(handle) => self.dispatch_library(object, handle, member, args),
            RuntimeValue::Str(current) => self.string_method(object, current, member, args),

            _ => {
                let message = format!("No method `{}` on this value", member);
                self.runtime_error(&message)
            }
        }
    }

    fn dispatch_library(
        &mut self,
        object: &Node,
        handle: ObjectHandle,
        method: &str,
        args: Vec<RuntimeValue>,
    ) -> Exec<RuntimeValue> {
        let descriptor = match self.registry.lookup(&handle.type_name) {
            Some(descriptor) => descriptor,
            None => {
                let message = format!("Unknown library type `{}`", handle.type_name);
                return self.runtime_error(&message);
            }
        };

        let found = descriptor
            .instance_method(method)
            .or_else(|| descriptor.static_method(method));

        let found = match found {
            Some(found) => found,
            None => {
                let message = format!(
                    "Method `{}` is undefined for `{}` instances",
                    method, handle.type_name
                );

                return self.runtime_error(&message);
            }
        };

        if !found.arity.accepts(args.len()) {
            let message = format!(
                "Method `{}.{}` does not take {} arguments",
                handle.type_name,
                method,
                args.len()
            );

            return self.runtime_error(&message);
        }

        match found.dispatch {
            Dispatch::Internal(tag) => self.library_internal(&handle, tag, &args),

            Dispatch::External => {
                let object_name = match &object.kind {
                    NodeKind::Identifier(name) => name.clone(),
                    _ => format!("{}#{}", handle.type_name, handle.id),
                };

                let fields = args.iter().map(RuntimeValue::to_field).collect();
                let method_name = method.to_string();

                let value = self.request(CommandKind::LibraryMethodRequest, move |id| {
                    Payload::LibraryMethodRequest {
                        request_id: id,
                        object: object_name,
                        method: method_name,
                        args: fields,
                    }
                })?;

                self.after_external(&handle, method, &args);
                Ok(value)
            }
        }
    }
}

/// Nombre base de un nodo de tipo.
fn type_base_name(typ: &Node) -> String {
    match &typ.kind {
        NodeKind::TypeNode { name, pointer, .. } => decorate_pointer(name, *pointer),
        _ => "int".to_string(),
    }
}

fn decorate_pointer(name: &str, pointer: u8) -> String {
    let mut decorated = name.to_string();
    for _ in 0..pointer {
        decorated.push('*');
    }

    decorated
}

fn pointer_place(pointer: &Pointer) -> Place {
    let var = Place::Var {
        frame: pointer.frame,
        name: pointer.name.clone(),
    };

    match pointer.index {
        Some(index) => Place::Index {
            base: Box::new(var),
            index,
        },

        None => var,
    }
}

fn place_pointer(place: &Place) -> Option<Pointer> {
    match place {
        Place::Var { frame, name } => Some(Pointer {
            frame: *frame,
            name: name.clone(),
            index: None,
        }),

        Place::Index { base, index } => match base.as_ref() {
            Place::Var { frame, name } => Some(Pointer {
                frame: *frame,
                name: name.clone(),
                index: Some(*index),
            }),

            _ => None,
        },

        Place::Field { .. } => None,
    }
}

//! Intérprete de sketches.
//!
//! El intérprete es un caminante de árbol síncrono con suspensión
//! cooperativa: ejecuta el AST sobre un hilo dedicado, entrega los
//! comandos en orden de emisión a un consumidor registrado y se
//! bloquea cuando necesita un dato externo hasta que el anfitrión
//! responda vía [`Interpreter::handle_response`].
//!
//! # Máquina de estados
//! ```text
//!   Idle ──start()──▶ Running ──petición──▶ AwaitingResponse
//!    ▲                  │                      │
//!    │                  │◀──handle_response()──┘
//!    │                  ├──tope alcanzado──▶ Terminated
//!    │                  └──PROGRAM_END─────▶ Terminated
//!    └──────────────── stop() ──────────────────┘
//! ```
//!
//! `stop()` es idempotente desde cualquier estado: marca la
//! cancelación, pasa a `Terminated` y no se emite ningún comando
//! más. Una petición pendiente se abandona.

mod arduino;
mod exec;
mod scope;
mod value;

pub use value::{ArrayValue, ObjectHandle, Pointer, RuntimeValue, StructValue};

use crate::ast::{Node, Value};
use crate::command::{Command, CommandSink, Payload};
use crate::platform::Platform;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Topes de ejecución que garantizan la terminación de sketches
/// no confiables.
#[derive(Copy, Clone, Debug)]
pub struct ExecutionConfig {
    /// Invocaciones de `loop()` antes de terminar.
    pub max_loop_iterations: u32,

    /// Iteraciones de cualquier ciclo interno del sketch.
    pub max_inner_iterations: u32,

    /// Profundidad de la pila de llamadas de usuario.
    pub max_recursion_depth: u32,

    /// Tope opcional de comandos emitidos.
    pub max_commands: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            max_loop_iterations: 3,
            max_inner_iterations: 10_000,
            max_recursion_depth: 64,
            max_commands: None,
        }
    }
}

/// Estado observable del intérprete.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    AwaitingResponse,
    Terminated,
}

/// Mensajes hacia el hilo ejecutor.
pub(crate) enum Control {
    Response { request_id: u64, value: Value },
    Stop,
}

/// Fachada del intérprete.
///
/// Cada instancia es dueña de su AST, su pila de alcances y su
/// vista del registro de bibliotecas; no existe estado compartido
/// entre intérpretes.
pub struct Interpreter {
    program: Option<Node>,
    platform: Platform,
    config: ExecutionConfig,
    sink: Option<Box<dyn CommandSink>>,
    state: Arc<Mutex<State>>,
    cancel: Arc<AtomicBool>,
    control: Sender<Control>,
    control_rx: Option<Receiver<Control>>,
    worker: Option<JoinHandle<()>>,
}

impl Interpreter {
    pub fn new(
        program: Node,
        platform: Platform,
        config: ExecutionConfig,
        sink: Box<dyn CommandSink>,
    ) -> Self {
        let (control, control_rx) = mpsc::channel();

        Interpreter {
            program: Some(program),
            platform,
            config,
            sink: Some(sink),
            state: Arc::new(Mutex::new(State::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
            control,
            control_rx: Some(control_rx),
            worker: None,
        }
    }

    /// Estado actual.
    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arranca la ejecución sobre el hilo dedicado. Las llamadas
    /// posteriores a la primera no tienen efecto.
    pub fn start(&mut self) {
        let parts = (
            self.program.take(),
            self.sink.take(),
            self.control_rx.take(),
        );

        let (program, sink, control_rx) = match parts {
            (Some(program), Some(sink), Some(control_rx)) => (program, sink, control_rx),
            _ => {
                log::warn!("interpreter already started");
                return;
            }
        };

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != State::Idle {
                return;
            }

            *state = State::Running;
        }

        let platform = self.platform;
        let config = self.config;
        let state = Arc::clone(&self.state);
        let cancel = Arc::clone(&self.cancel);

        self.worker = Some(thread::spawn(move || {
            let executor = exec::Executor::new(platform, config, sink, control_rx, cancel, state);
            executor.run(&program);
        }));
    }

    /// Entrega la respuesta de una petición pendiente.
    ///
    /// Una respuesta sin petición pendiente, o con un id que no
    /// corresponde, se registra y se ignora sin alterar el estado.
    pub fn handle_response(&self, request_id: u64, value: Value) {
        if self.state() != State::AwaitingResponse {
            log::warn!(
                "response for request {} ignored: no request outstanding",
                request_id
            );

            return;
        }

        if self
            .control
            .send(Control::Response { request_id, value })
            .is_err()
        {
            log::warn!("response for request {} ignored: executor is gone", request_id);
        }
    }

    /// Cancela la ejecución. Idempotente desde cualquier estado;
    /// después de esta llamada no se emite ningún comando más.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = State::Terminated;
        }

        // Despierta al ejecutor si está esperando una respuesta
        let _ = self.control.send(Control::Stop);
    }

    /// Espera a que el hilo ejecutor termine.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

/// Ejecuta un programa hasta su terminación, sirviendo cada
/// petición con la siguiente respuesta de la lista (cero una vez
/// agotada) y recolectando el flujo de comandos completo.
///
/// Este es el ciclo de manejo que comparten el driver de línea de
/// comandos y las pruebas de integración.
pub fn run_to_completion(
    program: Node,
    platform: Platform,
    config: ExecutionConfig,
    responses: Vec<Value>,
) -> Vec<Command> {
    let (commands_tx, commands_rx) = mpsc::channel::<Command>();

    let sink = Box::new(move |command: Command| {
        let _ = commands_tx.send(command);
    });

    let mut interpreter = Interpreter::new(program, platform, config, sink);
    interpreter.start();

    let mut responses = responses.into_iter();
    let mut commands = Vec::new();

    for command in commands_rx {
        let request = request_id_of(&command);
        commands.push(command);

        if let Some(request_id) = request {
            let value = responses.next().unwrap_or(Value::Int32(0));
            interpreter.handle_response(request_id, value);
        }
    }

    interpreter.wait();
    commands
}

/// Id de petición de un comando, si el comando es una petición.
pub fn request_id_of(command: &Command) -> Option<u64> {
    match &command.payload {
        Payload::PinRequest { request_id, .. }
        | Payload::ClockRequest { request_id }
        | Payload::LibraryMethodRequest { request_id, .. } => Some(*request_id),

        _ => None,
    }
}

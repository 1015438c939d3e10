//! Pruebas de integración del intérprete: escenarios completos
//! fuente → flujo de comandos, el contrato de equivalencia y los
//! topes de seguridad.

use interpreter::ast::Value;
use interpreter::command::{Command, CommandKind, Payload};
use interpreter::interp::{self, ExecutionConfig, Interpreter, State};
use interpreter::platform::Platform;

use std::sync::mpsc;
use std::time::Duration;

/// Corre un sketch de inicio a fin contra el perfil indicado,
/// contestando cada petición con la siguiente respuesta.
fn run_sketch(
    source: &str,
    platform: Platform,
    config: ExecutionConfig,
    responses: Vec<Value>,
) -> Vec<Command> {
    let front = interpreter::frontend(source, platform);
    interp::run_to_completion(front.ast, platform, config, responses)
}

fn run_uno(source: &str, max_loops: u32) -> Vec<Command> {
    let config = ExecutionConfig {
        max_loop_iterations: max_loops,
        ..ExecutionConfig::default()
    };

    run_sketch(source, Platform::ArduinoUno, config, Vec::new())
}

fn kinds(commands: &[Command]) -> Vec<CommandKind> {
    commands.iter().map(|command| command.kind).collect()
}

/// Textos impresos por `SERIAL_PRINTLN`, en orden.
fn printed_lines(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .filter(|command| command.kind == CommandKind::SerialPrintln)
        .filter_map(|command| match &command.payload {
            Payload::SerialText { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn bare_minimum_emits_the_exact_stream() {
    let commands = run_uno("void setup() {} void loop() {}", 1);

    assert_eq!(
        kinds(&commands),
        vec![
            CommandKind::VersionInfo,
            CommandKind::ProgramStart,
            CommandKind::SetupStart,
            CommandKind::SetupEnd,
            CommandKind::LoopStart,
            CommandKind::FunctionCall,
            CommandKind::FunctionCall,
            CommandKind::LoopEnd,
            CommandKind::ProgramEnd,
        ]
    );

    assert_eq!(
        commands[4].payload,
        Payload::LoopStart {
            iteration: 1,
            loop_type: "main".to_string(),
        }
    );

    assert_eq!(
        commands[5].payload,
        Payload::FunctionCall {
            function: "loop".to_string(),
            iteration: 1,
            completed: false,
        }
    );

    assert_eq!(
        commands[6].payload,
        Payload::FunctionCall {
            function: "loop".to_string(),
            iteration: 1,
            completed: true,
        }
    );

    assert_eq!(
        commands[7].payload,
        Payload::LoopEnd {
            iterations: 1,
            limit_reached: true,
        }
    );
}

#[test]
fn blink_toggles_the_builtin_led() {
    let source = "\
void setup() {
    pinMode(LED_BUILTIN, OUTPUT);
}

void loop() {
    digitalWrite(LED_BUILTIN, HIGH);
    delay(1000);
    digitalWrite(LED_BUILTIN, LOW);
    delay(1000);
}
";

    let commands = run_uno(source, 2);

    assert_eq!(
        commands
            .iter()
            .filter(|c| c.kind == CommandKind::PinMode)
            .map(|c| &c.payload)
            .collect::<Vec<_>>(),
        vec![&Payload::PinMode {
            pin: 13,
            mode: "OUTPUT".to_string(),
        }]
    );

    let writes: Vec<&Payload> = commands
        .iter()
        .filter(|c| matches!(c.kind, CommandKind::DigitalWrite | CommandKind::Delay))
        .map(|c| &c.payload)
        .collect();

    let on = Payload::PinWrite { pin: 13, value: 1 };
    let off = Payload::PinWrite { pin: 13, value: 0 };
    let pause = Payload::Delay { ms: 1000 };

    assert_eq!(
        writes,
        vec![&on, &pause, &off, &pause, &on, &pause, &off, &pause]
    );

    // El reloj simulado avanza con cada retardo
    let delays: Vec<u64> = commands
        .iter()
        .filter(|c| c.kind == CommandKind::Delay)
        .map(|c| c.timestamp)
        .collect();

    assert_eq!(delays, vec![0, 1000, 2000, 3000]);
}

#[test]
fn analog_read_suspends_until_the_response() {
    let source = "\
void setup() {
    Serial.begin(9600);
}

void loop() {
    int sensorValue = analogRead(A0);
    Serial.println(sensorValue);
    delay(1);
}
";

    let config = ExecutionConfig {
        max_loop_iterations: 1,
        ..ExecutionConfig::default()
    };

    let commands = run_sketch(
        source,
        Platform::ArduinoUno,
        config,
        vec![Value::Int32(512)],
    );

    let request = commands
        .iter()
        .position(|c| c.kind == CommandKind::AnalogReadRequest)
        .expect("the read must emit a request");

    assert_eq!(
        commands[request].payload,
        Payload::PinRequest {
            request_id: 1,
            pin: 0,
        }
    );

    assert_eq!(commands[request + 1].kind, CommandKind::SerialPrintln);
    assert_eq!(
        commands[request + 1].payload,
        Payload::SerialText {
            value: "512".to_string(),
            format: None,
        }
    );
}

#[test]
fn requests_never_overlap_and_ids_grow() {
    let source = "\
void setup() {}
void loop() {
    int a = analogRead(0);
    int b = digitalRead(2);
    long now = millis();
    Serial.println(a + b);
    Serial.println(now);
}
";

    let config = ExecutionConfig {
        max_loop_iterations: 2,
        ..ExecutionConfig::default()
    };

    let commands = run_sketch(
        source,
        Platform::ArduinoUno,
        config,
        vec![
            Value::Int32(10),
            Value::Int32(1),
            Value::Int32(777),
            Value::Int32(20),
            Value::Int32(0),
            Value::Int32(888),
        ],
    );

    let ids: Vec<u64> = commands
        .iter()
        .filter_map(interp::request_id_of)
        .collect();

    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(printed_lines(&commands), vec!["11", "777", "20", "888"]);
}

#[test]
fn inner_loops_hit_the_iteration_cap() {
    let source = "\
void setup() {}
void loop() {
    while (1) {}
}
";

    let config = ExecutionConfig {
        max_loop_iterations: 3,
        max_inner_iterations: 25,
        ..ExecutionConfig::default()
    };

    let commands = run_sketch(source, Platform::ArduinoUno, config, Vec::new());
    let kinds = kinds(&commands);

    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[CommandKind::LoopLimitReached, CommandKind::ProgramEnd]
    );

    let limit = commands
        .iter()
        .find(|c| c.kind == CommandKind::LoopLimitReached)
        .unwrap();

    assert_eq!(limit.payload, Payload::LoopLimitReached { iterations: 25 });
}

#[test]
fn recursion_depth_is_bounded() {
    let source = "\
int forever(int n) {
    return forever(n + 1);
}

void setup() {
    forever(0);
}

void loop() {}
";

    let config = ExecutionConfig {
        max_recursion_depth: 16,
        ..ExecutionConfig::default()
    };

    let commands = run_sketch(source, Platform::ArduinoUno, config, Vec::new());
    let kinds = kinds(&commands);

    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[CommandKind::Error, CommandKind::ProgramEnd]
    );
}

#[test]
fn integer_division_by_zero_recovers_with_zero() {
    let source = "\
void setup() {
    int a = 1 / 0;
    Serial.println(a);
}

void loop() {}
";

    let commands = run_uno(source, 0);

    assert!(commands.iter().any(|c| matches!(
        &c.payload,
        Payload::Message { message } if c.kind == CommandKind::Error && message == "Division by zero"
    )));

    assert_eq!(printed_lines(&commands), vec!["0"]);

    // El error es recuperable: el programa termina con normalidad
    assert_eq!(commands.last().unwrap().kind, CommandKind::ProgramEnd);
}

#[test]
fn control_flow_matches_c_semantics() {
    let source = "\
void setup() {
    for (int i = 0; i < 3; i++) {
        if (i == 1) continue;
        Serial.println(i);
    }

    int n = 4;
    switch (n) {
        case 3: Serial.println(3); break;
        case 4: Serial.println(4);
        case 5: Serial.println(5); break;
        default: Serial.println(99);
    }

    int total = 0;
    int weights[] = {5, 10, 20};
    for (int w : weights) {
        total += w;
    }
    Serial.println(total);

    int countdown = 3;
    do {
        countdown--;
    } while (countdown > 0);
    Serial.println(countdown);
}

void loop() {}
";

    let commands = run_uno(source, 0);
    assert_eq!(printed_lines(&commands), vec!["0", "2", "4", "5", "35", "0"]);
}

#[test]
fn expressions_promote_like_c() {
    let source = "\
byte small = 200;

void setup() {
    small = small + 100;

    Serial.println(7 / 2);
    Serial.println(7.0 / 2);
    Serial.println(small);
    Serial.println(10 % 3);
    Serial.println(1 << 4);
    Serial.println(5 > 2 && 1 < 0);
    Serial.println(255, HEX);
}

void loop() {}
";

    // `small` guarda 300 truncado a su ancho declarado de 8 bits
    let commands = run_uno(source, 0);
    assert_eq!(
        printed_lines(&commands),
        vec!["3", "3.50", "44", "1", "16", "0", "FF"]
    );
}

#[test]
fn scopes_shadow_and_functions_see_globals() {
    let source = "\
int level = 1;

int bump(int by) {
    level = level + by;
    return level;
}

void setup() {
    int level = 100;
    {
        int level = 200;
        Serial.println(level);
    }

    Serial.println(level);
    Serial.println(bump(9));
}

void loop() {}
";

    let commands = run_uno(source, 0);
    assert_eq!(printed_lines(&commands), vec!["200", "100", "10"]);
}

#[test]
fn structs_pointers_and_strings_work_together() {
    let source = "\
struct Point { int x; int y; };

void setup() {
    Point p;
    p.x = 3;
    p.y = 4;
    Serial.println(p.x + p.y);

    int v = 5;
    int *q = &v;
    *q = 7;
    Serial.println(v);

    String s = \"hello\";
    s.toUpperCase();
    Serial.println(s);
    Serial.println(s.length());

    char word[] = \"cat\";
    word[0] = 'b';
    Serial.println(word);
}

void loop() {}
";

    let commands = run_uno(source, 0);
    assert_eq!(
        printed_lines(&commands),
        vec!["7", "7", "HELLO", "5", "bat"]
    );
}

#[test]
fn undefined_identifiers_error_at_first_use() {
    let source = "\
void setup() {
    Serial.println(missing);
}

void loop() {}
";

    let commands = run_uno(source, 0);

    assert!(commands.iter().any(|c| matches!(
        &c.payload,
        Payload::Message { message }
            if c.kind == CommandKind::Error && message.contains("missing")
    )));

    // El uso produce cero y la ejecución continúa
    assert_eq!(printed_lines(&commands), vec!["0"]);
}

#[test]
fn library_methods_route_through_the_registry() {
    let source = "\
#include <Servo.h>

Servo knob;

void setup() {
    knob.attach(9);
    knob.write(90);
    Serial.println(knob.attached());
    Serial.println(knob.read());
}

void loop() {}
";

    let config = ExecutionConfig {
        max_loop_iterations: 0,
        ..ExecutionConfig::default()
    };

    let commands = run_sketch(source, Platform::ArduinoUno, config, vec![Value::Int32(0)]);

    let request = commands
        .iter()
        .find(|c| c.kind == CommandKind::LibraryMethodRequest)
        .expect("external methods must emit a request");

    match &request.payload {
        Payload::LibraryMethodRequest {
            request_id,
            object,
            method,
            args,
        } => {
            assert_eq!(*request_id, 1);
            assert_eq!(object, "knob");
            assert_eq!(method, "write");
            assert_eq!(args.len(), 1);
        }

        other => panic!("unexpected payload: {:?}", other),
    }

    // `attached()` y `read()` se sirven internamente
    assert_eq!(printed_lines(&commands), vec!["1", "90"]);
}

#[test]
fn command_json_keeps_the_field_order() {
    let source = "\
void setup() {
    digitalWrite(13, HIGH);
}

void loop() {}
";

    let commands = run_uno(source, 0);
    let write = commands
        .iter()
        .find(|c| c.kind == CommandKind::DigitalWrite)
        .unwrap();

    assert_eq!(
        serde_json::to_string(write).unwrap(),
        "{\"type\":\"DIGITAL_WRITE\",\"timestamp\":0,\"pin\":13,\"value\":1}"
    );
}

#[test]
fn the_same_ast_replays_identically_through_the_codec() {
    let source = "\
void setup() {
    Serial.begin(9600);
}

void loop() {
    int reading = analogRead(A0);
    if (reading > 300) {
        digitalWrite(13, HIGH);
    } else {
        digitalWrite(13, LOW);
    }

    delay(250);
}
";

    let front = interpreter::frontend(source, Platform::Esp32Nano);
    let bytes = interpreter::codec::encode(&front.ast);
    let replayed = interpreter::codec::decode(&bytes).expect("well-formed stream");

    let config = ExecutionConfig {
        max_loop_iterations: 3,
        ..ExecutionConfig::default()
    };

    let responses = vec![Value::Int32(100), Value::Int32(301), Value::Int32(300)];

    let first = interp::run_to_completion(
        front.ast,
        Platform::Esp32Nano,
        config,
        responses.clone(),
    );

    let second = interp::run_to_completion(replayed, Platform::Esp32Nano, config, responses);

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(a.equivalent(b), "diverged at {:?} vs {:?}", a, b);
    }
}

#[test]
fn stop_cancels_an_outstanding_request() {
    let source = "\
void setup() {
    int value = analogRead(0);
    Serial.println(value);
}

void loop() {}
";

    let front = interpreter::frontend(source, Platform::ArduinoUno);

    let (commands_tx, commands_rx) = mpsc::channel::<Command>();
    let sink = Box::new(move |command: Command| {
        let _ = commands_tx.send(command);
    });

    let mut machine = Interpreter::new(
        front.ast,
        Platform::ArduinoUno,
        ExecutionConfig::default(),
        sink,
    );

    machine.start();

    // Se consume el flujo hasta la petición y se cancela en vez de
    // responder
    let mut seen = Vec::new();
    while let Ok(command) = commands_rx.recv_timeout(Duration::from_secs(5)) {
        let is_request = command.kind == CommandKind::AnalogReadRequest;
        seen.push(command);

        if is_request {
            machine.stop();
            break;
        }
    }

    machine.wait();
    assert_eq!(machine.state(), State::Terminated);

    // Después de stop() no se emite ningún comando más
    assert!(commands_rx.try_recv().is_err());
    assert_eq!(seen.last().unwrap().kind, CommandKind::AnalogReadRequest);
}

#[test]
fn stop_is_idempotent() {
    let front = interpreter::frontend("void setup() {} void loop() {}", Platform::ArduinoUno);

    let mut machine = Interpreter::new(
        front.ast,
        Platform::ArduinoUno,
        ExecutionConfig::default(),
        Box::new(|_: Command| {}),
    );

    machine.stop();
    machine.stop();
    assert_eq!(machine.state(), State::Terminated);

    machine.start();
    machine.wait();
    assert_eq!(machine.state(), State::Terminated);
}

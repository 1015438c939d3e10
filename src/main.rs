//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del pipeline y expone
//! una CLI: lee un sketch (o un AST compacto), lo interpreta con
//! el perfil de plataforma indicado y escribe cada comando emitido
//! como una línea JSON en stdout. Las peticiones del intérprete se
//! sirven con una lista de respuestas predeterminadas.

use anyhow::{bail, Context};
use clap::{crate_version, Arg, Command as Cli};

use interpreter::{
    ast::Value,
    codec,
    error::Diagnostics,
    interp::{self, ExecutionConfig},
    platform::Platform,
};

use std::{
    fs,
    io::Read,
    str::FromStr,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parsing de CLI
    let args = Cli::new("Arduino sketch interpreter")
        .version(crate_version!())
        .arg(
            Arg::new("platform")
                .short('p')
                .long("platform")
                .value_name("BOARD")
                .takes_value(true)
                .default_value("uno")
                .possible_values(["uno", "esp32-nano"])
                .help("Target board profile"),
        )
        .arg(
            Arg::new("max-loops")
                .short('n')
                .long("max-loops")
                .value_name("N")
                .takes_value(true)
                .default_value("3")
                .help("loop() invocations before the run is stopped"),
        )
        .arg(
            Arg::new("emit-ast")
                .short('o')
                .long("emit-ast")
                .value_name("FILE")
                .takes_value(true)
                .help("Serialize the parsed AST to FILE instead of interpreting"),
        )
        .arg(
            Arg::new("ast")
                .long("ast")
                .help("Treat the input as a compact AST instead of source code"),
        )
        .arg(
            Arg::new("responses")
                .short('r')
                .long("responses")
                .value_name("JSON")
                .takes_value(true)
                .help("JSON array of scripted reply values for external requests"),
        )
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("SKETCH")
                .help("Sketch file ('-' for stdin)"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let platform = args.value_of("platform").unwrap();
    let platform = Platform::from_str(platform).expect("main.rs allowed a bad platform");

    let max_loops: u32 = args
        .value_of("max-loops")
        .unwrap()
        .parse()
        .context("--max-loops expects a number")?;

    let input = args.value_of("input").unwrap();

    // El árbol llega por una de dos vías: el frente completo o un
    // AST compacto ya serializado
    let ast = if args.is_present("ast") {
        let bytes = read_input_bytes(input)?;
        codec::decode(&bytes).context("Failed to decode compact AST")?
    } else {
        let source = String::from_utf8_lossy(&read_input_bytes(input)?).into_owned();
        let front = interpreter::frontend(&source, platform);

        if !front.preprocessor_diagnostics.is_empty() {
            eprint!(
                "{}",
                Diagnostics::from(front.preprocessor_diagnostics).kind("Preprocessor error")
            );
        }

        if !front.lexer_diagnostics.is_empty() {
            eprint!(
                "{}",
                Diagnostics::from(front.lexer_diagnostics).kind("Lexical error")
            );
        }

        front.ast
    };

    // Con `-o` el driver se detiene tras serializar
    if let Some(path) = args.value_of("emit-ast") {
        if path == "-" {
            bail!("Refusing to write a binary AST to stdout");
        }

        let bytes = codec::encode(&ast);
        fs::write(path, bytes).with_context(|| format!("Failed to write AST to {}", path))?;
        return Ok(());
    }

    let responses = match args.value_of("responses") {
        None => Vec::new(),
        Some(text) => parse_responses(text)?,
    };

    let config = ExecutionConfig {
        max_loop_iterations: max_loops,
        ..ExecutionConfig::default()
    };

    let commands = interp::run_to_completion(ast, platform, config, responses);
    for command in &commands {
        println!(
            "{}",
            serde_json::to_string(command).context("Failed to serialize command")?
        );
    }

    Ok(())
}

fn read_input_bytes(path: &str) -> anyhow::Result<Vec<u8>> {
    if path == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Failed to read stdin")?;

        Ok(bytes)
    } else {
        fs::read(path).with_context(|| format!("Failed to read file: {}", path))
    }
}

/// Interpreta la lista de respuestas predeterminadas.
fn parse_responses(text: &str) -> anyhow::Result<Vec<Value>> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(text).context("--responses expects a JSON array")?;

    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::String(s) => Ok(Value::Str(s)),

            serde_json::Value::Number(number) => {
                if let Some(v) = number.as_i64() {
                    Ok(Value::Int64(v))
                } else if let Some(v) = number.as_f64() {
                    Ok(Value::Double(v))
                } else {
                    bail!("Unrepresentable number in --responses")
                }
            }

            other => bail!("Unsupported response value: {}", other),
        })
        .collect()
}

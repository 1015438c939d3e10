//! Pruebas del formato binario: ida y vuelta estructural,
//! internado de strings y rechazo de flujos corruptos.

use interpreter::ast::{Node, NodeKind};
use interpreter::codec::{decode, decode_or_error, encode, CodecError};
use interpreter::lex;
use interpreter::parse::parse;
use interpreter::source::Position;

fn parse_source(source: &str) -> Node {
    let (tokens, errors) = lex::tokenize(source);
    assert!(errors.is_empty());
    parse(tokens, vec!["Servo"])
}

/// Un programa mínimo cuyos desplazamientos binarios se conocen:
/// encabezado de 16 bytes, tabla de strings vacía de 4 bytes y dos
/// registros (`Program` con un hijo `Empty`).
fn tiny_program() -> Vec<u8> {
    let program = Node::new(
        NodeKind::Program(vec![Node::new(NodeKind::Empty, Position::default())]),
        Position::default(),
    );

    encode(&program)
}

#[test]
fn round_trip_preserves_structure() {
    let source = "\
const int threshold = 200;
int samples[4] = {1, 2, 3, 4};
struct Point { int x; int y; };
enum Mode { IDLE, ACTIVE = 5 };
typedef unsigned long tick_t;

template <typename T>
T biggest(T a, T b) {
    return a > b ? a : b;
}

int smooth(int *history, int count);

void setup() {
    Servo knob;
    knob.attach(9, 500, 2500);

    for (int i = 0; i < 4; i++) {
        samples[i] = biggest(samples[i], threshold);
    }
}

void loop() {
    switch (samples[0]) {
        case 1: break;
        default: samples[0]--;
    }

    do {
        float scaled = (float) samples[1] / 2.5;
    } while (0);
}
";

    let ast = parse_source(source);
    let bytes = encode(&ast);
    let decoded = decode(&bytes).expect("well-formed stream");

    assert_eq!(decoded, ast);
}

#[test]
fn error_nodes_survive_the_round_trip() {
    let ast = parse_source("void setup() { int = 5; } void loop() {}");
    let decoded = decode(&encode(&ast)).expect("well-formed stream");

    assert_eq!(decoded, ast);
}

#[test]
fn identical_strings_share_one_entry() {
    // `sensor` aparece muchas veces; internado, sus bytes deben
    // existir una sola vez en el flujo
    let ast = parse_source(
        "int sensor = 0; void setup() { sensor = sensor + sensor; } void loop() { sensor--; }",
    );

    let bytes = encode(&ast);
    let needle = b"sensor";

    let occurrences = bytes
        .windows(needle.len())
        .filter(|window| window == needle)
        .count();

    assert_eq!(occurrences, 1);
}

#[test]
fn encoding_is_deterministic() {
    let ast = parse_source("void setup() { int a = 1; } void loop() { a++; }");
    assert_eq!(encode(&ast), encode(&ast));
}

#[test]
fn header_layout_is_stable() {
    let bytes = tiny_program();

    assert_eq!(&bytes[0..4], b"ASTP");
    assert_eq!(&bytes[4..6], &[0x00, 0x01]); // versión 0x0100, LE
    assert_eq!(&bytes[6..8], &[0x00, 0x00]); // banderas
    assert_eq!(&bytes[8..12], &[0x02, 0x00, 0x00, 0x00]); // 2 nodos
    assert_eq!(&bytes[12..16], &[0x04, 0x00, 0x00, 0x00]); // tabla

    // El flujo de nodos queda alineado a 4 bytes
    assert_eq!((16 + 4) % 4, 0);
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = tiny_program();
    bytes[0] = b'X';

    assert!(matches!(decode(&bytes), Err(CodecError::BadMagic)));
}

#[test]
fn unknown_major_version_is_rejected() {
    let mut bytes = tiny_program();
    bytes[5] = 0x02;

    assert!(matches!(
        decode(&bytes),
        Err(CodecError::UnsupportedVersion(0x0200))
    ));
}

#[test]
fn truncated_streams_are_rejected() {
    let bytes = tiny_program();

    for cut in [3, 10, 17, bytes.len() - 1].iter() {
        assert!(
            matches!(decode(&bytes[..*cut]), Err(CodecError::Truncated(_))),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn child_indices_must_respect_preorder() {
    // El registro `Program` inicia en 20; su payload trae el
    // conteo de hijos en 24..26 y el índice del hijo en 26..30
    let mut bytes = tiny_program();
    bytes[26] = 0;

    assert!(matches!(
        decode(&bytes),
        Err(CodecError::ChildIndex { parent: 0, child: 0 })
    ));

    let mut bytes = tiny_program();
    bytes[26] = 9;

    assert!(matches!(
        decode(&bytes),
        Err(CodecError::ChildIndex { parent: 0, child: 9 })
    ));
}

#[test]
fn unknown_kinds_decode_as_error_nodes() {
    // El registro del hijo `Empty` inicia en 30; su primer byte es
    // la clase
    let mut bytes = tiny_program();
    bytes[30] = 0x7F;

    let decoded = decode(&bytes).expect("the stream itself is well-formed");
    match &decoded.kind {
        NodeKind::Program(items) => match &items[0].kind {
            NodeKind::Error { raw_kind, .. } => assert_eq!(*raw_kind, Some(0x7F)),
            other => panic!("expected an error node, found {:?}", other),
        },

        other => panic!("expected a program root, found {:?}", other),
    }
}

#[test]
fn decode_or_error_degrades_to_an_error_root() {
    let root = decode_or_error(b"not an ast at all");
    assert!(matches!(root.kind, NodeKind::Error { .. }));
}

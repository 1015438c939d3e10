//! Pruebas de integración del parser: cobertura del subconjunto
//! del lenguaje, totalidad ante entradas arbitrarias y
//! recuperación mediante nodos de error.

use interpreter::ast::{BinOp, Node, NodeKind, Value};
use interpreter::lex;
use interpreter::parse::parse;

fn parse_source(source: &str) -> Node {
    let (tokens, errors) = lex::tokenize(source);
    assert!(errors.is_empty(), "unexpected lexical errors: {:?}", errors);

    parse(tokens, vec!["Servo", "Adafruit_NeoPixel", "LiquidCrystal"])
}

fn program_items(node: &Node) -> &[Node] {
    match &node.kind {
        NodeKind::Program(items) => items,
        other => panic!("expected a program root, found {:?}", other),
    }
}

/// Recorre el árbol contando nodos que satisfacen un predicado.
fn count_nodes(node: &Node, predicate: &dyn Fn(&NodeKind) -> bool) -> usize {
    let mut total = predicate(&node.kind) as usize;

    let mut walk = |child: &Node| total += count_nodes(child, predicate);
    match &node.kind {
        NodeKind::Program(items)
        | NodeKind::Compound(items)
        | NodeKind::DeclList(items)
        | NodeKind::ArrayInit(items) => items.iter().for_each(&mut walk),

        NodeKind::ExprStmt(inner) | NodeKind::Sizeof(inner) => walk(inner),

        NodeKind::If {
            condition,
            consequent,
            alternate,
        } => {
            walk(condition);
            walk(consequent);
            if let Some(alternate) = alternate {
                walk(alternate);
            }
        }

        NodeKind::While { condition, body } => {
            walk(condition);
            walk(body);
        }

        NodeKind::DoWhile { body, condition } => {
            walk(body);
            walk(condition);
        }

        NodeKind::For {
            init,
            condition,
            update,
            body,
        } => {
            init.iter().for_each(|n| walk(n));
            condition.iter().for_each(|n| walk(n));
            update.iter().for_each(|n| walk(n));
            walk(body);
        }

        NodeKind::RangeFor {
            decl,
            iterable,
            body,
        } => {
            walk(decl);
            walk(iterable);
            walk(body);
        }

        NodeKind::Switch { scrutinee, cases } => {
            walk(scrutinee);
            cases.iter().for_each(&mut walk);
        }

        NodeKind::Case { label, body } => {
            label.iter().for_each(|n| walk(n));
            body.iter().for_each(&mut walk);
        }

        NodeKind::Return(value) => value.iter().for_each(|n| walk(n)),

        NodeKind::VarDecl {
            typ,
            dimensions,
            init,
            ..
        } => {
            walk(typ);
            dimensions.iter().for_each(&mut walk);
            init.iter().for_each(|n| walk(n));
        }

        NodeKind::FuncDef {
            return_type,
            params,
            body,
            ..
        } => {
            walk(return_type);
            params.iter().for_each(&mut walk);
            walk(body);
        }

        NodeKind::FuncDecl {
            return_type,
            params,
            ..
        } => {
            walk(return_type);
            params.iter().for_each(&mut walk);
        }

        NodeKind::Param { typ, .. } => walk(typ),
        NodeKind::StructDecl { fields, .. } => fields.iter().for_each(&mut walk),
        NodeKind::EnumDecl { members, .. } => members.iter().for_each(&mut walk),
        NodeKind::EnumMember { value, .. } => value.iter().for_each(|n| walk(n)),
        NodeKind::Typedef { typ, .. } => walk(typ),
        NodeKind::TemplateDecl { decl, .. } => walk(decl),

        NodeKind::BinaryOp { lhs, rhs, .. } => {
            walk(lhs);
            walk(rhs);
        }

        NodeKind::UnaryOp { operand, .. } => walk(operand),

        NodeKind::Assignment { target, value, .. } => {
            walk(target);
            walk(value);
        }

        NodeKind::Ternary {
            condition,
            consequent,
            alternate,
        } => {
            walk(condition);
            walk(consequent);
            walk(alternate);
        }

        NodeKind::FuncCall { callee, args } => {
            walk(callee);
            args.iter().for_each(&mut walk);
        }

        NodeKind::MemberAccess { object, .. } => walk(object),

        NodeKind::ArrayAccess { array, index } => {
            walk(array);
            walk(index);
        }

        NodeKind::Cast { typ, operand } => {
            walk(typ);
            walk(operand);
        }

        NodeKind::TypeNode { template_args, .. } => template_args.iter().for_each(&mut walk),

        NodeKind::Error { .. }
        | NodeKind::Break
        | NodeKind::Continue
        | NodeKind::Empty
        | NodeKind::NumberLit(_)
        | NodeKind::StringLit(_)
        | NodeKind::CharLit(_)
        | NodeKind::Identifier(_) => (),
    }

    total
}

fn error_count(node: &Node) -> usize {
    count_nodes(node, &|kind| matches!(kind, NodeKind::Error { .. }))
}

#[test]
fn bare_minimum_has_two_functions() {
    let ast = parse_source("void setup() {} void loop() {}");
    let items = program_items(&ast);

    assert_eq!(items.len(), 2);

    match &items[0].kind {
        NodeKind::FuncDef { name, params, body, .. } => {
            assert_eq!(name, "setup");
            assert!(params.is_empty());
            assert!(matches!(&body.kind, NodeKind::Compound(items) if items.is_empty()));
        }

        other => panic!("expected a function definition, found {:?}", other),
    }

    assert!(matches!(
        &items[1].kind,
        NodeKind::FuncDef { name, .. } if name == "loop"
    ));
}

#[test]
fn parser_is_total_on_arbitrary_input() {
    let inputs = [
        "",
        ";;;",
        "int",
        "void setup( {",
        "}{}{)(",
        "int x = ;",
        "@#$%",
        "void loop() { while (1) }",
        "struct ;",
        "1 + 2",
    ];

    for input in &inputs {
        let (tokens, _) = lex::tokenize(input);
        let ast = parse(tokens, Vec::<&str>::new());
        assert!(matches!(ast.kind, NodeKind::Program(_)), "input: {}", input);
    }
}

#[test]
fn errors_are_recovered_per_statement() {
    let source = "\
void setup() {
    int = 5;
    int ok = 1;
}
void loop() {}
";

    let ast = parse_source(source);
    let items = program_items(&ast);

    // Ambas funciones sobreviven al error interno
    assert_eq!(items.len(), 2);
    assert!(error_count(&ast) >= 1);

    let ok_decls = count_nodes(&ast, &|kind| {
        matches!(kind, NodeKind::VarDecl { name, .. } if name == "ok")
    });

    assert_eq!(ok_decls, 1);
}

#[test]
fn precedence_follows_c() {
    let ast = parse_source("int x = 1 + 2 * 3;");
    let items = program_items(&ast);

    let init = match &items[0].kind {
        NodeKind::VarDecl { init: Some(init), .. } => init,
        other => panic!("expected a declaration, found {:?}", other),
    };

    match &init.kind {
        NodeKind::BinaryOp { op: BinOp::Add, rhs, .. } => {
            assert!(matches!(
                &rhs.kind,
                NodeKind::BinaryOp { op: BinOp::Mul, .. }
            ));
        }

        other => panic!("expected `+` at the root, found {:?}", other),
    }
}

#[test]
fn assignment_is_right_associative() {
    let ast = parse_source("void setup() { a = b = 1; }");

    let chained = count_nodes(&ast, &|kind| {
        matches!(kind, NodeKind::Assignment { op: None, .. })
    });

    assert_eq!(chained, 2);
}

#[test]
fn declarations_cover_arrays_pointers_and_lists() {
    let source = "\
const int limits[3] = {10, 20, 30};
int *head, tail;
unsigned long counter = 0;
char name[] = \"box\";
int grid[2][2] = {{1, 2}, {3, 4}};
";

    let ast = parse_source(source);
    let items = program_items(&ast);
    assert_eq!(error_count(&ast), 0);

    match &items[0].kind {
        NodeKind::VarDecl {
            typ,
            name,
            dimensions,
            init,
        } => {
            assert_eq!(name, "limits");
            assert_eq!(dimensions.len(), 1);
            assert!(init.is_some());
            assert!(matches!(
                &typ.kind,
                NodeKind::TypeNode { name, is_const: true, .. } if name == "int"
            ));
        }

        other => panic!("expected a declaration, found {:?}", other),
    }

    match &items[1].kind {
        NodeKind::DeclList(decls) => {
            assert_eq!(decls.len(), 2);
            assert!(matches!(
                &decls[0].kind,
                NodeKind::VarDecl { typ, name, .. }
                    if name == "head"
                        && matches!(&typ.kind, NodeKind::TypeNode { pointer: 1, .. })
            ));

            assert!(matches!(
                &decls[1].kind,
                NodeKind::VarDecl { typ, name, .. }
                    if name == "tail"
                        && matches!(&typ.kind, NodeKind::TypeNode { pointer: 0, .. })
            ));
        }

        other => panic!("expected a declaration list, found {:?}", other),
    }

    assert!(matches!(
        &items[2].kind,
        NodeKind::VarDecl { typ, .. }
            if matches!(&typ.kind, NodeKind::TypeNode { name, .. } if name == "unsigned long")
    ));

    match &items[4].kind {
        NodeKind::VarDecl { dimensions, init, .. } => {
            assert_eq!(dimensions.len(), 2);
            assert!(matches!(
                init.as_deref().map(|n| &n.kind),
                Some(NodeKind::ArrayInit(rows)) if rows.len() == 2
            ));
        }

        other => panic!("expected a declaration, found {:?}", other),
    }
}

#[test]
fn statements_cover_the_control_repertoire() {
    let source = "\
void loop() {
    if (a > 0) { b = 1; } else b = 2;
    while (b < 10) b++;
    do { b--; } while (b);
    for (int i = 0; i < 3; i++) continue;
    for (int v : values) { use(v); }
    switch (b) {
        case 1: break;
        default: b = 0;
    }
    return;
}
";

    let ast = parse_source(source);
    assert_eq!(error_count(&ast), 0);

    let expect_one = |name: &str, predicate: &dyn Fn(&NodeKind) -> bool| {
        assert_eq!(count_nodes(&ast, predicate), 1, "statement: {}", name);
    };

    expect_one("if", &|k| matches!(k, NodeKind::If { alternate: Some(_), .. }));
    expect_one("while", &|k| matches!(k, NodeKind::While { .. }));
    expect_one("do-while", &|k| matches!(k, NodeKind::DoWhile { .. }));
    expect_one("for", &|k| matches!(k, NodeKind::For { init: Some(_), .. }));
    expect_one("range-for", &|k| matches!(k, NodeKind::RangeFor { .. }));
    expect_one("switch", &|k| matches!(k, NodeKind::Switch { .. }));
    expect_one("return", &|k| matches!(k, NodeKind::Return(None)));
    expect_one("continue", &|k| matches!(k, NodeKind::Continue));
}

#[test]
fn switch_cases_keep_their_shape() {
    let source = "\
void loop() {
    switch (x) {
        case 1:
        case 2: y = 1; break;
        default: y = 0;
    }
}
";

    let ast = parse_source(source);
    let cases = count_nodes(&ast, &|k| matches!(k, NodeKind::Case { .. }));
    let defaults = count_nodes(&ast, &|k| matches!(k, NodeKind::Case { label: None, .. }));

    assert_eq!(cases, 3);
    assert_eq!(defaults, 1);
}

#[test]
fn types_and_typedefs_feed_declaration_detection() {
    let source = "\
typedef unsigned int counter_t;
counter_t total = 0;
struct Point { int x; int y; };
Point origin;
enum Mode { IDLE, ACTIVE = 5, DONE };
Servo knob;
";

    let ast = parse_source(source);
    assert_eq!(error_count(&ast), 0);

    assert_eq!(
        count_nodes(&ast, &|k| matches!(k, NodeKind::Typedef { name, .. } if name == "counter_t")),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(
            k,
            NodeKind::StructDecl { name, fields } if name == "Point" && fields.len() == 2
        )),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(
            k,
            NodeKind::EnumDecl { members, .. } if members.len() == 3
        )),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(
            k,
            NodeKind::VarDecl { name, .. } if name == "origin" || name == "knob" || name == "total"
        )),
        3
    );
}

#[test]
fn templates_take_a_single_parameter() {
    let source = "\
template <typename T>
T biggest(T a, T b) {
    return a > b ? a : b;
}
";

    let ast = parse_source(source);
    assert_eq!(error_count(&ast), 0);

    match &program_items(&ast)[0].kind {
        NodeKind::TemplateDecl { param, decl } => {
            assert_eq!(param, "T");
            assert!(matches!(
                &decl.kind,
                NodeKind::FuncDef { name, params, .. } if name == "biggest" && params.len() == 2
            ));
        }

        other => panic!("expected a template, found {:?}", other),
    }
}

#[test]
fn expressions_cover_casts_sizeof_and_members() {
    let source = "\
void loop() {
    float f = (float) total / 3;
    int size = sizeof(long);
    int also = sizeof total;
    p->next = items[2].weight;
    callback(1, 'a', \"text\");
    flags = ~mask & (ready | done) ^ 1 << 2;
}
";

    let ast = parse_source(source);
    assert_eq!(error_count(&ast), 0);

    assert_eq!(count_nodes(&ast, &|k| matches!(k, NodeKind::Cast { .. })), 1);
    assert_eq!(count_nodes(&ast, &|k| matches!(k, NodeKind::Sizeof(_))), 2);

    assert_eq!(
        count_nodes(&ast, &|k| matches!(
            k,
            NodeKind::MemberAccess { arrow: true, member, .. } if member == "next"
        )),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(k, NodeKind::CharLit(b'a'))),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(
            k,
            NodeKind::NumberLit(Value::Int32(2))
        )),
        2
    );
}

#[test]
fn function_prototypes_are_distinguished() {
    let source = "\
int read_sensor(int pin);
int read_sensor(int pin) { return pin; }
";

    let ast = parse_source(source);
    assert_eq!(error_count(&ast), 0);

    assert_eq!(
        count_nodes(&ast, &|k| matches!(k, NodeKind::FuncDecl { .. })),
        1
    );

    assert_eq!(
        count_nodes(&ast, &|k| matches!(k, NodeKind::FuncDef { .. })),
        1
    );
}

use kestrel_compiler::{
    CompileError, CompileOpts, DiagnosticList, Severity, Unit,
    ast::{BinaryOp, Expr, ExprKind, NominalChecker, Program},
    codegen::CodegenErrorType,
    compile, compile_units,
    core::bytecode::{Opcode, Operand},
};
use ruff_text_size::{TextRange, TextSize};

fn span(text: &str, needle: &str) -> TextRange {
    let start = text.find(needle).unwrap();
    TextRange::at(
        TextSize::try_from(start).unwrap(),
        TextSize::try_from(needle.len()).unwrap(),
    )
}

fn program(text: &str, body: Vec<Expr>) -> Program {
    Program {
        body,
        range: TextRange::up_to(TextSize::try_from(text.len()).unwrap()),
    }
}

fn stray_break(text: &str) -> Program {
    let brk = Expr::new(
        ExprKind::Break {
            label: None,
            value: None,
        },
        span(text, "break"),
    );
    program(text, vec![brk])
}

#[test]
fn test_compile_folds_constants() {
    let text = "1 + 2";
    let sum = Expr::binary(BinaryOp::Add, Expr::int("1"), Expr::int("2"))
        .with_range(span(text, "1 + 2"));
    let compiled = compile(
        &program(text, vec![sum]),
        text,
        "<test>",
        &NominalChecker::default(),
        CompileOpts::default(),
    )
    .unwrap();
    let instructions: Vec<_> = compiled
        .program
        .main
        .instructions()
        .map(|instruction| instruction.unwrap())
        .collect();
    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[0].opcode, Opcode::LoadInt8);
    assert_eq!(instructions[0].operand, Operand::I8(3));
    assert_eq!(instructions[1].opcode, Opcode::Return);
    assert!(compiled.warnings.is_empty());
    assert_eq!(compiled.program.functions().count(), 1);
}

#[test]
fn test_compile_error_location() {
    let text = "x\nbreak";
    let err = compile(
        &stray_break(text),
        text,
        "loops.kes",
        &NominalChecker::default(),
        CompileOpts::default(),
    )
    .unwrap_err();
    let CompileError::Failed { first, .. } = &err else {
        panic!("expected the failures of the program, got {err:?}");
    };
    assert_eq!(first.error, CodegenErrorType::InvalidBreak);
    assert_eq!(err.line_and_column(), (2, 1));
    assert_eq!(err.source_path(), "loops.kes");
}

#[test]
fn test_compile_returns_every_failure() {
    let text = "break\ndef foo; continue; end";
    let brk = Expr::new(
        ExprKind::Break {
            label: None,
            value: None,
        },
        span(text, "break"),
    );
    let method = Expr::new(
        ExprKind::MethodDefinition {
            name: "foo".into(),
            parameters: vec![],
            body: vec![Expr::new(
                ExprKind::Continue { label: None },
                span(text, "continue"),
            )],
        },
        span(text, "def foo; continue; end"),
    );
    let err = compile(
        &program(text, vec![brk, method]),
        text,
        "units.kes",
        &NominalChecker::default(),
        CompileOpts::default(),
    )
    .unwrap_err();
    assert_eq!(err.line_and_column(), (1, 1));
    let failures: Vec<_> = err
        .failures()
        .into_iter()
        .map(|failure| (failure.message.as_str(), failure.location.map(|l| l.line.get())))
        .collect();
    assert_eq!(
        failures,
        [
            ("cannot break outside of a loop", Some(1)),
            ("cannot continue outside of a loop", Some(2)),
        ]
    );
}

fn never_runs(text: &str) -> Program {
    let condition = Expr::boolean(false).with_range(span(text, "false"));
    let while_loop = Expr::new(
        ExprKind::While {
            label: None,
            condition: Box::new(condition),
            body: vec![Expr::call(None, "x", vec![]).with_range(span(text, "x"))],
        },
        span(text, text),
    );
    program(text, vec![while_loop])
}

#[test]
fn test_compile_reports_warnings() {
    let text = "while false; x; end";
    let compiled = compile(
        &never_runs(text),
        text,
        "<test>",
        &NominalChecker::default(),
        CompileOpts::default(),
    )
    .unwrap();
    assert!(
        compiled
            .warnings
            .iter()
            .all(|warning| warning.severity == Severity::Warning)
    );
    assert_eq!(compiled.warnings[0].message, "this loop will never execute");

    let quiet = compile(
        &never_runs(text),
        text,
        "<test>",
        &NominalChecker::default(),
        CompileOpts {
            warnings: false,
            ..CompileOpts::default()
        },
    )
    .unwrap();
    assert!(quiet.warnings.is_empty());
}

#[test]
fn test_compile_units_shares_diagnostics() {
    let good_text = "7";
    let good = program(good_text, vec![Expr::int("7").with_range(span(good_text, "7"))]);
    let bad_text = "break";
    let bad = stray_break(bad_text);
    let units = [
        Unit {
            program: &good,
            source: good_text,
            source_path: "good.kes",
        },
        Unit {
            program: &bad,
            source: bad_text,
            source_path: "bad.kes",
        },
        Unit {
            program: &good,
            source: good_text,
            source_path: "again.kes",
        },
    ];
    let diagnostics = DiagnosticList::new();
    let results = compile_units(
        &units,
        &NominalChecker::default(),
        &CompileOpts::default(),
        &diagnostics,
    );
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(results[1].as_ref().unwrap_err().source_path(), "bad.kes");
    assert!(results[2].is_ok());

    let recorded = diagnostics.into_inner();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].severity, Severity::Failure);
    assert_eq!(recorded[0].source_path, "bad.kes");
}

use pretty_assertions::assert_eq;

use crate::parser::ast::{Expr, ForBinding, InfixOp, Stmt};
use crate::parser::{parse_program, tokenize, TokenKind};

fn parse_one_expr(source: &str) -> Expr {
    let program = parse_program(source).expect("parse failed");
    assert_eq!(program.statements.len(), 1, "expected a single statement");
    match program.statements.into_iter().next().unwrap() {
        Stmt::Expr(expr) => expr,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

#[test]
fn lexes_money_literals() {
    let tokens = tokenize("$12.50 £5 EUR#3.00 JPY#150").unwrap();
    let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
    match &kinds[0] {
        TokenKind::MoneyLit(spec) => {
            assert_eq!(spec.amount, 1250);
            assert_eq!(spec.currency, "USD");
            assert_eq!(spec.scale, 2);
        }
        other => panic!("expected money literal, got {:?}", other),
    }
    match &kinds[1] {
        TokenKind::MoneyLit(spec) => {
            assert_eq!(spec.amount, 500);
            assert_eq!(spec.currency, "GBP");
        }
        other => panic!("expected money literal, got {:?}", other),
    }
    match &kinds[3] {
        TokenKind::MoneyLit(spec) => {
            assert_eq!(spec.amount, 150);
            assert_eq!(spec.currency, "JPY");
            assert_eq!(spec.scale, 0);
        }
        other => panic!("expected money literal, got {:?}", other),
    }
}

#[test]
fn lexes_duration_and_datetime_literals() {
    let tokens = tokenize("30m 2h 1w 6mo @2024-12-25T14:30:00Z @14:30").unwrap();
    let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
    match &kinds[0] {
        TokenKind::DurationLit(d) => assert_eq!(d.secs, 1800),
        other => panic!("expected duration, got {:?}", other),
    }
    match &kinds[3] {
        TokenKind::DurationLit(d) => assert_eq!(d.months, 6),
        other => panic!("expected duration, got {:?}", other),
    }
    match &kinds[4] {
        TokenKind::DatetimeLit(raw) => assert_eq!(raw, "2024-12-25T14:30:00Z"),
        other => panic!("expected datetime, got {:?}", other),
    }
    match &kinds[5] {
        TokenKind::DatetimeLit(raw) => assert_eq!(raw, "14:30"),
        other => panic!("expected time, got {:?}", other),
    }
}

#[test]
fn lexes_path_vs_protected_ident() {
    let tokens = tokenize("@./lib/util.sl @env @std/math").unwrap();
    let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
    assert_eq!(kinds[0], TokenKind::PathLit("./lib/util.sl".to_string()));
    assert_eq!(kinds[1], TokenKind::Ident("@env".to_string()));
    assert_eq!(kinds[2], TokenKind::PathLit("std/math".to_string()));
}

#[test]
fn tracks_token_positions() {
    let tokens = tokenize("let x = 1\nlet y = 2").unwrap();
    assert_eq!(tokens[0].pos.line, 1);
    assert_eq!(tokens[0].pos.column, 1);
    let second_let = &tokens[4];
    assert_eq!(second_let.kind, TokenKind::Let);
    assert_eq!(second_let.pos.line, 2);
    assert_eq!(second_let.pos.column, 1);
}

#[test]
fn parses_let_and_export() {
    let program = parse_program("let a = 1; export b = 2; export let c = 3").unwrap();
    assert_eq!(program.statements.len(), 3);
    match &program.statements[1] {
        Stmt::Let { name, export, .. } => {
            assert_eq!(name, "b");
            assert!(export);
        }
        other => panic!("expected let, got {:?}", other),
    }
    match &program.statements[2] {
        Stmt::Let { name, export, .. } => {
            assert_eq!(name, "c");
            assert!(export);
        }
        other => panic!("expected let, got {:?}", other),
    }
}

#[test]
fn operator_precedence() {
    let expr = parse_one_expr("1 + 2 * 3 == 7 && true");
    match expr {
        Expr::Infix {
            op: InfixOp::And,
            left,
            ..
        } => match *left {
            Expr::Infix {
                op: InfixOp::Eq, ..
            } => {}
            other => panic!("expected ==, got {:?}", other),
        },
        other => panic!("expected &&, got {:?}", other),
    }
}

#[test]
fn is_not_parses_as_single_operator() {
    let expr = parse_one_expr("a is not b");
    match expr {
        Expr::Infix {
            op: InfixOp::IsNot, ..
        } => {}
        other => panic!("expected 'is not', got {:?}", other),
    }
}

#[test]
fn dict_literal_in_expression_position() {
    let expr = parse_one_expr(r#"{ name: "ada", "full name": "ada l" }"#);
    match expr {
        Expr::DictLit { pairs, .. } => {
            assert_eq!(pairs.len(), 2);
            assert_eq!(pairs[0].0, "name");
            assert_eq!(pairs[1].0, "full name");
        }
        other => panic!("expected dict literal, got {:?}", other),
    }
}

#[test]
fn method_call_and_member_chain() {
    let expr = parse_one_expr("user.address.city.upper()");
    match expr {
        Expr::MethodCall {
            method, receiver, ..
        } => {
            assert_eq!(method, "upper");
            assert!(matches!(*receiver, Expr::Member { .. }));
        }
        other => panic!("expected method call, got {:?}", other),
    }
}

#[test]
fn spread_in_array_and_call() {
    let expr = parse_one_expr("[1, ...rest, 2]");
    match expr {
        Expr::ArrayLit { elements, .. } => {
            assert!(matches!(elements[1], Expr::Spread { .. }));
        }
        other => panic!("expected array, got {:?}", other),
    }
    let expr = parse_one_expr("f(...args)");
    match expr {
        Expr::Call { args, .. } => assert!(matches!(args[0], Expr::Spread { .. })),
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn for_binding_forms() {
    let expr = parse_one_expr("for (x in xs) { x }");
    match expr {
        Expr::For { binding, .. } => assert!(matches!(binding, ForBinding::One(ref n) if n == "x")),
        other => panic!("expected for, got {:?}", other),
    }

    let expr = parse_one_expr("for (k, v in d) { v }");
    match expr {
        Expr::For { binding, .. } => {
            assert!(matches!(binding, ForBinding::Two(ref k, ref v) if k == "k" && v == "v"))
        }
        other => panic!("expected for, got {:?}", other),
    }

    let expr = parse_one_expr("for (xs) fn(x) { x * 2 }");
    match expr {
        Expr::For { binding, .. } => assert!(matches!(binding, ForBinding::None)),
        other => panic!("expected for, got {:?}", other),
    }
}

#[test]
fn try_requires_a_call() {
    assert!(parse_program("try f()").is_ok());
    assert!(parse_program("try obj.method(1)").is_ok());

    let err = parse_program("try 1 + 2").unwrap_err();
    assert_eq!(err[0].code, "SYN-0010");
    assert!(err[0].message.contains("call"));

    // try of a try is not a call either
    let err = parse_program("try try f()").unwrap_err();
    assert_eq!(err[0].code, "SYN-0010");
}

#[test]
fn keyword_typo_gets_hint() {
    let err = parse_program("exprot x = 1").unwrap_err();
    assert!(err[0]
        .hints
        .iter()
        .any(|h| h.contains("Did you mean 'export'?")));
}

#[test]
fn import_with_path_literal() {
    let expr = parse_one_expr("import @./lib/util.sl");
    match expr {
        Expr::Import { path, .. } => match *path {
            Expr::PathLit { ref raw, .. } => assert_eq!(raw, "./lib/util.sl"),
            ref other => panic!("expected path literal, got {:?}", other),
        },
        other => panic!("expected import, got {:?}", other),
    }
}

#[test]
fn regex_literal_with_flags() {
    let expr = parse_one_expr("r/[a-z]+/i");
    match expr {
        Expr::RegexLit { pattern, flags, .. } => {
            assert_eq!(pattern, "[a-z]+");
            assert_eq!(flags, "i");
        }
        other => panic!("expected regex literal, got {:?}", other),
    }
}

#[test]
fn reports_multiple_statement_errors() {
    let err = parse_program("let = 1\nlet ok = 2\nlet = 3").unwrap_err();
    assert!(err.len() >= 2);
}

use insta::assert_snapshot;
use strata::formula::{self, FormulaError};
use strata::model::{ArithmeticOp, PostAggregator};
use strata::unique::clamp_sketch_size;

fn field(name: &str) -> PostAggregator {
    PostAggregator::field_access(name)
}

#[test]
fn test_same_operator_chain_is_flat() {
    let tree = formula::compile("a+b+c").unwrap();
    assert_eq!(
        tree,
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Add,
            fields: vec![field("a"), field("b"), field("c")],
        }
    );
}

#[test]
fn test_mixed_operators_nest() {
    let tree = formula::compile("a+b-c").unwrap();
    assert_eq!(
        tree,
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Subtract,
            fields: vec![
                PostAggregator::Arithmetic {
                    op: ArithmeticOp::Add,
                    fields: vec![field("a"), field("b")],
                },
                field("c"),
            ],
        }
    );
}

#[test]
fn test_product_chain_is_flat() {
    let tree = formula::compile("a * b * 2").unwrap();
    assert_eq!(
        tree,
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Multiply,
            fields: vec![field("a"), field("b"), PostAggregator::constant(2.0)],
        }
    );
}

#[test]
fn test_precedence() {
    let tree = formula::compile("revenue - cost / orders").unwrap();
    assert_eq!(
        tree,
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Subtract,
            fields: vec![
                field("revenue"),
                PostAggregator::Arithmetic {
                    op: ArithmeticOp::Divide,
                    fields: vec![field("cost"), field("orders")],
                },
            ],
        }
    );
}

#[test]
fn test_statements_rejected() {
    assert!(matches!(
        formula::compile("a = 1"),
        Err(FormulaError::Malformed { .. })
    ));
    assert!(matches!(
        formula::compile("a; b"),
        Err(FormulaError::Malformed { .. })
    ));
}

#[test]
fn test_validation_never_raises() {
    assert!(formula::is_valid("(a + b) / 2"));
    assert!(!formula::is_valid("a +"));
    assert!(!formula::is_valid("max(a, b)"));
}

#[test]
fn test_native_expression_is_validated() {
    assert_eq!(
        formula::compile_native("a / b").unwrap(),
        PostAggregator::expression("a / b")
    );
    assert!(matches!(
        formula::compile_native("a > b"),
        Err(FormulaError::UnsupportedNode { .. })
    ));
}

#[test]
fn test_rename_identifiers() {
    assert_snapshot!(
        formula::rename_identifiers("(revenue - cost) / revenue_total", "_nz"),
        @"(revenue_nz - cost_nz) / revenue_total_nz"
    );
}

#[test]
fn test_sketch_size_clamp() {
    assert_eq!(clamp_sketch_size(Some(10)), Some(16));
    assert_eq!(clamp_sketch_size(Some(67_200_000)), Some(67_108_864));
    assert_eq!(clamp_sketch_size(Some(4096)), Some(4096));
    assert_eq!(clamp_sketch_size(None), None);
}

#[test]
fn test_reserved_words_compile_as_fields() {
    assert_eq!(
        formula::compile("user + visits").unwrap(),
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Add,
            fields: vec![field("user"), field("visits")],
        }
    );
    assert_eq!(
        formula::compile("interval + 1").unwrap(),
        PostAggregator::Arithmetic {
            op: ArithmeticOp::Add,
            fields: vec![field("interval"), PostAggregator::constant(1.0)],
        }
    );
    assert!(formula::is_valid("(date - end) / count"));
    assert!(!formula::is_valid("user(visits)"));
}

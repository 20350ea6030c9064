//! Post-aggregators: values derived from aggregated columns after grouping.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::formula;

/// Arithmetic operator of an `Arithmetic` post-aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }

    /// Whether `a op (b op c) == (a op b) op c`.
    pub fn is_associative(&self) -> bool {
        matches!(self, ArithmeticOp::Add | ArithmeticOp::Multiply)
    }
}

/// Theta sketch set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetOp {
    Union,
    Intersect,
    Not,
}

impl SetOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::Intersect => "INTERSECT",
            SetOp::Not => "NOT",
        }
    }
}

/// A post-aggregator. Its result-field name is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PostAggregator {
    #[serde(rename_all = "camelCase")]
    FieldAccess { field_name: String },

    Constant { value: f64 },

    /// Operands are applied left to right.
    Arithmetic {
        #[serde(rename = "fn")]
        op: ArithmeticOp,
        fields: Vec<PostAggregator>,
    },

    /// Evaluated natively by the datastore's expression engine.
    Expression { expression: String },

    #[serde(rename_all = "camelCase")]
    JavaScript {
        field_names: Vec<String>,
        function: String,
    },

    ThetaEstimate { field: Box<PostAggregator> },

    ThetaSetOp {
        func: SetOp,
        fields: Vec<PostAggregator>,
        size: Option<u32>,
    },

    TupleEstimate { field: Box<PostAggregator> },

    #[serde(rename_all = "camelCase")]
    TupleFilterExpr {
        field: Box<PostAggregator>,
        expression: String,
        nominal_entries: Option<u32>,
    },
}

impl PostAggregator {
    pub fn field_access(name: impl Into<String>) -> Self {
        PostAggregator::FieldAccess {
            field_name: name.into(),
        }
    }

    pub fn constant(value: f64) -> Self {
        PostAggregator::Constant { value }
    }

    pub fn expression(formula: impl Into<String>) -> Self {
        PostAggregator::Expression {
            expression: formula.into(),
        }
    }

    /// Binary arithmetic, collapsing same-operator children into one node.
    ///
    /// A left child with the same operator is always spliced in. A right
    /// child is spliced in only for `+` and `*`; `a - (b - c)` keeps its
    /// nested node because operands are applied left to right.
    pub fn arithmetic(op: ArithmeticOp, left: PostAggregator, right: PostAggregator) -> Self {
        let mut fields = Vec::new();
        match left {
            PostAggregator::Arithmetic {
                op: left_op,
                fields: left_fields,
            } if left_op == op => fields.extend(left_fields),
            other => fields.push(other),
        }
        match right {
            PostAggregator::Arithmetic {
                op: right_op,
                fields: right_fields,
            } if right_op == op && op.is_associative() => fields.extend(right_fields),
            other => fields.push(other),
        }
        PostAggregator::Arithmetic { op, fields }
    }

    pub fn theta_estimate(field: PostAggregator) -> Self {
        PostAggregator::ThetaEstimate {
            field: Box::new(field),
        }
    }

    pub fn theta_set_op(func: SetOp, fields: Vec<PostAggregator>, size: Option<u32>) -> Self {
        PostAggregator::ThetaSetOp { func, fields, size }
    }

    pub fn tuple_estimate(field: PostAggregator) -> Self {
        PostAggregator::TupleEstimate {
            field: Box::new(field),
        }
    }

    pub fn tuple_filter_expr(
        field: PostAggregator,
        expression: impl Into<String>,
        nominal_entries: Option<u32>,
    ) -> Self {
        PostAggregator::TupleFilterExpr {
            field: Box::new(field),
            expression: expression.into(),
            nominal_entries,
        }
    }

    pub fn children(&self) -> Vec<&PostAggregator> {
        match self {
            PostAggregator::Arithmetic { fields, .. }
            | PostAggregator::ThetaSetOp { fields, .. } => fields.iter().collect(),
            PostAggregator::ThetaEstimate { field }
            | PostAggregator::TupleEstimate { field }
            | PostAggregator::TupleFilterExpr { field, .. } => vec![field.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Every result field this post-aggregator reads, at any depth.
    pub fn field_refs(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs(&self, refs: &mut BTreeSet<String>) {
        match self {
            PostAggregator::FieldAccess { field_name } => {
                refs.insert(field_name.clone());
            }
            PostAggregator::Expression { expression } => {
                refs.extend(formula::identifiers(expression));
            }
            PostAggregator::JavaScript { field_names, .. } => {
                refs.extend(field_names.iter().cloned());
            }
            _ => {
                for child in self.children() {
                    child.collect_refs(refs);
                }
            }
        }
    }

    /// Rewrite top-down: where `f` returns a replacement, it is used as is
    /// and its subtree is not visited again.
    pub fn rewrite(&self, f: &mut dyn FnMut(&PostAggregator) -> Option<PostAggregator>) -> Self {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            PostAggregator::Arithmetic { op, fields } => PostAggregator::Arithmetic {
                op: *op,
                fields: fields.iter().map(|c| c.rewrite(f)).collect(),
            },
            PostAggregator::ThetaSetOp { func, fields, size } => PostAggregator::ThetaSetOp {
                func: *func,
                fields: fields.iter().map(|c| c.rewrite(f)).collect(),
                size: *size,
            },
            PostAggregator::ThetaEstimate { field } => PostAggregator::ThetaEstimate {
                field: Box::new(field.rewrite(f)),
            },
            PostAggregator::TupleEstimate { field } => PostAggregator::TupleEstimate {
                field: Box::new(field.rewrite(f)),
            },
            PostAggregator::TupleFilterExpr {
                field,
                expression,
                nominal_entries,
            } => PostAggregator::TupleFilterExpr {
                field: Box::new(field.rewrite(f)),
                expression: expression.clone(),
                nominal_entries: *nominal_entries,
            },
            leaf => leaf.clone(),
        }
    }

    /// Rename every field reference through `rename`.
    pub fn rename_fields(&self, rename: &dyn Fn(&str) -> String) -> Self {
        self.rewrite(&mut |node| match node {
            PostAggregator::FieldAccess { field_name } => {
                Some(PostAggregator::field_access(rename(field_name)))
            }
            PostAggregator::Expression { expression } => Some(PostAggregator::expression(
                formula::rename_identifiers_with(expression, rename),
            )),
            PostAggregator::JavaScript {
                field_names,
                function,
            } => Some(PostAggregator::JavaScript {
                field_names: field_names.iter().map(|n| rename(n)).collect(),
                function: function.clone(),
            }),
            _ => None,
        })
    }

    /// Druid wire form under the given result name.
    pub fn to_druid(&self, name: &str) -> Value {
        match self {
            PostAggregator::FieldAccess { field_name } => json!({
                "type": "fieldAccess",
                "name": name,
                "fieldName": field_name,
            }),
            PostAggregator::Constant { value } => json!({
                "type": "constant",
                "name": name,
                "value": value,
            }),
            PostAggregator::Arithmetic { op, fields } => json!({
                "type": "arithmetic",
                "name": name,
                "fn": op.symbol(),
                "fields": Self::druid_children(name, fields),
            }),
            PostAggregator::Expression { expression } => json!({
                "type": "expression",
                "name": name,
                "expression": expression,
            }),
            PostAggregator::JavaScript {
                field_names,
                function,
            } => json!({
                "type": "javascript",
                "name": name,
                "fieldNames": field_names,
                "function": function,
            }),
            PostAggregator::ThetaEstimate { field } => json!({
                "type": "thetaSketchEstimate",
                "name": name,
                "field": field.to_druid_child(name),
            }),
            PostAggregator::ThetaSetOp { func, fields, size } => {
                let mut out = json!({
                    "type": "thetaSketchSetOp",
                    "name": name,
                    "func": func.as_str(),
                    "fields": Self::druid_children(name, fields),
                });
                if let Some(size) = size {
                    out["size"] = json!(size);
                }
                out
            }
            PostAggregator::TupleEstimate { field } => json!({
                "type": "arrayOfDoublesSketchToEstimate",
                "name": name,
                "field": field.to_druid_child(name),
            }),
            PostAggregator::TupleFilterExpr {
                field,
                expression,
                nominal_entries,
            } => {
                let mut out = json!({
                    "type": "arrayOfDoublesFilterExpression",
                    "name": name,
                    "field": field.to_druid_child(name),
                    "expression": expression,
                });
                if let Some(n) = nominal_entries {
                    out["nominalEntries"] = json!(n);
                }
                out
            }
        }
    }

    fn to_druid_child(&self, parent: &str) -> Value {
        match self {
            PostAggregator::FieldAccess { field_name } => self.to_druid(field_name),
            other => other.to_druid(parent),
        }
    }

    fn druid_children(parent: &str, fields: &[PostAggregator]) -> Vec<Value> {
        fields.iter().map(|f| f.to_druid_child(parent)).collect()
    }
}

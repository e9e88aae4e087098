// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Integer expression evaluator for rate and parameter expressions.
//!
//! This module owns evaluation only. Turning a source string into an
//! [`Expr`] tree is the arithmetic expression *parser*'s job, which is an
//! external collaborator (out of scope here, same as spec.md describes it).
//! Callers build trees directly, typically once at graph-construction time.

use crate::error::{Result, Spider2Error};

/// Binary operators over `i64`. Comparisons return `0`/`1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
}

/// An integer expression tree, evaluated against a parameter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i64),
    Param(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn constant(value: i64) -> Self {
        Expr::Const(value)
    }

    pub fn param(index: usize) -> Self {
        Expr::Param(index)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Evaluate against a resolved parameter table.
    pub fn eval(&self, params: &[i64]) -> Result<i64> {
        match self {
            Expr::Const(v) => Ok(*v),
            Expr::Param(idx) => params.get(*idx).copied().ok_or(Spider2Error::BadParamRef {
                index: *idx,
                param_count: params.len(),
            }),
            Expr::Unary(op, inner) => {
                let v = inner.eval(params)?;
                match op {
                    UnaryOp::Neg => v.checked_neg().ok_or_else(|| {
                        Spider2Error::ArithmeticError(format!("negation overflow on {v}"))
                    }),
                    UnaryOp::Abs => v.checked_abs().ok_or_else(|| {
                        Spider2Error::ArithmeticError(format!("abs overflow on {v}"))
                    }),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(params)?;
                let r = rhs.eval(params)?;
                eval_binary(*op, l, r)
            }
        }
    }

    /// Constant-fold the tree: evaluate any subtree with no [`Expr::Param`]
    /// leaves down to a single [`Expr::Const`]. Build-time only; never
    /// called with a live parameter table, so a fold failure (e.g. division
    /// by a constant zero) is reported but otherwise leaves the subtree
    /// untouched so the error surfaces again (with context) at real eval
    /// time.
    pub fn fold(self) -> Expr {
        match self {
            Expr::Const(_) | Expr::Param(_) => self,
            Expr::Unary(op, inner) => {
                let inner = inner.fold();
                if let Expr::Const(v) = inner {
                    if let Ok(folded) = Expr::Unary(op, Box::new(Expr::Const(v))).eval(&[]) {
                        return Expr::Const(folded);
                    }
                }
                Expr::Unary(op, Box::new(inner))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.fold();
                let rhs = rhs.fold();
                if let (Expr::Const(l), Expr::Const(r)) = (&lhs, &rhs) {
                    if let Ok(folded) = eval_binary(op, *l, *r) {
                        return Expr::Const(folded);
                    }
                }
                Expr::Binary(op, Box::new(lhs), Box::new(rhs))
            }
        }
    }

    /// True iff the tree references no parameters at all.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Every parameter index this tree reads, in no particular order.
    pub fn referenced_params(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut Vec<usize>) {
        match self {
            Expr::Const(_) => {}
            Expr::Param(idx) => out.push(*idx),
            Expr::Unary(_, inner) => inner.collect_params(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_params(out);
                rhs.collect_params(out);
            }
        }
    }
}

fn eval_binary(op: BinOp, l: i64, r: i64) -> Result<i64> {
    let overflow = |name: &str| {
        Spider2Error::ArithmeticError(format!("{name} overflow evaluating {l} and {r}"))
    };
    match op {
        BinOp::Add => l.checked_add(r).ok_or_else(|| overflow("addition")),
        BinOp::Sub => l.checked_sub(r).ok_or_else(|| overflow("subtraction")),
        BinOp::Mul => l.checked_mul(r).ok_or_else(|| overflow("multiplication")),
        BinOp::Div => {
            if r == 0 {
                Err(Spider2Error::ArithmeticError(format!("division of {l} by zero")))
            } else {
                l.checked_div(r).ok_or_else(|| overflow("division"))
            }
        }
        BinOp::Mod => {
            if r == 0 {
                Err(Spider2Error::ArithmeticError(format!("modulo of {l} by zero")))
            } else {
                l.checked_rem(r).ok_or_else(|| overflow("modulo"))
            }
        }
        BinOp::Pow => {
            if r < 0 {
                Err(Spider2Error::ArithmeticError(format!(
                    "negative exponent {r} not supported for integer pow"
                )))
            } else {
                let exp = u32::try_from(r)
                    .map_err(|_| Spider2Error::ArithmeticError(format!("exponent {r} too large")))?;
                l.checked_pow(exp).ok_or_else(|| overflow("pow"))
            }
        }
        BinOp::Min => Ok(l.min(r)),
        BinOp::Max => Ok(l.max(r)),
        BinOp::Eq => Ok((l == r) as i64),
        BinOp::Ne => Ok((l != r) as i64),
        BinOp::Lt => Ok((l < r) as i64),
        BinOp::Le => Ok((l <= r) as i64),
        BinOp::Gt => Ok((l > r) as i64),
        BinOp::Ge => Ok((l >= r) as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_evaluates_without_params() {
        assert_eq!(Expr::constant(42).eval(&[]).unwrap(), 42);
    }

    #[test]
    fn param_reference_reads_table() {
        let e = Expr::param(1);
        assert_eq!(e.eval(&[10, 20, 30]).unwrap(), 20);
    }

    #[test]
    fn bad_param_ref_fails() {
        let e = Expr::param(5);
        assert!(matches!(
            e.eval(&[1, 2]),
            Err(Spider2Error::BadParamRef { index: 5, param_count: 2 })
        ));
    }

    #[test]
    fn division_by_zero_fails() {
        let e = Expr::binary(BinOp::Div, Expr::constant(4), Expr::constant(0));
        assert!(matches!(e.eval(&[]), Err(Spider2Error::ArithmeticError(_))));
    }

    #[test]
    fn pow_and_min_max() {
        let pow = Expr::binary(BinOp::Pow, Expr::constant(2), Expr::constant(10));
        assert_eq!(pow.eval(&[]).unwrap(), 1024);
        let min = Expr::binary(BinOp::Min, Expr::constant(3), Expr::constant(-3));
        assert_eq!(min.eval(&[]).unwrap(), -3);
    }

    #[test]
    fn comparisons_return_zero_or_one() {
        let lt = Expr::binary(BinOp::Lt, Expr::constant(1), Expr::constant(2));
        assert_eq!(lt.eval(&[]).unwrap(), 1);
        let gt = Expr::binary(BinOp::Gt, Expr::constant(1), Expr::constant(2));
        assert_eq!(gt.eval(&[]).unwrap(), 0);
    }

    #[test]
    fn unary_neg_and_abs() {
        let neg = Expr::unary(UnaryOp::Neg, Expr::constant(5));
        assert_eq!(neg.eval(&[]).unwrap(), -5);
        let abs = Expr::unary(UnaryOp::Abs, Expr::constant(-5));
        assert_eq!(abs.eval(&[]).unwrap(), 5);
    }

    #[test]
    fn fold_collapses_constant_subtrees() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Mul, Expr::constant(2), Expr::constant(3)),
            Expr::param(0),
        )
        .fold();
        // The `2*3` subtree folds to `6`, the `+ param(0)` does not.
        match e {
            Expr::Binary(BinOp::Add, lhs, _) => assert_eq!(*lhs, Expr::Const(6)),
            other => panic!("unexpected shape after fold: {other:?}"),
        }
    }

    #[test]
    fn fold_leaves_division_by_zero_for_real_eval() {
        let e = Expr::binary(BinOp::Div, Expr::constant(1), Expr::constant(0)).fold();
        assert!(e.eval(&[]).is_err());
    }
}

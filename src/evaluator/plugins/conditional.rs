use super::super::{EvaluationContext, ExpressionEvaluator, Scope};
use crate::core::{Result, Value};
use crate::parser::ast::Expr;

pub struct ConditionalEvaluator;

impl ExpressionEvaluator for ConditionalEvaluator {
    fn name(&self) -> &'static str {
        "CONDITIONAL"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Conditional { .. })
    }

    fn evaluate(
        &self,
        expr: &Expr,
        scope: &Scope,
        context: &EvaluationContext<'_>,
    ) -> Result<Value> {
        let Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } = expr
        else {
            unreachable!();
        };

        if context.evaluate(condition, scope)?.as_bool() {
            context.evaluate(then_branch, scope)
        } else {
            context.evaluate(else_branch, scope)
        }
    }
}

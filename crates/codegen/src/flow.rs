//! Reachability of statements, used to drop code after a statement that
//! never completes normally and to warn about it.

use crate::compile::Compiler;
use alloc::vec::Vec;
use kestrel_ast::{Expr, ExprKind, PatternKind, Type};
use ruff_text_size::TextRange;

/// The range covering every statement of `body`.
pub(crate) fn body_range(body: &[Expr]) -> Option<TextRange> {
    body.iter().map(|statement| statement.range).reduce(TextRange::cover)
}

impl Compiler<'_> {
    /// Whether control can never continue past `expr`.
    pub(crate) fn never_completes(&mut self, expr: &Expr) -> bool {
        if matches!(expr.ty, Type::Never) {
            return true;
        }
        match &expr.node {
            ExprKind::Return { .. }
            | ExprKind::Throw { .. }
            | ExprKind::Break { .. }
            | ExprKind::Continue { .. } => true,
            ExprKind::Loop { label, body } => !breaks_out(body, label.as_deref()),
            ExprKind::While {
                label,
                condition,
                body,
            } => {
                self.peek_truthiness(condition) == Some(true)
                    && !breaks_out(body, label.as_deref())
            }
            ExprKind::Until {
                label,
                condition,
                body,
            } => {
                self.peek_truthiness(condition) == Some(false)
                    && !breaks_out(body, label.as_deref())
            }
            ExprKind::If {
                condition,
                then_body,
                else_body,
            } => self.branches_never_complete(condition, then_body, else_body, false),
            ExprKind::Unless {
                condition,
                then_body,
                else_body,
            } => self.branches_never_complete(condition, then_body, else_body, true),
            ExprKind::Do {
                body,
                catches,
                finally,
            } => {
                let finally_diverges = finally
                    .as_deref()
                    .is_some_and(|finally| self.body_never_completes(finally));
                finally_diverges || (catches.is_empty() && self.body_never_completes(body))
            }
            _ => false,
        }
    }

    fn body_never_completes(&mut self, body: &[Expr]) -> bool {
        body.iter().any(|statement| self.never_completes(statement))
    }

    fn branches_never_complete(
        &mut self,
        condition: &Expr,
        then_body: &[Expr],
        else_body: &[Expr],
        negate: bool,
    ) -> bool {
        match self.peek_truthiness(condition) {
            Some(truthy) if truthy != negate => self.body_never_completes(then_body),
            Some(_) => self.body_never_completes(else_body),
            None => self.body_never_completes(then_body) && self.body_never_completes(else_body),
        }
    }
}

/// Whether `body` contains a `break` that leaves the loop labelled `label`.
/// Unlabelled breaks count unless a nested loop captures them; nothing is
/// looked up across function boundaries.
pub(crate) fn breaks_out(body: &[Expr], label: Option<&str>) -> bool {
    body.iter().any(|statement| breaks_out_of(statement, label, 0))
}

fn breaks_out_of(expr: &Expr, label: Option<&str>, loop_nesting: usize) -> bool {
    match &expr.node {
        ExprKind::Break {
            label: target,
            value,
        } => {
            let leaves = match target.as_deref() {
                None => loop_nesting == 0,
                Some(target) => Some(target) == label,
            };
            leaves
                || value
                    .as_deref()
                    .is_some_and(|value| breaks_out_of(value, label, loop_nesting))
        }
        ExprKind::Closure { .. }
        | ExprKind::Spawn { .. }
        | ExprKind::MethodDefinition { .. }
        | ExprKind::NamespaceDeclaration { .. } => false,
        _ => {
            let nesting = loop_nesting + usize::from(expr.loop_label().is_some());
            children(expr).any(|child| breaks_out_of(child, label, nesting))
        }
    }
}

/// Direct subexpressions of `expr`, in evaluation order.
pub(crate) fn children(expr: &Expr) -> impl Iterator<Item = &Expr> {
    let mut nodes: Vec<&Expr> = Vec::new();
    match &expr.node {
        ExprKind::ArrayList(elements) => nodes.extend(elements),
        ExprKind::Unary { operand, .. } => nodes.push(operand),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            nodes.extend([&**left, &**right]);
        }
        ExprKind::VariableDeclaration { value, .. } => nodes.extend(value.as_deref()),
        ExprKind::Assignment { target, value, .. } => nodes.extend([&**target, &**value]),
        ExprKind::If {
            condition,
            then_body,
            else_body,
        }
        | ExprKind::Unless {
            condition,
            then_body,
            else_body,
        } => {
            nodes.push(condition);
            nodes.extend(then_body);
            nodes.extend(else_body);
        }
        ExprKind::While {
            condition, body, ..
        }
        | ExprKind::Until {
            condition, body, ..
        } => {
            nodes.push(condition);
            nodes.extend(body);
        }
        ExprKind::Loop { body, .. } => nodes.extend(body),
        ExprKind::DoWhile {
            body, condition, ..
        }
        | ExprKind::DoUntil {
            body, condition, ..
        } => {
            nodes.extend(body);
            nodes.push(condition);
        }
        ExprKind::ForIn { iterable, body, .. } => {
            nodes.push(iterable);
            nodes.extend(body);
        }
        ExprKind::NumericFor {
            initialiser,
            condition,
            increment,
            body,
            ..
        } => {
            nodes.extend(initialiser.as_deref());
            nodes.extend(condition.as_deref());
            nodes.extend(body);
            nodes.extend(increment.as_deref());
        }
        ExprKind::Break { value, .. }
        | ExprKind::Return { value }
        | ExprKind::Throw { value } => nodes.extend(value.as_deref()),
        ExprKind::Do {
            body,
            catches,
            finally,
        } => {
            nodes.extend(body);
            for clause in catches {
                if let PatternKind::Value(value) = &clause.pattern.kind {
                    nodes.push(value);
                }
                nodes.extend(&clause.body);
            }
            nodes.extend(finally.iter().flatten());
        }
        ExprKind::MethodCall {
            receiver,
            arguments,
            ..
        } => {
            nodes.extend(receiver.as_deref());
            nodes.extend(arguments);
        }
        ExprKind::Closure { body, .. }
        | ExprKind::Spawn { body }
        | ExprKind::NamespaceDeclaration { body, .. }
        | ExprKind::MethodDefinition { body, .. } => nodes.extend(body),
        _ => {}
    }
    nodes.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: ExprKind) -> Expr {
        Expr::new(kind, TextRange::default())
    }

    fn brk(label: Option<&str>) -> Expr {
        node(ExprKind::Break {
            label: label.map(Into::into),
            value: None,
        })
    }

    #[test]
    fn test_breaks_out_ignores_inner_loops() {
        let inner = node(ExprKind::Loop {
            label: None,
            body: vec![brk(None)],
        });
        assert!(!breaks_out(&[inner], None));

        let labelled = node(ExprKind::Loop {
            label: None,
            body: vec![brk(Some("outer"))],
        });
        assert!(breaks_out(&[labelled], Some("outer")));
    }

    #[test]
    fn test_breaks_out_stops_at_closures() {
        let closure = node(ExprKind::Closure {
            parameters: vec![],
            body: vec![brk(None)],
        });
        assert!(!breaks_out(&[closure], None));
    }

    #[test]
    fn test_breaks_out_through_conditionals() {
        let conditional = node(ExprKind::If {
            condition: Box::new(Expr::ident("x", Type::Untyped)),
            then_body: vec![brk(None)],
            else_body: vec![],
        });
        assert!(breaks_out(&[conditional], None));
    }

    #[test]
    fn test_body_range_covers_statements() {
        let a = Expr::nil().with_range(TextRange::new(2.into(), 5.into()));
        let b = Expr::nil().with_range(TextRange::new(9.into(), 12.into()));
        assert_eq!(body_range(&[a, b]), Some(TextRange::new(2.into(), 12.into())));
        assert_eq!(body_range(&[]), None);
    }
}

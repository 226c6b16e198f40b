//! Branch nodes and their condition language.
//!
//! A branch holds an ordered list of `if` blocks (the first `case` followed
//! by the `other` cases) and a mandatory default: either an else node or an
//! error. At runtime the first block whose condition is true wins.

use crate::literal::{Literal, LiteralMap};
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        };
        f.write_str(op)
    }
}

/// Logical connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConjunctionOperator {
    And,
    Or,
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A constant.
    Primitive(Literal),
    /// The name of one of the branch node's inputs.
    Var(String),
}

impl Operand {
    fn value<'a>(&'a self, inputs: &'a LiteralMap) -> Result<&'a Literal, ConditionError> {
        match self {
            Self::Primitive(literal) => Ok(literal),
            Self::Var(name) => inputs
                .get(name)
                .ok_or_else(|| ConditionError::UnknownVar { var: name.clone() }),
        }
    }
}

/// A comparison between two operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonExpression {
    pub operator: ComparisonOperator,
    pub left_value: Operand,
    pub right_value: Operand,
}

/// Two expressions joined by `and` / `or`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjunctionExpression {
    pub operator: ConjunctionOperator,
    pub left_expression: Box<BooleanExpression>,
    pub right_expression: Box<BooleanExpression>,
}

/// A branch condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanExpression {
    Comparison(ComparisonExpression),
    Conjunction(ConjunctionExpression),
}

/// Why a condition could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// An operand names an input the branch node does not have.
    UnknownVar { var: String },
    /// The operands cannot be compared with the operator.
    Incomparable {
        left: &'static str,
        operator: ComparisonOperator,
        right: &'static str,
    },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVar { var } => write!(f, "condition references unknown input '{var}'"),
            Self::Incomparable {
                left,
                operator,
                right,
            } => write!(f, "cannot compare {left} {operator} {right}"),
        }
    }
}

impl std::error::Error for ConditionError {}

impl BooleanExpression {
    /// `left <op> right`.
    #[must_use]
    pub fn compare(operator: ComparisonOperator, left: Operand, right: Operand) -> Self {
        Self::Comparison(ComparisonExpression {
            operator,
            left_value: left,
            right_value: right,
        })
    }

    /// A condition that is always `value`.
    #[must_use]
    pub fn constant(value: bool) -> Self {
        Self::compare(
            ComparisonOperator::Eq,
            Operand::Primitive(Literal::Boolean(value)),
            Operand::Primitive(Literal::Boolean(true)),
        )
    }

    /// `self and other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::conjunction(ConjunctionOperator::And, self, other)
    }

    /// `self or other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::conjunction(ConjunctionOperator::Or, self, other)
    }

    fn conjunction(operator: ConjunctionOperator, left: Self, right: Self) -> Self {
        Self::Conjunction(ConjunctionExpression {
            operator,
            left_expression: Box::new(left),
            right_expression: Box::new(right),
        })
    }

    /// Evaluates the condition against the branch node's inputs.
    ///
    /// Conjunctions short-circuit.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] when an operand names an unknown input
    /// or the operand kinds cannot be compared.
    pub fn evaluate(&self, inputs: &LiteralMap) -> Result<bool, ConditionError> {
        match self {
            Self::Comparison(cmp) => {
                let left = cmp.left_value.value(inputs)?;
                let right = cmp.right_value.value(inputs)?;
                compare(cmp.operator, left, right)
            }
            Self::Conjunction(conj) => {
                let left = conj.left_expression.evaluate(inputs)?;
                match (conj.operator, left) {
                    (ConjunctionOperator::And, false) => Ok(false),
                    (ConjunctionOperator::Or, true) => Ok(true),
                    _ => conj.right_expression.evaluate(inputs),
                }
            }
        }
    }

    /// The value of the condition when every operand is a literal.
    #[must_use]
    pub fn static_value(&self) -> Option<bool> {
        if self.references_vars() {
            return None;
        }
        self.evaluate(&LiteralMap::new()).ok()
    }

    /// Input names referenced by the condition.
    #[must_use]
    pub fn vars(&self) -> Vec<&str> {
        match self {
            Self::Comparison(cmp) => [&cmp.left_value, &cmp.right_value]
                .into_iter()
                .filter_map(|op| match op {
                    Operand::Var(name) => Some(name.as_str()),
                    Operand::Primitive(_) => None,
                })
                .collect(),
            Self::Conjunction(conj) => {
                let mut vars = conj.left_expression.vars();
                vars.extend(conj.right_expression.vars());
                vars
            }
        }
    }

    fn references_vars(&self) -> bool {
        !self.vars().is_empty()
    }
}

fn compare(op: ComparisonOperator, left: &Literal, right: &Literal) -> Result<bool, ConditionError> {
    let incomparable = || ConditionError::Incomparable {
        left: left.kind_name(),
        operator: op,
        right: right.kind_name(),
    };

    if let Some(ordering) = left.partial_compare(right) {
        return Ok(match op {
            ComparisonOperator::Eq => ordering == Ordering::Equal,
            ComparisonOperator::Neq => ordering != Ordering::Equal,
            ComparisonOperator::Gt => ordering == Ordering::Greater,
            ComparisonOperator::Gte => ordering != Ordering::Less,
            ComparisonOperator::Lt => ordering == Ordering::Less,
            ComparisonOperator::Lte => ordering != Ordering::Greater,
        });
    }

    // Unordered kinds only support equality, and only against their own kind.
    if left.kind_name() != right.kind_name() {
        return Err(incomparable());
    }
    match op {
        ComparisonOperator::Eq => Ok(left == right),
        ComparisonOperator::Neq => Ok(left != right),
        _ => Err(incomparable()),
    }
}

/// A condition guarding one candidate node.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub condition: BooleanExpression,
    pub then_node: Box<Node>,
}

impl IfBlock {
    /// Creates a new block.
    #[must_use]
    pub fn new(condition: BooleanExpression, then_node: Node) -> Self {
        Self {
            condition,
            then_node: Box::new(then_node),
        }
    }
}

/// Fails the branch when no condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSpec {
    /// The node the failure is attributed to.
    pub failed_node_id: NodeId,
    pub message: String,
}

/// What happens when no condition matches.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchDefault {
    ElseNode(Box<Node>),
    Error(ErrorSpec),
}

/// The ordered condition blocks of a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct IfElseBlock {
    pub case: Vec<IfBlock>,
    pub other: Vec<IfBlock>,
    pub default: BranchDefault,
}

impl IfElseBlock {
    /// All `if` blocks in evaluation order.
    pub fn blocks(&self) -> impl Iterator<Item = &IfBlock> {
        self.case.iter().chain(self.other.iter())
    }

    /// Every candidate node in evaluation order, else node last.
    pub fn candidates(&self) -> impl Iterator<Item = &Node> {
        let else_node = match &self.default {
            BranchDefault::ElseNode(node) => Some(node.as_ref()),
            BranchDefault::Error(_) => None,
        };
        self.blocks().map(|b| b.then_node.as_ref()).chain(else_node)
    }

    pub(crate) fn candidates_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        let else_node = match &mut self.default {
            BranchDefault::ElseNode(node) => Some(node.as_mut()),
            BranchDefault::Error(_) => None,
        };
        self.case
            .iter_mut()
            .chain(self.other.iter_mut())
            .map(|b| b.then_node.as_mut())
            .chain(else_node)
    }

    /// Returns the else node, if the default is one.
    #[must_use]
    pub fn else_node(&self) -> Option<&Node> {
        match &self.default {
            BranchDefault::ElseNode(node) => Some(node),
            BranchDefault::Error(_) => None,
        }
    }
}

/// Selects one embedded node at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    pub if_else: IfElseBlock,
}

impl BranchNode {
    /// Starts a branch with its first case; the default must follow.
    #[must_use]
    pub fn when(condition: BooleanExpression, then_node: Node) -> BranchBuilder {
        BranchBuilder {
            case: vec![IfBlock::new(condition, then_node)],
        }
    }
}

/// Accumulates `if` blocks until a default closes the branch.
#[derive(Debug, Clone)]
pub struct BranchBuilder {
    case: Vec<IfBlock>,
}

impl BranchBuilder {
    /// Adds another case.
    #[must_use]
    pub fn or_when(mut self, condition: BooleanExpression, then_node: Node) -> Self {
        self.case.push(IfBlock::new(condition, then_node));
        self
    }

    /// Closes the branch with an else node.
    #[must_use]
    pub fn otherwise(self, else_node: Node) -> BranchNode {
        self.finish(BranchDefault::ElseNode(Box::new(else_node)))
    }

    /// Closes the branch with an error.
    #[must_use]
    pub fn otherwise_fail(self, failed_node_id: impl Into<NodeId>, message: impl Into<String>) -> BranchNode {
        self.finish(BranchDefault::Error(ErrorSpec {
            failed_node_id: failed_node_id.into(),
            message: message.into(),
        }))
    }

    fn finish(self, default: BranchDefault) -> BranchNode {
        let mut blocks = self.case.into_iter();
        let case: Vec<IfBlock> = blocks.next().into_iter().collect();
        BranchNode {
            if_else: IfElseBlock {
                case,
                other: blocks.collect(),
                default,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TaskNode;
    use skein_core::Identifier;

    fn var(name: &str) -> Operand {
        Operand::Var(name.to_string())
    }

    fn lit(value: impl Into<Literal>) -> Operand {
        Operand::Primitive(value.into())
    }

    fn task(id: &str) -> Node {
        Node::new(id, TaskNode::new(Identifier::task("p", "d", "t", "v1"))).expect("valid node")
    }

    #[test]
    fn comparison_against_inputs() {
        let inputs = LiteralMap::from([("x".to_string(), Literal::Integer(5))]);
        let gt = BooleanExpression::compare(ComparisonOperator::Gt, var("x"), lit(3i64));
        let lte = BooleanExpression::compare(ComparisonOperator::Lte, var("x"), lit(4.5));

        assert_eq!(gt.evaluate(&inputs), Ok(true));
        assert_eq!(lte.evaluate(&inputs), Ok(false));
    }

    #[test]
    fn conjunction_short_circuits() {
        let missing = BooleanExpression::compare(ComparisonOperator::Eq, var("nope"), lit(1i64));
        let expr = BooleanExpression::constant(false).and(missing.clone());
        assert_eq!(expr.evaluate(&LiteralMap::new()), Ok(false));

        let expr = BooleanExpression::constant(true).or(missing.clone());
        assert_eq!(expr.evaluate(&LiteralMap::new()), Ok(true));

        let err = BooleanExpression::constant(true).and(missing).evaluate(&LiteralMap::new());
        assert!(matches!(err, Err(ConditionError::UnknownVar { .. })));
    }

    #[test]
    fn mismatched_kinds_are_incomparable() {
        let expr = BooleanExpression::compare(ComparisonOperator::Eq, lit("a"), lit(true));
        assert!(matches!(
            expr.evaluate(&LiteralMap::new()),
            Err(ConditionError::Incomparable { .. })
        ));

        let ordered_bools = BooleanExpression::compare(ComparisonOperator::Gt, lit(true), lit(false));
        assert!(ordered_bools.evaluate(&LiteralMap::new()).is_err());
    }

    #[test]
    fn static_value_only_for_literal_conditions() {
        assert_eq!(BooleanExpression::constant(true).static_value(), Some(true));
        assert_eq!(BooleanExpression::constant(false).static_value(), Some(false));

        let dynamic = BooleanExpression::compare(ComparisonOperator::Eq, var("x"), lit(1i64));
        assert_eq!(dynamic.static_value(), None);
        assert_eq!(dynamic.vars(), vec!["x"]);
    }

    #[test]
    fn builder_orders_candidates() {
        let branch = BranchNode::when(BooleanExpression::constant(false), task("a"))
            .or_when(BooleanExpression::constant(true), task("b"))
            .or_when(BooleanExpression::constant(false), task("c"))
            .otherwise(task("z"));

        assert_eq!(branch.if_else.case.len(), 1);
        assert_eq!(branch.if_else.other.len(), 2);
        let ids: Vec<&str> = branch.if_else.candidates().map(|n| n.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "z"]);
        assert_eq!(branch.if_else.else_node().map(|n| n.id().as_str()), Some("z"));
    }

    #[test]
    fn error_default_has_no_else_node() {
        let branch = BranchNode::when(BooleanExpression::constant(true), task("a"))
            .otherwise_fail("b1", "no match");
        assert!(branch.if_else.else_node().is_none());
        assert_eq!(branch.if_else.candidates().count(), 1);
    }
}

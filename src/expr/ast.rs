use crate::value::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Chained comparison `a < b <= c`, true when every link holds.
    Compare {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Names read from the environment. Function names and attribute names are not included.
    pub fn free_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Name(name) => {
                out.insert(name.clone());
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_names(out)),
            Expr::Attribute { target, .. } => target.collect_names(out),
            Expr::Index { target, index } => {
                target.collect_names(out);
                index.collect_names(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_names(out)),
            Expr::Unary { operand, .. } => operand.collect_names(out),
            Expr::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Expr::Compare { first, rest } => {
                first.collect_names(out);
                rest.iter().for_each(|(_, e)| e.collect_names(out));
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_names(out);
                then.collect_names(out);
                otherwise.collect_names(out);
            }
        }
    }
}

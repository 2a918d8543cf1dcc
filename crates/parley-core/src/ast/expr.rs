//! Expression nodes of the analyzed tree

use serde::{Deserialize, Serialize};

use super::{FuncDecl, Location, Type};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    // Arithmetic
    /// Addition (+), also string concatenation and pointer offset
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Truncating division (/)
    Div,
    /// Remainder (%)
    Mod,

    // Comparison
    /// Equal (==)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,

    // Logical
    /// Short-circuit AND (&&)
    And,
    /// Short-circuit OR (||)
    Or,
}

impl BinOp {
    /// Returns the symbol representation of the operator
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical NOT (!)
    Not,
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
    None,
}

/// A call argument, optionally labelled (`P(age: 9)`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// The label, if the call site wrote one
    #[serde(default)]
    pub label: Option<String>,
    /// The argument expression
    pub value: Expr,
}

impl Argument {
    /// Create a positional argument
    #[must_use]
    pub fn positional(value: Expr) -> Self {
        Self { label: None, value }
    }

    /// Create a labelled argument
    #[must_use]
    pub fn labelled(label: impl Into<String>, value: Expr) -> Self {
        Self {
            label: Some(label.into()),
            value,
        }
    }
}

impl From<Expr> for Argument {
    fn from(value: Expr) -> Self {
        Self::positional(value)
    }
}

/// An analyzed expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// The kind of expression
    pub kind: ExprKind,
    /// The inferred type
    #[serde(default)]
    pub ty: Type,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

/// The kind of expression (without type or location)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    /// Literal value
    Literal(Literal),
    /// Reference to a named binding
    Var(String),
    /// The receiver inside a method or initializer
    SelfRef,
    /// Unary operation (-x, !flag)
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Binary operation (a + b, x == y, etc.)
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// Assignment to a variable, member or subscript; evaluates to the value
    Assign { target: Box<Expr>, value: Box<Expr> },
    /// Function call or struct construction
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    /// Property, method or enum case access (expr.name)
    Member { receiver: Box<Expr>, name: String },
    /// Subscript access (expr[index])
    Subscript { receiver: Box<Expr>, index: Box<Expr> },
    /// Function literal; a name makes it visible to its own body
    Func(Box<FuncDecl>),
    /// If expression, both branches required
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// Array literal ([1, 2, 3])
    Array(Vec<Expr>),
    /// Dictionary literal (["a": 1])
    Dictionary(Vec<(Expr, Expr)>),
}

impl Expr {
    /// Create a new expression
    #[must_use]
    pub fn new(kind: ExprKind, ty: Type, loc: Location) -> Self {
        Self { kind, ty, loc }
    }

    /// Return the same expression at a different location
    #[must_use]
    pub fn at(mut self, line: u32) -> Self {
        self.loc = Location::line(line);
        self
    }

    /// Return the same expression with a different inferred type
    #[must_use]
    pub fn typed(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    fn untyped(kind: ExprKind) -> Self {
        Self::new(kind, Type::Any, Location::default())
    }

    /// Integer literal
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::untyped(ExprKind::Literal(Literal::Int(value))).typed(Type::Int)
    }

    /// Boolean literal
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::untyped(ExprKind::Literal(Literal::Bool(value))).typed(Type::Bool)
    }

    /// String literal
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::untyped(ExprKind::Literal(Literal::String(value.into()))).typed(Type::String)
    }

    /// The `none` literal
    #[must_use]
    pub fn none() -> Self {
        Self::untyped(ExprKind::Literal(Literal::None)).typed(Type::None)
    }

    /// Variable reference
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::untyped(ExprKind::Var(name.into()))
    }

    /// `self` inside a method of the given struct
    #[must_use]
    pub fn self_ref(owner: impl Into<String>) -> Self {
        Self::untyped(ExprKind::SelfRef).typed(Type::Struct(owner.into()))
    }

    /// Unary operation
    #[must_use]
    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        let ty = match op {
            UnaryOp::Neg => Type::Int,
            UnaryOp::Not => Type::Bool,
        };
        Self::untyped(ExprKind::Unary {
            op,
            expr: Box::new(expr),
        })
        .typed(ty)
    }

    /// Binary operation; the result type follows the operator and operands
    #[must_use]
    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Self {
        let ty = match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => left.ty.clone(),
            _ => Type::Bool,
        };
        Self::untyped(ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
        .typed(ty)
    }

    /// Assignment
    #[must_use]
    pub fn assign(target: Expr, value: Expr) -> Self {
        let ty = value.ty.clone();
        Self::untyped(ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
        .typed(ty)
    }

    /// Call with positional or labelled arguments
    #[must_use]
    pub fn call(callee: Expr, args: Vec<Argument>) -> Self {
        let ty = match &callee.ty {
            Type::Function { returns, .. } => (**returns).clone(),
            _ => Type::Any,
        };
        Self::untyped(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
        .typed(ty)
    }

    /// Member access
    #[must_use]
    pub fn member(receiver: Expr, name: impl Into<String>) -> Self {
        Self::untyped(ExprKind::Member {
            receiver: Box::new(receiver),
            name: name.into(),
        })
    }

    /// Method call shorthand: `receiver.name(args)`
    #[must_use]
    pub fn method_call(receiver: Expr, name: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::call(Self::member(receiver, name), args)
    }

    /// Subscript access
    #[must_use]
    pub fn subscript(receiver: Expr, index: Expr) -> Self {
        let ty = match &receiver.ty {
            Type::Array(element) => (**element).clone(),
            Type::Dictionary(_, value) => (**value).clone(),
            _ => Type::Any,
        };
        Self::untyped(ExprKind::Subscript {
            receiver: Box::new(receiver),
            index: Box::new(index),
        })
        .typed(ty)
    }

    /// Function literal
    #[must_use]
    pub fn func(decl: FuncDecl) -> Self {
        let ty = decl.ty();
        Self::untyped(ExprKind::Func(Box::new(decl))).typed(ty)
    }

    /// If expression
    #[must_use]
    pub fn if_else(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        let ty = then_branch.ty.clone();
        Self::untyped(ExprKind::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
        .typed(ty)
    }

    /// Array literal
    #[must_use]
    pub fn array(elements: Vec<Expr>) -> Self {
        let element = elements.first().map_or(Type::Any, |e| e.ty.clone());
        Self::untyped(ExprKind::Array(elements)).typed(Type::array(element))
    }

    /// Dictionary literal
    #[must_use]
    pub fn dictionary(entries: Vec<(Expr, Expr)>) -> Self {
        let (key, value) = entries
            .first()
            .map_or((Type::Any, Type::Any), |(k, v)| (k.ty.clone(), v.ty.clone()));
        Self::untyped(ExprKind::Dictionary(entries)).typed(Type::dictionary(key, value))
    }
}

//! Statement and declaration nodes of the analyzed tree

use serde::{Deserialize, Serialize};

use super::{Block, Expr, Location, Pattern, Type};

/// An analyzed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// The kind of statement
    pub kind: StmtKind,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

/// The kind of statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    /// Expression evaluated for its side effects
    Expr(Expr),
    /// `let` or `var` binding
    Let {
        name: String,
        #[serde(default)]
        mutable: bool,
        #[serde(default)]
        ty: Type,
        #[serde(default)]
        value: Option<Expr>,
    },
    /// Named function declaration
    Func(FuncDecl),
    /// Struct declaration
    Struct(StructDecl),
    /// Enum declaration
    Enum(EnumDecl),
    /// If statement
    If {
        cond: Expr,
        then_branch: Block,
        #[serde(default)]
        else_branch: Option<Block>,
    },
    /// While loop
    While { cond: Expr, body: Block },
    /// Return from the enclosing function (or file)
    Return(Option<Expr>),
    /// Leave the innermost loop
    Break,
    /// Jump to the next iteration of the innermost loop
    Continue,
    /// Nested block
    Block(Block),
    /// Run the body of the first case whose pattern matches the subject,
    /// or the else branch when none does
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
        #[serde(default)]
        else_branch: Option<Block>,
    },
}

impl Stmt {
    /// Create a new statement
    #[must_use]
    pub fn new(kind: StmtKind, loc: Location) -> Self {
        Self { kind, loc }
    }

    /// Return the same statement at a different location
    #[must_use]
    pub fn at(mut self, line: u32) -> Self {
        self.loc = Location::line(line);
        self
    }

    /// Expression statement
    #[must_use]
    pub fn expr(expr: Expr) -> Self {
        let loc = expr.loc;
        Self::new(StmtKind::Expr(expr), loc)
    }

    /// Immutable binding (`let name = value`)
    #[must_use]
    pub fn let_binding(name: impl Into<String>, value: Expr) -> Self {
        Self::binding(name, false, value)
    }

    /// Mutable binding (`var name = value`)
    #[must_use]
    pub fn var_binding(name: impl Into<String>, value: Expr) -> Self {
        Self::binding(name, true, value)
    }

    fn binding(name: impl Into<String>, mutable: bool, value: Expr) -> Self {
        let loc = value.loc;
        Self::new(
            StmtKind::Let {
                name: name.into(),
                mutable,
                ty: value.ty.clone(),
                value: Some(value),
            },
            loc,
        )
    }

    /// `return value`
    #[must_use]
    pub fn ret(value: Expr) -> Self {
        let loc = value.loc;
        Self::new(StmtKind::Return(Some(value)), loc)
    }

    /// Bare `return`
    #[must_use]
    pub fn ret_none() -> Self {
        Self::new(StmtKind::Return(None), Location::default())
    }

    /// Function declaration
    #[must_use]
    pub fn func(decl: FuncDecl) -> Self {
        let loc = decl.loc;
        Self::new(StmtKind::Func(decl), loc)
    }

    /// Struct declaration
    #[must_use]
    pub fn structure(decl: StructDecl) -> Self {
        let loc = decl.loc;
        Self::new(StmtKind::Struct(decl), loc)
    }

    /// Enum declaration
    #[must_use]
    pub fn enumeration(decl: EnumDecl) -> Self {
        let loc = decl.loc;
        Self::new(StmtKind::Enum(decl), loc)
    }

    /// If statement
    #[must_use]
    pub fn if_then(cond: Expr, then_branch: Vec<Stmt>, else_branch: Option<Vec<Stmt>>) -> Self {
        let loc = cond.loc;
        Self::new(
            StmtKind::If {
                cond,
                then_branch: Block::new(then_branch),
                else_branch: else_branch.map(Block::new),
            },
            loc,
        )
    }

    /// While loop
    #[must_use]
    pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Self {
        let loc = cond.loc;
        Self::new(
            StmtKind::While {
                cond,
                body: Block::new(body),
            },
            loc,
        )
    }

    /// Nested block
    #[must_use]
    pub fn block(stmts: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(Block::new(stmts)), Location::default())
    }

    /// Match statement
    #[must_use]
    pub fn match_on(subject: Expr, cases: Vec<MatchCase>, else_branch: Option<Vec<Stmt>>) -> Self {
        let loc = subject.loc;
        Self::new(
            StmtKind::Match {
                subject,
                cases,
                else_branch: else_branch.map(Block::new),
            },
            loc,
        )
    }
}

/// One `case pattern: body` arm of a match statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    /// Pattern tested against the subject
    pub pattern: Pattern,
    /// Body run when the pattern matches; pattern bindings are in scope
    pub body: Block,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

impl MatchCase {
    /// Create a match arm
    #[must_use]
    pub fn new(pattern: Pattern, body: Vec<Stmt>) -> Self {
        Self {
            pattern,
            body: Block::new(body),
            loc: Location::default(),
        }
    }
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Declared or inferred type
    #[serde(default)]
    pub ty: Type,
}

impl Param {
    /// Create a new parameter
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A function declaration or literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    /// Function name; `None` for anonymous literals
    #[serde(default)]
    pub name: Option<String>,
    /// Parameters in declaration order
    #[serde(default)]
    pub params: Vec<Param>,
    /// Return type
    #[serde(default)]
    pub returns: Type,
    /// Function body
    pub body: Block,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

impl FuncDecl {
    /// Create a named function
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: Some(name.into()),
            params,
            returns: Type::Any,
            body: Block::new(body),
            loc: Location::default(),
        }
    }

    /// Create an anonymous function literal
    #[must_use]
    pub fn anonymous(params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: None,
            params,
            returns: Type::Any,
            body: Block::new(body),
            loc: Location::default(),
        }
    }

    /// Set the return type
    #[must_use]
    pub fn returning(mut self, ty: Type) -> Self {
        self.returns = ty;
        self
    }

    /// Set the source location
    #[must_use]
    pub fn at(mut self, line: u32) -> Self {
        self.loc = Location::line(line);
        self
    }

    /// The function's type
    #[must_use]
    pub fn ty(&self) -> Type {
        Type::function(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.returns.clone(),
        )
    }
}

/// A stored property of a struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    /// Property name
    pub name: String,
    /// Property type
    #[serde(default)]
    pub ty: Type,
    /// Whether the property was declared with `var`
    #[serde(default)]
    pub mutable: bool,
    /// Default value evaluated before the initializer body
    #[serde(default)]
    pub default: Option<Expr>,
}

impl PropertyDecl {
    /// Create a property without a default value
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            mutable: true,
            default: None,
        }
    }

    /// Attach a default value
    #[must_use]
    pub fn with_default(mut self, value: Expr) -> Self {
        self.default = Some(value);
        self
    }
}

/// A struct declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    /// Struct name
    pub name: String,
    /// Stored properties; offsets follow this order
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    /// Explicit initializer; synthesized from the properties when absent
    #[serde(default)]
    pub init: Option<FuncDecl>,
    /// Methods
    #[serde(default)]
    pub methods: Vec<FuncDecl>,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

impl StructDecl {
    /// Create a struct declaration with properties only
    #[must_use]
    pub fn new(name: impl Into<String>, properties: Vec<PropertyDecl>) -> Self {
        Self {
            name: name.into(),
            properties,
            init: None,
            methods: Vec::new(),
            loc: Location::default(),
        }
    }

    /// Add an explicit initializer
    #[must_use]
    pub fn with_init(mut self, init: FuncDecl) -> Self {
        self.init = Some(init);
        self
    }

    /// Add a method
    #[must_use]
    pub fn with_method(mut self, method: FuncDecl) -> Self {
        self.methods.push(method);
        self
    }
}

/// One case of an enum declaration
///
/// In JSON a case without associated values may be written as a bare name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CaseRepr")]
pub struct EnumCaseDecl {
    /// Case name
    pub name: String,
    /// Types of the associated values
    pub values: Vec<Type>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        values: Vec<Type>,
    },
}

impl From<CaseRepr> for EnumCaseDecl {
    fn from(repr: CaseRepr) -> Self {
        match repr {
            CaseRepr::Name(name) => Self {
                name,
                values: Vec::new(),
            },
            CaseRepr::Full { name, values } => Self { name, values },
        }
    }
}

impl From<&str> for EnumCaseDecl {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }
}

/// An enum declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    /// Enum name
    pub name: String,
    /// Cases in declaration order
    pub cases: Vec<EnumCaseDecl>,
    /// Source location
    #[serde(default)]
    pub loc: Location,
}

impl EnumDecl {
    /// Create an enum declaration whose cases carry no values
    #[must_use]
    pub fn new(name: impl Into<String>, cases: &[&str]) -> Self {
        Self {
            name: name.into(),
            cases: cases.iter().map(|c| EnumCaseDecl::from(*c)).collect(),
            loc: Location::default(),
        }
    }

    /// Add a case with associated values
    #[must_use]
    pub fn with_case(mut self, name: impl Into<String>, values: Vec<Type>) -> Self {
        self.cases.push(EnumCaseDecl {
            name: name.into(),
            values,
        });
        self
    }
}

//! Input tree handed to the compiler by a parser.
//!
//! Shapes the desugaring pass accepts (children in order, `?` optional,
//! `*` repeated, `name` a symbol literal):
//!
//! ```text
//! (nil) (true) (false) (self) (lit 1) (lit 1.5) (lit :s) (str "s")
//! (dstr "s" (evstr e) (str "t")*)  (array e*)  (hash k v ... (kwsplat e)?)
//! (lvar name) (lasgn name e?) (ivar name) (iasgn name e?) (gvar name)
//! (gasgn name e?) (const name) (cdecl name e?)
//! (call recv|nil name arg* (splat e)? (kwargs k v ...)? (block_pass e)?)
//! (safe_call recv name arg*) (attrasgn recv name= arg*)
//! (iter call args|nil body*) (lambda args|nil body*) (yield arg*)
//! (not e) (and a b) (or a b) (op_asgn_or asgn) (op_asgn_and asgn)
//! (block e*) (begin e*) (if c t|nil e|nil) (while c body) (until c body)
//! (while_post c body) (until_post c body)
//! (case e|nil (when (array pat*) body*)* else?)
//! (case_in e (in pat guard|nil body*)* else?)
//! (return e?) (break e?) (next e?) (redo) (retry)
//! (rescue body (resbody (array matcher*) target|nil body*)* else?)
//! (ensure body ensure_body)
//! (defn name (args ...) body*) (class name super|nil body*) (module name body*)
//! (masgn (mlhs target*) e)
//! ```
//!
//! Parameters inside `args`: a bare `name` (required), `(opt name e)`,
//! `(rest name?)`, `(kw name e?)`, `(kwrest name?)`, `(blockarg name)`,
//! `(mlhs ...)`, `(shadow name)`. Patterns inside `in`: `(pvar name)`,
//! `(pwild)`, `(parray pat* (prest name?)?)`, `(palt pat*)`,
//! `(phash (pair name pat)*)`, or any expression matched with `===`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

macro_rules! tags {
    ($($variant:ident => $name:literal,)*) => {
        /// Node tags. Tags outside this set are rejected when a tree is read.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Tag {
            $($variant,)*
        }

        impl Tag {
            pub fn from_name(name: &str) -> Option<Tag> {
                match name {
                    $($name => Some(Tag::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Tag::$variant => $name,)*
                }
            }
        }
    };
}

tags! {
    Nil => "nil",
    True => "true",
    False => "false",
    SelfRef => "self",
    Lit => "lit",
    Str => "str",
    Dstr => "dstr",
    Evstr => "evstr",
    Array => "array",
    Hash => "hash",
    Splat => "splat",
    Kwargs => "kwargs",
    Kwsplat => "kwsplat",
    BlockPass => "block_pass",
    Lvar => "lvar",
    Lasgn => "lasgn",
    Ivar => "ivar",
    Iasgn => "iasgn",
    Gvar => "gvar",
    Gasgn => "gasgn",
    Const => "const",
    Cdecl => "cdecl",
    Call => "call",
    SafeCall => "safe_call",
    Attrasgn => "attrasgn",
    Iter => "iter",
    Lambda => "lambda",
    Yield => "yield",
    Not => "not",
    And => "and",
    Or => "or",
    OpAsgnOr => "op_asgn_or",
    OpAsgnAnd => "op_asgn_and",
    Block => "block",
    Begin => "begin",
    If => "if",
    While => "while",
    Until => "until",
    WhilePost => "while_post",
    UntilPost => "until_post",
    Case => "case",
    When => "when",
    CaseIn => "case_in",
    In => "in",
    Return => "return",
    Break => "break",
    Next => "next",
    Redo => "redo",
    Retry => "retry",
    Rescue => "rescue",
    Resbody => "resbody",
    Ensure => "ensure",
    Defn => "defn",
    Class => "class",
    Module => "module",
    Masgn => "masgn",
    Mlhs => "mlhs",
    Args => "args",
    Opt => "opt",
    Rest => "rest",
    Kw => "kw",
    Kwrest => "kwrest",
    Blockarg => "blockarg",
    Shadow => "shadow",
    Pvar => "pvar",
    Pwild => "pwild",
    Parray => "parray",
    Prest => "prest",
    Palt => "palt",
    Phash => "phash",
    Pair => "pair",
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Node(Node),
    Lit(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub tag: Tag,
    pub children: Vec<Child>,
    pub pos: Option<Pos>,
}

impl Node {
    pub fn new(tag: Tag, children: Vec<Child>) -> Self {
        Self { tag, children, pos: None }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.pos = Some(Pos { line, column });
        self
    }

    pub fn child(&self, index: usize) -> Option<&Child> {
        self.children.get(index)
    }

    /// The `index`th child if it is a node (a `nil` literal reads as absent).
    pub fn node(&self, index: usize) -> Option<&Node> {
        match self.children.get(index) {
            Some(Child::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// The `index`th child as a name (symbol or string literal).
    pub fn name(&self, index: usize) -> Option<&str> {
        match self.children.get(index) {
            Some(Child::Lit(Literal::Sym(s) | Literal::Str(s))) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Str(s) => write!(f, "{s:?}"),
            Literal::Sym(s) if s.chars().any(|c| c.is_whitespace() || "()\";".contains(c)) => {
                write!(f, ":{s:?}")
            }
            Literal::Sym(s) => write!(f, ":{s}"),
        }
    }
}

impl fmt::Display for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Node(node) => write!(f, "{node}"),
            Child::Lit(lit) => write!(f, "{lit}"),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.tag.name())?;
        if let Some(pos) = self.pos {
            write!(f, "@{}:{}", pos.line, pos.column)?;
        }
        for child in &self.children {
            write!(f, " {child}")?;
        }
        write!(f, ")")
    }
}

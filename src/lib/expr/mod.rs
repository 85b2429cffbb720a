use crate::error::ConfigError;
use std::f64::consts::{E, PI};
use std::fmt;

/// Nesting limit, keeps hostile input from exhausting the stack.
const MAX_DEPTH: usize = 64;

/// Values an expression can read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub amplitude: f64,
    pub wave_length: f64,
    pub wave_length_2: f64,
    pub bed_center_x: f64,
    pub bed_center_y: f64,
    pub layer_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Var {
    X,
    Y,
    Z,
    Pi,
    E,
    Amplitude,
    WaveLength,
    WaveLength2,
    BedCenterX,
    BedCenterY,
    LayerHeight,
}

impl Var {
    fn lookup(name: &str) -> Option<Var> {
        Some(match name {
            "x" => Var::X,
            "y" => Var::Y,
            "z" => Var::Z,
            "pi" | "PI" => Var::Pi,
            "e" => Var::E,
            "amplitude" | "wave_amplitude" => Var::Amplitude,
            "wave_length" => Var::WaveLength,
            "wave_length_2" => Var::WaveLength2,
            "bed_center_x" => Var::BedCenterX,
            "bed_center_y" => Var::BedCenterY,
            "layer_height" => Var::LayerHeight,
            _ => return None,
        })
    }

    fn value(self, ctx: &Context) -> f64 {
        match self {
            Var::X => ctx.x,
            Var::Y => ctx.y,
            Var::Z => ctx.z,
            Var::Pi => PI,
            Var::E => E,
            Var::Amplitude => ctx.amplitude,
            Var::WaveLength => ctx.wave_length,
            Var::WaveLength2 => ctx.wave_length_2,
            Var::BedCenterX => ctx.bed_center_x,
            Var::BedCenterY => ctx.bed_center_y,
            Var::LayerHeight => ctx.layer_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Abs,
    Pow,
    Min,
    Max,
    Floor,
    Ceil,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "ln" | "log" => Func::Ln,
            "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "abs" | "fabs" => Func::Abs,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Atan2 | Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        let a = args[0];
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Asin => a.asin(),
            Func::Acos => a.acos(),
            Func::Atan => a.atan(),
            Func::Atan2 => a.atan2(args[1]),
            Func::Sinh => a.sinh(),
            Func::Cosh => a.cosh(),
            Func::Tanh => a.tanh(),
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            Func::Log10 => a.log10(),
            Func::Sqrt => a.sqrt(),
            Func::Abs => a.abs(),
            Func::Pow => a.powf(args[1]),
            Func::Min => a.min(args[1]),
            Func::Max => a.max(args[1]),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(Var),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval(&self, ctx: &Context) -> f64 {
        match self {
            Node::Num(v) => *v,
            Node::Var(v) => v.value(ctx),
            Node::Neg(n) => -n.eval(ctx),
            Node::Bin(op, l, r) => {
                let (l, r) = (l.eval(ctx), r.eval(ctx));
                match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                    BinOp::Rem => l % r,
                    BinOp::Pow => l.powf(r),
                }
            }
            Node::Call(f, args) => {
                let vals: Vec<f64> = args.iter().map(|a| a.eval(ctx)).collect();
                f.apply(&vals)
            }
        }
    }
}

/// A compiled surface expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl Expr {
    /// Compile `source`, rejecting anything outside the whitelisted grammar.
    pub fn compile(source: &str) -> Result<Self, ConfigError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(ConfigError::Expression(format!(
                "unexpected '{tok}' in \"{source}\""
            )));
        }
        Ok(Expr {
            source: source.to_string(),
            root,
        })
    }

    /// Evaluate with the given variable bindings. The result may be non-finite; callers decide
    /// what that means.
    pub fn eval(&self, ctx: &Context) -> f64 {
        self.root.eval(ctx)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Pow,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(v) => write!(f, "{v}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(c) => write!(f, "{c}"),
            Token::Pow => write!(f, "**"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConfigError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent, e.g. 1e-3
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ConfigError::Expression(format!("bad number '{text}'")))?;
            tokens.push(Token::Num(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            // Accept the `m.sin` / `math.pi` spelling used by older profiles.
            let name = text
                .strip_prefix("math.")
                .or_else(|| text.strip_prefix("m."))
                .unwrap_or(&text);
            if name.contains('.') {
                return Err(ConfigError::Expression(format!(
                    "attribute access is not allowed: '{text}'"
                )));
            }
            tokens.push(Token::Ident(name.to_string()));
        } else if c == '*' && chars.get(i + 1) == Some(&'*') {
            tokens.push(Token::Pow);
            i += 2;
        } else {
            let tok = match c {
                '+' | '-' | '*' | '/' | '%' => Token::Op(c),
                '^' => Token::Pow,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                _ => {
                    return Err(ConfigError::Expression(format!(
                        "unexpected character '{c}'"
                    )))
                }
            };
            tokens.push(tok);
            i += 1;
        }
    }
    if tokens.is_empty() {
        return Err(ConfigError::Expression("empty expression".into()));
    }
    Ok(tokens)
}

// expr    := term (('+' | '-') term)*
// term    := unary (('*' | '/' | '%') unary)*
// unary   := ('-' | '+') unary | power
// power   := primary (('^' | '**') unary)?
// primary := number | name | name '(' expr (',' expr)* ')' | '(' expr ')'
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), ConfigError> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(ConfigError::Expression(format!(
                "expected '{want}', found '{tok}'"
            ))),
            None => Err(ConfigError::Expression(format!(
                "expected '{want}', found end of expression"
            ))),
        }
    }

    fn enter(&mut self) -> Result<(), ConfigError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConfigError::Expression("expression nested too deeply".into()));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Node, ConfigError> {
        self.enter()?;
        let mut node = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinOp::Add } else { BinOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(node)
    }

    fn term(&mut self) -> Result<Node, ConfigError> {
        let mut node = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/' | '%'))) = self.peek() {
            let op = match *c {
                '*' => BinOp::Mul,
                '/' => BinOp::Div,
                _ => BinOp::Rem,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            node = Node::Bin(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, ConfigError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(Node::Neg(Box::new(inner)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.unary();
                self.depth -= 1;
                inner
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ConfigError> {
        let base = self.primary()?;
        if let Some(Token::Pow) = self.peek() {
            self.pos += 1;
            self.enter()?;
            // Right associative: 2^3^2 == 2^(3^2)
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ConfigError> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Node::Num(v)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let func = Func::lookup(&name).ok_or_else(|| {
                        ConfigError::Expression(format!("unknown function '{name}'"))
                    })?;
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(ConfigError::Expression(format!(
                            "{name}() takes {} argument(s), got {}",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Node::Call(func, args))
                } else {
                    Var::lookup(&name)
                        .map(Node::Var)
                        .ok_or_else(|| ConfigError::Expression(format!("unknown name '{name}'")))
                }
            }
            Some(tok) => Err(ConfigError::Expression(format!("unexpected '{tok}'"))),
            None => Err(ConfigError::Expression("unexpected end of expression".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn eval_at(src: &str, x: f64, y: f64, z: f64) -> f64 {
        let ctx = Context {
            x,
            y,
            z,
            amplitude: 2.0,
            wave_length: 20.0,
            ..Context::default()
        };
        Expr::compile(src).unwrap().eval(&ctx)
    }

    #[test]
    fn test_precedence() {
        assert_relative_eq!(eval_at("1 + 2 * 3", 0., 0., 0.), 7.0);
        assert_relative_eq!(eval_at("(1 + 2) * 3", 0., 0., 0.), 9.0);
        assert_relative_eq!(eval_at("-2 ^ 2", 0., 0., 0.), -4.0);
        assert_relative_eq!(eval_at("2 ** 3 ** 2", 0., 0., 0.), 512.0);
        assert_relative_eq!(eval_at("7 % 4 - 1", 0., 0., 0.), 2.0);
    }

    #[test]
    fn test_variables_and_functions() {
        let v = eval_at("amplitude * sin(2 * pi * x / wave_length)", 5.0, 0., 0.);
        assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        assert_relative_eq!(eval_at("max(x, y) + min(x, y)", 3.0, 4.0, 0.), 7.0);
        assert_relative_eq!(eval_at("sqrt(x*x + y*y)", 3.0, 4.0, 0.), 5.0);
        assert_relative_eq!(eval_at("1e-3 * z", 0., 0., 2.0), 0.002);
    }

    #[test]
    fn test_math_prefix() {
        assert_relative_eq!(eval_at("m.sin(m.pi / 2)", 0., 0., 0.), 1.0);
        assert_relative_eq!(eval_at("math.cos(0)", 0., 0., 0.), 1.0);
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(Expr::compile("__import__('os')").is_err());
        assert!(Expr::compile("open(x)").is_err());
        assert!(Expr::compile("foo + 1").is_err());
        assert!(Expr::compile("x.real").is_err());
        assert!(Expr::compile("x; y").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Expr::compile("").is_err());
        assert!(Expr::compile("1 +").is_err());
        assert!(Expr::compile("(1 + 2").is_err());
        assert!(Expr::compile("sin(1, 2)").is_err());
        assert!(Expr::compile("1 2").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(Expr::compile(&deep).is_err());
        let negs = format!("{}1", "-".repeat(200));
        assert!(Expr::compile(&negs).is_err());
    }

    #[test]
    fn test_division_by_zero_is_not_a_panic() {
        assert!(eval_at("1 / x", 0., 0., 0.).is_infinite());
    }
}

//! `WHERE` expression language.
//!
//! ```text
//! or      := and (OR and)*
//! and     := not (AND not)*
//! not     := NOT? atom
//! atom    := '(' or ')' | call | compare
//! call    := ident '(' arg (',' arg)? ')'
//! compare := path op (literal | path)
//! ```
//!
//! Keywords are case-insensitive; `&&`, `||` and `!` are accepted too.
//! An expression is parsed once and evaluated per visited node.

use bevy::prelude::Entity;
use regex::Regex;

use super::resolve::{resolve, PathExpr};
use super::value::{compare_values, CompareOp, PropValue};
use super::view::SceneView;

const RHS_PATH_BUILTINS: &[&str] = &["name", "path", "id", "active", "tag", "layer"];

#[derive(Debug, Clone)]
pub enum Operand {
    Literal(PropValue),
    Path(PathExpr),
}

#[derive(Debug, Clone)]
pub enum Func {
    HasComp(String),
    Contains(PathExpr, String),
    StartsWith(PathExpr, String),
    EndsWith(PathExpr, String),
    Matches(PathExpr, Regex),
}

#[derive(Debug, Clone)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        path: PathExpr,
        op: CompareOp,
        rhs: Operand,
    },
    Call(Func),
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self, String> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err("empty expression".into());
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected {} after expression", token.describe())),
        }
    }

    pub fn evaluate(&self, view: &SceneView<'_>, node: Entity) -> bool {
        match self {
            Expr::And(l, r) => l.evaluate(view, node) && r.evaluate(view, node),
            Expr::Or(l, r) => l.evaluate(view, node) || r.evaluate(view, node),
            Expr::Not(inner) => !inner.evaluate(view, node),
            Expr::Compare { path, op, rhs } => {
                let left = resolve(view, node, path);
                let right = match rhs {
                    Operand::Literal(value) => value.clone(),
                    Operand::Path(p) => resolve(view, node, p),
                };
                compare_values(&left, *op, &right)
            }
            Expr::Call(func) => match func {
                Func::HasComp(type_name) => view.has_component(node, type_name),
                Func::Contains(p, needle) => lowered(view, node, p).contains(needle.as_str()),
                Func::StartsWith(p, needle) => lowered(view, node, p).starts_with(needle.as_str()),
                Func::EndsWith(p, needle) => lowered(view, node, p).ends_with(needle.as_str()),
                Func::Matches(p, re) => {
                    let value = resolve(view, node, p);
                    !value.is_null() && re.is_match(&value.to_plain())
                }
            },
        }
    }
}

fn lowered(view: &SceneView<'_>, node: Entity, path: &PathExpr) -> String {
    let value = resolve(view, node, path);
    if value.is_null() {
        return String::new();
    }
    value.to_plain().to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Number(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{w}'"),
            Token::Str(s) => format!("\"{s}\""),
            Token::Number(n) => n.clone(),
            Token::Op(op) => format!("'{}'", op.symbol()),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '[' | ']')
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' | '!' | '<' | '>' => {
                let two: String = [Some(c), next].iter().flatten().collect();
                if let Some(op) = CompareOp::parse(&two).filter(|_| two.len() == 2) {
                    tokens.push(Token::Op(op));
                    i += 2;
                } else if c == '!' {
                    tokens.push(Token::Not);
                    i += 1;
                } else if let Some(op) = CompareOp::parse(&c.to_string()) {
                    tokens.push(Token::Op(op));
                    i += 1;
                } else {
                    return Err(format!("unexpected '{c}' at offset {i}"));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    match chars[j] {
                        // only the quote itself is escapable; `\d` etc. stay intact for matches()
                        '\\' if chars.get(j + 1) == Some(&quote) => {
                            value.push(quote);
                            j += 2;
                        }
                        ch if ch == quote => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        ch => {
                            value.push(ch);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    return Err(format!("unterminated string starting at offset {i}"));
                }
                tokens.push(Token::Str(value));
                i = j;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if is_word_char(c) => {
                let start = i;
                // `-` continues a word once it has started, so `Main-Camera` stays one token
                while i < chars.len() && (is_word_char(chars[i]) || chars[i] == '-') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Word(word),
                });
            }
            other => return Err(format!("unexpected '{other}' at offset {i}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, wanted: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            Some(token) => Err(format!("expected {} but found {}", wanted.describe(), token.describe())),
            None => Err(format!("expected {} but the expression ended", wanted.describe())),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            // NOT NOT x is legal and cancels out
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(word)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.parse_call(&word);
                }
                let path = PathExpr::parse(&word)?;
                match self.next() {
                    Some(Token::Op(op)) => {
                        let rhs = self.parse_operand()?;
                        Ok(Expr::Compare { path, op, rhs })
                    }
                    Some(token) => Err(format!(
                        "expected a comparison operator after '{word}' but found {}",
                        token.describe()
                    )),
                    None => Err(format!("'{word}' needs a comparison operator")),
                }
            }
            Some(token) => Err(format!("unexpected {}", token.describe())),
            None => Err("expression ended early".into()),
        }
    }

    /// Quoted text, numbers, `true`/`false`/`null` and unqualified words
    /// are literals. Dotted words and built-in facet names are paths.
    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(PropValue::Str(s))),
            Some(Token::Number(n)) => Ok(Operand::Literal(match n.parse::<i64>() {
                Ok(v) => PropValue::Int(v),
                Err(_) => PropValue::Float(
                    n.parse::<f64>()
                        .map_err(|_| format!("invalid number '{n}'"))?,
                ),
            })),
            Some(Token::Word(word)) => {
                let lower = word.to_ascii_lowercase();
                match lower.as_str() {
                    "true" => return Ok(Operand::Literal(PropValue::Bool(true))),
                    "false" => return Ok(Operand::Literal(PropValue::Bool(false))),
                    "null" => return Ok(Operand::Literal(PropValue::Null)),
                    _ => {}
                }
                if word.contains('.') || word.contains('[') || RHS_PATH_BUILTINS.contains(&lower.as_str()) {
                    Ok(Operand::Path(PathExpr::parse(&word)?))
                } else {
                    Ok(Operand::Literal(PropValue::Str(word)))
                }
            }
            Some(token) => Err(format!("expected a value but found {}", token.describe())),
            None => Err("expected a value but the expression ended".into()),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, String> {
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(match self.next() {
                    Some(Token::Word(w)) | Some(Token::Str(w)) | Some(Token::Number(w)) => w,
                    Some(token) => return Err(format!("bad argument {} to {name}()", token.describe())),
                    None => return Err(format!("unterminated call to {name}()")),
                });
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;

        let lower = name.to_ascii_lowercase();
        let arity = |n: usize| -> Result<(), String> {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("{name}() takes {n} argument(s), got {}", args.len()))
            }
        };
        let func = match lower.as_str() {
            "hascomp" | "hascomponent" => {
                arity(1)?;
                Func::HasComp(args[0].clone())
            }
            "contains" | "startswith" | "endswith" | "matches" => {
                arity(2)?;
                let path = PathExpr::parse(&args[0])?;
                let needle = args[1].clone();
                match lower.as_str() {
                    "contains" => Func::Contains(path, needle.to_lowercase()),
                    "startswith" => Func::StartsWith(path, needle.to_lowercase()),
                    "endswith" => Func::EndsWith(path, needle.to_lowercase()),
                    _ => Func::Matches(
                        path,
                        Regex::new(&needle).map_err(|e| format!("invalid regex in matches(): {e}"))?,
                    ),
                }
            }
            _ => return Err(format!("unknown function '{name}'")),
        };
        Ok(Expr::Call(func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Health, NodeActive, NodeLayer, NodeTag};
    use bevy::prelude::*;

    fn world_with_registry() -> World {
        let mut world = World::new();
        world.init_resource::<AppTypeRegistry>();
        {
            let registry = world.resource::<AppTypeRegistry>();
            let mut registry = registry.write();
            registry.register::<Health>();
            registry.register::<Transform>();
        }
        world
    }

    #[test]
    fn or_binds_looser_than_and_and_not() {
        let parsed = Expr::parse("a == 1 or b == 1 and not c == 1").unwrap();
        let Expr::Or(_, right) = parsed else {
            panic!("top level should be OR");
        };
        let Expr::And(_, negated) = *right else {
            panic!("right of OR should be AND");
        };
        assert!(matches!(*negated, Expr::Not(_)));
    }

    #[test]
    fn precedence_truth_table() {
        // A: active, B: layer == 1, C: Health.current > 5
        let expr = Expr::parse("active == true OR layer == 1 && NOT Health.current > 5").unwrap();
        for bits in 0..8u8 {
            let (a, b, c) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let mut world = world_with_registry();
            let node = world
                .spawn((
                    Name::new("N"),
                    NodeActive(a),
                    NodeLayer(if b { 1 } else { 0 }),
                    Health {
                        current: if c { 10.0 } else { 1.0 },
                        max: 10.0,
                    },
                ))
                .id();
            let view = SceneView::new(&mut world);
            assert_eq!(
                expr.evaluate(&view, node),
                a || (b && !c),
                "A={a} B={b} C={c}"
            );
        }
    }

    #[test]
    fn functions_and_string_compares() {
        let mut world = world_with_registry();
        let node = world
            .spawn((
                Name::new("Enemy_Orc"),
                NodeTag("Enemy".into()),
                Health::full(30.0),
                Transform::default(),
            ))
            .id();
        let plain = world.spawn(Name::new("Rock")).id();
        let view = SceneView::new(&mut world);

        let check = |text: &str, target: Entity| Expr::parse(text).unwrap().evaluate(&view, target);
        assert!(check("hasComp(Health)", node));
        assert!(!check("hasComp(Health)", plain));
        assert!(check("hasComp(transform::Transform)", node));
        assert!(!check("hasComp(form)", node));
        assert!(check("contains(name, \"ORC\")", node));
        assert!(check("startswith(name, 'enemy')", node));
        assert!(check("endswith(name, \"orc\")", node));
        assert!(check("matches(name, \"^Enemy_[A-Z]\")", node));
        assert!(check("tag == Enemy", node));
        assert!(check("tag != 'Player'", node));
        assert!(check("Health.current >= Health.max", node));
        assert!(check("Health.max > 9", node));
        assert!(!check("Health.current > 30", node));
        assert!(check("(tag == Enemy) and !(name == Rock)", node));
        assert!(!check("contains(Health.missing, \"x\")", node));
    }

    #[test]
    fn hyphenated_bare_words_are_single_literals() {
        let mut world = world_with_registry();
        let camera = world
            .spawn((Name::new("Camera"), NodeTag("Main-Camera".into())))
            .id();
        let view = SceneView::new(&mut world);
        assert!(Expr::parse("tag == Main-Camera").unwrap().evaluate(&view, camera));
        assert!(!Expr::parse("tag == Main").unwrap().evaluate(&view, camera));
        assert!(Expr::parse("layer > -1").unwrap().evaluate(&view, camera));
    }

    #[test]
    fn malformed_expressions_are_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("Health.current").is_err());
        assert!(Expr::parse("name == ").is_err());
        assert!(Expr::parse("(name == a").is_err());
        assert!(Expr::parse("name == a b").is_err());
        assert!(Expr::parse("frobnicate(name)").is_err());
        assert!(Expr::parse("hasComp(A, B)").is_err());
        assert!(Expr::parse("name == 'unterminated").is_err());
        assert!(Expr::parse("matches(name, \"(\")").is_err());
    }
}

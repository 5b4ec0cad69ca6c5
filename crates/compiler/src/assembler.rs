//! Textual bytecode surface syntax (§6), for test fixtures and tooling.
//!
//! Accepts `proc(nparams:N nlocals:N nclosures:N bytecode:segment( <instr>* ))`
//! where each instruction is the canonical `mnemonic(field:value ...)` form.
//! Labels (`Name:instruction`) bind a logical branch target to the
//! instruction's index; any operand position may reference a label by name
//! instead of a literal instruction pointer, resolved once the whole segment
//! has been scanned.

use crate::error::AssembleError;
use oz_core::{Arity, Atom, BranchTable, CodeSegment, Instruction, Literal, Operand, Register, Value};
use std::collections::HashMap;
use std::rc::Rc;

type Result<T> = std::result::Result<T, AssembleError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    Comma,
    Ident(String),
    QuotedAtom(String),
    Str(String),
    Int(i64),
}

fn lex(src: &str) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // Line comment, teacher-style.
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                chars.next();
                out.push(Token::LParen);
            }
            ')' => {
                chars.next();
                out.push(Token::RParen);
            }
            ':' => {
                chars.next();
                out.push(Token::Colon);
            }
            ',' => {
                chars.next();
                out.push(Token::Comma);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => return Err(AssembleError::UnexpectedEnd),
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                    }
                }
                out.push(Token::QuotedAtom(text));
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => return Err(AssembleError::UnexpectedEnd),
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        Some('"') => break,
                        Some(ch) => text.push(ch),
                    }
                }
                out.push(Token::Str(text));
            }
            '-' | '0'..='9' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: i64 = text
                    .parse()
                    .map_err(|_| AssembleError::Unexpected { found: text.clone(), wanted: "integer" })?;
                out.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == '*' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Token::Ident(text));
            }
            other => {
                return Err(AssembleError::Unexpected {
                    found: other.to_string(),
                    wanted: "a token",
                })
            }
        }
    }
    Ok(out)
}

/// Scan the `segment( ... )` body ahead of real parsing so that both forward
/// and backward label references resolve uniformly: a label binds to the
/// index of the instruction immediately following it, counted by paren
/// depth rather than by interpreting any instruction's fields.
fn prescan_labels(tokens: &[Token]) -> HashMap<String, u32> {
    let mut labels = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == Token::Ident("segment".to_string()) && tokens.get(i + 1) == Some(&Token::LParen) {
            i += 2;
            break;
        }
        i += 1;
    }
    let mut depth = 1i32;
    let mut instr_count: u32 = 0;
    while i < tokens.len() && depth > 0 {
        match &tokens[i] {
            Token::LParen => {
                depth += 1;
                i += 1;
            }
            Token::RParen => {
                depth -= 1;
                if depth == 1 {
                    instr_count += 1;
                }
                i += 1;
            }
            Token::Ident(name) if depth == 1 && tokens.get(i + 1) == Some(&Token::Colon) => {
                labels.insert(name.clone(), instr_count);
                i += 2;
            }
            _ => i += 1,
        }
    }
    labels
}

/// Label bookkeeping: a label definition records the instruction index it
/// attaches to; labels are fully resolved by [`prescan_labels`] before any
/// instruction is parsed.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    labels: HashMap<String, u32>,
    instructions: Vec<Instruction>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Result<Token> {
        let t = self.tokens.get(self.pos).cloned().ok_or(AssembleError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, want: &Token, wanted: &'static str) -> Result<()> {
        let got = self.bump()?;
        if &got == want {
            Ok(())
        } else {
            Err(AssembleError::Unexpected { found: format!("{got:?}"), wanted })
        }
    }

    fn expect_ident(&mut self, text: &str) -> Result<()> {
        match self.bump()? {
            Token::Ident(s) if s == text => Ok(()),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: text }),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.bump()? {
            Token::Ident(s) => Ok(s),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: "identifier" }),
        }
    }

    fn int(&mut self) -> Result<i64> {
        match self.bump()? {
            Token::Int(n) => Ok(n),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: "integer" }),
        }
    }

    /// Parse a register reference such as `l0`, `p3`, `e1`, `a2`, `l*`, `p*`,
    /// `e*`, `a*` or `exn`.
    fn register(&mut self, text: &str) -> Result<Register> {
        if text == "exn" {
            return Ok(Register::Exn);
        }
        let (prefix, rest) = text.split_at(1);
        if rest == "*" {
            return match prefix {
                "l" => Ok(Register::LocalArray),
                "p" => Ok(Register::ParamArray),
                "e" => Ok(Register::ClosureArray),
                "a" => Ok(Register::ArrayArray),
                _ => Err(AssembleError::UnknownRegister(text.to_string())),
            };
        }
        let index: u32 = rest
            .parse()
            .map_err(|_| AssembleError::UnknownRegister(text.to_string()))?;
        match prefix {
            "l" => Ok(Register::Local(index)),
            "p" => Ok(Register::Param(index)),
            "e" => Ok(Register::Closure(index)),
            "a" => Ok(Register::Array(index)),
            _ => Err(AssembleError::UnknownRegister(text.to_string())),
        }
    }

    fn is_register_ident(text: &str) -> bool {
        if text == "exn" {
            return true;
        }
        let mut chars = text.chars();
        match chars.next() {
            Some('l') | Some('p') | Some('e') | Some('a') => {}
            _ => return false,
        }
        let rest: String = chars.collect();
        rest == "*" || (!rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    }

    /// Parse a single operand: a register, a label reference (resolved to an
    /// immediate small integer IP at instruction-pointer positions only — see
    /// `branch_target`), or an immediate literal.
    fn operand(&mut self) -> Result<Operand> {
        match self.bump()? {
            Token::Ident(text) if Parser::is_register_ident(&text) => {
                Ok(Operand::Register(self.register(&text)?))
            }
            Token::Ident(text) if text == "true" => Ok(Operand::Immediate(Value::boolean(true))),
            Token::Ident(text) if text == "false" => Ok(Operand::Immediate(Value::boolean(false))),
            Token::Ident(text) => Ok(Operand::Immediate(Value::Atom(Atom::get(text)))),
            Token::QuotedAtom(text) => Ok(Operand::Immediate(Value::Atom(Atom::get(text)))),
            Token::Int(n) => Ok(Operand::Immediate(Value::Int(n))),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: "operand" }),
        }
    }

    /// A `dst` position is always a register, never an immediate.
    fn register_field(&mut self) -> Result<Register> {
        let text = self.ident()?;
        self.register(&text)
    }

    /// A branch target is either a literal instruction pointer or a label
    /// name. `self.labels` is fully populated by a prescan before any
    /// instruction is parsed, so both forward and backward references
    /// resolve here directly.
    fn branch_target(&mut self) -> Result<u32> {
        match self.bump()? {
            Token::Int(n) => Ok(n as u32),
            Token::Ident(label) => self
                .labels
                .get(&label)
                .copied()
                .ok_or(AssembleError::UnknownLabel(label)),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: "branch target" }),
        }
    }

    fn literal_key(&mut self) -> Result<Literal> {
        match self.bump()? {
            Token::Int(n) => Ok(Literal::Int(n)),
            Token::Ident(text) => Ok(Literal::Atom(Atom::get(text))),
            Token::QuotedAtom(text) => Ok(Literal::Atom(Atom::get(text))),
            other => Err(AssembleError::Unexpected { found: format!("{other:?}"), wanted: "literal" }),
        }
    }

    fn branch_table(&mut self) -> Result<BranchTable> {
        self.expect_ident("table")?;
        self.expect(&Token::LParen, "(")?;
        let mut entries = Vec::new();
        loop {
            if self.peek() == Some(&Token::RParen) {
                break;
            }
            let key = self.literal_key()?;
            self.expect(&Token::Colon, ":")?;
            let ip = self.branch_target()?;
            entries.push((key, ip));
            if self.peek() == Some(&Token::Comma) {
                self.bump()?;
            } else {
                break;
            }
        }
        self.expect(&Token::RParen, ")")?;
        Ok(BranchTable(entries))
    }

    /// `arity(f1 f2 ...)` immediate sugar, for opcodes that want an arity
    /// value directly rather than built at runtime from an array register.
    fn arity_literal(&mut self) -> Result<Arity> {
        self.expect(&Token::LParen, "(")?;
        let mut features = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            features.push(self.literal_key()?);
            if self.peek() == Some(&Token::Comma) {
                self.bump()?;
            }
        }
        self.expect(&Token::RParen, ")")?;
        Ok(Arity::get(features))
    }

    fn instruction(&mut self) -> Result<()> {
        // Optional `Label:` prefix. A label is an identifier immediately
        // followed by `:` where the identifier is *not* itself a known
        // mnemonic with that name (mnemonics are always followed by `(`).
        if let Some(Token::Ident(_)) = self.peek() {
            if self.tokens.get(self.pos + 1) == Some(&Token::Colon) {
                let Token::Ident(label) = self.bump()? else { unreachable!() };
                self.bump()?; // consume ':'
                self.labels.insert(label, self.instructions.len() as u32);
            }
        }

        let mnemonic = self.ident()?;
        if mnemonic == "arity" {
            // Only reachable via `arity_literal` callers, never top-level.
            return Err(AssembleError::UnknownMnemonic(mnemonic));
        }
        self.expect(&Token::LParen, "(")?;
        let instr = self.instruction_body(&mnemonic)?;
        self.expect(&Token::RParen, ")")?;
        self.instructions.push(instr);
        Ok(())
    }

    fn field_name(&mut self) -> Result<String> {
        let name = self.ident()?;
        self.expect(&Token::Colon, ":")?;
        Ok(name)
    }

    fn instruction_body(&mut self, mnemonic: &str) -> Result<Instruction> {
        use Instruction as I;
        let instr = match mnemonic {
            "nop" => I::Nop,
            "load" => {
                let mut dst = None;
                let mut src = None;
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "src" => src = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::Load {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    src: src.ok_or(AssembleError::MissingField("src"))?,
                }
            }
            "branch" => {
                let mut to = None;
                self.fields(|p, name| {
                    if name == "to" {
                        to = Some(p.branch_target()?);
                    }
                    Ok(())
                })?;
                I::Branch { to: to.ok_or(AssembleError::MissingField("to"))? }
            }
            "branch_if" => {
                let (mut cond, mut to) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "cond" => cond = Some(p.operand()?),
                        "to" => to = Some(p.branch_target()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::BranchIf {
                    cond: cond.ok_or(AssembleError::MissingField("cond"))?,
                    to: to.ok_or(AssembleError::MissingField("to"))?,
                }
            }
            "branch_unless" => {
                let (mut cond, mut to) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "cond" => cond = Some(p.operand()?),
                        "to" => to = Some(p.branch_target()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::BranchUnless {
                    cond: cond.ok_or(AssembleError::MissingField("cond"))?,
                    to: to.ok_or(AssembleError::MissingField("to"))?,
                }
            }
            "branch_switch_literal" => {
                let (mut value, mut branches) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "value" => value = Some(p.operand()?),
                        "branches" => branches = Some(p.branch_table()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::BranchSwitchLiteral {
                    value: value.ok_or(AssembleError::MissingField("value"))?,
                    branches: branches.ok_or(AssembleError::MissingField("branches"))?,
                }
            }
            "call" => {
                let (mut proc, mut params) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "proc" => proc = Some(p.operand()?),
                        "params" => params = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::Call {
                    proc: proc.ok_or(AssembleError::MissingField("proc"))?,
                    params: params.ok_or(AssembleError::MissingField("params"))?,
                }
            }
            "call_tail" => {
                let (mut proc, mut params) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "proc" => proc = Some(p.operand()?),
                        "params" => params = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::CallTail {
                    proc: proc.ok_or(AssembleError::MissingField("proc"))?,
                    params: params.ok_or(AssembleError::MissingField("params"))?,
                }
            }
            "call_native" => {
                let (mut name_op, mut params) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "name" => name_op = Some(p.operand()?),
                        "params" => params = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::CallNative {
                    name: name_op.ok_or(AssembleError::MissingField("name"))?,
                    params: params.ok_or(AssembleError::MissingField("params"))?,
                }
            }
            "return" => I::Return,
            "exn_push_catch" => {
                let mut to = None;
                self.fields(|p, name| {
                    if name == "to" {
                        to = Some(p.branch_target()?);
                    }
                    Ok(())
                })?;
                I::ExnPushCatch { to: to.ok_or(AssembleError::MissingField("to"))? }
            }
            "exn_push_finally" => {
                let mut to = None;
                self.fields(|p, name| {
                    if name == "to" {
                        to = Some(p.branch_target()?);
                    }
                    Ok(())
                })?;
                I::ExnPushFinally { to: to.ok_or(AssembleError::MissingField("to"))? }
            }
            "exn_pop" => I::ExnPop,
            "exn_raise" => {
                let mut exn = None;
                self.fields(|p, name| {
                    if name == "exn" {
                        exn = Some(p.operand()?);
                    }
                    Ok(())
                })?;
                I::ExnRaise { exn: exn.ok_or(AssembleError::MissingField("exn"))? }
            }
            "exn_reset" => {
                let mut dst = None;
                self.fields(|p, name| {
                    if name == "dst" {
                        dst = Some(p.register_field()?);
                    }
                    Ok(())
                })?;
                I::ExnReset { dst: dst.ok_or(AssembleError::MissingField("dst"))? }
            }
            "exn_reraise" => {
                let mut exn = None;
                self.fields(|p, name| {
                    if name == "exn" {
                        exn = Some(p.operand()?);
                    }
                    Ok(())
                })?;
                I::ExnReraise { exn: exn.ok_or(AssembleError::MissingField("exn"))? }
            }
            "new_variable" => self.one_dst(I::NewVariable { dst: Register::Exn })?,
            "new_name" => self.one_dst(I::NewName { dst: Register::Exn })?,
            "new_cell" => {
                let (mut dst, mut init) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "init" => init = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewCell {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    init: init.ok_or(AssembleError::MissingField("init"))?,
                }
            }
            "new_array" => {
                let (mut dst, mut size, mut init) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "size" => size = Some(p.operand()?),
                        "init" => init = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewArray {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    size: size.ok_or(AssembleError::MissingField("size"))?,
                    init: init.ok_or(AssembleError::MissingField("init"))?,
                }
            }
            "new_arity" => {
                let (mut dst, mut features) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "features" => {
                            features = Some(if p.peek() == Some(&Token::Ident("arity".to_string())) {
                                p.bump()?;
                                Operand::Immediate(Value::Arity(p.arity_literal()?))
                            } else {
                                p.operand()?
                            })
                        }
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewArity {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    features: features.ok_or(AssembleError::MissingField("features"))?,
                }
            }
            "new_list" => {
                let (mut dst, mut head, mut tail) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "head" => head = Some(p.operand()?),
                        "tail" => tail = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewList {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    head: head.ok_or(AssembleError::MissingField("head"))?,
                    tail: tail.ok_or(AssembleError::MissingField("tail"))?,
                }
            }
            "new_tuple" => {
                let (mut dst, mut size, mut label) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "size" => size = Some(p.operand()?),
                        "label" => label = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewTuple {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    size: size.ok_or(AssembleError::MissingField("size"))?,
                    label: label.ok_or(AssembleError::MissingField("label"))?,
                }
            }
            "new_record" => {
                let (mut dst, mut arity, mut label) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "arity" => {
                            arity = Some(if p.peek() == Some(&Token::Ident("arity".to_string())) {
                                p.bump()?;
                                Operand::Immediate(Value::Arity(p.arity_literal()?))
                            } else {
                                p.operand()?
                            })
                        }
                        "label" => label = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewRecord {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    arity: arity.ok_or(AssembleError::MissingField("arity"))?,
                    label: label.ok_or(AssembleError::MissingField("label"))?,
                }
            }
            "new_proc" => {
                let (mut dst, mut proc, mut env) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "proc" => proc = Some(p.operand()?),
                        "env" => env = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewProc {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    proc: proc.ok_or(AssembleError::MissingField("proc"))?,
                    env: env.ok_or(AssembleError::MissingField("env"))?,
                }
            }
            "new_thread" => {
                let (mut dst, mut proc, mut params) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "proc" => proc = Some(p.operand()?),
                        "params" => params = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::NewThread {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    proc: proc.ok_or(AssembleError::MissingField("proc"))?,
                    params: params.ok_or(AssembleError::MissingField("params"))?,
                }
            }
            "get_value_type" => self.dst_value(|dst, value| I::GetValueType { dst, value })?,
            "access_cell" => self.dst_value_named(|dst, v| I::AccessCell { dst, cell: v }, "cell")?,
            "access_array" => {
                let (mut dst, mut array, mut index) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "array" => array = Some(p.operand()?),
                        "index" => index = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::AccessArray {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    array: array.ok_or(AssembleError::MissingField("array"))?,
                    index: index.ok_or(AssembleError::MissingField("index"))?,
                }
            }
            "access_record" => {
                let (mut dst, mut record, mut feature) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "record" => record = Some(p.operand()?),
                        "feature" => feature = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::AccessRecord {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    record: record.ok_or(AssembleError::MissingField("record"))?,
                    feature: feature.ok_or(AssembleError::MissingField("feature"))?,
                }
            }
            "access_record_label" => self.dst_value_named(|dst, v| I::AccessRecordLabel { dst, record: v }, "record")?,
            "access_record_arity" => self.dst_value_named(|dst, v| I::AccessRecordArity { dst, record: v }, "record")?,
            "access_open_record_arity" => {
                self.dst_value_named(|dst, v| I::AccessOpenRecordArity { dst, record: v }, "record")?
            }
            "assign_cell" => {
                let (mut cell, mut value) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "cell" => cell = Some(p.operand()?),
                        "value" => value = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::AssignCell {
                    cell: cell.ok_or(AssembleError::MissingField("cell"))?,
                    value: value.ok_or(AssembleError::MissingField("value"))?,
                }
            }
            "assign_array" => {
                let (mut array, mut index, mut value) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "array" => array = Some(p.operand()?),
                        "index" => index = Some(p.operand()?),
                        "value" => value = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::AssignArray {
                    array: array.ok_or(AssembleError::MissingField("array"))?,
                    index: index.ok_or(AssembleError::MissingField("index"))?,
                    value: value.ok_or(AssembleError::MissingField("value"))?,
                }
            }
            "unify" => {
                let (mut v1, mut v2) = (None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "v1" => v1 = Some(p.operand()?),
                        "v2" => v2 = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::Unify {
                    v1: v1.ok_or(AssembleError::MissingField("v1"))?,
                    v2: v2.ok_or(AssembleError::MissingField("v2"))?,
                }
            }
            "try_unify" => {
                let (mut v1, mut v2, mut success) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "v1" => v1 = Some(p.operand()?),
                        "v2" => v2 = Some(p.operand()?),
                        "success" => success = Some(p.register_field()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::TryUnify {
                    v1: v1.ok_or(AssembleError::MissingField("v1"))?,
                    v2: v2.ok_or(AssembleError::MissingField("v2"))?,
                    success: success.ok_or(AssembleError::MissingField("success"))?,
                }
            }
            "unify_record_field" => {
                let (mut record, mut feature, mut value) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "record" => record = Some(p.operand()?),
                        "feature" => feature = Some(p.operand()?),
                        "value" => value = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::UnifyRecordField {
                    record: record.ok_or(AssembleError::MissingField("record"))?,
                    feature: feature.ok_or(AssembleError::MissingField("feature"))?,
                    value: value.ok_or(AssembleError::MissingField("value"))?,
                }
            }
            "test_is_det" => self.dst_value_named(|dst, v| I::TestIsDet { dst, value: v }, "value")?,
            "test_is_record" => self.dst_value_named(|dst, v| I::TestIsRecord { dst, value: v }, "value")?,
            "test_equality" => self.dst_v1_v2(|dst, v1, v2| I::TestEquality { dst, v1, v2 })?,
            "test_less_than" => self.dst_v1_v2(|dst, v1, v2| I::TestLessThan { dst, v1, v2 })?,
            "test_less_or_equal" => self.dst_v1_v2(|dst, v1, v2| I::TestLessOrEqual { dst, v1, v2 })?,
            "test_arity_extends" => {
                let (mut dst, mut sup, mut sub) = (None, None, None);
                self.fields(|p, name| {
                    match name.as_str() {
                        "dst" => dst = Some(p.register_field()?),
                        "sup" => sup = Some(p.operand()?),
                        "sub" => sub = Some(p.operand()?),
                        _ => {}
                    }
                    Ok(())
                })?;
                I::TestArityExtends {
                    dst: dst.ok_or(AssembleError::MissingField("dst"))?,
                    sup: sup.ok_or(AssembleError::MissingField("sup"))?,
                    sub: sub.ok_or(AssembleError::MissingField("sub"))?,
                }
            }
            "number_int_inverse" => self.dst_value_named(|dst, v| I::NumberIntInverse { dst, v }, "v")?,
            "number_int_add" => self.dst_v1_v2(|dst, v1, v2| I::NumberIntAdd { dst, v1, v2 })?,
            "number_int_subtract" => self.dst_v1_v2(|dst, v1, v2| I::NumberIntSubtract { dst, v1, v2 })?,
            "number_int_multiply" => self.dst_v1_v2(|dst, v1, v2| I::NumberIntMultiply { dst, v1, v2 })?,
            "number_int_divide" => self.dst_v1_v2(|dst, v1, v2| I::NumberIntDivide { dst, v1, v2 })?,
            "number_bool_negate" => self.dst_value_named(|dst, v| I::NumberBoolNegate { dst, v }, "v")?,
            "number_bool_and_then" => self.dst_v1_v2(|dst, v1, v2| I::NumberBoolAndThen { dst, v1, v2 })?,
            "number_bool_or_else" => self.dst_v1_v2(|dst, v1, v2| I::NumberBoolOrElse { dst, v1, v2 })?,
            "number_bool_xor" => self.dst_v1_v2(|dst, v1, v2| I::NumberBoolXor { dst, v1, v2 })?,
            other => return Err(AssembleError::UnknownMnemonic(other.to_string())),
        };
        Ok(instr)
    }

    /// Parse `field:value` pairs separated by commas or whitespace until the
    /// closing paren, handing each `(name, value-position)` to `handle`.
    fn fields(&mut self, mut handle: impl FnMut(&mut Self, String) -> Result<()>) -> Result<()> {
        loop {
            if self.peek() == Some(&Token::RParen) {
                break;
            }
            let name = self.field_name()?;
            handle(self, name)?;
            if self.peek() == Some(&Token::Comma) {
                self.bump()?;
            }
        }
        Ok(())
    }

    fn one_dst(&mut self, template: Instruction) -> Result<Instruction> {
        let mut dst = None;
        self.fields(|p, name| {
            if name == "dst" {
                dst = Some(p.register_field()?);
            }
            Ok(())
        })?;
        let dst = dst.ok_or(AssembleError::MissingField("dst"))?;
        Ok(match template {
            Instruction::NewVariable { .. } => Instruction::NewVariable { dst },
            Instruction::NewName { .. } => Instruction::NewName { dst },
            _ => unreachable!("one_dst only used for dst-only instructions"),
        })
    }

    fn dst_value(&mut self, build: impl FnOnce(Register, Operand) -> Instruction) -> Result<Instruction> {
        self.dst_value_named(build, "value")
    }

    fn dst_value_named(
        &mut self,
        build: impl FnOnce(Register, Operand) -> Instruction,
        field: &'static str,
    ) -> Result<Instruction> {
        let (mut dst, mut value) = (None, None);
        self.fields(|p, name| {
            if name == "dst" {
                dst = Some(p.register_field()?);
            } else if name == field {
                value = Some(p.operand()?);
            }
            Ok(())
        })?;
        Ok(build(
            dst.ok_or(AssembleError::MissingField("dst"))?,
            value.ok_or(AssembleError::MissingField(field))?,
        ))
    }

    fn dst_v1_v2(&mut self, build: impl FnOnce(Register, Operand, Operand) -> Instruction) -> Result<Instruction> {
        let (mut dst, mut v1, mut v2) = (None, None, None);
        self.fields(|p, name| {
            match name.as_str() {
                "dst" => dst = Some(p.register_field()?),
                "v1" => v1 = Some(p.operand()?),
                "v2" => v2 = Some(p.operand()?),
                _ => {}
            }
            Ok(())
        })?;
        Ok(build(
            dst.ok_or(AssembleError::MissingField("dst"))?,
            v1.ok_or(AssembleError::MissingField("v1"))?,
            v2.ok_or(AssembleError::MissingField("v2"))?,
        ))
    }
}

/// Assemble the `proc(nparams:.. nlocals:.. nclosures:.. bytecode:segment(...))`
/// textual form into a shared [`CodeSegment`].
pub fn assemble(name: impl Into<String>, src: &str) -> Result<Rc<CodeSegment>> {
    let tokens = lex(src)?;
    let labels = prescan_labels(&tokens);
    let mut p = Parser {
        tokens,
        pos: 0,
        labels,
        instructions: Vec::new(),
    };

    p.expect_ident("proc")?;
    p.expect(&Token::LParen, "(")?;
    let (mut nparams, mut nlocals, mut nclosures) = (0u32, 0u32, 0u32);
    loop {
        let field = p.field_name()?;
        match field.as_str() {
            "nparams" => nparams = p.int()? as u32,
            "nlocals" => nlocals = p.int()? as u32,
            "nclosures" => nclosures = p.int()? as u32,
            "bytecode" => {
                p.expect_ident("segment")?;
                p.expect(&Token::LParen, "(")?;
                while p.peek() != Some(&Token::RParen) {
                    p.instruction()?;
                }
                p.expect(&Token::RParen, ")")?;
                break;
            }
            other => return Err(AssembleError::Unexpected { found: other.to_string(), wanted: "proc field" }),
        }
        if p.peek() == Some(&Token::Comma) {
            p.bump()?;
        }
    }
    p.expect(&Token::RParen, ")")?;

    Ok(Rc::new(CodeSegment {
        name: name.into(),
        nparams,
        nlocals,
        nclosures,
        instructions: p.instructions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_trivial_return() {
        let seg = assemble("Main", "proc(nparams:0 nlocals:0 nclosures:0 bytecode:segment(return()))").unwrap();
        assert_eq!(seg.len(), 1);
        assert!(matches!(seg.fetch(0), Some(Instruction::Return)));
    }

    #[test]
    fn assembles_load_and_branch() {
        let src = "proc(nparams:1 nlocals:1 nclosures:0 bytecode:segment(\
            load(dst:l0 src:p0)\
            branch(to:0)\
        ))";
        let seg = assemble("Loop", src).unwrap();
        assert_eq!(seg.nparams, 1);
        assert_eq!(seg.nlocals, 1);
        assert!(matches!(seg.fetch(0), Some(Instruction::Load { .. })));
        assert!(matches!(seg.fetch(1), Some(Instruction::Branch { to: 0 })));
    }

    #[test]
    fn backward_label_resolves_to_its_index() {
        let src = "proc(nparams:0 nlocals:1 nclosures:0 bytecode:segment(\
            Top: new_variable(dst:l0)\
            branch(to:Top)\
        ))";
        let seg = assemble("Loop", src).unwrap();
        assert!(matches!(seg.fetch(1), Some(Instruction::Branch { to: 0 })));
    }

    #[test]
    fn forward_label_resolves_to_its_index() {
        let src = "proc(nparams:0 nlocals:1 nclosures:0 bytecode:segment(\
            branch(to:End)\
            new_variable(dst:l0)\
            End: return()\
        ))";
        let seg = assemble("Fwd", src).unwrap();
        assert!(matches!(seg.fetch(0), Some(Instruction::Branch { to: 2 })));
    }

    #[test]
    fn new_record_accepts_inline_arity_literal() {
        let src = "proc(nparams:0 nlocals:1 nclosures:0 bytecode:segment(\
            new_record(dst:l0 arity:arity(x, y) label:point)\
        ))";
        let seg = assemble("Mk", src).unwrap();
        assert!(matches!(seg.fetch(0), Some(Instruction::NewRecord { .. })));
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        let src = "proc(nparams:0 nlocals:0 nclosures:0 bytecode:segment(frobnicate()))";
        assert!(assemble("Bad", src).is_err());
    }
}

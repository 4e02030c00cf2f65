//! The in-memory module representation the injector rewrites.
//!
//! This is the concrete side of the front-end contract: a module exposes
//! enumerable functions, each an ordered list of labeled basic blocks, each
//! an ordered instruction list with a well-defined first legal insertion
//! point (after the block-entry phi run). A module can declare an external
//! callee by name and signature, materialize integer constants, and insert
//! a call before any instruction.
//!
//! A small line-oriented textual form ([`parse_module`] / [`Display`])
//! exists so structural validity survives a round trip through a parser.

use core::fmt::{self, Display};

use edgecov_bolts::Error;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

/// An operand: a named local or an inline integer constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// An integer constant, materialized inline
    Const(u64),
    /// A named local, printed as `%name`
    Local(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Const(val) => write!(f, "{val}"),
            Value::Local(name) => write!(f, "%{name}"),
        }
    }
}

/// One instruction of a basic block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Block-entry merge of per-predecessor values. Only legal in the
    /// leading run of a block.
    Phi {
        /// The local the merged value is bound to
        dest: String,
        /// `(value, predecessor label)` pairs
        incoming: Vec<(Value, String)>,
    },
    /// A call to a declared callee
    Call {
        /// Name of the callee, without the leading `@`
        callee: String,
        /// Argument values, arity-checked against the callee signature
        args: Vec<Value>,
    },
    /// Any other non-terminator instruction, kept opaque
    Op(String),
    /// Branch to one (unconditional) or more (conditional) blocks
    Branch {
        /// Target block labels
        targets: Vec<String>,
    },
    /// Function return
    Ret,
}

impl Instruction {
    /// Whether this is a block-entry phi
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }

    /// Whether this instruction ends a block
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Branch { .. } | Instruction::Ret)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Phi { dest, incoming } => {
                write!(f, "%{dest} = phi ")?;
                for (i, (value, label)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {value}, {label} ]")?;
                }
                Ok(())
            }
            Instruction::Call { callee, args } => {
                write!(f, "call @{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Instruction::Op(text) => write!(f, "op {text}"),
            Instruction::Branch { targets } => {
                write!(f, "br")?;
                for target in targets {
                    write!(f, " {target}")?;
                }
                Ok(())
            }
            Instruction::Ret => write!(f, "ret"),
        }
    }
}

/// A labeled basic block: ordered instructions, one entry, one exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// The block label
    pub label: String,
    /// The ordered instruction list
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// A new, empty block
    #[must_use]
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
        }
    }

    /// The first position where a normal instruction may legally precede
    /// all existing ones: directly after the leading phi run.
    #[must_use]
    pub fn first_insertion_point(&self) -> usize {
        self.instructions
            .iter()
            .position(|instruction| !instruction.is_phi())
            .unwrap_or(self.instructions.len())
    }

    /// Insert `instruction` so that it executes before the instruction
    /// currently at `index`.
    pub fn insert_before(&mut self, index: usize, instruction: Instruction) {
        self.instructions.insert(index, instruction);
    }
}

/// A callee signature: void/value return plus parameter count.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// `true` for a void return
    pub void_ret: bool,
    /// Number of parameters
    pub params: usize,
}

/// A function: named, signed, with an ordered block list.
/// An empty block list marks an external declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// The function name, without the leading `@`
    pub name: String,
    /// The signature
    pub sig: Signature,
    /// The body. Empty for external declarations.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Whether this is an external declaration without a body
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A whole module: a named, ordered set of functions and declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    name: String,
    functions: Vec<Function>,
}

impl Module {
    /// A new, empty module
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// The module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All functions and declarations, in definition order
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Mutable access to all functions and declarations
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Look a function or declaration up by name
    #[must_use]
    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }

    /// Append a function. Names are unique per module.
    pub fn push_function(&mut self, function: Function) -> Result<(), Error> {
        if self.get_function(&function.name).is_some() {
            return Err(Error::illegal_argument(format!(
                "duplicate function `{}` in module `{}`",
                function.name, self.name
            )));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Look the named declaration up, inserting it if absent.
    /// A pre-existing entry under the same name must carry the same
    /// signature, calling through a mismatched declaration is rejected
    /// here rather than left undefined.
    pub fn get_or_insert_declaration(&mut self, name: &str, sig: Signature) -> Result<(), Error> {
        if let Some(existing) = self.get_function(name) {
            if existing.sig != sig {
                return Err(Error::illegal_state(format!(
                    "`{name}` already declared with a different signature in module `{}`",
                    self.name
                )));
            }
            return Ok(());
        }
        self.functions.push(Function {
            name: name.into(),
            sig,
            blocks: Vec::new(),
        });
        Ok(())
    }

    /// Check the structural ordering requirements of the representation:
    /// unique labels, phis only in the leading run, exactly one trailing
    /// terminator per block, branch and phi labels resolving within the
    /// function, calls arity-matching a known callee.
    pub fn validate(&self) -> Result<(), Error> {
        for func in &self.functions {
            if func.is_declaration() {
                continue;
            }
            let mut labels: HashSet<&str> = HashSet::with_capacity(func.blocks.len());
            for block in &func.blocks {
                if !labels.insert(&block.label) {
                    return Err(Error::illegal_state(format!(
                        "duplicate label `{}` in @{}",
                        block.label, func.name
                    )));
                }
            }
            for block in &func.blocks {
                let Some(last) = block.instructions.last() else {
                    return Err(Error::illegal_state(format!(
                        "empty block `{}` in @{}",
                        block.label, func.name
                    )));
                };
                if !last.is_terminator() {
                    return Err(Error::illegal_state(format!(
                        "block `{}` in @{} does not end in a terminator",
                        block.label, func.name
                    )));
                }
                let mut past_phis = false;
                for (pos, instruction) in block.instructions.iter().enumerate() {
                    if instruction.is_terminator() && pos + 1 != block.instructions.len() {
                        return Err(Error::illegal_state(format!(
                            "terminator before the end of block `{}` in @{}",
                            block.label, func.name
                        )));
                    }
                    match instruction {
                        Instruction::Phi { incoming, .. } => {
                            if past_phis {
                                return Err(Error::illegal_state(format!(
                                    "phi after a non-phi instruction in block `{}` of @{}",
                                    block.label, func.name
                                )));
                            }
                            for (_, pred) in incoming {
                                if !labels.contains(pred.as_str()) {
                                    return Err(Error::illegal_state(format!(
                                        "phi in block `{}` of @{} names unknown predecessor `{pred}`",
                                        block.label, func.name
                                    )));
                                }
                            }
                        }
                        Instruction::Call { callee, args } => {
                            past_phis = true;
                            let Some(target) = self.get_function(callee) else {
                                return Err(Error::illegal_state(format!(
                                    "call to undeclared `@{callee}` in @{}",
                                    func.name
                                )));
                            };
                            if target.sig.params != args.len() {
                                return Err(Error::illegal_state(format!(
                                    "call to `@{callee}` with {} args, declared with {}",
                                    args.len(),
                                    target.sig.params
                                )));
                            }
                        }
                        Instruction::Branch { targets } => {
                            past_phis = true;
                            for target in targets {
                                if !labels.contains(target.as_str()) {
                                    return Err(Error::illegal_state(format!(
                                        "branch to unknown label `{target}` in @{}",
                                        func.name
                                    )));
                                }
                            }
                        }
                        _ => past_phis = true,
                    }
                }
            }
        }
        Ok(())
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for func in &self.functions {
            writeln!(f)?;
            let arrow = if func.sig.void_ret { "" } else { " -> value" };
            if func.is_declaration() {
                writeln!(f, "declare @{}({}){arrow}", func.name, func.sig.params)?;
            } else {
                writeln!(f, "func @{}({}){arrow} {{", func.name, func.sig.params)?;
                for block in &func.blocks {
                    writeln!(f, "{}:", block.label)?;
                    for instruction in &block.instructions {
                        writeln!(f, "  {instruction}")?;
                    }
                }
                writeln!(f, "}}")?;
            }
        }
        Ok(())
    }
}

fn parse_error(line_no: usize, msg: &str) -> Error {
    Error::illegal_argument(format!("line {}: {msg}", line_no + 1))
}

fn parse_value(line_no: usize, token: &str) -> Result<Value, Error> {
    if let Some(name) = token.strip_prefix('%') {
        if name.is_empty() {
            return Err(parse_error(line_no, "empty local name"));
        }
        return Ok(Value::Local(name.into()));
    }
    token
        .parse::<u64>()
        .map(Value::Const)
        .map_err(|_| parse_error(line_no, &format!("expected constant or %local, got `{token}`")))
}

/// Parse a `@name(params)[ -> value]` header fragment.
fn parse_sig_header(line_no: usize, header: &str) -> Result<(String, Signature), Error> {
    let (header, void_ret) = match header.strip_suffix("-> value") {
        Some(rest) => (rest.trim_end(), false),
        None => (header, true),
    };
    let header = header
        .strip_prefix('@')
        .ok_or_else(|| parse_error(line_no, "expected `@name(params)`"))?;
    let (name, rest) = header
        .split_once('(')
        .ok_or_else(|| parse_error(line_no, "expected `(` after function name"))?;
    let params = rest
        .strip_suffix(')')
        .ok_or_else(|| parse_error(line_no, "expected closing `)`"))?
        .trim()
        .parse::<usize>()
        .map_err(|_| parse_error(line_no, "expected parameter count"))?;
    if name.is_empty() {
        return Err(parse_error(line_no, "empty function name"));
    }
    Ok((name.into(), Signature { void_ret, params }))
}

fn parse_phi(line_no: usize, dest: &str, rest: &str) -> Result<Instruction, Error> {
    let dest = dest
        .strip_prefix('%')
        .ok_or_else(|| parse_error(line_no, "phi destination must be a %local"))?;
    let mut incoming = Vec::new();
    let mut rest = rest.trim();
    while !rest.is_empty() {
        let Some(stripped) = rest.strip_prefix('[') else {
            return Err(parse_error(line_no, "expected `[ value, label ]`"));
        };
        let (pair, tail) = stripped
            .split_once(']')
            .ok_or_else(|| parse_error(line_no, "unterminated phi incoming"))?;
        let (value, label) = pair
            .split_once(',')
            .ok_or_else(|| parse_error(line_no, "expected `value, label` in phi incoming"))?;
        incoming.push((
            parse_value(line_no, value.trim())?,
            label.trim().to_string(),
        ));
        rest = tail.trim_start().strip_prefix(',').unwrap_or(tail).trim();
    }
    if incoming.is_empty() {
        return Err(parse_error(line_no, "phi without incoming values"));
    }
    Ok(Instruction::Phi {
        dest: dest.into(),
        incoming,
    })
}

fn parse_call(line_no: usize, rest: &str) -> Result<Instruction, Error> {
    let rest = rest
        .strip_prefix('@')
        .ok_or_else(|| parse_error(line_no, "expected `@callee` after call"))?;
    let (callee, args) = rest
        .split_once('(')
        .ok_or_else(|| parse_error(line_no, "expected `(` after callee"))?;
    let args = args
        .strip_suffix(')')
        .ok_or_else(|| parse_error(line_no, "expected closing `)`"))?;
    let mut parsed = Vec::new();
    if !args.trim().is_empty() {
        for arg in args.split(',') {
            parsed.push(parse_value(line_no, arg.trim())?);
        }
    }
    Ok(Instruction::Call {
        callee: callee.into(),
        args: parsed,
    })
}

fn parse_instruction(line_no: usize, line: &str) -> Result<Instruction, Error> {
    if let Some((dest, rest)) = line.split_once(" = phi ") {
        return parse_phi(line_no, dest.trim(), rest);
    }
    if let Some(rest) = line.strip_prefix("call ") {
        return parse_call(line_no, rest.trim());
    }
    if let Some(text) = line.strip_prefix("op ") {
        return Ok(Instruction::Op(text.trim().into()));
    }
    if line == "br" {
        return Err(parse_error(line_no, "branch without targets"));
    }
    if let Some(targets) = line.strip_prefix("br ") {
        return Ok(Instruction::Branch {
            targets: targets.split_whitespace().map(String::from).collect(),
        });
    }
    if line == "ret" {
        return Ok(Instruction::Ret);
    }
    Err(parse_error(
        line_no,
        &format!("unrecognized instruction `{line}`"),
    ))
}

/// Parse the textual module form produced by [`Module`]'s [`Display`].
pub fn parse_module(src: &str) -> Result<Module, Error> {
    let mut module: Option<Module> = None;
    // (function under construction, its finished blocks, the open block)
    let mut current: Option<(String, Signature, Vec<BasicBlock>)> = None;
    let mut block: Option<BasicBlock> = None;

    for (line_no, raw) in src.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if module.is_none() {
            let Some(name) = line.strip_prefix("module ") else {
                return Err(parse_error(line_no, "expected `module <name>` first"));
            };
            module = Some(Module::new(name.trim()));
            continue;
        }
        let module_ref = module.as_mut().unwrap();

        if let Some((name, sig, blocks)) = current.as_mut() {
            if line == "}" {
                if let Some(done) = block.take() {
                    blocks.push(done);
                }
                if blocks.is_empty() {
                    return Err(parse_error(line_no, "function body without blocks"));
                }
                let function = Function {
                    name: core::mem::take(name),
                    sig: *sig,
                    blocks: core::mem::take(blocks),
                };
                current = None;
                module_ref.push_function(function)?;
            } else if let Some(label) = line.strip_suffix(':') {
                if let Some(done) = block.take() {
                    blocks.push(done);
                }
                block = Some(BasicBlock::new(label.trim()));
            } else {
                let Some(open) = block.as_mut() else {
                    return Err(parse_error(line_no, "instruction before first label"));
                };
                open.instructions.push(parse_instruction(line_no, line)?);
            }
            continue;
        }

        if let Some(header) = line.strip_prefix("declare ") {
            let (name, sig) = parse_sig_header(line_no, header.trim())?;
            module_ref.push_function(Function {
                name,
                sig,
                blocks: Vec::new(),
            })?;
        } else if let Some(header) = line.strip_prefix("func ") {
            let header = header
                .trim()
                .strip_suffix('{')
                .ok_or_else(|| parse_error(line_no, "expected `{` after func header"))?;
            let (name, sig) = parse_sig_header(line_no, header.trim())?;
            current = Some((name, sig, Vec::new()));
        } else {
            return Err(parse_error(
                line_no,
                &format!("expected `func` or `declare`, got `{line}`"),
            ));
        }
    }

    if current.is_some() {
        return Err(Error::illegal_argument("unterminated function body"));
    }
    module.ok_or_else(|| Error::illegal_argument("empty module source"))
}

#[cfg(test)]
mod tests {
    use super::{parse_module, Instruction, Module, Signature, Value};

    const DEMO: &str = r"
module demo

declare @putchar(1)

func @main(0) {
entry:
  op load %a
  call @putchar(65)
  br loop
loop:
  %x = phi [ 0, entry ], [ %y, loop ]
  op add %y %x 1
  br loop exit
exit:
  ret
}
";

    #[test]
    fn test_parse_and_roundtrip() {
        let module = parse_module(DEMO).unwrap();
        assert_eq!(module.name(), "demo");
        assert_eq!(module.functions().len(), 2);
        module.validate().unwrap();

        let printed = module.to_string();
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(module, reparsed);
    }

    #[test]
    fn test_first_insertion_point_skips_phis() {
        let module = parse_module(DEMO).unwrap();
        let main = module.get_function("main").unwrap();
        assert_eq!(main.blocks[0].first_insertion_point(), 0);
        assert_eq!(main.blocks[1].first_insertion_point(), 1);
    }

    #[test]
    fn test_declaration_signature_guard() {
        let mut module = parse_module(DEMO).unwrap();
        // same signature: fine
        module
            .get_or_insert_declaration(
                "putchar",
                Signature {
                    void_ret: true,
                    params: 1,
                },
            )
            .unwrap();
        // different signature: rejected
        assert!(module
            .get_or_insert_declaration(
                "putchar",
                Signature {
                    void_ret: true,
                    params: 2,
                },
            )
            .is_err());
    }

    #[test]
    fn test_validate_rejects_misplaced_phi() {
        let mut module = parse_module(DEMO).unwrap();
        let main = &mut module.functions_mut()[1];
        main.blocks[0].instructions.insert(
            1,
            Instruction::Phi {
                dest: "bad".into(),
                incoming: vec![(Value::Const(1), "entry".into())],
            },
        );
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_terminator() {
        let mut module = parse_module(DEMO).unwrap();
        let main = &mut module.functions_mut()[1];
        main.blocks[2].instructions.pop();
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_arity() {
        let mut module = parse_module(DEMO).unwrap();
        let main = &mut module.functions_mut()[1];
        main.blocks[0].instructions[1] = Instruction::Call {
            callee: "putchar".into(),
            args: vec![Value::Const(1), Value::Const(2)],
        };
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_module("nonsense").is_err());
        assert!(parse_module("module m\nfunc @f(0) {\n}\n").is_err());
        assert!(parse_module("module m\nfunc @f(0) {\nentry:\n  bogus\n  ret\n}\n").is_err());
    }
}

use std::fmt::{self, Write as _};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use thiserror::Error;

/// One input or output signal of a hardware module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    name: String,
    width: u32,
}

impl Port {
    pub fn new(name: impl Into<String>, width: u32) -> Port {
        Port { name: name.into(), width }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Ports wider than 64 bits are stored by verilator as an array of 32 bit words and can
    /// not be accessed as a single integer.
    pub fn is_wide(&self) -> bool {
        self.width > 64
    }

    /// Number of 32 bit words used to store the value in a verilated model.
    pub fn words(&self) -> usize {
        (self.width as usize + 31) / 32
    }

    /// Mask with the lowest `width` bits set (of the top word for wide ports).
    pub fn mask(&self) -> u64 {
        let bits = if self.is_wide() {
            match self.width % 32 {
                0 => 32,
                rem => rem,
            }
        } else {
            self.width
        };
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("module name must not be empty")]
    EmptyName,
    #[error("{role} name `{name}` is not a valid identifier")]
    InvalidIdentifier { role: &'static str, name: String },
    #[error("{role} name `{name}` is a reserved word")]
    ReservedWord { role: &'static str, name: String },
    #[error("port `{0}` must be at least one bit wide")]
    ZeroWidth(String),
    #[error("port `{0}` is declared as both an input and an output")]
    PortCollision(String),
    #[error("docstring must not contain NUL characters")]
    NulInDocstring,
}

/// Everything required to turn one verilog module into a loadable simulation model.
///
/// The module `name` doubles as the name of the generated model class, of the workspace and of
/// the produced library, so it has to be an identifier in both verilog and C++.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    source_path: Utf8PathBuf,
    include_path: Option<Utf8PathBuf>,
    inputs: IndexMap<String, Port>,
    outputs: IndexMap<String, Port>,
    docstring: String,
}

impl ModuleDescriptor {
    /// Creates a descriptor without ports whose source defaults to `<name>.v`.
    pub fn new(name: impl Into<String>) -> ModuleDescriptor {
        let name = name.into();
        ModuleDescriptor {
            source_path: format!("{name}.v").into(),
            name,
            include_path: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            docstring: String::new(),
        }
    }

    pub fn source(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Directory searched for modules instantiated by the source file.
    pub fn include(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.include_path = Some(path.into());
        self
    }

    /// Declares an input. Declaring the same input again replaces its width but keeps its
    /// position.
    pub fn input(mut self, name: impl Into<String>, width: u32) -> Self {
        let name = name.into();
        self.inputs.insert(name.clone(), Port::new(name, width));
        self
    }

    pub fn output(mut self, name: impl Into<String>, width: u32) -> Self {
        let name = name.into();
        self.outputs.insert(name.clone(), Port::new(name, width));
        self
    }

    pub fn docstring(mut self, doc: impl Into<String>) -> Self {
        self.docstring = doc.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &Utf8Path {
        &self.source_path
    }

    pub fn include_path(&self) -> Option<&Utf8Path> {
        self.include_path.as_deref()
    }

    pub fn inputs(&self) -> &IndexMap<String, Port> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexMap<String, Port> {
        &self.outputs
    }

    pub fn doc(&self) -> &str {
        &self.docstring
    }

    /// All ports in declaration order, inputs first.
    pub fn ports(&self) -> impl Iterator<Item = (Direction, &Port)> + '_ {
        let inputs = self.inputs.values().map(|port| (Direction::Input, port));
        let outputs = self.outputs.values().map(|port| (Direction::Output, port));
        inputs.chain(outputs)
    }

    /// Direction, name and width of every port in declaration order. Two descriptors with the
    /// same signature produce bindings with identical accessors.
    pub fn port_signature(&self) -> String {
        let mut signature = String::new();
        for (dir, port) in self.ports() {
            if !signature.is_empty() {
                signature.push_str(", ");
            }
            let _ = write!(signature, "{dir} {}[{}]", port.name, port.width);
        }
        signature
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        validate(self)
    }
}

/// Checks the invariants every later stage relies upon. Runs before anything touches the disk.
pub fn validate(descriptor: &ModuleDescriptor) -> Result<(), DescriptorError> {
    if descriptor.name.is_empty() {
        return Err(DescriptorError::EmptyName);
    }
    check_identifier("module", &descriptor.name)?;

    for (dir, port) in descriptor.ports() {
        let role = match dir {
            Direction::Input => "input",
            Direction::Output => "output",
        };
        check_identifier(role, &port.name)?;
        // ports become fields of the model class next to its own members
        if MODEL_MEMBERS.contains(&port.name.as_str()) {
            return Err(DescriptorError::ReservedWord { role, name: port.name.clone() });
        }
        if port.width == 0 {
            return Err(DescriptorError::ZeroWidth(port.name.clone()));
        }
    }

    if let Some(name) = descriptor.inputs.keys().find(|name| descriptor.outputs.contains_key(*name))
    {
        return Err(DescriptorError::PortCollision(name.clone()));
    }

    // the docstring is exported as a C string
    if descriptor.docstring.contains('\0') {
        return Err(DescriptorError::NulInDocstring);
    }

    Ok(())
}

fn check_identifier(role: &'static str, name: &str) -> Result<(), DescriptorError> {
    if !is_identifier(name) {
        return Err(DescriptorError::InvalidIdentifier { role, name: name.to_owned() });
    }
    if is_reserved(name) {
        return Err(DescriptorError::ReservedWord { role, name: name.to_owned() });
    }
    Ok(())
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the intersection of verilog and C++ identifiers
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// C++ keywords, alternative tokens and names reserved for the implementation (`__` anywhere,
/// or a leading underscore followed by an uppercase letter). Verilator also uses `__` to mangle
/// the names it generates.
fn is_reserved(name: &str) -> bool {
    let bytes = name.as_bytes();
    KEYWORDS.contains(&name)
        || name.contains("__")
        || (bytes.len() > 1 && bytes[0] == b'_' && bytes[1].is_ascii_uppercase())
}

const KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char8_t", "char16_t", "char32_t", "class", "compl", "concept",
    "const", "consteval", "constexpr", "constinit", "const_cast", "continue", "co_await",
    "co_return", "co_yield", "decltype", "default", "delete", "do", "double", "dynamic_cast",
    "else", "enum", "explicit", "export", "extern", "false", "float", "for", "friend", "goto",
    "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not", "not_eq",
    "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "requires", "return", "short", "signed", "sizeof", "static",
    "static_assert", "static_cast", "struct", "switch", "template", "this", "thread_local",
    "throw", "true", "try", "typedef", "typeid", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "wchar_t", "while", "xor", "xor_eq",
];

// members of a verilated model class that a port field would shadow or clash with
const MODEL_MEMBERS: &[&str] = &[
    "eval", "eval_step", "eval_end_step", "final", "name", "hierName", "modelName", "threads",
    "contextp", "rootp", "vlSymsp", "trace", "prepareClone", "atClone",
];

//! Generation of the C++ translation unit that exposes a verilated model through a C ABI.
//!
//! Every symbol is prefixed with `vlimport_<module>_` so several modules can be loaded into the
//! same process. Inputs get a getter and a setter, outputs only a getter. Ports that fit into 64
//! bits are passed as `uint64_t`, wider ports as arrays of 32 bit words (least significant word
//! first), which is how verilator stores them.

use crate::descriptor::{Direction, ModuleDescriptor, Port};
use crate::workspace::{model_prefix, ModelConvention};

/// Bumped whenever the symbols or their signatures change.
pub const BINDING_ABI_VERSION: u32 = 2;

macro_rules! format_to {
    ($buf:expr, $($arg:tt)*) => {{
        use ::std::fmt::Write as _;
        let _ = ::std::write!($buf, $($arg)*);
    }};
}

macro_rules! format_line {
    ($buf:expr) => {
        $buf.push('\n')
    };
    ($buf:expr, $($arg:tt)*) => {{
        use ::std::fmt::Write as _;
        let _ = ::std::writeln!($buf, $($arg)*);
    }};
}

pub fn symbol(module: &str, item: &str) -> String {
    format!("vlimport_{module}_{item}")
}

pub fn getter_symbol(module: &str, port: &str) -> String {
    format!("vlimport_{module}_get_{port}")
}

pub fn setter_symbol(module: &str, port: &str) -> String {
    format!("vlimport_{module}_set_{port}")
}

/// Renders the binding for `descriptor`. The output only depends on its arguments.
///
/// `descriptor` must have passed [`validate`](crate::validate): names are emitted as
/// identifiers without further checks.
pub fn render_binding(descriptor: &ModuleDescriptor, convention: ModelConvention) -> String {
    let mut shim = CxxShim::new(descriptor.name(), convention);
    shim.doc(descriptor.doc());
    shim.port_counts(descriptor.inputs().len(), descriptor.outputs().len());
    shim.port_signature(&descriptor.port_signature());
    shim.lifecycle();
    for (dir, port) in descriptor.ports() {
        shim.port(dir, port);
    }
    shim.finish()
}

/// Builder for the binding source. Each method emits the complete declarations for one item.
pub struct CxxShim {
    module: String,
    class: String,
    out: String,
}

impl CxxShim {
    pub fn new(module: &str, convention: ModelConvention) -> CxxShim {
        let class = model_prefix(module);
        let mut out = String::new();
        format_line!(out, "// Generated by vlimport. Do not edit.");
        format_line!(out, "#include <cstdint>");
        format_line!(out);
        format_line!(out, "#include \"{class}.h\"");
        format_line!(out);
        if convention.needs_time_stamp() {
            format_line!(out, "double sc_time_stamp() {{ return 0; }}");
            format_line!(out);
        }
        format_line!(out, "extern \"C\" {{");
        format_line!(out);
        format_line!(
            out,
            "uint32_t {}(void) {{ return {BINDING_ABI_VERSION}; }}",
            symbol(module, "abi")
        );
        CxxShim { module: module.to_owned(), class, out }
    }

    pub fn doc(&mut self, doc: &str) {
        let sym = symbol(&self.module, "doc");
        format_line!(self.out, "const char* {sym}(void) {{ return {}; }}", c_string(doc));
    }

    pub fn port_counts(&mut self, inputs: usize, outputs: usize) {
        let inputs_sym = symbol(&self.module, "num_inputs");
        let outputs_sym = symbol(&self.module, "num_outputs");
        format_line!(self.out, "uint32_t {inputs_sym}(void) {{ return {inputs}; }}");
        format_line!(self.out, "uint32_t {outputs_sym}(void) {{ return {outputs}; }}");
    }

    /// The loader compares this against the descriptor it was given. The OS loader returns an
    /// already mapped library unchanged, so a rebuild with different port widths is only
    /// detected here.
    pub fn port_signature(&mut self, signature: &str) {
        let sym = symbol(&self.module, "ports");
        format_line!(self.out, "const char* {sym}(void) {{ return {}; }}", c_string(signature));
    }

    /// Construction, destruction, evaluation and finalization.
    pub fn lifecycle(&mut self) {
        let class = &self.class;
        format_line!(self.out);
        format_line!(self.out, "void* {}(const char* name) {{", symbol(&self.module, "new"));
        format_line!(self.out, "    (void)name;");
        format_line!(self.out, "    try {{");
        format_line!(self.out, "        return new {class}();");
        format_line!(self.out, "    }} catch (...) {{");
        format_line!(self.out, "        return nullptr;");
        format_line!(self.out, "    }}");
        format_line!(self.out, "}}");
        for (item, body) in
            [("delete", "delete m"), ("eval", "m->eval()"), ("final", "m->final()")]
        {
            format_line!(
                self.out,
                "void {}(void* model) {{ {class}* m = static_cast<{class}*>(model); {body}; }}",
                symbol(&self.module, item)
            );
        }
    }

    /// Accessors for one port, a setter is only emitted for inputs.
    pub fn port(&mut self, dir: Direction, port: &Port) {
        let class = &self.class;
        let name = port.name();
        let getter = getter_symbol(&self.module, name);
        let setter = setter_symbol(&self.module, name);
        let mask = port.mask();

        format_line!(self.out);
        format_line!(self.out, "// {dir} {name}[{}:0]", port.width() - 1);
        if port.is_wide() {
            let words = port.words();
            let top = words - 1;
            format_line!(self.out, "void {getter}(const void* model, uint32_t* words) {{");
            format_line!(self.out, "    const {class}* m = static_cast<const {class}*>(model);");
            format_line!(
                self.out,
                "    for (int i = 0; i < {words}; ++i) words[i] = m->{name}[i];"
            );
            format_line!(self.out, "}}");
            if dir == Direction::Input {
                format_line!(self.out, "void {setter}(void* model, const uint32_t* words) {{");
                format_line!(self.out, "    {class}* m = static_cast<{class}*>(model);");
                format_line!(
                    self.out,
                    "    for (int i = 0; i < {words}; ++i) m->{name}[i] = words[i];"
                );
                format_line!(self.out, "    m->{name}[{top}] &= {mask:#x}U;");
                format_line!(self.out, "}}");
            }
        } else {
            format_to!(self.out, "uint64_t {getter}(const void* model) {{ ");
            format_line!(self.out, "return static_cast<const {class}*>(model)->{name}; }}");
            if dir == Direction::Input {
                format_to!(self.out, "void {setter}(void* model, uint64_t value) {{ ");
                format_line!(
                    self.out,
                    "static_cast<{class}*>(model)->{name} = value & {mask:#x}ULL; }}"
                );
            }
        }
    }

    pub fn finish(mut self) -> String {
        format_line!(self.out);
        format_line!(self.out, "}}");
        self.out
    }
}

/// Quotes `text` as a C string literal. Everything outside printable ASCII is written as an
/// octal escape so the literal is valid regardless of the source encoding.
fn c_string(text: &str) -> String {
    let mut lit = String::with_capacity(text.len() + 2);
    lit.push('"');
    for byte in text.bytes() {
        match byte {
            b'"' => lit.push_str("\\\""),
            b'\\' => lit.push_str("\\\\"),
            b'?' => lit.push_str("\\?"),
            b'\n' => lit.push_str("\\n"),
            b'\t' => lit.push_str("\\t"),
            b' '..=b'~' => lit.push(byte as char),
            _ => format_to!(lit, "\\{byte:03o}"),
        }
    }
    lit.push('"');
    lit
}

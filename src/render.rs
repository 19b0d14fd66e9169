//! Template rendering
//!
//! Backends never format artifacts themselves; they hand a [`Template`] and
//! its [`Bindings`] to a [`Render`] implementation. [`TemplateSet`] looks
//! for a user template first (searching `<dir>/<target>/<file>` then
//! `<dir>/<file>`) and falls back to the built-in emitters.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::backend::{intel, xilinx};
use crate::error::{CodegenError, CodegenResult};
use crate::keyby::KeyByLambda;
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::Target;

/// Intel OpenCL artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntelTemplate {
    Constants,
    Tuples,
    ChannelTuples,
    Function,
    Device,
    Pipe,
    Source,
    Sink,
    Host,
    Makefile,
}

/// Xilinx HLS artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XilinxTemplate {
    Constants,
    Tuple,
    Defines,
    KeybyLambdas,
    Operator,
    MemoryReader,
    Compute,
    MemoryWriter,
    Host,
    Makefile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    Intel(IntelTemplate),
    Xilinx(XilinxTemplate),
}

impl Template {
    pub fn target(&self) -> Target {
        match self {
            Template::Intel(_) => Target::Intel,
            Template::Xilinx(_) => Target::Xilinx,
        }
    }

    /// File name a user template must have to shadow this one
    pub fn file_name(&self) -> &'static str {
        match self {
            Template::Intel(t) => match t {
                IntelTemplate::Constants => "constants.h",
                IntelTemplate::Tuples => "tuples.h",
                IntelTemplate::ChannelTuples => "fsp_tuples.cl",
                IntelTemplate::Function => "function.cl",
                IntelTemplate::Device => "device.cl",
                IntelTemplate::Pipe => "pipe.hpp",
                IntelTemplate::Source => "fsource.hpp",
                IntelTemplate::Sink => "fsink.hpp",
                IntelTemplate::Host => "host.cpp",
                IntelTemplate::Makefile => "Makefile",
            },
            Template::Xilinx(t) => match t {
                XilinxTemplate::Constants => "constants.hpp",
                XilinxTemplate::Tuple => "tuple.hpp",
                XilinxTemplate::Defines => "defines.hpp",
                XilinxTemplate::KeybyLambdas => "keyby_lambdas.hpp",
                XilinxTemplate::Operator => "operator.hpp",
                XilinxTemplate::MemoryReader => "memory_reader.cpp",
                XilinxTemplate::Compute => "compute.cpp",
                XilinxTemplate::MemoryWriter => "memory_writer.cpp",
                XilinxTemplate::Host => "host.cpp",
                XilinxTemplate::Makefile => "Makefile",
            },
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target(), self.file_name())
    }
}

/// Where an operator's compute code comes from in the aggregated device source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSource {
    /// `#include` of `device/nodes/<file>`
    Include(String),
    /// Body spliced into every replica kernel
    Inline(String),
}

/// Resolved data handed to a template
#[derive(Clone, Copy)]
pub struct Bindings<'a> {
    pub pipeline: &'a Pipeline,
    /// User constants merged with the parallelism constants
    pub constants: &'a BTreeMap<String, String>,
    pub operator: Option<&'a Operator>,
    pub datatype: Option<&'a str>,
    pub keyby: &'a [KeyByLambda],
    pub node_sources: &'a BTreeMap<String, NodeSource>,
}

impl<'a> Bindings<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        constants: &'a BTreeMap<String, String>,
        node_sources: &'a BTreeMap<String, NodeSource>,
    ) -> Self {
        Self {
            pipeline,
            constants,
            operator: None,
            datatype: None,
            keyby: &[],
            node_sources,
        }
    }

    pub fn with_operator(mut self, operator: &'a Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_datatype(mut self, datatype: &'a str) -> Self {
        self.datatype = Some(datatype);
        self
    }

    pub fn with_keyby(mut self, keyby: &'a [KeyByLambda]) -> Self {
        self.keyby = keyby;
        self
    }

    pub fn require_operator(&self, template: Template) -> CodegenResult<&'a Operator> {
        self.operator
            .ok_or_else(|| CodegenError::template(template.to_string(), "no operator bound"))
    }

    pub fn require_datatype(&self, template: Template) -> CodegenResult<&'a str> {
        self.datatype
            .ok_or_else(|| CodegenError::template(template.to_string(), "no datatype bound"))
    }

    /// Scalar values available to user templates
    pub fn scalars(&self) -> BTreeMap<String, String> {
        let config = self.pipeline.config();
        let mut scalars = self.constants.clone();
        scalars.insert("name".to_string(), self.pipeline.name());
        scalars.insert("datatype".to_string(), config.datatype.clone());
        scalars.insert("target".to_string(), config.target.to_string());
        scalars.insert("transfer_mode".to_string(), config.transfer_mode.macro_name().to_string());
        if let Some(op) = self.operator {
            scalars.insert("operator".to_string(), op.name.clone());
            scalars.insert("input_type".to_string(), op.input_type.clone());
            scalars.insert("output_type".to_string(), op.output_type().to_string());
        }
        if let Some(t) = self.datatype {
            scalars.insert("tuple".to_string(), t.to_string());
        }
        scalars
    }
}

/// Turns a template and its bindings into artifact text
pub trait Render {
    fn render(&self, template: Template, bindings: &Bindings<'_>) -> CodegenResult<String>;
}

/// Built-in templates, optionally shadowed by a user directory
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    search_dir: Option<PathBuf>,
}

impl TemplateSet {
    pub fn new(search_dir: Option<PathBuf>) -> Self {
        Self { search_dir }
    }

    pub fn builtin() -> Self {
        Self::default()
    }

    fn lookup(&self, template: Template) -> Option<PathBuf> {
        let dir = self.search_dir.as_ref()?;
        let candidates = [
            dir.join(template.target().to_string()).join(template.file_name()),
            dir.join(template.file_name()),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }
}

impl Render for TemplateSet {
    fn render(&self, template: Template, bindings: &Bindings<'_>) -> CodegenResult<String> {
        if let Some(path) = self.lookup(template) {
            debug!("using user template {} for {}", path.display(), template);
            let text = fs::read_to_string(&path).map_err(|e| CodegenError::io(&path, e))?;
            return Ok(substitute(&text, &bindings.scalars()));
        }
        match template {
            Template::Intel(t) => intel::templates::render(t, bindings),
            Template::Xilinx(t) => xilinx::templates::render(t, bindings),
        }
    }
}

/// Replace `{{ key }}` placeholders; unknown keys are left verbatim
pub fn substitute(text: &str, scalars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        match scalars.get(after[..close].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + close + 4]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::spike_detection;
    use tempfile::tempdir;

    #[test]
    fn test_substitute() {
        let mut scalars = BTreeMap::new();
        scalars.insert("name".to_string(), "sd".to_string());
        scalars.insert("WIN".to_string(), "16".to_string());
        assert_eq!(
            substitute("app {{ name }} win={{WIN}} keep {{ other }} init {{0}}", &scalars),
            "app sd win=16 keep {{ other }} init {{0}}"
        );
        assert_eq!(substitute("open {{ name", &scalars), "open {{ name");
    }

    #[test]
    fn test_file_names() {
        assert_eq!(Template::Intel(IntelTemplate::ChannelTuples).file_name(), "fsp_tuples.cl");
        assert_eq!(Template::Xilinx(XilinxTemplate::KeybyLambdas).to_string(), "xilinx/keyby_lambdas.hpp");
    }

    #[test]
    fn test_user_template_shadows_builtin() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("xilinx")).unwrap();
        fs::write(
            dir.path().join("xilinx/tuple.hpp"),
            "// {{ tuple }} for {{ name }} on {{ target }}\n",
        )
        .unwrap();

        let mut p = spike_detection(Target::Xilinx);
        p.finalize().unwrap();
        let constants = BTreeMap::new();
        let sources = BTreeMap::new();
        let bindings = Bindings::new(&p, &constants, &sources).with_datatype("tuple_t");

        let user = TemplateSet::new(Some(dir.path().to_path_buf()));
        assert_eq!(
            user.render(Template::Xilinx(XilinxTemplate::Tuple), &bindings).unwrap(),
            "// tuple_t for sd on xilinx\n"
        );

        let builtin = TemplateSet::builtin()
            .render(Template::Xilinx(XilinxTemplate::Tuple), &bindings)
            .unwrap();
        assert!(builtin.contains("struct tuple_t {"));
    }

    #[test]
    fn test_missing_binding_is_template_error() {
        let mut p = spike_detection(Target::Intel);
        p.finalize().unwrap();
        let constants = BTreeMap::new();
        let sources = BTreeMap::new();
        let bindings = Bindings::new(&p, &constants, &sources);
        let err = TemplateSet::builtin().render(Template::Intel(IntelTemplate::Function), &bindings);
        assert!(matches!(err, Err(CodegenError::Template { .. })));
    }
}

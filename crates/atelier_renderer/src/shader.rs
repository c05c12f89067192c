use std::fmt;

use naga::{
    Binding, TypeInner,
    valid::{Capabilities, ModuleInfo, ValidationFlags, Validator},
};

use crate::{
    backend::{GpuBackend, ProgramId},
    uniforms::{UniformLocation, UniformTable, UniformValue},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }

    fn naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("shader program failed to link:\n{log}")]
    Link { log: String },
}

impl ShaderError {
    /// `"vertex"`, `"fragment"` or `"link"`.
    pub fn tag(&self) -> &'static str {
        match self {
            ShaderError::Compile { stage, .. } => stage.as_str(),
            ShaderError::Link { .. } => "link",
        }
    }

    pub fn log(&self) -> &str {
        match self {
            ShaderError::Compile { log, .. } | ShaderError::Link { log } => log,
        }
    }
}

/// A parsed and validated WGSL module with one entry point for its stage.
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub source: String,
    pub entry_point: String,
    pub module: naga::Module,
    pub info: ModuleInfo,
}

impl CompiledStage {
    pub fn compile(stage: ShaderStage, source: &str) -> Result<Self, ShaderError> {
        let compile_error = |log: String| ShaderError::Compile { stage, log };

        let module =
            naga::front::wgsl::parse_str(source).map_err(|e| compile_error(e.emit_to_string(source)))?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
            .validate(&module)
            .map_err(|e| compile_error(error_chain(e.as_inner())))?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == stage.naga())
            .map(|ep| ep.name.clone())
            .ok_or_else(|| compile_error(format!("no @{stage} entry point")))?;

        Ok(Self {
            stage,
            source: source.to_owned(),
            entry_point,
            module,
            info,
        })
    }

    fn entry(&self) -> Option<&naga::EntryPoint> {
        self.module
            .entry_points
            .iter()
            .find(|ep| ep.name == self.entry_point)
    }
}

/// Both stages plus the merged uniform table, ready to hand to a backend.
pub struct LinkedProgram {
    pub label: String,
    pub vertex: CompiledStage,
    pub fragment: CompiledStage,
    pub uniforms: UniformTable,
}

impl LinkedProgram {
    pub fn link(
        label: &str,
        vertex: CompiledStage,
        fragment: CompiledStage,
    ) -> Result<Self, ShaderError> {
        let link_error = |log: String| ShaderError::Link { log };

        check_interface(&vertex, &fragment).map_err(link_error)?;

        let uniforms = UniformTable::reflect(&vertex.module)
            .and_then(|v| UniformTable::reflect(&fragment.module).and_then(|f| v.merge(f)))
            .map_err(link_error)?;

        Ok(Self {
            label: label.to_owned(),
            vertex,
            fragment,
            uniforms,
        })
    }
}

/// Every fragment input must be written by the vertex stage with the same type.
fn check_interface(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<(), String> {
    let mut outputs = Vec::new();
    if let Some(result) = vertex.entry().and_then(|ep| ep.function.result.as_ref()) {
        collect_locations(&vertex.module, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let mut inputs = Vec::new();
    if let Some(ep) = fragment.entry() {
        for argument in &ep.function.arguments {
            collect_locations(
                &fragment.module,
                argument.ty,
                argument.binding.as_ref(),
                &mut inputs,
            );
        }
    }

    for (location, ty) in &inputs {
        match outputs.iter().find(|(l, _)| l == location) {
            None => {
                return Err(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                ));
            }
            Some((_, produced)) if produced != ty => {
                return Err(format!(
                    "@location({location}) is {produced:?} in the vertex stage but {ty:?} in the fragment stage"
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn collect_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<(u32, TypeInner)>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.push((*location, module.types[ty].inner.clone()));
        }
        Some(_) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut log = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        log.push_str("\n  caused by: ");
        log.push_str(&cause.to_string());
        source = cause.source();
    }
    log
}

/// A linked GPU program and the uniform table reflected from it.
///
/// Binding state: [`ShaderProgram::use_program`] replaces the current program. The
/// setters write into this program's uniform storage whether or not it is current.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    label: String,
    uniforms: UniformTable,
}

impl ShaderProgram {
    pub fn compile_and_link<B: GpuBackend + ?Sized>(
        backend: &mut B,
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderError> {
        let vertex = CompiledStage::compile(ShaderStage::Vertex, vertex_source)?;
        let fragment = CompiledStage::compile(ShaderStage::Fragment, fragment_source)?;
        let linked = LinkedProgram::link(label, vertex, fragment)?;

        let id = backend
            .create_program(&linked)
            .map_err(|e| ShaderError::Link { log: e.to_string() })?;

        // The stage modules are not needed once the backend owns the program.
        let LinkedProgram { uniforms, .. } = linked;

        Ok(Self {
            id,
            label: label.to_owned(),
            uniforms,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn use_program<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.use_program(Some(self.id));
    }

    pub fn location(&self, name: &str) -> UniformLocation {
        self.uniforms.location(name)
    }

    /// Uploads `value` to a previously resolved location.
    pub fn set<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        location: UniformLocation,
        value: impl Into<UniformValue>,
    ) {
        let value = value.into();
        match location {
            UniformLocation::Unknown => {}
            UniformLocation::Value(_) => {
                let Some(entry) = self.uniforms.entry(location) else {
                    return;
                };
                if entry.kind != value.kind() {
                    log::warn!(
                        "{}: `{}` is {:?}, ignoring {:?} value",
                        self.label,
                        entry.name,
                        entry.kind,
                        value.kind()
                    );
                    return;
                }
                backend.write_uniform(self.id, entry.offset, value.as_bytes());
            }
            UniformLocation::Sampler(slot) => match value {
                UniformValue::Int(unit) if unit >= 0 => {
                    backend.set_sampler_unit(self.id, u32::from(slot), unit as u32)
                }
                other => log::warn!(
                    "{}: sampler slot {slot} takes a texture unit, got {other:?}",
                    self.label
                ),
            },
        }
    }

    pub fn set_mat4<B: GpuBackend + ?Sized>(&self, backend: &mut B, name: &str, value: glam::Mat4) {
        self.set(backend, self.location(name), value);
    }

    pub fn set_vec3<B: GpuBackend + ?Sized>(&self, backend: &mut B, name: &str, value: glam::Vec3) {
        self.set(backend, self.location(name), value);
    }

    pub fn set_float<B: GpuBackend + ?Sized>(&self, backend: &mut B, name: &str, value: f32) {
        self.set(backend, self.location(name), value);
    }

    pub fn set_int<B: GpuBackend + ?Sized>(&self, backend: &mut B, name: &str, value: i32) {
        self.set(backend, self.location(name), value);
    }

    pub fn delete<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        backend.delete_program(self.id);
    }
}

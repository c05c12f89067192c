//! Uniform reflection.
//!
//! A program exposes at most one uniform block, bound at `@group(0) @binding(0)`, plus
//! sampled textures in `@group(1)`. Each texture at binding `n` is paired with the
//! sampler at binding `n + 1`. The block's members are flattened into dotted paths
//! (`light.position`) so callers can address them the same way they would in source.

use glam::{Mat4, Vec3, Vec4};
use naga::{AddressSpace, ImageClass, ImageDimension, Scalar, TypeInner, VectorSize};

pub const UNIFORM_GROUP: u32 = 0;
pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Mat4,
    Vec3,
    Vec4,
    Float,
    Int,
}

impl UniformKind {
    fn from_naga(inner: &TypeInner) -> Option<Self> {
        match *inner {
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar == Scalar::F32 => Some(Self::Mat4),
            TypeInner::Vector {
                size: VectorSize::Tri,
                scalar,
            } if scalar == Scalar::F32 => Some(Self::Vec3),
            TypeInner::Vector {
                size: VectorSize::Quad,
                scalar,
            } if scalar == Scalar::F32 => Some(Self::Vec4),
            TypeInner::Scalar(scalar) if scalar == Scalar::F32 => Some(Self::Float),
            TypeInner::Scalar(scalar) if scalar == Scalar::I32 => Some(Self::Int),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformEntry {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerSlot {
    /// Name of the texture variable, which is also the name callers set.
    pub name: String,
    pub texture_binding: u32,
    pub sampler_binding: u32,
}

/// Where a name resolved to. `Unknown` is the no-op location: writes to it are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UniformLocation {
    Value(u16),
    Sampler(u16),
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Vec3(Vec3),
    Vec4(Vec4),
    Float(f32),
    Int(i32),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
        }
    }

    /// Column-major bytes, as laid out in the block.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformValue::Mat4(m) => bytemuck::bytes_of(m),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v),
            UniformValue::Float(f) => bytemuck::bytes_of(f),
            UniformValue::Int(i) => bytemuck::bytes_of(i),
        }
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformTable {
    block_size: u32,
    entries: Vec<UniformEntry>,
    samplers: Vec<SamplerSlot>,
}

impl UniformTable {
    /// Size in bytes of the uniform block, `None` when the program declares none.
    pub fn block_size(&self) -> Option<u32> {
        (self.block_size > 0).then_some(self.block_size)
    }

    pub fn entries(&self) -> &[UniformEntry] {
        &self.entries
    }

    pub fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }

    pub fn location(&self, name: &str) -> UniformLocation {
        if let Some(index) = self.entries.iter().position(|e| e.name == name) {
            return UniformLocation::Value(index as u16);
        }
        if let Some(index) = self.samplers.iter().position(|s| s.name == name) {
            return UniformLocation::Sampler(index as u16);
        }
        UniformLocation::Unknown
    }

    pub fn entry(&self, location: UniformLocation) -> Option<&UniformEntry> {
        match location {
            UniformLocation::Value(index) => self.entries.get(index as usize),
            _ => None,
        }
    }

    /// Reads the uniform block of one shader stage. Stages without a block yield an empty table.
    pub(crate) fn reflect(module: &naga::Module) -> Result<Self, String> {
        let mut table = Self::default();
        let mut textures = Vec::new();
        let mut sampler_bindings = Vec::new();

        for (_, var) in module.global_variables.iter() {
            let name = var.name.clone().unwrap_or_default();

            match var.space {
                AddressSpace::Uniform => {
                    let binding = var.binding.as_ref();
                    if binding.map(|b| (b.group, b.binding)) != Some((UNIFORM_GROUP, UNIFORM_BINDING))
                    {
                        return Err(format!(
                            "uniform `{name}` must be bound at @group({UNIFORM_GROUP}) @binding({UNIFORM_BINDING})"
                        ));
                    }
                    if table.block_size > 0 {
                        return Err(format!("uniform `{name}` is a second uniform block"));
                    }

                    table.block_size = module.types[var.ty].inner.size(module.to_ctx());
                    flatten(module, var.ty, &name, 0, true, &mut table.entries);
                }
                AddressSpace::Handle => {
                    let Some(binding) = var.binding.as_ref() else {
                        continue;
                    };
                    if binding.group != TEXTURE_GROUP {
                        return Err(format!(
                            "`{name}` must be bound in @group({TEXTURE_GROUP})"
                        ));
                    }

                    match module.types[var.ty].inner {
                        TypeInner::Image {
                            dim: ImageDimension::D2,
                            arrayed: false,
                            class: ImageClass::Sampled { .. },
                        } => textures.push((name, binding.binding)),
                        TypeInner::Sampler { comparison: false } => {
                            sampler_bindings.push(binding.binding)
                        }
                        _ => return Err(format!("`{name}` is not a 2D texture or sampler")),
                    }
                }
                _ => {}
            }
        }

        textures.sort_by_key(|(_, binding)| *binding);
        for (name, texture_binding) in textures {
            let sampler_binding = texture_binding + 1;
            if !sampler_bindings.contains(&sampler_binding) {
                return Err(format!(
                    "texture `{name}` has no sampler at @binding({sampler_binding})"
                ));
            }
            table.samplers.push(SamplerSlot {
                name,
                texture_binding,
                sampler_binding,
            });
        }

        Ok(table)
    }

    /// Combines the tables of two stages of one program.
    pub(crate) fn merge(self, other: Self) -> Result<Self, String> {
        let Self {
            block_size,
            entries,
            mut samplers,
        } = self;

        let (block_size, entries) = match (block_size, other.block_size) {
            (0, _) => (other.block_size, other.entries),
            (_, 0) => (block_size, entries),
            _ if block_size == other.block_size && entries == other.entries => {
                (block_size, entries)
            }
            _ => return Err("uniform block layout differs between stages".to_string()),
        };

        for slot in other.samplers {
            match samplers
                .iter()
                .find(|s| s.texture_binding == slot.texture_binding)
            {
                Some(existing) if existing.name != slot.name => {
                    return Err(format!(
                        "@binding({}) is `{}` in one stage and `{}` in the other",
                        slot.texture_binding, existing.name, slot.name
                    ));
                }
                Some(_) => {}
                None => samplers.push(slot),
            }
        }
        samplers.sort_by_key(|s| s.texture_binding);

        Ok(Self {
            block_size,
            entries,
            samplers,
        })
    }
}

fn flatten(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    path: &str,
    offset: u32,
    root: bool,
    out: &mut Vec<UniformEntry>,
) {
    match &module.types[ty].inner {
        TypeInner::Struct { members, .. } => {
            for member in members {
                let name = member.name.as_deref().unwrap_or_default();
                // The block variable itself is not part of the path.
                let member_path = if root {
                    name.to_string()
                } else {
                    format!("{path}.{name}")
                };
                flatten(module, member.ty, &member_path, offset + member.offset, false, out);
            }
        }
        inner => {
            if let Some(kind) = UniformKind::from_naga(inner) {
                out.push(UniformEntry {
                    name: path.to_string(),
                    kind,
                    offset,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(source: &str) -> Result<UniformTable, String> {
        let module = naga::front::wgsl::parse_str(source).expect("test WGSL parses");
        UniformTable::reflect(&module)
    }

    const BLOCK: &str = r#"
        struct Light { position: vec3<f32>, color: vec3<f32> }
        struct Uniforms {
            model: mat4x4<f32>,
            light: Light,
            strength: f32,
            mode: i32,
        }
        @group(0) @binding(0) var<uniform> u: Uniforms;
        @vertex fn vs_main() -> @builtin(position) vec4<f32> { return u.model[0]; }
    "#;

    #[test]
    fn nested_members_flatten_to_dotted_paths() {
        let table = table(BLOCK).unwrap();

        let names: Vec<_> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["model", "light.position", "light.color", "strength", "mode"]);

        let offsets: Vec<_> = table.entries().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, [0, 64, 80, 96, 100]);
        assert_eq!(table.block_size(), Some(112));
    }

    #[test]
    fn unknown_names_resolve_to_the_no_op_location() {
        let table = table(BLOCK).unwrap();

        assert_eq!(table.location("model"), UniformLocation::Value(0));
        assert_eq!(table.location("light.color"), UniformLocation::Value(2));
        assert_eq!(table.location("light"), UniformLocation::Unknown);
        assert_eq!(table.location("nope"), UniformLocation::Unknown);
        assert!(table.entry(UniformLocation::Unknown).is_none());
    }

    #[test]
    fn block_outside_group_zero_is_rejected() {
        let err = table(
            r#"
            @group(2) @binding(0) var<uniform> m: mat4x4<f32>;
            @vertex fn vs_main() -> @builtin(position) vec4<f32> { return m[0]; }
        "#,
        )
        .unwrap_err();

        assert!(err.contains("@group(0)"), "{err}");
    }

    #[test]
    fn textures_need_a_paired_sampler() {
        let ok = table(
            r#"
            @group(1) @binding(0) var tex: texture_2d<f32>;
            @group(1) @binding(1) var samp: sampler;
            @fragment fn fs_main() -> @location(0) vec4<f32> {
                return textureSample(tex, samp, vec2<f32>(0.0));
            }
        "#,
        )
        .unwrap();
        assert_eq!(ok.location("tex"), UniformLocation::Sampler(0));
        assert_eq!(ok.block_size(), None);

        let err = table(
            r#"
            @group(1) @binding(0) var tex: texture_2d<f32>;
            @group(1) @binding(3) var samp: sampler;
            @fragment fn fs_main() -> @location(0) vec4<f32> {
                return textureSample(tex, samp, vec2<f32>(0.0));
            }
        "#,
        )
        .unwrap_err();
        assert!(err.contains("no sampler"), "{err}");
    }

    #[test]
    fn values_know_their_kind_and_bytes() {
        assert_eq!(UniformValue::from(Mat4::IDENTITY).as_bytes().len(), 64);
        assert_eq!(UniformValue::from(Vec3::ONE).as_bytes().len(), 12);
        assert_eq!(UniformValue::from(2.0f32).kind(), UniformKind::Float);
        assert_eq!(UniformValue::from(3i32).as_bytes(), 3i32.to_ne_bytes());
    }
}

use std::mem;

use atelier_assets::{MeshData, MeshVertex};
use bytemuck::{Pod, Zeroable};

use crate::{
    backend::{BufferId, BufferKind, GpuBackend, VertexArrayId, VertexAttribute, VertexLayout},
    shader::ShaderProgram,
    texture::Texture,
    uniforms::UniformLocation,
};

// #[repr(C)] keeps the field order the vertex layout below describes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        let vec3 = mem::size_of::<[f32; 3]>() as u32;
        VertexLayout {
            stride: mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    components: 3,
                },
                VertexAttribute {
                    location: 1,
                    offset: vec3,
                    components: 3,
                },
                VertexAttribute {
                    location: 2,
                    offset: vec3 * 2,
                    components: 2,
                },
            ],
        }
    }
}

impl From<&MeshVertex> for Vertex {
    fn from(v: &MeshVertex) -> Self {
        Self {
            position: v.position,
            normal: v.normal,
            uv: v.uv,
        }
    }
}

/// Static vertex and index buffers plus the layout that reads them.
///
/// Binding state: [`GeometryBuffer::draw`] rebinds texture units `0..n` for its
/// attached textures and leaves no vertex array bound.
///
/// Attached textures are sampled as `texture_diffuse{n}` in attach order. Those names are
/// resolved once per program with [`GeometryBuffer::sampler_locations`].
#[derive(Debug)]
pub struct GeometryBuffer {
    vertex_array: VertexArrayId,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    vertex_count: u32,
    index_count: u32,
    textures: Vec<Texture>,
}

impl GeometryBuffer {
    pub fn create_cube<B: GpuBackend + ?Sized>(backend: &mut B) -> Self {
        Self::from_mesh(backend, &MeshData::cube())
    }

    pub fn from_mesh<B: GpuBackend + ?Sized>(backend: &mut B, mesh: &MeshData) -> Self {
        let vertices: Vec<Vertex> = mesh.vertices.iter().map(Vertex::from).collect();

        let vertex_buffer = backend.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&vertices));
        let index_buffer =
            backend.create_buffer(BufferKind::Index, bytemuck::cast_slice(&mesh.indices));
        let vertex_array = backend.create_vertex_array(&Vertex::layout(), vertex_buffer, index_buffer);

        Self {
            vertex_array,
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            textures: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_array(&self) -> VertexArrayId {
        self.vertex_array
    }

    /// Takes ownership of `texture`.
    pub fn attach_texture(&mut self, texture: Texture) {
        self.textures.push(texture);
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// The sampler location of every attached texture in `shader`, indexed by texture unit.
    /// Resolve again after attaching more textures.
    pub fn sampler_locations(&self, shader: &ShaderProgram) -> Vec<UniformLocation> {
        (0..self.textures.len())
            .map(|unit| shader.location(&format!("texture_diffuse{unit}")))
            .collect()
    }

    /// `samplers` comes from [`GeometryBuffer::sampler_locations`] for the same `shader`.
    /// Textures without a location are still bound but not routed to a sampler.
    pub fn draw<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        shader: &ShaderProgram,
        samplers: &[UniformLocation],
    ) {
        for (unit, texture) in self.textures.iter().enumerate() {
            texture.bind(backend, unit as u32);
            let location = samplers.get(unit).copied().unwrap_or_default();
            shader.set(backend, location, unit as i32);
        }

        backend.bind_vertex_array(Some(self.vertex_array));
        backend.draw_indexed(self.index_count);
        backend.bind_vertex_array(None);
    }

    /// Releases the buffers, the vertex array and every attached texture.
    pub fn delete<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        backend.delete_vertex_array(self.vertex_array);
        backend.delete_buffer(self.vertex_buffer);
        backend.delete_buffer(self.index_buffer);
        for texture in self.textures {
            texture.delete(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::HeadlessBackend, shaders};
    use atelier_assets::TextureData;

    #[test]
    fn layout_matches_interleaved_vertex() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride, 32);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    const TWO_SAMPLER_VERTEX: &str = r#"
        @vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(p, 1.0);
        }
    "#;

    const TWO_SAMPLER_FRAGMENT: &str = r#"
        @group(1) @binding(0) var texture_diffuse0: texture_2d<f32>;
        @group(1) @binding(1) var sampler0: sampler;
        @group(1) @binding(2) var texture_diffuse1: texture_2d<f32>;
        @group(1) @binding(3) var sampler1: sampler;

        @fragment fn fs_main() -> @location(0) vec4<f32> {
            let uv = vec2<f32>(0.5, 0.5);
            return textureSample(texture_diffuse0, sampler0, uv)
                + textureSample(texture_diffuse1, sampler1, uv);
        }
    "#;

    #[test]
    fn cube_uploads_once() {
        let mut backend = HeadlessBackend::new();
        let cube = GeometryBuffer::create_cube(&mut backend);

        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert_eq!(backend.live_objects(), 3);

        let vertex_array = backend
            .vertex_array(cube.vertex_array())
            .expect("vertex array is alive");
        assert_eq!(vertex_array.layout, Vertex::layout());
        assert_eq!(backend.buffer_len(vertex_array.vertex_buffer), Some(24 * 32));
        assert_eq!(backend.buffer_len(vertex_array.index_buffer), Some(36 * 4));
    }

    #[test]
    fn draw_samples_attached_textures_in_order() {
        let mut backend = HeadlessBackend::new();
        let shader = ShaderProgram::compile_and_link(
            &mut backend,
            "lit",
            shaders::LIT_VERTEX,
            shaders::LIT_FRAGMENT,
        )
        .expect("bundled lit program");
        let mut cube = GeometryBuffer::create_cube(&mut backend);
        let texture = Texture::from_data(&mut backend, &TextureData::checkerboard());
        let texture_id = texture.id();
        cube.attach_texture(texture);
        assert_eq!(cube.textures().len(), 1);

        let samplers = cube.sampler_locations(&shader);
        assert_eq!(samplers, vec![shader.location("texture_diffuse0")]);

        shader.use_program(&mut backend);
        cube.draw(&mut backend, &shader, &samplers);

        let draw = &backend.draws()[0];
        assert_eq!(draw.index_count, 36);
        assert_eq!(draw.vertex_array, Some(cube.vertex_array()));
        assert_eq!(draw.textures, vec![Some(texture_id)]);
        assert_eq!(backend.bound_vertex_array(), None);

        cube.delete(&mut backend);
        shader.delete(&mut backend);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn draw_routes_units_through_the_given_locations() {
        let mut backend = HeadlessBackend::new();
        let shader = ShaderProgram::compile_and_link(
            &mut backend,
            "two samplers",
            TWO_SAMPLER_VERTEX,
            TWO_SAMPLER_FRAGMENT,
        )
        .expect("two sampler program");
        let mut cube = GeometryBuffer::create_cube(&mut backend);
        let first = Texture::from_data(&mut backend, &TextureData::checkerboard());
        let second = Texture::from_data(&mut backend, &TextureData::checkerboard());
        let (first_id, second_id) = (first.id(), second.id());
        cube.attach_texture(first);
        cube.attach_texture(second);

        let samplers = cube.sampler_locations(&shader);
        shader.use_program(&mut backend);
        cube.draw(&mut backend, &shader, &samplers);
        assert_eq!(
            backend.draws()[0].textures,
            vec![Some(first_id), Some(second_id)]
        );

        // Only the locations decide which sampler reads which unit.
        let swapped: Vec<UniformLocation> = samplers.iter().rev().copied().collect();
        cube.draw(&mut backend, &shader, &swapped);
        assert_eq!(
            backend.draws()[1].textures,
            vec![Some(second_id), Some(first_id)]
        );

        cube.delete(&mut backend);
        shader.delete(&mut backend);
        assert_eq!(backend.live_objects(), 0);
    }
}

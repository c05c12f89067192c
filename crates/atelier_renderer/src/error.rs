use crate::shader::ShaderError;

/// Fatal failures of [`crate::RenderEngine::initialize`].
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("the GPU backend does not support offscreen framebuffers")]
    FramebuffersUnsupported,

    #[error("offscreen framebuffer is incomplete: {0}")]
    IncompleteFramebuffer(String),

    #[error("failed to build the {program} program")]
    Shader {
        program: &'static str,
        #[source]
        source: ShaderError,
    },
}

impl RenderError {
    /// `"vertex"`, `"fragment"` or `"link"` for shader failures.
    pub fn shader_stage_tag(&self) -> Option<&'static str> {
        match self {
            RenderError::Shader { source, .. } => Some(source.tag()),
            _ => None,
        }
    }
}

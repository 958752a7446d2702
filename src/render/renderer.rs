//! OpenGL scene renderer: window planes, the hand cursor and its shadow

use anyhow::{Result, anyhow};
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::ffi::CString;
use std::ptr;
use tracing::{debug, info, trace, warn};

use super::{PixelFormat, RenderError, TextureHandle, TextureSink};
use crate::mirror::WindowRegistry;
use crate::shared::Rect;

const NEAR: f32 = 0.1;
const FAR: f32 = 1000.0;
/// Side of the square drawn where the hand ray meets a window, pixels
const SHADOW_SIZE: f32 = 6.0;

// Unit quad as triangle fan: position (vec2, y down) and texcoord (vec2)
const QUAD: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0,
    1.0, 0.0, 1.0, 0.0,
    1.0, 1.0, 1.0, 1.0,
    0.0, 1.0, 0.0, 1.0,
];

// Arrow with its tip at the origin, in scene units before cursor scaling
const ARROW: [f32; 24] = [
    0.0, 0.0, 0.0, 0.0,
    0.0, 4.0, 0.0, 0.0,
    1.1, 3.0, 0.0, 0.0,
    2.8, 2.8, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0,
    1.1, 3.0, 0.0, 0.0,
];

/// Camera and projection for one frame
#[derive(Debug, Clone, Copy)]
pub struct SceneView {
    /// Inverse camera, scene units
    pub view: Mat4,
    pub projection: Mat4,
    /// Desktop pixels per scene unit
    pub scale: f32,
}

impl SceneView {
    /// Perspective for a `width`x`height` viewport looking down -Z from
    /// `camera` (scene units). Scene content is in desktop pixels, scaled
    /// down by `scale` pixels per scene unit.
    pub fn new(width: u32, height: u32, camera: Mat4, scale: f32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        let fov_y = 2.0 * (h / w).atan();
        let projection = Mat4::perspective_rh_gl(fov_y, w / h, NEAR, FAR);
        Self {
            view: camera.inverse(),
            projection,
            scale,
        }
    }

    /// Transform for content given in scene units (the hand cursor)
    pub fn scene_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Transform for content given in desktop pixels (window planes)
    pub fn view_projection(&self) -> Mat4 {
        self.scene_projection() * Mat4::from_scale(Vec3::splat(1.0 / self.scale))
    }
}

/// Where the hand ray lands on a window plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorShadow {
    /// Transform of the frame the shadow lies on
    pub frame: Mat4,
    /// Frame-local pixel position
    pub x: f32,
    pub y: f32,
}

impl CursorShadow {
    pub fn model(&self) -> Mat4 {
        self.frame
            * Mat4::from_translation(Vec3::new(
                self.x - SHADOW_SIZE / 2.0,
                -(self.y - SHADOW_SIZE / 2.0),
                0.01,
            ))
    }
}

struct GlTexture {
    id: u32,
    width: u32,
    height: u32,
}

/// Draws mirrored windows and owns their GL textures
pub struct SceneRenderer {
    program: u32,
    vao: u32,
    vbo: u32,
    arrow_vao: u32,
    arrow_vbo: u32,
    textures: HashMap<TextureHandle, GlTexture>,
    width: u32,
    height: u32,
}

impl SceneRenderer {
    /// Set up GL state; a context must be current
    pub fn new(width: u32, height: u32) -> Result<Self> {
        unsafe {
            gl::Enable(gl::DEPTH_TEST);
            gl::Enable(gl::BLEND);
            gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);

            let program = Self::create_shader_program()?;
            let (vao, vbo) = Self::create_buffer(&QUAD);
            let (arrow_vao, arrow_vbo) = Self::create_buffer(&ARROW);

            gl::Viewport(0, 0, width as i32, height as i32);
            info!("Scene renderer initialized ({}x{})", width, height);

            Ok(Self {
                program,
                vao,
                vbo,
                arrow_vao,
                arrow_vbo,
                textures: HashMap::new(),
                width,
                height,
            })
        }
    }

    unsafe fn create_buffer(vertices: &[f32]) -> (u32, u32) {
        let stride = 4 * std::mem::size_of::<f32>() as i32;
        let mut vao = 0;
        let mut vbo = 0;
        unsafe {
            gl::GenVertexArrays(1, &mut vao);
            gl::GenBuffers(1, &mut vbo);
            gl::BindVertexArray(vao);
            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
            let bytes: &[u8] = bytemuck::cast_slice(vertices);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                bytes.len() as isize,
                bytes.as_ptr() as *const _,
                gl::STATIC_DRAW,
            );
            gl::VertexAttribPointer(0, 2, gl::FLOAT, gl::FALSE, stride, ptr::null());
            gl::EnableVertexAttribArray(0);
            gl::VertexAttribPointer(
                1,
                2,
                gl::FLOAT,
                gl::FALSE,
                stride,
                (2 * std::mem::size_of::<f32>()) as *const _,
            );
            gl::EnableVertexAttribArray(1);
            gl::BindVertexArray(0);
        }
        (vao, vbo)
    }

    fn create_shader_program() -> Result<u32> {
        let vertex_shader = r#"
            #version 330 core
            layout (location = 0) in vec2 aPos;
            layout (location = 1) in vec2 aTexCoord;

            uniform mat4 uMvp;
            uniform vec2 uSize;

            out vec2 TexCoord;

            void main() {
                gl_Position = uMvp * vec4(aPos.x * uSize.x, -aPos.y * uSize.y, 0.0, 1.0);
                TexCoord = aTexCoord;
            }
        "#;

        let fragment_shader = r#"
            #version 330 core
            out vec4 FragColor;

            in vec2 TexCoord;

            uniform sampler2D uTexture;
            uniform vec4 uColor;
            uniform bool uTextured;

            void main() {
                if (uTextured) {
                    FragColor = texture(uTexture, TexCoord);
                } else {
                    FragColor = uColor;
                }
            }
        "#;

        let vs = Self::compile_shader(vertex_shader, gl::VERTEX_SHADER)?;
        let fs = Self::compile_shader(fragment_shader, gl::FRAGMENT_SHADER)?;
        let program = Self::link_program(vs, fs);
        unsafe {
            gl::DeleteShader(vs);
            gl::DeleteShader(fs);
        }
        program
    }

    fn compile_shader(source: &str, shader_type: u32) -> Result<u32> {
        let c_str = CString::new(source)?;
        unsafe {
            let shader = gl::CreateShader(shader_type);
            gl::ShaderSource(shader, 1, &c_str.as_ptr(), ptr::null());
            gl::CompileShader(shader);

            let mut success = 0;
            gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut success);
            if success == 0 {
                let mut len = 0;
                gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
                let mut buffer = vec![0u8; len.max(0) as usize];
                gl::GetShaderInfoLog(shader, len, ptr::null_mut(), buffer.as_mut_ptr() as *mut _);
                gl::DeleteShader(shader);
                return Err(anyhow!(
                    "Shader compilation failed: {}",
                    String::from_utf8_lossy(&buffer)
                ));
            }

            Ok(shader)
        }
    }

    fn link_program(vs: u32, fs: u32) -> Result<u32> {
        unsafe {
            let program = gl::CreateProgram();
            gl::AttachShader(program, vs);
            gl::AttachShader(program, fs);
            gl::LinkProgram(program);

            let mut success = 0;
            gl::GetProgramiv(program, gl::LINK_STATUS, &mut success);
            if success == 0 {
                let mut len = 0;
                gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
                let mut buffer = vec![0u8; len.max(0) as usize];
                gl::GetProgramInfoLog(program, len, ptr::null_mut(), buffer.as_mut_ptr() as *mut _);
                gl::DeleteProgram(program);
                return Err(anyhow!(
                    "Program linking failed: {}",
                    String::from_utf8_lossy(&buffer)
                ));
            }

            Ok(program)
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        debug!("Preview resized to {}x{}", width, height);
        self.width = width;
        self.height = height;
        unsafe {
            gl::Viewport(0, 0, width as i32, height as i32);
        }
    }

    /// Draw every mapped top-level with a texture, then the hand cursor
    pub fn render(
        &self,
        registry: &WindowRegistry,
        view: &SceneView,
        background: [f32; 3],
        cursor: Option<Mat4>,
        shadow: Option<&CursorShadow>,
    ) {
        let view_projection = view.view_projection();

        unsafe {
            gl::ClearColor(background[0], background[1], background[2], 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
            gl::UseProgram(self.program);
            gl::ActiveTexture(gl::TEXTURE0);
            gl::Uniform1i(self.uniform(b"uTexture\0"), 0);
        }

        for node in registry.top_levels().filter(|n| n.mapped) {
            let Some(texture) = node.texture else {
                continue;
            };
            let Some(gl_texture) = self.textures.get(&texture.handle) else {
                trace!("Window 0x{:x} has no GL texture yet", node.id);
                continue;
            };
            unsafe {
                gl::Uniform1i(self.uniform(b"uTextured\0"), 1);
                gl::BindTexture(gl::TEXTURE_2D, gl_texture.id);
                self.draw_quad(view_projection * node.transform, texture.width as f32, texture.height as f32);
            }
        }

        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, 0);
            gl::Uniform1i(self.uniform(b"uTextured\0"), 0);

            if let Some(shadow) = shadow {
                gl::Uniform4f(self.uniform(b"uColor\0"), 0.0, 0.0, 0.0, 0.6);
                self.draw_quad(view_projection * shadow.model(), SHADOW_SIZE, SHADOW_SIZE);
            }

            if let Some(cursor) = cursor {
                gl::Uniform4f(self.uniform(b"uColor\0"), 1.0, 1.0, 1.0, 1.0);
                gl::Uniform2f(self.uniform(b"uSize\0"), 1.0, 1.0);
                self.set_mvp(view.scene_projection() * cursor);
                gl::BindVertexArray(self.arrow_vao);
                gl::DrawArrays(gl::TRIANGLES, 0, 6);
            }

            gl::BindVertexArray(0);

            let err = gl::GetError();
            if err != gl::NO_ERROR {
                warn!("OpenGL error after frame: 0x{:x}", err);
            }
        }
    }

    unsafe fn draw_quad(&self, mvp: Mat4, width: f32, height: f32) {
        unsafe {
            self.set_mvp(mvp);
            gl::Uniform2f(self.uniform(b"uSize\0"), width, height);
            gl::BindVertexArray(self.vao);
            gl::DrawArrays(gl::TRIANGLE_FAN, 0, 4);
        }
    }

    unsafe fn set_mvp(&self, mvp: Mat4) {
        let columns = mvp.to_cols_array();
        unsafe {
            gl::UniformMatrix4fv(self.uniform(b"uMvp\0"), 1, gl::FALSE, columns.as_ptr());
        }
    }

    fn uniform(&self, name: &[u8]) -> i32 {
        unsafe { gl::GetUniformLocation(self.program, name.as_ptr() as *const _) }
    }
}

/// Bytes an upload of `region` in `format` must carry
fn expected_len(region: &Rect, format: PixelFormat) -> usize {
    region.width as usize * region.height as usize * format.bytes_per_pixel()
}

fn gl_format(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgb => gl::RGB,
        PixelFormat::Rgba => gl::RGBA,
    }
}

impl TextureSink for SceneRenderer {
    fn allocate(&mut self, width: u32, height: u32) -> Result<TextureHandle, RenderError> {
        let mut id = 0;
        unsafe {
            gl::GenTextures(1, &mut id);
            if id == 0 {
                return Err(RenderError::Allocation { width, height });
            }
            gl::BindTexture(gl::TEXTURE_2D, id);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::RGBA as i32,
                width as i32,
                height as i32,
                0,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                ptr::null(),
            );
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }

        let handle = TextureHandle(id);
        trace!("Allocated texture {} ({}x{})", id, width, height);
        self.textures.insert(handle, GlTexture { id, width, height });
        Ok(handle)
    }

    fn upload(
        &mut self,
        texture: TextureHandle,
        region: Rect,
        format: PixelFormat,
        pixels: &[u8],
    ) -> Result<(), RenderError> {
        let gl_texture = self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownTexture(texture))?;

        let expected = expected_len(&region, format);
        if pixels.len() < expected {
            return Err(RenderError::ShortBuffer {
                expected,
                actual: pixels.len(),
            });
        }
        if region.clip_to(gl_texture.width, gl_texture.height) != Some(region) {
            debug!(
                "Upload {:?} exceeds texture {} ({}x{}), skipped",
                region, gl_texture.id, gl_texture.width, gl_texture.height
            );
            return Ok(());
        }

        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, gl_texture.id);
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                region.x,
                region.y,
                region.width as i32,
                region.height as i32,
                gl_format(format),
                gl::UNSIGNED_BYTE,
                pixels.as_ptr() as *const _,
            );
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
        Ok(())
    }

    fn release(&mut self, texture: TextureHandle) {
        if let Some(gl_texture) = self.textures.remove(&texture) {
            unsafe {
                gl::DeleteTextures(1, &gl_texture.id);
            }
            trace!("Released texture {}", gl_texture.id);
        }
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        unsafe {
            for texture in self.textures.values() {
                gl::DeleteTextures(1, &texture.id);
            }
            gl::DeleteBuffers(1, &self.vbo);
            gl::DeleteBuffers(1, &self.arrow_vbo);
            gl::DeleteVertexArrays(1, &self.vao);
            gl::DeleteVertexArrays(1, &self.arrow_vao);
            gl::DeleteProgram(self.program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_point_ahead_of_camera_projects_to_center() {
        let scale = 117.0 / 2.56;
        let camera = Mat4::from_translation(Vec3::new(0.0, 0.0, 30.0));
        let view = SceneView::new(1024, 768, camera, scale);

        let clip = view.view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;

        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_horizontal_edge_matches_ray_direction() {
        // A pixel at the right edge of the viewport casts the ray (1, 0, -1).
        let scale = 2.0;
        let view = SceneView::new(800, 600, Mat4::IDENTITY, scale);

        let point = Vec3::new(10.0, 0.0, -10.0) * scale;
        let clip = view.view_projection() * point.extend(1.0);

        assert!((clip.x / clip.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_expected_upload_len() {
        assert_eq!(expected_len(&Rect::new(3, 4, 10, 2), PixelFormat::Rgba), 80);
        assert_eq!(expected_len(&Rect::new(0, 0, 10, 2), PixelFormat::Rgb), 60);
    }

    #[test]
    fn test_shadow_sits_on_frame_plane() {
        let frame = Mat4::from_translation(Vec3::new(100.0, -50.0, 0.0));
        let shadow = CursorShadow { frame, x: 20.0, y: 10.0 };

        let corner = shadow.model().transform_point3(Vec3::ZERO);
        assert_eq!(corner, Vec3::new(117.0, -57.0, 0.01));
    }
}

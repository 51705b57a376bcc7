//! # Texture Uploader
//!
//! Pushes decoded planes into caller-owned GL textures, one texture per
//! plane. Runs on the GL thread with the binding it is handed.

use serde::Serialize;

use crate::backend::VideoFrame;
use crate::error::{Result, SessionError};
use crate::format::PixelFormat;
use crate::gl::{
    GlBinding, GL_BGR, GL_BGRA, GL_INVALID_OPERATION, GL_INVALID_VALUE, GL_LUMINANCE,
    GL_LUMINANCE_ALPHA, GL_NO_ERROR, GL_RGB, GL_RGBA, GL_TEXTURE0, GL_TEXTURE_2D,
    GL_UNSIGNED_BYTE,
};
use crate::probe::Capabilities;
use crate::video::{PlaneLayout, VideoFrameLayout, MAX_PLANES};

/// Smallest power of two >= `value`; 1 for 0.
pub fn round_to_power_of2(value: u32) -> u32 {
    if value == 0 {
        return 1;
    }
    value.checked_next_power_of_two().unwrap_or(1 << 31)
}

/// (format, internal format) for a plane with this many bytes per texel.
fn gl_formats(format: PixelFormat, bytes_per_texel: u32) -> (u32, i32) {
    match bytes_per_texel {
        1 => (GL_LUMINANCE, GL_LUMINANCE as i32),
        2 => (GL_LUMINANCE_ALPHA, GL_LUMINANCE_ALPHA as i32),
        3 if format == PixelFormat::Bgr24 => (GL_BGR, GL_RGB as i32),
        3 => (GL_RGB, GL_RGB as i32),
        _ if format == PixelFormat::Bgra => (GL_BGRA, GL_RGBA as i32),
        // ARGB/ABGR/YUYV are swizzled by the caller's shader
        _ => (GL_RGBA, GL_RGBA as i32),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Allocated texture size per plane.
    pub texture_sizes: Vec<(u32, u32)>,
    /// At least one texture was (re)allocated by this upload.
    pub reallocated: bool,
    /// Rows were already bottom-up; no flip needed when drawing.
    pub in_gl_orientation: bool,
}

pub struct TextureUploader {
    textures: [u32; MAX_PLANES],
    allocated: [Option<(u32, u32)>; MAX_PLANES],
    force_power_of2: bool,
    enabled: bool,
    /// Tightly packed rows for planes whose stride has padding.
    repack: Vec<u8>,
    uploads: u64,
}

impl TextureUploader {
    /// `textures` are caller-generated texture names, one per plane.
    pub fn new(textures: &[u32], caps: &Capabilities) -> Self {
        let mut names = [0; MAX_PLANES];
        for (slot, name) in names.iter_mut().zip(textures) {
            *slot = *name;
        }
        if !caps.has_npot {
            tracing::debug!("NPOT textures unavailable, rounding texture sizes");
        }
        Self {
            textures: names,
            allocated: [None; MAX_PLANES],
            force_power_of2: !caps.has_npot,
            enabled: false,
            repack: Vec::new(),
            uploads: 0,
        }
    }

    pub fn texture_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.force_power_of2 {
            (round_to_power_of2(width), round_to_power_of2(height))
        } else {
            (width, height)
        }
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Forget allocations so the next upload re-specifies every texture,
    /// e.g. after the GL context was recreated.
    pub fn invalidate(&mut self) {
        self.allocated = [None; MAX_PLANES];
        self.enabled = false;
    }

    fn plane_pixels<'a>(
        repack: &'a mut Vec<u8>,
        data: &'a [u8],
        stride: usize,
        plane: &PlaneLayout,
    ) -> Option<&'a [u8]> {
        let row = plane.row_bytes();
        let rows = plane.height as usize;
        if rows == 0 || row == 0 {
            return Some(&[]);
        }
        if stride < row || data.len() < stride * (rows - 1) + row {
            return None;
        }
        if stride == row {
            return Some(&data[..row * rows]);
        }
        repack.clear();
        for r in 0..rows {
            repack.extend_from_slice(&data[r * stride..r * stride + row]);
        }
        Some(repack.as_slice())
    }

    /// Upload every plane of `frame` as described by `layout`.
    ///
    /// A GL error after a plane is reported as a non-fatal `GpuUpload`; the
    /// texture contents are then undefined until the next successful upload.
    pub fn upload(
        &mut self,
        gl: &dyn GlBinding,
        frame: &VideoFrame,
        layout: &VideoFrameLayout,
    ) -> Result<UploadReport> {
        let entry_points = gl.entry_points();
        if !entry_points.can_upload() {
            return Err(SessionError::GpuUpload {
                code: GL_INVALID_OPERATION,
                plane: 0,
            });
        }

        if !self.enabled {
            gl.enable(GL_TEXTURE_2D);
            self.enabled = true;
        }

        let mut report = UploadReport {
            in_gl_orientation: frame.bottom_up,
            ..Default::default()
        };

        for (index, plane_layout) in layout.plane_layouts().iter().enumerate() {
            let Some(plane) = frame.planes.get(index) else {
                return Err(SessionError::GpuUpload { code: GL_INVALID_VALUE, plane: index });
            };
            let (format, internal_format) = gl_formats(layout.format, plane_layout.bytes_per_texel);

            if entry_points.active_texture {
                gl.active_texture(GL_TEXTURE0 + index as u32);
            }
            gl.bind_texture(GL_TEXTURE_2D, self.textures[index]);

            let size = self.texture_size(plane_layout.width, plane_layout.height);
            if self.allocated[index] != Some(size) {
                gl.tex_image_2d(
                    GL_TEXTURE_2D,
                    0,
                    internal_format,
                    size.0 as i32,
                    size.1 as i32,
                    format,
                    GL_UNSIGNED_BYTE,
                    None,
                );
                self.allocated[index] = Some(size);
                report.reallocated = true;
                tracing::debug!(
                    "Texture {} for plane {} allocated {}x{} ({}x{} used)",
                    self.textures[index],
                    index,
                    size.0,
                    size.1,
                    plane_layout.width,
                    plane_layout.height
                );
            }

            let pixels = Self::plane_pixels(&mut self.repack, &plane.data, plane.stride, plane_layout)
                .ok_or(SessionError::GpuUpload { code: GL_INVALID_VALUE, plane: index })?;
            gl.tex_sub_image_2d(
                GL_TEXTURE_2D,
                0,
                0,
                0,
                plane_layout.width as i32,
                plane_layout.height as i32,
                format,
                GL_UNSIGNED_BYTE,
                pixels,
            );

            if entry_points.get_error {
                let code = gl.get_error();
                if code != GL_NO_ERROR {
                    tracing::warn!("GL error 0x{:04X} uploading plane {}", code, index);
                    // Re-specify the texture on the next upload
                    self.allocated[index] = None;
                    return Err(SessionError::GpuUpload { code, plane: index });
                }
            }
            report.texture_sizes.push(size);
        }

        if entry_points.flush {
            gl.flush();
        }
        self.uploads += 1;
        Ok(report)
    }
}

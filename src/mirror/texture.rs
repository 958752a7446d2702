//! Damage-driven texture updater
//!
//! Keeps each top-level's texture in step with the window's pixels. A
//! texture exists only while the window is mapped; a size change always
//! reallocates and refills it, otherwise only the damaged part is re-read.

use tracing::trace;

use super::node::WindowTexture;
use super::registry::WindowRegistry;
use super::MirrorError;
use crate::render::{PixelFormat, TextureHandle, TextureSink};
use crate::shared::Rect;
use crate::transport::{DisplayTransport, Image, ServerGrab, WindowClass, WindowId};

/// What an update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Not a top-level window; only `mapped` was refreshed
    NotTopLevel,
    /// Nothing to show (unmapped, input-only or zero-sized)
    NotViewable,
    /// The window stopped being viewable and its texture was released
    Released,
    /// A new texture was allocated and filled completely
    Allocated { width: u32, height: u32 },
    /// Part of the existing texture was refreshed
    Uploaded(Rect),
    /// Attributes rechecked, no pixels requested
    AttributesOnly,
    /// Damage fell entirely outside the texture
    OutOfBounds,
}

impl UpdateOutcome {
    /// Whether texture contents changed
    pub fn changed_pixels(&self) -> bool {
        matches!(self, UpdateOutcome::Allocated { .. } | UpdateOutcome::Uploaded(_))
    }
}

/// Bring `window`'s texture up to date after damage in `damage`.
///
/// An empty `damage` rectangle rechecks attributes only, unless the texture
/// has to be (re)allocated in which case the whole window is read.
pub fn update_window<T, S>(
    registry: &mut WindowRegistry,
    transport: &T,
    sink: &mut S,
    window: WindowId,
    damage: Rect,
) -> Result<UpdateOutcome, MirrorError>
where
    T: DisplayTransport + ?Sized,
    S: TextureSink + ?Sized,
{
    let node = registry
        .get_mut(window)
        .ok_or(MirrorError::UnknownWindow(window))?;

    // Attributes and pixels must describe the same window state
    let _grab = ServerGrab::new(transport)?;
    let attrs = transport.window_attributes(window)?;
    node.mapped = attrs.viewable;
    node.geometry = attrs.geometry;
    node.event_mask = attrs.event_mask;

    if !node.is_top_level() {
        return Ok(UpdateOutcome::NotTopLevel);
    }

    let (width, height) = (attrs.geometry.width, attrs.geometry.height);
    let partial = match node.texture {
        None => {
            if !attrs.viewable || attrs.class != WindowClass::InputOutput || width == 0 || height == 0 {
                return Ok(UpdateOutcome::NotViewable);
            }
            None
        }
        Some(texture) if !attrs.viewable => {
            sink.release(texture.handle);
            node.texture = None;
            trace!("Released texture of unmapped {:#x}", window);
            return Ok(UpdateOutcome::Released);
        }
        Some(texture) if texture.width != width || texture.height != height => {
            trace!(
                "{:#x} resized {}x{} -> {}x{}",
                window, texture.width, texture.height, width, height
            );
            sink.release(texture.handle);
            node.texture = None;
            if width == 0 || height == 0 {
                return Ok(UpdateOutcome::NotViewable);
            }
            None
        }
        Some(texture) => {
            if damage.is_empty() {
                return Ok(UpdateOutcome::AttributesOnly);
            }
            match damage.clip_to(texture.width, texture.height) {
                Some(region) => Some((texture.handle, region)),
                None => return Ok(UpdateOutcome::OutOfBounds),
            }
        }
    };

    match partial {
        Some((handle, region)) => {
            read_and_upload(transport, sink, window, handle, region)?;
            Ok(UpdateOutcome::Uploaded(region))
        }
        None => {
            let handle = sink.allocate(width, height)?;
            // A texture that was never filled must not count as current
            if let Err(e) = read_and_upload(transport, sink, window, handle, Rect::full(width, height)) {
                sink.release(handle);
                return Err(e);
            }
            node.texture = Some(WindowTexture { handle, width, height });
            Ok(UpdateOutcome::Allocated { width, height })
        }
    }
}

/// Window went away from the screen: drop its texture
pub fn release_texture<S: TextureSink + ?Sized>(
    registry: &mut WindowRegistry,
    sink: &mut S,
    window: WindowId,
) -> bool {
    let Some(node) = registry.get_mut(window) else {
        return false;
    };
    node.mapped = false;
    match node.texture.take() {
        Some(texture) => {
            sink.release(texture.handle);
            true
        }
        None => false,
    }
}

fn read_and_upload<T, S>(
    transport: &T,
    sink: &mut S,
    window: WindowId,
    texture: TextureHandle,
    region: Rect,
) -> Result<(), MirrorError>
where
    T: DisplayTransport + ?Sized,
    S: TextureSink + ?Sized,
{
    let image = transport.get_image(window, region)?;
    let (format, pixels) =
        convert_pixels(&image).ok_or(MirrorError::UnsupportedPixels(image.bytes_per_pixel))?;
    sink.upload(texture, region, format, &pixels)?;
    Ok(())
}

/// Native BGR(X) scanlines to tightly packed RGB(A), alpha forced opaque
pub fn convert_pixels(image: &Image) -> Option<(PixelFormat, Vec<u8>)> {
    let bpp = image.bytes_per_pixel as usize;
    let format = match bpp {
        3 => PixelFormat::Rgb,
        4 => PixelFormat::Rgba,
        _ => return None,
    };

    let (width, height) = (image.width as usize, image.height as usize);
    let mut out = Vec::with_capacity(width * height * bpp);
    for row in 0..height {
        let start = row * image.stride;
        let Some(line) = image.data.get(start..start + width * bpp) else {
            break;
        };
        for pixel in line.chunks_exact(bpp) {
            out.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
            if format == PixelFormat::Rgba {
                out.push(255);
            }
        }
    }
    // Short replies (window shrank under us) are padded with black
    out.resize(width * height * bpp, 0);
    Some((format, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::hierarchy::refresh_from_root;
    use crate::render::recording::{RecordingSink, SinkCall};
    use crate::transport::fake::FakeDisplay;

    const ROOT: WindowId = 0x100;
    const W: WindowId = 0x200;

    fn setup() -> (FakeDisplay, WindowRegistry, RecordingSink) {
        let display = FakeDisplay::new(ROOT, 1920, 1080);
        display.add_window(ROOT, W, Rect::new(0, 0, 200, 100));
        display.add_window(W, 0x201, Rect::new(10, 10, 20, 20));
        let mut registry = WindowRegistry::new(ROOT);
        refresh_from_root(&mut registry, &display).unwrap();
        (display, registry, RecordingSink::default())
    }

    #[test]
    fn test_first_update_allocates_full_texture() {
        let (display, mut registry, mut sink) = setup();

        let outcome = update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        assert_eq!(outcome, UpdateOutcome::Allocated { width: 200, height: 100 });
        assert_eq!(display.image_reads.borrow().as_slice(), &[(W, Rect::full(200, 100))]);
        let texture = registry.get(W).unwrap().texture.unwrap();
        assert_eq!((texture.width, texture.height), (200, 100));
        assert_eq!(display.grab_depth(), 0);
    }

    #[test]
    fn test_damage_reads_and_uploads_exactly_the_region() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        display.image_reads.borrow_mut().clear();
        sink.calls.clear();

        let damage = Rect::new(10, 10, 50, 50);
        let outcome = update_window(&mut registry, &display, &mut sink, W, damage).unwrap();

        assert_eq!(outcome, UpdateOutcome::Uploaded(damage));
        assert_eq!(display.image_reads.borrow().as_slice(), &[(W, damage)]);
        let texture = registry.get(W).unwrap().texture.unwrap().handle;
        assert_eq!(sink.uploads(), vec![(texture, damage)]);
        assert_eq!(sink.calls.len(), 1);
    }

    #[test]
    fn test_damage_outside_texture_is_a_no_op() {
        let (display, mut registry, mut sink) = setup();
        display.set_geometry(W, Rect::new(0, 0, 100, 100));
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        display.image_reads.borrow_mut().clear();
        sink.calls.clear();

        let outcome =
            update_window(&mut registry, &display, &mut sink, W, Rect::new(1000, 0, 10, 10)).unwrap();

        assert_eq!(outcome, UpdateOutcome::OutOfBounds);
        assert!(display.image_reads.borrow().is_empty());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_partially_outside_damage_is_clamped() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        let outcome =
            update_window(&mut registry, &display, &mut sink, W, Rect::new(180, -5, 50, 20)).unwrap();

        assert_eq!(outcome, UpdateOutcome::Uploaded(Rect::new(180, 0, 20, 15)));
    }

    #[test]
    fn test_size_change_reallocates_instead_of_sub_update() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        let old = registry.get(W).unwrap().texture.unwrap().handle;
        sink.calls.clear();

        display.set_geometry(W, Rect::new(0, 0, 300, 150));
        let outcome =
            update_window(&mut registry, &display, &mut sink, W, Rect::new(10, 10, 5, 5)).unwrap();

        assert_eq!(outcome, UpdateOutcome::Allocated { width: 300, height: 150 });
        let new = registry.get(W).unwrap().texture.unwrap().handle;
        assert_eq!(sink.calls[0], SinkCall::Release { texture: old });
        assert_eq!(sink.calls[1], SinkCall::Allocate { texture: new, width: 300, height: 150 });
        assert_eq!(sink.uploads(), vec![(new, Rect::full(300, 150))]);
    }

    #[test]
    fn test_unmapped_window_loses_its_texture() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        display.set_viewable(W, false);
        let outcome = update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        assert_eq!(outcome, UpdateOutcome::Released);
        let node = registry.get(W).unwrap();
        assert!(!node.mapped);
        assert!(node.texture.is_none());

        // Still unmapped: nothing is allocated
        let outcome = update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        assert_eq!(outcome, UpdateOutcome::NotViewable);
    }

    #[test]
    fn test_children_and_input_only_windows_are_not_textured() {
        let (display, mut registry, mut sink) = setup();

        let outcome =
            update_window(&mut registry, &display, &mut sink, 0x201, Rect::default()).unwrap();
        assert_eq!(outcome, UpdateOutcome::NotTopLevel);
        assert!(registry.get(0x201).unwrap().mapped);

        display.set_class(W, WindowClass::InputOnly);
        let outcome = update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        assert_eq!(outcome, UpdateOutcome::NotViewable);
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_failed_query_leaves_state_untouched() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        let before = registry.get(W).unwrap().texture;

        display.fail(W);
        assert!(update_window(&mut registry, &display, &mut sink, W, Rect::new(0, 0, 5, 5)).is_err());

        assert_eq!(registry.get(W).unwrap().texture, before);
        assert!(registry.get(W).unwrap().mapped);
        assert_eq!(display.grab_depth(), 0);
    }

    #[test]
    fn test_unsupported_pixel_size_is_an_error() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        sink.calls.clear();

        display.set_bytes_per_pixel(2);
        let result = update_window(&mut registry, &display, &mut sink, W, Rect::new(0, 0, 8, 8));

        assert!(matches!(result, Err(MirrorError::UnsupportedPixels(2))));
        assert!(sink.uploads().is_empty());
        assert_eq!(display.grab_depth(), 0);
    }

    #[test]
    fn test_failed_first_read_leaves_no_texture() {
        let (display, mut registry, mut sink) = setup();
        display.set_bytes_per_pixel(2);

        let result = update_window(&mut registry, &display, &mut sink, W, Rect::default());

        assert!(matches!(result, Err(MirrorError::UnsupportedPixels(2))));
        assert!(registry.get(W).unwrap().texture.is_none());
        assert!(matches!(sink.calls.last(), Some(SinkCall::Release { .. })));

        display.set_bytes_per_pixel(4);
        let outcome = update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();
        assert_eq!(outcome, UpdateOutcome::Allocated { width: 200, height: 100 });
        assert_eq!(sink.uploads().len(), 1);
        assert_eq!(display.grab_depth(), 0);
    }

    #[test]
    fn test_release_texture_on_unmap() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        assert!(release_texture(&mut registry, &mut sink, W));
        assert!(!release_texture(&mut registry, &mut sink, W));
        assert!(!registry.get(W).unwrap().mapped);
    }

    #[test]
    fn test_pixels_are_swizzled_to_rgba() {
        let (display, mut registry, mut sink) = setup();
        update_window(&mut registry, &display, &mut sink, W, Rect::default()).unwrap();

        match &sink.calls[1] {
            SinkCall::Upload { format, first_pixel, .. } => {
                assert_eq!(*format, PixelFormat::Rgba);
                assert_eq!(first_pixel.as_slice(), &[30, 20, 10, 255]);
            }
            other => panic!("Wrong sink call: {:?}", other),
        }
    }

    #[test]
    fn test_three_byte_pixels_skip_scanline_padding() {
        let image = Image {
            width: 3,
            height: 2,
            bytes_per_pixel: 3,
            stride: 12,
            data: vec![
                1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0, //
                11, 12, 13, 14, 15, 16, 17, 18, 19, 0, 0, 0,
            ],
        };

        let (format, pixels) = convert_pixels(&image).unwrap();

        assert_eq!(format, PixelFormat::Rgb);
        assert_eq!(
            pixels,
            vec![3, 2, 1, 6, 5, 4, 9, 8, 7, 13, 12, 11, 16, 15, 14, 19, 18, 17]
        );
    }
}

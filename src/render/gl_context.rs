//! OpenGL context for the preview window, created with GLX directly

use anyhow::{Context, Result, anyhow};
use std::ffi::CString;
use std::ptr;
use tracing::{debug, info, warn};
use x11_dl::glx::{self, Glx};
use x11_dl::xlib::{self, Xlib};

use crate::transport::WindowId;

// Errors on the preview connection are logged instead of aborting the process,
// which is what Xlib's default handler would do.
unsafe extern "C" fn x_error_handler(
    _display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> i32 {
    if !event.is_null() {
        let (error_code, request_code, minor_code) =
            unsafe { ((*event).error_code, (*event).request_code, (*event).minor_code) };
        warn!(
            "X error on preview display: code={}, request={}, minor={}",
            error_code, request_code, minor_code
        );
    }
    0
}

/// Double-buffered GLX context bound to its own top-level window
pub struct GlContext {
    glx: Glx,
    xlib: Xlib,
    display: *mut xlib::Display,
    context: glx::GLXContext,
    window: xlib::Window,
    colormap: xlib::Colormap,
}

impl GlContext {
    /// Open `display_name` (or $DISPLAY), create a `width`x`height` window
    /// titled `title` and make a GL context current on it.
    pub fn new(display_name: Option<&str>, title: &str, width: u32, height: u32) -> Result<Self> {
        let xlib = Xlib::open().context("Failed to load libX11")?;
        let glx = Glx::open().context("Failed to load libGLX")?;

        let display_cstr = match display_name {
            Some(name) => Some(CString::new(name)?),
            None => None,
        };
        let display = unsafe {
            (xlib.XOpenDisplay)(display_cstr.as_ref().map_or(ptr::null(), |s| s.as_ptr()))
        };
        if display.is_null() {
            return Err(anyhow!(
                "Failed to open preview display {}",
                display_name.unwrap_or("$DISPLAY")
            ));
        }

        unsafe {
            (xlib.XSetErrorHandler)(Some(x_error_handler));
        }

        let screen = unsafe { (xlib.XDefaultScreen)(display) };
        let root = unsafe { (xlib.XRootWindow)(display, screen) };

        let mut major = 0;
        let mut minor = 0;
        unsafe {
            (glx.glXQueryVersion)(display, &mut major, &mut minor);
        }
        info!("GLX version {}.{}", major, minor);

        let attribs = [
            glx::GLX_X_RENDERABLE as i32, 1,
            glx::GLX_DRAWABLE_TYPE as i32, glx::GLX_WINDOW_BIT as i32,
            glx::GLX_RENDER_TYPE as i32, glx::GLX_RGBA_BIT as i32,
            glx::GLX_DOUBLEBUFFER as i32, 1,
            glx::GLX_RED_SIZE as i32, 8,
            glx::GLX_GREEN_SIZE as i32, 8,
            glx::GLX_BLUE_SIZE as i32, 8,
            glx::GLX_DEPTH_SIZE as i32, 24,
            0,
        ];

        let mut num_configs = 0;
        let configs_ptr =
            unsafe { (glx.glXChooseFBConfig)(display, screen, attribs.as_ptr(), &mut num_configs) };
        if configs_ptr.is_null() || num_configs == 0 {
            unsafe { (xlib.XCloseDisplay)(display) };
            return Err(anyhow!("No double-buffered RGBA GLX FBConfig found"));
        }
        let config = unsafe { *configs_ptr };
        unsafe { (xlib.XFree)(configs_ptr as *mut _) };

        let vinfo = unsafe { (glx.glXGetVisualFromFBConfig)(display, config) };
        if vinfo.is_null() {
            unsafe { (xlib.XCloseDisplay)(display) };
            return Err(anyhow!("Failed to get visual from FBConfig"));
        }
        let (visual, depth, visual_id) = unsafe { ((*vinfo).visual, (*vinfo).depth, (*vinfo).visualid) };
        debug!("Preview visual 0x{:x}, depth {}", visual_id, depth);

        let colormap = unsafe { (xlib.XCreateColormap)(display, root, visual, xlib::AllocNone) };
        let window = unsafe {
            let mut attrs = std::mem::zeroed::<xlib::XSetWindowAttributes>();
            attrs.colormap = colormap;
            attrs.background_pixel = 0;
            attrs.border_pixel = 0;
            (xlib.XCreateWindow)(
                display,
                root,
                0,
                0,
                width.max(1),
                height.max(1),
                0,
                depth,
                xlib::InputOutput as u32,
                visual,
                xlib::CWBackPixel | xlib::CWBorderPixel | xlib::CWColormap,
                &mut attrs,
            )
        };
        unsafe { (xlib.XFree)(vinfo as *mut _) };

        if window == 0 {
            unsafe {
                (xlib.XFreeColormap)(display, colormap);
                (xlib.XCloseDisplay)(display);
            }
            return Err(anyhow!("XCreateWindow failed for preview window"));
        }

        let title_cstr = CString::new(title)?;
        unsafe {
            (xlib.XStoreName)(display, window, title_cstr.as_ptr());
            (xlib.XMapRaised)(display, window);
            (xlib.XFlush)(display);
        }

        let context = unsafe {
            (glx.glXCreateNewContext)(display, config, glx::GLX_RGBA_TYPE as i32, ptr::null_mut(), 1)
        };
        if context.is_null() {
            unsafe {
                (xlib.XDestroyWindow)(display, window);
                (xlib.XFreeColormap)(display, colormap);
                (xlib.XCloseDisplay)(display);
            }
            return Err(anyhow!("glXCreateNewContext failed"));
        }

        if unsafe { (glx.glXMakeCurrent)(display, window, context) } == 0 {
            unsafe {
                (glx.glXDestroyContext)(display, context);
                (xlib.XDestroyWindow)(display, window);
                (xlib.XFreeColormap)(display, colormap);
                (xlib.XCloseDisplay)(display);
            }
            return Err(anyhow!("glXMakeCurrent failed on preview window"));
        }

        gl::load_with(|symbol| {
            let Ok(symbol_cstr) = CString::new(symbol) else {
                return ptr::null();
            };
            unsafe {
                match (glx.glXGetProcAddress)(symbol_cstr.as_ptr() as *const _) {
                    Some(f) => f as *const _,
                    None => ptr::null(),
                }
            }
        });

        info!("Preview window 0x{:x} ready ({}x{})", window, width, height);

        Ok(Self {
            glx,
            xlib,
            display,
            context,
            window,
            colormap,
        })
    }

    /// X id of the preview window, as seen on its display
    pub fn window(&self) -> WindowId {
        self.window as WindowId
    }

    pub fn swap_buffers(&self) {
        unsafe {
            (self.glx.glXSwapBuffers)(self.display, self.window);
        }
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        unsafe {
            (self.glx.glXMakeCurrent)(self.display, 0, ptr::null_mut());
            (self.glx.glXDestroyContext)(self.display, self.context);
            (self.xlib.XDestroyWindow)(self.display, self.window);
            (self.xlib.XFreeColormap)(self.display, self.colormap);
            (self.xlib.XCloseDisplay)(self.display);
        }
    }
}

//! DXGI Desktop Duplication screen capture for Windows.
//!
//! # Platform
//!
//! This module is **Windows-only**. On other platforms the type is still
//! defined but construction fails with [`RassistError::Unsupported`], which
//! the agent treats as a startup-fatal condition.

use std::time::Duration;

use crate::error::RassistError;
use crate::screen::{Bitmap, ScreenCapturer};

/// Default time to wait for the compositor to present a new frame.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(50);

/// DXGI-based screen capturer.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device.
/// 2. Enumerate outputs and duplicate the target monitor.
/// 3. Create a CPU-readable staging texture.
/// 4. On each [`capture`](ScreenCapturer::capture):
///    - `AcquireNextFrame` (blocks up to the acquire timeout).
///    - Copy the desktop texture to the staging texture.
///    - Map, memcpy into a `Vec<u8>`, unmap, release.
///
/// Desktop duplication only reports *changes*; when nothing moved within
/// the timeout the previous bitmap is returned again so the stream keeps
/// its cadence.
pub struct DxgiCapturer {
    width: u32,
    height: u32,
    acquire_timeout_ms: u32,
    last: Option<Bitmap>,

    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(target_os = "windows")]
    duplication: windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication,
    #[cfg(target_os = "windows")]
    staging_texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

impl DxgiCapturer {
    /// Source display width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Source display height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Override the frame acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        self
    }

    fn repeat_last(&self) -> Result<Bitmap, RassistError> {
        self.last.clone().ok_or(RassistError::Timeout(Duration::from_millis(
            self.acquire_timeout_ms as u64,
        )))
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::screen::PixelFormat;
    use windows::{
        core::Interface,
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
    };

    fn dxgi_err(what: &str, e: windows::core::Error) -> RassistError {
        RassistError::Capture(format!("{what} failed: {e}"))
    }

    impl DxgiCapturer {
        /// Initialise the capturer for monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32) -> Result<Self, RassistError> {
            unsafe { Self::init_dxgi(monitor_index) }
        }

        unsafe fn init_dxgi(monitor_index: u32) -> Result<Self, RassistError> {
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| dxgi_err("D3D11CreateDevice", e))?;
            }
            let device: ID3D11Device =
                device.ok_or_else(|| RassistError::Capture("D3D11 device is None".into()))?;
            let context =
                context.ok_or_else(|| RassistError::Capture("D3D11 context is None".into()))?;

            // Device → Adapter → Output → Duplication.
            let dxgi_device: IDXGIDevice =
                device.cast().map_err(|e| dxgi_err("cast to IDXGIDevice", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }
                .map_err(|e| dxgi_err("GetAdapter", e))?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(monitor_index) }
                .map_err(|e| dxgi_err("EnumOutputs", e))?;
            let output1: IDXGIOutput1 =
                output.cast().map_err(|e| dxgi_err("cast to IDXGIOutput1", e))?;
            let duplication = unsafe { output1.DuplicateOutput(&device) }
                .map_err(|e| dxgi_err("DuplicateOutput", e))?;

            let dup_desc = unsafe { duplication.GetDesc() };
            let width = dup_desc.ModeDesc.Width;
            let height = dup_desc.ModeDesc.Height;

            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut staging_texture = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))
                    .map_err(|e| dxgi_err("CreateTexture2D (staging)", e))?;
            }
            let staging_texture = staging_texture
                .ok_or_else(|| RassistError::Capture("staging texture is None".into()))?;

            Ok(Self {
                width,
                height,
                acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u32,
                last: None,
                context,
                duplication,
                staging_texture,
            })
        }

        unsafe fn capture_inner(&mut self) -> Result<Bitmap, RassistError> {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                self.duplication.AcquireNextFrame(
                    self.acquire_timeout_ms,
                    &mut frame_info,
                    &mut resource,
                )
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return self.repeat_last(),
                Err(e) => return Err(dxgi_err("AcquireNextFrame", e)),
            }

            let resource =
                resource.ok_or_else(|| RassistError::Capture("acquired resource is None".into()))?;
            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                let _ = unsafe { self.duplication.ReleaseFrame() };
                dxgi_err("cast to ID3D11Texture2D", e)
            })?;

            unsafe { self.context.CopyResource(&self.staging_texture, &texture) };
            let _ = unsafe { self.duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| dxgi_err("Map", e))?;
            }
            let stride = mapped.RowPitch;
            let total_bytes = stride as usize * self.height as usize;
            let data =
                unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total_bytes) }
                    .to_vec();
            unsafe { self.context.Unmap(&self.staging_texture, 0) };

            let bitmap =
                Bitmap::with_stride(self.width, self.height, stride, PixelFormat::Bgra8, data)?;
            self.last = Some(bitmap.clone());
            Ok(bitmap)
        }
    }

    impl ScreenCapturer for DxgiCapturer {
        fn capture(&mut self) -> Result<Bitmap, RassistError> {
            unsafe { self.capture_inner() }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32) -> Result<Self, RassistError> {
        Err(RassistError::Unsupported(
            "DXGI Desktop Duplication is only available on Windows",
        ))
    }
}

#[cfg(not(target_os = "windows"))]
impl ScreenCapturer for DxgiCapturer {
    fn capture(&mut self) -> Result<Bitmap, RassistError> {
        self.repeat_last()
    }
}

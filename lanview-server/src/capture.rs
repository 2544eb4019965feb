//! Screen capture providers.
//!
//! A [`ScreenCapturer`] hands back raw bitmaps for one monitor. Two
//! providers exist:
//!
//! - [`DxgiCapturer`]: DXGI Desktop Duplication (Windows only).
//! - [`TestPattern`]: a synthetic moving pattern, used on other
//!   platforms and in tests.
//!
//! Capturers hold platform handles that must stay on the thread that
//! created them, so they are driven from the dedicated capture thread
//! in [`crate::pipeline`].

use std::time::{Duration, Instant};

use lanview_core::{MonitorInfo, PixelFormat, RawScreenFrame, RemoteError};

use crate::config::CaptureBackend;

/// One monitor's frame producer.
pub trait ScreenCapturer {
    /// Grab the next frame, waiting at most `timeout`.
    ///
    /// Returns [`RemoteError::Timeout`] when the desktop did not change
    /// within the deadline.
    fn capture(&mut self, timeout: Duration) -> Result<RawScreenFrame, RemoteError>;

    /// Frame size in pixels.
    fn size(&self) -> (u32, u32);
}

impl CaptureBackend {
    /// Resolve `Auto` for the current platform.
    pub fn resolve(self) -> Self {
        match self {
            CaptureBackend::Auto if cfg!(target_os = "windows") => CaptureBackend::Dxgi,
            CaptureBackend::Auto => CaptureBackend::TestPattern,
            other => other,
        }
    }
}

/// Open a capturer for `monitor`.
pub fn open(backend: CaptureBackend, monitor: u32) -> Result<Box<dyn ScreenCapturer>, RemoteError> {
    match backend.resolve() {
        CaptureBackend::Dxgi => Ok(Box::new(DxgiCapturer::new(monitor)?)),
        _ => Ok(Box::new(TestPattern::new(
            TestPattern::DEFAULT_WIDTH,
            TestPattern::DEFAULT_HEIGHT,
        ))),
    }
}

/// Monitors the backend can capture.
pub fn monitors(backend: CaptureBackend) -> Result<Vec<MonitorInfo>, RemoteError> {
    match backend.resolve() {
        CaptureBackend::Dxgi => DxgiCapturer::monitors(),
        _ => Ok(vec![TestPattern::monitor_info()]),
    }
}

// ── TestPattern ──────────────────────────────────────────────────

/// Synthetic BGRA frames: a diagonal gradient with a vertical bar that
/// moves one step per capture.
pub struct TestPattern {
    width: u32,
    height: u32,
    frame: u32,
}

impl TestPattern {
    pub const DEFAULT_WIDTH: u32 = 1280;
    pub const DEFAULT_HEIGHT: u32 = 720;
    const BAR_WIDTH: u32 = 16;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame: 0,
        }
    }

    pub fn monitor_info() -> MonitorInfo {
        MonitorInfo {
            id: 0,
            name: "Test Pattern".into(),
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            primary: true,
        }
    }
}

impl ScreenCapturer for TestPattern {
    fn capture(&mut self, _timeout: Duration) -> Result<RawScreenFrame, RemoteError> {
        let stride = self.width * 4;
        let mut data = vec![0u8; stride as usize * self.height as usize];
        let bar = (self.frame * Self::BAR_WIDTH) % self.width;

        for y in 0..self.height {
            let row = &mut data[(y * stride) as usize..((y + 1) * stride) as usize];
            for x in 0..self.width {
                let px = &mut row[(x * 4) as usize..(x * 4 + 4) as usize];
                if x >= bar && x < bar + Self::BAR_WIDTH {
                    px.copy_from_slice(&[255, 255, 255, 255]);
                } else {
                    let b = (x * 255 / self.width) as u8;
                    let g = (y * 255 / self.height) as u8;
                    px.copy_from_slice(&[b, g, 64, 255]);
                }
            }
        }
        self.frame = self.frame.wrapping_add(1);

        Ok(RawScreenFrame {
            width: self.width,
            height: self.height,
            stride,
            format: PixelFormat::Bgra8,
            data,
            captured_at: Instant::now(),
        })
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// ── DxgiCapturer ─────────────────────────────────────────────────

/// DXGI-based screen capturer.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device.
/// 2. Duplicate the target output of the default adapter.
/// 3. Create a CPU-readable staging texture.
/// 4. On each capture: acquire, copy to staging, map, copy out, unmap.
pub struct DxgiCapturer {
    width: u32,
    height: u32,

    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(target_os = "windows")]
    duplication: windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication,
    #[cfg(target_os = "windows")]
    staging: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

impl ScreenCapturer for DxgiCapturer {
    fn capture(&mut self, timeout: Duration) -> Result<RawScreenFrame, RemoteError> {
        self.capture_frame(timeout)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows::Win32::Graphics::{
        Direct3D::D3D_DRIVER_TYPE_HARDWARE,
        Direct3D11::*,
        Dxgi::{Common::*, *},
    };
    use windows::core::Interface;

    fn capture_err(what: &str, e: windows::core::Error) -> RemoteError {
        RemoteError::Capture(format!("{what} failed: {e}"))
    }

    impl DxgiCapturer {
        /// Duplicate output `monitor` (0 = primary) of the default adapter.
        pub fn new(monitor: u32) -> Result<Self, RemoteError> {
            unsafe { Self::init(monitor) }
        }

        unsafe fn init(monitor: u32) -> Result<Self, RemoteError> {
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
                .map_err(|e| capture_err("D3D11CreateDevice", e))?;
            }
            let device: ID3D11Device =
                device.ok_or_else(|| RemoteError::Capture("no D3D11 device".into()))?;
            let context =
                context.ok_or_else(|| RemoteError::Capture("no D3D11 context".into()))?;

            let dxgi_device: IDXGIDevice =
                device.cast().map_err(|e| capture_err("IDXGIDevice cast", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }
                .map_err(|e| capture_err("GetAdapter", e))?;
            let output = unsafe { adapter.EnumOutputs(monitor) }
                .map_err(|e| capture_err(&format!("EnumOutputs({monitor})"), e))?;
            let output1: IDXGIOutput1 =
                output.cast().map_err(|e| capture_err("IDXGIOutput1 cast", e))?;
            let duplication = unsafe { output1.DuplicateOutput(&device) }
                .map_err(|e| capture_err("DuplicateOutput", e))?;

            let desc = unsafe { duplication.GetDesc() };
            let width = desc.ModeDesc.Width;
            let height = desc.ModeDesc.Height;

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
            let mut staging = None;
            unsafe { device.CreateTexture2D(&staging_desc, None, Some(&mut staging)) }
                .map_err(|e| capture_err("CreateTexture2D", e))?;
            let staging =
                staging.ok_or_else(|| RemoteError::Capture("no staging texture".into()))?;

            Ok(Self {
                width,
                height,
                context,
                duplication,
                staging,
            })
        }

        /// Every output attached to the desktop on the default adapter.
        pub fn monitors() -> Result<Vec<MonitorInfo>, RemoteError> {
            let factory: IDXGIFactory1 =
                unsafe { CreateDXGIFactory1() }.map_err(|e| capture_err("CreateDXGIFactory1", e))?;
            let adapter = unsafe { factory.EnumAdapters1(0) }
                .map_err(|e| capture_err("EnumAdapters1", e))?;

            let mut monitors = Vec::new();
            let mut index = 0u32;
            while let Ok(output) = unsafe { adapter.EnumOutputs(index) } {
                let desc = unsafe { output.GetDesc() }.map_err(|e| capture_err("GetDesc", e))?;
                let rect = desc.DesktopCoordinates;
                let name_len = desc.DeviceName.iter().position(|&c| c == 0).unwrap_or(32);
                monitors.push(MonitorInfo {
                    id: index,
                    name: String::from_utf16_lossy(&desc.DeviceName[..name_len]),
                    width: (rect.right - rect.left).max(0) as u32,
                    height: (rect.bottom - rect.top).max(0) as u32,
                    primary: rect.left == 0 && rect.top == 0,
                });
                index += 1;
            }
            Ok(monitors)
        }

        fn capture_frame(&mut self, timeout: Duration) -> Result<RawScreenFrame, RemoteError> {
            unsafe { self.capture_inner(timeout) }
        }

        unsafe fn capture_inner(&mut self, timeout: Duration) -> Result<RawScreenFrame, RemoteError> {
            let timeout_ms = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                self.duplication
                    .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => {
                    return Err(RemoteError::Timeout(timeout));
                }
                Err(e) => return Err(capture_err("AcquireNextFrame", e)),
            }

            let Some(resource) = resource else {
                let _ = unsafe { self.duplication.ReleaseFrame() };
                return Err(RemoteError::Capture("acquired resource is empty".into()));
            };
            let texture: ID3D11Texture2D = match resource.cast() {
                Ok(t) => t,
                Err(e) => {
                    let _ = unsafe { self.duplication.ReleaseFrame() };
                    return Err(capture_err("ID3D11Texture2D cast", e));
                }
            };

            unsafe { self.context.CopyResource(&self.staging, &texture) };
            let _ = unsafe { self.duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            }
            .map_err(|e| capture_err("Map", e))?;

            let stride = mapped.RowPitch;
            let len = stride as usize * self.height as usize;
            let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) }.to_vec();
            unsafe { self.context.Unmap(&self.staging, 0) };

            Ok(RawScreenFrame {
                width: self.width,
                height: self.height,
                stride,
                format: PixelFormat::Bgra8,
                data,
                captured_at: Instant::now(),
            })
        }
    }
}

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    pub fn new(_monitor: u32) -> Result<Self, RemoteError> {
        Err(RemoteError::Capture(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }

    pub fn monitors() -> Result<Vec<MonitorInfo>, RemoteError> {
        Err(RemoteError::Capture(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }

    fn capture_frame(&mut self, _timeout: Duration) -> Result<RawScreenFrame, RemoteError> {
        Err(RemoteError::Capture("not supported on this platform".into()))
    }
}

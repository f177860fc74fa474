mod blit;

use std::sync::Arc;

use anyhow::Context;
use handmade_core::{Extent, PixelSurface, PresentTarget, Rect};
use winit::window::Window;

use blit::BlitPipeline;

/// Colour of the letterbox bars.
const BAR_COLOR: wgpu::Color = wgpu::Color::BLACK;

pub struct GpuState {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: wgpu::Surface<'static>,
    pub surface_config: wgpu::SurfaceConfiguration,
    blit: BlitPipeline,
    max_dimension: u32,
    out_of_memory: bool,
}

/// Clamp a window size to the largest texture the device can create.
fn fit_to_limit(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    (width.min(max_dimension), height.min(max_dimension))
}

impl GpuState {
    pub fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("creating window surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no suitable GPU adapter found")?;

        tracing::info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("handmade"),
            required_features: wgpu::Features::empty(),
            // Fullscreen on high-resolution displays needs the adapter's
            // own texture size limit.
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            ..Default::default()
        }))
        .context("creating GPU device")?;

        let max_dimension = device.limits().max_texture_dimension_2d;
        tracing::debug!(max_dimension, "device limits");

        let size = window.inner_size();
        let (width, height) = fit_to_limit(size.width, size.height, max_dimension);
        let surface_caps = surface.get_capabilities(&adapter);
        // The back buffer holds display values already, so skip the sRGB
        // encode on write.
        let format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .context("surface reports no formats")?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let blit = BlitPipeline::new(&device, format);

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            blit,
            max_dimension,
            out_of_memory: false,
        })
    }

    /// Zero-area sizes (minimized windows) keep the old configuration.
    /// Sizes past the device limit are clamped.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = fit_to_limit(width, height, self.max_dimension);
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    /// The largest drawable size for a window of `width` x `height`.
    pub fn fit(&self, width: u32, height: u32) -> Extent {
        let (width, height) = fit_to_limit(width, height, self.max_dimension);
        Extent::new(width, height)
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.surface_config.width, self.surface_config.height)
    }

    /// Set once the swapchain reports it is out of memory; there is no
    /// recovering from that.
    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory
    }
}

impl PresentTarget for GpuState {
    type Error = wgpu::SurfaceError;

    fn blit(
        &mut self,
        surface: &PixelSurface,
        dest: Rect,
        window: Extent,
    ) -> Result<(), Self::Error> {
        let window = self.fit(window.width, window.height);
        if window != self.extent() {
            self.resize(window.width, window.height);
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.surface.configure(&self.device, &self.surface_config);
                return Err(e);
            }
            Err(e @ wgpu::SurfaceError::OutOfMemory) => {
                self.out_of_memory = true;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.blit
            .upload(&self.device, &self.queue, surface, self.max_dimension);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present"),
            });
        self.blit.draw(&mut encoder, &view, dest, BAR_COLOR);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_windows_are_clamped() {
        assert_eq!(fit_to_limit(2560, 1440, 2048), (2048, 1440));
        assert_eq!(fit_to_limit(3840, 2160, 2048), (2048, 2048));
        assert_eq!(fit_to_limit(3840, 2160, 8192), (3840, 2160));
    }

    #[test]
    fn minimized_stays_zero() {
        assert_eq!(fit_to_limit(0, 0, 2048), (0, 0));
    }
}

//! Fullscreen winit window with a wgpu blit pipeline.
//!
//! The surface shows one texture at a time; every frame the controller
//! presents is uploaded and stretched over the whole screen, so small
//! blending copies display identically to full-resolution frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};
use wgpu::util::DeviceExt;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::EventLoopExtPumpEvents,
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::error::Error;
use crate::events::InputEvent;
use crate::surface::DisplaySurface;

const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(400);
/// Pump slice while waiting out a present timeout; keeps input latency low.
const PUMP_SLICE: Duration = Duration::from_millis(25);

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

const QUAD: [Vertex; 4] = [
    Vertex {
        pos: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    Vertex {
        pos: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    Vertex {
        pos: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    Vertex {
        pos: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

struct Tex {
    texture: wgpu::Texture,
    w: u32,
    h: u32,
}

struct Gpu {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    vbuf: wgpu::Buffer,
    tex: Tex,
}

impl Gpu {
    fn make_tex(device: &wgpu::Device, w: u32, h: u32) -> Tex {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("photo"),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Tex { texture, w, h }
    }

    fn make_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        tex: &Tex,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        let view = tex
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn upload(&mut self, frame: &image::RgbaImage) {
        let (w, h) = frame.dimensions();
        if self.tex.w != w || self.tex.h != h {
            self.tex = Self::make_tex(&self.device, w, h);
            self.bind_group =
                Self::make_bind_group(&self.device, &self.bind_layout, &self.tex, &self.sampler);
        }
        self.queue.write_texture(
            self.tex.texture.as_image_copy(),
            frame.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
    }

    fn draw(&mut self) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(err) => return Err(anyhow!("surface error: {err}")),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("blit") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, self.vbuf.slice(..));
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}

#[derive(Default)]
struct KioskApp {
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    size: (u32, u32),
    pending: Vec<InputEvent>,
    cursor: PhysicalPosition<f64>,
    last_click: Option<Instant>,
    init_error: Option<String>,
}

impl KioskApp {
    fn ready(&self) -> bool {
        self.gpu.is_some()
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<Gpu> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window.clone())
            .context("creating render surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no compatible GPU adapter found")?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .context("requesting GPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(wgpu::TextureFormat::is_srgb)
            .unwrap_or(caps.formats[0]);
        let (width, height) = self.size;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bind_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pipeline_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let vbuf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let tex = Gpu::make_tex(&device, 1, 1);
        let bind_group = Gpu::make_bind_group(&device, &bind_layout, &tex, &sampler);

        Ok(Gpu {
            surface,
            device,
            queue,
            config,
            pipeline,
            bind_layout,
            bind_group,
            sampler,
            vbuf,
            tex,
        })
    }

    fn map_key(&self, code: KeyCode) -> Option<InputEvent> {
        match code {
            KeyCode::ArrowLeft => Some(InputEvent::Left),
            KeyCode::ArrowRight => Some(InputEvent::Right),
            KeyCode::ArrowUp => Some(InputEvent::Up),
            KeyCode::ArrowDown => Some(InputEvent::Down),
            KeyCode::Escape => Some(InputEvent::Quit),
            KeyCode::KeyQ => Some(InputEvent::ForceOff),
            KeyCode::KeyE => Some(InputEvent::ToggleEditMode),
            KeyCode::Minus => Some(InputEvent::CycleCorner),
            KeyCode::Equal => Some(InputEvent::CycleSize),
            KeyCode::KeyF => Some(InputEvent::CycleFont),
            KeyCode::KeyS => Some(InputEvent::CycleShadow),
            _ => None,
        }
    }
}

impl ApplicationHandler for KioskApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = WindowAttributes::default().with_title("photo-kiosk");
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.init_error = Some(format!("create window: {err}"));
                return;
            }
        };
        let monitor = window.current_monitor();
        window.set_fullscreen(Some(Fullscreen::Borderless(monitor)));
        window.set_cursor_visible(false);
        let size = window.inner_size();
        self.size = (size.width.max(1), size.height.max(1));
        info!(width = self.size.0, height = self.size.1, "window fullscreen initialized");

        match self.init_gpu(window.clone()) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(err) => self.init_error = Some(format!("{err:#}")),
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.pending.push(InputEvent::Quit),
            WindowEvent::Resized(size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.config.width = size.width.max(1);
                    gpu.config.height = size.height.max(1);
                    gpu.surface.configure(&gpu.device, &gpu.config);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && let PhysicalKey::Code(code) = event.physical_key
                    && let Some(mapped) = self.map_key(code)
                {
                    self.pending.push(mapped);
                }
            }
            WindowEvent::CursorMoved { position, .. } => self.cursor = position,
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                let now = Instant::now();
                let double = self
                    .last_click
                    .is_some_and(|t| now.duration_since(t) < DOUBLE_CLICK_WINDOW);
                self.last_click = Some(now);
                if double {
                    self.pending.push(InputEvent::DoubleClick {
                        x: self.cursor.x.max(0.0) as u32,
                        y: self.cursor.y.max(0.0) as u32,
                    });
                }
            }
            _ => {}
        }
    }
}

/// The production display surface: a borderless fullscreen window on the
/// primary monitor.
pub struct WindowSurface {
    event_loop: EventLoop<()>,
    app: KioskApp,
}

impl WindowSurface {
    /// Create the window and GPU pipeline, pumping the event loop until the
    /// platform has delivered the initial resume.
    pub fn new() -> Result<Self, Error> {
        let event_loop = EventLoop::new()
            .map_err(|err| Error::Render(anyhow!("creating event loop: {err}")))?;
        let mut app = KioskApp::default();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut event_loop = event_loop;
        while !app.ready() {
            event_loop.pump_app_events(Some(PUMP_SLICE), &mut app);
            if let Some(err) = app.init_error.take() {
                return Err(Error::Render(anyhow!(err)));
            }
            if Instant::now() > deadline {
                return Err(Error::Render(anyhow!("window initialization timed out")));
            }
        }
        Ok(Self { event_loop, app })
    }
}

impl DisplaySurface for WindowSurface {
    fn size(&self) -> (u32, u32) {
        self.app.size
    }

    fn present(&mut self, frame: &image::RgbaImage, wait: Duration) -> Result<Vec<InputEvent>, Error> {
        if let Some(gpu) = &mut self.app.gpu {
            gpu.upload(frame);
            gpu.draw().map_err(Error::Render)?;
        }

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let status = self
                .event_loop
                .pump_app_events(Some(remaining.min(PUMP_SLICE)), &mut self.app);
            if let winit::platform::pump_events::PumpStatus::Exit(code) = status {
                warn!(code, "event loop exited");
                self.app.pending.push(InputEvent::Quit);
            }
            if !self.app.pending.is_empty() || Instant::now() >= deadline {
                break;
            }
        }
        Ok(std::mem::take(&mut self.app.pending))
    }
}
